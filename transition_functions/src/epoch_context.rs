use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use bls::PublicKeyBytes;
use helper_functions::beacon_state_accessors::get_seed;
use helper_functions::crypto::hash_to_h256;
use helper_functions::math::int_to_bytes;
use helper_functions::misc::{
    compute_committee_count, compute_epoch_at_slot, compute_proposer_index,
    compute_start_slot_at_epoch,
};
use helper_functions::shuffle::unshuffle_list;
use typenum::marker_traits::Unsigned;
use types::beacon_state::BeaconState;
use types::config::Config;
use types::primitives::{CommitteeIndex, Epoch, Slot, ValidatorIndex, H256};

use crate::error::Error;

/// One epoch's committee assignment.
///
/// `shuffling` holds the active validators permuted into committee order;
/// committees are contiguous windows of it, so the whole assignment is two
/// allocations regardless of committee count.
#[derive(Debug)]
pub struct ShufflingEpoch<C: Config> {
    pub epoch: Epoch,
    /// Active validator indices in registry order.
    pub active_indices: Vec<ValidatorIndex>,
    /// Active validator indices in shuffled (committee) order.
    pub shuffling: Vec<ValidatorIndex>,
    /// `committees[slot_in_epoch][committee_index]` windows into `shuffling`.
    committees: Vec<Vec<Range<usize>>>,
    phantom: core::marker::PhantomData<C>,
}

impl<C: Config> ShufflingEpoch<C> {
    /// `indices_bounded` carries `(index, activation_epoch, exit_epoch)`
    /// for every validator in the registry.
    pub fn new(
        state: &BeaconState<C>,
        indices_bounded: &[(ValidatorIndex, Epoch, Epoch)],
        epoch: Epoch,
    ) -> Self {
        let seed = get_seed(state, epoch, C::domain_beacon_attester());

        let active_indices = indices_bounded
            .iter()
            .filter(|(_, activation, exit)| *activation <= epoch && epoch < *exit)
            .map(|(index, _, _)| *index)
            .collect::<Vec<_>>();

        // The list is unshuffled rather than shuffled so that
        // `shuffling[i]` lands where the single-index shuffle maps `i`
        // from; committees then slice it directly.
        let mut shuffling = active_indices.clone();
        unshuffle_list::<C>(&mut shuffling, seed);

        let active_count = active_indices.len() as u64;
        let committees_per_slot = compute_committee_count::<C>(active_count);
        let committee_count = committees_per_slot * C::SlotsPerEpoch::to_u64();

        let committees = (0..C::SlotsPerEpoch::to_u64())
            .map(|epoch_slot| {
                (0..committees_per_slot)
                    .map(|committee_index| {
                        let index = epoch_slot * committees_per_slot + committee_index;
                        let start = (active_count * index / committee_count) as usize;
                        let end = (active_count * (index + 1) / committee_count) as usize;
                        start..end
                    })
                    .collect()
            })
            .collect();

        Self {
            epoch,
            active_indices,
            shuffling,
            committees,
            phantom: core::marker::PhantomData,
        }
    }

    pub fn committees_at(&self, epoch_slot: usize) -> &[Range<usize>] {
        &self.committees[epoch_slot]
    }

    pub fn committee(&self, epoch_slot: usize, index: usize) -> Option<&[ValidatorIndex]> {
        let range = self.committees[epoch_slot].get(index)?.clone();
        Some(&self.shuffling[range])
    }
}

/// Caches that outlive a single slot: pubkey lookups and the shufflings
/// and proposers of the previous, current and next epochs.
///
/// Cloning copies the pubkey tables (they grow with deposits) but shares
/// the shufflings and the proposer table, since those are only ever
/// replaced wholesale on rotation. A transition runs against a clone and
/// the caller's context is swapped only when the transition succeeds.
#[derive(Clone, Debug)]
pub struct EpochContext<C: Config> {
    pubkey_to_index: HashMap<PublicKeyBytes, ValidatorIndex>,
    index_to_pubkey: Vec<PublicKeyBytes>,
    pub previous_shuffling: Arc<ShufflingEpoch<C>>,
    pub current_shuffling: Arc<ShufflingEpoch<C>>,
    pub next_shuffling: Arc<ShufflingEpoch<C>>,
    /// One proposer per slot of the current epoch.
    proposers: Arc<Vec<ValidatorIndex>>,
}

impl<C: Config> EpochContext<C> {
    /// Build every cache from scratch for the state's current epoch.
    pub fn load(state: &BeaconState<C>) -> Result<Self, Error> {
        let mut pubkey_to_index = HashMap::with_capacity(state.validators.len());
        let mut index_to_pubkey = Vec::with_capacity(state.validators.len());
        for (index, validator) in state.validators.iter().enumerate() {
            pubkey_to_index.insert(validator.pubkey.clone(), index as u64);
            index_to_pubkey.push(validator.pubkey.clone());
        }

        let current_epoch = compute_epoch_at_slot::<C>(state.slot);
        let previous_epoch = if current_epoch == C::genesis_epoch() {
            current_epoch
        } else {
            current_epoch - 1
        };
        let next_epoch = current_epoch + 1;

        let indices_bounded = indices_bounded(state);

        let current_shuffling =
            Arc::new(ShufflingEpoch::new(state, &indices_bounded, current_epoch));
        let previous_shuffling = if previous_epoch == current_epoch {
            Arc::clone(&current_shuffling)
        } else {
            Arc::new(ShufflingEpoch::new(state, &indices_bounded, previous_epoch))
        };
        let next_shuffling = Arc::new(ShufflingEpoch::new(state, &indices_bounded, next_epoch));

        let proposers = Arc::new(compute_proposers(state, &current_shuffling)?);

        Ok(Self {
            pubkey_to_index,
            index_to_pubkey,
            previous_shuffling,
            current_shuffling,
            next_shuffling,
            proposers,
        })
    }

    /// Advance the caches by one epoch. Must be called exactly when the
    /// state's slot has just crossed into a new epoch.
    pub fn rotate(&mut self, state: &BeaconState<C>) -> Result<(), Error> {
        self.previous_shuffling = Arc::clone(&self.current_shuffling);
        self.current_shuffling = Arc::clone(&self.next_shuffling);
        let next_epoch = self.current_shuffling.epoch + 1;
        let indices_bounded = indices_bounded(state);
        self.next_shuffling = Arc::new(ShufflingEpoch::new(state, &indices_bounded, next_epoch));
        self.proposers = Arc::new(compute_proposers(state, &self.current_shuffling)?);
        Ok(())
    }

    /// Extend the pubkey tables with validators appended since the last
    /// sync. Only deposits append validators.
    pub fn sync_pubkeys(&mut self, state: &BeaconState<C>) {
        debug_assert_eq!(self.pubkey_to_index.len(), self.index_to_pubkey.len());

        let known = self.index_to_pubkey.len();
        for (index, validator) in state.validators.iter().enumerate().skip(known) {
            self.pubkey_to_index
                .insert(validator.pubkey.clone(), index as u64);
            self.index_to_pubkey.push(validator.pubkey.clone());
        }
    }

    pub fn current_epoch(&self) -> Epoch {
        self.current_shuffling.epoch
    }

    pub fn previous_epoch(&self) -> Epoch {
        self.previous_shuffling.epoch
    }

    pub fn pubkey_to_index(&self, pubkey: &PublicKeyBytes) -> Option<ValidatorIndex> {
        self.pubkey_to_index.get(pubkey).copied()
    }

    pub fn index_to_pubkey(&self, index: ValidatorIndex) -> Option<&PublicKeyBytes> {
        self.index_to_pubkey.get(index as usize)
    }

    fn shuffling_for_slot(&self, slot: Slot) -> Result<&ShufflingEpoch<C>, Error> {
        let epoch = compute_epoch_at_slot::<C>(slot);
        if epoch == self.previous_shuffling.epoch {
            Ok(&self.previous_shuffling)
        } else if epoch == self.current_shuffling.epoch {
            Ok(&self.current_shuffling)
        } else if epoch == self.next_shuffling.epoch {
            Ok(&self.next_shuffling)
        } else {
            Err(Error::ShufflingOutOfRange(epoch))
        }
    }

    pub fn get_beacon_committee(
        &self,
        slot: Slot,
        index: CommitteeIndex,
    ) -> Result<&[ValidatorIndex], Error> {
        let shuffling = self.shuffling_for_slot(slot)?;
        let epoch_slot = (slot % C::SlotsPerEpoch::to_u64()) as usize;
        shuffling
            .committee(epoch_slot, index as usize)
            .ok_or(Error::CommitteeOutOfRange { slot, index })
    }

    pub fn get_committee_count_at_slot(&self, slot: Slot) -> Result<u64, Error> {
        let shuffling = self.shuffling_for_slot(slot)?;
        let epoch_slot = (slot % C::SlotsPerEpoch::to_u64()) as usize;
        Ok(shuffling.committees_at(epoch_slot).len() as u64)
    }

    /// Only valid for slots of the current epoch.
    pub fn get_beacon_proposer(&self, slot: Slot) -> Result<ValidatorIndex, Error> {
        let epoch = compute_epoch_at_slot::<C>(slot);
        if epoch != self.current_shuffling.epoch {
            return Err(Error::ProposerSlotOutOfRange(slot));
        }
        let epoch_slot = (slot % C::SlotsPerEpoch::to_u64()) as usize;
        Ok(self.proposers[epoch_slot])
    }
}

fn indices_bounded<C: Config>(state: &BeaconState<C>) -> Vec<(ValidatorIndex, Epoch, Epoch)> {
    state
        .validators
        .iter()
        .enumerate()
        .map(|(index, validator)| {
            (
                index as u64,
                validator.activation_epoch,
                validator.exit_epoch,
            )
        })
        .collect()
}

fn compute_proposers<C: Config>(
    state: &BeaconState<C>,
    shuffling: &ShufflingEpoch<C>,
) -> Result<Vec<ValidatorIndex>, Error> {
    let epoch_seed = get_seed(state, shuffling.epoch, C::domain_beacon_proposer());
    let start_slot = compute_start_slot_at_epoch::<C>(shuffling.epoch);

    (start_slot..start_slot + C::SlotsPerEpoch::to_u64())
        .map(|slot| {
            let slot_seed = proposer_slot_seed(epoch_seed, slot);
            compute_proposer_index(state, &shuffling.active_indices, &slot_seed)
                .map_err(Error::from)
        })
        .collect()
}

fn proposer_slot_seed(epoch_seed: H256, slot: Slot) -> H256 {
    let mut preimage = epoch_seed.as_bytes().to_vec();
    preimage.append(&mut int_to_bytes(slot, 8));
    hash_to_h256(&preimage)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use typenum::marker_traits::Unsigned;
    use types::config::MinimalConfig;

    use super::*;
    use crate::state_builder::interop_genesis_state;

    const VALIDATOR_COUNT: usize = 20;

    fn context_at_genesis() -> (BeaconState<MinimalConfig>, EpochContext<MinimalConfig>) {
        let (state, _keypairs) = interop_genesis_state::<MinimalConfig>(VALIDATOR_COUNT);
        let context = EpochContext::load(&state).expect("genesis state loads");
        (state, context)
    }

    #[test]
    fn committees_partition_the_active_set() {
        let (_state, context) = context_at_genesis();
        let slots_per_epoch = <MinimalConfig as Config>::SlotsPerEpoch::to_u64();

        let mut seen = HashSet::new();
        for slot in 0..slots_per_epoch {
            let committee_count = context.get_committee_count_at_slot(slot).unwrap();
            for index in 0..committee_count {
                for member in context.get_beacon_committee(slot, index).unwrap() {
                    // pairwise disjoint
                    assert!(seen.insert(*member));
                }
            }
        }

        let active: HashSet<_> = context
            .current_shuffling
            .active_indices
            .iter()
            .copied()
            .collect();
        assert_eq!(seen, active);
    }

    #[test]
    fn previous_shuffling_is_shared_at_genesis() {
        let (_state, context) = context_at_genesis();
        assert!(Arc::ptr_eq(
            &context.previous_shuffling,
            &context.current_shuffling,
        ));
    }

    #[test]
    fn proposer_table_covers_the_current_epoch_only() {
        let (_state, context) = context_at_genesis();
        let slots_per_epoch = <MinimalConfig as Config>::SlotsPerEpoch::to_u64();

        for slot in 0..slots_per_epoch {
            let proposer = context.get_beacon_proposer(slot).unwrap();
            assert!((proposer as usize) < VALIDATOR_COUNT);
        }
        assert_eq!(
            context.get_beacon_proposer(slots_per_epoch),
            Err(Error::ProposerSlotOutOfRange(slots_per_epoch)),
        );
    }

    #[test]
    fn committee_lookup_outside_cached_window_fails() {
        let (_state, context) = context_at_genesis();
        let slots_per_epoch = <MinimalConfig as Config>::SlotsPerEpoch::to_u64();
        let far_slot = slots_per_epoch * 5;
        assert_eq!(
            context.get_beacon_committee(far_slot, 0).unwrap_err(),
            Error::ShufflingOutOfRange(5),
        );
    }

    #[test]
    fn clone_shares_shufflings_but_not_pubkeys() {
        let (state, mut context) = context_at_genesis();
        let copy = context.clone();
        assert!(Arc::ptr_eq(
            &copy.current_shuffling,
            &context.current_shuffling,
        ));

        // Mutating the original's tables must not affect the copy.
        context.sync_pubkeys(&state);
        assert_eq!(copy.index_to_pubkey.len(), VALIDATOR_COUNT);
    }

    #[test]
    fn rotation_shifts_the_shuffling_window() {
        let (state, mut context) = context_at_genesis();
        let old_current = Arc::clone(&context.current_shuffling);
        let old_next = Arc::clone(&context.next_shuffling);

        let mut advanced = state;
        advanced.slot = <MinimalConfig as Config>::SlotsPerEpoch::to_u64();
        context.rotate(&advanced).unwrap();

        assert!(Arc::ptr_eq(&context.previous_shuffling, &old_current));
        assert!(Arc::ptr_eq(&context.current_shuffling, &old_next));
        assert_eq!(context.next_shuffling.epoch, 2);
    }
}
