use std::convert::TryFrom;

use typenum::marker_traits::Unsigned;
use types::beacon_state::BeaconState;
use types::config::Config;
use types::primitives::*;

use crate::crypto::hash_to_h256;
use crate::error::Error;
use crate::math::int_to_bytes;
use crate::misc::{compute_churn_limit, compute_domain, compute_epoch_at_slot};
use crate::predicates::is_active_validator;

pub fn get_current_epoch<C: Config>(state: &BeaconState<C>) -> Epoch {
    compute_epoch_at_slot::<C>(state.slot)
}

pub fn get_previous_epoch<C: Config>(state: &BeaconState<C>) -> Epoch {
    let current_epoch = get_current_epoch(state);
    let genesis_epoch = C::genesis_epoch();

    if current_epoch > genesis_epoch {
        current_epoch - 1
    } else {
        genesis_epoch
    }
}

pub fn get_block_root<C: Config>(state: &BeaconState<C>, epoch: Epoch) -> Result<H256, Error> {
    get_block_root_at_slot(state, epoch * C::SlotsPerEpoch::to_u64())
}

pub fn get_block_root_at_slot<C: Config>(
    state: &BeaconState<C>,
    slot: Slot,
) -> Result<H256, Error> {
    if !(slot < state.slot && state.slot <= slot + C::SlotsPerHistoricalRoot::to_u64()) {
        return Err(Error::SlotOutOfRange);
    }

    match usize::try_from(slot % C::SlotsPerHistoricalRoot::to_u64()) {
        Err(_err) => Err(Error::IndexOutOfRange),
        Ok(id) => Ok(state.block_roots[id]),
    }
}

pub fn get_randao_mix<C: Config>(state: &BeaconState<C>, epoch: Epoch) -> H256 {
    state.randao_mixes[(epoch % C::EpochsPerHistoricalVector::to_u64()) as usize]
}

pub fn get_active_validator_indices<C: Config>(
    state: &BeaconState<C>,
    epoch: Epoch,
) -> Vec<ValidatorIndex> {
    let mut active_validator_indices = Vec::new();
    for (i, v) in state.validators.iter().enumerate() {
        if is_active_validator(v, epoch) {
            active_validator_indices.push(i as u64);
        }
    }
    active_validator_indices
}

pub fn get_validator_churn_limit<C: Config>(state: &BeaconState<C>) -> u64 {
    let active_validator_indices = get_active_validator_indices(state, get_current_epoch(state));
    compute_churn_limit::<C>(active_validator_indices.len() as u64)
}

/// The shuffling seed for `epoch`: the domain type, the epoch and a randao
/// mix far enough in the past that proposals cannot grind it.
pub fn get_seed<C: Config>(state: &BeaconState<C>, epoch: Epoch, domain_type: DomainType) -> H256 {
    let mix = get_randao_mix(
        state,
        epoch + C::EpochsPerHistoricalVector::to_u64() - C::min_seed_lookahead() - 1,
    );
    let mut preimage = domain_type.to_vec();
    preimage.append(&mut int_to_bytes(epoch, 8));
    preimage.extend_from_slice(mix.as_bytes());
    hash_to_h256(&preimage)
}

pub fn get_domain<C: Config>(
    state: &BeaconState<C>,
    domain_type: DomainType,
    message_epoch: Option<Epoch>,
) -> Domain {
    let epoch = message_epoch.unwrap_or_else(|| get_current_epoch(state));
    let fork_version = if epoch < state.fork.epoch {
        state.fork.previous_version
    } else {
        state.fork.current_version
    };
    compute_domain::<C>(
        domain_type,
        Some(fork_version),
        Some(state.genesis_validators_root),
    )
}

pub fn get_total_balance<C: Config>(
    state: &BeaconState<C>,
    indices: &[ValidatorIndex],
) -> Result<Gwei, Error> {
    let mut sum = 0;
    for index in indices {
        match usize::try_from(*index) {
            Err(_err) => return Err(Error::IndexOutOfRange),
            Ok(id) => {
                sum += state
                    .validators
                    .get(id)
                    .ok_or(Error::IndexOutOfRange)?
                    .effective_balance
            }
        }
    }
    Ok(sum)
}

pub fn get_total_active_balance<C: Config>(state: &BeaconState<C>) -> Result<Gwei, Error> {
    get_total_balance(
        state,
        &get_active_validator_indices(state, get_current_epoch(state)),
    )
}

#[cfg(test)]
mod tests {
    use ssz_types::{FixedVector, VariableList};
    use types::config::MinimalConfig;
    use types::types::Validator;

    use super::*;

    #[test]
    fn test_get_current_epoch() {
        let state: BeaconState<MinimalConfig> = BeaconState {
            slot: 9,
            ..BeaconState::default()
        };
        assert_eq!(get_current_epoch(&state), 1);
    }

    #[test]
    fn test_get_previous_epoch() {
        let state: BeaconState<MinimalConfig> = BeaconState {
            slot: 17,
            ..BeaconState::default()
        };
        assert_eq!(get_previous_epoch(&state), 1);
    }

    #[test]
    fn test_get_previous_epoch_genesis() {
        let state: BeaconState<MinimalConfig> = BeaconState::default();
        assert_eq!(get_previous_epoch(&state), MinimalConfig::genesis_epoch());
    }

    #[test]
    fn test_get_block_root_at_slot() {
        let state: BeaconState<MinimalConfig> = BeaconState {
            slot: 2,
            block_roots: FixedVector::from(vec![H256::from([0; 32]), H256::from([1; 32])]),
            ..BeaconState::default()
        };
        assert_eq!(get_block_root_at_slot(&state, 1), Ok(H256::from([1; 32])));
    }

    #[test]
    fn test_get_block_root_at_slot_slot_equals_beacon_state_slot() {
        let state: BeaconState<MinimalConfig> = BeaconState::default();
        assert_eq!(
            get_block_root_at_slot(&state, 0).err(),
            Some(Error::SlotOutOfRange),
        );
    }

    #[test]
    fn test_get_block_root() {
        let mut block_roots_vec = Vec::new();
        for x in 0..64 {
            block_roots_vec.push(H256::from([x; 32]));
        }
        let state: BeaconState<MinimalConfig> = BeaconState {
            slot: 32,
            block_roots: FixedVector::from(block_roots_vec),
            ..BeaconState::default()
        };
        assert_eq!(get_block_root(&state, 3), Ok(H256::from([24; 32])));
    }

    #[test]
    fn test_get_randao_mix_wraps_around() {
        let mut mixes = vec![H256::zero(); 64];
        mixes[1] = H256::from([5; 32]);
        let state: BeaconState<MinimalConfig> = BeaconState {
            randao_mixes: FixedVector::from(mixes),
            ..BeaconState::default()
        };
        assert_eq!(get_randao_mix(&state, 65), H256::from([5; 32]));
    }

    #[test]
    fn test_get_active_validator_indices() {
        let v1 = Validator {
            activation_epoch: 1,
            exit_epoch: 2,
            ..Validator::default()
        };
        let v2 = Validator {
            activation_epoch: 0,
            exit_epoch: 1,
            ..Validator::default()
        };
        let state: BeaconState<MinimalConfig> = BeaconState {
            validators: VariableList::from(vec![v1, v2]),
            ..BeaconState::default()
        };
        assert_eq!(get_active_validator_indices(&state, 0), vec![1]);
    }

    #[test]
    fn test_get_validator_churn_limit() {
        let v1 = Validator {
            effective_balance: 11,
            activation_epoch: 0,
            exit_epoch: 2,
            ..Validator::default()
        };
        let state: BeaconState<MinimalConfig> = BeaconState {
            validators: VariableList::from(vec![v1]),
            ..BeaconState::default()
        };
        assert_eq!(
            get_validator_churn_limit(&state),
            MinimalConfig::min_per_epoch_churn_limit(),
        );
    }

    #[test]
    fn test_get_total_balance() {
        let v1 = Validator {
            effective_balance: 11,
            activation_epoch: 0,
            exit_epoch: 2,
            ..Validator::default()
        };
        let v2 = Validator {
            effective_balance: 7,
            activation_epoch: 0,
            exit_epoch: 1,
            ..Validator::default()
        };
        let v3 = Validator {
            effective_balance: 5,
            activation_epoch: 0,
            exit_epoch: 1,
            ..Validator::default()
        };
        let state: BeaconState<MinimalConfig> = BeaconState {
            validators: VariableList::from(vec![v1, v2, v3]),
            ..BeaconState::default()
        };
        assert_eq!(get_total_balance(&state, &[0, 2]), Ok(16));
    }

    #[test]
    fn test_get_total_active_balance() {
        let v1 = Validator {
            effective_balance: 10,
            activation_epoch: 0,
            exit_epoch: 2,
            ..Validator::default()
        };
        let v2 = Validator {
            effective_balance: 2,
            activation_epoch: 0,
            exit_epoch: 1,
            ..Validator::default()
        };
        let state: BeaconState<MinimalConfig> = BeaconState {
            validators: VariableList::from(vec![v1, v2]),
            ..BeaconState::default()
        };
        assert_eq!(get_total_active_balance(&state), Ok(12));
    }
}
