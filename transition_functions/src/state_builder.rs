//! Programmatic construction of well-formed states for tests and tooling.

use bls::{Keypair, PublicKeyBytes, SecretKey, Signature, SignatureBytes};
use helper_functions::beacon_state_accessors::get_domain;
use helper_functions::crypto::hash_tree_root;
use helper_functions::misc::{compute_epoch_at_slot, compute_signing_root};
use ssz_types::{BitList, FixedVector, VariableList};
use typenum::marker_traits::Unsigned;
use types::beacon_state::BeaconState;
use types::config::Config;
use types::consts::FAR_FUTURE_EPOCH;
use types::primitives::H256;
use types::types::{
    AttestationData, BeaconBlock, BeaconBlockBody, BeaconBlockHeader, Checkpoint, Eth1Data,
    PendingAttestation, SignedBeaconBlock, Validator,
};

use crate::epoch_context::EpochContext;

/// Deterministic keypairs in the interop style: the secret key of
/// validator `i` is the big-endian encoding of `i + 1`.
pub fn interop_keypairs(count: usize) -> Vec<Keypair> {
    (0..count)
        .map(|i| {
            let mut bytes = [0; 32];
            bytes[24..].copy_from_slice(&(i as u64 + 1).to_be_bytes());
            let sk = SecretKey::from_bytes(&bytes).expect("small scalars are valid secret keys");
            let pk = bls::PublicKey::from_secret_key(&sk);
            Keypair { sk, pk }
        })
        .collect()
}

/// A genesis state with `validator_count` fully-activated validators at
/// the maximum effective balance.
pub fn interop_genesis_state<C: Config>(validator_count: usize) -> (BeaconState<C>, Vec<Keypair>) {
    let keypairs = interop_keypairs(validator_count);

    let validators = keypairs
        .iter()
        .map(|keypair| Validator {
            pubkey: PublicKeyBytes::from(&keypair.pk),
            withdrawal_credentials: H256::zero(),
            effective_balance: C::max_effective_balance(),
            slashed: false,
            activation_eligibility_epoch: 0,
            activation_epoch: 0,
            exit_epoch: FAR_FUTURE_EPOCH,
            withdrawable_epoch: FAR_FUTURE_EPOCH,
        })
        .collect::<Vec<_>>();

    let mut state = BeaconState::<C> {
        validators: VariableList::from(validators),
        balances: VariableList::from(vec![C::max_effective_balance(); validator_count]),
        eth1_data: Eth1Data {
            deposit_count: validator_count as u64,
            ..Eth1Data::default()
        },
        eth1_deposit_index: validator_count as u64,
        latest_block_header: BeaconBlockHeader {
            body_root: hash_tree_root(&BeaconBlockBody::<C>::default()),
            ..BeaconBlockHeader::default()
        },
        ..BeaconState::default()
    };
    state.genesis_validators_root = hash_tree_root(&state.validators);

    (state, keypairs)
}

/// A state at the start of epoch 2 whose previous-epoch pool carries a
/// full-participation attestation for every committee of epoch 1, with
/// distinct block roots backfilled for all past slots.
pub fn genesis_state_with_attestations<C: Config>(
    validator_count: usize,
) -> (BeaconState<C>, Vec<Keypair>) {
    let (mut state, keypairs) = interop_genesis_state::<C>(validator_count);
    let slots_per_epoch = C::SlotsPerEpoch::to_u64();
    state.slot = 2 * slots_per_epoch;

    let ring = C::SlotsPerHistoricalRoot::to_u64();
    let mut block_roots = vec![H256::zero(); ring as usize];
    for slot in 0..state.slot {
        block_roots[(slot % ring) as usize] = H256::from_low_u64_le(slot + 1);
    }
    state.block_roots = FixedVector::from(block_roots);

    let context = EpochContext::load(&state).expect("state with active validators loads");
    let target = Checkpoint {
        epoch: 1,
        root: state.block_roots[(slots_per_epoch % ring) as usize],
    };

    for slot in slots_per_epoch..2 * slots_per_epoch {
        let committee_count = context
            .get_committee_count_at_slot(slot)
            .expect("slot is within the cached window");
        for index in 0..committee_count {
            let committee = context
                .get_beacon_committee(slot, index)
                .expect("committee index is in range");
            let mut aggregation_bits = BitList::with_capacity(committee.len())
                .expect("committee fits the aggregation bit limit");
            for position in 0..committee.len() {
                aggregation_bits
                    .set(position, true)
                    .expect("position is within the bit list");
            }

            let data = AttestationData {
                slot,
                index,
                beacon_block_root: state.block_roots[(slot % ring) as usize],
                source: state.previous_justified_checkpoint,
                target,
            };
            state
                .previous_epoch_attestations
                .push(PendingAttestation {
                    aggregation_bits,
                    data,
                    inclusion_delay: 1,
                    proposer_index: 0,
                })
                .expect("the pool capacity covers one epoch");
        }
    }

    (state, keypairs)
}

/// Sign a randao reveal of the state's current epoch.
pub fn sign_randao_reveal<C: Config>(state: &BeaconState<C>, keypair: &Keypair) -> SignatureBytes {
    let epoch = compute_epoch_at_slot::<C>(state.slot);
    let domain = get_domain(state, C::domain_randao(), None);
    let signing_root = compute_signing_root(&epoch, domain);
    SignatureBytes::from(&Signature::new(signing_root.as_bytes(), &keypair.sk))
}

/// Wrap a block in a proposer signature valid for the given state.
pub fn sign_block<C: Config>(
    state: &BeaconState<C>,
    block: BeaconBlock<C>,
    keypair: &Keypair,
) -> SignedBeaconBlock<C> {
    let domain = get_domain(
        state,
        C::domain_beacon_proposer(),
        Some(compute_epoch_at_slot::<C>(block.slot)),
    );
    let signing_root = compute_signing_root(&block, domain);
    let signature = SignatureBytes::from(&Signature::new(signing_root.as_bytes(), &keypair.sk));
    SignedBeaconBlock {
        message: block,
        signature,
    }
}

/// Sign a beacon block header with the proposer's key, for slashing
/// evidence in tests.
pub fn sign_header<C: Config>(
    state: &BeaconState<C>,
    header: BeaconBlockHeader,
    keypair: &Keypair,
) -> types::types::SignedBeaconBlockHeader {
    let domain = get_domain(
        state,
        C::domain_beacon_proposer(),
        Some(compute_epoch_at_slot::<C>(header.slot)),
    );
    let signing_root = compute_signing_root(&header, domain);
    let signature = SignatureBytes::from(&Signature::new(signing_root.as_bytes(), &keypair.sk));
    types::types::SignedBeaconBlockHeader {
        message: header,
        signature,
    }
}

#[cfg(test)]
mod tests {
    use types::config::MinimalConfig;

    use super::*;

    #[test]
    fn interop_keypairs_are_deterministic() {
        let first = interop_keypairs(3);
        let second = interop_keypairs(3);
        assert_eq!(first, second);
        assert_ne!(first[0].pk, first[1].pk);
    }

    #[test]
    fn genesis_state_has_parallel_registries() {
        let (state, keypairs) = interop_genesis_state::<MinimalConfig>(5);
        assert_eq!(state.validators.len(), 5);
        assert_eq!(state.balances.len(), 5);
        assert_eq!(
            state.validators[2].pubkey,
            PublicKeyBytes::from(&keypairs[2].pk),
        );
    }

    #[test]
    fn attestation_pool_covers_every_committee_of_epoch_one() {
        let (state, _) = genesis_state_with_attestations::<MinimalConfig>(8);
        // One committee per slot with eight validators over eight slots.
        assert_eq!(state.previous_epoch_attestations.len(), 8);
        for attestation in state.previous_epoch_attestations.iter() {
            assert_eq!(attestation.data.target.epoch, 1);
        }
    }
}
