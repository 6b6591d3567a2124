use std::cmp;

use tree_hash::TreeHash;
use typenum::marker_traits::Unsigned;
use types::beacon_state::BeaconState;
use types::config::Config;
use types::primitives::*;
use types::types::{ForkData, SigningData};

use crate::crypto::{hash, hash_tree_root};
use crate::error::Error;
use crate::math::{bytes_to_int, int_to_bytes};

pub fn compute_epoch_at_slot<C: Config>(slot: Slot) -> Epoch {
    slot / C::SlotsPerEpoch::to_u64()
}

pub fn compute_start_slot_at_epoch<C: Config>(epoch: Epoch) -> Slot {
    epoch * C::SlotsPerEpoch::to_u64()
}

/// The epoch during which activations and exits initiated in `epoch` take
/// effect.
pub fn compute_activation_exit_epoch<C: Config>(epoch: Epoch) -> Epoch {
    epoch + 1 + C::max_seed_lookahead()
}

pub fn compute_churn_limit<C: Config>(active_validator_count: u64) -> u64 {
    cmp::max(
        C::min_per_epoch_churn_limit(),
        active_validator_count / C::churn_limit_quotient(),
    )
}

/// Committees per slot for an active validator count, clamped to
/// `[1, MAX_COMMITTEES_PER_SLOT]`.
pub fn compute_committee_count<C: Config>(active_validator_count: u64) -> u64 {
    let committees_per_slot =
        active_validator_count / C::SlotsPerEpoch::to_u64() / C::target_committee_size();
    cmp::max(1, cmp::min(committees_per_slot, C::max_committees_per_slot()))
}

/// The swap-or-not destination of a single index. Agrees bit-for-bit with
/// the bulk shuffle in `crate::shuffle`.
pub fn compute_shuffled_index<C: Config>(
    mut index: ValidatorIndex,
    index_count: u64,
    seed: H256,
) -> Result<ValidatorIndex, Error> {
    if index >= index_count {
        return Err(Error::IndexOutOfRange);
    }
    for current_round in 0..C::shuffle_round_count() {
        let pivot = bytes_to_int(&hash_seed_round(&seed, current_round)) % index_count;
        let flip = (pivot + index_count - index) % index_count;
        let position = cmp::max(index, flip);
        let source = hash_seed_round_position(&seed, current_round, position);
        let byte = source[((position % 256) / 8) as usize];
        let bit = (byte >> (position % 8)) % 2;
        index = if bit == 0 { index } else { flip };
    }
    Ok(index)
}

fn hash_seed_round(seed: &H256, current_round: u8) -> [u8; 8] {
    let mut preimage = seed.as_bytes().to_vec();
    preimage.push(current_round);
    let mut bytes = [0; 8];
    bytes.copy_from_slice(&hash(&preimage)[..8]);
    bytes
}

fn hash_seed_round_position(seed: &H256, current_round: u8, position: u64) -> Vec<u8> {
    let mut preimage = seed.as_bytes().to_vec();
    preimage.push(current_round);
    preimage.append(&mut int_to_bytes(position / 256, 4));
    hash(&preimage)
}

/// Sample a proposer from `indices`, weighted by effective balance.
pub fn compute_proposer_index<C: Config>(
    state: &BeaconState<C>,
    indices: &[ValidatorIndex],
    seed: &H256,
) -> Result<ValidatorIndex, Error> {
    if indices.is_empty() {
        return Err(Error::NoCandidateIndices);
    }
    const MAX_RANDOM_BYTE: u64 = u8::max_value() as u64;
    let index_count = indices.len() as u64;
    let mut i = 0;
    loop {
        let shuffled = compute_shuffled_index::<C>(i % index_count, index_count, *seed)?;
        let candidate = indices[shuffled as usize];
        let mut preimage = seed.as_bytes().to_vec();
        preimage.append(&mut int_to_bytes(i / 32, 8));
        let random_byte = u64::from(hash(&preimage)[(i % 32) as usize]);
        let effective_balance = state
            .validators
            .get(candidate as usize)
            .ok_or(Error::IndexOutOfRange)?
            .effective_balance;
        if effective_balance * MAX_RANDOM_BYTE >= C::max_effective_balance() * random_byte {
            return Ok(candidate);
        }
        i += 1;
    }
}

pub fn compute_fork_data_root(current_version: Version, genesis_validators_root: H256) -> H256 {
    hash_tree_root(&ForkData {
        current_version,
        genesis_validators_root,
    })
}

/// A 32-byte signature domain: the domain type followed by 28 bytes of the
/// fork data root.
pub fn compute_domain<C: Config>(
    domain_type: DomainType,
    fork_version: Option<Version>,
    genesis_validators_root: Option<H256>,
) -> Domain {
    let fork_version = fork_version.unwrap_or_else(C::genesis_fork_version);
    let fork_data_root =
        compute_fork_data_root(fork_version, genesis_validators_root.unwrap_or_default());
    let mut domain = [0; 32];
    domain[..4].copy_from_slice(&domain_type);
    domain[4..].copy_from_slice(&fork_data_root.as_bytes()[..28]);
    H256::from(domain)
}

pub fn compute_signing_root<T: TreeHash>(object: &T, domain: Domain) -> H256 {
    hash_tree_root(&SigningData {
        object_root: hash_tree_root(object),
        domain,
    })
}

#[cfg(test)]
mod tests {
    use types::config::{MainnetConfig, MinimalConfig};

    use super::*;

    #[test]
    fn test_epoch_of_slot() {
        assert_eq!(compute_epoch_at_slot::<MainnetConfig>(17), 0);
        assert_eq!(compute_epoch_at_slot::<MainnetConfig>(32), 1);
        assert_eq!(compute_epoch_at_slot::<MinimalConfig>(17), 2);
    }

    #[test]
    fn test_compute_start_slot_at_epoch() {
        assert_eq!(
            compute_start_slot_at_epoch::<MainnetConfig>(10),
            <MainnetConfig as Config>::SlotsPerEpoch::to_u64() * 10,
        );
    }

    #[test]
    fn test_compute_activation_exit_epoch() {
        assert_eq!(compute_activation_exit_epoch::<MainnetConfig>(0), 5);
    }

    #[test]
    fn test_compute_churn_limit_floor() {
        assert_eq!(compute_churn_limit::<MainnetConfig>(1), 4);
        assert_eq!(compute_churn_limit::<MainnetConfig>(65_536 * 5), 5);
    }

    #[test]
    fn test_compute_committee_count_bounds() {
        assert_eq!(compute_committee_count::<MainnetConfig>(0), 1);
        assert_eq!(
            compute_committee_count::<MainnetConfig>(u64::max_value() / 1024),
            MainnetConfig::max_committees_per_slot(),
        );
    }

    #[test]
    fn test_compute_shuffled_index_stays_in_range() {
        for i in 0..1000 {
            let shuffled = compute_shuffled_index::<MainnetConfig>(i, 1000, H256::random());
            assert!(shuffled.unwrap() < 1000);
        }
    }

    #[test]
    fn test_compute_shuffled_index_index_greater_or_equal_index_count() {
        assert!(compute_shuffled_index::<MainnetConfig>(1, 1, H256::random()).is_err());
    }

    #[test]
    fn test_domain_starts_with_domain_type() {
        let domain = compute_domain::<MainnetConfig>([4, 0, 0, 0], None, None);
        assert_eq!(&domain.as_bytes()[..4], &[4, 0, 0, 0]);
    }

    #[test]
    fn test_signing_root_differs_from_plain_root() {
        let domain = compute_domain::<MainnetConfig>([0, 0, 0, 0], None, None);
        let object = 42_u64;
        assert_ne!(compute_signing_root(&object, domain), hash_tree_root(&object));
    }
}
