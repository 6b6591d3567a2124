use core::fmt::Debug;

use serde::{Deserialize, Serialize};
use typenum::marker_traits::Unsigned;
use typenum::{U1024, U1099511627776, U128, U16, U16777216, U2, U2048, U32, U4096, U64, U8, U8192, U65536};

use crate::primitives::{DomainType, Epoch, Gwei, Slot, Version};

/// Compile-time network configuration.
///
/// Lengths of the SSZ containers are associated types so the container
/// definitions stay generic; numeric constants that never affect type
/// layout are plain functions with mainnet defaults.
pub trait Config:
    Clone + Copy + PartialEq + Eq + Debug + Default + Send + Sync + 'static
{
    type SlotsPerEpoch: Unsigned + Clone + Copy + PartialEq + Eq + Debug + Default + Send + Sync;
    type SlotsPerHistoricalRoot: Unsigned + Clone + Copy + PartialEq + Eq + Debug + Default + Send + Sync;
    type SlotsPerEth1VotingPeriod: Unsigned + Clone + Copy + PartialEq + Eq + Debug + Default + Send + Sync;
    type EpochsPerHistoricalVector: Unsigned + Clone + Copy + PartialEq + Eq + Debug + Default + Send + Sync;
    type EpochsPerSlashingsVector: Unsigned + Clone + Copy + PartialEq + Eq + Debug + Default + Send + Sync;
    type HistoricalRootsLimit: Unsigned + Clone + Copy + PartialEq + Eq + Debug + Default + Send + Sync;
    type ValidatorRegistryLimit: Unsigned + Clone + Copy + PartialEq + Eq + Debug + Default + Send + Sync;
    type MaxValidatorsPerCommittee: Unsigned + Clone + Copy + PartialEq + Eq + Debug + Default + Send + Sync;
    type MaxProposerSlashings: Unsigned + Clone + Copy + PartialEq + Eq + Debug + Default + Send + Sync;
    type MaxAttesterSlashings: Unsigned + Clone + Copy + PartialEq + Eq + Debug + Default + Send + Sync;
    type MaxAttestations: Unsigned + Clone + Copy + PartialEq + Eq + Debug + Default + Send + Sync;
    type MaxDeposits: Unsigned + Clone + Copy + PartialEq + Eq + Debug + Default + Send + Sync;
    type MaxVoluntaryExits: Unsigned + Clone + Copy + PartialEq + Eq + Debug + Default + Send + Sync;
    type MaxAttestationsPerEpoch: Unsigned + Clone + Copy + PartialEq + Eq + Debug + Default + Send + Sync;

    fn genesis_slot() -> Slot {
        0
    }

    fn genesis_epoch() -> Epoch {
        0
    }

    fn far_future_epoch() -> Epoch {
        u64::max_value()
    }

    fn shuffle_round_count() -> u8 {
        90
    }

    fn target_committee_size() -> u64 {
        128
    }

    fn max_committees_per_slot() -> u64 {
        64
    }

    fn min_per_epoch_churn_limit() -> u64 {
        4
    }

    fn churn_limit_quotient() -> u64 {
        65_536
    }

    fn min_attestation_inclusion_delay() -> u64 {
        1
    }

    fn min_seed_lookahead() -> Epoch {
        1
    }

    fn max_seed_lookahead() -> Epoch {
        4
    }

    fn min_epochs_to_inactivity_penalty() -> u64 {
        4
    }

    fn min_validator_withdrawability_delay() -> Epoch {
        256
    }

    fn shard_committee_period() -> Epoch {
        256
    }

    fn max_effective_balance() -> Gwei {
        32_000_000_000
    }

    fn effective_balance_increment() -> Gwei {
        1_000_000_000
    }

    fn ejection_balance() -> Gwei {
        16_000_000_000
    }

    fn hysteresis_quotient() -> u64 {
        4
    }

    fn hysteresis_downward_multiplier() -> u64 {
        1
    }

    fn hysteresis_upward_multiplier() -> u64 {
        5
    }

    fn base_reward_factor() -> u64 {
        64
    }

    fn proposer_reward_quotient() -> u64 {
        8
    }

    fn whistleblower_reward_quotient() -> u64 {
        512
    }

    fn inactivity_penalty_quotient() -> u64 {
        1 << 24
    }

    fn min_slashing_penalty_quotient() -> u64 {
        32
    }

    fn genesis_fork_version() -> Version {
        Version::from([0, 0, 0, 0])
    }

    fn domain_beacon_proposer() -> DomainType {
        [0, 0, 0, 0]
    }

    fn domain_beacon_attester() -> DomainType {
        [1, 0, 0, 0]
    }

    fn domain_randao() -> DomainType {
        [2, 0, 0, 0]
    }

    fn domain_deposit() -> DomainType {
        [3, 0, 0, 0]
    }

    fn domain_voluntary_exit() -> DomainType {
        [4, 0, 0, 0]
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct MainnetConfig;

impl Config for MainnetConfig {
    type SlotsPerEpoch = U32;
    type SlotsPerHistoricalRoot = U8192;
    type SlotsPerEth1VotingPeriod = U1024;
    type EpochsPerHistoricalVector = U65536;
    type EpochsPerSlashingsVector = U8192;
    type HistoricalRootsLimit = U16777216;
    type ValidatorRegistryLimit = U1099511627776;
    type MaxValidatorsPerCommittee = U2048;
    type MaxProposerSlashings = U16;
    type MaxAttesterSlashings = U2;
    type MaxAttestations = U128;
    type MaxDeposits = U16;
    type MaxVoluntaryExits = U16;
    type MaxAttestationsPerEpoch = U4096;
}

/// The minimal test profile: shorter epochs and much smaller rings so
/// whole-epoch scenarios stay cheap.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct MinimalConfig;

impl Config for MinimalConfig {
    type SlotsPerEpoch = U8;
    type SlotsPerHistoricalRoot = U64;
    type SlotsPerEth1VotingPeriod = U32;
    type EpochsPerHistoricalVector = U64;
    type EpochsPerSlashingsVector = U64;
    type HistoricalRootsLimit = U16777216;
    type ValidatorRegistryLimit = U1099511627776;
    type MaxValidatorsPerCommittee = U2048;
    type MaxProposerSlashings = U16;
    type MaxAttesterSlashings = U2;
    type MaxAttestations = U128;
    type MaxDeposits = U16;
    type MaxVoluntaryExits = U16;
    type MaxAttestationsPerEpoch = U1024;

    fn shuffle_round_count() -> u8 {
        10
    }

    fn target_committee_size() -> u64 {
        4
    }

    fn max_committees_per_slot() -> u64 {
        4
    }

    fn churn_limit_quotient() -> u64 {
        32
    }

    fn shard_committee_period() -> Epoch {
        64
    }

    fn genesis_fork_version() -> Version {
        Version::from([0, 0, 0, 1])
    }
}
