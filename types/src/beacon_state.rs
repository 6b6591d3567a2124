use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::{BitVector, FixedVector, VariableList};
use tree_hash_derive::TreeHash;

use crate::{config::*, consts, primitives::*, types::*};

/// The full registry-and-finality state of the beacon chain at one slot.
///
/// A transition never edits the caller's copy in place; the engine clones
/// the state, mutates the clone and hands it back only when every check
/// passed.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize, Encode, Decode, TreeHash)]
pub struct BeaconState<C: Config> {
    // Versioning
    pub genesis_time: UnixSeconds,
    pub genesis_validators_root: H256,
    pub slot: Slot,
    pub fork: Fork,

    // History
    pub latest_block_header: BeaconBlockHeader,
    pub block_roots: FixedVector<H256, C::SlotsPerHistoricalRoot>,
    pub state_roots: FixedVector<H256, C::SlotsPerHistoricalRoot>,
    pub historical_roots: VariableList<H256, C::HistoricalRootsLimit>,

    // Eth1
    pub eth1_data: Eth1Data,
    pub eth1_data_votes: VariableList<Eth1Data, C::SlotsPerEth1VotingPeriod>,
    pub eth1_deposit_index: u64,

    // Registry
    pub validators: VariableList<Validator, C::ValidatorRegistryLimit>,
    pub balances: VariableList<Gwei, C::ValidatorRegistryLimit>,

    // Randomness
    pub randao_mixes: FixedVector<H256, C::EpochsPerHistoricalVector>,

    // Slashings
    pub slashings: FixedVector<Gwei, C::EpochsPerSlashingsVector>,

    // Attestations
    pub previous_epoch_attestations:
        VariableList<PendingAttestation<C>, C::MaxAttestationsPerEpoch>,
    pub current_epoch_attestations:
        VariableList<PendingAttestation<C>, C::MaxAttestationsPerEpoch>,

    // Finality
    pub justification_bits: BitVector<consts::JustificationBitsLength>,
    pub previous_justified_checkpoint: Checkpoint,
    pub current_justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
}

#[cfg(test)]
mod tests {
    use typenum::marker_traits::Unsigned;

    use super::*;

    #[test]
    fn default_state_is_at_genesis() {
        let state: BeaconState<MinimalConfig> = BeaconState::default();
        assert_eq!(state.slot, consts::GENESIS_SLOT);
        assert_eq!(state.validators.len(), 0);
        assert_eq!(state.justification_bits.len(), consts::JUSTIFICATION_BITS_LENGTH);
    }

    #[test]
    fn default_rings_are_fully_allocated() {
        let state: BeaconState<MinimalConfig> = BeaconState::default();
        assert_eq!(
            state.block_roots.len(),
            <MinimalConfig as Config>::SlotsPerHistoricalRoot::to_usize(),
        );
        assert_eq!(
            state.randao_mixes.len(),
            <MinimalConfig as Config>::EpochsPerHistoricalVector::to_usize(),
        );
        assert_eq!(
            state.slashings.len(),
            <MinimalConfig as Config>::EpochsPerSlashingsVector::to_usize(),
        );
    }
}
