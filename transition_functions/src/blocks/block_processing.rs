use std::cmp;

use helper_functions::beacon_state_accessors::{get_domain, get_randao_mix};
use helper_functions::crypto::{hash_tree_root, hash_to_h256};
use helper_functions::math::xor;
use helper_functions::misc::compute_signing_root;
use typenum::marker_traits::Unsigned;
use types::beacon_state::BeaconState;
use types::config::Config;
use types::primitives::H256;
use types::types::{BeaconBlock, BeaconBlockBody, BeaconBlockHeader};

use crate::blocks::operations::{
    process_attestation, process_attester_slashing, process_deposit, process_proposer_slashing,
    process_voluntary_exit,
};
use crate::epoch_context::EpochContext;
use crate::error::{ensure, BlockRejection, Error, SignatureKind};

pub fn process_block<C: Config>(
    context: &mut EpochContext<C>,
    state: &mut BeaconState<C>,
    block: &BeaconBlock<C>,
) -> Result<(), Error> {
    process_block_header(context, state, block)?;
    process_randao(context, state, &block.body)?;
    process_eth1_data(state, &block.body)?;
    process_operations(context, state, &block.body)
}

fn process_block_header<C: Config>(
    context: &EpochContext<C>,
    state: &mut BeaconState<C>,
    block: &BeaconBlock<C>,
) -> Result<(), Error> {
    //# Verify that the slots match
    ensure!(block.slot == state.slot, BlockRejection::SlotMismatch);
    //# Verify that the block is newer than latest block header
    ensure!(
        block.slot > state.latest_block_header.slot,
        BlockRejection::BlockNotNewer
    );
    //# Verify that proposer index is the correct index
    let proposer_index = context.get_beacon_proposer(state.slot)?;
    ensure!(
        block.proposer_index == proposer_index,
        BlockRejection::WrongProposer
    );
    //# Verify that the parent matches
    ensure!(
        block.parent_root == hash_tree_root(&state.latest_block_header),
        BlockRejection::ParentRootMismatch
    );
    //# Cache current block as the new latest block
    state.latest_block_header = BeaconBlockHeader {
        slot: block.slot,
        proposer_index: block.proposer_index,
        parent_root: block.parent_root,
        //# `state_root` is zeroed and overwritten in the next `process_slot` call
        state_root: H256::zero(),
        body_root: hash_tree_root(&block.body),
    };

    //# Verify proposer is not slashed
    let proposer = state
        .validators
        .get(proposer_index as usize)
        .ok_or(Error::ValidatorOutOfBounds(proposer_index))?;
    ensure!(!proposer.slashed, BlockRejection::ProposerSlashed);

    Ok(())
}

fn process_randao<C: Config>(
    context: &EpochContext<C>,
    state: &mut BeaconState<C>,
    body: &BeaconBlockBody<C>,
) -> Result<(), Error> {
    let epoch = context.current_epoch();
    //# Verify RANDAO reveal
    let proposer_index = context.get_beacon_proposer(state.slot)?;
    let proposer_pubkey = context
        .index_to_pubkey(proposer_index)
        .ok_or(Error::ValidatorOutOfBounds(proposer_index))?;
    let domain = get_domain(state, C::domain_randao(), None);
    let signing_root = compute_signing_root(&epoch, domain);
    ensure!(
        bls::verify(proposer_pubkey, signing_root.as_bytes(), &body.randao_reveal),
        Error::SignatureInvalid(SignatureKind::Randao)
    );
    //# Mix in RANDAO reveal
    let reveal_digest = hash_to_h256(body.randao_reveal.as_bytes());
    let mix = xor(
        get_randao_mix(state, epoch).as_fixed_bytes(),
        reveal_digest.as_fixed_bytes(),
    );
    let mix_index = (epoch % C::EpochsPerHistoricalVector::to_u64()) as usize;
    state.randao_mixes[mix_index] = H256::from(mix);

    Ok(())
}

fn process_eth1_data<C: Config>(
    state: &mut BeaconState<C>,
    body: &BeaconBlockBody<C>,
) -> Result<(), Error> {
    state
        .eth1_data_votes
        .push(body.eth1_data)
        .map_err(|_| Error::ListFull)?;

    if state.eth1_data == body.eth1_data {
        // The state already adopted this vote; counting is pointless.
        return Ok(());
    }

    let num_votes = state
        .eth1_data_votes
        .iter()
        .filter(|vote| **vote == body.eth1_data)
        .count() as u64;
    if num_votes * 2 > C::SlotsPerEth1VotingPeriod::to_u64() {
        state.eth1_data = body.eth1_data;
    }

    Ok(())
}

fn process_operations<C: Config>(
    context: &mut EpochContext<C>,
    state: &mut BeaconState<C>,
    body: &BeaconBlockBody<C>,
) -> Result<(), Error> {
    //# Verify that outstanding deposits are processed up to the maximum number of deposits
    let outstanding = state
        .eth1_data
        .deposit_count
        .checked_sub(state.eth1_deposit_index)
        .ok_or(BlockRejection::DepositCountMismatch)?;
    let expected_deposits = cmp::min(C::MaxDeposits::to_u64(), outstanding);
    ensure!(
        body.deposits.len() as u64 == expected_deposits,
        BlockRejection::DepositCountMismatch
    );

    for proposer_slashing in body.proposer_slashings.iter() {
        process_proposer_slashing(context, state, proposer_slashing)?;
    }
    for attester_slashing in body.attester_slashings.iter() {
        process_attester_slashing(context, state, attester_slashing)?;
    }
    for attestation in body.attestations.iter() {
        process_attestation(context, state, attestation)?;
    }
    for deposit in body.deposits.iter() {
        process_deposit(context, state, deposit)?;
    }
    for voluntary_exit in body.voluntary_exits.iter() {
        process_voluntary_exit(context, state, voluntary_exit)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use types::config::MinimalConfig;
    use types::types::Eth1Data;

    use super::*;
    use crate::state_builder::interop_genesis_state;

    type C = MinimalConfig;

    fn loaded_state() -> (BeaconState<C>, EpochContext<C>) {
        let (state, _) = interop_genesis_state::<C>(8);
        let context = EpochContext::load(&state).unwrap();
        (state, context)
    }

    #[test]
    fn header_with_wrong_slot_is_rejected() {
        let (mut state, mut context) = loaded_state();
        let block = BeaconBlock {
            slot: 3,
            ..BeaconBlock::default()
        };
        assert_eq!(
            process_block(&mut context, &mut state, &block),
            Err(Error::BlockInvalid(BlockRejection::SlotMismatch)),
        );
    }

    #[test]
    fn header_with_wrong_proposer_is_rejected() {
        let (mut state, mut context) = loaded_state();
        state.slot = 1;
        let actual_proposer = context.get_beacon_proposer(1).unwrap();
        let block = BeaconBlock {
            slot: 1,
            proposer_index: (actual_proposer + 1) % 8,
            parent_root: hash_tree_root(&state.latest_block_header),
            ..BeaconBlock::default()
        };
        assert_eq!(
            process_block(&mut context, &mut state, &block),
            Err(Error::BlockInvalid(BlockRejection::WrongProposer)),
        );
    }

    #[test]
    fn header_with_wrong_parent_root_is_rejected() {
        let (mut state, mut context) = loaded_state();
        state.slot = 1;
        let block = BeaconBlock {
            slot: 1,
            proposer_index: context.get_beacon_proposer(1).unwrap(),
            parent_root: H256::from([0xEE; 32]),
            ..BeaconBlock::default()
        };
        assert_eq!(
            process_block(&mut context, &mut state, &block),
            Err(Error::BlockInvalid(BlockRejection::ParentRootMismatch)),
        );
    }

    #[test]
    fn eth1_vote_majority_is_adopted() {
        let (mut state, _) = loaded_state();
        let vote = Eth1Data {
            deposit_root: H256::from([7; 32]),
            deposit_count: 8,
            block_hash: H256::from([8; 32]),
        };
        let body = BeaconBlockBody {
            eth1_data: vote,
            ..BeaconBlockBody::default()
        };

        // One vote short of a majority of the voting period.
        let majority = C::SlotsPerEth1VotingPeriod::to_u64() / 2;
        for _ in 0..majority {
            process_eth1_data(&mut state, &body).unwrap();
            assert_ne!(state.eth1_data, vote);
        }
        process_eth1_data(&mut state, &body).unwrap();
        assert_eq!(state.eth1_data, vote);
    }

    #[test]
    fn unexpected_deposit_count_is_rejected() {
        let (mut state, mut context) = loaded_state();
        state.slot = 1;
        // The eth1 data window advertises one outstanding deposit.
        state.eth1_data.deposit_count = state.eth1_deposit_index + 1;
        let block = BeaconBlock {
            slot: 1,
            proposer_index: context.get_beacon_proposer(1).unwrap(),
            parent_root: hash_tree_root(&state.latest_block_header),
            ..BeaconBlock::default()
        };
        // An empty body cannot satisfy the outstanding deposit.
        let result = process_operations(&mut context, &mut state, &block.body);
        assert_eq!(
            result,
            Err(Error::BlockInvalid(BlockRejection::DepositCountMismatch)),
        );
    }
}
