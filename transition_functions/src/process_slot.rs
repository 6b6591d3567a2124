use helper_functions::beacon_state_accessors::get_domain;
use helper_functions::crypto::hash_tree_root;
use helper_functions::misc::compute_signing_root;
use typenum::marker_traits::Unsigned;
use types::beacon_state::BeaconState;
use types::config::Config;
use types::primitives::{Slot, H256};
use types::types::SignedBeaconBlock;

use crate::blocks::block_processing::process_block;
use crate::epoch_context::EpochContext;
use crate::epochs::process_epoch::process_epoch;
use crate::error::{ensure, BlockRejection, Error, SignatureKind};

// Cache the state and block roots for the slot that just ended.
fn process_slot<C: Config>(state: &mut BeaconState<C>) {
    let ring_index = (state.slot % C::SlotsPerHistoricalRoot::to_u64()) as usize;

    //# Cache state root
    let previous_state_root = hash_tree_root(state);
    state.state_roots[ring_index] = previous_state_root;

    //# Cache latest block header state root
    if state.latest_block_header.state_root == H256::zero() {
        state.latest_block_header.state_root = previous_state_root;
    }

    //# Cache block root
    state.block_roots[ring_index] = hash_tree_root(&state.latest_block_header);
}

/// Advance the state to `slot`, processing every empty slot and each epoch
/// boundary on the way. The context rotates together with the state.
pub fn process_slots<C: Config>(
    context: &mut EpochContext<C>,
    state: &mut BeaconState<C>,
    slot: Slot,
) -> Result<(), Error> {
    ensure!(
        state.slot < slot,
        Error::SlotAdvancePrecondition {
            state: state.slot,
            target: slot,
        }
    );

    while state.slot < slot {
        process_slot(state);
        //# Process epoch on the start slot of the next epoch
        let next_slot = state.slot + 1;
        if next_slot % C::SlotsPerEpoch::to_u64() == 0 {
            process_epoch(context, state)?;
            state.slot = next_slot;
            context.rotate(state)?;
        } else {
            state.slot = next_slot;
        }
    }

    Ok(())
}

pub fn verify_block_signature<C: Config>(
    state: &BeaconState<C>,
    signed_block: &SignedBeaconBlock<C>,
) -> bool {
    let proposer = match state
        .validators
        .get(signed_block.message.proposer_index as usize)
    {
        Some(proposer) => proposer,
        None => return false,
    };
    let domain = get_domain(state, C::domain_beacon_proposer(), None);
    let signing_root = compute_signing_root(&signed_block.message, domain);
    bls::verify(&proposer.pubkey, signing_root.as_bytes(), &signed_block.signature)
}

/// The top-level transition: advance slots, verify and apply the block.
///
/// Runs against clones of the state and the context; the caller's context
/// is swapped in atomically on success, so a rejected block leaves both
/// exactly as they were.
pub fn state_transition<C: Config>(
    context: &mut EpochContext<C>,
    state: &BeaconState<C>,
    signed_block: &SignedBeaconBlock<C>,
    validate_result: bool,
) -> Result<BeaconState<C>, Error> {
    let mut working_context = context.clone();
    let mut post_state = state.clone();
    let block = &signed_block.message;

    //# Process slots (including those with no blocks) since block
    process_slots(&mut working_context, &mut post_state, block.slot)?;
    //# Verify signature
    if validate_result && !verify_block_signature(&post_state, signed_block) {
        log::debug!("rejecting block at slot {}: invalid proposer signature", block.slot);
        return Err(Error::SignatureInvalid(SignatureKind::Block));
    }
    //# Process block
    process_block(&mut working_context, &mut post_state, block)?;
    //# Verify state root
    if validate_result {
        ensure!(
            block.state_root == hash_tree_root(&post_state),
            BlockRejection::StateRootMismatch
        );
    }

    *context = working_context;
    Ok(post_state)
}
