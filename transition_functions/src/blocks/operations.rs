use std::cmp;
use std::collections::BTreeSet;
use std::convert::TryFrom;

use bls::PublicKey;
use helper_functions::beacon_state_accessors::get_domain;
use helper_functions::beacon_state_mutators::{decrease_balance, increase_balance};
use helper_functions::crypto::hash_tree_root;
use helper_functions::misc::{
    compute_activation_exit_epoch, compute_churn_limit, compute_domain, compute_epoch_at_slot,
    compute_signing_root,
};
use helper_functions::predicates::{
    is_active_validator, is_slashable_attestation_data, is_slashable_validator,
    is_valid_merkle_branch,
};
use ssz_types::VariableList;
use typenum::marker_traits::Unsigned;
use types::beacon_state::BeaconState;
use types::config::Config;
use types::consts::{DEPOSIT_CONTRACT_TREE_DEPTH, FAR_FUTURE_EPOCH};
use types::primitives::ValidatorIndex;
use types::types::{
    Attestation, AttesterSlashing, Deposit, DepositMessage, IndexedAttestation,
    PendingAttestation, ProposerSlashing, SignedVoluntaryExit, Validator,
};

use crate::epoch_context::EpochContext;
use crate::error::{ensure, BlockRejection, Error, SignatureKind};

/// Check that `indexed_attestation` has sorted and unique indices and a
/// valid aggregate signature.
pub fn is_valid_indexed_attestation<C: Config>(
    context: &EpochContext<C>,
    state: &BeaconState<C>,
    indexed_attestation: &IndexedAttestation<C>,
) -> bool {
    let indices = &indexed_attestation.attesting_indices;
    if indices.is_empty() {
        return false;
    }
    if !indices.windows(2).all(|pair| pair[0] < pair[1]) {
        return false;
    }

    let mut pubkeys = Vec::with_capacity(indices.len());
    for index in indices.iter() {
        let pubkey_bytes = match context.index_to_pubkey(*index) {
            Some(pubkey_bytes) => pubkey_bytes,
            None => return false,
        };
        match PublicKey::try_from(pubkey_bytes) {
            Ok(pubkey) => pubkeys.push(pubkey),
            Err(_) => return false,
        }
    }

    let domain = get_domain(
        state,
        C::domain_beacon_attester(),
        Some(indexed_attestation.data.target.epoch),
    );
    let signing_root = compute_signing_root(&indexed_attestation.data, domain);
    bls::fast_aggregate_verify(
        &pubkeys,
        signing_root.as_bytes(),
        &indexed_attestation.signature,
    )
}

pub fn process_proposer_slashing<C: Config>(
    context: &EpochContext<C>,
    state: &mut BeaconState<C>,
    proposer_slashing: &ProposerSlashing,
) -> Result<(), Error> {
    let header_1 = &proposer_slashing.signed_header_1.message;
    let header_2 = &proposer_slashing.signed_header_2.message;

    //# Verify header slots match
    ensure!(header_1.slot == header_2.slot, BlockRejection::HeadersNotSlashable);
    //# Verify header proposer indices match
    ensure!(
        header_1.proposer_index == header_2.proposer_index,
        BlockRejection::HeadersNotSlashable
    );
    //# Verify the headers are different
    ensure!(header_1 != header_2, BlockRejection::HeadersNotSlashable);
    //# Verify the proposer is slashable
    let proposer = state
        .validators
        .get(header_1.proposer_index as usize)
        .ok_or(BlockRejection::UnknownValidator)?;
    ensure!(
        is_slashable_validator(proposer, context.current_epoch()),
        BlockRejection::NotSlashable
    );
    //# Verify signatures
    let proposer_pubkey = proposer.pubkey.clone();
    for signed_header in &[
        &proposer_slashing.signed_header_1,
        &proposer_slashing.signed_header_2,
    ] {
        let domain = get_domain(
            state,
            C::domain_beacon_proposer(),
            Some(compute_epoch_at_slot::<C>(signed_header.message.slot)),
        );
        let signing_root = compute_signing_root(&signed_header.message, domain);
        ensure!(
            bls::verify(&proposer_pubkey, signing_root.as_bytes(), &signed_header.signature),
            Error::SignatureInvalid(SignatureKind::ProposerSlashing)
        );
    }

    slash_validator(context, state, header_1.proposer_index, None)
}

pub fn process_attester_slashing<C: Config>(
    context: &EpochContext<C>,
    state: &mut BeaconState<C>,
    attester_slashing: &AttesterSlashing<C>,
) -> Result<(), Error> {
    let attestation_1 = &attester_slashing.attestation_1;
    let attestation_2 = &attester_slashing.attestation_2;

    ensure!(
        is_slashable_attestation_data(&attestation_1.data, &attestation_2.data),
        BlockRejection::AttestationsNotSlashable
    );
    ensure!(
        is_valid_indexed_attestation(context, state, attestation_1),
        BlockRejection::InvalidIndexedAttestation
    );
    ensure!(
        is_valid_indexed_attestation(context, state, attestation_2),
        BlockRejection::InvalidIndexedAttestation
    );

    let indices_1 = attestation_1
        .attesting_indices
        .iter()
        .copied()
        .collect::<BTreeSet<_>>();
    let indices_2 = attestation_2
        .attesting_indices
        .iter()
        .copied()
        .collect::<BTreeSet<_>>();

    let mut slashed_any = false;
    // The intersection of two ordered sets comes out sorted.
    for index in indices_1.intersection(&indices_2) {
        let validator = state
            .validators
            .get(*index as usize)
            .ok_or(BlockRejection::UnknownValidator)?;
        if is_slashable_validator(validator, context.current_epoch()) {
            slash_validator(context, state, *index, None)?;
            slashed_any = true;
        }
    }
    ensure!(slashed_any, BlockRejection::NoValidatorSlashed);

    Ok(())
}

fn get_indexed_attestation<C: Config>(
    context: &EpochContext<C>,
    attestation: &Attestation<C>,
) -> Result<IndexedAttestation<C>, Error> {
    let data = &attestation.data;
    let committee = context.get_beacon_committee(data.slot, data.index)?;

    let mut attesting_indices = BTreeSet::new();
    for (position, index) in committee.iter().enumerate() {
        let bit = attestation
            .aggregation_bits
            .get(position)
            .map_err(|_| Error::BlockInvalid(BlockRejection::BadAggregationBits))?;
        if bit {
            attesting_indices.insert(*index);
        }
    }

    Ok(IndexedAttestation {
        attesting_indices: VariableList::from(
            attesting_indices.into_iter().collect::<Vec<_>>(),
        ),
        data: *data,
        signature: attestation.signature.clone(),
    })
}

pub fn process_attestation<C: Config>(
    context: &EpochContext<C>,
    state: &mut BeaconState<C>,
    attestation: &Attestation<C>,
) -> Result<(), Error> {
    let slot = state.slot;
    let data = &attestation.data;

    ensure!(
        data.index < context.get_committee_count_at_slot(data.slot)?,
        BlockRejection::BadCommitteeIndex
    );
    ensure!(
        data.target.epoch == context.previous_epoch()
            || data.target.epoch == context.current_epoch(),
        BlockRejection::BadTargetEpoch
    );
    ensure!(
        data.target.epoch == compute_epoch_at_slot::<C>(data.slot),
        BlockRejection::BadTargetEpoch
    );
    ensure!(
        data.slot + C::min_attestation_inclusion_delay() <= slot
            && slot <= data.slot + C::SlotsPerEpoch::to_u64(),
        BlockRejection::BadInclusionWindow
    );

    let committee = context.get_beacon_committee(data.slot, data.index)?;
    ensure!(
        attestation.aggregation_bits.len() == committee.len(),
        BlockRejection::BadAggregationBits
    );

    let pending_attestation = PendingAttestation {
        data: *data,
        aggregation_bits: attestation.aggregation_bits.clone(),
        inclusion_delay: slot - data.slot,
        proposer_index: context.get_beacon_proposer(slot)?,
    };

    if data.target.epoch == context.current_epoch() {
        ensure!(
            data.source == state.current_justified_checkpoint,
            BlockRejection::BadSourceCheckpoint
        );
        state
            .current_epoch_attestations
            .push(pending_attestation)
            .map_err(|_| Error::ListFull)?;
    } else {
        ensure!(
            data.source == state.previous_justified_checkpoint,
            BlockRejection::BadSourceCheckpoint
        );
        state
            .previous_epoch_attestations
            .push(pending_attestation)
            .map_err(|_| Error::ListFull)?;
    }

    //# Check signature
    let indexed_attestation = get_indexed_attestation(context, attestation)?;
    ensure!(
        is_valid_indexed_attestation(context, state, &indexed_attestation),
        BlockRejection::InvalidIndexedAttestation
    );

    Ok(())
}

pub fn process_deposit<C: Config>(
    context: &mut EpochContext<C>,
    state: &mut BeaconState<C>,
    deposit: &Deposit,
) -> Result<(), Error> {
    //# Verify the Merkle branch
    ensure!(
        is_valid_merkle_branch(
            &hash_tree_root(&deposit.data),
            &deposit.proof,
            //# Add 1 for the `List` length mix-in
            DEPOSIT_CONTRACT_TREE_DEPTH + 1,
            state.eth1_deposit_index,
            &state.eth1_data.deposit_root,
        ),
        BlockRejection::BadDepositProof
    );

    //# Deposits must be processed in order
    state.eth1_deposit_index += 1;

    let pubkey = deposit.data.pubkey.clone();
    let amount = deposit.data.amount;

    match context.pubkey_to_index(&pubkey) {
        Some(index) => {
            //# Increase balance by deposit amount
            increase_balance(state, index, amount)?;
        }
        None => {
            //# Verify the deposit signature (proof of possession) which is
            //# not checked by the deposit contract
            let deposit_message = DepositMessage {
                pubkey: pubkey.clone(),
                withdrawal_credentials: deposit.data.withdrawal_credentials,
                amount,
            };
            //# Deposits are valid across forks, so the domain comes
            //# straight from the genesis fork version.
            let domain = compute_domain::<C>(C::domain_deposit(), None, None);
            let signing_root = compute_signing_root(&deposit_message, domain);
            if !bls::verify(&pubkey, signing_root.as_bytes(), &deposit.data.signature) {
                // An invalid proof of possession burns the deposit
                // without invalidating the block.
                return Ok(());
            }

            //# Add validator and balance entries
            state
                .validators
                .push(Validator {
                    pubkey,
                    withdrawal_credentials: deposit.data.withdrawal_credentials,
                    effective_balance: cmp::min(
                        amount - amount % C::effective_balance_increment(),
                        C::max_effective_balance(),
                    ),
                    slashed: false,
                    activation_eligibility_epoch: FAR_FUTURE_EPOCH,
                    activation_epoch: FAR_FUTURE_EPOCH,
                    exit_epoch: FAR_FUTURE_EPOCH,
                    withdrawable_epoch: FAR_FUTURE_EPOCH,
                })
                .map_err(|_| Error::ListFull)?;
            state.balances.push(amount).map_err(|_| Error::ListFull)?;
        }
    }

    // The context must learn any new pubkey before the next operation.
    context.sync_pubkeys(state);

    Ok(())
}

pub fn process_voluntary_exit<C: Config>(
    context: &EpochContext<C>,
    state: &mut BeaconState<C>,
    signed_voluntary_exit: &SignedVoluntaryExit,
) -> Result<(), Error> {
    let voluntary_exit = &signed_voluntary_exit.message;
    let current_epoch = context.current_epoch();
    let validator = state
        .validators
        .get(voluntary_exit.validator_index as usize)
        .ok_or(BlockRejection::UnknownValidator)?;

    //# Verify the validator is active
    ensure!(
        is_active_validator(validator, current_epoch),
        BlockRejection::ExitingValidatorNotActive
    );
    //# Verify exit has not been initiated
    ensure!(
        validator.exit_epoch == FAR_FUTURE_EPOCH,
        BlockRejection::ExitAlreadyInitiated
    );
    //# Exits must specify an epoch when they become valid; they are not valid before then
    ensure!(current_epoch >= voluntary_exit.epoch, BlockRejection::EarlyExit);
    //# Verify the validator has been active long enough
    ensure!(
        current_epoch >= validator.activation_epoch + C::shard_committee_period(),
        BlockRejection::ExitingValidatorTooYoung
    );
    //# Verify signature
    let domain = get_domain(state, C::domain_voluntary_exit(), Some(voluntary_exit.epoch));
    let signing_root = compute_signing_root(voluntary_exit, domain);
    ensure!(
        bls::verify(
            &validator.pubkey,
            signing_root.as_bytes(),
            &signed_voluntary_exit.signature,
        ),
        Error::SignatureInvalid(SignatureKind::VoluntaryExit)
    );

    //# Initiate exit
    initiate_validator_exit(context, state, voluntary_exit.validator_index)
}

/// Initiate the exit of the validator with index `index`.
pub fn initiate_validator_exit<C: Config>(
    context: &EpochContext<C>,
    state: &mut BeaconState<C>,
    index: ValidatorIndex,
) -> Result<(), Error> {
    let validator = state
        .validators
        .get(index as usize)
        .ok_or(Error::ValidatorOutOfBounds(index))?;
    //# Return if validator already initiated exit
    if validator.exit_epoch != FAR_FUTURE_EPOCH {
        return Ok(());
    }

    let current_epoch = context.current_epoch();

    //# Compute exit queue epoch
    let mut exit_queue_epoch = compute_activation_exit_epoch::<C>(current_epoch);
    for candidate in state.validators.iter() {
        if candidate.exit_epoch != FAR_FUTURE_EPOCH && candidate.exit_epoch > exit_queue_epoch {
            exit_queue_epoch = candidate.exit_epoch;
        }
    }
    let exit_queue_churn = state
        .validators
        .iter()
        .filter(|candidate| candidate.exit_epoch == exit_queue_epoch)
        .count() as u64;
    let churn_limit =
        compute_churn_limit::<C>(context.current_shuffling.active_indices.len() as u64);
    if exit_queue_churn >= churn_limit {
        exit_queue_epoch += 1;
    }

    //# Set validator exit epoch and withdrawable epoch
    let validator = state
        .validators
        .get_mut(index as usize)
        .ok_or(Error::ValidatorOutOfBounds(index))?;
    validator.exit_epoch = exit_queue_epoch;
    validator.withdrawable_epoch = exit_queue_epoch + C::min_validator_withdrawability_delay();

    Ok(())
}

/// Slash the validator with index `slashed_index`.
pub fn slash_validator<C: Config>(
    context: &EpochContext<C>,
    state: &mut BeaconState<C>,
    slashed_index: ValidatorIndex,
    whistleblower_index: Option<ValidatorIndex>,
) -> Result<(), Error> {
    let epoch = context.current_epoch();
    initiate_validator_exit(context, state, slashed_index)?;

    let validator = state
        .validators
        .get_mut(slashed_index as usize)
        .ok_or(Error::ValidatorOutOfBounds(slashed_index))?;
    validator.slashed = true;
    validator.withdrawable_epoch = cmp::max(
        validator.withdrawable_epoch,
        epoch + C::EpochsPerSlashingsVector::to_u64(),
    );
    let effective_balance = validator.effective_balance;

    let slashings_index = (epoch % C::EpochsPerSlashingsVector::to_u64()) as usize;
    state.slashings[slashings_index] += effective_balance;
    decrease_balance(
        state,
        slashed_index,
        effective_balance / C::min_slashing_penalty_quotient(),
    )?;

    //# Apply proposer and whistleblower rewards
    let proposer_index = context.get_beacon_proposer(state.slot)?;
    let whistleblower_index = whistleblower_index.unwrap_or(proposer_index);
    let whistleblower_reward = effective_balance / C::whistleblower_reward_quotient();
    let proposer_reward = whistleblower_reward / C::proposer_reward_quotient();
    increase_balance(state, proposer_index, proposer_reward)?;
    increase_balance(
        state,
        whistleblower_index,
        whistleblower_reward - proposer_reward,
    )?;

    Ok(())
}
