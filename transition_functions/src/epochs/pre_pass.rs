use helper_functions::beacon_state_accessors::get_block_root_at_slot;
use itertools::Itertools;
use helper_functions::misc::{compute_activation_exit_epoch, compute_churn_limit, compute_start_slot_at_epoch};
use ssz_types::VariableList;
use typenum::marker_traits::Unsigned;
use types::beacon_state::BeaconState;
use types::config::Config;
use types::consts::FAR_FUTURE_EPOCH;
use types::primitives::{Epoch, Gwei, ValidatorIndex};
use types::types::{PendingAttestation, Validator};

use crate::epoch_context::EpochContext;
use crate::error::Error;

pub const FLAG_PREV_SOURCE_ATTESTER: u8 = 1;
pub const FLAG_PREV_TARGET_ATTESTER: u8 = 1 << 1;
pub const FLAG_PREV_HEAD_ATTESTER: u8 = 1 << 2;
pub const FLAG_CURR_SOURCE_ATTESTER: u8 = 1 << 3;
pub const FLAG_CURR_TARGET_ATTESTER: u8 = 1 << 4;
pub const FLAG_CURR_HEAD_ATTESTER: u8 = 1 << 5;
pub const FLAG_UNSLASHED: u8 = 1 << 6;
pub const FLAG_ELIGIBLE_ATTESTER: u8 = 1 << 7;

/// True when every bit of `markers` is set. Multi-bit masks must be tested
/// this way; `flags & markers != 0` would accept partial matches.
pub fn has_markers(flags: u8, markers: u8) -> bool {
    flags & markers == markers
}

/// The per-validator fields the epoch transition reads, pulled out of the
/// registry once so the hot loops never touch the state tree again.
#[derive(Clone, Copy, Debug)]
pub struct FlatValidator {
    pub effective_balance: Gwei,
    pub slashed: bool,
    pub activation_eligibility_epoch: Epoch,
    pub activation_epoch: Epoch,
    pub exit_epoch: Epoch,
    pub withdrawable_epoch: Epoch,
}

impl From<&Validator> for FlatValidator {
    fn from(validator: &Validator) -> Self {
        Self {
            effective_balance: validator.effective_balance,
            slashed: validator.slashed,
            activation_eligibility_epoch: validator.activation_eligibility_epoch,
            activation_epoch: validator.activation_epoch,
            exit_epoch: validator.exit_epoch,
            withdrawable_epoch: validator.withdrawable_epoch,
        }
    }
}

impl FlatValidator {
    pub fn is_active_at(&self, epoch: Epoch) -> bool {
        self.activation_epoch <= epoch && epoch < self.exit_epoch
    }
}

/// One validator's attestation record for one epoch transition.
#[derive(Clone, Copy, Debug)]
pub struct AttesterStatus {
    pub flags: u8,
    /// Proposer that first included an attestation by this validator in
    /// the previous epoch, if any.
    pub proposer_index: Option<ValidatorIndex>,
    pub inclusion_delay: u64,
    pub validator: FlatValidator,
    pub active: bool,
}

impl AttesterStatus {
    fn new(validator: FlatValidator) -> Self {
        Self {
            flags: 0,
            proposer_index: None,
            inclusion_delay: 0,
            validator,
            active: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EpochStakeSummary {
    pub source_stake: Gwei,
    pub target_stake: Gwei,
    pub head_stake: Gwei,
}

/// Everything one epoch transition needs, computed in a single walk over
/// the validator set plus one walk over each pending-attestation pool.
#[derive(Debug)]
pub struct EpochProcess {
    pub prev_epoch: Epoch,
    pub current_epoch: Epoch,
    pub statuses: Vec<AttesterStatus>,
    pub total_active_stake: Gwei,
    pub prev_epoch_unslashed_stake: EpochStakeSummary,
    pub curr_epoch_unslashed_target_stake: Gwei,
    pub active_validators: u64,
    pub indices_to_slash: Vec<ValidatorIndex>,
    pub indices_to_set_activation_eligibility: Vec<ValidatorIndex>,
    /// Candidates only; finality still gates each activation, and the
    /// churn limit is applied by the consumer.
    pub indices_to_maybe_activate: Vec<ValidatorIndex>,
    pub indices_to_eject: Vec<ValidatorIndex>,
    pub exit_queue_end: Epoch,
    pub exit_queue_end_churn: u64,
    pub churn_limit: u64,
}

pub fn prepare_epoch_process<C: Config>(
    context: &EpochContext<C>,
    state: &BeaconState<C>,
) -> Result<EpochProcess, Error> {
    let current_epoch = context.current_epoch();
    let prev_epoch = context.previous_epoch();

    let slashings_epoch = current_epoch + C::EpochsPerSlashingsVector::to_u64() / 2;
    let mut exit_queue_end = compute_activation_exit_epoch::<C>(current_epoch);

    let mut statuses = Vec::with_capacity(state.validators.len());
    let mut indices_to_slash = Vec::new();
    let mut indices_to_set_activation_eligibility = Vec::new();
    let mut indices_to_maybe_activate = Vec::new();
    let mut indices_to_eject = Vec::new();
    let mut total_active_stake = 0;
    let mut active_count = 0;

    for (i, tree_validator) in state.validators.iter().enumerate() {
        let validator = FlatValidator::from(tree_validator);
        let mut status = AttesterStatus::new(validator);
        let index = i as u64;

        if validator.slashed {
            if slashings_epoch == validator.withdrawable_epoch {
                indices_to_slash.push(index);
            }
        } else {
            status.flags |= FLAG_UNSLASHED;
        }

        if validator.is_active_at(prev_epoch)
            || (validator.slashed && prev_epoch + 1 < validator.withdrawable_epoch)
        {
            status.flags |= FLAG_ELIGIBLE_ATTESTER;
        }

        if validator.is_active_at(current_epoch) {
            status.active = true;
            total_active_stake += validator.effective_balance;
            active_count += 1;
        }

        if validator.exit_epoch != FAR_FUTURE_EPOCH && validator.exit_epoch > exit_queue_end {
            exit_queue_end = validator.exit_epoch;
        }

        if validator.activation_eligibility_epoch == FAR_FUTURE_EPOCH
            && validator.effective_balance == C::max_effective_balance()
        {
            indices_to_set_activation_eligibility.push(index);
        }

        if validator.activation_epoch == FAR_FUTURE_EPOCH
            && validator.activation_eligibility_epoch <= current_epoch
        {
            indices_to_maybe_activate.push(index);
        }

        if status.active
            && validator.effective_balance <= C::ejection_balance()
            && validator.exit_epoch == FAR_FUTURE_EPOCH
        {
            indices_to_eject.push(index);
        }

        statuses.push(status);
    }

    if total_active_stake < C::effective_balance_increment() {
        total_active_stake = C::effective_balance_increment();
    }

    // Activations are dequeued in the order the eligibility was set.
    let indices_to_maybe_activate = indices_to_maybe_activate
        .into_iter()
        .sorted_by_key(|index| {
            (
                statuses[*index as usize].validator.activation_eligibility_epoch,
                *index,
            )
        })
        .collect_vec();

    let mut exit_queue_end_churn = statuses
        .iter()
        .filter(|status| status.validator.exit_epoch == exit_queue_end)
        .count() as u64;

    let churn_limit = compute_churn_limit::<C>(active_count);
    if exit_queue_end_churn >= churn_limit {
        exit_queue_end += 1;
        exit_queue_end_churn = 0;
    }

    let mut process = EpochProcess {
        prev_epoch,
        current_epoch,
        statuses,
        total_active_stake,
        prev_epoch_unslashed_stake: EpochStakeSummary::default(),
        curr_epoch_unslashed_target_stake: 0,
        active_validators: active_count,
        indices_to_slash,
        indices_to_set_activation_eligibility,
        indices_to_maybe_activate,
        indices_to_eject,
        exit_queue_end,
        exit_queue_end_churn,
        churn_limit,
    };

    // On top of a genesis state there is no block before slot 0 to
    // attribute against.
    if state.slot > 0 {
        attribute_attestations(
            context,
            state,
            &mut process.statuses,
            &state.previous_epoch_attestations,
            prev_epoch,
            FLAG_PREV_SOURCE_ATTESTER,
            FLAG_PREV_TARGET_ATTESTER,
            FLAG_PREV_HEAD_ATTESTER,
        )?;
    }
    // At the very start of the epoch the current pool is necessarily
    // empty and its target block root does not exist yet.
    if compute_start_slot_at_epoch::<C>(current_epoch) < state.slot {
        attribute_attestations(
            context,
            state,
            &mut process.statuses,
            &state.current_epoch_attestations,
            current_epoch,
            FLAG_CURR_SOURCE_ATTESTER,
            FLAG_CURR_TARGET_ATTESTER,
            FLAG_CURR_HEAD_ATTESTER,
        )?;
    }

    let mut prev_source_stake = 0;
    let mut prev_target_stake = 0;
    let mut prev_head_stake = 0;
    let mut curr_target_stake = 0;

    for status in &process.statuses {
        let effective_balance = status.validator.effective_balance;
        if has_markers(status.flags, FLAG_PREV_SOURCE_ATTESTER | FLAG_UNSLASHED) {
            prev_source_stake += effective_balance;
            if has_markers(status.flags, FLAG_PREV_TARGET_ATTESTER) {
                prev_target_stake += effective_balance;
                if has_markers(status.flags, FLAG_PREV_HEAD_ATTESTER) {
                    prev_head_stake += effective_balance;
                }
            }
        }
        if has_markers(status.flags, FLAG_CURR_TARGET_ATTESTER | FLAG_UNSLASHED) {
            curr_target_stake += effective_balance;
        }
    }

    // Floor each sum at one increment so later divisions cannot hit zero.
    let increment = C::effective_balance_increment();
    process.prev_epoch_unslashed_stake.source_stake = prev_source_stake.max(increment);
    process.prev_epoch_unslashed_stake.target_stake = prev_target_stake.max(increment);
    process.prev_epoch_unslashed_stake.head_stake = prev_head_stake.max(increment);
    process.curr_epoch_unslashed_target_stake = curr_target_stake.max(increment);

    Ok(process)
}

#[allow(clippy::too_many_arguments)]
fn attribute_attestations<C: Config, N: Unsigned>(
    context: &EpochContext<C>,
    state: &BeaconState<C>,
    statuses: &mut [AttesterStatus],
    attestations: &VariableList<PendingAttestation<C>, N>,
    epoch: Epoch,
    source_flag: u8,
    target_flag: u8,
    head_flag: u8,
) -> Result<(), Error> {
    let actual_target_root =
        get_block_root_at_slot(state, compute_start_slot_at_epoch::<C>(epoch))?;
    let prev_epoch = context.previous_epoch();

    for attestation in attestations.iter() {
        let data = &attestation.data;

        let voted_target_root = data.target.root == actual_target_root;
        let voted_head_root =
            data.beacon_block_root == get_block_root_at_slot(state, data.slot)?;

        // The target is known to be this epoch, so the committee comes
        // straight out of the matching cached shuffling.
        let committee = context.get_beacon_committee(data.slot, data.index)?;

        let mut participants = Vec::with_capacity(committee.len());
        for (position, index) in committee.iter().enumerate() {
            let bit = attestation
                .aggregation_bits
                .get(position)
                .map_err(|_| Error::Helper(helper_functions::error::Error::AttestationBitsInvalid))?;
            if bit {
                participants.push(*index);
            }
        }

        for participant in participants {
            let status = statuses
                .get_mut(participant as usize)
                .ok_or(Error::ValidatorOutOfBounds(participant))?;

            if epoch == prev_epoch {
                // Track the earliest inclusion; the smallest delay wins
                // and ties keep the first record.
                if status.proposer_index.is_none()
                    || status.inclusion_delay > attestation.inclusion_delay
                {
                    status.proposer_index = Some(attestation.proposer_index);
                    status.inclusion_delay = attestation.inclusion_delay;
                }
            }

            status.flags |= source_flag;
            if voted_target_root {
                status.flags |= target_flag;
                // Head votes must be a subset of target votes.
                if voted_head_root {
                    status.flags |= head_flag;
                }
            }
        }
    }

    Ok(())
}
