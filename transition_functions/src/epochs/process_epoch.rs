use std::cmp;
use std::mem;

use helper_functions::beacon_state_accessors::{get_block_root, get_randao_mix};
use helper_functions::beacon_state_mutators::decrease_balance;
use helper_functions::crypto::hash_tree_root;
use helper_functions::misc::compute_activation_exit_epoch;
use ssz_types::VariableList;
use typenum::marker_traits::Unsigned;
use types::beacon_state::BeaconState;
use types::config::Config;
use types::consts::JUSTIFICATION_BITS_LENGTH;
use types::types::{Checkpoint, HistoricalBatch};

use crate::epoch_context::EpochContext;
use crate::epochs::pre_pass::{prepare_epoch_process, EpochProcess};
use crate::error::Error;
use crate::rewards_and_penalties::process_rewards_and_penalties;

/// The full epoch transition, run on the last slot of an epoch.
pub fn process_epoch<C: Config>(
    context: &EpochContext<C>,
    state: &mut BeaconState<C>,
) -> Result<(), Error> {
    let process = prepare_epoch_process(context, state)?;
    process_justification_and_finalization(&process, state)?;
    process_rewards_and_penalties(&process, state)?;
    process_registry_updates(context, &process, state)?;
    process_slashings(&process, state)?;
    process_final_updates(&process, state)
}

pub fn process_justification_and_finalization<C: Config>(
    process: &EpochProcess,
    state: &mut BeaconState<C>,
) -> Result<(), Error> {
    if process.current_epoch <= C::genesis_epoch() + 1 {
        return Ok(());
    }

    let previous_epoch = process.prev_epoch;
    let current_epoch = process.current_epoch;
    let old_previous_justified_checkpoint = state.previous_justified_checkpoint;
    let old_current_justified_checkpoint = state.current_justified_checkpoint;

    // Process justifications
    state.previous_justified_checkpoint = state.current_justified_checkpoint;

    let mut bits = [false; JUSTIFICATION_BITS_LENGTH];
    for (i, bit) in bits.iter_mut().enumerate() {
        *bit = state
            .justification_bits
            .get(i)
            .map_err(|_| Error::Helper(helper_functions::error::Error::IndexOutOfRange))?;
    }
    // Shift the window by one epoch; the oldest bit falls off.
    bits.rotate_right(1);
    bits[0] = false;

    if process.prev_epoch_unslashed_stake.target_stake * 3 >= process.total_active_stake * 2 {
        state.current_justified_checkpoint = Checkpoint {
            epoch: previous_epoch,
            root: get_block_root(state, previous_epoch)?,
        };
        bits[1] = true;
    }
    if process.curr_epoch_unslashed_target_stake * 3 >= process.total_active_stake * 2 {
        state.current_justified_checkpoint = Checkpoint {
            epoch: current_epoch,
            root: get_block_root(state, current_epoch)?,
        };
        bits[0] = true;
    }

    for (i, bit) in bits.iter().enumerate() {
        state
            .justification_bits
            .set(i, *bit)
            .map_err(|_| Error::Helper(helper_functions::error::Error::IndexOutOfRange))?;
    }

    // Process finalizations
    // The 2nd/3rd/4th most recent epochs are justified, the 2nd using the 4th as source
    if bits[1] && bits[2] && bits[3] && old_previous_justified_checkpoint.epoch + 3 == current_epoch
    {
        state.finalized_checkpoint = old_previous_justified_checkpoint;
    }
    // The 2nd/3rd most recent epochs are justified, the 2nd using the 3rd as source
    if bits[1] && bits[2] && old_previous_justified_checkpoint.epoch + 2 == current_epoch {
        state.finalized_checkpoint = old_previous_justified_checkpoint;
    }
    // The 1st/2nd/3rd most recent epochs are justified, the 1st using the 3rd as source
    if bits[0] && bits[1] && bits[2] && old_current_justified_checkpoint.epoch + 2 == current_epoch
    {
        state.finalized_checkpoint = old_current_justified_checkpoint;
    }
    // The 1st/2nd most recent epochs are justified, the 1st using the 2nd as source
    if bits[0] && bits[1] && old_current_justified_checkpoint.epoch + 1 == current_epoch {
        state.finalized_checkpoint = old_current_justified_checkpoint;
    }

    Ok(())
}

pub fn process_registry_updates<C: Config>(
    context: &EpochContext<C>,
    process: &EpochProcess,
    state: &mut BeaconState<C>,
) -> Result<(), Error> {
    let mut exit_end = process.exit_queue_end;
    let mut end_churn = process.exit_queue_end_churn;

    // Ejections share the exit queue computed by the pre-pass.
    for index in &process.indices_to_eject {
        let validator = state
            .validators
            .get_mut(*index as usize)
            .ok_or(Error::ValidatorOutOfBounds(*index))?;
        validator.exit_epoch = exit_end;
        validator.withdrawable_epoch = exit_end + C::min_validator_withdrawability_delay();

        end_churn += 1;
        if end_churn >= process.churn_limit {
            end_churn = 0;
            exit_end += 1;
        }
    }

    for index in &process.indices_to_set_activation_eligibility {
        state
            .validators
            .get_mut(*index as usize)
            .ok_or(Error::ValidatorOutOfBounds(*index))?
            .activation_eligibility_epoch = context.current_epoch() + 1;
    }

    let finality_epoch = state.finalized_checkpoint.epoch;
    let delayed_activation_epoch = compute_activation_exit_epoch::<C>(process.current_epoch);
    for index in process
        .indices_to_maybe_activate
        .iter()
        .take(process.churn_limit as usize)
    {
        let status = process
            .statuses
            .get(*index as usize)
            .ok_or(Error::ValidatorOutOfBounds(*index))?;
        // Placement in the queue is finalized; every remaining candidate
        // has a later eligibility epoch, so stop at the first miss.
        if status.validator.activation_eligibility_epoch > finality_epoch {
            break;
        }
        state
            .validators
            .get_mut(*index as usize)
            .ok_or(Error::ValidatorOutOfBounds(*index))?
            .activation_epoch = delayed_activation_epoch;
    }

    Ok(())
}

pub fn process_slashings<C: Config>(
    process: &EpochProcess,
    state: &mut BeaconState<C>,
) -> Result<(), Error> {
    let total_balance = process.total_active_stake;
    let slashings_sum = state.slashings.iter().sum::<u64>();
    let slashings_scale = cmp::min(slashings_sum * 3, total_balance);

    for index in &process.indices_to_slash {
        let increment = C::effective_balance_increment();
        let effective_balance = process
            .statuses
            .get(*index as usize)
            .ok_or(Error::ValidatorOutOfBounds(*index))?
            .validator
            .effective_balance;
        // Factored so the numerator cannot overflow.
        let penalty_numerator = effective_balance / increment * slashings_scale;
        let penalty = penalty_numerator / total_balance * increment;
        decrease_balance(state, *index, penalty)?;
    }

    Ok(())
}

pub fn process_final_updates<C: Config>(
    process: &EpochProcess,
    state: &mut BeaconState<C>,
) -> Result<(), Error> {
    let current_epoch = process.current_epoch;
    let next_epoch = current_epoch + 1;
    let slots_per_epoch = C::SlotsPerEpoch::to_u64();

    //# Reset eth1 data votes
    let epochs_per_eth1_voting_period = C::SlotsPerEth1VotingPeriod::to_u64() / slots_per_epoch;
    if next_epoch % epochs_per_eth1_voting_period == 0 {
        state.eth1_data_votes = VariableList::from(vec![]);
    }

    //# Update effective balances with hysteresis
    let increment = C::effective_balance_increment();
    let hysteresis_increment = increment / C::hysteresis_quotient();
    let downward_threshold = hysteresis_increment * C::hysteresis_downward_multiplier();
    let upward_threshold = hysteresis_increment * C::hysteresis_upward_multiplier();
    for (index, status) in process.statuses.iter().enumerate() {
        let balance = *state
            .balances
            .get(index)
            .ok_or(Error::ValidatorOutOfBounds(index as u64))?;
        let effective_balance = status.validator.effective_balance;
        if balance + downward_threshold < effective_balance
            || effective_balance + upward_threshold < balance
        {
            state
                .validators
                .get_mut(index)
                .ok_or(Error::ValidatorOutOfBounds(index as u64))?
                .effective_balance =
                cmp::min(balance - balance % increment, C::max_effective_balance());
        }
    }

    //# Reset slashings
    let slashings_index = (next_epoch % C::EpochsPerSlashingsVector::to_u64()) as usize;
    state.slashings[slashings_index] = 0;

    //# Set randao mix
    let mix = get_randao_mix(state, current_epoch);
    let mix_index = (next_epoch % C::EpochsPerHistoricalVector::to_u64()) as usize;
    state.randao_mixes[mix_index] = mix;

    //# Set historical root accumulator
    if next_epoch % (C::SlotsPerHistoricalRoot::to_u64() / slots_per_epoch) == 0 {
        let historical_batch = HistoricalBatch::<C> {
            block_roots: state.block_roots.clone(),
            state_roots: state.state_roots.clone(),
        };
        state
            .historical_roots
            .push(hash_tree_root(&historical_batch))
            .map_err(|_| Error::ListFull)?;
    }

    //# Rotate current/previous epoch attestations
    state.previous_epoch_attestations = mem::replace(
        &mut state.current_epoch_attestations,
        VariableList::from(vec![]),
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use helper_functions::beacon_state_accessors::get_block_root_at_slot;
    use types::config::MinimalConfig;
    use types::consts::FAR_FUTURE_EPOCH;
    use types::primitives::H256;

    use super::*;
    use crate::state_builder::{genesis_state_with_attestations, interop_genesis_state};

    type C = MinimalConfig;

    #[test]
    fn two_thirds_target_participation_justifies_previous_epoch() {
        let (mut state, _) = genesis_state_with_attestations::<C>(8);
        let context = EpochContext::load(&state).unwrap();
        let process = prepare_epoch_process(&context, &state).unwrap();

        let expected_root =
            get_block_root_at_slot(&state, C::SlotsPerEpoch::to_u64()).unwrap();

        process_justification_and_finalization(&process, &mut state).unwrap();

        assert_eq!(
            state.current_justified_checkpoint,
            Checkpoint {
                epoch: 1,
                root: expected_root,
            },
        );
        assert!(state.justification_bits.get(1).unwrap());
        assert!(!state.justification_bits.get(0).unwrap());
        assert_eq!(state.justification_bits.len(), JUSTIFICATION_BITS_LENGTH);
        assert_eq!(state.finalized_checkpoint.epoch, 0);
    }

    #[test]
    fn justification_is_skipped_near_genesis() {
        let (mut state, _) = interop_genesis_state::<C>(8);
        let context = EpochContext::load(&state).unwrap();
        let process = prepare_epoch_process(&context, &state).unwrap();

        process_justification_and_finalization(&process, &mut state).unwrap();
        assert_eq!(state.current_justified_checkpoint, Checkpoint::default());
    }

    #[test]
    fn ejected_validators_enter_the_exit_queue() {
        let (mut state, _) = interop_genesis_state::<C>(8);
        state.validators[1].effective_balance = C::ejection_balance();
        let context = EpochContext::load(&state).unwrap();
        let process = prepare_epoch_process(&context, &state).unwrap();

        process_registry_updates(&context, &process, &mut state).unwrap();

        let expected_exit = compute_activation_exit_epoch::<C>(0);
        assert_eq!(state.validators[1].exit_epoch, expected_exit);
        assert_eq!(
            state.validators[1].withdrawable_epoch,
            expected_exit + C::min_validator_withdrawability_delay(),
        );
    }

    #[test]
    fn eligible_deposits_get_an_eligibility_epoch() {
        let (mut state, _) = interop_genesis_state::<C>(8);
        state.validators[4].activation_eligibility_epoch = FAR_FUTURE_EPOCH;
        let context = EpochContext::load(&state).unwrap();
        let process = prepare_epoch_process(&context, &state).unwrap();

        process_registry_updates(&context, &process, &mut state).unwrap();
        assert_eq!(state.validators[4].activation_eligibility_epoch, 1);
    }

    #[test]
    fn finalized_eligibility_is_activated_up_to_the_churn_limit() {
        let (mut state, _) = interop_genesis_state::<C>(8);
        for index in 0..6 {
            state.validators[index].activation_epoch = FAR_FUTURE_EPOCH;
            state.validators[index].activation_eligibility_epoch = 0;
        }
        let context = EpochContext::load(&state).unwrap();
        let process = prepare_epoch_process(&context, &state).unwrap();

        process_registry_updates(&context, &process, &mut state).unwrap();

        let expected_activation = compute_activation_exit_epoch::<C>(0);
        let activated = state
            .validators
            .iter()
            .filter(|validator| validator.activation_epoch == expected_activation)
            .count() as u64;
        assert_eq!(activated, process.churn_limit);
    }

    #[test]
    fn matured_slashings_are_penalised_proportionally() {
        let (mut state, _) = interop_genesis_state::<C>(8);
        let vector_half = C::EpochsPerSlashingsVector::to_u64() / 2;
        state.validators[0].slashed = true;
        state.validators[0].withdrawable_epoch = vector_half;
        state.slashings[0] = C::max_effective_balance();
        let context = EpochContext::load(&state).unwrap();
        let process = prepare_epoch_process(&context, &state).unwrap();
        assert_eq!(process.indices_to_slash, vec![0]);

        let balance_before = state.balances[0];
        process_slashings(&process, &mut state).unwrap();
        assert!(state.balances[0] < balance_before);
    }

    #[test]
    fn hysteresis_tracks_large_balance_drops() {
        let (mut state, _) = interop_genesis_state::<C>(8);
        // A drop well past the downward threshold.
        state.balances[3] = 30_250_000_000;
        let context = EpochContext::load(&state).unwrap();
        let process = prepare_epoch_process(&context, &state).unwrap();

        process_final_updates(&process, &mut state).unwrap();
        assert_eq!(state.validators[3].effective_balance, 30_000_000_000);
    }

    #[test]
    fn hysteresis_ignores_small_balance_drift() {
        let (mut state, _) = interop_genesis_state::<C>(8);
        state.balances[3] = C::max_effective_balance() - 100_000_000;
        let context = EpochContext::load(&state).unwrap();
        let process = prepare_epoch_process(&context, &state).unwrap();

        process_final_updates(&process, &mut state).unwrap();
        assert_eq!(
            state.validators[3].effective_balance,
            C::max_effective_balance(),
        );
    }

    #[test]
    fn final_updates_rotate_rings_and_pools() {
        let (mut state, _) = genesis_state_with_attestations::<C>(8);
        state.slashings[3] = 17;
        state.randao_mixes[2] = H256::from([9; 32]);
        let context = EpochContext::load(&state).unwrap();
        let process = prepare_epoch_process(&context, &state).unwrap();
        let current_epoch = process.current_epoch;

        process_final_updates(&process, &mut state).unwrap();

        assert_eq!(
            state.slashings[(current_epoch as usize + 1) % 64],
            0,
        );
        assert_eq!(
            state.randao_mixes[(current_epoch as usize + 1) % 64],
            state.randao_mixes[current_epoch as usize % 64],
        );
        assert!(state.current_epoch_attestations.is_empty());
    }
}
