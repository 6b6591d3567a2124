use integer_sqrt::IntegerSquareRoot;
use ssz_types::VariableList;
use types::beacon_state::BeaconState;
use types::config::Config;
use types::consts::BASE_REWARDS_PER_EPOCH;
use types::primitives::Gwei;

use crate::epochs::pre_pass::{
    has_markers, EpochProcess, FLAG_ELIGIBLE_ATTESTER, FLAG_PREV_HEAD_ATTESTER,
    FLAG_PREV_SOURCE_ATTESTER, FLAG_PREV_TARGET_ATTESTER, FLAG_UNSLASHED,
};
use crate::error::Error;

#[derive(Debug)]
struct Deltas {
    rewards: Vec<Gwei>,
    penalties: Vec<Gwei>,
}

impl Deltas {
    fn new(size: usize) -> Self {
        Self {
            rewards: vec![0; size],
            penalties: vec![0; size],
        }
    }
}

#[derive(Debug)]
struct AttestationDeltas {
    source: Deltas,
    target: Deltas,
    head: Deltas,
    inclusion_delay: Deltas,
    inactivity: Deltas,
}

impl AttestationDeltas {
    fn new(size: usize) -> Self {
        Self {
            source: Deltas::new(size),
            target: Deltas::new(size),
            head: Deltas::new(size),
            inclusion_delay: Deltas::new(size),
            inactivity: Deltas::new(size),
        }
    }
}

fn attestation_deltas<C: Config>(
    process: &EpochProcess,
    state: &BeaconState<C>,
) -> Result<AttestationDeltas, Error> {
    let validator_count = process.statuses.len();
    let mut deltas = AttestationDeltas::new(validator_count);

    let increment = C::effective_balance_increment();
    let total_balance = process.total_active_stake.max(increment);

    // Square root before normalising the sums to increments.
    let balance_sq_root = total_balance.integer_sqrt();
    let finality_delay = process.prev_epoch - state.finalized_checkpoint.epoch;
    let is_inactivity_leak = finality_delay > C::min_epochs_to_inactivity_penalty();

    // Summed effective balances are normalised to increments so the
    // reward products below cannot overflow.
    let total_balance = total_balance / increment;
    let prev_source_stake = process.prev_epoch_unslashed_stake.source_stake.max(increment) / increment;
    let prev_target_stake = process.prev_epoch_unslashed_stake.target_stake.max(increment) / increment;
    let prev_head_stake = process.prev_epoch_unslashed_stake.head_stake.max(increment) / increment;

    for (i, status) in process.statuses.iter().enumerate() {
        let effective_balance = status.validator.effective_balance;
        let base_reward =
            effective_balance * C::base_reward_factor() / balance_sq_root / BASE_REWARDS_PER_EPOCH;
        let proposer_reward = base_reward / C::proposer_reward_quotient();

        // Inclusion speed bonus
        if has_markers(status.flags, FLAG_PREV_SOURCE_ATTESTER | FLAG_UNSLASHED) {
            let proposer_index = status
                .proposer_index
                .ok_or(Error::InconsistentAttesterStatus)?;
            *deltas
                .inclusion_delay
                .rewards
                .get_mut(proposer_index as usize)
                .ok_or(Error::InconsistentAttesterStatus)? += proposer_reward;
            let max_attester_reward = base_reward - proposer_reward;
            if status.inclusion_delay == 0 {
                return Err(Error::InconsistentAttesterStatus);
            }
            deltas.inclusion_delay.rewards[i] += max_attester_reward / status.inclusion_delay;
        }

        if status.flags & FLAG_ELIGIBLE_ATTESTER != 0 {
            // During a leak the full base reward is cancelled out by the
            // inactivity deltas, so optimal participation earns the full
            // base reward here instead of a fraction.

            // Expected FFG source
            if has_markers(status.flags, FLAG_PREV_SOURCE_ATTESTER | FLAG_UNSLASHED) {
                if is_inactivity_leak {
                    deltas.source.rewards[i] += base_reward;
                } else {
                    deltas.source.rewards[i] += base_reward * prev_source_stake / total_balance;
                }
            } else {
                deltas.source.penalties[i] += base_reward;
            }

            // Expected FFG target
            if has_markers(status.flags, FLAG_PREV_TARGET_ATTESTER | FLAG_UNSLASHED) {
                if is_inactivity_leak {
                    deltas.target.rewards[i] += base_reward;
                } else {
                    deltas.target.rewards[i] += base_reward * prev_target_stake / total_balance;
                }
            } else {
                deltas.target.penalties[i] += base_reward;
            }

            // Expected head
            if has_markers(status.flags, FLAG_PREV_HEAD_ATTESTER | FLAG_UNSLASHED) {
                if is_inactivity_leak {
                    deltas.head.rewards[i] += base_reward;
                } else {
                    deltas.head.rewards[i] += base_reward * prev_head_stake / total_balance;
                }
            } else {
                deltas.head.penalties[i] += base_reward;
            }

            if is_inactivity_leak {
                deltas.inclusion_delay.penalties[i] +=
                    base_reward * BASE_REWARDS_PER_EPOCH - proposer_reward;
                if !has_markers(status.flags, FLAG_PREV_TARGET_ATTESTER | FLAG_UNSLASHED) {
                    deltas.inactivity.penalties[i] +=
                        effective_balance * finality_delay / C::inactivity_penalty_quotient();
                }
            }
        }
    }

    Ok(deltas)
}

/// Apply attestation rewards and penalties for the previous epoch. All
/// rewards land before any penalty, penalties clip at zero, and the
/// balance list is replaced in one assignment.
pub fn process_rewards_and_penalties<C: Config>(
    process: &EpochProcess,
    state: &mut BeaconState<C>,
) -> Result<(), Error> {
    if process.current_epoch == C::genesis_epoch() {
        return Ok(());
    }

    let deltas = attestation_deltas(process, state)?;
    let mut new_balances = state.balances.iter().copied().collect::<Vec<_>>();

    for component in &[
        &deltas.source,
        &deltas.target,
        &deltas.head,
        &deltas.inclusion_delay,
        &deltas.inactivity,
    ] {
        for (balance, reward) in new_balances.iter_mut().zip(&component.rewards) {
            *balance += reward;
        }
    }
    for component in &[
        &deltas.source,
        &deltas.target,
        &deltas.head,
        &deltas.inclusion_delay,
        &deltas.inactivity,
    ] {
        for (balance, penalty) in new_balances.iter_mut().zip(&component.penalties) {
            *balance = balance.saturating_sub(*penalty);
        }
    }

    state.balances = VariableList::from(new_balances);
    Ok(())
}

#[cfg(test)]
mod tests {
    use types::config::MinimalConfig;
    use types::primitives::H256;
    use types::types::Checkpoint;

    use super::*;
    use crate::epoch_context::EpochContext;
    use crate::epochs::pre_pass::prepare_epoch_process;
    use crate::state_builder::interop_genesis_state;

    type C = MinimalConfig;

    fn state_with_full_previous_participation() -> BeaconState<C> {
        let (mut state, _) = crate::state_builder::genesis_state_with_attestations::<C>(8);
        // Leave finality close enough that the inactivity leak stays off.
        state.finalized_checkpoint = Checkpoint {
            epoch: 0,
            root: H256::zero(),
        };
        state
    }

    #[test]
    fn genesis_epoch_is_untouched() {
        let (mut state, _) = interop_genesis_state::<C>(4);
        let context = EpochContext::load(&state).unwrap();
        let process = prepare_epoch_process(&context, &state).unwrap();
        let balances_before = state.balances.iter().copied().collect::<Vec<_>>();

        process_rewards_and_penalties(&process, &mut state).unwrap();
        assert_eq!(state.balances.iter().copied().collect::<Vec<_>>(), balances_before);
    }

    #[test]
    fn full_participation_earns_rewards() {
        let mut state = state_with_full_previous_participation();
        let context = EpochContext::load(&state).unwrap();
        let process = prepare_epoch_process(&context, &state).unwrap();
        let balances_before = state.balances.iter().copied().collect::<Vec<_>>();

        process_rewards_and_penalties(&process, &mut state).unwrap();

        for (after, before) in state.balances.iter().zip(&balances_before) {
            assert!(after > before, "{} should exceed {}", after, before);
        }
    }

    #[test]
    fn absent_attesters_are_penalised() {
        let mut state = state_with_full_previous_participation();
        // Drop every previous-epoch attestation so no one participated.
        state.previous_epoch_attestations = VariableList::from(vec![]);
        let context = EpochContext::load(&state).unwrap();
        let process = prepare_epoch_process(&context, &state).unwrap();
        let balances_before = state.balances.iter().copied().collect::<Vec<_>>();

        process_rewards_and_penalties(&process, &mut state).unwrap();

        for (after, before) in state.balances.iter().zip(&balances_before) {
            assert!(after < before);
        }
    }
}
