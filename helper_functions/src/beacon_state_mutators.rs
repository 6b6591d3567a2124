use std::convert::TryFrom;

use types::beacon_state::BeaconState;
use types::config::Config;
use types::primitives::{Gwei, ValidatorIndex};

use crate::error::Error;

pub fn increase_balance<C: Config>(
    state: &mut BeaconState<C>,
    index: ValidatorIndex,
    delta: Gwei,
) -> Result<(), Error> {
    let id = usize::try_from(index).map_err(|_| Error::ConversionToUsize)?;
    let balance = state.balances.get_mut(id).ok_or(Error::IndexOutOfRange)?;
    *balance += delta;
    Ok(())
}

/// Decrease the balance, saturating at zero.
pub fn decrease_balance<C: Config>(
    state: &mut BeaconState<C>,
    index: ValidatorIndex,
    delta: Gwei,
) -> Result<(), Error> {
    let id = usize::try_from(index).map_err(|_| Error::ConversionToUsize)?;
    let balance = state.balances.get_mut(id).ok_or(Error::IndexOutOfRange)?;
    *balance = balance.saturating_sub(delta);
    Ok(())
}
