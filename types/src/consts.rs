pub use crate::primitives::{Epoch, Gwei, Slot};

pub const BASE_REWARDS_PER_EPOCH: u64 = 4;
pub const GENESIS_EPOCH: Epoch = 0;
pub const GENESIS_SLOT: Slot = 0;
pub const JUSTIFICATION_BITS_LENGTH: usize = 4;
pub const DEPOSIT_CONTRACT_TREE_DEPTH: u64 = 32;
pub const FAR_FUTURE_EPOCH: Epoch = u64::max_value();

pub type DepositContractTreeDepth = typenum::U32;
pub type JustificationBitsLength = typenum::U4;
