pub mod blocks;
pub mod epoch_context;
pub mod epochs;
pub mod error;
pub mod process_slot;
pub mod rewards_and_penalties;
pub mod state_builder;

pub use crate::epoch_context::EpochContext;
pub use crate::error::Error;
pub use crate::process_slot::{process_slots, state_transition, verify_block_signature};
