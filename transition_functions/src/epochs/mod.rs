pub mod pre_pass;
pub mod process_epoch;
