use types::primitives::{Epoch, H256};
use types::types::{AttestationData, Validator};

use crate::crypto::hash_to_h256;

pub fn is_active_validator(validator: &Validator, epoch: Epoch) -> bool {
    validator.activation_epoch <= epoch && epoch < validator.exit_epoch
}

pub fn is_slashable_validator(validator: &Validator, epoch: Epoch) -> bool {
    !validator.slashed
        && validator.activation_epoch <= epoch
        && epoch < validator.withdrawable_epoch
}

/// Double votes and surround votes are slashable under Casper FFG.
pub fn is_slashable_attestation_data(data_1: &AttestationData, data_2: &AttestationData) -> bool {
    let double_vote = data_1 != data_2 && data_1.target.epoch == data_2.target.epoch;
    let surround_vote =
        data_1.source.epoch < data_2.source.epoch && data_2.target.epoch < data_1.target.epoch;
    double_vote || surround_vote
}

pub fn is_valid_merkle_branch(
    leaf: &H256,
    branch: &[H256],
    depth: u64,
    index: u64,
    root: &H256,
) -> bool {
    if (branch.len() as u64) < depth {
        return false;
    }
    let mut value = *leaf;
    let mut preimage = [0; 64];
    for (i, node) in branch.iter().enumerate().take(depth as usize) {
        if (index >> i) & 1 == 1 {
            preimage[..32].copy_from_slice(node.as_bytes());
            preimage[32..].copy_from_slice(value.as_bytes());
        } else {
            preimage[..32].copy_from_slice(value.as_bytes());
            preimage[32..].copy_from_slice(node.as_bytes());
        }
        value = hash_to_h256(&preimage);
    }
    value == *root
}
