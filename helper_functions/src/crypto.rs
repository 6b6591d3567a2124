use ring::digest::{digest, SHA256};
use tree_hash::TreeHash;
use types::primitives::H256;

pub fn hash(input: &[u8]) -> Vec<u8> {
    digest(&SHA256, input).as_ref().to_vec()
}

pub fn hash_to_h256(input: &[u8]) -> H256 {
    H256::from_slice(&hash(input))
}

pub fn hash_tree_root<T: TreeHash>(object: &T) -> H256 {
    H256::from_slice(&object.tree_hash_root())
}
