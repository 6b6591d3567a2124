use ethereum_types::H256;
use rlp::Rlp;

use crate::error::TrieError;
use crate::store::NodeStore;

/// Root hash of an empty hexary trie: `keccak(rlp(b""))`.
pub const EMPTY_TRIE_ROOT: H256 = H256([
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8,
    0x6e, 0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63,
    0xb4, 0x21,
]);

/// Read-only hexary Merkle-Patricia lookups over a node store.
///
/// A node absent from the store surfaces as
/// [`TrieError::MissingNode`] carrying the hash to download; the reader
/// never fetches anything itself.
pub struct TrieReader<'a, S: NodeStore + ?Sized> {
    store: &'a S,
    root: H256,
}

enum NodeHandle {
    Hash(H256),
    Inline(Vec<u8>),
    Empty,
}

enum Step {
    Value(Vec<u8>),
    Descend(NodeHandle, usize),
    Miss,
}

impl<'a, S: NodeStore + ?Sized> TrieReader<'a, S> {
    pub fn new(store: &'a S, root: H256) -> Self {
        Self { store, root }
    }

    /// Look up the value stored under `key`. Keys are used as-is; callers
    /// hash addresses and storage slots themselves.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, TrieError> {
        if self.root == EMPTY_TRIE_ROOT {
            return Err(TrieError::KeyNotFound);
        }

        let path = to_nibbles(key);
        let mut path_offset = 0;
        let mut current_hash = self.root;
        let mut node_bytes = self.read_node(current_hash)?;

        loop {
            match decode_and_step(&node_bytes, &path, path_offset, current_hash)? {
                Step::Value(value) => return Ok(value),
                Step::Miss => return Err(TrieError::KeyNotFound),
                Step::Descend(handle, next_offset) => match handle {
                    NodeHandle::Empty => return Err(TrieError::KeyNotFound),
                    NodeHandle::Hash(hash) => {
                        current_hash = hash;
                        node_bytes = self.read_node(hash)?;
                        path_offset = next_offset;
                    }
                    NodeHandle::Inline(bytes) => {
                        // Nodes shorter than 32 bytes are embedded in
                        // their parent instead of being hashed.
                        node_bytes = bytes;
                        path_offset = next_offset;
                    }
                },
            }
        }
    }

    fn read_node(&self, hash: H256) -> Result<Vec<u8>, TrieError> {
        self.store.get(&hash).ok_or(TrieError::MissingNode(hash))
    }
}

fn decode_and_step(
    node_bytes: &[u8],
    path: &[u8],
    path_offset: usize,
    context_hash: H256,
) -> Result<Step, TrieError> {
    let malformed = TrieError::MalformedNode(context_hash);
    let node = Rlp::new(node_bytes);
    let remaining = &path[path_offset..];

    match node.item_count().map_err(|_| malformed)? {
        17 => {
            // Branch node: one child per nibble plus a value slot.
            if remaining.is_empty() {
                let value = node.at(16).and_then(|item| item.data().map(<[u8]>::to_vec));
                let value = value.map_err(|_| malformed)?;
                if value.is_empty() {
                    Ok(Step::Miss)
                } else {
                    Ok(Step::Value(value))
                }
            } else {
                let child = node.at(remaining[0] as usize).map_err(|_| malformed)?;
                Ok(Step::Descend(
                    decode_child(&child, context_hash)?,
                    path_offset + 1,
                ))
            }
        }
        2 => {
            let encoded_path = node
                .at(0)
                .and_then(|item| item.data().map(<[u8]>::to_vec))
                .map_err(|_| malformed)?;
            let (prefix, is_leaf) = decode_hex_prefix(&encoded_path, context_hash)?;

            if is_leaf {
                if remaining == prefix.as_slice() {
                    let value = node
                        .at(1)
                        .and_then(|item| item.data().map(<[u8]>::to_vec))
                        .map_err(|_| malformed)?;
                    Ok(Step::Value(value))
                } else {
                    Ok(Step::Miss)
                }
            } else if remaining.starts_with(&prefix) {
                let child = node.at(1).map_err(|_| malformed)?;
                Ok(Step::Descend(
                    decode_child(&child, context_hash)?,
                    path_offset + prefix.len(),
                ))
            } else {
                Ok(Step::Miss)
            }
        }
        _ => Err(malformed),
    }
}

fn decode_child(item: &Rlp, context_hash: H256) -> Result<NodeHandle, TrieError> {
    if item.is_list() {
        return Ok(NodeHandle::Inline(item.as_raw().to_vec()));
    }
    let data = item
        .data()
        .map_err(|_| TrieError::MalformedNode(context_hash))?;
    match data.len() {
        0 => Ok(NodeHandle::Empty),
        32 => Ok(NodeHandle::Hash(H256::from_slice(data))),
        _ => Err(TrieError::MalformedNode(context_hash)),
    }
}

/// Undo the hex-prefix encoding of a leaf or extension path: the high
/// flag nibble carries the node kind and the parity of the path.
fn decode_hex_prefix(encoded: &[u8], context_hash: H256) -> Result<(Vec<u8>, bool), TrieError> {
    let first = *encoded
        .first()
        .ok_or(TrieError::MalformedNode(context_hash))?;
    let flag = first >> 4;
    if flag > 3 {
        return Err(TrieError::MalformedNode(context_hash));
    }
    let is_leaf = flag & 2 != 0;

    let mut nibbles = Vec::with_capacity(encoded.len() * 2);
    if flag & 1 == 1 {
        nibbles.push(first & 0x0f);
    }
    for byte in &encoded[1..] {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0f);
    }
    Ok((nibbles, is_leaf))
}

fn to_nibbles(key: &[u8]) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(key.len() * 2);
    for byte in key {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0f);
    }
    nibbles
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use rlp::RlpStream;

    use super::*;
    use crate::keccak;
    use crate::store::MemoryNodeStore;

    pub fn encode_hex_prefix(nibbles: &[u8], is_leaf: bool) -> Vec<u8> {
        let mut flag = if is_leaf { 2 } else { 0 };
        let odd = nibbles.len() % 2 == 1;
        if odd {
            flag |= 1;
        }
        let mut encoded = Vec::with_capacity(nibbles.len() / 2 + 1);
        let mut rest = nibbles;
        if odd {
            encoded.push((flag << 4) | nibbles[0]);
            rest = &nibbles[1..];
        } else {
            encoded.push(flag << 4);
        }
        for pair in rest.chunks(2) {
            encoded.push((pair[0] << 4) | pair[1]);
        }
        encoded
    }

    pub fn leaf_node(path: &[u8], value: &[u8]) -> Vec<u8> {
        let mut stream = RlpStream::new_list(2);
        stream.append(&encode_hex_prefix(path, true));
        stream.append(&value.to_vec());
        stream.out()
    }

    pub fn extension_node(path: &[u8], child_hash: H256) -> Vec<u8> {
        let mut stream = RlpStream::new_list(2);
        stream.append(&encode_hex_prefix(path, false));
        stream.append(&child_hash.as_bytes().to_vec());
        stream.out()
    }

    pub fn branch_node(children: &[(u8, H256)]) -> Vec<u8> {
        let mut stream = RlpStream::new_list(17);
        for nibble in 0..16 {
            match children.iter().find(|(at, _)| *at == nibble) {
                Some((_, hash)) => stream.append(&hash.as_bytes().to_vec()),
                None => stream.append_empty_data(),
            };
        }
        stream.append_empty_data();
        stream.out()
    }

    /// A two-account trie: a branch at the root with one leaf under
    /// nibble 1 and one under nibble 2. Returns the root and both keys.
    pub fn two_leaf_trie(store: &MemoryNodeStore) -> (H256, [(H256, Vec<u8>); 2]) {
        let key_1 = H256::from([0x11; 32]);
        let key_2 = H256::from([0x2f; 32]);
        let value_1 = b"first account rlp".to_vec();
        let value_2 = b"second account rlp".to_vec();

        let leaf_1 = leaf_node(&to_nibbles(key_1.as_bytes())[1..], &value_1);
        let leaf_2 = leaf_node(&to_nibbles(key_2.as_bytes())[1..], &value_2);
        let branch = branch_node(&[(1, keccak(&leaf_1)), (2, keccak(&leaf_2))]);

        let root = keccak(&branch);
        store.put_batch(&[
            (keccak(&leaf_1), leaf_1),
            (keccak(&leaf_2), leaf_2),
            (root, branch),
        ]);

        (root, [(key_1, value_1), (key_2, value_2)])
    }
}

#[cfg(test)]
mod tests {
    use super::test_helpers::*;
    use super::*;
    use crate::keccak;
    use crate::store::MemoryNodeStore;

    #[test]
    fn lookup_through_a_branch() {
        let store = MemoryNodeStore::new();
        let (root, accounts) = two_leaf_trie(&store);
        let reader = TrieReader::new(&store, root);

        for (key, value) in &accounts {
            assert_eq!(reader.get(key.as_bytes()).unwrap(), *value);
        }
    }

    #[test]
    fn absent_key_misses() {
        let store = MemoryNodeStore::new();
        let (root, _) = two_leaf_trie(&store);
        let reader = TrieReader::new(&store, root);

        // First nibble 3 has no child in the root branch.
        let absent = H256::from([0x33; 32]);
        assert_eq!(
            reader.get(absent.as_bytes()),
            Err(TrieError::KeyNotFound),
        );
    }

    #[test]
    fn missing_node_reports_its_hash() {
        let store = MemoryNodeStore::new();
        let value = b"account".to_vec();
        let key = H256::from([0x11; 32]);
        let leaf = leaf_node(&to_nibbles(key.as_bytes())[1..], &value);
        let leaf_hash = keccak(&leaf);
        let branch = branch_node(&[(1, leaf_hash)]);
        let root = keccak(&branch);
        // Only the branch is present; the leaf is still remote.
        store.put_batch(&[(root, branch)]);

        let reader = TrieReader::new(&store, root);
        assert_eq!(
            reader.get(key.as_bytes()),
            Err(TrieError::MissingNode(leaf_hash)),
        );

        // Once the leaf arrives the lookup completes.
        store.put_batch(&[(leaf_hash, leaf)]);
        assert_eq!(reader.get(key.as_bytes()).unwrap(), value);
    }

    #[test]
    fn extension_nodes_consume_their_prefix() {
        let store = MemoryNodeStore::new();
        let key = H256::from([0xab; 32]);
        let nibbles = to_nibbles(key.as_bytes());

        let leaf = leaf_node(&nibbles[3..], b"deep value");
        let branch = branch_node(&[(nibbles[2], keccak(&leaf))]);
        let extension = extension_node(&nibbles[..2], keccak(&branch));
        let root = keccak(&extension);

        store.put_batch(&[
            (keccak(&leaf), leaf),
            (keccak(&branch), branch),
            (root, extension),
        ]);

        let reader = TrieReader::new(&store, root);
        assert_eq!(reader.get(key.as_bytes()).unwrap(), b"deep value".to_vec());
    }

    #[test]
    fn empty_trie_has_no_keys() {
        let store = MemoryNodeStore::new();
        let reader = TrieReader::new(&store, EMPTY_TRIE_ROOT);
        assert_eq!(
            reader.get(H256::zero().as_bytes()),
            Err(TrieError::KeyNotFound),
        );
    }
}
