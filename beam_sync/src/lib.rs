//! On-demand download of state trie nodes during block import.
//!
//! While a block is being imported, any missing account, storage slot,
//! bytecode or intermediate trie node pauses the import until the node is
//! fetched from a peer. The [`BeamDownloader`] schedules those fetches
//! across the peer pool: urgent requests race the fastest peers, while
//! speculative look-ahead drains through the slower ones.

pub mod downloader;
pub mod error;
pub mod peer;
pub mod queue;
pub mod store;
pub mod trie;

pub use downloader::{BeamDownloader, DownloaderConfig, MAX_STATE_FETCH};
pub use error::{DownloadError, PeerError, TrieError};
pub use peer::{NodePeer, PeerId, QueenTracker, RttTracker};
pub use queue::TaskQueue;
pub use store::{MemoryNodeStore, NodeStore};
pub use trie::TrieReader;

use ethereum_types::H256;
use tiny_keccak::{Hasher, Keccak};

/// Keccak-256, the hash that keys every trie node.
pub fn keccak(bytes: &[u8]) -> H256 {
    let mut hasher = Keccak::v256();
    let mut output = [0; 32];
    hasher.update(bytes);
    hasher.finalize(&mut output);
    H256(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_of_empty_input() {
        // The well-known empty-string digest.
        assert_eq!(
            keccak(b""),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
                .parse()
                .unwrap(),
        );
    }
}
