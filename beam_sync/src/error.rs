use ethereum_types::H256;
use thiserror::Error;

/// Failures of a single peer request. Every variant except `Cancelled` is
/// treated as an empty response; none of them fails the pipeline.
#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum PeerError {
    #[error("peer connection lost")]
    ConnectionLost,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("request timed out")]
    Timeout,
    #[error("request cancelled")]
    Cancelled,
}

/// Read failures of the hexary trie. `MissingNode` is the expected
/// sentinel that drives a download; the others mean corrupt data.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum TrieError {
    #[error("missing trie node {0:?}")]
    MissingNode(H256),
    #[error("malformed trie node {0:?}")]
    MalformedNode(H256),
    #[error("key is not present in the trie")]
    KeyNotFound,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum DownloadError {
    #[error("{0:?} still incomplete after {1} probe rounds")]
    ProbeLimitReached(H256, usize),
    #[error("trie error: {0}")]
    Trie(#[from] TrieError),
}
