use std::cmp;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ethereum_types::{H160, H256};
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, warn};
use tokio::sync::Notify;
use tokio::time::{timeout, Instant};

use crate::error::{DownloadError, PeerError, TrieError};
use crate::keccak;
use crate::peer::{NodePeer, QueenTracker};
use crate::queue::{BatchId, TaskQueue};
use crate::store::NodeStore;
use crate::trie::TrieReader;

/// Cap on the number of node hashes in one peer request.
pub const MAX_STATE_FETCH: usize = 384;

const REQUEST_BUFFER_MULTIPLIER: usize = 8;
const TRIE_PROBE_LIMIT: usize = 64;

#[derive(Clone, Debug)]
pub struct DownloaderConfig {
    /// How long one peer gets to answer a node-data request.
    pub reply_timeout: Duration,
    /// How long a block import may stall on missing nodes before the
    /// waiter gives up and reports a short count.
    pub block_import_timeout: Duration,
    /// An urgent node slower than this widens the fan-out.
    pub max_acceptable_urgent_wait: Duration,
    /// Patience of the predictive pipeline for both batch and peasant
    /// availability.
    pub predictive_poll_timeout: Duration,
    /// Cadence at which the urgent fan-out decays back towards the queen
    /// alone.
    pub reduce_spread_interval: Duration,
    /// Cadence of the progress report log line.
    pub report_interval: Duration,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(10),
            block_import_timeout: Duration::from_secs(180),
            max_acceptable_urgent_wait: Duration::from_millis(500),
            predictive_poll_timeout: Duration::from_secs(5),
            reduce_spread_interval: Duration::from_secs(120),
            report_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Default)]
struct Stats {
    total_processed_nodes: AtomicU64,
    urgent_processed_nodes: AtomicU64,
    predictive_processed_nodes: AtomicU64,
    urgent_requests: AtomicU64,
    predictive_requests: AtomicU64,
    total_timeouts: AtomicU64,
}

/// Coordinates the retrieval of needed state data: accounts, storage,
/// bytecodes and other arbitrary intermediate nodes of the trie.
pub struct BeamDownloader<S, T: QueenTracker> {
    store: Arc<S>,
    queen_tracker: Arc<T>,
    config: DownloaderConfig,

    /// Nodes an in-flight block import is stalled on.
    urgent_tasks: TaskQueue,
    /// Nodes a near-future block might need.
    predictive_tasks: TaskQueue,

    /// Fired whenever new data lands in the store; waiters re-scan the
    /// store themselves.
    new_data: Notify,

    num_peers: AtomicUsize,
    /// Extra peers (besides the queen) asked for each urgent batch.
    spread_factor: AtomicUsize,
    /// Peers reserved for predictive work when it starts to fall behind.
    min_predictive_peers: AtomicUsize,

    stats: Stats,
}

impl<S, T> BeamDownloader<S, T>
where
    S: NodeStore,
    T: QueenTracker,
{
    pub fn new(store: Arc<S>, queen_tracker: Arc<T>) -> Self {
        Self::with_config(store, queen_tracker, DownloaderConfig::default())
    }

    pub fn with_config(store: Arc<S>, queen_tracker: Arc<T>, config: DownloaderConfig) -> Self {
        let buffer_size = MAX_STATE_FETCH * REQUEST_BUFFER_MULTIPLIER;
        Self {
            store,
            queen_tracker,
            config,
            urgent_tasks: TaskQueue::new(buffer_size),
            predictive_tasks: TaskQueue::new(buffer_size),
            new_data: Notify::new(),
            num_peers: AtomicUsize::new(0),
            spread_factor: AtomicUsize::new(0),
            min_predictive_peers: AtomicUsize::new(0),
            stats: Stats::default(),
        }
    }

    /// Run the urgent and predictive pipelines plus the maintenance
    /// tasks, indefinitely. Dropping the returned future cancels all of
    /// them; responses of abandoned peer requests are discarded.
    pub async fn run(self: Arc<Self>) {
        info!("Starting beam state sync");
        let urgent = self.match_urgent_node_requests_to_peers();
        let predictive = self.match_predictive_node_requests_to_peers();
        let reduce = self.reduce_spread_factor();
        let report = self.periodically_report_progress();
        futures::join!(urgent, predictive, reduce, report);
    }

    pub fn register_peer(&self, peer: T::Peer) {
        self.num_peers.fetch_add(1, Ordering::SeqCst);
        self.queen_tracker.insert_peer(peer);
    }

    pub fn deregister_peer(&self, _peer: &T::Peer) {
        self.num_peers.fetch_sub(1, Ordering::SeqCst);
    }

    /// Wait until the preimages of `node_hashes` are present in the
    /// store, requesting any that are missing.
    ///
    /// Returns how many of the missing nodes became available before the
    /// block-import timeout; a short count is the only timeout signal.
    pub async fn ensure_nodes_present(
        &self,
        node_hashes: impl IntoIterator<Item = H256>,
        urgent: bool,
    ) -> usize {
        let started = Instant::now();
        let queue = if urgent {
            &self.urgent_tasks
        } else {
            &self.predictive_tasks
        };

        let missing = node_hashes
            .into_iter()
            .filter(|hash| !self.store.contains(hash))
            .collect::<HashSet<_>>();
        if missing.is_empty() {
            return 0;
        }

        let unrequested = missing
            .iter()
            .filter(|hash| !queue.contains(hash))
            .copied()
            .collect::<Vec<_>>();
        if !unrequested.is_empty() {
            queue.add(unrequested).await;
        }

        let single_node = missing.len() == 1;
        let found = self.node_hashes_present(missing).await;

        // A slow single urgent node means the queen alone is not enough;
        // widen the fan-out one knight at a time.
        if urgent && single_node && started.elapsed() > self.config.max_acceptable_urgent_wait {
            self.widen_spread_factor();
        }

        found
    }

    /// Wait for the account rlp under `account_hash` to become provable
    /// from `root_hash`, downloading any trie nodes the proof needs.
    ///
    /// Returns the account rlp and how many node downloads were required.
    pub async fn download_account(
        &self,
        account_hash: H256,
        root_hash: H256,
        urgent: bool,
    ) -> Result<(Vec<u8>, usize), DownloadError> {
        for num_downloads_required in 0..TRIE_PROBE_LIMIT {
            let probe = TrieReader::new(&*self.store, root_hash).get(account_hash.as_bytes());
            match probe {
                Ok(account_rlp) => return Ok((account_rlp, num_downloads_required)),
                Err(TrieError::MissingNode(missing)) => {
                    self.ensure_nodes_present(Some(missing), urgent).await;
                }
                Err(error) => return Err(error.into()),
            }
        }
        Err(DownloadError::ProbeLimitReached(account_hash, TRIE_PROBE_LIMIT))
    }

    /// Like [`Self::download_account`], but amortises the probing across
    /// many addresses, requesting each round's missing nodes at once.
    ///
    /// Returns the total number of node downloads that were required.
    pub async fn download_accounts(
        &self,
        account_addresses: &[H160],
        root_hash: H256,
        urgent: bool,
    ) -> Result<usize, DownloadError> {
        if account_addresses.is_empty() {
            return Ok(0);
        }

        let total = account_addresses.len();
        let mut missing_account_hashes = account_addresses
            .iter()
            .map(|address| keccak(address.as_bytes()))
            .collect::<HashSet<_>>();
        let mut nodes_downloaded = 0;
        let mut last_log = Instant::now();

        for _ in 0..TRIE_PROBE_LIMIT {
            let mut need_nodes = HashSet::new();
            let mut completed = Vec::new();
            {
                let reader = TrieReader::new(&*self.store, root_hash);
                for account_hash in &missing_account_hashes {
                    match reader.get(account_hash.as_bytes()) {
                        Ok(_) => completed.push(*account_hash),
                        Err(TrieError::MissingNode(missing)) => {
                            need_nodes.insert(missing);
                        }
                        Err(error) => return Err(error.into()),
                    }
                }
            }
            for account_hash in completed {
                missing_account_hashes.remove(&account_hash);
            }

            if urgent && last_log.elapsed() > self.config.report_interval {
                info!(
                    "Beam account download: {}/{} ({:.0}%)",
                    total - missing_account_hashes.len(),
                    total,
                    100.0 * (total - missing_account_hashes.len()) as f64 / total as f64,
                );
                last_log = Instant::now();
            }

            if missing_account_hashes.is_empty() {
                return Ok(nodes_downloaded);
            }

            nodes_downloaded += need_nodes.len();
            self.ensure_nodes_present(need_nodes, urgent).await;
        }

        Err(DownloadError::ProbeLimitReached(root_hash, TRIE_PROBE_LIMIT))
    }

    /// Wait for `storage_key` to become provable within the storage trie
    /// at `storage_root_hash`, downloading trie nodes as needed.
    ///
    /// Returns how many node downloads were required.
    pub async fn download_storage(
        &self,
        storage_key: H256,
        storage_root_hash: H256,
        account: H160,
        urgent: bool,
    ) -> Result<usize, DownloadError> {
        for num_downloads_required in 0..TRIE_PROBE_LIMIT {
            let probe =
                TrieReader::new(&*self.store, storage_root_hash).get(storage_key.as_bytes());
            match probe {
                Ok(_) => return Ok(num_downloads_required),
                Err(TrieError::MissingNode(missing)) => {
                    self.ensure_nodes_present(Some(missing), urgent).await;
                }
                Err(error) => {
                    warn!(
                        "Storage download for account {:?} at root {:?} hit {}",
                        account, storage_root_hash, error,
                    );
                    return Err(error.into());
                }
            }
        }
        Err(DownloadError::ProbeLimitReached(storage_key, TRIE_PROBE_LIMIT))
    }

    /// Block until every hash in `remaining` is present, the timeout
    /// expires, or the wake signal stops firing.
    async fn node_hashes_present(&self, mut remaining: HashSet<H256>) -> usize {
        let requested = remaining.len();
        let deadline = Instant::now() + self.config.block_import_timeout;

        loop {
            let notified = self.new_data.notified();
            remaining.retain(|hash| !self.store.contains(hash));
            if remaining.is_empty() {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                log::error!(
                    "could not collect {} of {} requested nodes within {:?}",
                    remaining.len(),
                    requested,
                    self.config.block_import_timeout,
                );
                break;
            }
        }

        requested - remaining.len()
    }

    fn max_spread_factor(&self) -> usize {
        // Never negative, even when predictive reservations exceed the
        // connected peer count.
        self.num_peers
            .load(Ordering::SeqCst)
            .saturating_sub(1 + self.min_predictive_peers.load(Ordering::SeqCst))
    }

    fn widen_spread_factor(&self) {
        let current = self.spread_factor.load(Ordering::SeqCst);
        let widened = cmp::min(self.max_spread_factor(), current + 1);
        if widened != current {
            debug!(
                "spread-beam-update: urgent node was slow, update factor {} to {}",
                current, widened,
            );
            self.queen_tracker.set_desired_knight_count(widened);
            self.spread_factor.store(widened, Ordering::SeqCst);
        }
    }

    /// The urgent pipeline: a block import is paused until these nodes
    /// arrive, so every batch races the queen against the current
    /// knights and the first non-empty response wins.
    async fn match_urgent_node_requests_to_peers(&self) {
        loop {
            let (batch_id, urgent_hashes) = self.urgent_tasks.get(MAX_STATE_FETCH).await;
            let queen = self.queen_tracker.get_queen_peer().await;
            self.stats.urgent_requests.fetch_add(1, Ordering::Relaxed);
            self.find_urgent_nodes(queen, urgent_hashes, batch_id).await;
        }
    }

    async fn find_urgent_nodes(&self, queen: T::Peer, urgent_hashes: Vec<H256>, batch_id: BatchId) {
        let knights = self.queen_tracker.pop_knights();
        let started = Instant::now();

        let mut requests = FuturesUnordered::new();
        for peer in std::iter::once(queen.clone()).chain(knights.iter().cloned()) {
            let hashes = urgent_hashes.clone();
            requests.push(async move {
                let outcome = self.store_nodes(&peer, hashes, true).await;
                (outcome, peer)
            });
        }

        let mut returned: Vec<(H256, Vec<u8>)> = Vec::new();
        let mut new_count = 0;
        let mut responder = None;
        while let Some(((nodes, new_nodes), peer)) = requests.next().await {
            if !nodes.is_empty() {
                returned = nodes;
                new_count = new_nodes;
                responder = Some(peer.id());
                break;
            } else if peer.id() == queen.id() {
                debug!("queen {} returned 0 urgent nodes", peer.id());
            }
        }
        // The first non-empty response cancels every other in-flight
        // request.
        drop(requests);

        let rtt_label = if responder == Some(queen.id()) {
            "beam-queen-urgent-rtt"
        } else {
            "spread-beam-urgent-rtt"
        };
        debug!(
            "{}: got {}/{} +{} nodes in {:?}",
            rtt_label,
            returned.len(),
            urgent_hashes.len(),
            new_count,
            started.elapsed(),
        );

        self.stats
            .urgent_processed_nodes
            .fetch_add(new_count as u64, Ordering::Relaxed);

        let completed = returned.iter().map(|(hash, _)| *hash).collect::<Vec<_>>();
        self.urgent_tasks.complete(batch_id, &completed);

        for knight in knights {
            self.queen_tracker.insert_peer(knight);
        }
    }

    /// The predictive pipeline: speculative look-ahead through the
    /// fastest available peasant, without ever waiting on the response.
    async fn match_predictive_node_requests_to_peers(self: &Arc<Self>) {
        loop {
            let poll_timeout = self.config.predictive_poll_timeout;
            let batch = timeout(poll_timeout, self.predictive_tasks.get(MAX_STATE_FETCH)).await;
            let (batch_id, hashes) = match batch {
                Ok(batch) => batch,
                Err(_) => {
                    // Prediction is keeping up; release a reserved peer.
                    let reserved = self.min_predictive_peers.load(Ordering::SeqCst);
                    if reserved > 0 {
                        self.min_predictive_peers
                            .store(reserved - 1, Ordering::SeqCst);
                        debug!("Decremented predictive peers to {}", reserved - 1);
                    }
                    continue;
                }
            };

            let peasant = timeout(poll_timeout, self.queen_tracker.pop_fastest_peasant()).await;
            let peer = match peasant {
                Ok(peer) => peer,
                Err(_) => {
                    // Starved of peers; reserve more, but never more than
                    // half the pool.
                    let reserved = self.min_predictive_peers.load(Ordering::SeqCst);
                    let grown = cmp::min(
                        reserved + 1,
                        self.num_peers.load(Ordering::SeqCst) / 2,
                    );
                    if grown != reserved {
                        debug!(
                            "Updating predictive peer count from {} to {}",
                            reserved, grown,
                        );
                        self.min_predictive_peers.store(grown, Ordering::SeqCst);
                    }
                    // Release the batch so it is retried.
                    self.predictive_tasks.complete(batch_id, &[]);
                    continue;
                }
            };

            self.stats
                .predictive_requests
                .fetch_add(1, Ordering::Relaxed);

            let downloader = Arc::clone(self);
            tokio::spawn(async move {
                downloader
                    .get_predictive_nodes_from_peer(peer, hashes, batch_id)
                    .await;
            });
        }
    }

    async fn get_predictive_nodes_from_peer(
        &self,
        peer: T::Peer,
        node_hashes: Vec<H256>,
        batch_id: BatchId,
    ) {
        let (nodes, new_nodes) = self.store_nodes(&peer, node_hashes, false).await;

        self.stats
            .predictive_processed_nodes
            .fetch_add(new_nodes as u64, Ordering::Relaxed);

        let completed = nodes.iter().map(|(hash, _)| *hash).collect::<Vec<_>>();
        self.predictive_tasks.complete(batch_id, &completed);

        self.queen_tracker.insert_peer(peer);
    }

    /// Request nodes from one peer and write the previously-unknown
    /// subset in one atomic batch.
    ///
    /// Waiters are woken whenever new data was written, and always for
    /// urgent requests, in case the data arrived through another path.
    async fn store_nodes(
        &self,
        peer: &T::Peer,
        node_hashes: Vec<H256>,
        urgent: bool,
    ) -> (Vec<(H256, Vec<u8>)>, usize) {
        let nodes = self.request_nodes(peer, node_hashes).await;

        let new_nodes = nodes
            .iter()
            .filter(|(hash, _)| !self.store.contains(hash))
            .cloned()
            .collect::<Vec<_>>();
        if !new_nodes.is_empty() {
            self.store.put_batch(&new_nodes);
        }
        self.stats
            .total_processed_nodes
            .fetch_add(new_nodes.len() as u64, Ordering::Relaxed);

        if urgent || !new_nodes.is_empty() {
            self.new_data.notify_waiters();
        }

        (nodes, new_nodes.len())
    }

    /// One request against one peer. Failures are logged, penalised and
    /// flattened into an empty response; retrying is the queue's job.
    async fn request_nodes(&self, peer: &T::Peer, node_hashes: Vec<H256>) -> Vec<(H256, Vec<u8>)> {
        let requested = node_hashes.iter().copied().collect::<HashSet<_>>();
        let deduplicated = requested.iter().copied().collect::<Vec<_>>();
        let started = Instant::now();

        match peer
            .get_node_data(deduplicated, self.config.reply_timeout)
            .await
        {
            Ok(bundles) => {
                self.queen_tracker.record_rtt(peer, started.elapsed());
                // Drop any bundle whose bytes do not hash to the key we
                // asked for.
                let verified = bundles
                    .into_iter()
                    .filter(|(hash, bytes)| requested.contains(hash) && keccak(bytes) == *hash)
                    .collect::<Vec<_>>();
                if verified.is_empty() {
                    debug!("peer {} returned 0 state trie nodes, penalize", peer.id());
                    self.queen_tracker.penalize_queen(peer);
                }
                verified
            }
            Err(PeerError::ConnectionLost) => {
                debug!("peer {} went away, cancelling the nodes request", peer.id());
                self.queen_tracker.penalize_queen(peer);
                vec![]
            }
            Err(PeerError::Timeout) => {
                debug!("timed out requesting nodes from peer {}", peer.id());
                self.queen_tracker.penalize_queen(peer);
                self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
                vec![]
            }
            Err(PeerError::Cancelled) => {
                debug!("pending nodes call to peer {} cancelled", peer.id());
                vec![]
            }
            Err(PeerError::Protocol(message)) => {
                warn!(
                    "unexpected p2p error while downloading nodes from peer {}: {}",
                    peer.id(),
                    message,
                );
                self.queen_tracker.penalize_queen(peer);
                vec![]
            }
        }
    }

    /// Drop the fan-out back towards the queen alone while the sync is
    /// healthy.
    async fn reduce_spread_factor(&self) {
        loop {
            tokio::time::sleep(self.config.reduce_spread_interval).await;
            let current = self.spread_factor.load(Ordering::SeqCst);
            if current > 0 {
                debug!(
                    "spread-beam-update: reduce spread beam factor {} to {}",
                    current,
                    current - 1,
                );
                self.spread_factor.store(current - 1, Ordering::SeqCst);
                self.queen_tracker.set_desired_knight_count(current - 1);
            }
        }
    }

    #[cfg(test)]
    fn current_spread_factor(&self) -> usize {
        self.spread_factor.load(Ordering::SeqCst)
    }

    async fn periodically_report_progress(&self) {
        loop {
            tokio::time::sleep(self.config.report_interval).await;
            debug!(
                "beam-sync: all={} urgent={} pred={} urg_reqs={} pred_reqs={} timeouts={} \
                 u_pend={} u_prog={} p_pend={} p_prog={} spread={} reserve_pred={}",
                self.stats.total_processed_nodes.load(Ordering::Relaxed),
                self.stats.urgent_processed_nodes.load(Ordering::Relaxed),
                self.stats.predictive_processed_nodes.load(Ordering::Relaxed),
                self.stats.urgent_requests.load(Ordering::Relaxed),
                self.stats.predictive_requests.load(Ordering::Relaxed),
                self.stats.total_timeouts.load(Ordering::Relaxed),
                self.urgent_tasks.num_pending(),
                self.urgent_tasks.num_in_progress(),
                self.predictive_tasks.num_pending(),
                self.predictive_tasks.num_in_progress(),
                self.spread_factor.load(Ordering::SeqCst),
                self.min_predictive_peers.load(Ordering::SeqCst),
            );
        }
    }
}
