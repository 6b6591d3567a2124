use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use ethereum_types::H256;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::PeerError;

pub type PeerId = u64;

/// The one call the downloader makes against a remote peer.
///
/// Implementations verify nothing; the downloader checks every returned
/// bundle against its keccak hash and silently drops mismatches.
#[async_trait]
pub trait NodePeer: Clone + Send + Sync + 'static {
    /// Stable identifier for logs and per-peer accounting.
    fn id(&self) -> PeerId;

    async fn get_node_data(
        &self,
        hashes: Vec<H256>,
        timeout: Duration,
    ) -> Result<Vec<(H256, Vec<u8>)>, PeerError>;
}

/// Ranks the peer pool for node-data retrieval.
///
/// The queen is the estimated fastest peer and serves every urgent
/// request; knights are the next fastest, fanned out alongside the queen
/// when urgent latency degrades; peasants are everyone else and serve the
/// predictive pipeline.
#[async_trait]
pub trait QueenTracker: Send + Sync + 'static {
    type Peer: NodePeer;

    /// The current queen. Waits until at least one peer is known.
    async fn get_queen_peer(&self) -> Self::Peer;

    /// Remove and return up to the desired number of knights.
    fn pop_knights(&self) -> Vec<Self::Peer>;

    /// Remove and return the fastest non-queen peer. Waits until one is
    /// available.
    async fn pop_fastest_peasant(&self) -> Self::Peer;

    /// Return a previously popped peer to the rotation, or add a new one.
    fn insert_peer(&self, peer: Self::Peer);

    /// Record a failed or timed-out request so the peer is eventually
    /// demoted from queen duty.
    fn penalize_queen(&self, peer: &Self::Peer);

    /// Tune how many peers `pop_knights` may return.
    fn set_desired_knight_count(&self, count: usize);

    /// Feed a latency sample into the ranking.
    fn record_rtt(&self, _peer: &Self::Peer, _elapsed: Duration) {}
}

const INITIAL_RTT_MILLIS: f64 = 400.0;
const PENALTY_RTT_MILLIS: f64 = 2_000.0;
// Weight of a fresh sample in the moving estimate.
const EWMA_SAMPLE_WEIGHT: f64 = 0.25;

struct RankedPool<P> {
    /// Peers currently available for dispatch.
    available: HashMap<PeerId, P>,
    /// Smoothed round-trip estimates, kept across pops and reinserts.
    estimates: HashMap<PeerId, f64>,
}

/// A [`QueenTracker`] that ranks peers by an exponentially-weighted
/// round-trip-time estimate.
pub struct RttTracker<P: NodePeer> {
    pool: Mutex<RankedPool<P>>,
    peer_available: Notify,
    desired_knights: Mutex<usize>,
}

impl<P: NodePeer> RttTracker<P> {
    pub fn new() -> Self {
        Self {
            pool: Mutex::new(RankedPool {
                available: HashMap::new(),
                estimates: HashMap::new(),
            }),
            peer_available: Notify::new(),
            desired_knights: Mutex::new(0),
        }
    }

    /// Drop a disconnected peer entirely, estimate included.
    pub fn forget_peer(&self, peer_id: PeerId) {
        let mut pool = self.pool.lock();
        pool.available.remove(&peer_id);
        pool.estimates.remove(&peer_id);
    }

    fn queen_id(pool: &RankedPool<P>) -> Option<PeerId> {
        pool.available
            .keys()
            .min_by(|a, b| {
                let left = pool.estimates.get(a).copied().unwrap_or(INITIAL_RTT_MILLIS);
                let right = pool.estimates.get(b).copied().unwrap_or(INITIAL_RTT_MILLIS);
                left.partial_cmp(&right).unwrap_or(std::cmp::Ordering::Equal)
            })
            .copied()
    }

    /// Available non-queen peers, fastest first.
    fn ranked_subjects(pool: &RankedPool<P>) -> Vec<PeerId> {
        let queen = Self::queen_id(pool);
        let mut subjects = pool
            .available
            .keys()
            .filter(|id| Some(**id) != queen)
            .copied()
            .collect::<Vec<_>>();
        subjects.sort_by(|a, b| {
            let left = pool.estimates.get(a).copied().unwrap_or(INITIAL_RTT_MILLIS);
            let right = pool.estimates.get(b).copied().unwrap_or(INITIAL_RTT_MILLIS);
            left.partial_cmp(&right).unwrap_or(std::cmp::Ordering::Equal)
        });
        subjects
    }
}

impl<P: NodePeer> Default for RttTracker<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<P: NodePeer> QueenTracker for RttTracker<P> {
    type Peer = P;

    async fn get_queen_peer(&self) -> P {
        loop {
            let notified = self.peer_available.notified();
            {
                let pool = self.pool.lock();
                if let Some(queen_id) = Self::queen_id(&pool) {
                    return pool.available[&queen_id].clone();
                }
            }
            notified.await;
        }
    }

    fn pop_knights(&self) -> Vec<P> {
        let desired = *self.desired_knights.lock();
        let mut pool = self.pool.lock();
        let chosen = Self::ranked_subjects(&pool)
            .into_iter()
            .take(desired)
            .collect::<Vec<_>>();
        chosen
            .into_iter()
            .filter_map(|id| pool.available.remove(&id))
            .collect()
    }

    async fn pop_fastest_peasant(&self) -> P {
        loop {
            let notified = self.peer_available.notified();
            {
                let mut pool = self.pool.lock();
                if let Some(peasant_id) = Self::ranked_subjects(&pool).first().copied() {
                    if let Some(peer) = pool.available.remove(&peasant_id) {
                        return peer;
                    }
                }
            }
            notified.await;
        }
    }

    fn insert_peer(&self, peer: P) {
        let mut pool = self.pool.lock();
        pool.estimates.entry(peer.id()).or_insert(INITIAL_RTT_MILLIS);
        pool.available.insert(peer.id(), peer);
        drop(pool);
        self.peer_available.notify_waiters();
    }

    fn penalize_queen(&self, peer: &P) {
        let mut pool = self.pool.lock();
        let estimate = pool
            .estimates
            .entry(peer.id())
            .or_insert(INITIAL_RTT_MILLIS);
        *estimate = *estimate * 2.0 + PENALTY_RTT_MILLIS;
    }

    fn set_desired_knight_count(&self, count: usize) {
        *self.desired_knights.lock() = count;
    }

    fn record_rtt(&self, peer: &P, elapsed: Duration) {
        let sample = elapsed.as_secs_f64() * 1_000.0;
        let mut pool = self.pool.lock();
        let estimate = pool
            .estimates
            .entry(peer.id())
            .or_insert(INITIAL_RTT_MILLIS);
        *estimate = *estimate * (1.0 - EWMA_SAMPLE_WEIGHT) + sample * EWMA_SAMPLE_WEIGHT;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct StubPeer(PeerId);

    #[async_trait]
    impl NodePeer for StubPeer {
        fn id(&self) -> PeerId {
            self.0
        }

        async fn get_node_data(
            &self,
            _hashes: Vec<H256>,
            _timeout: Duration,
        ) -> Result<Vec<(H256, Vec<u8>)>, PeerError> {
            Ok(vec![])
        }
    }

    fn tracker_with_latencies(latencies: &[(PeerId, u64)]) -> RttTracker<StubPeer> {
        let tracker = RttTracker::new();
        for (id, millis) in latencies {
            let peer = StubPeer(*id);
            tracker.insert_peer(peer.clone());
            // Several samples pull the estimate close to the target.
            for _ in 0..16 {
                tracker.record_rtt(&peer, Duration::from_millis(*millis));
            }
        }
        tracker
    }

    #[tokio::test]
    async fn queen_is_the_fastest_peer() {
        let tracker = tracker_with_latencies(&[(1, 500), (2, 20), (3, 100)]);
        assert_eq!(tracker.get_queen_peer().await.id(), 2);
    }

    #[tokio::test]
    async fn knights_are_the_next_fastest_and_leave_the_rotation() {
        let tracker = tracker_with_latencies(&[(1, 500), (2, 20), (3, 100), (4, 200)]);
        tracker.set_desired_knight_count(2);

        let knights = tracker.pop_knights();
        let knight_ids = knights.iter().map(NodePeer::id).collect::<Vec<_>>();
        assert_eq!(knight_ids, vec![3, 4]);

        // Popped knights are gone until reinserted; only the slowest
        // non-queen peer remains.
        let second = tracker.pop_knights();
        assert_eq!(second.iter().map(NodePeer::id).collect::<Vec<_>>(), vec![1]);

        tracker.insert_peer(StubPeer(1));
        for knight in knights {
            tracker.insert_peer(knight);
        }
        assert_eq!(tracker.pop_knights().len(), 2);
    }

    #[tokio::test]
    async fn peasants_exclude_the_queen() {
        let tracker = tracker_with_latencies(&[(1, 50), (2, 20)]);
        let peasant = tracker.pop_fastest_peasant().await;
        assert_eq!(peasant.id(), 1);
        // The queen herself is still available for urgent work.
        assert_eq!(tracker.get_queen_peer().await.id(), 2);
    }

    #[tokio::test]
    async fn penalties_demote_the_queen() {
        let tracker = tracker_with_latencies(&[(1, 50), (2, 20)]);
        let queen = tracker.get_queen_peer().await;
        assert_eq!(queen.id(), 2);

        tracker.penalize_queen(&queen);
        assert_eq!(tracker.get_queen_peer().await.id(), 1);
    }

    #[tokio::test]
    async fn waiting_for_a_peer_resolves_on_insert() {
        let tracker = std::sync::Arc::new(RttTracker::<StubPeer>::new());
        let waiter = {
            let tracker = std::sync::Arc::clone(&tracker);
            tokio::spawn(async move { tracker.get_queen_peer().await.id() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        tracker.insert_peer(StubPeer(9));

        assert_eq!(waiter.await.unwrap(), 9);
    }
}
