//! Peer health and resource tracking.

use crate::ids::Id;

use rand::seq::SliceRandom;
use tracing::debug;

use std::collections::HashMap;
use std::time::Instant;

/// Weight of a new observation in a peer's health EWMA.
const HEALTH_WEIGHT: f64 = 0.25;
/// Health score of a peer that has never been observed.
const INITIAL_HEALTH: f64 = 0.5;
/// Health penalty factor for a peer with an inconsistent frontier.
const INCONSISTENCY_FACTOR: f64 = 0.5;
/// Peers below this health are only used when no better peer remains.
const LOW_HEALTH: f64 = 0.1;

/// Tracks per-peer fetch health during bootstrap.
///
/// Peers that time out or answer with malformed data lose health and rotate
/// to the back of the selection; a peer whose frontier disagrees with the
/// plurality is de-weighted but never banned.
#[derive(Debug, Clone)]
pub struct PeerTracker {
    peers: HashMap<Id, f64>,
}

impl PeerTracker {
    pub fn new(peers: Vec<Id>) -> Self {
        let mut map = HashMap::default();
        for peer in peers {
            let _ = map.insert(peer, INITIAL_HEALTH);
        }
        PeerTracker { peers: map }
    }

    pub fn insert(&mut self, peer: Id) {
        let _ = self.peers.entry(peer).or_insert(INITIAL_HEALTH);
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Records a successful response.
    pub fn record_success(&mut self, peer: &Id) {
        self.observe(peer, 1.0);
    }

    /// Records a timeout or malformed response.
    pub fn record_failure(&mut self, peer: &Id) {
        self.observe(peer, 0.0);
    }

    /// De-weights a peer whose reported state disagrees with the plurality.
    pub fn record_inconsistency(&mut self, peer: &Id) {
        if let Some(health) = self.peers.get_mut(peer) {
            *health *= INCONSISTENCY_FACTOR;
            debug!("peer {} de-weighted to {:.3} for inconsistency", peer, *health);
        }
    }

    pub fn health(&self, peer: &Id) -> f64 {
        self.peers.get(peer).cloned().unwrap_or(INITIAL_HEALTH)
    }

    /// Selects the next peer to fetch from: a uniformly random peer among the
    /// healthy ones, falling back to the least unhealthy when all are poor.
    /// `exclude` skips the peer that just failed.
    pub fn select(&self, exclude: Option<&Id>) -> Option<Id> {
        let mut rng = rand::thread_rng();
        let candidates: Vec<Id> = self
            .peers
            .iter()
            .filter(|(peer, health)| Some(*peer) != exclude && **health >= LOW_HEALTH)
            .map(|(peer, _)| peer.clone())
            .collect();
        if let Some(peer) = candidates.choose(&mut rng) {
            return Some(peer.clone());
        }
        // All remaining peers are unhealthy: take the best of them anyway.
        self.peers
            .iter()
            .filter(|(peer, _)| Some(*peer) != exclude)
            .max_by(|(_, h1), (_, h2)| h1.partial_cmp(h2).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(peer, _)| peer.clone())
            .or_else(|| self.peers.keys().next().cloned())
    }

    fn observe(&mut self, peer: &Id, outcome: f64) {
        let health = self.peers.entry(peer.clone()).or_insert(INITIAL_HEALTH);
        *health = (1.0 - HEALTH_WEIGHT) * *health + HEALTH_WEIGHT * outcome;
    }
}

/// Maximum message debt a peer may accumulate before its messages drop.
const MAX_DEBT: f64 = 64.0;
/// Debt units forgiven per second.
const REFILL_PER_SECOND: f64 = 16.0;

/// Per-peer admission control.
///
/// Every inbound message costs one debt unit; debt drains continuously. A
/// peer over its quota has its messages dropped until the debt drains, which
/// bounds the CPU a single peer can demand.
#[derive(Debug, Clone)]
pub struct ResourceTracker {
    debts: HashMap<Id, (f64, Instant)>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        ResourceTracker { debts: HashMap::default() }
    }

    /// Charges one message to the peer; false means the message must drop.
    pub fn admit(&mut self, peer: &Id) -> bool {
        let now = Instant::now();
        let entry = self.debts.entry(peer.clone()).or_insert((0.0, now));
        let (debt, last) = *entry;
        let drained = now.duration_since(last).as_secs_f64() * REFILL_PER_SECOND;
        let debt = (debt - drained).max(0.0);
        if debt >= MAX_DEBT {
            *entry = (debt, now);
            return false;
        }
        *entry = (debt + 1.0, now);
        true
    }

    pub fn debt(&self, peer: &Id) -> f64 {
        self.debts.get(peer).map(|(debt, _)| *debt).unwrap_or(0.0)
    }
}
