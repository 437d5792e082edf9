//! Adaptive poll timeouts.
//!
//! One logical timer per chain: observed response latencies feed an EWMA and
//! the current timeout is a multiple of that average, clamped to a fixed
//! range. A priority queue of `(deadline, request_id)` tracks the earliest
//! outstanding deadline for expiry scheduling and health reporting.

use crate::types::RequestId;

use priority_queue::PriorityQueue;

use std::cmp::Reverse;
use std::time::{Duration, Instant};

/// Lower clamp for the adaptive timeout.
pub const MIN_TIMEOUT_MS: u64 = 500;
/// Upper clamp for the adaptive timeout.
pub const MAX_TIMEOUT_MS: u64 = 10_000;
/// Initial latency estimate before any observation.
const INITIAL_LATENCY_MS: u64 = 2_000;
/// Weight of a new observation in the EWMA.
const OBSERVATION_WEIGHT: f64 = 0.25;
/// The timeout is this multiple of the average latency.
const LATENCY_MULTIPLIER: f64 = 2.0;

pub struct AdaptiveTimeoutManager {
    average_latency_ms: f64,
    deadlines: PriorityQueue<RequestId, Reverse<Instant>>,
}

impl AdaptiveTimeoutManager {
    pub fn new() -> Self {
        AdaptiveTimeoutManager {
            average_latency_ms: INITIAL_LATENCY_MS as f64,
            deadlines: PriorityQueue::new(),
        }
    }

    /// The timeout to apply to the next request.
    pub fn current(&self) -> Duration {
        let timeout = (self.average_latency_ms * LATENCY_MULTIPLIER) as u64;
        Duration::from_millis(timeout.max(MIN_TIMEOUT_MS).min(MAX_TIMEOUT_MS))
    }

    /// Registers an outstanding request, returning the timeout to schedule.
    pub fn register(&mut self, request_id: RequestId) -> Duration {
        let timeout = self.current();
        let _ = self.deadlines.push(request_id, Reverse(Instant::now() + timeout));
        timeout
    }

    /// Records a response for a registered request, feeding its latency into
    /// the average.
    pub fn observe_response(&mut self, request_id: RequestId) {
        if let Some((_, Reverse(deadline))) = self.deadlines.remove(&request_id) {
            let timeout = self.current();
            let latency = timeout
                .checked_sub(deadline.saturating_duration_since(Instant::now()))
                .unwrap_or(timeout);
            self.observe(latency);
        }
    }

    /// Records an expiry: the request took at least the full timeout.
    pub fn observe_timeout(&mut self, request_id: RequestId) {
        let _ = self.deadlines.remove(&request_id);
        let timeout = self.current();
        self.observe(timeout);
    }

    /// The earliest outstanding deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.peek().map(|(_, deadline)| deadline.0)
    }

    pub fn outstanding(&self) -> usize {
        self.deadlines.len()
    }

    fn observe(&mut self, latency: Duration) {
        let observed = latency.as_millis() as f64;
        self.average_latency_ms = (1.0 - OBSERVATION_WEIGHT) * self.average_latency_ms
            + OBSERVATION_WEIGHT * observed;
    }
}
