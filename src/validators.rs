//! The sampleable validator set.

use crate::ids::Id;
use crate::util;

use rand::seq::SliceRandom;

use std::collections::{HashMap, HashSet};

/// The validator set a chain polls against.
///
/// Sampling is uniform without replacement over the currently connected
/// validators. Connection bookkeeping feeds the `percent_connected` health
/// signal.
#[derive(Debug, Clone)]
pub struct Validators {
    validators: HashMap<Id, u64>,
    connected: HashSet<Id>,
}

impl std::ops::Deref for Validators {
    type Target = HashMap<Id, u64>;

    fn deref(&self) -> &'_ Self::Target {
        &self.validators
    }
}

impl Validators {
    pub fn new() -> Self {
        Validators { validators: HashMap::default(), connected: HashSet::new() }
    }

    pub fn insert(&mut self, id: Id, weight: u64) {
        let _ = self.validators.insert(id, weight);
    }

    pub fn remove(&mut self, id: &Id) {
        let _ = self.validators.remove(id);
        let _ = self.connected.remove(id);
    }

    pub fn connect(&mut self, id: Id) {
        if self.validators.contains_key(&id) {
            let _ = self.connected.insert(id);
        }
    }

    pub fn disconnect(&mut self, id: &Id) {
        let _ = self.connected.remove(id);
    }

    pub fn is_connected(&self, id: &Id) -> bool {
        self.connected.contains(id)
    }

    /// The connected fraction of the validator set.
    pub fn percent_connected(&self) -> f64 {
        util::percent_of(self.connected.len(), self.validators.len())
    }

    /// Samples `k` connected validators uniformly without replacement.
    /// Returns `None` when fewer than `k` validators are connected.
    pub fn sample(&self, k: usize) -> Option<Vec<Id>> {
        if self.connected.len() < k {
            return None;
        }
        let mut rng = rand::thread_rng();
        let mut pool: Vec<Id> = self.connected.iter().cloned().collect();
        pool.shuffle(&mut rng);
        pool.truncate(k);
        Some(pool)
    }

    /// All validator ids, connected or not.
    pub fn list(&self) -> Vec<Id> {
        self.validators.keys().cloned().collect()
    }
}
