//! A counting multiset used for poll tallies.

use std::collections::HashMap;

/// A multiset of elements with insertion counting.
///
/// Polls tally votes in a `Bag<BlockHash>` and track the sampled validator
/// slots in a `Bag<Id>`. The bag keeps the total number of contained elements
/// (with multiplicity) so threshold checks are O(1).
#[derive(Debug, Clone)]
pub struct Bag<T: Eq + std::hash::Hash + Ord + Clone> {
    counts: HashMap<T, usize>,
    size: usize,
}

impl<T> std::ops::Deref for Bag<T>
where
    T: Eq + std::hash::Hash + Ord + Clone,
{
    type Target = HashMap<T, usize>;

    fn deref(&self) -> &'_ Self::Target {
        &self.counts
    }
}

impl<T: Eq + std::hash::Hash + Ord + Clone> Bag<T> {
    pub fn new() -> Self {
        Bag { counts: HashMap::default(), size: 0 }
    }

    /// Add a single occurrence of `t`.
    pub fn add(&mut self, t: T) {
        self.add_count(t, 1);
    }

    /// Add `n` occurrences of `t`.
    pub fn add_count(&mut self, t: T, n: usize) {
        if n == 0 {
            return;
        }
        *self.counts.entry(t).or_insert(0) += n;
        self.size += n;
    }

    /// Remove a single occurrence of `t`. Removing an absent element is a no-op.
    pub fn remove(&mut self, t: &T) {
        if let Some(n) = self.counts.get_mut(t) {
            *n -= 1;
            self.size -= 1;
            if *n == 0 {
                let _ = self.counts.remove(t);
            }
        }
    }

    /// The number of occurrences of `t`.
    pub fn count(&self, t: &T) -> usize {
        self.counts.get(t).cloned().unwrap_or(0)
    }

    /// The total number of elements, with multiplicity.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The heaviest element and its count. Ties break towards the smallest
    /// element so the outcome is independent of hash ordering.
    pub fn mode(&self) -> Option<(T, usize)> {
        let mut mode: Option<(T, usize)> = None;
        for (t, n) in self.counts.iter() {
            let better = match mode {
                None => true,
                Some((ref m, mn)) => *n > mn || (*n == mn && t < m),
            };
            if better {
                mode = Some((t.clone(), *n));
            }
        }
        mode
    }

    /// All elements with at least `threshold` occurrences.
    pub fn threshold(&self, threshold: usize) -> Vec<T> {
        let mut result: Vec<T> = self
            .counts
            .iter()
            .filter(|(_, n)| **n >= threshold)
            .map(|(t, _)| t.clone())
            .collect();
        result.sort();
        result
    }

    /// A list of the distinct elements.
    pub fn list(&self) -> Vec<T> {
        self.counts.keys().cloned().collect()
    }
}
