//! Buffered chit processing.
//!
//! A [Voter] holds one peer response until every block it depends on is
//! resolved. The candidate votes are tried in order (preferred tip, preferred
//! block at the requested height, last accepted); a candidate that is not
//! known locally blocks the voter until the block arrives or the fetch is
//! abandoned. Abandonment counts as a drop, never as an affirmative vote.

use crate::ids::Id;
use crate::types::{BlockHash, RequestId};

use std::collections::{HashMap, HashSet};

/// One peer response to one poll, waiting to be turned into a vote.
#[derive(Debug, Clone)]
pub struct Voter {
    pub validator: Id,
    pub request_id: RequestId,
    /// Candidate votes in preference order.
    pub options: Vec<BlockHash>,
    /// Candidates whose fetch was abandoned; they can no longer be voted for.
    pub abandoned: HashSet<BlockHash>,
}

impl Voter {
    pub fn new(validator: Id, request_id: RequestId, options: Vec<BlockHash>) -> Self {
        Voter { validator, request_id, options, abandoned: HashSet::new() }
    }
}

/// The voter dependency index: `block hash -> waiting voters`, with voter
/// records owned by key. Both maps mutate together under the engine actor.
pub struct BlockedVoters {
    voters: HashMap<u64, Voter>,
    waiting: HashMap<BlockHash, Vec<u64>>,
    next_key: u64,
}

impl BlockedVoters {
    pub fn new() -> Self {
        BlockedVoters { voters: HashMap::default(), waiting: HashMap::default(), next_key: 0 }
    }

    /// Parks a voter until `dep` resolves.
    pub fn park(&mut self, voter: Voter, dep: BlockHash) {
        let key = self.next_key;
        self.next_key += 1;
        let _ = self.voters.insert(key, voter);
        self.waiting.entry(dep).or_insert_with(Vec::new).push(key);
    }

    /// Releases every voter parked on `dep`, in park order.
    pub fn take(&mut self, dep: &BlockHash) -> Vec<Voter> {
        let keys = self.waiting.remove(dep).unwrap_or_default();
        keys.into_iter().filter_map(|key| self.voters.remove(&key)).collect()
    }

    pub fn len(&self) -> usize {
        self.voters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voters.is_empty()
    }

    pub fn clear(&mut self) {
        self.voters.clear();
        self.waiting.clear();
    }
}
