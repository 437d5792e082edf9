use super::poll::Poll;

use crate::bag::Bag;
use crate::colored::Colorize;
use crate::ids::Id;
use crate::types::{BlockHash, RequestId};

use tracing::debug;

use std::collections::HashMap;
use std::time::Duration;

/// The set of outstanding polls, indexed by request id.
///
/// At most `concurrent_polls` records exist at any time; the engine checks
/// [PollSet::len] before issuing a new query round.
pub struct PollSet {
    polls: HashMap<RequestId, Poll>,
}

impl PollSet {
    pub fn new() -> Self {
        PollSet { polls: HashMap::default() }
    }

    /// Registers a new poll against a sampled validator bag.
    pub fn make(&mut self, request_id: RequestId, sampled: Bag<Id>) {
        let _ = self.polls.insert(request_id, Poll::new(sampled));
    }

    /// Records a vote. Returns the tally when this response terminated the
    /// poll. A vote for an unknown request id is dropped silently.
    pub fn vote(
        &mut self,
        request_id: RequestId,
        validator: &Id,
        block_hash: BlockHash,
    ) -> Option<Bag<BlockHash>> {
        match self.polls.get_mut(&request_id) {
            Some(poll) => {
                if !poll.vote(validator, block_hash) {
                    debug!(
                        "[{}] ignoring vote from unsampled validator {} for request {}",
                        "poll".yellow(),
                        validator,
                        request_id
                    );
                }
                self.finish_if_done(request_id)
            }
            None => {
                debug!(
                    "[{}] dropping vote for unknown request {} from {}",
                    "poll".yellow(),
                    request_id,
                    validator
                );
                None
            }
        }
    }

    /// Records an explicit drop (timeout or failure signal) for a validator.
    pub fn drop_vote(&mut self, request_id: RequestId, validator: &Id) -> Option<Bag<BlockHash>> {
        match self.polls.get_mut(&request_id) {
            Some(poll) => {
                let _ = poll.drop_vote(validator);
                self.finish_if_done(request_id)
            }
            None => None,
        }
    }

    /// Closes every outstanding slot of a poll; used on expiry.
    pub fn expire(&mut self, request_id: RequestId) -> Option<Bag<BlockHash>> {
        match self.polls.get_mut(&request_id) {
            Some(poll) => {
                poll.drop_outstanding();
                self.finish_if_done(request_id)
            }
            None => None,
        }
    }

    pub fn contains(&self, request_id: RequestId) -> bool {
        self.polls.contains_key(&request_id)
    }

    pub fn len(&self) -> usize {
        self.polls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polls.is_empty()
    }

    /// The age of the longest-outstanding poll.
    pub fn longest_outstanding(&self) -> Option<Duration> {
        self.polls.values().map(|poll| poll.age()).max()
    }

    /// Drops every poll; used on engine shutdown.
    pub fn clear(&mut self) {
        self.polls.clear();
    }

    fn finish_if_done(&mut self, request_id: RequestId) -> Option<Bag<BlockHash>> {
        let done = self.polls.get(&request_id).map(|poll| poll.finished()).unwrap_or(false);
        if done {
            self.polls.remove(&request_id).map(|poll| poll.tally())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sampled(ids: &[Id]) -> Bag<Id> {
        let mut bag = Bag::new();
        for id in ids.iter() {
            bag.add(id.clone());
        }
        bag
    }

    #[actix_rt::test]
    async fn test_tally_on_completion() {
        let v1 = Id::one();
        let v2 = Id::two();
        let mut set = PollSet::new();
        set.make(1, sampled(&[v1, v2]));
        assert_eq!(set.len(), 1);

        assert!(set.vote(1, &v1, [5u8; 32]).is_none());
        let tally = set.vote(1, &v2, [5u8; 32]).unwrap();
        assert_eq!(tally.count(&[5u8; 32]), 2);
        assert!(set.is_empty());
    }

    #[actix_rt::test]
    async fn test_unknown_request_id_dropped() {
        let v1 = Id::one();
        let mut set = PollSet::new();
        assert!(set.vote(42, &v1, [5u8; 32]).is_none());
        assert!(set.drop_vote(42, &v1).is_none());
        assert!(set.expire(42).is_none());
    }

    #[actix_rt::test]
    async fn test_polls_complete_out_of_order() {
        let v1 = Id::one();
        let mut set = PollSet::new();
        set.make(1, sampled(&[v1]));
        set.make(2, sampled(&[v1]));

        // The younger poll completes first and its tally is delivered
        // immediately.
        let tally = set.vote(2, &v1, [9u8; 32]).unwrap();
        assert_eq!(tally.count(&[9u8; 32]), 1);
        assert_eq!(set.len(), 1);

        let tally = set.drop_vote(1, &v1).unwrap();
        assert!(tally.is_empty());
        assert!(set.is_empty());
    }

    #[actix_rt::test]
    async fn test_expire_closes_all_slots() {
        let v1 = Id::one();
        let v2 = Id::two();
        let mut set = PollSet::new();
        set.make(7, sampled(&[v1, v2]));

        assert!(set.vote(7, &v1, [1u8; 32]).is_none());
        let tally = set.expire(7).unwrap();
        assert_eq!(tally.count(&[1u8; 32]), 1);
        assert!(set.is_empty());
    }

    #[actix_rt::test]
    async fn test_late_chit_after_expiry_is_dropped() {
        let v1 = Id::one();
        let mut set = PollSet::new();
        set.make(3, sampled(&[v1]));
        let _ = set.expire(3).unwrap();

        // The poll is gone; the late chit is silently ignored.
        assert!(set.vote(3, &v1, [1u8; 32]).is_none());
    }
}
