use crate::bag::Bag;
use crate::ids::Id;
use crate::types::BlockHash;

use std::time::Instant;

/// A single outstanding poll.
///
/// The sampled bag holds one slot per sampled validator (a validator sampled
/// twice owes two responses). Votes accumulate in the tally; drops merely
/// close slots.
#[derive(Debug, Clone)]
pub struct Poll {
    sampled: Bag<Id>,
    votes: Bag<BlockHash>,
    start: Instant,
}

impl Poll {
    pub fn new(sampled: Bag<Id>) -> Self {
        Poll { sampled, votes: Bag::new(), start: Instant::now() }
    }

    /// Records a vote from a sampled validator. Responses from validators
    /// that were not sampled (or have already answered) are ignored.
    pub fn vote(&mut self, validator: &Id, block_hash: BlockHash) -> bool {
        if self.sampled.count(validator) == 0 {
            return false;
        }
        self.sampled.remove(validator);
        self.votes.add(block_hash);
        true
    }

    /// Closes a sampled validator's slot without a vote.
    pub fn drop_vote(&mut self, validator: &Id) -> bool {
        if self.sampled.count(validator) == 0 {
            return false;
        }
        self.sampled.remove(validator);
        true
    }

    /// Closes every outstanding slot; used on poll expiry.
    pub fn drop_outstanding(&mut self) {
        self.sampled = Bag::new();
    }

    /// A poll finishes when every sampled validator has voted or dropped.
    pub fn finished(&self) -> bool {
        self.sampled.is_empty()
    }

    /// Consumes the poll, yielding its tally.
    pub fn tally(self) -> Bag<BlockHash> {
        self.votes
    }

    pub fn age(&self) -> std::time::Duration {
        self.start.elapsed()
    }

    pub fn outstanding(&self) -> usize {
        self.sampled.size()
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
    async fn test_poll_terminates_on_k_responses() {
        let v1 = Id::one();
        let v2 = Id::two();
        let mut poll = Poll::new(sampled(&[v1, v2]));
        assert!(!poll.finished());

        assert!(poll.vote(&v1, [7u8; 32]));
        assert!(!poll.finished());
        assert!(poll.drop_vote(&v2));
        assert!(poll.finished());

        let tally = poll.tally();
        assert_eq!(tally.count(&[7u8; 32]), 1);
        assert_eq!(tally.size(), 1);
    }

    #[actix_rt::test]
    async fn test_unsampled_and_duplicate_responses_ignored() {
        let v1 = Id::one();
        let outsider = Id::two();
        let mut poll = Poll::new(sampled(&[v1]));

        assert!(!poll.vote(&outsider, [1u8; 32]));
        assert!(poll.vote(&v1, [1u8; 32]));
        // A second response from the same validator has no open slot.
        assert!(!poll.vote(&v1, [2u8; 32]));
        assert!(poll.finished());
        assert_eq!(poll.tally().count(&[1u8; 32]), 1);
    }

    #[actix_rt::test]
    async fn test_double_sampled_validator_owes_two_responses() {
        let v1 = Id::one();
        let mut bag = Bag::new();
        bag.add_count(v1, 2);
        let mut poll = Poll::new(bag);

        assert!(poll.vote(&v1, [1u8; 32]));
        assert!(!poll.finished());
        assert!(poll.vote(&v1, [1u8; 32]));
        assert!(poll.finished());
        assert_eq!(poll.tally().count(&[1u8; 32]), 2);
    }

    #[actix_rt::test]
    async fn test_drop_outstanding() {
        let v1 = Id::one();
        let v2 = Id::two();
        let mut poll = Poll::new(sampled(&[v1, v2]));
        let _ = poll.vote(&v1, [3u8; 32]);
        poll.drop_outstanding();
        assert!(poll.finished());
        assert_eq!(poll.tally().count(&[3u8; 32]), 1);
    }
}
