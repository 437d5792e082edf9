use crate::bag::Bag;
use crate::types::BlockHash;

use std::collections::HashMap;

/// An n-ary Snowflake instance deciding among an open set of block hashes.
///
/// The preference follows the last choice that reached `alpha_confidence`;
/// a poll where no choice reaches `alpha_preference` resets the confidence.
#[derive(Debug, Clone)]
pub struct NnarySnowflake {
    alpha_preference: usize,
    alpha_confidence: usize,
    beta: u32,
    preference: BlockHash,
    confidence: u32,
    finalized: bool,
}

impl NnarySnowflake {
    pub fn new(
        alpha_preference: usize,
        alpha_confidence: usize,
        beta: u32,
        choice: BlockHash,
    ) -> Self {
        NnarySnowflake {
            alpha_preference,
            alpha_confidence,
            beta,
            preference: choice,
            confidence: 0,
            finalized: false,
        }
    }

    /// Records the heaviest choice of a poll. Ties break towards the
    /// lexicographically smallest hash via [Bag::mode].
    pub fn record_poll(&mut self, votes: &Bag<BlockHash>) {
        match votes.mode() {
            Some((choice, count)) => self.record_counted_poll(count, choice),
            None => self.record_unsuccessful_poll(),
        }
    }

    pub fn record_counted_poll(&mut self, count: usize, choice: BlockHash) {
        if self.finalized {
            return;
        }
        if count < self.alpha_preference {
            self.record_unsuccessful_poll();
            return;
        }
        if count < self.alpha_confidence {
            self.confidence = 0;
            self.preference = choice;
            return;
        }
        if choice != self.preference {
            self.confidence = 0;
        }
        self.preference = choice;
        self.confidence += 1;
        self.finalized = self.confidence >= self.beta;
    }

    pub fn record_unsuccessful_poll(&mut self) {
        self.confidence = 0;
    }

    pub fn preference(&self) -> BlockHash {
        self.preference
    }

    pub fn confidence(&self) -> u32 {
        self.confidence
    }

    pub fn finalized(&self) -> bool {
        self.finalized
    }
}

/// An n-ary Snowball instance.
///
/// As [NnarySnowflake], plus per-choice preference strength counters: the
/// long-term preference only moves to a choice whose strength strictly
/// exceeds the previous maximum, so a historically heavier branch survives
/// single contrary polls.
#[derive(Debug, Clone)]
pub struct NnarySnowball {
    snowflake: NnarySnowflake,
    preference: BlockHash,
    preference_strength: HashMap<BlockHash, u32>,
    max_strength: u32,
}

impl NnarySnowball {
    pub fn new(
        alpha_preference: usize,
        alpha_confidence: usize,
        beta: u32,
        choice: BlockHash,
    ) -> Self {
        NnarySnowball {
            snowflake: NnarySnowflake::new(alpha_preference, alpha_confidence, beta, choice),
            preference: choice,
            preference_strength: HashMap::default(),
            max_strength: 0,
        }
    }

    /// Records the heaviest choice of a poll.
    pub fn record_poll(&mut self, votes: &Bag<BlockHash>) {
        match votes.mode() {
            Some((choice, count)) => self.record_counted_poll(count, choice),
            None => self.record_unsuccessful_poll(),
        }
    }

    pub fn record_counted_poll(&mut self, count: usize, choice: BlockHash) {
        if count >= self.snowflake.alpha_preference {
            let strength = self.preference_strength.entry(choice).or_insert(0);
            *strength += 1;
            if *strength > self.max_strength {
                self.max_strength = *strength;
                self.preference = choice;
            }
        }
        self.snowflake.record_counted_poll(count, choice);
    }

    pub fn record_unsuccessful_poll(&mut self) {
        self.snowflake.record_unsuccessful_poll();
    }

    pub fn preference(&self) -> BlockHash {
        // Only a choice that reached alpha_confidence beta times in a row can
        // finalize, so the snowflake preference wins once decided.
        if self.snowflake.finalized() {
            self.snowflake.preference()
        } else {
            self.preference
        }
    }

    pub fn confidence(&self) -> u32 {
        self.snowflake.confidence()
    }

    pub fn finalized(&self) -> bool {
        self.snowflake.finalized()
    }
}
