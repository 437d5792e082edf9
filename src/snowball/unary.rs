use super::binary::{BinarySnowball, BinarySnowflake};

/// A unary Snowflake instance.
///
/// Polls where the vote count reaches `alpha_confidence` increment the
/// confidence counter; any other outcome resets it. The instance finalizes
/// once `beta` consecutive polls succeeded.
#[derive(Debug, Clone)]
pub struct UnarySnowflake {
    alpha_confidence: usize,
    beta: u32,
    confidence: u32,
    finalized: bool,
}

impl UnarySnowflake {
    pub fn new(alpha_confidence: usize, beta: u32) -> Self {
        UnarySnowflake { alpha_confidence, beta, confidence: 0, finalized: false }
    }

    pub fn record_poll(&mut self, count: usize) {
        if self.finalized {
            return;
        }
        if count >= self.alpha_confidence {
            self.confidence += 1;
            self.finalized = self.confidence >= self.beta;
        } else {
            self.record_unsuccessful_poll();
        }
    }

    pub fn record_unsuccessful_poll(&mut self) {
        self.confidence = 0;
    }

    pub fn confidence(&self) -> u32 {
        self.confidence
    }

    pub fn finalized(&self) -> bool {
        self.finalized
    }

    /// Converts the instance to a binary one biased towards `choice`, carrying
    /// over the accumulated confidence.
    pub fn extend(&self, alpha_preference: usize, choice: u8) -> BinarySnowflake {
        BinarySnowflake::with_state(
            alpha_preference,
            self.alpha_confidence,
            self.beta,
            choice,
            self.confidence,
            self.finalized,
        )
    }
}

/// A unary Snowball instance.
///
/// As [UnarySnowflake], plus a running preference strength which seeds the
/// binary form on extension.
#[derive(Debug, Clone)]
pub struct UnarySnowball {
    snowflake: UnarySnowflake,
    alpha_preference: usize,
    preference_strength: u32,
}

impl UnarySnowball {
    pub fn new(alpha_preference: usize, alpha_confidence: usize, beta: u32) -> Self {
        UnarySnowball {
            snowflake: UnarySnowflake::new(alpha_confidence, beta),
            alpha_preference,
            preference_strength: 0,
        }
    }

    pub fn record_poll(&mut self, count: usize) {
        if count >= self.alpha_preference {
            self.preference_strength += 1;
        }
        self.snowflake.record_poll(count);
    }

    pub fn record_unsuccessful_poll(&mut self) {
        self.snowflake.record_unsuccessful_poll();
    }

    pub fn confidence(&self) -> u32 {
        self.snowflake.confidence()
    }

    pub fn finalized(&self) -> bool {
        self.snowflake.finalized()
    }

    /// Converts the instance to a binary one biased towards `choice`. The
    /// accumulated confidence and preference strength carry over to the
    /// extending choice.
    pub fn extend(&self, choice: u8) -> BinarySnowball {
        let mut bs = BinarySnowball::with_state(
            self.alpha_preference,
            self.snowflake.alpha_confidence,
            self.snowflake.beta,
            choice,
            self.snowflake.confidence,
            self.snowflake.finalized,
        );
        bs.seed_strength(choice, self.preference_strength);
        bs
    }
}
