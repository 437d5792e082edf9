/// A binary Snowflake instance deciding between the bit choices `0` and `1`.
#[derive(Debug, Clone)]
pub struct BinarySnowflake {
    alpha_preference: usize,
    alpha_confidence: usize,
    beta: u32,
    preference: u8,
    confidence: u32,
    finalized: bool,
}

impl BinarySnowflake {
    pub fn new(alpha_preference: usize, alpha_confidence: usize, beta: u32, choice: u8) -> Self {
        BinarySnowflake {
            alpha_preference,
            alpha_confidence,
            beta,
            preference: choice,
            confidence: 0,
            finalized: false,
        }
    }

    pub(super) fn with_state(
        alpha_preference: usize,
        alpha_confidence: usize,
        beta: u32,
        choice: u8,
        confidence: u32,
        finalized: bool,
    ) -> Self {
        BinarySnowflake {
            alpha_preference,
            alpha_confidence,
            beta,
            preference: choice,
            confidence,
            finalized,
        }
    }

    pub fn record_poll(&mut self, count: usize, choice: u8) {
        if self.finalized {
            return;
        }
        if count >= self.alpha_confidence {
            if choice != self.preference {
                self.confidence = 0;
            }
            self.preference = choice;
            self.confidence += 1;
            self.finalized = self.confidence >= self.beta;
        } else if count >= self.alpha_preference {
            self.preference = choice;
            self.confidence = 0;
        } else {
            self.record_unsuccessful_poll();
        }
    }

    pub fn record_unsuccessful_poll(&mut self) {
        self.confidence = 0;
    }

    pub fn preference(&self) -> u8 {
        self.preference
    }

    pub fn confidence(&self) -> u32 {
        self.confidence
    }

    pub fn finalized(&self) -> bool {
        self.finalized
    }
}

/// A binary Snowball instance.
///
/// The long-term preference follows the per-choice strength counters, while
/// the embedded Snowflake tracks the instantaneous majority and the
/// finalization counter.
#[derive(Debug, Clone)]
pub struct BinarySnowball {
    snowflake: BinarySnowflake,
    preference: u8,
    preference_strength: [u32; 2],
}

impl BinarySnowball {
    pub fn new(alpha_preference: usize, alpha_confidence: usize, beta: u32, choice: u8) -> Self {
        BinarySnowball {
            snowflake: BinarySnowflake::new(alpha_preference, alpha_confidence, beta, choice),
            preference: choice,
            preference_strength: [0; 2],
        }
    }

    pub(super) fn with_state(
        alpha_preference: usize,
        alpha_confidence: usize,
        beta: u32,
        choice: u8,
        confidence: u32,
        finalized: bool,
    ) -> Self {
        BinarySnowball {
            snowflake: BinarySnowflake::with_state(
                alpha_preference,
                alpha_confidence,
                beta,
                choice,
                confidence,
                finalized,
            ),
            preference: choice,
            preference_strength: [0; 2],
        }
    }

    pub(super) fn seed_strength(&mut self, choice: u8, strength: u32) {
        self.preference_strength[choice as usize] = strength;
    }

    pub fn record_poll(&mut self, count: usize, choice: u8) {
        if count >= self.snowflake.alpha_preference {
            let strength = self.preference_strength[choice as usize] + 1;
            self.preference_strength[choice as usize] = strength;
            if strength > self.preference_strength[1 - choice as usize] {
                self.preference = choice;
            }
        }
        self.snowflake.record_poll(count, choice);
    }

    pub fn record_unsuccessful_poll(&mut self) {
        self.snowflake.record_unsuccessful_poll();
    }

    pub fn preference(&self) -> u8 {
        // The finalized choice takes precedence: only a choice reaching
        // alpha_confidence beta times in a row can finalize.
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

#[cfg(test)]
mod test {
    use super::*;

    #[actix_rt::test]
    async fn test_binary_snowflake() {
        let mut sf = BinarySnowflake::new(2, 3, 2, 0);
        assert_eq!(sf.preference(), 0);

        sf.record_poll(3, 1);
        assert_eq!(sf.preference(), 1);
        assert_eq!(sf.confidence(), 1);

        // A preference-level majority moves the preference without building
        // confidence.
        sf.record_poll(2, 0);
        assert_eq!(sf.preference(), 0);
        assert_eq!(sf.confidence(), 0);

        sf.record_poll(3, 0);
        sf.record_poll(3, 0);
        assert!(sf.finalized());
        assert_eq!(sf.preference(), 0);
    }

    #[actix_rt::test]
    async fn test_binary_snowflake_flip_resets() {
        let mut sf = BinarySnowflake::new(2, 2, 3, 0);
        sf.record_poll(2, 0);
        sf.record_poll(2, 0);
        assert_eq!(sf.confidence(), 2);

        sf.record_poll(2, 1);
        assert_eq!(sf.preference(), 1);
        assert_eq!(sf.confidence(), 1);

        sf.record_poll(2, 1);
        sf.record_poll(2, 1);
        assert!(sf.finalized());
        assert_eq!(sf.preference(), 1);
    }

    #[actix_rt::test]
    async fn test_binary_snowball_strength_keeps_preference() {
        let mut sb = BinarySnowball::new(1, 2, 3, 0);
        sb.record_poll(2, 0);
        sb.record_poll(2, 0);
        assert_eq!(sb.preference(), 0);

        // A single successful poll for the other choice is not enough to
        // outweigh the accumulated strength.
        sb.record_poll(2, 1);
        assert_eq!(sb.preference(), 0);

        sb.record_poll(2, 1);
        sb.record_poll(2, 1);
        assert_eq!(sb.preference(), 1);
    }

    #[actix_rt::test]
    async fn test_binary_snowball_finalize() {
        let mut sb = BinarySnowball::new(2, 2, 2, 0);
        sb.record_poll(2, 1);
        sb.record_poll(2, 1);
        assert!(sb.finalized());
        assert_eq!(sb.preference(), 1);
    }
}
