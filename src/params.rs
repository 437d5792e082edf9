//! Consensus configuration, immutable for the lifetime of a chain.

/// The parameters governing poll sampling and finalization.
///
/// Invariant: `k >= alpha_confidence >= alpha_preference > k / 2` and
/// `beta >= 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameters {
    /// Number of validators sampled per poll.
    pub k: usize,
    /// Votes needed to shift a preference.
    pub alpha_preference: usize,
    /// Votes needed to increment confidence.
    pub alpha_confidence: usize,
    /// Consecutive successful polls required for finalization.
    pub beta: u32,
    /// Maximum outstanding polls allowed.
    pub concurrent_polls: usize,
    /// Preferred upper bound on concurrently processing blocks.
    pub optimal_processing: usize,
    /// Admission limit on buffered items (pending fetches, blocked voters).
    pub max_outstanding_items: usize,
    /// Age past which a processing block marks the chain unhealthy, in millisec.
    pub max_item_processing_time_ms: u64,
}

#[derive(Debug, Eq, PartialEq)]
pub enum Error {
    InvalidK(usize),
    InvalidAlphaPreference(usize, usize),
    InvalidAlphaConfidence(usize, usize),
    InvalidBeta(u32),
    InvalidConcurrentPolls(usize),
    InvalidOptimalProcessing(usize),
    InvalidMaxOutstandingItems(usize),
    InvalidMaxItemProcessingTime(u64),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl Default for Parameters {
    fn default() -> Self {
        Parameters {
            k: 20,
            alpha_preference: 15,
            alpha_confidence: 15,
            beta: 20,
            concurrent_polls: 4,
            optimal_processing: 10,
            max_outstanding_items: 256,
            max_item_processing_time_ms: 30_000,
        }
    }
}

impl Parameters {
    /// Checks the parameter invariants.
    pub fn verify(&self) -> Result<()> {
        if self.k == 0 {
            return Err(Error::InvalidK(self.k));
        }
        if self.alpha_preference <= self.k / 2 || self.alpha_preference > self.k {
            return Err(Error::InvalidAlphaPreference(self.k, self.alpha_preference));
        }
        if self.alpha_confidence < self.alpha_preference || self.alpha_confidence > self.k {
            return Err(Error::InvalidAlphaConfidence(
                self.alpha_preference,
                self.alpha_confidence,
            ));
        }
        if self.beta < 1 {
            return Err(Error::InvalidBeta(self.beta));
        }
        if self.concurrent_polls < 1 {
            return Err(Error::InvalidConcurrentPolls(self.concurrent_polls));
        }
        if self.optimal_processing < 1 {
            return Err(Error::InvalidOptimalProcessing(self.optimal_processing));
        }
        if self.max_outstanding_items < 1 {
            return Err(Error::InvalidMaxOutstandingItems(self.max_outstanding_items));
        }
        if self.max_item_processing_time_ms < 1 {
            return Err(Error::InvalidMaxItemProcessingTime(self.max_item_processing_time_ms));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn valid() -> Parameters {
        Parameters {
            k: 10,
            alpha_preference: 6,
            alpha_confidence: 8,
            beta: 3,
            concurrent_polls: 1,
            optimal_processing: 1,
            max_outstanding_items: 16,
            max_item_processing_time_ms: 1,
        }
    }

    #[actix_rt::test]
    async fn test_valid_parameters() {
        assert_eq!(valid().verify(), Ok(()));
        assert_eq!(Parameters::default().verify(), Ok(()));
    }

    #[actix_rt::test]
    async fn test_invalid_k() {
        let mut p = valid();
        p.k = 0;
        assert_eq!(p.verify(), Err(Error::InvalidK(0)));
    }

    #[actix_rt::test]
    async fn test_alpha_preference_below_majority() {
        let mut p = valid();
        p.alpha_preference = 5;
        assert_eq!(p.verify(), Err(Error::InvalidAlphaPreference(10, 5)));
    }

    #[actix_rt::test]
    async fn test_alpha_confidence_below_preference() {
        let mut p = valid();
        p.alpha_confidence = 5;
        assert_eq!(p.verify(), Err(Error::InvalidAlphaConfidence(6, 5)));
    }

    #[actix_rt::test]
    async fn test_alpha_above_k() {
        let mut p = valid();
        p.alpha_preference = 11;
        p.alpha_confidence = 11;
        assert_eq!(p.verify(), Err(Error::InvalidAlphaPreference(10, 11)));

        let mut p = valid();
        p.alpha_confidence = 11;
        assert_eq!(p.verify(), Err(Error::InvalidAlphaConfidence(6, 11)));
    }

    #[actix_rt::test]
    async fn test_invalid_beta() {
        let mut p = valid();
        p.beta = 0;
        assert_eq!(p.verify(), Err(Error::InvalidBeta(0)));
    }

    #[actix_rt::test]
    async fn test_invalid_limits() {
        let mut p = valid();
        p.concurrent_polls = 0;
        assert_eq!(p.verify(), Err(Error::InvalidConcurrentPolls(0)));

        let mut p = valid();
        p.max_outstanding_items = 0;
        assert_eq!(p.verify(), Err(Error::InvalidMaxOutstandingItems(0)));
    }
}
