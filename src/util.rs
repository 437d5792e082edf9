//! Utility functions shared by the consensus components
use chrono::{DateTime, TimeZone, Utc};

/// Compute the connected fraction of a validator set.
#[inline]
pub fn percent_of(qty: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    qty as f64 / total as f64
}

/// Gets system clock in millisec since unix epoch
pub fn get_utc_timestamp_millis() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Converts timestamp in millisec to DateTime UTC
pub fn from_ts_millis(ts: u64) -> DateTime<Utc> {
    Utc.timestamp((ts / 1_000) as i64, (ts % 1000) as u32 * 1_000_000)
}

#[cfg(test)]
mod test {
    use super::*;

    #[actix_rt::test]
    async fn test_percent_of() {
        assert_eq!(0.0, percent_of(0, 0));
        assert_eq!(0.0, percent_of(0, 10));
        assert_eq!(0.5, percent_of(5, 10));
        assert_eq!(1.0, percent_of(10, 10));
    }

    #[actix_rt::test]
    async fn test_timestamp_roundtrip() {
        let ts = 1_600_000_000_123u64;
        let dt = from_ts_millis(ts);
        assert_eq!(dt.timestamp_millis() as u64, ts);
    }
}
