use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_CACHE_TTL_SECS: u64 = 30;

/// Fixed-TTL freshness rule shared by every cache in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    ttl: Duration,
}

impl StalenessPolicy {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn from_secs(secs: u64) -> Self {
        let secs = i64::try_from(secs).unwrap_or(i64::MAX / 1_000);
        Self::new(Duration::seconds(secs))
    }

    /// Missing entries are always stale. An entry is still fresh at exactly
    /// `fetched_at + ttl`.
    pub fn is_stale(&self, fetched_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match fetched_at {
            Some(fetched_at) => now.signed_duration_since(fetched_at) > self.ttl,
            None => true,
        }
    }
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self::from_secs(DEFAULT_CACHE_TTL_SECS)
    }
}
