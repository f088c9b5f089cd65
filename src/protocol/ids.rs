//! Identifier allocation.
//!
//! Hop-by-hop and end-to-end ids are drawn from process-local counters.
//! End-to-end ids carry the low 12 bits of the start time in their top bits,
//! the way RFC 6733 suggests, so restarts do not immediately reuse them.
//! Session-Ids use the `<realm>;OMR<timestamp>001` shape and are unique per
//! generator even when the clock does not move between calls.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, TimeZone, Utc};

/// Session-Id timestamp layout: `YYYYMMDDhhmmss` plus milliseconds.
const SESSION_ID_TIME_FORMAT: &str = "%Y%m%d%H%M%S%3f";

/// Fixed Session-Id suffix
const SESSION_ID_SUFFIX: &str = "001";

/// Counter-based hop-by-hop and end-to-end ids.
#[derive(Debug)]
pub struct IdGenerator {
    hop_by_hop: AtomicU32,
    end_to_end: AtomicU32,
}

impl IdGenerator {
    /// Seed both counters from the current time.
    pub fn new() -> Self {
        let now = Utc::now();
        let seconds = now.timestamp() as u32;
        let nanos = now.timestamp_subsec_nanos();
        Self::with_seeds(
            nanos ^ seconds.rotate_left(16),
            ((seconds & 0xFFF) << 20) | (nanos & 0xFFFFF),
        )
    }

    /// Start the counters at fixed values.
    pub fn with_seeds(hop_by_hop: u32, end_to_end: u32) -> Self {
        Self {
            hop_by_hop: AtomicU32::new(hop_by_hop),
            end_to_end: AtomicU32::new(end_to_end),
        }
    }

    /// Next hop-by-hop id (wraps)
    pub fn next_hop_by_hop(&self) -> u32 {
        self.hop_by_hop.fetch_add(1, Ordering::Relaxed)
    }

    /// Next end-to-end id (wraps)
    pub fn next_end_to_end(&self) -> u32 {
        self.end_to_end.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Session-Id generator for one origin realm.
#[derive(Debug)]
pub struct SessionIdGenerator {
    realm: String,
    last_millis: Mutex<i64>,
}

impl SessionIdGenerator {
    /// Create a generator for `realm`
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            last_millis: Mutex::new(i64::MIN),
        }
    }

    /// Realm used as the Session-Id prefix
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Next Session-Id, e.g. `example.net;OMR20240102030405678001`.
    pub fn next(&self) -> String {
        self.next_at(Utc::now())
    }

    fn next_at(&self, now: DateTime<Utc>) -> String {
        let millis = {
            let mut last = self.last_millis.lock().unwrap_or_else(PoisonError::into_inner);
            let millis = now.timestamp_millis().max(last.saturating_add(1));
            *last = millis;
            millis
        };
        let stamp = Utc.timestamp_millis_opt(millis).single().unwrap_or(now);
        format!(
            "{};OMR{}{}",
            self.realm,
            stamp.format(SESSION_ID_TIME_FORMAT),
            SESSION_ID_SUFFIX
        )
    }
}
