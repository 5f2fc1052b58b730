//! Quota tracking state and rate-limit header parsing.
//!
//! The server is authoritative for quota: everything here is derived from
//! response headers. Parsing is deliberately lenient - a missing or
//! malformed header degrades to "unknown", it never fails the call.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::warn;

/// Remaining-request count header.
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
/// Total window limit header.
pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
/// Window reset time header (epoch seconds, fractional).
pub const HEADER_RESET: &str = "x-ratelimit-reset";
/// Seconds-until-reset header (fractional).
pub const HEADER_RESET_AFTER: &str = "x-ratelimit-reset-after";

/// Remaining quota for one bucket.
///
/// `Unknown` means no response has been seen for the bucket yet (or the
/// server stopped sending quota headers). An unknown quota holds exactly
/// one optimistic slot: the first request against a fresh bucket goes
/// out immediately as a probe, and anything issued behind it waits until
/// the probe's response reports real counts. This is an explicit state
/// rather than a numeric sentinel so "unknown" can never be confused
/// with a legitimately exhausted bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quota {
    /// No authoritative count seen yet; admits exactly one probe send.
    #[default]
    Unknown,
    /// The optimistic slot is spent on an in-flight probe; no further
    /// capacity until a response reports a count.
    Probing,
    /// Server-reported remaining request count.
    Known(u32),
}

impl Quota {
    /// Returns true if a request may be sent right now.
    pub fn has_capacity(&self) -> bool {
        match self {
            Quota::Unknown => true,
            Quota::Probing => false,
            Quota::Known(n) => *n > 0,
        }
    }

    /// Consumes one slot. Spends the single optimistic slot when the
    /// count is unknown; saturates at zero when it is known.
    pub fn decrement(&mut self) {
        match self {
            Quota::Unknown => *self = Quota::Probing,
            Quota::Probing => {}
            Quota::Known(n) => *n = n.saturating_sub(1),
        }
    }
}

/// The four quota signals parsed from a response header map.
///
/// Header names are matched case-insensitively. Values that fail numeric
/// parsing are treated as absent (and logged), per the degraded-but-safe
/// policy: a response with broken headers must never fail the call that
/// produced it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateLimitHeaders {
    /// Requests remaining in the current window.
    pub remaining: Option<u32>,
    /// Total requests allowed per window.
    pub limit: Option<u32>,
    /// Window reset time, epoch seconds.
    pub reset_at: Option<f64>,
    /// Seconds until the window resets.
    pub reset_after: Option<f64>,
}

impl RateLimitHeaders {
    /// Parses the quota signals out of a response header map.
    pub fn parse(headers: &HashMap<String, String>) -> Self {
        Self {
            remaining: parse_value(headers, HEADER_REMAINING),
            limit: parse_value(headers, HEADER_LIMIT),
            reset_at: parse_value(headers, HEADER_RESET),
            reset_after: parse_value(headers, HEADER_RESET_AFTER),
        }
    }

    /// Returns true if no quota signal was present at all.
    pub fn is_empty(&self) -> bool {
        self.remaining.is_none()
            && self.limit.is_none()
            && self.reset_at.is_none()
            && self.reset_after.is_none()
    }

    /// Delay until the window resets, measured from the wall clock now.
    ///
    /// Returns `None` when neither reset signal is present, in which case
    /// the bucket must not arm a refill timer.
    pub fn retry_delay(&self) -> Option<Duration> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.retry_delay_at(now)
    }

    /// Delay until reset, relative to the given epoch time.
    ///
    /// Takes the larger of the two signals when both are present: the
    /// absolute reset time protects against client clock skew in one
    /// direction, the relative one in the other.
    pub fn retry_delay_at(&self, now_epoch: f64) -> Option<Duration> {
        let from_epoch = self.reset_at.map(|at| at - now_epoch);
        let secs = match (self.reset_after, from_epoch) {
            (Some(after), Some(until)) => after.max(until),
            (Some(after), None) => after,
            (None, Some(until)) => until,
            (None, None) => return None,
        };
        Some(Duration::from_secs_f64(secs.max(0.0)))
    }
}

/// Case-insensitive header lookup with lenient numeric parsing.
fn parse_value<T: std::str::FromStr>(headers: &HashMap<String, String>, name: &str) -> Option<T> {
    let raw = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(header = name, value = raw, "Unparseable rate-limit header");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_quota_unknown_has_capacity() {
        assert!(Quota::Unknown.has_capacity());
        assert!(!Quota::Probing.has_capacity());
        assert!(Quota::Known(1).has_capacity());
        assert!(!Quota::Known(0).has_capacity());
    }

    #[test]
    fn test_quota_decrement_saturates() {
        let mut q = Quota::Known(1);
        q.decrement();
        assert_eq!(q, Quota::Known(0));
        q.decrement();
        assert_eq!(q, Quota::Known(0));
    }

    #[test]
    fn test_unknown_holds_a_single_slot() {
        // The first send against an unknown count is the probe; a second
        // decrement must not open more capacity.
        let mut q = Quota::Unknown;
        q.decrement();
        assert_eq!(q, Quota::Probing);
        assert!(!q.has_capacity());
        q.decrement();
        assert_eq!(q, Quota::Probing);
    }

    #[test]
    fn test_parse_full_headers() {
        let parsed = RateLimitHeaders::parse(&headers(&[
            ("x-ratelimit-remaining", "4"),
            ("x-ratelimit-limit", "5"),
            ("x-ratelimit-reset", "1700000002.5"),
            ("x-ratelimit-reset-after", "2.5"),
        ]));
        assert_eq!(parsed.remaining, Some(4));
        assert_eq!(parsed.limit, Some(5));
        assert_eq!(parsed.reset_at, Some(1700000002.5));
        assert_eq!(parsed.reset_after, Some(2.5));
    }

    #[test]
    fn test_parse_case_insensitive() {
        let parsed = RateLimitHeaders::parse(&headers(&[("X-RateLimit-Remaining", "3")]));
        assert_eq!(parsed.remaining, Some(3));
    }

    #[test]
    fn test_parse_malformed_is_absent() {
        let parsed = RateLimitHeaders::parse(&headers(&[
            ("x-ratelimit-remaining", "not-a-number"),
            ("x-ratelimit-limit", "5"),
        ]));
        assert_eq!(parsed.remaining, None);
        assert_eq!(parsed.limit, Some(5));
    }

    #[test]
    fn test_empty_headers() {
        let parsed = RateLimitHeaders::parse(&headers(&[("content-type", "application/json")]));
        assert!(parsed.is_empty());
        assert_eq!(parsed.retry_delay(), None);
    }

    #[test]
    fn test_retry_delay_takes_larger_signal() {
        let h = RateLimitHeaders {
            reset_at: Some(1_000_003.0),
            reset_after: Some(1.0),
            ..Default::default()
        };
        // reset_at is 3s out, reset-after only 1s: take 3s.
        assert_eq!(h.retry_delay_at(1_000_000.0), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_retry_delay_clamps_past_reset() {
        let h = RateLimitHeaders {
            reset_at: Some(999_990.0),
            ..Default::default()
        };
        assert_eq!(h.retry_delay_at(1_000_000.0), Some(Duration::ZERO));
    }
}
