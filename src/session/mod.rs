//! Broker session state.
//!
//! A session is the authenticated state held between a login and the next
//! token expiry. Every supported Indian broker invalidates access tokens at
//! midnight IST regardless of when they were issued, so session expiry is
//! computed against that clock rather than a vendor-supplied TTL.
//!
//! The lifecycle is a small state machine:
//!
//! ```text
//! NEW --login()--> AUTHENTICATED --refresh()--> AUTHENTICATED
//!                        |                              |
//!                        +--is_expired()--> EXPIRED ----+
//!                                               |
//!                                               +--login()--> AUTHENTICATED
//! ```
//!
use chrono::{DateTime, FixedOffset, Utc};
use secrecy::Secret;

pub mod store;

pub use store::{FileSessionStore, MemorySessionStore, SessionStore};

/// Indian Standard Time (+05:30). No DST.
pub(crate) fn ist_offset() -> FixedOffset {
    FixedOffset::east_opt(5 * 3600 + 30 * 60).expect("IST offset is in range")
}

/// The next 00:00 IST, as a UTC instant.
///
/// All supported brokers expire tokens at local midnight, so this is the
/// `expires_at` for every freshly obtained session.
pub fn next_midnight_ist() -> DateTime<Utc> {
    next_midnight_ist_after(Utc::now())
}

pub(crate) fn next_midnight_ist_after(now: DateTime<Utc>) -> DateTime<Utc> {
    let ist = ist_offset();
    let now_ist = now.with_timezone(&ist);
    let tomorrow = now_ist
        .date_naive()
        .succ_opt()
        .expect("date range exhausted")
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time");
    tomorrow
        .and_local_timezone(ist)
        .single()
        .expect("fixed offsets are unambiguous")
        .with_timezone(&Utc)
}

/// The live auth state for one broker session.
///
/// Tokens are held behind [`Secret`] so they never leak through `Debug`
/// output; header construction exposes them explicitly at the call site.
#[derive(Debug, Clone)]
pub struct SessionData {
    pub access_token: Secret<String>,
    /// Renewal token, for brokers whose sessions can be refreshed without a
    /// full login (AngelOne).
    pub refresh_token: Option<Secret<String>>,
    /// Separate market-data token, for brokers that issue one (AngelOne).
    pub feed_token: Option<Secret<String>>,
    pub obtained_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionData {
    /// Build a session obtained now and valid until the next midnight IST.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        feed_token: Option<String>,
    ) -> Self {
        Self {
            access_token: Secret::new(access_token.into()),
            refresh_token: refresh_token.map(Secret::new),
            feed_token: feed_token.map(Secret::new),
            obtained_at: Utc::now(),
            expires_at: next_midnight_ist(),
        }
    }

    /// A session is expired once the current time reaches `expires_at`.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use secrecy::ExposeSecret;

    #[test]
    fn next_midnight_is_1830_utc() {
        // 2026-02-21 10:00 UTC == 15:30 IST; next IST midnight is
        // 2026-02-21 18:30 UTC.
        let now = Utc.with_ymd_and_hms(2026, 2, 21, 10, 0, 0).unwrap();
        let expiry = next_midnight_ist_after(now);
        assert_eq!(expiry, Utc.with_ymd_and_hms(2026, 2, 21, 18, 30, 0).unwrap());
    }

    #[test]
    fn next_midnight_rolls_past_utc_date_boundary() {
        // 2026-02-21 20:00 UTC is already 2026-02-22 01:30 IST, so the next
        // IST midnight lands on the 22nd at 18:30 UTC.
        let now = Utc.with_ymd_and_hms(2026, 2, 21, 20, 0, 0).unwrap();
        let expiry = next_midnight_ist_after(now);
        assert_eq!(expiry, Utc.with_ymd_and_hms(2026, 2, 22, 18, 30, 0).unwrap());
    }

    #[test]
    fn fresh_session_is_not_expired() {
        let session = SessionData::new("token", None, None);
        assert!(!session.is_expired());
        assert!(session.expires_at > session.obtained_at);
    }

    #[test]
    fn past_expiry_reads_as_expired() {
        let mut session = SessionData::new("token", None, None);
        session.expires_at = Utc::now() - Duration::seconds(1);
        assert!(session.is_expired());
    }

    #[test]
    fn tokens_do_not_leak_through_debug() {
        let session = SessionData::new("super-secret-token", None, None);
        let debugged = format!("{:?}", session);
        assert!(!debugged.contains("super-secret-token"));
        assert_eq!(session.access_token.expose_secret(), "super-secret-token");
    }
}
