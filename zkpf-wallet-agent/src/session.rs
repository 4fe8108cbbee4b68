//! Session validity rules and the clock they are evaluated against.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, Utc};

use crate::types::Session;

/// Absolute session lifetime.
pub const DEFAULT_SESSION_MAX_AGE_DAYS: i64 = 21;

/// Sliding inactivity window.
pub const DEFAULT_SESSION_IDLE_DAYS: i64 = 7;

// ═══════════════════════════════════════════════════════════════════════════════
// CLOCK
// ═══════════════════════════════════════════════════════════════════════════════

/// Source of "now" for validators.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock with millisecond resolution.
#[derive(Debug)]
pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(now.timestamp_millis()),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.millis.store(now.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.millis.load(Ordering::SeqCst))
            .unwrap_or_default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// POLICY
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of checking a session against the policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Valid,
    /// Older than the absolute lifetime.
    Expired,
    /// Unused for longer than the inactivity window.
    Idle,
}

impl SessionState {
    pub fn is_valid(self) -> bool {
        matches!(self, SessionState::Valid)
    }
}

/// Expiry windows for sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionPolicy {
    pub max_age: Duration,
    pub idle_timeout: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::days(DEFAULT_SESSION_MAX_AGE_DAYS),
            idle_timeout: Duration::days(DEFAULT_SESSION_IDLE_DAYS),
        }
    }
}

impl SessionPolicy {
    /// A session is valid iff `now - created_at < max_age` and
    /// `now - last_active < idle_timeout`. Both bounds are strict.
    pub fn assess(&self, session: &Session, now: DateTime<Utc>) -> SessionState {
        if now - session.created_at >= self.max_age {
            SessionState::Expired
        } else if now - session.last_active >= self.idle_timeout {
            SessionState::Idle
        } else {
            SessionState::Valid
        }
    }

    /// Earliest instant at which the session stops being valid.
    pub fn expires_at(&self, session: &Session) -> DateTime<Utc> {
        std::cmp::min(
            session.created_at + self.max_age,
            session.last_active + self.idle_timeout,
        )
    }
}
