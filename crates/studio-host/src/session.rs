//! Per-call execution context.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use studio_core::UserId;

/// The execution context the host attaches to every engine call.
///
/// `today` is the current date *in the caller's timezone* — delegation
/// expiry is compared against it, so the host is responsible for the
/// timezone conversion. `elevated` marks internal/system execution:
/// background maintenance and host automations run elevated and are
/// never gated by approvals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// The current user.
    pub user: UserId,
    /// Current date in the caller's timezone.
    pub today: NaiveDate,
    /// Whether this is an elevated (internal/system) context.
    pub elevated: bool,
}

impl Session {
    /// Create an ordinary user session dated today (UTC).
    #[must_use]
    pub fn user(user: UserId) -> Self {
        Self {
            user,
            today: Utc::now().date_naive(),
            elevated: false,
        }
    }

    /// Create an elevated (system) session dated today (UTC).
    #[must_use]
    pub fn elevated(user: UserId) -> Self {
        Self {
            user,
            today: Utc::now().date_naive(),
            elevated: true,
        }
    }

    /// Override the session date (host timezone conversion, tests).
    #[must_use]
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.elevated {
            write!(f, "{} (elevated)", self.user)
        } else {
            write!(f, "{}", self.user)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_flags() {
        let u = UserId::new();
        assert!(!Session::user(u).elevated);
        assert!(Session::elevated(u).elevated);
    }

    #[test]
    fn test_with_today() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let s = Session::user(UserId::new()).with_today(day);
        assert_eq!(s.today, day);
    }
}
