//! Validity windows of issued certificates.

use time::{OffsetDateTime, macros::datetime};

use crate::error::IssueError;

/// End date used when none is requested.
pub const DEFAULT_END_DATE: OffsetDateTime = datetime!(2049-12-31 23:23:59 UTC);

/// When an issued certificate stops being valid.
///
/// Certificates are always valid from the moment they are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// Valid until this instant.
    Until(OffsetDateTime),
    /// Valid for this many days from issuance.
    Days(u32),
}

impl Default for Validity {
    fn default() -> Self {
        Validity::Until(DEFAULT_END_DATE)
    }
}

impl Validity {
    /// The end of the validity window of a certificate issued at `now`.
    pub fn not_after(&self, now: OffsetDateTime) -> Result<OffsetDateTime, IssueError> {
        let end = match *self {
            Validity::Until(end) => end,
            Validity::Days(0) => return Err(IssueError::InvalidValidity),
            Validity::Days(days) => now
                .checked_add(time::Duration::days(days.into()))
                .ok_or(IssueError::InvalidValidity)?,
        };
        if end <= now {
            return Err(IssueError::InvalidValidity);
        }
        Ok(end)
    }
}

/// Whole days from `from` to `until`, negative if `until` comes first.
pub fn days_between(from: OffsetDateTime, until: OffsetDateTime) -> i64 {
    (until - from).whole_days()
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn days_from_now() {
        let now = datetime!(2024-02-27 12:00 UTC);
        let end = Validity::Days(10).not_after(now).unwrap();
        assert_eq!(end, datetime!(2024-03-08 12:00 UTC));
        assert_eq!(days_between(now, end), 10);
    }

    #[test]
    fn default_ends_in_2049() {
        let now = datetime!(2024-01-01 0:00 UTC);
        let end = Validity::default().not_after(now).unwrap();
        assert_eq!(end, DEFAULT_END_DATE);
        assert_eq!(end.year(), 2049);
    }

    #[test]
    fn empty_windows_are_rejected() {
        let now = datetime!(2024-01-01 0:00 UTC);
        assert!(matches!(
            Validity::Days(0).not_after(now),
            Err(IssueError::InvalidValidity)
        ));
        assert!(matches!(
            Validity::Until(now).not_after(now),
            Err(IssueError::InvalidValidity)
        ));
        assert!(matches!(
            Validity::Until(datetime!(2000-01-01 0:00 UTC)).not_after(now),
            Err(IssueError::InvalidValidity)
        ));
    }

    #[test]
    fn days_between_partial_days() {
        let from = datetime!(2024-01-01 0:00 UTC);
        assert_eq!(days_between(from, datetime!(2024-01-02 23:59 UTC)), 1);
        assert_eq!(days_between(from, datetime!(2023-12-30 0:00 UTC)), -2);
    }
}
