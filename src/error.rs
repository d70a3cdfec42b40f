use std::io;

use thiserror::Error;

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by awaited operations.
///
/// Awaited calls never unwind; every outcome arrives as a `Result`.
/// `TimedOut` takes precedence over whatever error the cancelled
/// operation reports on its way out.
#[derive(Debug, Error)]
pub enum Error {
    /// The deadline of a timed yield expired before the operation finished.
    #[error("operation timed out")]
    TimedOut,

    /// The resource was stopped, closed or cancelled while the operation
    /// was pending.
    #[error("operation aborted")]
    Aborted,

    /// Error reported by the underlying operation, surfaced unchanged.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns true if this is the timeout outcome of a timed yield.
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Error::TimedOut)
    }

    /// Returns true if the operation was cancelled by a stop or close.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    use std::io;

    #[test]
    fn io_errors_convert_and_display_transparently() {
        let err: Error = io::Error::new(io::ErrorKind::AddrInUse, "port taken").into();

        assert!(!err.is_timed_out());
        assert!(!err.is_aborted());
        assert_eq!(err.to_string(), "port taken");
    }

    #[test]
    fn outcome_predicates_match_their_variant() {
        assert!(Error::TimedOut.is_timed_out());
        assert!(Error::Aborted.is_aborted());
        assert!(!Error::TimedOut.is_aborted());
    }
}
