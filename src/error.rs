//! Closed error taxonomy and the thread-local "last error" slot.
//!
//! Every public entry point in [`crate::control`] returns `Result<T, Error>`; none
//! panics on a caller-reachable path. [`Error::status`] recovers the status-code
//! view for callers that want the taxonomy value on its own, mirroring the
//! C original's status-return convention without forcing Rust callers off `Result`.

use std::cell::RefCell;

use thiserror::Error as ThisError;

/// The closed status taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Status {
    Success = 0,
    Error = 1,
    InvalidArgument = 2,
    InvalidDomainId = 3,
    NotImplemented = 4,
    DefaultPoolAlreadyDefined = 5,
    DefaultPoolUndefined = 6,
    MismatchedExternalCorrelationId = 7,
    MemoryAllocation = 8,
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("{0}")]
    Generic(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid domain id")]
    InvalidDomainId,
    #[error("operation not implemented for this domain")]
    NotImplemented,
    #[error("default pool already defined")]
    DefaultPoolAlreadyDefined,
    #[error("default pool undefined")]
    DefaultPoolUndefined,
    #[error("mismatched external correlation id")]
    MismatchedExternalCorrelationId,
    #[error("memory allocation failed: {0}")]
    MemoryAllocation(String),
}

impl Error {
    pub fn status(&self) -> Status {
        match self {
            Error::Generic(_) => Status::Error,
            Error::InvalidArgument(_) => Status::InvalidArgument,
            Error::InvalidDomainId => Status::InvalidDomainId,
            Error::NotImplemented => Status::NotImplemented,
            Error::DefaultPoolAlreadyDefined => Status::DefaultPoolAlreadyDefined,
            Error::DefaultPoolUndefined => Status::DefaultPoolUndefined,
            Error::MismatchedExternalCorrelationId => Status::MismatchedExternalCorrelationId,
            Error::MemoryAllocation(_) => Status::MemoryAllocation,
        }
    }
}

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Records `e`'s message into the calling thread's last-error slot and returns it
/// unchanged, so call sites can write `return Err(record(e))`.
pub(crate) fn record(e: Error) -> Error {
    log::error!("{e}");
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(e.to_string()));
    e
}

/// The last error message recorded on the calling thread, or `""` if none.
pub fn error_string() -> String {
    LAST_ERROR.with(|slot| slot.borrow().clone().unwrap_or_default())
}

#[cfg(any(test, feature = "test-support"))]
pub(crate) fn reset_for_test() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_string_is_empty_until_an_error_is_recorded() {
        reset_for_test();
        assert_eq!(error_string(), "");
        let e = record(Error::DefaultPoolUndefined);
        assert_eq!(e.status(), Status::DefaultPoolUndefined);
        assert_eq!(error_string(), "default pool undefined");
    }

    #[test]
    fn record_overwrites_the_previous_message() {
        reset_for_test();
        record(Error::InvalidDomainId);
        assert_eq!(error_string(), "invalid domain id");
        record(Error::NotImplemented);
        assert_eq!(error_string(), "operation not implemented for this domain");
    }
}
