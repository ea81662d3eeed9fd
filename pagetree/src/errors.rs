use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;
use std::sync::Arc;

/// Error kinds for tree and container operations.
///
/// The kinds follow the failure taxonomy of the tree core: configuration
/// problems are reported where they are detected, invariant violations abort
/// the running operation, unsupported operations are documented API
/// restrictions, and container I/O failures propagate unmodified.
///
/// # Examples
///
/// ```rust
/// use pagetree::errors::{ErrorKind, PageTreeError, PageTreeResult};
///
/// fn example() -> PageTreeResult<()> {
///     Err(PageTreeError::new("minimum capacity must be positive", ErrorKind::Configuration))
/// }
///
/// assert_eq!(example().unwrap_err().kind(), &ErrorKind::Configuration);
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    /// Invalid construction parameters (capacity bounds, missing functions, ...)
    Configuration,
    /// A structural invariant of the tree or one of its side structures broke
    InvariantViolation,
    /// The operation is a documented restriction of the tree variant
    UnsupportedOperation,
    /// The operation is not valid in the current state (e.g. version went backwards)
    InvalidOperation,
    /// A node or entry id is not known to the container
    NotFound,
    /// Generic IO error from a container
    IOError,
    /// Error encoding or decoding a node or header
    EncodingError,
    /// Stored data failed verification (bad magic, checksum mismatch)
    Corrupted,
    /// The container has already been closed
    StoreClosed,
    /// Internal error (usually indicates a bug)
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "Configuration error"),
            ErrorKind::InvariantViolation => write!(f, "Invariant violation"),
            ErrorKind::UnsupportedOperation => write!(f, "Unsupported operation"),
            ErrorKind::InvalidOperation => write!(f, "Invalid operation"),
            ErrorKind::NotFound => write!(f, "Not found"),
            ErrorKind::IOError => write!(f, "IO error"),
            ErrorKind::EncodingError => write!(f, "Encoding error"),
            ErrorKind::Corrupted => write!(f, "Corrupted data"),
            ErrorKind::StoreClosed => write!(f, "Store closed"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Error type of the tree core.
///
/// `PageTreeError` carries a message, an [`ErrorKind`], an optional cause and
/// the backtrace captured where it was created.
///
/// # Examples
///
/// ```rust
/// use pagetree::errors::{ErrorKind, PageTreeError};
///
/// let cause = PageTreeError::new("short read", ErrorKind::IOError);
/// let err = PageTreeError::new_with_cause("cannot load node 7", ErrorKind::IOError, cause);
/// assert!(err.cause().is_some());
/// ```
#[derive(Clone)]
pub struct PageTreeError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<PageTreeError>>,
    backtrace: Arc<Backtrace>,
}

impl PageTreeError {
    /// Creates a new error with the given message and kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        PageTreeError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: Arc::new(Backtrace::new()),
        }
    }

    /// Creates a new error that wraps the error which caused it.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: PageTreeError) -> Self {
        PageTreeError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: Arc::new(Backtrace::new()),
        }
    }

    /// Shorthand for an [`ErrorKind::InvariantViolation`] error.
    pub fn invariant(message: &str) -> Self {
        PageTreeError::new(message, ErrorKind::InvariantViolation)
    }

    /// Shorthand for an [`ErrorKind::Configuration`] error.
    pub fn configuration(message: &str) -> Self {
        PageTreeError::new(message, ErrorKind::Configuration)
    }

    /// Shorthand for an [`ErrorKind::UnsupportedOperation`] error.
    pub fn unsupported(message: &str) -> Self {
        PageTreeError::new(message, ErrorKind::UnsupportedOperation)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&PageTreeError> {
        self.cause.as_deref()
    }
}

impl Display for PageTreeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for PageTreeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{} ({})\nCaused by: {:?}", self.message, self.error_kind, cause),
            None => write!(f, "{} ({})\n{:?}", self.message, self.error_kind, self.backtrace),
        }
    }
}

impl Error for PageTreeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// Result alias used by every fallible operation of the crate.
pub type PageTreeResult<T> = Result<T, PageTreeError>;

impl From<std::io::Error> for PageTreeError {
    fn from(err: std::io::Error) -> Self {
        let error_kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::InvalidData => ErrorKind::Corrupted,
            _ => ErrorKind::IOError,
        };
        PageTreeError::new(&format!("IO error: {}", err), error_kind)
    }
}

impl From<bincode::error::EncodeError> for PageTreeError {
    fn from(err: bincode::error::EncodeError) -> Self {
        PageTreeError::new(&format!("Encoding error: {}", err), ErrorKind::EncodingError)
    }
}

impl From<bincode::error::DecodeError> for PageTreeError {
    fn from(err: bincode::error::DecodeError) -> Self {
        PageTreeError::new(&format!("Decoding error: {}", err), ErrorKind::EncodingError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_new_creates_error() {
        let error = PageTreeError::new("An error occurred", ErrorKind::IOError);
        assert_eq!(error.message(), "An error occurred");
        assert_eq!(error.kind(), &ErrorKind::IOError);
        assert!(error.cause().is_none());
        assert!(error.source().is_none());
    }

    #[test]
    fn error_with_cause_exposes_source() {
        let cause = PageTreeError::new("short read", ErrorKind::IOError);
        let error = PageTreeError::new_with_cause("cannot load node", ErrorKind::IOError, cause);
        assert!(error.cause().is_some());
        assert!(error.source().is_some());
        let formatted = format!("{:?}", error);
        assert!(formatted.contains("cannot load node"));
        assert!(formatted.contains("Caused by:"));
    }

    #[test]
    fn error_display_is_message_only() {
        let error = PageTreeError::invariant("heap and map sizes differ");
        assert_eq!(format!("{}", error), "heap and map sizes differ");
        assert_eq!(error.kind(), &ErrorKind::InvariantViolation);
    }

    #[test]
    fn shorthand_constructors_set_kind() {
        assert_eq!(PageTreeError::configuration("x").kind(), &ErrorKind::Configuration);
        assert_eq!(PageTreeError::unsupported("x").kind(), &ErrorKind::UnsupportedOperation);
    }

    #[test]
    fn io_error_conversion_keeps_category() {
        let not_found: PageTreeError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert_eq!(not_found.kind(), &ErrorKind::NotFound);

        let invalid: PageTreeError =
            std::io::Error::new(std::io::ErrorKind::InvalidData, "checksum").into();
        assert_eq!(invalid.kind(), &ErrorKind::Corrupted);

        let other: PageTreeError = std::io::Error::other("boom").into();
        assert_eq!(other.kind(), &ErrorKind::IOError);
        assert!(other.message().contains("boom"));
    }

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::UnsupportedOperation.to_string(), "Unsupported operation");
        assert_eq!(ErrorKind::StoreClosed.to_string(), "Store closed");
    }
}
