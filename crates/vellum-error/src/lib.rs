//! Error types for VellumDB.
//!
//! Every fallible operation in the engine returns [`Result`]. Errors carry a
//! stable [`ErrorKind`] so callers can branch on the failure class without
//! matching on individual variants: parsers raise `Parse`/`ParseSql`,
//! the executor raises `QueryExec`, cancellation surfaces as `Cancel` and is
//! distinguished from genuine failure.

use thiserror::Error;

/// Stable classification of an error, independent of the variant payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid parameters supplied by the caller.
    Params,
    /// An operation that is not legal in the current state.
    Logic,
    /// Generic parse failure (JSON, DSL, item data).
    Parse,
    /// SQL text could not be parsed.
    ParseSql,
    /// Binary record could not be decoded.
    ParseBin,
    /// A named entity (namespace, index, meta key) does not exist.
    NotFound,
    /// An entity exists but is not usable for the requested operation.
    NotValid,
    /// The request conflicts with existing state.
    Conflict,
    /// The operation is forbidden for this namespace.
    Forbidden,
    /// Failure while executing a query.
    QueryExec,
    /// A cached handle refers to state that has been invalidated.
    StateInvalidated,
    /// The namespace was replaced or dropped under the caller.
    NamespaceInvalidated,
    /// Structural merge of tags matchers failed.
    TagsMismatch,
    /// The operation observed a cancellation request or deadline.
    Cancel,
    /// The storage backend reported an I/O failure.
    Storage,
}

/// Primary error type for VellumDB operations.
#[derive(Error, Debug)]
pub enum VellumError {
    /// Invalid parameters supplied by the caller.
    #[error("invalid parameters: {0}")]
    Params(String),

    /// An operation that is not legal in the current state.
    #[error("logic error: {0}")]
    Logic(String),

    /// Generic parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// SQL syntax error at a known position.
    #[error("SQL parse error at or near '{token}' (byte {offset}): {detail}")]
    ParseSql {
        token: String,
        offset: usize,
        detail: String,
    },

    /// Binary record decode failure.
    #[error("binary parse error: {0}")]
    ParseBin(String),

    /// No such namespace.
    #[error("namespace '{name}' does not exist")]
    NamespaceNotFound { name: String },

    /// No such index in the namespace.
    #[error("index '{index}' not found in namespace '{ns}'")]
    IndexNotFound { ns: String, index: String },

    /// A named entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An entity exists but is unusable for the requested operation.
    #[error("not valid: {0}")]
    NotValid(String),

    /// The request conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The operation is forbidden for this namespace.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Failure while executing a query.
    #[error("query execution failed: {0}")]
    QueryExec(String),

    /// A cached handle refers to invalidated state; callers may retry.
    #[error("state invalidated: {0}")]
    StateInvalidated(String),

    /// The namespace was replaced or dropped under the caller.
    #[error("namespace '{name}' was invalidated")]
    NamespaceInvalidated { name: String },

    /// Structural merge of tags matchers failed; the item is rejected.
    #[error("tags matcher mismatch: {0}")]
    TagsMismatch(String),

    /// The operation observed a cancellation request or deadline.
    #[error("operation canceled")]
    Canceled,

    /// The operation ran past its deadline.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The storage backend reported a failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl VellumError {
    /// The stable kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Params(_) => ErrorKind::Params,
            Self::Logic(_) => ErrorKind::Logic,
            Self::Parse(_) => ErrorKind::Parse,
            Self::ParseSql { .. } => ErrorKind::ParseSql,
            Self::ParseBin(_) => ErrorKind::ParseBin,
            Self::NamespaceNotFound { .. } | Self::IndexNotFound { .. } | Self::NotFound(_) => {
                ErrorKind::NotFound
            }
            Self::NotValid(_) => ErrorKind::NotValid,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::QueryExec(_) => ErrorKind::QueryExec,
            Self::StateInvalidated(_) => ErrorKind::StateInvalidated,
            Self::NamespaceInvalidated { .. } => ErrorKind::NamespaceInvalidated,
            Self::TagsMismatch(_) => ErrorKind::TagsMismatch,
            Self::Canceled | Self::DeadlineExceeded => ErrorKind::Cancel,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// True when the error is a cancellation, not a failure.
    #[must_use]
    pub const fn is_cancel(&self) -> bool {
        matches!(self.kind(), ErrorKind::Cancel)
    }
}

impl From<std::io::Error> for VellumError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result alias used across all VellumDB crates.
pub type Result<T> = std::result::Result<T, VellumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            VellumError::Params("bad".into()).kind(),
            ErrorKind::Params
        );
        assert_eq!(
            VellumError::NamespaceNotFound { name: "ns".into() }.kind(),
            ErrorKind::NotFound
        );
        assert_eq!(VellumError::Canceled.kind(), ErrorKind::Cancel);
        assert_eq!(VellumError::DeadlineExceeded.kind(), ErrorKind::Cancel);
    }

    #[test]
    fn test_cancel_is_not_failure() {
        assert!(VellumError::Canceled.is_cancel());
        assert!(!VellumError::QueryExec("boom".into()).is_cancel());
    }

    #[test]
    fn test_display_messages() {
        let err = VellumError::ParseSql {
            token: "WHRE".into(),
            offset: 17,
            detail: "expected WHERE".into(),
        };
        assert_eq!(
            err.to_string(),
            "SQL parse error at or near 'WHRE' (byte 17): expected WHERE"
        );
    }
}
