//! Driver and SQL operation errors

use crate::hook::HookError;

/// Failure reported by a backend primitive.
///
/// Carried inside `After*` hook results, so it must be cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("database error: {0}")]
    Database(String),

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("transaction is closed")]
    TransactionClosed,

    #[error("driver is closed")]
    DriverClosed,

    #[error("malformed statement: {0}")]
    MalformedStatement(String),
}

/// Error returned by every public driver, connection and transaction operation.
#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// A hook handler failed. When raised by an `After*` hook, the backend
    /// operation already ran and subscribers saw its real result.
    #[error(transparent)]
    Hook(#[from] HookError),

    /// An invalidation-dependent feature was used on an executor that never
    /// had a scope attached. Install the `InvalidationHandler` on the driver
    /// before acquiring connections or beginning transactions.
    #[error("no invalidation scope attached to this {0}; install the InvalidationHandler first")]
    MissingInvalidationScope(&'static str),
}

impl SqlError {
    /// The backend error, if this is one.
    pub fn as_driver(&self) -> Option<&DriverError> {
        match self {
            SqlError::Driver(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_hook_failure(&self) -> bool {
        matches!(self, SqlError::Hook(_))
    }
}
