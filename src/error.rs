//! Contains the `Error` and `Result` types that `httpool` uses.

use std::sync::Arc;

use thiserror::Error;

use crate::origin::Origin;

/// The result type for all fallible methods in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur while acquiring, driving, or releasing a pooled connection.
///
/// The inner [`ErrorKind`] is boxed to keep `Error` small on the stack and wrapped so the
/// type stays `Clone`, since a single error may need to be observed by both the caller and
/// a tracing hook.
#[derive(Clone, Debug, Error)]
#[error("{kind}")]
#[non_exhaustive]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: Box<ErrorKind>,
    pub(crate) conn_id: Option<u64>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, conn_id: Option<u64>) -> Self {
        Self {
            kind: Box::new(kind),
            conn_id,
        }
    }

    /// The `conn_id` of the connection involved, if one was ever established.
    pub fn conn_id(&self) -> Option<u64> {
        self.conn_id
    }

    pub(crate) fn unsupported_protocol(scheme: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedProtocol { scheme: scheme.into() }, None)
    }

    pub(crate) fn pool_timeout(origin: Origin) -> Self {
        Self::new(ErrorKind::PoolTimeout { origin }, None)
    }

    pub(crate) fn connect_error(origin: Origin, cause: std::io::Error) -> Self {
        Self::new(
            ErrorKind::ConnectError {
                origin,
                cause: Arc::new(cause),
            },
            None,
        )
    }

    pub(crate) fn remote_protocol_error(message: impl Into<String>, conn_id: u64) -> Self {
        Self::new(
            ErrorKind::RemoteProtocolError {
                message: message.into(),
            },
            Some(conn_id),
        )
    }

    pub(crate) fn runtime(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::RuntimeError {
                message: message.into(),
            },
            None,
        )
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::InvalidConfig {
                message: message.into(),
            },
            None,
        )
    }

    pub(crate) fn io(cause: std::io::Error, conn_id: Option<u64>) -> Self {
        Self::new(ErrorKind::Io(Arc::new(cause)), conn_id)
    }

    /// True if this is the error raised when a waiter exceeds `timeout.pool`.
    pub fn is_pool_timeout(&self) -> bool {
        matches!(&*self.kind, ErrorKind::PoolTimeout { .. })
    }
}

/// The specific kind of error encapsulated by an [`Error`].
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The request's URL used a scheme other than `http` or `https`.
    #[error("unsupported protocol scheme: {scheme:?}")]
    UnsupportedProtocol {
        /// The rejected scheme.
        scheme: String,
    },

    /// A waiter's `timeout.pool` elapsed before a connection became available.
    #[error("timed out waiting for a connection to {origin}")]
    PoolTimeout {
        /// The origin the waiter was queued for.
        origin: Origin,
    },

    /// The network backend failed to establish TCP or TLS.
    #[error("failed to connect to {origin}: {cause}")]
    ConnectError {
        /// The origin that could not be reached.
        origin: Origin,
        /// The underlying I/O failure.
        #[source]
        cause: Arc<std::io::Error>,
    },

    /// The peer sent a malformed or unparsable HTTP/1.1 response.
    #[error("remote protocol error: {message}")]
    RemoteProtocolError {
        /// Description of the parse failure.
        message: String,
    },

    /// An operation was attempted that the current runtime state forbids (HTTP/2 negotiated,
    /// or the pool was closed while requests remained in flight).
    #[error("{message}")]
    RuntimeError {
        /// Description of the forbidden operation.
        message: String,
    },

    /// `PoolOptions` failed validation.
    #[error("invalid pool configuration: {message}")]
    InvalidConfig {
        /// Description of the invalid setting.
        message: String,
    },

    /// A bare I/O error not otherwise classified.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),
}
