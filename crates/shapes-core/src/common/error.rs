//! Error types shared by every service.
//!
//! This module defines the central `Error` enum, the closed set of outcomes a
//! call can fail with. Store, channel and transport failures are classified
//! into one of these variants at the service boundary, and `From<Error>` for
//! `tonic::Status` turns the variant into the status code the caller sees.
//!
//! ## Error Cases
//! - `InvalidArgument`: malformed identifier or request shape.
//! - `NotFound`: the referenced entity does not exist.
//! - `Internal`: store inconsistency or any other unexpected failure.
//! - `DeadlineExceeded`: the caller's deadline passed before the work finished.
//! - `RequestCancelled`: the caller (or the server on shutdown) aborted the
//!   call.
//! - `ChannelError`: a response could not be handed to the transport, usually
//!   because the caller went away.
//! - `ServiceShutdown`: the call arrived while the service was draining.

use std::sync::Arc;
use tonic::{Code, Status};

pub type Result<T> = core::result::Result<T, Error>;

/// Shared, clonable cause attached to [`Error::Internal`].
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Unified error type for every call shape.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// The request was malformed or referenced an unparsable identifier.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// The referenced entity is absent.
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// Unexpected failure; `source` keeps the underlying cause when there is
    /// one.
    #[error("Internal error: {context}")]
    Internal {
        context: String,
        #[source]
        source: Option<Cause>,
    },

    /// The deadline attached to the call passed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The call was aborted before it completed.
    #[error("Request cancelled")]
    RequestCancelled,

    /// Internal channel send/receive failure (e.g., closed channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn internal(context: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
            source: None,
        }
    }

    /// Builds an [`Error::Internal`] that keeps `source` as its cause.
    pub fn internal_with<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal {
            context: context.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Classifies a status received from the peer on an inbound stream.
    ///
    /// Cancellation and deadline codes keep their meaning; anything else the
    /// transport reports is an internal failure of this call.
    pub fn from_inbound(status: &Status) -> Self {
        match status.code() {
            Code::Cancelled => Self::RequestCancelled,
            Code::DeadlineExceeded => Self::DeadlineExceeded,
            _ => Self::internal(format!(
                "failed to receive message: {}",
                status.message()
            )),
        }
    }

    /// The status code this error is reported with.
    pub const fn code(&self) -> Code {
        match self {
            Self::InvalidArgument { .. } => Code::InvalidArgument,
            Self::NotFound { .. } => Code::NotFound,
            Self::Internal { .. } | Self::ChannelError { .. } => Code::Internal,
            Self::DeadlineExceeded => Code::DeadlineExceeded,
            Self::RequestCancelled => Code::Cancelled,
            Self::ServiceShutdown => Code::Unavailable,
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidArgument { reason } => Status::invalid_argument(reason),
            Error::NotFound { what } => Status::not_found(what),
            Error::Internal { context, .. } => Status::internal(context),
            Error::DeadlineExceeded => Status::deadline_exceeded("The client deadline was exceeded"),
            Error::RequestCancelled => Status::cancelled("Request was cancelled"),
            Error::ChannelError { context } => {
                Status::internal(format!("Channel error: {}", context))
            }
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn maps_every_kind_to_its_status_code() {
        let cases = [
            (Error::invalid_argument("bad id"), Code::InvalidArgument),
            (Error::not_found("doc"), Code::NotFound),
            (Error::internal("boom"), Code::Internal),
            (Error::DeadlineExceeded, Code::DeadlineExceeded),
            (Error::RequestCancelled, Code::Cancelled),
            (
                Error::ChannelError {
                    context: "closed".into(),
                },
                Code::Internal,
            ),
            (Error::ServiceShutdown, Code::Unavailable),
        ];

        for (err, code) in cases {
            assert_eq!(err.code(), code, "{err}");
            assert_eq!(Status::from(err).code(), code);
        }
    }

    #[test]
    fn internal_keeps_its_cause() {
        let io = std::io::Error::other("disk on fire");
        let err = Error::internal_with("insert failed", io);

        let source = err.source().expect("cause should be kept");
        assert_eq!(source.to_string(), "disk on fire");

        let status = Status::from(err);
        assert_eq!(status.message(), "insert failed");
    }

    #[test]
    fn inbound_status_is_classified() {
        assert!(matches!(
            Error::from_inbound(&Status::cancelled("gone")),
            Error::RequestCancelled
        ));
        assert!(matches!(
            Error::from_inbound(&Status::deadline_exceeded("late")),
            Error::DeadlineExceeded
        ));
        assert_eq!(
            Error::from_inbound(&Status::unknown("h2 reset")).code(),
            Code::Internal
        );
    }
}
