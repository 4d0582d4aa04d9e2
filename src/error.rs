// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Protocol-visible error kinds.
//!
//! Handlers catch these at the reply boundary and translate them to LSP
//! `ResponseError` values. Everything else is wrapped in [`Error::Unknown`].

use lsp_types::Range;
use thiserror::Error;

use crate::protocol::ResponseError;

/// JSON-RPC error code for a cancelled request, per the LSP spec.
pub const CODE_REQUEST_CANCELLED: i64 = -32800;
/// JSON-RPC error code for `MethodNotFound`.
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC error code for `InvalidParams`.
pub const CODE_INVALID_PARAMS: i64 = -32602;
/// JSON-RPC error code for `InternalError`.
pub const CODE_INTERNAL_ERROR: i64 = -32603;
/// JSON-RPC error code for a generic request failure.
pub const CODE_REQUEST_FAILED: i64 = -32803;

/// Failure kinds surfaced to the editor.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A request referenced a URI with no workspace routing.
    #[error("no workspace contains document {0}")]
    WorkspaceNotOpen(String),

    /// An edit referenced a range outside the document.
    #[error("invalid range {}:{}-{}:{}", .0.start.line, .0.start.character, .0.end.line, .0.end.character)]
    InvalidRange(Range),

    /// A document operation referenced a URI that is not open.
    #[error("document is not open: {0}")]
    NotOpen(String),

    /// An edit carried a version not greater than the current one.
    #[error("stale document version {got} (current {current}) for {uri}")]
    StaleVersion {
        /// The document the edit targeted.
        uri: String,
        /// The version the edit carried.
        got: i32,
        /// The version currently held.
        current: i32,
    },

    /// The request method is not implemented.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// A backend reply violated the protocol shape.
    #[error("internal error: {0}")]
    Internal(String),

    /// A backend reported a failure we can only relay.
    #[error("{0}")]
    Unknown(String),

    /// The task was cancelled by the client.
    #[error("request cancelled")]
    Cancelled,

    /// The backend lacks a capability this operation requires.
    #[error("backend does not support {0}")]
    VersionNotSupported(String),
}

impl Error {
    /// The JSON-RPC error code this kind maps to.
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::MethodNotFound(_) => CODE_METHOD_NOT_FOUND,
            Self::InvalidRange(_) | Self::StaleVersion { .. } => CODE_INVALID_PARAMS,
            Self::Internal(_) => CODE_INTERNAL_ERROR,
            Self::Cancelled => CODE_REQUEST_CANCELLED,
            Self::WorkspaceNotOpen(_)
            | Self::NotOpen(_)
            | Self::Unknown(_)
            | Self::VersionNotSupported(_) => CODE_REQUEST_FAILED,
        }
    }
}

impl From<Error> for ResponseError {
    fn from(err: Error) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            data: None,
        }
    }
}

/// Convenience alias used throughout the request path.
pub type Result<T> = std::result::Result<T, Error>;

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        // A typed kind buried in an anyhow chain keeps its code.
        match err.downcast::<Self>() {
            Ok(typed) => typed,
            Err(other) => Self::Unknown(format!("{other:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::Position;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::MethodNotFound("x".into()).code(),
            CODE_METHOD_NOT_FOUND
        );
        assert_eq!(Error::Cancelled.code(), CODE_REQUEST_CANCELLED);
        assert_eq!(Error::Internal("x".into()).code(), CODE_INTERNAL_ERROR);
        assert_eq!(
            Error::WorkspaceNotOpen("file:///a".into()).code(),
            CODE_REQUEST_FAILED
        );
        let range = Range::new(Position::new(0, 0), Position::new(0, 1));
        assert_eq!(Error::InvalidRange(range).code(), CODE_INVALID_PARAMS);
    }

    #[test]
    fn test_anyhow_downcast_preserves_kind() {
        let inner: anyhow::Error = Error::Cancelled.into();
        let back: Error = inner.into();
        assert!(matches!(back, Error::Cancelled));
    }

    #[test]
    fn test_anyhow_opaque_becomes_unknown() {
        let err: Error = anyhow::anyhow!("backend exploded").into();
        match err {
            Error::Unknown(msg) => assert!(msg.contains("backend exploded")),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn test_response_error_conversion() {
        let resp: ResponseError = Error::VersionNotSupported("rename ranges".into()).into();
        assert_eq!(resp.code, CODE_REQUEST_FAILED);
        assert!(resp.message.contains("rename ranges"));
    }
}
