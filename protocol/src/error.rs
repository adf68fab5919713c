//! # Gateway Error Taxonomy
//!
//! One request-level error type, [`SessionError`], that every orchestrator
//! operation funnels into, built from the narrow per-module errors.
//!
//! The taxonomy matters because the propagation policy differs per class:
//! validation and lookup failures go back to the caller in the clear,
//! while anything that happens after a client public key is known must be
//! sealed before it leaves the process. The orchestrator makes that call;
//! this module only classifies and maps to HTTP status codes.

use thiserror::Error;

use crate::crypto::envelope::EnvelopeError;
use crate::crypto::keys::KeyError;
use crate::store::keys::CustodyError;
use crate::store::DbError;
use crate::upstream::UpstreamError;

/// Request-level failure classes for the transaction protocol.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A business field is missing or malformed. Local and user-correctable.
    #[error("{0}")]
    Validation(String),

    /// No transaction or key record matches the presented identifier.
    #[error("Transaction not found")]
    NotFound(String),

    /// The identifier inside the decrypted payload does not match the one
    /// the envelope was addressed with. Treated as hostile input.
    #[error("Mismatched page ID")]
    MismatchedPageId,

    /// The inbound envelope failed to open. Never retried.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Key custody failure: missing stub, missing keys, or corrupted
    /// protected material.
    #[error(transparent)]
    Custody(#[from] CustodyError),

    /// RSA key generation or PEM serialization failure.
    #[error(transparent)]
    Keys(#[from] KeyError),

    /// Persistence unavailable. Fatal for the request.
    #[error("storage error: {0}")]
    Store(#[from] DbError),

    /// The upstream processor answered non-2xx or could not be reached.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl SessionError {
    /// The HTTP status code this failure maps to at the edge.
    ///
    /// Upstream statuses pass through so the client sees what the
    /// processor said; transport failures become 502.
    pub fn http_status(&self) -> u16 {
        match self {
            SessionError::Validation(_) => 400,
            SessionError::NotFound(_) => 404,
            SessionError::MismatchedPageId => 400,
            SessionError::Envelope(_) => 400,
            SessionError::Custody(e) => match e {
                CustodyError::NotFound(_) => 404,
                CustodyError::MissingKeys => 400,
                _ => 500,
            },
            SessionError::Keys(_) => 500,
            SessionError::Store(_) => 500,
            SessionError::Upstream(UpstreamError::Status { status, .. }) => *status,
            SessionError::Upstream(UpstreamError::Transport(_)) => 502,
        }
    }

    /// The message exposed to the caller.
    ///
    /// Internal failure classes deliberately collapse to a generic string;
    /// the detail goes to the logs, not over the wire.
    pub fn public_message(&self) -> String {
        match self {
            SessionError::Validation(msg) => msg.clone(),
            SessionError::NotFound(_) => "Transaction not found".into(),
            SessionError::MismatchedPageId => "Mismatched page ID".into(),
            SessionError::Envelope(_) => "Invalid encrypted payload".into(),
            SessionError::Custody(CustodyError::NotFound(_)) => "Transaction not found".into(),
            SessionError::Custody(CustodyError::MissingKeys) => "Missing encryption keys".into(),
            SessionError::Upstream(UpstreamError::Status { message, .. }) => message.clone(),
            SessionError::Upstream(UpstreamError::Transport(_)) => "Upstream unreachable".into(),
            _ => "Internal server error".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(SessionError::Validation("bad".into()).http_status(), 400);
        assert_eq!(SessionError::NotFound("x".into()).http_status(), 404);
        assert_eq!(SessionError::MismatchedPageId.http_status(), 400);
        assert_eq!(
            SessionError::Custody(CustodyError::MissingKeys).http_status(),
            400
        );
        assert_eq!(
            SessionError::Upstream(UpstreamError::Status {
                status: 503,
                message: "maintenance".into(),
            })
            .http_status(),
            503
        );
        assert_eq!(
            SessionError::Upstream(UpstreamError::Transport("refused".into())).http_status(),
            502
        );
    }

    #[test]
    fn test_internal_detail_is_not_exposed() {
        let err = SessionError::Store(DbError::Serialization("bincode exploded".into()));
        assert_eq!(err.public_message(), "Internal server error");
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn test_validation_message_passes_through() {
        let err = SessionError::Validation("Invalid merchant phone number".into());
        assert_eq!(err.public_message(), "Invalid merchant phone number");
    }
}
