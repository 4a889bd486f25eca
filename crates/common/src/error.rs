//! Error taxonomy for the MEW gateway.

use thiserror::Error;

use crate::capability::CapabilityPattern;
use crate::payload::ErrorPayload;

/// Errors the core raises. Every variant but `Internal` and
/// `BackpressureDisconnect` surfaces as a `system/error` envelope to the
/// responsible participant; the latter two close the connection outright
/// instead of sending a frame that would just be dropped.
#[derive(Debug, Error)]
pub enum MewError {
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("identity mismatch: claimed from={claimed}, authenticated as={authenticated}")]
    IdentityMismatch { claimed: String, authenticated: String },

    #[error("system namespace violation: participants may not send kind {0}")]
    SystemNamespaceViolation(String),

    #[error("capability violation: no capability permits kind {attempted_kind}")]
    CapabilityViolation {
        attempted_kind: String,
        current_capabilities: Vec<CapabilityPattern>,
    },

    #[error("delegation violation: granter lacks a capability it attempted to grant")]
    DelegationViolation,

    #[error("backpressure disconnect: outbound queue exceeded its bound")]
    BackpressureDisconnect,

    #[error("auth failure: {0}")]
    AuthFailure(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("invalid capability pattern: {0}")]
    InvalidCapability(String),
}

impl MewError {
    /// The wire-level error class string used in `system/error` payloads
    /// and in the capability-decisions audit log.
    pub fn error_class(&self) -> &'static str {
        match self {
            MewError::InvalidEnvelope(_) => "invalid_envelope",
            MewError::PayloadTooLarge { .. } => "payload_too_large",
            MewError::IdentityMismatch { .. } => "identity_mismatch",
            MewError::SystemNamespaceViolation(_) => "system_namespace_violation",
            MewError::CapabilityViolation { .. } => "capability_violation",
            MewError::DelegationViolation => "delegation_violation",
            MewError::BackpressureDisconnect => "backpressure_disconnect",
            MewError::AuthFailure(_) => "auth_failure",
            MewError::Internal(_) => "internal_error",
            MewError::InvalidCapability(_) => "invalid_capability",
        }
    }

    /// Build the `system/error` payload the gateway sends to the
    /// responsible participant. `verbose` controls whether the full
    /// current capability set is attached (gateway config
    /// `verbose_rejections`).
    pub fn to_error_payload(&self, verbose: bool) -> ErrorPayload {
        let (attempted_kind, current_capabilities) = match self {
            MewError::CapabilityViolation {
                attempted_kind,
                current_capabilities,
            } => (
                Some(attempted_kind.clone()),
                verbose.then(|| current_capabilities.clone()),
            ),
            MewError::SystemNamespaceViolation(kind) => (Some(kind.clone()), None),
            _ => (None, None),
        };

        ErrorPayload {
            error: self.error_class().to_string(),
            message: Some(self.to_string()),
            attempted_kind,
            your_capabilities: current_capabilities,
        }
    }
}
