//! Typed payload shapes for kinds the gateway itself interprets.
//!
//! The core deliberately does not validate payload *contents* in general -
//! these types exist only for the handful of kinds whose payload the
//! gateway must read to drive its own state machines (capability mutation,
//! proposal lifecycle, membership, system replies). Everything else stays
//! an opaque `serde_json::Value`.

use serde::{Deserialize, Serialize};

use crate::capability::CapabilityPattern;

/// Free-form human chat (`chat`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPayload {
    pub text: String,
}

/// `capability/grant` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantPayload {
    pub recipient: String,
    pub capabilities: Vec<CapabilityPattern>,
}

/// `capability/revoke` payload. Exactly one of `grant_id` / `pattern`
/// should be set; if both are, both selectors are applied (union of what
/// they each remove).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RevokePayload {
    pub recipient: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<CapabilityPattern>,
}

/// `capability/grant-ack` payload - acknowledges receipt of a grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantAckPayload {
    pub grant_envelope_id: String,
}

/// `mcp/reject` payload. `reason` is a standardised code; the core passes
/// it through without validating its value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectPayload {
    pub reason: String,
}

/// `space/invite` payload. Per DESIGN.md this is treated as informational
/// only - it does not mutate the Capability Registry or Connection Table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitePayload {
    pub participant: String,
    #[serde(default)]
    pub tokens: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<CapabilityPattern>,
}

/// `space/kick` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KickPayload {
    pub participant: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `system/welcome` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomePayload {
    pub you: WelcomeSelf,
    pub participants: Vec<ParticipantSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomeSelf {
    pub id: String,
    pub capabilities: Vec<CapabilityPattern>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub id: String,
}

/// `system/presence` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresencePayload {
    pub event: PresenceEvent,
    pub participant: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceEvent {
    Join,
    Leave,
}

/// `system/error` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempted_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub your_capabilities: Option<Vec<CapabilityPattern>>,
}
