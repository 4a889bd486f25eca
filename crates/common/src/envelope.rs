//! Envelope schema for the MEW wire protocol.

use serde::{Deserialize, Serialize};

/// Fixed protocol tag carried by every envelope on the wire.
pub const PROTOCOL_TAG: &str = "mew/v0.4";

/// Canonical message envelope - every frame on the wire is one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Fixed tag identifying the protocol version.
    pub protocol: String,
    /// Globally unique message identifier.
    pub id: String,
    /// RFC3339 timestamp set by the sender, echoed unmodified on delivery.
    pub ts: String,
    /// Participant identifier. The gateway overwrites this with the
    /// authenticated identity before routing; see `Router::rewrite_identity`.
    pub from: String,
    /// Explicit recipient list. Empty/omitted means broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Vec<String>>,
    /// Message kind. Kept as a raw string (not the closed `Kind` enum) so
    /// capability patterns can match against forward-looking or unknown
    /// kinds (`mcp/*`) without the matcher knowing the full enumerated set.
    pub kind: String,
    /// Ordered list of envelope ids this message references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Vec<String>>,
    /// Path-like grouping key tying reasoning/thought streams together.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Kind-specific body.
    pub payload: serde_json::Value,
    /// Any additional top-level fields present on the wire, preserved
    /// verbatim so a parse -> serialize -> parse round trip never drops
    /// data the sender included outside the known schema.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Envelope {
    /// `true` if `kind` falls in the reserved `system/*` namespace.
    pub fn is_system_kind(&self) -> bool {
        is_system_namespace(&self.kind)
    }

    /// The first id in `correlation_id`, if any - used to resolve the
    /// proposal/request a response, withdraw, reject, or fulfillment refers
    /// to.
    pub fn primary_correlation(&self) -> Option<&str> {
        self.correlation_id
            .as_deref()
            .and_then(|ids| ids.first())
            .map(String::as_str)
    }
}

/// `true` if `kind` falls in the reserved `system/*` namespace. Free function
/// so the router's namespace guard can check a raw wire string before an
/// `Envelope` has even been fully validated.
pub fn is_system_namespace(kind: &str) -> bool {
    kind.starts_with("system/")
}

/// The closed set of kinds the core recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    McpRequest,
    McpResponse,
    McpProposal,
    McpWithdraw,
    McpReject,
    ReasoningStart,
    ReasoningThought,
    ReasoningConclusion,
    Chat,
    CapabilityGrant,
    CapabilityRevoke,
    CapabilityGrantAck,
    SpaceInvite,
    SpaceKick,
    SystemWelcome,
    SystemPresence,
    SystemError,
}

impl Kind {
    const TABLE: &'static [(&'static str, Kind)] = &[
        ("mcp/request", Kind::McpRequest),
        ("mcp/response", Kind::McpResponse),
        ("mcp/proposal", Kind::McpProposal),
        ("mcp/withdraw", Kind::McpWithdraw),
        ("mcp/reject", Kind::McpReject),
        ("reasoning/start", Kind::ReasoningStart),
        ("reasoning/thought", Kind::ReasoningThought),
        ("reasoning/conclusion", Kind::ReasoningConclusion),
        ("chat", Kind::Chat),
        ("capability/grant", Kind::CapabilityGrant),
        ("capability/revoke", Kind::CapabilityRevoke),
        ("capability/grant-ack", Kind::CapabilityGrantAck),
        ("space/invite", Kind::SpaceInvite),
        ("space/kick", Kind::SpaceKick),
        ("system/welcome", Kind::SystemWelcome),
        ("system/presence", Kind::SystemPresence),
        ("system/error", Kind::SystemError),
    ];

    /// Parse a raw wire `kind` string into a known `Kind`, or `None` if it
    /// falls outside the enumerated set.
    pub fn parse(raw: &str) -> Option<Kind> {
        Self::TABLE
            .iter()
            .find(|(s, _)| *s == raw)
            .map(|(_, k)| *k)
    }

    /// The exact wire string for this kind.
    pub fn as_str(&self) -> &'static str {
        Self::TABLE.iter().find(|(_, k)| k == self).unwrap().0
    }

    /// `true` for the three gateway-originated kinds. Participants must
    /// never send these themselves.
    pub fn is_system_originated(&self) -> bool {
        matches!(
            self,
            Kind::SystemWelcome | Kind::SystemPresence | Kind::SystemError
        )
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
