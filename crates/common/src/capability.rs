//! Capability pattern schema. The matching algorithm itself lives in the
//! `matcher` crate - this type only carries the declarative shape across
//! the wire and through the registry.

use serde::{Deserialize, Serialize};

/// A single capability: a declarative pattern describing which envelopes
/// it authorises.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityPattern {
    /// Stable handle used for later revocation by id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Kind pattern: exact, glob (`*`/`**`), regex (`/.../`), or negated
    /// (`!pattern`).
    pub kind: String,
    /// Nested pattern matched against the envelope payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl CapabilityPattern {
    /// Structural equality used for grant-time dedup and revoke-by-pattern.
    /// Deliberately ignores `id` - two capabilities with different ids but
    /// the same kind/payload shape authorise exactly the same envelopes and
    /// are considered the same capability for dedup purposes (see
    /// DESIGN.md).
    pub fn structurally_eq(&self, other: &CapabilityPattern) -> bool {
        self.kind == other.kind && self.payload == other.payload
    }

    /// `true` if this pattern's `kind` clause is a negation (`!...`).
    pub fn is_negated(&self) -> bool {
        self.kind.starts_with('!')
    }
}
