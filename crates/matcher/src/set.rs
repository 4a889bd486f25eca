//! A compiled capability set and the allow/veto decision over it.

use common::{CapabilityPattern, Envelope};
use serde_json::Value;

use crate::kind::{compile_kind_pattern, KindMatcher};
use crate::payload::{compile_payload_pattern, eval_node, CompiledNode};

/// One capability pattern, pre-compiled for repeated matching against a
/// stream of envelopes.
pub struct CompiledCapability {
    pub source: CapabilityPattern,
    negated: bool,
    kind: KindMatcher,
    payload: Option<CompiledNode>,
}

impl CompiledCapability {
    pub fn compile(pattern: &CapabilityPattern) -> Result<CompiledCapability, String> {
        let (negated, kind) = compile_kind_pattern(&pattern.kind)?;
        let payload = pattern
            .payload
            .as_ref()
            .map(compile_payload_pattern)
            .transpose()?;
        Ok(CompiledCapability {
            source: pattern.clone(),
            negated,
            kind,
            payload,
        })
    }

    /// Does the envelope's shape match this capability's kind and payload
    /// clauses, ignoring whether the clause is negated? Used directly by
    /// `CapabilitySet::check`'s allow/veto logic, where negation is a
    /// distinct concern from shape.
    pub fn shape_matches(&self, envelope: &Envelope, root: &Value) -> bool {
        if !self.kind.is_match(&envelope.kind) {
            return false;
        }
        match &self.payload {
            None => true,
            Some(node) => eval_node(node, Some(&envelope.payload), root),
        }
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Pure standalone match: shape match XOR negation. Matches the
    /// capability-pattern contract taken in isolation - a negated pattern
    /// "matches" exactly the envelopes its un-negated form would not.
    pub fn matches(&self, envelope: &Envelope, root: &Value) -> bool {
        self.shape_matches(envelope, root) ^ self.negated
    }
}

/// A participant's full set of granted capabilities, compiled once and
/// reused across every envelope they send.
pub struct CapabilitySet {
    capabilities: Vec<CompiledCapability>,
}

impl CapabilitySet {
    pub fn compile(patterns: &[CapabilityPattern]) -> Result<CapabilitySet, String> {
        let capabilities = patterns
            .iter()
            .map(CompiledCapability::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CapabilitySet { capabilities })
    }

    pub fn patterns(&self) -> Vec<CapabilityPattern> {
        self.capabilities.iter().map(|c| c.source.clone()).collect()
    }

    /// Is `envelope` authorised? An envelope is allowed iff at least one
    /// non-negated capability's shape matches it, and no negated
    /// capability's shape also matches it (the negation acts as a veto,
    /// regardless of which positive grant would otherwise have allowed the
    /// envelope).
    ///
    /// Short-circuits: if the set has no negated entries (the common case),
    /// skip the veto pass entirely.
    pub fn check(&self, envelope: &Envelope) -> bool {
        self.check_detailed(envelope).allowed
    }

    /// Same decision as `check`, but also reports which capability id (if
    /// any) the allow decision rests on, for the audit log.
    pub fn check_detailed(&self, envelope: &Envelope) -> CheckResult {
        let root = serde_json::to_value(envelope).unwrap_or(Value::Null);

        let matched = self
            .capabilities
            .iter()
            .filter(|c| !c.is_negated())
            .find(|c| c.shape_matches(envelope, &root));
        let Some(matched) = matched else {
            return CheckResult { allowed: false, matched_capability_id: None };
        };

        let vetoed = self
            .capabilities
            .iter()
            .filter(|c| c.is_negated())
            .any(|c| c.shape_matches(envelope, &root));
        if vetoed {
            return CheckResult { allowed: false, matched_capability_id: None };
        }

        CheckResult {
            allowed: true,
            matched_capability_id: matched.source.id.clone(),
        }
    }
}

/// The outcome of evaluating a capability set against one envelope.
pub struct CheckResult {
    pub allowed: bool,
    pub matched_capability_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(kind: &str, payload: Value) -> Envelope {
        Envelope {
            protocol: common::PROTOCOL_TAG.to_string(),
            id: "e1".to_string(),
            ts: "2026-07-26T00:00:00Z".to_string(),
            from: "alice".to_string(),
            to: None,
            kind: kind.to_string(),
            correlation_id: None,
            context: None,
            payload,
            extra: Default::default(),
        }
    }

    fn cap(kind: &str, payload: Option<Value>) -> CapabilityPattern {
        CapabilityPattern {
            id: None,
            kind: kind.to_string(),
            payload,
        }
    }

    #[test]
    fn allows_when_a_positive_capability_matches() {
        let set = CapabilitySet::compile(&[cap("chat", None)]).unwrap();
        assert!(set.check(&envelope("chat", Value::Null)));
        assert!(!set.check(&envelope("mcp/request", Value::Null)));
    }

    #[test]
    fn negation_vetoes_an_otherwise_allowed_envelope() {
        let set = CapabilitySet::compile(&[
            cap("mcp/*", None),
            cap("!mcp/request", Some(serde_json::json!({"method": "tools/call"}))),
        ])
        .unwrap();

        assert!(set.check(&envelope(
            "mcp/request",
            serde_json::json!({"method": "tools/list"})
        )));
        assert!(!set.check(&envelope(
            "mcp/request",
            serde_json::json!({"method": "tools/call"})
        )));
    }

    #[test]
    fn no_capability_matching_denies_by_default() {
        let set = CapabilitySet::compile(&[]).unwrap();
        assert!(!set.check(&envelope("chat", Value::Null)));
    }

    #[test]
    fn standalone_matches_inverts_for_negated_pattern() {
        let cap = CompiledCapability::compile(&cap("!chat", None)).unwrap();
        let root = serde_json::to_value(envelope("chat", Value::Null)).unwrap();
        assert!(!cap.matches(&envelope("chat", Value::Null), &root));
        assert!(cap.matches(&envelope("mcp/request", Value::Null), &root));
    }
}
