//! Capability Registry: per-participant capability sets, grant/revoke
//! mutation, and the delegation rule.

use std::collections::HashMap;

use common::{CapabilityPattern, Envelope, MewError, PROTOCOL_TAG};
use matcher::{CapabilitySet, CheckResult};

struct ParticipantCapabilities {
    patterns: Vec<CapabilityPattern>,
    compiled: CapabilitySet,
}

impl ParticipantCapabilities {
    fn recompile(patterns: Vec<CapabilityPattern>) -> Result<ParticipantCapabilities, MewError> {
        let compiled = CapabilitySet::compile(&patterns)
            .map_err(MewError::InvalidCapability)?;
        Ok(ParticipantCapabilities { patterns, compiled })
    }
}

#[derive(Default)]
pub struct CapabilityRegistry {
    participants: HashMap<String, ParticipantCapabilities>,
}

impl CapabilityRegistry {
    pub fn new() -> CapabilityRegistry {
        CapabilityRegistry::default()
    }

    /// Called at join from the static space config. `system/*` capabilities
    /// are never grantable, including through static config.
    pub fn load(&mut self, participant: &str, initial: Vec<CapabilityPattern>) -> Result<(), MewError> {
        for cap in &initial {
            reject_system_namespace(cap)?;
        }
        let compiled = ParticipantCapabilities::recompile(initial)?;
        self.participants.insert(participant.to_string(), compiled);
        Ok(())
    }

    pub fn remove(&mut self, participant: &str) {
        self.participants.remove(participant);
    }

    pub fn snapshot(&self, participant: &str) -> Vec<CapabilityPattern> {
        self.participants
            .get(participant)
            .map(|p| p.patterns.clone())
            .unwrap_or_default()
    }

    /// Consult the Pattern Matcher across `participant`'s capability set.
    pub fn check(&self, participant: &str, envelope: &Envelope) -> CheckResult {
        match self.participants.get(participant) {
            Some(caps) => caps.compiled.check_detailed(envelope),
            None => CheckResult { allowed: false, matched_capability_id: None },
        }
    }

    /// Append `capabilities` to `recipient`'s set. Idempotent on structural
    /// duplicates. Refuses to grant any capability `granter` does not
    /// itself hold (delegation rule) and any `system/*` capability
    /// unconditionally.
    pub fn grant(
        &mut self,
        granter: &str,
        recipient: &str,
        capabilities: Vec<CapabilityPattern>,
    ) -> Result<(), MewError> {
        for cap in &capabilities {
            reject_system_namespace(cap)?;
        }

        let granter_caps = self
            .participants
            .get(granter)
            .map(|p| &p.compiled);
        for cap in &capabilities {
            let may_delegate = granter_caps
                .map(|set| granter_may_delegate(set, cap))
                .unwrap_or(false);
            if !may_delegate {
                return Err(MewError::DelegationViolation);
            }
        }

        let existing = self
            .participants
            .get(recipient)
            .map(|p| p.patterns.clone())
            .unwrap_or_default();

        let mut merged = existing;
        for cap in capabilities {
            if !merged.iter().any(|existing| existing.structurally_eq(&cap)) {
                merged.push(cap);
            }
        }

        let compiled = ParticipantCapabilities::recompile(merged)?;
        self.participants.insert(recipient.to_string(), compiled);
        Ok(())
    }

    /// Remove capabilities from `recipient`'s set by capability id or by
    /// exact structural pattern match.
    pub fn revoke(
        &mut self,
        recipient: &str,
        by_id: Option<&str>,
        by_pattern: Option<&CapabilityPattern>,
    ) -> Result<(), MewError> {
        let Some(existing) = self.participants.get(recipient) else {
            return Ok(());
        };

        let remaining: Vec<CapabilityPattern> = existing
            .patterns
            .iter()
            .filter(|cap| {
                let matches_id = by_id.is_some() && cap.id.as_deref() == by_id;
                let matches_pattern = by_pattern.is_some_and(|p| cap.structurally_eq(p));
                !(matches_id || matches_pattern)
            })
            .cloned()
            .collect();

        let compiled = ParticipantCapabilities::recompile(remaining)?;
        self.participants.insert(recipient.to_string(), compiled);
        Ok(())
    }
}

fn reject_system_namespace(cap: &CapabilityPattern) -> Result<(), MewError> {
    if common::is_system_namespace(cap.kind.trim_start_matches('!')) {
        return Err(MewError::InvalidCapability(format!(
            "system/* capability {:?} is never grantable",
            cap.kind
        )));
    }
    Ok(())
}

/// Whether `granter_caps` authorises delegating `candidate`. Rather than
/// solving general pattern-subsumption, this treats `candidate` itself as
/// a probe envelope (its `kind` as the wire kind, its `payload` as the
/// wire payload) and asks the matcher whether the granter's own set would
/// allow that probe. A granter can only hand out capabilities whose shape
/// it could exercise itself.
fn granter_may_delegate(granter_caps: &CapabilitySet, candidate: &CapabilityPattern) -> bool {
    let probe = Envelope {
        protocol: PROTOCOL_TAG.to_string(),
        id: "delegation-probe".to_string(),
        ts: String::new(),
        from: String::new(),
        to: None,
        kind: candidate.kind.trim_start_matches('!').to_string(),
        correlation_id: None,
        context: None,
        payload: candidate.payload.clone().unwrap_or(serde_json::Value::Null),
        extra: Default::default(),
    };
    granter_caps.check(&probe)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(id: Option<&str>, kind: &str, payload: Option<serde_json::Value>) -> CapabilityPattern {
        CapabilityPattern { id: id.map(String::from), kind: kind.to_string(), payload }
    }

    fn envelope(from: &str, kind: &str, payload: serde_json::Value) -> Envelope {
        Envelope {
            protocol: PROTOCOL_TAG.to_string(),
            id: "e1".to_string(),
            ts: "2026-07-26T00:00:00Z".to_string(),
            from: from.to_string(),
            to: None,
            kind: kind.to_string(),
            correlation_id: None,
            context: None,
            payload,
            extra: Default::default(),
        }
    }

    #[test]
    fn load_then_check_allows_matching_envelope() {
        let mut registry = CapabilityRegistry::new();
        registry.load("alice", vec![cap(None, "chat", None)]).unwrap();
        let result = registry.check("alice", &envelope("alice", "chat", serde_json::Value::Null));
        assert!(result.allowed);
    }

    #[test]
    fn unknown_participant_is_always_denied() {
        let registry = CapabilityRegistry::new();
        let result = registry.check("ghost", &envelope("ghost", "chat", serde_json::Value::Null));
        assert!(!result.allowed);
    }

    #[test]
    fn grant_refuses_capability_the_granter_does_not_hold() {
        let mut registry = CapabilityRegistry::new();
        registry.load("admin", vec![cap(None, "chat", None)]).unwrap();
        registry.load("worker", vec![]).unwrap();

        let err = registry
            .grant("admin", "worker", vec![cap(Some("G1"), "mcp/request", None)])
            .unwrap_err();
        assert_eq!(err.error_class(), "delegation_violation");
    }

    #[test]
    fn grant_succeeds_when_granter_holds_a_superset_capability() {
        let mut registry = CapabilityRegistry::new();
        registry.load("admin", vec![cap(None, "*", None)]).unwrap();
        registry.load("worker", vec![]).unwrap();

        registry
            .grant("admin", "worker", vec![cap(Some("G1"), "mcp/request", None)])
            .unwrap();

        let result = registry.check(
            "worker",
            &envelope("worker", "mcp/request", serde_json::Value::Null),
        );
        assert!(result.allowed);
        assert_eq!(result.matched_capability_id.as_deref(), Some("G1"));
    }

    #[test]
    fn revoke_by_id_removes_only_that_capability() {
        let mut registry = CapabilityRegistry::new();
        registry
            .load("worker", vec![cap(Some("G1"), "chat", None), cap(Some("G2"), "mcp/*", None)])
            .unwrap();

        registry.revoke("worker", Some("G1"), None).unwrap();

        assert!(!registry.check("worker", &envelope("worker", "chat", serde_json::Value::Null)).allowed);
        assert!(registry
            .check("worker", &envelope("worker", "mcp/request", serde_json::Value::Null))
            .allowed);
    }

    #[test]
    fn system_namespace_capability_is_never_grantable() {
        let mut registry = CapabilityRegistry::new();
        registry.load("admin", vec![cap(None, "*", None)]).unwrap();
        registry.load("worker", vec![]).unwrap();

        let err = registry
            .grant("admin", "worker", vec![cap(None, "system/welcome", None)])
            .unwrap_err();
        assert_eq!(err.error_class(), "invalid_capability");
    }

    #[test]
    fn grant_is_idempotent_on_structural_duplicate() {
        let mut registry = CapabilityRegistry::new();
        registry.load("admin", vec![cap(None, "*", None)]).unwrap();
        registry.load("worker", vec![cap(Some("G1"), "chat", None)]).unwrap();

        registry.grant("admin", "worker", vec![cap(Some("G2"), "chat", None)]).unwrap();

        assert_eq!(registry.snapshot("worker").len(), 1);
    }
}
