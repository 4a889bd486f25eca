//! Property-based tests for the pattern matcher, run only under `cfg(test)`.

#![cfg(test)]

use common::{CapabilityPattern, Envelope};
use proptest::prelude::*;
use serde_json::Value;

use crate::set::CompiledCapability;

fn arb_kind_literal() -> impl Strategy<Value = String> {
    "[a-z]{1,8}(/[a-z]{1,8}){0,2}"
}

fn envelope_with_kind(kind: String) -> Envelope {
    Envelope {
        protocol: common::PROTOCOL_TAG.to_string(),
        id: "e1".to_string(),
        ts: "2026-07-26T00:00:00Z".to_string(),
        from: "alice".to_string(),
        to: None,
        kind,
        correlation_id: None,
        context: None,
        payload: Value::Null,
        extra: Default::default(),
    }
}

proptest! {
    /// `matches` never panics for any literal kind pattern paired with any
    /// literal kind envelope, and is a pure function: calling it twice on
    /// the same inputs gives the same answer.
    #[test]
    fn matches_is_deterministic(pattern_kind in arb_kind_literal(), envelope_kind in arb_kind_literal()) {
        let pattern = CapabilityPattern { id: None, kind: pattern_kind, payload: None };
        let compiled = CompiledCapability::compile(&pattern).unwrap();
        let envelope = envelope_with_kind(envelope_kind);
        let root = serde_json::to_value(&envelope).unwrap();

        let first = compiled.matches(&envelope, &root);
        let second = compiled.matches(&envelope, &root);
        prop_assert_eq!(first, second);
    }

    /// A pattern with no `*` and no `/…/` regex wrapper matches only the
    /// exact same kind string.
    #[test]
    fn literal_pattern_matches_iff_exactly_equal(pattern_kind in arb_kind_literal(), envelope_kind in arb_kind_literal()) {
        let pattern = CapabilityPattern { id: None, kind: pattern_kind.clone(), payload: None };
        let compiled = CompiledCapability::compile(&pattern).unwrap();
        let envelope = envelope_with_kind(envelope_kind.clone());
        let root = serde_json::to_value(&envelope).unwrap();

        prop_assert_eq!(compiled.matches(&envelope, &root), pattern_kind == envelope_kind);
    }
}
