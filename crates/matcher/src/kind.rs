//! Kind-clause matching: exact, glob, regex, negated.

use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;

/// A compiled `kind` clause, with the leading `!` (if any) stripped off -
/// negation is tracked separately by the caller (`CompiledCapability`) so it
/// can be applied uniformly at the capability-set level rather than baked
/// into this matcher.
#[derive(Debug)]
pub enum KindMatcher {
    /// No `*` in the pattern - plain string equality, the common case.
    Exact(String),
    /// The bare pattern `*` with nothing else - matches every kind,
    /// including multi-segment ones. Kept distinct from `Glob` because a
    /// segment-scoped `*` (the common `mcp/*` case) must NOT cross `/`,
    /// while a standalone `*` is the unrestricted-capability wildcard used
    /// for e.g. an admin's `{kind: "*"}` (see DESIGN.md).
    Any,
    /// Contains `*` or `**` alongside other characters. `/` is treated as
    /// a path separator so `*` matches within one segment and `**` matches
    /// across segments.
    Glob(GlobMatcher),
    /// A `/…/`-wrapped regex literal.
    Regex(Regex),
}

impl KindMatcher {
    pub fn is_match(&self, kind: &str) -> bool {
        match self {
            KindMatcher::Exact(s) => s == kind,
            KindMatcher::Any => true,
            KindMatcher::Glob(g) => g.is_match(kind),
            KindMatcher::Regex(re) => re.is_match(kind),
        }
    }
}

/// Compile a raw `kind` pattern string. Returns `(negated, matcher)` where
/// `matcher` is built from the pattern with any leading `!` removed.
///
/// A malformed regex or glob is a fatal configuration error, raised at
/// load time rather than deferred to the first envelope that would have
/// exercised it.
pub fn compile_kind_pattern(raw: &str) -> Result<(bool, KindMatcher), String> {
    let (negated, body) = match raw.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };

    if body.len() >= 2 && body.starts_with('/') && body.ends_with('/') {
        let inner = &body[1..body.len() - 1];
        let re = Regex::new(inner).map_err(|e| format!("invalid kind regex /{inner}/: {e}"))?;
        return Ok((negated, KindMatcher::Regex(re)));
    }

    if body == "*" {
        return Ok((negated, KindMatcher::Any));
    }

    if body.contains('*') {
        let glob = GlobBuilder::new(body)
            .literal_separator(true)
            .build()
            .map_err(|e| format!("invalid kind glob {body:?}: {e}"))?;
        return Ok((negated, KindMatcher::Glob(glob.compile_matcher())));
    }

    Ok((negated, KindMatcher::Exact(body.to_string())))
}
