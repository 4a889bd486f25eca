//! Id and timestamp helpers for gateway-originated envelopes.

/// Generate a fresh envelope id. A UUID is recommended but any unique string
/// is valid on the wire.
pub fn new_envelope_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// The current time as an RFC3339 timestamp, for the gateway's own
/// `system/*` envelopes.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
