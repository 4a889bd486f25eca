//! Parses incoming WebSocket text frames into envelopes and performs the
//! structural validation required before any routing decision is made.

use common::{Envelope, MewError};

/// Decode and structurally validate a single inbound text frame.
///
/// Structural validation only: required fields present, `kind` known,
/// `correlation_id`/`to` array-shaped where present, `payload` an object.
/// Payload *contents* are left entirely to the pattern matcher.
pub fn decode(frame: &str, max_envelope_bytes: usize) -> Result<Envelope, MewError> {
    if frame.len() > max_envelope_bytes {
        return Err(MewError::PayloadTooLarge {
            size: frame.len(),
            limit: max_envelope_bytes,
        });
    }

    let envelope: Envelope = serde_json::from_str(frame)
        .map_err(|e| MewError::InvalidEnvelope(format!("malformed JSON: {e}")))?;

    validate_structure(&envelope)?;
    Ok(envelope)
}

fn validate_structure(envelope: &Envelope) -> Result<(), MewError> {
    if envelope.protocol.is_empty() {
        return Err(MewError::InvalidEnvelope("missing protocol tag".into()));
    }
    if envelope.id.is_empty() {
        return Err(MewError::InvalidEnvelope("missing id".into()));
    }
    if envelope.from.is_empty() {
        return Err(MewError::InvalidEnvelope("missing from".into()));
    }
    if common::Kind::parse(&envelope.kind).is_none() {
        return Err(MewError::InvalidEnvelope(format!(
            "unknown kind {:?}",
            envelope.kind
        )));
    }
    if !envelope.payload.is_object() && !envelope.payload.is_null() {
        return Err(MewError::InvalidEnvelope(
            "payload must be a JSON object".into(),
        ));
    }
    Ok(())
}

/// Serialise an outgoing envelope to the text frame sent on the wire.
pub fn encode(envelope: &Envelope) -> Result<String, MewError> {
    serde_json::to_string(envelope)
        .map_err(|e| MewError::Internal(format!("serializing outgoing envelope: {e}")))
}
