//! Shared protocol types for the MEW gateway
//!
//! This crate contains:
//! - The envelope schema and closed `kind` set
//! - Capability pattern schema
//! - Typed payloads for the kinds the gateway itself interprets
//! - The gateway's error taxonomy

pub mod capability;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod payload;

pub use capability::CapabilityPattern;
pub use envelope::{is_system_namespace, Envelope, Kind, PROTOCOL_TAG};
pub use error::MewError;
pub use payload::{
    ChatPayload, ErrorPayload, GrantAckPayload, GrantPayload, InvitePayload, KickPayload,
    ParticipantSummary, PresenceEvent, PresencePayload, RejectPayload, RevokePayload,
    WelcomePayload, WelcomeSelf,
};
