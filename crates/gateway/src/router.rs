//! The Router: the single actor that owns the Capability Registry, the
//! Proposal Tracker, the connection table, and the audit log. Every
//! mutation to shared state happens on this task, reached only by sending
//! a `RouterCommand` over its inbound channel - this is what keeps the
//! registry/tracker/connection-table triple free of locks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::Message;
use common::{
    is_system_namespace, CapabilityPattern, Envelope, ErrorPayload, GrantPayload, Kind, KickPayload,
    MewError, ParticipantSummary, PresenceEvent, PresencePayload, RevokePayload, WelcomePayload,
    WelcomeSelf, PROTOCOL_TAG,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::audit::{AuditLog, CapabilityDecisionRecord, EnvelopeHistoryRecord, EnvelopeSummary};
use crate::codec;
use crate::proposal::ProposalTracker;
use crate::registry::CapabilityRegistry;
use crate::space_config::RoutingPreference;

pub enum RouterCommand {
    Join {
        participant: String,
        capabilities: Vec<CapabilityPattern>,
        routing: RoutingPreference,
        outbound: mpsc::Sender<Message>,
        disconnect: mpsc::Sender<u16>,
        pending_bytes: Arc<AtomicUsize>,
        bytes_limit: usize,
        ack: oneshot::Sender<()>,
    },
    Inbound {
        participant: String,
        envelope: Envelope,
    },
    /// A frame from `participant` failed codec validation before an
    /// `Envelope` could even be constructed (bad JSON, oversize, unknown
    /// kind). Still answered with a `system/error`; the connection stays
    /// open per §7.
    Invalid {
        participant: String,
        error: MewError,
        offending_id: Option<String>,
    },
    Leave {
        participant: String,
    },
}

struct ConnectionHandle {
    outbound: mpsc::Sender<Message>,
    disconnect: mpsc::Sender<u16>,
    pending_bytes: Arc<AtomicUsize>,
    bytes_limit: usize,
    routing: RoutingPreference,
}

pub struct Router {
    registry: CapabilityRegistry,
    proposals: ProposalTracker,
    connections: HashMap<String, ConnectionHandle>,
    audit: AuditLog,
    verbose_rejections: bool,
}

impl Router {
    pub fn new(
        proposal_lru_open: usize,
        proposal_lru_closed: usize,
        audit: AuditLog,
        verbose_rejections: bool,
    ) -> Router {
        Router {
            registry: CapabilityRegistry::new(),
            proposals: ProposalTracker::new(proposal_lru_open, proposal_lru_closed),
            connections: HashMap::new(),
            audit,
            verbose_rejections,
        }
    }

    /// Run the router actor loop until its inbound channel closes.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<RouterCommand>) {
        while let Some(command) = inbox.recv().await {
            match command {
                RouterCommand::Join {
                    participant,
                    capabilities,
                    routing,
                    outbound,
                    disconnect,
                    pending_bytes,
                    bytes_limit,
                    ack,
                } => {
                    self.handle_join(participant, capabilities, routing, outbound, disconnect, pending_bytes, bytes_limit);
                    let _ = ack.send(());
                }
                RouterCommand::Inbound { participant, envelope } => {
                    self.handle_inbound(participant, envelope);
                }
                RouterCommand::Invalid { participant, error, offending_id } => {
                    self.handle_invalid(&participant, error, offending_id);
                }
                RouterCommand::Leave { participant } => {
                    self.handle_leave(&participant);
                }
            }
        }
    }

    fn handle_join(
        &mut self,
        participant: String,
        capabilities: Vec<CapabilityPattern>,
        routing: RoutingPreference,
        outbound: mpsc::Sender<Message>,
        disconnect: mpsc::Sender<u16>,
        pending_bytes: Arc<AtomicUsize>,
        bytes_limit: usize,
    ) {
        if let Err(e) = self.registry.load(&participant, capabilities) {
            warn!("join rejected for {participant}: {e}");
            return;
        }

        let others: Vec<ParticipantSummary> = self
            .connections
            .keys()
            .map(|id| ParticipantSummary { id: id.clone() })
            .collect();

        self.connections.insert(
            participant.clone(),
            ConnectionHandle { outbound: outbound.clone(), disconnect, pending_bytes, bytes_limit, routing },
        );

        let welcome = WelcomePayload {
            you: WelcomeSelf {
                id: participant.clone(),
                capabilities: self.registry.snapshot(&participant),
            },
            participants: others,
        };
        self.send_system(&participant, Kind::SystemWelcome, None, serde_json::to_value(welcome).unwrap());

        self.broadcast_presence(&participant, PresenceEvent::Join, Some(&participant));
        info!("participant {participant} joined");
    }

    fn handle_leave(&mut self, participant: &str) {
        if self.connections.remove(participant).is_none() {
            return;
        }
        self.registry.remove(participant);
        self.withdraw_proposals_from(participant);
        self.broadcast_presence(participant, PresenceEvent::Leave, None);
        info!("participant {participant} left");
    }

    /// Answer a frame that never made it to a capability decision (codec
    /// rejection) with a `system/error`. Per §7 these error kinds never go
    /// through `check()` and are never logged to capability-decisions.
    fn handle_invalid(&mut self, participant: &str, error: MewError, offending_id: Option<String>) {
        let payload = error.to_error_payload(self.verbose_rejections);
        self.send_system(
            participant,
            Kind::SystemError,
            offending_id.map(|id| vec![id]),
            serde_json::to_value(payload).unwrap(),
        );
    }

    fn withdraw_proposals_from(&mut self, participant: &str) {
        self.proposals.withdraw_all_by(participant);
    }

    fn handle_inbound(&mut self, participant: String, mut envelope: Envelope) {
        // Step 1: identity rewrite - never trust the client's `from`.
        envelope.from = participant.clone();

        // Step 2: system-namespace guard.
        if is_system_namespace(&envelope.kind) {
            self.send_error(
                &participant,
                &envelope,
                MewError::SystemNamespaceViolation(envelope.kind.clone()),
            );
            return;
        }

        // Step 3: capability decision.
        let decision = self.registry.check(&participant, &envelope);
        if !decision.allowed {
            let err = MewError::CapabilityViolation {
                attempted_kind: envelope.kind.clone(),
                current_capabilities: self.registry.snapshot(&participant),
            };
            self.audit.record_decision(&CapabilityDecisionRecord {
                envelope_id: &envelope.id,
                participant: &participant,
                result: "denied",
                required_capability: Some(&envelope.kind),
                matched_capability_id: None,
                ts: common::ids::now_rfc3339(),
            });
            self.send_error(&participant, &envelope, err);
            return;
        }
        self.audit.record_decision(&CapabilityDecisionRecord {
            envelope_id: &envelope.id,
            participant: &participant,
            result: "allowed",
            required_capability: None,
            matched_capability_id: decision.matched_capability_id.as_deref(),
            ts: common::ids::now_rfc3339(),
        });

        // Step 4: side-effect hooks, in order: proposal tracker, then
        // capability registry mutation.
        self.apply_proposal_side_effects(&envelope);
        if let Some(reject) = self.apply_capability_mutation(&participant, &envelope) {
            if let Err(e) = reject {
                self.send_error(&participant, &envelope, e);
                return;
            }
        }

        // space/kick has an additional connection-table effect, applied
        // after the mutation/audit steps but before fan-out so the kicked
        // participant never receives the kick envelope itself.
        let mut skip_recipient: Option<String> = None;
        if envelope.kind == Kind::SpaceKick.as_str() {
            if let Ok(kick) = serde_json::from_value::<KickPayload>(envelope.payload.clone()) {
                self.force_disconnect(&kick.participant, 1000);
                skip_recipient = Some(kick.participant);
            }
        }

        self.fan_out(&participant, &envelope, skip_recipient.as_deref());
    }

    fn apply_proposal_side_effects(&mut self, envelope: &Envelope) {
        if envelope.kind == Kind::McpProposal.as_str() {
            self.proposals.open_proposal(envelope);
        } else if envelope.kind == Kind::McpWithdraw.as_str() {
            if let Some(id) = envelope.primary_correlation() {
                self.proposals.withdraw(id, &envelope.from);
            }
        } else if envelope.kind == Kind::McpReject.as_str() {
            if let Some(id) = envelope.primary_correlation() {
                self.proposals.reject(id);
            }
        } else if envelope.kind == Kind::McpRequest.as_str() {
            if let Some(ids) = &envelope.correlation_id {
                for id in ids {
                    self.fulfill_if_capable(id, envelope);
                }
            }
        }
    }

    /// A proposal is fulfilled by an `mcp/request` correlated to it only
    /// when the requester currently holds a capability that would have
    /// authorised sending the proposal's own payload as an `mcp/request`
    /// (§3.4). A correlated request from a participant lacking that
    /// capability leaves the proposal open - it is not itself a valid
    /// fulfillment, and was already subject to its own capability check in
    /// step 3 of the pipeline for whatever kind it actually carries.
    fn fulfill_if_capable(&mut self, proposal_id: &str, fulfiller_envelope: &Envelope) {
        let Some(requested_payload) = self.proposals.open_payload(proposal_id) else {
            return;
        };
        let probe = Envelope {
            protocol: PROTOCOL_TAG.to_string(),
            id: "fulfillment-probe".to_string(),
            ts: String::new(),
            from: fulfiller_envelope.from.clone(),
            to: None,
            kind: Kind::McpRequest.as_str().to_string(),
            correlation_id: None,
            context: None,
            payload: requested_payload,
            extra: Default::default(),
        };
        if self.registry.check(&fulfiller_envelope.from, &probe).allowed {
            self.proposals.fulfill(proposal_id);
        }
    }

    fn apply_capability_mutation(
        &mut self,
        participant: &str,
        envelope: &Envelope,
    ) -> Option<Result<(), MewError>> {
        if envelope.kind == Kind::CapabilityGrant.as_str() {
            let grant: GrantPayload = serde_json::from_value(envelope.payload.clone()).ok()?;
            return Some(self.registry.grant(participant, &grant.recipient, grant.capabilities));
        }
        if envelope.kind == Kind::CapabilityRevoke.as_str() {
            let revoke: RevokePayload = serde_json::from_value(envelope.payload.clone()).ok()?;
            return Some(self.registry.revoke(
                &revoke.recipient,
                revoke.grant_id.as_deref(),
                revoke.pattern.as_ref(),
            ));
        }
        None
    }

    fn fan_out(&mut self, sender: &str, envelope: &Envelope, skip: Option<&str>) {
        let frame = match codec::encode(envelope) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("failed to encode outgoing envelope {}: {e}", envelope.id);
                return;
            }
        };

        // Broadcasts - `to` omitted or an empty array - go to every other
        // connected participant. Targeted envelopes go only to their named
        // recipients: a participant never receives an envelope whose `to`
        // is non-empty and doesn't name it, broadcast aside (see
        // DESIGN.md's note on routing preference).
        let targets: Vec<String> = match envelope.to.as_deref() {
            None | Some([]) => self.connections.keys().cloned().collect(),
            Some(explicit) => explicit.to_vec(),
        };

        let mut delivered = Vec::new();
        let mut undeliverable = Vec::new();

        for target in &targets {
            if target == sender {
                continue;
            }
            if skip.is_some_and(|s| s == target) {
                continue;
            }
            if !self.connections.contains_key(target) {
                undeliverable.push(target.clone());
                continue;
            }
            if self.deliver(target, &frame) {
                delivered.push(target.clone());
            } else {
                undeliverable.push(target.clone());
            }
        }

        let event = if delivered.is_empty() && !undeliverable.is_empty() {
            "undeliverable"
        } else {
            "delivered"
        };
        self.audit.record_envelope(&EnvelopeHistoryRecord {
            event,
            envelope: EnvelopeSummary {
                id: &envelope.id,
                from: &envelope.from,
                to: envelope.to.as_deref(),
                kind: &envelope.kind,
                correlation_id: envelope.correlation_id.as_deref(),
            },
            participants: &delivered,
            ts: common::ids::now_rfc3339(),
        });
    }

    /// Attempt to queue `frame` on `target`'s outbound channel, respecting
    /// its backpressure bound. On overflow the recipient is disconnected
    /// with WS code 1013 and the sender is unaffected.
    fn deliver(&mut self, target: &str, frame: &str) -> bool {
        let frame_len = frame.len();
        let should_disconnect = {
            let Some(handle) = self.connections.get(target) else {
                return false;
            };
            let projected = handle.pending_bytes.load(Ordering::SeqCst) + frame_len;
            if projected > handle.bytes_limit {
                true
            } else {
                match handle.outbound.try_send(Message::Text(frame.to_string())) {
                    Ok(()) => {
                        handle.pending_bytes.fetch_add(frame_len, Ordering::SeqCst);
                        return true;
                    }
                    Err(_) => true,
                }
            }
        };

        if should_disconnect {
            self.force_disconnect(target, 1013);
        }
        false
    }

    fn force_disconnect(&mut self, target: &str, close_code: u16) {
        if let Some(handle) = self.connections.remove(target) {
            let _ = handle.disconnect.try_send(close_code);
        }
        self.registry.remove(target);
        self.broadcast_presence(target, PresenceEvent::Leave, None);
    }

    fn broadcast_presence(&mut self, participant: &str, event: PresenceEvent, skip: Option<&str>) {
        let payload = PresencePayload { event, participant: participant.to_string() };
        let envelope = Envelope {
            protocol: PROTOCOL_TAG.to_string(),
            id: common::ids::new_envelope_id(),
            ts: common::ids::now_rfc3339(),
            from: "gateway".to_string(),
            to: None,
            kind: Kind::SystemPresence.as_str().to_string(),
            correlation_id: None,
            context: None,
            payload: serde_json::to_value(payload).unwrap(),
            extra: Default::default(),
        };
        let frame = match codec::encode(&envelope) {
            Ok(f) => f,
            Err(_) => return,
        };
        let targets: Vec<String> = self
            .connections
            .keys()
            .filter(|id| skip != Some(id.as_str()))
            .cloned()
            .collect();
        for target in targets {
            self.deliver(&target, &frame);
        }
    }

    fn send_system(&mut self, to: &str, kind: Kind, correlation: Option<Vec<String>>, payload: serde_json::Value) {
        let envelope = Envelope {
            protocol: PROTOCOL_TAG.to_string(),
            id: common::ids::new_envelope_id(),
            ts: common::ids::now_rfc3339(),
            from: "gateway".to_string(),
            to: Some(vec![to.to_string()]),
            kind: kind.as_str().to_string(),
            correlation_id: correlation,
            context: None,
            payload,
            extra: Default::default(),
        };
        if let Ok(frame) = codec::encode(&envelope) {
            self.deliver(to, &frame);
        }
    }

    fn send_error(&mut self, to: &str, offending: &Envelope, error: MewError) {
        let payload: ErrorPayload = error.to_error_payload(self.verbose_rejections);
        self.send_system(
            to,
            Kind::SystemError,
            Some(vec![offending.id.clone()]),
            serde_json::to_value(payload).unwrap(),
        );
    }
}
