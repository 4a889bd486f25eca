//! Proposal Tracker: the `mcp/proposal` lifecycle state machine, bounded
//! by an LRU so long-running spaces cannot grow this table unboundedly.

use lru::LruCache;
use std::num::NonZeroUsize;

use common::Envelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalState {
    Open,
    Withdrawn,
    Rejected,
    Fulfilled,
}

#[derive(Debug, Clone)]
pub struct ProposalRecord {
    pub id: String,
    pub proposer: String,
    pub recipients: Vec<String>,
    pub kind_requested: String,
    pub payload: serde_json::Value,
    pub state: ProposalState,
}

/// Tracks proposal records across their lifetime. Open and resolved
/// (terminal) records are kept in separate bounded LRUs: a resolved
/// proposal must still answer "have I seen this id" for stray references
/// that arrive after resolution, but does not need the full record kept
/// alive forever.
pub struct ProposalTracker {
    open: LruCache<String, ProposalRecord>,
    closed: LruCache<String, ProposalState>,
}

impl ProposalTracker {
    pub fn new(open_capacity: usize, closed_capacity: usize) -> ProposalTracker {
        let open_cap = NonZeroUsize::new(open_capacity.max(1)).unwrap();
        let closed_cap = NonZeroUsize::new(closed_capacity.max(1)).unwrap();
        ProposalTracker {
            open: LruCache::new(open_cap),
            closed: LruCache::new(closed_cap),
        }
    }

    /// Record a new `mcp/proposal` as open. `envelope.id` is the proposal
    /// id.
    pub fn open_proposal(&mut self, envelope: &Envelope) {
        if self.open.contains(&envelope.id) || self.closed.contains(&envelope.id) {
            return;
        }
        let record = ProposalRecord {
            id: envelope.id.clone(),
            proposer: envelope.from.clone(),
            recipients: envelope.to.clone().unwrap_or_default(),
            kind_requested: envelope
                .payload
                .get("method")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            payload: envelope.payload.clone(),
            state: ProposalState::Open,
        };
        self.open.put(envelope.id.clone(), record);
    }

    /// `mcp/withdraw` from the same `from` that opened the proposal.
    pub fn withdraw(&mut self, proposal_id: &str, from: &str) {
        self.resolve_if_owned(proposal_id, from, ProposalState::Withdrawn);
    }

    /// `mcp/reject` referencing the proposal id - any capable participant
    /// may reject, not only the proposer.
    pub fn reject(&mut self, proposal_id: &str) {
        self.resolve(proposal_id, ProposalState::Rejected);
    }

    /// An `mcp/request` whose `correlation_id` contains the proposal id,
    /// from a participant currently holding the capability the proposal
    /// would have required. The caller (the router) is responsible for
    /// having already verified the fulfiller's capability; this call only
    /// performs the state transition.
    pub fn fulfill(&mut self, proposal_id: &str) {
        self.resolve(proposal_id, ProposalState::Fulfilled);
    }

    fn resolve_if_owned(&mut self, proposal_id: &str, from: &str, new_state: ProposalState) {
        let owned = self
            .open
            .peek(proposal_id)
            .map(|record| record.proposer == from)
            .unwrap_or(false);
        if owned {
            self.resolve(proposal_id, new_state);
        }
    }

    /// All transitions are terminal: a proposal already resolved, or never
    /// seen at all, is left untouched beyond recording the attempted
    /// transition in the closed set for future uncorrelated-reference
    /// checks.
    fn resolve(&mut self, proposal_id: &str, new_state: ProposalState) {
        if self.closed.contains(proposal_id) {
            return;
        }
        if self.open.pop(proposal_id).is_some() {
            self.closed.put(proposal_id.to_string(), new_state);
        }
    }

    pub fn get(&mut self, proposal_id: &str) -> Option<&ProposalRecord> {
        self.open.get(proposal_id)
    }

    /// The proposal's requested payload, if it is still open - used to
    /// check whether a would-be fulfiller holds the capability the
    /// proposal was requesting, without disturbing LRU recency.
    pub fn open_payload(&self, proposal_id: &str) -> Option<serde_json::Value> {
        self.open.peek(proposal_id).map(|r| r.payload.clone())
    }

    /// Withdraw every still-open proposal authored by `proposer`, e.g. on
    /// disconnect (§4.5). Returns the withdrawn ids.
    pub fn withdraw_all_by(&mut self, proposer: &str) -> Vec<String> {
        let ids: Vec<String> = self
            .open
            .iter()
            .filter(|(_, record)| record.proposer == proposer)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            self.resolve(id, ProposalState::Withdrawn);
        }
        ids
    }

    pub fn state(&mut self, proposal_id: &str) -> Option<ProposalState> {
        if let Some(record) = self.open.peek(proposal_id) {
            return Some(record.state);
        }
        self.closed.peek(proposal_id).copied()
    }
}
