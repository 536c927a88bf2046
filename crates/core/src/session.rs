//! Per-peer conversation state.
//!
//! A `Session` is owned by exactly one conversation and passed explicitly to
//! the role state machines; nothing about a conversation lives in role-wide
//! or process-wide state. Sessions are not reused: once `Complete` or
//! `Failed`, the caller drops it and opens a fresh one.

use std::collections::{BTreeSet, VecDeque};

use crate::error::ProtocolViolation;
use crate::message::{AppId, Update};
use crate::transport::WireMessage;
use crate::version::VersionRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Agent,
    Tam,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingQueryResponse,
    AwaitingUpdate,
    AwaitingSuccess,
    Complete,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed)
    }
}

#[derive(Debug)]
pub struct Session {
    peer_address: String,
    peer_identity: Option<String>,
    role: Role,
    phase: Phase,
    negotiated_version: Option<u32>,
    pending_outbound: VecDeque<WireMessage>,

    // Requester side (TAM): what we asked for and expect echoed.
    offered: Option<VersionRange>,
    token: Option<Vec<u8>>,
    challenge: Option<Vec<u8>>,
    pending_update: Option<Update>,

    // Agent side: changes this conversation asks the TAM for.
    requested: BTreeSet<AppId>,
    unneeded: BTreeSet<AppId>,
}

impl Session {
    pub fn new(role: Role, peer_address: impl Into<String>) -> Self {
        Self {
            peer_address: peer_address.into(),
            peer_identity: None,
            role,
            phase: Phase::Idle,
            negotiated_version: None,
            pending_outbound: VecDeque::new(),
            offered: None,
            token: None,
            challenge: None,
            pending_update: None,
            requested: BTreeSet::new(),
            unneeded: BTreeSet::new(),
        }
    }

    /// Only this trusted key may vouch for inbound messages.
    pub fn with_peer_identity(mut self, label: impl Into<String>) -> Self {
        self.peer_identity = Some(label.into());
        self
    }

    pub fn peer_address(&self) -> &str {
        &self.peer_address
    }

    pub fn peer_identity(&self) -> Option<&str> {
        self.peer_identity.as_deref()
    }

    pub(crate) fn bind_peer_identity(&mut self, label: &str) {
        if self.peer_identity.is_none() {
            self.peer_identity = Some(label.to_string());
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn negotiated_version(&self) -> Option<u32> {
        self.negotiated_version
    }

    /// Set the conversation's version. Only ever succeeds once.
    pub fn negotiate(&mut self, version: u32) -> Result<(), ProtocolViolation> {
        match self.negotiated_version {
            Some(existing) => Err(ProtocolViolation::AlreadyNegotiated(existing)),
            None => {
                self.negotiated_version = Some(version);
                Ok(())
            }
        }
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub(crate) fn fail(&mut self) {
        self.phase = Phase::Failed;
    }

    pub(crate) fn queue(&mut self, message: WireMessage) {
        self.pending_outbound.push_back(message);
    }

    pub fn pending_outbound(&self) -> usize {
        self.pending_outbound.len()
    }

    /// Pop the next message awaiting delivery to the peer.
    pub fn take_outbound(&mut self) -> Option<WireMessage> {
        self.pending_outbound.pop_front()
    }

    pub fn request_addition(&mut self, app: AppId) {
        self.unneeded.remove(&app);
        self.requested.insert(app);
    }

    pub fn request_removal(&mut self, app: AppId) {
        self.requested.remove(&app);
        self.unneeded.insert(app);
    }

    pub fn requested(&self) -> &BTreeSet<AppId> {
        &self.requested
    }

    pub fn unneeded(&self) -> &BTreeSet<AppId> {
        &self.unneeded
    }

    pub(crate) fn offered(&self) -> Option<VersionRange> {
        self.offered
    }

    pub(crate) fn record_request(
        &mut self,
        offered: VersionRange,
        token: Vec<u8>,
        challenge: Option<Vec<u8>>,
    ) {
        self.offered = Some(offered);
        self.token = Some(token);
        self.challenge = challenge;
        self.phase = Phase::AwaitingQueryResponse;
    }

    pub(crate) fn record_update(&mut self, update: Update) {
        self.token = update.token.clone();
        self.pending_update = Some(update);
        self.phase = Phase::AwaitingSuccess;
    }

    pub(crate) fn take_pending_update(&mut self) -> Option<Update> {
        self.pending_update.take()
    }

    /// Compare an echoed token with the one we issued, if any.
    pub(crate) fn check_token(&self, echoed: Option<&[u8]>) -> Result<(), ProtocolViolation> {
        match &self.token {
            Some(issued) if echoed != Some(issued.as_slice()) => Err(ProtocolViolation::TokenMismatch),
            _ => Ok(()),
        }
    }

    pub(crate) fn check_challenge(&self, echoed: Option<&[u8]>) -> Result<(), ProtocolViolation> {
        match &self.challenge {
            Some(issued) if echoed != Some(issued.as_slice()) => {
                Err(ProtocolViolation::ChallengeMismatch)
            }
            _ => Ok(()),
        }
    }
}
