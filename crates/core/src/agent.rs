//! Agent role: the device side of the conversation.
//!
//! The Agent initiates by connecting to a TAM and then answers whatever the
//! TAM sends: a QueryRequest gets a QueryResponse, an Update gets applied and
//! confirmed with Success. Each public operation runs the whole exchange to
//! completion and reports one `ErrorCode`.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::endpoint::{closed_by_peer, Endpoint, Handler};
use crate::envelope::SignedMessage;
use crate::error::{ErrorCode, ProtocolViolation, ReceiveFailure};
use crate::identity::SigningIdentity;
use crate::message::{AppId, Message, MessageKind, QueryRequest, QueryResponse, Success, Update};
use crate::metrics::Metrics;
use crate::session::{Phase, Role, Session};
use crate::transport::{Transport, TransportError};
use crate::trust::TrustStore;

pub struct Agent {
    endpoint: Endpoint,
    config: AgentConfig,
    installed: BTreeSet<AppId>,
    transport: Box<dyn Transport>,
}

impl Agent {
    pub fn new(
        identity: SigningIdentity,
        trust: Arc<TrustStore>,
        metrics: Arc<Metrics>,
        config: AgentConfig,
        transport: Box<dyn Transport>,
    ) -> Self {
        let endpoint = Endpoint::new(identity, trust, metrics, config.role.versions);
        let installed = config.installed.clone();
        Self { endpoint, config, installed, transport }
    }

    pub fn label(&self) -> &str {
        self.endpoint.label()
    }

    pub fn installed_apps(&self) -> &BTreeSet<AppId> {
        &self.installed
    }

    /// Fresh session towards `tam_address`, bound to the configured peer
    /// identity when there is one.
    pub fn open_session(&self, tam_address: &str) -> Session {
        let session = Session::new(Role::Agent, tam_address);
        match self.config.role.peers.get(tam_address) {
            Some(label) => session.with_peer_identity(label.clone()),
            None => session,
        }
    }

    pub fn request_application(&mut self, app: AppId, tam_address: &str) -> ErrorCode {
        let mut session = self.open_session(tam_address);
        session.request_addition(app);
        self.run(&mut session)
    }

    pub fn unrequest_application(&mut self, app: AppId, tam_address: &str) -> ErrorCode {
        let mut session = self.open_session(tam_address);
        session.request_removal(app);
        self.run(&mut session)
    }

    pub fn request_policy_check(&mut self, tam_address: &str) -> ErrorCode {
        let mut session = self.open_session(tam_address);
        self.run(&mut session)
    }

    /// Receive path for a message the caller obtained itself. Replies are
    /// delivered to the session's peer and the exchange continues until the
    /// peer has nothing further, the session ends, or a step fails.
    pub fn process_incoming(
        &mut self,
        session: &mut Session,
        media_type: &str,
        bytes: &[u8],
    ) -> ErrorCode {
        let outcome = self.handle(session, media_type, bytes);
        self.drive(session, outcome)
    }

    /// Locally detected abnormal condition. Nothing is sent: there is no
    /// authenticated peer to tell.
    pub fn process_error(&mut self, session: Option<&mut Session>) -> ErrorCode {
        match session {
            Some(session) => {
                warn!(peer = session.peer_address(), "abandoning session after local error");
                session.fail();
            }
            None => warn!("local error with no session context"),
        }
        ErrorCode::TemporaryError
    }

    pub fn sign_message(&self, message: &Message) -> SignedMessage {
        self.endpoint.seal(message)
    }

    /// Sign arbitrary bytes as if they were an encoded message.
    pub fn sign_payload(&self, payload: &[u8]) -> SignedMessage {
        self.endpoint.seal_bytes(payload)
    }

    fn run(&mut self, session: &mut Session) -> ErrorCode {
        if let Err(e) = self.transport.connect(session.peer_address()) {
            return self.endpoint.reject(session, e.into(), None);
        }
        self.drive(session, ErrorCode::Success)
    }

    fn flush(&mut self, session: &mut Session) -> Result<(), TransportError> {
        while let Some(message) = session.take_outbound() {
            self.transport.send(session.peer_address(), &message)?;
        }
        Ok(())
    }

    fn drive(&mut self, session: &mut Session, mut outcome: ErrorCode) -> ErrorCode {
        loop {
            if let Err(e) = self.flush(session) {
                return self.endpoint.reject(session, ReceiveFailure::from(e), None);
            }
            if !outcome.is_success() || session.is_terminal() {
                return outcome;
            }
            match self.transport.receive(session.peer_address()) {
                Err(e) => return self.endpoint.reject(session, e.into(), None),
                Ok(None) if removal_needs_no_update(session) => {
                    session.set_phase(Phase::Complete);
                    info!(peer = session.peer_address(), "no update needed, exchange complete");
                    return outcome;
                }
                Ok(None) => {
                    warn!(
                        peer = session.peer_address(),
                        phase = ?session.phase(),
                        "peer went quiet before the exchange finished"
                    );
                    session.fail();
                    return ErrorCode::TemporaryError;
                }
                Ok(Some(wire)) => outcome = self.handle(session, &wire.media_type, &wire.bytes),
            }
        }
    }

    fn on_query_request(
        &mut self,
        session: &mut Session,
        request: QueryRequest,
    ) -> Result<ErrorCode, ProtocolViolation> {
        if let Some(version) = session.negotiated_version() {
            return Err(ProtocolViolation::AlreadyNegotiated(version));
        }
        if session.phase() != Phase::Idle {
            return Err(ProtocolViolation::UnexpectedMessage {
                kind: MessageKind::QueryRequest,
                phase: session.phase(),
            });
        }
        let supported = self.endpoint.supported();
        let version = supported.negotiate(&request.versions).ok_or(
            ProtocolViolation::UnsupportedVersion { offered: request.versions, supported },
        )?;
        session.negotiate(version)?;

        let response = QueryResponse {
            token: request.token,
            selected_version: version,
            challenge: request.challenge,
            installed: self.installed.clone(),
            requested: session.requested().clone(),
            unneeded: session.unneeded().clone(),
        };
        self.endpoint.send(session, &Message::QueryResponse(response));
        session.set_phase(Phase::AwaitingUpdate);
        Ok(ErrorCode::Success)
    }

    fn on_update(
        &mut self,
        session: &mut Session,
        update: Update,
    ) -> Result<ErrorCode, ProtocolViolation> {
        if session.phase() != Phase::AwaitingUpdate {
            return Err(ProtocolViolation::UnexpectedMessage {
                kind: MessageKind::Update,
                phase: session.phase(),
            });
        }
        for app in &update.requested_removals {
            self.installed.remove(app);
        }
        self.installed.extend(update.requested_additions.iter().copied());
        info!(
            peer = session.peer_address(),
            added = update.requested_additions.len(),
            removed = update.requested_removals.len(),
            "applied update"
        );
        self.endpoint.send(session, &Message::Success(Success { token: update.token }));
        session.set_phase(Phase::Complete);
        Ok(ErrorCode::Success)
    }
}

/// A pure unrequest may end after the QueryResponse; every other exchange
/// waits for an Update.
fn removal_needs_no_update(session: &Session) -> bool {
    session.phase() == Phase::AwaitingUpdate
        && session.requested().is_empty()
        && !session.unneeded().is_empty()
}

impl Handler for Agent {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn dispatch(
        &mut self,
        session: &mut Session,
        message: Message,
    ) -> Result<ErrorCode, ProtocolViolation> {
        match message {
            Message::QueryRequest(request) => self.on_query_request(session, request),
            Message::Update(update) => self.on_update(session, update),
            Message::Error(error) => Ok(closed_by_peer(session, &error)),
            other => Err(ProtocolViolation::UnexpectedMessage {
                kind: other.kind(),
                phase: session.phase(),
            }),
        }
    }
}
