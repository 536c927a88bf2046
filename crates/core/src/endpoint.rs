//! Machinery shared by both roles: sealing outbound messages onto a session,
//! the authenticate-then-decode receive path, and the failure policy.

use std::sync::Arc;

use ed25519_dalek::VerifyingKey;
use tracing::{debug, warn};

use crate::envelope::{self, SignedMessage};
use crate::error::{Disposition, ErrorCode, ProtocolViolation, ReceiveFailure};
use crate::identity::SigningIdentity;
use crate::message::{ErrorMessage, Message, TEEP_MEDIA_TYPE};
use crate::metrics::{Metrics, ERRORS_SENT, INBOUND_ACCEPTED, INBOUND_DROPPED, OUTBOUND_MESSAGES};
use crate::session::Session;
use crate::transport::WireMessage;
use crate::trust::TrustStore;
use crate::version::VersionRange;

pub(crate) struct Endpoint {
    identity: SigningIdentity,
    trust: Arc<TrustStore>,
    metrics: Arc<Metrics>,
    supported: VersionRange,
}

impl Endpoint {
    pub(crate) fn new(
        identity: SigningIdentity,
        trust: Arc<TrustStore>,
        metrics: Arc<Metrics>,
        supported: VersionRange,
    ) -> Self {
        Self { identity, trust, metrics, supported }
    }

    pub(crate) fn label(&self) -> &str {
        self.identity.label()
    }

    pub(crate) fn verifying_key(&self) -> VerifyingKey {
        self.identity.verifying_key()
    }

    pub(crate) fn supported(&self) -> VersionRange {
        self.supported
    }

    pub(crate) fn seal(&self, message: &Message) -> SignedMessage {
        envelope::seal(message, &self.identity)
    }

    pub(crate) fn seal_bytes(&self, payload: &[u8]) -> SignedMessage {
        envelope::seal_bytes(payload, &self.identity)
    }

    /// Hand a signed message to the session's outbound path. This is where
    /// the outbound counter moves.
    pub(crate) fn queue_signed(&self, session: &mut Session, signed: &SignedMessage) {
        session.queue(WireMessage::new(TEEP_MEDIA_TYPE, signed.to_bytes()));
        self.metrics.inc(OUTBOUND_MESSAGES, 1);
    }

    pub(crate) fn send(&self, session: &mut Session, message: &Message) {
        debug!(
            from = self.label(),
            peer = session.peer_address(),
            kind = %message.kind(),
            "queue outbound"
        );
        self.queue_signed(session, &self.seal(message));
    }

    /// Media type, envelope, signature, then decode. The first authenticated
    /// signer is bound to the session for the rest of the conversation.
    pub(crate) fn accept(
        &self,
        session: &mut Session,
        media_type: &str,
        bytes: &[u8],
    ) -> Result<Message, ReceiveFailure> {
        let opened =
            envelope::open_wire(media_type, bytes, &self.trust, session.peer_identity())?;
        session.bind_peer_identity(&opened.signer);
        self.metrics.inc(INBOUND_ACCEPTED, 1);
        debug!(
            at = self.label(),
            signer = %opened.signer,
            kind = %opened.message.kind(),
            phase = ?session.phase(),
            "accepted inbound"
        );
        Ok(opened.message)
    }

    /// Apply the failure policy and return the operation's outcome.
    pub(crate) fn reject(
        &self,
        session: &mut Session,
        failure: ReceiveFailure,
        token: Option<Vec<u8>>,
    ) -> ErrorCode {
        match failure.disposition() {
            Disposition::Retry => {
                warn!(peer = session.peer_address(), error = %failure, "transport failure");
                session.fail();
                ErrorCode::TemporaryError
            }
            Disposition::Drop => {
                warn!(peer = session.peer_address(), error = %failure, "dropping unauthenticated input");
                self.metrics.inc(INBOUND_DROPPED, 1);
                ErrorCode::PermanentError
            }
            Disposition::Report(code) => {
                warn!(peer = session.peer_address(), error = %failure, %code, "reporting to peer");
                let reply = Message::Error(ErrorMessage {
                    token,
                    code,
                    message: Some(failure.to_string()),
                });
                self.send(session, &reply);
                self.metrics.inc(ERRORS_SENT, 1);
                session.fail();
                code
            }
        }
    }
}

/// A role's inbound half: decode-and-verify is shared, only the per-kind
/// handling differs.
pub(crate) trait Handler {
    fn endpoint(&self) -> &Endpoint;

    fn dispatch(
        &mut self,
        session: &mut Session,
        message: Message,
    ) -> Result<ErrorCode, ProtocolViolation>;

    fn handle(&mut self, session: &mut Session, media_type: &str, bytes: &[u8]) -> ErrorCode {
        let message = match self.endpoint().accept(session, media_type, bytes) {
            Ok(message) => message,
            Err(failure) => return self.endpoint().reject(session, failure, None),
        };
        let token = message.token().map(<[u8]>::to_vec);
        match self.dispatch(session, message) {
            Ok(code) => code,
            Err(violation) => self.endpoint().reject(session, violation.into(), token),
        }
    }
}

/// Outcome of a received Error: the conversation is over and never answered.
pub(crate) fn closed_by_peer(session: &mut Session, error: &ErrorMessage) -> ErrorCode {
    warn!(
        peer = session.peer_address(),
        code = %error.code,
        message = error.message.as_deref().unwrap_or(""),
        "peer reported error"
    );
    session.fail();
    if error.code.is_success() {
        ErrorCode::PermanentError
    } else {
        error.code
    }
}
