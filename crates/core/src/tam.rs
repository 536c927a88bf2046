//! TAM role: the provisioning authority.
//!
//! The TAM opens a conversation with a QueryRequest, decides what the device
//! should change from the QueryResponse, sends that as an Update, and records
//! the result once the Agent confirms with Success. Outbound messages are
//! queued on the session; whoever hosts the TAM delivers them.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::TamConfig;
use crate::crypto::random_bytes;
use crate::endpoint::{closed_by_peer, Endpoint, Handler};
use crate::envelope::SignedMessage;
use crate::error::{ErrorCode, ProtocolViolation};
use crate::identity::SigningIdentity;
use crate::message::{AppId, Message, MessageKind, QueryRequest, QueryResponse, Success, Update};
use crate::metrics::Metrics;
use crate::session::{Phase, Role, Session};
use crate::trust::TrustStore;
use crate::version::VersionRange;

const TOKEN_LEN: usize = 8;
const CHALLENGE_LEN: usize = 16;

pub struct Tam {
    endpoint: Endpoint,
    config: TamConfig,
    /// Last known application set per device address. An entry is only made
    /// for a solicited QueryResponse from a trusted signer, so the map is
    /// bounded by the agents this TAM has provisioned; one address keeps one
    /// entry however often it reconnects.
    devices: HashMap<String, BTreeSet<AppId>>,
}

impl Tam {
    pub fn new(
        identity: SigningIdentity,
        trust: Arc<TrustStore>,
        metrics: Arc<Metrics>,
        config: TamConfig,
    ) -> Self {
        let endpoint = Endpoint::new(identity, trust, metrics, config.role.versions);
        Self { endpoint, config, devices: HashMap::new() }
    }

    pub fn label(&self) -> &str {
        self.endpoint.label()
    }

    pub fn open_session(&self, agent_address: &str) -> Session {
        let session = Session::new(Role::Tam, agent_address);
        match self.config.role.peers.get(agent_address) {
            Some(label) => session.with_peer_identity(label.clone()),
            None => session,
        }
    }

    /// Start a conversation: queue a QueryRequest over the configured range.
    pub fn begin_conversation(&self, session: &mut Session) {
        let signed = self.compose_query_request(session, None);
        self.endpoint.queue_signed(session, &signed);
    }

    /// Build a signed QueryRequest and record what the reply must echo. The
    /// message is returned to the caller rather than queued, so it is not
    /// counted as sent.
    pub fn compose_query_request(
        &self,
        session: &mut Session,
        versions: Option<VersionRange>,
    ) -> SignedMessage {
        let versions = versions.unwrap_or(self.config.role.versions);
        let token = random_bytes::<TOKEN_LEN>().to_vec();
        let challenge =
            self.config.send_challenge.then(|| random_bytes::<CHALLENGE_LEN>().to_vec());
        session.record_request(versions, token.clone(), challenge.clone());
        debug!(peer = session.peer_address(), %versions, "compose QueryRequest");
        self.endpoint.seal(&Message::QueryRequest(QueryRequest {
            token: Some(token),
            versions,
            challenge,
        }))
    }

    /// Receive path for a message from an Agent. Any reply is queued on the
    /// session.
    pub fn process_teep_message(
        &mut self,
        session: &mut Session,
        media_type: &str,
        bytes: &[u8],
    ) -> ErrorCode {
        self.handle(session, media_type, bytes)
    }

    pub fn sign_message(&self, message: &Message) -> SignedMessage {
        self.endpoint.seal(message)
    }

    /// Sign arbitrary bytes as if they were an encoded message.
    pub fn sign_payload(&self, payload: &[u8]) -> SignedMessage {
        self.endpoint.seal_bytes(payload)
    }

    pub fn known_device_apps(&self, agent_address: &str) -> Option<&BTreeSet<AppId>> {
        self.devices.get(agent_address)
    }

    /// What the device should change, given what it reported.
    fn compute_update(&self, response: &QueryResponse) -> Update {
        let wanted: BTreeSet<AppId> = response
            .requested
            .intersection(&self.config.catalog)
            .chain(self.config.required.iter())
            .copied()
            .collect();
        Update {
            token: None,
            requested_additions: wanted.difference(&response.installed).copied().collect(),
            requested_removals: response.unneeded.intersection(&response.installed).copied().collect(),
        }
    }

    fn on_query_response(
        &mut self,
        session: &mut Session,
        response: QueryResponse,
    ) -> Result<ErrorCode, ProtocolViolation> {
        let supported = self.endpoint.supported();
        match session.phase() {
            Phase::AwaitingQueryResponse => {}
            Phase::Idle => {
                // Nothing outstanding: check the version, act on nothing else.
                if supported.contains(response.selected_version) {
                    return Ok(ErrorCode::Success);
                }
                warn!(
                    peer = session.peer_address(),
                    selected = response.selected_version,
                    %supported,
                    "unsolicited QueryResponse with unsupported version"
                );
                return Ok(ErrorCode::UnsupportedMsgVersion);
            }
            phase => {
                return Err(ProtocolViolation::UnexpectedMessage {
                    kind: MessageKind::QueryResponse,
                    phase,
                })
            }
        }
        session.check_token(response.token.as_deref())?;
        session.check_challenge(response.challenge.as_deref())?;

        let offered = session.offered().unwrap_or(supported);
        let selected = response.selected_version;
        if !supported.contains(selected) || !offered.contains(selected) {
            warn!(
                peer = session.peer_address(),
                selected,
                %offered,
                "agent selected a version outside the offer"
            );
            session.fail();
            return Ok(ErrorCode::UnsupportedMsgVersion);
        }
        session.negotiate(selected)?;
        self.devices.insert(session.peer_address().to_string(), response.installed.clone());

        let mut update = self.compute_update(&response);
        if !self.config.update_policy.should_send(&update, &response) {
            info!(peer = session.peer_address(), "nothing to change, conversation complete");
            session.set_phase(Phase::Complete);
            return Ok(ErrorCode::Success);
        }
        update.token = Some(random_bytes::<TOKEN_LEN>().to_vec());
        self.endpoint.send(session, &Message::Update(update.clone()));
        session.record_update(update);
        Ok(ErrorCode::Success)
    }

    fn on_success(
        &mut self,
        session: &mut Session,
        success: Success,
    ) -> Result<ErrorCode, ProtocolViolation> {
        if session.phase() != Phase::AwaitingSuccess {
            return Err(ProtocolViolation::UnexpectedMessage {
                kind: MessageKind::Success,
                phase: session.phase(),
            });
        }
        session.check_token(success.token.as_deref())?;
        if let Some(update) = session.take_pending_update() {
            let apps = self.devices.entry(session.peer_address().to_string()).or_default();
            for app in &update.requested_removals {
                apps.remove(app);
            }
            apps.extend(update.requested_additions.iter().copied());
        }
        session.set_phase(Phase::Complete);
        info!(peer = session.peer_address(), "device confirmed update");
        Ok(ErrorCode::Success)
    }
}

impl Handler for Tam {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn dispatch(
        &mut self,
        session: &mut Session,
        message: Message,
    ) -> Result<ErrorCode, ProtocolViolation> {
        match message {
            Message::QueryResponse(response) => self.on_query_response(session, response),
            Message::Success(success) => self.on_success(session, success),
            Message::Error(error) => Ok(closed_by_peer(session, &error)),
            other => Err(ProtocolViolation::UnexpectedMessage {
                kind: other.kind(),
                phase: session.phase(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::config::UpdatePolicy;
    use crate::envelope::seal;
    use crate::message::TEEP_MEDIA_TYPE;

    struct Fixture {
        tam: Tam,
        agent: SigningIdentity,
        metrics: Arc<Metrics>,
    }

    fn fixture(config: TamConfig) -> Fixture {
        let agent = SigningIdentity::generate("agent");
        let trust = Arc::new(TrustStore::from_single("agent", agent.verifying_key()));
        let metrics = Arc::new(Metrics::new());
        let tam = Tam::new(SigningIdentity::generate("tam"), trust, metrics.clone(), config);
        Fixture { tam, agent, metrics }
    }

    fn tam_trust(fx: &Fixture) -> TrustStore {
        TrustStore::from_single("tam", fx.tam.endpoint.verifying_key())
    }

    fn response_to(request: &SignedMessage, fx: &Fixture) -> QueryResponse {
        let opened = crate::envelope::open(request, &tam_trust(fx), None).unwrap();
        let Message::QueryRequest(qr) = opened.message else { panic!("not a QueryRequest") };
        QueryResponse {
            token: qr.token,
            selected_version: qr.versions.max(),
            challenge: qr.challenge,
            installed: BTreeSet::new(),
            requested: BTreeSet::new(),
            unneeded: BTreeSet::new(),
        }
    }

    fn deliver(fx: &mut Fixture, session: &mut Session, message: &Message) -> ErrorCode {
        let bytes = seal(message, &fx.agent).to_bytes();
        fx.tam.process_teep_message(session, TEEP_MEDIA_TYPE, &bytes)
    }

    #[test]
    fn unsolicited_query_response_is_version_checked_only() {
        let mut fx = fixture(TamConfig::default());
        for (version, expected) in [(0, ErrorCode::Success), (1, ErrorCode::UnsupportedMsgVersion)] {
            let mut session = fx.tam.open_session("agent-1");
            let qr = Message::QueryResponse(QueryResponse {
                token: None,
                selected_version: version,
                challenge: None,
                installed: BTreeSet::new(),
                requested: BTreeSet::new(),
                unneeded: BTreeSet::new(),
            });
            assert_eq!(deliver(&mut fx, &mut session, &qr), expected);
            assert_eq!(session.pending_outbound(), 0);
        }
        assert_eq!(fx.metrics.outbound_messages(), 0);
    }

    #[test]
    fn devices_are_recorded_only_for_solicited_trusted_responses() {
        let mut fx = fixture(TamConfig::default());
        let stranger = SigningIdentity::generate("agent");

        let mut session = fx.tam.open_session("agent-1");
        let request = fx.tam.compose_query_request(&mut session, None);
        let response = Message::QueryResponse(response_to(&request, &fx));
        let forged = seal(&response, &stranger).to_bytes();
        assert_eq!(
            fx.tam.process_teep_message(&mut session, TEEP_MEDIA_TYPE, &forged),
            ErrorCode::PermanentError
        );
        let mut idle = fx.tam.open_session("agent-2");
        assert_eq!(deliver(&mut fx, &mut idle, &response), ErrorCode::Success);
        assert!(fx.tam.known_device_apps("agent-1").is_none());
        assert!(fx.tam.known_device_apps("agent-2").is_none());

        for _ in 0..3 {
            let mut session = fx.tam.open_session("agent-1");
            let request = fx.tam.compose_query_request(&mut session, None);
            let response = Message::QueryResponse(response_to(&request, &fx));
            assert_eq!(deliver(&mut fx, &mut session, &response), ErrorCode::Success);
        }
        assert_eq!(fx.tam.devices.len(), 1);
    }

    #[test]
    fn requested_app_from_catalog_becomes_update() {
        let app = AppId::from_bytes([4; 16]);
        let mut config = TamConfig::default();
        config.catalog.insert(app);
        let mut fx = fixture(config);
        let mut session = fx.tam.open_session("agent-1");

        let request = fx.tam.compose_query_request(&mut session, None);
        assert_eq!(fx.metrics.outbound_messages(), 0);
        let mut response = response_to(&request, &fx);
        response.requested.insert(app);
        response.requested.insert(AppId::from_bytes([5; 16])); // not in catalog

        assert_eq!(deliver(&mut fx, &mut session, &Message::QueryResponse(response)), ErrorCode::Success);
        assert_eq!(session.phase(), Phase::AwaitingSuccess);
        assert_eq!(fx.metrics.outbound_messages(), 1);

        let wire = session.take_outbound().unwrap();
        let Message::Update(update) = codec_payload(&fx, &wire.bytes) else { panic!("not an Update") };
        assert_eq!(update.requested_additions, BTreeSet::from([app]));
        assert!(update.requested_removals.is_empty());

        let success = Message::Success(Success { token: update.token.clone() });
        assert_eq!(deliver(&mut fx, &mut session, &success), ErrorCode::Success);
        assert_eq!(session.phase(), Phase::Complete);
        assert_eq!(fx.tam.known_device_apps("agent-1"), Some(&BTreeSet::from([app])));
    }

    #[test]
    fn trivial_removal_skips_update() {
        let mut fx = fixture(TamConfig::default());
        let mut session = fx.tam.open_session("agent-1");
        let request = fx.tam.compose_query_request(&mut session, None);
        let mut response = response_to(&request, &fx);
        response.unneeded.insert(AppId::from_bytes([6; 16]));

        assert_eq!(deliver(&mut fx, &mut session, &Message::QueryResponse(response)), ErrorCode::Success);
        assert_eq!(session.phase(), Phase::Complete);
        assert_eq!(fx.metrics.outbound_messages(), 0);
    }

    #[test]
    fn when_changed_policy_skips_empty_policy_check() {
        let config = TamConfig { update_policy: UpdatePolicy::WhenChanged, ..TamConfig::default() };
        let mut fx = fixture(config);
        let mut session = fx.tam.open_session("agent-1");
        let request = fx.tam.compose_query_request(&mut session, None);
        let response = response_to(&request, &fx);
        assert_eq!(deliver(&mut fx, &mut session, &Message::QueryResponse(response)), ErrorCode::Success);
        assert_eq!(session.phase(), Phase::Complete);
        assert_eq!(session.negotiated_version(), Some(0));
    }

    #[test]
    fn out_of_range_selection_is_unsupported_without_traffic() {
        let mut fx = fixture(TamConfig::default());
        let mut session = fx.tam.open_session("agent-1");
        let request = fx.tam.compose_query_request(&mut session, None);
        let mut response = response_to(&request, &fx);
        response.selected_version = 3;
        assert_eq!(
            deliver(&mut fx, &mut session, &Message::QueryResponse(response)),
            ErrorCode::UnsupportedMsgVersion
        );
        assert_eq!(session.phase(), Phase::Failed);
        assert_eq!(fx.metrics.outbound_messages(), 0);
    }

    #[test]
    fn token_mismatch_is_reported() {
        let mut fx = fixture(TamConfig { send_challenge: true, ..TamConfig::default() });
        let mut session = fx.tam.open_session("agent-1");
        let request = fx.tam.compose_query_request(&mut session, None);
        let mut response = response_to(&request, &fx);
        assert!(response.challenge.is_some());
        response.token = Some(vec![0; 8]);
        assert_eq!(
            deliver(&mut fx, &mut session, &Message::QueryResponse(response)),
            ErrorCode::PermanentError
        );
        assert_eq!(fx.metrics.outbound_messages(), 1);
        let wire = session.take_outbound().unwrap();
        let Message::Error(err) = codec_payload(&fx, &wire.bytes) else { panic!("not an Error") };
        assert_eq!(err.code, ErrorCode::PermanentError);
        assert_eq!(err.token, Some(vec![0; 8]));
    }

    #[test]
    fn query_request_from_agent_is_unexpected() {
        let mut fx = fixture(TamConfig::default());
        let mut session = fx.tam.open_session("agent-1");
        let qr = Message::QueryRequest(QueryRequest {
            token: None,
            versions: VersionRange::single(0),
            challenge: None,
        });
        assert_eq!(deliver(&mut fx, &mut session, &qr), ErrorCode::PermanentError);
        assert_eq!(fx.metrics.outbound_messages(), 1);
    }

    #[test]
    fn signed_garbage_gets_one_error_and_garbage_bytes_get_none() {
        let mut fx = fixture(TamConfig::default());
        let mut session = fx.tam.open_session("agent-1");
        assert_eq!(
            fx.tam.process_teep_message(&mut session, TEEP_MEDIA_TYPE, b"hello"),
            ErrorCode::PermanentError
        );
        assert_eq!(fx.metrics.outbound_messages(), 0);

        let signed = crate::envelope::seal_bytes(b"hello", &fx.agent).to_bytes();
        assert_eq!(
            fx.tam.process_teep_message(&mut session, TEEP_MEDIA_TYPE, &signed),
            ErrorCode::PermanentError
        );
        assert_eq!(fx.metrics.outbound_messages(), 1);
    }

    fn codec_payload(fx: &Fixture, bytes: &[u8]) -> Message {
        let signed = SignedMessage::from_bytes(bytes).unwrap();
        let verified = crate::envelope::verify(&signed, &tam_trust(fx), None).unwrap();
        codec::decode(&verified.payload).unwrap()
    }
}
