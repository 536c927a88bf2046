//! In-process network: Agents reach TAMs by address through a shared table
//! of hosted TAMs. Each host keeps one `Session` per connected agent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use teep_core::{
    ErrorCode, Session, Tam, Transport, TransportError, VersionRange, WireMessage, TEEP_MEDIA_TYPE,
};
use tracing::debug;

use crate::fault::FaultPlan;

/// A TAM plus its live per-agent sessions.
pub struct TamHost {
    tam: Tam,
    sessions: HashMap<String, Session>,
}

impl TamHost {
    pub fn new(tam: Tam) -> Self {
        Self { tam, sessions: HashMap::new() }
    }

    pub fn tam(&self) -> &Tam {
        &self.tam
    }

    pub fn tam_mut(&mut self) -> &mut Tam {
        &mut self.tam
    }

    pub fn session(&self, agent: &str) -> Option<&Session> {
        self.sessions.get(agent)
    }

    /// A connecting agent starts a fresh conversation; the TAM speaks first.
    pub fn accept_connection(&mut self, agent: &str) {
        let mut session = self.tam.open_session(agent);
        self.tam.begin_conversation(&mut session);
        if self.sessions.insert(agent.to_string(), session).is_some() {
            debug!(%agent, "replaced unfinished session");
        }
    }

    /// Compose a QueryRequest for `agent` and hand it back instead of
    /// queueing it, for callers that deliver it themselves.
    pub fn compose_query_request(
        &mut self,
        agent: &str,
        versions: Option<VersionRange>,
    ) -> WireMessage {
        let mut session = self.tam.open_session(agent);
        let signed = self.tam.compose_query_request(&mut session, versions);
        self.sessions.insert(agent.to_string(), session);
        WireMessage::new(TEEP_MEDIA_TYPE, signed.to_bytes())
    }

    pub fn deliver(&mut self, agent: &str, message: &WireMessage) -> ErrorCode {
        let tam = &mut self.tam;
        let session = self
            .sessions
            .entry(agent.to_string())
            .or_insert_with(|| tam.open_session(agent));
        let code = tam.process_teep_message(session, &message.media_type, &message.bytes);
        debug!(%agent, %code, "tam processed message");
        self.retire(agent);
        code
    }

    pub fn next_outbound(&mut self, agent: &str) -> Option<WireMessage> {
        let message = self.sessions.get_mut(agent)?.take_outbound();
        self.retire(agent);
        message
    }

    /// Drop a finished session once everything it queued has been collected.
    fn retire(&mut self, agent: &str) {
        let done = self
            .sessions
            .get(agent)
            .is_some_and(|s| s.is_terminal() && s.pending_outbound() == 0);
        if done {
            if let Some(session) = self.sessions.remove(agent) {
                debug!(%agent, phase = ?session.phase(), "retired session");
            }
        }
    }
}

/// Address table of hosted TAMs. Clones share the table.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    hosts: Arc<Mutex<HashMap<String, TamHost>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_tam(&self, address: impl Into<String>, tam: Tam) {
        self.hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address.into(), TamHost::new(tam));
    }

    /// Run `f` against the TAM hosted at `address`, if any.
    pub fn with_host<R>(&self, address: &str, f: impl FnOnce(&mut TamHost) -> R) -> Option<R> {
        let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        hosts.get_mut(address).map(f)
    }

    pub fn transport(&self, agent_address: impl Into<String>) -> LoopbackTransport {
        self.transport_with_faults(agent_address, FaultPlan::new())
    }

    pub fn transport_with_faults(
        &self,
        agent_address: impl Into<String>,
        faults: FaultPlan,
    ) -> LoopbackTransport {
        LoopbackTransport { agent: agent_address.into(), network: self.clone(), faults }
    }
}

/// One agent's view of the loopback network.
pub struct LoopbackTransport {
    agent: String,
    network: LoopbackNetwork,
    faults: FaultPlan,
}

impl LoopbackTransport {
    fn on_host<R>(&self, peer: &str, f: impl FnOnce(&mut TamHost, &str) -> R) -> Result<R, TransportError> {
        self.faults.check()?;
        self.network
            .with_host(peer, |host| f(host, &self.agent))
            .ok_or_else(|| TransportError::Unreachable(peer.to_string()))
    }
}

impl Transport for LoopbackTransport {
    fn connect(&mut self, peer: &str) -> Result<(), TransportError> {
        self.on_host(peer, |host, agent| host.accept_connection(agent))
    }

    fn send(&mut self, peer: &str, message: &WireMessage) -> Result<(), TransportError> {
        // The TAM's verdict travels back as its own queued messages, if any.
        self.on_host(peer, |host, agent| host.deliver(agent, message)).map(|_| ())
    }

    fn receive(&mut self, peer: &str) -> Result<Option<WireMessage>, TransportError> {
        self.on_host(peer, |host, agent| host.next_outbound(agent))
    }
}
