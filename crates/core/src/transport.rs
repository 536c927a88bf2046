//! Transport boundary consumed by the Agent.
//!
//! Every call is one failable step. Connection setup, socket retries and
//! timeouts live behind this trait, never in the state machines.

/// Raw bytes plus the media-type tag they arrived under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl WireMessage {
    pub fn new(media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { media_type: media_type.into(), bytes }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("peer {0} is unreachable")]
    Unreachable(String),
    #[error("injected failure at transport step {0}")]
    Injected(u64),
    #[error("peer {peer}: {reason}")]
    Peer { peer: String, reason: String },
}

pub trait Transport: Send {
    fn connect(&mut self, peer: &str) -> Result<(), TransportError>;

    fn send(&mut self, peer: &str, message: &WireMessage) -> Result<(), TransportError>;

    /// Next message from `peer`, or `None` when it has nothing further to say
    /// in this exchange.
    fn receive(&mut self, peer: &str) -> Result<Option<WireMessage>, TransportError>;
}
