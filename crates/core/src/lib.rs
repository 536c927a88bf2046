#![forbid(unsafe_code)]

pub mod crypto;
pub mod serialize;

pub mod identity;
pub mod trust;

pub mod version;
pub mod message;
pub mod codec;
pub mod envelope;

pub mod error;
pub mod session;
pub mod transport;
pub mod metrics;
pub mod config;

mod endpoint;
pub mod agent;
pub mod tam;

pub use agent::Agent;
pub use error::ErrorCode;
pub use identity::SigningIdentity;
pub use message::{AppId, Message, MessageKind, TEEP_MEDIA_TYPE};
pub use session::{Phase, Role, Session};
pub use tam::Tam;
pub use transport::{Transport, TransportError, WireMessage};
pub use trust::TrustStore;
pub use version::VersionRange;
