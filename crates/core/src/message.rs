//! TEEP message model: one closed sum type over the five message kinds.
//!
//! Each kind carries only the fields relevant to it. Wire constants (type
//! values and option labels) live here next to the types they describe; the
//! byte-level work is in `codec`.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::version::VersionRange;

/// Media type of a signed CBOR TEEP message.
pub const TEEP_MEDIA_TYPE: &str = "application/teep+cbor";

/// Option-map labels.
pub mod label {
    pub const CHALLENGE: u64 = 2;
    pub const VERSIONS: u64 = 3;
    pub const SELECTED_VERSION: u64 = 6;
    pub const TC_LIST: u64 = 8;
    pub const MANIFEST_LIST: u64 = 10;
    pub const ERR_MSG: u64 = 12;
    pub const REQUESTED_TC_LIST: u64 = 14;
    pub const UNNEEDED_TC_LIST: u64 = 15;
    pub const TOKEN: u64 = 20;
}

/// 16-byte application identifier, displayed in UUID form.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppId([u8; 16]);

impl AppId {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl FromStr for AppId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(|u| Self(*u.as_bytes()))
    }
}

impl TryFrom<String> for AppId {
    type Error = uuid::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<AppId> for String {
    fn from(id: AppId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Uuid::from_bytes(self.0).hyphenated().fmt(f)
    }
}

impl fmt::Debug for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AppId({self})")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    QueryRequest,
    QueryResponse,
    Update,
    Success,
    Error,
}

impl MessageKind {
    pub const ALL: [MessageKind; 5] = [
        MessageKind::QueryRequest,
        MessageKind::QueryResponse,
        MessageKind::Update,
        MessageKind::Success,
        MessageKind::Error,
    ];

    /// Value of the leading `type` element on the wire.
    pub fn wire_type(self) -> u64 {
        match self {
            MessageKind::QueryRequest => 1,
            MessageKind::QueryResponse => 2,
            MessageKind::Update => 3,
            MessageKind::Success => 5,
            MessageKind::Error => 6,
        }
    }

    pub fn from_wire(value: i128) -> Option<Self> {
        Self::ALL.into_iter().find(|k| i128::from(k.wire_type()) == value)
    }

    /// Number of elements in the outer array.
    pub fn arity(self) -> usize {
        match self {
            MessageKind::Error => 3,
            _ => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::QueryRequest => "QueryRequest",
            MessageKind::QueryResponse => "QueryResponse",
            MessageKind::Update => "Update",
            MessageKind::Success => "Success",
            MessageKind::Error => "Error",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub token: Option<Vec<u8>>,
    pub versions: VersionRange,
    pub challenge: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResponse {
    pub token: Option<Vec<u8>>,
    pub selected_version: u32,
    pub challenge: Option<Vec<u8>>,
    /// Applications currently installed on the device.
    pub installed: BTreeSet<AppId>,
    /// Applications the device asks the TAM to install.
    pub requested: BTreeSet<AppId>,
    /// Applications the device no longer needs.
    pub unneeded: BTreeSet<AppId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Update {
    pub token: Option<Vec<u8>>,
    pub requested_additions: BTreeSet<AppId>,
    pub requested_removals: BTreeSet<AppId>,
}

impl Update {
    pub fn is_empty(&self) -> bool {
        self.requested_additions.is_empty() && self.requested_removals.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Success {
    pub token: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub token: Option<Vec<u8>>,
    pub code: ErrorCode,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    QueryRequest(QueryRequest),
    QueryResponse(QueryResponse),
    Update(Update),
    Success(Success),
    Error(ErrorMessage),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::QueryRequest(_) => MessageKind::QueryRequest,
            Message::QueryResponse(_) => MessageKind::QueryResponse,
            Message::Update(_) => MessageKind::Update,
            Message::Success(_) => MessageKind::Success,
            Message::Error(_) => MessageKind::Error,
        }
    }

    pub fn token(&self) -> Option<&[u8]> {
        let token = match self {
            Message::QueryRequest(m) => &m.token,
            Message::QueryResponse(m) => &m.token,
            Message::Update(m) => &m.token,
            Message::Success(m) => &m.token,
            Message::Error(m) => &m.token,
        };
        token.as_deref()
    }
}
