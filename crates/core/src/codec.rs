//! Binary codec for TEEP messages.
//!
//! Wire shape: `[type, options]`, or `[type, options, err-code]` for Error.
//! `options` is a map keyed by unsigned labels (see `message::label`);
//! unknown labels are ignored. Encoding is deterministic: option maps are
//! `BTreeMap`s and application-id sets are emitted in sorted order, and
//! empty sets / absent optionals are omitted.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_cbor::Value;

use crate::error::ErrorCode;
use crate::message::{
    label, AppId, ErrorMessage, Message, MessageKind, QueryRequest, QueryResponse, Success, Update,
};
use crate::serialize::canonical_cbor;
use crate::version::VersionRange;

/// Primitive CBOR categories, for type-mismatch diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CborKind {
    Integer,
    Array,
    Map,
    ByteString,
    TextString,
    Float,
    Simple,
    Tag,
}

impl CborKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Integer(_) => CborKind::Integer,
            Value::Array(_) => CborKind::Array,
            Value::Map(_) => CborKind::Map,
            Value::Bytes(_) => CborKind::ByteString,
            Value::Text(_) => CborKind::TextString,
            Value::Float(_) => CborKind::Float,
            Value::Tag(..) => CborKind::Tag,
            _ => CborKind::Simple,
        }
    }
}

impl fmt::Display for CborKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CborKind::Integer => "integer",
            CborKind::Array => "array",
            CborKind::Map => "map",
            CborKind::ByteString => "byte string",
            CborKind::TextString => "text string",
            CborKind::Float => "float",
            CborKind::Simple => "simple value",
            CborKind::Tag => "tag",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("not a well-formed CBOR item: {0}")]
    Cbor(String),
    #[error("{kind} has {actual} elements, expected {expected}")]
    Arity { kind: &'static str, expected: usize, actual: usize },
    #[error("unknown message type {0}")]
    UnknownKind(i128),
    #[error("invalid {field} type {actual}, expected {expected}")]
    TypeMismatch { field: &'static str, expected: CborKind, actual: CborKind },
    #[error("{field} is out of range")]
    OutOfRange { field: &'static str },
    #[error("missing {0}")]
    MissingField(&'static str),
    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

fn mismatch(field: &'static str, expected: CborKind, actual: &Value) -> DecodeError {
    DecodeError::TypeMismatch { field, expected, actual: CborKind::of(actual) }
}

// ---- encode

fn uint(v: u64) -> Value {
    Value::Integer(i128::from(v))
}

fn app_list(apps: &BTreeSet<AppId>) -> Value {
    Value::Array(apps.iter().map(|a| Value::Bytes(a.as_bytes().to_vec())).collect())
}

#[derive(Default)]
struct OptionsBuilder(BTreeMap<Value, Value>);

impl OptionsBuilder {
    fn put(&mut self, label: u64, value: Value) -> &mut Self {
        self.0.insert(uint(label), value);
        self
    }

    fn bytes(&mut self, label: u64, value: &Option<Vec<u8>>) -> &mut Self {
        if let Some(v) = value {
            self.put(label, Value::Bytes(v.clone()));
        }
        self
    }

    fn apps(&mut self, label: u64, apps: &BTreeSet<AppId>) -> &mut Self {
        if !apps.is_empty() {
            self.put(label, app_list(apps));
        }
        self
    }

    fn build(&mut self) -> Value {
        Value::Map(std::mem::take(&mut self.0))
    }
}

fn to_value(message: &Message) -> Value {
    let mut opts = OptionsBuilder::default();
    let mut items = vec![uint(message.kind().wire_type())];
    match message {
        Message::QueryRequest(m) => {
            opts.bytes(label::TOKEN, &m.token)
                .bytes(label::CHALLENGE, &m.challenge)
                .put(
                    label::VERSIONS,
                    Value::Array(m.versions.iter().map(|v| uint(u64::from(v))).collect()),
                );
            items.push(opts.build());
        }
        Message::QueryResponse(m) => {
            opts.bytes(label::TOKEN, &m.token)
                .bytes(label::CHALLENGE, &m.challenge)
                .put(label::SELECTED_VERSION, uint(u64::from(m.selected_version)))
                .apps(label::TC_LIST, &m.installed)
                .apps(label::REQUESTED_TC_LIST, &m.requested)
                .apps(label::UNNEEDED_TC_LIST, &m.unneeded);
            items.push(opts.build());
        }
        Message::Update(m) => {
            opts.bytes(label::TOKEN, &m.token)
                .apps(label::MANIFEST_LIST, &m.requested_additions)
                .apps(label::UNNEEDED_TC_LIST, &m.requested_removals);
            items.push(opts.build());
        }
        Message::Success(m) => {
            opts.bytes(label::TOKEN, &m.token);
            items.push(opts.build());
        }
        Message::Error(m) => {
            opts.bytes(label::TOKEN, &m.token);
            if let Some(text) = &m.message {
                opts.put(label::ERR_MSG, Value::Text(text.clone()));
            }
            items.push(opts.build());
            items.push(uint(m.code.wire_value()));
        }
    }
    Value::Array(items)
}

/// Encode a message to its deterministic wire bytes.
pub fn encode(message: &Message) -> Vec<u8> {
    canonical_cbor(&to_value(message))
}

// ---- decode

fn expect_uint(field: &'static str, value: Value) -> Result<u64, DecodeError> {
    match value {
        Value::Integer(i) => u64::try_from(i).map_err(|_| DecodeError::OutOfRange { field }),
        other => Err(mismatch(field, CborKind::Integer, &other)),
    }
}

fn expect_u32(field: &'static str, value: Value) -> Result<u32, DecodeError> {
    let v = expect_uint(field, value)?;
    u32::try_from(v).map_err(|_| DecodeError::OutOfRange { field })
}

fn expect_bytes(field: &'static str, value: Value) -> Result<Vec<u8>, DecodeError> {
    match value {
        Value::Bytes(b) => Ok(b),
        other => Err(mismatch(field, CborKind::ByteString, &other)),
    }
}

fn expect_text(field: &'static str, value: Value) -> Result<String, DecodeError> {
    match value {
        Value::Text(s) => Ok(s),
        other => Err(mismatch(field, CborKind::TextString, &other)),
    }
}

fn expect_array(field: &'static str, value: Value) -> Result<Vec<Value>, DecodeError> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(mismatch(field, CborKind::Array, &other)),
    }
}

/// Option map being consumed label by label.
struct Options(BTreeMap<Value, Value>);

impl Options {
    fn from_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Map(map) => Ok(Self(map)),
            other => Err(mismatch("options", CborKind::Map, &other)),
        }
    }

    fn take(&mut self, label: u64) -> Option<Value> {
        self.0.remove(&uint(label))
    }

    fn bytes(&mut self, label: u64, field: &'static str) -> Result<Option<Vec<u8>>, DecodeError> {
        self.take(label).map(|v| expect_bytes(field, v)).transpose()
    }

    fn text(&mut self, label: u64, field: &'static str) -> Result<Option<String>, DecodeError> {
        self.take(label).map(|v| expect_text(field, v)).transpose()
    }

    fn apps(&mut self, label: u64, field: &'static str) -> Result<BTreeSet<AppId>, DecodeError> {
        let Some(value) = self.take(label) else {
            return Ok(BTreeSet::new());
        };
        expect_array(field, value)?
            .into_iter()
            .map(|item| {
                let bytes = expect_bytes(field, item)?;
                let arr: [u8; 16] = bytes.as_slice().try_into().map_err(|_| DecodeError::InvalidValue {
                    field,
                    reason: format!("application id must be 16 bytes, got {}", bytes.len()),
                })?;
                Ok(AppId::from_bytes(arr))
            })
            .collect()
    }

    fn versions(&mut self) -> Result<VersionRange, DecodeError> {
        const FIELD: &str = "versions";
        let Some(value) = self.take(label::VERSIONS) else {
            return Ok(VersionRange::default());
        };
        let versions = expect_array(FIELD, value)?
            .into_iter()
            .map(|v| expect_u32(FIELD, v))
            .collect::<Result<Vec<_>, _>>()?;
        let (Some(&min), Some(&max)) = (versions.first(), versions.last()) else {
            return Err(DecodeError::InvalidValue { field: FIELD, reason: "empty list".into() });
        };
        let contiguous = versions.windows(2).all(|w| w[0].checked_add(1) == Some(w[1]));
        if !contiguous {
            return Err(DecodeError::InvalidValue {
                field: FIELD,
                reason: "must be a contiguous ascending range".into(),
            });
        }
        VersionRange::new(min, max)
            .map_err(|e| DecodeError::InvalidValue { field: FIELD, reason: e.to_string() })
    }
}

/// Decode wire bytes into a message, rejecting anything whose shape does not
/// match its declared kind.
pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    let value: Value =
        serde_cbor::from_slice(bytes).map_err(|e| DecodeError::Cbor(e.to_string()))?;
    let items = expect_array("message", value)?;

    let mut items = items.into_iter();
    let type_value = match items.next() {
        Some(v) => v,
        None => return Err(DecodeError::Arity { kind: "message", expected: 2, actual: 0 }),
    };
    let kind = match type_value {
        Value::Integer(i) => MessageKind::from_wire(i).ok_or(DecodeError::UnknownKind(i))?,
        other => return Err(mismatch("type", CborKind::Integer, &other)),
    };
    let rest: Vec<Value> = items.collect();
    if rest.len() + 1 != kind.arity() {
        return Err(DecodeError::Arity {
            kind: kind.name(),
            expected: kind.arity(),
            actual: rest.len() + 1,
        });
    }
    let mut rest = rest.into_iter();
    let mut opts = match rest.next() {
        Some(v) => Options::from_value(v)?,
        None => return Err(DecodeError::MissingField("options")),
    };

    let message = match kind {
        MessageKind::QueryRequest => Message::QueryRequest(QueryRequest {
            token: opts.bytes(label::TOKEN, "token")?,
            challenge: opts.bytes(label::CHALLENGE, "challenge")?,
            versions: opts.versions()?,
        }),
        MessageKind::QueryResponse => {
            let selected = opts
                .take(label::SELECTED_VERSION)
                .ok_or(DecodeError::MissingField("selected-version"))?;
            Message::QueryResponse(QueryResponse {
                token: opts.bytes(label::TOKEN, "token")?,
                selected_version: expect_u32("selected-version", selected)?,
                challenge: opts.bytes(label::CHALLENGE, "challenge")?,
                installed: opts.apps(label::TC_LIST, "tc-list")?,
                requested: opts.apps(label::REQUESTED_TC_LIST, "requested-tc-list")?,
                unneeded: opts.apps(label::UNNEEDED_TC_LIST, "unneeded-tc-list")?,
            })
        }
        MessageKind::Update => Message::Update(Update {
            token: opts.bytes(label::TOKEN, "token")?,
            requested_additions: opts.apps(label::MANIFEST_LIST, "manifest-list")?,
            requested_removals: opts.apps(label::UNNEEDED_TC_LIST, "unneeded-tc-list")?,
        }),
        MessageKind::Success => Message::Success(Success { token: opts.bytes(label::TOKEN, "token")? }),
        MessageKind::Error => {
            let raw = rest.next().ok_or(DecodeError::MissingField("err-code"))?;
            let wire = expect_uint("err-code", raw)?;
            // Codes outside the known set still close the conversation.
            let code = ErrorCode::from_wire(wire).unwrap_or(ErrorCode::PermanentError);
            Message::Error(ErrorMessage {
                token: opts.bytes(label::TOKEN, "token")?,
                code,
                message: opts.text(label::ERR_MSG, "err-msg")?,
            })
        }
    };
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(value: Value) -> Vec<u8> {
        canonical_cbor(&value)
    }

    fn app(n: u8) -> AppId {
        AppId::from_bytes([n; 16])
    }

    #[test]
    fn query_request_roundtrip_and_determinism() {
        let m = Message::QueryRequest(QueryRequest {
            token: Some(vec![1, 2, 3]),
            versions: VersionRange::new(0, 2).unwrap(),
            challenge: None,
        });
        let bytes = encode(&m);
        assert_eq!(bytes, encode(&m.clone()));
        assert_eq!(decode(&bytes).unwrap(), m);
    }

    #[test]
    fn query_response_lists_roundtrip() {
        let m = Message::QueryResponse(QueryResponse {
            token: None,
            selected_version: 0,
            challenge: Some(vec![9; 16]),
            installed: [app(3), app(1)].into(),
            requested: [app(2)].into(),
            unneeded: BTreeSet::new(),
        });
        assert_eq!(decode(&encode(&m)).unwrap(), m);
    }

    #[test]
    fn error_carries_code_positionally() {
        let m = Message::Error(ErrorMessage {
            token: None,
            code: ErrorCode::UnsupportedMsgVersion,
            message: Some("no overlap".into()),
        });
        let bytes = encode(&m);
        let Value::Array(items) = serde_cbor::from_slice::<Value>(&bytes).unwrap() else {
            panic!("expected array");
        };
        assert_eq!(items.len(), 3);
        assert_eq!(items[2], Value::Integer(4));
        assert_eq!(decode(&bytes).unwrap(), m);
    }

    #[test]
    fn missing_versions_means_version_zero() {
        let bytes = raw(Value::Array(vec![Value::Integer(1), Value::Map(BTreeMap::new())]));
        let Message::QueryRequest(q) = decode(&bytes).unwrap() else {
            panic!("expected QueryRequest");
        };
        assert_eq!(q.versions, VersionRange::single(0));
    }

    #[test]
    fn rejects_truncated_and_non_cbor() {
        let bytes = encode(&Message::Success(Success { token: Some(vec![7; 8]) }));
        assert!(matches!(decode(&bytes[..bytes.len() - 1]), Err(DecodeError::Cbor(_))));
        assert!(matches!(decode(b"hello"), Err(DecodeError::Cbor(_))));
        assert!(matches!(decode(&[]), Err(DecodeError::Cbor(_))));
    }

    #[test]
    fn rejects_wrong_arity() {
        let bytes = raw(Value::Array(vec![Value::Integer(5)]));
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::Arity { kind: "Success", expected: 2, actual: 1 })
        );
        let bytes = raw(Value::Array(vec![Value::Integer(6), Value::Map(BTreeMap::new())]));
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::Arity { kind: "Error", expected: 3, actual: 2 })
        );
        assert_eq!(
            decode(&raw(Value::Array(vec![]))),
            Err(DecodeError::Arity { kind: "message", expected: 2, actual: 0 })
        );
    }

    #[test]
    fn rejects_unknown_kind() {
        let bytes = raw(Value::Array(vec![Value::Integer(42), Value::Map(BTreeMap::new())]));
        assert_eq!(decode(&bytes), Err(DecodeError::UnknownKind(42)));
    }

    #[test]
    fn type_mismatch_reports_expected_and_actual() {
        // options must be a map; a text string is found
        let bytes = raw(Value::Array(vec![Value::Integer(1), Value::Text("x".into())]));
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::TypeMismatch {
                field: "options",
                expected: CborKind::Map,
                actual: CborKind::TextString,
            })
        );

        let mut opts = BTreeMap::new();
        opts.insert(uint(label::TOKEN), Value::Text("tok".into()));
        let bytes = raw(Value::Array(vec![Value::Integer(5), Value::Map(opts)]));
        let err = decode(&bytes).unwrap_err();
        assert_eq!(
            err,
            DecodeError::TypeMismatch {
                field: "token",
                expected: CborKind::ByteString,
                actual: CborKind::TextString,
            }
        );
        assert_eq!(err.to_string(), "invalid token type text string, expected byte string");

        let bytes = raw(Value::Integer(3));
        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::TypeMismatch { field: "message", expected: CborKind::Array, actual: CborKind::Integer })
        ));
    }

    #[test]
    fn rejects_bad_versions_and_app_ids() {
        let mut opts = BTreeMap::new();
        opts.insert(uint(label::VERSIONS), Value::Array(vec![Value::Integer(0), Value::Integer(2)]));
        let bytes = raw(Value::Array(vec![Value::Integer(1), Value::Map(opts)]));
        assert!(matches!(decode(&bytes), Err(DecodeError::InvalidValue { field: "versions", .. })));

        let mut opts = BTreeMap::new();
        opts.insert(uint(label::MANIFEST_LIST), Value::Array(vec![Value::Bytes(vec![1, 2, 3])]));
        let bytes = raw(Value::Array(vec![Value::Integer(3), Value::Map(opts)]));
        assert!(matches!(decode(&bytes), Err(DecodeError::InvalidValue { field: "manifest-list", .. })));
    }

    #[test]
    fn query_response_requires_selected_version() {
        let bytes = raw(Value::Array(vec![Value::Integer(2), Value::Map(BTreeMap::new())]));
        assert_eq!(decode(&bytes), Err(DecodeError::MissingField("selected-version")));
    }

    #[test]
    fn unlisted_error_codes_decode_as_permanent() {
        let mut opts = BTreeMap::new();
        opts.insert(uint(label::ERR_MSG), Value::Text("unsupported extension".into()));
        let bytes = raw(Value::Array(vec![Value::Integer(6), Value::Map(opts), Value::Integer(2)]));
        assert_eq!(
            decode(&bytes).unwrap(),
            Message::Error(ErrorMessage {
                token: None,
                code: ErrorCode::PermanentError,
                message: Some("unsupported extension".into()),
            })
        );

        let bytes = raw(Value::Array(vec![Value::Integer(6), Value::Map(BTreeMap::new()), Value::Integer(-2)]));
        assert_eq!(decode(&bytes), Err(DecodeError::OutOfRange { field: "err-code" }));
    }

    #[test]
    fn unknown_labels_are_ignored() {
        let mut opts = BTreeMap::new();
        opts.insert(uint(99), Value::Text("future".into()));
        let bytes = raw(Value::Array(vec![Value::Integer(5), Value::Map(opts)]));
        assert_eq!(decode(&bytes).unwrap(), Message::Success(Success { token: None }));
    }
}
