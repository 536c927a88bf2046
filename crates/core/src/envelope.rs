//! Signing envelope: sign-then-encode on send, verify-then-decode on receive.
//!
//! Shape (COSE_Sign1, untagged):
//!   [ protected: bstr .cbor {1: -8}, unprotected: {4: kid}, payload: bstr, signature: bstr ]
//! The Ed25519 signature covers the canonical encoding of
//!   [ "Signature1", protected, h'', payload ]
//!
//! `kid` is only a hint for picking among already-trusted keys. The payload
//! is never handed to the codec before a trusted key has verified it.

use std::collections::BTreeMap;

use ed25519_dalek::VerifyingKey;
use serde_cbor::Value;

use crate::codec::{self, DecodeError};
use crate::crypto;
use crate::identity::SigningIdentity;
use crate::message::{Message, TEEP_MEDIA_TYPE};
use crate::serialize::canonical_cbor;
use crate::trust::TrustStore;

const HEADER_ALG: i128 = 1;
const HEADER_KID: i128 = 4;
const ALG_EDDSA: i128 = -8;
const SIG_CONTEXT: &str = "Signature1";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("unrecognized media type {0:?}")]
    UnrecognizedMediaType(String),
    #[error("malformed signed envelope")]
    Malformed,
    #[error("unsupported signature algorithm")]
    UnsupportedAlgorithm,
    #[error("no trusted key for signer")]
    UnknownSigner,
    #[error("signature does not verify")]
    BadSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OpenError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(#[from] AuthError),
    #[error("authenticated payload failed to decode: {0}")]
    Undecodable(#[from] DecodeError),
}

/// Encoded message plus its detached signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMessage {
    protected: Vec<u8>,
    signer_hint: Option<String>,
    payload: Vec<u8>,
    signature: Vec<u8>,
}

/// A payload whose signature has been checked against a trusted key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    pub signer: String,
    pub payload: Vec<u8>,
}

/// A decoded message together with the trusted signer that vouched for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened {
    pub signer: String,
    pub message: Message,
}

fn protected_header() -> Vec<u8> {
    let mut map = BTreeMap::new();
    map.insert(Value::Integer(HEADER_ALG), Value::Integer(ALG_EDDSA));
    canonical_cbor(&Value::Map(map))
}

fn to_be_signed(protected: &[u8], payload: &[u8]) -> Vec<u8> {
    canonical_cbor(&Value::Array(vec![
        Value::Text(SIG_CONTEXT.to_string()),
        Value::Bytes(protected.to_vec()),
        Value::Bytes(Vec::new()),
        Value::Bytes(payload.to_vec()),
    ]))
}

impl SignedMessage {
    pub fn signer_hint(&self) -> Option<&str> {
        self.signer_hint.as_deref()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut unprotected = BTreeMap::new();
        if let Some(kid) = &self.signer_hint {
            unprotected.insert(Value::Integer(HEADER_KID), Value::Bytes(kid.as_bytes().to_vec()));
        }
        canonical_cbor(&Value::Array(vec![
            Value::Bytes(self.protected.clone()),
            Value::Map(unprotected),
            Value::Bytes(self.payload.clone()),
            Value::Bytes(self.signature.clone()),
        ]))
    }

    /// Structural parse only; nothing here is trusted yet.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AuthError> {
        let value: Value = serde_cbor::from_slice(bytes).map_err(|_| AuthError::Malformed)?;
        let Value::Array(items) = value else {
            return Err(AuthError::Malformed);
        };
        let [protected, unprotected, payload, signature]: [Value; 4] =
            items.try_into().map_err(|_| AuthError::Malformed)?;
        let (Value::Bytes(protected), Value::Map(unprotected), Value::Bytes(payload), Value::Bytes(signature)) =
            (protected, unprotected, payload, signature)
        else {
            return Err(AuthError::Malformed);
        };
        let signer_hint = match unprotected.get(&Value::Integer(HEADER_KID)) {
            None => None,
            Some(Value::Bytes(kid)) => {
                Some(String::from_utf8(kid.clone()).map_err(|_| AuthError::Malformed)?)
            }
            Some(_) => return Err(AuthError::Malformed),
        };
        Ok(Self { protected, signer_hint, payload, signature })
    }

    fn check_algorithm(&self) -> Result<(), AuthError> {
        let header: Value =
            serde_cbor::from_slice(&self.protected).map_err(|_| AuthError::Malformed)?;
        let Value::Map(header) = header else {
            return Err(AuthError::Malformed);
        };
        match header.get(&Value::Integer(HEADER_ALG)) {
            Some(Value::Integer(ALG_EDDSA)) => Ok(()),
            _ => Err(AuthError::UnsupportedAlgorithm),
        }
    }
}

/// Sign already-encoded payload bytes. The payload is not validated, which
/// lets tests build correctly signed envelopes around garbage content.
pub fn seal_bytes(payload: &[u8], identity: &SigningIdentity) -> SignedMessage {
    let protected = protected_header();
    let signature = identity.sign(&to_be_signed(&protected, payload));
    SignedMessage {
        protected,
        signer_hint: Some(identity.label().to_string()),
        payload: payload.to_vec(),
        signature: signature.to_bytes().to_vec(),
    }
}

/// Encode `message` and sign it with `identity`.
pub fn seal(message: &Message, identity: &SigningIdentity) -> SignedMessage {
    seal_bytes(&codec::encode(message), identity)
}

/// Keys allowed to vouch for this envelope.
///
/// A session-bound peer identity wins outright. Otherwise a `kid` hint that
/// names a trusted key narrows the search; failing that every trusted key is
/// a candidate. The hint can never introduce an untrusted key.
fn candidate_keys(
    signed: &SignedMessage,
    trust: &TrustStore,
    expected_signer: Option<&str>,
) -> Vec<(String, VerifyingKey)> {
    if let Some(label) = expected_signer {
        return trust.get(label).map(|vk| vec![(label.to_string(), vk)]).unwrap_or_default();
    }
    if let Some(hint) = signed.signer_hint() {
        if let Some(vk) = trust.get(hint) {
            return vec![(hint.to_string(), vk)];
        }
    }
    trust.entries()
}

/// Verify the signature against the trust store, without decoding.
pub fn verify(
    signed: &SignedMessage,
    trust: &TrustStore,
    expected_signer: Option<&str>,
) -> Result<Verified, AuthError> {
    signed.check_algorithm()?;
    let candidates = candidate_keys(signed, trust, expected_signer);
    if candidates.is_empty() {
        return Err(AuthError::UnknownSigner);
    }
    let sig = crypto::sig_from_slice(&signed.signature).map_err(|_| AuthError::Malformed)?;
    let tbs = to_be_signed(&signed.protected, &signed.payload);
    candidates
        .into_iter()
        .find(|(_, vk)| crypto::verify(&tbs, &sig, vk))
        .map(|(signer, _)| Verified { signer, payload: signed.payload.clone() })
        .ok_or(AuthError::BadSignature)
}

/// Verify, then decode.
pub fn open(
    signed: &SignedMessage,
    trust: &TrustStore,
    expected_signer: Option<&str>,
) -> Result<Opened, OpenError> {
    let verified = verify(signed, trust, expected_signer)?;
    let message = codec::decode(&verified.payload)?;
    Ok(Opened { signer: verified.signer, message })
}

/// Full inbound path for raw transport bytes: media type, envelope parse,
/// verification, then decoding.
pub fn open_wire(
    media_type: &str,
    bytes: &[u8],
    trust: &TrustStore,
    expected_signer: Option<&str>,
) -> Result<Opened, OpenError> {
    if media_type != TEEP_MEDIA_TYPE {
        return Err(AuthError::UnrecognizedMediaType(media_type.to_string()).into());
    }
    let signed = SignedMessage::from_bytes(bytes)?;
    open(&signed, trust, expected_signer)
}
