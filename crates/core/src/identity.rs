//! A role instance's signing identity.
//!
//! Exactly one `SigningIdentity` exists per Agent or TAM instance and it is
//! owned by that instance; it is deliberately neither `Clone` nor `Copy`.

use std::fmt;

use ed25519_dalek::{Signature, SigningKey, VerifyingKey};

use crate::crypto::{self, PublicKeyBytes, SecretKeyBytes};

pub struct SigningIdentity {
    label: String,
    key: SigningKey,
}

impl SigningIdentity {
    /// Generate a fresh identity under `label`.
    pub fn generate(label: impl Into<String>) -> Self {
        let (key, _) = crypto::generate_keypair();
        Self { label: label.into(), key }
    }

    /// Rebuild an identity from persisted secret key bytes.
    pub fn from_secret_bytes(label: impl Into<String>, secret: &SecretKeyBytes) -> Self {
        Self { label: label.into(), key: SigningKey::from_bytes(secret) }
    }

    /// Identity label; also the `kid` hint placed on outbound envelopes.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    pub fn public_key_bytes(&self) -> PublicKeyBytes {
        crypto::vk_to_bytes(&self.verifying_key())
    }

    /// Secret key bytes, for the key persistence boundary only.
    pub fn secret_bytes(&self) -> SecretKeyBytes {
        self.key.to_bytes()
    }

    pub fn fingerprint(&self) -> String {
        crypto::fingerprint(&self.verifying_key())
    }

    pub fn sign(&self, msg: &[u8]) -> Signature {
        crypto::sign(msg, &self.key)
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("label", &self.label)
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_roundtrip_keeps_public_key() {
        let id = SigningIdentity::generate("tam");
        let back = SigningIdentity::from_secret_bytes("tam", &id.secret_bytes());
        assert_eq!(id.public_key_bytes(), back.public_key_bytes());
        assert_eq!(back.label(), "tam");
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let id = SigningIdentity::generate("agent");
        let dbg = format!("{id:?}");
        assert!(dbg.contains("agent"));
        assert!(!dbg.contains(&hex::encode(id.secret_bytes())));
    }
}
