//! Ed25519 helpers for the signing envelope and key persistence:
//! - keypair generation (OsRng)
//! - sign / verify over raw bytes
//! - hex + blake3 fingerprint helpers for key files and log lines
//! - random tokens and challenges

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;

pub type PublicKeyBytes = [u8; 32];
pub type SecretKeyBytes = [u8; 32];

/// Generate a fresh Ed25519 keypair.
pub fn generate_keypair() -> (SigningKey, VerifyingKey) {
    let sk = SigningKey::generate(&mut OsRng);
    let vk = sk.verifying_key();
    (sk, vk)
}

/// Sign arbitrary bytes.
pub fn sign(msg: &[u8], sk: &SigningKey) -> Signature {
    sk.sign(msg)
}

/// Verify a signature over arbitrary bytes.
pub fn verify(msg: &[u8], sig: &Signature, vk: &VerifyingKey) -> bool {
    vk.verify(msg, sig).is_ok()
}

/// Convert VerifyingKey -> 32-byte public key bytes.
pub fn vk_to_bytes(vk: &VerifyingKey) -> PublicKeyBytes {
    vk.to_bytes()
}

/// Parse VerifyingKey from 32 bytes.
pub fn vk_from_bytes(bytes: &PublicKeyBytes) -> Result<VerifyingKey, ed25519_dalek::SignatureError> {
    VerifyingKey::from_bytes(bytes)
}

/// Parse Signature from slice (expects 64 bytes).
pub fn sig_from_slice(bytes: &[u8]) -> Result<Signature, ed25519_dalek::SignatureError> {
    Signature::from_slice(bytes)
}

/// Short, stable key fingerprint for logs: first 8 bytes of blake3(pk), hex.
pub fn fingerprint(vk: &VerifyingKey) -> String {
    let digest = blake3::hash(vk.as_bytes());
    hex::encode(&digest.as_bytes()[..8])
}

/// Fill a fixed-size buffer from the OS RNG (tokens, challenges).
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}
