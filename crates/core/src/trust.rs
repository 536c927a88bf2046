//! Trust store of peer verification keys.
//!
//! Keys are indexed by the peer identity label (the file stem of the peer's
//! `.pub` file on disk). The store is shared read-mostly between role
//! instances via `Arc`; the only mutation is the explicit, out-of-band
//! `trust()` call. Protocol traffic never adds a key.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use ed25519_dalek::VerifyingKey;
use tracing::info;

use crate::crypto;

#[derive(Debug, Default)]
pub struct TrustStore {
    keys: RwLock<BTreeMap<String, VerifyingKey>>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a trust store in-memory with a single peer (handy for tests).
    pub fn from_single(label: &str, vk: VerifyingKey) -> Self {
        let store = Self::new();
        store.trust(label, vk);
        store
    }

    /// Provision `vk` under `label`. Returns the key it replaced, if any.
    pub fn trust(&self, label: impl Into<String>, vk: VerifyingKey) -> Option<VerifyingKey> {
        let label = label.into();
        info!(peer = %label, fingerprint = %crypto::fingerprint(&vk), "trusting peer key");
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(label, vk)
    }

    pub fn get(&self, label: &str) -> Option<VerifyingKey> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(label)
            .copied()
    }

    /// Snapshot of every trusted `(label, key)`, in label order.
    pub fn entries(&self) -> Vec<(String, VerifyingKey)> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(label, vk)| (label.clone(), *vk))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.keys.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_keypair;

    #[test]
    fn trust_get_and_replace() {
        let (_, vk1) = generate_keypair();
        let (_, vk2) = generate_keypair();
        let store = TrustStore::from_single("tam", vk1);
        assert_eq!(store.get("tam"), Some(vk1));
        assert_eq!(store.get("agent"), None);

        assert_eq!(store.trust("tam", vk2), Some(vk1));
        assert_eq!(store.get("tam"), Some(vk2));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn entries_are_label_ordered() {
        let store = TrustStore::new();
        assert!(store.is_empty());
        store.trust("zeta", generate_keypair().1);
        store.trust("alpha", generate_keypair().1);
        let labels: Vec<_> = store.entries().into_iter().map(|(l, _)| l).collect();
        assert_eq!(labels, vec!["alpha", "zeta"]);
    }
}
