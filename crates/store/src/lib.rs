#![forbid(unsafe_code)]
//! On-disk keys for a TEEP role.
//!
//! Layout under a role's data directory:
//!   <label>.key          hex Ed25519 secret (owner-only on Unix)
//!   <label>.pub          hex public key, the file handed to peers
//!   trusted/<peer>.pub   peer keys this role accepts signatures from
//!
//! Protocol traffic never writes here; `install_trusted_key` is the only way
//! a peer key becomes trusted.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use ed25519_dalek::VerifyingKey;
use teep_core::crypto::{vk_from_bytes, PublicKeyBytes, SecretKeyBytes};
use teep_core::{SigningIdentity, TrustStore};
use tracing::{debug, info};

pub const TRUSTED_DIR: &str = "trusted";
const SECRET_EXT: &str = "key";
const PUBLIC_EXT: &str = "pub";

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: not valid hex", path.display())]
    BadHex { path: PathBuf },
    #[error("{}: expected 32 key bytes, found {len}", path.display())]
    BadKeyLength { path: PathBuf, len: usize },
    #[error("{}: not a valid Ed25519 public key", path.display())]
    BadKey { path: PathBuf },
    #[error("{0:?} cannot name a key file")]
    BadFileName(String),
}

type Result<T> = std::result::Result<T, KeyStoreError>;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> KeyStoreError + '_ {
    move |source| KeyStoreError::Io { path: path.to_path_buf(), source }
}

fn check_label(label: &str) -> Result<()> {
    let ok = !label.is_empty()
        && !label.starts_with('.')
        && label.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(KeyStoreError::BadFileName(label.to_string()))
    }
}

fn read_key_bytes(path: &Path) -> Result<[u8; 32]> {
    let text = fs::read_to_string(path).map_err(io_err(path))?;
    let bytes =
        hex::decode(text.trim()).map_err(|_| KeyStoreError::BadHex { path: path.to_path_buf() })?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| KeyStoreError::BadKeyLength { path: path.to_path_buf(), len })
}

fn write_secret(path: &Path, secret: &SecretKeyBytes) -> Result<()> {
    let mut opts = fs::OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(path).map_err(io_err(path))?;
    writeln!(file, "{}", hex::encode(secret)).map_err(io_err(path))
}

fn key_file(dir: &Path, label: &str, ext: &str) -> PathBuf {
    dir.join(format!("{label}.{ext}"))
}

fn write_public(path: &Path, public: &PublicKeyBytes) -> Result<()> {
    fs::write(path, format!("{}\n", hex::encode(public))).map_err(io_err(path))
}

/// A role's key directory.
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    /// Open (creating if needed) the data directory and its trust directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let trusted = dir.join(TRUSTED_DIR);
        fs::create_dir_all(&trusted).map_err(io_err(&trusted))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn trusted_dir(&self) -> PathBuf {
        self.dir.join(TRUSTED_DIR)
    }

    pub fn public_key_path(&self, label: &str) -> PathBuf {
        key_file(&self.dir, label, PUBLIC_EXT)
    }

    /// Load `<label>.key`, or generate and persist a fresh key pair. Calling
    /// this twice returns the same identity.
    pub fn load_or_create_identity(&self, label: &str) -> Result<SigningIdentity> {
        check_label(label)?;
        let path = key_file(&self.dir, label, SECRET_EXT);
        if path.exists() {
            let secret = read_key_bytes(&path)?;
            let identity = SigningIdentity::from_secret_bytes(label, &secret);
            debug!(%label, fingerprint = %identity.fingerprint(), "loaded identity");
            return Ok(identity);
        }
        let identity = SigningIdentity::generate(label);
        write_secret(&path, &identity.secret_bytes())?;
        Self::save_public_key(&identity, &self.dir)?;
        info!(%label, fingerprint = %identity.fingerprint(), "generated identity");
        Ok(identity)
    }

    /// Write `<label>.pub` for `identity` into `dest_dir`.
    pub fn save_public_key(identity: &SigningIdentity, dest_dir: &Path) -> Result<PathBuf> {
        check_label(identity.label())?;
        let path = key_file(dest_dir, identity.label(), PUBLIC_EXT);
        write_public(&path, &identity.public_key_bytes())?;
        Ok(path)
    }

    /// Read a `.pub` file; the label is its file stem.
    pub fn load_trusted_key(path: &Path) -> Result<(String, VerifyingKey)> {
        let label = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| KeyStoreError::BadFileName(path.display().to_string()))?
            .to_string();
        check_label(&label)?;
        let bytes = read_key_bytes(path)?;
        let key = vk_from_bytes(&bytes).map_err(|_| KeyStoreError::BadKey { path: path.to_path_buf() })?;
        Ok((label, key))
    }

    /// Out-of-band key exchange: validate a peer's public key file and copy
    /// it into `trusted/`. Returns the peer's label.
    pub fn install_trusted_key(&self, source: &Path) -> Result<String> {
        let (label, key) = Self::load_trusted_key(source)?;
        let dest = key_file(&self.trusted_dir(), &label, PUBLIC_EXT);
        write_public(&dest, &key.to_bytes())?;
        info!(peer = %label, fingerprint = %teep_core::crypto::fingerprint(&key), "trusted peer key");
        Ok(label)
    }

    /// Every key under `trusted/`, keyed by label.
    pub fn load_trust_store(&self) -> Result<TrustStore> {
        let trusted = self.trusted_dir();
        let store = TrustStore::new();
        let entries = fs::read_dir(&trusted).map_err(io_err(&trusted))?;
        for entry in entries {
            let path = entry.map_err(io_err(&trusted))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PUBLIC_EXT) {
                continue;
            }
            let (label, key) = Self::load_trusted_key(&path)?;
            store.trust(label, key);
        }
        debug!(dir = %trusted.display(), keys = store.len(), "loaded trust store");
        Ok(store)
    }
}
