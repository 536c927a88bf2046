use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use teep_core::config::{self, AgentConfig, TamConfig};
use teep_core::metrics::Metrics;
use teep_core::{Agent, AppId, ErrorCode, Tam};
use teep_net::LoopbackNetwork;
use teep_store::KeyStore;

use crate::Exchange;

pub const DEFAULT_APP: &str = "38b08738-227d-4f6a-b1f0-b208bc02a781";
const TAM_ADDR: &str = "loopback://tam";
const AGENT_ADDR: &str = "loopback://agent";

pub fn cmd_keygen(dir: &Path, label: Option<&str>) -> Result<()> {
    let store = KeyStore::open(dir)?;
    let label = match label {
        Some(label) => label.to_string(),
        None => config::load_or_default::<AgentConfig>(dir)
            .map(|c| c.role.label)
            .or_else(|_| config::load_or_default::<TamConfig>(dir).map(|c| c.role.label))
            .with_context(|| format!("reading {}", dir.join(config::CONFIG_FILE).display()))?,
    };
    let identity = store.load_or_create_identity(&label)?;
    println!("public_key={}", store.public_key_path(&label).display());
    println!("fingerprint={}", identity.fingerprint());
    Ok(())
}

pub fn cmd_trust(dir: &Path, file: &Path) -> Result<()> {
    let store = KeyStore::open(dir)?;
    let label = store
        .install_trusted_key(file)
        .with_context(|| format!("installing {}", file.display()))?;
    println!("trusted={label}");
    Ok(())
}

#[derive(Debug)]
pub struct DemoReport {
    pub code: ErrorCode,
    /// Signed messages produced by the exchange, both roles together.
    pub sent: u64,
    pub metrics_csv: String,
}

pub fn cmd_demo(
    exchange: Exchange,
    app: &AppId,
    tam_dir: &Path,
    agent_dir: &Path,
) -> Result<DemoReport> {
    let mut tam_config: TamConfig = config::load_or_default(tam_dir)?;
    let agent_config: AgentConfig = config::load_or_default(agent_dir)?;

    let tam_store = KeyStore::open(tam_dir)?;
    let agent_store = KeyStore::open(agent_dir)?;
    let tam_id = tam_store.load_or_create_identity(&tam_config.role.label)?;
    let agent_id = agent_store.load_or_create_identity(&agent_config.role.label)?;

    // Out-of-band exchange; re-running just rewrites the same files.
    agent_store.install_trusted_key(&tam_store.public_key_path(tam_id.label()))?;
    tam_store.install_trusted_key(&agent_store.public_key_path(agent_id.label()))?;

    if exchange == Exchange::Request {
        tam_config.catalog.insert(*app);
    }

    let metrics = Arc::new(Metrics::new());
    let network = LoopbackNetwork::new();
    network.register_tam(
        TAM_ADDR,
        Tam::new(tam_id, Arc::new(tam_store.load_trust_store()?), metrics.clone(), tam_config),
    );
    let mut agent = Agent::new(
        agent_id,
        Arc::new(agent_store.load_trust_store()?),
        metrics.clone(),
        agent_config,
        Box::new(network.transport(AGENT_ADDR)),
    );

    let before = metrics.outbound_messages();
    let code = match exchange {
        Exchange::Request => agent.request_application(*app, TAM_ADDR),
        Exchange::Unrequest => agent.unrequest_application(*app, TAM_ADDR),
        Exchange::PolicyCheck => agent.request_policy_check(TAM_ADDR),
    };
    tracing::info!(?exchange, %code, "demo finished");
    Ok(DemoReport {
        code,
        sent: metrics.outbound_messages() - before,
        metrics_csv: metrics.snapshot_csv(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_exchanges_have_expected_shape() {
        let tam = tempfile::tempdir().unwrap();
        let agent = tempfile::tempdir().unwrap();
        let app: AppId = DEFAULT_APP.parse().unwrap();

        let r = cmd_demo(Exchange::Unrequest, &app, tam.path(), agent.path()).unwrap();
        assert_eq!((r.code, r.sent), (ErrorCode::Success, 2));

        // Second run reuses the keys provisioned by the first.
        let r = cmd_demo(Exchange::Request, &app, tam.path(), agent.path()).unwrap();
        assert_eq!((r.code, r.sent), (ErrorCode::Success, 4));
        assert!(r.metrics_csv.starts_with("teep_errors_sent,"));

        let r = cmd_demo(Exchange::PolicyCheck, &app, tam.path(), agent.path()).unwrap();
        assert_eq!((r.code, r.sent), (ErrorCode::Success, 4));
    }

    #[test]
    fn keygen_and_trust_round_trip() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        cmd_keygen(a.path(), Some("tam")).unwrap();
        cmd_keygen(b.path(), None).unwrap();
        assert!(b.path().join("agent.pub").exists());

        cmd_trust(b.path(), &a.path().join("tam.pub")).unwrap();
        assert!(b.path().join("trusted").join("tam.pub").exists());
        assert!(cmd_trust(b.path(), &a.path().join("missing.pub")).is_err());
    }
}
