#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use teep_core::config::{AgentConfig, TamConfig};
use teep_core::metrics::Metrics;
use teep_core::{Agent, AppId, SigningIdentity, Tam, TrustStore};
use teep_net::{FaultPlan, LoopbackNetwork};
use teep_store::KeyStore;
use tempfile::TempDir;

pub const TAM_URI: &str = "http://example.com/tam";
pub const AGENT_ADDR: &str = "agent-1";
pub const DEFAULT_TA: &str = "38b08738-227d-4f6a-b1f0-b208bc02a781";

static INIT: std::sync::Once = std::sync::Once::new();

pub fn init_logs() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("warn".parse().unwrap()), // default to WARN
            )
            .with_target(true)
            .try_init();
    });
}

pub fn default_ta() -> AppId {
    DEFAULT_TA.parse().unwrap()
}

/// Provision both roles on disk and exchange their public keys.
pub fn configure_keys(
    tam_dir: &Path,
    agent_dir: &Path,
) -> Result<((SigningIdentity, TrustStore), (SigningIdentity, TrustStore))> {
    let tam_store = KeyStore::open(tam_dir)?;
    let agent_store = KeyStore::open(agent_dir)?;
    let tam = tam_store.load_or_create_identity("tam")?;
    let agent = agent_store.load_or_create_identity("agent")?;

    tam_store.install_trusted_key(&agent_store.public_key_path("agent"))?;
    agent_store.install_trusted_key(&tam_store.public_key_path("tam"))?;

    Ok((
        (tam, tam_store.load_trust_store()?),
        (agent, agent_store.load_trust_store()?),
    ))
}

pub struct Fixture {
    _tam_dir: TempDir,
    _agent_dir: TempDir,
    pub metrics: Arc<Metrics>,
    pub network: LoopbackNetwork,
    pub faults: FaultPlan,
    pub agent: Agent,
}

impl Fixture {
    pub fn outbound(&self) -> u64 {
        self.metrics.outbound_messages()
    }
}

/// TAM catalog holds `DEFAULT_TA`; everything else is default.
pub fn fixture() -> Result<Fixture> {
    let mut tam_config = TamConfig::default();
    tam_config.catalog.insert(default_ta());
    fixture_with(tam_config, AgentConfig::default())
}

pub fn fixture_with(tam_config: TamConfig, agent_config: AgentConfig) -> Result<Fixture> {
    init_logs();
    let tam_dir = TempDir::new()?;
    let agent_dir = TempDir::new()?;
    let ((tam_id, tam_trust), (agent_id, agent_trust)) =
        configure_keys(tam_dir.path(), agent_dir.path())?;

    // One registry for both roles: a process-wide view of the exchange.
    let metrics = Arc::new(Metrics::new());
    let network = LoopbackNetwork::new();
    network.register_tam(
        TAM_URI,
        Tam::new(tam_id, Arc::new(tam_trust), metrics.clone(), tam_config),
    );

    let faults = FaultPlan::new();
    let transport = network.transport_with_faults(AGENT_ADDR, faults.clone());
    let agent = Agent::new(
        agent_id,
        Arc::new(agent_trust),
        metrics.clone(),
        agent_config,
        Box::new(transport),
    );
    Ok(Fixture { _tam_dir: tam_dir, _agent_dir: agent_dir, metrics, network, faults, agent })
}
