//! TEEP CLI
//!
//! Commands:
//!   1) keygen [--dir D] [--label L]
//!      - Provisions (or reloads) the role identity in D and prints its public
//!        key file and fingerprint.
//!   2) trust [--dir D] <peer.pub>
//!      - Out-of-band key exchange: installs a peer public key into D/trusted/.
//!   3) demo <request|unrequest|policy-check> [--app UUID] --tam-dir T --agent-dir A
//!      - Provisions both roles, exchanges keys, and runs one exchange over the
//!        in-process loopback, printing the outcome and counters.
//!
//! Notes:
//!   - D defaults to $TEEP_DATA_DIR, then ".teep".
//!   - Each data directory may hold a teep.toml with the role's configuration.
//!   - RUST_LOG controls log output (default: warn).

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

/// CLI definition
#[derive(Parser)]
#[command(name = "teep", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Provision this role's signing identity (idempotent)
    Keygen {
        /// Role data directory
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Identity label; defaults to the configured role label
        #[arg(long)]
        label: Option<String>,
    },

    /// Trust a peer public key file
    Trust {
        /// Role data directory
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Peer's <label>.pub file
        file: PathBuf,
    },

    /// Run one exchange between a local TAM and Agent
    Demo {
        #[arg(value_enum)]
        exchange: Exchange,
        /// Application id (UUID form)
        #[arg(long, default_value = commands::DEFAULT_APP)]
        app: String,
        #[arg(long)]
        tam_dir: PathBuf,
        #[arg(long)]
        agent_dir: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Exchange {
    Request,
    Unrequest,
    PolicyCheck,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn data_dir(arg: Option<PathBuf>) -> PathBuf {
    arg.or_else(|| std::env::var_os("TEEP_DATA_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(".teep"))
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Keygen { dir, label } => commands::cmd_keygen(&data_dir(dir), label.as_deref()),
        Cmd::Trust { dir, file } => commands::cmd_trust(&data_dir(dir), &file),
        Cmd::Demo { exchange, app, tam_dir, agent_dir } => {
            let report = commands::cmd_demo(exchange, &app.parse::<teep_core::AppId>()?, &tam_dir, &agent_dir)?;
            println!("outcome={}", report.code);
            println!("outbound_delta={}", report.sent);
            println!("{}", report.metrics_csv);
            Ok(())
        }
    }
}
