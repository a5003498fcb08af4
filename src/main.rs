//! ragent - authenticating TCP relay
//!
//! Exposes one local TCP service to remote clients that prove their identity
//! and hold a grant from this relay.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ragent_auth::{AuthorizationGrant, FileDirectory, GrantDirectory, StaticDirectory};
use ragent_identity::Identity;
use ragent_proto::{VerifyKey, RELAY_CAPABILITY};
use ragent_server::{RelayConfig, RelayContext, RelayOptions, RelayServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// ragent - relay a local service to authorized remote clients
#[derive(Parser, Debug)]
#[command(name = "ragent")]
#[command(about = "Authenticating TLS relay for a local TCP service")]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the relay
    #[command(long_about = r#"
Listen for TLS connections, authenticate each client against the
relay's grants, and relay admitted sessions to the upstream service.

EXAMPLES:
  # Relay to the default local agent, grants read from a file
  ragent serve --identity relay.ent --grants grants.json

  # Admit anyone, relay to a local SSH server
  ragent serve --identity relay.ent --allow everyone --upstream 127.0.0.1:22

ENVIRONMENT VARIABLES:
  RAGENT_IDENTITY           Credential file of the relay
  RAGENT_LISTEN             Listen address
  RAGENT_UPSTREAM           Upstream service address
  RAGENT_GRANTS             Grant file (JSON)
  RAGENT_CAPABILITY         Capability clients must hold
  RAGENT_HANDSHAKE_TIMEOUT  Seconds to wait for a client's reply
    "#)]
    Serve {
        /// Relay credential file
        #[arg(long, env = "RAGENT_IDENTITY")]
        identity: PathBuf,

        /// Address to accept client connections on
        #[arg(long, env = "RAGENT_LISTEN", default_value = "0.0.0.0:4514")]
        listen: SocketAddr,

        /// Local service admitted sessions are relayed to
        #[arg(long, env = "RAGENT_UPSTREAM", default_value = "127.0.0.1:28589")]
        upstream: String,

        /// JSON grant file, re-read for every new session
        #[arg(long, env = "RAGENT_GRANTS")]
        grants: Option<PathBuf>,

        /// Admit a client key without a grant file (repeatable, "everyone" for all)
        #[arg(long, conflicts_with = "grants")]
        allow: Vec<VerifyKey>,

        /// Capability clients must hold
        #[arg(long, env = "RAGENT_CAPABILITY", default_value = RELAY_CAPABILITY)]
        capability: String,

        /// Seconds to wait for the TLS handshake and for the client's reply
        #[arg(long, env = "RAGENT_HANDSHAKE_TIMEOUT", default_value = "10")]
        handshake_timeout: u64,

        /// Seconds between relay progress log lines
        #[arg(long, env = "RAGENT_PROGRESS_INTERVAL", default_value = "5")]
        progress_interval: u64,

        /// Per-direction relay buffer size in bytes
        #[arg(long, env = "RAGENT_BUFFER_SIZE", default_value = "4096")]
        buffer_size: usize,

        /// Lifetime of the generated TLS certificate in days
        #[arg(long, env = "RAGENT_CERT_VALIDITY_DAYS", default_value = "365")]
        cert_validity_days: u64,
    },

    /// Generate a new identity credential file
    Keygen {
        /// Where to write the credential
        #[arg(long, short)]
        out: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the verify-key of a credential file
    ShowKey {
        /// Credential file
        #[arg(long, env = "RAGENT_IDENTITY")]
        identity: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "ragent=debug,ragent_server=debug,ragent_auth=debug".into())
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "ragent=info,ragent_server=info,ragent_auth=info,ragent_cert=info".into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve {
            identity,
            listen,
            upstream,
            grants,
            allow,
            capability,
            handshake_timeout,
            progress_interval,
            buffer_size,
            cert_validity_days,
        } => {
            let relay = Identity::load(&identity)
                .with_context(|| format!("Failed to load relay identity from {}", identity.display()))?;
            let relay_key = relay.verify_key();

            let directory = build_directory(relay_key, grants, &allow, &capability).await?;

            let config = RelayConfig {
                listen_addr: listen,
                upstream_addr: upstream,
                capability,
                handshake_timeout: Duration::from_secs(handshake_timeout),
                relay: RelayOptions {
                    buffer_size,
                    progress_interval: Duration::from_secs(progress_interval),
                },
                cert_validity: cert_validity(cert_validity_days)?,
            };

            info!("🚀 Starting ragent {}", env!("GIT_TAG"));
            info!("Relay key: {}", relay_key);
            info!("Listen: {}", config.listen_addr);
            info!("Upstream: {}", config.upstream_addr);

            let context = Arc::new(
                RelayContext::new(relay, directory, config.cert_validity)
                    .context("Failed to provision relay certificate")?,
            );
            let server = RelayServer::bind(config, context).await?;

            tokio::select! {
                result = server.run() => {
                    result.context("Relay server stopped")?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down");
                }
            }
        }

        Commands::Keygen { out, force } => {
            let identity = Identity::generate();
            identity
                .save(&out, force)
                .with_context(|| format!("Failed to write credential to {}", out.display()))?;
            println!("{}", identity.verify_key());
        }

        Commands::ShowKey { identity } => {
            let identity = Identity::load(&identity)
                .with_context(|| format!("Failed to load identity from {}", identity.display()))?;
            println!("{}", identity.verify_key());
        }
    }

    Ok(())
}

fn cert_validity(days: u64) -> Result<Duration> {
    days.checked_mul(24 * 60 * 60)
        .map(Duration::from_secs)
        .with_context(|| format!("Certificate validity of {} days is too large", days))
}

async fn build_directory(
    relay_key: VerifyKey,
    grants: Option<PathBuf>,
    allow: &[VerifyKey],
    capability: &str,
) -> Result<Arc<dyn GrantDirectory>> {
    if let Some(path) = grants {
        let directory = FileDirectory::open(&path)
            .await
            .with_context(|| format!("Failed to open grant file {}", path.display()))?;
        return Ok(Arc::new(directory));
    }

    if allow.is_empty() {
        warn!("No --grants or --allow given, every client will be refused");
    }

    let grants = allow
        .iter()
        .map(|receiver| AuthorizationGrant::new(relay_key, *receiver, capability))
        .collect();
    Ok(Arc::new(StaticDirectory::new(grants)))
}
