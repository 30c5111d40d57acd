use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use mapmeet::cache::ReconcileOutcome;
use mapmeet::config::{ClientConfig, ConfigError};
use mapmeet::error::ErrorCode;
use mapmeet::identity::IdentityCache;
use mapmeet::net::api::{ApiError, HttpBackend};
use mapmeet::presence::{MembershipReconcile, PRESENCE_KEY, PresenceStore};
use mapmeet::storage::{FileStorage, Storage, StorageError};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("backend error: {0}")]
    Api(#[from] ApiError),
    #[error("no cached identity")]
    NoIdentity,
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "mapmeet", about = "Inspect and reconcile persisted mapmeet client state")]
struct Cli {
    /// Backend base URL (overrides MAPMEET_API_URL).
    #[arg(long)]
    api_url: Option<String>,

    /// Directory holding the persisted documents (overrides MAPMEET_STATE_DIR).
    #[arg(long)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Identity(IdentityCommand),
    Presence(PresenceCommand),
}

#[derive(Args, Debug)]
struct IdentityCommand {
    #[command(subcommand)]
    command: StateSubcommand,
}

#[derive(Args, Debug)]
struct PresenceCommand {
    #[command(subcommand)]
    command: StateSubcommand,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum StateSubcommand {
    /// Print the cached document.
    Show,
    /// Check the cached document against the backend.
    Reconcile,
    /// Delete the cached document.
    Clear,
}

struct CliContext {
    config: ClientConfig,
    storage: Arc<dyn Storage>,
}

impl CliContext {
    fn backend(&self) -> Result<HttpBackend, CliError> {
        Ok(HttpBackend::from_config(&self.config)?)
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!(error = %e, "no .env loaded");
    }

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env()?;
    if let Some(url) = cli.api_url {
        config.api_base_url = url.trim_end_matches('/').to_owned();
    }
    if let Some(dir) = cli.state_dir {
        config.state_dir = dir;
    }
    let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(config.state_dir.clone()));
    let ctx = CliContext { config, storage };

    let result = match cli.command {
        Command::Identity(cmd) => run_identity(&ctx, cmd.command).await,
        Command::Presence(cmd) => run_presence(&ctx, cmd.command).await,
    };
    if let Err(e) = &result {
        tracing::error!(error = %e, code = error_code(e), "command failed");
    }
    result
}

async fn run_identity(ctx: &CliContext, command: StateSubcommand) -> Result<(), CliError> {
    let mut cache = IdentityCache::open(Arc::clone(&ctx.storage));
    match command {
        StateSubcommand::Show => print_json(&cache.current()),
        StateSubcommand::Reconcile => {
            let backend = ctx.backend()?;
            match cache.reconcile(&backend).await.ok_or(CliError::NoIdentity)? {
                ReconcileOutcome::Confirmed(identity) => print_json(&identity),
                ReconcileOutcome::Cleared => {
                    eprintln!("identity no longer exists upstream; cleared identity and presence");
                    Ok(())
                }
                ReconcileOutcome::Kept { reason } => {
                    eprintln!("backend unavailable, kept cached identity: {reason}");
                    Ok(())
                }
            }
        }
        StateSubcommand::Clear => {
            cache.clear()?;
            eprintln!("identity cleared");
            Ok(())
        }
    }
}

async fn run_presence(ctx: &CliContext, command: StateSubcommand) -> Result<(), CliError> {
    match command {
        StateSubcommand::Show => print_json(&PresenceStore::restore(Arc::clone(&ctx.storage))?.snapshot()),
        StateSubcommand::Reconcile => {
            let mut store = PresenceStore::restore(Arc::clone(&ctx.storage))?;
            let identity = IdentityCache::open(Arc::clone(&ctx.storage));
            let user_id = identity.user_id().ok_or(CliError::NoIdentity)?;
            let backend = ctx.backend()?;
            match store.reconcile_membership(&backend, user_id).await {
                MembershipReconcile::NoMembership => eprintln!("no membership to reconcile"),
                MembershipReconcile::Confirmed(poi_id) => eprintln!("still listed in {poi_id}"),
                MembershipReconcile::NotListed(poi_id) => eprintln!("no longer listed in {poi_id}; membership cleared"),
                MembershipReconcile::Absent(poi_id) => eprintln!("{poi_id} no longer exists; membership cleared"),
                MembershipReconcile::Kept { poi_id, reason } => {
                    eprintln!("backend unavailable, kept membership of {poi_id}: {reason}");
                }
            }
            print_json(&store.snapshot())
        }
        StateSubcommand::Clear => {
            // Removed without decoding so a corrupt document can still be cleared.
            ctx.storage.remove(PRESENCE_KEY)?;
            eprintln!("presence cleared");
            Ok(())
        }
    }
}

fn error_code(e: &CliError) -> &'static str {
    match e {
        CliError::Config(e) => e.error_code(),
        CliError::Storage(e) => e.error_code(),
        CliError::Api(e) => e.error_code(),
        CliError::NoIdentity => "E_CLI_NO_IDENTITY",
        CliError::InvalidJson(_) => "E_CLI_JSON",
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
