use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use kr_crypto::PublicKeyBytes;
use kr_relay::{
    config::{self, RelayConfig},
    server::RelayServer,
    Relay, ServerKeyring,
};
use kr_store::{Store, Vault};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

const DEFAULT_LOG_FILTER: &str = "keyrelay=info,kr_relay=info,kr_store=info";

#[derive(Parser, Debug)]
#[command(author, version, about = "Keyrelay ownership-proof and key bundle relay", long_about = None)]
struct Cli {
    /// Data directory (defaults to the platform data directory)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Config file (defaults to config.json in the data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the store, its vault salt and keyring version 1
    Init {
        #[arg(long)]
        server_id: Option<String>,
    },
    /// Add a keyring version; challenges issued under older versions still verify
    RotateKeyring,
    /// Publish a participant and its one-time prekeys from a JSON file
    Seed { file: PathBuf },
    /// Run the relay
    Serve {
        #[arg(long)]
        listen: Option<String>,
    },
}

/// Participant keys as accepted by `seed`.
#[derive(Deserialize)]
struct SeedParticipant {
    participant_id: String,
    identity_key: PublicKeyBytes,
    signed_pre_key: PublicKeyBytes,
    #[serde(default)]
    one_time_pre_keys: Vec<PublicKeyBytes>,
}

struct Setup {
    data: PathBuf,
    config_path: PathBuf,
    config: RelayConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .init();

    let cli = Cli::parse();
    let ctx = load_setup(cli.data_dir, cli.config)?;
    match cli.command {
        Commands::Init { server_id } => init_command(ctx, server_id).await,
        Commands::RotateKeyring => rotate_command(ctx).await,
        Commands::Seed { file } => seed_command(ctx, file).await,
        Commands::Serve { listen } => serve_command(ctx, listen).await,
    }
}

fn load_setup(data_dir_override: Option<PathBuf>, config_override: Option<PathBuf>) -> Result<Setup> {
    let data = match data_dir_override {
        Some(dir) => dir,
        None => config::data_dir()?,
    };
    std::fs::create_dir_all(&data).with_context(|| format!("creating {}", data.display()))?;
    let config_path = config_override.unwrap_or_else(|| data.join(config::CONFIG_FILE));
    let config = RelayConfig::load(&config_path)?;
    Ok(Setup { data, config_path, config })
}

/// Open the store; unlock its vault unless `passphrase` is `None`.
async fn open_store(ctx: &Setup, passphrase: Option<&str>) -> Result<Store> {
    let db_path = ctx.config.database_path(&ctx.data);
    let store = Store::open(&db_path, Vault::new(), ctx.config.busy_timeout())
        .await
        .with_context(|| format!("opening {}", db_path.display()))?;
    if let Some(passphrase) = passphrase {
        let salt = store.vault_salt().await?;
        store.vault.unlock(passphrase.as_bytes(), &salt).await?;
    }
    Ok(store)
}

async fn init_command(mut ctx: Setup, server_id: Option<String>) -> Result<()> {
    if let Some(server_id) = server_id {
        ctx.config.server_id = server_id;
    }
    ctx.config.save(&ctx.config_path)?;

    let passphrase = prompt_passphrase_twice(&ctx.config.passphrase_env, "Create relay passphrase")?;
    let store = open_store(&ctx, Some(passphrase.as_str())).await?;
    let keyring = ServerKeyring::load_or_init(&ctx.config.server_id, &store).await?;
    let current = keyring.current();

    println!("Relay initialized: server id {}", keyring.server_id());
    println!("Keyring version {} ({})", current.version, current.public_key.fingerprint());
    Ok(())
}

async fn rotate_command(ctx: Setup) -> Result<()> {
    let passphrase = prompt_passphrase_once(&ctx.config.passphrase_env, "Enter relay passphrase")?;
    let store = open_store(&ctx, Some(passphrase.as_str())).await?;
    let keyring = ServerKeyring::load(&ctx.config.server_id, &store)
        .await
        .context("loading keyring")?;
    let rotated = keyring.rotate(&store).await?;
    let current = rotated.current();
    println!("Keyring rotated to version {} ({})", current.version, current.public_key.fingerprint());
    Ok(())
}

async fn seed_command(ctx: Setup, file: PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
    let seed: SeedParticipant = serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?;

    // Directory columns are plaintext; the vault stays locked.
    let store = open_store(&ctx, None).await?;
    store
        .publish_participant(&seed.participant_id, &seed.identity_key, &seed.signed_pre_key)
        .await?;
    let indices = store.add_one_time_pre_keys(&seed.participant_id, &seed.one_time_pre_keys).await?;
    println!("Published {} with {} one-time prekeys", seed.participant_id, indices.len());
    Ok(())
}

async fn serve_command(ctx: Setup, listen: Option<String>) -> Result<()> {
    let auth_secret = ctx.config.auth_secret()?;
    let passphrase = prompt_passphrase_once(&ctx.config.passphrase_env, "Enter relay passphrase")?;
    let store = open_store(&ctx, Some(passphrase.as_str())).await?;
    let keyring = Arc::new(
        ServerKeyring::load(&ctx.config.server_id, &store)
            .await
            .context("loading keyring")?,
    );
    info!(
        server_id = keyring.server_id(),
        version = keyring.current().version,
        "keyring ready"
    );

    let relay = Arc::new(Relay::with_store(&store, keyring));
    let addr = listen.unwrap_or_else(|| ctx.config.listen_addr.clone());
    let listener = TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
    let server = Arc::new(RelayServer::new(auth_secret, relay));
    let server_task = tokio::spawn(server.serve(listener));

    info!("relay started");
    signal::ctrl_c().await?;
    info!("relay stopping");
    server_task.abort();
    store.vault.lock().await;
    Ok(())
}

fn prompt_passphrase_once(env_var: &str, prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(env_var) {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }
    let pw = rpassword::prompt_password(prompt).map_err(|e| anyhow!("passphrase prompt: {e}"))?;
    if pw.len() < 12 {
        return Err(anyhow!("passphrase too short; minimum 12 characters"));
    }
    Ok(Zeroizing::new(pw))
}

fn prompt_passphrase_twice(env_var: &str, prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(env_var) {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }
    let first = prompt_passphrase_once(env_var, prompt)?;
    let second = Zeroizing::new(
        rpassword::prompt_password("Confirm passphrase").map_err(|e| anyhow!("passphrase prompt: {e}"))?,
    );
    if *first != *second {
        return Err(anyhow!("passphrases do not match"));
    }
    Ok(first)
}
