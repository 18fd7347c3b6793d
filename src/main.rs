//! # Gateway Sync - Command Line Entry Point
//!
//! ```text
//! gateway-sync [--config FILE] sync     --state kong.yaml [--state more.yaml] [--dry-run]
//! gateway-sync [--config FILE] diff     --state kong.yaml
//! gateway-sync [--config FILE] dump     [--output FILE] [--json]
//! gateway-sync [--config FILE] validate --state kong.yaml
//! ```
//!
//! Configuration comes from the optional config file, then `GATEWAY_SYNC_*`
//! environment variables, then command line flags. Ctrl-C stops a running sync
//! after the in-flight request.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gateway_sync::dump::{self, DumpOptions};
use gateway_sync::file::{self, LoadOptions};
use gateway_sync::observability::{init_logging, redact_headers};
use gateway_sync::{AdminApi, AdminClient, KongState, SyncConfig, Syncer};

#[derive(Debug, Parser)]
#[command(name = "gateway-sync", version, about = "Declarative configuration sync for the gateway admin API")]
struct Cli {
    /// Configuration file (YAML or JSON)
    #[arg(long, short, value_name = "FILE", env = "GATEWAY_SYNC_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Admin API base URL, overrides the configuration
    #[arg(long, global = true)]
    admin_url: Option<String>,

    /// Workspace to operate in
    #[arg(long, global = true)]
    workspace: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Converge the gateway onto the state files
    Sync {
        #[command(flatten)]
        state: StateArgs,

        /// Compute and report changes without calling the admin API
        #[arg(long)]
        dry_run: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show what a sync would change
    Diff {
        #[command(flatten)]
        state: StateArgs,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write the gateway's current configuration as a state file
    Dump {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Destination file, stdout when omitted
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Write JSON instead of YAML
        #[arg(long)]
        json: bool,
    },

    /// Check that the state files parse and their references resolve
    Validate {
        #[command(flatten)]
        state: StateArgs,
    },
}

#[derive(Debug, Args)]
struct StateArgs {
    /// State file; repeat to merge several files
    #[arg(long = "state", short = 's', value_name = "FILE", required = true)]
    files: Vec<PathBuf>,

    #[command(flatten)]
    selection: SelectionArgs,
}

#[derive(Debug, Args)]
struct SelectionArgs {
    /// Only manage entities carrying this tag; repeatable
    #[arg(long = "select-tag", value_name = "TAG")]
    select_tags: Vec<String>,

    /// Leave consumers and their credentials alone
    #[arg(long)]
    skip_consumers: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli).await?;
    init_logging(&config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "gateway-sync starting");

    match cli.command {
        Command::Sync { state, dry_run, json } => {
            let dry_run = dry_run || config.sync.dry_run;
            run_sync(&config, &state, dry_run, json).await
        }
        Command::Diff { state, json } => run_sync(&config, &state, true, json).await,
        Command::Dump {
            selection,
            output,
            json,
        } => run_dump(&config, &selection, output, json).await,
        Command::Validate { state } => {
            let target = load_target(&config, &state).await?;
            for (entity_type, count) in target.counts() {
                println!("{:<28} {}", entity_type.to_string(), count);
            }
            println!("state files are valid: {} entities", target.len());
            Ok(())
        }
    }
}

async fn load_config(cli: &Cli) -> anyhow::Result<SyncConfig> {
    let mut config = match &cli.config {
        Some(path) => SyncConfig::load(path)
            .await
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => SyncConfig::default(),
    };
    config.apply_env_overrides()?;
    if let Some(url) = &cli.admin_url {
        config.admin.url = url.clone();
    }
    if let Some(workspace) = &cli.workspace {
        config.admin.workspace = Some(workspace.clone());
    }
    config.validate()?;
    Ok(config)
}

/// Config-level selection merged with the flags
fn selection(config: &SyncConfig, args: &SelectionArgs) -> (Vec<String>, bool) {
    let mut tags = config.sync.select_tags.clone();
    for tag in &args.select_tags {
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
    }
    (tags, args.skip_consumers || config.sync.skip_consumers)
}

async fn load_target(config: &SyncConfig, args: &StateArgs) -> anyhow::Result<KongState> {
    let (select_tags, skip_consumers) = selection(config, &args.selection);
    let options = LoadOptions {
        select_tags,
        skip_consumers,
        control_plane_id: config.konnect.as_ref().and_then(|k| k.control_plane_id.clone()),
    };
    let target = file::load_files(&args.files, &options)
        .await
        .context("failed to load state files")?;
    Ok(target)
}

struct Clients {
    admin: Arc<dyn AdminApi>,
    konnect: Option<Arc<dyn AdminApi>>,
}

fn connect(config: &SyncConfig) -> anyhow::Result<Clients> {
    info!(
        url = %config.admin.url,
        workspace = config.admin.workspace.as_deref().unwrap_or("default"),
        headers = ?redact_headers(&config.admin.headers),
        "using admin API"
    );
    let admin: Arc<dyn AdminApi> = Arc::new(AdminClient::new(&config.admin)?);
    let konnect = match &config.konnect {
        Some(konnect) => {
            let client: Arc<dyn AdminApi> = Arc::new(AdminClient::konnect(konnect)?);
            Some(client)
        }
        None => None,
    };
    Ok(Clients { admin, konnect })
}

async fn run_sync(config: &SyncConfig, args: &StateArgs, dry_run: bool, json: bool) -> anyhow::Result<()> {
    let target = load_target(config, args).await?;
    let clients = connect(config)?;

    let (select_tags, skip_consumers) = selection(config, &args.selection);
    let current = dump::dump(
        clients.admin.as_ref(),
        clients.konnect.as_deref(),
        &DumpOptions {
            select_tags,
            skip_consumers,
        },
    )
    .await
    .context("failed to read the current configuration")?;

    let mut syncer = Syncer::new(current, target, Arc::clone(&clients.admin)).dry_run(dry_run);
    if let Some(konnect) = clients.konnect {
        syncer = syncer.with_konnect(konnect);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the in-flight request");
            on_signal.cancel();
        }
    });

    let report = match syncer.run(&cancel).await {
        Ok(report) => report,
        Err(e) => {
            error!(
                error_type = e.error_type(),
                retryable = e.is_retryable(),
                "sync aborted: {}",
                e
            );
            return Err(e.into());
        }
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }
    Ok(())
}

async fn run_dump(
    config: &SyncConfig,
    args: &SelectionArgs,
    output: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let clients = connect(config)?;
    let (select_tags, skip_consumers) = selection(config, args);
    let state = dump::dump(
        clients.admin.as_ref(),
        clients.konnect.as_deref(),
        &DumpOptions {
            select_tags,
            skip_consumers,
        },
    )
    .await
    .context("failed to read the current configuration")?;

    let document = file::render(&state)?;
    let text = if json {
        serde_json::to_string_pretty(&document)?
    } else {
        serde_yaml::to_string(&document)?
    };

    match output {
        Some(path) => {
            if path.exists() && path.is_dir() {
                bail!("{} is a directory", path.display());
            }
            tokio::fs::write(&path, text)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), entities = state.len(), "dump written");
        }
        None => print!("{}", text),
    }
    Ok(())
}
