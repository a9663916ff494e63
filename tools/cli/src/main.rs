//! Geovault CLI - push, pull and version geo data collections.
//!
//! A thin driver over the sync coordinator. Reports go to stdout; failures
//! exit with the code their error class maps to.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use geovault_common::{CollectionId, Error, VersionId, EXIT_FAILURE};
use geovault_manifest::FormatKind;
use geovault_schema::ExtractedMetadata;
use geovault_storage::create_default_registry;
use geovault_sync::{AssetInput, PublishRequest, SyncConfig, SyncCoordinator, SyncOptions};

#[derive(Parser)]
#[command(name = "geovault")]
#[command(about = "Geovault - versioned sync for geo data collections")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON sync configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Collection directory holding the working files and local manifest.
    #[arg(short, long, global = true, default_value = ".")]
    dir: PathBuf,

    /// Collection name (default: the directory name).
    #[arg(long, global = true)]
    collection: Option<String>,

    /// Remote location, overriding the config file.
    #[arg(short, long, global = true)]
    remote: Option<String>,

    /// Report what would happen without doing it.
    #[arg(long, global = true)]
    dry_run: bool,

    /// Proceed despite conflicts or uncommitted changes.
    #[arg(long, global = true)]
    force: bool,

    /// Print reports as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload unpushed versions.
    Push,

    /// Adopt remote versions and restore working files.
    Pull,

    /// Pull, then push.
    Sync,

    /// Restore an earlier version as a new version.
    Rollback {
        /// Version to restore, e.g. 1.2.0.
        #[arg(value_name = "VERSION")]
        target: String,

        /// Version message.
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Keep only the newest versions' content.
    Prune {
        /// Number of versions to retain.
        #[arg(short, long)]
        keep: usize,
    },

    /// Compare working files, local and remote manifests.
    Status,

    /// Record working files as a new local version.
    Publish {
        /// Working files to include, relative to the collection directory.
        #[arg(short, long = "asset", required = true)]
        assets: Vec<String>,

        /// Version message (generated when omitted).
        #[arg(short, long, default_value = "")]
        message: String,

        /// Extractor output for the collection, as JSON.
        #[arg(long)]
        metadata: Option<PathBuf>,
    },

    /// List the local version history.
    Log,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    // RUST_LOG wins over --verbose.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set up logging: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Exit code for an error, looking through added context.
fn exit_code(error: &anyhow::Error) -> u8 {
    let code = error
        .downcast_ref::<Error>()
        .map_or(EXIT_FAILURE, |e| e.exit_code());
    u8::try_from(code).unwrap_or(1)
}

fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    let Some(path) = path else {
        return Ok(SyncConfig::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    SyncConfig::from_json(&json).with_context(|| format!("Invalid config {}", path.display()))
}

fn collection_name(cli: &Cli) -> Result<String> {
    if let Some(name) = &cli.collection {
        return Ok(name.clone());
    }
    let dir = cli
        .dir
        .canonicalize()
        .with_context(|| format!("Collection directory {} not found", cli.dir.display()))?;
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("Cannot derive a collection name; pass --collection")
}

fn coordinator(cli: &Cli) -> Result<SyncCoordinator> {
    let config = load_config(cli.config.as_deref())?;
    let collection = CollectionId::new(collection_name(cli)?).context("Invalid collection name")?;

    let remote = cli
        .remote
        .clone()
        .or_else(|| config.remote_for(collection.as_str()).map(String::from))
        .context("No remote configured; pass --remote or set one in the config file")?;
    let profile = config.profile_for(collection.as_str()).map(String::from);
    debug!("Resolving remote {} for {}", remote, collection);

    let storage = create_default_registry()
        .resolve(&remote, profile.as_deref())
        .with_context(|| format!("Failed to resolve remote {}", remote))?;

    Ok(SyncCoordinator::new(&cli.dir, collection, storage, config)?)
}

fn print<T: serde::Serialize + std::fmt::Display>(value: &T, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", value);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let coordinator = coordinator(&cli)?;
    let opts = SyncOptions {
        dry_run: cli.dry_run,
        force: cli.force,
    };

    match &cli.command {
        Commands::Push => print(&coordinator.push(opts).await?, cli.json),
        Commands::Pull => print(&coordinator.pull(opts).await?, cli.json),
        Commands::Sync => print(&coordinator.sync(opts).await?, cli.json),
        Commands::Rollback { target, message } => {
            let target = VersionId::parse(target).context("Invalid version")?;
            let report = coordinator.rollback(&target, message.clone(), opts).await?;
            print(&report, cli.json)
        }
        Commands::Prune { keep } => print(&coordinator.prune(*keep, opts).await?, cli.json),
        Commands::Status => print(&coordinator.status().await?, cli.json),
        Commands::Publish {
            assets,
            message,
            metadata,
        } => {
            let metadata = metadata.as_deref();
            cmd_publish(&coordinator, assets, message, metadata, opts, cli.json).await
        }
        Commands::Log => cmd_log(&coordinator, cli.json).await,
    }
}

async fn cmd_publish(
    coordinator: &SyncCoordinator,
    assets: &[String],
    message: &str,
    metadata: Option<&Path>,
    opts: SyncOptions,
    json: bool,
) -> Result<()> {
    let metadata = match metadata {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read metadata {}", path.display()))?;
            serde_json::from_str::<ExtractedMetadata>(&text)
                .with_context(|| format!("Invalid metadata {}", path.display()))?
        }
        None => ExtractedMetadata::empty(FormatKind::Tabular),
    };
    let request = PublishRequest {
        message: message.to_string(),
        assets: assets.iter().map(|a| AssetInput::new(a.as_str())).collect(),
        metadata,
    };

    let outcome = coordinator.publish(&request, opts).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.version)?);
        return Ok(());
    }

    let v = &outcome.version;
    println!(
        "{}{}{}: {}",
        if opts.dry_run { "[dry-run] Would publish " } else { "Published " },
        v.version,
        if v.breaking { " (breaking)" } else { "" },
        v.message
    );
    for change in &outcome.schema_changes {
        println!("  {}", change);
    }
    Ok(())
}

async fn cmd_log(coordinator: &SyncCoordinator, json: bool) -> Result<()> {
    let manifest = coordinator.load_local().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&manifest.versions)?);
        return Ok(());
    }
    if manifest.is_empty() {
        println!("No versions");
        return Ok(());
    }

    for v in manifest.versions.iter().rev() {
        let marker = if Some(v.version) == manifest.current_version {
            "*"
        } else {
            " "
        };
        let flags = match (v.breaking, v.pruned) {
            (true, true) => " [breaking, pruned]",
            (true, false) => " [breaking]",
            (false, true) => " [pruned]",
            (false, false) => "",
        };
        println!(
            "{} {:<10} {}  {}{}",
            marker,
            v.version,
            v.created.format("%Y-%m-%d %H:%M"),
            v.message,
            flags
        );
    }
    Ok(())
}
