use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dockyard::db::{self, PluginRecord, PluginRepo, PluginStore};
use dockyard::plugins::{
    BackendCatalog, check_compatibility, discover_plugins, plugin_dir, read_manifest,
};
use dockyard::{Config, Daemon};

/// Dockyard - runtime plugin host
#[derive(Parser)]
#[command(name = "dockyard", version, about)]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "DOCKYARD_PORT")]
    port: Option<u16>,

    /// Plugins root directory
    #[arg(long, env = "DOCKYARD_PLUGINS_DIR")]
    plugins_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// List discovered plugins and their persisted state
    List,
    /// Validate a plugin's manifest and core version requirement
    Check {
        /// Plugin id
        id: String,
    },
    /// Record an installed plugin from its manifest (disabled)
    Register {
        /// Plugin id
        id: String,
    },
    /// Enable a plugin after verifying it loads
    Enable {
        /// Plugin id
        id: String,
    },
    /// Disable a plugin
    Disable {
        /// Plugin id
        id: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,dockyard=info",
        1 => "info,dockyard=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(port) = cli.port {
        config.api_server.port = port;
    }
    if let Some(dir) = cli.plugins_dir {
        config.plugins.dir = dir;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::List => list(&config),
        Command::Check { id } => check(&config, &id),
        Command::Register { id } => register(&config, &id),
        Command::Enable { id } => set_enabled(config, &id, true).await,
        Command::Disable { id } => set_enabled(config, &id, false).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        port = config.api_server.port,
        plugins_dir = %config.plugins.dir.display(),
        "starting dockyard"
    );

    let daemon = Daemon::new(config)?;
    daemon.run(BackendCatalog::new()).await?;
    Ok(())
}

fn list(config: &Config) -> anyhow::Result<()> {
    let repo = PluginRepo::new(db::init(config.db_path())?);
    let plugins = discover_plugins(&config.plugins.dir);

    if plugins.is_empty() {
        println!("No plugins found in {}", config.plugins.dir.display());
        return Ok(());
    }

    for (dir, manifest) in plugins {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match manifest {
            Ok(manifest) => {
                let state = match repo.get(&manifest.id)? {
                    Some(record) if record.enabled => "enabled",
                    Some(_) => "disabled",
                    None => "unregistered",
                };
                println!(
                    "{:<24} {:<10} {:<12} {}",
                    manifest.id, manifest.version, state, manifest.name
                );
            }
            Err(e) => println!("{name:<24} {:<10} {:<12} {e}", "-", "invalid"),
        }
    }

    Ok(())
}

fn check(config: &Config, id: &str) -> anyhow::Result<()> {
    let options = config.plugins.registry_options()?;
    let manifest = read_manifest(&plugin_dir(&options.plugins_root, id)?)?;
    check_compatibility(&manifest.dependencies.core, &options.core_version)?;

    println!(
        "{} {} is valid (requires core {}, host is {})",
        manifest.id, manifest.version, manifest.dependencies.core, options.core_version
    );
    Ok(())
}

fn register(config: &Config, id: &str) -> anyhow::Result<()> {
    let manifest = read_manifest(&plugin_dir(&config.plugins.dir, id)?)?;
    let repo = PluginRepo::new(db::init(config.db_path())?);

    let mut record = PluginRecord::new(&manifest.id, &manifest.name, &manifest.version);
    if let Some(existing) = repo.get(id)? {
        record.enabled = existing.enabled;
        record.status = existing.status;
        record.download_url = existing.download_url;
        record.checksum = existing.checksum;
    }
    repo.upsert(&record)?;

    println!(
        "Registered {} {} ({})",
        record.uuid,
        record.version,
        if record.enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

async fn set_enabled(config: Config, id: &str, enabled: bool) -> anyhow::Result<()> {
    let daemon = Daemon::new(config)?;
    let registry = daemon.registry(BackendCatalog::new())?;

    if enabled {
        registry.enable_plugin(id).await?;
    } else {
        registry.disable_plugin(id).await?;
    }
    registry.shutdown().await;

    println!("{id} {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}
