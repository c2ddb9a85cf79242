use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use plughost::config::ConfigStore;
use plughost::defaults::builtin_packages;
use plughost::lifecycle::Lifecycle;
use plughost::loader::{DryRunInjector, ModuleNamespace, PluginLoader};
use plughost::package::{export_package, ingest_archive, IngestMode};
use plughost::repository::{
    run_server, DestroyPhase, DiskProtocol, DiskStore, HttpRepositoryClient,
};

const DEFAULT_BIND: &str = "127.0.0.1:7420";
const DEFAULT_SERVER: &str = "http://127.0.0.1:7420";

#[derive(Parser)]
#[command(name = "plughost")]
#[command(about = "Plugin runtime and distribution subsystem", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the repository serving process
    Serve {
        /// Directory holding the package tree
        #[arg(short, long, default_value = "plugins")]
        root: PathBuf,
        /// Address to bind
        #[arg(short, long, default_value = DEFAULT_BIND)]
        bind: String,
    },
    /// List installed plugins and, with a server, repository entries
    List {
        /// Repository server to query for available entries
        #[arg(short, long)]
        server: Option<String>,
    },
    /// Ingest a plugin archive and install it (enabled)
    Install {
        /// Path to a .zip plugin package
        archive: PathBuf,
    },
    /// Ingest a plugin archive and upload it to the repository
    Upload {
        /// Path to a .zip plugin package
        archive: PathBuf,
        #[arg(short, long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Flip a plugin between enabled and disabled
    Toggle { id: String },
    /// Remove a disabled plugin from the installed set
    Uninstall { id: String },
    /// Hide a non-installed plugin from repository discovery
    Block { id: String },
    /// Undo a block
    Restore { id: String },
    /// Permanently destroy a plugin's repository storage
    Destroy {
        id: String,
        #[arg(short, long, default_value = DEFAULT_SERVER)]
        server: String,
        /// Poll until the serving process has stopped
        #[arg(short, long)]
        wait: bool,
    },
    /// Auto-install or patch the built-in default plugins
    Reconcile,
    /// Export an installed plugin as a standalone archive
    Export {
        id: String,
        /// Output path (defaults to <id>.zip)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Resolve every enabled plugin through the dry-run injector
    Check,
    /// Show version information
    Version,
}

fn config_store() -> ConfigStore {
    match std::env::var("PLUGHOST_CONFIG") {
        Ok(path) if !path.is_empty() => ConfigStore::at(path),
        _ => ConfigStore::open_default(),
    }
}

fn open_lifecycle() -> anyhow::Result<Lifecycle> {
    Lifecycle::open(config_store()).context("failed to load host configuration")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) | None => {
            println!("plughost {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Serve { root, bind }) => {
            run_server(&bind, DiskStore::new(root)).await?;
        }
        Some(Commands::List { server }) => {
            let lifecycle = open_lifecycle()?;
            let config = lifecycle.config();

            println!("Installed ({}):", config.installed.len());
            for package in &config.installed {
                println!(
                    "  {:<40} v{:<10} {}",
                    package.id,
                    package.manifest.version,
                    if package.enabled { "enabled" } else { "disabled" }
                );
            }

            if let Some(server) = server {
                let client = HttpRepositoryClient::new(server);
                let available: Vec<_> = client
                    .list()
                    .await?
                    .into_iter()
                    .filter(|p| !config.is_blocked(&p.id))
                    .collect();
                println!("Available ({}):", available.len());
                for package in available {
                    let state = if config.is_installed(&package.id) {
                        "installed"
                    } else {
                        "available"
                    };
                    println!(
                        "  {:<40} v{:<10} {}",
                        package.id, package.manifest.version, state
                    );
                }
            }
        }
        Some(Commands::Install { archive }) => {
            let bytes = std::fs::read(&archive)
                .with_context(|| format!("failed to read {}", archive.display()))?;
            let package = ingest_archive(&bytes, IngestMode::DirectInstall)?;
            let name = package.manifest.name.clone();
            let version = package.manifest.version.clone();
            open_lifecycle()?.install(package)?;
            println!("Installed \"{}\" v{}", name, version);
        }
        Some(Commands::Upload { archive, server }) => {
            let bytes = std::fs::read(&archive)
                .with_context(|| format!("failed to read {}", archive.display()))?;
            let package = ingest_archive(&bytes, IngestMode::Discovery)?;
            HttpRepositoryClient::new(server).upload(&package).await?;
            println!("Uploaded {}", package.id);
        }
        Some(Commands::Toggle { id }) => {
            let enabled = open_lifecycle()?.toggle(&id)?;
            println!("{} is now {}", id, if enabled { "enabled" } else { "disabled" });
        }
        Some(Commands::Uninstall { id }) => {
            open_lifecycle()?.uninstall(&id)?;
            println!("Uninstalled {}", id);
        }
        Some(Commands::Block { id }) => {
            open_lifecycle()?.soft_block(&id)?;
            println!("Blocked {}", id);
        }
        Some(Commands::Restore { id }) => {
            open_lifecycle()?.restore(&id)?;
            println!("Restored {}", id);
        }
        Some(Commands::Destroy { id, server, wait }) => {
            let client = HttpRepositoryClient::new(server);
            let phase = open_lifecycle()?.hard_delete(&id, &client).await?;
            println!("Destroy {}: {}", id, phase);
            if wait && phase == DestroyPhase::Halting {
                let phase = client.wait_until_stopped(Duration::from_secs(30)).await?;
                println!("Destroy {}: {}", id, phase);
                if phase == DestroyPhase::Stopped {
                    println!("Restart the serving process to continue using the repository.");
                }
            }
        }
        Some(Commands::Reconcile) => {
            let report = open_lifecycle()?.reconcile_defaults(&builtin_packages())?;
            if report.is_noop() {
                println!("Defaults already reconciled.");
            } else {
                for id in &report.installed {
                    println!("Installed default {}", id);
                }
                for id in &report.patched {
                    println!("Patched default {}", id);
                }
            }
        }
        Some(Commands::Export { id, output }) => {
            let lifecycle = open_lifecycle()?;
            let package = lifecycle
                .config()
                .installed(&id)
                .with_context(|| format!("plugin '{}' is not installed", id))?;
            let bytes = export_package(package)?;
            let output = output.unwrap_or_else(|| {
                PathBuf::from(format!("{}.zip", plughost::repository::sanitize_id(&id)))
            });
            std::fs::write(&output, bytes)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!("Exported {} to {}", id, output.display());
        }
        Some(Commands::Check) => {
            let lifecycle = open_lifecycle()?;
            let loader = PluginLoader::new(Arc::new(ModuleNamespace::new()), Arc::new(DryRunInjector));
            let enabled: Vec<_> = lifecycle
                .config()
                .installed
                .iter()
                .filter(|p| p.enabled)
                .collect();
            if enabled.is_empty() {
                println!("No enabled plugins to check.");
            }
            for package in enabled {
                match loader.resolve(package).await {
                    Ok(_) => println!(
                        "ok   {:<40} -> {} ({})",
                        package.id,
                        package.manifest.global_var,
                        package.entry_digest().unwrap_or_default()
                    ),
                    Err(e) => println!("fail {:<40} {}", package.id, e),
                }
            }
        }
    }

    Ok(())
}
