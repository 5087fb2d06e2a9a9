use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bridgekit::api::{self, ApiState};
use bridgekit::demo;
use bridgekit::dispatcher::Dispatcher;
use bridgekit::generate;
use bridgekit::registry::Registry;
use bridgekit::settings::{self, BridgeConfig};

// ── Argument parsing ─────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "bridgekit", about = "Typed command bridge server", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// JSON config file. Missing file means defaults.
    #[arg(long, global = true, env = "BRIDGEKIT_CONFIG", default_value = "bridge.json")]
    config: PathBuf,

    /// Expose internal error text and log at debug level
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the registered commands over HTTP (default)
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Write the TypeScript client here on startup
        #[arg(long)]
        generate_ts: Option<PathBuf>,
        /// API title reported by the health endpoint
        #[arg(long)]
        title: Option<String>,
    },
    /// Write the TypeScript client and exit
    Generate {
        /// Output file; defaults to `generate_ts` from the config
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
}

fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_registry() -> anyhow::Result<Registry> {
    let mut registry = Registry::new();
    demo::register(&mut registry).context("failed to register commands")?;
    Ok(registry)
}

fn log_banner(config: &BridgeConfig, registry: &Registry) {
    tracing::info!("{} ({} commands)", config.title, registry.len());
    for def in registry.list_all() {
        let marker = if def.is_stream() { " [channel]" } else { "" };
        tracing::info!("  {}({}){marker}", def.name, def.param_names().join(", "));
    }
}

async fn serve(config: BridgeConfig, registry: Registry) -> anyhow::Result<()> {
    log_banner(&config, &registry);

    if let Some(path) = &config.generate_ts {
        // A broken client must not keep the server down.
        if let Err(e) = generate::generate(&registry, path) {
            tracing::error!("TypeScript generation failed: {e}");
        }
    }

    let addr = config.socket_addr().await?;
    let state = Arc::new(ApiState {
        dispatcher: Dispatcher::new(Arc::new(registry)),
        config,
    });
    let local = api::start_api_server(state, addr).await?;
    tracing::info!("Bridge listening on http://{local}");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = settings::load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    config.debug |= cli.debug;
    init_tracing(config.debug);

    let registry = build_registry()?;

    match cli.command {
        None => serve(config, registry).await,
        Some(Commands::Serve {
            host,
            port,
            generate_ts,
            title,
        }) => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(path) = generate_ts {
                config.generate_ts = Some(path);
            }
            if let Some(title) = title {
                config.title = title;
            }
            serve(config, registry).await
        }
        Some(Commands::Generate { out }) => {
            let out = out
                .or(config.generate_ts)
                .unwrap_or_else(|| PathBuf::from("generated/api.ts"));
            generate::generate(&registry, &out)?;
            println!("Wrote {}", out.display());
            Ok(())
        }
    }
}
