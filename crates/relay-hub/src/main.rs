use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use relay_hub::config::Config;
use relay_hub::config_path::ConfigPathStore;
use relay_hub::server::{self, AppState};
use relay_hub::transport::{serve_tcp, serve_unix};

#[derive(Parser, Debug)]
#[command(name = "relay-hub")]
#[command(version)]
#[command(about = "Configuration publication and task queues for remote relays", long_about = None)]
struct Cli {
    /// Path to the config file
    #[arg(short, long, global = true, default_value = "relay-hub.yaml")]
    config: PathBuf,

    /// Site root; overrides `site.omd_root` from the config file
    #[arg(long, global = true)]
    omd_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Port to listen on; overrides `server.port`
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Inspect and maintain configuration generations
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the current generation
    Latest,
    /// Publish a directory tree as a new generation
    Publish {
        /// Directory holding the generation's content
        #[arg(long)]
        from: PathBuf,
    },
    /// Remove superseded generations
    Cleanup,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)
        .await
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(omd_root) = cli.omd_root {
        config.site.omd_root = omd_root;
    }

    match cli.command {
        Command::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config).await
        }
        Command::Config { command } => {
            let store = ConfigPathStore::new(&config.site.omd_root)
                .with_lock_timeout(config.activation.lock_timeout());
            tokio::task::spawn_blocking(move || run_config_command(&store, command)).await?
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    let state = AppState::from_config(&config);
    server::create_startup_config_tasks(&state).await;

    let app = server::build_app(state, config.server.request_timeout_seconds);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_on_ctrl_c(shutdown.clone()));

    let unix = config.server.socket_path.clone().map(|path| {
        let app = app.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_unix(&path, app, shutdown).await {
                error!(path = %path.display(), error = %e, "Unix socket server failed");
            }
        })
    });

    let result = serve_tcp(listener, app, shutdown.clone()).await;
    shutdown.cancel();
    if let Some(handle) = unix {
        let _ = handle.await;
    }
    info!("Server stopped");
    result.context("serving HTTP")
}

async fn shutdown_on_ctrl_c(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
    }
    shutdown.cancel();
}

fn run_config_command(store: &ConfigPathStore, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Latest => match store.latest()? {
            Some(latest) => println!("{}\t{}", latest.serial(), latest.path().display()),
            None => println!("no configuration published"),
        },
        ConfigCommand::Publish { from } => {
            let published = store
                .publish_dir(&from)
                .with_context(|| format!("publishing {}", from.display()))?;
            println!("{}\t{}", published.serial(), published.path().display());
        }
        ConfigCommand::Cleanup => {
            for path in store.cleanup_old_configs()? {
                println!("removed {}", path.display());
            }
        }
    }
    Ok(())
}
