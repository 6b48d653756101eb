//! Callout - announcement dispatch for queue-management speakers
//!
//! Runs as a daemon (`serve`) or as a one-shot CLI. One-shot commands go
//! through a running daemon when there is one so they share its health
//! state and per-endpoint ordering.

use anyhow::{bail, Result};
use callout::announcement::AnnouncementRequest;
use callout::announcer::Announcer;
use callout::config::Config;
use callout::endpoint::{Credentials, EndpointConfig};
use callout::ipc::{self, IpcClient, IpcServer};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Run in-process even if a daemon is listening
    #[arg(long, global = true)]
    local: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Announce text on an endpoint
    Announce {
        endpoint: String,
        text: String,
        #[arg(short, long, default_value = "en")]
        language: String,
        #[arg(long, default_value_t = 80)]
        volume: u8,
        /// Token/counter context for logs
        #[arg(long, default_value = "")]
        context: String,
    },
    /// Detect which protocol a device speaks
    Detect {
        address: String,
        #[arg(short, long, default_value_t = 80)]
        port: u16,
        #[arg(short, long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        token: Option<String>,
        /// Store the winner as a new endpoint with this id
        #[arg(long)]
        save_as: Option<String>,
    },
    /// Show endpoint health
    Status {
        endpoint: Option<String>,
        /// Re-check before reporting
        #[arg(long)]
        refresh: bool,
    },
    /// Stop whatever an endpoint is announcing
    Stop { endpoint: String },
    /// Run the daemon
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // Setup logging: RUST_LOG wins, then --verbose, then the config
    let default_level = if args.verbose {
        "debug".to_string()
    } else {
        config.log_level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let client = IpcClient::default();
    let use_daemon = !args.local
        && !matches!(args.command, Command::Serve)
        && client.is_daemon_running();

    if use_daemon {
        return run_remote(client, args).await;
    }

    match args.command {
        Command::Serve => serve(config).await,
        command => run_local(config, args.config, command).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    info!("📢 Callout v{} starting...", env!("CARGO_PKG_VERSION"));

    let announcer = Arc::new(Announcer::from_config(&config)?);
    for id in announcer.endpoint_ids() {
        let status = announcer.refresh(&id).await?;
        info!("   {} -> {}", id, status);
    }

    let server = IpcServer::new(ipc::socket_path());
    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("👋 Shutting down");
            shutdown.cancel();
        }
    });

    info!("✅ Callout ready");
    server.run(announcer).await
}

async fn run_local(config: Config, config_path: Option<PathBuf>, command: Command) -> Result<()> {
    let announcer = Announcer::from_config(&config)?;

    match command {
        Command::Announce {
            endpoint,
            text,
            language,
            volume,
            context,
        } => {
            let req = AnnouncementRequest::new(&text, &language, volume).with_context(&context);
            let outcome = announcer.dispatch_announcement(&endpoint, &req).await;
            println!("{}", outcome.summary());
            if !outcome.delivered() {
                bail!("announcement was not delivered");
            }
        }
        Command::Detect {
            address,
            port,
            username,
            password,
            token,
            save_as,
        } => {
            let credentials = credentials(username, password, token);
            let result = announcer
                .run_detection(&address, port, credentials.clone())
                .await;
            println!("{}", serde_json::to_string_pretty(&result)?);

            let mut config = config;
            config.recent_kinds = announcer.recent_kinds();
            if let (Some(id), Some(kind)) = (save_as, result.kind) {
                let mut endpoint = EndpointConfig::new(&id, &address, port, kind);
                endpoint.credentials = credentials;
                announcer.reconfigure(endpoint.clone())?;
                config.upsert_endpoint(endpoint);
                info!("💾 Saved endpoint {} as {}", id, kind.display_name());
            }
            match &config_path {
                Some(path) => config.save_to(path)?,
                None => config.save()?,
            }
        }
        Command::Status { endpoint, refresh } => {
            let ids = match endpoint {
                Some(id) => vec![id],
                None => announcer.endpoint_ids(),
            };
            for id in ids {
                let status = if refresh {
                    announcer.refresh(&id).await?
                } else {
                    announcer.get_status(&id)
                };
                println!("{}: {}", id, status);
            }
        }
        Command::Stop { endpoint } => {
            // Nothing is in flight in a fresh process, so go straight to the device
            announcer.stop_device(&endpoint).await?;
            println!("{}: stopped", endpoint);
        }
        Command::Serve => bail!("serve does not run as a one-shot command"),
    }
    Ok(())
}

async fn run_remote(client: IpcClient, args: Args) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        match args.command {
            Command::Announce {
                endpoint,
                text,
                language,
                volume,
                context,
            } => {
                let req = AnnouncementRequest::new(&text, &language, volume).with_context(&context);
                let outcome = client.announce(&endpoint, req)?;
                println!("{}", outcome.summary());
                if !outcome.delivered() {
                    bail!("announcement was not delivered");
                }
            }
            Command::Detect {
                address,
                port,
                username,
                password,
                token,
                save_as,
            } => {
                if save_as.is_some() {
                    warn!("⚠️ --save-as is ignored while a daemon is running");
                }
                let result = client.detect(&address, port, credentials(username, password, token))?;
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            Command::Status { endpoint, refresh } => {
                if refresh {
                    let messages = match &endpoint {
                        Some(id) => vec![client.refresh(id)?],
                        None => client.refresh_all()?,
                    };
                    for message in messages {
                        println!("{}", message);
                    }
                }
                for entry in client.status(endpoint.as_deref())? {
                    println!("{}: {} {}", entry.endpoint_id, entry.status, entry.detail);
                }
            }
            Command::Stop { endpoint } => {
                let report = client.stop(&endpoint)?;
                println!("{}: {:?}", endpoint, report);
            }
            Command::Serve => bail!("a daemon is already listening on {:?}", client.path()),
        }
        Ok(())
    })
    .await?
}

fn credentials(
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
) -> Option<Credentials> {
    match (username, token) {
        (Some(user), token) => {
            let mut creds = Credentials::basic(&user, password.as_deref().unwrap_or(""));
            creds.token = token;
            Some(creds)
        }
        (None, Some(token)) => Some(Credentials::bearer(&token)),
        (None, None) => None,
    }
}
