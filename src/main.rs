//! Scripted chat streaming server.
//!
//! # Usage
//!
//! ```bash
//! # Serve with defaults on 127.0.0.1:3000
//! inventing-chat serve
//!
//! # With config file and a listen override
//! inventing-chat --config config/chat.toml serve --listen 0.0.0.0:3000
//!
//! # Stream a reply from a running server
//! inventing-chat chat "tell me a joke"
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use inventing_chat::{
    backend::create_backends,
    client::ChatClient,
    config::{Config, LoggingConfig},
    metrics::{init_metrics, start_metrics_server},
    server::{router, AppState, HttpListener},
    shutdown::ShutdownCoordinator,
    streaming::{Frame, TokioTimer},
};

/// Scripted chat streaming server and client.
#[derive(Parser, Debug)]
#[command(name = "inventing-chat")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, value_name = "CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server.
    Serve {
        /// Override listen address.
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Send one message to a running server and print the streamed reply.
    Chat {
        message: String,

        /// Override server base URL.
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_ref())?;
    if args.debug {
        config.logging.level = "debug".to_string();
    }

    match args.command {
        Command::Serve { listen } => {
            if let Some(listen) = listen {
                config.server.listen_addr = listen;
            }
            init_logging(&config.logging)?;
            serve(config).await
        }
        Command::Chat { message, url } => {
            if let Some(url) = url {
                config.client.base_url = url;
            }
            init_logging(&config.logging)?;
            chat(config, &message).await
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        listen_addr = %config.server.listen_addr,
        thinking_delay_ms = config.stream.thinking_delay_ms,
        fragment_delay_ms = config.stream.fragment_delay_ms,
        id_generator = %config.stream.id_generator,
        "Starting chat server"
    );

    init_metrics();
    if config.metrics.enabled {
        let addr = config.metrics.listen_addr.parse()?;
        start_metrics_server(addr)?;
    }

    let shutdown = ShutdownCoordinator::new();
    let backends = create_backends(&config);
    let state = AppState::new(&config, backends, Arc::new(TokioTimer), shutdown.clone())?;
    let app = router(state, config.server.max_body_bytes);

    let listener = HttpListener::bind(&config.server, shutdown.clone()).await?;
    tracing::info!(addr = %listener.local_addr(), "Server listening");

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = handle_signals(signal_shutdown.clone()).await {
            tracing::error!(error = %e, "Failed to install signal handlers, shutting down");
            signal_shutdown.shutdown();
        }
    });

    listener.serve(app).await;

    tracing::info!(
        active = shutdown.active_sessions(),
        timeout_secs = config.server.shutdown_timeout_secs,
        "Waiting for sessions to drain"
    );

    match tokio::time::timeout(config.server.shutdown_timeout(), shutdown.wait_for_drain()).await {
        Ok(()) => tracing::info!("All sessions drained"),
        Err(_) => tracing::warn!(
            active = shutdown.active_sessions(),
            "Shutdown timeout reached, forcing exit"
        ),
    }

    tracing::info!("Server stopped");
    Ok(())
}

async fn chat(config: Config, message: &str) -> anyhow::Result<()> {
    let client = ChatClient::new(&config.client)?;
    tracing::debug!(endpoint = client.endpoint(), "Sending chat message");

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let mut stdout = std::io::stdout();
    let result = client
        .send(message, cancel_rx, |frame, _| {
            if let Frame::Chunk { content } = frame {
                let _ = write!(stdout, "{}", content);
                let _ = stdout.flush();
            }
        })
        .await;
    println!();

    match result {
        Ok(state) => {
            tracing::debug!(
                session_id = state.session_id.as_deref().unwrap_or(""),
                chars = state.text.chars().count(),
                malformed = state.malformed_frames,
                "Reply complete"
            );
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!("Chat failed: {}", e)),
    }
}

/// Initialize logging with tracing.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}

/// Handle Unix signals.
async fn handle_signals(shutdown: ShutdownCoordinator) -> std::io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating shutdown");
                shutdown.shutdown();
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating shutdown");
                shutdown.shutdown();
                break;
            }
            _ = sighup.recv() => {
                tracing::info!(
                    active_sessions = shutdown.active_sessions(),
                    "Received SIGHUP, status report"
                );
            }
        }
    }

    Ok(())
}
