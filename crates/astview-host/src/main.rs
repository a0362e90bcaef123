//! Astview Host - serves a syntax tree to view processes.
//!
//! Binds the connection broker, opens a view session, launches the view and
//! keeps it in sync with the tree file and the editor cursor (read as line
//! commands on stdin).

mod commands;
mod highlight;
mod launcher;
mod model;
mod watch;

use anyhow::{Context, Result};
use astview_core::config::BrokerConfig;
use astview_core::services::BackendDispatcher;
use astview_core::{BrokerSettings, ConnectionBroker, JsonTreeProvider, ViewLauncher, ViewSession};
use clap::Parser;
use commands::Command;
use highlight::{LoggingHighlighter, SyntaxTreeBackend};
use launcher::{ProcessLauncher, UrlLauncher};
use model::TreeModel;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use url::Url;
use watch::SourceWatcher;

#[derive(Parser, Debug)]
#[command(name = "astview-host")]
#[command(about = "Serve a syntax tree to astview view processes")]
struct Args {
    /// Pre-extracted syntax tree (JSON) to display
    tree: PathBuf,

    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value_t = BrokerConfig::DEFAULT_PORT)]
    port: u16,

    /// Host to bind to and advertise to views
    #[arg(long, default_value = BrokerConfig::DEFAULT_HOST)]
    host: String,

    /// Limit on simultaneous view connections (unlimited if not given)
    #[arg(long)]
    max_connections: Option<usize>,

    /// View executable to spawn (defaults to astview-view next to this binary)
    #[arg(long)]
    view_exe: Option<PathBuf>,

    /// Base URL the address parameter is appended to
    #[arg(long, default_value = "astview://view/index.html")]
    view_url: Url,

    /// Only print the view URL instead of spawning a view process
    #[arg(long)]
    no_spawn: bool,

    /// Title of the view
    #[arg(long, default_value = "Syntax Tree")]
    title: String,

    /// Do not reload the tree when its file changes
    #[arg(long)]
    no_watch: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn init_logging(debug: bool) {
    let log_level = if debug { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact();

    match EnvFilter::try_from_default_env() {
        Ok(filter) => builder.with_env_filter(filter).init(),
        Err(_) => builder.init(),
    }
}

fn default_view_exe() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot locate the host executable")?;
    let dir = exe
        .parent()
        .context("host executable has no parent directory")?;
    Ok(dir.join(format!("astview-view{}", std::env::consts::EXE_SUFFIX)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    info!("Starting astview host");

    let settings =
        BrokerSettings::new(args.host.clone(), args.port).with_max_connections(args.max_connections);
    let mut handle = ConnectionBroker::bind(settings)
        .await
        .context("failed to start connection broker")?;

    let launcher: Box<dyn ViewLauncher> = if args.no_spawn {
        Box::new(UrlLauncher::new(args.view_url.clone()))
    } else {
        let exe = match args.view_exe.clone() {
            Some(exe) => exe,
            None => default_view_exe()?,
        };
        Box::new(ProcessLauncher::new(exe, args.view_url.clone()).with_debug(args.debug))
    };

    let backend = Arc::new(SyntaxTreeBackend::new(LoggingHighlighter));
    let session = ViewSession::open(
        handle.broker(),
        args.title.clone(),
        Arc::new(BackendDispatcher(backend)),
        launcher.as_ref(),
    )
    .context("failed to open view session")?;

    let model = TreeModel::new(Box::new(JsonTreeProvider::new(&args.tree)), session.clone());
    if let Err(e) = model.reload() {
        warn!("Could not load {}: {}", args.tree.display(), e);
    }
    tokio::spawn(model.clone().follow_session());

    let mut changes = if args.no_watch {
        None
    } else {
        match SourceWatcher::new(&args.tree) {
            Ok((watcher, rx)) => Some((watcher, rx)),
            Err(e) => {
                warn!("File watching disabled: {:#}", e);
                None
            }
        }
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, exiting");
                break;
            }
            Some(()) = async {
                match changes.as_mut() {
                    Some((_, rx)) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                if let Err(e) = model.reload() {
                    warn!("Reload failed: {}", e);
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match line.parse::<Command>() {
                        Ok(Command::Cursor(pos)) => {
                            if let Err(e) = model.set_cursor(pos) {
                                warn!("Failed to forward cursor: {}", e);
                            }
                        }
                        Ok(Command::Reload) => {
                            if let Err(e) = model.reload() {
                                warn!("Reload failed: {}", e);
                            }
                        }
                        Ok(Command::Quit) => break,
                        Err(e) => warn!("{}", e),
                    },
                    Ok(None) => {
                        info!("stdin closed; running until interrupted");
                        stdin_open = false;
                    }
                    Err(e) => {
                        error!("Failed to read stdin: {}", e);
                        stdin_open = false;
                    }
                }
            }
        }
    }

    session.close();
    handle.shutdown();
    Ok(())
}
