//! Astview View - renders the syntax tree served by an astview host.
//!
//! Started by the host with `--url <launch url>`, whose `address` parameter
//! names the host and the pairing key. Without a URL or address the view runs
//! offline on a built-in sample tree.

use anyhow::{Context, Result};
use astview_core::services::{BackendProxy, FrontendDispatcher, SyntaxTreeViewFrontend};
use astview_core::{Address, ConnectionState, Reconnector, RemotingError};
use astview_view::{render, sample_tree, Command, ViewModel};
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "astview-view")]
#[command(about = "Display a syntax tree served by an astview host")]
struct Args {
    /// Launch URL carrying the host address in its query
    #[arg(long, conflicts_with = "address")]
    url: Option<String>,

    /// Host address as JSON, e.g. {"host":"localhost","port":1235,"key":"1"}
    #[arg(long)]
    address: Option<String>,

    /// Title of the view
    #[arg(long, default_value = "Syntax Tree")]
    title: String,

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

fn startup_address(args: &Args) -> Result<Option<Address>, RemotingError> {
    if let Some(url) = &args.url {
        return Address::require_from_url(url).map(Some);
    }
    args.address
        .as_deref()
        .map(Address::from_startup_context)
        .transpose()
}

fn print_view(title: &str, model: &ViewModel) {
    println!("== {} ==", title);
    print!("{}", render(model));
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let address = startup_address(&args).context("invalid startup context")?;
    let model = Arc::new(ViewModel::new());

    let mut connection = match address {
        Some(address) => {
            info!("Connecting to host at {}", address);
            let reconnector = Reconnector::new(address, Arc::new(FrontendDispatcher(model.clone())));
            let cancel = reconnector.cancellation_token();
            let mut state = reconnector.state();
            let view = model.clone();

            let task = tokio::spawn(async move {
                reconnector
                    .run::<BackendProxy, _>(move |backend, _| view.set_backend(backend))
                    .await
            });
            tokio::spawn(async move {
                while state.changed().await.is_ok() {
                    let current = *state.borrow_and_update();
                    if current == ConnectionState::PermanentlyDisconnected {
                        error!("Host is unreachable");
                    }
                }
            });
            Some((task, cancel))
        }
        None => {
            info!("No host address given; showing sample tree");
            model
                .set_sub_tree(Vec::new(), sample_tree()?)
                .await
                .context("failed to load sample tree")?;
            None
        }
    };

    let mut revisions = model.subscribe();
    print_view(&args.title, &model);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut outcome = Ok(());
    let mut connection_done = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, exiting");
                break;
            }
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                revisions.borrow_and_update();
                print_view(&args.title, &model);
            }
            result = async {
                match connection.as_mut() {
                    Some((task, _)) => task.await,
                    None => std::future::pending().await,
                }
            }, if !connection_done => {
                connection_done = true;
                match result {
                    Ok(Ok(())) => info!("Connection loop stopped"),
                    Ok(Err(e)) => outcome = Err(e).context("lost connection to host"),
                    Err(e) => outcome = Err(e).context("connection task failed"),
                }
                break;
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match line.parse::<Command>() {
                        Ok(Command::Hover(path)) => {
                            if let Err(e) = model.set_hovered(Some(path)) {
                                warn!("{}", e);
                            }
                        }
                        Ok(Command::Unhover) => {
                            if let Err(e) = model.set_hovered(None) {
                                warn!("{}", e);
                            }
                        }
                        Ok(Command::Toggle(path)) => {
                            if let Err(e) = model.toggle_collapsed(&path) {
                                warn!("{}", e);
                            }
                        }
                        Ok(Command::Show) => print_view(&args.title, &model),
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

    if let Some((task, cancel)) = connection.filter(|_| !connection_done) {
        cancel.cancel();
        let _ = task.await;
    }
    outcome
}
