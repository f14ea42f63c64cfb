use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::Args;
use netprobe::config::Config;
use netprobe::engine::ProbeEngine;
use netprobe::state::{SessionEvent, SessionId, SessionState};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(2);
    }

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    let config = args.apply_overrides(config);
    tracing::debug!(?config, "effective config");

    let request = match args.request() {
        Ok(request) => request,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    let (engine, mut events) = ProbeEngine::new(config).context("Failed to start probe engine")?;

    // Input errors are reported before anything touches the network
    let id = match engine.start(request) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    let state = stream_events(&engine, id, &mut events, args.json).await?;
    std::process::exit(match state {
        SessionState::Completed => 0,
        SessionState::Cancelled => 130,
        _ => 1,
    });
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "warn,netprobe=debug",
        _ => "warn,netprobe=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Print events for `id` until its terminal state; Ctrl+C cancels the session
async fn stream_events(
    engine: &ProbeEngine,
    id: SessionId,
    events: &mut UnboundedReceiver<SessionEvent>,
    json: bool,
) -> Result<SessionState> {
    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                tracing::debug!(session = %id, "interrupt, cancelling");
                engine.cancel(id);
            }
            event = events.recv() => {
                let event = event.context("Event stream closed before the session finished")?;
                if event.session() != id {
                    continue;
                }
                if json {
                    println!("{}", serde_json::to_string(&event)?);
                }
                match event {
                    SessionEvent::Result { result, .. } if !json => println!("{result}"),
                    SessionEvent::State { state, .. } if state.is_terminal() => return Ok(state),
                    _ => {}
                }
            }
        }
    }
}
