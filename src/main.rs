use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

use pitwall::telemetry::{self, LogConfig, LogLevel};
use pitwall::{LiveTimingClient, LiveTimingConfig, StateSnapshot};

#[derive(Parser, Debug)]
#[command(name = "pitwall", about = "Live race timing in the terminal")]
struct Cli {
    /// Negotiation endpoint (defaults to the production feed).
    #[arg(long, env = "PITWALL_NEGOTIATE_URL")]
    negotiate_url: Option<String>,

    /// Streaming socket base URL (defaults to the production feed).
    #[arg(long, env = "PITWALL_SOCKET_URL")]
    socket_url: Option<String>,

    /// Start directly in fallback mode with a simulated session.
    #[arg(long)]
    fallback: bool,

    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Write logs to a file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(&LogConfig {
        level: cli.log_level,
        file: cli.log_file.clone(),
    })
    .context("logging initialization failed")?;

    let mut config = LiveTimingConfig::from_env().context("invalid feed configuration")?;
    if cli.negotiate_url.is_some() || cli.socket_url.is_some() {
        let negotiate = cli
            .negotiate_url
            .clone()
            .unwrap_or_else(|| config.negotiate_url().as_str().to_string());
        let socket = cli
            .socket_url
            .clone()
            .unwrap_or_else(|| config.socket_base_url().as_str().to_string());
        let user_agent = config.user_agent.clone();
        config = LiveTimingConfig::new(negotiate, socket).context("invalid feed endpoints")?;
        config.user_agent = user_agent;
    }

    let client = LiveTimingClient::start(config).context("failed to start client")?;
    if cli.fallback {
        client.start_fallback();
    }

    let mut snapshots = client.subscribe();
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                render(&snapshot);
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}

fn render(snapshot: &StateSnapshot) {
    if let Some(status) = &snapshot.error {
        println!("-- {status}");
        return;
    }
    if !snapshot.has_active_session {
        if snapshot.is_connected {
            println!("-- No active F1 session");
        }
        return;
    }

    let session = &snapshot.session;
    let mode = if snapshot.is_fallback { " [simulated]" } else { "" };
    println!(
        "== {}{} | lap {} | {} | {}",
        session.session_name,
        mode,
        session.lap_count(),
        session.track_flag,
        session.timer,
    );
    for driver in &snapshot.drivers {
        println!(
            "{:>2}. {:<3} {:<10} last {:<9} gap {:<8} {:?}",
            driver.position,
            driver.code,
            driver.tire_compound.to_string(),
            driver.last_lap.value,
            driver.gap_to_leader,
            driver.last_lap.status,
        );
    }
}
