mod config;
mod logging;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use nicotb_providers::nicovideo::{
    ContentId, NicovideoClient, PlayableSession, RenewalEvent, SessionKind, SessionNegotiator,
};

use crate::config::Config;

/// Negotiate a playable niconico stream and keep its session alive.
#[derive(Debug, Parser)]
#[command(name = "nicotb", version, about)]
struct Cli {
    /// Video id, e.g. sm9
    id: String,

    /// Config file (TOML/YAML/JSON)
    #[arg(short, long, env = "NICOTB_CONFIG")]
    config: Option<String>,

    /// Also fetch and print the comment thread
    #[arg(long)]
    comments: bool,

    /// Print the session and exit instead of renewing until Ctrl-C
    #[arg(long)]
    once: bool,

    /// Print the session as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load and validate configuration
    let config = Config::load(cli.config.as_deref())?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;

    // 3. Negotiate
    let client = NicovideoClient::new(config.api.endpoints()?)?;
    let negotiator = SessionNegotiator::new(Arc::new(client.clone()), config.session.negotiator_config());

    let id = ContentId::parse(&cli.id)?;
    let session = negotiator.acquire_session(&id).await.map_err(|e| {
        error!(content_id = %id, "Failed to load video: {e}");
        e
    })?;
    print_session(&session, cli.json)?;

    if cli.comments {
        match client.fetch_comments(&session.thread, config.session.comment_res_from).await {
            Ok(chats) => {
                println!("comments: {}", chats.len());
                for chat in chats.iter().take(20) {
                    println!("  [{:>7.2}s] {}", chat.vpos as f64 / 100.0, chat.content);
                }
            }
            Err(e) => warn!("Failed to fetch comments: {e}"),
        }
    }

    if cli.once || session.kind == SessionKind::Legacy {
        negotiator.stop();
        return Ok(());
    }

    // 4. Keep the session alive until Ctrl-C
    info!("Renewing session; press Ctrl-C to stop");
    let mut events = negotiator.subscribe();
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(RenewalEvent::Renewed { session_id }) => info!(session_id = %session_id, "Session renewed"),
                Ok(RenewalEvent::Failed { session_id, error }) => {
                    warn!(session_id = %session_id, "Session renewal failed: {error}");
                }
                Err(RecvError::Lagged(skipped)) => warn!("Missed {skipped} renewal events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    negotiator.stop();
    Ok(())
}

fn print_session(session: &PlayableSession, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(session)?);
    } else {
        let kind = match session.kind {
            SessionKind::Legacy => "legacy",
            SessionKind::Modern => "modern",
        };
        println!("kind: {kind}");
        println!("url: {}", session.url);
        println!("thread: {} ({})", session.thread.thread_id, session.thread.server_url);
    }
    Ok(())
}
