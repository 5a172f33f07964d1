//! WhatsTrack: turns WhatsApp conversations into Jira actions.

mod action;
mod config;
mod conversation;
mod decision;
mod executor;
mod format;
mod gateway;
mod routes;
mod server;
mod session;
#[cfg(test)]
mod testing;
mod webhook;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(
    name = "whatstrack",
    version,
    about = "WhatsApp to Jira conversation bridge"
)]
struct Cli {
    /// Config file (defaults to ~/.whatstrack/config.toml).
    #[arg(long, global = true, env = "WHATSTRACK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the webhook server (default).
    Serve,
    /// Validate config and build every client without serving.
    Doctor,
    /// Send one WhatsApp text message and exit.
    Send { recipient: String, message: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;
    install_panic_hook();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => server::serve(cli.config).await,
        Command::Doctor => server::doctor(cli.config).await,
        Command::Send { recipient, message } => {
            server::send_one_shot(cli.config, &recipient, &message).await
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            "info,whatstrack=debug,wt_app=debug,wt_channels=debug,wt_tracker=debug,wt_llm=debug,tower_http=info",
        )
    });
    let log_format = std::env::var("WHATSTRACK_LOG_FORMAT")
        .unwrap_or_else(|_| "json".to_string())
        .to_ascii_lowercase();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    match log_format.as_str() {
        "json" => builder
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .init(),
        "pretty" => builder.pretty().init(),
        "compact" => builder.compact().init(),
        other => {
            return Err(anyhow::anyhow!(
                "unsupported WHATSTRACK_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            ));
        }
    }

    tracing::info!(
        log_format = %log_format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_payload_to_string(panic_info.payload());
        tracing::error!(
            panic_location = %location,
            panic_payload = %payload,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_to_serve_and_accepts_global_config() {
        let cli = Cli::try_parse_from(["whatstrack", "doctor", "--config", "/tmp/wt.toml"])
            .expect("parse");
        assert!(matches!(cli.command, Some(Command::Doctor)));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/wt.toml")));

        let cli = Cli::try_parse_from(["whatstrack"]).expect("parse");
        assert!(cli.command.is_none());
    }

    #[test]
    fn panic_payloads_are_rendered() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_payload_to_string(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7_u32);
        assert_eq!(panic_payload_to_string(boxed.as_ref()), "non-string panic payload");
    }
}
