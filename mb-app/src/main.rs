//! Messenger bridge binary.

mod config;
mod gateway;
mod routes;
mod server;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(
    name = "messenger-bridge",
    version,
    about = "Facebook Messenger webhook bridge"
)]
struct Cli {
    /// Config file (default: ~/.messenger-bridge/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the webhook server (default).
    Serve,
    /// Validate config and report credentials and page mode.
    Doctor,
    /// Send one text message to a user.
    Send {
        recipient: String,
        message: String,
        /// Sending page; required with per-page tokens.
        #[arg(long)]
        page: Option<String>,
    },
    /// Read or change a Messenger profile setting.
    Profile {
        #[command(subcommand)]
        action: ProfileCommand,
    },
    /// Look up a user's public profile.
    UserInfo {
        user_id: String,
        #[arg(long)]
        page: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum ProfileCommand {
    Get {
        field: String,
        #[arg(long)]
        page: Option<String>,
    },
    /// Set FIELD to a JSON value, e.g. `greeting '[{"locale":"default","text":"Hi"}]'`.
    Set {
        field: String,
        value: String,
        #[arg(long)]
        page: Option<String>,
    },
    Remove {
        field: String,
        #[arg(long)]
        page: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();
    init_tracing()?;
    install_panic_hook();
    match dotenv {
        Ok(path) => tracing::info!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => return Err(anyhow::anyhow!("load .env: {e}")),
    }

    let cli = Cli::parse();
    let config = cli.config;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => server::serve(config).await,
        Command::Doctor => server::doctor(config).await,
        Command::Send {
            recipient,
            message,
            page,
        } => server::send_one_shot(config, page, &recipient, &message).await,
        Command::Profile { action } => {
            let (field, page, action) = match action {
                ProfileCommand::Get { field, page } => (field, page, server::ProfileAction::Get),
                ProfileCommand::Set { field, value, page } => {
                    let value: serde_json::Value = serde_json::from_str(&value)
                        .map_err(|e| anyhow::anyhow!("profile value must be JSON: {e}"))?;
                    (field, page, server::ProfileAction::Set(value))
                }
                ProfileCommand::Remove { field, page } => {
                    (field, page, server::ProfileAction::Remove)
                }
            };
            server::profile(config, page, &field, action).await
        }
        Command::UserInfo { user_id, page } => server::user_info(config, page, &user_id).await,
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new(
            "info,messenger_bridge=debug,mb_app=debug,mb_channels=debug,mb_graph=debug,tower_http=info",
        ),
    };
    let log_format = std::env::var("MESSENGER_BRIDGE_LOG_FORMAT")
        .unwrap_or_else(|_| "json".to_string())
        .to_ascii_lowercase();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(true)
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
                "unsupported MESSENGER_BRIDGE_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
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
        let payload = panic_info
            .payload()
            .downcast_ref::<&str>()
            .map(|msg| msg.to_string())
            .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(
            panic_location = %location,
            panic_payload = %payload,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command, ProfileCommand};
    use clap::Parser;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["messenger-bridge"]).expect("parse");
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn profile_set_takes_field_value_and_page() {
        let cli = Cli::try_parse_from([
            "messenger-bridge",
            "--config",
            "/tmp/bridge.toml",
            "profile",
            "set",
            "get_started",
            r#"{"payload":"GET_STARTED"}"#,
            "--page",
            "page-a",
        ])
        .expect("parse");
        assert_eq!(
            cli.config.as_deref(),
            Some(std::path::Path::new("/tmp/bridge.toml"))
        );
        match cli.command {
            Some(Command::Profile {
                action: ProfileCommand::Set { field, value, page },
            }) => {
                assert_eq!(field, "get_started");
                assert!(value.contains("GET_STARTED"));
                assert_eq!(page.as_deref(), Some("page-a"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn user_info_accepts_kebab_case_subcommand() {
        let cli = Cli::try_parse_from(["messenger-bridge", "user-info", "user-1"]).expect("parse");
        assert!(matches!(
            cli.command,
            Some(Command::UserInfo { ref user_id, page: None }) if user_id == "user-1"
        ));
    }
}
