//! chatfeed: shared chat room client
//!
//! Main binary with subcommands:
//! - `watch`: Print the live feed until interrupted
//! - `send`: Post a message
//! - `edit`: Change the text of one of your messages
//! - `delete`: Remove one of your messages

use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod render;
mod session;

use session::SessionConfig;

#[derive(Parser)]
#[command(name = "chatfeed")]
#[command(about = "Shared chat room client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Connection {
    /// Document store URL
    #[arg(long, env = "CHATFEED_STORE_URL")]
    store_url: String,

    /// Change stream URL (defaults to the store URL over ws/wss)
    #[arg(long, env = "CHATFEED_STREAM_URL")]
    stream_url: Option<String>,

    /// Bearer token for the store
    #[arg(long, env = "CHATFEED_TOKEN")]
    token: Option<String>,

    /// User id to act as
    #[arg(long, env = "CHATFEED_USER")]
    user: String,
}

impl From<Connection> for SessionConfig {
    fn from(c: Connection) -> Self {
        SessionConfig {
            store_url: c.store_url,
            stream_url: c.stream_url,
            token: c.token,
            user: c.user,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the feed and every change until Ctrl-C
    Watch {
        #[command(flatten)]
        connection: Connection,
    },

    /// Send a message
    Send {
        #[command(flatten)]
        connection: Connection,

        /// Message text
        #[arg(value_name = "TEXT")]
        text: String,
    },

    /// Edit one of your messages
    Edit {
        #[command(flatten)]
        connection: Connection,

        /// Message id
        #[arg(value_name = "ID")]
        id: String,

        /// New text
        #[arg(value_name = "TEXT")]
        text: String,

        /// Seconds to wait for the message to reach the feed
        #[arg(long, default_value = "10")]
        wait_secs: u64,
    },

    /// Delete one of your messages
    Delete {
        #[command(flatten)]
        connection: Connection,

        /// Message id
        #[arg(value_name = "ID")]
        id: String,

        /// Seconds to wait for the message to reach the feed
        #[arg(long, default_value = "10")]
        wait_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "chatfeed=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch { connection } => session::watch(&SessionConfig::from(connection)).await,

        Commands::Send { connection, text } => {
            session::send(&SessionConfig::from(connection), &text).await
        }

        Commands::Edit {
            connection,
            id,
            text,
            wait_secs,
        } => {
            session::edit(
                &SessionConfig::from(connection),
                &id,
                &text,
                Duration::from_secs(wait_secs),
            )
            .await
        }

        Commands::Delete {
            connection,
            id,
            wait_secs,
        } => {
            session::delete(
                &SessionConfig::from(connection),
                &id,
                Duration::from_secs(wait_secs),
            )
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_edit_arguments() {
        let cli = Cli::try_parse_from([
            "chatfeed",
            "edit",
            "--store-url",
            "http://localhost:8080",
            "--user",
            "u1",
            "m1",
            "new text",
        ])
        .unwrap();

        match cli.command {
            Commands::Edit {
                connection,
                id,
                text,
                wait_secs,
            } => {
                assert_eq!(connection.user, "u1");
                assert!(connection.token.is_none());
                assert_eq!(id, "m1");
                assert_eq!(text, "new text");
                assert_eq!(wait_secs, 10);
            }
            _ => panic!("expected edit"),
        }
    }
}
