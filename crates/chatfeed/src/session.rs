//! Subcommand implementations.

use std::sync::Arc;
use std::time::Duration;

use chatfeed_engine::{Anchor, Engine, EngineBuilder, FeedSnapshot};
use chatfeed_store::{MessageId, RemoteStore, StoreClient};
use miette::{Result, miette};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::render::FeedPrinter;

/// Connection settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub store_url: String,
    pub stream_url: Option<String>,
    pub token: Option<String>,
    pub user: String,
}

impl SessionConfig {
    fn store(&self) -> Arc<dyn RemoteStore> {
        let mut client = StoreClient::new(&self.store_url);
        if let Some(url) = &self.stream_url {
            client = client.with_stream_url(url);
        }
        if let Some(token) = &self.token {
            client = client.with_token(token);
        }
        Arc::new(client)
    }

    fn builder(&self) -> EngineBuilder {
        EngineBuilder::new(self.store(), self.user.as_str())
    }
}

async fn start(builder: EngineBuilder) -> Result<Engine> {
    builder
        .start()
        .await
        .map_err(|e| miette!("failed to start session: {}", e))
}

/// Print the feed and every change to it until Ctrl-C or stream loss.
pub async fn watch(config: &SessionConfig) -> Result<()> {
    let (lost_tx, mut lost_rx) = watch::channel(None::<String>);
    let mut engine = start(config.builder().on_stream_disconnected(move |d| {
        let _ = lost_tx.send(Some(d.reason.clone()));
    }))
    .await?;

    let mut feed_rx = engine.watch_feed();
    let mut printer = FeedPrinter::new();
    print_changes(&mut printer, &feed_rx.borrow_and_update().clone());

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal");
                break Ok(());
            }
            changed = feed_rx.changed() => {
                if changed.is_err() {
                    break Err(miette!("feed closed unexpectedly"));
                }
                let snapshot = feed_rx.borrow_and_update().clone();
                print_changes(&mut printer, &snapshot);
            }
            _ = lost_rx.changed() => {
                let reason = lost_rx.borrow().clone().unwrap_or_default();
                warn!(reason = %reason, "message stream lost");
                break Err(miette!("message stream lost: {}", reason));
            }
        }
    };

    engine.close().await;
    outcome
}

fn print_changes(printer: &mut FeedPrinter, snapshot: &FeedSnapshot) {
    for line in printer.diff(snapshot) {
        println!("{}", line);
    }
}

/// Send a message as the configured user.
pub async fn send(config: &SessionConfig, text: &str) -> Result<()> {
    let mut engine = start(config.builder()).await?;
    let result = engine.send_message(text).await;
    engine.close().await;

    let id = result.map_err(|e| miette!("failed to send message: {}", e))?;
    println!("{}", id);
    Ok(())
}

/// Edit one of the configured user's messages.
pub async fn edit(config: &SessionConfig, id: &str, text: &str, wait: Duration) -> Result<()> {
    let id = MessageId::from(id);
    let mut engine = start(config.builder()).await?;

    let result = async {
        select_when_present(&mut engine, &id, wait).await?;
        engine
            .edit_message(&id, text)
            .await
            .map_err(|e| miette!("failed to edit {}: {}", id, e))
    }
    .await;

    engine.close().await;
    result?;
    println!("edited {}", id);
    Ok(())
}

/// Delete one of the configured user's messages.
pub async fn delete(config: &SessionConfig, id: &str, wait: Duration) -> Result<()> {
    let id = MessageId::from(id);
    let mut engine = start(config.builder()).await?;

    let result = async {
        select_when_present(&mut engine, &id, wait).await?;
        engine
            .delete_message(&id)
            .await
            .map_err(|e| miette!("failed to delete {}: {}", id, e))
    }
    .await;

    engine.close().await;
    result?;
    println!("deleted {}", id);
    Ok(())
}

/// Wait for `id` to reach the feed, then select it.
async fn select_when_present(engine: &mut Engine, id: &MessageId, wait: Duration) -> Result<()> {
    let mut feed_rx = engine.watch_feed();
    tokio::time::timeout(wait, feed_rx.wait_for(|s| s.iter().any(|m| &m.id == id)))
        .await
        .map_err(|_| miette!("message {} not in feed after {}s", id, wait.as_secs()))?
        .map_err(|_| miette!("feed closed while waiting for {}", id))?;

    engine
        .select_message(Anchor::default(), id)
        .map_err(|e| miette!("cannot select {}: {}", id, e))
}
