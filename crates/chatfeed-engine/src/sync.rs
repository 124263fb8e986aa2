//! Change stream synchronizer.
//!
//! One task owns the [`LocalFeed`]. It consumes change batches from the
//! message subscription and local mutation commands from [`FeedHandle`]s,
//! one at a time, so every feed mutation is totally ordered without locks.
//! Readers get immutable snapshots through a `watch` channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chatfeed_store::{ChangeBatch, ChangeStream, MessageId, RemoteStore};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::directory::Directory;
use crate::feed::{FeedSnapshot, LocalFeed, Message};
use crate::EngineError;

/// Capacity of the local mutation command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Called with the new snapshot after every batch or local mutation that
/// changed the feed. Runs on the feed task: it must not block.
pub type FeedChangedCallback = Arc<dyn Fn(&FeedSnapshot) + Send + Sync>;

/// Called once when the message subscription is lost.
pub type DisconnectCallback = Arc<dyn Fn(&StreamDisconnected) + Send + Sync>;

/// Why the message subscription stopped delivering batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDisconnected {
    pub reason: String,
}

enum FeedCommand {
    SetText {
        id: MessageId,
        text: String,
        ack: oneshot::Sender<bool>,
    },
    Remove {
        id: MessageId,
        ack: oneshot::Sender<bool>,
    },
}

/// Cloneable access to the feed: snapshot reads and serialized mutations.
#[derive(Clone)]
pub struct FeedHandle {
    commands: mpsc::Sender<FeedCommand>,
    snapshot_rx: watch::Receiver<FeedSnapshot>,
    closed: Arc<AtomicBool>,
}

impl FeedHandle {
    /// The feed as of the last processed batch or mutation.
    pub fn snapshot(&self) -> FeedSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Look up a message in the current snapshot.
    pub fn get(&self, id: &MessageId) -> Option<Message> {
        self.snapshot_rx.borrow().iter().find(|m| &m.id == id).cloned()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.snapshot_rx.borrow().iter().any(|m| &m.id == id)
    }

    /// A receiver that is notified on every published snapshot.
    pub fn watch(&self) -> watch::Receiver<FeedSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Whether the owning subscription has been closed or dropped.
    ///
    /// Snapshots stay readable after close; mutations do not.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.commands.is_closed()
    }

    /// Fail with [`EngineError::FeedClosed`] once the subscription is closed.
    pub fn ensure_open(&self) -> Result<(), EngineError> {
        if self.is_closed() {
            return Err(EngineError::FeedClosed);
        }
        Ok(())
    }

    /// Replace a message's text. Resolves once the new snapshot is published.
    ///
    /// Returns whether the message is in the feed.
    pub async fn set_text(&self, id: MessageId, text: String) -> Result<bool, EngineError> {
        let (ack, done) = oneshot::channel();
        self.send(FeedCommand::SetText { id, text, ack }, done).await
    }

    /// Remove a message. Resolves once the new snapshot is published.
    ///
    /// Returns whether the message was in the feed.
    pub async fn remove(&self, id: MessageId) -> Result<bool, EngineError> {
        let (ack, done) = oneshot::channel();
        self.send(FeedCommand::Remove { id, ack }, done).await
    }

    async fn send(
        &self,
        command: FeedCommand,
        done: oneshot::Receiver<bool>,
    ) -> Result<bool, EngineError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::FeedClosed)?;
        done.await.map_err(|_| EngineError::FeedClosed)
    }
}

/// Builds and starts the feed task.
pub struct FeedSynchronizer {
    directory: Arc<Directory>,
    on_feed_changed: Option<FeedChangedCallback>,
    on_disconnect: Option<DisconnectCallback>,
}

impl FeedSynchronizer {
    /// Create a synchronizer enriching messages from `directory`.
    pub fn new(directory: Arc<Directory>) -> Self {
        Self {
            directory,
            on_feed_changed: None,
            on_disconnect: None,
        }
    }

    /// Set the feed change callback.
    pub fn with_feed_callback(mut self, callback: FeedChangedCallback) -> Self {
        self.on_feed_changed = Some(callback);
        self
    }

    /// Set the stream loss callback.
    pub fn with_disconnect_callback(mut self, callback: DisconnectCallback) -> Self {
        self.on_disconnect = Some(callback);
        self
    }

    /// Open the message subscription and start the feed task.
    pub async fn subscribe(self, store: &dyn RemoteStore) -> Result<Subscription, EngineError> {
        let stream = store
            .subscribe_messages()
            .await
            .map_err(|e| EngineError::StreamDisconnected {
                reason: e.to_string(),
            })?;
        Ok(self.start(stream))
    }

    /// Start the feed task on an already-open stream.
    pub fn start(self, stream: ChangeStream) -> Subscription {
        let feed = LocalFeed::new();
        let (snapshot_tx, snapshot_rx) = watch::channel(feed.snapshot());
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let closed = Arc::new(AtomicBool::new(false));

        let worker = FeedWorker {
            feed,
            directory: self.directory,
            snapshot_tx,
            on_feed_changed: self.on_feed_changed,
            on_disconnect: self.on_disconnect,
            closed: Arc::clone(&closed),
        };

        info!("starting feed synchronizer");
        let task = tokio::spawn(worker.run(stream, commands_rx, shutdown_rx));

        Subscription {
            handle: FeedHandle {
                commands: commands_tx,
                snapshot_rx,
                closed: Arc::clone(&closed),
            },
            shutdown_tx,
            closed,
            task: Some(task),
        }
    }
}

/// A running feed task.
///
/// Closing (or dropping) it detaches the callbacks and stops consuming the
/// message subscription.
pub struct Subscription {
    handle: FeedHandle,
    shutdown_tx: watch::Sender<bool>,
    closed: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// A handle to the feed owned by this subscription.
    pub fn handle(&self) -> FeedHandle {
        self.handle.clone()
    }

    /// The current feed snapshot.
    pub fn feed(&self) -> FeedSnapshot {
        self.handle.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop the feed task and wait for it to exit.
    ///
    /// Once this returns no callback is invoked again. Calling it more than
    /// once is a no-op.
    pub async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "feed task ended abnormally");
            }
            debug!("feed subscription closed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
    }
}

struct FeedWorker {
    feed: LocalFeed,
    directory: Arc<Directory>,
    snapshot_tx: watch::Sender<FeedSnapshot>,
    on_feed_changed: Option<FeedChangedCallback>,
    on_disconnect: Option<DisconnectCallback>,
    closed: Arc<AtomicBool>,
}

impl FeedWorker {
    async fn run(
        mut self,
        mut stream: ChangeStream,
        mut commands: mpsc::Receiver<FeedCommand>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut stream_open = true;

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("feed task received shutdown signal");
                        break;
                    }
                }

                Some(command) = commands.recv() => {
                    self.handle_command(command);
                }

                event = stream.next_batch(), if stream_open => {
                    match event {
                        Some(Ok(batch)) => self.apply_batch(batch),
                        Some(Err(e)) => {
                            stream_open = false;
                            self.report_disconnect(e.to_string());
                        }
                        None => {
                            stream_open = false;
                            self.report_disconnect("stream ended".to_string());
                        }
                    }
                }
            }
        }

        info!(messages = self.feed.len(), "feed synchronizer stopped");
    }

    fn apply_batch(&mut self, batch: ChangeBatch) {
        let total = batch.len();
        let mut applied = 0usize;

        for change in batch {
            let kind = change.kind();
            let id = change.id().clone();
            if self.feed.apply(change, &self.directory) {
                applied += 1;
            } else {
                trace!(kind = %kind, id = %id, "change left feed unchanged");
            }
        }

        debug!(
            changes = total,
            applied,
            messages = self.feed.len(),
            "processed change batch"
        );

        if applied > 0 {
            self.publish();
        }
    }

    fn handle_command(&mut self, command: FeedCommand) {
        match command {
            FeedCommand::SetText { id, text, ack } => {
                let present = self.feed.contains(&id);
                if self.feed.set_text(&id, &text) {
                    debug!(id = %id, "applied local edit");
                    self.publish();
                }
                let _ = ack.send(present);
            }
            FeedCommand::Remove { id, ack } => {
                let removed = self.feed.remove(&id).is_some();
                if removed {
                    debug!(id = %id, "applied local removal");
                    self.publish();
                }
                let _ = ack.send(removed);
            }
        }
    }

    fn publish(&self) {
        let snapshot = self.feed.snapshot();

        // Callback first: a watcher that sees the snapshot also sees its effects.
        if !self.closed.load(Ordering::SeqCst)
            && let Some(callback) = &self.on_feed_changed
        {
            callback(&snapshot);
        }
        self.snapshot_tx.send_replace(snapshot);
    }

    fn report_disconnect(&self, reason: String) {
        warn!(reason = %reason, "message stream disconnected");

        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Some(callback) = &self.on_disconnect {
            callback(&StreamDisconnected { reason });
        }
    }
}
