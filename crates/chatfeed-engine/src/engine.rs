//! The engine facade a presentation layer talks to.

use std::sync::Arc;

use chatfeed_store::{MessageId, RemoteStore, UserId};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::directory::Directory;
use crate::feed::FeedSnapshot;
use crate::mutation::MutationService;
use crate::selection::{Anchor, Selection, SelectionState};
use crate::sync::{
    DisconnectCallback, FeedChangedCallback, FeedSynchronizer, StreamDisconnected, Subscription,
};
use crate::EngineError;

/// Builder for [`Engine`].
pub struct EngineBuilder {
    store: Arc<dyn RemoteStore>,
    current_user: UserId,
    on_feed_changed: Option<FeedChangedCallback>,
    on_stream_disconnected: Option<DisconnectCallback>,
}

impl EngineBuilder {
    /// Create a builder for `current_user`'s session against `store`.
    pub fn new(store: Arc<dyn RemoteStore>, current_user: impl Into<UserId>) -> Self {
        Self {
            store,
            current_user: current_user.into(),
            on_feed_changed: None,
            on_stream_disconnected: None,
        }
    }

    /// Called with the new snapshot whenever the feed changes.
    pub fn on_feed_changed(
        mut self,
        callback: impl Fn(&FeedSnapshot) + Send + Sync + 'static,
    ) -> Self {
        self.on_feed_changed = Some(Arc::new(callback));
        self
    }

    /// Called once if the message subscription is lost.
    pub fn on_stream_disconnected(
        mut self,
        callback: impl Fn(&StreamDisconnected) + Send + Sync + 'static,
    ) -> Self {
        self.on_stream_disconnected = Some(Arc::new(callback));
        self
    }

    /// Load the directory, then open the message subscription.
    ///
    /// Fails with [`EngineError::DirectoryUnavailable`] before any
    /// subscription is opened if the users collection cannot be read.
    pub async fn start(self) -> Result<Engine, EngineError> {
        let directory = Directory::load(self.store.as_ref()).await?;

        let mut synchronizer = FeedSynchronizer::new(Arc::clone(&directory));
        if let Some(callback) = self.on_feed_changed {
            synchronizer = synchronizer.with_feed_callback(callback);
        }
        if let Some(callback) = self.on_stream_disconnected {
            synchronizer = synchronizer.with_disconnect_callback(callback);
        }
        let subscription = synchronizer.subscribe(self.store.as_ref()).await?;
        let mutations = MutationService::new(Arc::clone(&self.store), subscription.handle());

        info!(user = %self.current_user, users = directory.len(), "engine started");
        Ok(Engine {
            current_user: self.current_user,
            directory,
            subscription,
            mutations,
            selection: SelectionState::default(),
        })
    }
}

/// A running chat session: the live feed, the mutation entry points and the
/// contextual-action selection.
pub struct Engine {
    current_user: UserId,
    directory: Arc<Directory>,
    subscription: Subscription,
    mutations: MutationService,
    selection: SelectionState,
}

impl Engine {
    pub fn builder(store: Arc<dyn RemoteStore>, current_user: impl Into<UserId>) -> EngineBuilder {
        EngineBuilder::new(store, current_user)
    }

    /// Send a message as the current user.
    ///
    /// It appears in the feed once the stream delivers it.
    pub async fn send_message(&self, text: &str) -> Result<MessageId, EngineError> {
        self.mutations.create(text, &self.current_user).await
    }

    /// Select one of the current user's messages for a contextual action.
    pub fn select_message(&mut self, anchor: Anchor, id: &MessageId) -> Result<(), EngineError> {
        let handle = self.subscription.handle();
        let message = handle
            .get(id)
            .ok_or_else(|| EngineError::UnknownMessage(id.clone()))?;
        if !message.is_from(&self.current_user) {
            return Err(EngineError::NotAuthor(id.clone()));
        }

        debug!(id = %id, anchor = anchor.0, "message selected");
        self.selection.select(anchor, message);
        Ok(())
    }

    /// Dismiss the selection without acting on it.
    pub fn clear_selection(&mut self) {
        if let Some(selection) = self.selection.clear() {
            debug!(id = %selection.target(), "selection dismissed");
        }
    }

    /// Edit the selected message.
    ///
    /// The selection is cleared on success and kept on failure, unless the
    /// message has left the feed.
    pub async fn edit_message(&mut self, id: &MessageId, text: &str) -> Result<(), EngineError> {
        self.require_selection(id)?;
        let result = self.mutations.update(id, text).await;
        self.settle_selection(&result);
        result
    }

    /// Delete the selected message.
    ///
    /// The selection is cleared on success and kept on failure, unless the
    /// message has left the feed.
    pub async fn delete_message(&mut self, id: &MessageId) -> Result<(), EngineError> {
        self.require_selection(id)?;
        let result = self.mutations.delete(id).await;
        self.settle_selection(&result);
        result
    }

    /// Drop the selection if its message is no longer in the feed.
    fn require_selection(&mut self, id: &MessageId) -> Result<(), EngineError> {
        self.selection.require(id)?;
        if !self.subscription.handle().contains(id) {
            debug!(id = %id, "selected message left the feed");
            self.selection.clear();
            return Err(EngineError::UnknownMessage(id.clone()));
        }
        Ok(())
    }

    fn settle_selection(&mut self, result: &Result<(), EngineError>) {
        if matches!(result, Ok(()) | Err(EngineError::UnknownMessage(_))) {
            self.selection.clear();
        }
    }

    /// The current feed snapshot.
    pub fn feed(&self) -> FeedSnapshot {
        self.subscription.feed()
    }

    /// A receiver notified on every feed change.
    pub fn watch_feed(&self) -> watch::Receiver<FeedSnapshot> {
        self.subscription.handle().watch()
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.current()
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    pub fn current_user(&self) -> &UserId {
        &self.current_user
    }

    /// Detach from the message stream. No callback fires after this returns.
    pub async fn close(&mut self) {
        self.subscription.close().await;
        info!(user = %self.current_user, "engine closed");
    }
}
