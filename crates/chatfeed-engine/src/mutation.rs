//! Create, update and delete against the remote store.
//!
//! Creates are eventually consistent: the new message shows up when the
//! stream delivers it. Updates and deletes are applied to the local feed as
//! soon as the store confirms them. Nothing is retried.

use std::sync::Arc;

use chatfeed_store::{MessageId, NewMessage, RemoteStore, UserId};
use tracing::{debug, info, warn};

use crate::error::WriteOperation;
use crate::sync::FeedHandle;
use crate::EngineError;

/// Reject empty text. Whitespace-only text is a valid message.
pub fn validate_text(text: &str) -> Result<(), EngineError> {
    if text.is_empty() {
        return Err(EngineError::EmptyMessage);
    }
    Ok(())
}

/// Writes to the messages collection and reconciles the local feed.
#[derive(Clone)]
pub struct MutationService {
    store: Arc<dyn RemoteStore>,
    feed: FeedHandle,
}

impl MutationService {
    pub fn new(store: Arc<dyn RemoteStore>, feed: FeedHandle) -> Self {
        Self { store, feed }
    }

    /// Write a new message. The local feed is not touched.
    pub async fn create(&self, text: &str, author: &UserId) -> Result<MessageId, EngineError> {
        validate_text(text)?;
        self.feed.ensure_open()?;

        let draft = NewMessage::new(text, author.clone());
        let id = self.store.create_message(&draft).await.map_err(|e| {
            warn!(author = %author, error = %e, "failed to create message");
            EngineError::remote_write(WriteOperation::Create, e)
        })?;

        info!(id = %id, author = %author, "message created");
        Ok(id)
    }

    /// Replace a message's text remotely, then locally.
    pub async fn update(&self, id: &MessageId, text: &str) -> Result<(), EngineError> {
        validate_text(text)?;
        self.feed.ensure_open()?;
        if !self.feed.contains(id) {
            return Err(EngineError::UnknownMessage(id.clone()));
        }

        self.store
            .update_message_text(id, text)
            .await
            .map_err(|e| {
                warn!(id = %id, error = %e, "failed to update message");
                EngineError::remote_write(WriteOperation::Update, e)
            })?;

        if !self.feed.set_text(id.clone(), text.to_string()).await? {
            debug!(id = %id, "message left the feed before the edit was applied");
        }
        info!(id = %id, "message updated");
        Ok(())
    }

    /// Delete a message remotely, then drop it from the local feed.
    pub async fn delete(&self, id: &MessageId) -> Result<(), EngineError> {
        self.feed.ensure_open()?;
        if !self.feed.contains(id) {
            return Err(EngineError::UnknownMessage(id.clone()));
        }

        self.store.delete_message(id).await.map_err(|e| {
            warn!(id = %id, error = %e, "failed to delete message");
            EngineError::remote_write(WriteOperation::Delete, e)
        })?;

        if !self.feed.remove(id.clone()).await? {
            debug!(id = %id, "message already removed by the stream");
        }
        info!(id = %id, "message deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Directory;
    use crate::sync::{FeedSynchronizer, Subscription};
    use chatfeed_store::{MemoryStore, MessageRecord, StoreError};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    async fn setup() -> (Arc<MemoryStore>, Subscription, MutationService) {
        let store = MemoryStore::new();
        store
            .insert_message(MessageRecord {
                id: MessageId::from("m1"),
                text: "hi".into(),
                sent_by: UserId::from("u1"),
                sent_at: Utc.timestamp_opt(1, 0).unwrap(),
            })
            .await;

        let subscription = FeedSynchronizer::new(Arc::new(Directory::default()))
            .subscribe(store.as_ref())
            .await
            .unwrap();
        let mut rx = subscription.handle().watch();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.len() == 1))
            .await
            .unwrap()
            .unwrap();

        let service = MutationService::new(store.clone(), subscription.handle());
        (store, subscription, service)
    }

    #[test]
    fn test_validate_text() {
        assert!(validate_text("hi").is_ok());
        assert!(validate_text("  hi  ").is_ok());
        assert!(validate_text(" \n\t").is_ok());
        assert!(matches!(validate_text(""), Err(EngineError::EmptyMessage)));
    }

    #[tokio::test]
    async fn test_update_applies_locally() {
        let (store, subscription, service) = setup().await;

        store.pause_stream().await;
        service.update(&MessageId::from("m1"), "edited").await.unwrap();

        assert_eq!(subscription.feed()[0].text, "edited");
    }

    #[tokio::test]
    async fn test_update_unknown_message_writes_nothing() {
        let (store, _subscription, service) = setup().await;

        let err = service
            .update(&MessageId::from("ghost"), "x")
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::UnknownMessage(_)));
        assert_eq!(store.messages().await[0].text, "hi");
    }

    #[tokio::test]
    async fn test_delete_failure_keeps_message() {
        let (store, subscription, service) = setup().await;
        store.set_fail_writes(true);

        let err = service.delete(&MessageId::from("m1")).await.unwrap_err();

        assert!(matches!(
            err,
            EngineError::RemoteWriteFailed {
                operation: WriteOperation::Delete,
                source: StoreError::Unavailable(_),
            }
        ));
        assert_eq!(subscription.feed().len(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_empty_text() {
        let (store, _subscription, service) = setup().await;

        let err = service.create("", &UserId::from("u1")).await.unwrap_err();

        assert!(matches!(err, EngineError::EmptyMessage));
        assert_eq!(store.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn test_writes_after_close_never_reach_the_store() {
        let (store, mut subscription, service) = setup().await;
        subscription.close().await;

        let id = MessageId::from("m1");
        assert!(matches!(
            service.update(&id, "after close").await,
            Err(EngineError::FeedClosed)
        ));
        assert!(matches!(
            service.delete(&id).await,
            Err(EngineError::FeedClosed)
        ));
        assert!(matches!(
            service.create("hello", &UserId::from("u1")).await,
            Err(EngineError::FeedClosed)
        ));

        let stored = store.messages().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].text, "hi");
    }
}
