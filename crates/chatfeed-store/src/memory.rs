//! In-process document store.
//!
//! Behaves like the remote store as far as the engine can tell: ids and
//! timestamps are assigned on create, a new subscription first receives the
//! existing documents as one `added` batch, and every write is pushed to live
//! subscribers as a one-record batch. Faults can be injected to exercise
//! failure paths.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, trace, warn};

use crate::{
    ChangeBatch, ChangeRecord, ChangeStream, MESSAGES_COLLECTION, MessageId, MessageRecord,
    NewMessage, RemoteStore, StoreError, UserRecord,
};

/// Broadcast channel capacity for live change batches.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum StoreEvent {
    Batch(ChangeBatch),
    Drop(String),
}

#[derive(Debug, Default)]
struct Inner {
    users: Vec<UserRecord>,
    /// Ordered by `sent_at`.
    messages: Vec<MessageRecord>,
    last_sent_at: Option<DateTime<Utc>>,
    paused: bool,
    held: Vec<ChangeBatch>,
}

/// In-memory implementation of [`RemoteStore`].
pub struct MemoryStore {
    inner: Mutex<Inner>,
    events_tx: broadcast::Sender<StoreEvent>,
    fail_users: AtomicBool,
    fail_writes: AtomicBool,
    fail_subscribe: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Arc<Self> {
        Self::with_users(Vec::new())
    }

    /// Create a store whose users collection holds `users`.
    pub fn with_users(users: impl IntoIterator<Item = UserRecord>) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            inner: Mutex::new(Inner {
                users: users.into_iter().collect(),
                ..Inner::default()
            }),
            events_tx,
            fail_users: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
        })
    }

    /// Make `list_users` fail.
    pub fn set_fail_users(&self, fail: bool) {
        self.fail_users.store(fail, Ordering::SeqCst);
    }

    /// Make create, update and delete fail without touching any document.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `subscribe_messages` refuse before any subscriber is registered.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Insert a message with a caller-chosen id and timestamp.
    pub async fn insert_message(&self, record: MessageRecord) {
        let mut inner = self.inner.lock().await;
        let pos = inner
            .messages
            .partition_point(|m| m.sent_at <= record.sent_at);
        inner.messages.insert(pos, record.clone());
        inner.last_sent_at = inner.last_sent_at.max(Some(record.sent_at));
        self.emit(&mut inner, vec![ChangeRecord::Added { doc: record }]);
    }

    /// Deliver a batch to live subscribers without touching stored documents.
    ///
    /// Used to simulate replays and out-of-band changes.
    pub async fn push_changes(&self, batch: ChangeBatch) {
        let mut inner = self.inner.lock().await;
        self.emit(&mut inner, batch);
    }

    /// Hold back live batches until [`resume_stream`](Self::resume_stream).
    pub async fn pause_stream(&self) {
        self.inner.lock().await.paused = true;
    }

    /// Deliver held batches in order and go back to live delivery.
    pub async fn resume_stream(&self) {
        let mut inner = self.inner.lock().await;
        inner.paused = false;
        let held = std::mem::take(&mut inner.held);
        for batch in held {
            self.emit(&mut inner, batch);
        }
    }

    /// Drop every live subscription with the given reason.
    pub fn drop_subscribers(&self, reason: impl Into<String>) {
        if self.events_tx.send(StoreEvent::Drop(reason.into())).is_err() {
            trace!("no subscribers to drop");
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.events_tx.receiver_count()
    }

    /// Stored messages in `sent_at` order.
    pub async fn messages(&self) -> Vec<MessageRecord> {
        self.inner.lock().await.messages.clone()
    }

    fn emit(&self, inner: &mut Inner, batch: ChangeBatch) {
        if inner.paused {
            inner.held.push(batch);
            return;
        }
        if self.events_tx.send(StoreEvent::Batch(batch)).is_err() {
            trace!("no subscribers for change batch");
        }
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write rejected".to_string()));
        }
        Ok(())
    }

    fn not_found(id: &MessageId) -> StoreError {
        StoreError::NotFound {
            collection: MESSAGES_COLLECTION.to_string(),
            id: id.to_string(),
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        if self.fail_users.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("users collection unreachable".to_string()));
        }
        Ok(self.inner.lock().await.users.clone())
    }

    async fn subscribe_messages(&self) -> Result<ChangeStream, StoreError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("subscription refused".to_string()));
        }

        // Snapshot and subscribe under one lock so no write falls in between.
        let (initial, mut events_rx) = {
            let inner = self.inner.lock().await;
            let initial: ChangeBatch = inner
                .messages
                .iter()
                .cloned()
                .map(|doc| ChangeRecord::Added { doc })
                .collect();
            (initial, self.events_tx.subscribe())
        };

        let (tx, stream) = ChangeStream::channel();
        debug!(existing = initial.len(), "memory store subscription opened");
        if tx.send(Ok(initial)).await.is_err() {
            return Err(StoreError::Unavailable("subscription closed".to_string()));
        }

        let task = tokio::spawn(async move {
            loop {
                match events_rx.recv().await {
                    Ok(StoreEvent::Batch(batch)) => {
                        if tx.send(Ok(batch)).await.is_err() {
                            return;
                        }
                    }
                    Ok(StoreEvent::Drop(reason)) => {
                        let _ = tx.send(Err(StoreError::Unavailable(reason))).await;
                        return;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "memory store subscriber lagged");
                        let _ = tx
                            .send(Err(StoreError::Unavailable(format!(
                                "subscriber lagged by {} batches",
                                skipped
                            ))))
                            .await;
                        return;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(stream.with_task(task))
    }

    async fn create_message(&self, draft: &NewMessage) -> Result<MessageId, StoreError> {
        self.check_writable()?;

        let mut inner = self.inner.lock().await;
        let sent_at = match inner.last_sent_at {
            Some(last) => last.max(Utc::now()),
            None => Utc::now(),
        };
        let record = MessageRecord {
            id: MessageId(uuid::Uuid::new_v4().to_string()),
            text: draft.text.clone(),
            sent_by: draft.sent_by.clone(),
            sent_at,
        };
        let id = record.id.clone();

        inner.last_sent_at = Some(sent_at);
        inner.messages.push(record.clone());
        self.emit(&mut inner, vec![ChangeRecord::Added { doc: record }]);

        debug!(id = %id, "memory store: message created");
        Ok(id)
    }

    async fn update_message_text(&self, id: &MessageId, text: &str) -> Result<(), StoreError> {
        self.check_writable()?;

        let mut inner = self.inner.lock().await;
        let record = inner
            .messages
            .iter_mut()
            .find(|m| &m.id == id)
            .ok_or_else(|| Self::not_found(id))?;
        record.text = text.to_string();
        let doc = record.clone();
        self.emit(&mut inner, vec![ChangeRecord::Modified { doc }]);

        debug!(id = %id, "memory store: message updated");
        Ok(())
    }

    async fn delete_message(&self, id: &MessageId) -> Result<(), StoreError> {
        self.check_writable()?;

        let mut inner = self.inner.lock().await;
        let pos = inner
            .messages
            .iter()
            .position(|m| &m.id == id)
            .ok_or_else(|| Self::not_found(id))?;
        inner.messages.remove(pos);
        self.emit(&mut inner, vec![ChangeRecord::Removed { id: id.clone() }]);

        debug!(id = %id, "memory store: message deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UserId;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn record(id: &str, secs: i64) -> MessageRecord {
        MessageRecord {
            id: MessageId::from(id),
            text: format!("text {}", id),
            sent_by: UserId::from("u1"),
            sent_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_subscribe_replays_existing_documents_in_order() {
        let store = MemoryStore::new();
        store.insert_message(record("m2", 2)).await;
        store.insert_message(record("m1", 1)).await;

        let mut stream = store.subscribe_messages().await.unwrap();
        let batch = stream.next_batch().await.unwrap().unwrap();

        let ids: Vec<_> = batch.iter().map(|c| c.id().as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn test_writes_are_pushed_to_subscribers() {
        let store = MemoryStore::new();
        let mut stream = store.subscribe_messages().await.unwrap();
        let _initial = stream.next_batch().await;

        let id = store
            .create_message(&NewMessage::new("hello", UserId::from("u1")))
            .await
            .unwrap();
        store.update_message_text(&id, "hello!").await.unwrap();
        store.delete_message(&id).await.unwrap();

        let mut kinds = Vec::new();
        for _ in 0..3 {
            let batch = stream.next_batch().await.unwrap().unwrap();
            kinds.extend(batch.iter().map(|c| c.kind().to_string()));
        }
        assert_eq!(kinds, vec!["added", "modified", "removed"]);
        assert!(store.messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_created_timestamps_never_decrease() {
        let store = MemoryStore::new();
        let future = Utc::now() + chrono::Duration::hours(1);
        store
            .insert_message(MessageRecord {
                sent_at: future,
                ..record("m0", 0)
            })
            .await;

        store
            .create_message(&NewMessage::new("later", UserId::from("u1")))
            .await
            .unwrap();

        let messages = store.messages().await;
        assert!(messages[1].sent_at >= messages[0].sent_at);
    }

    #[tokio::test]
    async fn test_fail_writes_leaves_documents_untouched() {
        let store = MemoryStore::new();
        store.insert_message(record("m1", 1)).await;
        store.set_fail_writes(true);

        let result = store
            .update_message_text(&MessageId::from("m1"), "changed")
            .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(store.messages().await[0].text, "text m1");
    }

    #[tokio::test]
    async fn test_update_missing_document() {
        let store = MemoryStore::new();
        let result = store
            .update_message_text(&MessageId::from("nope"), "x")
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_pause_holds_batches_until_resume() {
        let store = MemoryStore::new();
        let mut stream = store.subscribe_messages().await.unwrap();
        let _initial = stream.next_batch().await;

        store.pause_stream().await;
        store.insert_message(record("m1", 1)).await;
        let pending =
            tokio::time::timeout(std::time::Duration::from_millis(50), stream.next_batch()).await;
        assert!(pending.is_err());

        store.resume_stream().await;
        let batch = stream.next_batch().await.unwrap().unwrap();
        assert_eq!(batch[0].id().as_str(), "m1");
    }

    #[tokio::test]
    async fn test_drop_subscribers_ends_stream_with_error() {
        let store = MemoryStore::new();
        let mut stream = store.subscribe_messages().await.unwrap();
        let _initial = stream.next_batch().await;

        store.drop_subscribers("maintenance");

        assert!(matches!(
            stream.next_batch().await,
            Some(Err(StoreError::Unavailable(ref reason))) if reason == "maintenance"
        ));
        assert!(stream.next_batch().await.is_none());
    }

    #[tokio::test]
    async fn test_fail_users() {
        let store = MemoryStore::with_users(vec![UserRecord {
            id: UserId::from("u1"),
            first_name: "A".into(),
            last_name: String::new(),
        }]);
        assert_eq!(store.list_users().await.unwrap().len(), 1);

        store.set_fail_users(true);
        assert!(store.list_users().await.is_err());
    }

    #[tokio::test]
    async fn test_fail_subscribe_registers_no_subscriber() {
        let store = MemoryStore::new();
        store.set_fail_subscribe(true);

        assert!(matches!(
            store.subscribe_messages().await,
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(store.subscriber_count(), 0);

        store.set_fail_subscribe(false);
        let _stream = store.subscribe_messages().await.unwrap();
        assert_eq!(store.subscriber_count(), 1);
    }
}
