//! The remote store seam used by the engine.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{ChangeBatch, MessageId, NewMessage, StoreError, UserRecord};

/// Channel capacity between a transport task and its `ChangeStream`.
pub const CHANGE_STREAM_CAPACITY: usize = 256;

/// An ordered, push-subscribable document store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read every document of the users collection.
    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError>;

    /// Open a subscription to the messages collection ordered by `sentAt`.
    ///
    /// The first batch carries the documents that already exist.
    async fn subscribe_messages(&self) -> Result<ChangeStream, StoreError>;

    /// Insert a message; the store assigns the id and the timestamp.
    async fn create_message(&self, draft: &NewMessage) -> Result<MessageId, StoreError>;

    /// Replace the `text` field of an existing message.
    async fn update_message_text(&self, id: &MessageId, text: &str) -> Result<(), StoreError>;

    /// Delete a message.
    async fn delete_message(&self, id: &MessageId) -> Result<(), StoreError>;
}

/// Receiving end of a message subscription.
///
/// Yields batches in server order. An `Err` item means the subscription was
/// lost; `None` means the transport finished. Neither is followed by more
/// batches.
pub struct ChangeStream {
    rx: mpsc::Receiver<Result<ChangeBatch, StoreError>>,
    task: Option<JoinHandle<()>>,
}

impl ChangeStream {
    /// Create a stream and the sender a transport pushes into.
    pub fn channel() -> (mpsc::Sender<Result<ChangeBatch, StoreError>>, Self) {
        let (tx, rx) = mpsc::channel(CHANGE_STREAM_CAPACITY);
        (tx, Self { rx, task: None })
    }

    /// Tie the lifetime of the transport task to this stream.
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    /// Wait for the next batch.
    pub async fn next_batch(&mut self) -> Option<Result<ChangeBatch, StoreError>> {
        self.rx.recv().await
    }
}

impl Drop for ChangeStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for ChangeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeStream")
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_delivers_in_order_then_ends() {
        let (tx, mut stream) = ChangeStream::channel();
        tx.send(Ok(vec![])).await.unwrap();
        tx.send(Err(StoreError::WebSocket("closed".into())))
            .await
            .unwrap();
        drop(tx);

        assert!(matches!(stream.next_batch().await, Some(Ok(_))));
        assert!(matches!(
            stream.next_batch().await,
            Some(Err(StoreError::WebSocket(_)))
        ));
        assert!(stream.next_batch().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_aborts_transport_task() {
        let (_tx, stream) = ChangeStream::channel();
        let (alive_tx, alive_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _alive = alive_tx;
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        });
        let stream = stream.with_task(task);

        drop(stream);
        // The sender is dropped with the aborted task's future.
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), alive_rx).await;
        assert!(matches!(result, Ok(Err(_))));
    }
}
