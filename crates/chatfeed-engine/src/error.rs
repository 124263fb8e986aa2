//! Error types for the engine.

use chatfeed_store::{MessageId, StoreError};
use thiserror::Error;

/// The remote write an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOperation {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for WriteOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WriteOperation::Create => "create",
            WriteOperation::Update => "update",
            WriteOperation::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The bulk read of the users collection failed; the feed cannot start.
    #[error("user directory unavailable: {0}")]
    DirectoryUnavailable(#[source] StoreError),

    /// The message subscription could not be opened or was lost.
    #[error("message stream disconnected: {reason}")]
    StreamDisconnected { reason: String },

    /// A create, update or delete was rejected by the store.
    #[error("remote {operation} failed: {source}")]
    RemoteWriteFailed {
        operation: WriteOperation,
        #[source]
        source: StoreError,
    },

    /// The message is not in the local feed.
    #[error("message not in local feed: {0}")]
    UnknownMessage(MessageId),

    /// A contextual action was invoked with nothing selected.
    #[error("no message selected")]
    NoSelection,

    /// A contextual action targeted a message other than the selected one.
    #[error("selected message is {selected}, action targets {requested}")]
    SelectionMismatch {
        selected: MessageId,
        requested: MessageId,
    },

    /// Only the author of a message may edit or delete it.
    #[error("message {0} was not sent by the current user")]
    NotAuthor(MessageId),

    /// Message text is empty.
    #[error("message text is empty")]
    EmptyMessage,

    /// The feed task has stopped.
    #[error("feed is closed")]
    FeedClosed,
}

impl EngineError {
    pub(crate) fn remote_write(operation: WriteOperation, source: StoreError) -> Self {
        EngineError::RemoteWriteFailed { operation, source }
    }
}
