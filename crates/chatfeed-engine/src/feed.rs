//! The locally-held ordered message sequence.

use std::collections::HashSet;
use std::sync::Arc;

use chatfeed_store::{ChangeRecord, MessageId, MessageRecord, UserId};
use chrono::{DateTime, Utc};
use tracing::trace;

use crate::directory::{Directory, UserProfile};

/// A message as rendered: the stored document plus its resolved sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub sent_by: UserId,
    pub sent_at: DateTime<Utc>,
    /// Resolved from the directory when the message entered the feed.
    /// `None` when the sender is not in the directory.
    pub sender: Option<UserProfile>,
}

impl Message {
    /// Attach the sender's profile to a stored message.
    pub fn enrich(record: MessageRecord, directory: &Directory) -> Self {
        let sender = directory.lookup(&record.sent_by).cloned();
        if sender.is_none() {
            trace!(id = %record.id, sent_by = %record.sent_by, "sender not in directory");
        }
        Self {
            id: record.id,
            text: record.text,
            sent_by: record.sent_by,
            sent_at: record.sent_at,
            sender,
        }
    }

    /// Whether `user` authored this message.
    pub fn is_from(&self, user: &UserId) -> bool {
        &self.sent_by == user
    }
}

/// Immutable view of the feed handed to readers.
pub type FeedSnapshot = Arc<[Message]>;

/// Ordered, duplicate-free message sequence.
///
/// Messages are kept in non-decreasing `sent_at` order; messages with equal
/// timestamps keep their arrival order. Ids removed during the session are
/// remembered so a replayed addition cannot bring them back.
#[derive(Debug, Default)]
pub struct LocalFeed {
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
    tombstones: HashSet<MessageId>,
}

impl LocalFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a message at its ordered position.
    ///
    /// Returns false if the id is already present or was removed.
    pub fn insert(&mut self, message: Message) -> bool {
        if self.ids.contains(&message.id) {
            trace!(id = %message.id, "skipping duplicate addition");
            return false;
        }
        if self.tombstones.contains(&message.id) {
            trace!(id = %message.id, "skipping addition of removed message");
            return false;
        }

        // For in-order delivery this is the end of the vector.
        let pos = self
            .messages
            .partition_point(|m| m.sent_at <= message.sent_at);
        self.ids.insert(message.id.clone());
        self.messages.insert(pos, message);
        true
    }

    /// Replace the text of a message in place.
    ///
    /// Returns true if the feed changed.
    pub fn set_text(&mut self, id: &MessageId, text: &str) -> bool {
        match self.messages.iter_mut().find(|m| &m.id == id) {
            Some(message) if message.text != text => {
                message.text = text.to_string();
                true
            }
            _ => false,
        }
    }

    /// Remove a message and remember its id.
    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        self.tombstones.insert(id.clone());
        if !self.ids.remove(id) {
            return None;
        }
        let pos = self.messages.iter().position(|m| &m.id == id)?;
        Some(self.messages.remove(pos))
    }

    /// Fold one change record into the feed.
    ///
    /// Returns true if the feed changed.
    pub fn apply(&mut self, change: ChangeRecord, directory: &Directory) -> bool {
        match change {
            ChangeRecord::Added { doc } => self.insert(Message::enrich(doc, directory)),
            ChangeRecord::Modified { doc } => {
                let changed = self.set_text(&doc.id, &doc.text);
                if !changed && !self.contains(&doc.id) {
                    trace!(id = %doc.id, "ignoring modification of unknown message");
                }
                changed
            }
            ChangeRecord::Removed { id } => self.remove(&id).is_some(),
        }
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Copy the current contents into an immutable snapshot.
    pub fn snapshot(&self) -> FeedSnapshot {
        Arc::from(self.messages.as_slice())
    }
}
