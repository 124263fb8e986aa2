//! Core types for store documents and change records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a user document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

/// Identifier of a message document, assigned by the store on create.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            /// Borrow the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(UserId);
string_id!(MessageId);

/// A document from the `users` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    #[serde(rename = "firstName", default)]
    pub first_name: String,
    #[serde(rename = "lastname", alias = "lastName", default)]
    pub last_name: String,
}

/// A document from the `messages` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: MessageId,
    pub text: String,
    pub sent_by: UserId,
    pub sent_at: DateTime<Utc>,
}

/// A message draft. The store assigns the id and the timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub text: String,
    pub sent_by: UserId,
}

impl NewMessage {
    pub fn new(text: impl Into<String>, sent_by: UserId) -> Self {
        Self {
            text: text.into(),
            sent_by,
        }
    }
}

/// Kind of a change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Removed => "removed",
        };
        f.write_str(s)
    }
}

/// One entry of a change batch pushed by the message subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChangeRecord {
    /// A document entered the ordered collection.
    Added { doc: MessageRecord },
    /// A document's fields changed.
    Modified { doc: MessageRecord },
    /// A document was deleted.
    Removed { id: MessageId },
}

impl ChangeRecord {
    /// The kind tag of this record.
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeRecord::Added { .. } => ChangeKind::Added,
            ChangeRecord::Modified { .. } => ChangeKind::Modified,
            ChangeRecord::Removed { .. } => ChangeKind::Removed,
        }
    }

    /// The id of the document this record refers to.
    pub fn id(&self) -> &MessageId {
        match self {
            ChangeRecord::Added { doc } | ChangeRecord::Modified { doc } => &doc.id,
            ChangeRecord::Removed { id } => id,
        }
    }
}

/// A batch of change records, in server order.
pub type ChangeBatch = Vec<ChangeRecord>;

/// Response from listing documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDocumentsResponse<T> {
    pub documents: Vec<T>,
    pub next_page_token: Option<String>,
}

/// Response from creating a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentResponse {
    pub id: MessageId,
    pub sent_at: Option<DateTime<Utc>>,
}
