//! Session-scoped snapshot of the user directory.
//!
//! Loaded with one bulk read when the engine starts and never refreshed:
//! users added or renamed afterwards are invisible for the session.

use std::collections::HashMap;
use std::sync::Arc;

use chatfeed_store::{RemoteStore, UserId, UserRecord};
use tracing::{debug, info, warn};

use crate::EngineError;

/// Display attributes of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
}

impl UserProfile {
    /// `"first last"`, without stray whitespace when a part is missing.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

impl From<UserRecord> for UserProfile {
    fn from(record: UserRecord) -> Self {
        Self {
            id: record.id,
            first_name: record.first_name,
            last_name: record.last_name,
        }
    }
}

/// Immutable mapping from user id to profile.
#[derive(Debug, Default)]
pub struct Directory {
    profiles: HashMap<UserId, UserProfile>,
}

impl Directory {
    /// Read the whole users collection and build the snapshot.
    pub async fn load(store: &dyn RemoteStore) -> Result<Arc<Self>, EngineError> {
        let records = store
            .list_users()
            .await
            .map_err(EngineError::DirectoryUnavailable)?;

        let directory = Self::from_records(records);
        info!(users = directory.len(), "user directory loaded");
        Ok(Arc::new(directory))
    }

    /// Build a snapshot from already-fetched records.
    ///
    /// When an id appears twice the later record wins.
    pub fn from_records(records: impl IntoIterator<Item = UserRecord>) -> Self {
        let mut profiles = HashMap::new();
        for record in records {
            let id = record.id.clone();
            if profiles.insert(id.clone(), UserProfile::from(record)).is_some() {
                warn!(user = %id, "duplicate user record, keeping the later one");
            }
        }
        debug!(users = profiles.len(), "directory built");
        Self { profiles }
    }

    /// Resolve a sender.
    pub fn lookup(&self, id: &UserId) -> Option<&UserProfile> {
        self.profiles.get(id)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatfeed_store::MemoryStore;

    fn user(id: &str, first: &str, last: &str) -> UserRecord {
        UserRecord {
            id: UserId::from(id),
            first_name: first.to_string(),
            last_name: last.to_string(),
        }
    }

    #[test]
    fn test_display_name() {
        let full = UserProfile::from(user("u1", "Ada", "Lovelace"));
        assert_eq!(full.display_name(), "Ada Lovelace");

        let first_only = UserProfile::from(user("u2", "Ada", ""));
        assert_eq!(first_only.display_name(), "Ada");
    }

    #[test]
    fn test_lookup_missing_user() {
        let directory = Directory::from_records(vec![user("u1", "A", "")]);
        assert!(directory.lookup(&UserId::from("u1")).is_some());
        assert!(directory.lookup(&UserId::from("ghost")).is_none());
    }

    #[test]
    fn test_duplicate_ids_later_wins() {
        let directory =
            Directory::from_records(vec![user("u1", "Old", ""), user("u1", "New", "")]);
        assert_eq!(directory.len(), 1);
        assert_eq!(
            directory.lookup(&UserId::from("u1")).unwrap().first_name,
            "New"
        );
    }

    #[tokio::test]
    async fn test_load_from_store() {
        let store = MemoryStore::with_users(vec![user("u1", "A", ""), user("u2", "B", "")]);
        let directory = Directory::load(store.as_ref()).await.unwrap();
        assert_eq!(directory.len(), 2);
    }

    #[tokio::test]
    async fn test_load_failure_is_directory_unavailable() {
        let store = MemoryStore::new();
        store.set_fail_users(true);

        let err = Directory::load(store.as_ref()).await.unwrap_err();
        assert!(matches!(err, EngineError::DirectoryUnavailable(_)));
    }
}
