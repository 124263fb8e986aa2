//! Collection names and field constants.

/// Collection holding user profile documents.
pub const USERS_COLLECTION: &str = "users";

/// Collection holding message documents.
pub const MESSAGES_COLLECTION: &str = "messages";

/// Field the message collection is ordered by.
pub const SENT_AT_FIELD: &str = "sentAt";

/// Page size used when reading a whole collection.
pub const LIST_PAGE_SIZE: u32 = 100;
