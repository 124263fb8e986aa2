//! Live, ordered message feed with author-only edits and deletes.
//!
//! The engine loads the user directory once, subscribes to the messages
//! collection, and keeps a deduplicated, `sentAt`-ordered local feed in
//! step with the store.
//!
//! ## Features
//!
//! - **Directory**: session snapshot of user profiles used to label senders
//! - **Sync**: single-task owner of the local feed, fed by change batches
//! - **Mutations**: create (eventual), update and delete (applied on confirm)
//! - **Selection**: which message a contextual action applies to
//! - **Engine**: the facade tying the above together

mod directory;
mod engine;
mod error;
mod feed;
mod mutation;
mod selection;
pub mod sync;

pub use directory::{Directory, UserProfile};
pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, WriteOperation};
pub use feed::{FeedSnapshot, LocalFeed, Message};
pub use mutation::{MutationService, validate_text};
pub use selection::{Anchor, Selection, SelectionState};
pub use sync::{
    DisconnectCallback, FeedChangedCallback, FeedHandle, FeedSynchronizer, StreamDisconnected,
    Subscription,
};
