//! Remote document store client for the chatfeed message feed.
//!
//! The store exposes a read-only `users` collection and an ordered
//! `messages` collection that supports insert, field update, delete and a
//! push subscription delivering batches of change records.
//!
//! ## Features
//!
//! - **HTTP Client**: document CRUD and paginated collection reads
//! - **Change Stream**: JSON WebSocket subscription ordered by `sentAt`
//! - **Memory Store**: in-process store with fault injection, for tests
//!   and local runs
//! - **RemoteStore**: the trait the engine is written against

mod client;
mod error;
pub mod memory;
mod records;
mod store;
pub mod stream;
mod types;

pub use client::StoreClient;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use records::*;
pub use store::{CHANGE_STREAM_CAPACITY, ChangeStream, RemoteStore};
pub use stream::{StreamClient, parse_frame};
pub use types::*;
