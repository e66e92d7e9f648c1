//! Local storage layer
//!
//! Two levels: [`KeyValueStorage`] is the raw synchronous string store
//! (SQLite-backed in production, in-memory for tests and ephemeral hosts),
//! and [`EventStore`] layers the SDK's persisted state on top of it —
//! the pending event queues with their capacity ceilings, device and user
//! identity, the current session, and the bundle sequence id.

mod kv;
mod store;

pub use kv::{KeyValueStorage, MemoryStorage, SqliteStorage};
pub use store::{EventStore, StoredUserInfo, MAX_BATCH_EVENTS_SIZE, MAX_FAILED_EVENTS_SIZE};
