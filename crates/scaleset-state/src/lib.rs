//! scaleset-state — fleet store for runner sets and runners.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for the two resource kinds the controller works with, plus a
//! broadcast channel of change events that drives reconciliation.
//!
//! # Architecture
//!
//! Resources are JSON-serialized into redb's `&[u8]` value columns. Runner
//! keys embed their owner (`{namespace}/{owner}:{name}`) so that all
//! children of one runner set are found with a single prefix scan.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod watch;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use watch::{ResourceKind, WatchAction, WatchEvent};
