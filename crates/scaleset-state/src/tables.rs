//! redb table definitions for the fleet store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized resources).

use redb::TableDefinition;

/// Runner sets keyed by `{namespace}/{name}`.
pub const RUNNER_SETS: TableDefinition<&str, &[u8]> = TableDefinition::new("runner_sets");

/// Runners keyed by `{namespace}/{owner}:{name}` so that one prefix scan
/// lists every child of a runner set.
pub const RUNNERS: TableDefinition<&str, &[u8]> = TableDefinition::new("runners");

/// Build the runners-table key for a child of `owner_key`.
pub fn runner_key(owner_key: &str, name: &str) -> String {
    format!("{owner_key}:{name}")
}
