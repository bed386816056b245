//! Application constants
//!
//! Resource names, local storage keys and limits shared by every layer.

// Resources
pub const CLIENTS_RESOURCE: &str = "clients";
pub const ACTIVITIES_RESOURCE: &str = "client_activities";

// Local storage layout
pub const LOCAL_TABLE_PREFIX: &str = "db_";
pub const REPLAY_QUEUE_KEY: &str = "replay-queue";

// Limits
pub const DEFAULT_ACTIVITY_LIMIT: usize = 50;
pub const MAX_ACTIVITIES_PER_CLIENT: usize = 50;
pub const REPLAY_MAX_ATTEMPTS: u32 = 3;

// Identifiers
pub const OPERATION_ID_PREFIX: &str = "op_";

/// Local storage key holding the records of `resource`
pub fn local_table_key(resource: &str) -> String {
    format!("{LOCAL_TABLE_PREFIX}{resource}")
}
