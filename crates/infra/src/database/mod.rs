//! Database implementations

pub mod postgres;
pub mod sqlite_store;

pub use postgres::RelationalBackend;
pub use sqlite_store::SqliteLocalStore;
