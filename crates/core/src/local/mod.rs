//! Local storage: the always-available backend and the fallback system of record
//!
//! Each resource lives under the key `db_{resource}` as a JSON array of
//! records, the same layout whether it is written by the local backend or by a
//! fallback handler.

mod backend;
mod memory;
mod tables;

pub use backend::LocalBackend;
pub use memory::MemoryLocalStore;
pub use tables::LocalTables;
