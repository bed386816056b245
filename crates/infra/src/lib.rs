//! # ClientKey Infrastructure
//!
//! Concrete implementations of the `clientkey-core` ports.
//!
//! This crate contains:
//! - The relational backend (PostgreSQL via tokio-postgres)
//! - The document backend (JSON REST via reqwest)
//! - The local SQLite store used by the fallback path
//! - Configuration loading and tracing setup
//!
//! ## Architecture
//! - Implements traits defined in `clientkey-core`
//! - Contains all "impure" code (network, filesystem, environment)

pub mod bootstrap;
pub mod config;
pub mod database;
pub mod errors;
pub mod http;
pub mod observability;

// Re-export commonly used items
pub use bootstrap::{build_data_access, replay_worker};
pub use database::{RelationalBackend, SqliteLocalStore};
pub use errors::{InfraError, IntoBackendError};
pub use http::DocumentBackend;
pub use observability::init_tracing;
