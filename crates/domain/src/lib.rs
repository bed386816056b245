//! # ClientKey Domain
//!
//! Business domain types and models for ClientKey.
//!
//! This crate contains:
//! - Client and activity records with their typed request shapes
//! - The storage-agnostic query surface (`Query`, `QueryResponse`)
//! - Logical operations and the replay queue's operation record
//! - Domain error types and configuration structures
//!
//! ## Architecture
//! - No dependencies on other ClientKey crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
