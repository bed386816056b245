//! HTTP-backed storage

pub mod document;

pub use document::DocumentBackend;
