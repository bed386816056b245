//! Configuration loading
//!
//! Reads `.env`, config files and `CLIENTKEY_*` environment variables into
//! the domain [`Config`](clientkey_domain::Config).

pub mod loader;

// Re-export commonly used items
pub use loader::{apply_env_overrides, load, load_from_env, load_from_file, probe_config_paths};
