//! Configuration loader
//!
//! ## Loading Strategy
//! 1. Read a `.env` file into the process environment, if one exists
//! 2. Load the config file named by `CLIENTKEY_CONFIG`, or the first probed
//!    file, or fall back to defaults
//! 3. Apply environment variable overrides on top
//!
//! Missing settings are never an error: an unconfigured backend is simply
//! skipped and the application degrades to local storage. Values that are
//! present but malformed are a [`CommonError::Config`].
//!
//! ## Environment Variables
//! - `CLIENTKEY_CONFIG`: explicit config file path
//! - `CLIENTKEY_DB_HOST`, `CLIENTKEY_DB_PORT`, `CLIENTKEY_DB_USER`,
//!   `CLIENTKEY_DB_PASSWORD`, `CLIENTKEY_DB_NAME`, `CLIENTKEY_DB_TLS`:
//!   relational backend
//! - `CLIENTKEY_DOC_BASE_URL`, `CLIENTKEY_DOC_API_KEY`,
//!   `CLIENTKEY_DOC_PROJECT_ID`: document backend
//! - `CLIENTKEY_LOCAL_PATH`: local SQLite file
//! - `CLIENTKEY_LOG_JSON`: emit JSON logs (true/false)
//!
//! ## File Locations
//! Probed in order, first relative to the working directory and then to the
//! executable: `clientkey.toml`, `clientkey.json`, `config/clientkey.toml`.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use clientkey_common::error::{CommonError, CommonResult};
use clientkey_domain::Config;

const CONFIG_PATH_VAR: &str = "CLIENTKEY_CONFIG";
const CANDIDATE_FILES: [&str; 3] = ["clientkey.toml", "clientkey.json", "config/clientkey.toml"];

/// Load configuration from `.env`, a config file and the environment
///
/// # Errors
/// Returns `CommonError::Config` if the named config file does not exist, a
/// file cannot be parsed, or an environment override is malformed.
pub fn load() -> CommonResult<Config> {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "Ignoring unreadable .env file"),
    }

    let mut config = match std::env::var(CONFIG_PATH_VAR).ok().filter(|p| !p.trim().is_empty()) {
        Some(path) => load_from_file(Some(PathBuf::from(path)))?,
        None => match probe_config_paths() {
            Some(path) => load_from_file(Some(path))?,
            None => {
                tracing::debug!("No config file found, using defaults");
                Config::default()
            }
        },
    };

    apply_env_overrides(&mut config)?;
    tracing::info!(
        relational = config.relational.enabled,
        document = config.document.is_configured(),
        local_path = %config.local.path,
        "Configuration loaded"
    );
    Ok(config)
}

/// Defaults with environment overrides applied, ignoring config files
///
/// # Errors
/// Returns `CommonError::Config` if an environment override is malformed.
pub fn load_from_env() -> CommonResult<Config> {
    let mut config = Config::default();
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations.
///
/// # Errors
/// Returns `CommonError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
pub fn load_from_file(path: Option<PathBuf>) -> CommonResult<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(CommonError::config(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            CommonError::config("No config file found in any of the standard locations")
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| CommonError::config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, &config_path)
}

/// Parse configuration, detecting the format by file extension
fn parse_config(contents: &str, path: &Path) -> CommonResult<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| CommonError::config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| CommonError::config(format!("Invalid JSON format: {e}"))),
        _ => Err(CommonError::config(format!("Unsupported config format: {extension}"))),
    }
}

/// First existing config file among the standard locations
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd);
    }
    if let Some(exe_dir) = std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf)) {
        roots.push(exe_dir);
    }

    roots
        .iter()
        .flat_map(|root| CANDIDATE_FILES.iter().map(move |name| root.join(name)))
        .find(|path| path.exists())
}

/// Overlay `CLIENTKEY_*` environment variables onto `config`
///
/// # Errors
/// Returns `CommonError::Config` naming the field whose value is malformed.
pub fn apply_env_overrides(config: &mut Config) -> CommonResult<()> {
    let db = &mut config.relational;
    if let Some(host) = env_string("CLIENTKEY_DB_HOST") {
        db.host = host;
    }
    if let Some(port) = env_parse::<u16>("CLIENTKEY_DB_PORT", "relational.port")? {
        db.port = port;
    }
    if let Some(user) = env_string("CLIENTKEY_DB_USER") {
        db.user = user;
    }
    if let Some(password) = env_string("CLIENTKEY_DB_PASSWORD") {
        db.password = password;
    }
    if let Some(database) = env_string("CLIENTKEY_DB_NAME") {
        db.database = database;
    }
    db.use_tls = env_bool("CLIENTKEY_DB_TLS", db.use_tls);

    let doc = &mut config.document;
    if let Some(base_url) = env_string("CLIENTKEY_DOC_BASE_URL") {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(CommonError::config_field(
                "document.base_url",
                format!("expected an http(s) URL, got {base_url:?}"),
            ));
        }
        doc.base_url = base_url;
    }
    if let Some(api_key) = env_string("CLIENTKEY_DOC_API_KEY") {
        doc.api_key = Some(api_key);
    }
    if let Some(project_id) = env_string("CLIENTKEY_DOC_PROJECT_ID") {
        doc.project_id = Some(project_id);
    }

    if let Some(path) = env_string("CLIENTKEY_LOCAL_PATH") {
        config.local.path = path;
    }
    config.logging.json = env_bool("CLIENTKEY_LOG_JSON", config.logging.json);

    Ok(())
}

/// Non-empty environment variable
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn env_parse<T>(key: &str, field: &str) -> CommonResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_string(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| CommonError::config_field(field, format!("invalid value {raw:?} in {key}: {e}")))
        })
        .transpose()
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use once_cell::sync::Lazy;
    use tempfile::NamedTempFile;

    use super::*;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const OVERRIDES: [&str; 11] = [
        "CLIENTKEY_DB_HOST",
        "CLIENTKEY_DB_PORT",
        "CLIENTKEY_DB_USER",
        "CLIENTKEY_DB_PASSWORD",
        "CLIENTKEY_DB_NAME",
        "CLIENTKEY_DB_TLS",
        "CLIENTKEY_DOC_BASE_URL",
        "CLIENTKEY_DOC_API_KEY",
        "CLIENTKEY_DOC_PROJECT_ID",
        "CLIENTKEY_LOCAL_PATH",
        "CLIENTKEY_LOG_JSON",
    ];

    fn clear_overrides() {
        for key in OVERRIDES {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_env_bool_parsing() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");

        for (i, value) in ["1", "true", "yes", "on", "TRUE"].iter().enumerate() {
            let key = format!("CLIENTKEY_TEST_BOOL_TRUE_{i}");
            std::env::set_var(&key, value);
            assert!(env_bool(&key, false), "{value} should be true");
            std::env::remove_var(&key);
        }

        for (i, value) in ["0", "false", "no", "off"].iter().enumerate() {
            let key = format!("CLIENTKEY_TEST_BOOL_FALSE_{i}");
            std::env::set_var(&key, value);
            assert!(!env_bool(&key, true), "{value} should be false");
            std::env::remove_var(&key);
        }

        std::env::remove_var("CLIENTKEY_TEST_BOOL_MISSING");
        assert!(env_bool("CLIENTKEY_TEST_BOOL_MISSING", true));
        assert!(!env_bool("CLIENTKEY_TEST_BOOL_MISSING", false));
    }

    #[test]
    fn test_load_from_env_without_vars_uses_defaults() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_overrides();

        let config = load_from_env().unwrap();
        assert_eq!(config, Config::default());
        assert!(!config.document.is_configured());
    }

    #[test]
    fn test_load_from_env_applies_overrides() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_overrides();

        std::env::set_var("CLIENTKEY_DB_HOST", "db.internal");
        std::env::set_var("CLIENTKEY_DB_PORT", "6543");
        std::env::set_var("CLIENTKEY_DB_USER", "svc");
        std::env::set_var("CLIENTKEY_DB_PASSWORD", "hunter2");
        std::env::set_var("CLIENTKEY_DB_NAME", "loyalty");
        std::env::set_var("CLIENTKEY_DB_TLS", "yes");
        std::env::set_var("CLIENTKEY_DOC_BASE_URL", "https://docs.example.com");
        std::env::set_var("CLIENTKEY_DOC_API_KEY", "key-123");
        std::env::set_var("CLIENTKEY_DOC_PROJECT_ID", "acme");
        std::env::set_var("CLIENTKEY_LOCAL_PATH", "/tmp/clientkey.db");
        std::env::set_var("CLIENTKEY_LOG_JSON", "1");

        let config = load_from_env().unwrap();
        clear_overrides();

        assert_eq!(config.relational.host, "db.internal");
        assert_eq!(config.relational.port, 6543);
        assert_eq!(config.relational.user, "svc");
        assert_eq!(config.relational.password, "hunter2");
        assert_eq!(config.relational.database, "loyalty");
        assert!(config.relational.use_tls);
        assert_eq!(config.document.base_url, "https://docs.example.com");
        assert!(config.document.is_configured());
        assert_eq!(config.local.path, "/tmp/clientkey.db");
        assert!(config.logging.json);
    }

    #[test]
    fn test_load_from_env_invalid_port() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_overrides();

        std::env::set_var("CLIENTKEY_DB_PORT", "not-a-number");
        let result = load_from_env();
        clear_overrides();

        let err = result.unwrap_err();
        assert!(
            matches!(&err, CommonError::Config { field: Some(field), .. } if field == "relational.port"),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn test_load_from_env_rejects_non_http_base_url() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_overrides();

        std::env::set_var("CLIENTKEY_DOC_BASE_URL", "ftp://docs.example.com");
        let result = load_from_env();
        clear_overrides();

        assert!(matches!(result, Err(CommonError::Config { .. })));
    }

    #[test]
    fn test_parse_partial_toml_keeps_defaults() {
        let toml_content = r#"
[relational]
host = "pg.example.com"

[resilience]
failure_threshold = 3
"#;
        let config = parse_config(toml_content, Path::new("clientkey.toml")).unwrap();

        assert_eq!(config.relational.host, "pg.example.com");
        assert_eq!(config.relational.port, 5432);
        assert_eq!(config.resilience.failure_threshold, 3);
        assert_eq!(config.resilience.cooldown_ms, 30_000);
    }

    #[test]
    fn test_load_from_file_json() {
        let json_content = r#"{
            "document": { "api_key": "k", "project_id": "p" },
            "local": { "path": ":memory:" }
        }"#;

        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        temp_file.write_all(json_content.as_bytes()).unwrap();

        let config = load_from_file(Some(temp_file.path().to_path_buf())).unwrap();
        assert!(config.document.is_configured());
        assert_eq!(config.local.path, ":memory:");
    }

    #[test]
    fn test_load_from_file_invalid_format() {
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        temp_file.write_all(b"[relational\nhost = ").unwrap();

        let err = load_from_file(Some(temp_file.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, CommonError::Config { .. }));
    }

    #[test]
    fn test_load_from_file_missing() {
        let err = load_from_file(Some(PathBuf::from("/nonexistent/clientkey.toml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_unsupported_extension() {
        let err = parse_config("", Path::new("clientkey.yaml")).unwrap_err();
        assert!(err.to_string().contains("Unsupported config format"));
    }
}
