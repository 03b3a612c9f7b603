//! Configuration and remote store factory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::remote::{HttpRemoteStore, RemoteStore};

/// Connection settings for the remote snapshot store.
///
/// Note: Custom Debug impl masks the API token to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "***"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

fn default_timeout() -> u64 {
    30
}

/// Sync worker tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// First retry delay in milliseconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Retry delay cap in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Max concurrent pushes.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_base_delay() -> u64 {
    500
}
fn default_max_delay() -> u64 {
    60_000
}
fn default_max_in_flight() -> usize {
    4
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

/// Top-level adaptest configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptestConfig {
    /// Directory holding local attempt snapshots.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory of TOML test definitions.
    #[serde(default = "default_definitions_dir")]
    pub definitions_dir: PathBuf,
    /// Remote store. Without it attempts are kept locally only.
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub sync: SyncConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./adaptest-data")
}
fn default_definitions_dir() -> PathBuf {
    PathBuf::from("./definitions")
}

impl Default for AdaptestConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            definitions_dir: default_definitions_dir(),
            remote: None,
            sync: SyncConfig::default(),
        }
    }
}

impl AdaptestConfig {
    /// Where [`FileStore`](crate::store::FileStore) keeps attempt snapshots.
    pub fn attempts_dir(&self) -> PathBuf {
        self.data_dir.join("attempts")
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `adaptest.toml` in the current directory
/// 2. `~/.config/adaptest/config.toml`
///
/// Environment variable overrides: `ADAPTEST_REMOTE_URL`, `ADAPTEST_API_TOKEN`.
pub fn load_config() -> Result<AdaptestConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<AdaptestConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("adaptest.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            parse_config_str(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => AdaptestConfig::default(),
    };

    // Apply env var overrides
    if let Ok(url) = std::env::var("ADAPTEST_REMOTE_URL") {
        let remote = config.remote.get_or_insert_with(|| RemoteConfig {
            base_url: String::new(),
            api_token: None,
            timeout_secs: default_timeout(),
        });
        remote.base_url = url;
    }
    if let Ok(token) = std::env::var("ADAPTEST_API_TOKEN") {
        if let Some(remote) = config.remote.as_mut() {
            remote.api_token = Some(token);
        }
    }

    Ok(config)
}

/// Parse a TOML config string and resolve `${VAR}` references.
pub fn parse_config_str(content: &str) -> Result<AdaptestConfig> {
    let mut config: AdaptestConfig = toml::from_str(content)?;
    if let Some(remote) = config.remote.as_mut() {
        remote.base_url = resolve_env_vars(&remote.base_url);
        remote.api_token = remote.api_token.as_deref().map(resolve_env_vars);
    }
    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("adaptest"))
}

/// Create the configured remote store, if any.
pub fn create_remote(config: &AdaptestConfig) -> Result<Option<Arc<dyn RemoteStore>>> {
    let Some(remote) = &config.remote else {
        return Ok(None);
    };
    if remote.base_url.trim().is_empty() {
        anyhow::bail!("remote.base_url is empty");
    }
    let store = HttpRemoteStore::new(
        &remote.base_url,
        remote.api_token.clone(),
        Some(remote.timeout_secs),
    )?;
    Ok(Some(Arc::new(store)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("_ADAPTEST_TEST_VAR", "hello");
        assert_eq!(resolve_env_vars("${_ADAPTEST_TEST_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix_${_ADAPTEST_TEST_VAR}_suffix"),
            "prefix_hello_suffix"
        );
        assert_eq!(resolve_env_vars("no vars"), "no vars");
        std::env::remove_var("_ADAPTEST_TEST_VAR");
    }

    #[test]
    fn default_config() {
        let config = AdaptestConfig::default();
        assert!(config.remote.is_none());
        assert_eq!(config.sync.max_in_flight, 4);
        assert_eq!(config.attempts_dir(), PathBuf::from("./adaptest-data/attempts"));
    }

    #[test]
    fn parse_full_config() {
        std::env::set_var("_ADAPTEST_TOKEN_FOR_TEST", "tok-123");
        let toml_str = r#"
data_dir = "/var/lib/adaptest"

[remote]
base_url = "https://exams.example.com/api"
api_token = "${_ADAPTEST_TOKEN_FOR_TEST}"

[sync]
base_delay_ms = 250
"#;
        let config = parse_config_str(toml_str).unwrap();
        std::env::remove_var("_ADAPTEST_TOKEN_FOR_TEST");

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/adaptest"));
        assert_eq!(config.definitions_dir, PathBuf::from("./definitions"));
        let remote = config.remote.as_ref().unwrap();
        assert_eq!(remote.api_token.as_deref(), Some("tok-123"));
        assert_eq!(remote.timeout_secs, 30);
        assert_eq!(config.sync.base_delay_ms, 250);
        assert_eq!(config.sync.max_delay_ms, 60_000);
        assert!(!format!("{remote:?}").contains("tok-123"));
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let err = load_config_from(Some(Path::new("/nonexistent/adaptest.toml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn create_remote_requires_url() {
        assert!(create_remote(&AdaptestConfig::default()).unwrap().is_none());

        let mut config = AdaptestConfig::default();
        config.remote = Some(RemoteConfig {
            base_url: " ".into(),
            api_token: None,
            timeout_secs: 5,
        });
        assert!(create_remote(&config).is_err());

        config.remote.as_mut().unwrap().base_url = "http://localhost:8080".into();
        assert!(create_remote(&config).unwrap().is_some());
    }
}
