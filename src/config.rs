// Configuration module - loads the server inventory and credentials
//
// This module is responsible for:
// 1. Reading the YAML inventory file
// 2. Resolving credentials (inline or from environment variables)
// 3. Validating settings before any array is contacted
// 4. Providing strongly-typed access to settings

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::model::{Credentials, ServerTarget};
use crate::registry::registry_key;

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read inventory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid inventory format: {0}")]
    InvalidFormat(#[from] serde_yaml::Error),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("credentials for '{family}' need either password or password_env")]
    MissingPassword { family: String },

    #[error("environment variable {var} (password for '{family}') is not set")]
    MissingSecret { var: String, family: String },
}

/// Tunables shared by every adapter
///
/// # Example YAML
/// ```yaml
/// settings:
///   request_timeout_secs: 5
///   server_timeout_secs: 300
///   uptime_poll_attempts: 100
///   uptime_poll_interval_ms: 500
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    /// Timeout of every single HTTP call
    pub request_timeout_secs: u64,

    /// Budget for one server's whole collection
    pub server_timeout_secs: u64,

    /// Timeout of one vendor CLI invocation
    pub cli_timeout_secs: u64,

    /// Maximum polls of an asynchronous metrics query
    pub uptime_poll_attempts: u32,

    /// Delay between two polls
    pub uptime_poll_interval_ms: u64,

    /// Location of the VNX command-line tool
    pub naviseccli_path: String,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        CollectorSettings {
            request_timeout_secs: 5,
            server_timeout_secs: 300,
            cli_timeout_secs: 60,
            uptime_poll_attempts: 100,
            uptime_poll_interval_ms: 500,
            naviseccli_path: "/opt/Navisphere/bin/naviseccli".to_string(),
        }
    }
}

impl CollectorSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn server_timeout(&self) -> Duration {
        Duration::from_secs(self.server_timeout_secs)
    }

    pub fn cli_timeout(&self) -> Duration {
        Duration::from_secs(self.cli_timeout_secs)
    }

    pub fn uptime_poll_interval(&self) -> Duration {
        Duration::from_millis(self.uptime_poll_interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidSettings(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.server_timeout_secs == 0 {
            return Err(ConfigError::InvalidSettings(
                "server_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.cli_timeout_secs == 0 {
            return Err(ConfigError::InvalidSettings(
                "cli_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.uptime_poll_attempts == 0 {
            return Err(ConfigError::InvalidSettings(
                "uptime_poll_attempts must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RawCredentials {
    username: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    password_env: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawInventory {
    #[serde(default)]
    settings: CollectorSettings,
    #[serde(default)]
    credentials: HashMap<String, RawCredentials>,
    servers: Vec<ServerTarget>,
}

/// Servers, per-family credentials and settings for one run
///
/// # Example YAML
/// ```yaml
/// credentials:
///   isilon: { username: monitor, password_env: ISILON_PASSWORD }
///   xio: { username: monitor, password: secret }
/// servers:
///   - { id: ISI_01, address: 10.0.0.10, storage: Isilon, location: Amsterdam }
///   - { id: XIO_01, address: 10.0.0.11, storage: XIO, params: { cluster: "1" } }
/// ```
#[derive(Debug, Clone)]
pub struct Inventory {
    pub settings: CollectorSettings,

    /// Keyed by lower-cased family tag
    pub credentials: HashMap<String, Credentials>,

    pub servers: Vec<ServerTarget>,
}

impl Inventory {
    /// Reads and validates an inventory file
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading inventory from {}", path.display());

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;

        let inventory = Self::from_yaml(&content, |var| std::env::var(var).ok())?;

        info!(
            "Loaded {} server(s), credentials for {} storage famil(ies)",
            inventory.servers.len(),
            inventory.credentials.len()
        );
        for server in &inventory.servers {
            info!("  {} - {} at {}", server.id, server.storage, server.address);
        }

        Ok(inventory)
    }

    /// Parses an inventory document. `env` resolves `password_env` references.
    pub fn from_yaml<F>(content: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawInventory = serde_yaml::from_str(content)?;
        raw.settings.validate()?;

        if raw.servers.is_empty() {
            return Err(ConfigError::InvalidSettings("no servers defined".into()));
        }

        let mut seen = HashSet::new();
        for server in &raw.servers {
            if !seen.insert(server.id.as_str()) {
                return Err(ConfigError::InvalidSettings(format!(
                    "duplicate server id '{}'",
                    server.id
                )));
            }
        }

        let mut credentials = HashMap::new();
        for (family, raw_creds) in raw.credentials {
            let password = match (raw_creds.password, raw_creds.password_env) {
                (Some(password), _) => password,
                (None, Some(var)) => env(&var).ok_or_else(|| ConfigError::MissingSecret {
                    var: var.clone(),
                    family: family.clone(),
                })?,
                (None, None) => return Err(ConfigError::MissingPassword { family }),
            };
            credentials.insert(
                family.to_ascii_lowercase(),
                Credentials {
                    username: raw_creds.username,
                    password,
                },
            );
        }

        for server in servers_without_credentials(&raw.servers, &credentials) {
            warn!(
                "No credentials configured for '{}' (server {})",
                server.storage, server.id
            );
        }

        Ok(Inventory {
            settings: raw.settings,
            credentials,
            servers: raw.servers,
        })
    }

    /// Servers matching the given ids, in inventory order. An empty filter selects all.
    pub fn select(&self, ids: &[String]) -> Vec<ServerTarget> {
        self.servers
            .iter()
            .filter(|s| ids.is_empty() || ids.iter().any(|id| id == &s.id))
            .cloned()
            .collect()
    }
}

/// Servers whose storage family has no credentials entry. Family aliases
/// (`XIO` / `xtremio`) match the same entry, as they do in the registry.
fn servers_without_credentials<'a>(
    servers: &'a [ServerTarget],
    credentials: &HashMap<String, Credentials>,
) -> Vec<&'a ServerTarget> {
    let families: HashSet<String> = credentials.keys().map(|family| registry_key(family)).collect();
    servers
        .iter()
        .filter(|server| !families.contains(&registry_key(&server.storage)))
        .collect()
}
