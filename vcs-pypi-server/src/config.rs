//! # Configuration Management
//!
//! The index is configured through a single JSON document. Every section has
//! defaults so a minimal file only names the owners to expose:
//!
//! ```json
//! {
//!   "provider": {
//!     "owners": [{ "kind": "org", "name": "acme" }]
//!   }
//! }
//! ```
//!
//! - [`ServerConfig`]: listening address
//! - [`ProviderConfig`]: VCS provider, owners, credential and release filters
//! - [`CacheConfig`]: snapshot TTL and refresh timeout
//! - [`SecurityConfig`]: optional inbound authentication
//!
//! The provider token is read from the file when present, otherwise from the
//! `VCS_PYPI_TOKEN` or `GITHUB_TOKEN` environment variables. It never appears
//! in `Debug` output.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Environment variables consulted, in order, for the provider token.
pub const TOKEN_ENV_VARS: &[&str] = &["VCS_PYPI_TOKEN", "GITHUB_TOKEN"];

/// Main configuration structure for the index server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

/// Network settings for the HTTP listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Supported VCS hosting providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Github,
}

/// Whether an owner is an organization or a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerKind {
    Org,
    User,
}

/// An account whose repositories are exposed as projects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerConfig {
    pub kind: OwnerKind,
    pub name: String,
}

/// A credential that never prints its value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([redacted])")
    }
}

/// VCS provider connection and release selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    /// Owners walked in order; the first repository to claim a project name wins.
    pub owners: Vec<OwnerConfig>,
    /// Personal access token sent as a bearer credential.
    #[serde(default)]
    pub token: Option<Secret>,
    /// REST API base URL (GitHub Enterprise installs use `https://host/api/v3`).
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub include_prereleases: bool,
    #[serde(default)]
    pub include_drafts: bool,
    /// Also list the tag source tarball of public repositories as an sdist.
    #[serde(default)]
    pub include_source_archives: bool,
    /// When non-empty, only repositories with one of these files at the root are exposed.
    #[serde(default)]
    pub required_files: Vec<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl ProviderConfig {
    /// Config for a single organization with every other setting defaulted.
    pub fn for_org(name: impl Into<String>) -> Self {
        Self {
            kind: ProviderKind::Github,
            owners: vec![OwnerConfig {
                kind: OwnerKind::Org,
                name: name.into(),
            }],
            token: None,
            api_url: default_api_url(),
            include_prereleases: false,
            include_drafts: false,
            include_source_archives: false,
            required_files: Vec::new(),
            request_timeout_seconds: default_request_timeout(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Snapshot cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Age after which a snapshot is served stale while it refreshes.
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
    /// Upper bound for one complete snapshot load.
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl(),
            refresh_timeout_seconds: default_refresh_timeout(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_seconds)
    }
}

/// Username/password pair accepted through HTTP Basic authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicCredential {
    pub username: String,
    pub password: Secret,
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    #[serde(default)]
    pub require_authentication: bool,
    #[serde(default)]
    pub basic_auth_users: Vec<BasicCredential>,
    /// Bearer tokens accepted in the `Authorization` header.
    #[serde(default)]
    pub api_keys: Vec<Secret>,
}

impl Config {
    /// Config exposing one organization, everything else defaulted.
    pub fn for_org(name: impl Into<String>) -> Self {
        Self {
            server: ServerConfig::default(),
            provider: ProviderConfig::for_org(name),
            cache: CacheConfig::default(),
            security: SecurityConfig::default(),
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or does not match the schema.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config_str = fs::read_to_string(path)?;
        let config = serde_json::from_str(&config_str)?;
        Ok(config)
    }

    /// Fills in the provider token from the environment when the file has none.
    pub fn resolve_token_from_env(&mut self) {
        self.resolve_token_with(|key| std::env::var(key).ok());
    }

    fn resolve_token_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.provider.token.is_some() {
            return;
        }
        self.provider.token = TOKEN_ENV_VARS
            .iter()
            .filter_map(|key| lookup(key))
            .find(|value| !value.trim().is_empty())
            .map(Secret::new);
    }

    /// Checks invariants serde cannot express.
    pub fn validate(&self) -> AppResult<()> {
        if self.provider.owners.is_empty() {
            return Err(AppError::Config(
                "provider.owners must name at least one user or organization".to_string(),
            ));
        }
        if let Some(owner) = self.provider.owners.iter().find(|o| o.name.trim().is_empty()) {
            return Err(AppError::Config(format!(
                "provider.owners contains an empty {:?} name",
                owner.kind
            )));
        }
        if self.cache.ttl_seconds == 0 {
            return Err(AppError::Config(
                "cache.ttl_seconds must be greater than zero".to_string(),
            ));
        }
        if self.provider.request_timeout_seconds == 0 || self.cache.refresh_timeout_seconds == 0 {
            return Err(AppError::Config("timeouts must be greater than zero".to_string()));
        }
        if self.security.require_authentication
            && self.security.basic_auth_users.is_empty()
            && self.security.api_keys.is_empty()
        {
            return Err(AppError::Config(
                "security.require_authentication is set but no credentials are configured"
                    .to_string(),
            ));
        }
        url::Url::parse(&self.provider.api_url).map_err(|e| {
            AppError::Config(format!("provider.api_url '{}' is invalid: {e}", self.provider.api_url))
        })?;
        Ok(())
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3080
}

fn default_api_url() -> String {
    crate::provider::github::DEFAULT_API_URL.to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_ttl() -> u64 {
    900
}

fn default_refresh_timeout() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"provider": {"owners": [{"kind": "org", "name": "acme"}]}}"#,
        )
        .unwrap();

        assert_eq!(config.server.port, 3080);
        assert_eq!(config.provider.kind, ProviderKind::Github);
        assert_eq!(config.provider.api_url, "https://api.github.com");
        assert!(!config.provider.include_prereleases);
        assert!(!config.provider.include_drafts);
        assert_eq!(config.cache.ttl(), Duration::from_secs(900));
        assert!(!config.security.require_authentication);
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "server": {{"host": "127.0.0.1", "port": 8080}},
                "provider": {{
                    "kind": "github",
                    "owners": [{{"kind": "user", "name": "octocat"}}],
                    "token": "ghp_example",
                    "include_prereleases": true
                }},
                "cache": {{"ttl_seconds": 60}}
            }}"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.provider.owners[0].kind, OwnerKind::User);
        assert_eq!(
            config.provider.token.as_ref().map(Secret::expose),
            Some("ghp_example")
        );
        assert!(config.provider.include_prereleases);
        assert_eq!(config.cache.ttl_seconds, 60);
    }

    #[test]
    fn test_example_config_is_valid() {
        let config: Config =
            serde_json::from_str(include_str!("../config.example.json")).unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_empty_owners_and_zero_ttl() {
        let mut config = Config::for_org("acme");
        config.provider.owners.clear();
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let mut config = Config::for_org("acme");
        config.cache.ttl_seconds = 0;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let mut config = Config::for_org("  ");
        config.cache.ttl_seconds = 10;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_validate_requires_credentials_when_auth_enabled() {
        let mut config = Config::for_org("acme");
        config.security.require_authentication = true;
        assert!(config.validate().is_err());

        config.security.api_keys.push(Secret::new("key"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_token_is_redacted_in_debug_output() {
        let mut config = Config::for_org("acme");
        config.provider.token = Some(Secret::new("ghp_supersecret"));
        let debug = format!("{config:?}");
        assert!(!debug.contains("ghp_supersecret"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_token_resolution_prefers_file_then_env_order() {
        let mut config = Config::for_org("acme");
        config.resolve_token_with(|key| match key {
            "VCS_PYPI_TOKEN" => Some(String::new()),
            "GITHUB_TOKEN" => Some("from-github-env".to_string()),
            _ => None,
        });
        assert_eq!(
            config.provider.token.as_ref().map(Secret::expose),
            Some("from-github-env")
        );

        config.resolve_token_with(|_| Some("ignored".to_string()));
        assert_eq!(
            config.provider.token.as_ref().map(Secret::expose),
            Some("from-github-env")
        );
    }
}
