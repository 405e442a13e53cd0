//! Configuration for the ledger.

use serde::{Deserialize, Serialize};

use crate::error::LedgerResult;

/// Main ledger configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Default grants for new types
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Lookup cache sizing
    #[serde(default)]
    pub cache: CacheConfig,

    /// Expiry sweep configuration
    #[serde(default)]
    pub expiry: ExpiryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl LedgerConfig {
    /// Load configuration from defaults, an optional file, and `COMMONS_*`
    /// environment variables (nested keys use `__`, e.g. `COMMONS_CACHE__CAPACITY`).
    pub fn load(path: Option<&str>) -> LedgerResult<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&LedgerConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("COMMONS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }
}

/// Grants applied to every org- or network-scope type at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Role that always controls org and network types
    #[serde(default = "default_admin_role")]
    pub admin_role: String,

    #[serde(default = "default_org_allocator_roles")]
    pub org_allocator_roles: Vec<String>,

    #[serde(default = "default_viewer_roles")]
    pub org_viewer_roles: Vec<String>,

    #[serde(default = "default_viewer_roles")]
    pub network_viewer_roles: Vec<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            admin_role: default_admin_role(),
            org_allocator_roles: default_org_allocator_roles(),
            org_viewer_roles: default_viewer_roles(),
            network_viewer_roles: default_viewer_roles(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached lookups
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Entry lifetime in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiryConfig {
    /// Seconds past `expires_at` before the sweep expires an allocation
    #[serde(default)]
    pub grace_secs: i64,

    /// User id recorded on lifecycle events written by the sweep
    #[serde(default = "default_system_actor")]
    pub system_actor: String,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            grace_secs: 0,
            system_actor: default_system_actor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,

    #[serde(default = "default_true")]
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            timestamps: true,
        }
    }
}

fn default_admin_role() -> String {
    "admin".to_string()
}

fn default_org_allocator_roles() -> Vec<String> {
    vec!["case_worker".to_string()]
}

fn default_viewer_roles() -> Vec<String> {
    vec!["member".to_string()]
}

fn default_cache_capacity() -> usize {
    256
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_system_actor() -> String {
    "system".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = LedgerConfig::default();
        assert_eq!(config.catalog.admin_role, "admin");
        assert_eq!(config.cache.capacity, 256);
        assert_eq!(config.expiry.grace_secs, 0);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = LedgerConfig::load(None).unwrap();
        assert_eq!(config.catalog.org_allocator_roles, vec!["case_worker".to_string()]);
        assert_eq!(config.cache.ttl_secs, 300);
    }

    #[test]
    fn test_load_from_file_overrides_sections() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[cache]\ncapacity = 8\n\n[catalog]\norg_allocator_roles = [\"navigator\"]"
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = LedgerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.cache.capacity, 8);
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.catalog.org_allocator_roles, vec!["navigator".to_string()]);
        assert_eq!(config.catalog.admin_role, "admin");
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let config = LedgerConfig::load(Some("/nonexistent/commons-ledger")).unwrap();
        assert_eq!(config.logging.level, "info");
    }
}
