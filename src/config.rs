//! Configuration file parser for `leechfeed.toml`.
//!
//! The config file is optional; a missing file yields `Config::default()`,
//! which serves no site until `[sites."<domain>"]` tables are added.
//! Unknown top-level keys are accepted but logged as warnings.
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::feed::ClientSettings;
use crate::filter::{EnclosureRewrite, SitePolicy, DEFAULT_MAX_CONCURRENT_CHECKS};
use crate::tracker::{RegistryError, RulePlugin, TrackerDefinition, TrackerRegistry};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid enclosure_rewrite pattern for site {domain}: {source}")]
    InvalidPattern {
        domain: String,
        #[source]
        source: regex::Error,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level service configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub bind: String,

    /// Upper bound on concurrent detail-page fetches across all requests.
    pub max_concurrent_check: usize,

    pub user_agent: String,

    /// Outbound HTTP proxy. Falls back to the `proxy` environment variable.
    pub proxy: Option<String>,

    pub request_timeout_secs: u64,

    /// Retries on 429 / 5xx responses from a tracker.
    pub fetch_retries: u32,

    /// Base URL of this service as seen by feed readers, used for proxy links.
    pub public_base_url: Option<String>,

    /// Maximum remembered accepted detail pages (0 = unlimited).
    pub accepted_cache_capacity: usize,

    pub sites: HashMap<String, SiteConfig>,

    /// Extra pattern-driven trackers, registered after the built-in ones.
    pub trackers: Vec<TrackerDefinition>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3355,
            bind: "0.0.0.0".to_string(),
            max_concurrent_check: DEFAULT_MAX_CONCURRENT_CHECKS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
            request_timeout_secs: 30,
            fetch_retries: 2,
            public_base_url: None,
            accepted_cache_capacity: 0,
            sites: HashMap::new(),
            trackers: Vec::new(),
        }
    }
}

/// One `[sites."<domain>"]` table.
///
/// Custom Debug impl masks `cookie` so it never reaches the logs.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub cookie: String,
    pub only_when_free_leech: bool,
    pub only_when_not_hr: bool,
    /// 0 = unlimited.
    pub only_when_file_size_in_mb_less_than: f64,
    pub always_proxy: bool,
    pub public_base_url: Option<String>,
    pub enclosure_rewrite: Option<RewriteConfig>,
    pub keep_unmatched: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RewriteConfig {
    pub pattern: String,
    pub replacement: String,
}

impl std::fmt::Debug for SiteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteConfig")
            .field("cookie", &"[REDACTED]")
            .field("only_when_free_leech", &self.only_when_free_leech)
            .field("only_when_not_hr", &self.only_when_not_hr)
            .field(
                "only_when_file_size_in_mb_less_than",
                &self.only_when_file_size_in_mb_less_than,
            )
            .field("always_proxy", &self.always_proxy)
            .field("public_base_url", &self.public_base_url)
            .field("enclosure_rewrite", &self.enclosure_rewrite)
            .field("keep_unmatched", &self.keep_unmatched)
            .finish()
    }
}

impl SiteConfig {
    pub fn to_policy(&self, domain: &str) -> Result<SitePolicy, ConfigError> {
        let mut policy = SitePolicy::new(self.cookie.clone());
        policy.only_when_free_leech = self.only_when_free_leech;
        policy.only_when_not_hr = self.only_when_not_hr;
        policy.max_size_mb = (self.only_when_file_size_in_mb_less_than > 0.0)
            .then_some(self.only_when_file_size_in_mb_less_than);
        policy.always_proxy = self.always_proxy;
        policy.public_base_url = self.public_base_url.clone();
        policy.keep_unmatched = self.keep_unmatched;
        if let Some(rewrite) = &self.enclosure_rewrite {
            let pattern =
                Regex::new(&rewrite.pattern).map_err(|source| ConfigError::InvalidPattern {
                    domain: domain.to_string(),
                    source,
                })?;
            policy.enclosure_rewrite = Some(EnclosureRewrite {
                pattern,
                replacement: rewrite.replacement.clone(),
            });
        }
        Ok(policy)
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown top-level keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to avoid loading a huge file into memory.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::warn!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "port",
                "bind",
                "max_concurrent_check",
                "user_agent",
                "proxy",
                "request_timeout_secs",
                "fetch_retries",
                "public_base_url",
                "accepted_cache_capacity",
                "sites",
                "trackers",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            sites = config.sites.len(),
            trackers = config.trackers.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Outbound proxy from the file, else from the `proxy` environment variable.
    pub fn outbound_proxy(&self) -> Option<String> {
        self.proxy
            .clone()
            .or_else(|| std::env::var("proxy").ok())
            .filter(|p| !p.trim().is_empty())
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            user_agent: self.user_agent.clone(),
            proxy: self.outbound_proxy(),
            timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    /// Built-in trackers plus every `[[trackers]]` definition.
    pub fn build_registry(&self) -> Result<TrackerRegistry, ConfigError> {
        let mut registry = TrackerRegistry::with_builtin()?;
        for def in &self.trackers {
            registry.register(RulePlugin::from_definition(def)?)?;
        }
        Ok(registry)
    }

    /// Site policies keyed by lowercased domain.
    pub fn site_policies(&self) -> Result<Vec<(String, SitePolicy)>, ConfigError> {
        let mut policies = Vec::with_capacity(self.sites.len());
        for (domain, site) in &self.sites {
            let domain = domain.to_ascii_lowercase();
            policies.push((domain.clone(), site.to_policy(&domain)?));
        }
        Ok(policies)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("leechfeed_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("leechfeed.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn cleanup(path: &Path) {
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 3355);
        assert_eq!(config.max_concurrent_check, 8);
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.sites.is_empty());
        assert!(config.trackers.is_empty());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/leechfeed_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.port, 3355);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let path = write_config("whitespace", "   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.port, 3355);
        cleanup(&path);
    }

    #[test]
    fn test_full_config() {
        let path = write_config(
            "full",
            r#"
port = 8080
max_concurrent_check = 2
public_base_url = "http://me:8080"

[sites."chdbits.co"]
cookie = "c_secure_uid=1"
only_when_free_leech = true
only_when_file_size_in_mb_less_than = 5000
always_proxy = true

[sites."u2.dmhy.org"]
cookie = "nexusphp_u2=abc"
only_when_not_hr = true
enclosure_rewrite = { pattern = "download\\.php", replacement = "dl.php" }

[[trackers]]
domain = "example.org"
detail_page = "https?://example\\.org/details\\.php\\?id=(\\d+)"
free_leech = "pro_free"
"#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_concurrent_check, 2);
        assert_eq!(config.sites.len(), 2);

        let chd = config.sites["chdbits.co"].to_policy("chdbits.co").unwrap();
        assert!(chd.only_when_free_leech);
        assert_eq!(chd.max_size_mb, Some(5000.0));
        assert!(chd.always_proxy);

        let u2 = config.sites["u2.dmhy.org"].to_policy("u2.dmhy.org").unwrap();
        assert!(u2.only_when_not_hr);
        assert_eq!(u2.max_size_mb, None);
        assert_eq!(
            u2.enclosure_rewrite.unwrap().apply("https://u2.dmhy.org/download.php?id=1"),
            "https://u2.dmhy.org/dl.php?id=1"
        );

        let registry = config.build_registry().unwrap();
        assert!(registry.lookup("example.org").is_ok());
        assert!(registry.lookup("chdbits.co").is_ok());

        cleanup(&path);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let path = write_config("invalid", "this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
        cleanup(&path);
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let path = write_config("unknown", "port = 1\ntotally_fake_key = 42\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.port, 1);
        cleanup(&path);
    }

    #[test]
    fn test_too_large_file_rejected() {
        let path = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        cleanup(&path);
    }

    #[test]
    fn test_duplicate_builtin_tracker_fails() {
        let mut config = Config::default();
        config.trackers.push(TrackerDefinition {
            domain: "chdbits.co".to_string(),
            detail_page: "x".to_string(),
            free_leech: None,
            hit_and_run: None,
            size_field: None,
        });
        assert!(matches!(
            config.build_registry(),
            Err(ConfigError::Registry(RegistryError::DuplicateDomain(_)))
        ));
    }

    #[test]
    fn test_invalid_rewrite_pattern() {
        let site = SiteConfig {
            enclosure_rewrite: Some(RewriteConfig {
                pattern: "(".to_string(),
                replacement: String::new(),
            }),
            ..SiteConfig::default()
        };
        assert!(matches!(
            site.to_policy("a.org"),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_site_domains_lowercased() {
        let mut config = Config::default();
        config
            .sites
            .insert("ChdBits.CO".to_string(), SiteConfig::default());
        let policies = config.site_policies().unwrap();
        assert_eq!(policies[0].0, "chdbits.co");
    }

    #[test]
    fn test_debug_masks_cookie() {
        let site = SiteConfig {
            cookie: "super-secret-cookie".to_string(),
            ..SiteConfig::default()
        };
        let debug_output = format!("{:?}", site);
        assert!(!debug_output.contains("super-secret-cookie"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
