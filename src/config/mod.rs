//! Gateway configuration.
//!
//! Loaded once from a TOML file at startup and shared read-only afterwards.
//!
//! ```toml
//! [server]
//! port = 4929
//!
//! [leases]
//! ttl_secs = 7200
//! commit_recovery = "retry"
//!
//! [store]
//! backend = "embedded"
//! data_dir = "/var/lib/leasegate"
//!
//! [publisher]
//! command = "/usr/bin/publish-payload"
//!
//! [repositories."repo.example.org"]
//! keys = [{ id = "key1", secret = "..." }]
//! ```

mod server;

pub use server::ServerConfig;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Longest accepted lease TTL or grace period (ten years).
pub const MAX_LEASE_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub leases: LeaseConfig,
    pub store: StoreConfig,
    pub publisher: PublisherConfig,
    pub repositories: BTreeMap<String, RepositoryConfig>,
}

impl GatewayConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: GatewayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.leases.ttl_secs == 0 {
            return Err(Error::Config("leases.ttl_secs must be positive".into()));
        }
        if self.leases.ttl_secs > MAX_LEASE_DURATION_SECS {
            return Err(Error::Config(format!(
                "leases.ttl_secs cannot exceed {MAX_LEASE_DURATION_SECS}"
            )));
        }
        if self.leases.committing_grace_secs > MAX_LEASE_DURATION_SECS {
            return Err(Error::Config(format!(
                "leases.committing_grace_secs cannot exceed {MAX_LEASE_DURATION_SECS}"
            )));
        }
        if self.leases.reclaim_interval_secs == 0 {
            return Err(Error::Config(
                "leases.reclaim_interval_secs must be positive".into(),
            ));
        }
        if self.leases.max_update_attempts == 0 {
            return Err(Error::Config(
                "leases.max_update_attempts must be positive".into(),
            ));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(Error::Config(
                "server.request_timeout_secs must be positive".into(),
            ));
        }
        if self.publisher.timeout_secs == 0 {
            return Err(Error::Config("publisher.timeout_secs must be positive".into()));
        }
        // The request timeout would otherwise drop a commit mid-publish.
        if self.publisher.timeout_secs >= self.server.request_timeout_secs {
            return Err(Error::Config(
                "publisher.timeout_secs must be below server.request_timeout_secs".into(),
            ));
        }
        if self.leases.commit_recovery == CommitRecovery::Reclaim
            && self.publisher.timeout_secs >= self.leases.ttl_secs + self.leases.committing_grace_secs
        {
            return Err(Error::Config(
                "publisher.timeout_secs must be below leases.ttl_secs + leases.committing_grace_secs"
                    .into(),
            ));
        }
        if self.store.backend == StoreBackend::Etcd && self.store.etcd.endpoints.is_empty() {
            return Err(Error::Config(
                "store.etcd.endpoints is required for the etcd backend".into(),
            ));
        }

        let mut key_ids = HashSet::new();
        for (name, repo) in &self.repositories {
            validate_repository_name(name).map_err(Error::Config)?;
            if repo.keys.is_empty() {
                return Err(Error::Config(format!("repository {name} has no keys")));
            }
            for key in &repo.keys {
                if key.id.is_empty() || key.id.contains(char::is_whitespace) {
                    return Err(Error::Config(format!(
                        "repository {name} has an invalid key id"
                    )));
                }
                if key.secret.is_empty() {
                    return Err(Error::Config(format!("key {} has an empty secret", key.id)));
                }
                if !key_ids.insert(key.id.as_str()) {
                    return Err(Error::Config(format!("duplicate key id {}", key.id)));
                }
            }
        }
        Ok(())
    }
}

/// Repository names become etcd key segments, so they may not contain `/`.
pub fn validate_repository_name(name: &str) -> std::result::Result<(), String> {
    const MAX_LEN: usize = 255;
    if name.is_empty() {
        return Err("Repository name cannot be empty".to_string());
    }
    if name.len() > MAX_LEN {
        return Err(format!("Repository name cannot exceed {MAX_LEN} characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(
            "Repository name can only contain alphanumeric characters, hyphens, underscores, and periods"
                .to_string(),
        );
    }
    Ok(())
}

/// What happens to a lease left in `Committing` after a failed publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitRecovery {
    /// A later commit re-runs the publisher; nothing releases the lease otherwise.
    #[default]
    Retry,
    /// Further commits are refused; only a cancel by the owner releases it.
    Manual,
    /// Like `Retry`, and the sweep releases it after the grace period.
    Reclaim,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    pub ttl_secs: u64,
    pub reclaim_interval_secs: u64,
    pub max_update_attempts: u32,
    pub update_backoff_ms: u64,
    pub commit_recovery: CommitRecovery,
    /// Only used with `CommitRecovery::Reclaim`, counted from `expires_at`,
    /// which every commit attempt resets to a full TTL from its start.
    pub committing_grace_secs: u64,
}

impl LeaseConfig {
    #[must_use]
    pub fn ttl(&self) -> chrono::Duration {
        seconds(self.ttl_secs)
    }

    #[must_use]
    pub fn committing_grace(&self) -> chrono::Duration {
        seconds(self.committing_grace_secs)
    }

    #[must_use]
    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }

    #[must_use]
    pub fn update_backoff(&self) -> Duration {
        Duration::from_millis(self.update_backoff_ms)
    }
}

fn seconds(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 7200,
            reclaim_interval_secs: 60,
            max_update_attempts: 5,
            update_backoff_ms: 25,
            commit_recovery: CommitRecovery::default(),
            committing_grace_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Embedded,
    Etcd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub data_dir: PathBuf,
    /// Journal rows appended between automatic compactions.
    pub compact_every: usize,
    pub etcd: EtcdConfig,
}

impl StoreConfig {
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("leases.db")
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            data_dir: PathBuf::from("./data"),
            compact_every: 1024,
            etcd: EtcdConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    pub prefix: String,
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl EtcdConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            prefix: "/leasegate".to_string(),
            timeout_ms: 5000,
            connect_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Program run for every commit. Without one, commits are only logged.
    pub command: Option<PathBuf>,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl PublisherConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub keys: Vec<KeyConfig>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    pub id: String,
    pub secret: String,
}

impl std::fmt::Debug for KeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyConfig")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[server]
host = "0.0.0.0"
port = 9000

[leases]
ttl_secs = 60
commit_recovery = "manual"

[store]
backend = "embedded"
data_dir = "/tmp/leasegate"

[publisher]
command = "/bin/true"
args = ["--quiet"]

[repositories."repo.example.org"]
keys = [{ id = "key1", secret = "s3cr3t" }, { id = "key2", secret = "other" }]

[repositories."second.example.org"]
keys = [{ id = "key3", secret = "third" }]
"#;

    #[test]
    fn test_parse_sample() {
        let config = GatewayConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.leases.ttl_secs, 60);
        assert_eq!(config.leases.commit_recovery, CommitRecovery::Manual);
        assert_eq!(config.leases.max_update_attempts, 5);
        assert_eq!(config.store.backend, StoreBackend::Embedded);
        assert_eq!(
            config.store.journal_path(),
            PathBuf::from("/tmp/leasegate/leases.db")
        );
        assert_eq!(config.repositories.len(), 2);
        assert_eq!(config.repositories["repo.example.org"].keys.len(), 2);
    }

    #[test]
    fn test_defaults_apply_to_empty_document() {
        let config = GatewayConfig::from_toml("").unwrap();
        assert_eq!(config.leases.ttl_secs, 7200);
        assert_eq!(config.leases.commit_recovery, CommitRecovery::Retry);
        assert_eq!(config.store.etcd.prefix, "/leasegate");
        assert!(config.publisher.command.is_none());
    }

    #[test]
    fn test_rejects_duplicate_key_ids() {
        let doc = r#"
[repositories.a]
keys = [{ id = "k", secret = "x" }]
[repositories.b]
keys = [{ id = "k", secret = "y" }]
"#;
        let err = GatewayConfig::from_toml(doc).unwrap_err();
        assert!(err.to_string().contains("duplicate key id"));
    }

    #[test]
    fn test_rejects_etcd_without_endpoints() {
        let doc = "[store]\nbackend = \"etcd\"\n";
        assert!(GatewayConfig::from_toml(doc).is_err());
    }

    #[test]
    fn test_rejects_zero_ttl() {
        assert!(GatewayConfig::from_toml("[leases]\nttl_secs = 0\n").is_err());
    }

    #[test]
    fn test_rejects_ttl_beyond_ten_years() {
        let doc = "[leases]\nttl_secs = 9000000000000000\n";
        let err = GatewayConfig::from_toml(doc).unwrap_err();
        assert!(err.to_string().contains("leases.ttl_secs cannot exceed"));

        let doc = format!("[leases]\nttl_secs = {MAX_LEASE_DURATION_SECS}\n");
        GatewayConfig::from_toml(&doc).unwrap();
    }

    #[test]
    fn test_rejects_grace_beyond_ten_years() {
        let doc = "[leases]\ncommitting_grace_secs = 400000000\n";
        let err = GatewayConfig::from_toml(doc).unwrap_err();
        assert!(err.to_string().contains("committing_grace_secs"));
    }

    #[test]
    fn test_rejects_zero_request_timeout() {
        let err = GatewayConfig::from_toml("[server]\nrequest_timeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("request_timeout_secs must be positive"));
    }

    #[test]
    fn test_rejects_publisher_timeout_at_or_above_request_timeout() {
        let doc = "[server]\nrequest_timeout_secs = 60\n[publisher]\ntimeout_secs = 60\n";
        let err = GatewayConfig::from_toml(doc).unwrap_err();
        assert!(err.to_string().contains("below server.request_timeout_secs"));

        let doc = "[server]\nrequest_timeout_secs = 60\n[publisher]\ntimeout_secs = 59\n";
        GatewayConfig::from_toml(doc).unwrap();
    }

    #[test]
    fn test_rejects_publisher_timeout_outlasting_reclaim_grace() {
        let doc = r#"
[leases]
ttl_secs = 60
committing_grace_secs = 60
commit_recovery = "reclaim"

[publisher]
timeout_secs = 120
"#;
        let err = GatewayConfig::from_toml(doc).unwrap_err();
        assert!(err.to_string().contains("committing_grace_secs"));

        // Other policies never force-release a committing lease.
        GatewayConfig::from_toml(&doc.replace("reclaim", "retry")).unwrap();
    }

    #[test]
    fn test_out_of_range_durations_saturate() {
        let leases = LeaseConfig {
            ttl_secs: u64::MAX,
            ..LeaseConfig::default()
        };
        assert_eq!(leases.ttl(), chrono::Duration::MAX);
    }

    #[test]
    fn test_rejects_bad_repository_name() {
        let doc = r#"
[repositories."a/b"]
keys = [{ id = "k", secret = "x" }]
"#;
        assert!(GatewayConfig::from_toml(doc).is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let key = KeyConfig {
            id: "k".into(),
            secret: "hunter2".into(),
        };
        assert!(!format!("{key:?}").contains("hunter2"));
    }
}
