//! # Client Configuration
//!
//! Purpose: Describe which topology to connect to and how, in a form that can
//! be loaded from JSON or TOML and validated before anything is dialled.
//!
//! ## Design Principles
//! 1. **Fail Fast**: `validate` runs before any connection attempt and names
//!    the offending field.
//! 2. **Plain Data**: Durations are integer milliseconds (`*_ms`) so files
//!    stay readable; conversion to driver options happens in one place.
//! 3. **Sensible Defaults**: Every field has a default, so a file only needs
//!    the parts that differ.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ukv_common::{Error, Result, Topology};
use ukv_driver::{
    Auth, ClusterOptions, ConnectOptions, PoolOptions, RetryOptions, Routing, SentinelOptions,
    Timeouts, TlsOptions,
};

use crate::policy::Policy;

/// Top-level configuration. Only the section matching `mode` is required;
/// absent sections deserialize as `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which topology to build.
    pub mode: Topology,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single: Option<SingleConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentinel: Option<SentinelConfig>,
    pub common: CommonConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SingleConfig {
    /// `host:port` of the node.
    pub addr: String,
    pub db: i64,
}

impl Default for SingleConfig {
    fn default() -> Self {
        SingleConfig {
            addr: "127.0.0.1:6379".to_string(),
            db: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Seed nodes.
    pub addrs: Vec<String>,
    pub max_redirects: usize,
    /// Serve read-only commands from replicas.
    pub read_only: bool,
    /// With `read_only`: pick the lowest-latency node.
    pub route_by_latency: bool,
    /// With `read_only`: pick a random node.
    pub route_randomly: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            addrs: Vec::new(),
            max_redirects: 3,
            read_only: false,
            route_by_latency: false,
            route_randomly: false,
        }
    }
}

impl ClusterConfig {
    fn routing(&self) -> Routing {
        if self.route_by_latency {
            Routing::Latency
        } else if self.route_randomly {
            Routing::Random
        } else {
            Routing::Master
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    /// Sentinel nodes.
    pub addrs: Vec<String>,
    /// Name of the supervised master group.
    pub master_name: String,
    pub db: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentinel_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentinel_password: Option<String>,
}

/// Settings shared by all topologies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    pub pool_size: usize,
    pub min_idle_conns: usize,
    pub max_idle_conns: usize,
    pub pool_timeout_ms: u64,
    /// Zero keeps idle connections indefinitely.
    pub idle_timeout_ms: u64,

    /// Zero disables the respective socket timeout.
    pub dial_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,

    pub max_retries: usize,
    pub min_retry_backoff_ms: u64,
    pub max_retry_backoff_ms: u64,

    /// Namespace prepended to every key.
    pub key_prefix: String,
    /// Expiration for writes that do not name one; zero stores without expiry.
    pub default_ttl_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

impl Default for CommonConfig {
    fn default() -> Self {
        CommonConfig {
            username: None,
            password: None,
            pool_size: 10,
            min_idle_conns: 2,
            max_idle_conns: 5,
            pool_timeout_ms: 4_000,
            idle_timeout_ms: 300_000,
            dial_timeout_ms: 5_000,
            read_timeout_ms: 3_000,
            write_timeout_ms: 3_000,
            max_retries: 3,
            min_retry_backoff_ms: 8,
            max_retry_backoff_ms: 512,
            key_prefix: String::new(),
            default_ttl_ms: 24 * 60 * 60 * 1_000,
            tls: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub insecure_skip_verify: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mode: Topology::Single,
            single: Some(SingleConfig::default()),
            cluster: None,
            sentinel: None,
            common: CommonConfig::default(),
        }
    }
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

fn optional_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| millis(ms))
}

fn blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn invalid(field: &'static str, reason: impl Into<String>) -> Error {
    Error::InvalidConfig {
        field,
        reason: reason.into(),
    }
}

impl Config {
    /// Single-node configuration with defaults for everything else.
    pub fn single(addr: impl Into<String>, db: i64) -> Self {
        Config {
            mode: Topology::Single,
            single: Some(SingleConfig {
                addr: addr.into(),
                db,
            }),
            ..Config::default()
        }
    }

    pub fn cluster<S: Into<String>>(addrs: impl IntoIterator<Item = S>) -> Self {
        Config {
            mode: Topology::Cluster,
            single: None,
            cluster: Some(ClusterConfig {
                addrs: addrs.into_iter().map(Into::into).collect(),
                ..ClusterConfig::default()
            }),
            ..Config::default()
        }
    }

    pub fn sentinel<S: Into<String>>(
        addrs: impl IntoIterator<Item = S>,
        master_name: impl Into<String>,
        db: i64,
    ) -> Self {
        Config {
            mode: Topology::Sentinel,
            single: None,
            sentinel: Some(SentinelConfig {
                addrs: addrs.into_iter().map(Into::into).collect(),
                master_name: master_name.into(),
                db,
                ..SentinelConfig::default()
            }),
            ..Config::default()
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|err| invalid("config", err.to_string()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| invalid("config", err.to_string()))
    }

    /// Loads a `.json` or `.toml` file, chosen by extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| invalid("path", format!("{}: {}", path.display(), err)))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::from_json_str(&text),
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::from_toml_str(&text),
            _ => Err(invalid(
                "path",
                format!("{}: expected a .json or .toml file", path.display()),
            )),
        }
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|err| invalid("config", err.to_string()))
    }

    /// Checks the topology section the mode needs plus the shared settings.
    pub fn validate(&self) -> Result<()> {
        match self.mode {
            Topology::Single => {
                let single = self
                    .single
                    .as_ref()
                    .ok_or(Error::MissingConfig { field: "single" })?;
                if blank(&single.addr) {
                    return Err(Error::MissingConfig { field: "single.addr" });
                }
                if single.db < 0 {
                    return Err(invalid("single.db", "must not be negative"));
                }
            }
            Topology::Cluster => {
                let cluster = self
                    .cluster
                    .as_ref()
                    .ok_or(Error::MissingConfig { field: "cluster" })?;
                if cluster.addrs.iter().all(|addr| blank(addr)) {
                    return Err(Error::MissingConfig {
                        field: "cluster.addrs",
                    });
                }
            }
            Topology::Sentinel => {
                let sentinel = self
                    .sentinel
                    .as_ref()
                    .ok_or(Error::MissingConfig { field: "sentinel" })?;
                if sentinel.addrs.iter().all(|addr| blank(addr)) {
                    return Err(Error::MissingConfig {
                        field: "sentinel.addrs",
                    });
                }
                if blank(&sentinel.master_name) {
                    return Err(Error::MissingConfig {
                        field: "sentinel.master_name",
                    });
                }
                if sentinel.db < 0 {
                    return Err(invalid("sentinel.db", "must not be negative"));
                }
            }
        }
        self.validate_common()
    }

    fn validate_common(&self) -> Result<()> {
        let common = &self.common;
        if common.pool_size == 0 {
            return Err(invalid("common.pool_size", "must be greater than zero"));
        }
        if common.min_idle_conns > common.pool_size {
            return Err(invalid(
                "common.min_idle_conns",
                format!("must not exceed pool_size ({})", common.pool_size),
            ));
        }
        if common.min_retry_backoff_ms > common.max_retry_backoff_ms {
            return Err(invalid(
                "common.min_retry_backoff_ms",
                "must not exceed max_retry_backoff_ms",
            ));
        }
        if let Some(tls) = common.tls.as_ref().filter(|tls| tls.enabled) {
            if tls.cert_file.is_some() != tls.key_file.is_some() {
                return Err(invalid(
                    "common.tls.cert_file",
                    "cert_file and key_file must be given together",
                ));
            }
        }
        Ok(())
    }

    /// Key namespace and default TTL.
    pub fn policy(&self) -> Policy {
        Policy::new(
            self.common.key_prefix.clone(),
            millis(self.common.default_ttl_ms),
        )
    }

    /// Driver options for data nodes; `db` comes from the active topology.
    pub fn connect_options(&self) -> ConnectOptions {
        let common = &self.common;
        let db = match self.mode {
            Topology::Single => self.single.as_ref().map_or(0, |single| single.db),
            Topology::Cluster => 0,
            Topology::Sentinel => self.sentinel.as_ref().map_or(0, |sentinel| sentinel.db),
        };
        ConnectOptions {
            auth: common.password.as_ref().map(|password| Auth {
                username: common.username.clone(),
                password: password.clone(),
            }),
            db,
            pool: PoolOptions {
                size: common.pool_size,
                min_idle: common.min_idle_conns,
                max_idle: common.max_idle_conns,
                pool_timeout: millis(common.pool_timeout_ms),
                idle_timeout: optional_millis(common.idle_timeout_ms),
            },
            timeouts: Timeouts {
                dial: optional_millis(common.dial_timeout_ms),
                read: optional_millis(common.read_timeout_ms),
                write: optional_millis(common.write_timeout_ms),
            },
            retry: RetryOptions {
                max_retries: common.max_retries,
                min_backoff: millis(common.min_retry_backoff_ms),
                max_backoff: millis(common.max_retry_backoff_ms),
            },
            tls: common
                .tls
                .as_ref()
                .filter(|tls| tls.enabled)
                .map(|tls| TlsOptions {
                    insecure_skip_verify: tls.insecure_skip_verify,
                    ca_file: tls.ca_file.clone(),
                    cert_file: tls.cert_file.clone(),
                    key_file: tls.key_file.clone(),
                    server_name: tls.server_name.clone(),
                }),
        }
    }

    pub(crate) fn cluster_options(&self) -> Result<ClusterOptions> {
        let cluster = self
            .cluster
            .as_ref()
            .ok_or(Error::MissingConfig { field: "cluster" })?;
        Ok(ClusterOptions {
            addrs: cluster.addrs.clone(),
            max_redirects: cluster.max_redirects,
            read_only: cluster.read_only,
            routing: cluster.routing(),
        })
    }

    pub(crate) fn sentinel_options(&self) -> Result<SentinelOptions> {
        let sentinel = self
            .sentinel
            .as_ref()
            .ok_or(Error::MissingConfig { field: "sentinel" })?;
        Ok(SentinelOptions {
            addrs: sentinel.addrs.clone(),
            master_name: sentinel.master_name.clone(),
            sentinel_auth: sentinel.sentinel_password.as_ref().map(|password| Auth {
                username: sentinel.sentinel_username.clone(),
                password: password.clone(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_field(config: &Config) -> &'static str {
        match config.validate() {
            Err(Error::MissingConfig { field }) | Err(Error::InvalidConfig { field, .. }) => field,
            other => panic!("expected a config error, got {:?}", other),
        }
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.common.default_ttl_ms, 86_400_000);
        let options = config.connect_options();
        assert_eq!(options.pool.size, 10);
        assert_eq!(options.timeouts.read, Some(Duration::from_secs(3)));
        assert!(options.auth.is_none());
        assert!(options.tls.is_none());
    }

    #[test]
    fn each_mode_requires_its_section() {
        let mut config = Config::default();
        config.single = None;
        assert_eq!(missing_field(&config), "single");

        config.mode = Topology::Cluster;
        assert_eq!(missing_field(&config), "cluster");
        config.cluster = Some(ClusterConfig::default());
        assert_eq!(missing_field(&config), "cluster.addrs");

        config.mode = Topology::Sentinel;
        assert_eq!(missing_field(&config), "sentinel");
        config.sentinel = Some(SentinelConfig {
            addrs: vec!["127.0.0.1:26379".into()],
            ..SentinelConfig::default()
        });
        assert_eq!(missing_field(&config), "sentinel.master_name");
    }

    #[test]
    fn shared_settings_are_checked() {
        let mut config = Config::default();
        config.common.pool_size = 0;
        assert_eq!(missing_field(&config), "common.pool_size");

        let mut config = Config::default();
        config.common.min_retry_backoff_ms = 1_000;
        assert_eq!(missing_field(&config), "common.min_retry_backoff_ms");

        let mut config = Config::default();
        config.common.tls = Some(TlsConfig {
            enabled: true,
            cert_file: Some("client.pem".into()),
            ..TlsConfig::default()
        });
        assert_eq!(missing_field(&config), "common.tls.cert_file");
    }

    #[test]
    fn unknown_mode_fails_to_parse() {
        let err = Config::from_json_str(r#"{"mode":"ring"}"#).unwrap_err();
        assert_eq!(err.kind(), ukv_common::ErrorKind::Config);
    }

    #[test]
    fn parses_partial_json() {
        let config = Config::from_json_str(
            r#"{
                "mode": "cluster",
                "cluster": {"addrs": ["10.0.0.1:7000", "10.0.0.2:7000"], "read_only": true, "route_randomly": true},
                "common": {"password": "pw", "key_prefix": "app:", "default_ttl_ms": 1800000}
            }"#,
        )
        .unwrap();
        config.validate().unwrap();
        let cluster = config.cluster_options().unwrap();
        assert_eq!(cluster.addrs.len(), 2);
        assert_eq!(cluster.max_redirects, 3);
        assert_eq!(cluster.routing, Routing::Random);
        assert_eq!(config.policy().prefix(), "app:");
        assert_eq!(config.policy().default_ttl(), Duration::from_secs(1800));
        assert_eq!(config.connect_options().auth.unwrap().password, "pw");
        assert_eq!(config.common.pool_size, 10);
    }

    #[test]
    fn parses_toml_sentinel() {
        let config = Config::from_toml_str(
            r#"
            mode = "sentinel"

            [sentinel]
            addrs = ["127.0.0.1:26379"]
            master_name = "mymaster"
            db = 3
            sentinel_password = "s3cret"

            [common]
            idle_timeout_ms = 0
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        let options = config.connect_options();
        assert_eq!(options.db, 3);
        assert_eq!(options.pool.idle_timeout, None);
        let sentinel = config.sentinel_options().unwrap();
        assert_eq!(sentinel.sentinel_auth.unwrap().password, "s3cret");
    }

    #[test]
    fn json_round_trip_preserves_config() {
        let config = Config::sentinel(["a:1", "b:2"], "mymaster", 1);
        let text = config.to_json_string().unwrap();
        assert_eq!(Config::from_json_str(&text).unwrap(), config);
    }
}
