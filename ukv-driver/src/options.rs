//! Connection, pool and topology options for the driver.

use std::path::PathBuf;
use std::time::Duration;

/// Credentials sent with `AUTH` after connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auth {
    /// ACL user name; `None` authenticates the default user.
    pub username: Option<String>,
    /// Password.
    pub password: String,
}

impl Auth {
    /// Password-only credentials.
    pub fn password(password: impl Into<String>) -> Self {
        Auth {
            username: None,
            password: password.into(),
        }
    }
}

/// Pool sizing and checkout behavior.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Maximum total connections (idle + in-use) per node.
    pub size: usize,
    /// Connections dialled eagerly when the pool is created.
    pub min_idle: usize,
    /// Maximum idle connections kept in the pool.
    pub max_idle: usize,
    /// How long a checkout waits for a free connection.
    pub pool_timeout: Duration,
    /// Idle connections older than this are discarded on checkout.
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            size: 10,
            min_idle: 2,
            max_idle: 5,
            pool_timeout: Duration::from_secs(4),
            idle_timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// Socket timeouts. `None` blocks without limit (still bounded by the call deadline).
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// TCP connect timeout.
    pub dial: Option<Duration>,
    /// Per-reply read timeout.
    pub read: Option<Duration>,
    /// Per-request write timeout.
    pub write: Option<Duration>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            dial: Some(Duration::from_secs(5)),
            read: Some(Duration::from_secs(3)),
            write: Some(Duration::from_secs(3)),
        }
    }
}

/// Retry policy for requests that never reached the store.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Retries after the first attempt; zero disables retrying.
    pub max_retries: usize,
    /// First backoff delay.
    pub min_backoff: Duration,
    /// Upper bound for the backoff delay.
    pub max_backoff: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        RetryOptions {
            max_retries: 3,
            min_backoff: Duration::from_millis(8),
            max_backoff: Duration::from_millis(512),
        }
    }
}

/// TLS settings for every connection of a provider.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Accept any server certificate. Testing only.
    pub insecure_skip_verify: bool,
    /// PEM bundle of trusted roots; the Mozilla root set when absent.
    pub ca_file: Option<PathBuf>,
    /// PEM client certificate chain for mutual TLS.
    pub cert_file: Option<PathBuf>,
    /// PEM private key matching `cert_file`.
    pub key_file: Option<PathBuf>,
    /// SNI / verification name; defaults to the host part of the address.
    pub server_name: Option<String>,
}

/// Settings shared by all topologies.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Credentials for data nodes.
    pub auth: Option<Auth>,
    /// Logical database selected after connecting (single and sentinel only).
    pub db: i64,
    /// Pool sizing.
    pub pool: PoolOptions,
    /// Socket timeouts.
    pub timeouts: Timeouts,
    /// Retry policy.
    pub retry: RetryOptions,
    /// TLS, when enabled.
    pub tls: Option<TlsOptions>,
}

/// Which node serves read-only commands in a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Routing {
    /// Always the slot's master.
    #[default]
    Master,
    /// The node with the lowest measured ping among master and replicas.
    Latency,
    /// A random node among master and replicas.
    Random,
}

/// Cluster topology settings.
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    /// Seed node addresses used for slot discovery.
    pub addrs: Vec<String>,
    /// Bound on `MOVED`/`ASK` redirects per command.
    pub max_redirects: usize,
    /// Allow read-only commands on replicas.
    pub read_only: bool,
    /// Replica selection for read-only commands.
    pub routing: Routing,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        ClusterOptions {
            addrs: Vec::new(),
            max_redirects: 3,
            read_only: false,
            routing: Routing::Master,
        }
    }
}

/// Sentinel-supervised topology settings.
#[derive(Debug, Clone, Default)]
pub struct SentinelOptions {
    /// Sentinel addresses, tried in order.
    pub addrs: Vec<String>,
    /// Name of the supervised master group.
    pub master_name: String,
    /// Credentials for the sentinels themselves.
    pub sentinel_auth: Option<Auth>,
}
