//! # Topology Factory
//!
//! Purpose: Turn a validated `Config` into a connected `Client`, choosing the
//! matching driver provider and proving the store is reachable before
//! handing the client out.
//!
//! ## Design Principles
//! 1. **Factory Pattern**: One dispatch on `Topology` is the only place the
//!    three providers meet.
//! 2. **Fail Closed**: A failed liveness probe closes the half-built backend
//!    and returns a connection error; no client escapes.
//! 3. **No Hidden Retries**: Retrying is the driver's business; the factory
//!    surfaces the first failure.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use ukv_common::{Backend, Context, Error, Result, Topology};
use ukv_driver::{Cluster, Sentinel, Standalone};

use crate::client::Client;
use crate::config::Config;

/// Deadline for the liveness probe issued by `build`.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds clients from a validated configuration.
#[derive(Debug, Clone)]
pub struct Factory {
    config: Config,
}

impl Factory {
    /// Validates `config` and keeps it for later builds.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Factory { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replaces the configuration. The old one is kept if validation fails.
    pub fn update_config(&mut self, config: Config) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Connects to the configured topology and probes it.
    pub fn build(&self) -> Result<Client> {
        let backend = self.backend()?;
        let topology = backend.topology();
        let ctx = Context::with_timeout(PROBE_TIMEOUT);
        if let Err(err) = backend.ping(&ctx) {
            warn!(%topology, error = %err, "liveness probe failed");
            if let Err(close_err) = backend.close() {
                warn!(%topology, error = %close_err, "closing unreachable backend failed");
            }
            return Err(probe_error(err));
        }
        info!(%topology, prefix = %self.config.common.key_prefix, "client connected");
        Ok(Client::new(backend, self.config.policy()))
    }

    fn backend(&self) -> Result<Arc<dyn Backend>> {
        let options = self.config.connect_options();
        let backend: Arc<dyn Backend> = match self.config.mode {
            Topology::Single => {
                let single = self
                    .config
                    .single
                    .as_ref()
                    .ok_or(Error::MissingConfig { field: "single" })?;
                Arc::new(Standalone::connect(&single.addr, options)?)
            }
            Topology::Cluster => {
                Arc::new(Cluster::connect(self.config.cluster_options()?, options)?)
            }
            Topology::Sentinel => {
                Arc::new(Sentinel::connect(self.config.sentinel_options()?, options)?)
            }
        };
        Ok(backend)
    }
}

/// Probe failures are reported as connectivity problems, whatever the store said.
fn probe_error(err: Error) -> Error {
    if err.is_connection() {
        err
    } else {
        Error::connection(format!("liveness probe failed: {}", err))
    }
}

/// Validates `config`, connects and probes.
pub fn connect(config: Config) -> Result<Client> {
    Factory::new(config)?.build()
}

fn with_password(mut config: Config, password: Option<&str>) -> Config {
    config.common.password = password.map(str::to_string);
    config
}

/// Connects to one node with default pool and policy settings.
pub fn connect_single(addr: &str, db: i64, password: Option<&str>) -> Result<Client> {
    connect(with_password(Config::single(addr, db), password))
}

pub fn connect_cluster(addrs: &[&str], password: Option<&str>) -> Result<Client> {
    connect(with_password(Config::cluster(addrs.iter().copied()), password))
}

/// `password` authenticates against the data nodes, not the sentinels.
pub fn connect_sentinel(
    addrs: &[&str],
    master_name: &str,
    db: i64,
    password: Option<&str>,
) -> Result<Client> {
    connect(with_password(
        Config::sentinel(addrs.iter().copied(), master_name, db),
        password,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn invalid_config_never_dials() {
        let mut config = Config::default();
        config.single = None;
        let err = Factory::new(config).unwrap_err();
        assert!(matches!(err, Error::MissingConfig { field: "single" }));
    }

    #[test]
    fn update_keeps_the_old_config_on_error() {
        let mut factory = Factory::new(Config::single("127.0.0.1:1", 0)).unwrap();
        let mut broken = Config::default();
        broken.mode = Topology::Sentinel;
        assert!(factory.update_config(broken).is_err());
        assert_eq!(factory.config().mode, Topology::Single);
        factory
            .update_config(Config::cluster(["127.0.0.1:2"]))
            .unwrap();
        assert_eq!(factory.config().mode, Topology::Cluster);
    }

    #[test]
    fn unreachable_store_fails_closed() {
        // Bind then drop to get a port nobody listens on.
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .to_string();
        let mut config = Config::single(addr, 0);
        config.common.max_retries = 0;
        config.common.min_idle_conns = 0;
        let err = connect(config).unwrap_err();
        assert!(err.is_connection(), "unexpected error {:?}", err);
    }

    #[test]
    fn command_errors_from_the_probe_become_connection_errors() {
        let err = probe_error(Error::from_reply(b"NOAUTH Authentication required."));
        assert!(err.is_connection());
        assert!(probe_error(Error::Timeout).is_connection());
    }
}
