//! # TCP Server
//!
//! Accept RESP2 connections, parse commands, and dispatch them to the
//! storage engine. The server can present itself as a standalone node, a
//! one-node cluster or a sentinel, so every client topology can be exercised
//! against it.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use ukv_common::Value;
use ukv_engine::{ExpirationHandle, Session, Store, StoreConfig, DEFAULT_DATABASES};

use crate::protocol::{write_value, RespParser};

/// Highest cluster hash slot.
const LAST_SLOT: i64 = 16383;

/// How the server presents itself to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Role {
    /// Plain standalone node.
    Single,
    /// Cluster node owning every slot; answers `CLUSTER SLOTS`.
    Cluster,
    /// Sentinel answering `SENTINEL get-master-addr-by-name`.
    Sentinel,
}

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub role: Role,
    /// Password required by `AUTH`.
    pub password: Option<String>,
    pub databases: usize,
    /// Period of the background expiration sweep; `None` disables it.
    pub expire_interval: Option<Duration>,
    /// Group name a sentinel reports on.
    pub master_name: String,
    /// `host:port` a sentinel reports as the current master.
    pub master_addr: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            role: Role::Single,
            password: None,
            databases: DEFAULT_DATABASES,
            expire_interval: Some(Duration::from_millis(100)),
            master_name: "mymaster".to_string(),
            master_addr: None,
        }
    }
}

/// State shared by every connection.
pub struct ServerState {
    store: Arc<Store>,
    role: Role,
    advertised: SocketAddr,
    master_name: String,
    master_addr: RwLock<Option<String>>,
}

impl ServerState {
    pub fn new(config: &ServerConfig, advertised: SocketAddr) -> Self {
        let store = Store::with_config(StoreConfig {
            databases: config.databases,
            password: config.password.clone(),
            ..StoreConfig::default()
        });
        ServerState {
            store: Arc::new(store),
            role: config.role,
            advertised,
            master_name: config.master_name.clone(),
            master_addr: RwLock::new(config.master_addr.clone()),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Points a sentinel at a new master, as a failover would.
    pub fn set_master(&self, addr: Option<String>) {
        *self.master_addr.write() = addr;
    }

    /// Runs one request for `session`.
    pub fn dispatch(&self, session: &mut Session, args: &[Vec<u8>]) -> Value {
        let Some(first) = args.first() else {
            return Value::error("ERR empty command");
        };
        let name = first.to_ascii_uppercase();
        let role_specific = matches!(
            name.as_slice(),
            b"CLUSTER" | b"READONLY" | b"READWRITE" | b"ASKING" | b"SENTINEL"
        );
        if !role_specific {
            if self.role == Role::Sentinel && !matches!(name.as_slice(), b"PING" | b"AUTH") {
                return Value::error(format!(
                    "ERR unknown command '{}'",
                    String::from_utf8_lossy(first)
                ));
            }
            return self.store.execute(session, args);
        }
        if !self.store.is_authorized(session) {
            return Value::error("NOAUTH Authentication required.");
        }
        match (self.role, name.as_slice()) {
            (Role::Cluster, b"CLUSTER") => self.cluster(args),
            (Role::Cluster, b"READONLY" | b"READWRITE" | b"ASKING") => Value::ok(),
            (Role::Sentinel, b"SENTINEL") => self.sentinel(args),
            (_, b"CLUSTER" | b"READONLY" | b"READWRITE" | b"ASKING") => {
                Value::error("ERR This instance has cluster support disabled")
            }
            _ => Value::error(format!(
                "ERR unknown command '{}'",
                String::from_utf8_lossy(first)
            )),
        }
    }

    fn cluster(&self, args: &[Vec<u8>]) -> Value {
        let sub = args.get(1).map(|sub| sub.to_ascii_uppercase());
        match sub.as_deref() {
            Some(b"SLOTS") => {
                let node = Value::Array(vec![
                    Value::bulk(self.advertised.ip().to_string()),
                    Value::Integer(i64::from(self.advertised.port())),
                    Value::bulk(node_id(&self.advertised)),
                ]);
                Value::Array(vec![Value::Array(vec![
                    Value::Integer(0),
                    Value::Integer(LAST_SLOT),
                    node,
                ])])
            }
            Some(b"INFO") => Value::bulk(
                "cluster_state:ok\r\ncluster_slots_assigned:16384\r\ncluster_known_nodes:1\r\ncluster_size:1\r\n",
            ),
            Some(b"MYID") => Value::bulk(node_id(&self.advertised)),
            _ => Value::error("ERR unknown subcommand or wrong number of arguments for 'cluster'"),
        }
    }

    fn sentinel(&self, args: &[Vec<u8>]) -> Value {
        let sub = args.get(1).map(|sub| sub.to_ascii_lowercase());
        match (sub.as_deref(), args.get(2)) {
            (Some(b"get-master-addr-by-name"), Some(name)) => {
                if name.as_slice() != self.master_name.as_bytes() {
                    return Value::Nil;
                }
                match self.master_addr.read().as_deref().and_then(split_addr) {
                    Some((host, port)) => Value::Array(vec![Value::bulk(host), Value::bulk(port)]),
                    None => Value::Nil,
                }
            }
            _ => Value::error("ERR unknown subcommand or wrong number of arguments for 'sentinel'"),
        }
    }
}

/// Splits `host:port`, removing IPv6 brackets.
fn split_addr(addr: &str) -> Option<(String, String)> {
    let (host, port) = addr.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Some((host.to_string(), port.to_string()))
}

/// Stable 40-character node id derived from the address.
fn node_id(addr: &SocketAddr) -> String {
    let seed = format!("{:x}", addr.port());
    seed.chars().cycle().take(40).collect()
}

/// Handles a single TCP client connection.
pub async fn handle_connection(stream: TcpStream, state: Arc<ServerState>) -> io::Result<()> {
    let mut stream = stream;
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut out = BytesMut::with_capacity(8 * 1024);
    let mut parser = RespParser::new();
    let mut session = Session::new();

    loop {
        let bytes = stream.read_buf(&mut buffer).await?;
        if bytes == 0 {
            break;
        }

        loop {
            match parser.parse(&mut buffer) {
                Ok(Some(args)) if args.is_empty() => continue,
                Ok(Some(args)) => {
                    let reply = state.dispatch(&mut session, &args);
                    write_value(&mut out, &reply);
                }
                Ok(None) => break,
                Err(err) => {
                    write_value(&mut out, &Value::error(format!("ERR {}", err)));
                    stream.write_all(&out).await?;
                    return Ok(());
                }
            }
        }

        if !out.is_empty() {
            stream.write_all(&out).await?;
            out.clear();
        }
    }

    Ok(())
}

/// Accepts connections until the listener fails.
pub async fn serve(listener: TcpListener, state: Arc<ServerState>) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let _ = stream.set_nodelay(true);
        debug!(%peer, "client connected");
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, state).await {
                debug!(%peer, error = %err, "connection closed with error");
            } else {
                debug!(%peer, "client disconnected");
            }
        });
    }
}

/// A server running on its own runtime; stops when dropped.
pub struct ServerHandle {
    runtime: Option<Runtime>,
    addr: SocketAddr,
    state: Arc<ServerState>,
    expirer: Option<ExpirationHandle>,
}

impl ServerHandle {
    /// Binds `config.bind` and starts serving in the background.
    pub fn spawn(config: ServerConfig) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("ukv-server")
            .enable_all()
            .build()?;
        let listener = runtime.block_on(TcpListener::bind(&config.bind))?;
        let addr = listener.local_addr()?;
        let state = Arc::new(ServerState::new(&config, addr));
        let expirer = config
            .expire_interval
            .map(|interval| state.store().start_expirer(interval));

        let serving = Arc::clone(&state);
        runtime.spawn(async move {
            if let Err(err) = serve(listener, serving).await {
                warn!(error = %err, "accept loop stopped");
            }
        });
        info!(%addr, role = ?config.role, "server started");
        Ok(ServerHandle {
            runtime: Some(runtime),
            addr,
            state,
            expirer,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    pub fn store(&self) -> &Arc<Store> {
        self.state.store()
    }

    /// Stops accepting, drops every open connection and the sweeper.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
            info!(addr = %self.addr, "server stopped");
        }
        if let Some(expirer) = self.expirer.take() {
            expirer.stop();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<Vec<u8>> {
        parts.iter().map(|p| p.as_bytes().to_vec()).collect()
    }

    fn state(role: Role) -> ServerState {
        let config = ServerConfig {
            role,
            master_addr: Some("10.0.0.7:6380".into()),
            ..ServerConfig::default()
        };
        ServerState::new(&config, "127.0.0.1:7000".parse().unwrap())
    }

    #[test]
    fn cluster_role_owns_every_slot() {
        let state = state(Role::Cluster);
        let mut session = Session::new();
        let reply = state.dispatch(&mut session, &args(&["CLUSTER", "SLOTS"]));
        let Value::Array(ranges) = reply else {
            panic!("expected array");
        };
        let Value::Array(range) = &ranges[0] else {
            panic!("expected range");
        };
        assert_eq!(range[0], Value::Integer(0));
        assert_eq!(range[1], Value::Integer(LAST_SLOT));
        assert_eq!(state.dispatch(&mut session, &args(&["ASKING"])), Value::ok());
        assert_eq!(state.dispatch(&mut session, &args(&["SET", "k", "v"])), Value::ok());
    }

    #[test]
    fn single_role_rejects_cluster_commands() {
        let state = state(Role::Single);
        let mut session = Session::new();
        assert!(state.dispatch(&mut session, &args(&["CLUSTER", "SLOTS"])).is_error());
    }

    #[test]
    fn sentinel_reports_master_and_follows_failover() {
        let state = state(Role::Sentinel);
        let mut session = Session::new();
        let query = args(&["SENTINEL", "get-master-addr-by-name", "mymaster"]);
        assert_eq!(
            state.dispatch(&mut session, &query),
            Value::Array(vec![Value::bulk("10.0.0.7"), Value::bulk("6380")])
        );
        state.set_master(Some("[::1]:6390".into()));
        assert_eq!(
            state.dispatch(&mut session, &query),
            Value::Array(vec![Value::bulk("::1"), Value::bulk("6390")])
        );
        let unknown = args(&["SENTINEL", "get-master-addr-by-name", "other"]);
        assert_eq!(state.dispatch(&mut session, &unknown), Value::Nil);
        assert!(state.dispatch(&mut session, &args(&["GET", "k"])).is_error());
    }
}
