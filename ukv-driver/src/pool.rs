//! # Connection Pool
//!
//! Purpose: Reuse TCP (or TLS) connections to one store node, bounding both
//! the pool size and every socket operation by the caller's `Context`.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections.
//! 3. **Bounded Waiting**: A full pool waits up to `pool_timeout` (or the call
//!    deadline) for a connection to come back, then fails.
//! 4. **Poisoned Connections Are Dropped**: Any IO, protocol, timeout or
//!    cancellation failure discards the connection instead of returning it.

use std::collections::VecDeque;
use std::io::{self, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use ukv_common::error::{sent_io, unsent_io};
use ukv_common::{Cmd, Context, Error, Result, Value};

use crate::options::{Auth, ConnectOptions, PoolOptions, Timeouts};
use crate::resp::{encode_command, read_response};
use crate::tls::{TlsConnector, TlsStream};

/// Longest blocking read while a cancellation token is attached.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Everything needed to dial and initialize connections to one node.
#[derive(Debug, Clone)]
pub(crate) struct PoolConfig {
    /// Node address, e.g. "10.0.0.5:6379".
    pub(crate) addr: String,
    pub(crate) auth: Option<Auth>,
    pub(crate) db: i64,
    /// Send `READONLY` after connecting (cluster replica reads).
    pub(crate) readonly: bool,
    pub(crate) pool: PoolOptions,
    pub(crate) timeouts: Timeouts,
    pub(crate) tls: Option<TlsConnector>,
}

impl PoolConfig {
    pub(crate) fn for_node(addr: &str, options: &ConnectOptions, tls: Option<TlsConnector>) -> Self {
        PoolConfig {
            addr: addr.to_string(),
            auth: options.auth.clone(),
            db: options.db,
            readonly: false,
            pool: options.pool.clone(),
            timeouts: options.timeouts.clone(),
            tls,
        }
    }
}

struct Idle {
    conn: Connection,
    since: Instant,
}

struct PoolState {
    idle: VecDeque<Idle>,
    total: usize,
    closed: bool,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
    returned: Condvar,
}

/// Connection pool handle for one node.
#[derive(Clone)]
pub(crate) struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates the pool and eagerly dials up to `min_idle` connections.
    ///
    /// Warm-up is best effort: the first failure stops it without error so a
    /// node that is briefly down does not prevent construction.
    pub(crate) fn new(config: PoolConfig) -> Self {
        let min_idle = config.pool.min_idle.min(config.pool.size);
        let state = PoolState {
            idle: VecDeque::with_capacity(config.pool.max_idle),
            total: 0,
            closed: false,
        };
        let pool = ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
                returned: Condvar::new(),
            }),
        };
        pool.warm_up(min_idle);
        pool
    }

    fn warm_up(&self, count: usize) {
        let ctx = match self.inner.config.timeouts.dial {
            Some(dial) => Context::with_timeout(dial),
            None => Context::background(),
        };
        for _ in 0..count {
            match Connection::connect(&ctx, &self.inner.config) {
                Ok(conn) => {
                    let mut state = self.inner.state.lock();
                    state.total += 1;
                    state.idle.push_back(Idle {
                        conn,
                        since: Instant::now(),
                    });
                }
                Err(err) => {
                    debug!(addr = %self.inner.config.addr, error = %err, "pool warm-up stopped");
                    break;
                }
            }
        }
    }

    /// Node address served by this pool.
    pub(crate) fn addr(&self) -> &str {
        &self.inner.config.addr
    }

    /// Acquires a connection, waiting for one to be returned when the pool is full.
    pub(crate) fn acquire(&self, ctx: &Context) -> Result<PooledConnection> {
        ctx.check()?;
        let config = &self.inner.config;
        let wait_until = Instant::now() + config.pool.pool_timeout;

        let mut state = self.inner.state.lock();
        loop {
            if state.closed {
                return Err(Error::unsent(format!("pool for {} is closed", config.addr)));
            }

            while let Some(idle) = state.idle.pop_front() {
                let stale = config
                    .pool
                    .idle_timeout
                    .map_or(false, |limit| idle.since.elapsed() >= limit);
                if stale {
                    state.total = state.total.saturating_sub(1);
                    continue;
                }
                return Ok(PooledConnection::new(self.inner.clone(), idle.conn));
            }

            if state.total < config.pool.size {
                state.total += 1;
                drop(state);
                return match Connection::connect(ctx, config) {
                    Ok(conn) => Ok(PooledConnection::new(self.inner.clone(), conn)),
                    Err(err) => {
                        self.release_slot();
                        Err(err)
                    }
                };
            }

            ctx.check()?;
            let now = Instant::now();
            if now >= wait_until {
                return Err(Error::PoolExhausted);
            }
            let mut wake_at = wait_until;
            if let Some(deadline) = ctx.deadline() {
                wake_at = wake_at.min(deadline);
            }
            if ctx.has_cancel() {
                wake_at = wake_at.min(now + CANCEL_POLL);
            }
            self.inner.returned.wait_until(&mut state, wake_at);
        }
    }

    /// Drops idle connections and refuses further checkouts. Idempotent.
    pub(crate) fn close(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let dropped = state.idle.len();
        state.total = state.total.saturating_sub(dropped);
        state.idle.clear();
        drop(state);
        self.inner.returned.notify_all();
        debug!(addr = %self.inner.config.addr, dropped, "pool closed");
    }

    fn release_slot(&self) {
        release_slot(&self.inner);
    }
}

fn release_slot(inner: &PoolInner) {
    let mut state = inner.state.lock();
    state.total = state.total.saturating_sub(1);
    drop(state);
    inner.returned.notify_one();
}

fn return_connection(inner: &PoolInner, conn: Connection) {
    let mut state = inner.state.lock();
    if !state.closed && state.idle.len() < inner.config.pool.max_idle {
        state.idle.push_back(Idle {
            conn,
            since: Instant::now(),
        });
    } else {
        state.total = state.total.saturating_sub(1);
    }
    drop(state);
    inner.returned.notify_one();
}

/// RAII wrapper returning a connection to the pool on drop.
pub(crate) struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    valid: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
        }
    }

    /// Executes one command and returns its raw reply.
    pub(crate) fn exec(&mut self, ctx: &Context, cmd: &Cmd) -> Result<Value> {
        let mut replies = self.pipeline(ctx, &[cmd])?;
        replies
            .pop()
            .ok_or_else(|| Error::Protocol("missing reply".into()))
    }

    /// Writes every command in one flush, then reads one reply per command.
    pub(crate) fn pipeline(&mut self, ctx: &Context, cmds: &[&Cmd]) -> Result<Vec<Value>> {
        let timeouts = &self.pool.config.timeouts;
        let conn = match self.conn.as_mut() {
            Some(conn) => conn,
            None => return Err(Error::unsent("connection already released")),
        };
        let result: Result<Vec<Value>> = conn
            .send(ctx, timeouts, cmds)
            .and_then(|()| (0..cmds.len()).map(|_| conn.recv(ctx, timeouts)).collect());
        if let Err(err) = result {
            // If IO/protocol fails, do not return this connection to the pool.
            self.valid = false;
            return Err(settle(ctx, err));
        }
        result
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };
        if self.valid {
            return_connection(&self.pool, conn);
        } else {
            release_slot(&self.pool);
        }
    }
}

/// Reports a failure caused by the call's own context as such.
fn settle(ctx: &Context, err: Error) -> Error {
    if ctx.is_cancelled() {
        return Error::Cancelled;
    }
    if ctx.remaining() == Some(Duration::ZERO) {
        return Error::Timeout;
    }
    err
}

enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream>),
}

impl Transport {
    fn tcp(&self) -> &TcpStream {
        match self {
            Transport::Plain(stream) => stream,
            Transport::Tls(stream) => &stream.sock,
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(stream) => stream.read(buf),
            Transport::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(stream) => stream.write(buf),
            Transport::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(stream) => stream.flush(),
            Transport::Tls(stream) => stream.flush(),
        }
    }
}

/// Socket wrapper whose reads honor the armed call context.
///
/// Reads block in short slices while a cancel token is attached so a
/// cancellation is observed within `CANCEL_POLL`. Failures are reported as
/// `TimedOut` or `Other`, never `Interrupted`, which `BufReader` would retry.
struct Wire {
    transport: Transport,
    ctx: Context,
    read_timeout: Option<Duration>,
}

impl Wire {
    fn arm(&mut self, ctx: &Context, read_timeout: Option<Duration>) {
        self.ctx = ctx.clone();
        self.read_timeout = read_timeout;
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.transport.tcp().set_read_timeout(timeout)
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

impl Read for Wire {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = self
            .ctx
            .bound(self.read_timeout)
            .map(|timeout| Instant::now() + timeout);
        loop {
            if self.ctx.is_cancelled() {
                return Err(io::Error::new(io::ErrorKind::Other, "cancelled"));
            }
            let mut slice = limit.map(|at| at.saturating_duration_since(Instant::now()));
            if slice == Some(Duration::ZERO) {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
            }
            if self.ctx.has_cancel() {
                slice = Some(slice.map_or(CANCEL_POLL, |left| left.min(CANCEL_POLL)));
            }
            self.set_read_timeout(slice)?;
            match self.transport.read(buf) {
                Err(err) if is_timeout(&err) && self.ctx.has_cancel() => continue,
                Err(err) if is_timeout(&err) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"))
                }
                other => return other,
            }
        }
    }
}

impl Write for Wire {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.transport.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.transport.flush()
    }
}

/// Single connection with reusable buffers.
///
/// The buffers are stored on the connection to avoid per-call allocations.
pub(crate) struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<Wire>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Connection {
    fn connect(ctx: &Context, config: &PoolConfig) -> Result<Self> {
        let stream = dial(ctx, &config.addr, config.timeouts.dial)?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true).map_err(unsent_io)?;

        let transport = match &config.tls {
            Some(tls) => Transport::Tls(Box::new(tls.wrap(host_of(&config.addr), stream)?)),
            None => Transport::Plain(stream),
        };

        let mut conn = Connection {
            reader: BufReader::new(Wire {
                transport,
                ctx: ctx.clone(),
                read_timeout: config.timeouts.read,
            }),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        };
        conn.handshake(ctx, config).map_err(|err| match err {
            // The caller's command was never written, whatever happened here.
            Error::Connection { message, .. } => Error::unsent(message),
            other => settle(ctx, other),
        })?;
        Ok(conn)
    }

    fn handshake(&mut self, ctx: &Context, config: &PoolConfig) -> Result<()> {
        if let Some(auth) = &config.auth {
            let cmd = match &auth.username {
                Some(user) => Cmd::new("AUTH").arg(user).arg(&auth.password),
                None => Cmd::new("AUTH").arg(&auth.password),
            };
            self.expect_ok(ctx, &config.timeouts, &cmd)?;
        }
        if config.db != 0 {
            self.expect_ok(ctx, &config.timeouts, &Cmd::new("SELECT").arg(&config.db))?;
        }
        if config.readonly {
            self.expect_ok(ctx, &config.timeouts, &Cmd::new("READONLY"))?;
        }
        Ok(())
    }

    fn expect_ok(&mut self, ctx: &Context, timeouts: &Timeouts, cmd: &Cmd) -> Result<()> {
        self.send(ctx, timeouts, &[cmd])?;
        match self.recv(ctx, timeouts)? {
            Value::Error(raw) => Err(Error::from_reply(&raw)),
            _ => Ok(()),
        }
    }

    fn send(&mut self, ctx: &Context, timeouts: &Timeouts, cmds: &[&Cmd]) -> Result<()> {
        ctx.check()?;
        self.write_buf.clear();
        for cmd in cmds {
            encode_command(cmd.as_args(), &mut self.write_buf);
        }

        let limit = ctx.bound(timeouts.write);
        if limit == Some(Duration::ZERO) {
            return Err(Error::Timeout);
        }
        let wire = self.reader.get_mut();
        // TLS may need to read handshake records while writing.
        wire.arm(ctx, limit);
        wire.transport.tcp().set_write_timeout(limit).map_err(unsent_io)?;
        write_request(wire, &self.write_buf)?;
        wire.arm(ctx, timeouts.read);
        Ok(())
    }

    fn recv(&mut self, ctx: &Context, timeouts: &Timeouts) -> Result<Value> {
        self.reader.get_mut().arm(ctx, timeouts.read);
        read_response(&mut self.reader, &mut self.line_buf)
    }
}

/// Writes one encoded request, tracking whether any byte left the client.
///
/// Only a failure before the first accepted byte is retryable. Once part of
/// the request is out, the store may execute a prefix of it.
fn write_request(wire: &mut impl Write, buf: &[u8]) -> Result<()> {
    let mut written = 0;
    while written < buf.len() {
        match wire.write(&buf[written..]) {
            Ok(0) => {
                let err = io::Error::new(io::ErrorKind::WriteZero, "connection accepted no bytes");
                return Err(write_failure(written, err));
            }
            Ok(n) => written += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(write_failure(written, err)),
        }
    }
    wire.flush().map_err(sent_io)
}

fn write_failure(written: usize, err: io::Error) -> Error {
    if written == 0 {
        unsent_io(err)
    } else {
        sent_io(err)
    }
}

fn dial(ctx: &Context, addr: &str, timeout: Option<Duration>) -> Result<TcpStream> {
    let addrs = addr
        .to_socket_addrs()
        .map_err(|err| Error::unsent(format!("resolve {}: {}", addr, err)))?;

    let mut last_err = None;
    for socket_addr in addrs {
        ctx.check()?;
        let attempt = match ctx.bound(timeout) {
            Some(limit) if limit.is_zero() => return Err(Error::Timeout),
            Some(limit) => TcpStream::connect_timeout(&socket_addr, limit),
            None => TcpStream::connect(socket_addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                warn!(addr = %socket_addr, error = %err, "dial failed");
                last_err = Some(err);
            }
        }
    }
    match last_err {
        Some(err) => Err(Error::unsent(format!("dial {}: {}", addr, err))),
        None => Err(Error::unsent(format!("resolve {}: no addresses", addr))),
    }
}

/// Host part of `host:port`, without IPv6 brackets.
pub(crate) fn host_of(addr: &str) -> &str {
    let host = match addr.rsplit_once(':') {
        Some((host, _port)) => host,
        None => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_of_strips_port_and_brackets() {
        assert_eq!(host_of("cache.internal:6379"), "cache.internal");
        assert_eq!(host_of("[::1]:6380"), "::1");
        assert_eq!(host_of("localhost"), "localhost");
    }

    #[test]
    fn settle_prefers_context_state() {
        let token = ukv_common::CancelToken::new();
        let ctx = Context::background().cancellable(token.clone());
        token.cancel();
        let err = settle(&ctx, Error::connection("cancelled"));
        assert!(matches!(err, Error::Cancelled));

        let ctx = Context::with_deadline(Instant::now() - Duration::from_millis(1));
        let err = settle(&ctx, Error::connection("read"));
        assert!(matches!(err, Error::Timeout));
    }

    #[test]
    fn unreachable_node_is_an_unsent_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut options = ConnectOptions::default();
        options.pool.min_idle = 0;
        let pool = ConnectionPool::new(PoolConfig::for_node(&addr, &options, None));
        let err = pool
            .acquire(&Context::with_timeout(Duration::from_secs(1)))
            .err()
            .unwrap();
        assert!(err.is_unsent());
    }
}
