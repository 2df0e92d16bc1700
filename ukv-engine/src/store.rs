//! # Store
//!
//! Purpose: Own the numbered databases, authenticate sessions and run
//! commands with `MULTI`/`EXEC` isolation.
//!
//! ## Design Principles
//! 1. **Session-Scoped State**: The selected database, authentication and the
//!    open transaction queue live in `Session`, one per client connection.
//! 2. **Transaction Gate**: Ordinary commands share a read lock on the gate;
//!    `EXEC` and multi-key writes take it exclusively, so a transaction never
//!    interleaves with other commands.
//! 3. **Queue-Time Validation**: Unknown commands and arity errors inside
//!    `MULTI` abort the whole transaction at `EXEC`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use ukv_common::Value;

use crate::command::{self, CmdError};
use crate::keyspace::Keyspace;

/// Default number of logical databases.
pub const DEFAULT_DATABASES: usize = 16;

/// Construction options for a `Store`.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Number of logical databases reachable through `SELECT`.
    pub databases: usize,
    /// Shards per database; `None` derives it from CPU parallelism.
    pub shards: Option<usize>,
    /// Password required by `AUTH`; `None` disables authentication.
    pub password: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            databases: DEFAULT_DATABASES,
            shards: None,
            password: None,
        }
    }
}

/// Per-connection state.
#[derive(Debug, Default)]
pub struct Session {
    pub(crate) db: usize,
    pub(crate) authenticated: bool,
    queued: Option<Vec<Vec<Vec<u8>>>>,
    queue_failed: bool,
}

impl Session {
    /// A fresh session on database 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// A session that skips `AUTH`, for in-process callers.
    pub fn trusted(db: usize) -> Self {
        Session {
            db,
            authenticated: true,
            ..Self::default()
        }
    }

    /// Currently selected database.
    pub fn db(&self) -> usize {
        self.db
    }

    /// True while a `MULTI` block is open.
    pub fn in_transaction(&self) -> bool {
        self.queued.is_some()
    }
}

/// Handle for the background expiration sweeper.
///
/// Call `stop` to signal shutdown and join the thread.
pub struct ExpirationHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ExpirationHandle {
    /// Stops the sweeper and waits for the thread to finish.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// All databases plus authentication and transaction state.
#[derive(Debug)]
pub struct Store {
    dbs: Vec<Keyspace>,
    password: Option<String>,
    gate: RwLock<()>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// A store with default databases and no password.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// A store built from explicit options.
    pub fn with_config(config: StoreConfig) -> Self {
        let databases = config.databases.max(1);
        let dbs = (0..databases)
            .map(|_| match config.shards {
                Some(shards) => Keyspace::with_shard_count(shards),
                None => Keyspace::new(),
            })
            .collect();
        Store {
            dbs,
            password: config.password,
            gate: RwLock::new(()),
        }
    }

    /// Number of logical databases.
    pub fn databases(&self) -> usize {
        self.dbs.len()
    }

    /// Database `idx`, if it exists.
    pub fn db(&self, idx: usize) -> Option<&Keyspace> {
        self.dbs.get(idx)
    }

    pub(crate) fn keyspace(&self, idx: usize) -> &Keyspace {
        // SELECT only accepts valid indexes.
        self.dbs.get(idx).unwrap_or(&self.dbs[0])
    }

    pub(crate) fn requires_auth(&self) -> bool {
        self.password.is_some()
    }

    /// True when `session` may run commands other than `AUTH`.
    pub fn is_authorized(&self, session: &Session) -> bool {
        !self.requires_auth() || session.authenticated
    }

    pub(crate) fn check_password(&self, candidate: &[u8]) -> bool {
        self.password
            .as_ref()
            .map_or(true, |password| password.as_bytes() == candidate)
    }

    /// Removes expired entries from every database.
    pub fn purge_expired(&self, now: Instant) -> usize {
        self.dbs.iter().map(|db| db.purge_expired(now)).sum()
    }

    /// Starts a background thread that periodically removes expired entries.
    ///
    /// The returned handle must be stopped to avoid leaking the thread.
    pub fn start_expirer(self: &Arc<Self>, interval: Duration) -> ExpirationHandle {
        let interval = if interval.is_zero() {
            Duration::from_millis(1)
        } else {
            interval
        };

        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);
        let store = Arc::clone(self);

        let join = std::thread::spawn(move || {
            while !stop_thread.load(Ordering::Acquire) {
                std::thread::sleep(interval);
                let removed = store.purge_expired(Instant::now());
                if removed > 0 {
                    debug!(removed, "expired keys purged");
                }
            }
        });

        ExpirationHandle {
            stop,
            join: Some(join),
        }
    }

    /// Executes one command for `session` and returns its reply.
    pub fn execute(&self, session: &mut Session, args: &[Vec<u8>]) -> Value {
        let name = match args.first() {
            Some(name) => name.to_ascii_uppercase(),
            None => return CmdError::Empty.into(),
        };

        if !self.is_authorized(session) && name != b"AUTH" {
            return CmdError::NoAuth.into();
        }

        match name.as_slice() {
            b"MULTI" => {
                if session.queued.is_some() {
                    return CmdError::Custom("MULTI calls can not be nested".into()).into();
                }
                session.queued = Some(Vec::new());
                session.queue_failed = false;
                Value::ok()
            }
            b"EXEC" => match session.queued.take() {
                None => CmdError::Custom("EXEC without MULTI".into()).into(),
                Some(_) if session.queue_failed => {
                    session.queue_failed = false;
                    CmdError::ExecAbort.into()
                }
                Some(queued) => {
                    let _exclusive = self.gate.write();
                    Value::Array(
                        queued
                            .iter()
                            .map(|args| command::dispatch(self, session, args))
                            .collect(),
                    )
                }
            },
            b"DISCARD" => match session.queued.take() {
                None => CmdError::Custom("DISCARD without MULTI".into()).into(),
                Some(_) => {
                    session.queue_failed = false;
                    Value::ok()
                }
            },
            _ => {
                if let Some(queued) = session.queued.as_mut() {
                    if let Err(err) = command::validate(args) {
                        session.queue_failed = true;
                        return err.into();
                    }
                    queued.push(args.to_vec());
                    return Value::Simple(b"QUEUED".to_vec());
                }
                if command::is_exclusive(&name) {
                    let _exclusive = self.gate.write();
                    command::dispatch(self, session, args)
                } else {
                    let _shared = self.gate.read();
                    command::dispatch(self, session, args)
                }
            }
        }
    }

    /// Runs `cmds` atomically and returns one reply per command.
    ///
    /// Equivalent to `MULTI`, the commands, `EXEC`, unpacked: when any command
    /// fails validation nothing runs, the failing commands keep their own
    /// error and the rest report `EXECABORT`.
    pub fn transaction(&self, session: &mut Session, cmds: &[&[Vec<u8>]]) -> Vec<Value> {
        if !self.is_authorized(session) {
            return vec![Value::from(CmdError::NoAuth); cmds.len()];
        }
        let checks: Vec<Result<(), CmdError>> =
            cmds.iter().map(|args| command::validate(args)).collect();
        if checks.iter().any(Result::is_err) {
            return checks
                .into_iter()
                .map(|check| match check {
                    Ok(()) => CmdError::ExecAbort.into(),
                    Err(err) => err.into(),
                })
                .collect();
        }
        let _exclusive = self.gate.write();
        cmds.iter()
            .map(|args| command::dispatch(self, session, args))
            .collect()
    }
}
