//! # Connection Pool
//!
//! Purpose: Bound the number of TCP connections to the store and hand each
//! one to exactly one operation at a time.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections
//!    or adjusting counters; dialing happens outside the lock.
//! 3. **Scoped Leases**: `PooledConnection` returns its connection on drop,
//!    on every exit path.
//! 4. **Poisoned Connections Are Dropped**: A connection that saw an IO or
//!    framing error is closed instead of going back to the idle list.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::resp::{encode_command, read_response, RespValue};

/// What `acquire` does when every connection is leased.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustedPolicy {
    /// Return `PoolExhausted` immediately.
    FailFast,
    /// Wait for a release; `None` waits indefinitely.
    Block { max_wait: Option<Duration> },
}

impl Default for ExhaustedPolicy {
    fn default() -> Self {
        ExhaustedPolicy::Block { max_wait: None }
    }
}

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Store address, e.g. "127.0.0.1:6379" or "cache.internal:6379".
    pub addr: String,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    pub exhausted: ExhaustedPolicy,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

/// Snapshot of the pool's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle: usize,
    pub leased: usize,
    /// Open connections, idle and leased.
    pub total: usize,
}

struct PoolState {
    idle: VecDeque<Connection>,
    total: usize,
    leased: usize,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
    released: Condvar,
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates a new connection pool with the provided configuration.
    pub fn new(config: PoolConfig) -> ClientResult<Self> {
        if config.max_total == 0 {
            return Err(ClientError::InvalidArgument("max_total must be positive"));
        }
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            total: 0,
            leased: 0,
        };
        Ok(ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
                released: Condvar::new(),
            }),
        })
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            idle: state.idle.len(),
            leased: state.leased,
            total: state.total,
        }
    }

    /// Leases a connection, dialing a new one when the pool has room.
    pub fn acquire(&self) -> ClientResult<PooledConnection> {
        let deadline = match self.inner.config.exhausted {
            ExhaustedPolicy::Block { max_wait: Some(wait) } => Some(Instant::now() + wait),
            _ => None,
        };

        let mut state = self.inner.state.lock();
        loop {
            if let Some(conn) = state.idle.pop_front() {
                state.leased += 1;
                return Ok(PooledConnection::new(self.inner.clone(), conn));
            }
            if state.total < self.inner.config.max_total {
                // Reserve the slot now so concurrent callers cannot overshoot.
                state.total += 1;
                state.leased += 1;
                break;
            }
            match (self.inner.config.exhausted, deadline) {
                (ExhaustedPolicy::FailFast, _) => return Err(ClientError::PoolExhausted),
                (_, Some(deadline)) => {
                    if self.inner.released.wait_until(&mut state, deadline).timed_out()
                        && state.idle.is_empty()
                        && state.total >= self.inner.config.max_total
                    {
                        return Err(ClientError::PoolExhausted);
                    }
                }
                (_, None) => self.inner.released.wait(&mut state),
            }
        }
        drop(state);

        match Connection::connect(&self.inner.config) {
            Ok(conn) => {
                debug!(addr = %self.inner.config.addr, "opened store connection");
                Ok(PooledConnection::new(self.inner.clone(), conn))
            }
            Err(err) => {
                self.release_slot();
                Err(err)
            }
        }
    }

    fn release_slot(&self) {
        let mut state = self.inner.state.lock();
        state.total = state.total.saturating_sub(1);
        state.leased = state.leased.saturating_sub(1);
        drop(state);
        self.inner.released.notify_one();
    }

    fn return_connection(&self, conn: Connection) {
        let mut state = self.inner.state.lock();
        state.leased = state.leased.saturating_sub(1);
        if state.idle.len() < self.inner.config.max_idle {
            state.idle.push_back(conn);
        } else {
            state.total = state.total.saturating_sub(1);
        }
        drop(state);
        self.inner.released.notify_one();
    }
}

/// RAII lease returning a connection to the pool on drop.
pub struct PooledConnection {
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

    /// Executes a RESP command and returns the parsed reply.
    pub fn exec<A: AsRef<[u8]>>(&mut self, args: &[A]) -> ClientResult<RespValue> {
        let response = self.connection().exec(args);
        self.track(response)
    }

    /// Writes a command without waiting for its reply.
    pub fn send<A: AsRef<[u8]>>(&mut self, args: &[A]) -> ClientResult<()> {
        let sent = self
            .connection()
            .send_batch::<&[A], A>(std::slice::from_ref(&args));
        self.track(sent)
    }

    /// Writes several commands with a single flush.
    pub fn send_batch<A: AsRef<[u8]>>(&mut self, commands: &[Vec<A>]) -> ClientResult<()> {
        let sent = self.connection().send_batch::<Vec<A>, A>(commands);
        self.track(sent)
    }

    /// Reads the next reply or push frame.
    pub fn read_reply(&mut self) -> ClientResult<RespValue> {
        let reply = self.connection().read_reply();
        self.track(reply)
    }

    /// Waits up to `poll` for inbound bytes. `Ok(false)` means nothing arrived.
    pub fn wait_readable(&mut self, poll: Duration) -> ClientResult<bool> {
        let ready = self.connection().wait_readable(poll);
        self.track(ready)
    }

    /// Closes the connection on release instead of returning it.
    pub fn discard(&mut self) {
        self.valid = false;
    }

    fn connection(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection is present until drop")
    }

    fn track<T>(&mut self, result: ClientResult<T>) -> ClientResult<T> {
        if matches!(&result, Err(err) if err.is_transport()) {
            // If IO/protocol fails, do not return this connection to the pool.
            self.valid = false;
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

        let pool = ConnectionPool {
            inner: self.pool.clone(),
        };

        if self.valid {
            pool.return_connection(conn);
        } else {
            debug!(addr = %pool.inner.config.addr, "discarding store connection");
            drop(conn);
            pool.release_slot();
        }
    }
}

/// Single TCP connection with reusable buffers.
///
/// The buffers are stored on the connection to avoid per-call allocations.
pub struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    read_timeout: Option<Duration>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Connection {
    fn connect(config: &PoolConfig) -> ClientResult<Self> {
        let stream = connect_stream(config)?;
        stream.set_read_timeout(config.read_timeout)?;
        stream.set_write_timeout(config.write_timeout)?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        Ok(Connection {
            reader: BufReader::new(stream),
            read_timeout: config.read_timeout,
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        })
    }

    fn exec<A: AsRef<[u8]>>(&mut self, args: &[A]) -> ClientResult<RespValue> {
        self.send_batch::<&[A], A>(std::slice::from_ref(&args))?;
        self.read_reply()
    }

    fn send_batch<C, A>(&mut self, commands: &[C]) -> ClientResult<()>
    where
        C: AsRef<[A]>,
        A: AsRef<[u8]>,
    {
        self.write_buf.clear();
        for command in commands {
            encode_command(command.as_ref(), &mut self.write_buf);
        }

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;
        Ok(())
    }

    fn read_reply(&mut self) -> ClientResult<RespValue> {
        read_response(&mut self.reader, &mut self.line_buf)
    }

    fn wait_readable(&mut self, poll: Duration) -> ClientResult<bool> {
        if !self.reader.buffer().is_empty() {
            return Ok(true);
        }

        self.reader.get_ref().set_read_timeout(Some(poll))?;
        let filled = self.reader.fill_buf().map(|buf| buf.len());
        self.reader.get_ref().set_read_timeout(self.read_timeout)?;

        match filled {
            Ok(0) => Err(ClientError::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "connection closed by store",
            ))),
            Ok(_) => Ok(true),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn connect_stream(config: &PoolConfig) -> ClientResult<TcpStream> {
    let addrs = config
        .addr
        .to_socket_addrs()
        .map_err(|_| ClientError::InvalidAddress(config.addr.clone()))?;

    let mut last_err = None;
    for addr in addrs {
        let attempt = match config.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(match last_err {
        Some(err) => ClientError::Io(err),
        None => ClientError::InvalidAddress(config.addr.clone()),
    })
}
