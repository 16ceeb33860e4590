//! # Store Client Facade
//!
//! Purpose: Expose the blocking command surface over a pooled RESP2
//! connection layer.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `StoreClient` hides pooling and protocol details.
//! 2. **One Lease Per Command**: Every call acquires a connection, issues one
//!    command, and lets the lease guard return it, success or failure.
//! 3. **Contained Failures**: Calls return `CommandResult`, never a panic or
//!    a raw transport error the caller has to route.
//! 4. **Atomic Primitives**: Conditional writes are single round trips.

use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::command::CommandResult;
use crate::error::{ClientError, ClientResult};
use crate::pool::{ConnectionPool, ExhaustedPolicy, PoolConfig, PoolStatus, PooledConnection};

/// Default delay used by `expire_fast`.
pub const SOFT_DELETE_DELAY: Duration = Duration::from_millis(5);

/// Default pause between subscription reconnect attempts.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// TTL state returned by the store, mirroring Redis semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

impl KeyTtl {
    pub const NO_EXPIRY: i64 = -1;
    pub const MISSING: i64 = -2;
    /// Reserved for a TTL query that could not complete.
    pub const FAILED: i64 = -3;

    /// Millisecond code in the store's PTTL convention.
    pub fn as_millis_code(&self) -> i64 {
        match self {
            KeyTtl::Missing => Self::MISSING,
            KeyTtl::NoExpiry => Self::NO_EXPIRY,
            KeyTtl::ExpiresIn(left) => i64::try_from(left.as_millis()).unwrap_or(i64::MAX),
        }
    }

    fn from_pttl(reply: i64) -> ClientResult<Self> {
        match reply {
            -2 => Ok(KeyTtl::Missing),
            -1 => Ok(KeyTtl::NoExpiry),
            millis if millis >= 0 => Ok(KeyTtl::ExpiresIn(Duration::from_millis(millis as u64))),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}

/// Configuration for the client and its pool.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Store address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Maximum idle connections kept in the pool.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Behavior of `acquire` when `max_total` connections are leased.
    pub exhausted: ExhaustedPolicy,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Pause between subscription reconnect attempts.
    pub reconnect_backoff: Duration,
    /// How often an idle subscription checks its shutdown signal.
    pub subscribe_poll: Duration,
    /// Expiry applied by `expire_fast`.
    pub soft_delete_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            max_idle: 8,
            max_total: 8,
            exhausted: ExhaustedPolicy::default(),
            read_timeout: Some(Duration::from_secs(2)),
            write_timeout: Some(Duration::from_secs(2)),
            connect_timeout: Some(Duration::from_secs(2)),
            reconnect_backoff: RECONNECT_BACKOFF,
            subscribe_poll: Duration::from_millis(100),
            soft_delete_delay: SOFT_DELETE_DELAY,
        }
    }
}

/// Pooled client for a remote key-value store.
///
/// This is a facade over the pool and RESP encoder/decoder. Each call acquires
/// a connection, executes one command, and returns the connection to the pool.
/// Cloning shares the pool.
#[derive(Clone)]
pub struct StoreClient {
    pub(crate) pool: ConnectionPool,
    pub(crate) config: ClientConfig,
}

impl StoreClient {
    /// Creates a client with default configuration.
    pub fn connect(addr: impl Into<String>) -> ClientResult<Self> {
        let config = ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        };
        Self::with_config(config)
    }

    /// Creates a client with a custom configuration.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        if config.max_idle > config.max_total {
            return Err(ClientError::InvalidArgument("max_idle exceeds max_total"));
        }
        if config.subscribe_poll.is_zero() {
            return Err(ClientError::InvalidArgument("subscribe_poll must be positive"));
        }
        if config.reconnect_backoff.is_zero() {
            return Err(ClientError::InvalidArgument("reconnect_backoff must be positive"));
        }
        let pool = ConnectionPool::new(PoolConfig {
            addr: config.addr.clone(),
            max_idle: config.max_idle,
            max_total: config.max_total,
            exhausted: config.exhausted,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            connect_timeout: config.connect_timeout,
        })?;
        Ok(StoreClient { pool, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Leases a connection, runs `op` on it, and wraps the outcome.
    ///
    /// The lease is dropped before the outcome is logged, so the connection
    /// is back in the pool (or closed) on every path.
    pub(crate) fn run<T>(
        &self,
        command: &'static str,
        key: &str,
        op: impl FnOnce(&mut PooledConnection) -> ClientResult<T>,
    ) -> CommandResult<T> {
        let outcome = self.pool.acquire().and_then(|mut conn| op(&mut conn));
        CommandResult::settle(command, key, outcome)
    }

    /// Sets several hash fields. True when the store answered `OK`.
    pub fn hmset<I, F, V>(&self, key: &str, hash: I) -> CommandResult<bool>
    where
        I: IntoIterator<Item = (F, V)>,
        F: AsRef<str>,
        V: AsRef<str>,
    {
        let pairs: Vec<(F, V)> = hash.into_iter().collect();
        if pairs.is_empty() {
            return CommandResult::settle("HMSET", key, Err(ClientError::InvalidArgument("empty hash")));
        }
        let mut args: Vec<&[u8]> = Vec::with_capacity(2 + pairs.len() * 2);
        args.push(b"HMSET");
        args.push(key.as_bytes());
        for (field, value) in &pairs {
            args.push(field.as_ref().as_bytes());
            args.push(value.as_ref().as_bytes());
        }
        self.run("HMSET", key, |conn| conn.exec(&args)?.into_ok().map(|()| true))
    }

    /// Fetches hash fields in request order; absent fields are `None`.
    pub fn hmget(&self, key: &str, fields: &[&str]) -> CommandResult<Vec<Option<String>>> {
        if fields.is_empty() {
            return CommandResult::settle("HMGET", key, Err(ClientError::InvalidArgument("no fields")));
        }
        let args = command_args(b"HMGET", key, fields);
        self.run("HMGET", key, |conn| conn.exec(&args)?.into_optional_texts())
    }

    /// Creates `key` only if absent, with an expiry attached in the same
    /// command. True only when this call created the key.
    pub fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CommandResult<bool> {
        let expiry = match Expiry::from_ttl(ttl) {
            Ok(expiry) => expiry,
            Err(err) => return CommandResult::settle("SET", key, Err(err)),
        };
        let amount = IntArg::from(expiry.amount());
        let args: [&[u8]; 6] = [
            b"SET",
            key.as_bytes(),
            value.as_bytes(),
            b"NX",
            expiry.set_flag(),
            amount.as_bytes(),
        ];
        self.run("SET", key, |conn| {
            let reply = conn.exec(&args)?;
            if reply.is_nil() {
                return Ok(false);
            }
            reply.into_ok().map(|()| true)
        })
    }

    /// Sets a value with an expiry, overwriting any previous value.
    pub fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CommandResult<()> {
        let expiry = match Expiry::from_ttl(ttl) {
            Ok(expiry) => expiry,
            Err(err) => return CommandResult::settle("SET", key, Err(err)),
        };
        let amount = IntArg::from(expiry.amount());
        let args: [&[u8]; 5] = [
            b"SET",
            key.as_bytes(),
            value.as_bytes(),
            expiry.set_flag(),
            amount.as_bytes(),
        ];
        self.run("SET", key, |conn| conn.exec(&args)?.into_ok())
    }

    /// Fetches a value by key. `None` when the key is missing.
    pub fn get(&self, key: &str) -> CommandResult<Option<String>> {
        let args: [&[u8]; 2] = [b"GET", key.as_bytes()];
        self.run("GET", key, |conn| conn.exec(&args)?.into_text())
    }

    /// Deletes a key immediately. True when a key was removed.
    pub fn del(&self, key: &str) -> CommandResult<bool> {
        let args: [&[u8]; 2] = [b"DEL", key.as_bytes()];
        self.run("DEL", key, |conn| Ok(conn.exec(&args)?.into_integer()? > 0))
    }

    /// Sets a time-to-live on a key. True when the TTL was set.
    pub fn expire(&self, key: &str, ttl: Duration) -> CommandResult<bool> {
        let expiry = match Expiry::from_ttl(ttl) {
            Ok(expiry) => expiry,
            Err(err) => return CommandResult::settle("EXPIRE", key, Err(err)),
        };
        self.expire_with(key, expiry)
    }

    /// Schedules near-immediate expiry instead of deleting, leaving the
    /// reclamation to the store's background expiry.
    ///
    /// The key stays readable for up to `soft_delete_delay`.
    pub fn expire_fast(&self, key: &str) -> CommandResult<bool> {
        let delay = self.config.soft_delete_delay.as_millis().max(1);
        let millis = u64::try_from(delay).unwrap_or(u64::MAX);
        self.expire_with(key, Expiry::Millis(millis))
    }

    /// Expires a key at an absolute wall-clock time.
    pub fn expire_at(&self, key: &str, when: SystemTime) -> CommandResult<bool> {
        let seconds = match when.duration_since(UNIX_EPOCH) {
            Ok(since) => since.as_secs(),
            Err(_) => {
                return CommandResult::settle(
                    "EXPIREAT",
                    key,
                    Err(ClientError::InvalidArgument("expiry before unix epoch")),
                )
            }
        };
        let at = IntArg::from(seconds);
        let args: [&[u8]; 3] = [b"EXPIREAT", key.as_bytes(), at.as_bytes()];
        self.run("EXPIREAT", key, |conn| Ok(conn.exec(&args)?.into_integer()? == 1))
    }

    /// Returns the remaining lifetime of a key.
    pub fn pttl(&self, key: &str) -> CommandResult<KeyTtl> {
        let args: [&[u8]; 2] = [b"PTTL", key.as_bytes()];
        self.run("PTTL", key, |conn| KeyTtl::from_pttl(conn.exec(&args)?.into_integer()?))
    }

    /// Adds members to a set. True iff the store reports exactly one new member.
    pub fn sadd(&self, key: &str, members: &[&str]) -> CommandResult<bool> {
        if members.is_empty() {
            return CommandResult::settle("SADD", key, Err(ClientError::InvalidArgument("no members")));
        }
        let args = command_args(b"SADD", key, members);
        self.run("SADD", key, |conn| Ok(conn.exec(&args)?.into_integer()? == 1))
    }

    pub fn sismember(&self, key: &str, member: &str) -> CommandResult<bool> {
        let args: [&[u8]; 3] = [b"SISMEMBER", key.as_bytes(), member.as_bytes()];
        self.run("SISMEMBER", key, |conn| Ok(conn.exec(&args)?.into_integer()? == 1))
    }

    pub fn smembers(&self, key: &str) -> CommandResult<HashSet<String>> {
        let args: [&[u8]; 2] = [b"SMEMBERS", key.as_bytes()];
        self.run("SMEMBERS", key, |conn| conn.exec(&args)?.into_text_set())
    }

    /// Appends to the tail of a list (FIFO order). Returns the new length.
    pub fn rpush(&self, key: &str, members: &[&str]) -> CommandResult<i64> {
        if members.is_empty() {
            return CommandResult::settle("RPUSH", key, Err(ClientError::InvalidArgument("no members")));
        }
        let args = command_args(b"RPUSH", key, members);
        self.run("RPUSH", key, |conn| conn.exec(&args)?.into_integer())
    }

    /// Returns list elements between two inclusive indexes; negative
    /// indexes count from the tail.
    pub fn lrange(&self, key: &str, start: i64, stop: i64) -> CommandResult<Vec<String>> {
        let start = IntArg::from(start);
        let stop = IntArg::from(stop);
        let args: [&[u8]; 4] = [b"LRANGE", key.as_bytes(), start.as_bytes(), stop.as_bytes()];
        self.run("LRANGE", key, |conn| conn.exec(&args)?.into_texts())
    }

    /// Returns every element of a list.
    pub fn list_members(&self, key: &str) -> CommandResult<Vec<String>> {
        self.lrange(key, 0, -1)
    }

    /// Increments an integer value. Returns the post-increment value.
    pub fn incr(&self, key: &str) -> CommandResult<i64> {
        let args: [&[u8]; 2] = [b"INCR", key.as_bytes()];
        self.run("INCR", key, |conn| conn.exec(&args)?.into_integer())
    }

    /// Publishes to a channel. Returns how many subscribers received it.
    pub fn publish(&self, channel: &str, message: &str) -> CommandResult<i64> {
        let args: [&[u8]; 3] = [b"PUBLISH", channel.as_bytes(), message.as_bytes()];
        self.run("PUBLISH", channel, |conn| conn.exec(&args)?.into_integer())
    }

    /// Pings the store. Returns the reply text.
    pub fn ping(&self) -> CommandResult<String> {
        self.run("PING", "", |conn| match conn.exec(&[b"PING"])? {
            crate::resp::RespValue::Simple(text) => {
                String::from_utf8(text).map_err(|_| ClientError::InvalidUtf8)
            }
            other => Ok(other.into_text()?.unwrap_or_default()),
        })
    }

    fn expire_with(&self, key: &str, expiry: Expiry) -> CommandResult<bool> {
        let command = expiry.expire_command();
        let amount = IntArg::from(expiry.amount());
        let args: [&[u8]; 3] = [command, key.as_bytes(), amount.as_bytes()];
        let name = if command == b"PEXPIRE" { "PEXPIRE" } else { "EXPIRE" };
        self.run(name, key, |conn| Ok(conn.exec(&args)?.into_integer()? == 1))
    }
}

/// `name key items...` borrowed from the caller's strings.
pub(crate) fn command_args<'a>(name: &'static [u8], key: &'a str, items: &[&'a str]) -> Vec<&'a [u8]> {
    let mut args: Vec<&[u8]> = Vec::with_capacity(2 + items.len());
    args.push(name);
    args.push(key.as_bytes());
    args.extend(items.iter().map(|item| item.as_bytes()));
    args
}

/// Expiry granularity accepted by SET and the EXPIRE family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expiry {
    Seconds(u64),
    Millis(u64),
}

impl Expiry {
    /// Whole seconds use second granularity; anything finer uses milliseconds.
    fn from_ttl(ttl: Duration) -> ClientResult<Self> {
        if ttl.is_zero() {
            return Err(ClientError::InvalidArgument("expiry must be positive"));
        }
        if ttl.subsec_nanos() == 0 {
            return Ok(Expiry::Seconds(ttl.as_secs()));
        }
        let millis = ttl.as_millis().max(1);
        Ok(Expiry::Millis(u64::try_from(millis).unwrap_or(u64::MAX)))
    }

    fn amount(self) -> u64 {
        match self {
            Expiry::Seconds(value) | Expiry::Millis(value) => value,
        }
    }

    fn set_flag(self) -> &'static [u8] {
        match self {
            Expiry::Seconds(_) => b"EX",
            Expiry::Millis(_) => b"PX",
        }
    }

    fn expire_command(self) -> &'static [u8] {
        match self {
            Expiry::Seconds(_) => b"EXPIRE",
            Expiry::Millis(_) => b"PEXPIRE",
        }
    }
}

/// Decimal rendering of an integer argument on the stack.
pub(crate) struct IntArg {
    buf: [u8; 20],
    start: usize,
}

impl IntArg {
    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.buf[self.start..]
    }

    fn render(negative: bool, mut magnitude: u64) -> Self {
        // Stack buffer keeps conversion allocation-free; 20 bytes fit i64::MIN.
        let mut buf = [0u8; 20];
        let mut start = buf.len();
        loop {
            start -= 1;
            buf[start] = b'0' + (magnitude % 10) as u8;
            magnitude /= 10;
            if magnitude == 0 {
                break;
            }
        }
        if negative {
            start -= 1;
            buf[start] = b'-';
        }
        IntArg { buf, start }
    }
}

impl From<u64> for IntArg {
    fn from(value: u64) -> Self {
        IntArg::render(false, value)
    }
}

impl From<i64> for IntArg {
    fn from(value: i64) -> Self {
        IntArg::render(value < 0, value.unsigned_abs())
    }
}

impl From<usize> for IntArg {
    fn from(value: usize) -> Self {
        IntArg::render(false, value as u64)
    }
}
