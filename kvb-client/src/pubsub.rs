//! # Resilient Subscription
//!
//! Purpose: Keep a channel subscription alive for the lifetime of a dedicated
//! thread, reconnecting after transport failures.
//!
//! ## State Machine
//!
//! ```text
//! Connecting ──lease + SUBSCRIBE ok──▶ Connected ──transport error──▶ Disconnected
//!     ▲                                    │                              │
//!     └────────────── backoff elapsed ─────┼──────────────────────────────┘
//!                                          │
//!   any state ──shutdown signalled──▶ Stopped
//! ```
//!
//! Messages reach the handler in the order the transport yields them.
//! Nothing is buffered across a reconnect: messages published while the loop
//! is `Disconnected` are lost.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::client::StoreClient;
use crate::command::CommandResult;
use crate::error::{ClientError, ClientResult};
use crate::pool::PooledConnection;
use crate::resp::RespValue;

/// One published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    /// Decoded lossily; invalid UTF-8 sequences become U+FFFD.
    pub payload: String,
}

/// Callbacks driven by the subscription loop, on the loop's thread.
pub trait MessageHandler {
    fn on_message(&mut self, message: &Message);

    /// The store confirmed a channel; `active` is the connection's
    /// subscription count.
    fn on_subscribe(&mut self, _channel: &str, _active: i64) {}

    fn on_state(&mut self, _state: SubscriptionState) {}
}

impl<F: FnMut(&Message)> MessageHandler for F {
    fn on_message(&mut self, message: &Message) {
        self(message)
    }
}

/// Observable states of the subscription loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Connecting,
    Connected,
    Disconnected,
    Stopped,
}

/// Totals reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionReport {
    /// Messages handed to the handler.
    pub delivered: u64,
    /// Transport failures survived.
    pub disconnects: u64,
}

/// Cooperative stop flag shared between the subscriber thread and its owner.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<ShutdownInner>,
}

#[derive(Default)]
struct ShutdownInner {
    triggered: Mutex<bool>,
    wake: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown and wakes a loop sleeping in backoff.
    pub fn trigger(&self) {
        *self.inner.triggered.lock() = true;
        self.inner.wake.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.triggered.lock()
    }

    /// Sleeps up to `timeout`; returns true if shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut triggered = self.inner.triggered.lock();
        while !*triggered {
            if self.inner.wake.wait_until(&mut triggered, deadline).timed_out() {
                break;
            }
        }
        *triggered
    }
}

/// Loop state carrying the lease while connected.
enum Phase {
    Connecting,
    Connected(PooledConnection),
    Disconnected,
    Stopped,
}

impl Phase {
    fn state(&self) -> SubscriptionState {
        match self {
            Phase::Connecting => SubscriptionState::Connecting,
            Phase::Connected(_) => SubscriptionState::Connected,
            Phase::Disconnected => SubscriptionState::Disconnected,
            Phase::Stopped => SubscriptionState::Stopped,
        }
    }
}

/// Inbound frame on a subscribed connection.
enum Push {
    Message(Message),
    Subscribed { channel: String, active: i64 },
    Other(String),
}

impl StoreClient {
    /// Subscribes to `channels` and dispatches messages to `handler` until
    /// `shutdown` is triggered.
    ///
    /// Blocks the calling thread and holds one pooled connection while
    /// connected, so run it on a dedicated thread. Transport failures are
    /// logged and retried after `reconnect_backoff`.
    pub fn subscribe<H>(
        &self,
        handler: &mut H,
        channels: &[&str],
        shutdown: &ShutdownSignal,
    ) -> CommandResult<SubscriptionReport>
    where
        H: MessageHandler + ?Sized,
    {
        let label = channels.first().copied().unwrap_or("");
        if channels.is_empty() {
            return CommandResult::settle(
                "SUBSCRIBE",
                label,
                Err(ClientError::InvalidArgument("no channels")),
            );
        }

        let mut report = SubscriptionReport::default();
        let mut phase = Phase::Connecting;
        loop {
            handler.on_state(phase.state());
            phase = match phase {
                Phase::Connecting if shutdown.is_triggered() => Phase::Stopped,
                Phase::Connecting => match self.open_subscription(channels) {
                    Ok(conn) => {
                        info!(channels = ?channels, "subscribed");
                        Phase::Connected(conn)
                    }
                    Err(err) => {
                        warn!(channels = ?channels, error = %err, "subscribe failed");
                        Phase::Disconnected
                    }
                },
                Phase::Connected(mut conn) => {
                    match self.pump(&mut conn, handler, shutdown, &mut report) {
                        Ok(()) => {
                            // Still in subscriber mode; it cannot serve regular commands.
                            conn.discard();
                            Phase::Stopped
                        }
                        Err(err) => {
                            warn!(channels = ?channels, error = %err, "subscription interrupted");
                            conn.discard();
                            report.disconnects += 1;
                            Phase::Disconnected
                        }
                    }
                }
                Phase::Disconnected => {
                    if shutdown.wait_timeout(self.config.reconnect_backoff) {
                        Phase::Stopped
                    } else {
                        debug!(channels = ?channels, "reconnecting subscription");
                        Phase::Connecting
                    }
                }
                Phase::Stopped => {
                    info!(
                        channels = ?channels,
                        delivered = report.delivered,
                        disconnects = report.disconnects,
                        "subscription stopped"
                    );
                    return CommandResult::settle("SUBSCRIBE", label, Ok(report));
                }
            };
        }
    }

    fn open_subscription(&self, channels: &[&str]) -> ClientResult<PooledConnection> {
        let mut conn = self.pool.acquire()?;
        let mut args: Vec<&[u8]> = Vec::with_capacity(1 + channels.len());
        args.push(b"SUBSCRIBE");
        args.extend(channels.iter().map(|channel| channel.as_bytes()));
        conn.send(&args)?;
        Ok(conn)
    }

    /// Reads frames until shutdown (`Ok`) or a transport failure (`Err`).
    fn pump<H>(
        &self,
        conn: &mut PooledConnection,
        handler: &mut H,
        shutdown: &ShutdownSignal,
        report: &mut SubscriptionReport,
    ) -> ClientResult<()>
    where
        H: MessageHandler + ?Sized,
    {
        loop {
            if shutdown.is_triggered() {
                return Ok(());
            }
            if !conn.wait_readable(self.config.subscribe_poll)? {
                continue;
            }
            match parse_push(conn.read_reply()?)? {
                Push::Message(message) => {
                    handler.on_message(&message);
                    report.delivered += 1;
                }
                Push::Subscribed { channel, active } => handler.on_subscribe(&channel, active),
                Push::Other(kind) => debug!(kind = %kind, "ignoring push frame"),
            }
        }
    }
}

fn parse_push(frame: RespValue) -> ClientResult<Push> {
    let items = match frame {
        RespValue::Array(items) => items,
        RespValue::Error(message) => return Err(ClientError::Server { message }),
        _ => return Err(ClientError::UnexpectedResponse),
    };
    let mut items = items.into_iter();
    let kind = next_text(&mut items)?;
    match kind.as_str() {
        "message" => {
            let channel = next_text(&mut items)?;
            let payload = match items.next() {
                Some(RespValue::Bulk(Some(data))) => String::from_utf8_lossy(&data).into_owned(),
                _ => return Err(ClientError::UnexpectedResponse),
            };
            Ok(Push::Message(Message { channel, payload }))
        }
        "subscribe" => {
            let channel = next_text(&mut items)?;
            let active = items
                .next()
                .ok_or(ClientError::UnexpectedResponse)?
                .into_integer()?;
            Ok(Push::Subscribed { channel, active })
        }
        _ => Ok(Push::Other(kind)),
    }
}

fn next_text(items: &mut impl Iterator<Item = RespValue>) -> ClientResult<String> {
    items
        .next()
        .ok_or(ClientError::UnexpectedResponse)?
        .into_text()?
        .ok_or(ClientError::UnexpectedResponse)
}
