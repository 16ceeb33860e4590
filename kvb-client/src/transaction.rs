//! # Transactions
//!
//! A `Transaction` owns one leased connection from `begin_transaction` until
//! it is committed, discarded, or dropped. Commands are buffered locally and
//! written together with `EXEC` in a single flush.

use tracing::debug;

use crate::client::{IntArg, StoreClient};
use crate::command::CommandResult;
use crate::error::{ClientError, ClientResult};
use crate::pool::PooledConnection;
use crate::resp::RespValue;

/// Batched commands bound to one connection in `MULTI` state.
pub struct Transaction {
    conn: PooledConnection,
    queued: Vec<Vec<Vec<u8>>>,
    finished: bool,
}

impl StoreClient {
    /// Leases a connection and opens a `MULTI` block on it.
    pub fn begin_transaction(&self) -> CommandResult<Transaction> {
        let outcome = self.pool.acquire().and_then(|mut conn| {
            conn.exec(&[b"MULTI"])?.into_ok()?;
            Ok(Transaction {
                conn,
                queued: Vec::new(),
                finished: false,
            })
        });
        CommandResult::settle("MULTI", "", outcome)
    }
}

impl Transaction {
    /// Queues a raw command.
    pub fn queue<A: AsRef<[u8]>>(&mut self, args: &[A]) -> &mut Self {
        self.queued
            .push(args.iter().map(|arg| arg.as_ref().to_vec()).collect());
        self
    }

    pub fn set(&mut self, key: &str, value: &str) -> &mut Self {
        self.queue(&[b"SET".as_slice(), key.as_bytes(), value.as_bytes()])
    }

    pub fn hset(&mut self, key: &str, field: &str, value: &str) -> &mut Self {
        self.queue(&[b"HSET".as_slice(), key.as_bytes(), field.as_bytes(), value.as_bytes()])
    }

    pub fn sadd(&mut self, key: &str, member: &str) -> &mut Self {
        self.queue(&[b"SADD".as_slice(), key.as_bytes(), member.as_bytes()])
    }

    pub fn rpush(&mut self, key: &str, value: &str) -> &mut Self {
        self.queue(&[b"RPUSH".as_slice(), key.as_bytes(), value.as_bytes()])
    }

    pub fn incr(&mut self, key: &str) -> &mut Self {
        self.queue(&[b"INCR".as_slice(), key.as_bytes()])
    }

    pub fn del(&mut self, key: &str) -> &mut Self {
        self.queue(&[b"DEL".as_slice(), key.as_bytes()])
    }

    pub fn expire(&mut self, key: &str, seconds: u64) -> &mut Self {
        let seconds = IntArg::from(seconds);
        self.queue(&[b"EXPIRE".as_slice(), key.as_bytes(), seconds.as_bytes()])
    }

    /// Number of commands waiting for `commit`.
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Sends the queued commands and `EXEC`, returning one reply per command.
    pub fn commit(mut self) -> CommandResult<Vec<RespValue>> {
        self.finished = true;
        let outcome = self.flush();
        if outcome.is_err() {
            self.conn.discard();
        }
        CommandResult::settle("EXEC", "", outcome)
    }

    /// Abandons the queued commands and releases the connection.
    pub fn discard(mut self) -> CommandResult<()> {
        self.finished = true;
        self.queued.clear();
        let outcome = self
            .conn
            .exec(&[b"DISCARD"])
            .and_then(RespValue::into_ok);
        if outcome.is_err() {
            self.conn.discard();
        }
        CommandResult::settle("DISCARD", "", outcome)
    }

    fn flush(&mut self) -> ClientResult<Vec<RespValue>> {
        let mut batch = std::mem::take(&mut self.queued);
        let queued = batch.len();
        batch.push(vec![b"EXEC".to_vec()]);
        self.conn.send_batch(&batch)?;

        for _ in 0..queued {
            match self.conn.read_reply()? {
                RespValue::Simple(text) if text == b"QUEUED" => {}
                // The store reports the rejection again as EXECABORT.
                RespValue::Error(message) => {
                    debug!(error = %String::from_utf8_lossy(&message), "command rejected in transaction");
                }
                _ => return Err(ClientError::UnexpectedResponse),
            }
        }

        match self.conn.read_reply()? {
            RespValue::Array(replies) => Ok(replies),
            RespValue::NullArray => Err(ClientError::TransactionAborted),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            // The connection is still inside MULTI; never hand it to another caller.
            self.conn.discard();
        }
    }
}
