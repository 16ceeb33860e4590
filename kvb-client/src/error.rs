use thiserror::Error;

/// Result type for the store client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the store client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,
    /// Server returned an error reply.
    #[error("server error: {}", String::from_utf8_lossy(.message))]
    Server { message: Vec<u8> },
    /// Response type did not match the expected command response.
    #[error("unexpected response")]
    UnexpectedResponse,
    /// Pool is at capacity and no connection became available in time.
    #[error("connection pool exhausted")]
    PoolExhausted,
    /// Address could not be resolved into a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// Arguments the store would reject; nothing was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// A bulk reply that should hold text was not UTF-8.
    #[error("reply is not valid utf-8")]
    InvalidUtf8,
    /// EXEC returned nil.
    #[error("transaction aborted")]
    TransactionAborted,
}

impl ClientError {
    /// True when the connection that produced this error can no longer be trusted.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Protocol | ClientError::InvalidAddress(_)
        )
    }
}
