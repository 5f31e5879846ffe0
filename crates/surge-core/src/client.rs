//! Client connection handles.
//!
//! The hub stores opaque handles to connected clients. A handle exposes the
//! connection's addressable identity and its delivery/close paths; the kernel
//! never interprets the session state behind it.

use bytes::Bytes;
use thiserror::Error;

/// Errors surfaced by a client handle.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection is already closed.
    #[error("connection closed")]
    Closed,

    /// Send queue is full, the message was not enqueued.
    #[error("send queue full")]
    QueueFull,

    /// Transport-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Handle to a connected client held by the hub.
///
/// `send` enqueues an already-encoded message on the connection's send path
/// and must not block on network I/O. `close` terminates the connection;
/// `reconnect` advises the client whether to come back.
pub trait ClientHandle: Send + Sync {
    /// Unique connection id.
    fn id(&self) -> &str;

    /// User id the connection authenticated as.
    fn user_id(&self) -> &str;

    /// Enqueue an encoded message for delivery.
    fn send(&self, data: Bytes) -> Result<(), ClientError>;

    /// Close the connection, advising the client whether to reconnect.
    fn close(&self, reconnect: bool) -> Result<(), ClientError>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Recording client used by hub and node tests.
    pub(crate) struct MockClient {
        id: String,
        user: String,
        pub(crate) sent: Mutex<Vec<Bytes>>,
        pub(crate) closed: Mutex<Option<bool>>,
        fail_send: bool,
    }

    impl MockClient {
        pub(crate) fn new(id: &str, user: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                user: user.to_string(),
                sent: Mutex::new(Vec::new()),
                closed: Mutex::new(None),
                fail_send: false,
            })
        }

        /// A client whose send path always errors.
        pub(crate) fn failing(id: &str, user: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                user: user.to_string(),
                sent: Mutex::new(Vec::new()),
                closed: Mutex::new(None),
                fail_send: true,
            })
        }

        pub(crate) fn sent_count(&self) -> usize {
            self.sent.lock().len()
        }

        pub(crate) fn is_closed(&self) -> bool {
            self.closed.lock().is_some()
        }
    }

    impl ClientHandle for MockClient {
        fn id(&self) -> &str {
            &self.id
        }

        fn user_id(&self) -> &str {
            &self.user
        }

        fn send(&self, data: Bytes) -> Result<(), ClientError> {
            if self.fail_send {
                return Err(ClientError::QueueFull);
            }
            self.sent.lock().push(data);
            Ok(())
        }

        fn close(&self, reconnect: bool) -> Result<(), ClientError> {
            *self.closed.lock() = Some(reconnect);
            Ok(())
        }
    }
}
