//! One live client connection: a bounded outbound queue plus a liveness flag.
//!
//! [`ClientConnection::new`] produces two halves. The hub owns the
//! `ClientConnection` (the sending side); the transport owns the
//! [`ClientReceiver`] and drains it into whatever socket it manages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvError, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use custody_core::{ConnectionId, UserId};

/// Serialized wire envelope, shared by every recipient of one fan-out.
pub type ClientMessage = Arc<str>;

/// Identity of a connection, used to unregister it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
}

#[derive(Debug)]
pub(crate) struct Outbound {
    pub(crate) handle: ConnectionHandle,
    pub(crate) sender: SyncSender<ClientMessage>,
    live: Arc<AtomicBool>,
}

impl Outbound {
    pub(crate) fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Clear the liveness flag. Returns `true` only for the caller that
    /// actually closed it.
    pub(crate) fn close(&self) -> bool {
        self.live.swap(false, Ordering::AcqRel)
    }
}

/// Hub-owned sending half of a client connection.
#[derive(Debug)]
pub struct ClientConnection {
    capacity: usize,
    pub(crate) outbound: Arc<Outbound>,
}

impl ClientConnection {
    /// Create a connection for `user_id` with a queue of `capacity` messages
    /// (at least one).
    pub fn new(user_id: UserId, capacity: usize) -> (Self, ClientReceiver) {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::sync_channel(capacity);
        let live = Arc::new(AtomicBool::new(true));
        let handle = ConnectionHandle {
            user_id,
            connection_id: ConnectionId::new(),
        };

        let connection = Self {
            capacity,
            outbound: Arc::new(Outbound {
                handle,
                sender,
                live: Arc::clone(&live),
            }),
        };
        let receiver = ClientReceiver {
            handle,
            receiver,
            live,
        };
        (connection, receiver)
    }

    pub fn user_id(&self) -> UserId {
        self.outbound.handle.user_id
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.outbound.handle.connection_id
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.outbound.handle
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_live(&self) -> bool {
        self.outbound.is_live()
    }

    pub(crate) fn close(&self) -> bool {
        self.outbound.close()
    }
}

/// Transport-owned receiving half of a client connection.
///
/// Once the hub closes the connection (unregister, supersede, eviction or
/// shutdown) `is_live` turns false at once; already queued messages can
/// still be drained, after which `recv` reports disconnection.
#[derive(Debug)]
pub struct ClientReceiver {
    handle: ConnectionHandle,
    receiver: Receiver<ClientMessage>,
    live: Arc<AtomicBool>,
}

impl ClientReceiver {
    pub fn user_id(&self) -> UserId {
        self.handle.user_id
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.handle.connection_id
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<ClientMessage, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<ClientMessage, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<ClientMessage, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Take every message queued right now.
    pub fn drain(&self) -> Vec<ClientMessage> {
        self.receiver.try_iter().collect()
    }
}
