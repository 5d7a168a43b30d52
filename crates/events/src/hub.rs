//! Client registry ("hub"): one live delivery channel per connected user.
//!
//! ## Concurrency model
//!
//! - **One control loop** (a dedicated, named thread) owns the connection map.
//!   `register`, `unregister` and eviction are commands on its intake queue,
//!   so structural changes are serialized without per-entry locking.
//! - **Membership snapshot**: after every change the loop publishes the map to
//!   an `RwLock`-guarded snapshot. `is_connected`, `connected_users` and
//!   fan-out read the snapshot directly from any thread.
//! - **Fan-out never blocks**: each recipient gets a `try_send` on its bounded
//!   queue. A full queue evicts the connection (slow-consumer eviction): the
//!   liveness flag is cleared on the spot and the loop is asked to drop it.
//!
//! The hub is constructed once at process start and handed to producers by
//! reference (usually `Arc<Hub>`).

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use custody_core::UserId;

use crate::connection::{ClientConnection, ClientMessage, ClientReceiver, ConnectionHandle, Outbound};
use crate::delivery::{DeliveryReport, LiveDelivery};
use crate::envelope::EventEnvelope;
use crate::routing::{KindRoutingPolicy, RoutingPolicy};

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Per-client outbound queue size used by [`Hub::connect`].
    pub queue_capacity: usize,
    /// Name of the control loop thread.
    pub thread_name: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            thread_name: "custody-hub".to_string(),
        }
    }
}

impl HubConfig {
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("failed to spawn hub control loop: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("hub control loop is not running")]
    Stopped,
}

enum Command {
    Register {
        connection: ClientConnection,
        ack: mpsc::SyncSender<()>,
    },
    Unregister {
        handle: ConnectionHandle,
        ack: mpsc::SyncSender<bool>,
    },
    Evict {
        handle: ConnectionHandle,
    },
    Shutdown,
}

type Membership = Arc<RwLock<HashMap<UserId, Arc<Outbound>>>>;

pub struct Hub {
    intake: Sender<Command>,
    members: Membership,
    policy: Arc<dyn RoutingPolicy>,
    config: HubConfig,
    join: Mutex<Option<thread::JoinHandle<()>>>,
}

impl core::fmt::Debug for Hub {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.config)
            .field("connections", &self.connection_count())
            .finish()
    }
}

impl Hub {
    /// Start a hub with the default routing policy.
    pub fn start(config: HubConfig) -> Result<Self, HubError> {
        Self::with_policy(config, Arc::new(KindRoutingPolicy))
    }

    /// Start a hub that resolves broadcast recipients with `policy`.
    pub fn with_policy(config: HubConfig, policy: Arc<dyn RoutingPolicy>) -> Result<Self, HubError> {
        let (intake, commands) = mpsc::channel::<Command>();
        let members: Membership = Arc::new(RwLock::new(HashMap::new()));

        let loop_members = Arc::clone(&members);
        let join = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || control_loop(commands, loop_members))?;

        info!(queue_capacity = config.queue_capacity, "hub started");

        Ok(Self {
            intake,
            members,
            policy,
            config,
            join: Mutex::new(Some(join)),
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Open a connection for `user_id` with the configured queue capacity and
    /// register it. The returned receiver belongs to the transport.
    pub fn connect(&self, user_id: UserId) -> Result<ClientReceiver, HubError> {
        let (connection, receiver) = ClientConnection::new(user_id, self.config.queue_capacity);
        self.register(connection)?;
        Ok(receiver)
    }

    /// Register a connection. An existing connection for the same user is
    /// closed and replaced (last writer wins).
    ///
    /// Returns once the control loop has applied the change.
    pub fn register(&self, connection: ClientConnection) -> Result<ConnectionHandle, HubError> {
        let handle = connection.handle();
        let (ack, done) = mpsc::sync_channel(1);
        self.intake
            .send(Command::Register { connection, ack })
            .map_err(|_| HubError::Stopped)?;
        done.recv().map_err(|_| HubError::Stopped)?;
        Ok(handle)
    }

    /// Remove the connection identified by `handle`.
    ///
    /// Idempotent: returns `false` when that connection is no longer the
    /// user's current one (already removed, evicted or superseded).
    pub fn unregister(&self, handle: ConnectionHandle) -> Result<bool, HubError> {
        let (ack, done) = mpsc::sync_channel(1);
        self.intake
            .send(Command::Unregister { handle, ack })
            .map_err(|_| HubError::Stopped)?;
        done.recv().map_err(|_| HubError::Stopped)
    }

    pub fn connection_count(&self) -> usize {
        self.read_members().values().filter(|o| o.is_live()).count()
    }

    /// Stop the control loop, closing every connection. Safe to call twice.
    pub fn shutdown(&self) {
        let join = self
            .join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(join) = join {
            let _ = self.intake.send(Command::Shutdown);
            if join.join().is_err() {
                error!("hub control loop panicked");
            }
            info!("hub stopped");
        }
    }

    fn read_members(&self) -> std::sync::RwLockReadGuard<'_, HashMap<UserId, Arc<Outbound>>> {
        self.members.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn fan_out<I>(&self, recipients: I, message: &ClientMessage) -> DeliveryReport
    where
        I: IntoIterator<Item = UserId>,
    {
        // Resolve targets under the read lock, send without it.
        let targets: Vec<(UserId, Option<Arc<Outbound>>)> = {
            let members = self.read_members();
            recipients
                .into_iter()
                .map(|user_id| (user_id, members.get(&user_id).cloned()))
                .collect()
        };

        let mut report = DeliveryReport::default();
        for (user_id, outbound) in targets {
            let Some(outbound) = outbound.filter(|o| o.is_live()) else {
                report.offline.push(user_id);
                continue;
            };

            match outbound.sender.try_send(Arc::clone(message)) {
                Ok(()) => report.delivered.push(user_id),
                Err(TrySendError::Full(_)) => {
                    self.evict(&outbound, "queue full");
                    report.evicted.push(user_id);
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.evict(&outbound, "receiver dropped");
                    report.evicted.push(user_id);
                }
            }
        }
        report
    }

    fn evict(&self, outbound: &Outbound, reason: &'static str) {
        if !outbound.close() {
            return;
        }
        warn!(
            user_id = %outbound.handle.user_id,
            connection_id = %outbound.handle.connection_id,
            queue_capacity = self.config.queue_capacity,
            reason,
            "evicting client connection"
        );
        let _ = self.intake.send(Command::Evict {
            handle: outbound.handle,
        });
    }
}

fn encode(envelope: &EventEnvelope) -> Option<ClientMessage> {
    match envelope.to_json() {
        Ok(json) => Some(Arc::from(json)),
        Err(err) => {
            error!(kind = %envelope.kind(), error = %err, "failed to serialize envelope");
            None
        }
    }
}

impl LiveDelivery for Hub {
    fn broadcast(&self, envelope: &EventEnvelope) -> DeliveryReport {
        let recipients = self.policy.recipients(envelope);
        if recipients.is_empty() {
            debug!(kind = %envelope.kind(), "no recipients for envelope");
            return DeliveryReport::default();
        }
        let Some(message) = encode(envelope) else {
            return DeliveryReport::default();
        };
        self.fan_out(recipients, &message)
    }

    fn send_to_user(&self, user_id: UserId, envelope: &EventEnvelope) -> DeliveryReport {
        let Some(message) = encode(envelope) else {
            return DeliveryReport::default();
        };
        self.fan_out([user_id], &message)
    }

    fn is_connected(&self, user_id: UserId) -> bool {
        self.read_members()
            .get(&user_id)
            .is_some_and(|o| o.is_live())
    }

    fn connected_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .read_members()
            .iter()
            .filter(|(_, o)| o.is_live())
            .map(|(user_id, _)| *user_id)
            .collect();
        users.sort();
        users
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn control_loop(commands: Receiver<Command>, members: Membership) {
    let mut connections: HashMap<UserId, ClientConnection> = HashMap::new();

    while let Ok(command) = commands.recv() {
        match command {
            Command::Register { connection, ack } => {
                let handle = connection.handle();
                let outbound = Arc::clone(&connection.outbound);

                if let Some(previous) = connections.insert(handle.user_id, connection) {
                    previous.close();
                    info!(
                        user_id = %handle.user_id,
                        previous = %previous.connection_id(),
                        connection_id = %handle.connection_id,
                        "client connection superseded"
                    );
                } else {
                    info!(user_id = %handle.user_id, connection_id = %handle.connection_id, "client registered");
                }

                write_members(&members).insert(handle.user_id, outbound);
                let _ = ack.send(());
            }
            Command::Unregister { handle, ack } => {
                let removed = remove_current(&mut connections, &members, handle);
                if removed {
                    info!(user_id = %handle.user_id, connection_id = %handle.connection_id, "client unregistered");
                }
                let _ = ack.send(removed);
            }
            Command::Evict { handle } => {
                if remove_current(&mut connections, &members, handle) {
                    debug!(user_id = %handle.user_id, connection_id = %handle.connection_id, "evicted connection dropped");
                }
            }
            Command::Shutdown => break,
        }
    }

    for connection in connections.values() {
        connection.close();
    }
    write_members(&members).clear();
    debug!(closed = connections.len(), "hub control loop exited");
}

fn remove_current(
    connections: &mut HashMap<UserId, ClientConnection>,
    members: &Membership,
    handle: ConnectionHandle,
) -> bool {
    let is_current = connections
        .get(&handle.user_id)
        .is_some_and(|c| c.connection_id() == handle.connection_id);
    if !is_current {
        return false;
    }

    if let Some(connection) = connections.remove(&handle.user_id) {
        connection.close();
    }
    write_members(members).remove(&handle.user_id);
    true
}

fn write_members(
    members: &Membership,
) -> std::sync::RwLockWriteGuard<'_, HashMap<UserId, Arc<Outbound>>> {
    members.write().unwrap_or_else(PoisonError::into_inner)
}
