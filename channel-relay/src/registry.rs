//! Connection and channel membership shared by every connection task.
//!
//! All state sits behind one `RwLock`. Broadcasts snapshot the subscriber set
//! under the read lock and write to sockets after releasing it, so a slow
//! subscriber never holds up membership changes. Subscribe, register and
//! remove take the write lock.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionId};

type Subscribers = HashMap<ConnectionId, Arc<Connection>>;

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Arc<Connection>>,
    // Empty entries are kept once a channel has been named.
    channels: HashMap<String, Subscribers>,
}

/// Per-call delivery summary returned by [`Registry::broadcast`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
    write_timeout: Option<Duration>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds each subscriber write during a broadcast.
    pub fn with_write_timeout(write_timeout: Option<Duration>) -> Self {
        Self {
            state: RwLock::default(),
            write_timeout,
        }
    }

    pub async fn register(&self, conn: Arc<Connection>) {
        let mut state = self.state.write().await;
        state.connections.insert(conn.id(), conn);
    }

    /// Adds `conn` to `channel`, creating the channel if needed.
    ///
    /// Returns `true` if the connection was not already subscribed.
    pub async fn subscribe(&self, channel: &str, conn: &Arc<Connection>) -> bool {
        let mut state = self.state.write().await;
        let subscribers = state.channels.entry(channel.to_string()).or_default();
        let added = subscribers.insert(conn.id(), Arc::clone(conn)).is_none();
        if added {
            info!(peer = %conn.peer(), %channel, "client subscribed");
        }
        added
    }

    /// Drops `id` from the live set and from every channel in one step.
    pub async fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut state = self.state.write().await;
        for subscribers in state.channels.values_mut() {
            subscribers.remove(&id);
        }
        state.connections.remove(&id)
    }

    /// Sends `payload` to every subscriber of `channel` except `sender`.
    ///
    /// Failed writes are logged and counted; they never stop the fan-out and
    /// never unsubscribe the failing connection.
    pub async fn broadcast(
        &self,
        channel: &str,
        payload: &str,
        sender: ConnectionId,
    ) -> BroadcastOutcome {
        let recipients: Vec<Arc<Connection>> = {
            let state = self.state.read().await;
            match state.channels.get(channel) {
                Some(subscribers) => subscribers
                    .values()
                    .filter(|conn| conn.id() != sender)
                    .cloned()
                    .collect(),
                None => Vec::new(),
            }
        };

        let mut outcome = BroadcastOutcome::default();
        for conn in recipients {
            match conn.send_line(payload, self.write_timeout).await {
                Ok(()) => outcome.delivered += 1,
                Err(error) => {
                    warn!(peer = %conn.peer(), %channel, ?error, "failed to deliver broadcast");
                    outcome.failed += 1;
                }
            }
        }

        debug!(
            %channel,
            delivered = outcome.delivered,
            failed = outcome.failed,
            "broadcast complete"
        );
        outcome
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    pub async fn channel_count(&self) -> usize {
        self.state.read().await.channels.len()
    }

    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.state
            .read()
            .await
            .channels
            .get(channel)
            .map_or(0, HashMap::len)
    }

    pub async fn is_subscribed(&self, channel: &str, id: ConnectionId) -> bool {
        self.state
            .read()
            .await
            .channels
            .get(channel)
            .is_some_and(|subscribers| subscribers.contains_key(&id))
    }
}
