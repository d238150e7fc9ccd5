//! Realtime connection hub
//!
//! Tracks open WebSocket connections per user and fans accepted
//! operations out to the user's other devices. Delivery is best-effort
//! and fire-and-forget; a connection whose channel has closed is simply
//! skipped until its socket task deregisters it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// One registered device connection
struct Connection {
    id: Uuid,
    device_id: String,
    sender: mpsc::UnboundedSender<String>,
}

/// Registry of live connections, keyed by user id
#[derive(Clone)]
pub struct ConnectionHub {
    inner: Arc<ConnectionHubInner>,
}

struct ConnectionHubInner {
    connections: RwLock<HashMap<i64, Vec<Connection>>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ConnectionHubInner {
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a device connection; messages for it arrive on `sender`.
    ///
    /// Returns the connection id to pass back to [`deregister`] when the
    /// socket closes. A device may hold several connections at once.
    ///
    /// [`deregister`]: ConnectionHub::deregister
    pub async fn register(
        &self,
        user_id: i64,
        device_id: &str,
        sender: mpsc::UnboundedSender<String>,
    ) -> Uuid {
        let id = Uuid::new_v4();

        let mut connections = self.inner.connections.write().await;
        connections.entry(user_id).or_default().push(Connection {
            id,
            device_id: device_id.to_string(),
            sender,
        });

        tracing::info!(
            user_id = user_id,
            device_id = %device_id,
            "WebSocket connection registered"
        );

        id
    }

    /// Remove a connection after its socket closes
    pub async fn deregister(&self, user_id: i64, connection_id: Uuid) {
        let mut connections = self.inner.connections.write().await;

        if let Some(list) = connections.get_mut(&user_id) {
            list.retain(|c| c.id != connection_id);
            if list.is_empty() {
                connections.remove(&user_id);
            }
        }

        tracing::info!(user_id = user_id, "WebSocket connection closed");
    }

    /// Send a message to every connection of a user, except those held by
    /// `exclude_device` (normally the device that caused the message)
    pub async fn publish(&self, user_id: i64, message: &str, exclude_device: Option<&str>) {
        let connections = self.inner.connections.read().await;

        let Some(list) = connections.get(&user_id) else {
            return;
        };

        let mut delivered = 0;
        for connection in list {
            if exclude_device == Some(connection.device_id.as_str()) {
                continue;
            }
            if connection.sender.send(message.to_string()).is_ok() {
                delivered += 1;
            }
        }

        if delivered > 0 {
            tracing::debug!(
                user_id = user_id,
                delivered = delivered,
                "Pushed operation to connected devices"
            );
        }
    }

    /// Number of open connections for a user
    pub async fn connection_count(&self, user_id: i64) -> usize {
        let connections = self.inner.connections.read().await;
        connections.get(&user_id).map(|l| l.len()).unwrap_or(0)
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}
