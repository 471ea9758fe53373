//! In-memory registry of live WebSocket clients.
//!
//! The router is the only writer (accept, auth transition, close); fan-out
//! paths read. Senders are cloned out of the lock before any await so no
//! I/O happens inside a critical section.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use crate::router::protocol::ServerMessage;

/// What a socket has authenticated as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    Unauth,
    Producer,
    Consumer,
}

/// Per-socket metadata. The outbound sender feeds the socket's writer
/// task; a full queue drops the frame (best-effort fan-out).
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub client_id: String,
    pub role: ClientRole,
    pub user_id: Option<String>,
    pub hub_id: Option<String>,
    pub session_id: Option<String>,
    pub device_id: Option<String>,
    pub peer_ip: Option<String>,
    pub connected_at: i64,
    outbound: mpsc::Sender<ServerMessage>,
}

impl ClientInfo {
    pub fn new(
        client_id: String,
        peer_ip: Option<String>,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Self {
        Self {
            client_id,
            role: ClientRole::Unauth,
            user_id: None,
            hub_id: None,
            session_id: None,
            device_id: None,
            peer_ip,
            connected_at: vigil_core::db::unix_timestamp(),
            outbound,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.role != ClientRole::Unauth
    }
}

/// Thread-safe registry of live clients keyed by ephemeral client id.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<String, ClientInfo>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted socket.
    pub async fn register(&self, info: ClientInfo) {
        debug!(client_id = %info.client_id, "Client registered");
        self.clients
            .write()
            .await
            .insert(info.client_id.clone(), info);
    }

    /// Remove a client on socket close. Returns the last-known metadata.
    pub async fn unregister(&self, client_id: &str) -> Option<ClientInfo> {
        let info = self.clients.write().await.remove(client_id);
        if info.is_some() {
            debug!(client_id = %client_id, "Client unregistered");
        }
        info
    }

    /// Get a snapshot of a client's metadata.
    pub async fn get(&self, client_id: &str) -> Option<ClientInfo> {
        self.clients.read().await.get(client_id).cloned()
    }

    /// Mark a socket as an authenticated producer.
    pub async fn set_producer(
        &self,
        client_id: &str,
        user_id: &str,
        hub_id: &str,
        session_id: &str,
    ) {
        if let Some(info) = self.clients.write().await.get_mut(client_id) {
            info.role = ClientRole::Producer;
            info.user_id = Some(user_id.to_string());
            info.hub_id = Some(hub_id.to_string());
            info.session_id = Some(session_id.to_string());
            info!(client_id = %client_id, session_id = %session_id, "Producer authenticated");
        }
    }

    /// Mark a socket as an authenticated consumer.
    pub async fn set_consumer(&self, client_id: &str, user_id: &str, device_id: Option<&str>) {
        if let Some(info) = self.clients.write().await.get_mut(client_id) {
            info.role = ClientRole::Consumer;
            info.user_id = Some(user_id.to_string());
            info.device_id = device_id.map(ToString::to_string);
            info!(client_id = %client_id, user_id = %user_id, "Consumer authenticated");
        }
    }

    /// Send one frame to one client. Dropped silently when the client is
    /// gone or its queue is full.
    pub async fn send_to(&self, client_id: &str, message: ServerMessage) -> bool {
        let sender = {
            let clients = self.clients.read().await;
            clients.get(client_id).map(|c| c.outbound.clone())
        };

        match sender {
            Some(tx) => tx.send(message).await.is_ok(),
            None => false,
        }
    }

    /// Fan a frame out to every authenticated consumer of a user.
    /// Best-effort: frames to closed peers are dropped without affecting
    /// the rest. Returns the number of successful sends.
    pub async fn fan_out_to_consumers(&self, user_id: &str, message: &ServerMessage) -> usize {
        let senders: Vec<mpsc::Sender<ServerMessage>> = {
            let clients = self.clients.read().await;
            clients
                .values()
                .filter(|c| {
                    c.role == ClientRole::Consumer && c.user_id.as_deref() == Some(user_id)
                })
                .map(|c| c.outbound.clone())
                .collect()
        };

        let mut delivered = 0;
        for tx in senders {
            if tx.send(message.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Find the producer socket serving a session, scoped to one user
    /// (the consumer command authorization check).
    pub async fn find_producer_for_session(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Option<String> {
        let clients = self.clients.read().await;
        clients
            .values()
            .find(|c| {
                c.role == ClientRole::Producer
                    && c.session_id.as_deref() == Some(session_id)
                    && c.user_id.as_deref() == Some(user_id)
            })
            .map(|c| c.client_id.clone())
    }

    /// Snapshot of all live producer clients, for shutdown.
    pub async fn producers(&self) -> Vec<ClientInfo> {
        let clients = self.clients.read().await;
        clients
            .values()
            .filter(|c| c.role == ClientRole::Producer)
            .cloned()
            .collect()
    }

    /// Drop every client. Each socket's outbound queue closes, which ends
    /// its writer task. Used on shutdown.
    pub async fn close_all(&self) {
        let mut clients = self.clients.write().await;
        let count = clients.len();
        clients.clear();
        if count > 0 {
            info!(count, "Closed all client sockets");
        }
    }

    /// Live socket counts as (producers, consumers).
    pub async fn counts(&self) -> (usize, usize) {
        let clients = self.clients.read().await;
        let producers = clients
            .values()
            .filter(|c| c.role == ClientRole::Producer)
            .count();
        let consumers = clients
            .values()
            .filter(|c| c.role == ClientRole::Consumer)
            .count();
        (producers, consumers)
    }
}
