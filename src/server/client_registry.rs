use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

/// One connected WebSocket session.
#[derive(Debug, Clone)]
pub struct ClientState {
    pub client_id: Uuid,
    pub peer: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
}

/// Live WebSocket subscribers, keyed by a per-connection id.
#[derive(Default, Debug)]
pub struct ConnectedClients {
    clients: DashMap<Uuid, ClientState>,
}

impl ConnectedClients {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, peer: Option<SocketAddr>) -> ClientState {
        let state = ClientState {
            client_id: Uuid::new_v4(),
            peer,
            connected_at: Utc::now(),
        };
        self.clients.insert(state.client_id, state.clone());
        state
    }

    /// Removes the client; returns `false` if it was already gone.
    pub fn remove(&self, client_id: &Uuid) -> bool {
        self.clients.remove(client_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn list(&self) -> Vec<ClientState> {
        self.clients.iter().map(|entry| entry.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_remove() {
        let clients = ConnectedClients::new();
        assert!(clients.is_empty());

        let a = clients.register(None);
        let b = clients.register(Some("10.0.0.5:41000".parse().unwrap()));
        assert_ne!(a.client_id, b.client_id);
        assert_eq!(clients.len(), 2);

        assert!(clients.remove(&a.client_id));
        assert!(!clients.remove(&a.client_id));
        assert_eq!(clients.len(), 1);
        assert_eq!(clients.list()[0].peer, b.peer);
    }
}
