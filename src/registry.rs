//! Live session table for the server.
//!
//! The registry is owned by the [`Server`](crate::server::Server) and handed
//! to each worker behind an `Arc`. Workers hold a [`SessionGuard`] so the
//! entry disappears exactly when the worker (and with it the socket) is gone.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::AbortHandle;
use tracing::{debug, info};

/// Server-side identity of one connected client
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub peer: SocketAddr,
    pub established_at: DateTime<Local>,
}

struct Entry {
    session: Session,
    closer: Option<AbortHandle>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Entry>>,
}

/// Candidate id: host and port with every non-alphanumeric character dropped.
pub fn base_id(peer: &SocketAddr) -> String {
    format!("{}{}", peer.ip(), peer.port())
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new session, suffixing random digits until the id is free.
    pub fn register(&self, peer: SocketAddr) -> Session {
        let mut sessions = self.sessions.lock();
        let mut id = base_id(&peer);
        let mut rng = rand::thread_rng();
        while sessions.contains_key(&id) {
            id.push(char::from(b'0' + rng.gen_range(0..10u8)));
        }
        let session = Session {
            id: id.clone(),
            peer,
            established_at: Local::now(),
        };
        sessions.insert(
            id,
            Entry {
                session: session.clone(),
                closer: None,
            },
        );
        info!(session = %session.id, peer = %peer, "client connected");
        session
    }

    /// Remember how to close the session's connection. Returns false when
    /// the session already ended.
    pub fn attach(&self, id: &str, closer: AbortHandle) -> bool {
        match self.sessions.lock().get_mut(id) {
            Some(entry) => {
                entry.closer = Some(closer);
                true
            }
            None => false,
        }
    }

    /// Remove a session; removing an unknown id is a no-op.
    pub fn unregister(&self, id: &str) -> Option<Session> {
        let removed = self.sessions.lock().remove(id).map(|e| e.session);
        if let Some(s) = &removed {
            info!(session = %s.id, peer = %s.peer, "client disconnected");
        }
        removed
    }

    /// Close every registered connection and empty the table.
    pub fn disconnect_all(&self) -> usize {
        let drained: Vec<Entry> = self.sessions.lock().drain().map(|(_, e)| e).collect();
        for entry in &drained {
            if let Some(closer) = &entry.closer {
                closer.abort();
            }
            debug!(session = %entry.session.id, "closing session");
        }
        drained.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the live sessions, oldest first
    pub fn sessions(&self) -> Vec<Session> {
        let mut out: Vec<Session> = self
            .sessions
            .lock()
            .values()
            .map(|e| e.session.clone())
            .collect();
        out.sort_by_key(|s| s.established_at);
        out
    }
}

/// Unregisters its session when dropped, whichever way the worker exits.
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    id: String,
}

impl SessionGuard {
    pub fn new(registry: Arc<SessionRegistry>, id: impl Into<String>) -> Self {
        Self {
            registry,
            id: id.into(),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.id);
    }
}
