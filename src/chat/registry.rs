//! Registry of active chat sessions.
//!
//! The registry is constructed once and shared with every session. It holds
//! non-owning references in join order; a single mutex covers inserts,
//! removals and broadcast snapshots, so a broadcast never sees a session
//! half-added or half-removed.

use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use super::session::Session;

#[derive(Debug)]
struct Entry {
    id: Uuid,
    session: Weak<Session>,
}

/// Shared, ordered collection of active sessions.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Mutex<Vec<Entry>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a session.
    ///
    /// Returns the number of participants that were present before it.
    /// Inserting the same session twice is a caller error; the duplicate is
    /// logged and ignored so identities stay unique.
    pub async fn insert(&self, session: &Arc<Session>) -> usize {
        self.insert_with(session, |_| {}).await
    }

    /// Append a session and run `on_insert` with the number of participants
    /// present before it, while the registry is still locked.
    ///
    /// No broadcast can reach the new session until `on_insert` returns.
    pub async fn insert_with<F>(&self, session: &Arc<Session>, on_insert: F) -> usize
    where
        F: FnOnce(usize),
    {
        let mut entries = self.entries.lock().await;
        prune(&mut entries);
        let before = entries.len();
        if entries.iter().any(|entry| entry.id == session.id()) {
            warn!("Session {} inserted into registry twice", session.id());
            return before - 1;
        }
        on_insert(before);
        entries.push(Entry {
            id: session.id(),
            session: Arc::downgrade(session),
        });
        debug!(
            "Registered session {} (total: {})",
            session.id(),
            entries.len()
        );
        before
    }

    /// Remove a session by identity.
    ///
    /// Returns true if the session was present.
    pub async fn remove(&self, session: &Session) -> bool {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|entry| entry.id != session.id());
        let removed = entries.len() != before;
        if removed {
            debug!(
                "Unregistered session {} (total: {})",
                session.id(),
                entries.len()
            );
        }
        removed
    }

    /// Take a consistent snapshot of the current participants, optionally
    /// excluding one session.
    ///
    /// The registry stays locked while the snapshot is alive, so inserts and
    /// removals wait until the caller has finished iterating.
    pub async fn snapshot_targets(&self, excluding: Option<Uuid>) -> Targets<'_> {
        let mut guard = self.entries.lock().await;
        prune(&mut guard);
        let sessions = guard
            .iter()
            .filter(|entry| Some(entry.id) != excluding)
            .filter_map(|entry| entry.session.upgrade())
            .collect();
        Targets {
            _guard: guard,
            sessions,
        }
    }

    /// Get the display names of all participants in join order.
    ///
    /// Sessions without a name (or with an empty one) are omitted.
    pub async fn list(&self) -> Vec<String> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .filter_map(|entry| entry.session.upgrade())
            .filter_map(|session| session.name().map(str::to_string))
            .filter(|name| !name.is_empty())
            .collect()
    }

    /// Get the number of participants.
    pub async fn len(&self) -> usize {
        let mut entries = self.entries.lock().await;
        prune(&mut entries);
        entries.len()
    }

    /// Check if the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Check if a session is registered.
    pub async fn contains(&self, id: Uuid) -> bool {
        self.entries.lock().await.iter().any(|entry| entry.id == id)
    }
}

/// Drop entries whose session no longer exists.
fn prune(entries: &mut Vec<Entry>) {
    entries.retain(|entry| {
        let alive = entry.session.strong_count() > 0;
        if !alive {
            debug!("Pruned dropped session {} from registry", entry.id);
        }
        alive
    });
}

/// A locked, ordered view of broadcast targets.
pub struct Targets<'a> {
    _guard: MutexGuard<'a, Vec<Entry>>,
    sessions: Vec<Arc<Session>>,
}

impl Targets<'_> {
    /// Iterate over the targets in join order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Session>> {
        self.sessions.iter()
    }

    /// Get the number of targets.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if there are no targets.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Get the target session IDs in order.
    #[cfg(test)]
    pub fn ids(&self) -> Vec<Uuid> {
        self.sessions.iter().map(|session| session.id()).collect()
    }
}
