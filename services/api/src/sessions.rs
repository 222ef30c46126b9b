//! Session Registry
//!
//! Tracks live tutoring sessions in process memory. Each session owns its
//! own persona state machine; the registry only hands out shared references
//! to it so the REST API and the WebSocket loop see the same state. At most
//! one WebSocket connection is attached to a session at a time. Nothing is
//! persisted: a session lives until its connection closes, it is deleted, or
//! it expires without ever being attached.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use teachback_core::agent::{TutorState, UsageSummary};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

/// Held by the connection serving a session; released when it disconnects.
pub type Attachment = OwnedMutexGuard<()>;

/// A live session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub tutor_state: Arc<Mutex<TutorState>>,
    attachment: Arc<Mutex<()>>,
}

/// A point-in-time copy of a session's state.
#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub state: TutorState,
}

impl SessionHandle {
    pub async fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            created_at: self.created_at,
            state: self.tutor_state.lock().await.clone(),
        }
    }

    /// Claims the session for one connection. `None` while another connection holds it.
    pub fn attach(&self) -> Option<Attachment> {
        self.attachment.clone().try_lock_owned().ok()
    }

    pub fn is_attached(&self) -> bool {
        self.attachment.try_lock().is_err()
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session in the greeter mode.
    pub async fn create(&self) -> SessionHandle {
        let handle = SessionHandle {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            tutor_state: Arc::new(Mutex::new(TutorState::default())),
            attachment: Arc::new(Mutex::new(())),
        };
        self.sessions
            .write()
            .await
            .insert(handle.id, handle.clone());
        handle
    }

    pub async fn get(&self, id: Uuid) -> Option<SessionHandle> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Snapshots of every live session, oldest first.
    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let handles: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(handles.len());
        for handle in handles {
            snapshots.push(handle.snapshot().await);
        }
        snapshots.sort_by_key(|s| s.created_at);
        snapshots
    }

    pub async fn remove(&self, id: Uuid) -> Option<SessionHandle> {
        self.sessions.write().await.remove(&id)
    }

    /// Drops sessions older than `max_age` that no connection is attached to.
    /// Returns how many were removed.
    pub async fn expire_unattached(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, handle| {
            let age = (now - handle.created_at).to_std().unwrap_or_default();
            handle.is_attached() || age < max_age
        });
        before - sessions.len()
    }

    /// Periodically expires sessions that were created but never attached.
    pub fn spawn_expiry(self: &Arc<Self>, max_age: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let period = (max_age / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let expired = registry.expire_unattached(max_age).await;
                if expired > 0 {
                    info!(expired, "Expired sessions that were never attached");
                }
            }
        })
    }

    /// Usage summed over every live session.
    pub async fn total_usage(&self) -> UsageSummary {
        let mut total = UsageSummary::default();
        for snapshot in self.list().await {
            total += snapshot.state.usage;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teachback_core::mode::Mode;

    #[tokio::test]
    async fn test_new_sessions_start_in_greeter() {
        let registry = SessionRegistry::new();
        let handle = registry.create().await;
        assert_eq!(handle.snapshot().await.state.mode, Mode::Greeter);
        assert!(registry.get(handle.id).await.is_some());
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let registry = SessionRegistry::new();
        let first = registry.create().await;
        let second = registry.create().await;

        first.tutor_state.lock().await.switch("quiz").unwrap();

        assert_eq!(first.snapshot().await.state.mode, Mode::Quiz);
        assert_eq!(second.snapshot().await.state.mode, Mode::Greeter);
    }

    #[tokio::test]
    async fn test_handles_share_state() {
        let registry = SessionRegistry::new();
        let handle = registry.create().await;
        let looked_up = registry.get(handle.id).await.unwrap();

        looked_up.tutor_state.lock().await.switch("learn").unwrap();

        assert_eq!(handle.snapshot().await.state.mode, Mode::Learn);
    }

    #[tokio::test]
    async fn test_remove_and_list() {
        let registry = SessionRegistry::new();
        let first = registry.create().await;
        let second = registry.create().await;
        assert_eq!(registry.list().await.len(), 2);

        assert!(registry.remove(first.id).await.is_some());
        assert!(registry.remove(first.id).await.is_none());

        let remaining = registry.list().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, second.id);
    }

    #[tokio::test]
    async fn test_total_usage() {
        let registry = SessionRegistry::new();
        let first = registry.create().await;
        let second = registry.create().await;
        first.tutor_state.lock().await.usage.turns = 2;
        second.tutor_state.lock().await.usage.turns = 3;
        second.tutor_state.lock().await.switch("quiz").unwrap();

        let total = registry.total_usage().await;
        assert_eq!(total.turns, 5);
        assert_eq!(total.handoffs, 1);
    }

    #[tokio::test]
    async fn test_only_one_attachment_at_a_time() {
        let registry = SessionRegistry::new();
        let handle = registry.create().await;

        let first = handle.attach().unwrap();
        assert!(handle.is_attached());
        assert!(registry.get(handle.id).await.unwrap().attach().is_none());

        drop(first);
        assert!(!handle.is_attached());
        assert!(handle.attach().is_some());
    }

    #[tokio::test]
    async fn test_expire_unattached_keeps_attached_and_recent_sessions() {
        let registry = SessionRegistry::new();
        let idle = registry.create().await;
        let busy = registry.create().await;
        let _attachment = busy.attach().unwrap();

        assert_eq!(registry.expire_unattached(Duration::from_secs(600)).await, 0);
        assert_eq!(registry.expire_unattached(Duration::ZERO).await, 1);

        assert!(registry.get(idle.id).await.is_none());
        assert!(registry.get(busy.id).await.is_some());
    }
}
