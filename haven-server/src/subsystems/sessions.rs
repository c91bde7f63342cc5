//! Call session registry.
//!
//! Process-scoped map from the carrier's `CallSid` to live conversational
//! state. The store-level `RwLock` guards only map insertion/lookup/removal;
//! each session carries its own `tokio::sync::Mutex` so mutation is
//! serialized per call without unrelated calls contending. Sessions are
//! purely in-memory — one authoritative process per deployment.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use haven_core::models::session::{CallSession, Phase};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

pub type SharedSession = Arc<Mutex<CallSession>>;

#[derive(Default)]
pub struct CallSessionStore {
    inner: RwLock<HashMap<String, SharedSession>>,
}

/// Read-only view of one session for the monitoring endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub call_sid: String,
    pub phase: Phase,
    pub message_count: usize,
    pub user_turn_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl CallSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the session for `call_sid`, creating it in `Greeting` if absent.
    /// Concurrent first-touch from retried webhooks yields exactly one
    /// created session: the entry is resolved under the write lock.
    pub async fn get_or_create(&self, call_sid: &str) -> SharedSession {
        {
            let map = self.inner.read().await;
            if let Some(session) = map.get(call_sid) {
                return session.clone();
            }
        }

        let mut map = self.inner.write().await;
        map.entry(call_sid.to_string())
            .or_insert_with(|| {
                tracing::info!(call_sid = %call_sid, "Created new call session");
                Arc::new(Mutex::new(CallSession::new(call_sid)))
            })
            .clone()
    }

    pub async fn get(&self, call_sid: &str) -> Option<SharedSession> {
        self.inner.read().await.get(call_sid).cloned()
    }

    /// Remove a session. Returns `false` when the call was unknown, which
    /// callers treat as a no-op rather than an error.
    pub async fn remove(&self, call_sid: &str) -> bool {
        let removed = self.inner.write().await.remove(call_sid).is_some();
        if removed {
            tracing::info!(call_sid = %call_sid, "Removed call session");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Snapshot all live sessions for monitoring. Each session lock is taken
    /// briefly after the map lock is released.
    pub async fn snapshot(&self) -> Vec<SessionSummary> {
        let sessions: Vec<SharedSession> =
            self.inner.read().await.values().cloned().collect();

        let mut summaries = Vec::with_capacity(sessions.len());
        for session in sessions {
            let s = session.lock().await;
            summaries.push(SessionSummary {
                call_sid: s.call_sid.clone(),
                phase: s.phase,
                message_count: s.turns.len(),
                user_turn_count: s.user_turn_count,
                created_at: s.created_at,
                last_activity_at: s.last_activity_at,
            });
        }
        summaries
    }

    /// Evict sessions whose last activity is older than `idle_for`. Covers
    /// calls whose terminal status callback never arrived.
    pub async fn evict_idle(&self, idle_for: Duration) -> usize {
        let cutoff = Utc::now() - idle_for;

        let candidates: Vec<(String, SharedSession)> = self
            .inner
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut stale = Vec::new();
        for (call_sid, session) in candidates {
            let s = session.lock().await;
            if s.last_activity_at < cutoff {
                stale.push(call_sid);
            }
        }

        let mut map = self.inner.write().await;
        let mut evicted = 0;
        for call_sid in stale {
            if map.remove(&call_sid).is_some() {
                tracing::info!(call_sid = %call_sid, "Evicted idle call session");
                evicted += 1;
            }
        }
        evicted
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // TEST 1: get_or_create creates once, then returns the same instance
    // ========================================================================
    #[tokio::test]
    async fn test_get_or_create_returns_same_instance() {
        let store = CallSessionStore::new();
        let a = store.get_or_create("CA1").await;
        let b = store.get_or_create("CA1").await;
        assert!(Arc::ptr_eq(&a, &b), "Both callers must see one session");
        assert_eq!(store.len().await, 1);
    }

    // ========================================================================
    // TEST 2: concurrent first-touch yields exactly one session
    // ========================================================================
    #[tokio::test]
    async fn test_concurrent_first_touch_creates_exactly_one_session() {
        let store = Arc::new(CallSessionStore::new());

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.get_or_create("CA-race").await
            }));
        }

        let mut sessions = Vec::new();
        for handle in handles {
            sessions.push(handle.await.expect("task panicked"));
        }

        assert_eq!(store.len().await, 1, "Exactly one session must exist");
        let first = &sessions[0];
        for other in &sessions[1..] {
            assert!(
                Arc::ptr_eq(first, other),
                "All concurrent callers must observe the same instance"
            );
        }
    }

    // ========================================================================
    // TEST 3: remove is idempotent — second call reports unknown
    // ========================================================================
    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = CallSessionStore::new();
        store.get_or_create("CA1").await;

        assert!(store.remove("CA1").await);
        assert!(!store.remove("CA1").await, "Second remove must be a no-op");
        assert!(store.is_empty().await);
    }

    // ========================================================================
    // TEST 4: get does not create
    // ========================================================================
    #[tokio::test]
    async fn test_get_does_not_create() {
        let store = CallSessionStore::new();
        assert!(store.get("CA-unknown").await.is_none());
        assert!(store.is_empty().await);
    }

    // ========================================================================
    // TEST 5: evict_idle removes only stale sessions
    // ========================================================================
    #[tokio::test]
    async fn test_evict_idle_removes_only_stale_sessions() {
        let store = CallSessionStore::new();
        let stale = store.get_or_create("CA-stale").await;
        store.get_or_create("CA-fresh").await;

        {
            let mut s = stale.lock().await;
            s.last_activity_at = Utc::now() - Duration::minutes(90);
        }

        let evicted = store.evict_idle(Duration::minutes(30)).await;
        assert_eq!(evicted, 1);
        assert!(store.get("CA-stale").await.is_none());
        assert!(store.get("CA-fresh").await.is_some());
    }

    // ========================================================================
    // TEST 6: snapshot reflects per-session counters
    // ========================================================================
    #[tokio::test]
    async fn test_snapshot_reports_counts() {
        use haven_core::models::session::Role;

        let store = CallSessionStore::new();
        let session = store.get_or_create("CA1").await;
        {
            let mut s = session.lock().await;
            s.push_turn(Role::Assistant, "Hello!");
            s.push_turn(Role::User, "hi");
        }

        let summaries = store.snapshot().await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].call_sid, "CA1");
        assert_eq!(summaries[0].message_count, 2);
        assert_eq!(summaries[0].user_turn_count, 1);
    }
}
