use super::types::{FormState, Language, LanguagePolicy, Session};
use crate::forms::types::FormKind;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot = Arc<AsyncMutex<Session>>;

/// Exclusive access to one user's session for the duration of a turn.
///
/// Dropping the guard ends the critical section; writes made through it are
/// the `put` of the turn.
pub struct SessionGuard {
    inner: OwnedMutexGuard<Session>,
}

impl SessionGuard {
    /// Replace the stored session wholesale.
    pub fn put(&mut self, session: Session) {
        *self.inner = session;
    }

    /// Remove the active form under the given language policy.
    pub fn clear(&mut self, policy: LanguagePolicy) -> Option<FormState> {
        self.inner.end_form(policy)
    }
}

impl Deref for SessionGuard {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.inner
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.inner
    }
}

/// A form abandoned by the idle sweeper.
#[derive(Debug, Clone)]
pub struct ExpiredForm {
    pub user_id: String,
    pub reply_to: Option<String>,
    pub language: Language,
    pub kind: FormKind,
}

/// Concurrency-safe map of user id to session.
///
/// The outer lock is held only to find or create a user's slot. The per-user
/// async mutex is the critical section for a whole turn, so one user's slow
/// gateway call never blocks another user.
pub struct SessionStore {
    slots: Mutex<HashMap<String, Slot>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, user_id: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(Session::new(user_id, Utc::now()))))
            .clone()
    }

    /// Enter the per-user critical section, creating the session on first contact.
    pub async fn lock(&self, user_id: &str) -> SessionGuard {
        let slot = self.slot(user_id);
        SessionGuard {
            inner: slot.lock_owned().await,
        }
    }

    /// Snapshot of a user's session. Never fails; unknown users get a fresh session.
    pub async fn get(&self, user_id: &str) -> Session {
        self.lock(user_id).await.clone()
    }

    /// Atomically replace a user's session.
    pub async fn put(&self, user_id: &str, session: Session) {
        self.lock(user_id).await.put(session);
    }

    /// Remove a user's active form. Returns it if there was one.
    pub async fn clear(&self, user_id: &str, policy: LanguagePolicy) -> Option<FormState> {
        self.lock(user_id).await.clear(policy)
    }

    /// Number of known users.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn all_slots(&self) -> Vec<(String, Slot)> {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Cancel forms whose last activity is older than `max_idle`.
    ///
    /// Each session is inspected under its own lock. A session whose lock is
    /// held is mid-turn and therefore not idle, so it is skipped.
    pub fn expire_idle(
        &self,
        now: DateTime<Utc>,
        max_idle: chrono::Duration,
        policy: LanguagePolicy,
    ) -> Vec<ExpiredForm> {
        let mut expired = Vec::new();
        for (user_id, slot) in self.all_slots() {
            let Ok(mut session) = slot.try_lock_owned() else {
                continue;
            };
            if session.is_idle() || now - session.last_activity < max_idle {
                continue;
            }
            let language = session.language();
            if let Some(form) = session.end_form(policy) {
                tracing::info!(user_id = %user_id, form = %form.kind, "form expired after inactivity");
                expired.push(ExpiredForm {
                    user_id,
                    reply_to: session.reply_to.clone(),
                    language,
                    kind: form.kind,
                });
            }
        }
        expired
    }

    /// Forget idle sessions without a form that have been silent for `ttl`.
    ///
    /// A slot is only dropped when nobody else holds a handle to it, so a
    /// waiting turn never ends up writing into an orphaned session.
    pub fn prune(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let before = slots.len();
        slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(session) => !(session.is_idle() && now - session.last_activity >= ttl),
                Err(_) => true,
            }
        });
        before - slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::Stage;

    fn active_form() -> FormState {
        FormState::new(FormKind::Complaint, Stage::Collecting { field: 0 }, Utc::now())
    }

    #[tokio::test]
    async fn get_unknown_user_returns_fresh_session() {
        let store = SessionStore::new();
        let s = store.get("7").await;
        assert_eq!(s.user_id, "7");
        assert!(s.is_idle());
        assert!(s.language.is_none());
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = SessionStore::new();
        let mut s = store.get("7").await;
        s.language = Some(Language::Hindi);
        s.active_form = Some(active_form());
        store.put("7", s).await;

        let back = store.get("7").await;
        assert_eq!(back.language, Some(Language::Hindi));
        assert!(back.active_form.is_some());
    }

    #[tokio::test]
    async fn clear_removes_form_and_retains_language() {
        let store = SessionStore::new();
        {
            let mut guard = store.lock("7").await;
            guard.language = Some(Language::Nepali);
            guard.active_form = Some(active_form());
        }
        let removed = store.clear("7", LanguagePolicy::Retain).await;
        assert!(removed.is_some());
        let s = store.get("7").await;
        assert!(s.is_idle());
        assert_eq!(s.language, Some(Language::Nepali));
    }

    #[tokio::test]
    async fn same_user_turns_are_serialized() {
        let store = Arc::new(SessionStore::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut guard = store.lock("u").await;
                let count = guard.reply_to.as_deref().map_or(0, |c| c.parse::<u32>().unwrap_or(0));
                tokio::task::yield_now().await;
                guard.reply_to = Some((count + 1).to_string());
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.get("u").await.reply_to.as_deref(), Some("50"));
    }

    #[tokio::test]
    async fn different_users_do_not_block_each_other() {
        let store = SessionStore::new();
        let _held = store.lock("a").await;
        let other = tokio::time::timeout(std::time::Duration::from_millis(200), store.lock("b")).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn expire_idle_cancels_only_stale_forms() {
        let store = SessionStore::new();
        let now = Utc::now();
        {
            let mut stale = store.lock("stale").await;
            stale.active_form = Some(active_form());
            stale.reply_to = Some("chat-1".into());
            stale.last_activity = now - chrono::Duration::minutes(45);
        }
        {
            let mut fresh = store.lock("fresh").await;
            fresh.active_form = Some(active_form());
            fresh.last_activity = now;
        }

        let expired = store.expire_idle(now, chrono::Duration::minutes(30), LanguagePolicy::Retain);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].user_id, "stale");
        assert_eq!(expired[0].reply_to.as_deref(), Some("chat-1"));
        assert!(store.get("stale").await.is_idle());
        assert!(!store.get("fresh").await.is_idle());
    }

    #[tokio::test]
    async fn expire_idle_skips_sessions_mid_turn() {
        let store = SessionStore::new();
        let now = Utc::now();
        let mut busy = store.lock("busy").await;
        busy.active_form = Some(active_form());
        busy.last_activity = now - chrono::Duration::hours(2);

        let expired = store.expire_idle(now, chrono::Duration::minutes(30), LanguagePolicy::Retain);
        assert!(expired.is_empty());
        assert!(busy.active_form.is_some());
    }

    #[tokio::test]
    async fn prune_drops_silent_idle_sessions() {
        let store = SessionStore::new();
        let now = Utc::now();
        {
            let mut old = store.lock("old").await;
            old.last_activity = now - chrono::Duration::days(2);
        }
        {
            let mut mid_form = store.lock("mid").await;
            mid_form.active_form = Some(active_form());
            mid_form.last_activity = now - chrono::Duration::days(2);
        }
        assert_eq!(store.prune(now, chrono::Duration::days(1)), 1);
        assert_eq!(store.len(), 1);
    }
}
