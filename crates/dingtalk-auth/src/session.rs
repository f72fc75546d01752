//! Persisted session and the shared authorization state.

use dash_storage::{LocalStorage, StorageKeys, StorageResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Notifications fired when the persisted session changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEvent {
    /// The stored user profile was set or cleared (`auth_user_updated`).
    UserUpdated,
}

/// A token plus the user profile it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: Option<Value>,
}

/// The token attached to every outbound authorized request.
///
/// Holds at most one token; the last write wins. Shared by reference into
/// every component that issues authorized calls.
#[derive(Debug, Default)]
pub struct AuthorizationState {
    token: RwLock<Option<String>>,
}

impl AuthorizationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single mutator: `Some(token)` attaches it, `None` detaches the current
    /// token. An empty token is ignored.
    pub fn apply(&self, token: Option<String>) {
        if matches!(token.as_deref(), Some("")) {
            return;
        }
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    pub fn set_token(&self, token: impl Into<String>) {
        self.apply(Some(token.into()));
    }

    pub fn clear(&self) {
        self.apply(None);
    }

    pub fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `Authorization` header value for the current token.
    pub fn bearer(&self) -> Option<String> {
        self.token().map(|token| format!("Bearer {}", token))
    }

    pub fn is_authorized(&self) -> bool {
        self.token().is_some()
    }
}

/// Durable session storage bound to the shared authorization state.
///
/// The store is the single source of truth for whether this client is
/// authenticated. Writes go to storage first and are then applied to the
/// [`AuthorizationState`], so a caller that observes a completed save can
/// issue authorized requests immediately.
pub struct SessionStore {
    storage: Box<dyn LocalStorage>,
    authorization: Arc<AuthorizationState>,
    events: broadcast::Sender<AuthEvent>,
}

impl SessionStore {
    pub fn new(storage: Box<dyn LocalStorage>, authorization: Arc<AuthorizationState>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            storage,
            authorization,
            events,
        }
    }

    pub fn authorization(&self) -> &Arc<AuthorizationState> {
        &self.authorization
    }

    /// Subscribe to session change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /// Persist a freshly issued session.
    ///
    /// Both keys are written before the token is attached or observers are
    /// notified. If the user write fails the previous token is put back and
    /// the authorization state is left untouched.
    pub fn save(&self, token: &str, user: Option<&Value>) -> StorageResult<()> {
        let user = user.map(serde_json::to_string).transpose()?;
        let previous_token = self.storage.get(StorageKeys::AUTH_TOKEN)?;

        self.storage.set(StorageKeys::AUTH_TOKEN, token)?;

        let user_written = match &user {
            Some(raw) => self.storage.set(StorageKeys::AUTH_USER, raw).map(|()| true),
            None => self.storage.remove(StorageKeys::AUTH_USER),
        };
        let user_changed = match user_written {
            Ok(changed) => changed,
            Err(e) => {
                self.rollback_token(previous_token);
                return Err(e);
            }
        };

        self.authorization.set_token(token);
        if user_changed {
            self.notify();
        }

        info!("Session saved");
        Ok(())
    }

    fn rollback_token(&self, previous: Option<String>) {
        let restored = match previous {
            Some(token) => self.storage.set(StorageKeys::AUTH_TOKEN, &token),
            None => self.storage.remove(StorageKeys::AUTH_TOKEN).map(|_| ()),
        };
        if let Err(e) = restored {
            warn!(error = %e, "Failed to roll back stored token");
        }
    }

    /// Replace the stored user profile, keeping the token.
    pub fn update_user(&self, user: &Value) -> StorageResult<()> {
        self.storage
            .set(StorageKeys::AUTH_USER, &serde_json::to_string(user)?)?;
        self.notify();
        debug!("Stored user profile updated");
        Ok(())
    }

    /// Drop the session: storage, authorization header, observers.
    ///
    /// The authorization header is detached even if storage fails.
    pub fn clear(&self) -> StorageResult<()> {
        self.authorization.clear();
        for key in StorageKeys::SESSION_KEYS {
            self.storage.remove(key)?;
        }
        self.notify();
        info!("Session cleared");
        Ok(())
    }

    /// Stored token, if any. Empty values count as absent.
    pub fn stored_token(&self) -> StorageResult<Option<String>> {
        Ok(self
            .storage
            .get(StorageKeys::AUTH_TOKEN)?
            .filter(|token| !token.is_empty()))
    }

    /// Stored user profile. An unreadable profile is treated as absent.
    pub fn stored_user(&self) -> StorageResult<Option<Value>> {
        let Some(raw) = self.storage.get(StorageKeys::AUTH_USER)? else {
            return Ok(None);
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Null) => Ok(None),
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable stored user profile");
                Ok(None)
            }
        }
    }

    pub fn load(&self) -> StorageResult<Option<Session>> {
        let Some(token) = self.stored_token()? else {
            return Ok(None);
        };
        Ok(Some(Session {
            token,
            user: self.stored_user()?,
        }))
    }

    /// Load the stored session and attach its token.
    pub fn restore(&self) -> StorageResult<Option<Session>> {
        let session = self.load()?;
        if let Some(session) = &session {
            self.authorization.set_token(session.token.clone());
            info!("Session restored from storage");
        }
        Ok(session)
    }

    fn notify(&self) {
        // No receivers is fine.
        let _ = self.events.send(AuthEvent::UserUpdated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dash_storage::MemoryStorage;
    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;

    fn store() -> SessionStore {
        SessionStore::new(
            Box::new(MemoryStorage::new()),
            Arc::new(AuthorizationState::new()),
        )
    }

    #[test]
    fn test_authorization_state_last_write_wins() {
        let state = AuthorizationState::new();
        assert_eq!(state.bearer(), None);

        state.set_token("A");
        state.set_token("B");
        assert_eq!(state.bearer().as_deref(), Some("Bearer B"));

        state.apply(Some(String::new()));
        assert_eq!(state.token().as_deref(), Some("B"));

        state.clear();
        assert!(!state.is_authorized());
    }

    #[test]
    fn test_save_persists_and_applies() {
        let store = store();
        let mut events = store.subscribe();

        store.save("T1", Some(&json!({ "id": 7 }))).unwrap();

        assert_eq!(store.stored_token().unwrap().as_deref(), Some("T1"));
        assert_eq!(store.stored_user().unwrap(), Some(json!({ "id": 7 })));
        assert_eq!(store.authorization().bearer().as_deref(), Some("Bearer T1"));
        assert_eq!(events.try_recv().unwrap(), AuthEvent::UserUpdated);
        assert_eq!(events.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    /// Memory backend whose `auth_user` writes always fail.
    struct UserWriteFails(MemoryStorage);

    impl LocalStorage for UserWriteFails {
        fn set(&self, key: &str, value: &str) -> StorageResult<()> {
            if key == StorageKeys::AUTH_USER {
                return Err(dash_storage::StorageError::Backend("quota exceeded".to_string()));
            }
            self.0.set(key, value)
        }

        fn get(&self, key: &str) -> StorageResult<Option<String>> {
            self.0.get(key)
        }

        fn remove(&self, key: &str) -> StorageResult<bool> {
            self.0.remove(key)
        }
    }

    #[test]
    fn test_failed_user_write_leaves_no_session() {
        let store = SessionStore::new(
            Box::new(UserWriteFails(MemoryStorage::new())),
            Arc::new(AuthorizationState::new()),
        );
        let mut events = store.subscribe();

        assert!(store.save("T1", Some(&json!({ "id": 7 }))).is_err());

        assert_eq!(store.stored_token().unwrap(), None);
        assert!(!store.authorization().is_authorized());
        assert_eq!(events.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[test]
    fn test_failed_user_write_restores_previous_token() {
        let storage = UserWriteFails(MemoryStorage::new());
        storage.set(StorageKeys::AUTH_TOKEN, "OLD").unwrap();
        let store = SessionStore::new(Box::new(storage), Arc::new(AuthorizationState::new()));
        store.authorization().set_token("OLD");

        assert!(store.save("NEW", Some(&json!({ "id": 7 }))).is_err());

        assert_eq!(store.stored_token().unwrap().as_deref(), Some("OLD"));
        assert_eq!(store.authorization().token().as_deref(), Some("OLD"));
    }

    #[test]
    fn test_save_without_user_fires_nothing_when_no_profile() {
        let store = store();
        let mut events = store.subscribe();

        store.save("T1", None).unwrap();
        assert_eq!(store.stored_user().unwrap(), None);
        assert_eq!(events.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[test]
    fn test_clear_drops_everything() {
        let store = store();
        store.save("T1", Some(&json!({ "id": 7 }))).unwrap();
        let mut events = store.subscribe();

        store.clear().unwrap();

        assert_eq!(store.load().unwrap(), None);
        assert!(!store.authorization().is_authorized());
        assert_eq!(events.try_recv().unwrap(), AuthEvent::UserUpdated);
    }

    #[test]
    fn test_restore_applies_stored_token() {
        let storage = MemoryStorage::new();
        storage.set(StorageKeys::AUTH_TOKEN, "T9").unwrap();
        let store = SessionStore::new(Box::new(storage), Arc::new(AuthorizationState::new()));

        let session = store.restore().unwrap().unwrap();
        assert_eq!(session.token, "T9");
        assert_eq!(session.user, None);
        assert_eq!(store.authorization().token().as_deref(), Some("T9"));
    }

    #[test]
    fn test_unreadable_user_is_absent() {
        let storage = MemoryStorage::new();
        storage.set(StorageKeys::AUTH_TOKEN, "T1").unwrap();
        storage.set(StorageKeys::AUTH_USER, "{broken").unwrap();
        let store = SessionStore::new(Box::new(storage), Arc::new(AuthorizationState::new()));

        let session = store.load().unwrap().unwrap();
        assert_eq!(session.user, None);
    }

    #[test]
    fn test_update_user_notifies() {
        let store = store();
        store.save("T1", None).unwrap();
        let mut events = store.subscribe();

        store.update_user(&json!({ "id": 8, "name": "x" })).unwrap();
        assert_eq!(store.stored_user().unwrap().unwrap()["id"], 8);
        assert_eq!(store.stored_token().unwrap().as_deref(), Some("T1"));
        assert_eq!(events.try_recv().unwrap(), AuthEvent::UserUpdated);
    }
}
