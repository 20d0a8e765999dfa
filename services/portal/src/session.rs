//! Session store: the single owner of "who is logged in"
//!
//! The store keeps the current [`Session`] in memory, mirrors it into
//! durable key-value storage under three keys written and cleared together,
//! and arms the expiry timer. Every other component reads the session
//! through the accessors here and never mutates it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, TimeDelta, Utc};
use common::storage::KeyValueStore;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{
    jwt,
    lifecycle::{Schedule, TokenLifecycle},
    models::{Identity, Role, RoleSet, Session},
    navigation::{Navigator, Redirect},
};

/// Storage key of the bearer token
pub const TOKEN_KEY: &str = "token";
/// Storage key of the JSON identity
pub const CURRENT_USER_KEY: &str = "currentUser";
/// Storage key of the RFC 3339 expiry timestamp
pub const TOKEN_EXPIRATION_KEY: &str = "tokenExpiration";

/// Result of restoring persisted state at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Nothing was persisted
    Anonymous,
    /// A valid session was installed
    Restored { username: String },
    /// The persisted session had expired and was cleared
    Expired,
    /// The persisted state was inconsistent and was cleared
    Malformed(String),
}

/// Identifier returned by [`SessionStore::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(Option<&Session>) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(SubscriptionId, Listener)>,
}

struct Inner {
    storage: Arc<dyn KeyValueStore>,
    navigator: Arc<dyn Navigator>,
    login_path: String,
    /// Serializes login, logout and expiry; reentrant so an expiry firing
    /// during installation can run on the same thread
    transition: ReentrantMutex<()>,
    current: RwLock<Option<Session>>,
    /// Bumped on every install and logout; expiry timers carry the epoch
    /// of the session they were armed for
    epoch: AtomicU64,
    lifecycle: TokenLifecycle,
    listeners: Mutex<Listeners>,
}

/// Session store handle. Clones share the same state.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl SessionStore {
    /// Create an anonymous store backed by `storage`
    ///
    /// `login_path` is where `logout` sends the navigator.
    pub fn new(
        storage: Arc<dyn KeyValueStore>,
        navigator: Arc<dyn Navigator>,
        login_path: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                navigator,
                login_path: login_path.into(),
                transition: ReentrantMutex::new(()),
                current: RwLock::new(None),
                epoch: AtomicU64::new(0),
                lifecycle: TokenLifecycle::new(),
                listeners: Mutex::new(Listeners::default()),
            }),
        }
    }

    /// Install the session persisted by a previous run, if still valid
    pub fn restore(&self) -> RestoreOutcome {
        let _transition = self.inner.transition.lock();
        let outcome = match self.read_persisted() {
            Ok(None) => RestoreOutcome::Anonymous,
            Ok(Some(session)) if session.is_expired_at(Utc::now()) => {
                info!(
                    "Persisted session for {} expired at {}",
                    session.username(),
                    session.expires_at
                );
                self.logout();
                RestoreOutcome::Expired
            }
            Ok(Some(session)) => {
                let username = session.username().to_string();
                info!("Restored session for {}", username);
                self.install(session);
                RestoreOutcome::Restored { username }
            }
            Err(reason) => {
                warn!("Discarding malformed persisted session: {}", reason);
                self.logout();
                RestoreOutcome::Malformed(reason)
            }
        };

        debug!("Session restore outcome: {:?}", outcome);
        outcome
    }

    /// Install a new session valid for `ttl`, replacing any previous one
    ///
    /// A non-positive `ttl` expires the session before this call returns.
    pub fn login(&self, identity: Identity, token: impl Into<String>, ttl: TimeDelta) {
        let expires_at = Utc::now() + ttl;
        self.login_until(identity, token, expires_at);
    }

    /// Install a new session expiring at `expires_at`
    pub fn login_until(
        &self,
        identity: Identity,
        token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) {
        let session = Session::new(identity, token, expires_at);
        info!(
            "Login for {} ({}), token valid until {}",
            session.username(),
            session.role(),
            expires_at
        );

        let _transition = self.inner.transition.lock();
        self.persist(&session);
        self.install(session);
    }

    /// End the current session
    ///
    /// Clears memory and storage, cancels the expiry timer and sends the
    /// navigator to the login path. Safe to call when already anonymous.
    pub fn logout(&self) {
        let _transition = self.inner.transition.lock();
        self.end_session();
    }

    /// Expiry timer callback; ignored unless `epoch` is still current
    fn expire(&self, epoch: u64) {
        let _transition = self.inner.transition.lock();
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Expiry for superseded session (epoch {}) ignored", epoch);
            return;
        }
        self.end_session();
    }

    fn end_session(&self) {
        self.inner.lifecycle.cancel();
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);

        let previous = self.inner.current.write().take();
        self.clear_persisted();

        match &previous {
            Some(session) => info!("Logout for {}", session.username()),
            None => debug!("Logout while anonymous"),
        }

        if previous.is_some() {
            self.notify(None);
        }
        self.inner
            .navigator
            .navigate(&Redirect::to(self.inner.login_path.clone()));
    }

    /// Current session, if any and not yet expired
    pub fn current(&self) -> Option<Session> {
        self.inner
            .current
            .read()
            .as_ref()
            .filter(|session| !session.is_expired_at(Utc::now()))
            .cloned()
    }

    /// Whether a session is current
    pub fn is_logged_in(&self) -> bool {
        self.current().is_some()
    }

    /// Bearer token of the current session
    pub fn token(&self) -> Option<String> {
        self.current().map(|session| session.token)
    }

    /// Role of the current session
    pub fn role(&self) -> Option<Role> {
        self.current().map(|session| session.role())
    }

    /// Whether the current role belongs to `roles`
    ///
    /// An empty set places no restriction and always passes.
    pub fn has_any_role(&self, roles: &RoleSet) -> bool {
        if roles.is_unrestricted() {
            return true;
        }
        self.role().is_some_and(|role| roles.permits(role))
    }

    /// Deadline of the pending expiry timer
    pub fn expiry_deadline(&self) -> Option<DateTime<Utc>> {
        self.inner.lifecycle.deadline()
    }

    /// Register a callback run after every session change
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(Option<&Session>) + Send + Sync + 'static,
    {
        let mut listeners = self.inner.listeners.lock();
        listeners.next_id += 1;
        let id = SubscriptionId(listeners.next_id);
        listeners.entries.push((id, Arc::new(listener)));
        id
    }

    /// Remove a callback. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.entries.len();
        listeners.entries.retain(|(entry, _)| *entry != id);
        listeners.entries.len() != before
    }

    fn install(&self, session: Session) {
        let expires_at = session.expires_at;
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *self.inner.current.write() = Some(session.clone());
        self.notify(Some(&session));

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let outcome = self.inner.lifecycle.schedule(expires_at, move || {
            if let Some(inner) = weak.upgrade() {
                SessionStore { inner }.expire(epoch);
            }
        });

        if outcome == Schedule::FiredImmediately {
            debug!("Session expired on installation");
        }
    }

    fn notify(&self, session: Option<&Session>) {
        // Snapshot so callbacks may subscribe or unsubscribe
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(session);
        }
    }

    fn persist(&self, session: &Session) {
        let identity = match serde_json::to_string(&session.identity) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize identity: {}", e);
                return;
            }
        };

        let storage = &self.inner.storage;
        let result = storage
            .set(TOKEN_KEY, &session.token)
            .and_then(|_| storage.set(CURRENT_USER_KEY, &identity))
            .and_then(|_| storage.set(TOKEN_EXPIRATION_KEY, &session.expires_at.to_rfc3339()));

        if let Err(e) = result {
            warn!("Failed to persist session, it will not survive a restart: {}", e);
        }
    }

    fn clear_persisted(&self) {
        for key in [TOKEN_KEY, CURRENT_USER_KEY, TOKEN_EXPIRATION_KEY] {
            if let Err(e) = self.inner.storage.remove(key) {
                warn!("Failed to clear persisted {}: {}", key, e);
            }
        }
    }

    fn read_persisted(&self) -> Result<Option<Session>, String> {
        let storage = &self.inner.storage;
        let read = |key: &str| {
            storage
                .get(key)
                .map_err(|e| format!("cannot read {key}: {e}"))
        };

        let token = read(TOKEN_KEY)?;
        let user = read(CURRENT_USER_KEY)?;
        let expiration = read(TOKEN_EXPIRATION_KEY)?;

        let (token, user) = match (token, user) {
            (None, None) if expiration.is_none() => return Ok(None),
            (Some(token), Some(user)) => (token, user),
            _ => return Err("partial session state".to_string()),
        };

        let identity: Identity =
            serde_json::from_str(&user).map_err(|e| format!("corrupt {CURRENT_USER_KEY}: {e}"))?;

        let expires_at = match expiration {
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| format!("corrupt {TOKEN_EXPIRATION_KEY}: {e}"))?,
            None => jwt::token_expiry(&token)
                .ok_or_else(|| format!("missing {TOKEN_EXPIRATION_KEY}"))?,
        };

        Ok(Some(Session::new(identity, token, expires_at)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::HistoryNavigator;
    use common::storage::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn identity(role: Role) -> Identity {
        Identity {
            id: None,
            username: "moussa".to_string(),
            email: "moussa@uchk.sn".to_string(),
            role,
        }
    }

    fn store() -> (SessionStore, Arc<MemoryStore>, Arc<HistoryNavigator>) {
        let storage = Arc::new(MemoryStore::new());
        let navigator = Arc::new(HistoryNavigator::new("/dashboard"));
        let store = SessionStore::new(storage.clone(), navigator.clone(), "/login");
        (store, storage, navigator)
    }

    fn persisted(storage: &MemoryStore) -> Vec<Option<String>> {
        [TOKEN_KEY, CURRENT_USER_KEY, TOKEN_EXPIRATION_KEY]
            .into_iter()
            .map(|key| storage.get(key).expect("memory store never fails"))
            .collect()
    }

    #[test]
    fn test_empty_role_set_always_passes() {
        let (store, _, _) = store();
        assert!(store.has_any_role(&RoleSet::any()));
    }

    #[tokio::test]
    async fn test_login_persists_all_keys() {
        let (store, storage, _) = store();

        store.login(identity(Role::Student), "tok", TimeDelta::hours(1));

        let session = store.current().expect("session should be current");
        assert_eq!(session.username(), "moussa");
        assert_eq!(storage.get(TOKEN_KEY).unwrap(), Some("tok".to_string()));
        let user: Identity =
            serde_json::from_str(&storage.get(CURRENT_USER_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(user, identity(Role::Student));
        let expiry = storage.get(TOKEN_EXPIRATION_KEY).unwrap().unwrap();
        assert_eq!(
            DateTime::parse_from_rfc3339(&expiry).unwrap(),
            session.expires_at
        );
        assert_eq!(store.expiry_deadline(), Some(session.expires_at));
    }

    #[tokio::test]
    async fn test_has_any_role() {
        let (store, _, _) = store();
        assert!(!store.has_any_role(&RoleSet::from([Role::Student])));

        store.login(identity(Role::Student), "tok", TimeDelta::hours(1));
        assert!(store.has_any_role(&RoleSet::from([Role::Student, Role::Admin])));
        assert!(!store.has_any_role(&RoleSet::from([Role::Admin])));
    }

    #[tokio::test]
    async fn test_login_overwrites_previous_session() {
        let (store, storage, _) = store();

        store.login(identity(Role::Student), "first", TimeDelta::hours(1));
        let mut other = identity(Role::Admin);
        other.username = "aminata".to_string();
        store.login(other, "second", TimeDelta::hours(2));

        let session = store.current().unwrap();
        assert_eq!(session.username(), "aminata");
        assert_eq!(session.token, "second");
        assert_eq!(storage.get(TOKEN_KEY).unwrap(), Some("second".to_string()));
    }

    #[test]
    fn test_non_positive_ttl_expires_immediately() {
        let (store, storage, navigator) = store();

        store.login(identity(Role::Admin), "tok", TimeDelta::zero());

        assert!(store.current().is_none());
        assert_eq!(persisted(&storage), vec![None, None, None]);
        assert_eq!(navigator.current_url(), "/login");

        store.login(identity(Role::Admin), "tok", TimeDelta::seconds(-30));
        assert!(store.current().is_none());
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let (store, storage, navigator) = store();
        store.login(identity(Role::Teacher), "tok", TimeDelta::hours(1));

        store.logout();
        let once = (store.current(), persisted(&storage));
        store.logout();
        let twice = (store.current(), persisted(&storage));

        assert_eq!(once, twice);
        assert_eq!(twice.0, None);
        assert!(store.expiry_deadline().is_none());
        assert_eq!(navigator.current_url(), "/login");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_timer_logs_out() {
        let (store, storage, _) = store();
        store.login(identity(Role::Staff), "tok", TimeDelta::seconds(60));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(store.is_logged_in());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!store.is_logged_in());
        assert_eq!(persisted(&storage), vec![None, None, None]);
    }

    #[tokio::test]
    async fn test_stale_expiry_keeps_newer_session() {
        let (store, storage, _) = store();
        store.login(identity(Role::Student), "first", TimeDelta::hours(1));
        let stale = store.inner.epoch.load(Ordering::SeqCst);
        store.login(identity(Role::Teacher), "second", TimeDelta::hours(1));

        // The first session's timer woke up after the second login
        store.expire(stale);

        assert_eq!(store.token().as_deref(), Some("second"));
        assert_eq!(storage.get(TOKEN_KEY).unwrap().as_deref(), Some("second"));

        store.expire(store.inner.epoch.load(Ordering::SeqCst));
        assert!(store.current().is_none());
        assert_eq!(persisted(&storage), vec![None, None, None]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_relogin_races_with_expiry() {
        let (store, _, _) = store();
        for round in 0..200 {
            store.login(identity(Role::Student), "short", TimeDelta::milliseconds(1));
            tokio::time::sleep(Duration::from_micros(900)).await;
            let token = format!("long-{round}");
            store.login(identity(Role::Student), token.clone(), TimeDelta::hours(1));

            tokio::time::sleep(Duration::from_millis(2)).await;
            assert_eq!(store.token(), Some(token), "round {round}");
        }
    }

    #[test]
    fn test_restore_nothing_persisted() {
        let (store, _, navigator) = store();
        assert_eq!(store.restore(), RestoreOutcome::Anonymous);
        // No logout was triggered
        assert_eq!(navigator.history(), vec!["/dashboard"]);
    }

    #[tokio::test]
    async fn test_restore_valid_session() {
        let (store, storage, _) = store();
        let expires_at = Utc::now() + TimeDelta::hours(3);
        storage.set(TOKEN_KEY, "tok").unwrap();
        storage
            .set(
                CURRENT_USER_KEY,
                r#"{"id":4,"username":"moussa","email":"moussa@uchk.sn","role":"FORMATION_MANAGER"}"#,
            )
            .unwrap();
        storage
            .set(TOKEN_EXPIRATION_KEY, &expires_at.to_rfc3339())
            .unwrap();

        assert_eq!(
            store.restore(),
            RestoreOutcome::Restored {
                username: "moussa".to_string()
            }
        );
        let session = store.current().unwrap();
        assert_eq!(session.user_id(), Some(4));
        assert_eq!(session.role(), Role::FormationManager);
        assert!(store.expiry_deadline().is_some());
    }

    #[test]
    fn test_restore_expired_session_clears_storage() {
        let (store, storage, _) = store();
        storage.set(TOKEN_KEY, "tok").unwrap();
        storage
            .set(
                CURRENT_USER_KEY,
                &serde_json::to_string(&identity(Role::Student)).unwrap(),
            )
            .unwrap();
        storage
            .set(
                TOKEN_EXPIRATION_KEY,
                &(Utc::now() - TimeDelta::minutes(1)).to_rfc3339(),
            )
            .unwrap();

        assert_eq!(store.restore(), RestoreOutcome::Expired);
        assert!(store.current().is_none());
        assert_eq!(persisted(&storage), vec![None, None, None]);
    }

    #[test]
    fn test_restore_corrupt_identity_is_malformed() {
        let (store, storage, navigator) = store();
        storage.set(TOKEN_KEY, "tok").unwrap();
        storage.set(CURRENT_USER_KEY, "{broken").unwrap();
        storage
            .set(TOKEN_EXPIRATION_KEY, &Utc::now().to_rfc3339())
            .unwrap();

        assert!(matches!(store.restore(), RestoreOutcome::Malformed(_)));
        assert!(store.current().is_none());
        assert_eq!(persisted(&storage), vec![None, None, None]);
        assert_eq!(navigator.current_url(), "/login");
    }

    #[test]
    fn test_restore_unparsable_expiration_is_malformed() {
        let (store, storage, _) = store();
        storage.set(TOKEN_KEY, "tok").unwrap();
        storage
            .set(
                CURRENT_USER_KEY,
                &serde_json::to_string(&identity(Role::Student)).unwrap(),
            )
            .unwrap();
        storage.set(TOKEN_EXPIRATION_KEY, "next tuesday").unwrap();

        let outcome = store.restore();

        assert!(matches!(&outcome, RestoreOutcome::Malformed(reason) if reason.contains(TOKEN_EXPIRATION_KEY)));
        assert!(store.current().is_none());
        assert_eq!(persisted(&storage), vec![None, None, None]);
    }

    #[test]
    fn test_restore_unknown_role_is_malformed() {
        let (store, storage, _) = store();
        storage.set(TOKEN_KEY, "tok").unwrap();
        storage
            .set(
                CURRENT_USER_KEY,
                r#"{"username":"moussa","email":"moussa@uchk.sn","role":"MANAGER"}"#,
            )
            .unwrap();
        storage
            .set(
                TOKEN_EXPIRATION_KEY,
                &(Utc::now() + TimeDelta::hours(1)).to_rfc3339(),
            )
            .unwrap();

        let outcome = store.restore();

        assert!(matches!(&outcome, RestoreOutcome::Malformed(reason) if reason.contains(CURRENT_USER_KEY)));
        assert!(store.current().is_none());
        assert_eq!(persisted(&storage), vec![None, None, None]);
    }

    #[test]
    fn test_restore_partial_state_is_malformed() {
        let (store, storage, _) = store();
        storage.set(TOKEN_KEY, "tok").unwrap();

        assert!(matches!(store.restore(), RestoreOutcome::Malformed(_)));
        assert_eq!(persisted(&storage), vec![None, None, None]);
    }

    #[tokio::test]
    async fn test_restore_falls_back_to_jwt_expiry() {
        let (store, storage, _) = store();
        let exp = Utc::now().timestamp() + 600;
        storage
            .set(TOKEN_KEY, &crate::jwt::tests::signed_token("moussa", exp))
            .unwrap();
        storage
            .set(
                CURRENT_USER_KEY,
                &serde_json::to_string(&identity(Role::Tutor)).unwrap(),
            )
            .unwrap();

        assert!(matches!(store.restore(), RestoreOutcome::Restored { .. }));
        assert_eq!(store.current().unwrap().expires_at.timestamp(), exp);
    }

    #[tokio::test]
    async fn test_listeners_see_changes() {
        let (store, _, _) = store();
        let logins = Arc::new(AtomicUsize::new(0));
        let logouts = Arc::new(AtomicUsize::new(0));

        let id = store.subscribe({
            let logins = Arc::clone(&logins);
            let logouts = Arc::clone(&logouts);
            move |session: Option<&Session>| {
                let counter = if session.is_some() { &logins } else { &logouts };
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        store.login(identity(Role::User), "tok", TimeDelta::hours(1));
        store.logout();
        // Already anonymous: no change to report
        store.logout();

        assert_eq!(logins.load(Ordering::SeqCst), 1);
        assert_eq!(logouts.load(Ordering::SeqCst), 1);

        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.login(identity(Role::User), "tok", TimeDelta::hours(1));
        assert_eq!(logins.load(Ordering::SeqCst), 1);
    }
}
