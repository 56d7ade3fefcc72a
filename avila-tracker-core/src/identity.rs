//! Client and session identity
//!
//! Two identifiers are attached to every envelope:
//!
//! - **client id** (`cid_...`): generated once per durable storage scope and
//!   reused until that storage is cleared
//! - **session id** (`ses_...`): kept in tab storage together with its start
//!   and last-activity times; replaced once the gap since the last access
//!   exceeds [`SESSION_TIMEOUT_MS`]
//!
//! Storage failures never propagate. The first failing read or write moves
//! the store into ephemeral mode, where identities live in process memory
//! under the same rules until the process exits.

use crate::storage::{Storage, StorageScope, CLIENT_ID_KEY, SESSION_KEY, USER_ID_KEY};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

/// Inactivity gap after which a session is replaced (30 minutes)
pub const SESSION_TIMEOUT_MS: i64 = 30 * 60 * 1000;

const CLIENT_ID_PREFIX: &str = "cid_";
const SESSION_ID_PREFIX: &str = "ses_";
const RANDOM_SUFFIX_LEN: usize = 9;

// ============================================
// Clock
// ============================================

/// Source of wall-clock time in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// The system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

// ============================================
// Session record
// ============================================

/// Session record as stored in tab storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    /// Epoch millis when the session began
    pub started: i64,
    /// Epoch millis of the most recent access
    pub last_activity: i64,
}

impl SessionRecord {
    /// Start a fresh session at `now`
    pub fn start(now: i64) -> Self {
        Self {
            id: generate_id(SESSION_ID_PREFIX, now),
            started: now,
            last_activity: now,
        }
    }

    /// Whether the session is still valid at `now`
    pub fn is_active(&self, now: i64) -> bool {
        !self.id.is_empty() && now - self.last_activity <= SESSION_TIMEOUT_MS
    }

    /// Reuse `previous` if still active (bumping its last activity), else start over
    pub fn touch_or_replace(previous: Option<SessionRecord>, now: i64) -> SessionRecord {
        match previous {
            Some(mut session) if session.is_active(now) => {
                session.last_activity = session.last_activity.max(now);
                session
            }
            _ => SessionRecord::start(now),
        }
    }
}

/// `<prefix><9 random base36 chars><epoch millis>`
fn generate_id(prefix: &str, now: i64) -> String {
    let mut bits = uuid::Uuid::new_v4().as_u128();
    let mut suffix = String::with_capacity(RANDOM_SUFFIX_LEN);
    for _ in 0..RANDOM_SUFFIX_LEN {
        let digit = (bits % 36) as u32;
        bits /= 36;
        // digit < 36 always yields a char
        suffix.push(std::char::from_digit(digit, 36).unwrap_or('0'));
    }
    format!("{}{}{}", prefix, suffix, now)
}

// ============================================
// Identity store
// ============================================

#[derive(Debug, Default)]
struct Ephemeral {
    active: bool,
    client_id: Option<String>,
    session: Option<SessionRecord>,
    user_id: Option<String>,
}

/// Resolves and persists client, session and user identifiers
pub struct IdentityStore {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    debug: bool,
    ephemeral: Mutex<Ephemeral>,
}

impl IdentityStore {
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, debug: bool) -> Self {
        Self {
            storage,
            clock,
            debug,
            ephemeral: Mutex::new(Ephemeral::default()),
        }
    }

    /// Whether storage has failed and identities are process-local
    pub fn is_ephemeral(&self) -> bool {
        self.state().active
    }

    /// Durable client id, generated and persisted on first use
    pub fn get_client_id(&self) -> String {
        if !self.is_ephemeral() {
            match self.storage.get(StorageScope::Durable, CLIENT_ID_KEY) {
                Ok(Some(id)) if !id.is_empty() => return id,
                Ok(_) => {
                    let id = generate_id(CLIENT_ID_PREFIX, self.clock.now_millis());
                    match self.storage.set(StorageScope::Durable, CLIENT_ID_KEY, &id) {
                        Ok(()) => return id,
                        Err(e) => {
                            self.degrade(&e);
                            self.state().client_id = Some(id.clone());
                            return id;
                        }
                    }
                }
                Err(e) => self.degrade(&e),
            }
        }

        let now = self.clock.now_millis();
        self.state()
            .client_id
            .get_or_insert_with(|| generate_id(CLIENT_ID_PREFIX, now))
            .clone()
    }

    /// Current session id, rolling the session over after inactivity
    pub fn get_session_id(&self) -> String {
        self.resolve_session().id
    }

    /// Current session record after this access has been applied
    pub fn resolve_session(&self) -> SessionRecord {
        let now = self.clock.now_millis();

        if !self.is_ephemeral() {
            match self.storage.get(StorageScope::Tab, SESSION_KEY) {
                Ok(raw) => {
                    let previous = raw.and_then(|raw| self.parse_session(&raw));
                    let session = SessionRecord::touch_or_replace(previous, now);
                    match serde_json::to_string(&session) {
                        Ok(encoded) => {
                            match self.storage.set(StorageScope::Tab, SESSION_KEY, &encoded) {
                                Ok(()) => return session,
                                Err(e) => {
                                    self.degrade(&e);
                                    self.state().session = Some(session.clone());
                                    return session;
                                }
                            }
                        }
                        Err(e) => self.degrade(&e),
                    }
                }
                Err(e) => self.degrade(&e),
            }
        }

        let mut state = self.state();
        let session = SessionRecord::touch_or_replace(state.session.take(), now);
        state.session = Some(session.clone());
        session
    }

    /// Persist a user id in durable storage
    pub fn set_user_id(&self, user_id: &str) {
        if !self.is_ephemeral() {
            match self.storage.set(StorageScope::Durable, USER_ID_KEY, user_id) {
                Ok(()) => return,
                Err(e) => self.degrade(&e),
            }
        }
        self.state().user_id = Some(user_id.to_string());
    }

    /// Read the persisted user id, if any
    pub fn get_user_id(&self) -> Option<String> {
        if !self.is_ephemeral() {
            match self.storage.get(StorageScope::Durable, USER_ID_KEY) {
                Ok(value) => return value,
                Err(e) => self.degrade(&e),
            }
        }
        self.state().user_id.clone()
    }

    fn parse_session(&self, raw: &str) -> Option<SessionRecord> {
        match serde_json::from_str(raw) {
            Ok(session) => Some(session),
            Err(e) => {
                if self.debug {
                    tracing::warn!(error = %e, "Discarding unreadable session record");
                }
                None
            }
        }
    }

    fn degrade(&self, error: &dyn std::fmt::Display) {
        let mut state = self.state();
        if !state.active {
            state.active = true;
            if self.debug {
                tracing::warn!(
                    error = %error,
                    "Storage unavailable, using in-memory identity for this process"
                );
            }
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, Ephemeral> {
        self.ephemeral.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, UnavailableStorage};

    const T0: i64 = 1_700_000_000_000;

    fn store_with(storage: Arc<dyn Storage>) -> (IdentityStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        (IdentityStore::new(storage, clock.clone(), true), clock)
    }

    #[test]
    fn test_generated_id_format() {
        let id = generate_id("cid_", T0);
        assert!(id.starts_with("cid_"));
        assert!(id.ends_with(&T0.to_string()));
        let suffix = &id[4..4 + RANDOM_SUFFIX_LEN];
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(generate_id("cid_", T0), generate_id("cid_", T0));
    }

    #[test]
    fn test_client_id_is_stable_and_persisted() {
        let storage = Arc::new(MemoryStorage::new());
        let (store, clock) = store_with(storage.clone());

        let first = store.get_client_id();
        clock.advance(SESSION_TIMEOUT_MS * 10);
        let second = store.get_client_id();

        assert_eq!(first, second);
        assert!(first.starts_with("cid_"));
        assert_eq!(
            storage.get(StorageScope::Durable, CLIENT_ID_KEY).unwrap(),
            Some(first)
        );
    }

    #[test]
    fn test_client_id_regenerated_after_clear() {
        let storage = Arc::new(MemoryStorage::new());
        let (store, _clock) = store_with(storage.clone());

        let first = store.get_client_id();
        storage.clear_durable();
        assert_ne!(store.get_client_id(), first);
    }

    #[test]
    fn test_session_reused_within_timeout() {
        let storage = Arc::new(MemoryStorage::new());
        let (store, clock) = store_with(storage.clone());

        let first = store.resolve_session();
        assert_eq!(first.started, T0);
        assert_eq!(first.last_activity, T0);

        clock.advance(SESSION_TIMEOUT_MS);
        let second = store.resolve_session();
        assert_eq!(second.id, first.id);
        assert_eq!(second.started, T0);
        assert_eq!(second.last_activity, T0 + SESSION_TIMEOUT_MS);
    }

    #[test]
    fn test_session_replaced_after_timeout() {
        let storage = Arc::new(MemoryStorage::new());
        let (store, clock) = store_with(storage.clone());

        let first = store.get_session_id();
        clock.advance(SESSION_TIMEOUT_MS + 1);
        let second = store.resolve_session();

        assert_ne!(second.id, first);
        assert!(second.id.starts_with("ses_"));
        assert_eq!(second.started, T0 + SESSION_TIMEOUT_MS + 1);
        assert_eq!(second.started, second.last_activity);
    }

    #[test]
    fn test_session_record_stored_as_camel_case_json() {
        let storage = Arc::new(MemoryStorage::new());
        let (store, _clock) = store_with(storage.clone());

        let id = store.get_session_id();
        let raw = storage.get(StorageScope::Tab, SESSION_KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["id"], id);
        assert_eq!(value["started"], T0);
        assert_eq!(value["lastActivity"], T0);
    }

    #[test]
    fn test_corrupt_session_record_replaced() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(StorageScope::Tab, SESSION_KEY, "not json").unwrap();
        let (store, _clock) = store_with(storage.clone());

        let id = store.get_session_id();
        assert!(id.starts_with("ses_"));
        assert!(!store.is_ephemeral());
    }

    #[test]
    fn test_new_tab_starts_new_session_with_same_client() {
        let storage = Arc::new(MemoryStorage::new());
        let (store, _clock) = store_with(storage.clone());

        let client = store.get_client_id();
        let session = store.get_session_id();
        storage.close_tab();

        assert_eq!(store.get_client_id(), client);
        assert_ne!(store.get_session_id(), session);
    }

    #[test]
    fn test_unavailable_storage_falls_back_to_memory() {
        let (store, clock) = store_with(Arc::new(UnavailableStorage));

        let client = store.get_client_id();
        assert!(store.is_ephemeral());
        assert_eq!(store.get_client_id(), client);

        let session = store.get_session_id();
        clock.advance(1000);
        assert_eq!(store.get_session_id(), session);
        clock.advance(SESSION_TIMEOUT_MS + 1);
        assert_ne!(store.get_session_id(), session);

        assert!(store.get_user_id().is_none());
        store.set_user_id("user-42");
        assert_eq!(store.get_user_id().as_deref(), Some("user-42"));
    }

    #[test]
    fn test_user_id_round_trips_through_durable_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let (store, _clock) = store_with(storage.clone());

        assert!(store.get_user_id().is_none());
        store.set_user_id("user-7");
        assert_eq!(store.get_user_id().as_deref(), Some("user-7"));
        assert_eq!(
            storage.get(StorageScope::Durable, USER_ID_KEY).unwrap().as_deref(),
            Some("user-7")
        );
    }
}
