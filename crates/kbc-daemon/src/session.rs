use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use kbc_storage::{JobsClient, StorageClient, StorageError};
use kbc_workspace::{RestDriverConnector, WorkspaceError, WorkspaceHandle};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::config::{Config, ConfigError};

/// How long a session may go unused before it is dropped.
pub const DEFAULT_SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

/// State owned by one MCP session: its clients and its workspace handle.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub config: Config,
    pub storage: StorageClient,
    pub jobs: JobsClient,
    pub workspace: WorkspaceHandle,
    last_seen: Mutex<Instant>,
}

impl Session {
    /// Validates `config` and builds the session's clients. No network I/O
    /// happens here; the workspace resolves its backend on first use.
    pub fn open(config: Config) -> Result<Self, SessionError> {
        config.validate()?;
        let token = config.storage_token.clone().unwrap_or_default();
        let schema = config.workspace_schema.clone().unwrap_or_default();

        let storage = StorageClient::new(token, &config.storage_api_url())?;
        let jobs = JobsClient::from_storage(&storage)?;
        let connector = RestDriverConnector::new(config.bigquery_api_url.as_deref())?;
        let workspace = WorkspaceHandle::for_storage(schema, storage.clone(), connector);

        Ok(Self {
            id: Uuid::new_v4(),
            config,
            storage,
            jobs,
            workspace,
            last_seen: Mutex::new(Instant::now()),
        })
    }

    fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the session was opened or last looked up.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }
}

/// Open sessions by id. Sessions idle for longer than the idle timeout are
/// dropped: lazily on lookup, on every insert and by [`evict_idle`] sweeps.
///
/// [`evict_idle`]: SessionRegistry::evict_idle
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    idle_timeout: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_idle_timeout(DEFAULT_SESSION_IDLE_TIMEOUT)
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn insert(&self, session: Session) -> Arc<Session> {
        self.evict_idle();
        let session = Arc::new(session);
        self.sessions.write().insert(session.id, session.clone());
        info!(
            session_id = %session.id,
            workspace_schema = %session.workspace.schema(),
            "session opened"
        );
        session
    }

    /// Returns the session and marks it as used. An expired session is
    /// removed and reported as absent.
    pub fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        let session = self.sessions.read().get(&id).cloned()?;
        if session.idle_for() > self.idle_timeout {
            if self.sessions.write().remove(&id).is_some() {
                info!(session_id = %id, "session expired");
            }
            return None;
        }
        session.touch();
        Some(session)
    }

    pub fn remove(&self, id: Uuid) -> Option<Arc<Session>> {
        let removed = self.sessions.write().remove(&id);
        if let Some(session) = &removed {
            info!(session_id = %session.id, "session closed");
        }
        removed
    }

    /// Drops every session idle for longer than the timeout and returns how
    /// many were dropped.
    pub fn evict_idle(&self) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|id, session| {
            let idle = session.idle_for();
            let keep = idle <= self.idle_timeout;
            if !keep {
                info!(session_id = %id, idle_secs = idle.as_secs(), "session expired");
            }
            keep
        });
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::from_params([
            ("KBC_STORAGE_TOKEN", Some("token")),
            ("KBC_WORKSPACE_SCHEMA", Some("WORKSPACE_1")),
            ("KBC_STORAGE_API_URL", Some("connection.north-europe.azure.keboola.com")),
        ])
    }

    #[test]
    fn open_requires_a_valid_config() {
        let err = Session::open(Config::default()).unwrap_err();
        assert!(matches!(err, SessionError::Config(ConfigError::MissingToken)));
    }

    #[test]
    fn sessions_derive_their_clients_from_config() {
        let session = Session::open(config()).unwrap();
        assert_eq!(
            session.storage.base_url(),
            "https://connection.north-europe.azure.keboola.com"
        );
        assert_eq!(
            session.jobs.base_url(),
            "https://queue.north-europe.azure.keboola.com"
        );
        assert_eq!(session.workspace.schema(), "WORKSPACE_1");
        assert_eq!(session.workspace.cached_dialect(), None);
    }

    #[test]
    fn registry_tracks_sessions_by_id() {
        let registry = SessionRegistry::new();
        let session = registry.insert(Session::open(config()).unwrap());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(session.id).map(|s| s.id), Some(session.id));

        assert!(registry.remove(session.id).is_some());
        assert!(registry.get(session.id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn idle_sessions_expire_on_lookup() {
        let registry = SessionRegistry::with_idle_timeout(Duration::from_millis(20));
        let session = registry.insert(Session::open(config()).unwrap());
        assert!(registry.get(session.id).is_some());

        std::thread::sleep(Duration::from_millis(40));
        assert!(registry.get(session.id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn lookups_keep_a_session_alive() {
        let registry = SessionRegistry::with_idle_timeout(Duration::from_millis(200));
        let session = registry.insert(Session::open(config()).unwrap());
        for _ in 0..4 {
            std::thread::sleep(Duration::from_millis(80));
            assert!(registry.get(session.id).is_some());
        }
        assert!(session.idle_for() < Duration::from_millis(200));
    }

    #[test]
    fn sweeps_and_inserts_drop_idle_sessions() {
        let registry = SessionRegistry::with_idle_timeout(Duration::from_millis(20));
        registry.insert(Session::open(config()).unwrap());
        registry.insert(Session::open(config()).unwrap());
        assert_eq!(registry.len(), 2);

        std::thread::sleep(Duration::from_millis(40));
        let fresh = registry.insert(Session::open(config()).unwrap());
        assert_eq!(registry.len(), 1);
        assert!(registry.get(fresh.id).is_some());

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(registry.evict_idle(), 1);
        assert!(registry.is_empty());
    }
}
