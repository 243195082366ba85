use crate::model::{ChatTurn, SessionId, WorkbookSnapshot};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Everything the server remembers about one uploaded workbook.
pub struct Session {
    pub filename: String,
    pub temp_dir: PathBuf,
    pub file_path: PathBuf,
    pub snapshot: WorkbookSnapshot,
    pub vba_modules: BTreeMap<String, String>,
    pub history: Vec<ChatTurn>,
    pub created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(
        filename: String,
        temp_dir: PathBuf,
        file_path: PathBuf,
        snapshot: WorkbookSnapshot,
        vba_modules: BTreeMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            filename,
            temp_dir,
            file_path,
            snapshot,
            vba_modules,
            history: Vec::new(),
            created_at: now,
            last_activity: now,
        }
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }
}

/// Owner of all session state. Handlers and the background sweep go through
/// the same lock, and sessions never leak references outward: callers read
/// and mutate through the `with_*` closures, which also reset the idle clock.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    timeout: ChronoDuration,
}

impl SessionStore {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            timeout: ChronoDuration::from_std(timeout).unwrap_or(ChronoDuration::hours(2)),
        }
    }

    pub fn insert(&self, session: Session) -> SessionId {
        let id = SessionId::generate();
        debug!(session = %id, filename = %session.filename, "session created");
        self.sessions.write().insert(id.clone(), session);
        id
    }

    /// Read access; present sessions get their idle clock reset.
    pub fn with_session<R>(&self, id: &SessionId, f: impl FnOnce(&Session) -> R) -> Option<R> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(id)?;
        session.last_activity = Utc::now();
        Some(f(session))
    }

    /// Mutable access with the same touch-on-access semantics.
    pub fn with_session_mut<R>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Option<R> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(id)?;
        session.last_activity = Utc::now();
        Some(f(session))
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Evict every session idle past the timeout as of `now`, deleting its
    /// backing temp directory. Returns the number evicted.
    pub fn sweep_once(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<Session> = {
            let mut sessions = self.sessions.write();
            let stale: Vec<SessionId> = sessions
                .iter()
                .filter(|(_, session)| now - session.last_activity > self.timeout)
                .map(|(id, _)| id.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|id| {
                    info!(session = %id, "evicting idle session");
                    sessions.remove(&id)
                })
                .collect()
        };

        let evicted = expired.len();
        for session in expired {
            delete_backing_files(&session);
        }
        evicted
    }

    /// Remove everything, deleting backing files. Used on shutdown.
    pub fn drain(&self) {
        let drained: Vec<Session> = self.sessions.write().drain().map(|(_, s)| s).collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "draining session store");
        }
        for session in drained {
            delete_backing_files(&session);
        }
    }
}

fn delete_backing_files(session: &Session) {
    if let Err(err) = std::fs::remove_dir_all(&session.temp_dir) {
        warn!(
            path = %session.temp_dir.display(),
            error = %err,
            "failed to remove session temp directory"
        );
    }
}

/// Periodic eviction task; runs until the process exits.
pub fn spawn_sweeper(store: Arc<SessionStore>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = store.sweep_once(Utc::now());
            if evicted > 0 {
                debug!(evicted, "cleanup sweep finished");
            }
        }
    })
}
