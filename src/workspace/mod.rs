//! Per-session scratch directories and the files kept inside them.
//!
//! Every operation takes the [`Workspace`] explicitly; nothing here looks up a
//! "current" session. The directory on disk is the only index: listings are
//! rescanned on each call because the external converter writes into the same
//! directory behind our back.

mod archive;
mod files;
mod fingerprint;

use std::{
    collections::HashMap,
    fmt,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

pub use archive::archive;
pub use files::{
    DOCUMENT_EXTENSIONS, DeleteMatching, FileFilter, FileKind, StoredFile, delete_matching,
    find_file, is_duplicate, list_files, safe_file_name, store_upload,
};
pub use fingerprint::Fingerprint;

pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("invalid file name `{0}`")]
    InvalidFileName(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Opaque identifier of a browser session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to one session's exclusive directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.dir
    }
}

/// Maps sessions to their workspace directories under a shared root.
#[derive(Clone, Debug)]
pub struct WorkspaceRegistry {
    root: PathBuf,
    sessions: Arc<RwLock<HashMap<SessionId, Workspace>>>,
}

impl WorkspaceRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the session's workspace, creating `<root>/<uuid4>` on first use.
    ///
    /// Repeated calls for the same session return the same path. Creation
    /// failures are returned as-is and not retried.
    pub async fn create_or_get(&self, session: SessionId) -> WorkspaceResult<Workspace> {
        if let Some(workspace) = self.sessions.read().await.get(&session) {
            return Ok(workspace.clone());
        }

        let mut guard = self.sessions.write().await;
        if let Some(workspace) = guard.get(&session) {
            return Ok(workspace.clone());
        }

        let dir = self.root.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&dir).await?;
        info!(%session, dir = %dir.display(), "created session workspace");

        let workspace = Workspace { dir };
        guard.insert(session, workspace.clone());
        Ok(workspace)
    }

    /// Look up an existing workspace without creating one.
    pub async fn get(&self, session: SessionId) -> Option<Workspace> {
        self.sessions.read().await.get(&session).cloned()
    }

    /// Forget the session and remove its directory. Returns whether the
    /// session had a workspace.
    pub async fn teardown(&self, session: SessionId) -> WorkspaceResult<bool> {
        let Some(workspace) = self.sessions.write().await.remove(&session) else {
            return Ok(false);
        };

        match tokio::fs::remove_dir_all(workspace.path()).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        info!(%session, dir = %workspace.path().display(), "removed session workspace");
        Ok(true)
    }

    /// Drop sessions whose directory no longer exists, e.g. after a sweep.
    ///
    /// Directories are checked without holding the registry lock; an entry
    /// replaced in the meantime is kept.
    pub async fn prune_missing(&self) -> usize {
        let snapshot: Vec<(SessionId, Workspace)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(session, workspace)| (*session, workspace.clone()))
            .collect();

        let mut missing = Vec::new();
        for (session, workspace) in snapshot {
            match tokio::fs::try_exists(workspace.path()).await {
                Ok(true) => {}
                Ok(false) => missing.push((session, workspace)),
                Err(err) => {
                    warn!(?err, dir = %workspace.path().display(), "failed to check workspace directory");
                }
            }
        }
        if missing.is_empty() {
            return 0;
        }

        let mut guard = self.sessions.write().await;
        let mut removed = 0;
        for (session, workspace) in missing {
            if guard.get(&session) == Some(&workspace) {
                guard.remove(&session);
                removed += 1;
            }
        }
        removed
    }
}
