use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Fingerprint, Workspace, WorkspaceError, WorkspaceResult};

/// Upload formats the converter accepts.
pub const DOCUMENT_EXTENSIONS: &[&str] = &["doc", "docx", "odt", "rtf"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Document,
    Pdf,
    Archive,
    Other,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => FileKind::Pdf,
            "zip" => FileKind::Archive,
            ext if DOCUMENT_EXTENSIONS.contains(&ext) => FileKind::Document,
            _ => FileKind::Other,
        }
    }
}

/// Selects which files a listing returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileFilter {
    All,
    Kind(FileKind),
    /// Case-insensitive extension match, without the leading dot.
    Suffix(String),
}

impl FileFilter {
    fn matches(&self, file: &StoredFile) -> bool {
        match self {
            FileFilter::All => true,
            FileFilter::Kind(kind) => file.kind == *kind,
            FileFilter::Suffix(suffix) => file
                .path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(suffix.trim_start_matches('.'))),
        }
    }
}

/// Selects which files [`delete_matching`] removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteMatching {
    /// Every file whose name minus its last extension equals the stem.
    Stem(String),
    Kind(FileKind),
    All,
}

impl DeleteMatching {
    fn matches(&self, file: &StoredFile) -> bool {
        match self {
            DeleteMatching::Stem(stem) => file.stem() == stem,
            DeleteMatching::Kind(kind) => file.kind == *kind,
            DeleteMatching::All => true,
        }
    }
}

/// A regular file found in a workspace at scan time.
#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    pub name: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub kind: FileKind,
}

impl StoredFile {
    pub fn stem(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&self.name)
    }
}

/// Validate an untrusted upload name and return the on-disk name.
///
/// Names carrying path separators, `.`/`..` or NUL are rejected outright;
/// whatever survives is passed through `sanitize_filename` to strip
/// characters the platform refuses.
pub fn safe_file_name(name: &str) -> WorkspaceResult<String> {
    let invalid = || WorkspaceError::InvalidFileName(name.to_string());

    if name.is_empty() || name.contains(['/', '\\', '\0']) {
        return Err(invalid());
    }

    let mut components = Path::new(name).components();
    if !matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) {
        return Err(invalid());
    }

    let sanitized = sanitize_filename::sanitize(name);
    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        return Err(invalid());
    }
    Ok(sanitized)
}

/// Write `bytes` verbatim to `workspace/filename`, replacing any file of the
/// same name.
pub async fn store_upload(
    workspace: &Workspace,
    filename: &str,
    bytes: &[u8],
) -> WorkspaceResult<PathBuf> {
    let name = safe_file_name(filename)?;
    tokio::fs::create_dir_all(workspace.path()).await?;

    let path = workspace.path().join(name);
    tokio::fs::write(&path, bytes).await?;
    debug!(file = %path.display(), size = bytes.len(), "stored upload");
    Ok(path)
}

/// True only if `workspace/filename` exists and its current (name, size)
/// equals `fingerprint`.
pub async fn is_duplicate(
    workspace: &Workspace,
    filename: &str,
    fingerprint: &Fingerprint,
) -> WorkspaceResult<bool> {
    let path = workspace.path().join(safe_file_name(filename)?);
    let existing = Fingerprint::of_file(&path).await?;
    Ok(existing.as_ref() == Some(fingerprint))
}

/// Rescan the workspace and return matching files, oldest modification first.
pub async fn list_files(
    workspace: &Workspace,
    filter: &FileFilter,
) -> WorkspaceResult<Vec<StoredFile>> {
    let mut entries = match tokio::fs::read_dir(workspace.path()).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            // Removed between read_dir and stat.
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(err.into()),
        };
        if !metadata.is_file() {
            continue;
        }

        let path = entry.path();
        let file = StoredFile {
            name: entry.file_name().to_string_lossy().into_owned(),
            kind: FileKind::from_path(&path),
            size: metadata.len(),
            modified: DateTime::<Utc>::from(metadata.modified()?),
            path,
        };
        if filter.matches(&file) {
            files.push(file);
        }
    }

    files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)));
    Ok(files)
}

/// Look up a single file by its exact on-disk name.
pub async fn find_file(workspace: &Workspace, name: &str) -> WorkspaceResult<Option<StoredFile>> {
    let name = safe_file_name(name)?;
    let files = list_files(workspace, &FileFilter::All).await?;
    Ok(files.into_iter().find(|file| file.name == name))
}

/// Remove every file matching `predicate`, one at a time.
///
/// Each removal either succeeds or aborts the loop with its error; files
/// removed before the failure stay removed.
pub async fn delete_matching(
    workspace: &Workspace,
    predicate: &DeleteMatching,
) -> WorkspaceResult<usize> {
    let mut removed = 0;
    for file in list_files(workspace, &FileFilter::All).await? {
        if !predicate.matches(&file) {
            continue;
        }

        match tokio::fs::remove_file(&file.path).await {
            Ok(()) => {
                debug!(file = %file.path.display(), "deleted workspace file");
                removed += 1;
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(removed)
}
