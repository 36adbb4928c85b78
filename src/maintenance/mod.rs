use std::{
    ffi::OsStr,
    io::ErrorKind,
    path::Path,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::AppState;

/// Outcome of one pass over the workspace root.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Run the stale-workspace sweep once per configured interval.
///
/// The sweep does not coordinate with live sessions: a session idle for longer
/// than the age threshold loses its directory.
pub fn spawn(state: AppState) {
    tokio::spawn(async move {
        let config = state.config();
        loop {
            match sweep_stale_workspaces(state.workspaces().root(), config.sweep_max_age).await {
                Ok(report) => {
                    let forgotten = state.workspaces().prune_missing().await;
                    if report.removed > 0 || report.failed > 0 || forgotten > 0 {
                        info!(
                            scanned = report.scanned,
                            removed = report.removed,
                            failed = report.failed,
                            forgotten,
                            "stale workspace sweep completed"
                        );
                    }
                }
                Err(err) => error!(?err, "stale workspace sweep failed"),
            }
            sleep(config.sweep_interval).await;
        }
    });
}

/// Remove workspace directories under `root` last modified before
/// `now - max_age`.
///
/// Only directories named like a workspace (a lowercase hyphenated UUID v4)
/// are considered. Per-directory failures are logged and counted.
pub async fn sweep_stale_workspaces(root: &Path, max_age: Duration) -> Result<SweepReport> {
    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(UNIX_EPOCH);

    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(SweepReport::default()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read workspace root {}", root.display()));
        }
    };

    let mut report = SweepReport::default();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed to scan workspace root {}", root.display()))?
    {
        if !is_workspace_name(&entry.file_name()) {
            continue;
        }

        let path = entry.path();
        let modified = match entry.metadata().await {
            Ok(metadata) if metadata.is_dir() => metadata.modified(),
            Ok(_) => continue,
            Err(err) => Err(err),
        };
        report.scanned += 1;

        let modified = match modified {
            Ok(modified) => modified,
            Err(err) => {
                warn!(?err, path = %path.display(), "failed to stat workspace directory");
                report.failed += 1;
                continue;
            }
        };

        if modified >= cutoff {
            continue;
        }

        if remove_workspace_directory(&path).await {
            report.removed += 1;
        } else {
            report.failed += 1;
        }
    }

    Ok(report)
}

fn is_workspace_name(name: &OsStr) -> bool {
    let Some(name) = name.to_str() else {
        return false;
    };
    Uuid::try_parse(name).is_ok_and(|id| {
        id.get_version() == Some(uuid::Version::Random) && id.hyphenated().to_string() == name
    })
}

async fn remove_workspace_directory(path: &Path) -> bool {
    match tokio::fs::remove_dir_all(path).await {
        Ok(_) => true,
        Err(err) if err.kind() == ErrorKind::NotFound => true,
        Err(err) => {
            warn!(?err, path = %path.display(), "failed to remove stale workspace");
            false
        }
    }
}
