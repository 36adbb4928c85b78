use std::{
    fs::File,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use tokio::task;
use tracing::debug;
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use super::{WorkspaceError, WorkspaceResult, safe_file_name};

/// Bundle `files` into `output_dir/archive_name`, each under its base name.
///
/// With no input files no archive is produced: a stale archive of the same
/// name is removed and `None` is returned.
pub async fn archive(
    files: &[PathBuf],
    output_dir: &Path,
    archive_name: &str,
) -> WorkspaceResult<Option<PathBuf>> {
    let archive_path = output_dir.join(safe_file_name(archive_name)?);

    if files.is_empty() {
        match tokio::fs::remove_file(&archive_path).await {
            Ok(()) => debug!(archive = %archive_path.display(), "removed stale archive"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        return Ok(None);
    }

    let files = files.to_vec();
    let target = archive_path.clone();
    task::spawn_blocking(move || write_archive(&files, &target)).await??;

    debug!(archive = %archive_path.display(), "wrote archive");
    Ok(Some(archive_path))
}

fn write_archive(files: &[PathBuf], target: &Path) -> WorkspaceResult<()> {
    let mut zip = ZipWriter::new(File::create(target)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for path in files {
        let name = path
            .file_name()
            .ok_or_else(|| WorkspaceError::InvalidFileName(path.display().to_string()))?
            .to_string_lossy()
            .into_owned();

        zip.start_file(name, options)?;
        let mut source = File::open(path)?;
        io::copy(&mut source, &mut zip)?;
    }

    zip.finish()?;
    Ok(())
}
