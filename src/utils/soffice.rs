use std::{
    ffi::{OsStr, OsString},
    path::{self, Component, Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Duration,
};

use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
    time::timeout,
};
use tracing::{info, warn};

pub const PDF_EXPORT_FILTER: &str = "pdf:writer_pdf_Export";

/// Per-workspace LibreOffice user profile. Concurrent conversions sharing one
/// profile fail on its lock.
pub const PROFILE_DIR: &str = ".libreoffice-profile";

const OUTPUT_MARKER: &str = "-> ";
const FILTER_MARKER: &str = " using filter";

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("invalid path {}: {source}", .path.display())]
    InvalidPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run {}: {source}", .binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("LibreOffice exited with status {code:?}: {stderr}")]
    ExitStatus { code: Option<i32>, stderr: String },

    #[error("LibreOffice did not finish within {} seconds", .timeout.as_secs_f64())]
    Timeout { timeout: Duration },

    #[error("could not find the output path in LibreOffice output: {stdout:?}")]
    UnparsableOutput { stdout: String },

    #[error("LibreOffice reported {} but no file was written there", .0.display())]
    MissingOutput(PathBuf),

    #[error("LibreOffice wrote {} outside {}", .path.display(), .output_dir.display())]
    OutsideOutputDir { path: PathBuf, output_dir: PathBuf },
}

struct CommandOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

/// Headless LibreOffice invoked as a black-box command.
#[derive(Debug, Clone)]
pub struct Soffice {
    binary: PathBuf,
}

impl Soffice {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Convert `source` to PDF inside `output_dir` and return the path the
    /// converter announced, which must lie directly in `output_dir`.
    ///
    /// Runs exactly one converter. If it outlives `limit` its whole process
    /// group is killed before this returns. The LibreOffice profile lives in
    /// `output_dir/.libreoffice-profile`.
    pub async fn convert(
        &self,
        source: &Path,
        output_dir: &Path,
        limit: Duration,
    ) -> Result<PathBuf, ConversionError> {
        let source = absolute(source)?;
        let output_dir = absolute(output_dir)?;

        let profile = OsString::from(format!(
            "-env:UserInstallation={}",
            file_url(&output_dir.join(PROFILE_DIR))
        ));

        let args = [
            profile.as_os_str(),
            OsStr::new("--headless"),
            OsStr::new("--convert-to"),
            OsStr::new(PDF_EXPORT_FILTER),
            OsStr::new("--outdir"),
            output_dir.as_os_str(),
            source.as_os_str(),
        ];
        let output = self.run(&args, limit).await?;

        if !output.status.success() {
            return Err(ConversionError::ExitStatus {
                code: output.status.code(),
                stderr: output.stderr.trim().to_string(),
            });
        }

        let announced =
            parse_output_path(&output.stdout).ok_or_else(|| ConversionError::UnparsableOutput {
                stdout: output.stdout.trim().to_string(),
            })?;
        let pdf_path = absolute(Path::new(announced))?;

        if !tokio::fs::try_exists(&pdf_path).await.unwrap_or(false) {
            return Err(ConversionError::MissingOutput(pdf_path));
        }
        if !is_directly_inside(&pdf_path, &output_dir).await {
            return Err(ConversionError::OutsideOutputDir {
                path: pdf_path,
                output_dir,
            });
        }

        info!(
            source = %source.display(),
            output = %pdf_path.display(),
            "converted document to PDF"
        );
        Ok(pdf_path)
    }

    /// Trimmed `--version` banner, for display only.
    pub async fn version(&self, limit: Duration) -> Result<String, ConversionError> {
        let output = self.run(&[OsStr::new("--version")], limit).await?;
        if !output.status.success() {
            return Err(ConversionError::ExitStatus {
                code: output.status.code(),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout.trim().to_string())
    }

    async fn run(&self, args: &[&OsStr], limit: Duration) -> Result<CommandOutput, ConversionError> {
        let spawn_error = |source| ConversionError::Spawn {
            binary: self.binary.clone(),
            source,
        };

        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(spawn_error)?;
        // Declared after `child` so the group is signalled before the child is
        // dropped when the request is cancelled.
        let mut group = ProcessGroup::new(child.id());

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let collect = async {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let (status, _, _) = tokio::try_join!(
                child.wait(),
                drain(stdout_pipe, &mut stdout),
                drain(stderr_pipe, &mut stderr),
            )?;
            Ok::<_, std::io::Error>((status, stdout, stderr))
        };
        let outcome = timeout(limit, collect).await;

        match outcome {
            Ok(Ok((status, stdout, stderr))) => {
                group.disarm();
                Ok(CommandOutput {
                    status,
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                })
            }
            Ok(Err(source)) => Err(spawn_error(source)),
            Err(_) => {
                // LibreOffice's launcher forks the real worker; signal them all,
                // then reap the direct child.
                group.kill();
                // Refused when the launcher already exited and only a worker held the pipes.
                let _ = child.start_kill();
                if let Err(err) = child.wait().await {
                    warn!(?err, binary = %self.binary.display(), "failed to reap timed out converter");
                }
                Err(ConversionError::Timeout { timeout: limit })
            }
        }
    }
}

/// Process group of a spawned converter, killed on drop unless disarmed.
struct ProcessGroup {
    id: Option<u32>,
}

impl ProcessGroup {
    fn new(id: Option<u32>) -> Self {
        Self { id }
    }

    fn disarm(&mut self) {
        self.id = None;
    }

    fn kill(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        #[cfg(unix)]
        signal_group(id);
        #[cfg(not(unix))]
        let _ = id;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn signal_group(id: u32) {
    let Ok(pgid) = libc::pid_t::try_from(id) else {
        return;
    };
    // SAFETY: kill(2) takes plain integers; a negative pid addresses the group.
    let result = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if result != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(?err, pgid, "failed to kill converter process group");
        }
    }
}

async fn is_directly_inside(path: &Path, dir: &Path) -> bool {
    let (Some(parent), Ok(dir)) = (path.parent(), tokio::fs::canonicalize(dir).await) else {
        return false;
    };
    tokio::fs::canonicalize(parent)
        .await
        .is_ok_and(|parent| parent == dir)
}

/// `file://` URL for an absolute path, each segment percent-encoded.
fn file_url(path: &Path) -> String {
    let segments: Vec<String> = path
        .components()
        .filter_map(|component| match component {
            Component::Normal(segment) => {
                Some(urlencoding::encode(&segment.to_string_lossy()).into_owned())
            }
            _ => None,
        })
        .collect();
    format!("file:///{}", segments.join("/"))
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>, buf: &mut Vec<u8>) -> std::io::Result<()> {
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(buf).await?;
    }
    Ok(())
}

fn absolute(target: &Path) -> Result<PathBuf, ConversionError> {
    path::absolute(target).map_err(|source| ConversionError::InvalidPath {
        path: target.to_path_buf(),
        source,
    })
}

/// Extract the destination from a status line such as
/// `convert /in/a.docx -> /out/a.pdf using filter : writer_pdf_Export`.
pub fn parse_output_path(stdout: &str) -> Option<&str> {
    stdout.lines().find_map(|line| {
        line.match_indices(OUTPUT_MARKER).find_map(|(idx, _)| {
            let rest = &line[idx + OUTPUT_MARKER.len()..];
            rest.find(FILTER_MARKER)
                .map(|end| &rest[..end])
                .filter(|path| !path.is_empty())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_announced_destination() {
        let stdout = "convert /tmp/ws/report.docx -> /tmp/ws/report.pdf using filter : writer_pdf_Export\n";
        assert_eq!(parse_output_path(stdout), Some("/tmp/ws/report.pdf"));
    }

    #[test]
    fn parses_paths_with_spaces_among_noise() {
        let stdout = "Warning: failed to launch javaldx\nconvert /a/my doc.odt -> /a/my doc.pdf using filter : writer_pdf_Export\n";
        assert_eq!(parse_output_path(stdout), Some("/a/my doc.pdf"));
    }

    #[test]
    fn file_url_encodes_segments() {
        assert_eq!(
            file_url(Path::new("/tmp/my ws/.libreoffice-profile")),
            "file:///tmp/my%20ws/.libreoffice-profile"
        );
    }

    #[test]
    fn rejects_output_without_markers() {
        assert_eq!(parse_output_path(""), None);
        assert_eq!(parse_output_path("Error: source file could not be loaded"), None);
        assert_eq!(parse_output_path("convert a -> b\nusing filter"), None);
        assert_eq!(parse_output_path("convert a ->  using filter"), None);
    }

    #[cfg(unix)]
    mod process {
        use std::{
            fs,
            os::unix::fs::PermissionsExt,
            path::{Path, PathBuf},
            time::Duration,
        };

        use tempfile::{TempDir, tempdir};

        use super::super::*;

        const LIMIT: Duration = Duration::from_secs(10);

        fn script(dir: &TempDir, body: &str) -> PathBuf {
            let path = dir.path().join("fake-soffice");
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn converting_script(dir: &TempDir) -> PathBuf {
            script(
                dir,
                r#"outdir="$6"
input="$7"
name=$(basename "$input")
stem="${name%.*}"
printf '%%PDF-1.4' > "$outdir/$stem.pdf"
echo "convert $input -> $outdir/$stem.pdf using filter : writer_pdf_Export""#,
            )
        }

        fn source(dir: &Path) -> PathBuf {
            let path = dir.join("letter.docx");
            fs::write(&path, b"docx").unwrap();
            path
        }

        #[tokio::test]
        async fn converts_into_output_dir() {
            let bin = tempdir().unwrap();
            let work = tempdir().unwrap();
            let soffice = Soffice::new(converting_script(&bin));

            let pdf = soffice
                .convert(&source(work.path()), work.path(), LIMIT)
                .await
                .unwrap();

            assert_eq!(pdf, work.path().join("letter.pdf"));
            assert_eq!(pdf.parent(), Some(work.path()));
            assert!(pdf.exists());
        }

        #[tokio::test]
        async fn reports_non_zero_exit() {
            let bin = tempdir().unwrap();
            let work = tempdir().unwrap();
            let soffice = Soffice::new(script(&bin, "echo 'source file could not be loaded' >&2\nexit 3"));

            let err = soffice
                .convert(&source(work.path()), work.path(), LIMIT)
                .await
                .unwrap_err();

            match err {
                ConversionError::ExitStatus { code, stderr } => {
                    assert_eq!(code, Some(3));
                    assert!(stderr.contains("could not be loaded"));
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[tokio::test]
        async fn reports_unparsable_output() {
            let bin = tempdir().unwrap();
            let work = tempdir().unwrap();
            let soffice = Soffice::new(script(&bin, "echo 'all done'"));

            let err = soffice
                .convert(&source(work.path()), work.path(), LIMIT)
                .await
                .unwrap_err();
            assert!(matches!(err, ConversionError::UnparsableOutput { .. }));
        }

        #[tokio::test]
        async fn reports_missing_output() {
            let bin = tempdir().unwrap();
            let work = tempdir().unwrap();
            let soffice = Soffice::new(script(
                &bin,
                r#"echo "convert $7 -> $6/never-written.pdf using filter : writer_pdf_Export""#,
            ));

            let err = soffice
                .convert(&source(work.path()), work.path(), LIMIT)
                .await
                .unwrap_err();
            assert!(matches!(err, ConversionError::MissingOutput(path) if path.ends_with("never-written.pdf")));
        }

        #[tokio::test]
        async fn reports_missing_binary() {
            let work = tempdir().unwrap();
            let soffice = Soffice::new(work.path().join("no-such-soffice"));

            let err = soffice
                .convert(&source(work.path()), work.path(), LIMIT)
                .await
                .unwrap_err();
            assert!(matches!(err, ConversionError::Spawn { .. }));
        }

        #[tokio::test]
        async fn timeout_kills_the_child() {
            let bin = tempdir().unwrap();
            let work = tempdir().unwrap();
            let pid_file = work.path().join("converter.pid");
            let soffice = Soffice::new(script(
                &bin,
                &format!("echo $$ > '{}'\nexec sleep 30", pid_file.display()),
            ));

            let started = std::time::Instant::now();
            let err = soffice
                .convert(&source(work.path()), work.path(), Duration::from_millis(1500))
                .await
                .unwrap_err();

            assert!(matches!(err, ConversionError::Timeout { .. }));
            assert!(started.elapsed() < Duration::from_secs(20));

            let pid = fs::read_to_string(&pid_file).unwrap();
            let alive = std::process::Command::new("kill")
                .args(["-0", pid.trim()])
                .stderr(std::process::Stdio::null())
                .status()
                .unwrap();
            assert!(!alive.success(), "converter {pid} still running");
        }

        #[tokio::test]
        async fn rejects_output_outside_output_dir() {
            let bin = tempdir().unwrap();
            let work = tempdir().unwrap();
            let elsewhere = tempdir().unwrap();
            let stray = elsewhere.path().join("letter.pdf");
            let soffice = Soffice::new(script(
                &bin,
                &format!(
                    "printf '%%PDF' > '{stray}'\necho \"convert $7 -> {stray} using filter : writer_pdf_Export\"",
                    stray = stray.display()
                ),
            ));

            let err = soffice
                .convert(&source(work.path()), work.path(), LIMIT)
                .await
                .unwrap_err();
            assert!(matches!(err, ConversionError::OutsideOutputDir { path, .. } if path == stray));
        }

        #[tokio::test]
        async fn uses_profile_inside_output_dir() {
            let bin = tempdir().unwrap();
            let work = tempdir().unwrap();
            let soffice = Soffice::new(script(
                &bin,
                r#"printf '%s' "$1" > "$6/profile-arg"
name=$(basename "$7")
printf '%%PDF' > "$6/${name%.*}.pdf"
echo "convert $7 -> $6/${name%.*}.pdf using filter : writer_pdf_Export""#,
            ));

            soffice
                .convert(&source(work.path()), work.path(), LIMIT)
                .await
                .unwrap();

            let arg = fs::read_to_string(work.path().join("profile-arg")).unwrap();
            let profile = path::absolute(work.path()).unwrap().join(PROFILE_DIR);
            assert_eq!(arg, format!("-env:UserInstallation={}", file_url(&profile)));
        }

        /// Gone, or a zombie waiting for its new parent to reap it.
        #[cfg(target_os = "linux")]
        fn is_running(pid: &str) -> bool {
            match fs::read_to_string(format!("/proc/{pid}/stat")) {
                Ok(stat) => stat
                    .rsplit_once(") ")
                    .is_some_and(|(_, rest)| !rest.starts_with('Z')),
                Err(_) => false,
            }
        }

        #[cfg(target_os = "linux")]
        #[tokio::test]
        async fn timeout_kills_forked_worker() {
            let bin = tempdir().unwrap();
            let work = tempdir().unwrap();
            let pid_file = work.path().join("worker.pid");
            let soffice = Soffice::new(script(
                &bin,
                &format!("sleep 60 &
echo $! > '{}'
wait", pid_file.display()),
            ));

            let err = soffice
                .convert(&source(work.path()), work.path(), Duration::from_millis(1500))
                .await
                .unwrap_err();
            assert!(matches!(err, ConversionError::Timeout { .. }));

            let pid = fs::read_to_string(&pid_file).unwrap();
            let pid = pid.trim();
            let mut running = is_running(pid);
            for _ in 0..50 {
                if !running {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
                running = is_running(pid);
            }
            assert!(!running, "worker {pid} still running");
        }

        #[tokio::test]
        async fn version_is_trimmed() {
            let bin = tempdir().unwrap();
            let soffice = Soffice::new(script(&bin, "printf '  LibreOffice 7.6.4.1 60(Build:1)\\n\\n'"));

            assert_eq!(
                soffice.version(LIMIT).await.unwrap(),
                "LibreOffice 7.6.4.1 60(Build:1)"
            );
        }
    }
}
