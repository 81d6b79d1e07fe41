/// Worker lifecycle: spawn the crawl worker, stream its merged stdout/stderr
/// into the log file, and keep the process handle for termination.
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// A launched worker process and the pump tasks feeding its log file.
#[derive(Debug)]
pub struct WorkerHandle {
    child: Child,
    pid: u32,
    pumps: Vec<JoinHandle<()>>,
}

/// Errors that can occur while launching or waiting on the worker.
#[derive(Debug)]
pub enum WorkerError {
    /// Failed to spawn the worker subprocess.
    Spawn { source: std::io::Error },
    /// Failed waiting on the worker subprocess.
    Wait { source: std::io::Error },
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerError::Spawn { source } => {
                write!(f, "failed to spawn worker subprocess: {}", source)
            }
            WorkerError::Wait { source } => {
                write!(f, "failed to wait on worker subprocess: {}", source)
            }
        }
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkerError::Spawn { source } => Some(source),
            WorkerError::Wait { source } => Some(source),
        }
    }
}

/// Create parent directories and truncate the log file.
///
/// Runs once at startup, before the follower attaches, so the follower's
/// end-of-file cursor starts at byte zero.
pub fn prepare_log_file(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::File::create(path)?;
    Ok(())
}

/// Spawn the worker, capturing stdout and stderr through pipes.
///
/// The worker gets its own process group (via `process_group(0)`) so the
/// supervisor can later signal the entire group. Output is appended to the
/// log file line by line through short-lived append handles; rotation's
/// rename therefore never strands the writer on a replaced inode.
pub fn launch(command: &str, args: &[String], log_path: &Path) -> Result<WorkerHandle, WorkerError> {
    tracing::info!(
        command = %command,
        args = ?args,
        log = %log_path.display(),
        "spawning worker"
    );

    let mut child = Command::new(command)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0) // New process group for clean kill
        .spawn()
        .map_err(|e| WorkerError::Spawn { source: e })?;

    let pid = child.id().unwrap_or(0);

    let mut pumps = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump(stdout, log_path.to_path_buf())));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(pump(stderr, log_path.to_path_buf())));
    }

    tracing::info!(pid, "worker subprocess started");

    Ok(WorkerHandle { child, pid, pumps })
}

impl WorkerHandle {
    /// Worker PID (0 if the process already vanished at spawn time).
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Non-blocking exit check.
    pub fn try_wait(&mut self) -> Result<Option<std::process::ExitStatus>, WorkerError> {
        self.child
            .try_wait()
            .map_err(|e| WorkerError::Wait { source: e })
    }

    /// Wait for the worker to exit and for its output pumps to drain.
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus, WorkerError> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| WorkerError::Wait { source: e })?;
        self.flush().await;
        Ok(status)
    }

    /// Join the pump tasks so every line the worker wrote reaches the log.
    pub async fn flush(&mut self) {
        for pump in self.pumps.drain(..) {
            let _ = pump.await;
        }
    }

    /// Send SIGTERM to the worker's process group, best-effort.
    ///
    /// Signaling an already-exited group is expected during shutdown races
    /// and is swallowed.
    pub fn signal_group(&self) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if self.pid == 0 {
            return;
        }
        if let Err(e) = killpg(Pid::from_raw(self.pid as i32), Signal::SIGTERM) {
            tracing::debug!(pid = self.pid, error = %e, "termination signal not delivered");
        }
    }
}

async fn pump<R>(reader: R, path: PathBuf)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => append_line(&path, &line),
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read worker output stream");
                break;
            }
        }
    }
}

fn append_line(path: &Path, line: &str) {
    let result = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut f| writeln!(f, "{line}"));

    if let Err(e) = result {
        tracing::warn!(error = %e, path = %path.display(), "failed to append worker output");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn captures_stdout_and_stderr_merged() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("worker.log");
        prepare_log_file(&log).unwrap();

        let mut worker = launch(
            "sh",
            &["-c".to_string(), "echo stdout-line; echo stderr-line >&2".to_string()],
            &log,
        )
        .unwrap();

        let status = worker.wait().await.unwrap();
        assert!(status.success());

        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.contains("stdout-line"));
        assert!(contents.contains("stderr-line"));
    }

    #[tokio::test]
    async fn reports_nonzero_exit() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("worker.log");
        prepare_log_file(&log).unwrap();

        let mut worker = launch("sh", &["-c".to_string(), "exit 42".to_string()], &log).unwrap();
        let status = worker.wait().await.unwrap();
        assert_eq!(status.code(), Some(42));
    }

    #[tokio::test]
    async fn spawn_failure_is_an_error() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("worker.log");
        prepare_log_file(&log).unwrap();

        let err = launch("nonexistent-binary-xyz", &[], &log).unwrap_err();
        assert!(matches!(err, WorkerError::Spawn { .. }));
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[tokio::test]
    async fn launch_appends_rather_than_truncates() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("worker.log");
        std::fs::write(&log, "pre-existing\n").unwrap();

        let mut worker = launch("echo", &["appended".to_string()], &log).unwrap();
        worker.wait().await.unwrap();

        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.contains("pre-existing"));
        assert!(contents.contains("appended"));
    }

    #[test]
    fn prepare_truncates_and_creates_parents() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("deep/nested/worker.log");

        prepare_log_file(&log).unwrap();
        assert!(log.exists());

        std::fs::write(&log, "stale content\n").unwrap();
        prepare_log_file(&log).unwrap();
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "");
    }

    #[tokio::test]
    async fn signal_group_terminates_worker() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("worker.log");
        prepare_log_file(&log).unwrap();

        let mut worker = launch("sleep", &["5".to_string()], &log).unwrap();
        assert!(worker.pid() > 0);

        let start = std::time::Instant::now();
        worker.signal_group();
        let status = worker.wait().await.unwrap();

        assert!(!status.success());
        assert!(start.elapsed() < std::time::Duration::from_secs(4));
    }

    #[tokio::test]
    async fn signal_group_on_exited_worker_is_swallowed() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("worker.log");
        prepare_log_file(&log).unwrap();

        let mut worker = launch("true", &[], &log).unwrap();
        worker.wait().await.unwrap();

        // Group is gone; this must not panic or error out.
        worker.signal_group();
    }

    #[tokio::test]
    async fn try_wait_reflects_running_state() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("worker.log");
        prepare_log_file(&log).unwrap();

        let mut worker = launch("sleep", &["0.3".to_string()], &log).unwrap();
        assert!(worker.try_wait().unwrap().is_none());

        let status = worker.wait().await.unwrap();
        assert!(status.success());
    }
}
