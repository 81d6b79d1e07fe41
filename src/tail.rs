/// Follow-mode line source over the worker log.
///
/// A spawned task owns the read cursor: it polls the file by path (rotation
/// renames a fresh file into place, so holding an open handle would pin the
/// old inode), slices complete lines out of the newly appended bytes, and
/// pushes non-blank lines into a channel. The consumer pulls with a bounded
/// wait and never blocks past it.
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub struct LineSource {
    rx: mpsc::Receiver<String>,
    follower: JoinHandle<()>,
}

impl LineSource {
    /// Start following `path`, beginning at its current end-of-file.
    /// Content already present at creation time is never surfaced.
    pub fn spawn(path: PathBuf, poll_interval: Duration) -> Self {
        let cursor = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let (tx, rx) = mpsc::channel(256);
        let follower = tokio::spawn(follow(path, cursor, poll_interval, tx));
        Self { rx, follower }
    }

    /// Pull the next line, waiting at most `wait`. Returns None when no new
    /// data arrived within the bound.
    pub async fn next_line(&mut self, wait: Duration) -> Option<String> {
        match timeout(wait, self.rx.recv()).await {
            Ok(line) => line,
            Err(_) => None,
        }
    }

    /// Drain a line that is already queued, without waiting.
    pub fn try_next(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

impl Drop for LineSource {
    fn drop(&mut self) {
        self.follower.abort();
    }
}

async fn follow(path: PathBuf, mut cursor: u64, poll_interval: Duration, tx: mpsc::Sender<String>) {
    // Carry-over for a trailing line the writer has not finished yet.
    let mut pending = String::new();

    loop {
        tokio::time::sleep(poll_interval).await;

        let len = match std::fs::metadata(&path) {
            Ok(m) => m.len(),
            Err(_) => continue,
        };

        if len < cursor {
            // File shrank: rotation replaced it. Skip to the new end rather
            // than replaying trimmed lines.
            cursor = len;
            pending.clear();
            continue;
        }
        if len == cursor {
            continue;
        }

        let mut file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to open followed log");
                continue;
            }
        };
        if file.seek(SeekFrom::Start(cursor)).is_err() {
            continue;
        }

        let mut chunk = Vec::with_capacity((len - cursor) as usize);
        match file.take(len - cursor).read_to_end(&mut chunk) {
            Ok(read) => cursor += read as u64,
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to read followed log");
                continue;
            }
        }

        pending.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(idx) = pending.find('\n') {
            let raw: String = pending.drain(..=idx).collect();
            let line = raw.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                continue;
            }
            if tx.send(line.to_string()).await.is_err() {
                // Consumer is gone, stop following.
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    const POLL: Duration = Duration::from_millis(20);
    const WAIT: Duration = Duration::from_millis(500);

    fn append(path: &std::path::Path, text: &str) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn yields_lines_appended_after_creation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("worker.log");
        std::fs::write(&path, "").unwrap();

        let mut source = LineSource::spawn(path.clone(), POLL);
        append(&path, "first\nsecond\n");

        assert_eq!(source.next_line(WAIT).await.as_deref(), Some("first"));
        assert_eq!(source.next_line(WAIT).await.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn does_not_replay_preexisting_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("worker.log");
        std::fs::write(&path, "old line 1\nold line 2\n").unwrap();

        let mut source = LineSource::spawn(path.clone(), POLL);
        append(&path, "fresh\n");

        assert_eq!(source.next_line(WAIT).await.as_deref(), Some("fresh"));
        assert_eq!(source.next_line(Duration::from_millis(100)).await, None);
    }

    #[tokio::test]
    async fn filters_blank_and_whitespace_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("worker.log");
        std::fs::write(&path, "").unwrap();

        let mut source = LineSource::spawn(path.clone(), POLL);
        append(&path, "\n   \n\t\nreal\n\n");

        assert_eq!(source.next_line(WAIT).await.as_deref(), Some("real"));
        assert_eq!(source.next_line(Duration::from_millis(100)).await, None);
    }

    #[tokio::test]
    async fn bounded_wait_returns_none_without_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("worker.log");
        std::fs::write(&path, "").unwrap();

        let mut source = LineSource::spawn(path, POLL);
        let start = std::time::Instant::now();
        assert_eq!(source.next_line(Duration::from_millis(150)).await, None);
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn incomplete_line_waits_for_newline() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("worker.log");
        std::fs::write(&path, "").unwrap();

        let mut source = LineSource::spawn(path.clone(), POLL);
        append(&path, "no newline yet");
        assert_eq!(source.next_line(Duration::from_millis(100)).await, None);

        append(&path, "!\n");
        assert_eq!(
            source.next_line(WAIT).await.as_deref(),
            Some("no newline yet!")
        );
    }

    #[tokio::test]
    async fn survives_rotation_without_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("worker.log");
        std::fs::write(&path, "").unwrap();

        let mut source = LineSource::spawn(path.clone(), POLL);
        append(&path, "a\nb\nc\nd\n");
        for expected in ["a", "b", "c", "d"] {
            assert_eq!(source.next_line(WAIT).await.as_deref(), Some(expected));
        }

        // Rotation rewrites the file to a shorter tail.
        std::fs::write(&path, "c\nd\n").unwrap();
        tokio::time::sleep(POLL * 5).await;

        append(&path, "e\n");
        assert_eq!(source.next_line(WAIT).await.as_deref(), Some("e"));
        assert_eq!(source.next_line(Duration::from_millis(100)).await, None);
    }

    #[tokio::test]
    async fn try_next_drains_queued_lines_without_waiting() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("worker.log");
        std::fs::write(&path, "").unwrap();

        let mut source = LineSource::spawn(path.clone(), POLL);
        append(&path, "one\ntwo\nthree\n");

        assert_eq!(source.next_line(WAIT).await.as_deref(), Some("one"));
        assert_eq!(source.try_next().as_deref(), Some("two"));
        assert_eq!(source.try_next().as_deref(), Some("three"));
        assert_eq!(source.try_next(), None);
    }
}
