use std::path::{Path, PathBuf};

/// Keeps the worker log under a maximum line count.
///
/// Rewrites use the temp-file-then-rename sequence so the follower never
/// observes a partially written file. Read failures are transient: the log
/// may not exist yet while the worker is starting up.
pub struct LogRotator {
    path: PathBuf,
    max_lines: usize,
    trim_to: usize,
}

impl LogRotator {
    pub fn new(path: PathBuf, max_lines: usize, trim_to: usize) -> Self {
        Self {
            path,
            max_lines,
            trim_to,
        }
    }

    /// Trim the file to its last `trim_to` lines if it exceeds `max_lines`.
    ///
    /// Returns true when a rotation happened. A file at or below the bound,
    /// a missing file, and any I/O failure all leave the file alone.
    pub fn rotate_if_needed(&self) -> bool {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        error = %e,
                        path = %self.path.display(),
                        "failed to read log for rotation check"
                    );
                }
                return false;
            }
        };

        let count = contents.lines().count();
        if count <= self.max_lines {
            return false;
        }

        let skip = count.saturating_sub(self.trim_to);
        if skip == 0 {
            return false;
        }

        // Byte offset of the first retained line, so the kept tail is
        // byte-identical to the original.
        let mut start = contents.len();
        let mut dropped = 0usize;
        for (i, b) in contents.bytes().enumerate() {
            if b == b'\n' {
                dropped += 1;
                if dropped == skip {
                    start = i + 1;
                    break;
                }
            }
        }
        let tail = &contents[start..];

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "log".to_string());
        let tmp_path = dir.join(format!(".{}.tmp.{}", name, std::process::id()));

        if let Err(e) = std::fs::write(&tmp_path, tail) {
            tracing::warn!(
                error = %e,
                path = %tmp_path.display(),
                "failed to write rotation temp file"
            );
            return false;
        }

        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            tracing::warn!(
                error = %e,
                path = %self.path.display(),
                "failed to replace log during rotation"
            );
            let _ = std::fs::remove_file(&tmp_path);
            return false;
        }

        tracing::debug!(
            before = count,
            after = self.trim_to,
            path = %self.path.display(),
            "log rotated"
        );
        true
    }
}
