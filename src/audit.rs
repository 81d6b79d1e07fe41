use chrono::Utc;
use std::io::Write;
use std::path::PathBuf;

/// The supervisor's own audit trail.
///
/// One line per entry: `<UTC-ISO8601> WATCHDOG <message>`. Appends are
/// best-effort; a failing audit write never takes the supervisor down.
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn record(&self, message: &str) {
        let line = format!(
            "{} WATCHDOG {}\n",
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            message
        );

        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(line.as_bytes()));

        if let Err(e) = result {
            tracing::warn!(
                error = %e,
                path = %self.path.display(),
                "failed to write audit log entry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use tempfile::tempdir;

    #[test]
    fn entries_are_timestamped_watchdog_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("watchdog.log");

        let audit = AuditLog::new(path.clone());
        audit.record("supervising worker pid 42");
        audit.record("stable for 61s but healthy, leaving worker alone");

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let pattern =
            Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}Z WATCHDOG .+$").unwrap();
        for line in &lines {
            assert!(pattern.is_match(line), "unexpected audit line: {line}");
        }
        assert!(lines[0].ends_with("supervising worker pid 42"));
    }

    #[test]
    fn record_appends_rather_than_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("watchdog.log");

        let audit = AuditLog::new(path.clone());
        audit.record("first");
        audit.record("second");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("first"));
        assert!(contents.contains("second"));
    }

    #[test]
    fn unwritable_path_does_not_panic() {
        let audit = AuditLog::new(PathBuf::from("/nonexistent-dir/impossible/watchdog.log"));
        audit.record("dropped on the floor");
    }
}
