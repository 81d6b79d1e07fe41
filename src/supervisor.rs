/// Core loop: follow the worker's output, track line stability, rotate the
/// log, and terminate the worker when a failure signature stays on the
/// stable line past the stability window.
use crate::audit::AuditLog;
use crate::classify::{Classification, Classifier};
use crate::config::KeeperConfig;
use crate::rotate::LogRotator;
use crate::stability::StabilityState;
use crate::status::{StatusData, StatusFile, SupervisorState};
use crate::tail::LineSource;
use crate::worker::WorkerHandle;
use chrono::Utc;
use std::time::{Duration, Instant};

/// How long to wait for the worker to die after SIGTERM before giving up
/// and exiting anyway.
const TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// Why the loop stopped. Every variant maps to a non-zero exit code: the
/// surrounding orchestration layer restarts the unit on anything but 0.
#[derive(Debug, PartialEq, Eq)]
pub enum ExitReason {
    /// The stable line contained the fatal marker.
    FatalMarker,
    /// The stable line carried a non-zero failed-job count.
    FailedUnits(u64),
    /// Total stall time exceeded the hard ceiling (aggressive policy only).
    StallCeiling,
    /// The worker ended on its own.
    WorkerExited(Option<i32>),
}

impl ExitReason {
    /// Process exit code for this reason. Never 0.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Run the supervision loop until a terminal condition, then perform the
/// termination sequence. Returns the reason; the caller maps it to the
/// process exit code.
pub async fn run(
    config: &KeeperConfig,
    classifier: Classifier,
    mut worker: WorkerHandle,
    mut lines: LineSource,
) -> ExitReason {
    let stability_timeout = config.watch.stability_timeout();
    let audit = AuditLog::new(config.files.audit_log.clone());
    let rotator = LogRotator::new(
        config.files.log_file.clone(),
        config.rotation.max_log_lines,
        config.rotation.trim_to_lines,
    );
    let status = StatusFile::new(config.files.status_file.clone());

    let mut state = StabilityState::new();
    let mut last_health_note = Instant::now();

    audit.record(&format!("supervising worker pid {}", worker.pid()));
    write_status(&status, SupervisorState::Running, worker.pid(), &state);

    let reason = loop {
        // Running: bounded pull, then drain whatever else is queued so
        // rotation and evaluation stay once-per-cycle, not once-per-line.
        if let Some(line) = lines.next_line(stability_timeout).await {
            state.observe(&line);
            while let Some(extra) = lines.try_next() {
                state.observe(&extra);
            }
        }

        match worker.try_wait() {
            Ok(Some(exit)) => {
                audit.record(&format!("worker exited on its own ({exit})"));
                break ExitReason::WorkerExited(exit.code());
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "failed to poll worker status");
            }
        }

        rotator.rotate_if_needed();

        // Evaluating
        let stable = state.stable_duration();
        if stable < stability_timeout {
            continue;
        }

        match classifier.classify(state.last_line()) {
            Classification::Fatal => {
                audit.record(&format!(
                    "fatal marker stable for {}s, terminating worker",
                    stable.as_secs()
                ));
                break ExitReason::FatalMarker;
            }
            Classification::FailedUnits(count) => {
                audit.record(&format!(
                    "{count} failed jobs stable for {}s, terminating worker",
                    stable.as_secs()
                ));
                break ExitReason::FailedUnits(count);
            }
            Classification::Healthy => {
                // A stalled-but-not-erroring worker is left alone under the
                // patient policy. Note it at most once per stability window.
                if last_health_note.elapsed() >= stability_timeout {
                    audit.record(&format!(
                        "stable for {}s but healthy, leaving worker alone",
                        stable.as_secs()
                    ));
                    last_health_note = Instant::now();
                    write_status(&status, SupervisorState::StableHealthy, worker.pid(), &state);
                }

                if let Some(ceiling) = config.watch.stall_ceiling() {
                    if stable >= ceiling {
                        audit.record(&format!(
                            "stall ceiling of {}s exceeded, terminating worker",
                            ceiling.as_secs()
                        ));
                        break ExitReason::StallCeiling;
                    }
                }
            }
        }
    };

    match reason {
        ExitReason::WorkerExited(_) => {
            write_status(&status, SupervisorState::WorkerExited, worker.pid(), &state);
            worker.flush().await;
        }
        _ => {
            write_status(&status, SupervisorState::Terminating, worker.pid(), &state);
            worker.signal_group();
            drop(lines);

            match tokio::time::timeout(TERMINATION_GRACE, worker.wait()).await {
                Ok(Ok(exit)) => {
                    audit.record(&format!("worker terminated ({exit})"));
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "failed waiting for terminated worker");
                }
                Err(_) => {
                    audit.record("worker did not exit within termination grace, exiting anyway");
                }
            }
        }
    }

    status.remove();
    reason
}

fn write_status(file: &StatusFile, state: SupervisorState, worker_pid: u32, tracker: &StabilityState) {
    let data = StatusData {
        pid: std::process::id(),
        worker_pid,
        state,
        stable_secs: tracker.stable_duration().as_secs(),
        last_line: tracker.last_line().to_string(),
        last_update: Utc::now(),
    };
    if let Err(e) = file.write(&data) {
        tracing::warn!(error = %e, "failed to write status file");
    }
}
