//! Folding task executor updates into build run status.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::buildrun::{BuildRun, FailedAt, FailureDetails, OutputResult, SourceResult, reason};
use crate::condition::{ConditionStatus, ConditionType};
use crate::duration::Duration;

/// Phase reported by the task executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskPhase {
    Pending,
    Running,
    Succeeded,
    Failed {
        reason: Option<String>,
        message: String,
        failed_at: Option<FailedAt>,
    },
    Cancelled,
    TimedOut(Option<Duration>),
}

/// One status report from the task executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRunUpdate {
    pub task_run_name: Option<String>,
    pub phase: TaskPhase,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub sources: Vec<SourceResult>,
    pub output: Option<OutputResult>,
}

impl TaskRunUpdate {
    pub fn new(phase: TaskPhase) -> Self {
        Self {
            task_run_name: None,
            phase,
            start_time: None,
            completion_time: None,
            sources: Vec::new(),
            output: None,
        }
    }
}

/// Apply a task update to a run.
///
/// Finished runs are returned unchanged. Terminal phases record the
/// completion time (the executor's, or `now`).
pub fn apply_task_update(run: &BuildRun, update: &TaskRunUpdate, now: DateTime<Utc>) -> BuildRun {
    let mut updated = run.clone();
    if run.is_done() {
        return updated;
    }

    let mut status = updated.status.take().unwrap_or_default();
    if let Some(name) = &update.task_run_name {
        status.task_run_name = Some(name.clone());
    }
    if status.start_time.is_none() {
        status.start_time = update.start_time;
    }
    if !update.sources.is_empty() {
        status.sources = update.sources.clone();
    }
    if update.output.is_some() {
        status.output = update.output.clone();
    }

    let (condition, reason, message): (ConditionStatus, String, String) = match &update.phase {
        TaskPhase::Pending => (
            ConditionStatus::Unknown,
            reason::PENDING.to_string(),
            "the build run is waiting for execution".to_string(),
        ),
        TaskPhase::Running => (
            ConditionStatus::Unknown,
            reason::RUNNING.to_string(),
            "the build run is executing".to_string(),
        ),
        TaskPhase::Succeeded => (
            ConditionStatus::True,
            reason::SUCCEEDED.to_string(),
            "all steps completed successfully".to_string(),
        ),
        TaskPhase::Failed {
            reason: failure_reason,
            message,
            failed_at,
        } => {
            let failure_reason = failure_reason
                .clone()
                .unwrap_or_else(|| reason::FAILED.to_string());
            status.failed_at = failed_at.clone();
            status.failure_details = Some(FailureDetails {
                reason: failure_reason.clone(),
                message: message.clone(),
                location: failed_at.clone(),
            });
            (ConditionStatus::False, failure_reason, message.clone())
        }
        TaskPhase::Cancelled => (
            ConditionStatus::False,
            reason::CANCELED.to_string(),
            "the build run was canceled".to_string(),
        ),
        TaskPhase::TimedOut(timeout) => (
            ConditionStatus::False,
            reason::TIMEOUT.to_string(),
            match timeout {
                Some(t) => format!("the build run exceeded its timeout of {}", t),
                None => "the build run exceeded its timeout".to_string(),
            },
        ),
    };

    if condition != ConditionStatus::Unknown {
        status.completion_time = Some(update.completion_time.unwrap_or(now));
    }
    let changed = status
        .conditions
        .set(ConditionType::Succeeded, condition, reason, message, now);
    debug!(
        build_run = run.metadata.name.as_deref().unwrap_or_default(),
        ?condition,
        changed,
        "applied task update"
    );

    updated.status = Some(status);
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildrun::{BuildRunSpec, GitSourceResult, SourceResultKind};
    use chrono::TimeZone;

    fn at(mins: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + chrono::TimeDelta::minutes(mins)
    }

    fn run() -> BuildRun {
        BuildRun::new("app-1", BuildRunSpec::for_build("app"))
    }

    #[test]
    fn test_running_then_succeeded() {
        let mut update = TaskRunUpdate::new(TaskPhase::Running);
        update.task_run_name = Some("app-1-xyz".to_string());
        update.start_time = Some(at(0));
        let running = apply_task_update(&run(), &update, at(1));

        let status = running.status.as_ref().unwrap();
        assert_eq!(status.task_run_name.as_deref(), Some("app-1-xyz"));
        assert_eq!(status.start_time, Some(at(0)));
        assert_eq!(status.succeeded().unwrap().reason, reason::RUNNING);
        assert!(status.completion_time.is_none());

        // same status again keeps the transition time
        let running_again = apply_task_update(&running, &update, at(2));
        assert_eq!(
            running_again
                .status
                .as_ref()
                .unwrap()
                .succeeded()
                .unwrap()
                .last_transition_time,
            at(1)
        );

        let mut done = TaskRunUpdate::new(TaskPhase::Succeeded);
        done.sources = vec![SourceResult {
            name: "default".to_string(),
            result: SourceResultKind::Git(GitSourceResult {
                commit_sha: "abc".to_string(),
                ..Default::default()
            }),
        }];
        done.output = Some(OutputResult {
            digest: "sha256:1".to_string(),
            size: Some(10),
        });
        let finished = apply_task_update(&running_again, &done, at(5));
        let status = finished.status.as_ref().unwrap();
        assert_eq!(status.outcome(), Some(true));
        assert_eq!(status.completion_time, Some(at(5)));
        assert_eq!(status.sources.len(), 1);
        assert_eq!(status.output.as_ref().unwrap().digest, "sha256:1");
    }

    #[test]
    fn test_failure_records_location() {
        let update = TaskRunUpdate::new(TaskPhase::Failed {
            reason: None,
            message: "step exited with 1".to_string(),
            failed_at: Some(FailedAt {
                pod: "app-1-pod".to_string(),
                container: "step-build".to_string(),
            }),
        });
        let failed = apply_task_update(&run(), &update, at(3));
        let status = failed.status.unwrap();
        assert_eq!(status.outcome(), Some(false));
        assert_eq!(status.succeeded().unwrap().reason, reason::FAILED);
        assert_eq!(status.failed_at.as_ref().unwrap().container, "step-build");
        let details = status.failure_details.unwrap();
        assert_eq!(details.message, "step exited with 1");
        assert_eq!(details.location.unwrap().pod, "app-1-pod");
    }

    #[test]
    fn test_cancel_and_timeout_reasons() {
        let canceled = apply_task_update(&run(), &TaskRunUpdate::new(TaskPhase::Cancelled), at(1));
        assert_eq!(
            canceled.status.unwrap().succeeded().unwrap().reason,
            reason::CANCELED
        );

        let timed_out = apply_task_update(
            &run(),
            &TaskRunUpdate::new(TaskPhase::TimedOut(Some(Duration::from_secs(600)))),
            at(1),
        );
        let status = timed_out.status.unwrap();
        let cond = status.succeeded().unwrap();
        assert_eq!(cond.reason, reason::TIMEOUT);
        assert!(cond.message.contains("10m0s"));
    }

    #[test]
    fn test_finished_run_is_unchanged() {
        let done = apply_task_update(&run(), &TaskRunUpdate::new(TaskPhase::Succeeded), at(1));
        let late = apply_task_update(&done, &TaskRunUpdate::new(TaskPhase::Running), at(2));
        assert_eq!(late, done);
    }
}
