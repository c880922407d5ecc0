//! Retention of terminal build runs.
//!
//! Runs are split by outcome. Within each group a count limit makes the
//! oldest runs beyond the limit eligible for deletion, and a TTL makes every
//! run older than the TTL eligible. Either rule is enough.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

use crate::build::BuildRetention;
use crate::buildrun::{BuildRun, BuildRunRetention};

/// Overlay a run's TTL overrides onto the build's policy, field by field.
pub fn effective_retention(
    build: Option<&BuildRetention>,
    run: Option<&BuildRunRetention>,
) -> BuildRetention {
    let mut retention = build.cloned().unwrap_or_default();
    if let Some(run) = run {
        if run.ttl_after_failed.is_some() {
            retention.ttl_after_failed = run.ttl_after_failed;
        }
        if run.ttl_after_succeeded.is_some() {
            retention.ttl_after_succeeded = run.ttl_after_succeeded;
        }
    }
    retention
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RunOutcome {
    Succeeded,
    Failed,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Succeeded => write!(f, "succeeded"),
            RunOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// A run eligible for deletion and the rules that made it so.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetentionDecision {
    pub name: String,
    pub outcome: RunOutcome,
    pub completed_at: DateTime<Utc>,
    /// Beyond the count limit of its outcome group.
    pub over_limit: bool,
    /// Older than the TTL for its outcome.
    pub expired: bool,
}

struct Terminal<'a> {
    run: &'a BuildRun,
    name: String,
    outcome: RunOutcome,
    completed_at: DateTime<Utc>,
}

/// Completion time of a terminal run, falling back to the time its
/// `Succeeded` condition last changed.
fn terminal(run: &BuildRun) -> Option<Terminal<'_>> {
    let status = run.status.as_ref()?;
    let outcome = match status.outcome()? {
        true => RunOutcome::Succeeded,
        false => RunOutcome::Failed,
    };
    let completed_at = status
        .completion_time
        .or_else(|| status.succeeded().map(|c| c.last_transition_time))?;
    Some(Terminal {
        run,
        name: run.metadata.name.clone().unwrap_or_default(),
        outcome,
        completed_at,
    })
}

/// Decide which runs of a build may be deleted.
///
/// Count limits come from the build's policy only; TTLs honour each run's
/// own overrides. Runs that have not finished are never eligible. The
/// result is ordered by completion time, then name.
pub fn evaluate_retention(
    build_retention: Option<&BuildRetention>,
    runs: &[BuildRun],
    now: DateTime<Utc>,
) -> Vec<RetentionDecision> {
    let mut terminal_runs: Vec<Terminal<'_>> = runs.iter().filter_map(terminal).collect();
    terminal_runs.sort_by(|a, b| {
        a.completed_at
            .cmp(&b.completed_at)
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut decisions = Vec::new();
    for outcome in [RunOutcome::Failed, RunOutcome::Succeeded] {
        let group: Vec<&Terminal<'_>> = terminal_runs
            .iter()
            .filter(|t| t.outcome == outcome)
            .collect();
        let limit = build_retention.and_then(|r| match outcome {
            RunOutcome::Failed => r.failed_limit,
            RunOutcome::Succeeded => r.succeeded_limit,
        });
        let excess = limit.map_or(0, |l| group.len().saturating_sub(l as usize));

        for (idx, t) in group.iter().enumerate() {
            let retention = effective_retention(build_retention, t.run.spec.retention.as_ref());
            let ttl = match outcome {
                RunOutcome::Failed => retention.ttl_after_failed,
                RunOutcome::Succeeded => retention.ttl_after_succeeded,
            };
            let expired = ttl.is_some_and(|ttl| {
                t.completed_at
                    .checked_add_signed(ttl.to_chrono())
                    .is_some_and(|deadline| deadline <= now)
            });
            let over_limit = idx < excess;

            debug!(run = %t.name, %outcome, over_limit, expired, "retention verdict");
            if over_limit || expired {
                decisions.push(RetentionDecision {
                    name: t.name.clone(),
                    outcome,
                    completed_at: t.completed_at,
                    over_limit,
                    expired,
                });
            }
        }
    }

    decisions.sort_by(|a, b| {
        a.completed_at
            .cmp(&b.completed_at)
            .then_with(|| a.name.cmp(&b.name))
    });
    info!(
        considered = terminal_runs.len(),
        eligible = decisions.len(),
        "evaluated retention"
    );
    decisions
}
