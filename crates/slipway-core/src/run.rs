//! Starting a build run: merging run overrides into the build, freezing the
//! result into the run's status and rendering the execution plan.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::build::{Build, BuildRetention, BuildSpec};
use crate::buildrun::{
    BuildRun, BuildRunSpec, BuildRunStatus, FailureDetails, ReferencedBuild, reason,
};
use crate::condition::{ConditionStatus, ConditionType};
use crate::error::{ErrorKind, ValidationError};
use crate::params::resolve_parameters;
use crate::render::{
    ExecutionPlan, RenderConfig, merge_env, render_steps, resolve_volumes, source_label,
};
use crate::strategy::BuildStrategySpec;
use crate::validate::validate_build_run;

/// Replace or append entries of `base` by key.
fn merge_by_key<T: Clone>(base: &mut Vec<T>, overrides: &[T], key: impl Fn(&T) -> &str) {
    for item in overrides {
        match base.iter_mut().find(|b| key(b) == key(item)) {
            Some(existing) => *existing = item.clone(),
            None => base.push(item.clone()),
        }
    }
}

/// The build spec with the run's overrides applied field by field.
///
/// The result owns all of its data; changing the build or the run afterwards
/// does not affect it.
pub fn effective_build_spec(build: &BuildSpec, run: &BuildRunSpec) -> BuildSpec {
    let mut spec = build.clone();

    merge_by_key(&mut spec.param_values, &run.param_values, |p| p.name.as_str());
    merge_env(&mut spec.env, &run.env);
    merge_by_key(&mut spec.volumes, &run.volumes, |v| v.name.as_str());

    if let Some(output) = &run.output {
        spec.output = output.clone();
    }
    if run.timeout.is_some() {
        spec.timeout = run.timeout;
    }
    if let Some(overrides) = &run.retention {
        let mut retention: BuildRetention = spec.retention.take().unwrap_or_default();
        if overrides.ttl_after_failed.is_some() {
            retention.ttl_after_failed = overrides.ttl_after_failed;
        }
        if overrides.ttl_after_succeeded.is_some() {
            retention.ttl_after_succeeded = overrides.ttl_after_succeeded;
        }
        spec.retention = Some(retention);
    }

    spec
}

/// Outcome of [`start_build_run`]: the updated run, and the plan to hand to
/// the task executor when the run could start.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStart {
    pub build_run: BuildRun,
    pub plan: Option<ExecutionPlan>,
}

/// The spec a run executes against: the frozen one once the run has started,
/// otherwise the referenced build with the run's overrides applied.
fn run_build_spec<'a>(
    run: &'a BuildRun,
    build: Option<&'a Build>,
) -> Result<(&'a BuildSpec, Option<BuildSpec>), ValidationError> {
    if let Some(frozen) = run.status.as_ref().and_then(|s| s.build_spec.as_ref()) {
        return Ok((frozen, None));
    }
    let base = match &run.spec.build {
        ReferencedBuild::Spec(spec) => spec.as_ref(),
        ReferencedBuild::Name(name) => &build
            .ok_or_else(|| {
                ValidationError::new(
                    ErrorKind::BuildNotFound,
                    "spec.build.name",
                    format!("build {:?} does not exist", name),
                )
                .with_value(name.clone())
            })?
            .spec,
    };
    Ok((base, Some(effective_build_spec(base, &run.spec))))
}

fn plan_run(
    run: &BuildRun,
    build: Option<&Build>,
    strategy: Option<&BuildStrategySpec>,
    config: &RenderConfig,
) -> Result<(BuildSpec, ExecutionPlan), ValidationError> {
    validate_build_run(&run.spec)?;

    let (base, merged) = run_build_spec(run, build)?;
    let strategy = strategy.ok_or_else(|| {
        ValidationError::new(
            ErrorKind::StrategyNotFound,
            "spec.strategy.name",
            format!("strategy {:?} does not exist", base.strategy.name),
        )
        .with_value(base.strategy.name.clone())
    })?;

    let effective = merged.unwrap_or_else(|| base.clone());
    let spec = &run.spec;
    let params = resolve_parameters(&strategy.parameters, &base.param_values, &spec.param_values)?;
    let volumes = resolve_volumes(strategy, &effective.volumes)?;
    let steps = render_steps(strategy, &effective, &params, config);

    let plan = ExecutionPlan {
        steps,
        volumes,
        service_account: spec.service_account.clone(),
        timeout: effective.timeout,
        params,
    };
    Ok((effective, plan))
}

/// Start a build run.
///
/// On success the effective build spec is frozen into the status, the start
/// time is recorded and `Succeeded` is `Unknown/Pending`. On failure the run
/// is marked failed with the error as its failure message and nothing else
/// changes. Finished runs are returned unchanged. A run that already has a
/// frozen spec is planned from it and never looks at `build` again.
pub fn start_build_run(
    run: &BuildRun,
    build: Option<&Build>,
    strategy: Option<&BuildStrategySpec>,
    config: &RenderConfig,
    now: DateTime<Utc>,
) -> RunStart {
    let name = run.metadata.name.as_deref().unwrap_or_default();
    let mut updated = run.clone();

    if run.is_done() {
        return RunStart {
            build_run: updated,
            plan: None,
        };
    }

    let mut status = updated.status.take().unwrap_or_default();

    if run.spec.is_canceled() {
        info!(build_run = %name, "build run canceled before start");
        status.conditions.set(
            ConditionType::Succeeded,
            ConditionStatus::False,
            reason::CANCELED,
            "the build run was canceled before it started",
            now,
        );
        status.completion_time = Some(now);
        updated.status = Some(status);
        return RunStart {
            build_run: updated,
            plan: None,
        };
    }

    match plan_run(run, build, strategy, config) {
        Ok((frozen, plan)) => {
            info!(
                build_run = %name,
                source = %source_label(&frozen),
                steps = plan.steps.len(),
                "build run started"
            );
            status.build_spec = Some(frozen);
            status.start_time = status.start_time.or(Some(now));
            status.conditions.set(
                ConditionType::Succeeded,
                ConditionStatus::Unknown,
                reason::PENDING,
                "the build run is waiting for execution",
                now,
            );
            updated.status = Some(status);
            RunStart {
                build_run: updated,
                plan: Some(plan),
            }
        }
        Err(err) => {
            warn!(build_run = %name, error = %err, "build run could not start");
            fail(&mut status, &err, now);
            updated.status = Some(status);
            RunStart {
                build_run: updated,
                plan: None,
            }
        }
    }
}

fn fail(status: &mut BuildRunStatus, err: &ValidationError, now: DateTime<Utc>) {
    let message = err.to_string();
    status.conditions.set(
        ConditionType::Succeeded,
        ConditionStatus::False,
        err.kind.to_string(),
        message.clone(),
        now,
    );
    status.completion_time = Some(now);
    status.failure_details = Some(FailureDetails {
        reason: err.kind.to_string(),
        message,
        location: None,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{Image, Source, Strategy};
    use crate::buildrun::BuildRunRetention;
    use crate::duration::Duration;
    use crate::params::{ResolvedValue, ValueSource};
    use crate::strategy::{Parameter, Step};
    use crate::value::{ParamValue, SingleValue};
    use chrono::TimeZone;
    use k8s_openapi::api::core::v1::EnvVar;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn strategy() -> BuildStrategySpec {
        BuildStrategySpec {
            steps: vec![Step {
                name: "build".to_string(),
                image: "quay.io/buildah/stable".to_string(),
                args: vec!["--tag=$(params.shp-output-image):$(params.tag)".to_string()],
                ..Default::default()
            }],
            parameters: vec![Parameter::string("tag").with_default("latest")],
            volumes: vec![],
        }
    }

    fn build() -> Build {
        Build::new(
            "app",
            BuildSpec {
                source: Some(Source::git("https://github.com/acme/app")),
                strategy: Strategy::cluster("buildah"),
                output: Image::new("registry/app"),
                env: vec![EnvVar {
                    name: "A".to_string(),
                    value: Some("build".to_string()),
                    value_from: None,
                }],
                retention: Some(BuildRetention {
                    succeeded_limit: Some(3),
                    ttl_after_failed: Some(Duration::from_secs(3600)),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_effective_spec_merges_field_by_field() {
        let build = build();
        let mut run = BuildRunSpec::for_build("app");
        run.env = vec![EnvVar {
            name: "A".to_string(),
            value: Some("run".to_string()),
            value_from: None,
        }];
        run.output = Some(Image::new("registry/app-dev"));
        run.retention = Some(BuildRunRetention {
            ttl_after_failed: Some(Duration::from_secs(60)),
            ttl_after_succeeded: None,
        });

        let effective = effective_build_spec(&build.spec, &run);
        assert_eq!(effective.env[0].value.as_deref(), Some("run"));
        assert_eq!(effective.output.image, "registry/app-dev");
        let retention = effective.retention.unwrap();
        assert_eq!(retention.succeeded_limit, Some(3));
        assert_eq!(retention.ttl_after_failed, Some(Duration::from_secs(60)));
        assert_eq!(effective.strategy, build.spec.strategy);
        assert_eq!(effective.timeout, None);
    }

    #[test]
    fn test_start_freezes_spec_and_renders() {
        let build = build();
        let mut spec = BuildRunSpec::for_build("app");
        spec.param_values = vec![ParamValue::literal("tag", "v2")];
        let run = BuildRun::new("app-1", spec);

        let start = start_build_run(
            &run,
            Some(&build),
            Some(&strategy()),
            &RenderConfig::default(),
            now(),
        );

        let status = start.build_run.status.as_ref().unwrap();
        assert_eq!(status.start_time, Some(now()));
        let cond = status.succeeded().unwrap();
        assert_eq!(cond.status, ConditionStatus::Unknown);
        assert_eq!(cond.reason, reason::PENDING);
        let frozen = status.build_spec.as_ref().unwrap();
        assert_eq!(frozen.param_value("tag"), Some(&ParamValue::literal("tag", "v2")));

        let plan = start.plan.unwrap();
        assert_eq!(plan.steps[0].args, vec!["--tag=registry/app:v2"]);
        assert_eq!(plan.params.get("tag").unwrap().source, ValueSource::BuildRun);
        assert_eq!(
            plan.params.value("tag"),
            Some(&ResolvedValue::Single(SingleValue::literal("v2")))
        );
    }

    #[test]
    fn test_frozen_spec_ignores_later_build_edits() {
        let mut build = build();
        let run = BuildRun::new("app-1", BuildRunSpec::for_build("app"));
        let start = start_build_run(
            &run,
            Some(&build),
            Some(&strategy()),
            &RenderConfig::default(),
            now(),
        );

        build.spec.output.image = "registry/other".to_string();
        let frozen = start.build_run.status.unwrap().build_spec.unwrap();
        assert_eq!(frozen.output.image, "registry/app");
    }

    #[test]
    fn test_restart_keeps_frozen_spec() {
        let mut build = build();
        let run = BuildRun::new("app-1", BuildRunSpec::for_build("app"));
        let first = start_build_run(
            &run,
            Some(&build),
            Some(&strategy()),
            &RenderConfig::default(),
            now(),
        );

        build.spec.output.image = "registry/edited".to_string();
        let second = start_build_run(
            &first.build_run,
            Some(&build),
            Some(&strategy()),
            &RenderConfig::default(),
            now() + chrono::TimeDelta::minutes(1),
        );
        let status = second.build_run.status.as_ref().unwrap();
        assert_eq!(status.build_spec.as_ref().unwrap().output.image, "registry/app");
        assert_eq!(status.start_time, Some(now()));
        assert_eq!(second.plan.unwrap().steps[0].args, vec!["--tag=registry/app:latest"]);

        // the build is gone, the started run still plans from its frozen spec
        let third = start_build_run(
            &first.build_run,
            None,
            Some(&strategy()),
            &RenderConfig::default(),
            now(),
        );
        assert!(third.plan.is_some());
        assert_eq!(
            third.build_run.status.unwrap().succeeded().unwrap().status,
            ConditionStatus::Unknown
        );
    }

    #[test]
    fn test_missing_build_fails_without_partial_state() {
        let run = BuildRun::new("app-1", BuildRunSpec::for_build("app"));
        let start = start_build_run(&run, None, Some(&strategy()), &RenderConfig::default(), now());

        assert!(start.plan.is_none());
        let status = start.build_run.status.unwrap();
        assert!(status.build_spec.is_none());
        assert!(status.start_time.is_none());
        assert_eq!(status.completion_time, Some(now()));
        let cond = status.succeeded().unwrap();
        assert_eq!(cond.status, ConditionStatus::False);
        assert_eq!(cond.reason, "BuildNotFound");
        let details = status.failure_details.unwrap();
        assert!(details.message.contains("\"app\" does not exist"));
    }

    #[test]
    fn test_resolution_error_fails_run() {
        let mut spec = BuildRunSpec::for_build("app");
        spec.param_values = vec![ParamValue::literal("unknown", "x")];
        let run = BuildRun::new("app-1", spec);
        let start = start_build_run(
            &run,
            Some(&build()),
            Some(&strategy()),
            &RenderConfig::default(),
            now(),
        );
        let status = start.build_run.status.unwrap();
        assert_eq!(status.succeeded().unwrap().reason, "UnknownParameter");
        assert!(
            status
                .failure_details
                .unwrap()
                .message
                .contains("buildRun.paramValues[unknown]")
        );
    }

    #[test]
    fn test_inline_build_needs_no_lookup() {
        let run = BuildRun::new("inline-1", BuildRunSpec::inline(build().spec));
        let start = start_build_run(&run, None, Some(&strategy()), &RenderConfig::default(), now());
        assert!(start.plan.is_some());
    }

    #[test]
    fn test_canceled_and_finished_runs() {
        let mut spec = BuildRunSpec::for_build("app");
        spec.state = Some(crate::buildrun::BuildRunRequestedState::BuildRunCanceled);
        let run = BuildRun::new("app-1", spec);
        let start = start_build_run(
            &run,
            Some(&build()),
            Some(&strategy()),
            &RenderConfig::default(),
            now(),
        );
        assert!(start.plan.is_none());
        assert_eq!(
            start.build_run.status.as_ref().unwrap().succeeded().unwrap().reason,
            reason::CANCELED
        );

        // a finished run is left alone
        let again = start_build_run(
            &start.build_run,
            Some(&build()),
            Some(&strategy()),
            &RenderConfig::default(),
            now(),
        );
        assert_eq!(again.build_run, start.build_run);
    }
}
