//! Admission checks for strategies, builds and build runs.
//!
//! Each check returns the first problem found, in a fixed order, so the same
//! object always yields the same error.

use std::collections::BTreeSet;
use tracing::debug;
use url::Url;

use crate::build::{BuildRetention, BuildSpec, BuildStatus, Image, SourceOrigin};
use crate::buildrun::{BuildRunSpec, ReferencedBuild};
use crate::error::{ErrorKind, ValidationError};
use crate::params::{check_param_values, index_declarations};
use crate::render::resolve_volumes;
use crate::strategy::BuildStrategySpec;
use crate::trigger::Trigger;
use crate::value::ParamValue;

pub const RETENTION_LIMIT_MIN: u32 = 1;
pub const RETENTION_LIMIT_MAX: u32 = 10_000;

const GIT_SCHEMES: [&str; 5] = ["http", "https", "ssh", "git", "file"];

/// Reject the first name that appears twice.
fn unique_names<'a>(
    names: impl IntoIterator<Item = &'a str>,
    path: &str,
) -> Result<(), ValidationError> {
    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ValidationError::new(
                ErrorKind::DuplicateName,
                format!("{}[{}]", path, name),
                "name is used more than once",
            ));
        }
    }
    Ok(())
}

fn non_empty(value: &str, path: &str, what: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(
            ErrorKind::InvalidField,
            path,
            format!("{} must not be empty", what),
        ));
    }
    Ok(())
}

pub fn validate_strategy(spec: &BuildStrategySpec) -> Result<(), ValidationError> {
    unique_names(spec.steps.iter().map(|s| s.name.as_str()), "steps")?;
    for step in &spec.steps {
        non_empty(&step.name, "steps[]", "step name")?;
        non_empty(&step.image, &format!("steps[{}].image", step.name), "step image")?;
    }
    index_declarations(&spec.parameters)?;
    unique_names(spec.volumes.iter().map(|v| v.name()), "volumes")?;
    resolve_volumes(spec, &[])?;
    Ok(())
}

fn validate_git_url(raw: &str, path: &str) -> Result<(), ValidationError> {
    non_empty(raw, path, "git url")?;
    // scp-like form, git@host:org/repo.git
    if let Some((user_host, repo)) = raw.split_once(':') {
        if user_host.contains('@') && !user_host.contains('/') && !repo.starts_with("//") {
            return Ok(());
        }
    }
    let url = Url::parse(raw).map_err(|e| {
        ValidationError::new(ErrorKind::InvalidField, path, format!("invalid git url: {}", e))
            .with_value(raw)
    })?;
    if !GIT_SCHEMES.contains(&url.scheme()) {
        return Err(ValidationError::new(
            ErrorKind::InvalidField,
            path,
            format!("unsupported git url scheme {:?}", url.scheme()),
        )
        .with_value(raw));
    }
    Ok(())
}

fn validate_output(output: &Image, path: &str) -> Result<(), ValidationError> {
    non_empty(&output.image, &format!("{}.image", path), "output image")
}

fn validate_retention(retention: &BuildRetention, path: &str) -> Result<(), ValidationError> {
    let limits = [
        ("failedLimit", retention.failed_limit),
        ("succeededLimit", retention.succeeded_limit),
    ];
    for (field, limit) in limits {
        if let Some(limit) = limit {
            if !(RETENTION_LIMIT_MIN..=RETENTION_LIMIT_MAX).contains(&limit) {
                return Err(ValidationError::new(
                    ErrorKind::RetentionPolicyConflict,
                    format!("{}.{}", path, field),
                    format!(
                        "must be between {} and {}",
                        RETENTION_LIMIT_MIN, RETENTION_LIMIT_MAX
                    ),
                )
                .with_value(limit.to_string()));
            }
        }
    }
    Ok(())
}

fn validate_trigger(trigger: &Trigger, path: &str) -> Result<(), ValidationError> {
    for (i, when) in trigger.when.iter().enumerate() {
        non_empty(&when.name, &format!("{}.when[{}].name", path, i), "trigger name")?;
    }
    unique_names(trigger.when.iter().map(|w| w.name.as_str()), &format!("{}.when", path))?;
    if let Some(secret) = &trigger.secret_ref {
        non_empty(&secret.name, &format!("{}.secretRef.name", path), "secret name")?;
    }
    Ok(())
}

fn validate_param_names(values: &[ParamValue], path: &str) -> Result<(), ValidationError> {
    for value in values {
        non_empty(&value.name, &format!("{}[]", path), "parameter name")?;
    }
    unique_names(values.iter().map(|v| v.name.as_str()), path)
}

/// Checks that need no strategy.
fn validate_build_shape(spec: &BuildSpec, path: &str) -> Result<(), ValidationError> {
    non_empty(&spec.strategy.name, &format!("{}.strategy.name", path), "strategy name")?;

    if let Some(source) = &spec.source {
        match &source.origin {
            SourceOrigin::Git(git) => {
                validate_git_url(&git.url, &format!("{}.source.git.url", path))?
            }
            SourceOrigin::OciArtifact(oci) => non_empty(
                &oci.image,
                &format!("{}.source.ociArtifact.image", path),
                "source image",
            )?,
        }
    }
    validate_output(&spec.output, &format!("{}.output", path))?;
    if let Some(trigger) = &spec.trigger {
        validate_trigger(trigger, &format!("{}.trigger", path))?;
    }
    if let Some(retention) = &spec.retention {
        validate_retention(retention, &format!("{}.retention", path))?;
    }
    validate_param_names(&spec.param_values, &format!("{}.paramValues", path))?;
    unique_names(spec.env.iter().map(|e| e.name.as_str()), &format!("{}.env", path))?;
    unique_names(spec.volumes.iter().map(|v| v.name.as_str()), &format!("{}.volumes", path))?;
    Ok(())
}

/// Validate a build, and its parameter values and volumes against the
/// strategy when it is known.
pub fn validate_build(
    spec: &BuildSpec,
    strategy: Option<&BuildStrategySpec>,
) -> Result<(), ValidationError> {
    validate_build_shape(spec, "spec")?;
    if let Some(strategy) = strategy {
        check_param_values(&strategy.parameters, &spec.param_values, "spec")?;
        resolve_volumes(strategy, &spec.volumes).map_err(|e| e.within("spec"))?;
    }
    Ok(())
}

/// Registration status for a build whose strategy may be missing.
pub fn register_build(spec: &BuildSpec, strategy: Option<&BuildStrategySpec>) -> BuildStatus {
    let result = match strategy {
        Some(strategy) => validate_build(spec, Some(strategy)),
        None => Err(ValidationError::new(
            ErrorKind::StrategyNotFound,
            "spec.strategy.name",
            format!(
                "{} {:?} does not exist",
                spec.strategy.effective_kind(),
                spec.strategy.name
            ),
        )),
    };
    match result {
        Ok(()) => BuildStatus::registered(),
        Err(err) => {
            debug!(error = %err, "build rejected");
            BuildStatus::rejected(&err, &spec.strategy)
        }
    }
}

pub fn validate_build_run(spec: &BuildRunSpec) -> Result<(), ValidationError> {
    match &spec.build {
        ReferencedBuild::Spec(build) => validate_build_shape(build, "spec.build.spec")?,
        ReferencedBuild::Name(name) if name.trim().is_empty() => {
            return Err(ValidationError::new(
                ErrorKind::AmbiguousBuildReference,
                "spec.build",
                "one of spec and name must be set",
            ));
        }
        ReferencedBuild::Name(_) => {}
    }
    if let Some(sa) = &spec.service_account {
        non_empty(sa, "spec.serviceAccount", "service account")?;
    }
    if let Some(output) = &spec.output {
        validate_output(output, "spec.output")?;
    }
    validate_param_names(&spec.param_values, "spec.paramValues")?;
    unique_names(spec.env.iter().map(|e| e.name.as_str()), "spec.env")?;
    unique_names(spec.volumes.iter().map(|v| v.name.as_str()), "spec.volumes")?;
    Ok(())
}
