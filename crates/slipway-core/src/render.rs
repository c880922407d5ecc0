//! Rendering a strategy into concrete steps for the task executor.
//!
//! Parameters are referenced as `$(params.NAME)`. A whole argument or
//! command entry of the form `$(params.NAME[*])` expands an array parameter
//! into one entry per item. Values held in ConfigMaps or Secrets are never
//! inlined: they become `SHP_PARAM_*` environment variables of the step and
//! are referenced as `$(SHP_PARAM_*)`.

use k8s_openapi::api::core::v1::{
    ConfigMapKeySelector, EnvVar, EnvVarSource, SecretKeySelector, Volume,
};
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::build::{BuildSpec, SourceOrigin};
use crate::duration::Duration;
use crate::error::{ErrorKind, ValidationError};
use crate::params::{
    PARAM_OUTPUT_DIRECTORY, PARAM_OUTPUT_IMAGE, PARAM_OUTPUT_INSECURE, PARAM_SOURCE_CONTEXT,
    PARAM_SOURCE_ROOT, ResolvedParams, ResolvedValue,
};
use crate::strategy::{BuildStrategySpec, Step};
use crate::value::{ObjectKeyRef, SingleValue};

/// Regex for `$(params.NAME)` references.
static PARAM_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\(params\.([A-Za-z0-9_.-]+)\)").expect("valid regex")
});

/// Regex for a whole-entry `$(params.NAME[*])` array expansion.
static ARRAY_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$\(params\.([A-Za-z0-9_.-]+)\[\*\]\)$").expect("valid regex")
});

const CONFIGMAP_PLACEHOLDER: &str = "${CONFIGMAP_VALUE}";
const SECRET_PLACEHOLDER: &str = "${SECRET_VALUE}";

/// Paths the executor uses inside the build pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderConfig {
    pub source_root: String,
    pub output_directory: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            source_root: "/workspace/source".to_string(),
            output_directory: "/workspace/output-image".to_string(),
        }
    }
}

/// Everything the task executor needs to run one build run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub steps: Vec<Step>,
    pub volumes: Vec<Volume>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    pub params: ResolvedParams,
}

/// Values of the system parameters for a build.
pub fn system_parameters(spec: &BuildSpec, config: &RenderConfig) -> BTreeMap<String, String> {
    let context = match spec.source.as_ref().and_then(|s| s.context_dir.as_deref()) {
        Some(dir) if !dir.trim_matches('/').is_empty() => {
            format!(
                "{}/{}",
                config.source_root.trim_end_matches('/'),
                dir.trim_matches('/')
            )
        }
        _ => config.source_root.clone(),
    };

    BTreeMap::from([
        (PARAM_SOURCE_ROOT.to_string(), config.source_root.clone()),
        (PARAM_SOURCE_CONTEXT.to_string(), context),
        (PARAM_OUTPUT_IMAGE.to_string(), spec.output.image.clone()),
        (PARAM_OUTPUT_INSECURE.to_string(), "false".to_string()),
        (
            PARAM_OUTPUT_DIRECTORY.to_string(),
            config.output_directory.clone(),
        ),
    ])
}

/// Name of the environment variable carrying a referenced parameter value.
pub fn param_env_name(param: &str, index: Option<usize>) -> String {
    let base: String = param
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    match index {
        Some(i) => format!("SHP_PARAM_{}_{}", base, i),
        None => format!("SHP_PARAM_{}", base),
    }
}

/// Per-step substitution state: the scalar text of every parameter and the
/// env vars that have to be added to the step for referenced values.
struct Substitution<'a> {
    params: &'a ResolvedParams,
    system: &'a BTreeMap<String, String>,
    env: BTreeMap<String, EnvVar>,
}

impl<'a> Substitution<'a> {
    fn new(params: &'a ResolvedParams, system: &'a BTreeMap<String, String>) -> Self {
        Self {
            params,
            system,
            env: BTreeMap::new(),
        }
    }

    /// Text standing in for one scalar value.
    fn scalar(&mut self, value: &SingleValue, env_name: String) -> String {
        match value {
            SingleValue::Value(v) => v.clone(),
            SingleValue::ConfigMapValue(r) => {
                let source = EnvVarSource {
                    config_map_key_ref: Some(ConfigMapKeySelector {
                        name: r.name.clone().into(),
                        key: r.key.clone(),
                        ..Default::default()
                    }),
                    ..Default::default()
                };
                self.reference(r, env_name, source, CONFIGMAP_PLACEHOLDER)
            }
            SingleValue::SecretValue(r) => {
                let source = EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        name: r.name.clone().into(),
                        key: r.key.clone(),
                        ..Default::default()
                    }),
                    ..Default::default()
                };
                self.reference(r, env_name, source, SECRET_PLACEHOLDER)
            }
        }
    }

    fn reference(
        &mut self,
        r: &ObjectKeyRef,
        env_name: String,
        source: EnvVarSource,
        placeholder: &str,
    ) -> String {
        let reference = format!("$({})", env_name);
        self.env.insert(
            env_name.clone(),
            EnvVar {
                name: env_name,
                value: None,
                value_from: Some(source),
            },
        );
        match &r.format {
            Some(format) => format.replace(placeholder, &reference),
            None => reference,
        }
    }

    /// Replace every `$(params.NAME)` of a string or single-valued parameter.
    fn text(&mut self, input: &str) -> String {
        let params = self.params;
        let system = self.system;
        PARAM_REF
            .replace_all(input, |caps: &Captures<'_>| {
                let name = &caps[1];
                if let Some(v) = system.get(name) {
                    return v.clone();
                }
                match params.value(name) {
                    Some(ResolvedValue::Single(v)) => self.scalar(v, param_env_name(name, None)),
                    // arrays only expand as whole entries
                    _ => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Substitute a list of entries, expanding whole-entry array references.
    fn entries(&mut self, input: &[String]) -> Vec<String> {
        let params = self.params;
        let mut out = Vec::with_capacity(input.len());
        for entry in input {
            let expansion = ARRAY_REF
                .captures(entry)
                .and_then(|caps| match params.value(&caps[1]) {
                    Some(ResolvedValue::Array(values)) => Some((caps[1].to_string(), values)),
                    _ => None,
                });
            match expansion {
                Some((name, values)) => {
                    for (i, v) in values.iter().enumerate() {
                        let rendered = self.scalar(v, param_env_name(&name, Some(i)));
                        out.push(rendered);
                    }
                }
                None => out.push(self.text(entry)),
            }
        }
        out
    }
}

/// Merge `extra` into `env` by name; entries of `extra` win.
pub fn merge_env(env: &mut Vec<EnvVar>, extra: &[EnvVar]) {
    for var in extra {
        match env.iter_mut().find(|e| e.name == var.name) {
            Some(existing) => *existing = var.clone(),
            None => env.push(var.clone()),
        }
    }
}

/// Render the strategy's steps with parameters substituted and build env
/// merged in.
pub fn render_steps(
    strategy: &BuildStrategySpec,
    spec: &BuildSpec,
    params: &ResolvedParams,
    config: &RenderConfig,
) -> Vec<Step> {
    let system = system_parameters(spec, config);

    strategy
        .steps
        .iter()
        .map(|step| {
            let mut sub = Substitution::new(params, &system);
            let mut rendered = step.clone();
            rendered.image = sub.text(&step.image);
            rendered.command = sub.entries(&step.command);
            rendered.args = sub.entries(&step.args);
            rendered.working_dir = step.working_dir.as_deref().map(|d| sub.text(d));

            merge_env(&mut rendered.env, &spec.env);
            for var in rendered.env.iter_mut() {
                if let Some(value) = &var.value {
                    var.value = Some(sub.text(value));
                }
            }
            // referenced vars go first so `$(SHP_PARAM_*)` in later values expands
            let mut env: Vec<EnvVar> = sub.env.into_values().collect();
            rendered.env.retain(|e| !env.iter().any(|r| r.name == e.name));
            env.append(&mut rendered.env);
            rendered.env = env;
            rendered
        })
        .collect()
}

/// Resolve the volumes of a run: strategy volumes replaced by the build's
/// (and run's) volumes of the same name. Only overridable volumes may be
/// replaced, and steps may only mount declared volumes.
pub fn resolve_volumes(
    strategy: &BuildStrategySpec,
    overrides: &[Volume],
) -> Result<Vec<Volume>, ValidationError> {
    let mut volumes: Vec<Volume> = strategy.volumes.iter().map(|v| v.volume.clone()).collect();

    for volume in overrides {
        let path = format!("volumes[{}]", volume.name);
        let declared = strategy.volume(&volume.name).ok_or_else(|| {
            ValidationError::new(
                ErrorKind::UndefinedVolume,
                path.clone(),
                "the strategy does not declare this volume",
            )
        })?;
        if !declared.is_overridable() {
            return Err(ValidationError::new(
                ErrorKind::VolumeNotOverridable,
                path,
                "the strategy volume is not overridable",
            ));
        }
        if let Some(slot) = volumes.iter_mut().find(|v| v.name == volume.name) {
            *slot = volume.clone();
        }
    }

    for step in &strategy.steps {
        for mount in &step.volume_mounts {
            if !volumes.iter().any(|v| v.name == mount.name) {
                return Err(ValidationError::new(
                    ErrorKind::UndefinedVolume,
                    format!("steps[{}].volumeMounts[{}]", step.name, mount.name),
                    "the step mounts a volume that is not declared",
                ));
            }
        }
    }

    Ok(volumes)
}

/// Name of the git source, for logging.
pub(crate) fn source_label(spec: &BuildSpec) -> &str {
    match spec.source.as_ref().map(|s| &s.origin) {
        Some(SourceOrigin::Git(g)) => &g.url,
        Some(SourceOrigin::OciArtifact(o)) => &o.image,
        None => "<none>",
    }
}
