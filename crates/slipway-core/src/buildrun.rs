//! Build runs: one execution of a build, with run-scoped overrides and the
//! status accumulated while it executes.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::EnvVar;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::build::{BuildSpec, BuildVolume, Image};
use crate::condition::{Condition, ConditionStatus, ConditionType, Conditions};
use crate::duration::Duration;
use crate::error::{ErrorKind, ValidationError};
use crate::value::ParamValue;
use crate::wire::{ReferencedBuildWire, SourceResultWire, schema_via_wire};

/// Condition reasons reported on `Succeeded`.
pub mod reason {
    pub const PENDING: &str = "Pending";
    pub const RUNNING: &str = "Running";
    pub const SUCCEEDED: &str = "Succeeded";
    pub const FAILED: &str = "Failed";
    pub const CANCELED: &str = "BuildRunCanceled";
    pub const TIMEOUT: &str = "BuildRunTimeout";
}

/// The build a run executes: inline, or by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ReferencedBuildWire", into = "ReferencedBuildWire")]
pub enum ReferencedBuild {
    Spec(Box<BuildSpec>),
    Name(String),
}

schema_via_wire!(ReferencedBuild, ReferencedBuildWire, "ReferencedBuild");

impl ReferencedBuild {
    pub fn name(&self) -> Option<&str> {
        match self {
            ReferencedBuild::Name(n) => Some(n),
            ReferencedBuild::Spec(_) => None,
        }
    }

    /// Wire key of the populated branch.
    pub fn variant_name(&self) -> &'static str {
        match self {
            ReferencedBuild::Spec(_) => "spec",
            ReferencedBuild::Name(_) => "name",
        }
    }
}

impl TryFrom<ReferencedBuildWire> for ReferencedBuild {
    type Error = ValidationError;

    fn try_from(wire: ReferencedBuildWire) -> Result<Self, Self::Error> {
        let name = wire.name.filter(|n| !n.is_empty());
        match (wire.spec, name) {
            (Some(spec), None) => Ok(ReferencedBuild::Spec(spec)),
            (None, Some(name)) => Ok(ReferencedBuild::Name(name)),
            (Some(_), Some(name)) => Err(ValidationError::new(
                ErrorKind::AmbiguousBuildReference,
                "spec.build",
                "an inline build spec and a build name cannot both be set",
            )
            .with_value(name)),
            (None, None) => Err(ValidationError::new(
                ErrorKind::AmbiguousBuildReference,
                "spec.build",
                "one of spec and name must be set",
            )),
        }
    }
}

impl From<ReferencedBuild> for ReferencedBuildWire {
    fn from(r: ReferencedBuild) -> Self {
        match r {
            ReferencedBuild::Spec(spec) => ReferencedBuildWire {
                spec: Some(spec),
                name: None,
            },
            ReferencedBuild::Name(name) => ReferencedBuildWire {
                spec: None,
                name: Some(name),
            },
        }
    }
}

/// Lifecycle state a user may request for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum BuildRunRequestedState {
    BuildRunCanceled,
}

/// Run-scoped TTL overrides; count limits always come from the build.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuildRunRetention {
    #[serde(rename = "ttlAfterFailed", default, skip_serializing_if = "Option::is_none")]
    pub ttl_after_failed: Option<Duration>,
    #[serde(rename = "ttlAfterSucceeded", default, skip_serializing_if = "Option::is_none")]
    pub ttl_after_succeeded: Option<Duration>,
}

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "slipway.dev",
    version = "v1beta1",
    kind = "BuildRun",
    namespaced,
    status = "BuildRunStatus",
    derive = "PartialEq",
    shortname = "br",
    printcolumn = r#"{"name":"Succeeded","type":"string","jsonPath":".status.conditions[?(@.type==\"Succeeded\")].status"}"#,
    printcolumn = r#"{"name":"Reason","type":"string","jsonPath":".status.conditions[?(@.type==\"Succeeded\")].reason"}"#,
    printcolumn = r#"{"name":"StartTime","type":"date","jsonPath":".status.startTime"}"#,
    printcolumn = r#"{"name":"CompletionTime","type":"date","jsonPath":".status.completionTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BuildRunSpec {
    pub build: ReferencedBuild,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub param_values: Vec<ParamValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Image>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<BuildRunRequestedState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<BuildRunRetention>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<BuildVolume>,
}

impl BuildRunSpec {
    /// A run of the named build with no overrides.
    pub fn for_build(name: impl Into<String>) -> Self {
        Self::with_reference(ReferencedBuild::Name(name.into()))
    }

    /// A run of an inline build spec with no overrides.
    pub fn inline(spec: BuildSpec) -> Self {
        Self::with_reference(ReferencedBuild::Spec(Box::new(spec)))
    }

    fn with_reference(build: ReferencedBuild) -> Self {
        Self {
            build,
            service_account: None,
            timeout: None,
            param_values: Vec::new(),
            output: None,
            state: None,
            env: Vec::new(),
            retention: None,
            volumes: Vec::new(),
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.state == Some(BuildRunRequestedState::BuildRunCanceled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitSourceResult {
    #[serde(default)]
    pub commit_sha: String,
    #[serde(default)]
    pub commit_author: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub branch_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct BundleSourceResult {
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceResultKind {
    Git(GitSourceResult),
    Bundle(BundleSourceResult),
}

/// What the executor fetched for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SourceResultWire", into = "SourceResultWire")]
pub struct SourceResult {
    pub name: String,
    pub result: SourceResultKind,
}

schema_via_wire!(SourceResult, SourceResultWire, "SourceResult");

impl TryFrom<SourceResultWire> for SourceResult {
    type Error = ValidationError;

    fn try_from(wire: SourceResultWire) -> Result<Self, Self::Error> {
        let result = match (wire.git, wire.bundle) {
            (Some(git), None) => SourceResultKind::Git(git),
            (None, Some(bundle)) => SourceResultKind::Bundle(bundle),
            _ => {
                return Err(ValidationError::new(
                    ErrorKind::InvalidUnion,
                    format!("status.sources[{}]", wire.name),
                    "exactly one of git and bundle must be set",
                ));
            }
        };
        Ok(SourceResult {
            name: wire.name,
            result,
        })
    }
}

impl From<SourceResult> for SourceResultWire {
    fn from(s: SourceResult) -> Self {
        let (git, bundle) = match s.result {
            SourceResultKind::Git(g) => (Some(g), None),
            SourceResultKind::Bundle(b) => (None, Some(b)),
        };
        SourceResultWire {
            name: s.name,
            git,
            bundle,
        }
    }
}

/// The image a run produced.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct OutputResult {
    #[serde(default)]
    pub digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct FailedAt {
    #[serde(default)]
    pub pod: String,
    #[serde(default)]
    pub container: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct FailureDetails {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<FailedAt>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuildRunStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputResult>,
    #[serde(default, skip_serializing_if = "Conditions::is_empty")]
    pub conditions: Conditions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_run_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    /// Effective build spec frozen when the run started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_spec: Option<BuildSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<FailedAt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_details: Option<FailureDetails>,
}

impl BuildRunStatus {
    pub fn succeeded(&self) -> Option<&Condition> {
        self.conditions.get(&ConditionType::Succeeded)
    }

    /// Outcome of a finished run; `None` while it is still going.
    pub fn outcome(&self) -> Option<bool> {
        match self.succeeded()?.status {
            ConditionStatus::True => Some(true),
            ConditionStatus::False => Some(false),
            ConditionStatus::Unknown => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.outcome().is_some()
    }
}

impl BuildRun {
    /// Name of the referenced build, if the run refers to one by name.
    pub fn build_name(&self) -> Option<&str> {
        self.spec.build.name()
    }

    pub fn is_done(&self) -> bool {
        self.status.as_ref().is_some_and(BuildRunStatus::is_done)
    }
}
