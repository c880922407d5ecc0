//! Builds: a source, a strategy reference and an output target.

use k8s_openapi::api::core::v1::{EnvVar, Volume};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::condition::ConditionStatus;
use crate::duration::Duration;
use crate::error::{ErrorKind, ValidationError};
use crate::strategy::BuildStrategyKind;
use crate::trigger::Trigger;
use crate::value::ParamValue;
use crate::wire::{SourceType, SourceWire, schema_via_wire};

/// Git repository to build from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Git {
    pub url: String,
    /// Branch, tag or commit. Absent means the remote default branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_secret: Option<String>,
}

/// When to delete an OCI source artifact after it was pulled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum PruneOption {
    #[default]
    Never,
    AfterPull,
}

/// Source code shipped as an OCI image.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OciArtifact {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prune: Option<PruneOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOrigin {
    Git(Git),
    OciArtifact(OciArtifact),
}

/// Where the sources of a build come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SourceWire", into = "SourceWire")]
pub struct Source {
    pub origin: SourceOrigin,
    /// Sub-directory of the source holding the build context.
    pub context_dir: Option<String>,
}

schema_via_wire!(Source, SourceWire, "Source");

impl Source {
    pub fn git(url: impl Into<String>) -> Self {
        Self {
            origin: SourceOrigin::Git(Git {
                url: url.into(),
                ..Default::default()
            }),
            context_dir: None,
        }
    }

    pub fn oci_artifact(image: impl Into<String>) -> Self {
        Self {
            origin: SourceOrigin::OciArtifact(OciArtifact {
                image: image.into(),
                ..Default::default()
            }),
            context_dir: None,
        }
    }

    pub fn with_context_dir(mut self, dir: impl Into<String>) -> Self {
        self.context_dir = Some(dir.into());
        self
    }

    pub fn source_type(&self) -> SourceType {
        match self.origin {
            SourceOrigin::Git(_) => SourceType::Git,
            SourceOrigin::OciArtifact(_) => SourceType::Oci,
        }
    }

    /// Wire key of the populated branch.
    pub fn variant_name(&self) -> &'static str {
        match self.origin {
            SourceOrigin::Git(_) => "git",
            SourceOrigin::OciArtifact(_) => "ociArtifact",
        }
    }
}

impl TryFrom<SourceWire> for Source {
    type Error = ValidationError;

    fn try_from(wire: SourceWire) -> Result<Self, Self::Error> {
        let origin = match (wire.git, wire.oci_artifact) {
            (Some(git), None) => SourceOrigin::Git(git),
            (None, Some(oci)) => SourceOrigin::OciArtifact(oci),
            _ => {
                return Err(ValidationError::new(
                    ErrorKind::InvalidUnion,
                    "source",
                    "exactly one of git and ociArtifact must be set",
                ));
            }
        };
        let source = Source {
            origin,
            context_dir: wire.context_dir,
        };

        if let Some(declared) = wire.source_type {
            if declared != source.source_type() {
                return Err(ValidationError::new(
                    ErrorKind::InvalidUnion,
                    "source.type",
                    format!(
                        "type {:?} does not match the populated {} origin",
                        declared,
                        source.variant_name()
                    ),
                ));
            }
        }
        Ok(source)
    }
}

impl From<Source> for SourceWire {
    fn from(s: Source) -> Self {
        let source_type = Some(s.source_type());
        let (git, oci_artifact) = match s.origin {
            SourceOrigin::Git(g) => (Some(g), None),
            SourceOrigin::OciArtifact(o) => (None, Some(o)),
        };
        SourceWire {
            source_type,
            git,
            oci_artifact,
            context_dir: s.context_dir,
        }
    }
}

/// Reference to the strategy a build uses.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<BuildStrategyKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

impl Strategy {
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: Some(BuildStrategyKind::ClusterBuildStrategy),
            api_version: None,
        }
    }

    pub fn namespaced(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: Some(BuildStrategyKind::BuildStrategy),
            api_version: None,
        }
    }

    /// The referenced kind; unspecified means cluster-scoped.
    pub fn effective_kind(&self) -> BuildStrategyKind {
        self.kind.unwrap_or_default()
    }
}

/// Destination image of a build.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

impl Image {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }
}

/// Caps on how many terminal runs of a build are kept, and for how long.
///
/// Every field is independent; absent counts are unbounded and absent TTLs
/// never expire.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuildRetention {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub succeeded_limit: Option<u32>,
    #[serde(rename = "ttlAfterFailed", default, skip_serializing_if = "Option::is_none")]
    pub ttl_after_failed: Option<Duration>,
    #[serde(rename = "ttlAfterSucceeded", default, skip_serializing_if = "Option::is_none")]
    pub ttl_after_succeeded: Option<Duration>,
}

/// A volume supplied by a build or run to replace a strategy volume.
pub type BuildVolume = Volume;

#[derive(CustomResource, Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "slipway.dev",
    version = "v1beta1",
    kind = "Build",
    namespaced,
    status = "BuildStatus",
    derive = "PartialEq",
    shortname = "bd",
    printcolumn = r#"{"name":"Registered","type":"string","jsonPath":".status.registered"}"#,
    printcolumn = r#"{"name":"Reason","type":"string","jsonPath":".status.reason"}"#,
    printcolumn = r#"{"name":"Strategy","type":"string","jsonPath":".spec.strategy.name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
    pub strategy: Strategy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub param_values: Vec<ParamValue>,
    pub output: Image,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<BuildRetention>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<BuildVolume>,
}

impl BuildSpec {
    pub fn param_value(&self, name: &str) -> Option<&ParamValue> {
        self.param_values.iter().find(|p| p.name == name)
    }
}

/// Why a build is, or is not, registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildReason {
    Succeeded,
    BuildStrategyNotFound,
    ClusterBuildStrategyNotFound,
    RestrictedParametersInUse,
    UndefinedParameter,
    InconsistentParameterValues,
    VolumeDoesNotExist,
    VolumeNotOverridable,
    RemoteRepositoryUnreachable,
    Other(String),
}

impl BuildReason {
    /// Map a validation failure to the reason reported on the build.
    pub fn from_error(err: &ValidationError, strategy: &Strategy) -> Self {
        match err.kind {
            ErrorKind::StrategyNotFound => match strategy.effective_kind() {
                BuildStrategyKind::BuildStrategy => BuildReason::BuildStrategyNotFound,
                BuildStrategyKind::ClusterBuildStrategy => {
                    BuildReason::ClusterBuildStrategyNotFound
                }
            },
            ErrorKind::RestrictedParameter => BuildReason::RestrictedParametersInUse,
            ErrorKind::UnknownParameter | ErrorKind::MissingParameter => {
                BuildReason::UndefinedParameter
            }
            ErrorKind::ParameterTypeMismatch | ErrorKind::InvalidUnion => {
                BuildReason::InconsistentParameterValues
            }
            ErrorKind::UndefinedVolume => BuildReason::VolumeDoesNotExist,
            ErrorKind::VolumeNotOverridable => BuildReason::VolumeNotOverridable,
            other => BuildReason::Other(other.to_string()),
        }
    }
}

impl fmt::Display for BuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildReason::Other(s) => write!(f, "{}", s),
            known => write!(f, "{:?}", known),
        }
    }
}

impl From<String> for BuildReason {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Succeeded" => BuildReason::Succeeded,
            "BuildStrategyNotFound" => BuildReason::BuildStrategyNotFound,
            "ClusterBuildStrategyNotFound" => BuildReason::ClusterBuildStrategyNotFound,
            "RestrictedParametersInUse" => BuildReason::RestrictedParametersInUse,
            "UndefinedParameter" => BuildReason::UndefinedParameter,
            "InconsistentParameterValues" => BuildReason::InconsistentParameterValues,
            "VolumeDoesNotExist" => BuildReason::VolumeDoesNotExist,
            "VolumeNotOverridable" => BuildReason::VolumeNotOverridable,
            "RemoteRepositoryUnreachable" => BuildReason::RemoteRepositoryUnreachable,
            _ => BuildReason::Other(s),
        }
    }
}

impl From<BuildReason> for String {
    fn from(r: BuildReason) -> Self {
        r.to_string()
    }
}

impl Serialize for BuildReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BuildReason {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(BuildReason::from)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered: Option<ConditionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub reason: Option<BuildReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BuildStatus {
    pub fn registered() -> Self {
        Self {
            registered: Some(ConditionStatus::True),
            reason: Some(BuildReason::Succeeded),
            message: Some("all validations succeeded".to_string()),
        }
    }

    pub fn rejected(err: &ValidationError, strategy: &Strategy) -> Self {
        Self {
            registered: Some(ConditionStatus::False),
            reason: Some(BuildReason::from_error(err, strategy)),
            message: Some(err.to_string()),
        }
    }
}
