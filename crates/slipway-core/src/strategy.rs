//! Build strategies: reusable step templates with declared parameters and
//! volumes.

use derive_more::Display;
use k8s_openapi::api::core::v1::{
    ContainerPort, EnvFromSource, EnvVar, ResourceRequirements, SecurityContext, Volume,
    VolumeMount,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::ops::Deref;

use crate::error::{ErrorKind, ValidationError};
use crate::wire::{ParameterWire, schema_via_wire};

/// Whether a parameter takes one value or a list.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    #[default]
    #[display("string")]
    String,
    #[display("array")]
    Array,
}

/// Default of a declared parameter, shaped after its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterDefault {
    Value(String),
    Values(Vec<String>),
}

/// A parameter declared by a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ParameterWire", into = "ParameterWire")]
pub struct Parameter {
    pub name: String,
    pub description: String,
    pub param_type: ParameterType,
    pub default: Option<ParameterDefault>,
}

schema_via_wire!(Parameter, ParameterWire, "Parameter");

impl Parameter {
    pub fn string(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            param_type: ParameterType::String,
            default: None,
        }
    }

    pub fn array(name: impl Into<String>) -> Self {
        Self {
            param_type: ParameterType::Array,
            ..Self::string(name)
        }
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default = Some(ParameterDefault::Value(value.into()));
        self
    }

    pub fn with_defaults(mut self, values: Vec<String>) -> Self {
        self.default = Some(ParameterDefault::Values(values));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Check that the default, if any, has the declared shape.
    pub fn check_default(&self) -> Result<(), ValidationError> {
        match (self.param_type, &self.default) {
            (ParameterType::String, Some(ParameterDefault::Values(_))) => Err(ValidationError::new(
                ErrorKind::ParameterTypeMismatch,
                format!("parameters[{}]", self.name),
                "a string parameter cannot declare defaults, use default",
            )),
            (ParameterType::Array, Some(ParameterDefault::Value(v))) => Err(ValidationError::new(
                ErrorKind::ParameterTypeMismatch,
                format!("parameters[{}]", self.name),
                "an array parameter cannot declare default, use defaults",
            )
            .with_value(v.clone())),
            _ => Ok(()),
        }
    }
}

impl TryFrom<ParameterWire> for Parameter {
    type Error = ValidationError;

    fn try_from(wire: ParameterWire) -> Result<Self, Self::Error> {
        let default = match (wire.default, wire.defaults) {
            (Some(_), Some(_)) => {
                return Err(ValidationError::new(
                    ErrorKind::InvalidUnion,
                    format!("parameters[{}]", wire.name),
                    "default and defaults cannot both be set",
                ));
            }
            (Some(v), None) => Some(ParameterDefault::Value(v)),
            (None, Some(vs)) => Some(ParameterDefault::Values(vs)),
            (None, None) => None,
        };

        let param = Parameter {
            name: wire.name,
            description: wire.description,
            param_type: wire.param_type,
            default,
        };
        param.check_default()?;
        Ok(param)
    }
}

impl From<Parameter> for ParameterWire {
    fn from(p: Parameter) -> Self {
        let (default, defaults) = match p.default {
            Some(ParameterDefault::Value(v)) => (Some(v), None),
            Some(ParameterDefault::Values(vs)) => (None, Some(vs)),
            None => (None, None),
        };
        ParameterWire {
            name: p.name,
            description: p.description,
            param_type: p.param_type,
            default,
            defaults,
        }
    }
}

/// One container execution unit of a strategy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_from: Vec<EnvFromSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
}

/// A volume declared by a strategy, optionally overridable by builds and runs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuildStrategyVolume {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overridable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub volume: Volume,
}

impl BuildStrategyVolume {
    pub fn name(&self) -> &str {
        &self.volume.name
    }

    /// Absent means not overridable.
    pub fn is_overridable(&self) -> bool {
        self.overridable.unwrap_or(false)
    }
}

/// Namespaced strategy.
#[derive(CustomResource, Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "slipway.dev",
    version = "v1beta1",
    kind = "BuildStrategy",
    namespaced,
    status = "BuildStrategyStatus",
    derive = "PartialEq",
    shortname = "bs"
)]
#[serde(rename_all = "camelCase")]
pub struct BuildStrategySpec {
    #[serde(default, alias = "buildSteps")]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<BuildStrategyVolume>,
}

impl BuildStrategySpec {
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn volume(&self, name: &str) -> Option<&BuildStrategyVolume> {
        self.volumes.iter().find(|v| v.name() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct BuildStrategyStatus {}

/// Cluster-scoped strategy, shared by builds in every namespace.
#[derive(CustomResource, Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "slipway.dev",
    version = "v1beta1",
    kind = "ClusterBuildStrategy",
    status = "BuildStrategyStatus",
    derive = "PartialEq",
    shortname = "cbs"
)]
pub struct ClusterBuildStrategySpec {
    #[serde(flatten)]
    pub strategy: BuildStrategySpec,
}

impl Deref for ClusterBuildStrategySpec {
    type Target = BuildStrategySpec;

    fn deref(&self) -> &Self::Target {
        &self.strategy
    }
}

impl From<BuildStrategySpec> for ClusterBuildStrategySpec {
    fn from(strategy: BuildStrategySpec) -> Self {
        Self { strategy }
    }
}

/// Which strategy resource a build refers to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema, Display,
)]
pub enum BuildStrategyKind {
    BuildStrategy,
    #[default]
    ClusterBuildStrategy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_default_shapes() {
        let p: Parameter =
            serde_json::from_str(r#"{"name": "tag", "default": "latest"}"#).unwrap();
        assert_eq!(p, Parameter::string("tag").with_default("latest"));

        let p: Parameter = serde_json::from_str(
            r#"{"name": "build-args", "type": "array", "defaults": []}"#,
        )
        .unwrap();
        assert_eq!(p.default, Some(ParameterDefault::Values(vec![])));

        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "build-args", "type": "array", "defaults": []})
        );
    }

    #[test]
    fn test_array_parameter_with_scalar_default_is_rejected() {
        let err = serde_json::from_str::<Parameter>(
            r#"{"name": "build-args", "type": "array", "default": "x"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("ParameterTypeMismatch"));

        let p = Parameter::array("build-args").with_default("x");
        assert_eq!(
            p.check_default().unwrap_err().kind,
            ErrorKind::ParameterTypeMismatch
        );
    }

    #[test]
    fn test_parameter_rejects_default_and_defaults() {
        let err = serde_json::from_str::<Parameter>(
            r#"{"name": "p", "type": "array", "default": "x", "defaults": ["y"]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("InvalidUnion"));
    }

    #[test]
    fn test_legacy_build_steps_key() {
        let spec: BuildStrategySpec = serde_yaml::from_str(
            r#"
buildSteps:
  - name: build
    image: gcr.io/kaniko-project/executor:latest
    args: ["--dockerfile", "Dockerfile"]
"#,
        )
        .unwrap();
        assert_eq!(spec.steps.len(), 1);
        assert_eq!(spec.steps[0].name, "build");

        let json = serde_json::to_value(&spec).unwrap();
        assert!(json.get("steps").is_some());
        assert!(json.get("buildSteps").is_none());
    }

    #[test]
    fn test_step_keeps_container_ports() {
        let json = serde_json::json!({
            "name": "s",
            "image": "i",
            "ports": [{"containerPort": 8080, "name": "http"}]
        });
        let step: Step = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(step.ports.len(), 1);
        assert_eq!(step.ports[0].container_port, 8080);
        assert_eq!(serde_json::to_value(&step).unwrap(), json);
    }

    #[test]
    fn test_strategy_volume_flattens_kubernetes_volume() {
        let spec: BuildStrategySpec = serde_yaml::from_str(
            r#"
steps: []
volumes:
  - name: cache
    overridable: true
    description: layer cache
    emptyDir: {}
  - name: certs
    configMap:
      name: ca-bundle
"#,
        )
        .unwrap();
        let cache = spec.volume("cache").unwrap();
        assert!(cache.is_overridable());
        assert!(cache.volume.empty_dir.is_some());
        assert!(!spec.volume("certs").unwrap().is_overridable());
        assert!(spec.volume("missing").is_none());
    }

    #[test]
    fn test_cluster_strategy_derefs_to_spec() {
        let cluster = ClusterBuildStrategySpec::from(BuildStrategySpec {
            parameters: vec![Parameter::string("tag")],
            ..Default::default()
        });
        assert!(cluster.parameter("tag").is_some());
        assert_eq!(BuildStrategyKind::default(), BuildStrategyKind::ClusterBuildStrategy);
    }
}
