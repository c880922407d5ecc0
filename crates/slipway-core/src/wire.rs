//! Flat wire shapes for the union types.
//!
//! The persisted form keeps every branch of a union as its own optional key
//! on one object. These mirrors carry exactly that shape; the domain types
//! convert from them with `TryFrom`, rejecting zero or several populated
//! branches, and back with `From`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::build::{BuildSpec, Git, OciArtifact};
use crate::buildrun::{BundleSourceResult, GitSourceResult};
use crate::strategy::ParameterType;
use crate::trigger::{WhenGitHub, WhenImage, WhenObjectRef};
use crate::value::{ObjectKeyRef, SingleValue};

/// Implement `JsonSchema` for a domain type by describing its wire mirror.
macro_rules! schema_via_wire {
    ($domain:ty, $wire:ty, $name:literal) => {
        impl schemars::JsonSchema for $domain {
            fn schema_name() -> String {
                $name.to_string()
            }

            fn json_schema(
                generator: &mut schemars::r#gen::SchemaGenerator,
            ) -> schemars::schema::Schema {
                <$wire as schemars::JsonSchema>::json_schema(generator)
            }
        }
    };
}

pub(crate) use schema_via_wire;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SingleValueWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_value: Option<ObjectKeyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_value: Option<ObjectKeyRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParamValueWire {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_value: Option<ObjectKeyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_value: Option<ObjectKeyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<SingleValue>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParameterWire {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "type", default)]
    pub param_type: ParameterType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<Vec<String>>,
}

/// Source discriminator as written in manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SourceType {
    Git,
    #[serde(rename = "OCI")]
    Oci,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceWire {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<SourceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<Git>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oci_artifact: Option<OciArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_dir: Option<String>,
}

/// Trigger condition discriminator as written in manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum TriggerType {
    GitHub,
    Image,
    Pipeline,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TriggerWhenWire {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<TriggerType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<WhenGitHub>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<WhenImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_ref: Option<WhenObjectRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReferencedBuildWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<Box<BuildSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceResultWire {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSourceResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<BundleSourceResult>,
}

/// Count how many of the given branches are populated.
pub(crate) fn populated(branches: &[bool]) -> usize {
    branches.iter().filter(|b| **b).count()
}
