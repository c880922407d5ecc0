//! Parameter resolution.
//!
//! The value of a declared parameter is the build run's override if there is
//! one, else the build's value, else the declared default. Everything is
//! keyed by name, so the order of the input lists never changes the result.

use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use tracing::debug;

use crate::error::{ErrorKind, ValidationError};
use crate::strategy::{Parameter, ParameterDefault, ParameterType};
use crate::value::{ParamValue, ParamValueKind, SingleValue};

pub const PARAM_SOURCE_ROOT: &str = "shp-source-root";
pub const PARAM_SOURCE_CONTEXT: &str = "shp-source-context";
pub const PARAM_OUTPUT_IMAGE: &str = "shp-output-image";
pub const PARAM_OUTPUT_INSECURE: &str = "shp-output-insecure";
pub const PARAM_OUTPUT_DIRECTORY: &str = "shp-output-directory";

/// Parameters whose values the system supplies.
pub const SYSTEM_PARAMETERS: [&str; 5] = [
    PARAM_SOURCE_ROOT,
    PARAM_SOURCE_CONTEXT,
    PARAM_OUTPUT_IMAGE,
    PARAM_OUTPUT_INSECURE,
    PARAM_OUTPUT_DIRECTORY,
];

pub fn is_system_parameter(name: &str) -> bool {
    SYSTEM_PARAMETERS.contains(&name)
}

/// A resolved parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ResolvedValue {
    Single(SingleValue),
    Array(Vec<SingleValue>),
}

impl From<ParamValueKind> for ResolvedValue {
    fn from(kind: ParamValueKind) -> Self {
        match kind {
            ParamValueKind::Single(v) => ResolvedValue::Single(v),
            ParamValueKind::Array(vs) => ResolvedValue::Array(vs),
        }
    }
}

impl From<ParameterDefault> for ResolvedValue {
    fn from(default: ParameterDefault) -> Self {
        match default {
            ParameterDefault::Value(v) => ResolvedValue::Single(SingleValue::Value(v)),
            ParameterDefault::Values(vs) => {
                ResolvedValue::Array(vs.into_iter().map(SingleValue::Value).collect())
            }
        }
    }
}

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ValueSource {
    BuildRun,
    Build,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedParam {
    pub value: ResolvedValue,
    pub source: ValueSource,
}

/// Resolved values keyed by parameter name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct ResolvedParams(BTreeMap<String, ResolvedParam>);

impl ResolvedParams {
    pub fn get(&self, name: &str) -> Option<&ResolvedParam> {
        self.0.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&ResolvedValue> {
        self.0.get(name).map(|p| &p.value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResolvedParam)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Index supplied values by name, rejecting duplicates and reserved names.
fn index_values<'a>(
    values: &'a [ParamValue],
    scope: &str,
) -> Result<BTreeMap<&'a str, &'a ParamValue>, ValidationError> {
    let mut index = BTreeMap::new();
    for value in values {
        let path = format!("{}.paramValues[{}]", scope, value.name);
        if is_system_parameter(&value.name) {
            return Err(ValidationError::new(
                ErrorKind::RestrictedParameter,
                path,
                "system parameters cannot be set",
            )
            .with_value(value.name.clone()));
        }
        match index.entry(value.name.as_str()) {
            Entry::Occupied(_) => {
                return Err(ValidationError::new(
                    ErrorKind::DuplicateName,
                    path,
                    "parameter value supplied more than once",
                ));
            }
            Entry::Vacant(e) => {
                e.insert(value);
            }
        }
    }
    Ok(index)
}

/// Index the strategy's declarations by name.
pub(crate) fn index_declarations(
    params: &[Parameter],
) -> Result<BTreeMap<&str, &Parameter>, ValidationError> {
    let mut index = BTreeMap::new();
    for param in params {
        let path = format!("parameters[{}]", param.name);
        if is_system_parameter(&param.name) {
            return Err(ValidationError::new(
                ErrorKind::RestrictedParameter,
                path,
                "system parameters cannot be declared",
            )
            .with_value(param.name.clone()));
        }
        if index.insert(param.name.as_str(), param).is_some() {
            return Err(ValidationError::new(
                ErrorKind::DuplicateName,
                path,
                "parameter declared more than once",
            ));
        }
    }
    for param in index.values() {
        param.check_default()?;
    }
    Ok(index)
}

/// Check supplied values against the declarations.
pub(crate) fn check_supplied(
    declared: &BTreeMap<&str, &Parameter>,
    supplied: &BTreeMap<&str, &ParamValue>,
    scope: &str,
) -> Result<(), ValidationError> {
    for (name, value) in supplied {
        let path = format!("{}.paramValues[{}]", scope, name);
        let Some(param) = declared.get(name) else {
            return Err(ValidationError::new(
                ErrorKind::UnknownParameter,
                path,
                "the strategy does not declare this parameter",
            )
            .with_value(name.to_string()));
        };
        let supplied_array = value.value.is_array();
        let declared_array = param.param_type == ParameterType::Array;
        if supplied_array != declared_array {
            return Err(ValidationError::new(
                ErrorKind::ParameterTypeMismatch,
                path,
                format!(
                    "parameter is of type {} but {} was supplied",
                    param.param_type,
                    value.variant_name()
                ),
            ));
        }
    }
    Ok(())
}

/// Check build-level values against a strategy without requiring every
/// parameter to have a value; a run may still supply the rest.
pub fn check_param_values(
    strategy_params: &[Parameter],
    values: &[ParamValue],
    scope: &str,
) -> Result<(), ValidationError> {
    let declared = index_declarations(strategy_params)?;
    let supplied = index_values(values, scope)?;
    check_supplied(&declared, &supplied, scope)
}

/// Resolve the value of every declared parameter.
pub fn resolve_parameters(
    strategy_params: &[Parameter],
    build_values: &[ParamValue],
    run_values: &[ParamValue],
) -> Result<ResolvedParams, ValidationError> {
    let declared = index_declarations(strategy_params)?;
    let build = index_values(build_values, "build")?;
    let run = index_values(run_values, "buildRun")?;
    check_supplied(&declared, &build, "build")?;
    check_supplied(&declared, &run, "buildRun")?;

    let mut resolved = BTreeMap::new();
    for (name, param) in &declared {
        let (value, source) = if let Some(v) = run.get(name) {
            (ResolvedValue::from(v.value.clone()), ValueSource::BuildRun)
        } else if let Some(v) = build.get(name) {
            (ResolvedValue::from(v.value.clone()), ValueSource::Build)
        } else if let Some(default) = &param.default {
            (ResolvedValue::from(default.clone()), ValueSource::Default)
        } else {
            return Err(ValidationError::new(
                ErrorKind::MissingParameter,
                format!("parameters[{}]", name),
                "no default and no value supplied by the build or build run",
            ));
        };
        debug!(parameter = %name, ?source, "resolved parameter");
        resolved.insert(name.to_string(), ResolvedParam { value, source });
    }

    Ok(ResolvedParams(resolved))
}
