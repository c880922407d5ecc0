//! Parameter value primitives.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ValidationError};
use crate::wire::{ParamValueWire, SingleValueWire, populated, schema_via_wire};

/// Lookup descriptor for a key inside a ConfigMap or Secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectKeyRef {
    pub name: String,
    pub key: String,
    /// Template wrapping the looked-up value, e.g. `--token=${SECRET_VALUE}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl ObjectKeyRef {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            format: None,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

/// A scalar value: a literal, or a reference resolved by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SingleValueWire", into = "SingleValueWire")]
pub enum SingleValue {
    Value(String),
    ConfigMapValue(ObjectKeyRef),
    SecretValue(ObjectKeyRef),
}

schema_via_wire!(SingleValue, SingleValueWire, "SingleValue");

impl SingleValue {
    pub fn literal(value: impl Into<String>) -> Self {
        SingleValue::Value(value.into())
    }

    pub fn config_map(name: impl Into<String>, key: impl Into<String>) -> Self {
        SingleValue::ConfigMapValue(ObjectKeyRef::new(name, key))
    }

    pub fn secret(name: impl Into<String>, key: impl Into<String>) -> Self {
        SingleValue::SecretValue(ObjectKeyRef::new(name, key))
    }

    /// Wire key of the populated branch.
    pub fn variant_name(&self) -> &'static str {
        match self {
            SingleValue::Value(_) => "value",
            SingleValue::ConfigMapValue(_) => "configMapValue",
            SingleValue::SecretValue(_) => "secretValue",
        }
    }

    pub fn as_literal(&self) -> Option<&str> {
        match self {
            SingleValue::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// Pick the single populated branch of a flat scalar union, if any.
fn single_from_parts(
    value: Option<String>,
    config_map_value: Option<ObjectKeyRef>,
    secret_value: Option<ObjectKeyRef>,
    path: &str,
) -> Result<Option<SingleValue>, ValidationError> {
    let count = populated(&[
        value.is_some(),
        config_map_value.is_some(),
        secret_value.is_some(),
    ]);
    if count > 1 {
        return Err(ValidationError::new(
            ErrorKind::InvalidUnion,
            path,
            "only one of value, configMapValue and secretValue may be set",
        ));
    }

    Ok(value
        .map(SingleValue::Value)
        .or(config_map_value.map(SingleValue::ConfigMapValue))
        .or(secret_value.map(SingleValue::SecretValue)))
}

impl TryFrom<SingleValueWire> for SingleValue {
    type Error = ValidationError;

    fn try_from(wire: SingleValueWire) -> Result<Self, Self::Error> {
        single_from_parts(wire.value, wire.config_map_value, wire.secret_value, "")?.ok_or_else(
            || {
                ValidationError::new(
                    ErrorKind::InvalidUnion,
                    "",
                    "one of value, configMapValue or secretValue must be set",
                )
            },
        )
    }
}

impl From<SingleValue> for SingleValueWire {
    fn from(v: SingleValue) -> Self {
        match v {
            SingleValue::Value(value) => SingleValueWire {
                value: Some(value),
                ..Default::default()
            },
            SingleValue::ConfigMapValue(r) => SingleValueWire {
                config_map_value: Some(r),
                ..Default::default()
            },
            SingleValue::SecretValue(r) => SingleValueWire {
                secret_value: Some(r),
                ..Default::default()
            },
        }
    }
}

/// Shape of a supplied parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValueKind {
    Single(SingleValue),
    Array(Vec<SingleValue>),
}

impl ParamValueKind {
    pub fn is_array(&self) -> bool {
        matches!(self, ParamValueKind::Array(_))
    }
}

/// A named value supplied by a build or build run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ParamValueWire", into = "ParamValueWire")]
pub struct ParamValue {
    pub name: String,
    pub value: ParamValueKind,
}

schema_via_wire!(ParamValue, ParamValueWire, "ParamValue");

impl ParamValue {
    pub fn single(name: impl Into<String>, value: SingleValue) -> Self {
        Self {
            name: name.into(),
            value: ParamValueKind::Single(value),
        }
    }

    /// Shorthand for a literal string value.
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::single(name, SingleValue::literal(value))
    }

    pub fn array(name: impl Into<String>, values: Vec<SingleValue>) -> Self {
        Self {
            name: name.into(),
            value: ParamValueKind::Array(values),
        }
    }

    /// Wire key of the populated branch.
    pub fn variant_name(&self) -> &'static str {
        match &self.value {
            ParamValueKind::Single(v) => v.variant_name(),
            ParamValueKind::Array(_) => "values",
        }
    }
}

impl TryFrom<ParamValueWire> for ParamValue {
    type Error = ValidationError;

    fn try_from(wire: ParamValueWire) -> Result<Self, Self::Error> {
        let path = format!("paramValues[{}]", wire.name);
        let single = single_from_parts(
            wire.value,
            wire.config_map_value,
            wire.secret_value,
            &path,
        )?;

        let value = match (single, wire.values) {
            (Some(v), None) => ParamValueKind::Single(v),
            (None, Some(values)) => ParamValueKind::Array(values),
            (Some(_), Some(_)) => {
                return Err(ValidationError::new(
                    ErrorKind::InvalidUnion,
                    path,
                    "a single value and values cannot both be set",
                ));
            }
            (None, None) => {
                return Err(ValidationError::new(
                    ErrorKind::InvalidUnion,
                    path,
                    "one of value, configMapValue, secretValue or values must be set",
                ));
            }
        };

        Ok(ParamValue {
            name: wire.name,
            value,
        })
    }
}

impl From<ParamValue> for ParamValueWire {
    fn from(p: ParamValue) -> Self {
        match p.value {
            ParamValueKind::Single(v) => {
                let single = SingleValueWire::from(v);
                ParamValueWire {
                    name: p.name,
                    value: single.value,
                    config_map_value: single.config_map_value,
                    secret_value: single.secret_value,
                    values: None,
                }
            }
            ParamValueKind::Array(values) => ParamValueWire {
                name: p.name,
                values: Some(values),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_value_branches() {
        let v: SingleValue = serde_json::from_str(r#"{"value": "latest"}"#).unwrap();
        assert_eq!(v, SingleValue::literal("latest"));
        assert_eq!(v.variant_name(), "value");

        let v: SingleValue =
            serde_json::from_str(r#"{"secretValue": {"name": "creds", "key": "token"}}"#)
                .unwrap();
        assert_eq!(v, SingleValue::secret("creds", "token"));
        assert_eq!(v.as_literal(), None);
    }

    #[test]
    fn test_single_value_rejects_zero_or_many_branches() {
        let err = serde_json::from_str::<SingleValue>(r#"{}"#).unwrap_err();
        assert!(err.to_string().contains("InvalidUnion"));

        let err = serde_json::from_str::<SingleValue>(
            r#"{"value": "x", "configMapValue": {"name": "cm", "key": "k"}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("InvalidUnion"));
    }

    #[test]
    fn test_empty_literal_is_present() {
        let p: ParamValue = serde_json::from_str(r#"{"name": "tag", "value": ""}"#).unwrap();
        assert_eq!(p, ParamValue::literal("tag", ""));

        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json, serde_json::json!({"name": "tag", "value": ""}));
    }

    #[test]
    fn test_param_value_rejects_value_and_values() {
        let err = serde_json::from_str::<ParamValue>(
            r#"{"name": "tags", "value": "a", "values": [{"value": "b"}]}"#,
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("InvalidUnion"));
        assert!(msg.contains("paramValues[tags]"));
    }

    #[test]
    fn test_param_value_requires_a_branch() {
        let err = serde_json::from_str::<ParamValue>(r#"{"name": "tag"}"#).unwrap_err();
        assert!(err.to_string().contains("InvalidUnion"));
    }

    #[test]
    fn test_param_value_array_keeps_only_values_key() {
        let p = ParamValue::array(
            "build-args",
            vec![
                SingleValue::literal("A=1"),
                SingleValue::ConfigMapValue(
                    ObjectKeyRef::new("settings", "b").with_format("B=${CONFIGMAP_VALUE}"),
                ),
            ],
        );
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "build-args",
                "values": [
                    {"value": "A=1"},
                    {"configMapValue": {"name": "settings", "key": "b", "format": "B=${CONFIGMAP_VALUE}"}}
                ]
            })
        );
        assert_eq!(p.variant_name(), "values");

        let back: ParamValue = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_clone_is_independent() {
        let original = ParamValue::array("xs", vec![SingleValue::literal("a")]);
        let mut copy = original.clone();
        if let ParamValueKind::Array(values) = &mut copy.value {
            values.push(SingleValue::literal("b"));
        }
        assert_eq!(
            original.value,
            ParamValueKind::Array(vec![SingleValue::literal("a")])
        );
        assert_ne!(copy, original);
    }
}
