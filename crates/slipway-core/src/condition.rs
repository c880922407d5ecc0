//! Status conditions shared by builds and build runs.
//!
//! A [`Conditions`] list is keyed by [`ConditionType`] and keeps insertion
//! order. Setting a condition only moves its transition time when the status
//! actually changes.

use chrono::{DateTime, Utc};
use derive_more::Display;
use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::Schema;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Tri-state status of a condition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema, Display,
)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// Kind of a condition. Types this crate does not know are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConditionType {
    /// Overall outcome of a build run.
    Succeeded,
    Other(String),
}

impl From<String> for ConditionType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Succeeded" => ConditionType::Succeeded,
            _ => ConditionType::Other(s),
        }
    }
}

impl From<ConditionType> for String {
    fn from(t: ConditionType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionType::Succeeded => write!(f, "Succeeded"),
            ConditionType::Other(s) => write!(f, "{}", s),
        }
    }
}

/// A single observation about a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    #[schemars(with = "String")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub last_transition_time: DateTime<Utc>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

/// Ordered list of conditions, at most one per type.
///
/// Decoding collapses repeated types: a later entry replaces an earlier one
/// in place.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Conditions(Vec<Condition>);

impl FromIterator<Condition> for Conditions {
    fn from_iter<I: IntoIterator<Item = Condition>>(iter: I) -> Self {
        let mut list: Vec<Condition> = Vec::new();
        for condition in iter {
            match list
                .iter_mut()
                .find(|c| c.condition_type == condition.condition_type)
            {
                Some(existing) => *existing = condition,
                None => list.push(condition),
            }
        }
        Conditions(list)
    }
}

impl<'de> Deserialize<'de> for Conditions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Vec::<Condition>::deserialize(deserializer)?
            .into_iter()
            .collect())
    }
}

impl JsonSchema for Conditions {
    fn schema_name() -> String {
        "Conditions".to_string()
    }

    fn is_referenceable() -> bool {
        false
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        <Vec<Condition>>::json_schema(generator)
    }
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Condition> {
        self.0.iter()
    }

    /// Find the condition of the given type.
    ///
    /// Resources carry a handful of condition types at most, so a scan over
    /// the list is bounded by the number of distinct types.
    pub fn get(&self, condition_type: &ConditionType) -> Option<&Condition> {
        self.0.iter().find(|c| &c.condition_type == condition_type)
    }

    /// Set a condition, returning `true` when its status transitioned.
    ///
    /// An unchanged status only refreshes reason and message; the transition
    /// time is kept.
    pub fn set(
        &mut self,
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> bool {
        let reason = reason.into();
        let message = message.into();

        match self.0.iter_mut().find(|c| c.condition_type == condition_type) {
            Some(existing) if existing.status == status => {
                existing.reason = reason;
                existing.message = message;
                false
            }
            Some(existing) => {
                existing.status = status;
                existing.reason = reason;
                existing.message = message;
                existing.last_transition_time = now;
                true
            }
            None => {
                self.0.push(Condition {
                    condition_type,
                    status,
                    last_transition_time: now,
                    reason,
                    message,
                });
                true
            }
        }
    }

    /// Remove the condition of the given type, if present.
    pub fn remove(&mut self, condition_type: &ConditionType) -> Option<Condition> {
        let idx = self
            .0
            .iter()
            .position(|c| &c.condition_type == condition_type)?;
        Some(self.0.remove(idx))
    }
}

impl<'a> IntoIterator for &'a Conditions {
    type Item = &'a Condition;
    type IntoIter = std::slice::Iter<'a, Condition>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_decoding_collapses_repeated_types() {
        let conditions: Conditions = serde_json::from_value(serde_json::json!([
            {"type": "Succeeded", "status": "Unknown", "lastTransitionTime": "2024-05-01T12:00:00Z", "reason": "Pending"},
            {"type": "Ready", "status": "True", "lastTransitionTime": "2024-05-01T12:00:00Z"},
            {"type": "Succeeded", "status": "True", "lastTransitionTime": "2024-05-01T12:05:00Z", "reason": "Succeeded"}
        ]))
        .unwrap();

        assert_eq!(conditions.len(), 2);
        let types: Vec<String> = conditions
            .iter()
            .map(|c| c.condition_type.clone().into())
            .collect();
        assert_eq!(types, vec!["Succeeded", "Ready"]);
        let succeeded = conditions.get(&ConditionType::Succeeded).unwrap();
        assert_eq!(succeeded.status, ConditionStatus::True);
        assert_eq!(succeeded.reason, "Succeeded");
    }

    #[test]
    fn test_set_appends_new_condition() {
        let mut conditions = Conditions::new();
        let changed = conditions.set(
            ConditionType::Succeeded,
            ConditionStatus::Unknown,
            "Pending",
            "waiting",
            at(0),
        );
        assert!(changed);
        assert_eq!(conditions.len(), 1);
        let c = conditions.get(&ConditionType::Succeeded).unwrap();
        assert_eq!(c.status, ConditionStatus::Unknown);
        assert_eq!(c.last_transition_time, at(0));
    }

    #[test]
    fn test_same_status_keeps_transition_time() {
        let mut conditions = Conditions::new();
        conditions.set(
            ConditionType::Succeeded,
            ConditionStatus::Unknown,
            "Pending",
            "waiting",
            at(0),
        );
        let changed = conditions.set(
            ConditionType::Succeeded,
            ConditionStatus::Unknown,
            "Running",
            "steps started",
            at(30),
        );
        assert!(!changed);
        let c = conditions.get(&ConditionType::Succeeded).unwrap();
        assert_eq!(c.reason, "Running");
        assert_eq!(c.message, "steps started");
        assert_eq!(c.last_transition_time, at(0));
    }

    #[test]
    fn test_identical_set_is_idempotent() {
        let mut conditions = Conditions::new();
        conditions.set(
            ConditionType::Succeeded,
            ConditionStatus::True,
            "Succeeded",
            "done",
            at(0),
        );
        let before = conditions.clone();
        conditions.set(
            ConditionType::Succeeded,
            ConditionStatus::True,
            "Succeeded",
            "done",
            at(99),
        );
        assert_eq!(conditions, before);
    }

    #[test]
    fn test_status_change_updates_transition_time() {
        let mut conditions = Conditions::new();
        conditions.set(
            ConditionType::Succeeded,
            ConditionStatus::Unknown,
            "Running",
            "",
            at(0),
        );
        let changed = conditions.set(
            ConditionType::Succeeded,
            ConditionStatus::False,
            "Failed",
            "step exited 1",
            at(60),
        );
        assert!(changed);
        let c = conditions.get(&ConditionType::Succeeded).unwrap();
        assert_eq!(c.status, ConditionStatus::False);
        assert_eq!(c.last_transition_time, at(60));

        // re-entrant: False -> True is allowed
        conditions.set(
            ConditionType::Succeeded,
            ConditionStatus::True,
            "Succeeded",
            "",
            at(90),
        );
        assert_eq!(
            conditions
                .get(&ConditionType::Succeeded)
                .unwrap()
                .last_transition_time,
            at(90)
        );
    }

    #[test]
    fn test_insertion_order_and_unknown_types() {
        let mut conditions = Conditions::new();
        conditions.set(
            ConditionType::Other("Ready".to_string()),
            ConditionStatus::True,
            "",
            "",
            at(0),
        );
        conditions.set(
            ConditionType::Succeeded,
            ConditionStatus::Unknown,
            "",
            "",
            at(1),
        );
        let types: Vec<String> = conditions
            .iter()
            .map(|c| c.condition_type.to_string())
            .collect();
        assert_eq!(types, vec!["Ready", "Succeeded"]);

        let json = serde_json::to_value(&conditions).unwrap();
        assert_eq!(json[0]["type"], "Ready");
        assert_eq!(json[1]["status"], "Unknown");

        let back: Conditions = serde_json::from_value(json).unwrap();
        assert_eq!(back, conditions);
    }

    #[test]
    fn test_remove() {
        let mut conditions = Conditions::new();
        conditions.set(
            ConditionType::Succeeded,
            ConditionStatus::True,
            "",
            "",
            at(0),
        );
        assert!(conditions.remove(&ConditionType::Succeeded).is_some());
        assert!(conditions.is_empty());
        assert!(conditions.remove(&ConditionType::Succeeded).is_none());
    }
}
