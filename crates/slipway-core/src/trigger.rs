//! Build triggers and event matching.
//!
//! A trigger lists conditions under `when`; an incoming event starts the
//! build when any condition matches it. Filter lists left empty match
//! anything.

use hmac::{Hmac, Mac};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{ErrorKind, ValidationError};
use crate::wire::{TriggerType, TriggerWhenWire, populated, schema_via_wire};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum GitHubEventName {
    Push,
    PullRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WhenGitHub {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<GitHubEventName>,
    /// Branch names or globs such as `release-*`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WhenImage {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
}

/// Watches another object, typically a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WhenObjectRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerCondition {
    GitHub(WhenGitHub),
    Image(WhenImage),
    ObjectRef(WhenObjectRef),
}

impl TriggerCondition {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            TriggerCondition::GitHub(_) => TriggerType::GitHub,
            TriggerCondition::Image(_) => TriggerType::Image,
            TriggerCondition::ObjectRef(_) => TriggerType::Pipeline,
        }
    }
}

/// A named trigger condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TriggerWhenWire", into = "TriggerWhenWire")]
pub struct TriggerWhen {
    pub name: String,
    pub condition: TriggerCondition,
}

schema_via_wire!(TriggerWhen, TriggerWhenWire, "TriggerWhen");

impl TriggerWhen {
    pub fn github(name: impl Into<String>, when: WhenGitHub) -> Self {
        Self {
            name: name.into(),
            condition: TriggerCondition::GitHub(when),
        }
    }

    pub fn image(name: impl Into<String>, when: WhenImage) -> Self {
        Self {
            name: name.into(),
            condition: TriggerCondition::Image(when),
        }
    }

    pub fn object_ref(name: impl Into<String>, when: WhenObjectRef) -> Self {
        Self {
            name: name.into(),
            condition: TriggerCondition::ObjectRef(when),
        }
    }

    /// Wire key of the populated branch.
    pub fn variant_name(&self) -> &'static str {
        match self.condition {
            TriggerCondition::GitHub(_) => "github",
            TriggerCondition::Image(_) => "image",
            TriggerCondition::ObjectRef(_) => "objectRef",
        }
    }

    pub fn matches(&self, event: &TriggerEvent) -> bool {
        match (&self.condition, event) {
            (TriggerCondition::GitHub(when), TriggerEvent::GitHub { event, branch }) => {
                (when.events.is_empty() || when.events.contains(event))
                    && (when.branches.is_empty() || matches_branch_pattern(branch, &when.branches))
            }
            (TriggerCondition::Image(when), TriggerEvent::Image { name }) => {
                when.names.is_empty() || when.names.iter().any(|n| n == name)
            }
            (
                TriggerCondition::ObjectRef(when),
                TriggerEvent::ObjectRef {
                    name,
                    status,
                    labels,
                },
            ) => {
                when.name.as_ref().is_none_or(|n| n == name)
                    && (when.status.is_empty() || when.status.iter().any(|s| s == status))
                    && when
                        .selector
                        .iter()
                        .all(|(k, v)| labels.get(k).is_some_and(|l| l == v))
            }
            _ => false,
        }
    }
}

impl TryFrom<TriggerWhenWire> for TriggerWhen {
    type Error = ValidationError;

    fn try_from(wire: TriggerWhenWire) -> Result<Self, Self::Error> {
        let path = format!("trigger.when[{}]", wire.name);
        if populated(&[
            wire.github.is_some(),
            wire.image.is_some(),
            wire.object_ref.is_some(),
        ]) != 1
        {
            return Err(ValidationError::new(
                ErrorKind::InvalidUnion,
                path,
                "exactly one of github, image and objectRef must be set",
            ));
        }

        let condition = if let Some(g) = wire.github {
            TriggerCondition::GitHub(g)
        } else if let Some(i) = wire.image {
            TriggerCondition::Image(i)
        } else if let Some(o) = wire.object_ref {
            TriggerCondition::ObjectRef(o)
        } else {
            return Err(ValidationError::new(
                ErrorKind::InvalidUnion,
                path,
                "no trigger condition set",
            ));
        };

        if let Some(declared) = wire.trigger_type {
            if declared != condition.trigger_type() {
                return Err(ValidationError::new(
                    ErrorKind::InvalidUnion,
                    format!("{}.type", path),
                    format!("type {:?} does not match the populated condition", declared),
                ));
            }
        }

        Ok(TriggerWhen {
            name: wire.name,
            condition,
        })
    }
}

impl From<TriggerWhen> for TriggerWhenWire {
    fn from(w: TriggerWhen) -> Self {
        let mut wire = TriggerWhenWire {
            name: w.name,
            trigger_type: Some(w.condition.trigger_type()),
            ..Default::default()
        };
        match w.condition {
            TriggerCondition::GitHub(g) => wire.github = Some(g),
            TriggerCondition::Image(i) => wire.image = Some(i),
            TriggerCondition::ObjectRef(o) => wire.object_ref = Some(o),
        }
        wire
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TriggerSecretRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<TriggerWhen>,
    /// Secret holding the webhook shared secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<TriggerSecretRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl Trigger {
    /// Absent means enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Conditions matching the event, in declaration order.
    pub fn matching<'a>(
        &'a self,
        event: &'a TriggerEvent,
    ) -> impl Iterator<Item = &'a TriggerWhen> + 'a {
        let enabled = self.is_enabled();
        self.when
            .iter()
            .filter(move |w| enabled && w.matches(event))
    }

    pub fn matches(&self, event: &TriggerEvent) -> bool {
        let matched = self.matching(event).next().is_some();
        debug!(enabled = self.is_enabled(), matched, ?event, "evaluated trigger");
        matched
    }
}

/// An external event that may start builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerEvent {
    GitHub {
        event: GitHubEventName,
        /// Branch name; a `refs/heads/` prefix is ignored.
        branch: String,
    },
    Image {
        name: String,
    },
    ObjectRef {
        name: String,
        status: String,
        labels: BTreeMap<String, String>,
    },
}

impl TriggerEvent {
    pub fn github_push(branch: impl Into<String>) -> Self {
        TriggerEvent::GitHub {
            event: GitHubEventName::Push,
            branch: branch.into(),
        }
    }
}

/// Check whether a branch matches any of the patterns. `*` matches any run
/// of characters.
pub fn matches_branch_pattern(branch: &str, patterns: &[String]) -> bool {
    let branch = branch.strip_prefix("refs/heads/").unwrap_or(branch);
    patterns.iter().any(|pattern| {
        if !pattern.contains('*') {
            return branch == pattern;
        }
        let expr = format!("^{}$", regex::escape(pattern).replace(r"\*", ".*"));
        Regex::new(&expr)
            .map(|re| re.is_match(branch))
            .unwrap_or(false)
    })
}

/// Verify a GitHub `X-Hub-Signature-256` header (`sha256=<hex>`) against the
/// request body.
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    let Some(sig_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}
