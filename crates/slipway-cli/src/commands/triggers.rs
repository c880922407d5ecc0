//! Trigger matching.

use std::path::PathBuf;

use anyhow::{Result, bail};
use kube::ResourceExt;
use serde::Serialize;
use slipway_core::TriggerEvent;
use slipway_core::trigger::GitHubEventName;

use super::Context;
use crate::GitHubEvent;

#[derive(Serialize)]
struct Match {
    build: String,
    when: Vec<String>,
}

/// Event described by the command line flags.
pub fn event(
    github_event: Option<GitHubEvent>,
    branch: Option<String>,
    image: Option<String>,
) -> Result<TriggerEvent> {
    match (github_event, branch, image) {
        (Some(event), Some(branch), None) => Ok(TriggerEvent::GitHub {
            event: match event {
                GitHubEvent::Push => GitHubEventName::Push,
                GitHubEvent::PullRequest => GitHubEventName::PullRequest,
            },
            branch,
        }),
        (None, None, Some(name)) => Ok(TriggerEvent::Image { name }),
        _ => bail!("pass either --github-event with --branch, or --image"),
    }
}

pub fn triggers(ctx: &Context, files: &[PathBuf], event: &TriggerEvent) -> Result<()> {
    let set = ctx.load(files)?;

    let matches: Vec<Match> = set
        .builds()
        .filter_map(|build| {
            let trigger = build.spec.trigger.as_ref()?;
            let when: Vec<String> = trigger.matching(event).map(|w| w.name.clone()).collect();
            if when.is_empty() {
                return None;
            }
            Some(Match {
                build: format!(
                    "{}/{}",
                    build.namespace().unwrap_or_else(|| ctx.namespace().to_string()),
                    build.name_any()
                ),
                when,
            })
        })
        .collect();

    ctx.print(&matches)
}
