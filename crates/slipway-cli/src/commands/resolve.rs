//! Build run resolution.

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use chrono::Utc;
use serde::Serialize;
use slipway_core::{BuildRun, ExecutionPlan, prepare_build_run};
use tracing::warn;

use super::Context;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Resolved<'a> {
    build_run: &'a BuildRun,
    #[serde(skip_serializing_if = "Option::is_none")]
    plan: Option<&'a ExecutionPlan>,
}

pub async fn resolve(ctx: &Context, files: &[PathBuf], run: &str) -> Result<()> {
    let set = ctx.load(files)?;
    let build_run = set
        .build_run(Some(ctx.namespace()), run)
        .ok_or_else(|| anyhow!("build run {}/{} not found", ctx.namespace(), run))?;

    let start = prepare_build_run(
        &set,
        build_run,
        ctx.namespace(),
        &ctx.system.render_config(),
        Utc::now(),
    )
    .await?;

    if start.plan.is_none() {
        let message = start
            .build_run
            .status
            .as_ref()
            .and_then(|s| s.succeeded())
            .map(|c| format!("{}: {}", c.reason, c.message))
            .unwrap_or_default();
        warn!(build_run = run, %message, "build run did not start");
    }

    ctx.print(&Resolved {
        build_run: &start.build_run,
        plan: start.plan.as_ref(),
    })
}
