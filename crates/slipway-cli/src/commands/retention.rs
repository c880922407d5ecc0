//! Retention evaluation.

use std::path::PathBuf;

use anyhow::{Context as _, Result, anyhow};
use chrono::{DateTime, Utc};
use slipway_core::evaluate_retention;

use super::Context;

pub fn retention(ctx: &Context, files: &[PathBuf], build: &str, now: Option<&str>) -> Result<()> {
    let now = match now {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("invalid --now {:?}", s))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let set = ctx.load(files)?;
    let definition = set
        .build(Some(ctx.namespace()), build)
        .ok_or_else(|| anyhow!("build {}/{} not found", ctx.namespace(), build))?;
    let runs = set.runs_of_build(Some(ctx.namespace()), build);

    let decisions = evaluate_retention(definition.spec.retention.as_ref(), &runs, now);
    ctx.print(&decisions)
}
