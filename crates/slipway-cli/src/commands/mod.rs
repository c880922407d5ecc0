//! CLI command implementations.

pub mod resolve;
pub mod retention;
pub mod triggers;

use std::path::PathBuf;

use anyhow::{Context as _, Result, bail};
use kube::CustomResourceExt;
use serde::Serialize;
use slipway_config::{ManifestSet, SystemConfig, load_manifests};
use slipway_core::{Build, BuildRun, BuildStrategy, ClusterBuildStrategy};

use crate::OutputFormat;

/// Settings shared by every command.
pub struct Context {
    pub system: SystemConfig,
    pub output: OutputFormat,
}

impl Context {
    pub fn new(namespace: Option<String>, output: OutputFormat) -> Result<Self> {
        let mut system = SystemConfig::from_env()?;
        if let Some(namespace) = namespace {
            system.default_namespace = namespace;
        }
        Ok(Self { system, output })
    }

    pub fn namespace(&self) -> &str {
        &self.system.default_namespace
    }

    /// Load every file into one catalog.
    pub fn load(&self, files: &[PathBuf]) -> Result<ManifestSet> {
        let mut manifests = Vec::new();
        for file in files {
            let loaded = load_manifests(file)
                .with_context(|| format!("failed to load {}", file.display()))?;
            manifests.extend(loaded);
        }
        Ok(ManifestSet::from_manifests(self.namespace(), manifests)?)
    }

    pub fn print<T: Serialize>(&self, value: &T) -> Result<()> {
        match self.output {
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        }
        Ok(())
    }
}

pub fn validate(ctx: &Context, files: &[PathBuf]) -> Result<()> {
    let set = ctx.load(files)?;
    let reports = set.validate();

    let mut invalid = 0;
    for report in &reports {
        let target = match &report.namespace {
            Some(ns) => format!("{} {}/{}", report.kind, ns, report.name),
            None => format!("{} {}", report.kind, report.name),
        };
        match &report.error {
            None => println!("ok       {}", target),
            Some(err) => {
                invalid += 1;
                println!("invalid  {}: {}", target, err);
            }
        }
    }

    if invalid > 0 {
        bail!("{} of {} objects are invalid", invalid, reports.len());
    }
    println!("Configuration is valid");
    Ok(())
}

pub fn crds() -> Result<()> {
    let crds = [
        BuildStrategy::crd(),
        ClusterBuildStrategy::crd(),
        Build::crd(),
        BuildRun::crd(),
    ];
    for crd in &crds {
        println!("---");
        print!("{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
