//! Manifest parsing and the in-memory object catalog.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use kube::ResourceExt;
use serde::Deserialize;
use slipway_core::strategy::BuildStrategyKind;
use slipway_core::{
    Build, BuildRun, BuildSpec, BuildStore, BuildStrategy, BuildStrategySpec, ClusterBuildStrategy,
    Error, StrategyStore, ValidationError, validate_build, validate_build_run, validate_strategy,
};
use tracing::{debug, info};

use crate::{ConfigError, ConfigResult};

/// API version accepted in manifests.
pub const API_VERSION: &str = "slipway.dev/v1beta1";

/// One parsed document.
#[derive(Debug, Clone)]
pub enum Manifest {
    BuildStrategy(BuildStrategy),
    ClusterBuildStrategy(ClusterBuildStrategy),
    Build(Build),
    BuildRun(BuildRun),
}

impl Manifest {
    pub fn kind(&self) -> &'static str {
        match self {
            Manifest::BuildStrategy(_) => "BuildStrategy",
            Manifest::ClusterBuildStrategy(_) => "ClusterBuildStrategy",
            Manifest::Build(_) => "Build",
            Manifest::BuildRun(_) => "BuildRun",
        }
    }

    pub fn name(&self) -> String {
        match self {
            Manifest::BuildStrategy(o) => o.name_any(),
            Manifest::ClusterBuildStrategy(o) => o.name_any(),
            Manifest::Build(o) => o.name_any(),
            Manifest::BuildRun(o) => o.name_any(),
        }
    }
}

fn string_field<'a>(doc: &'a serde_yaml::Value, field: &str) -> ConfigResult<&'a str> {
    doc.get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))
}

/// Parse every document in a multi-document YAML stream.
///
/// Empty documents are skipped. Each document must carry `apiVersion` and
/// `kind`, and the version must be [`API_VERSION`].
pub fn parse_manifests(yaml: &str) -> ConfigResult<Vec<Manifest>> {
    let mut manifests = Vec::new();

    for document in serde_yaml::Deserializer::from_str(yaml) {
        let doc = serde_yaml::Value::deserialize(document)?;
        if doc.is_null() {
            continue;
        }

        let api_version = string_field(&doc, "apiVersion")?;
        if api_version != API_VERSION {
            return Err(ConfigError::UnsupportedApiVersion(api_version.to_string()));
        }

        let manifest = match string_field(&doc, "kind")? {
            "BuildStrategy" => Manifest::BuildStrategy(serde_yaml::from_value(doc)?),
            "ClusterBuildStrategy" => Manifest::ClusterBuildStrategy(serde_yaml::from_value(doc)?),
            "Build" => Manifest::Build(serde_yaml::from_value(doc)?),
            "BuildRun" => Manifest::BuildRun(serde_yaml::from_value(doc)?),
            other => return Err(ConfigError::UnsupportedKind(other.to_string())),
        };
        debug!(kind = manifest.kind(), name = %manifest.name(), "parsed manifest");
        manifests.push(manifest);
    }

    Ok(manifests)
}

/// Load manifests from a file, or from every `.yaml`/`.yml` file in a
/// directory (in name order).
pub fn load_manifests(path: &Path) -> ConfigResult<Vec<Manifest>> {
    if !path.is_dir() {
        let text = std::fs::read_to_string(path)?;
        return parse_manifests(&text);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let file = entry?.path();
        let is_yaml = file
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if is_yaml {
            files.push(file);
        }
    }
    files.sort();

    let mut manifests = Vec::new();
    for file in files {
        let text = std::fs::read_to_string(&file)?;
        manifests.extend(parse_manifests(&text)?);
    }
    Ok(manifests)
}

/// Outcome of validating one object in a [`ManifestSet`].
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub kind: &'static str,
    pub namespace: Option<String>,
    pub name: String,
    pub error: Option<ValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }

    /// Turn a failed report into a [`ConfigError`].
    pub fn into_result(self) -> ConfigResult<()> {
        match self.error {
            None => Ok(()),
            Some(source) => Err(ConfigError::Validation {
                kind: self.kind.to_string(),
                name: self.name,
                source,
            }),
        }
    }
}

type Key = (String, String);

/// Catalog of loaded objects, keyed by namespace and name.
///
/// Objects without a namespace land in the default namespace.
/// Cluster strategies are keyed by name only.
#[derive(Debug, Clone, Default)]
pub struct ManifestSet {
    default_namespace: String,
    strategies: BTreeMap<Key, BuildStrategy>,
    cluster_strategies: BTreeMap<String, ClusterBuildStrategy>,
    builds: BTreeMap<Key, Build>,
    build_runs: BTreeMap<Key, BuildRun>,
}

fn insert_unique<K: Ord, V>(
    map: &mut BTreeMap<K, V>,
    key: K,
    value: V,
    what: String,
) -> ConfigResult<()> {
    if map.contains_key(&key) {
        return Err(ConfigError::Duplicate(what));
    }
    map.insert(key, value);
    Ok(())
}

impl ManifestSet {
    pub fn new(default_namespace: impl Into<String>) -> Self {
        Self {
            default_namespace: default_namespace.into(),
            ..Default::default()
        }
    }

    /// Build a catalog, rejecting duplicate objects.
    pub fn from_manifests(
        default_namespace: impl Into<String>,
        manifests: impl IntoIterator<Item = Manifest>,
    ) -> ConfigResult<Self> {
        let mut set = Self::new(default_namespace);
        for manifest in manifests {
            set.insert(manifest)?;
        }
        info!(
            strategies = set.strategies.len(),
            cluster_strategies = set.cluster_strategies.len(),
            builds = set.builds.len(),
            build_runs = set.build_runs.len(),
            "loaded manifests"
        );
        Ok(set)
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    fn key(&self, namespace: Option<&str>, name: String) -> Key {
        (
            namespace.unwrap_or(&self.default_namespace).to_string(),
            name,
        )
    }

    pub fn insert(&mut self, manifest: Manifest) -> ConfigResult<()> {
        let what = format!("{} {}", manifest.kind(), manifest.name());
        match manifest {
            Manifest::BuildStrategy(o) => {
                let key = self.key(o.metadata.namespace.as_deref(), o.name_any());
                insert_unique(&mut self.strategies, key, o, what)
            }
            Manifest::ClusterBuildStrategy(o) => {
                insert_unique(&mut self.cluster_strategies, o.name_any(), o, what)
            }
            Manifest::Build(o) => {
                let key = self.key(o.metadata.namespace.as_deref(), o.name_any());
                insert_unique(&mut self.builds, key, o, what)
            }
            Manifest::BuildRun(o) => {
                let key = self.key(o.metadata.namespace.as_deref(), o.name_any());
                insert_unique(&mut self.build_runs, key, o, what)
            }
        }
    }

    fn lookup<'a, T>(
        &self,
        map: &'a BTreeMap<Key, T>,
        namespace: Option<&str>,
        name: &str,
    ) -> Option<&'a T> {
        map.get(&self.key(namespace, name.to_string()))
    }

    pub fn build(&self, namespace: Option<&str>, name: &str) -> Option<&Build> {
        self.lookup(&self.builds, namespace, name)
    }

    pub fn build_run(&self, namespace: Option<&str>, name: &str) -> Option<&BuildRun> {
        self.lookup(&self.build_runs, namespace, name)
    }

    pub fn builds(&self) -> impl Iterator<Item = &Build> {
        self.builds.values()
    }

    pub fn build_runs(&self) -> impl Iterator<Item = &BuildRun> {
        self.build_runs.values()
    }

    /// Runs in `namespace` that reference the named build.
    pub fn runs_of_build(&self, namespace: Option<&str>, build: &str) -> Vec<BuildRun> {
        let namespace = namespace.unwrap_or(&self.default_namespace);
        self.build_runs
            .iter()
            .filter(|((ns, _), run)| ns == namespace && run.build_name() == Some(build))
            .map(|(_, run)| run.clone())
            .collect()
    }

    /// The strategy spec a build refers to, if loaded.
    pub fn strategy_for(
        &self,
        namespace: Option<&str>,
        spec: &BuildSpec,
    ) -> Option<BuildStrategySpec> {
        let name = spec.strategy.name.as_str();
        match spec.strategy.effective_kind() {
            BuildStrategyKind::BuildStrategy => self
                .lookup(&self.strategies, namespace, name)
                .map(|s| s.spec.clone()),
            BuildStrategyKind::ClusterBuildStrategy => self
                .cluster_strategies
                .get(name)
                .map(|s| s.spec.strategy.clone()),
        }
    }

    /// Validate every object. Builds are checked against their strategy
    /// when it is loaded.
    pub fn validate(&self) -> Vec<ValidationReport> {
        let mut reports = Vec::new();

        for ((ns, name), strategy) in &self.strategies {
            reports.push(ValidationReport {
                kind: "BuildStrategy",
                namespace: Some(ns.clone()),
                name: name.clone(),
                error: validate_strategy(&strategy.spec).err(),
            });
        }
        for (name, strategy) in &self.cluster_strategies {
            reports.push(ValidationReport {
                kind: "ClusterBuildStrategy",
                namespace: None,
                name: name.clone(),
                error: validate_strategy(&strategy.spec).err(),
            });
        }
        for ((ns, name), build) in &self.builds {
            let strategy = self.strategy_for(Some(ns), &build.spec);
            reports.push(ValidationReport {
                kind: "Build",
                namespace: Some(ns.clone()),
                name: name.clone(),
                error: validate_build(&build.spec, strategy.as_ref()).err(),
            });
        }
        for ((ns, name), run) in &self.build_runs {
            reports.push(ValidationReport {
                kind: "BuildRun",
                namespace: Some(ns.clone()),
                name: name.clone(),
                error: validate_build_run(&run.spec).err(),
            });
        }

        reports
    }
}

#[async_trait]
impl BuildStore for ManifestSet {
    async fn get_build(&self, namespace: &str, name: &str) -> slipway_core::Result<Build> {
        self.build(Some(namespace), name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("build {}/{}", namespace, name)))
    }
}

#[async_trait]
impl StrategyStore for ManifestSet {
    async fn get_build_strategy(
        &self,
        namespace: &str,
        name: &str,
    ) -> slipway_core::Result<BuildStrategy> {
        self.lookup(&self.strategies, Some(namespace), name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("buildstrategy {}/{}", namespace, name)))
    }

    async fn get_cluster_build_strategy(
        &self,
        name: &str,
    ) -> slipway_core::Result<ClusterBuildStrategy> {
        self.cluster_strategies
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("clusterbuildstrategy {}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use slipway_core::ErrorKind;
    use slipway_core::render::RenderConfig;
    use slipway_core::prepare_build_run;

    const MANIFESTS: &str = r#"
apiVersion: slipway.dev/v1beta1
kind: ClusterBuildStrategy
metadata:
  name: buildah
spec:
  parameters:
    - name: storage-driver
      default: vfs
  steps:
    - name: build
      image: quay.io/containers/buildah
      command: ["buildah"]
      args: ["bud", "--storage-driver=$(params.storage-driver)", "-t", "$(params.shp-output-image)", "$(params.shp-source-context)"]
---
apiVersion: slipway.dev/v1beta1
kind: Build
metadata:
  name: app
  namespace: ci
spec:
  source:
    type: Git
    git:
      url: https://github.com/example/app
  strategy:
    name: buildah
    kind: ClusterBuildStrategy
  output:
    image: registry.example.com/app
---
apiVersion: slipway.dev/v1beta1
kind: BuildRun
metadata:
  name: app-1
  namespace: ci
spec:
  build:
    name: app
"#;

    fn catalog() -> ManifestSet {
        ManifestSet::from_manifests("default", parse_manifests(MANIFESTS).unwrap()).unwrap()
    }

    #[test]
    fn test_parse_multi_document() {
        let manifests = parse_manifests(MANIFESTS).unwrap();
        let kinds: Vec<_> = manifests.iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, vec!["ClusterBuildStrategy", "Build", "BuildRun"]);
        assert_eq!(manifests[1].name(), "app");
    }

    #[test]
    fn test_empty_documents_are_skipped() {
        let manifests = parse_manifests("---\n---\n").unwrap();
        assert!(manifests.is_empty());
    }

    #[test]
    fn test_rejects_foreign_api_version() {
        let yaml = "apiVersion: shipwright.io/v1beta1\nkind: Build\nmetadata:\n  name: x\n";
        let err = parse_manifests(yaml).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnsupportedApiVersion(v) if v == "shipwright.io/v1beta1"
        ));
    }

    #[test]
    fn test_rejects_unknown_kind_and_missing_fields() {
        let yaml = "apiVersion: slipway.dev/v1beta1\nkind: Pipeline\n";
        assert!(matches!(
            parse_manifests(yaml).unwrap_err(),
            ConfigError::UnsupportedKind(k) if k == "Pipeline"
        ));

        let yaml = "kind: Build\n";
        assert!(matches!(
            parse_manifests(yaml).unwrap_err(),
            ConfigError::MissingField(f) if f == "apiVersion"
        ));
    }

    #[test]
    fn test_invalid_union_is_a_parse_error() {
        let yaml = r#"
apiVersion: slipway.dev/v1beta1
kind: BuildRun
metadata:
  name: broken
spec:
  build:
    name: app
    spec:
      strategy:
        name: buildah
      output:
        image: registry/app
"#;
        assert!(matches!(parse_manifests(yaml).unwrap_err(), ConfigError::Parse(_)));
    }

    #[test]
    fn test_catalog_rejects_duplicates() {
        let mut manifests = parse_manifests(MANIFESTS).unwrap();
        manifests.push(manifests[1].clone());
        let err = ManifestSet::from_manifests("default", manifests).unwrap_err();
        assert!(matches!(err, ConfigError::Duplicate(what) if what == "Build app"));
    }

    #[test]
    fn test_catalog_lookups() {
        let set = catalog();
        assert!(set.build(Some("ci"), "app").is_some());
        assert!(set.build(None, "app").is_none());
        assert_eq!(set.runs_of_build(Some("ci"), "app").len(), 1);
        assert!(set.runs_of_build(Some("ci"), "other").is_empty());

        let build = set.build(Some("ci"), "app").unwrap();
        let strategy = set.strategy_for(Some("ci"), &build.spec).unwrap();
        assert_eq!(strategy.steps[0].name, "build");
    }

    #[test]
    fn test_validate_reports_each_object() {
        let set = catalog();
        let reports = set.validate();
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.is_valid()), "{:?}", reports);
    }

    #[test]
    fn test_validate_flags_unknown_parameter() {
        let yaml = format!(
            "{}\n---\n{}",
            MANIFESTS,
            r#"
apiVersion: slipway.dev/v1beta1
kind: Build
metadata:
  name: bad
  namespace: ci
spec:
  strategy:
    name: buildah
  paramValues:
    - name: no-such-param
      value: x
  output:
    image: registry.example.com/bad
"#
        );
        let set = ManifestSet::from_manifests("default", parse_manifests(&yaml).unwrap()).unwrap();
        let report = set
            .validate()
            .into_iter()
            .find(|r| r.name == "bad")
            .unwrap();
        assert_eq!(report.error.as_ref().unwrap().kind, ErrorKind::UnknownParameter);
        assert!(matches!(report.into_result(), Err(ConfigError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_catalog_serves_run_preparation() {
        let set = catalog();
        let run = set.build_run(Some("ci"), "app-1").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let config = RenderConfig::default();
        let start = prepare_build_run(&set, run, set.default_namespace(), &config, now)
            .await
            .unwrap();
        let plan = start.plan.unwrap();
        let args = &plan.steps[0].args;
        assert!(args.contains(&"--storage-driver=vfs".to_string()));
        assert!(args.contains(&"registry.example.com/app".to_string()));
    }
}
