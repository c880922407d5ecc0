//! Object lookup collaborators.
//!
//! The surrounding platform owns persistence; these traits are the only way
//! the core reads objects it does not already hold. Lookups are never
//! retried or cached here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::Result;
use crate::build::{Build, BuildSpec};
use crate::buildrun::{BuildRun, ReferencedBuild};
use crate::error::Error;
use crate::render::RenderConfig;
use crate::run::{RunStart, start_build_run};
use crate::strategy::{BuildStrategy, BuildStrategyKind, BuildStrategySpec, ClusterBuildStrategy};

/// Source of builds.
#[async_trait]
pub trait BuildStore: Send + Sync {
    /// Get a build, or `Error::NotFound`.
    async fn get_build(&self, namespace: &str, name: &str) -> Result<Build>;
}

/// Source of strategies.
#[async_trait]
pub trait StrategyStore: Send + Sync {
    async fn get_build_strategy(&self, namespace: &str, name: &str) -> Result<BuildStrategy>;

    async fn get_cluster_build_strategy(&self, name: &str) -> Result<ClusterBuildStrategy>;
}

/// Look up the strategy a build refers to.
pub async fn find_strategy<S>(
    store: &S,
    namespace: &str,
    build: &BuildSpec,
) -> Result<BuildStrategySpec>
where
    S: StrategyStore + ?Sized,
{
    let name = &build.strategy.name;
    match build.strategy.effective_kind() {
        BuildStrategyKind::BuildStrategy => store
            .get_build_strategy(namespace, name)
            .await
            .map(|s| s.spec),
        BuildStrategyKind::ClusterBuildStrategy => store
            .get_cluster_build_strategy(name)
            .await
            .map(|s| s.spec.strategy),
    }
}

/// Turn a `NotFound` into `None`, passing other errors through.
fn found<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(Error::NotFound(what)) => {
            debug!(%what, "lookup found nothing");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Look up what a run needs and start it.
///
/// Missing objects are not errors here: they fail the run through
/// [`start_build_run`]. Only store failures are returned as `Err`. A run
/// with a frozen build spec never looks its build up again.
pub async fn prepare_build_run<S>(
    store: &S,
    run: &BuildRun,
    default_namespace: &str,
    config: &RenderConfig,
    now: DateTime<Utc>,
) -> Result<RunStart>
where
    S: BuildStore + StrategyStore + ?Sized,
{
    let namespace = run.metadata.namespace.as_deref().unwrap_or(default_namespace);

    let frozen = run.status.as_ref().and_then(|s| s.build_spec.as_ref());

    let build = match (&run.spec.build, frozen) {
        (ReferencedBuild::Name(name), None) => found(store.get_build(namespace, name).await)?,
        _ => None,
    };
    let base = match (&run.spec.build, frozen) {
        (_, Some(spec)) => Some(spec),
        (ReferencedBuild::Spec(spec), None) => Some(spec.as_ref()),
        (ReferencedBuild::Name(_), None) => build.as_ref().map(|b| &b.spec),
    };
    let strategy = match base {
        Some(spec) => found(find_strategy(store, namespace, spec).await)?,
        None => None,
    };

    Ok(start_build_run(
        run,
        build.as_ref(),
        strategy.as_ref(),
        config,
        now,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{Image, Strategy};
    use crate::buildrun::BuildRunSpec;
    use crate::condition::ConditionStatus;
    use crate::strategy::{Parameter, Step};
    use chrono::TimeZone;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryStore {
        builds: HashMap<(String, String), Build>,
        strategies: HashMap<(String, String), BuildStrategy>,
        cluster_strategies: HashMap<String, ClusterBuildStrategy>,
        fail: bool,
    }

    #[async_trait]
    impl BuildStore for MemoryStore {
        async fn get_build(&self, namespace: &str, name: &str) -> Result<Build> {
            if self.fail {
                return Err(Error::Internal("store unavailable".to_string()));
            }
            self.builds
                .get(&(namespace.to_string(), name.to_string()))
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("build {}/{}", namespace, name)))
        }
    }

    #[async_trait]
    impl StrategyStore for MemoryStore {
        async fn get_build_strategy(&self, namespace: &str, name: &str) -> Result<BuildStrategy> {
            self.strategies
                .get(&(namespace.to_string(), name.to_string()))
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("buildstrategy {}/{}", namespace, name)))
        }

        async fn get_cluster_build_strategy(&self, name: &str) -> Result<ClusterBuildStrategy> {
            self.cluster_strategies
                .get(name)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("clusterbuildstrategy {}", name)))
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn strategy_spec() -> BuildStrategySpec {
        BuildStrategySpec {
            steps: vec![Step {
                name: "build".to_string(),
                image: "quay.io/buildah/stable".to_string(),
                ..Default::default()
            }],
            parameters: vec![Parameter::string("tag").with_default("latest")],
            volumes: vec![],
        }
    }

    fn store() -> MemoryStore {
        let mut store = MemoryStore::default();
        let mut build = Build::new(
            "app",
            BuildSpec {
                strategy: Strategy::cluster("buildah"),
                output: Image::new("registry/app"),
                ..Default::default()
            },
        );
        build.metadata.namespace = Some("ci".to_string());
        store
            .builds
            .insert(("ci".to_string(), "app".to_string()), build);
        store.cluster_strategies.insert(
            "buildah".to_string(),
            ClusterBuildStrategy::new("buildah", strategy_spec().into()),
        );
        store
    }

    #[tokio::test]
    async fn test_prepare_resolves_build_and_strategy() {
        let mut run = BuildRun::new("app-1", BuildRunSpec::for_build("app"));
        run.metadata.namespace = Some("ci".to_string());

        let start = prepare_build_run(&store(), &run, "default", &RenderConfig::default(), now())
            .await
            .unwrap();
        assert!(start.plan.is_some());
        let status = start.build_run.status.unwrap();
        assert_eq!(status.succeeded().unwrap().status, ConditionStatus::Unknown);
    }

    #[tokio::test]
    async fn test_missing_build_fails_run() {
        let run = BuildRun::new("app-1", BuildRunSpec::for_build("app"));
        // no namespace on the run: looked up in "default", where nothing exists
        let start = prepare_build_run(&store(), &run, "default", &RenderConfig::default(), now())
            .await
            .unwrap();
        assert!(start.plan.is_none());
        assert_eq!(
            start.build_run.status.unwrap().succeeded().unwrap().reason,
            "BuildNotFound"
        );
    }

    #[tokio::test]
    async fn test_missing_namespaced_strategy_fails_run() {
        let mut spec = BuildSpec {
            strategy: Strategy::namespaced("buildah"),
            output: Image::new("registry/app"),
            ..Default::default()
        };
        spec.strategy.api_version = Some("slipway.dev/v1beta1".to_string());
        let run = BuildRun::new("inline-1", BuildRunSpec::inline(spec));
        let start = prepare_build_run(&store(), &run, "ci", &RenderConfig::default(), now())
            .await
            .unwrap();
        assert_eq!(
            start.build_run.status.unwrap().succeeded().unwrap().reason,
            "StrategyNotFound"
        );
    }

    #[tokio::test]
    async fn test_started_run_skips_build_lookup() {
        let mut run = BuildRun::new("app-1", BuildRunSpec::for_build("app"));
        run.metadata.namespace = Some("ci".to_string());
        let start = prepare_build_run(&store(), &run, "default", &RenderConfig::default(), now())
            .await
            .unwrap();

        // the build is edited, then fails to load; the frozen spec still drives the run
        let mut store = store();
        store
            .builds
            .get_mut(&("ci".to_string(), "app".to_string()))
            .unwrap()
            .spec
            .output = Image::new("registry/edited");
        store.fail = true;
        let config = RenderConfig::default();
        let again = prepare_build_run(&store, &start.build_run, "default", &config, now())
            .await
            .unwrap();
        let status = again.build_run.status.unwrap();
        assert_eq!(status.build_spec.unwrap().output.image, "registry/app");
        assert!(again.plan.is_some());
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let mut store = store();
        store.fail = true;
        let run = BuildRun::new("app-1", BuildRunSpec::for_build("app"));
        let err = prepare_build_run(&store, &run, "ci", &RenderConfig::default(), now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}
