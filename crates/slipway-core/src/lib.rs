//! Core data model for slipway container-image builds.
//!
//! This crate contains:
//! - The `BuildStrategy`, `ClusterBuildStrategy`, `Build` and `BuildRun`
//!   resources and their value types
//! - Parameter resolution, volume resolution and step rendering
//! - Condition tracking and build run lifecycle helpers
//! - Retention evaluation and trigger matching
//! - Admission validation
//! - Collaborator traits for object lookup

pub mod build;
pub mod buildrun;
pub mod condition;
pub mod duration;
pub mod error;
pub mod execution;
pub mod params;
pub mod render;
pub mod retention;
pub mod run;
pub mod store;
pub mod strategy;
pub mod trigger;
pub mod validate;
pub mod value;
pub mod wire;

pub use build::{Build, BuildSpec, BuildStatus};
pub use buildrun::{BuildRun, BuildRunSpec, BuildRunStatus};
pub use condition::{Condition, ConditionStatus, ConditionType, Conditions};
pub use duration::Duration;
pub use error::{Error, ErrorKind, Result, ValidationError};
pub use execution::{TaskPhase, TaskRunUpdate, apply_task_update};
pub use params::{ResolvedParams, ResolvedValue, resolve_parameters};
pub use render::{ExecutionPlan, RenderConfig};
pub use retention::{RetentionDecision, evaluate_retention};
pub use run::{RunStart, effective_build_spec, start_build_run};
pub use store::{BuildStore, StrategyStore, prepare_build_run};
pub use strategy::{
    BuildStrategy, BuildStrategySpec, ClusterBuildStrategy, ClusterBuildStrategySpec,
};
pub use trigger::{Trigger, TriggerEvent, verify_webhook_signature};
pub use validate::{register_build, validate_build, validate_build_run, validate_strategy};
pub use value::{ParamValue, SingleValue};
