//! Configuration for slipway.
//!
//! This crate handles:
//! - Loading `BuildStrategy`, `ClusterBuildStrategy`, `Build` and `BuildRun`
//!   manifests from multi-document YAML
//! - An in-memory object catalog usable as the core's lookup collaborator
//! - System settings read from the environment

pub mod error;
pub mod manifest;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use manifest::{Manifest, ManifestSet, ValidationReport, load_manifests, parse_manifests};
pub use system::SystemConfig;
