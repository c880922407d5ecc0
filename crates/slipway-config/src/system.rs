//! System settings read from the environment.

use serde::{Deserialize, Serialize};
use slipway_core::render::RenderConfig;
use tracing::debug;

use crate::{ConfigError, ConfigResult};

pub const ENV_SOURCE_ROOT: &str = "SLIPWAY_SOURCE_ROOT";
pub const ENV_OUTPUT_DIRECTORY: &str = "SLIPWAY_OUTPUT_DIRECTORY";
pub const ENV_DEFAULT_NAMESPACE: &str = "SLIPWAY_DEFAULT_NAMESPACE";

/// System-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Where sources are checked out inside build steps.
    pub source_root: String,
    /// Where steps write the image they produce.
    pub output_directory: String,
    /// Namespace for objects that do not name one.
    pub default_namespace: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        let render = RenderConfig::default();
        Self {
            source_root: render.source_root,
            output_directory: render.output_directory,
            default_namespace: "default".to_string(),
        }
    }
}

fn absolute_path(field: &str, value: String) -> ConfigResult<String> {
    if !value.starts_with('/') {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("{:?} is not an absolute path", value),
        });
    }
    Ok(value.trim_end_matches('/').to_string())
}

impl SystemConfig {
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, falling back to defaults for unset
    /// or empty keys.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let source_root = match get(ENV_SOURCE_ROOT) {
            Some(v) => absolute_path(ENV_SOURCE_ROOT, v)?,
            None => defaults.source_root,
        };
        let output_directory = match get(ENV_OUTPUT_DIRECTORY) {
            Some(v) => absolute_path(ENV_OUTPUT_DIRECTORY, v)?,
            None => defaults.output_directory,
        };
        let default_namespace = get(ENV_DEFAULT_NAMESPACE).unwrap_or(defaults.default_namespace);

        let config = Self {
            source_root,
            output_directory,
            default_namespace,
        };
        debug!(?config, "loaded system config");
        Ok(config)
    }

    pub fn render_config(&self) -> RenderConfig {
        RenderConfig {
            source_root: self.source_root.clone(),
            output_directory: self.output_directory.clone(),
        }
    }
}
