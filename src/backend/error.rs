// Error types for the helper layer
//
// Bootstrap code (device creation, probe) composes these with anyhow.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

use super::result::result_str;

#[derive(Debug, Error)]
pub enum BackendError {
    /// Neither the preferred format nor any fallback can back a depth attachment.
    #[error("no supported depth format (preferred {preferred:?}, stencil required: {require_stencil})")]
    NoDepthFormat {
        preferred: vk::Format,
        require_stencil: bool,
    },

    #[error("failed to read shader file {path:?}")]
    ShaderIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create shader module from {path:?}: {}", result_str(*.result))]
    ShaderCreate { path: PathBuf, result: vk::Result },

    #[error("unknown device feature '{0}'")]
    UnknownFeature(String),

    #[error("device is missing required features: {}", .0.join(", "))]
    UnsupportedFeatures(Vec<&'static str>),

    #[error("shader watcher failed")]
    Watch(#[from] notify::Error),

    #[error("{context}: {}", result_str(*.result))]
    Vulkan {
        context: &'static str,
        result: vk::Result,
    },
}

impl BackendError {
    pub fn vulkan(context: &'static str, result: vk::Result) -> Self {
        Self::Vulkan { context, result }
    }
}
