// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub depth: DepthConfig,
    pub shaders: ShaderConfig,
    pub probe: ProbeConfig,
    pub debug: DebugConfig,
}

/// Instance and device creation
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub app_name: String,
    pub validation_layers: bool,
    /// Vulkan feature names, e.g. "samplerAnisotropy"
    pub required_features: Vec<String>,
    pub instance_layers: Vec<String>,
    pub instance_extensions: Vec<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            app_name: "vkutil-probe".to_string(),
            validation_layers: true,
            required_features: Vec::new(),
            instance_layers: Vec::new(),
            instance_extensions: Vec::new(),
        }
    }
}

/// Depth buffer format negotiation
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DepthConfig {
    pub preferred_format: String,
    pub require_stencil: bool,
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            preferred_format: "d32_sfloat".to_string(),
            require_stencil: false,
        }
    }
}

/// Shader binaries
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    /// Loaded (and released) on startup to check they build
    pub paths: Vec<PathBuf>,
    /// Compute shader dispatched by the probe, if any
    pub compute: Option<PathBuf>,
    /// Keep running and reload shaders when they change on disk
    pub watch: bool,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            compute: Some(PathBuf::from("shaders/probe.comp.spv")),
            watch: false,
        }
    }
}

/// One-shot submission smoke test
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Number of u32 elements in the readback buffer
    pub buffer_elements: u32,
    pub fill_value: u32,
    pub workgroup_size: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            buffer_elements: 1024,
            fill_value: 0xC0FF_EE00,
            workgroup_size: 64,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_to_file: false,
            log_file: "vkutil.log".to_string(),
        }
    }
}

impl ProbeConfig {
    /// Byte size of the readback buffer. Vulkan forbids zero-sized buffers.
    pub fn buffer_size(&self) -> Result<vk::DeviceSize> {
        if self.buffer_elements == 0 {
            anyhow::bail!("probe.buffer_elements must be at least 1");
        }
        if self.workgroup_size == 0 {
            anyhow::bail!("probe.workgroup_size must be at least 1");
        }
        Ok(vk::DeviceSize::from(self.buffer_elements) * 4)
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Get preferred depth format as Vulkan enum
    pub fn preferred_depth_format(&self) -> vk::Format {
        parse_depth_format(&self.depth.preferred_format).unwrap_or_else(|| {
            log::warn!(
                "Unknown depth format '{}', defaulting to D32_SFLOAT",
                self.depth.preferred_format
            );
            vk::Format::D32_SFLOAT
        })
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.debug.log_level.parse().unwrap_or_else(|_| {
            log::warn!("Unknown log level '{}', using info", self.debug.log_level);
            log::LevelFilter::Info
        })
    }
}

/// Parse a depth/stencil format name such as "d24_unorm_s8_uint".
pub fn parse_depth_format(name: &str) -> Option<vk::Format> {
    let format = match name.to_lowercase().as_str() {
        "d16_unorm" => vk::Format::D16_UNORM,
        "x8_d24_unorm_pack32" => vk::Format::X8_D24_UNORM_PACK32,
        "d32_sfloat" => vk::Format::D32_SFLOAT,
        "s8_uint" => vk::Format::S8_UINT,
        "d16_unorm_s8_uint" => vk::Format::D16_UNORM_S8_UINT,
        "d24_unorm_s8_uint" => vk::Format::D24_UNORM_S8_UINT,
        "d32_sfloat_s8_uint" => vk::Format::D32_SFLOAT_S8_UINT,
        _ => return None,
    };
    Some(format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(dir.path().join("config.toml")).unwrap();
        assert_eq!(config.device.app_name, "vkutil-probe");
        assert_eq!(config.preferred_depth_format(), vk::Format::D32_SFLOAT);
        assert_eq!(config.probe.workgroup_size, 64);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[device]
required_features = ["samplerAnisotropy", "wideLines"]

[depth]
preferred_format = "D24_UNORM_S8_UINT"
require_stencil = true

[shaders]
paths = ["a.spv", "b.spv"]
watch = true
"#
        )
        .unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.device.required_features, vec!["samplerAnisotropy", "wideLines"]);
        assert!(config.device.validation_layers);
        assert_eq!(config.preferred_depth_format(), vk::Format::D24_UNORM_S8_UINT);
        assert!(config.depth.require_stencil);
        assert_eq!(config.shaders.paths.len(), 2);
        assert!(config.shaders.watch);
        assert_eq!(
            config.shaders.compute.as_deref(),
            Some(Path::new("shaders/probe.comp.spv"))
        );
        assert_eq!(config.debug.log_level, "info");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[depth\npreferred_format = ").unwrap();
        assert!(Config::load_from_path(file.path()).is_err());
    }

    #[test]
    fn zero_sized_probe_is_rejected() {
        let mut probe = ProbeConfig::default();
        assert_eq!(probe.buffer_size().unwrap(), 4096);

        probe.buffer_elements = 0;
        let err = probe.buffer_size().unwrap_err();
        assert!(err.to_string().contains("buffer_elements"));

        probe.buffer_elements = 1;
        probe.workgroup_size = 0;
        assert!(probe.buffer_size().is_err());
    }

    #[test]
    fn depth_format_names() {
        assert_eq!(parse_depth_format("d16_unorm"), Some(vk::Format::D16_UNORM));
        assert_eq!(parse_depth_format("D32_SFLOAT_S8_UINT"), Some(vk::Format::D32_SFLOAT_S8_UINT));
        assert_eq!(parse_depth_format("r8g8b8a8_unorm"), None);
    }

    #[test]
    fn unknown_values_fall_back() {
        let mut config = Config::default();
        config.depth.preferred_format = "bogus".to_string();
        config.debug.log_level = "loud".to_string();
        assert_eq!(config.preferred_depth_format(), vk::Format::D32_SFLOAT);
        assert_eq!(config.log_level(), log::LevelFilter::Info);
    }
}
