//! # Unified Configuration
//!
//! Configuration for the window, the Vulkan renderer and the assets the viewer
//! draws. Every structure is serializable so a viewer can be driven from a
//! TOML or RON file through the [`Config`] trait.

use serde::{Serialize, Deserialize};
use std::path::Path;

use crate::config::{Config, ConfigError};
use crate::render::vulkan::renderer::MAX_FRAMES_IN_FLIGHT;

/// Upper bound accepted for `max_frames_in_flight`
const FRAMES_IN_FLIGHT_LIMIT: usize = 8;

/// Which presentation algorithm the swapchain should ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresentModePreference {
    /// Non-blocking replace-on-submit (MAILBOX) when available, FIFO otherwise
    LowLatency,
    /// Always the blocking FIFO queue (vsync)
    Fifo,
}

impl Default for PresentModePreference {
    fn default() -> Self {
        Self::LowLatency
    }
}

/// Window creation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Model Viewer".to_string(),
            width: 800,
            height: 600,
        }
    }
}

impl WindowConfig {
    /// Validate the window configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "Window size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// # Vulkan Renderer Configuration
///
/// Application metadata, frame pacing and debug features of the Vulkan
/// backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Number of frame slots that may be in flight on the GPU at once
    pub max_frames_in_flight: usize,
    /// Whether to enable Vulkan validation layers (`None` = debug builds only)
    pub enable_validation: Option<bool>,
    /// Present mode preference
    #[serde(default)]
    pub present_mode: PresentModePreference,
    /// Color the swapchain image is cleared to before drawing
    pub clear_color: [f32; 4],
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            max_frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            enable_validation: None,
            present_mode: PresentModePreference::LowLatency,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }

    /// Set maximum frames in flight
    pub fn with_max_frames_in_flight(mut self, frames: usize) -> Self {
        self.max_frames_in_flight = frames;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Set the present mode preference
    pub fn with_present_mode(mut self, preference: PresentModePreference) -> Self {
        self.present_mode = preference;
        self
    }

    /// Whether validation layers should be requested for this build
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("Application name cannot be empty".to_string()));
        }

        if self.max_frames_in_flight == 0 {
            return Err(ConfigError::Invalid("Max frames in flight must be at least 1".to_string()));
        }

        if self.max_frames_in_flight > FRAMES_IN_FLIGHT_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "Max frames in flight should not exceed {FRAMES_IN_FLIGHT_LIMIT}"
            )));
        }

        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Model Viewer")
    }
}

/// # Asset Configuration
///
/// Files the viewer loads at startup. SPIR-V is expected precompiled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    /// OBJ model; a textured quad is drawn when unset
    pub model_path: Option<String>,
    /// Texture applied to the model; a checkerboard is generated when unset
    pub texture_path: Option<String>,
    /// Vertex shader SPIR-V
    pub vertex_shader_path: String,
    /// Fragment shader SPIR-V
    pub fragment_shader_path: String,
}

impl AssetConfig {
    /// Asset configuration with shaders resolved from the usual build locations
    pub fn with_path_resolution(base_vertex: &str, base_fragment: &str) -> Self {
        let shader_dirs = ["target/shaders/", "shaders/", "resources/shaders/", "./"];

        let resolve = |name: &str| {
            shader_dirs
                .iter()
                .map(|dir| format!("{dir}{name}"))
                .find(|candidate| Path::new(candidate).exists())
                .unwrap_or_else(|| format!("target/shaders/{name}"))
        };

        Self {
            model_path: None,
            texture_path: None,
            vertex_shader_path: resolve(base_vertex),
            fragment_shader_path: resolve(base_fragment),
        }
    }

    /// Validate that the referenced files exist
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            Some(&self.vertex_shader_path),
            Some(&self.fragment_shader_path),
            self.model_path.as_ref(),
            self.texture_path.as_ref(),
        ];

        for path in required.into_iter().flatten() {
            if !Path::new(path).exists() {
                return Err(ConfigError::Invalid(format!("Asset not found: {path}")));
            }
        }
        Ok(())
    }
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self::with_path_resolution("model.vert.spv", "model.frag.spv")
    }
}

/// # Complete Viewer Configuration
///
/// Top-level configuration applications load from disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerConfig {
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Window parameters
    pub window: WindowConfig,
    /// Renderer parameters
    pub renderer: RendererConfig,
    /// Asset locations
    pub assets: AssetConfig,
}

impl ViewerConfig {
    /// Validate the parts that do not touch the filesystem
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.window.validate()?;
        self.renderer.validate()
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            window: WindowConfig::default(),
            renderer: RendererConfig::default(),
            assets: AssetConfig::default(),
        }
    }
}

impl Config for ViewerConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ViewerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.renderer.max_frames_in_flight, 2);
        assert_eq!(config.renderer.present_mode, PresentModePreference::LowLatency);
    }

    #[test]
    fn test_frames_in_flight_bounds() {
        let zero = RendererConfig::default().with_max_frames_in_flight(0);
        assert!(matches!(zero.validate(), Err(ConfigError::Invalid(_))));

        let too_many = RendererConfig::default().with_max_frames_in_flight(9);
        assert!(too_many.validate().is_err());

        let triple = RendererConfig::default().with_max_frames_in_flight(3);
        assert!(triple.validate().is_ok());
    }

    #[test]
    fn test_zero_sized_window_rejected() {
        let mut config = ViewerConfig::default();
        config.window.height = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let text = r#"
            log_level = "debug"

            [window]
            title = "Viking Room"
            width = 1280
            height = 720

            [renderer]
            application_name = "viewer"
            max_frames_in_flight = 3
            present_mode = "Fifo"
            clear_color = [0.1, 0.1, 0.1, 1.0]

            [assets]
            model_path = "models/viking_room.obj"
            vertex_shader_path = "target/shaders/model.vert.spv"
            fragment_shader_path = "target/shaders/model.frag.spv"
        "#;

        let config = ViewerConfig::parse("viewer.toml", text).unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.renderer.max_frames_in_flight, 3);
        assert_eq!(config.renderer.present_mode, PresentModePreference::Fifo);
        assert_eq!(config.renderer.enable_validation, None);
        assert_eq!(config.assets.texture_path, None);
        assert_eq!(config.assets.model_path.as_deref(), Some("models/viking_room.obj"));
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let result = ViewerConfig::parse("viewer.json", "{}");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }
}
