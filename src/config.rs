// Configuration - load settings from config.toml
//
// Provides sensible defaults if the config file is missing or has errors.
// The scene table mirrors the model/camera presets the demos are built around.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub scene: SceneConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "SSAO demos".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            clear_color: [0.025, 0.025, 0.025, 1.0],
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            show_fps: true,
        }
    }
}

/// Scene table entry: model path plus the initial camera pose that frames it
#[derive(Debug, Clone, Deserialize)]
pub struct SceneModel {
    pub path: String,
    pub position: [f32; 3],
    pub rotation: [f32; 3],
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub selected: usize,
    pub shader_path: String,
    pub models: Vec<SceneModel>,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            selected: 0,
            shader_path: "shaders".to_string(),
            models: vec![SceneModel {
                path: "models/sponza/sponza.gltf".to_string(),
                position: [1.0, 0.75, 0.0],
                rotation: [0.0, 90.0, 0.0],
            }],
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {}. Using defaults.", e);
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

        Ok(config)
    }

    /// The scene table entry selected for this run
    pub fn selected_model(&self) -> Result<&SceneModel> {
        self.scene.models.get(self.scene.selected).with_context(|| {
            format!(
                "Scene index {} out of range ({} models configured)",
                self.scene.selected,
                self.scene.models.len()
            )
        })
    }

    /// Get present mode as Vulkan enum
    pub fn present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::FIFO
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_missing() {
        let config = Config::load_from_path("does-not-exist.toml").unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.scene.selected, 0);
        assert!(!config.scene.models.is_empty());
    }

    #[test]
    fn parses_scene_table() {
        let config: Config = toml::from_str(
            r#"
            [scene]
            selected = 1

            [[scene.models]]
            path = "models/a.gltf"
            position = [1.0, 2.0, 3.0]
            rotation = [0.0, 90.0, 0.0]

            [[scene.models]]
            path = "models/b.gltf"
            position = [0.0, 0.0, 0.0]
            rotation = [0.0, 0.0, 0.0]
            "#,
        )
        .unwrap();
        let model = config.selected_model().unwrap();
        assert_eq!(model.path, "models/b.gltf");
    }

    #[test]
    fn selected_out_of_range_is_an_error() {
        let mut config = Config::default();
        config.scene.selected = 42;
        assert!(config.selected_model().is_err());
    }

    #[test]
    fn present_mode_mapping() {
        let mut config = Config::default();
        config.graphics.present_mode = "mailbox".to_string();
        assert_eq!(config.present_mode(), ash::vk::PresentModeKHR::MAILBOX);
        config.graphics.present_mode = "garbage".to_string();
        assert_eq!(config.present_mode(), ash::vk::PresentModeKHR::FIFO);
    }
}
