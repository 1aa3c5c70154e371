//! Engine configuration loading.
//!
//! YAML or JSON, selected by file extension. Every key below is required;
//! a missing key fails startup with an error naming the field.

use std::path::Path;

use serde::Deserialize;

/// Errors raised while loading the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("config file {path}: {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The extension is neither YAML nor JSON.
    #[error("config file {0}: unsupported extension (expected .yaml, .yml or .json)")]
    UnknownFormat(String),
    /// The document failed to parse or a required key is missing.
    #[error("config file {path}: {message}")]
    Invalid {
        /// Path that failed.
        path: String,
        /// Parser diagnostics, naming the offending key.
        message: String,
    },
}

/// `application.window`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WindowConfig {
    /// Window title.
    pub title: String,
    /// Window width in pixels.
    pub width: u32,
    /// Window height in pixels.
    pub height: u32,
}

/// `application.control`: one key name per action.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ControlConfig {
    /// Move forward.
    pub forward: String,
    /// Move backward.
    pub backward: String,
    /// Strafe left.
    pub left: String,
    /// Strafe right.
    pub right: String,
    /// Jump.
    pub jump: String,
    /// Squat/crouch.
    pub squat: String,
    /// Sprint.
    pub sprint: String,
    /// Attack.
    pub attack: String,
    /// Toggle the free camera.
    pub free_camera: String,
}

/// `application`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ApplicationSection {
    /// Log file path.
    pub log: String,
    /// Window parameters.
    pub window: WindowConfig,
    /// Control bindings.
    pub control: ControlConfig,
}

/// `engine`: asset roots and bundled resources.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct EngineSection {
    /// Engine root directory.
    pub root: String,
    /// Asset directory.
    pub asset: String,
    /// Schema directory.
    pub schema: String,
    /// World loaded at startup.
    pub default_world: String,
    /// Large application icon.
    pub big_icon: String,
    /// Small application icon.
    pub small_icon: String,
    /// Default font.
    pub font: String,
    /// Global rendering settings file.
    pub global_rendering_settings: String,
    /// Global particle settings file.
    pub global_particle_setting: String,
    /// Physics asset bundle.
    pub jolt_asset: String,
}

/// The complete configuration document.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// The `application` section.
    pub application: ApplicationSection,
    /// The `engine` section.
    pub engine: EngineSection,
}

/// Load and validate the configuration at `path`.
pub fn load_engine_config(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: display.clone(),
        source,
    })?;

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&text).map_err(|err| ConfigError::Invalid {
                path: display,
                message: err.to_string(),
            })
        }
        Some("json") => serde_json::from_str(&text).map_err(|err| ConfigError::Invalid {
            path: display,
            message: err.to_string(),
        }),
        _ => Err(ConfigError::UnknownFormat(display)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPLETE_JSON: &str = r#"{
        "application": {
            "log": "logs/engine.log",
            "window": { "title": "demo", "width": 1280, "height": 720 },
            "control": {
                "forward": "W", "backward": "S", "left": "A", "right": "D",
                "jump": "Space", "squat": "ControlLeft", "sprint": "ShiftLeft",
                "attack": "MouseLeft", "free_camera": "F1"
            }
        },
        "engine": {
            "root": ".",
            "asset": "assets",
            "schema": "schema",
            "default_world": "worlds/default.world",
            "big_icon": "icons/big.png",
            "small_icon": "icons/small.png",
            "font": "fonts/default.ttf",
            "global_rendering_settings": "settings/rendering.json",
            "global_particle_setting": "settings/particles.json",
            "jolt_asset": "physics/jolt.bin"
        }
    }"#;

    #[test]
    fn json_document_parses() {
        let config: EngineConfig = serde_json::from_str(COMPLETE_JSON).unwrap();
        assert_eq!(config.application.window.width, 1280);
        assert_eq!(config.application.control.jump, "Space");
        assert_eq!(config.engine.default_world, "worlds/default.world");
    }

    #[test]
    fn missing_required_key_names_the_field() {
        let broken = COMPLETE_JSON.replace(r#""jump": "Space","#, "");
        let err = serde_json::from_str::<EngineConfig>(&broken).unwrap_err();
        assert!(err.to_string().contains("jump"));
    }

    #[test]
    fn yaml_document_parses() {
        let yaml = r#"
application:
  log: logs/engine.log
  window: { title: demo, width: 640, height: 480 }
  control:
    forward: W
    backward: S
    left: A
    right: D
    jump: Space
    squat: ControlLeft
    sprint: ShiftLeft
    attack: MouseLeft
    free_camera: F1
engine:
  root: .
  asset: assets
  schema: schema
  default_world: worlds/default.world
  big_icon: icons/big.png
  small_icon: icons/small.png
  font: fonts/default.ttf
  global_rendering_settings: settings/rendering.json
  global_particle_setting: settings/particles.json
  jolt_asset: physics/jolt.bin
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.application.window.height, 480);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = load_engine_config("config.toml").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Io { .. } | ConfigError::UnknownFormat(_)
        ));
    }
}
