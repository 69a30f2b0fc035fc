use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_base_path() -> String {
    "/comfy_ai_assistant".to_string()
}

fn default_service() -> String {
    "g4f".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub comfy: ComfyConfig,
    #[serde(default)]
    pub classifier: ClassifierLimits,
    #[serde(default)]
    pub controls: ControlTimings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    pub host: String,
    pub base_path: String,
    pub service: String,
    /// Number of previous turns the backend should include as context.
    pub history_turns: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            host: "http://127.0.0.1:8188".to_string(),
            base_path: default_base_path(),
            service: default_service(),
            history_turns: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ComfyConfig {
    /// Server that executes queued workflows.
    pub host: String,
}

impl Default for ComfyConfig {
    fn default() -> Self {
        ComfyConfig {
            host: "http://127.0.0.1:8188".to_string(),
        }
    }
}

/// Tunable thresholds for HTML detection.
///
/// These are heuristics inherited from the panel's behaviour, not a
/// statement about what valid HTML looks like.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassifierLimits {
    /// Chunks longer than this (in chars) skip fine-grained HTML scanning.
    pub large_input_threshold: usize,
    pub min_tag_count: usize,
    /// Length a chunk must exceed before `min_tag_count` applies.
    pub min_tagged_length: usize,
    pub min_div_wrapper_length: usize,
    /// Upper bound on balanced-block matches per chunk.
    pub max_html_blocks: usize,
}

impl Default for ClassifierLimits {
    fn default() -> Self {
        ClassifierLimits {
            large_input_threshold: 20_000,
            min_tag_count: 5,
            min_tagged_length: 100,
            min_div_wrapper_length: 50,
            max_html_blocks: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlTimings {
    pub action_reset_ms: u64,
    pub copy_reset_ms: u64,
}

impl Default for ControlTimings {
    fn default() -> Self {
        ControlTimings {
            action_reset_ms: 2000,
            copy_reset_ms: 1500,
        }
    }
}

impl ControlTimings {
    pub fn action_reset(&self) -> Duration {
        Duration::from_millis(self.action_reset_ms)
    }

    pub fn copy_reset(&self) -> Duration {
        Duration::from_millis(self.copy_reset_ms)
    }
}

impl BackendConfig {
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}{}/{}",
            self.host.trim_end_matches('/'),
            self.base_path.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl Config {
    /// Loads the user config, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load() -> Self {
        let config_path = Self::get_config_path();

        if config_path.exists() {
            match Self::from_path(&config_path) {
                Ok(config) => return config,
                Err(e) => tracing::warn!("{:#}. Using defaults.", e),
            }
        } else if let Some(parent) = config_path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        Config::default()
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Error reading {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("Error parsing {}", path.display()))
    }

    pub fn get_config_path() -> PathBuf {
        Self::get_config_dir().join("config.toml")
    }

    pub fn get_config_dir() -> PathBuf {
        if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home).join(".config/comfy-assist")
        } else {
            PathBuf::from(".")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[classifier]\nmin_tag_count = 8\n\n[comfy]\nhost = \"http://gpu-box:8188\"").unwrap();

        let config = Config::from_path(file.path()).unwrap();
        assert_eq!(config.classifier.min_tag_count, 8);
        assert_eq!(config.classifier.large_input_threshold, 20_000);
        assert_eq!(config.comfy.host, "http://gpu-box:8188");
        assert_eq!(config.backend.base_path, "/comfy_ai_assistant");
        assert_eq!(config.controls.copy_reset(), Duration::from_millis(1500));
    }

    #[test]
    fn test_section_without_host_keeps_other_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[backend]\nservice = \"qianwen\"\n\n[comfy]\n\n[classifier]\nmax_html_blocks = 7").unwrap();

        let config = Config::from_path(file.path()).unwrap();
        assert_eq!(config.backend.service, "qianwen");
        assert_eq!(config.backend.host, "http://127.0.0.1:8188");
        assert_eq!(config.backend.base_path, "/comfy_ai_assistant");
        assert_eq!(config.comfy.host, "http://127.0.0.1:8188");
        assert_eq!(config.classifier.max_html_blocks, 7);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[classifier\nmin_tag_count = ").unwrap();
        assert!(Config::from_path(file.path()).is_err());
    }

    #[test]
    fn test_endpoint_joins_slashes() {
        let backend = BackendConfig {
            host: "http://localhost:8188/".to_string(),
            ..BackendConfig::default()
        };
        assert_eq!(
            backend.endpoint("/chat"),
            "http://localhost:8188/comfy_ai_assistant/chat"
        );
        assert_eq!(
            backend.endpoint("history"),
            "http://localhost:8188/comfy_ai_assistant/history"
        );
    }
}
