use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{FurrowError, Result};
use crate::types::ProviderMode;

/// Top-level configuration for the furrow service.
///
/// Loaded from `./furrow.toml` by default. Each section corresponds to one
/// part of the retrieval engine or its transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FurrowConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub clip: ClipConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

impl FurrowConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FurrowConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| FurrowError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Apply the environment overrides recognised by the service
    /// (`DATA_DIR`, `EMBEDDING_PROVIDER`).
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Same as [`apply_env_overrides`](Self::apply_env_overrides) with an
    /// injectable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("DATA_DIR").filter(|v| !v.trim().is_empty()) {
            self.general.data_dir = dir;
        }
        if let Some(provider) = lookup("EMBEDDING_PROVIDER").filter(|v| !v.trim().is_empty()) {
            self.embedding.provider = provider.trim().to_lowercase();
        }
    }

    /// Resolved data directory (`~/` expanded).
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.general.data_dir)
    }

    /// SQLite database path under the data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("visits.db")
    }

    /// Media root under the data directory.
    pub fn media_dir(&self) -> PathBuf {
        self.data_dir().join("media")
    }

    /// Local text model directory; relative paths resolve against the data directory.
    pub fn local_model_dir(&self) -> PathBuf {
        self.resolve_under_data(&self.embedding.local_model_dir)
    }

    /// CLIP model directory; relative paths resolve against the data directory.
    pub fn clip_model_dir(&self) -> PathBuf {
        self.resolve_under_data(&self.clip.model_dir)
    }

    fn resolve_under_data(&self, p: &str) -> PathBuf {
        let p = expand_home(p);
        if p.is_absolute() {
            p
        } else {
            self.data_dir().join(p)
        }
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path.starts_with("~/") || path.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&path[2..])
    } else {
        PathBuf::from(path)
    }
}

/// Render a credential for logs: never the full value.
pub fn redact_secret(secret: Option<&str>) -> String {
    match secret {
        None | Some("") => "not set".to_string(),
        Some(s) if s.chars().count() <= 8 => "***".to_string(),
        Some(s) => {
            let chars: Vec<char> = s.chars().collect();
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{}...{}", head, tail)
        }
    }
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for SQLite, media and models.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Bind address for the HTTP server.
    pub host: String,
    /// HTTP port.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            log_level: "info".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// Text embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider mode: "auto", "openai" (or "remote"), "local".
    pub provider: String,
    /// Environment variable holding the remote API key.
    pub api_key_env: String,
    /// Remote embedding model identifier.
    pub remote_model: String,
    /// Base URL of the OpenAI-compatible API.
    pub remote_base_url: String,
    /// Remote request timeout in seconds.
    pub remote_timeout_secs: u64,
    /// Directory holding `model.onnx` and `tokenizer.json` for the local model.
    pub local_model_dir: String,
    /// Local model name (reported in health output).
    pub local_model_name: String,
}

impl EmbeddingConfig {
    /// Parsed provider mode; unrecognised values fall back to local.
    pub fn mode(&self) -> ProviderMode {
        ProviderMode::parse(&self.provider)
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "auto".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            remote_model: "text-embedding-3-small".to_string(),
            remote_base_url: "https://api.openai.com/v1".to_string(),
            remote_timeout_secs: 30,
            local_model_dir: "models/all-MiniLM-L6-v2".to_string(),
            local_model_name: "all-MiniLM-L6-v2".to_string(),
        }
    }
}

/// CLIP image / cross-modal encoder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipConfig {
    /// Whether image embeddings are generated at all.
    pub enabled: bool,
    /// Directory holding `vision_model.onnx`, `text_model.onnx` and `tokenizer.json`.
    pub model_dir: String,
    /// Model name recorded on photo rows.
    pub model_name: String,
    /// Device preference: "auto", "cpu" or "cuda".
    pub device: String,
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_dir: "models/clip-vit-base-patch32".to_string(),
            model_name: "clip-vit-base-patch32".to_string(),
            device: "auto".to_string(),
        }
    }
}

/// Search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Default number of results.
    pub default_k: usize,
    /// Maximum number of results.
    pub max_k: usize,
    /// Snippet length in characters before the truncation marker.
    pub snippet_chars: usize,
    /// Re-embed stored visits lacking an index entry at startup.
    pub reconcile_on_startup: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_k: 10,
            max_k: 100,
            snippet_chars: 200,
            reconcile_on_startup: false,
        }
    }
}
