use crate::core::cluster::DEFAULT_SCENE_THRESHOLD;
use crate::core::compositor::{CompositeOptions, NativeFooterPolicy, DEFAULT_JPEG_QUALITY};
use crate::core::detector::PresenceCheck;
use crate::core::footer::FooterBackground;
use crate::services::perceptual::DEFAULT_HASH_SIZE;
use crate::services::scanner::DEFAULT_EXTENSIONS;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const APP_DIR_NAME: &str = "compare-studio";
pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Settings shared by every command. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    pub cluster_threshold: f32,
    pub footer_background: FooterBackground,
    pub native_footer: NativeFooterPolicy,
    pub presence_check: PresenceCheck,
    pub jpeg_quality: u8,
    pub output_dir: PathBuf,
    pub accepted_extensions: Vec<String>,
    /// Glob patterns matched against full paths; matches are not scanned.
    pub exclude_patterns: Vec<String>,
    /// Raw EXIF model string to display name.
    pub device_models: HashMap<String, String>,
    pub embedding_hash_size: u32,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            cluster_threshold: DEFAULT_SCENE_THRESHOLD,
            footer_background: FooterBackground::default(),
            native_footer: NativeFooterPolicy::default(),
            presence_check: PresenceCheck::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            output_dir: default_output_dir(),
            accepted_extensions: DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
            exclude_patterns: Vec::new(),
            device_models: HashMap::new(),
            embedding_hash_size: DEFAULT_HASH_SIZE,
        }
    }
}

impl StudioConfig {
    /// Load from `path`, or from [`default_path`] when none is given.
    ///
    /// An explicit path must exist. The default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if required {
                return Err(ConfigError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("config file not found: {}", path.display()),
                )));
            }
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(&path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(-1.0..=1.0).contains(&self.cluster_threshold) {
            return Err(ConfigError::Invalid {
                field: "cluster_threshold",
                message: format!("{} is outside -1.0..=1.0", self.cluster_threshold),
            });
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::Invalid {
                field: "jpeg_quality",
                message: format!("{} is outside 1..=100", self.jpeg_quality),
            });
        }
        if let Some((pattern, e)) = self
            .exclude_patterns
            .iter()
            .find_map(|pattern| Pattern::new(pattern).err().map(|e| (pattern, e)))
        {
            return Err(ConfigError::Invalid {
                field: "exclude_patterns",
                message: format!("'{pattern}': {e}"),
            });
        }
        if self.embedding_hash_size < 2 {
            return Err(ConfigError::Invalid {
                field: "embedding_hash_size",
                message: "must be at least 2".to_string(),
            });
        }
        Ok(())
    }

    pub fn composite_options(&self) -> CompositeOptions {
        CompositeOptions {
            footer_background: self.footer_background,
            native_footer: self.native_footer,
            presence_check: self.presence_check,
        }
    }
}

/// `<config_dir>/compare-studio/config.json`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn default_output_dir() -> PathBuf {
    dirs::picture_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
}
