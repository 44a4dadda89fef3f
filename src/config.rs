use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Library roots laid out as `<root>/<Author>/<Title>/...`
    pub library_paths: Vec<PathBuf>,
    /// Override for the SQLite database location
    pub db_path: Option<PathBuf>,
    pub openrouter_api_key: Option<String>,
    pub openrouter_model: String,
    pub scan_interval_hours: u64,
    pub batch_size: usize,
    pub max_requests_per_hour: i64,
    /// Apply suggested fixes immediately instead of recording them as pending
    pub auto_fix: bool,
    /// Master switch for the background worker
    pub enabled: bool,
    /// How many audio files to sample when cross-checking a folder's tags
    pub verify_sample_size: usize,
    /// Word-overlap score below which a tag/folder comparison fails
    pub similarity_threshold: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            library_paths: vec![],
            db_path: None,
            openrouter_api_key: None,
            openrouter_model: "google/gemma-3n-e4b-it:free".to_string(),
            scan_interval_hours: 6,
            batch_size: 3,
            max_requests_per_hour: 30,
            auto_fix: false,
            enabled: true,
            verify_sample_size: 5,
            similarity_threshold: 0.5,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config at {}", path.display()))?;
            let config: Config = serde_json::from_str(&contents)
                .with_context(|| format!("Invalid config at {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, json)
            .with_context(|| format!("Failed to write config at {}", config_path.display()))?;

        Ok(())
    }

    fn default_config_path() -> Result<PathBuf> {
        let base = dirs::config_dir().context("Could not determine config directory")?;
        Ok(base.join("shelfmender").join("config.json"))
    }

    /// Copy with the API key masked, safe to print or log
    pub fn redacted(&self) -> Config {
        Config {
            openrouter_api_key: self
                .openrouter_api_key
                .as_ref()
                .map(|_| "<redacted>".to_string()),
            ..self.clone()
        }
    }

    /// Database location: explicit override, or the platform data dir
    pub fn db_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.db_path {
            return Ok(path.clone());
        }
        let base = dirs::data_dir().context("Could not determine data directory")?;
        Ok(base.join("shelfmender").join("library.db"))
    }
}
