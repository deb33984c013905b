//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_DOCUMENTS_DIR: &str = "./data";
pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 10;

/// Configuration for haven
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chat model
    pub model: Option<String>,
    /// Embedding model used for ingestion and search
    pub embedding_model: Option<String>,
    /// OpenAI-compatible API base URL
    pub base_url: Option<String>,
    /// API key (alternative to OPENAI_API_KEY)
    pub api_key: Option<String>,
    /// Directory of documents to ingest
    pub documents_dir: Option<String>,
    /// SQLite vector store location
    pub index_path: Option<String>,
    /// Tool rounds allowed per turn
    pub max_tool_iterations: Option<usize>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("haven")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        // Check for HAVEN_CONFIG_PATH env var first
        if let Ok(path) = std::env::var("HAVEN_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from a file. A missing or unreadable file yields defaults.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to a file
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init(path: &Path) -> std::io::Result<()> {
        if path.exists() {
            return Ok(());
        }

        let default_config = Config {
            model: Some(DEFAULT_MODEL.to_string()),
            embedding_model: Some(DEFAULT_EMBEDDING_MODEL.to_string()),
            base_url: Some(haven_ai::providers::openai::DEFAULT_BASE_URL.to_string()),
            api_key: None,
            documents_dir: Some(DEFAULT_DOCUMENTS_DIR.to_string()),
            index_path: None,
            max_tool_iterations: Some(DEFAULT_MAX_TOOL_ITERATIONS),
        };

        default_config.save_to(path)
    }

    pub fn model(&self) -> String {
        self.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn embedding_model(&self) -> String {
        self.embedding_model
            .clone()
            .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string())
    }

    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| haven_ai::providers::openai::DEFAULT_BASE_URL.to_string())
    }

    pub fn documents_dir(&self) -> PathBuf {
        PathBuf::from(
            self.documents_dir
                .as_deref()
                .unwrap_or(DEFAULT_DOCUMENTS_DIR),
        )
    }

    pub fn index_path(&self) -> PathBuf {
        match &self.index_path {
            Some(path) => PathBuf::from(path),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("haven")
                .join("vector-store.db"),
        }
    }

    pub fn max_tool_iterations(&self) -> usize {
        self.max_tool_iterations
            .unwrap_or(DEFAULT_MAX_TOOL_ITERATIONS)
    }

    /// Get the API key, checking config then env
    pub fn api_key(&self) -> Option<String> {
        if self.api_key.is_some() {
            return self.api_key.clone();
        }
        std::env::var("OPENAI_API_KEY").ok()
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# haven configuration file
# Place at ~/.config/haven/config.toml (Linux), ~/Library/Application Support/haven/config.toml (Mac)
# or %APPDATA%\haven\config.toml (Windows), or point HAVEN_CONFIG_PATH at it

# Chat model
model = "gpt-4o-mini"

# Embedding model for document ingestion and search
embedding_model = "text-embedding-3-small"

# OpenAI-compatible API endpoint
base_url = "https://api.openai.com/v1"

# Directory with .md / .markdown / .txt documents
documents_dir = "./data"

# Vector store location (defaults to the platform data dir)
# index_path = "/var/lib/haven/vector-store.db"

# Tool rounds the model may use per answer
max_tool_iterations = 10

# API key (optional - OPENAI_API_KEY is used otherwise)
# It's recommended to use the environment variable instead
# api_key = "sk-..."
"#
}
