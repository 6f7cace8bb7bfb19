use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use tracing::debug;

use crate::error::{QaError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "docqa.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    OpenAi,
    FastEmbed,
}

impl FromStr for EmbeddingBackend {
    type Err = QaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(EmbeddingBackend::OpenAi),
            "fastembed" => Ok(EmbeddingBackend::FastEmbed),
            other => Err(QaError::Config(format!("unknown embedding backend '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub source_dir: PathBuf,
    pub index_dir: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub temperature: f32,
    pub chat_model: String,
    pub embedding_backend: EmbeddingBackend,
    pub embedding_model: String,
    pub api_base: String,
    pub api_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("source_documents"),
            index_dir: PathBuf::from("vectorstore"),
            chunk_size: 1000,
            chunk_overlap: 100,
            top_k: 4,
            temperature: 0.0,
            chat_model: "gpt-4o".to_string(),
            embedding_backend: EmbeddingBackend::OpenAi,
            embedding_model: "text-embedding-3-small".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
        }
    }
}

impl Settings {
    /// Defaults, then the TOML file (explicit path, or `docqa.toml` if
    /// present), then environment variables.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut settings = match config_path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.source_dir = expand_home(&settings.source_dir);
        settings.index_dir = expand_home(&settings.index_dir);
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Reading configuration from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| QaError::Config(e.to_string()))
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DOCQA_SOURCE_DIR") {
            self.source_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DOCQA_INDEX_DIR") {
            self.index_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DOCQA_CHUNK_SIZE") {
            self.chunk_size = parse_var("DOCQA_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = lookup("DOCQA_CHUNK_OVERLAP") {
            self.chunk_overlap = parse_var("DOCQA_CHUNK_OVERLAP", &v)?;
        }
        if let Some(v) = lookup("DOCQA_TOP_K") {
            self.top_k = parse_var("DOCQA_TOP_K", &v)?;
        }
        if let Some(v) = lookup("DOCQA_TEMPERATURE") {
            self.temperature = parse_var("DOCQA_TEMPERATURE", &v)?;
        }
        if let Some(v) = lookup("DOCQA_CHAT_MODEL") {
            self.chat_model = v;
        }
        if let Some(v) = lookup("DOCQA_EMBEDDING_BACKEND") {
            self.embedding_backend = v.parse()?;
        }
        if let Some(v) = lookup("DOCQA_EMBEDDING_MODEL") {
            self.embedding_model = v;
        }
        if let Some(v) = lookup("OPENAI_BASE_URL") {
            self.api_base = v;
        }
        if let Some(v) = lookup("OPENAI_API_KEY") {
            if !v.trim().is_empty() {
                self.api_key = Some(v);
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(QaError::Config("chunk_size must be greater than zero".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(QaError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(QaError::Config("top_k must be greater than zero".into()));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| QaError::Config(format!("{key} has an invalid value: '{value}'")))
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
