use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::state::Language;
use crate::services::llm::LlmConfig;
use crate::services::models::{AgentRole, ModelDescriptor};

pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default)]
    pub language: Language,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub models: ModelsConfig,

    /// Models added with `add-model`, merged into the registry at startup.
    #[serde(default)]
    pub custom_models: BTreeMap<AgentRole, Vec<ModelDescriptor>>,

    #[serde(skip)]
    pub(crate) path: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelsConfig {
    #[serde(default = "default_planner_model")]
    pub planner: String,
    #[serde(default = "default_writer_model")]
    pub writer: String,
    #[serde(default = "default_reviewer_model")]
    pub reviewer: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            planner: default_planner_model(),
            writer: default_writer_model(),
            reviewer: default_reviewer_model(),
        }
    }
}

impl ModelsConfig {
    pub fn for_role(&self, role: AgentRole) -> &str {
        match role {
            AgentRole::Planner => &self.planner,
            AgentRole::Writer => &self.writer,
            AgentRole::Reviewer => &self.reviewer,
        }
    }

    pub fn set_role(&mut self, role: AgentRole, model: String) {
        match role {
            AgentRole::Planner => self.planner = model,
            AgentRole::Writer => self.writer = model,
            AgentRole::Reviewer => self.reviewer = model,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_folder: default_output(),
            language: Language::default(),
            llm: LlmConfig::default(),
            models: ModelsConfig::default(),
            custom_models: BTreeMap::new(),
            path: None,
        }
    }
}

fn default_output() -> String {
    "output".to_string()
}
pub fn default_planner_model() -> String {
    "gemma3:latest".to_string()
}
pub fn default_writer_model() -> String {
    "qwen2.5:3b".to_string()
}
pub fn default_reviewer_model() -> String {
    "kimi-k2:1t-cloud".to_string()
}

impl Config {
    /// Reads the YAML config at `path`. A missing file yields the defaults,
    /// remembered against `path` so a later `save` creates it.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_yaml_ng::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            log::info!("{} not found, using default configuration", path.display());
            Config::default()
        };
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = self
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)
            .with_context(|| format!("Failed to create {}", self.output_folder))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = Config::load_from(dir.path().join("config.yml"))?;

        assert_eq!(config.output_folder, "output");
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.models.writer, "qwen2.5:3b");
        assert!(config.custom_models.is_empty());
        Ok(())
    }

    #[test]
    fn test_partial_yaml_fills_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yml");
        fs::write(
            &path,
            "output_folder: books\nlanguage: english\nmodels:\n  writer: llama3.2:3b\n",
        )?;

        let config = Config::load_from(&path)?;
        assert_eq!(config.output_folder, "books");
        assert_eq!(config.language, Language::English);
        assert_eq!(config.models.writer, "llama3.2:3b");
        assert_eq!(config.models.planner, "gemma3:latest");
        assert!(config.llm.ollama.is_some());
        Ok(())
    }

    #[test]
    fn test_save_round_trips_custom_models() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yml");

        let mut config = Config::load_from(&path)?;
        config.models.set_role(AgentRole::Reviewer, "qwen2.5:7b".to_string());
        config
            .custom_models
            .entry(AgentRole::Writer)
            .or_default()
            .push(ModelDescriptor::new("mistral:7b"));
        config.save()?;

        let reloaded = Config::load_from(&path)?;
        assert_eq!(reloaded.models.for_role(AgentRole::Reviewer), "qwen2.5:7b");
        assert_eq!(reloaded.custom_models[&AgentRole::Writer][0].name, "mistral:7b");
        Ok(())
    }
}
