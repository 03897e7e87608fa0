use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::core::config::Config;

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Planner,
    Writer,
    Reviewer,
}

impl AgentRole {
    pub const ALL: [AgentRole; 3] = [AgentRole::Planner, AgentRole::Writer, AgentRole::Reviewer];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::Writer => "writer",
            AgentRole::Reviewer => "reviewer",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub name: String,
    #[serde(default = "unknown")]
    pub size: String,
    #[serde(default = "unknown")]
    pub speed: String,
    #[serde(default = "unknown")]
    pub quality: String,
}

fn unknown() -> String {
    "Unknown".to_string()
}

impl ModelDescriptor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            size: unknown(),
            speed: unknown(),
            quality: unknown(),
        }
    }

    fn recommended(name: &str, size: &str, speed: &str, quality: &str) -> Self {
        Self {
            name: name.to_string(),
            size: size.to_string(),
            speed: speed.to_string(),
            quality: quality.to_string(),
        }
    }
}

/// Per-role model catalogue. Built once at startup and passed to whoever
/// needs it.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<AgentRole, Vec<ModelDescriptor>>,
}

impl ModelRegistry {
    pub fn with_defaults() -> Self {
        let r = ModelDescriptor::recommended;
        let mut models = BTreeMap::new();
        models.insert(
            AgentRole::Planner,
            vec![
                r("gemma3:latest", "~9GB", "Medium", "High"),
                r("llama3.2:latest", "~4GB", "Fast", "Medium"),
                r("qwen2.5:7b", "~4.7GB", "Medium", "High"),
                r("gpt-oss:20b-cloud", "~12GB", "Medium", "Very High"),
                r("glm-4.6:cloud", "~3GB", "Fast", "High"),
            ],
        );
        models.insert(
            AgentRole::Writer,
            vec![
                r("qwen2.5:3b", "~2GB", "Very Fast", "Good"),
                r("gemma3:latest", "~9GB", "Medium", "High"),
                r("llama3.2:3b", "~2GB", "Fast", "Good"),
                r("gpt-oss:20b-cloud", "~12GB", "Medium", "Very High"),
                r("gpt-oss:120b-cloud", "~75GB", "Slow", "Exceptional"),
                r("deepseek-v3.1:671b-cloud", "~400GB", "Very Slow", "Exceptional"),
            ],
        );
        models.insert(
            AgentRole::Reviewer,
            vec![
                r("kimi-k2:1t-cloud", "~700MB", "Very Fast", "Good"),
                r("qwen2.5:3b", "~2GB", "Very Fast", "Good"),
                r("gemma3:latest", "~9GB", "Medium", "High"),
                r("glm-4.6:cloud", "~3GB", "Fast", "High"),
                r("gpt-oss:20b-cloud", "~12GB", "Medium", "Very High"),
            ],
        );
        Self { models }
    }

    /// Built-in recommendations plus the user's `custom_models`. Custom
    /// entries that shadow a built-in name are skipped.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::with_defaults();
        for (role, descriptors) in &config.custom_models {
            for descriptor in descriptors {
                if let Err(e) = registry.register(*role, descriptor.clone()) {
                    log::debug!("Skipping custom model: {}", e);
                }
            }
        }
        registry
    }

    pub fn register(&mut self, role: AgentRole, descriptor: ModelDescriptor) -> Result<()> {
        let entries = self.models.entry(role).or_default();
        if entries.iter().any(|m| m.name == descriptor.name) {
            bail!("Model {} is already registered for {}", descriptor.name, role);
        }
        entries.push(descriptor);
        Ok(())
    }

    pub fn models_for(&self, role: AgentRole) -> &[ModelDescriptor] {
        self.models.get(&role).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Roles that list `name`, in role order.
    pub fn roles_for(&self, name: &str) -> Vec<AgentRole> {
        self.models
            .iter()
            .filter(|(_, models)| models.iter().any(|m| m.name == name))
            .map(|(role, _)| *role)
            .collect()
    }

    /// First installed recommendation for `role` other than `current`, else
    /// the first installed model at all.
    pub fn suggest_alternative(
        &self,
        role: AgentRole,
        current: &str,
        installed: &[String],
    ) -> Option<String> {
        self.models_for(role)
            .iter()
            .find(|m| m.name != current && installed.iter().any(|i| i == &m.name))
            .map(|m| m.name.clone())
            .or_else(|| installed.first().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_role() {
        let registry = ModelRegistry::with_defaults();
        for role in AgentRole::ALL {
            assert!(!registry.models_for(role).is_empty(), "{} has no models", role);
        }
        assert_eq!(registry.models_for(AgentRole::Writer)[0].name, "qwen2.5:3b");
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = ModelRegistry::with_defaults();
        assert!(registry
            .register(AgentRole::Writer, ModelDescriptor::new("qwen2.5:3b"))
            .is_err());

        registry
            .register(AgentRole::Writer, ModelDescriptor::new("mistral:7b"))
            .unwrap();
        assert_eq!(registry.roles_for("mistral:7b"), vec![AgentRole::Writer]);
        let added = registry.models_for(AgentRole::Writer).last().unwrap();
        assert_eq!(added.quality, "Unknown");

        // same name is still allowed under another role
        assert!(registry
            .register(AgentRole::Reviewer, ModelDescriptor::new("mistral:7b"))
            .is_ok());
    }

    #[test]
    fn test_registries_are_independent() {
        let mut a = ModelRegistry::default();
        let b = ModelRegistry::default();
        a.register(AgentRole::Planner, ModelDescriptor::new("x")).unwrap();
        assert_eq!(a.models_for(AgentRole::Planner).len(), 1);
        assert!(b.models_for(AgentRole::Planner).is_empty());
    }

    #[test]
    fn test_from_config_merges_custom_models() {
        let mut config = Config::default();
        config
            .custom_models
            .entry(AgentRole::Reviewer)
            .or_default()
            .push(ModelDescriptor::new("phi4:14b"));
        // already built in, skipped
        config
            .custom_models
            .entry(AgentRole::Reviewer)
            .or_default()
            .push(ModelDescriptor::new("qwen2.5:3b"));

        let registry = ModelRegistry::from_config(&config);
        let reviewers = registry.models_for(AgentRole::Reviewer);
        assert_eq!(reviewers.last().unwrap().name, "phi4:14b");
        assert_eq!(reviewers.iter().filter(|m| m.name == "qwen2.5:3b").count(), 1);
    }

    #[test]
    fn test_roles_and_alternatives() {
        let registry = ModelRegistry::with_defaults();
        assert_eq!(
            registry.roles_for("gemma3:latest"),
            vec![AgentRole::Planner, AgentRole::Writer, AgentRole::Reviewer]
        );

        let installed = vec!["mistral:7b".to_string(), "llama3.2:3b".to_string()];
        assert_eq!(
            registry.suggest_alternative(AgentRole::Writer, "qwen2.5:3b", &installed),
            Some("llama3.2:3b".to_string())
        );
        assert_eq!(
            registry.suggest_alternative(AgentRole::Planner, "gemma3:latest", &installed),
            Some("mistral:7b".to_string())
        );
        assert_eq!(registry.suggest_alternative(AgentRole::Planner, "x", &[]), None);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let yaml = serde_yaml_ng::to_string(&AgentRole::Reviewer).unwrap();
        assert_eq!(yaml.trim(), "reviewer");
    }
}
