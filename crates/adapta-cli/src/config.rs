use adapta_backends::AdapterOptions;
use adapta_core::{AgentCardBuilder, AgentSkill};
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;

/// Top-level `adapta.toml`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdaptaConfig {
    pub agent: AgentSection,
    #[serde(default)]
    pub server: ServerConfig,
    /// Backend options; the `adapter` key selects the kind.
    pub adapter: AdapterOptions,
}

/// Card metadata. The streaming capability comes from the adapter, not from here.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSection {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
    #[serde(default)]
    pub input_modes: Vec<String>,
    #[serde(default)]
    pub output_modes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    9000
}

impl AdaptaConfig {
    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(raw)?;
        if config.agent.name.trim().is_empty() {
            anyhow::bail!("[agent] name must not be empty");
        }
        Ok(config)
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Invalid config file '{}'", path.display()))
    }
}

impl AgentSection {
    /// Card builder for this agent; `fallback_url` is used when no url is configured.
    pub fn card_builder(&self, fallback_url: &str) -> AgentCardBuilder {
        let mut builder = AgentCardBuilder::new(&self.name)
            .description(&self.description)
            .url(self.url.as_deref().unwrap_or(fallback_url))
            .skills(self.skills.iter().cloned());
        if let Some(version) = &self.version {
            builder = builder.version(version);
        }
        for mode in &self.input_modes {
            builder = builder.input_mode(mode);
        }
        for mode in &self.output_modes {
            builder = builder.output_mode(mode);
        }
        builder
    }
}
