use crate::adapter::AgentAdapter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// MIME type used when no input/output modes are configured.
pub const DEFAULT_MODE: &str = "text/plain";

/// A single capability an agent advertises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSkill {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// What the skill does.
    #[serde(default)]
    pub description: String,
    /// Free-form tags used for discovery.
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl AgentSkill {
    /// Creates a skill with no tags.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            tags: BTreeSet::new(),
        }
    }

    /// Adds tags to the skill.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Advertised capabilities of the agent behind an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    streaming: bool,
}

impl AgentCapabilities {
    /// Whether the agent can stream partial output.
    pub fn streaming(&self) -> bool {
        self.streaming
    }
}

/// Immutable capability descriptor for one adapter.
///
/// There is no way to set `capabilities.streaming` by hand: the only
/// constructor is [`AgentCardBuilder::build_for`], which reads it off the
/// adapter the card describes. For the same reason the card serializes but
/// does not deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    name: String,
    description: String,
    version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    skills: Vec<AgentSkill>,
    default_input_modes: BTreeSet<String>,
    default_output_modes: BTreeSet<String>,
    capabilities: AgentCapabilities,
}

impl AgentCard {
    /// Starts building a card with the given display name.
    pub fn builder(name: impl Into<String>) -> AgentCardBuilder {
        AgentCardBuilder::new(name)
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Description of the agent.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Semantic version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Public URL the agent is served at, if known.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Skills, in declaration order.
    pub fn skills(&self) -> &[AgentSkill] {
        &self.skills
    }

    /// Accepted input MIME types.
    pub fn input_modes(&self) -> &BTreeSet<String> {
        &self.default_input_modes
    }

    /// Produced output MIME types.
    pub fn output_modes(&self) -> &BTreeSet<String> {
        &self.default_output_modes
    }

    /// Whether the bound adapter can stream.
    pub fn streaming(&self) -> bool {
        self.capabilities.streaming
    }
}

/// Builder for [`AgentCard`].
#[derive(Debug, Clone)]
pub struct AgentCardBuilder {
    name: String,
    description: String,
    version: String,
    url: Option<String>,
    skills: Vec<AgentSkill>,
    input_modes: BTreeSet<String>,
    output_modes: BTreeSet<String>,
}

impl AgentCardBuilder {
    /// Creates a builder with version `1.0.0` and no skills.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            version: "1.0.0".to_string(),
            url: None,
            skills: Vec::new(),
            input_modes: BTreeSet::new(),
            output_modes: BTreeSet::new(),
        }
    }

    /// Sets the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the version string.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the public URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Appends a skill.
    pub fn skill(mut self, skill: AgentSkill) -> Self {
        self.skills.push(skill);
        self
    }

    /// Appends several skills.
    pub fn skills(mut self, skills: impl IntoIterator<Item = AgentSkill>) -> Self {
        self.skills.extend(skills);
        self
    }

    /// Adds an accepted input MIME type.
    pub fn input_mode(mut self, mode: impl Into<String>) -> Self {
        self.input_modes.insert(mode.into());
        self
    }

    /// Adds a produced output MIME type.
    pub fn output_mode(mut self, mode: impl Into<String>) -> Self {
        self.output_modes.insert(mode.into());
        self
    }

    /// Finishes the card for `adapter`, taking the streaming flag from it.
    pub fn build_for(self, adapter: &dyn AgentAdapter) -> AgentCard {
        let streaming = adapter.streaming().is_some();
        tracing::debug!(
            agent = %self.name,
            adapter = adapter.kind(),
            streaming,
            "Built agent card"
        );
        AgentCard {
            name: self.name,
            description: self.description,
            version: self.version,
            url: self.url,
            skills: self.skills,
            default_input_modes: or_default_mode(self.input_modes),
            default_output_modes: or_default_mode(self.output_modes),
            capabilities: AgentCapabilities { streaming },
        }
    }
}

fn or_default_mode(modes: BTreeSet<String>) -> BTreeSet<String> {
    if modes.is_empty() {
        BTreeSet::from([DEFAULT_MODE.to_string()])
    } else {
        modes
    }
}
