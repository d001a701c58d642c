//! Agent directory: resolves agent ids to profiles and endpoints.

use dashmap::DashMap;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;

use crate::domain::models::{
    AgentConfig, AgentProfile, AgentTier, Capability, Config, Endpoint,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Agent {agent} has invalid tier {tier}")]
    InvalidTier { agent: String, tier: u8 },
}

/// Known agents, keyed by id.
///
/// Port overrides take precedence over the configured port and may be
/// changed at runtime.
#[derive(Debug, Default)]
pub struct AgentDirectory {
    agents: DashMap<String, AgentProfile>,
    port_overrides: DashMap<String, u16>,
}

impl AgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Result<Self, DirectoryError> {
        let directory = Self::new();
        for (agent_id, port) in &config.port_overrides {
            directory.port_overrides.insert(agent_id.clone(), *port);
        }
        for agent in &config.agents {
            directory.register(profile_from_config(agent)?);
        }
        debug!(agents = directory.len(), "agent directory loaded");
        Ok(directory)
    }

    /// Add or replace an agent. An existing port override is applied.
    pub fn register(&self, mut profile: AgentProfile) {
        if let Some(port) = self.port_overrides.get(&profile.agent_id) {
            profile.endpoint.port = *port;
        }
        self.agents.insert(profile.agent_id.clone(), profile);
    }

    pub fn remove(&self, agent_id: &str) -> Option<AgentProfile> {
        self.agents.remove(agent_id).map(|(_, profile)| profile)
    }

    pub fn set_port_override(&self, agent_id: impl Into<String>, port: u16) {
        let agent_id = agent_id.into();
        if let Some(mut profile) = self.agents.get_mut(&agent_id) {
            profile.endpoint.port = port;
        }
        self.port_overrides.insert(agent_id, port);
    }

    pub fn profile(&self, agent_id: &str) -> Option<AgentProfile> {
        self.agents.get(agent_id).map(|p| p.value().clone())
    }

    pub fn resolve(&self, agent_id: &str) -> Result<Endpoint, DirectoryError> {
        self.agents
            .get(agent_id)
            .map(|p| p.endpoint.clone())
            .ok_or_else(|| DirectoryError::UnknownAgent(agent_id.to_string()))
    }

    /// All agents, ordered by id.
    pub fn agents(&self) -> Vec<AgentProfile> {
        let mut agents: Vec<_> = self.agents.iter().map(|p| p.value().clone()).collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    pub fn by_tier(&self, tier: AgentTier) -> Vec<AgentProfile> {
        self.agents()
            .into_iter()
            .filter(|p| p.tier == tier)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// Build a profile from its configuration entry.
///
/// `a2a_enabled` grants delegation, `tools_enabled` grants tool use and a
/// quality domain grants quality validation, on top of the explicit list.
pub fn profile_from_config(agent: &AgentConfig) -> Result<AgentProfile, DirectoryError> {
    let tier = AgentTier::try_from(agent.tier).map_err(|_| DirectoryError::InvalidTier {
        agent: agent.agent_id.clone(),
        tier: agent.tier,
    })?;

    let mut capabilities: BTreeSet<Capability> = agent.capabilities.iter().copied().collect();
    if agent.a2a_enabled {
        capabilities.insert(Capability::Delegation);
    }
    if agent.tools_enabled {
        capabilities.insert(Capability::ToolUse);
    }
    if agent.quality_domain.is_some() {
        capabilities.insert(Capability::QualityValidation);
    }

    let endpoint = Endpoint::new(agent.host.clone(), agent.port).with_path(agent.path.clone());
    let mut profile = AgentProfile::new(agent.agent_id.clone(), tier, endpoint);
    if !agent.name.is_empty() {
        profile.name.clone_from(&agent.name);
    }
    profile.capabilities = capabilities;
    profile.quality_domain.clone_from(&agent.quality_domain);
    Ok(profile)
}
