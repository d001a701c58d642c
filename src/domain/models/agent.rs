//! Agent profiles.
//!
//! Every agent is described by one profile type. Tier-specific behavior is
//! expressed through the capability set rather than a type per tier.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::endpoint::Endpoint;

/// Position of an agent in the delegation tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AgentTier {
    /// Top-level orchestrator.
    Orchestrator = 1,
    /// Mid-tier domain specialist.
    Specialist = 2,
    /// Leaf service agent.
    Service = 3,
}

impl AgentTier {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrator",
            Self::Specialist => "specialist",
            Self::Service => "service",
        }
    }

    /// Tier number (1..=3).
    pub const fn number(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for AgentTier {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Orchestrator),
            2 => Ok(Self::Specialist),
            3 => Ok(Self::Service),
            other => Err(format!("invalid tier {other}, expected 1, 2 or 3")),
        }
    }
}

impl From<AgentTier> for u8 {
    fn from(tier: AgentTier) -> Self {
        tier.number()
    }
}

/// Something an agent is able to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Accepts delegated work from peers.
    Delegation,
    /// May call external tools while handling a task.
    ToolUse,
    /// Results must pass a quality gate before flowing upward.
    QualityValidation,
}

/// Resolved description of one addressable agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub agent_id: String,
    pub name: String,
    pub tier: AgentTier,
    pub endpoint: Endpoint,
    pub capabilities: BTreeSet<Capability>,
    /// Quality domain applied to this agent's results.
    pub quality_domain: Option<String>,
}

impl AgentProfile {
    pub fn new(agent_id: impl Into<String>, tier: AgentTier, endpoint: Endpoint) -> Self {
        let agent_id = agent_id.into();
        Self {
            name: agent_id.clone(),
            agent_id,
            tier,
            endpoint,
            capabilities: BTreeSet::from([Capability::Delegation]),
            quality_domain: None,
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn with_quality_domain(mut self, domain: impl Into<String>) -> Self {
        self.quality_domain = Some(domain.into());
        self.capabilities.insert(Capability::QualityValidation);
        self
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_round_trip_and_rejection() {
        assert_eq!(AgentTier::try_from(2), Ok(AgentTier::Specialist));
        assert!(AgentTier::try_from(0).is_err());
        assert!(AgentTier::try_from(4).is_err());
        assert_eq!(AgentTier::Service.number(), 3);

        let tier: Result<AgentTier, _> = serde_json::from_str("5");
        assert!(tier.is_err());
    }

    #[test]
    fn test_capability_composition() {
        let endpoint = Endpoint::localhost(8201);
        let profile = AgentProfile::new("market-analyst", AgentTier::Specialist, endpoint)
            .with_capability(Capability::ToolUse)
            .with_quality_domain("BUSINESS");

        assert!(profile.has(Capability::Delegation));
        assert!(profile.has(Capability::ToolUse));
        assert!(profile.has(Capability::QualityValidation));
        assert_eq!(profile.quality_domain.as_deref(), Some("BUSINESS"));
    }
}
