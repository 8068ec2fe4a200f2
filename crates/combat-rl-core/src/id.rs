//! Identifiers for agents, groups and agent classes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies a registered agent.
///
/// Ids are handed out by the training coordinator and never reused within a
/// session, so a stale id held by the coordination layer can only miss, never
/// alias a different agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub u64);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent-{}", self.0)
    }
}

impl From<u64> for AgentId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Identifies a coordination group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group-{}", self.0)
    }
}

/// Combat role of an agent. Only agents of the same class coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentClass {
    /// Close-range attacker
    Melee,
    /// Long-range attacker
    Ranged,
    /// Damage absorber
    Tank,
    /// Buffs and escorts allies
    Support,
}

impl AgentClass {
    /// Every class, in a stable order
    pub const ALL: [AgentClass; 4] = [Self::Melee, Self::Ranged, Self::Tank, Self::Support];

    /// Stable lowercase name, used in file names and logs
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Melee => "melee",
            Self::Ranged => "ranged",
            Self::Tank => "tank",
            Self::Support => "support",
        }
    }

    /// Numeric code fed into state encodings
    #[must_use]
    pub fn code(&self) -> f32 {
        match self {
            Self::Melee => 0.25,
            Self::Ranged => 0.5,
            Self::Tank => 0.75,
            Self::Support => 1.0,
        }
    }
}

impl fmt::Display for AgentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentClass {
    type Err = crate::CombatError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "melee" => Ok(Self::Melee),
            "ranged" => Ok(Self::Ranged),
            "tank" => Ok(Self::Tank),
            "support" => Ok(Self::Support),
            other => Err(crate::CombatError::Config(format!("unknown agent class: {other}"))),
        }
    }
}
