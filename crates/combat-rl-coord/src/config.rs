//! One configuration document for the whole engine

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use combat_rl_agent::FactoryConfig;
use combat_rl_core::{AgentClass, CombatError, RewardConfig, Result, StateEncoderConfig};
use combat_rl_store::StoreConfig;

use crate::coordination::CoordinationConfig;
use crate::coordinator::CoordinatorConfig;
use crate::performance::PerformanceConfig;

/// Reward weights per agent class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassRewards {
    /// Melee weights
    pub melee: RewardConfig,
    /// Ranged weights
    pub ranged: RewardConfig,
    /// Tank weights
    pub tank: RewardConfig,
    /// Support weights
    pub support: RewardConfig,
}

impl Default for ClassRewards {
    fn default() -> Self {
        Self {
            melee: RewardConfig::for_class(AgentClass::Melee),
            ranged: RewardConfig::for_class(AgentClass::Ranged),
            tank: RewardConfig::for_class(AgentClass::Tank),
            support: RewardConfig::for_class(AgentClass::Support),
        }
    }
}

impl ClassRewards {
    /// Weights of a class
    #[must_use]
    pub fn get(&self, class: AgentClass) -> &RewardConfig {
        match class {
            AgentClass::Melee => &self.melee,
            AgentClass::Ranged => &self.ranged,
            AgentClass::Tank => &self.tank,
            AgentClass::Support => &self.support,
        }
    }
}

/// Complete engine configuration. Every section is optional in a file;
/// missing sections and fields take the reference sizing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatRlConfig {
    /// State encoding
    pub encoder: StateEncoderConfig,
    /// Reward shaping
    pub rewards: ClassRewards,
    /// Agent construction and the learner
    pub factory: FactoryConfig,
    /// Grouping
    pub coordination: CoordinationConfig,
    /// Budgets and the degradation ladder
    pub performance: PerformanceConfig,
    /// Modes, scheduling and auto-save
    pub coordinator: CoordinatorConfig,
    /// Profile storage
    pub store: StoreConfig,
}

impl CombatRlConfig {
    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("Failed to parse combat RL config")?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml_str(&text)?;
        config.validate()?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        let text = toml::to_string_pretty(self).context("Failed to serialize combat RL config")?;
        Ok(text)
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<()> {
        if self.encoder.arena_extent <= 0.0 || self.encoder.max_speed <= 0.0 {
            return Err(CombatError::Config("arena_extent and max_speed must be positive".into()));
        }
        if self.factory.construction_failure_threshold == 0 {
            return Err(CombatError::Config("construction_failure_threshold must be at least 1".into()));
        }
        self.factory.dqn.validate()?;
        if let Some(space) = &self.factory.dqn.action_space {
            space.validate()?;
        }
        self.coordination.validate()?;
        self.performance.validate()?;
        self.coordinator.validate()
    }
}
