//! Agent construction with per-class failure accounting
//!
//! The factory is the single place where an agent's variant is decided.
//! Callers always get an agent back; after repeated construction failures a
//! class is switched to the rule-based fallback for good.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use combat_rl_core::{ActionSpace, AgentClass, Result};

use crate::agent::CombatAgent;
use crate::dqn::{DqnAgent, DqnConfig};
use crate::rule_based::RuleBasedAgent;

/// Builds a learned agent for a class. Replaceable so hosts can plug in
/// their own construction, and tests can make it fail.
pub type AgentBuilder =
    Box<dyn Fn(AgentClass, usize, &DqnConfig) -> Result<Box<dyn CombatAgent>> + Send + Sync>;

/// Factory configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    /// Failures after which a class only gets rule-based agents
    pub construction_failure_threshold: u32,
    /// Configuration handed to every learned agent
    pub dqn: DqnConfig,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            construction_failure_threshold: 3,
            dqn: DqnConfig::default(),
        }
    }
}

/// Creates agents and tracks which classes have fallen back
pub struct AgentFactory {
    config: FactoryConfig,
    state_size: usize,
    builder: AgentBuilder,
    failures: HashMap<AgentClass, u32>,
    disabled: HashSet<AgentClass>,
    created: u64,
}

impl std::fmt::Debug for AgentFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentFactory")
            .field("config", &self.config)
            .field("state_size", &self.state_size)
            .field("failures", &self.failures)
            .field("disabled", &self.disabled)
            .field("created", &self.created)
            .finish_non_exhaustive()
    }
}

fn build_dqn(class: AgentClass, state_size: usize, config: &DqnConfig) -> Result<Box<dyn CombatAgent>> {
    let agent = DqnAgent::new(class, state_size, config.clone())?;
    Ok(Box::new(agent))
}

impl AgentFactory {
    /// Factory producing [`DqnAgent`]s for states of `state_size` features
    #[must_use]
    pub fn new(config: FactoryConfig, state_size: usize) -> Self {
        Self::with_builder(config, state_size, Box::new(build_dqn))
    }

    /// Factory with a custom learned-agent builder
    #[must_use]
    pub fn with_builder(config: FactoryConfig, state_size: usize, builder: AgentBuilder) -> Self {
        Self {
            config,
            state_size,
            builder,
            failures: HashMap::new(),
            disabled: HashSet::new(),
            created: 0,
        }
    }

    /// Create an agent for `class`. Never fails: construction errors yield
    /// a rule-based agent.
    pub fn create(&mut self, class: AgentClass) -> Box<dyn CombatAgent> {
        self.created += 1;
        if self.disabled.contains(&class) {
            return self.fallback(class);
        }

        let mut config = self.config.dqn.clone();
        config.seed = config.seed.map(|seed| seed.wrapping_add(self.created.wrapping_mul(7919)));

        match (self.builder)(class, self.state_size, &config) {
            Ok(agent) => agent,
            Err(e) => {
                let count = self.failures.entry(class).or_insert(0);
                *count += 1;
                let count = *count;
                warn!(class = %class, failures = count, error = %e, "agent construction failed, using rule-based agent");
                metrics::counter!("combat_rl.agent_construction_failures", 1);
                if count >= self.config.construction_failure_threshold {
                    error!(class = %class, failures = count, "disabling learned agents for class");
                    self.disabled.insert(class);
                }
                self.fallback(class)
            }
        }
    }

    fn fallback(&self, class: AgentClass) -> Box<dyn CombatAgent> {
        let space = self
            .config
            .dqn
            .action_space
            .clone()
            .unwrap_or_else(|| ActionSpace::for_class(class));
        Box::new(RuleBasedAgent::new(class, self.state_size, space))
    }

    /// Construction failures recorded for `class`
    #[must_use]
    pub fn failure_count(&self, class: AgentClass) -> u32 {
        self.failures.get(&class).copied().unwrap_or(0)
    }

    /// Whether `class` only receives rule-based agents
    #[must_use]
    pub fn is_disabled(&self, class: AgentClass) -> bool {
        self.disabled.contains(&class)
    }

    /// Clear the failure record of `class` and allow learned agents again
    pub fn reset_class(&mut self, class: AgentClass) {
        self.failures.remove(&class);
        self.disabled.remove(&class);
    }

    /// Number of features agents are built for
    #[must_use]
    pub fn state_size(&self) -> usize {
        self.state_size
    }

    /// Factory configuration
    #[must_use]
    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }
}
