//! The agent capability set shared by learned and fallback agents

use serde::{Deserialize, Serialize};

use combat_rl_core::{
    Action, ActionSpace, AgentClass, BehaviorProfile, CoordinationContext, Experience,
    LearningMetrics, NetworkArchitecture, Result, StateSnapshot,
};

/// Concrete kind behind a [`CombatAgent`], fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentVariant {
    /// Q-learning agent with a working network
    Learned,
    /// Heuristic agent, never learns
    RuleBased,
    /// Q-learning agent running on the null-effect network
    NullEffect,
}

impl AgentVariant {
    /// Whether agents of this variant change their behavior from experience
    #[must_use]
    pub fn learns(&self) -> bool {
        matches!(self, Self::Learned)
    }
}

/// Core agent trait.
///
/// Every method is infallible on the decision path: selection always returns
/// a valid action index, and training calls report "nothing happened"
/// instead of failing.
pub trait CombatAgent: Send + Sync {
    /// Agent class
    fn class(&self) -> AgentClass;

    /// Concrete variant
    fn variant(&self) -> AgentVariant;

    /// Discrete actions available to this agent
    fn action_space(&self) -> &ActionSpace;

    /// Pick an action index for `state`. Explores only when `explore` is set.
    fn select_action(
        &mut self,
        state: &StateSnapshot,
        context: Option<&CoordinationContext>,
        explore: bool,
    ) -> usize;

    /// Store a transition for replay. Returns whether it was kept.
    fn store_experience(&mut self, _experience: Experience) -> bool {
        false
    }

    /// Run one batch of learning. Returns the mean loss when an update
    /// actually happened.
    fn update_policy(&mut self) -> Option<f32> {
        None
    }

    /// Whether enough experience is stored for [`CombatAgent::update_policy`]
    fn is_ready_to_train(&self) -> bool {
        false
    }

    /// Adopt a new training batch size
    fn set_batch_size(&mut self, _batch_size: usize) {}

    /// Current training batch size, 0 for agents that never train
    fn batch_size(&self) -> usize {
        0
    }

    /// Learning metrics
    fn metrics(&self) -> &LearningMetrics;

    /// Mutable learning metrics
    fn metrics_mut(&mut self) -> &mut LearningMetrics;

    /// Enable or disable training
    fn set_training(&mut self, training: bool);

    /// Check if in training mode
    fn is_training(&self) -> bool;

    /// Shape of the agent's approximator
    fn architecture(&self) -> NetworkArchitecture;

    /// Snapshot the agent's learned state
    fn export_profile(&self, owner_id: &str) -> BehaviorProfile;

    /// Replace the agent's learned state. On error the agent is unchanged.
    fn import_profile(&mut self, profile: &BehaviorProfile) -> Result<()>;

    /// Approximate heap usage in bytes
    fn memory_footprint(&self) -> usize;

    /// Whether the agent reads [`CoordinationContext`]
    fn supports_coordination(&self) -> bool {
        false
    }

    /// Decode an index from [`CombatAgent::select_action`]
    fn action(&self, index: usize) -> Action {
        self.action_space().decode(index).unwrap_or(Action::Wait)
    }
}
