//! Rule-based fallback agent
//!
//! Used when a class's learned agent cannot be constructed. It honours the
//! same selection contract as the learned agent but never stores experience
//! or updates anything.

use serde::{Deserialize, Serialize};

use combat_rl_core::state::layout;
use combat_rl_core::{
    Action, ActionKind, ActionSpace, AgentClass, ApproximatorKind, BehaviorProfile, CombatError,
    CoordinationContext, LearningMetrics, NetworkArchitecture, Result, StateSnapshot, Vec2,
};

use crate::agent::{AgentVariant, CombatAgent};

/// Thresholds for [`RuleBasedAgent`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleBasedConfig {
    /// Retreat below this own-health fraction
    pub retreat_health: f32,
    /// Attack when the normalised opponent distance is at most this
    pub attack_range: f32,
}

impl Default for RuleBasedConfig {
    fn default() -> Self {
        Self {
            retreat_health: 0.25,
            attack_range: 0.06,
        }
    }
}

impl RuleBasedConfig {
    /// Reference thresholds for a class
    #[must_use]
    pub fn for_class(class: AgentClass) -> Self {
        let attack_range = match class {
            AgentClass::Melee => 0.06,
            AgentClass::Ranged => 0.45,
            AgentClass::Tank => 0.1,
            AgentClass::Support => 0.3,
        };
        Self {
            attack_range,
            ..Self::default()
        }
    }
}

/// Heuristic agent: retreat when hurt, attack in range, follow the group's
/// call to coordinate, otherwise close in on the opponent.
#[derive(Debug, Clone)]
pub struct RuleBasedAgent {
    class: AgentClass,
    action_space: ActionSpace,
    config: RuleBasedConfig,
    state_size: usize,
    metrics: LearningMetrics,
}

impl RuleBasedAgent {
    /// Create a fallback agent for `class`
    #[must_use]
    pub fn new(class: AgentClass, state_size: usize, action_space: ActionSpace) -> Self {
        Self {
            class,
            action_space,
            config: RuleBasedConfig::for_class(class),
            state_size,
            metrics: LearningMetrics {
                exploration_rate: 0.0,
                ..LearningMetrics::default()
            },
        }
    }

    /// Replace the thresholds
    #[must_use]
    pub fn with_config(mut self, config: RuleBasedConfig) -> Self {
        self.config = config;
        self
    }

    fn opponent_direction(state: &StateSnapshot) -> Vec2 {
        let f = state.features();
        match (f.get(layout::OPPONENT_REL_X), f.get(layout::OPPONENT_REL_Y)) {
            (Some(&x), Some(&y)) => Vec2::new(x, y),
            _ => Vec2::ZERO,
        }
    }

    fn decide(&self, state: &StateSnapshot, context: Option<&CoordinationContext>) -> Action {
        let space = &self.action_space;
        let health = state.self_health().unwrap_or(1.0);
        let distance = state.opponent_distance().unwrap_or(f32::MAX);
        let toward = Self::opponent_direction(state);

        if health < self.config.retreat_health && space.retreat_enabled {
            if let Some(direction) = (Vec2::ZERO - toward).nearest_heading(space.move_directions) {
                return Action::Retreat { direction };
            }
        }
        if distance <= self.config.attack_range {
            if space.attack_levels > 0 {
                return Action::Attack { intensity: 1.0 };
            }
            if space.special_attack_enabled {
                return Action::SpecialAttack { intensity: 1.0 };
            }
        }
        let grouped_call = context
            .filter(|c| c.is_grouped())
            .and_then(|c| c.suggested_action);
        match grouped_call {
            Some(ActionKind::Coordinate) if space.coordinate_targets > 0 => {
                return Action::Coordinate { target_index: 0 };
            }
            Some(ActionKind::DefensiveStance) if space.defensive_stance_enabled => {
                return Action::DefensiveStance;
            }
            _ => {}
        }
        match toward.nearest_heading(space.move_directions) {
            Some(direction) => Action::Move { direction },
            None => Action::Wait,
        }
    }
}

impl CombatAgent for RuleBasedAgent {
    fn class(&self) -> AgentClass {
        self.class
    }

    fn variant(&self) -> AgentVariant {
        AgentVariant::RuleBased
    }

    fn action_space(&self) -> &ActionSpace {
        &self.action_space
    }

    fn select_action(
        &mut self,
        state: &StateSnapshot,
        context: Option<&CoordinationContext>,
        _explore: bool,
    ) -> usize {
        let action = self.decide(state, context);
        let index = self.action_space.encode(&action).unwrap_or(0);
        if let Some(chosen) = self.action_space.decode(index) {
            self.metrics.record_action(chosen.kind());
        }
        index
    }

    fn metrics(&self) -> &LearningMetrics {
        &self.metrics
    }

    fn metrics_mut(&mut self) -> &mut LearningMetrics {
        &mut self.metrics
    }

    fn set_training(&mut self, _training: bool) {}

    fn is_training(&self) -> bool {
        false
    }

    fn architecture(&self) -> NetworkArchitecture {
        NetworkArchitecture {
            kind: ApproximatorKind::RuleBased,
            input_size: self.state_size,
            hidden_layers: Vec::new(),
            output_size: self.action_space.action_count(),
        }
    }

    fn export_profile(&self, owner_id: &str) -> BehaviorProfile {
        BehaviorProfile::new(
            self.class,
            owner_id,
            self.architecture(),
            Vec::new(),
            Vec::new(),
            self.metrics.clone(),
        )
    }

    fn import_profile(&mut self, profile: &BehaviorProfile) -> Result<()> {
        if profile.agent_class != self.class {
            return Err(CombatError::Validation(format!(
                "profile is for {} agents, expected {}",
                profile.agent_class, self.class
            )));
        }
        // only the counters carry over, learned parameters are ignored
        let exploration = self.metrics.exploration_rate;
        self.metrics = profile.metrics.clone();
        self.metrics.exploration_rate = exploration;
        Ok(())
    }

    fn memory_footprint(&self) -> usize {
        std::mem::size_of::<Self>()
    }

    fn supports_coordination(&self) -> bool {
        true
    }
}
