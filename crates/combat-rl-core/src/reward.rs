//! Action outcomes and pluggable reward functions

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::id::AgentClass;
use crate::state::StateSnapshot;

/// What happened when the simulation executed an action. Filled in by the
/// simulation collaborator, never by the learning core.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Whether an attack connected
    pub hit: bool,
    /// Damage dealt to the opponent
    pub damage_dealt: f32,
    /// Damage received
    pub damage_taken: f32,
    /// World-space distance to the opponent after the action
    pub distance_to_opponent: f32,
    /// `Some(success)` when the action was part of a coordinated play
    pub coordination: Option<bool>,
}

/// Trait for reward functions.
///
/// The core calls these but never defines the shaping itself; hosts plug in
/// their own implementation or use [`ShapedCombatReward`].
pub trait RewardFunction: Send + Sync {
    /// Reward for a single resolved action
    fn reward(
        &self,
        prev_state: &StateSnapshot,
        action: &Action,
        next_state: &StateSnapshot,
        outcome: &ActionOutcome,
    ) -> f32;

    /// Reward for the final transition of an episode
    fn terminal_reward(
        &self,
        final_state: &StateSnapshot,
        episode_length: u32,
        killed_by_opponent: bool,
    ) -> f32;
}

/// Weights for [`ShapedCombatReward`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Bonus for a landed hit
    pub hit_bonus: f32,
    /// Penalty for an offensive action that missed
    pub miss_penalty: f32,
    /// Reward per point of damage dealt
    pub damage_dealt_weight: f32,
    /// Penalty per point of damage taken
    pub damage_taken_weight: f32,
    /// Normalised distance to the opponent this class prefers to fight at
    pub preferred_distance: f32,
    /// Weight of the distance shaping term
    pub distance_weight: f32,
    /// Bonus for a successful coordinated play
    pub coordination_bonus: f32,
    /// Penalty for a failed coordinated play
    pub coordination_penalty: f32,
    /// Penalty applied to every step
    pub time_penalty: f32,
    /// Terminal reward for surviving the episode
    pub survival_reward: f32,
    /// Terminal penalty for being killed
    pub death_penalty: f32,
    /// Terminal bonus per step survived
    pub longevity_bonus: f32,
    /// Cap on the longevity bonus
    pub longevity_cap: f32,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            hit_bonus: 0.5,
            miss_penalty: 0.05,
            damage_dealt_weight: 0.02,
            damage_taken_weight: 0.02,
            preferred_distance: 0.05,
            distance_weight: 0.5,
            coordination_bonus: 0.3,
            coordination_penalty: 0.1,
            time_penalty: 0.01,
            survival_reward: 1.0,
            death_penalty: 1.0,
            longevity_bonus: 0.001,
            longevity_cap: 0.5,
        }
    }
}

impl RewardConfig {
    /// Reference weights for a class; only the preferred range differs
    #[must_use]
    pub fn for_class(class: AgentClass) -> Self {
        let preferred_distance = match class {
            AgentClass::Melee => 0.05,
            AgentClass::Ranged => 0.4,
            AgentClass::Tank => 0.1,
            AgentClass::Support => 0.25,
        };
        Self {
            preferred_distance,
            ..Self::default()
        }
    }
}

/// Placeholder-grade combat reward.
///
/// Combines outcome terms with a potential-based distance term
/// `w * (phi(next) - phi(prev))` where `phi(s) = -|d(s) - preferred|`, so
/// the shaping never changes which policy is optimal.
#[derive(Debug, Clone, Default)]
pub struct ShapedCombatReward {
    config: RewardConfig,
}

impl ShapedCombatReward {
    /// Create a reward shaper
    #[must_use]
    pub fn new(config: RewardConfig) -> Self {
        Self { config }
    }

    /// Shaper with the reference weights for a class
    #[must_use]
    pub fn for_class(class: AgentClass) -> Self {
        Self::new(RewardConfig::for_class(class))
    }

    fn potential(&self, state: &StateSnapshot) -> f32 {
        state
            .opponent_distance()
            .map_or(0.0, |d| -(d - self.config.preferred_distance).abs())
    }
}

impl RewardFunction for ShapedCombatReward {
    fn reward(
        &self,
        prev_state: &StateSnapshot,
        action: &Action,
        next_state: &StateSnapshot,
        outcome: &ActionOutcome,
    ) -> f32 {
        let c = &self.config;
        let mut reward = -c.time_penalty;

        if outcome.hit {
            reward += c.hit_bonus;
        } else if action.is_offensive() {
            reward -= c.miss_penalty;
        }
        reward += c.damage_dealt_weight * outcome.damage_dealt.max(0.0);
        reward -= c.damage_taken_weight * outcome.damage_taken.max(0.0);

        reward += c.distance_weight * (self.potential(next_state) - self.potential(prev_state));

        match outcome.coordination {
            Some(true) => reward += c.coordination_bonus,
            Some(false) => reward -= c.coordination_penalty,
            None => {}
        }

        if reward.is_finite() {
            reward
        } else {
            0.0
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn terminal_reward(
        &self,
        final_state: &StateSnapshot,
        episode_length: u32,
        killed_by_opponent: bool,
    ) -> f32 {
        let c = &self.config;
        if killed_by_opponent {
            return -c.death_penalty;
        }
        let longevity = (c.longevity_bonus * episode_length as f32).min(c.longevity_cap);
        let finish = final_state
            .opponent_health()
            .map_or(0.0, |h| 1.0 - h.clamp(0.0, 1.0));
        c.survival_reward + longevity + finish * c.hit_bonus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::layout;
    use approx::assert_relative_eq;

    fn snapshot_at(distance: f32) -> StateSnapshot {
        let mut f = vec![0.0; 32];
        f[layout::OPPONENT_REL_X] = distance;
        f[layout::OPPONENT_HEALTH] = 1.0;
        StateSnapshot::from_features(f)
    }

    #[test]
    fn test_hit_is_rewarded_and_miss_penalised() {
        let shaper = ShapedCombatReward::for_class(AgentClass::Melee);
        let s = snapshot_at(0.05);
        let attack = Action::Attack { intensity: 1.0 };

        let hit = ActionOutcome { hit: true, ..ActionOutcome::default() };
        let miss = ActionOutcome::default();

        assert_relative_eq!(shaper.reward(&s, &attack, &s, &hit), 0.49, epsilon = 1e-6);
        assert_relative_eq!(shaper.reward(&s, &attack, &s, &miss), -0.06, epsilon = 1e-6);
        assert_relative_eq!(shaper.reward(&s, &Action::Wait, &s, &miss), -0.01, epsilon = 1e-6);
    }

    #[test]
    fn test_distance_shaping_prefers_class_range() {
        let shaper = ShapedCombatReward::for_class(AgentClass::Ranged);
        let far = snapshot_at(0.8);
        let near_preferred = snapshot_at(0.4);
        let outcome = ActionOutcome::default();
        let closing = shaper.reward(&far, &Action::Move { direction: 0 }, &near_preferred, &outcome);
        let leaving = shaper.reward(&near_preferred, &Action::Move { direction: 0 }, &far, &outcome);
        assert!(closing > 0.0);
        assert!(leaving < 0.0);
    }

    #[test]
    fn test_terminal_reward() {
        let shaper = ShapedCombatReward::default();
        let s = snapshot_at(0.1);
        assert_relative_eq!(shaper.terminal_reward(&s, 100, true), -1.0);
        // survival 1.0 + longevity 0.1 + opponent untouched
        assert_relative_eq!(shaper.terminal_reward(&s, 100, false), 1.1, epsilon = 1e-5);
        // longevity is capped
        assert_relative_eq!(shaper.terminal_reward(&s, 100_000, false), 1.5, epsilon = 1e-5);
    }
}
