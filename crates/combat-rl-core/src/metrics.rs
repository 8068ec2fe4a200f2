//! Per-agent learning metrics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::ActionKind;
use crate::reward::ActionOutcome;

/// Smoothing constant for every exponential moving average in
/// [`LearningMetrics`]
pub const METRIC_SMOOTHING: f32 = 0.1;

/// Running aggregates describing how an agent is learning and behaving.
/// Owned by exactly one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningMetrics {
    /// Completed episodes
    pub episode_count: u64,
    /// Mean episode reward over all completed episodes
    pub average_reward: f32,
    /// Highest episode reward seen
    pub best_reward: f32,
    /// Exponentially smoothed episode reward
    pub recent_reward: f32,
    /// Reward accumulated in the running episode
    pub episode_reward: f32,
    /// Current exploration rate
    pub exploration_rate: f32,
    /// Exponentially smoothed training loss
    pub loss: f32,
    /// Policy updates performed
    pub step_count: u64,
    /// Actions selected
    pub actions_taken: u64,
    /// Offensive actions selected
    pub attack_count: u64,
    /// Retreats selected
    pub retreat_count: u64,
    /// Coordinate actions selected
    pub coordination_count: u64,
    /// Reported hits
    pub hits: u64,
    /// Total damage dealt
    pub damage_dealt: f32,
    /// Total damage taken
    pub damage_taken: f32,
    /// Smoothed success of coordinated play, in [0, 1]
    pub coordination_success: f32,
    /// Network outputs that were empty or non-finite
    pub invalid_outputs: u64,
    /// Last time any field changed
    pub last_updated: DateTime<Utc>,
}

impl Default for LearningMetrics {
    fn default() -> Self {
        Self {
            episode_count: 0,
            average_reward: 0.0,
            best_reward: f32::MIN,
            recent_reward: 0.0,
            episode_reward: 0.0,
            exploration_rate: 1.0,
            loss: 0.0,
            step_count: 0,
            actions_taken: 0,
            attack_count: 0,
            retreat_count: 0,
            coordination_count: 0,
            hits: 0,
            damage_dealt: 0.0,
            damage_taken: 0.0,
            coordination_success: 0.0,
            invalid_outputs: 0,
            last_updated: Utc::now(),
        }
    }
}

/// Thresholds under which an agent is considered converged and stops
/// training in mixed mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceCriteria {
    /// Exploration rate must be below this
    pub exploration_floor: f32,
    /// |recent - average| reward must be below this
    pub reward_epsilon: f32,
    /// Minimum completed episodes before convergence can be declared
    pub min_episodes: u64,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self {
            exploration_floor: 0.05,
            reward_epsilon: 0.05,
            min_episodes: 10,
        }
    }
}

fn ema(current: f32, sample: f32) -> f32 {
    current + METRIC_SMOOTHING * (sample - current)
}

impl LearningMetrics {
    /// Count a selected action
    pub fn record_action(&mut self, kind: ActionKind) {
        self.actions_taken += 1;
        match kind {
            ActionKind::Attack | ActionKind::SpecialAttack | ActionKind::Ambush => {
                self.attack_count += 1;
            }
            ActionKind::Retreat => self.retreat_count += 1,
            ActionKind::Coordinate => self.coordination_count += 1,
            _ => {}
        }
        self.touch();
    }

    /// Add a step reward to the running episode
    pub fn record_reward(&mut self, reward: f32) {
        if reward.is_finite() {
            self.episode_reward += reward;
            self.touch();
        }
    }

    /// Fold an action outcome into the behavioral counters
    pub fn record_outcome(&mut self, outcome: &ActionOutcome) {
        if outcome.hit {
            self.hits += 1;
        }
        self.damage_dealt += outcome.damage_dealt.max(0.0);
        self.damage_taken += outcome.damage_taken.max(0.0);
        self.touch();
    }

    /// Close the running episode and update episode aggregates
    #[allow(clippy::cast_precision_loss)]
    pub fn finish_episode(&mut self) {
        let reward = self.episode_reward;
        self.episode_count += 1;
        self.average_reward += (reward - self.average_reward) / self.episode_count as f32;
        self.recent_reward = if self.episode_count == 1 {
            reward
        } else {
            ema(self.recent_reward, reward)
        };
        self.best_reward = self.best_reward.max(reward);
        self.episode_reward = 0.0;
        self.touch();
    }

    /// Record the loss of a policy update
    pub fn record_update(&mut self, loss: f32) {
        self.step_count += 1;
        if loss.is_finite() {
            self.loss = if self.step_count == 1 { loss } else { ema(self.loss, loss) };
        }
        self.touch();
    }

    /// Update the smoothed coordination success from one coordinated outcome
    pub fn record_coordination(&mut self, success: bool) {
        self.coordination_success = ema(self.coordination_success, if success { 1.0 } else { 0.0 });
        self.touch();
    }

    /// Pull this agent's coordination success toward the group score
    pub fn blend_coordination(&mut self, group_score: f32, weight: f32) {
        let w = weight.clamp(0.0, 1.0);
        self.coordination_success = (1.0 - w) * self.coordination_success + w * group_score.clamp(0.0, 1.0);
        self.touch();
    }

    /// Count an unusable network output
    pub fn record_invalid_output(&mut self) {
        self.invalid_outputs += 1;
        self.touch();
    }

    /// Fraction of selected actions that were offensive
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn aggression(&self) -> f32 {
        if self.actions_taken == 0 {
            0.0
        } else {
            self.attack_count as f32 / self.actions_taken as f32
        }
    }

    /// Whether the agent has stopped improving under `criteria`
    #[must_use]
    pub fn is_converged(&self, criteria: &ConvergenceCriteria) -> bool {
        self.episode_count >= criteria.min_episodes
            && self.exploration_rate < criteria.exploration_floor
            && (self.recent_reward - self.average_reward).abs() < criteria.reward_epsilon
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_episode_aggregates() {
        let mut m = LearningMetrics::default();
        m.record_reward(2.0);
        m.record_reward(1.0);
        m.finish_episode();
        assert_eq!(m.episode_count, 1);
        assert_relative_eq!(m.average_reward, 3.0);
        assert_relative_eq!(m.recent_reward, 3.0);
        assert_relative_eq!(m.best_reward, 3.0);
        assert_relative_eq!(m.episode_reward, 0.0);

        m.record_reward(1.0);
        m.finish_episode();
        assert_relative_eq!(m.average_reward, 2.0);
        assert_relative_eq!(m.recent_reward, 3.0 + 0.1 * (1.0 - 3.0));
        assert_relative_eq!(m.best_reward, 3.0);
    }

    #[test]
    fn test_behavior_counters() {
        let mut m = LearningMetrics::default();
        m.record_action(ActionKind::Attack);
        m.record_action(ActionKind::Retreat);
        m.record_action(ActionKind::Coordinate);
        m.record_action(ActionKind::Wait);
        assert_eq!(m.actions_taken, 4);
        assert_eq!(m.attack_count, 1);
        assert_eq!(m.retreat_count, 1);
        assert_eq!(m.coordination_count, 1);
        assert_relative_eq!(m.aggression(), 0.25);
    }

    #[test]
    fn test_convergence_predicate() {
        let criteria = ConvergenceCriteria::default();
        let mut m = LearningMetrics {
            episode_count: 20,
            average_reward: 1.0,
            recent_reward: 1.01,
            exploration_rate: 0.01,
            ..LearningMetrics::default()
        };
        assert!(m.is_converged(&criteria));

        m.exploration_rate = 0.5;
        assert!(!m.is_converged(&criteria));

        m.exploration_rate = 0.01;
        m.recent_reward = 2.0;
        assert!(!m.is_converged(&criteria));

        m.recent_reward = 1.0;
        m.episode_count = 3;
        assert!(!m.is_converged(&criteria));
    }

    #[test]
    fn test_blend_coordination() {
        let mut m = LearningMetrics::default();
        m.blend_coordination(1.0, 0.25);
        assert_relative_eq!(m.coordination_success, 0.25);
        m.record_coordination(false);
        assert_relative_eq!(m.coordination_success, 0.225);
    }

    #[test]
    fn test_non_finite_reward_is_ignored() {
        let mut m = LearningMetrics::default();
        m.record_reward(f32::NAN);
        assert_relative_eq!(m.episode_reward, 0.0);
    }
}
