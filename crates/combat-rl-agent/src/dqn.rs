//! Deep Q-Network (DQN) agent implementation

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use combat_rl_core::{
    ActionSpace, AgentClass, ApproximatorKind, BehaviorProfile, CombatError,
    CoordinationContext, Experience, LearningMetrics, NetworkArchitecture, Result,
    StateSnapshot,
};

use crate::agent::{AgentVariant, CombatAgent};
use crate::buffer::ReplayBuffer;
use crate::network::{build_network, NetworkConfig, QNetwork};

/// DQN-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DqnConfig {
    /// Learning rate
    pub learning_rate: f32,
    /// Discount factor
    pub gamma: f32,
    /// Epsilon for exploration
    pub epsilon_start: f32,
    /// Final epsilon value
    pub epsilon_end: f32,
    /// Multiplicative epsilon decay per policy update
    pub epsilon_decay: f32,
    /// Batch size for training
    pub batch_size: usize,
    /// Buffer size for experience replay
    pub buffer_size: usize,
    /// Stored experiences required before the first update
    pub min_experiences: usize,
    /// Update target network every N policy updates
    pub target_update_freq: u64,
    /// Approximator shape and clipping
    pub network: NetworkConfig,
    /// Q-value bonus for actions matching the group's suggestion
    pub coordination_bias: f32,
    /// Seed for network initialisation and exploration
    pub seed: Option<u64>,
    /// Overrides the class preset
    pub action_space: Option<ActionSpace>,
}

impl Default for DqnConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            gamma: 0.95,
            epsilon_start: 1.0,
            epsilon_end: 0.01,
            epsilon_decay: 0.995,
            batch_size: 32,
            buffer_size: ReplayBuffer::DEFAULT_CAPACITY,
            min_experiences: 100,
            target_update_freq: 100,
            network: NetworkConfig::default(),
            coordination_bias: 0.1,
            seed: None,
            action_space: None,
        }
    }
}

impl DqnConfig {
    /// Reject values the update rule cannot work with
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(CombatError::Config(msg));
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return fail(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return fail(format!("gamma must be in [0, 1], got {}", self.gamma));
        }
        if !(0.0..=1.0).contains(&self.epsilon_end)
            || !(0.0..=1.0).contains(&self.epsilon_start)
            || self.epsilon_end > self.epsilon_start
        {
            return fail(format!(
                "epsilon range [{}, {}] is not within [0, 1]",
                self.epsilon_end, self.epsilon_start
            ));
        }
        if !(self.epsilon_decay > 0.0 && self.epsilon_decay <= 1.0) {
            return fail(format!("epsilon_decay must be in (0, 1], got {}", self.epsilon_decay));
        }
        if self.batch_size == 0 || self.buffer_size == 0 {
            return fail("batch_size and buffer_size must be non-zero".to_string());
        }
        if self.target_update_freq == 0 {
            return fail("target_update_freq must be non-zero".to_string());
        }
        if self.network.hidden_layers.iter().any(|&h| h == 0) {
            return fail("hidden layer of width 0".to_string());
        }
        if !self.coordination_bias.is_finite() {
            return fail("coordination_bias must be finite".to_string());
        }
        if let Some(space) = &self.action_space {
            space.validate()?;
        }
        Ok(())
    }
}

/// Epsilon-greedy Q-learning agent with experience replay and a
/// periodically synced target network.
pub struct DqnAgent {
    class: AgentClass,
    config: DqnConfig,
    action_space: ActionSpace,
    online: Box<dyn QNetwork>,
    target: Box<dyn QNetwork>,
    buffer: ReplayBuffer,
    epsilon: f32,
    update_count: u64,
    metrics: LearningMetrics,
    training: bool,
    rng: StdRng,
}

impl DqnAgent {
    /// Create an agent for `class` observing `state_size` features.
    ///
    /// Fails only on an invalid configuration. A network that cannot be
    /// built is replaced by the null-effect network and the agent reports
    /// [`AgentVariant::NullEffect`].
    pub fn new(class: AgentClass, state_size: usize, config: DqnConfig) -> Result<Self> {
        config.validate()?;
        let action_space = config
            .action_space
            .clone()
            .unwrap_or_else(|| ActionSpace::for_class(class));
        let architecture = NetworkArchitecture::dense(
            state_size,
            config.network.hidden_layers.clone(),
            action_space.action_count(),
        );
        let online = build_network(&architecture, &config.network, config.seed);
        Self::with_network(class, config, online)
    }

    /// Create an agent around an existing online network. The target
    /// network starts as a copy of it.
    pub fn with_network(class: AgentClass, config: DqnConfig, online: Box<dyn QNetwork>) -> Result<Self> {
        config.validate()?;
        let action_space = config
            .action_space
            .clone()
            .unwrap_or_else(|| ActionSpace::for_class(class));
        let outputs = online.architecture().output_size;
        if outputs != action_space.action_count() {
            return Err(CombatError::DimensionMismatch {
                expected: action_space.action_count(),
                actual: outputs,
            });
        }

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };
        let epsilon = config.epsilon_start;
        let metrics = LearningMetrics {
            exploration_rate: epsilon,
            ..LearningMetrics::default()
        };

        Ok(Self {
            class,
            action_space,
            target: online.clone_network(),
            online,
            buffer: ReplayBuffer::new(config.buffer_size),
            epsilon,
            update_count: 0,
            metrics,
            training: true,
            rng,
            config,
        })
    }

    /// Current exploration rate
    #[must_use]
    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    /// Policy updates performed since construction
    #[must_use]
    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    /// Agent configuration
    #[must_use]
    pub fn config(&self) -> &DqnConfig {
        &self.config
    }

    /// Replay buffer
    #[must_use]
    pub fn buffer(&self) -> &ReplayBuffer {
        &self.buffer
    }

    /// Online network
    #[must_use]
    pub fn online_network(&self) -> &dyn QNetwork {
        self.online.as_ref()
    }

    /// Target network
    #[must_use]
    pub fn target_network(&self) -> &dyn QNetwork {
        self.target.as_ref()
    }

    /// Q-values of the online network, `None` when the output is unusable
    #[must_use]
    pub fn q_values(&self, state: &StateSnapshot) -> Option<Vec<f32>> {
        let q = self.online.forward(state.features()).ok()?;
        let valid = q.len() == self.action_space.action_count() && q.iter().all(|v| v.is_finite());
        valid.then_some(q)
    }

    fn greedy_action(&mut self, state: &StateSnapshot, context: Option<&CoordinationContext>) -> usize {
        let Some(mut q) = self.q_values(state) else {
            warn!(class = %self.class, "invalid network output, falling back to action 0");
            self.metrics.record_invalid_output();
            metrics::counter!("combat_rl.invalid_outputs", 1);
            return 0;
        };

        if let Some(ctx) = context.filter(|c| c.is_grouped()) {
            if let Some(kind) = ctx.suggested_action {
                let bias = self.config.coordination_bias * ctx.group_success.max(0.1);
                for i in self.action_space.indices_of_kind(kind) {
                    q[i] += bias;
                }
            }
        }

        argmax(&q)
    }

    fn decay_epsilon(&mut self) {
        self.epsilon = (self.epsilon * self.config.epsilon_decay).max(self.config.epsilon_end);
        self.metrics.exploration_rate = self.epsilon;
    }
}

/// Index of the first maximum
fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

impl CombatAgent for DqnAgent {
    fn class(&self) -> AgentClass {
        self.class
    }

    fn variant(&self) -> AgentVariant {
        if self.online.is_null() {
            AgentVariant::NullEffect
        } else {
            AgentVariant::Learned
        }
    }

    fn action_space(&self) -> &ActionSpace {
        &self.action_space
    }

    fn select_action(
        &mut self,
        state: &StateSnapshot,
        context: Option<&CoordinationContext>,
        explore: bool,
    ) -> usize {
        let index = if explore && self.rng.gen::<f32>() < self.epsilon {
            self.action_space.sample(&mut self.rng)
        } else {
            self.greedy_action(state, context)
        };
        if let Some(action) = self.action_space.decode(index) {
            self.metrics.record_action(action.kind());
        }
        index
    }

    fn store_experience(&mut self, experience: Experience) -> bool {
        if !self.training {
            return false;
        }
        let input = self.online.architecture().input_size;
        if experience.state.len() != input || experience.next_state.len() != input {
            warn!(
                class = %self.class,
                expected = input,
                actual = experience.state.len(),
                "dropping experience with wrong state size"
            );
            return false;
        }
        if experience.action_index >= self.action_space.action_count() {
            warn!(class = %self.class, action = experience.action_index, "dropping experience with unknown action");
            return false;
        }
        self.buffer.add(experience);
        true
    }

    #[allow(clippy::cast_precision_loss)]
    fn update_policy(&mut self) -> Option<f32> {
        if !self.training || !self.is_ready_to_train() {
            return None;
        }

        let batch = self.buffer.sample_batch(self.config.batch_size, &mut self.rng);
        if batch.is_empty() {
            return None;
        }

        let gamma = self.config.gamma;
        let learning_rate = self.config.learning_rate;
        let mut total_loss = 0.0;
        let mut trained = 0usize;

        for experience in batch {
            let current = match self.online.forward(experience.state.features()) {
                Ok(q) if experience.action_index < q.len() => q,
                Ok(_) => continue,
                Err(e) => {
                    debug!(error = %e, "skipping experience, forward pass failed");
                    continue;
                }
            };

            let target_value = if experience.terminal {
                experience.reward
            } else {
                let next_max = self
                    .target
                    .forward(experience.next_state.features())
                    .ok()
                    .and_then(|q| q.into_iter().filter(|v| v.is_finite()).reduce(f32::max))
                    .unwrap_or(0.0);
                experience.reward + gamma * next_max
            };

            let mut target = current;
            target[experience.action_index] = target_value;

            match self.online.backward(experience.state.features(), &target, learning_rate) {
                Ok(loss) => {
                    total_loss += loss;
                    trained += 1;
                }
                Err(e) => debug!(error = %e, "skipping experience, backward pass failed"),
            }
        }

        self.update_count += 1;
        if self.update_count % self.config.target_update_freq == 0 {
            if let Err(e) = self.target.copy_from(self.online.as_ref()) {
                warn!(class = %self.class, error = %e, "target network sync failed");
            } else {
                debug!(class = %self.class, updates = self.update_count, "target network synced");
            }
        }
        self.decay_epsilon();

        let loss = if trained == 0 { 0.0 } else { total_loss / trained as f32 };
        self.metrics.record_update(loss);
        metrics::counter!("combat_rl.policy_updates", 1);
        Some(loss)
    }

    fn is_ready_to_train(&self) -> bool {
        self.buffer.len() >= self.config.min_experiences.max(self.config.batch_size)
    }

    fn set_batch_size(&mut self, batch_size: usize) {
        self.config.batch_size = batch_size.max(1);
    }

    fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    fn metrics(&self) -> &LearningMetrics {
        &self.metrics
    }

    fn metrics_mut(&mut self) -> &mut LearningMetrics {
        &mut self.metrics
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn architecture(&self) -> NetworkArchitecture {
        self.online.architecture().clone()
    }

    fn export_profile(&self, owner_id: &str) -> BehaviorProfile {
        let mut metrics = self.metrics.clone();
        metrics.exploration_rate = self.epsilon;
        BehaviorProfile::new(
            self.class,
            owner_id,
            self.online.architecture().clone(),
            self.online.weights(),
            self.online.biases(),
            metrics,
        )
    }

    fn import_profile(&mut self, profile: &BehaviorProfile) -> Result<()> {
        let architecture = self.online.architecture().clone();
        profile.validate(Some(self.class), Some(&architecture))?;

        if architecture.kind == ApproximatorKind::Dense {
            if profile.architecture.kind != ApproximatorKind::Dense {
                return Err(CombatError::Profile(format!(
                    "cannot load {:?} parameters into a dense network",
                    profile.architecture.kind
                )));
            }
            let previous_weights = self.online.weights();
            self.online.set_weights(&profile.weights)?;
            if let Err(e) = self.online.set_biases(&profile.biases) {
                self.online.set_weights(&previous_weights)?;
                return Err(e);
            }
            self.target.copy_from(self.online.as_ref())?;
        }

        self.epsilon = profile
            .metrics
            .exploration_rate
            .clamp(self.config.epsilon_end, self.config.epsilon_start);
        self.metrics = profile.metrics.clone();
        self.metrics.exploration_rate = self.epsilon;
        Ok(())
    }

    fn memory_footprint(&self) -> usize {
        let floats = std::mem::size_of::<f32>();
        let input = self.online.architecture().input_size;
        let networks = 2 * self.online.parameter_count() * floats;
        let per_experience = std::mem::size_of::<Experience>() + 2 * input * floats;
        std::mem::size_of::<Self>() + networks + self.buffer.len() * per_experience
    }

    fn supports_coordination(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use combat_rl_core::{ActionKind, GroupId, TacticalStrategy};

    const STATE: usize = 6;

    fn config() -> DqnConfig {
        DqnConfig {
            batch_size: 4,
            min_experiences: 4,
            buffer_size: 64,
            network: NetworkConfig {
                hidden_layers: vec![8],
                gradient_clip: 1.0,
            },
            seed: Some(11),
            ..DqnConfig::default()
        }
    }

    fn agent(config: DqnConfig) -> DqnAgent {
        DqnAgent::new(AgentClass::Melee, STATE, config).unwrap()
    }

    fn state(v: f32) -> StateSnapshot {
        StateSnapshot::from_features(vec![v; STATE])
    }

    fn experience(action: usize, reward: f32, terminal: bool) -> Experience {
        Experience::new(state(0.1), action, reward, state(0.2), terminal)
    }

    /// Network whose output is always NaN
    #[derive(Clone)]
    struct BrokenNetwork(NetworkArchitecture);

    impl QNetwork for BrokenNetwork {
        fn architecture(&self) -> &NetworkArchitecture {
            &self.0
        }
        fn forward(&self, _input: &[f32]) -> Result<Vec<f32>> {
            Ok(vec![f32::NAN; self.0.output_size])
        }
        fn backward(&mut self, _input: &[f32], _target: &[f32], _lr: f32) -> Result<f32> {
            Err(CombatError::Network("broken".to_string()))
        }
        fn weights(&self) -> Vec<f32> {
            Vec::new()
        }
        fn set_weights(&mut self, _weights: &[f32]) -> Result<()> {
            Ok(())
        }
        fn biases(&self) -> Vec<f32> {
            Vec::new()
        }
        fn set_biases(&mut self, _biases: &[f32]) -> Result<()> {
            Ok(())
        }
        fn add_noise(&mut self, _scale: f32) {}
        fn reset(&mut self) {}
        fn parameter_count(&self) -> usize {
            0
        }
        fn clone_network(&self) -> Box<dyn QNetwork> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn test_argmax_prefers_first_maximum() {
        assert_eq!(argmax(&[0.5, 2.0, 2.0, 1.0]), 1);
        assert_eq!(argmax(&[3.0]), 0);
        assert_eq!(argmax(&[]), 0);
    }

    #[test]
    fn test_exploitation_matches_network() {
        let mut a = agent(config());
        let s = state(0.3);
        let q = a.q_values(&s).unwrap();
        let expected = argmax(&q);
        for _ in 0..5 {
            assert_eq!(a.select_action(&s, None, false), expected);
        }
        assert_eq!(a.metrics().actions_taken, 5);
    }

    #[test]
    fn test_invalid_output_returns_action_zero() {
        let cfg = config();
        let space = ActionSpace::for_class(AgentClass::Melee);
        let arch = NetworkArchitecture::dense(STATE, vec![8], space.action_count());
        let mut a = DqnAgent::with_network(AgentClass::Melee, cfg, Box::new(BrokenNetwork(arch))).unwrap();
        assert_eq!(a.select_action(&state(0.5), None, false), 0);
        assert_eq!(a.metrics().invalid_outputs, 1);
    }

    #[test]
    fn test_epsilon_after_one_update() {
        let mut a = agent(DqnConfig {
            epsilon_start: 1.0,
            epsilon_decay: 0.99,
            epsilon_end: 0.1,
            batch_size: 1,
            min_experiences: 1,
            ..config()
        });
        assert!(a.store_experience(experience(0, 1.0, true)));
        assert!(a.update_policy().is_some());
        assert_relative_eq!(a.epsilon(), 0.99);
        assert_relative_eq!(a.metrics().exploration_rate, 0.99);
    }

    #[test]
    fn test_epsilon_reaches_floor() {
        let mut a = agent(DqnConfig {
            epsilon_decay: 0.5,
            epsilon_end: 0.1,
            batch_size: 1,
            min_experiences: 1,
            ..config()
        });
        a.store_experience(experience(1, 0.0, false));
        for _ in 0..10 {
            a.update_policy();
        }
        assert_relative_eq!(a.epsilon(), 0.1);
    }

    proptest::proptest! {
        #[test]
        fn prop_epsilon_follows_geometric_decay(
            start in 0.2f32..=1.0,
            decay in 0.5f32..=1.0,
            floor in 0.0f32..0.2,
            steps in 0i32..60,
        ) {
            let mut a = agent(DqnConfig {
                epsilon_start: start,
                epsilon_decay: decay,
                epsilon_end: floor,
                batch_size: 1,
                min_experiences: 1,
                ..config()
            });
            a.store_experience(experience(0, 1.0, false));
            for _ in 0..steps {
                proptest::prop_assert!(a.update_policy().is_some());
            }
            let expected = (start * decay.powi(steps)).max(floor);
            proptest::prop_assert!(
                approx::relative_eq!(a.epsilon(), expected, epsilon = 1e-6, max_relative = 1e-4),
                "epsilon {} after {} steps, expected {}",
                a.epsilon(),
                steps,
                expected
            );
        }
    }

    #[test]
    fn test_update_waits_for_enough_experience() {
        let mut a = agent(config());
        for _ in 0..3 {
            a.store_experience(experience(0, 1.0, false));
        }
        assert!(!a.is_ready_to_train());
        assert!(a.update_policy().is_none());
        a.store_experience(experience(0, 1.0, false));
        assert!(a.is_ready_to_train());
        assert!(a.update_policy().is_some());
        assert_eq!(a.update_count(), 1);
    }

    #[test]
    fn test_no_storage_outside_training() {
        let mut a = agent(config());
        a.set_training(false);
        assert!(!a.store_experience(experience(0, 1.0, false)));
        assert!(a.buffer().is_empty());
        assert!(a.update_policy().is_none());
    }

    #[test]
    fn test_rejects_malformed_experience() {
        let mut a = agent(config());
        let bad = Experience::new(StateSnapshot::zeros(3), 0, 0.0, StateSnapshot::zeros(3), false);
        assert!(!a.store_experience(bad));
        assert!(!a.store_experience(experience(999, 0.0, false)));
    }

    #[test]
    fn test_target_network_syncs_on_schedule() {
        let mut a = agent(DqnConfig {
            target_update_freq: 3,
            batch_size: 1,
            min_experiences: 1,
            learning_rate: 0.05,
            ..config()
        });
        a.store_experience(experience(2, 5.0, true));
        let initial_target = a.target_network().biases();

        a.update_policy();
        a.update_policy();
        assert_eq!(a.target_network().biases(), initial_target);
        assert_ne!(a.online_network().biases(), initial_target);

        a.update_policy();
        assert_eq!(a.target_network().biases(), a.online_network().biases());
        assert_eq!(a.target_network().weights(), a.online_network().weights());
    }

    #[test]
    fn test_learning_moves_q_toward_reward() {
        let mut a = agent(DqnConfig {
            batch_size: 1,
            min_experiences: 1,
            learning_rate: 0.5,
            ..config()
        });
        a.store_experience(experience(3, 2.0, true));
        for _ in 0..300 {
            a.update_policy();
        }
        let q = a.q_values(&state(0.1)).unwrap();
        assert_relative_eq!(q[3], 2.0, epsilon = 0.1);
    }

    #[test]
    fn test_coordination_bias_tips_the_choice() {
        let mut a = agent(config());
        let s = state(0.0);
        let q = a.q_values(&s).unwrap();
        let space = a.action_space().clone();
        let attack = space.indices_of_kind(ActionKind::Attack);
        let best = argmax(&q);
        let best_attack = attack.iter().copied().max_by(|&x, &y| q[x].total_cmp(&q[y])).unwrap();
        let gap = q[best] - q[best_attack];

        let context = CoordinationContext {
            group: Some(GroupId(1)),
            group_size: 2,
            strategy: TacticalStrategy::Crossfire,
            suggested_action: Some(ActionKind::Attack),
            group_success: 1.0,
            ..CoordinationContext::default()
        };
        a.config.coordination_bias = gap + 1.0;
        let chosen = a.select_action(&s, Some(&context), false);
        assert!(attack.contains(&chosen));

        // ungrouped contexts are ignored
        let loose = CoordinationContext {
            group: None,
            ..context
        };
        assert_eq!(a.select_action(&s, Some(&loose), false), best);
    }

    #[test]
    fn test_profile_round_trip() {
        let mut source = agent(DqnConfig {
            batch_size: 1,
            min_experiences: 1,
            ..config()
        });
        source.store_experience(experience(1, 1.0, true));
        source.update_policy();
        let profile = source.export_profile("grunt");
        assert_eq!(profile.weights, source.online_network().weights());

        let mut copy = agent(DqnConfig {
            seed: Some(99),
            ..config()
        });
        copy.import_profile(&profile).unwrap();
        assert_eq!(copy.online_network().weights(), profile.weights);
        assert_eq!(copy.target_network().biases(), profile.biases);
        assert_relative_eq!(copy.epsilon(), source.epsilon());
        assert_eq!(copy.metrics().step_count, 1);
    }

    #[test]
    fn test_import_rejects_foreign_profile() {
        let source = agent(config());
        let mut profile = source.export_profile("grunt");
        profile.agent_class = AgentClass::Ranged;

        let mut target = agent(config());
        let before = target.online_network().weights();
        assert!(target.import_profile(&profile).is_err());
        assert_eq!(target.online_network().weights(), before);
    }

    #[test]
    fn test_unbuildable_network_gives_null_effect_agent() {
        assert_eq!(agent(config()).variant(), AgentVariant::Learned);

        let mut null = DqnAgent::new(AgentClass::Melee, 0, config()).unwrap();
        assert_eq!(null.variant(), AgentVariant::NullEffect);
        assert_eq!(null.select_action(&StateSnapshot::zeros(0), None, false), 0);
        assert!(null.export_profile("slot").weights.is_empty());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        for bad in [
            DqnConfig { gamma: 1.5, ..config() },
            DqnConfig { batch_size: 0, ..config() },
            DqnConfig { epsilon_end: 0.9, epsilon_start: 0.5, ..config() },
            DqnConfig { target_update_freq: 0, ..config() },
        ] {
            assert!(DqnAgent::new(AgentClass::Melee, STATE, bad).is_err());
        }
    }
}
