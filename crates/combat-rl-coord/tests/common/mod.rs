//! Shared helpers for the coordinator integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use combat_rl_agent::{AgentVariant, CombatAgent};
use combat_rl_coord::CombatRlConfig;
use combat_rl_core::{
    ActionSpace, AgentClass, BehaviorProfile, CoordinationContext, Experience, LearningMetrics,
    NetworkArchitecture, Result, StateEncoder, StateSnapshot,
};

/// Calls observed on a [`SpyAgent`]
#[derive(Debug, Default)]
pub struct Calls {
    pub selected: AtomicUsize,
    pub stored: AtomicUsize,
    pub updated: AtomicUsize,
}

impl Calls {
    pub fn stored(&self) -> usize {
        self.stored.load(Ordering::SeqCst)
    }

    pub fn updated(&self) -> usize {
        self.updated.load(Ordering::SeqCst)
    }
}

/// Agent that is always ready to train and counts what the coordinator does
/// with it
pub struct SpyAgent {
    class: AgentClass,
    space: ActionSpace,
    state_size: usize,
    metrics: LearningMetrics,
    training: bool,
    calls: Arc<Calls>,
}

impl SpyAgent {
    pub fn new(class: AgentClass, metrics: LearningMetrics) -> (Box<dyn CombatAgent>, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let agent = Self {
            class,
            space: ActionSpace::for_class(class),
            state_size: StateEncoder::default().state_size(),
            metrics,
            training: false,
            calls: calls.clone(),
        };
        (Box::new(agent), calls)
    }

    pub fn learning(class: AgentClass) -> (Box<dyn CombatAgent>, Arc<Calls>) {
        Self::new(class, LearningMetrics::default())
    }

    pub fn converged(class: AgentClass) -> (Box<dyn CombatAgent>, Arc<Calls>) {
        Self::new(
            class,
            LearningMetrics {
                episode_count: 50,
                exploration_rate: 0.01,
                average_reward: 1.0,
                recent_reward: 1.01,
                ..LearningMetrics::default()
            },
        )
    }
}

impl CombatAgent for SpyAgent {
    fn class(&self) -> AgentClass {
        self.class
    }

    fn variant(&self) -> AgentVariant {
        AgentVariant::Learned
    }

    fn action_space(&self) -> &ActionSpace {
        &self.space
    }

    fn select_action(
        &mut self,
        _state: &StateSnapshot,
        _context: Option<&CoordinationContext>,
        _explore: bool,
    ) -> usize {
        self.calls.selected.fetch_add(1, Ordering::SeqCst);
        0
    }

    fn store_experience(&mut self, _experience: Experience) -> bool {
        self.calls.stored.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn update_policy(&mut self) -> Option<f32> {
        self.calls.updated.fetch_add(1, Ordering::SeqCst);
        Some(0.0)
    }

    fn is_ready_to_train(&self) -> bool {
        true
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
        NetworkArchitecture::dense(self.state_size, vec![4], self.space.action_count())
    }

    fn export_profile(&self, owner_id: &str) -> BehaviorProfile {
        let arch = self.architecture();
        BehaviorProfile::new(
            self.class,
            owner_id,
            arch.clone(),
            vec![0.0; arch.weight_count()],
            vec![0.0; arch.bias_count()],
            self.metrics.clone(),
        )
    }

    fn import_profile(&mut self, profile: &BehaviorProfile) -> Result<()> {
        self.metrics = profile.metrics.clone();
        Ok(())
    }

    fn memory_footprint(&self) -> usize {
        0
    }
}

/// Reference configuration with small learner batches and a per-tick
/// update quota of at most `quota`
pub fn config_with_quota(quota: usize) -> CombatRlConfig {
    let mut config = CombatRlConfig::default();
    config.factory.dqn.batch_size = 4;
    config.factory.dqn.min_experiences = 4;
    config.factory.dqn.seed = Some(11);
    config.coordinator.frame_budget_ms = 1_000.0;
    let table = &mut config.performance.table;
    for row in [&mut table.none, &mut table.low, &mut table.medium, &mut table.high, &mut table.severe] {
        row.max_agents_per_frame = row.max_agents_per_frame.min(quota);
        row.batch_size = row.batch_size.min(4);
    }
    config
}

pub fn zero_state() -> StateSnapshot {
    StateSnapshot::zeros(StateEncoder::default().state_size())
}
