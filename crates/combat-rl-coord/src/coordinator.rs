//! Training coordinator
//!
//! Owns the agent registry, the training mode and the per-tick update
//! scheduler, and is the one place that talks to the profile store. A host
//! drives it once per frame:
//!
//! 1. [`TrainingCoordinator::begin_tick`] runs group maintenance
//! 2. [`TrainingCoordinator::request_action`] for every entity that needs a
//!    decision, then [`TrainingCoordinator::report_outcome`] once the
//!    simulation resolved it
//! 3. [`TrainingCoordinator::end_tick`] samples performance and runs a
//!    bounded slice of policy updates
//!
//! Persistence is async and stays off that path: mode changes, the
//! auto-save timer and lifecycle hooks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use combat_rl_agent::{AgentBuilder, AgentFactory, AgentVariant, CombatAgent};
use combat_rl_core::{
    Action, ActionOutcome, AgentClass, AgentId, CombatError, ConvergenceCriteria, Experience,
    Result, RewardFunction, ShapedCombatReward, StateEncoder, StateSnapshot, Vec2, WorldView,
};
use combat_rl_store::{load_with_recovery, ProfileSource, ProfileStore};

use crate::config::CombatRlConfig;
use crate::coordination::{CoordinationLayer, MaintenanceReport};
use crate::performance::{
    DegradationLevel, DegradationSettings, FrameSample, PerformanceMonitor, PerformanceStatus,
};

/// Which agents learn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingMode {
    /// Every agent trains
    #[default]
    Training,
    /// No agent trains; selection always exploits
    Inference,
    /// Agents train until their metrics converge
    Mixed,
}

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Mode at start-up
    pub mode: TrainingMode,
    /// Wall-clock budget for the update slice of one tick
    pub frame_budget_ms: f64,
    /// Seconds between automatic saves, 0 disables
    pub autosave_interval_secs: u64,
    /// Reload every profile after a mode change
    pub reload_after_mode_change: bool,
    /// When an agent counts as converged in mixed mode
    pub convergence: ConvergenceCriteria,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            mode: TrainingMode::Training,
            frame_budget_ms: 2.0,
            autosave_interval_secs: 300,
            reload_after_mode_change: false,
            convergence: ConvergenceCriteria::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Reject budgets the scheduler cannot honour
    pub fn validate(&self) -> Result<()> {
        if !(self.frame_budget_ms.is_finite() && self.frame_budget_ms >= 0.0) {
            return Err(CombatError::Config("frame_budget_ms must be a non-negative number".into()));
        }
        Ok(())
    }

    fn frame_budget(&self) -> Duration {
        Duration::from_secs_f64(self.frame_budget_ms.max(0.0) / 1000.0)
    }
}

/// Outcome of saving every profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveReport {
    /// Agents saved, with the stored revision
    pub saved: Vec<(AgentId, u64)>,
    /// Agents with nothing learned to save
    pub skipped: Vec<AgentId>,
    /// Agents whose save failed
    pub failed: Vec<(AgentId, String)>,
}

impl SaveReport {
    /// Whether every learning agent was saved
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of loading every profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    /// Agents that received a profile, and where it came from
    pub loaded: Vec<(AgentId, ProfileSource)>,
    /// Agents with nothing learned to load
    pub skipped: Vec<AgentId>,
    /// Agents that kept their current state because the profile did not fit
    pub failed: Vec<(AgentId, String)>,
    /// Agents whose stored copies were damaged on the way
    pub recovered: Vec<AgentId>,
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Tick number
    pub tick: u64,
    /// Agents whose policy was updated, in scheduling order
    pub updated: Vec<AgentId>,
    /// Agents ready to train that were not reached this tick
    pub deferred: usize,
    /// Whether the time budget ended the slice
    pub budget_exhausted: bool,
    /// New settings when the degradation level changed
    pub degradation: Option<DegradationSettings>,
    /// Whether the auto-save interval has elapsed
    pub autosave_due: bool,
}

/// Registry-wide numbers for hosts and dashboards
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    /// Current mode
    pub mode: TrainingMode,
    /// Registered agents
    pub agents: usize,
    /// Agents with a working learner
    pub learned: usize,
    /// Rule-based fallbacks
    pub rule_based: usize,
    /// Agents running on the null-effect network
    pub null_effect: usize,
    /// Agents currently training
    pub training: usize,
    /// Mean smoothed episode reward
    pub mean_recent_reward: f32,
    /// Mean exploration rate of learning agents
    pub mean_exploration_rate: f32,
    /// Policy updates across all agents
    pub total_policy_updates: u64,
    /// Episodes across all agents
    pub total_episodes: u64,
    /// Live coordination groups
    pub active_groups: usize,
    /// Degradation level in force
    pub degradation_level: DegradationLevel,
    /// Estimated memory in bytes
    pub memory_estimate: usize,
}

#[derive(Debug, Clone)]
struct PendingDecision {
    state: StateSnapshot,
    action_index: usize,
    action: Action,
}

struct AgentSlot {
    agent: Box<dyn CombatAgent>,
    owner_id: String,
    pending: Option<PendingDecision>,
    episode_steps: u32,
}

fn should_train(mode: TrainingMode, criteria: &ConvergenceCriteria, agent: &dyn CombatAgent) -> bool {
    if !agent.variant().learns() {
        return false;
    }
    match mode {
        TrainingMode::Training => true,
        TrainingMode::Inference => false,
        TrainingMode::Mixed => !agent.metrics().is_converged(criteria),
    }
}

/// Registry, scheduler and persistence authority for combat agents
pub struct TrainingCoordinator {
    config: CoordinatorConfig,
    mode: TrainingMode,
    factory: AgentFactory,
    encoder: StateEncoder,
    rewards: HashMap<AgentClass, Box<dyn RewardFunction>>,
    agents: IndexMap<AgentId, AgentSlot>,
    coordination: CoordinationLayer,
    monitor: PerformanceMonitor,
    store: Arc<dyn ProfileStore>,
    cursor: usize,
    tick: u64,
    next_agent: u64,
    last_save: Instant,
}

impl std::fmt::Debug for TrainingCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingCoordinator")
            .field("mode", &self.mode)
            .field("agents", &self.agents.len())
            .field("groups", &self.coordination.group_count())
            .field("level", &self.monitor.level())
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}

impl TrainingCoordinator {
    /// Build a coordinator from a validated configuration
    pub fn new(config: CombatRlConfig, store: Arc<dyn ProfileStore>) -> Result<Self> {
        config.validate()?;
        let encoder = StateEncoder::new(config.encoder.clone());
        let factory = AgentFactory::new(config.factory.clone(), encoder.state_size());
        let rewards = AgentClass::ALL
            .into_iter()
            .map(|class| {
                let reward: Box<dyn RewardFunction> =
                    Box::new(ShapedCombatReward::new(config.rewards.get(class).clone()));
                (class, reward)
            })
            .collect();
        let mode = config.coordinator.mode;
        info!(?mode, state_size = encoder.state_size(), "training coordinator ready");
        Ok(Self {
            mode,
            factory,
            encoder,
            rewards,
            agents: IndexMap::new(),
            coordination: CoordinationLayer::new(config.coordination),
            monitor: PerformanceMonitor::new(config.performance),
            store,
            cursor: 0,
            tick: 0,
            next_agent: 0,
            last_save: Instant::now(),
            config: config.coordinator,
        })
    }

    /// Replace how learned agents are built
    #[must_use]
    pub fn with_agent_builder(mut self, builder: AgentBuilder) -> Self {
        let config = self.factory.config().clone();
        self.factory = AgentFactory::with_builder(config, self.encoder.state_size(), builder);
        self
    }

    /// Replace the reward function of a class
    #[must_use]
    pub fn with_reward(mut self, class: AgentClass, reward: Box<dyn RewardFunction>) -> Self {
        self.rewards.insert(class, reward);
        self
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    /// Create an agent for `class` and schedule it. Always succeeds; the
    /// factory falls back to a rule-based agent when construction fails.
    pub fn register_agent(&mut self, class: AgentClass, owner_id: impl Into<String>, position: Vec2) -> AgentId {
        let agent = self.factory.create(class);
        self.insert(agent, owner_id.into(), position)
    }

    /// Schedule an agent built by the host
    pub fn register_custom_agent(
        &mut self,
        agent: Box<dyn CombatAgent>,
        owner_id: impl Into<String>,
        position: Vec2,
    ) -> Result<AgentId> {
        let expected = self.encoder.state_size();
        let actual = agent.architecture().input_size;
        if actual != expected {
            return Err(CombatError::DimensionMismatch { expected, actual });
        }
        Ok(self.insert(agent, owner_id.into(), position))
    }

    fn insert(&mut self, mut agent: Box<dyn CombatAgent>, owner_id: String, position: Vec2) -> AgentId {
        let id = AgentId(self.next_agent);
        self.next_agent += 1;

        agent.set_batch_size(self.monitor.settings().batch_size);
        agent.set_training(should_train(self.mode, &self.config.convergence, agent.as_ref()));
        let class = agent.class();
        self.coordination.register(id, class, position);
        info!(agent = %id, class = %class, owner = %owner_id, variant = ?agent.variant(), "agent registered");
        self.agents.insert(
            id,
            AgentSlot {
                agent,
                owner_id,
                pending: None,
                episode_steps: 0,
            },
        );
        self.record_agent_gauge();
        id
    }

    /// Remove an agent without saving it. The agent is handed back.
    pub fn unregister_agent(&mut self, id: AgentId) -> Result<Box<dyn CombatAgent>> {
        let (index, _, slot) = self.agents.shift_remove_full(&id).ok_or(CombatError::UnknownAgent(id))?;
        self.coordination.unregister(id);
        // Later agents shifted down one slot; keep the cursor on the same agent
        if index < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.agents.len() {
            self.cursor = 0;
        }
        info!(agent = %id, owner = %slot.owner_id, "agent unregistered");
        self.record_agent_gauge();
        Ok(slot.agent)
    }

    /// Save an agent's profile, then remove it
    pub async fn retire_agent(&mut self, id: AgentId) -> Result<Option<u64>> {
        let slot = self.agents.get(&id).ok_or(CombatError::UnknownAgent(id))?;
        let revision = if slot.agent.variant().learns() {
            let profile = slot.agent.export_profile(&slot.owner_id);
            Some(self.store.save(&profile).await?)
        } else {
            None
        };
        self.unregister_agent(id)?;
        Ok(revision)
    }

    /// Move an agent
    pub fn set_position(&mut self, id: AgentId, position: Vec2) -> Result<()> {
        self.coordination.update_position(id, position)
    }

    fn record_agent_gauge(&self) {
        #[allow(clippy::cast_precision_loss)]
        let active = self.agents.len() as f64;
        metrics::gauge!("combat_rl.active_agents", active);
    }

    // ------------------------------------------------------------------
    // Decision path
    // ------------------------------------------------------------------

    /// Encode `view` and pick an action for the agent
    pub fn request_action(&mut self, id: AgentId, view: &WorldView) -> Result<Action> {
        self.coordination.update_position(id, view.position)?;
        let state = self.encoder.encode(view);
        self.request_action_for_state(id, state)
    }

    /// Pick an action for an already encoded state
    pub fn request_action_for_state(&mut self, id: AgentId, state: StateSnapshot) -> Result<Action> {
        let context = self.coordination.context_for(id)?;
        let slot = self.agents.get_mut(&id).ok_or(CombatError::UnknownAgent(id))?;
        let explore = should_train(self.mode, &self.config.convergence, slot.agent.as_ref());

        let index = slot.agent.select_action(&state, Some(&context), explore);
        let action = slot.agent.action(index);
        if slot.pending.is_some() {
            debug!(agent = %id, "previous decision had no reported outcome");
        }
        slot.pending = Some(PendingDecision {
            state,
            action_index: index,
            action,
        });
        Ok(action)
    }

    /// Resolve the agent's pending decision with what the simulation
    /// reported. Returns the reward, or `None` when nothing was pending.
    pub fn report_outcome(&mut self, id: AgentId, outcome: &ActionOutcome, next_view: &WorldView) -> Result<Option<f32>> {
        self.coordination.update_position(id, next_view.position)?;
        let next_state = self.encoder.encode(next_view);
        self.report_outcome_for_state(id, outcome, next_state)
    }

    /// [`TrainingCoordinator::report_outcome`] for an already encoded state
    pub fn report_outcome_for_state(
        &mut self,
        id: AgentId,
        outcome: &ActionOutcome,
        next_state: StateSnapshot,
    ) -> Result<Option<f32>> {
        let slot = self.agents.get_mut(&id).ok_or(CombatError::UnknownAgent(id))?;
        let Some(pending) = slot.pending.take() else {
            debug!(agent = %id, "outcome reported without a pending decision");
            return Ok(None);
        };

        let class = slot.agent.class();
        let reward = self
            .rewards
            .get(&class)
            .map_or(0.0, |r| r.reward(&pending.state, &pending.action, &next_state, outcome));

        let stats = slot.agent.metrics_mut();
        stats.record_reward(reward);
        stats.record_outcome(outcome);
        if let Some(success) = outcome.coordination {
            stats.record_coordination(success);
            self.coordination.report_outcome(id, success, reward);
        }
        slot.episode_steps = slot.episode_steps.saturating_add(1);

        if should_train(self.mode, &self.config.convergence, slot.agent.as_ref()) {
            slot.agent.store_experience(Experience::new(
                pending.state,
                pending.action_index,
                reward,
                next_state,
                false,
            ));
        }
        Ok(Some(reward))
    }

    /// Close the agent's episode. A pending decision becomes the terminal
    /// transition. Returns the terminal reward.
    pub fn end_episode(&mut self, id: AgentId, final_view: &WorldView, killed_by_opponent: bool) -> Result<f32> {
        let final_state = self.encoder.encode(final_view);
        self.end_episode_for_state(id, final_state, killed_by_opponent)
    }

    /// [`TrainingCoordinator::end_episode`] for an already encoded state
    pub fn end_episode_for_state(
        &mut self,
        id: AgentId,
        final_state: StateSnapshot,
        killed_by_opponent: bool,
    ) -> Result<f32> {
        let slot = self.agents.get_mut(&id).ok_or(CombatError::UnknownAgent(id))?;
        let class = slot.agent.class();
        let terminal = self
            .rewards
            .get(&class)
            .map_or(0.0, |r| r.terminal_reward(&final_state, slot.episode_steps, killed_by_opponent));

        let trains = should_train(self.mode, &self.config.convergence, slot.agent.as_ref());
        if let Some(pending) = slot.pending.take() {
            if trains {
                slot.agent.store_experience(Experience::new(
                    pending.state,
                    pending.action_index,
                    terminal,
                    final_state,
                    true,
                ));
            }
        }

        let stats = slot.agent.metrics_mut();
        stats.record_reward(terminal);
        stats.finish_episode();
        debug!(
            agent = %id,
            steps = slot.episode_steps,
            reward = slot.agent.metrics().recent_reward,
            killed = killed_by_opponent,
            "episode finished"
        );
        slot.episode_steps = 0;
        metrics::counter!("combat_rl.episodes", 1);

        let still_trains = should_train(self.mode, &self.config.convergence, slot.agent.as_ref());
        if still_trains != slot.agent.is_training() {
            if !still_trains {
                info!(agent = %id, episodes = slot.agent.metrics().episode_count, "agent converged, training stopped");
            }
            slot.agent.set_training(still_trains);
        }
        Ok(terminal)
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Group maintenance; run before any decision of the tick
    pub fn begin_tick(&mut self) -> MaintenanceReport {
        let report = self.coordination.maintain();
        let weight = self.coordination.config().feedback_weight;
        for (id, score) in &report.feedback {
            if let Some(slot) = self.agents.get_mut(id) {
                slot.agent.metrics_mut().blend_coordination(*score, weight);
            }
        }
        report
    }

    /// Sample performance and run a bounded slice of policy updates.
    ///
    /// `memory_bytes` is the host's measurement; without one the
    /// coordinator's own estimate is used.
    pub fn end_tick(&mut self, frame_time: Duration, memory_bytes: Option<u64>) -> TickReport {
        let tick = self.tick;
        self.tick += 1;

        let sample = FrameSample {
            frame_time,
            memory_bytes: memory_bytes.unwrap_or_else(|| self.memory_estimate() as u64),
            agent_count: self.agents.len(),
        };
        let degradation = self.monitor.observe(tick, sample);
        if let Some(settings) = degradation {
            self.apply_settings(settings);
        }

        let settings = self.monitor.settings();
        let mut report = TickReport {
            tick,
            degradation,
            autosave_due: self.autosave_due(),
            ..TickReport::default()
        };
        if tick % settings.update_interval.max(1) == 0 {
            self.run_update_slice(settings.max_agents_per_frame, &mut report);
        }
        report
    }

    /// [`TrainingCoordinator::begin_tick`] then [`TrainingCoordinator::end_tick`]
    pub fn tick(&mut self, frame_time: Duration, memory_bytes: Option<u64>) -> TickReport {
        self.begin_tick();
        self.end_tick(frame_time, memory_bytes)
    }

    fn run_update_slice(&mut self, quota: usize, report: &mut TickReport) {
        let n = self.agents.len();
        if n == 0 || quota == 0 {
            return;
        }
        let budget = self.config.frame_budget();
        let started = Instant::now();
        let mut visited = 0;

        while visited < n && report.updated.len() < quota {
            let index = (self.cursor + visited) % n;
            visited += 1;
            let Some((id, slot)) = self.agents.get_index_mut(index) else {
                break;
            };
            if !should_train(self.mode, &self.config.convergence, slot.agent.as_ref())
                || !slot.agent.is_ready_to_train()
            {
                continue;
            }
            if slot.agent.update_policy().is_some() {
                report.updated.push(*id);
            }
            if started.elapsed() >= budget {
                report.budget_exhausted = true;
                break;
            }
        }

        report.deferred = (visited..n)
            .filter_map(|offset| self.agents.get_index((self.cursor + offset) % n))
            .filter(|(_, slot)| {
                should_train(self.mode, &self.config.convergence, slot.agent.as_ref())
                    && slot.agent.is_ready_to_train()
            })
            .count();
        self.cursor = (self.cursor + visited) % n;

        if report.budget_exhausted && report.deferred > 0 {
            debug!(tick = report.tick, updated = report.updated.len(), deferred = report.deferred, "frame budget exhausted");
        }
    }

    fn apply_settings(&mut self, settings: DegradationSettings) {
        for slot in self.agents.values_mut() {
            slot.agent.set_batch_size(settings.batch_size);
        }
        info!(
            level = ?settings.level,
            batch = settings.batch_size,
            quota = settings.max_agents_per_frame,
            interval = settings.update_interval,
            "degradation settings adopted"
        );
    }

    // ------------------------------------------------------------------
    // Modes and persistence
    // ------------------------------------------------------------------

    /// Switch training mode. Every profile is saved first.
    pub async fn set_training_mode(&mut self, mode: TrainingMode) -> SaveReport {
        if mode == self.mode {
            return SaveReport::default();
        }
        let report = self.save_all_profiles().await;
        if !report.is_complete() {
            warn!(failed = report.failed.len(), "some profiles were not saved before the mode change");
        }

        let previous = self.mode;
        self.mode = mode;
        self.apply_training_flags();
        info!(from = ?previous, to = ?mode, saved = report.saved.len(), "training mode changed");

        if self.config.reload_after_mode_change {
            let loaded = self.load_all_profiles().await;
            debug!(loaded = loaded.loaded.len(), failed = loaded.failed.len(), "profiles reloaded after mode change");
        }
        report
    }

    fn apply_training_flags(&mut self) {
        for slot in self.agents.values_mut() {
            let trains = should_train(self.mode, &self.config.convergence, slot.agent.as_ref());
            slot.agent.set_training(trains);
        }
    }

    /// Save the profile of every learning agent
    pub async fn save_all_profiles(&mut self) -> SaveReport {
        let mut report = SaveReport::default();
        for (id, slot) in &self.agents {
            if !slot.agent.variant().learns() {
                report.skipped.push(*id);
                continue;
            }
            let profile = slot.agent.export_profile(&slot.owner_id);
            match self.store.save(&profile).await {
                Ok(revision) => report.saved.push((*id, revision)),
                Err(e) => {
                    warn!(agent = %id, owner = %slot.owner_id, error = %e, "profile save failed");
                    report.failed.push((*id, e.to_string()));
                }
            }
        }
        self.last_save = Instant::now();
        metrics::counter!("combat_rl.profile_saves", report.saved.len() as u64);
        info!(saved = report.saved.len(), skipped = report.skipped.len(), failed = report.failed.len(), "profiles saved");
        report
    }

    /// Load the profile of every learning agent through the recovery chain
    pub async fn load_all_profiles(&mut self) -> LoadReport {
        let mut report = LoadReport::default();
        let mode = self.mode;
        let criteria = &self.config.convergence;
        let store = self.store.as_ref();

        for (id, slot) in &mut self.agents {
            if !slot.agent.variant().learns() {
                report.skipped.push(*id);
                continue;
            }
            let class = slot.agent.class();
            let expected = slot.agent.architecture();
            let recovered = {
                let agent = slot.agent.as_ref();
                let owner = slot.owner_id.as_str();
                load_with_recovery(store, class, owner, Some(&expected), || agent.export_profile(owner)).await
            };
            if recovered.had_corruption() {
                report.recovered.push(*id);
            }
            if recovered.source != ProfileSource::Fresh {
                if let Err(e) = slot.agent.import_profile(&recovered.profile) {
                    warn!(agent = %id, source = ?recovered.source, error = %e, "recovered profile rejected, keeping current state");
                    report.failed.push((*id, e.to_string()));
                    continue;
                }
            }
            let trains = should_train(mode, criteria, slot.agent.as_ref());
            slot.agent.set_training(trains);
            report.loaded.push((*id, recovered.source));
        }

        let batch = self.monitor.settings().batch_size;
        for slot in self.agents.values_mut() {
            slot.agent.set_batch_size(batch);
        }
        info!(loaded = report.loaded.len(), recovered = report.recovered.len(), failed = report.failed.len(), "profiles loaded");
        report
    }

    fn autosave_due(&self) -> bool {
        self.config.autosave_interval_secs > 0
            && self.last_save.elapsed() >= Duration::from_secs(self.config.autosave_interval_secs)
    }

    /// Save when the auto-save interval has elapsed
    pub async fn flush_autosave(&mut self) -> Option<SaveReport> {
        if !self.autosave_due() {
            return None;
        }
        debug!("auto-save interval elapsed");
        Some(self.save_all_profiles().await)
    }

    /// Lifecycle hook for the host moving to the background
    pub async fn on_application_background(&mut self) -> SaveReport {
        info!("application backgrounded, saving profiles");
        self.save_all_profiles().await
    }

    /// Save everything and tear the coordinator down
    pub async fn shutdown(mut self) -> SaveReport {
        let report = self.save_all_profiles().await;
        info!(agents = self.agents.len(), "training coordinator shut down");
        report
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Current mode
    #[must_use]
    pub fn mode(&self) -> TrainingMode {
        self.mode
    }

    /// Look up an agent
    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<&dyn CombatAgent> {
        self.agents.get(&id).map(|slot| slot.agent.as_ref())
    }

    /// Owner id of an agent
    #[must_use]
    pub fn owner_of(&self, id: AgentId) -> Option<&str> {
        self.agents.get(&id).map(|slot| slot.owner_id.as_str())
    }

    /// Registered agents in registration order
    pub fn agent_ids(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.agents.keys().copied()
    }

    /// Registered agent count
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Whether the agent currently trains
    #[must_use]
    pub fn is_training(&self, id: AgentId) -> bool {
        self.agents
            .get(&id)
            .is_some_and(|slot| should_train(self.mode, &self.config.convergence, slot.agent.as_ref()))
    }

    /// Coordination layer
    #[must_use]
    pub fn coordination(&self) -> &CoordinationLayer {
        &self.coordination
    }

    /// Agent factory
    #[must_use]
    pub fn factory(&self) -> &AgentFactory {
        &self.factory
    }

    /// State encoder
    #[must_use]
    pub fn encoder(&self) -> &StateEncoder {
        &self.encoder
    }

    /// Degradation settings in force
    #[must_use]
    pub fn settings(&self) -> DegradationSettings {
        self.monitor.settings()
    }

    /// Force a degradation level, e.g. from a host-side quality setting
    pub fn apply_degradation(&mut self, level: DegradationLevel) -> DegradationSettings {
        let settings = self.monitor.apply_level(level);
        self.apply_settings(settings);
        settings
    }

    /// Receive degradation transitions
    #[must_use]
    pub fn subscribe_degradation(&self) -> watch::Receiver<DegradationSettings> {
        self.monitor.subscribe()
    }

    /// Performance statistics
    #[must_use]
    pub fn performance_status(&self) -> PerformanceStatus {
        self.monitor.status()
    }

    /// Ticks run so far
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Estimated heap usage of agents and pending decisions
    #[must_use]
    pub fn memory_estimate(&self) -> usize {
        self.agents
            .values()
            .map(|slot| {
                slot.agent.memory_footprint()
                    + slot.owner_id.len()
                    + slot
                        .pending
                        .as_ref()
                        .map_or(0, |p| p.state.len() * std::mem::size_of::<f32>())
            })
            .sum()
    }

    /// Registry-wide metrics
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn aggregate_metrics(&self) -> AggregateMetrics {
        let mut aggregate = AggregateMetrics {
            mode: self.mode,
            agents: self.agents.len(),
            active_groups: self.coordination.group_count(),
            degradation_level: self.monitor.level(),
            memory_estimate: self.memory_estimate(),
            ..AggregateMetrics::default()
        };
        let mut reward_sum = 0.0;
        let mut exploration_sum = 0.0;
        for slot in self.agents.values() {
            let agent = slot.agent.as_ref();
            let metrics = agent.metrics();
            match agent.variant() {
                AgentVariant::Learned => {
                    aggregate.learned += 1;
                    exploration_sum += metrics.exploration_rate;
                }
                AgentVariant::RuleBased => aggregate.rule_based += 1,
                AgentVariant::NullEffect => aggregate.null_effect += 1,
            }
            if should_train(self.mode, &self.config.convergence, agent) {
                aggregate.training += 1;
            }
            reward_sum += metrics.recent_reward;
            aggregate.total_policy_updates += metrics.step_count;
            aggregate.total_episodes += metrics.episode_count;
        }
        if aggregate.agents > 0 {
            aggregate.mean_recent_reward = reward_sum / aggregate.agents as f32;
        }
        if aggregate.learned > 0 {
            aggregate.mean_exploration_rate = exploration_sum / aggregate.learned as f32;
        }
        aggregate
    }
}
