//! Proximity grouping of same-class agents
//!
//! The layer only knows agents by [`AgentId`]; removing an agent removes its
//! index entries and never leaves a group pointing at it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use combat_rl_core::{
    AgentClass, AgentId, CombatError, CoordinationContext, Formation, GroupId, NearbyAlly, Result,
    TacticalStrategy, Vec2,
};

/// Coordination layer sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Two agents closer than this can group
    pub radius: f32,
    /// Largest group allowed
    pub max_group_size: usize,
    /// Members further than `cohesion_factor * radius` from the centroid
    /// dissolve their group
    pub cohesion_factor: f32,
    /// Smoothing of the group success score
    pub success_smoothing: f32,
    /// Maintenance passes between feedback rounds
    pub feedback_interval: u64,
    /// Share of the group score blended into each member
    pub feedback_weight: f32,
    /// Allies listed in a context
    pub max_nearby: usize,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            radius: 10.0,
            max_group_size: 6,
            cohesion_factor: 1.5,
            success_smoothing: 0.1,
            feedback_interval: 30,
            feedback_weight: 0.2,
            max_nearby: 3,
        }
    }
}

impl CoordinationConfig {
    /// Reject values the layer cannot work with
    pub fn validate(&self) -> Result<()> {
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(CombatError::Config("coordination radius must be positive".into()));
        }
        if self.max_group_size < 2 {
            return Err(CombatError::Config("max_group_size must be at least 2".into()));
        }
        if self.cohesion_factor < 1.0 {
            return Err(CombatError::Config("cohesion_factor must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.success_smoothing) || !(0.0..=1.0).contains(&self.feedback_weight) {
            return Err(CombatError::Config(
                "success_smoothing and feedback_weight must lie in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// A cluster of same-class agents sharing a strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationGroup {
    /// Group id
    pub id: GroupId,
    /// Class of every member
    pub class: AgentClass,
    /// Members in joining order
    pub members: Vec<AgentId>,
    /// Formation tag
    pub formation: Formation,
    /// Strategy tag
    pub strategy: TacticalStrategy,
    /// Mean member position at the last maintenance pass
    pub centroid: Vec2,
    /// Smoothed coordination success in [0, 1]
    pub success: f32,
    /// Sum of rewards reported by members
    pub total_reward: f32,
    /// Reported coordinated outcomes
    pub outcomes: u64,
    /// Successful coordinated outcomes
    pub successes: u64,
}

impl CoordinationGroup {
    fn new(id: GroupId, class: AgentClass, members: Vec<AgentId>) -> Self {
        let strategy = TacticalStrategy::for_group(class, members.len());
        Self {
            id,
            class,
            members,
            formation: strategy.formation(),
            strategy,
            centroid: Vec2::ZERO,
            success: 0.5,
            total_reward: 0.0,
            outcomes: 0,
            successes: 0,
        }
    }

    /// Member count
    #[must_use]
    pub fn size(&self) -> usize {
        self.members.len()
    }

    fn rederive(&mut self) {
        let strategy = TacticalStrategy::for_group(self.class, self.members.len());
        if strategy != self.strategy {
            debug!(group = %self.id, from = ?self.strategy, to = ?strategy, size = self.members.len(), "group strategy changed");
        }
        self.strategy = strategy;
        self.formation = strategy.formation();
    }
}

#[derive(Debug, Clone)]
struct Member {
    class: AgentClass,
    position: Vec2,
    group: Option<GroupId>,
}

/// What a maintenance pass changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaintenanceReport {
    /// Groups created this pass
    pub formed: Vec<GroupId>,
    /// Agents that joined an existing group
    pub joined: Vec<(AgentId, GroupId)>,
    /// Groups disbanded this pass
    pub dissolved: Vec<GroupId>,
    /// Group scores to blend into members, present on feedback passes
    pub feedback: Vec<(AgentId, f32)>,
}

impl MaintenanceReport {
    /// Whether the pass changed any membership
    #[must_use]
    pub fn changed(&self) -> bool {
        !(self.formed.is_empty() && self.joined.is_empty() && self.dissolved.is_empty())
    }
}

/// Groups agents by class and proximity and hands out coordination contexts
#[derive(Debug, Default)]
pub struct CoordinationLayer {
    config: CoordinationConfig,
    agents: IndexMap<AgentId, Member>,
    groups: IndexMap<GroupId, CoordinationGroup>,
    next_group: u64,
    passes: u64,
}

impl CoordinationLayer {
    /// Create an empty layer
    #[must_use]
    pub fn new(config: CoordinationConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Layer configuration
    #[must_use]
    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    /// Track an agent. Re-registering updates class and position.
    pub fn register(&mut self, id: AgentId, class: AgentClass, position: Vec2) {
        if self.agents.contains_key(&id) {
            self.unregister(id);
        }
        self.agents.insert(
            id,
            Member {
                class,
                position,
                group: None,
            },
        );
    }

    /// Stop tracking an agent. A group left with fewer than two members is
    /// disbanded at once.
    pub fn unregister(&mut self, id: AgentId) -> bool {
        let Some(member) = self.agents.shift_remove(&id) else {
            return false;
        };
        if let Some(gid) = member.group {
            let too_small = match self.groups.get_mut(&gid) {
                Some(group) => {
                    group.members.retain(|m| *m != id);
                    group.rederive();
                    group.members.len() < 2
                }
                None => false,
            };
            if too_small {
                self.dissolve(gid);
            }
        }
        true
    }

    /// Move a tracked agent
    pub fn update_position(&mut self, id: AgentId, position: Vec2) -> Result<()> {
        let member = self.agents.get_mut(&id).ok_or(CombatError::UnknownAgent(id))?;
        if position.is_finite() {
            member.position = position;
        }
        Ok(())
    }

    /// Tracked agents
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Live groups
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Look up a group
    #[must_use]
    pub fn group(&self, id: GroupId) -> Option<&CoordinationGroup> {
        self.groups.get(&id)
    }

    /// Group of an agent
    #[must_use]
    pub fn group_of(&self, id: AgentId) -> Option<&CoordinationGroup> {
        self.agents
            .get(&id)
            .and_then(|m| m.group)
            .and_then(|gid| self.groups.get(&gid))
    }

    /// All live groups in creation order
    pub fn groups(&self) -> impl Iterator<Item = &CoordinationGroup> {
        self.groups.values()
    }

    /// Maintenance passes run so far
    #[must_use]
    pub fn passes(&self) -> u64 {
        self.passes
    }

    fn centroid_of(&self, members: &[AgentId]) -> Option<Vec2> {
        Vec2::centroid(members.iter().filter_map(|id| self.agents.get(id).map(|m| m.position)))
    }

    fn dissolve(&mut self, gid: GroupId) {
        if let Some(group) = self.groups.shift_remove(&gid) {
            for id in &group.members {
                if let Some(member) = self.agents.get_mut(id) {
                    member.group = None;
                }
            }
            info!(group = %gid, class = %group.class, size = group.members.len(), "coordination group dissolved");
        }
    }

    /// One maintenance pass: disband broken groups, let loose agents join
    /// nearby groups, cluster the rest, and re-derive strategies of groups
    /// whose size changed.
    pub fn maintain(&mut self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        let limit = self.config.radius * self.config.cohesion_factor;

        // Dissolution
        let mut broken = Vec::new();
        for (gid, group) in &self.groups {
            let live: Vec<AgentId> = group
                .members
                .iter()
                .copied()
                .filter(|id| self.agents.contains_key(id))
                .collect();
            let centroid = self.centroid_of(&live);
            let dispersed = centroid.map_or(true, |c| {
                live.iter()
                    .filter_map(|id| self.agents.get(id))
                    .any(|m| m.position.distance(c) > limit)
            });
            if live.len() < 2 || dispersed {
                broken.push(*gid);
            }
        }
        for gid in broken {
            self.dissolve(gid);
            report.dissolved.push(gid);
        }

        // Joining existing groups
        let loose: Vec<AgentId> = self
            .agents
            .iter()
            .filter(|(_, m)| m.group.is_none())
            .map(|(id, _)| *id)
            .collect();
        let mut resized = Vec::new();
        for id in &loose {
            let Some(member) = self.agents.get(id) else { continue };
            let (class, position) = (member.class, member.position);
            let target = self
                .groups
                .values()
                .filter(|g| g.class == class && g.members.len() < self.config.max_group_size)
                .filter_map(|g| {
                    g.members
                        .iter()
                        .filter_map(|m| self.agents.get(m))
                        .map(|m| m.position.distance(position))
                        .filter(|d| *d <= self.config.radius)
                        .min_by(f32::total_cmp)
                        .map(|d| (g.id, d))
                })
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(gid, _)| gid);
            if let Some(gid) = target {
                if let Some(group) = self.groups.get_mut(&gid) {
                    group.members.push(*id);
                }
                if let Some(member) = self.agents.get_mut(id) {
                    member.group = Some(gid);
                }
                report.joined.push((*id, gid));
                if !resized.contains(&gid) {
                    resized.push(gid);
                }
            }
        }

        // Greedy clustering of whoever is still loose
        for class in AgentClass::ALL {
            let mut pool: Vec<(AgentId, Vec2)> = self
                .agents
                .iter()
                .filter(|(_, m)| m.group.is_none() && m.class == class)
                .map(|(id, m)| (*id, m.position))
                .collect();
            while !pool.is_empty() {
                let mut cluster = vec![pool.remove(0)];
                let mut i = 0;
                while i < pool.len() && cluster.len() < self.config.max_group_size {
                    let candidate = pool[i].1;
                    if cluster.iter().any(|(_, p)| p.distance(candidate) <= self.config.radius) {
                        cluster.push(pool.remove(i));
                        i = 0;
                    } else {
                        i += 1;
                    }
                }
                if cluster.len() < 2 {
                    continue;
                }
                let gid = GroupId(self.next_group);
                self.next_group += 1;
                let members: Vec<AgentId> = cluster.iter().map(|(id, _)| *id).collect();
                for id in &members {
                    if let Some(member) = self.agents.get_mut(id) {
                        member.group = Some(gid);
                    }
                }
                let group = CoordinationGroup::new(gid, class, members);
                info!(group = %gid, class = %class, size = group.size(), strategy = ?group.strategy, "coordination group formed");
                self.groups.insert(gid, group);
                report.formed.push(gid);
            }
        }

        for gid in resized {
            if let Some(group) = self.groups.get_mut(&gid) {
                group.rederive();
            }
        }

        let centroids: Vec<(GroupId, Vec2)> = self
            .groups
            .iter()
            .filter_map(|(gid, g)| self.centroid_of(&g.members).map(|c| (*gid, c)))
            .collect();
        for (gid, centroid) in centroids {
            if let Some(group) = self.groups.get_mut(&gid) {
                group.centroid = centroid;
            }
        }

        self.passes += 1;
        if self.config.feedback_interval > 0 && self.passes % self.config.feedback_interval == 0 {
            report.feedback = self
                .groups
                .values()
                .filter(|g| g.outcomes > 0)
                .flat_map(|g| g.members.iter().map(move |id| (*id, g.success)))
                .collect();
        }

        #[allow(clippy::cast_precision_loss)]
        let active = self.groups.len() as f64;
        metrics::gauge!("combat_rl.active_groups", active);
        report
    }

    /// Advisory context for an agent's next decision
    pub fn context_for(&self, id: AgentId) -> Result<CoordinationContext> {
        let member = self.agents.get(&id).ok_or(CombatError::UnknownAgent(id))?;
        let mut nearby: Vec<NearbyAlly> = self
            .agents
            .iter()
            .filter(|(other, m)| **other != id && m.class == member.class)
            .map(|(other, m)| NearbyAlly {
                id: *other,
                position: m.position,
                distance: m.position.distance(member.position),
            })
            .filter(|a| a.distance <= self.config.radius)
            .collect();
        nearby.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        nearby.truncate(self.config.max_nearby);

        let mut context = CoordinationContext {
            nearby_allies: nearby,
            ..CoordinationContext::default()
        };
        if let Some(group) = member.group.and_then(|gid| self.groups.get(&gid)) {
            context.group = Some(group.id);
            context.group_size = group.members.len();
            context.centroid = Some(group.centroid);
            context.formation = group.formation;
            context.strategy = group.strategy;
            context.suggested_action = group.strategy.suggested_action();
            context.group_success = group.success;
        }
        Ok(context)
    }

    /// Fold a member-reported coordination outcome into its group's score.
    /// Returns the group's new score, or `None` for an ungrouped agent.
    pub fn report_outcome(&mut self, id: AgentId, success: bool, reward: f32) -> Option<f32> {
        let gid = self.agents.get(&id)?.group?;
        let alpha = self.config.success_smoothing;
        let group = self.groups.get_mut(&gid)?;
        let sample = if success { 1.0 } else { 0.0 };
        group.success += alpha * (sample - group.success);
        group.outcomes += 1;
        if success {
            group.successes += 1;
        }
        if reward.is_finite() {
            group.total_reward += reward;
        }
        Some(group.success)
    }
}
