//! Example: a small arena where NPC squads chase a circling opponent
//!
//! Run with `RUST_LOG=combat_rl_coord=info` to watch groups form and the
//! degradation ladder react to the simulated frame times.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

use combat_rl_coord::prelude::*;
use combat_rl_core::{AllyView, OpponentView};

const EPISODES: usize = 20;
const STEPS_PER_EPISODE: usize = 150;
const MOVE_SPEED: f32 = 0.8;
const ARENA: f32 = 40.0;

struct Npc {
    id: AgentId,
    class: AgentClass,
    position: Vec2,
    health: f32,
    last_action: Option<ActionKind>,
}

struct Opponent {
    position: Vec2,
    velocity: Vec2,
    health: f32,
    angle: f32,
}

impl Opponent {
    fn new() -> Self {
        Self {
            position: Vec2::new(15.0, 0.0),
            velocity: Vec2::ZERO,
            health: 1.0,
            angle: 0.0,
        }
    }

    fn advance(&mut self) {
        self.angle += 0.02;
        let next = Vec2::new(15.0 * self.angle.cos(), 15.0 * self.angle.sin());
        self.velocity = next - self.position;
        self.position = next;
    }
}

fn attack_range(class: AgentClass) -> f32 {
    match class {
        AgentClass::Melee | AgentClass::Tank => 3.0,
        AgentClass::Ranged => 18.0,
        AgentClass::Support => 10.0,
    }
}

fn observe(npc: &Npc, npcs: &[Npc], opponent: &Opponent, elapsed: f32) -> WorldView {
    WorldView {
        position: npc.position,
        health: npc.health,
        opponent: OpponentView {
            position: opponent.position,
            velocity: opponent.velocity,
            health: opponent.health,
        },
        allies: npcs
            .iter()
            .filter(|other| other.id != npc.id)
            .map(|other| AllyView {
                position: other.position,
                class: other.class,
                health: other.health,
                current_action: other.last_action,
            })
            .collect(),
        objects: Vec::new(),
        elapsed_secs: elapsed,
    }
}

/// Apply an action and report what happened
fn resolve(
    npc: &mut Npc,
    action: Action,
    directions: u8,
    opponent: &mut Opponent,
    grouped: bool,
    rng: &mut impl Rng,
) -> ActionOutcome {
    let mut outcome = ActionOutcome::default();
    match action {
        Action::Move { direction } => {
            npc.position = npc.position + Vec2::heading(direction, directions) * MOVE_SPEED;
        }
        Action::Retreat { direction } => {
            npc.position = npc.position - Vec2::heading(direction, directions) * MOVE_SPEED;
        }
        Action::Attack { intensity } | Action::SpecialAttack { intensity } => {
            let in_range = npc.position.distance(opponent.position) <= attack_range(npc.class);
            if in_range && rng.gen::<f32>() < 0.7 {
                let damage = 10.0 * intensity;
                outcome.hit = true;
                outcome.damage_dealt = damage;
                opponent.health = (opponent.health - damage / 500.0).max(0.0);
            }
        }
        Action::Coordinate { .. } => outcome.coordination = Some(grouped),
        Action::Wait | Action::DefensiveStance | Action::Ambush => {}
    }
    npc.position = Vec2::new(npc.position.x.clamp(-ARENA, ARENA), npc.position.y.clamp(-ARENA, ARENA));

    if npc.position.distance(opponent.position) < 2.5 && rng.gen::<f32>() < 0.2 {
        let damage = if matches!(action, Action::DefensiveStance) { 2.0 } else { 5.0 };
        outcome.damage_taken = damage;
        npc.health = (npc.health - damage / 100.0).max(0.0);
    }
    outcome.distance_to_opponent = npc.position.distance(opponent.position);
    npc.last_action = Some(action.kind());
    outcome
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let profiles = tempfile::tempdir()?;
    let mut config = CombatRlConfig::default();
    config.store.root = profiles.path().to_path_buf();
    config.coordinator.mode = TrainingMode::Training;
    config.factory.dqn.min_experiences = 64;

    let store: Arc<dyn ProfileStore> = Arc::new(FileProfileStore::from_config(&config.store));
    let mut coordinator = TrainingCoordinator::new(config, store)?;
    let mut degradation = coordinator.subscribe_degradation();

    let squad = [
        (AgentClass::Melee, Vec2::new(-10.0, -2.0)),
        (AgentClass::Melee, Vec2::new(-9.0, 0.0)),
        (AgentClass::Melee, Vec2::new(-8.0, 2.0)),
        (AgentClass::Ranged, Vec2::new(-20.0, 10.0)),
        (AgentClass::Ranged, Vec2::new(-18.0, 12.0)),
        (AgentClass::Tank, Vec2::new(0.0, -12.0)),
        (AgentClass::Support, Vec2::new(-22.0, -6.0)),
    ];
    let mut npcs: Vec<Npc> = squad
        .iter()
        .enumerate()
        .map(|(i, (class, position))| Npc {
            id: coordinator.register_agent(*class, format!("{class}-{i}"), *position),
            class: *class,
            position: *position,
            health: 1.0,
            last_action: None,
        })
        .collect();

    let loaded = coordinator.load_all_profiles().await;
    println!("Loaded {} profiles ({} recovered)", loaded.loaded.len(), loaded.recovered.len());

    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    for episode in 0..EPISODES {
        let mut opponent = Opponent::new();
        for (npc, (_, start)) in npcs.iter_mut().zip(squad.iter()) {
            npc.position = *start;
            npc.health = 1.0;
            npc.last_action = None;
        }

        let mut steps = 0;
        for step in 0..STEPS_PER_EPISODE {
            let frame_start = Instant::now();
            coordinator.begin_tick();
            opponent.advance();

            #[allow(clippy::cast_precision_loss)]
            let elapsed = step as f32 / 30.0;
            for i in 0..npcs.len() {
                if npcs[i].health <= 0.0 {
                    continue;
                }
                let view = observe(&npcs[i], &npcs, &opponent, elapsed);
                let id = npcs[i].id;
                let action = coordinator.request_action(id, &view)?;
                let directions = coordinator
                    .agent(id)
                    .map_or(8, |agent| agent.action_space().move_directions);
                let grouped = coordinator.coordination().group_of(id).is_some();
                let outcome = resolve(&mut npcs[i], action, directions, &mut opponent, grouped, &mut rng);
                let next_view = observe(&npcs[i], &npcs, &opponent, elapsed);
                coordinator.report_outcome(id, &outcome, &next_view)?;
            }

            // Pretend the renderer had a bad patch halfway through
            let simulated = if (EPISODES / 2..EPISODES / 2 + 2).contains(&episode) {
                Duration::from_millis(24)
            } else {
                frame_start.elapsed()
            };
            coordinator.end_tick(simulated, None);
            steps += 1;

            if opponent.health <= 0.0 || npcs.iter().all(|npc| npc.health <= 0.0) {
                break;
            }
        }

        for npc in &npcs {
            let view = observe(npc, &npcs, &opponent, 0.0);
            coordinator.end_episode(npc.id, &view, npc.health <= 0.0)?;
        }

        if degradation.has_changed()? {
            let settings = *degradation.borrow_and_update();
            println!("  degradation now {:?} (batch {})", settings.level, settings.batch_size);
        }
        if let Some(report) = coordinator.flush_autosave().await {
            println!("  auto-saved {} profiles", report.saved.len());
        }

        let metrics = coordinator.aggregate_metrics();
        println!(
            "Episode {}: steps = {}, opponent health = {:.2}, mean reward = {:.3}, epsilon = {:.3}, groups = {}",
            episode + 1,
            steps,
            opponent.health,
            metrics.mean_recent_reward,
            metrics.mean_exploration_rate,
            metrics.active_groups
        );
    }

    let report = coordinator.set_training_mode(TrainingMode::Inference).await;
    println!("\nSaved {} profiles before switching to inference", report.saved.len());

    let status = coordinator.performance_status();
    println!("Performance: {}", serde_json::to_string_pretty(&status)?);
    println!("Metrics: {}", serde_json::to_string_pretty(&coordinator.aggregate_metrics())?);

    let report = coordinator.shutdown().await;
    println!("Shutdown saved {} profiles", report.saved.len());

    Ok(())
}
