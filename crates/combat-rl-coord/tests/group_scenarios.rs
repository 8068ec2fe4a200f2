//! Group formation, strategy changes and dissolution through the coordinator

mod common;

use std::sync::Arc;

use combat_rl_coord::{CoordinationConfig, CoordinationLayer, TrainingCoordinator};
use combat_rl_core::{ActionOutcome, AgentClass, AgentId, TacticalStrategy, Vec2};
use combat_rl_store::MemoryProfileStore;

use common::{config_with_quota, zero_state};

fn coordinator() -> TrainingCoordinator {
    TrainingCoordinator::new(config_with_quota(8), Arc::new(MemoryProfileStore::new())).unwrap()
}

#[test]
fn test_pair_flanks_then_trio_surrounds() {
    let mut coordinator = coordinator();
    let a = coordinator.register_agent(AgentClass::Melee, "a", Vec2::new(0.0, 0.0));
    let b = coordinator.register_agent(AgentClass::Melee, "b", Vec2::new(2.0, 0.0));

    let report = coordinator.begin_tick();
    assert_eq!(report.formed.len(), 1);
    let group = coordinator.coordination().group_of(a).unwrap();
    assert_eq!(group.size(), 2);
    assert_eq!(group.strategy, TacticalStrategy::Flank);
    assert_eq!(coordinator.coordination().group_of(b).unwrap().id, group.id);

    let c = coordinator.register_agent(AgentClass::Melee, "c", Vec2::new(1.0, 1.5));
    let report = coordinator.begin_tick();
    assert_eq!(report.joined.len(), 1);
    assert!(report.formed.is_empty());
    let group = coordinator.coordination().group_of(c).unwrap();
    assert_eq!(group.size(), 3);
    assert_eq!(group.strategy, TacticalStrategy::Surround);
}

#[test]
fn test_every_same_class_pair_gets_a_strategy() {
    for class in AgentClass::ALL {
        let mut layer = CoordinationLayer::new(CoordinationConfig::default());
        layer.register(AgentId(1), class, Vec2::new(0.0, 0.0));
        layer.register(AgentId(2), class, Vec2::new(9.5, 0.0));
        layer.maintain();
        let group = layer.group_of(AgentId(1)).unwrap();
        assert_eq!(group.size(), 2);
        assert_ne!(group.strategy, TacticalStrategy::None);
    }
}

#[test]
fn test_dispersed_group_disbands_next_pass() {
    let mut coordinator = coordinator();
    let a = coordinator.register_agent(AgentClass::Ranged, "a", Vec2::new(0.0, 0.0));
    let b = coordinator.register_agent(AgentClass::Ranged, "b", Vec2::new(5.0, 0.0));
    coordinator.begin_tick();
    let gid = coordinator.coordination().group_of(a).unwrap().id;

    coordinator.set_position(a, Vec2::new(-20.0, 0.0)).unwrap();
    coordinator.set_position(b, Vec2::new(20.0, 0.0)).unwrap();
    let report = coordinator.begin_tick();
    assert_eq!(report.dissolved, vec![gid]);
    assert!(coordinator.coordination().group_of(a).is_none());
    assert!(coordinator.coordination().group_of(b).is_none());
    assert_eq!(coordinator.coordination().group_count(), 0);
}

#[test]
fn test_drift_within_cohesion_keeps_group() {
    let mut coordinator = coordinator();
    let a = coordinator.register_agent(AgentClass::Tank, "a", Vec2::new(0.0, 0.0));
    let b = coordinator.register_agent(AgentClass::Tank, "b", Vec2::new(5.0, 0.0));
    coordinator.begin_tick();

    // centroid at 0, members 14 away: beyond the radius but inside 1.5x
    coordinator.set_position(a, Vec2::new(-14.0, 0.0)).unwrap();
    coordinator.set_position(b, Vec2::new(14.0, 0.0)).unwrap();
    let report = coordinator.begin_tick();
    assert!(report.dissolved.is_empty());
    assert!(coordinator.coordination().group_of(a).is_some());
}

#[test]
fn test_removed_agent_leaves_no_membership() {
    let mut coordinator = coordinator();
    let a = coordinator.register_agent(AgentClass::Support, "a", Vec2::new(0.0, 0.0));
    let b = coordinator.register_agent(AgentClass::Support, "b", Vec2::new(1.0, 0.0));
    let c = coordinator.register_agent(AgentClass::Support, "c", Vec2::new(2.0, 0.0));
    coordinator.begin_tick();
    assert_eq!(coordinator.coordination().group_of(a).unwrap().size(), 3);

    coordinator.unregister_agent(b).unwrap();
    let group = coordinator.coordination().group_of(a).unwrap();
    assert_eq!(group.members, vec![a, c]);

    coordinator.unregister_agent(c).unwrap();
    assert!(coordinator.coordination().group_of(a).is_none());
    assert_eq!(coordinator.coordination().group_count(), 0);
}

#[test]
fn test_group_feedback_reaches_members() {
    let mut config = config_with_quota(8);
    config.coordination.feedback_interval = 2;
    config.coordination.feedback_weight = 0.5;
    let mut coordinator = TrainingCoordinator::new(config, Arc::new(MemoryProfileStore::new())).unwrap();
    let a = coordinator.register_agent(AgentClass::Ranged, "a", Vec2::new(0.0, 0.0));
    let b = coordinator.register_agent(AgentClass::Ranged, "b", Vec2::new(3.0, 0.0));
    coordinator.begin_tick();

    coordinator.request_action_for_state(a, zero_state()).unwrap();
    let outcome = ActionOutcome {
        coordination: Some(true),
        ..ActionOutcome::default()
    };
    coordinator.report_outcome_for_state(a, &outcome, zero_state()).unwrap();
    let group_score = coordinator.coordination().group_of(a).unwrap().success;
    assert!(group_score > 0.5);

    let before = coordinator.agent(b).unwrap().metrics().coordination_success;
    let report = coordinator.begin_tick();
    assert_eq!(report.feedback.len(), 2);
    let after = coordinator.agent(b).unwrap().metrics().coordination_success;
    assert!((after - (0.5 * before + 0.5 * group_score)).abs() < 1e-6);
}
