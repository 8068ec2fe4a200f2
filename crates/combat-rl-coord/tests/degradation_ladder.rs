//! Degradation transitions driven by frame samples

mod common;

use std::sync::Arc;
use std::time::Duration;

use combat_rl_coord::{DegradationLevel, TrainingCoordinator};
use combat_rl_core::{AgentClass, Vec2};
use combat_rl_store::MemoryProfileStore;

use common::config_with_quota;

fn coordinator() -> TrainingCoordinator {
    let mut config = config_with_quota(8);
    config.performance.frame_time_threshold_ms = 10.0;
    TrainingCoordinator::new(config, Arc::new(MemoryProfileStore::new())).unwrap()
}

#[test]
fn test_increasing_ratios_climb_the_ladder() {
    let mut coordinator = coordinator();
    let levels: Vec<DegradationLevel> = [5, 9, 11, 13, 16]
        .into_iter()
        .map(|ms| {
            coordinator.tick(Duration::from_millis(ms), Some(0));
            coordinator.settings().level
        })
        .collect();
    assert_eq!(
        levels,
        vec![
            DegradationLevel::None,
            DegradationLevel::Low,
            DegradationLevel::Medium,
            DegradationLevel::High,
            DegradationLevel::Severe,
        ]
    );
    assert!(levels.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_settings_shrink_with_severity() {
    let mut coordinator = coordinator();
    let id = coordinator.register_agent(AgentClass::Melee, "grunt", Vec2::ZERO);
    let mut previous = coordinator.settings();
    for ms in [9, 11, 13, 16] {
        let report = coordinator.tick(Duration::from_millis(ms), Some(0));
        let settings = report.degradation.unwrap();
        assert!(settings.batch_size <= previous.batch_size);
        assert!(settings.max_agents_per_frame <= previous.max_agents_per_frame);
        assert!(settings.update_interval >= previous.update_interval);
        assert_eq!(coordinator.agent(id).unwrap().batch_size(), settings.batch_size);
        previous = settings;
    }
}

#[test]
fn test_repeated_level_does_not_renotify() {
    let mut coordinator = coordinator();
    let mut rx = coordinator.subscribe_degradation();
    let first = coordinator.tick(Duration::from_millis(13), Some(0));
    assert!(first.degradation.is_some());
    assert!(rx.has_changed().unwrap());
    rx.borrow_and_update();

    let second = coordinator.tick(Duration::from_millis(13), Some(0));
    assert!(second.degradation.is_none());
    assert!(!rx.has_changed().unwrap());

    let forced = coordinator.apply_degradation(DegradationLevel::High);
    assert_eq!(forced, first.degradation.unwrap());
    assert!(!rx.has_changed().unwrap());
}

#[test]
fn test_agent_count_and_memory_also_degrade() {
    let mut config = config_with_quota(8);
    config.performance.agent_threshold = 2;
    let mut coordinator = TrainingCoordinator::new(config, Arc::new(MemoryProfileStore::new())).unwrap();
    for i in 0..3 {
        coordinator.register_agent(AgentClass::Tank, format!("wall-{i}"), Vec2::new(i as f32 * 50.0, 0.0));
    }
    coordinator.tick(Duration::from_millis(1), Some(0));
    assert_eq!(coordinator.settings().level, DegradationLevel::Severe);

    let mut coordinator = TrainingCoordinator::new(config_with_quota(8), Arc::new(MemoryProfileStore::new())).unwrap();
    coordinator.tick(Duration::from_millis(1), Some(300 * 1024 * 1024));
    assert_eq!(coordinator.settings().level, DegradationLevel::Medium);
}

#[test]
fn test_severe_level_keeps_sampling() {
    let mut coordinator = coordinator();
    coordinator.apply_degradation(DegradationLevel::Severe);
    let interval = coordinator.settings().update_interval;
    assert!(interval > 1);
    let status = coordinator.performance_status();
    assert_eq!(status.samples, 0);
    for _ in 0..interval {
        coordinator.tick(Duration::from_millis(20), Some(0));
    }
    let status = coordinator.performance_status();
    assert_eq!(status.samples, interval);
    assert!(status.mean_frame_ms > 19.0);
}
