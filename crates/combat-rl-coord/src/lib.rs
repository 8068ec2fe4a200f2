//! Coordination, scheduling and degradation control for combat RL agents
//!
//! This crate provides:
//! - The coordination layer grouping same-class agents by proximity
//! - The performance monitor driving the degradation ladder
//! - The training coordinator owning the registry, the training mode, the
//!   per-tick update scheduler and profile persistence
//! - The aggregated engine configuration

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod coordination;
pub mod coordinator;
pub mod performance;

// Re-export the control surface
pub use config::{ClassRewards, CombatRlConfig};
pub use coordination::{CoordinationConfig, CoordinationGroup, CoordinationLayer, MaintenanceReport};
pub use coordinator::{
    AggregateMetrics, CoordinatorConfig, LoadReport, SaveReport, TickReport, TrainingCoordinator,
    TrainingMode,
};
pub use performance::{
    DegradationLevel, DegradationSettings, DegradationTable, FrameSample, LevelSettings,
    PerformanceConfig, PerformanceMonitor, PerformanceStatus,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        CombatRlConfig, DegradationLevel, TickReport, TrainingCoordinator, TrainingMode,
    };
    pub use combat_rl_agent::prelude::*;
    pub use combat_rl_store::{FileProfileStore, MemoryProfileStore, ProfileStore};
}
