//! Core types for multi-agent combat reinforcement learning
//!
//! This crate provides the value types shared by the learning agents, the
//! coordination layer and profile persistence: world snapshots, actions,
//! experiences, learning metrics, reward functions and behavior profiles.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod coordination;
pub mod error;
pub mod experience;
pub mod geometry;
pub mod id;
pub mod metrics;
pub mod profile;
pub mod reward;
pub mod state;

// Re-export core traits and types
pub use action::{Action, ActionKind, ActionSpace};
pub use coordination::{CoordinationContext, Formation, NearbyAlly, TacticalStrategy};
pub use error::{CombatError, Result};
pub use experience::Experience;
pub use geometry::Vec2;
pub use id::{AgentClass, AgentId, GroupId};
pub use metrics::{ConvergenceCriteria, LearningMetrics, METRIC_SMOOTHING};
pub use profile::{ApproximatorKind, BehaviorProfile, NetworkArchitecture};
pub use reward::{ActionOutcome, RewardConfig, RewardFunction, ShapedCombatReward};
pub use state::{
    AllyView, ObjectKind, ObjectView, OpponentView, StateEncoder, StateEncoderConfig,
    StateSnapshot, WorldView,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Action, ActionKind, ActionOutcome, ActionSpace, AgentClass, AgentId, CombatError,
        CoordinationContext, Experience, LearningMetrics, Result, RewardFunction, StateSnapshot, Vec2, WorldView,
    };
}
