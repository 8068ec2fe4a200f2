//! Learning agents for combat NPCs
//!
//! This crate provides:
//! - Q-value function approximators (a dense network and a null-effect stand-in)
//! - A circular experience replay buffer
//! - The epsilon-greedy Deep Q-Network agent
//! - A rule-based fallback agent
//! - The factory deciding which of them an entity gets

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod agent;
pub mod buffer;
pub mod dqn;
pub mod factory;
pub mod network;
pub mod rule_based;

// Re-export agents
pub use agent::{AgentVariant, CombatAgent};
pub use dqn::{DqnAgent, DqnConfig};
pub use factory::{AgentBuilder, AgentFactory, FactoryConfig};
pub use rule_based::{RuleBasedAgent, RuleBasedConfig};

// Re-export learning components
pub use buffer::ReplayBuffer;
pub use network::{build_network, DenseNetwork, NetworkConfig, NullNetwork, QNetwork};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        AgentFactory, AgentVariant, CombatAgent, DqnAgent, DqnConfig, ReplayBuffer,
        RuleBasedAgent,
    };
    pub use combat_rl_core::prelude::*;
}
