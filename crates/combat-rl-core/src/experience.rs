//! Transitions stored for experience replay

use serde::{Deserialize, Serialize};

use crate::state::StateSnapshot;

/// A single transition, the unit of learning. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    /// State the action was chosen in
    pub state: StateSnapshot,
    /// Index of the chosen action in the agent's action space
    pub action_index: usize,
    /// Reward received for the transition
    pub reward: f32,
    /// State after the action resolved
    pub next_state: StateSnapshot,
    /// Whether the episode ended with this transition
    pub terminal: bool,
}

impl Experience {
    /// Create a new experience
    #[must_use]
    pub fn new(
        state: StateSnapshot,
        action_index: usize,
        reward: f32,
        next_state: StateSnapshot,
        terminal: bool,
    ) -> Self {
        Self {
            state,
            action_index,
            reward,
            next_state,
            terminal,
        }
    }
}
