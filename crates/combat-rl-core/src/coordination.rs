//! Coordination vocabulary shared by agents and the coordination layer

use serde::{Deserialize, Serialize};

use crate::action::ActionKind;
use crate::geometry::Vec2;
use crate::id::{AgentClass, AgentId, GroupId};

/// Group-level tactic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TacticalStrategy {
    /// No shared tactic
    #[default]
    None,
    /// Two melee attackers come in from opposite sides
    Flank,
    /// Three or more melee attackers close a ring
    Surround,
    /// Ranged attackers spread out and fire from several angles
    Crossfire,
    /// Large ranged groups lay down sustained fire
    Suppress,
    /// Tanks form a wall
    HoldLine,
    /// Supports stay close to each other and heal
    Escort,
}

impl TacticalStrategy {
    /// Deterministic strategy for a group of `size` agents of `class`
    #[must_use]
    pub fn for_group(class: AgentClass, size: usize) -> Self {
        if size < 2 {
            return Self::None;
        }
        match class {
            AgentClass::Melee if size >= 3 => Self::Surround,
            AgentClass::Melee => Self::Flank,
            AgentClass::Ranged if size >= 4 => Self::Suppress,
            AgentClass::Ranged => Self::Crossfire,
            AgentClass::Tank => Self::HoldLine,
            AgentClass::Support => Self::Escort,
        }
    }

    /// Formation members should hold under this strategy
    #[must_use]
    pub fn formation(&self) -> Formation {
        match self {
            Self::None => Formation::Loose,
            Self::Flank => Formation::Wedge,
            Self::Surround => Formation::Circle,
            Self::Crossfire => Formation::Spread,
            Self::Suppress | Self::HoldLine => Formation::Line,
            Self::Escort => Formation::Column,
        }
    }

    /// Action kind the group would like its members to favour
    #[must_use]
    pub fn suggested_action(&self) -> Option<ActionKind> {
        match self {
            Self::None => None,
            Self::Flank | Self::Surround => Some(ActionKind::Move),
            Self::Crossfire | Self::Suppress => Some(ActionKind::Attack),
            Self::HoldLine => Some(ActionKind::DefensiveStance),
            Self::Escort => Some(ActionKind::Coordinate),
        }
    }
}

/// Spatial arrangement tag of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Formation {
    /// No particular arrangement
    #[default]
    Loose,
    /// V shape
    Wedge,
    /// Ring around the target
    Circle,
    /// Wide spacing
    Spread,
    /// Shoulder to shoulder
    Line,
    /// Single file
    Column,
}

/// A same-class agent near the requesting agent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NearbyAlly {
    /// Ally id
    pub id: AgentId,
    /// Ally position
    pub position: Vec2,
    /// Distance from the requesting agent
    pub distance: f32,
}

/// Advisory coordination information handed to an agent before it selects
/// an action. Agents without coordination capability ignore it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CoordinationContext {
    /// Same-class agents within the coordination radius, nearest first
    pub nearby_allies: Vec<NearbyAlly>,
    /// Group the agent belongs to
    pub group: Option<GroupId>,
    /// Current group size, 0 when ungrouped
    pub group_size: usize,
    /// Group centroid
    pub centroid: Option<Vec2>,
    /// Group formation
    pub formation: Formation,
    /// Group strategy
    pub strategy: TacticalStrategy,
    /// Action kind the group suggests
    pub suggested_action: Option<ActionKind>,
    /// Smoothed group coordination success in [0, 1]
    pub group_success: f32,
}

impl CoordinationContext {
    /// Whether the agent is part of a group
    #[must_use]
    pub fn is_grouped(&self) -> bool {
        self.group.is_some()
    }
}
