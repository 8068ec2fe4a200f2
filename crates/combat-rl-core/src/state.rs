//! World observations and their fixed-size state encoding

use serde::{Deserialize, Serialize};

use crate::action::ActionKind;
use crate::geometry::Vec2;
use crate::id::AgentClass;

/// Immutable, fixed-size feature vector describing the world from one
/// agent's point of view at a decision point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    features: Vec<f32>,
}

impl StateSnapshot {
    /// Wrap an already-encoded feature vector
    #[must_use]
    pub fn from_features(features: Vec<f32>) -> Self {
        Self { features }
    }

    /// All-zero snapshot of the given size
    #[must_use]
    pub fn zeros(len: usize) -> Self {
        Self { features: vec![0.0; len] }
    }

    /// Encoded features
    #[must_use]
    pub fn features(&self) -> &[f32] {
        &self.features
    }

    /// Number of features
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the snapshot has no features
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Own health fraction, if the snapshot follows [`StateEncoder`]'s layout
    #[must_use]
    pub fn self_health(&self) -> Option<f32> {
        self.features.get(layout::SELF_HEALTH).copied()
    }

    /// Opponent health fraction, if the snapshot follows [`StateEncoder`]'s layout
    #[must_use]
    pub fn opponent_health(&self) -> Option<f32> {
        self.features.get(layout::OPPONENT_HEALTH).copied()
    }

    /// Normalised distance to the opponent, if the snapshot follows
    /// [`StateEncoder`]'s layout
    #[must_use]
    pub fn opponent_distance(&self) -> Option<f32> {
        let x = self.features.get(layout::OPPONENT_REL_X)?;
        let y = self.features.get(layout::OPPONENT_REL_Y)?;
        Some((x * x + y * y).sqrt())
    }
}

/// Fixed feature offsets shared by the encoder and the reward shaper
pub mod layout {
    /// Own x position
    pub const SELF_X: usize = 0;
    /// Own y position
    pub const SELF_Y: usize = 1;
    /// Own health fraction
    pub const SELF_HEALTH: usize = 2;
    /// Opponent x relative to self
    pub const OPPONENT_REL_X: usize = 3;
    /// Opponent y relative to self
    pub const OPPONENT_REL_Y: usize = 4;
    /// Opponent x velocity
    pub const OPPONENT_VEL_X: usize = 5;
    /// Opponent y velocity
    pub const OPPONENT_VEL_Y: usize = 6;
    /// Opponent health fraction
    pub const OPPONENT_HEALTH: usize = 7;
    /// First ally slot
    pub const ALLIES_START: usize = 8;
    /// Features per ally slot
    pub const ALLY_STRIDE: usize = 5;
    /// Features per object slot
    pub const OBJECT_STRIDE: usize = 4;
}

/// Kind of an object of interest near an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// Restores health
    HealthPickup,
    /// Blocks line of sight
    Cover,
    /// Damages whoever stands on it
    Hazard,
    /// Mission objective
    Objective,
}

impl ObjectKind {
    fn code(self) -> f32 {
        match self {
            Self::HealthPickup => 0.25,
            Self::Cover => 0.5,
            Self::Hazard => 0.75,
            Self::Objective => 1.0,
        }
    }
}

/// What the simulation knows about the opponent
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OpponentView {
    /// Position
    pub position: Vec2,
    /// Velocity
    pub velocity: Vec2,
    /// Health fraction in [0, 1]
    pub health: f32,
}

/// A nearby ally
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllyView {
    /// Position
    pub position: Vec2,
    /// Combat class
    pub class: AgentClass,
    /// Health fraction in [0, 1]
    pub health: f32,
    /// What the ally is currently doing
    pub current_action: Option<ActionKind>,
}

/// A nearby object of interest
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectView {
    /// Position
    pub position: Vec2,
    /// Object kind
    pub kind: ObjectKind,
    /// Normalised value in [0, 1]
    pub value: f32,
}

/// Structured observation handed over by the simulation collaborator at a
/// decision point. The encoder turns it into a [`StateSnapshot`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorldView {
    /// Requesting entity's position
    pub position: Vec2,
    /// Requesting entity's health fraction in [0, 1]
    pub health: f32,
    /// Opponent
    pub opponent: OpponentView,
    /// Allies, any order, any count
    pub allies: Vec<AllyView>,
    /// Objects of interest, any order, any count
    pub objects: Vec<ObjectView>,
    /// Seconds since the episode began
    pub elapsed_secs: f32,
}

/// Sizing of the state encoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateEncoderConfig {
    /// Ally slots (K)
    pub max_allies: usize,
    /// Object slots (M)
    pub max_objects: usize,
    /// Half-width of the arena, used to normalise positions
    pub arena_extent: f32,
    /// Speed that maps to 1.0 in velocity features
    pub max_speed: f32,
    /// Elapsed time that maps to 1.0
    pub episode_time_scale: f32,
}

impl Default for StateEncoderConfig {
    fn default() -> Self {
        Self {
            max_allies: 3,
            max_objects: 2,
            arena_extent: 50.0,
            max_speed: 10.0,
            episode_time_scale: 120.0,
        }
    }
}

/// Builds [`StateSnapshot`]s of a fixed size from [`WorldView`]s.
///
/// Layout: own position and health (3), opponent relative position,
/// velocity and health (5), `max_allies` slots of relative position, class,
/// health and current action (5 each), `max_objects` slots of relative
/// position, kind and value (4 each), and elapsed time (1). Missing slots are
/// zero-filled; allies and objects are taken nearest first.
#[derive(Debug, Clone, Default)]
pub struct StateEncoder {
    config: StateEncoderConfig,
}

impl StateEncoder {
    /// Create an encoder
    #[must_use]
    pub fn new(config: StateEncoderConfig) -> Self {
        Self { config }
    }

    /// Encoder configuration
    #[must_use]
    pub fn config(&self) -> &StateEncoderConfig {
        &self.config
    }

    /// Number of features every snapshot from this encoder has
    #[must_use]
    pub fn state_size(&self) -> usize {
        layout::ALLIES_START
            + self.config.max_allies * layout::ALLY_STRIDE
            + self.config.max_objects * layout::OBJECT_STRIDE
            + 1
    }

    /// Encode a world view
    #[must_use]
    pub fn encode(&self, view: &WorldView) -> StateSnapshot {
        let extent = self.config.arena_extent.max(f32::EPSILON);
        let speed = self.config.max_speed.max(f32::EPSILON);
        let mut f = Vec::with_capacity(self.state_size());

        f.push(view.position.x / extent);
        f.push(view.position.y / extent);
        f.push(view.health);

        let rel = view.opponent.position - view.position;
        f.push(rel.x / extent);
        f.push(rel.y / extent);
        f.push(view.opponent.velocity.x / speed);
        f.push(view.opponent.velocity.y / speed);
        f.push(view.opponent.health);

        let mut allies: Vec<&AllyView> = view.allies.iter().collect();
        allies.sort_by(|a, b| {
            a.position
                .distance(view.position)
                .total_cmp(&b.position.distance(view.position))
        });
        for slot in 0..self.config.max_allies {
            match allies.get(slot) {
                Some(ally) => {
                    let rel = ally.position - view.position;
                    f.push(rel.x / extent);
                    f.push(rel.y / extent);
                    f.push(ally.class.code());
                    f.push(ally.health);
                    f.push(ally.current_action.map_or(0.0, |k| k.code()));
                }
                None => f.extend_from_slice(&[0.0; layout::ALLY_STRIDE]),
            }
        }

        let mut objects: Vec<&ObjectView> = view.objects.iter().collect();
        objects.sort_by(|a, b| {
            a.position
                .distance(view.position)
                .total_cmp(&b.position.distance(view.position))
        });
        for slot in 0..self.config.max_objects {
            match objects.get(slot) {
                Some(object) => {
                    let rel = object.position - view.position;
                    f.push(rel.x / extent);
                    f.push(rel.y / extent);
                    f.push(object.kind.code());
                    f.push(object.value);
                }
                None => f.extend_from_slice(&[0.0; layout::OBJECT_STRIDE]),
            }
        }

        let time_scale = self.config.episode_time_scale.max(f32::EPSILON);
        f.push((view.elapsed_secs / time_scale).clamp(0.0, 1.0));

        for v in &mut f {
            if !v.is_finite() {
                *v = 0.0;
            }
        }

        StateSnapshot::from_features(f)
    }
}
