//! Combat actions and per-class discrete action spaces

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::id::AgentClass;
use crate::{CombatError, Result};

/// An action an NPC can take at a decision point.
///
/// Directions are indices into the evenly spaced headings of the owning
/// [`ActionSpace`]; see [`crate::Vec2::heading`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Move along a heading
    Move {
        /// Heading index
        direction: u8,
    },
    /// Basic attack, intensity in (0, 1]
    Attack {
        /// Attack strength
        intensity: f32,
    },
    /// Back away along a heading
    Retreat {
        /// Heading index
        direction: u8,
    },
    /// Act together with the nearby ally at `target_index`
    Coordinate {
        /// Index into the nearby-ally list of the state snapshot
        target_index: u8,
    },
    /// Do nothing this decision
    Wait,
    /// Heavy attack, intensity in (0, 1]
    SpecialAttack {
        /// Attack strength
        intensity: f32,
    },
    /// Reduce incoming damage
    DefensiveStance,
    /// Hold still and strike when the opponent comes close
    Ambush,
}

/// Payload-free discriminant of [`Action`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// [`Action::Move`]
    Move,
    /// [`Action::Attack`]
    Attack,
    /// [`Action::Retreat`]
    Retreat,
    /// [`Action::Coordinate`]
    Coordinate,
    /// [`Action::Wait`]
    Wait,
    /// [`Action::SpecialAttack`]
    SpecialAttack,
    /// [`Action::DefensiveStance`]
    DefensiveStance,
    /// [`Action::Ambush`]
    Ambush,
}

impl ActionKind {
    /// Numeric code fed into state encodings for an ally's current action
    #[must_use]
    pub fn code(&self) -> f32 {
        match self {
            Self::Move => 0.125,
            Self::Attack => 0.25,
            Self::Retreat => 0.375,
            Self::Coordinate => 0.5,
            Self::Wait => 0.625,
            Self::SpecialAttack => 0.75,
            Self::DefensiveStance => 0.875,
            Self::Ambush => 1.0,
        }
    }
}

impl Action {
    /// Discriminant of this action
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Move { .. } => ActionKind::Move,
            Self::Attack { .. } => ActionKind::Attack,
            Self::Retreat { .. } => ActionKind::Retreat,
            Self::Coordinate { .. } => ActionKind::Coordinate,
            Self::Wait => ActionKind::Wait,
            Self::SpecialAttack { .. } => ActionKind::SpecialAttack,
            Self::DefensiveStance => ActionKind::DefensiveStance,
            Self::Ambush => ActionKind::Ambush,
        }
    }

    /// Whether this action deals damage
    #[must_use]
    pub fn is_offensive(&self) -> bool {
        matches!(self, Self::Attack { .. } | Self::SpecialAttack { .. } | Self::Ambush)
    }
}

/// Declares which actions an agent class may take and how finely they are
/// discretised. The derived index layout is, in order: moves, attack levels,
/// retreats, coordinate targets, then one slot each for wait, special attack,
/// defensive stance and ambush when enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionSpace {
    /// Number of movement headings, 0 disables `Move`
    pub move_directions: u8,
    /// Number of attack intensity levels, 0 disables `Attack`
    pub attack_levels: u8,
    /// Whether `Retreat` is available (uses `move_directions` headings)
    pub retreat_enabled: bool,
    /// Number of addressable allies for `Coordinate`, 0 disables it
    pub coordinate_targets: u8,
    /// Whether `Wait` is available
    pub wait_enabled: bool,
    /// Whether `SpecialAttack` is available
    pub special_attack_enabled: bool,
    /// Whether `DefensiveStance` is available
    pub defensive_stance_enabled: bool,
    /// Whether `Ambush` is available
    pub ambush_enabled: bool,
}

impl Default for ActionSpace {
    fn default() -> Self {
        Self {
            move_directions: 8,
            attack_levels: 1,
            retreat_enabled: true,
            coordinate_targets: 3,
            wait_enabled: true,
            special_attack_enabled: false,
            defensive_stance_enabled: false,
            ambush_enabled: false,
        }
    }
}

impl ActionSpace {
    /// Reference action space for an agent class
    #[must_use]
    pub fn for_class(class: AgentClass) -> Self {
        match class {
            AgentClass::Melee => Self {
                move_directions: 8,
                attack_levels: 2,
                retreat_enabled: true,
                coordinate_targets: 3,
                wait_enabled: true,
                special_attack_enabled: true,
                defensive_stance_enabled: false,
                ambush_enabled: true,
            },
            AgentClass::Ranged => Self {
                move_directions: 8,
                attack_levels: 3,
                retreat_enabled: true,
                coordinate_targets: 3,
                wait_enabled: true,
                special_attack_enabled: true,
                defensive_stance_enabled: false,
                ambush_enabled: false,
            },
            AgentClass::Tank => Self {
                move_directions: 4,
                attack_levels: 1,
                retreat_enabled: false,
                coordinate_targets: 2,
                wait_enabled: true,
                special_attack_enabled: false,
                defensive_stance_enabled: true,
                ambush_enabled: false,
            },
            AgentClass::Support => Self {
                move_directions: 8,
                attack_levels: 1,
                retreat_enabled: true,
                coordinate_targets: 4,
                wait_enabled: true,
                special_attack_enabled: false,
                defensive_stance_enabled: true,
                ambush_enabled: false,
            },
        }
    }

    fn retreat_count(&self) -> usize {
        if self.retreat_enabled {
            usize::from(self.move_directions)
        } else {
            0
        }
    }

    fn flag(enabled: bool) -> usize {
        usize::from(enabled)
    }

    /// Total number of discrete actions
    #[must_use]
    pub fn action_count(&self) -> usize {
        usize::from(self.move_directions)
            + usize::from(self.attack_levels)
            + self.retreat_count()
            + usize::from(self.coordinate_targets)
            + Self::flag(self.wait_enabled)
            + Self::flag(self.special_attack_enabled)
            + Self::flag(self.defensive_stance_enabled)
            + Self::flag(self.ambush_enabled)
    }

    /// Reject spaces with no actions at all
    pub fn validate(&self) -> Result<()> {
        if self.action_count() == 0 {
            return Err(CombatError::Config("action space enables no actions".to_string()));
        }
        Ok(())
    }

    /// Map a discrete index to its action, `None` when out of range
    #[must_use]
    pub fn decode(&self, index: usize) -> Option<Action> {
        let mut i = index;

        let moves = usize::from(self.move_directions);
        if i < moves {
            return Some(Action::Move { direction: u8::try_from(i).ok()? });
        }
        i -= moves;

        let attacks = usize::from(self.attack_levels);
        if i < attacks {
            return Some(Action::Attack { intensity: Self::level_intensity(i, attacks) });
        }
        i -= attacks;

        let retreats = self.retreat_count();
        if i < retreats {
            return Some(Action::Retreat { direction: u8::try_from(i).ok()? });
        }
        i -= retreats;

        let targets = usize::from(self.coordinate_targets);
        if i < targets {
            return Some(Action::Coordinate { target_index: u8::try_from(i).ok()? });
        }
        i -= targets;

        let singles = [
            (self.wait_enabled, Action::Wait),
            (self.special_attack_enabled, Action::SpecialAttack { intensity: 1.0 }),
            (self.defensive_stance_enabled, Action::DefensiveStance),
            (self.ambush_enabled, Action::Ambush),
        ];
        singles
            .into_iter()
            .filter(|(enabled, _)| *enabled)
            .nth(i)
            .map(|(_, action)| action)
    }

    /// Map an action back to its discrete index. Attack intensities snap to
    /// the nearest level; disabled or out-of-range actions return `None`.
    #[must_use]
    pub fn encode(&self, action: &Action) -> Option<usize> {
        let moves = usize::from(self.move_directions);
        let attacks = usize::from(self.attack_levels);
        let retreats = self.retreat_count();
        let targets = usize::from(self.coordinate_targets);
        let singles_base = moves + attacks + retreats + targets;

        let single_offset = |wanted: ActionKind| -> Option<usize> {
            let slots = [
                (self.wait_enabled, ActionKind::Wait),
                (self.special_attack_enabled, ActionKind::SpecialAttack),
                (self.defensive_stance_enabled, ActionKind::DefensiveStance),
                (self.ambush_enabled, ActionKind::Ambush),
            ];
            slots
                .iter()
                .filter(|(enabled, _)| *enabled)
                .position(|(_, kind)| *kind == wanted)
                .map(|pos| singles_base + pos)
        };

        match *action {
            Action::Move { direction } => {
                let d = usize::from(direction);
                (d < moves).then_some(d)
            }
            Action::Attack { intensity } => {
                if attacks == 0 {
                    return None;
                }
                Some(moves + Self::nearest_level(intensity, attacks))
            }
            Action::Retreat { direction } => {
                let d = usize::from(direction);
                (d < retreats).then_some(moves + attacks + d)
            }
            Action::Coordinate { target_index } => {
                let t = usize::from(target_index);
                (t < targets).then_some(moves + attacks + retreats + t)
            }
            Action::Wait => single_offset(ActionKind::Wait),
            Action::SpecialAttack { .. } => single_offset(ActionKind::SpecialAttack),
            Action::DefensiveStance => single_offset(ActionKind::DefensiveStance),
            Action::Ambush => single_offset(ActionKind::Ambush),
        }
    }

    /// Indices of every action of the given kind
    #[must_use]
    pub fn indices_of_kind(&self, kind: ActionKind) -> Vec<usize> {
        (0..self.action_count())
            .filter(|&i| self.decode(i).is_some_and(|a| a.kind() == kind))
            .collect()
    }

    /// Uniformly random action index
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let n = self.action_count();
        if n == 0 {
            0
        } else {
            rng.gen_range(0..n)
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn level_intensity(level: usize, levels: usize) -> f32 {
        (level + 1) as f32 / levels as f32
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn nearest_level(intensity: f32, levels: usize) -> usize {
        let scaled = (intensity.clamp(0.0, 1.0) * levels as f32).round() as usize;
        scaled.clamp(1, levels) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_count_per_class() {
        // 8 moves + 2 attacks + 8 retreats + 3 targets + wait + special + ambush
        assert_eq!(ActionSpace::for_class(AgentClass::Melee).action_count(), 24);
        // 4 moves + 1 attack + 2 targets + wait + defensive
        assert_eq!(ActionSpace::for_class(AgentClass::Tank).action_count(), 9);
    }

    #[test]
    fn test_decode_encode_covers_every_index() {
        for class in AgentClass::ALL {
            let space = ActionSpace::for_class(class);
            for i in 0..space.action_count() {
                let action = space.decode(i).expect("index in range");
                assert_eq!(space.encode(&action), Some(i), "{class:?} index {i}");
            }
            assert!(space.decode(space.action_count()).is_none());
        }
    }

    #[test]
    fn test_disabled_actions_do_not_encode() {
        let space = ActionSpace::for_class(AgentClass::Tank);
        assert_eq!(space.encode(&Action::Ambush), None);
        assert_eq!(space.encode(&Action::Retreat { direction: 0 }), None);
        assert_eq!(space.encode(&Action::Move { direction: 4 }), None);
    }

    #[test]
    fn test_attack_intensity_snaps_to_level() {
        let space = ActionSpace::for_class(AgentClass::Ranged);
        let low = space.encode(&Action::Attack { intensity: 0.1 }).unwrap();
        let high = space.encode(&Action::Attack { intensity: 0.95 }).unwrap();
        assert_eq!(low, 8);
        assert_eq!(high, 10);
    }

    #[test]
    fn test_empty_space_fails_validation() {
        let space = ActionSpace {
            move_directions: 0,
            attack_levels: 0,
            retreat_enabled: false,
            coordinate_targets: 0,
            wait_enabled: false,
            special_attack_enabled: false,
            defensive_stance_enabled: false,
            ambush_enabled: false,
        };
        assert_eq!(space.action_count(), 0);
        assert!(space.validate().is_err());
    }

    #[test]
    fn test_indices_of_kind() {
        let space = ActionSpace::for_class(AgentClass::Melee);
        assert_eq!(space.indices_of_kind(ActionKind::Attack), vec![8, 9]);
        assert_eq!(space.indices_of_kind(ActionKind::Move).len(), 8);
    }
}
