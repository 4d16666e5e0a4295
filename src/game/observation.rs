use super::player::Player;
use serde::Deserialize;
use serde::Serialize;

/// index of an observation, unique within the outcome delivering it.
/// the top of the id range is reserved for the sentinels below, so
/// domains may use any id under `u32::MAX - 2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObservationId(pub u32);

/// sentinel for "nothing was observed here"
pub const NO_OBSERVATION: ObservationId = ObservationId(u32::MAX);

impl ObservationId {
    /// reserved marker announcing that it is now `player`'s move.
    /// appended to the mover's own history (so infosets never collide
    /// with augmented infosets) and to the public-observation sequence.
    pub fn player_move(player: Player) -> Self {
        Self(u32::MAX - 2 + player.0 as u32)
    }
}

impl std::fmt::Display for ObservationId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            NO_OBSERVATION => write!(f, "∅"),
            ObservationId(id) => write!(f, "o{}", id),
        }
    }
}
