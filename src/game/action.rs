use super::player::Player;
use serde::Deserialize;
use serde::Serialize;

/// index of an action, unique within the node offering it. the domain
/// contract requires that action ids equal their position in the
/// available-action list, so the core never needs the action payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActionId(pub u32);

/// sentinel for "this player did not act here"
pub const NO_ACTION: ActionId = ActionId(u32::MAX);

impl ActionId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            NO_ACTION => write!(f, "∅"),
            ActionId(id) => write!(f, "a{}", id),
        }
    }
}

/// an action committed by a player within the current round
pub type PlayerAction = (Player, ActionId);
