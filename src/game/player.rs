use serde::Deserialize;
use serde::Serialize;

/// one of the two players of a zero-sum game. chance is not a Player;
/// nodes where nature moves are chance nodes of the unfolded tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Player(pub u8);

impl Player {
    pub fn opponent(&self) -> Self {
        Self(1 - self.0)
    }
    pub fn index(&self) -> usize {
        self.0 as usize
    }
    /// accumulators are stored in player-0 convention and flipped
    /// by this sign when read for the other player
    pub fn sign(&self) -> f64 {
        match self.0 {
            0 => 1.,
            _ => -1.,
        }
    }
    pub fn both() -> [Self; 2] {
        [Self(0), Self(1)]
    }
}

impl std::fmt::Display for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Pl{}", self.0)
    }
}
