use crate::game::action::ActionId;
use crate::game::action::NO_ACTION;
use crate::game::observation::ObservationId;
use crate::game::observation::NO_OBSERVATION;
use crate::game::player::Player;

/// one step of a player's private record: what they played and what
/// they saw. sentinels fill the slots where nothing happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AoPair {
    pub action: ActionId,
    pub observation: ObservationId,
}

impl AoPair {
    pub const NONE: Self = Self {
        action: NO_ACTION,
        observation: NO_OBSERVATION,
    };
}

/// action-observation history of a single player. this is the infoset
/// key: histories where the acting player has the same Aoh are
/// indistinguishable to them. computed for a non-acting player it is
/// the augmented infoset used by gadget construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Aoh {
    player: Player,
    pairs: Vec<AoPair>,
}

impl Aoh {
    pub fn from(player: Player, pairs: Vec<AoPair>) -> Self {
        Self { player, pairs }
    }
    pub fn player(&self) -> Player {
        self.player
    }
    pub fn pairs(&self) -> &[AoPair] {
        &self.pairs
    }
}

impl std::fmt::Display for Aoh {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:", self.player)?;
        for pair in &self.pairs {
            write!(f, "({},{})", pair.action, pair.observation)?;
        }
        Ok(())
    }
}

/// prefix compatibility of two action-observation sequences: one must
/// be a prefix of the other, where a sentinel matches anything and
/// concrete values must agree.
pub fn is_ao_compatible(a: &[AoPair], b: &[AoPair]) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| {
        (x.action == y.action || x.action == NO_ACTION || y.action == NO_ACTION)
            && (x.observation == y.observation
                || x.observation == NO_OBSERVATION
                || y.observation == NO_OBSERVATION)
    })
}
