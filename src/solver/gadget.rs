use crate::cache::oos_data::PublicStateSummary;
use crate::efg::aoh::Aoh;
use crate::efg::node::EfgNode;
use crate::game::player::Player;
use crate::Probability;
use crate::Utility;
use std::rc::Rc;

/// index of the Follow action at a gadget opponent node; Terminate,
/// when present, sits right after it
pub const FOLLOW: usize = 0;
pub const TERMINATE: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GadgetVariant {
    /// the opponent may Terminate for their pre-resolving value
    Safe,
    /// Follow only; sound when the opponent cannot tell the topmost
    /// histories apart anyway
    Unsafe,
}

/// the synthetic subgame attached at a public state for resolving.
///
/// a gadget chance node picks one topmost history with its normalized
/// reach probability; each picked history becomes an opponent node
/// offering Follow (into the original subgame) and, in the safe
/// variant, Terminate (for the history's pre-resolving expected
/// utility, scaled by `pub_state_reach` during evaluation).
pub struct Gadget {
    summary: PublicStateSummary,
    resolving_player: Player,
    target: Rc<Aoh>,
    variant: GadgetVariant,
    pub_state_reach: Probability,
    chance_probs: Vec<Probability>,
}

impl Gadget {
    /// build the gadget for `resolving_player` standing in `target`
    /// within the summarized public state. the variant is unsafe
    /// exactly when all topmost histories share the opponent's
    /// augmented infoset.
    pub fn new(summary: PublicStateSummary, resolving_player: Player, target: Rc<Aoh>) -> Self {
        assert!(
            !summary.topmost_histories.is_empty(),
            "a reached public state has histories"
        );
        let opponent = resolving_player.opponent();
        let awareness = summary.topmost_histories[0].augmented_infoset(opponent);
        let variant = match summary
            .topmost_histories
            .iter()
            .all(|history| history.augmented_infoset(opponent) == awareness)
        {
            true => GadgetVariant::Unsafe,
            false => GadgetVariant::Safe,
        };
        let reaches = summary
            .reach_probs
            .iter()
            .map(|reach| reach[0] * reach[1] * reach[2])
            .collect::<Vec<_>>();
        let pub_state_reach = reaches.iter().sum::<Probability>();
        let chance_probs = match pub_state_reach {
            total if total > 0. => reaches.iter().map(|reach| reach / total).collect(),
            _ => vec![1. / reaches.len() as f64; reaches.len()],
        };
        Self {
            summary,
            resolving_player,
            target,
            variant,
            pub_state_reach,
            chance_probs,
        }
    }

    pub fn variant(&self) -> GadgetVariant {
        self.variant
    }
    pub fn resolving_player(&self) -> Player {
        self.resolving_player
    }
    pub fn opponent(&self) -> Player {
        self.resolving_player.opponent()
    }
    pub fn target(&self) -> &Rc<Aoh> {
        &self.target
    }
    pub fn pub_state_reach(&self) -> Probability {
        self.pub_state_reach
    }
    pub fn histories(&self) -> usize {
        self.summary.topmost_histories.len()
    }
    pub fn chance_probs(&self) -> &[Probability] {
        &self.chance_probs
    }
    pub fn chance_prob(&self, index: usize) -> Probability {
        self.chance_probs[index]
    }
    /// the inner EFG node behind Follow
    pub fn follow(&self, index: usize) -> &Rc<EfgNode> {
        &self.summary.topmost_histories[index]
    }
    /// actions of the opponent node: Follow, plus Terminate when safe
    pub fn opponent_actions(&self) -> usize {
        match self.variant {
            GadgetVariant::Safe => 2,
            GadgetVariant::Unsafe => 1,
        }
    }
    /// pre-resolving expected utility paid out by Terminate, on the
    /// original EFG scale
    pub fn terminate_utility(&self, index: usize, player: Player) -> Utility {
        self.summary.expected_utilities[index][player.index()]
    }
    /// what the opponent knows at the gadget node of this history
    pub fn opponent_infoset(&self, index: usize) -> Aoh {
        self.summary.topmost_histories[index].augmented_infoset(self.opponent())
    }
    /// does this history lie in the resolving player's play infoset?
    pub fn is_target_history(&self, index: usize) -> bool {
        self.summary.topmost_histories[index].aoh(self.resolving_player) == self.target.pairs()
    }
    /// total gadget chance mass on the play infoset
    pub fn play_infoset_reach(&self) -> Probability {
        (0..self.histories())
            .filter(|index| self.is_target_history(*index))
            .map(|index| self.chance_prob(index))
            .sum()
    }
}
