use super::action::ActionId;
use super::action::PlayerAction;
use super::outcome::OutcomeDistribution;
use super::player::Player;

/// a state of the compact transition system that the EFG unfolds.
///
/// a round may involve several players; they act sequentially at the
/// EFG level but the state transitions only once all of them have
/// committed. an empty player set means a pure chance round, used by
/// domains to deliver observations even when nobody moves.
pub trait State: std::fmt::Display {
    /// players acting in the current round, in their move order
    fn players(&self) -> Vec<Player>;

    fn count_actions(&self, player: Player) -> usize;

    /// action ids equal their position in this list
    fn available_actions(&self, player: Player) -> Vec<ActionId> {
        (0..self.count_actions(player) as u32)
            .map(ActionId)
            .collect()
    }

    /// transition once every round player has committed an action.
    /// called with an empty slice in pure chance rounds.
    fn apply_actions(&self, round: &[PlayerAction]) -> OutcomeDistribution;

    fn is_terminal(&self) -> bool;
}
