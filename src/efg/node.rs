use super::aoh::Aoh;
use super::aoh::AoPair;
use super::public_state::PublicState;
use crate::game::action::ActionId;
use crate::game::action::PlayerAction;
use crate::game::action::NO_ACTION;
use crate::game::domain::Domain;
use crate::game::observation::ObservationId;
use crate::game::observation::NO_OBSERVATION;
use crate::game::outcome::Outcome;
use crate::game::outcome::OutcomeDistribution;
use crate::game::outcome::OutcomeEntry;
use crate::game::player::Player;
use crate::game::state::State;
use crate::Probability;
use crate::Utility;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Chance,
    Player(Player),
    Terminal,
}

/// a node of the EFG unfolded from the factored-observation game.
///
/// nodes are cheap to expand but **nothing here is memoized**: use the
/// caches to expand, so that repeated `perform` calls hand back the
/// same `Rc` and infoset/public-state indices stay consistent.
///
/// identity, equality and hashing are all by the expansion path. the
/// child holds the only strong handle to its parent, so the chain root
/// stays alive as long as any descendant does and no cycles form.
pub struct EfgNode {
    parent: Option<Rc<EfgNode>>,
    incoming: Option<ActionId>,
    kind: NodeKind,
    last_outcome: Option<Outcome>,
    outcome_dist: OutcomeDistribution,
    remaining_players: Vec<Player>,
    round_actions: Vec<PlayerAction>,
    state_depth: u32,
    max_state_depth: u32,
    cum_rewards: [Utility; 2],
    history: Vec<ActionId>,
}

impl EfgNode {
    /// unfold the root of the domain. a deterministic root outcome
    /// skips the chance node and roots the tree at the realized state;
    /// only a root chance node gets to have state depth 0.
    pub fn root(domain: &dyn Domain) -> Rc<Self> {
        let dist = domain.root_distribution();
        assert!(!dist.is_empty(), "root outcome distribution is empty");
        let max_state_depth = domain.max_state_depth();
        if dist.len() > 1 {
            return Self::spawn(
                None,
                None,
                NodeKind::Chance,
                None,
                dist,
                vec![],
                vec![],
                0,
                max_state_depth,
            );
        }
        let OutcomeEntry { outcome, prob } = dist.into_iter().next().expect("nonempty");
        assert!((prob - 1.).abs() < crate::NORMALIZATION_TOLERANCE);
        let state = outcome.state.clone();
        assert!(
            !state.is_terminal(),
            "nobody plays and utilities are handed out right away"
        );
        let players = state.players();
        if players.is_empty() {
            // chance padding at the very root
            let padding = state.apply_actions(&[]);
            Self::spawn(
                None,
                None,
                NodeKind::Chance,
                Some(outcome),
                padding,
                vec![],
                vec![],
                0,
                max_state_depth,
            )
        } else {
            let kind = NodeKind::Player(players[0]);
            Self::spawn(
                None,
                None,
                kind,
                Some(outcome),
                vec![],
                players,
                vec![],
                1,
                max_state_depth,
            )
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn(
        parent: Option<&Rc<EfgNode>>,
        incoming: Option<ActionId>,
        kind: NodeKind,
        last_outcome: Option<Outcome>,
        outcome_dist: OutcomeDistribution,
        remaining_players: Vec<Player>,
        round_actions: Vec<PlayerAction>,
        state_depth: u32,
        max_state_depth: u32,
    ) -> Rc<Self> {
        if !outcome_dist.is_empty() {
            let sum = outcome_dist.iter().map(|e| e.prob).sum::<Probability>();
            assert!(
                (sum - 1.).abs() < crate::NORMALIZATION_TOLERANCE,
                "outcome distribution sums to {}",
                sum
            );
        }
        if let (Some(_), Some(outcome)) = (parent, last_outcome.as_ref()) {
            // state terminal implies EFG terminal
            assert!(!outcome.state.is_terminal() || kind == NodeKind::Terminal);
        }
        let cum_rewards = match parent {
            None => [0., 0.],
            Some(parent) => {
                let rewards = last_outcome.as_ref().map(|o| o.rewards).unwrap_or([0., 0.]);
                if parent.state_depth == state_depth {
                    parent.cum_rewards
                } else {
                    [
                        parent.cum_rewards[0] + rewards[0],
                        parent.cum_rewards[1] + rewards[1],
                    ]
                }
            }
        };
        let history = match (parent, incoming) {
            (Some(parent), Some(action)) => {
                let mut history = parent.history.clone();
                history.push(action);
                history
            }
            _ => vec![],
        };
        Rc::new(Self {
            parent: parent.cloned(),
            incoming,
            kind,
            last_outcome,
            outcome_dist,
            remaining_players,
            round_actions,
            state_depth,
            max_state_depth,
            cum_rewards,
            history,
        })
    }

    /// expand the child reached by `action`. pure in `(self, action)`.
    pub fn perform(self: &Rc<Self>, action: ActionId) -> Rc<EfgNode> {
        match self.kind {
            NodeKind::Chance => self.perform_chance(action),
            NodeKind::Player(_) => self.perform_player(action),
            NodeKind::Terminal => unreachable!("cannot perform actions in a terminal node"),
        }
    }

    fn perform_chance(self: &Rc<Self>, action: ActionId) -> Rc<EfgNode> {
        // chance is always the last mover of a round
        assert!(self.remaining_players.is_empty());
        assert!(
            action.index() < self.outcome_dist.len(),
            "chance action id out of range"
        );
        let entry = self.outcome_dist[action.index()].clone();
        self.realize_outcome(action, entry)
    }

    fn perform_player(self: &Rc<Self>, action: ActionId) -> Rc<EfgNode> {
        let NodeKind::Player(player) = self.kind else {
            unreachable!()
        };
        assert!(!self.remaining_players.is_empty());
        assert!(
            action.index() < self.state().count_actions(player),
            "action id out of range"
        );
        let mut round = self.round_actions.clone();
        round.push((player, action));

        // more round players to go: pass the data along, no transition
        if self.remaining_players.len() > 1 {
            let shifted = self.remaining_players[1..].to_vec();
            return Self::spawn(
                Some(self),
                Some(action),
                NodeKind::Player(shifted[0]),
                self.last_outcome.clone(),
                vec![],
                shifted,
                round,
                self.state_depth,
                self.max_state_depth,
            );
        }

        // the round is complete, ask the state to transition
        let dist = self.state().apply_actions(&round);
        assert!(!dist.is_empty());
        if dist.len() > 1 {
            return Self::spawn(
                Some(self),
                Some(action),
                NodeKind::Chance,
                self.last_outcome.clone(),
                dist,
                vec![],
                round,
                self.state_depth,
                self.max_state_depth,
            );
        }
        let entry = dist.into_iter().next().expect("nonempty");
        assert!((entry.prob - 1.).abs() < crate::NORMALIZATION_TOLERANCE);
        self.realize_outcome(action, entry)
    }

    /// a single outcome is realized and a new round begins: terminal if
    /// the state says so or the state depth runs out, player node if
    /// someone acts next, otherwise a padding chance node so that
    /// observations get delivered even in rounds where nobody moves.
    fn realize_outcome(self: &Rc<Self>, action: ActionId, entry: OutcomeEntry) -> Rc<EfgNode> {
        let OutcomeEntry { outcome, .. } = entry;
        let next = outcome.state.clone();
        let depth = self.state_depth + 1;
        let players = next.players();
        let kind = if next.is_terminal() || depth == self.max_state_depth {
            NodeKind::Terminal
        } else if players.is_empty() {
            NodeKind::Chance
        } else {
            NodeKind::Player(players[0])
        };
        match kind {
            NodeKind::Chance => {
                let padding = next.apply_actions(&[]);
                Self::spawn(
                    Some(self),
                    Some(action),
                    kind,
                    Some(outcome),
                    padding,
                    vec![],
                    vec![],
                    depth,
                    self.max_state_depth,
                )
            }
            _ => Self::spawn(
                Some(self),
                Some(action),
                kind,
                Some(outcome),
                vec![],
                players,
                vec![],
                depth,
                self.max_state_depth,
            ),
        }
    }

    /// local accessors

    pub fn kind(&self) -> NodeKind {
        self.kind
    }
    pub fn is_terminal(&self) -> bool {
        self.kind == NodeKind::Terminal
    }
    pub fn is_player_node(&self) -> bool {
        matches!(self.kind, NodeKind::Player(_))
    }
    /// the acting player; only defined at player nodes
    pub fn player(&self) -> Player {
        match self.kind {
            NodeKind::Player(player) => player,
            _ => unreachable!("only player nodes have an acting player"),
        }
    }
    pub fn parent(&self) -> Option<&Rc<EfgNode>> {
        self.parent.as_ref()
    }
    pub fn incoming(&self) -> Option<ActionId> {
        self.incoming
    }
    pub fn state(&self) -> &Rc<dyn State> {
        &self
            .last_outcome
            .as_ref()
            .expect("root chance node has no state yet")
            .state
    }
    pub fn state_depth(&self) -> u32 {
        self.state_depth
    }
    pub fn efg_depth(&self) -> usize {
        self.history.len()
    }
    pub fn history(&self) -> &[ActionId] {
        &self.history
    }
    /// cumulative per-player rewards; at terminals these are the
    /// utilities of the leaf
    pub fn utilities(&self) -> [Utility; 2] {
        self.cum_rewards
    }

    pub fn count_actions(&self) -> usize {
        match self.kind {
            NodeKind::Player(player) => self.state().count_actions(player),
            NodeKind::Chance => self.outcome_dist.len(),
            NodeKind::Terminal => 0,
        }
    }
    pub fn actions(&self) -> Vec<ActionId> {
        (0..self.count_actions() as u32).map(ActionId).collect()
    }
    pub fn chance_prob(&self, action: ActionId) -> Probability {
        assert!(self.kind == NodeKind::Chance);
        self.outcome_dist[action.index()].prob
    }
    pub fn chance_probs(&self) -> Vec<Probability> {
        assert!(self.kind == NodeKind::Chance);
        self.outcome_dist.iter().map(|e| e.prob).collect()
    }

    /// did this node realize a new outcome, i.e. result from a
    /// transition of the underlying transition system?
    fn has_new_outcome(&self) -> bool {
        match self.parent.as_ref() {
            None => false,
            Some(parent) => parent.state_depth != self.state_depth,
        }
    }

    /// action-observation history of `player` along the path to here.
    ///
    /// the rules that make this well defined across an infoset:
    /// - a chance parent always ends a round: overwrite the last
    ///   observation if the player moved in that round (or it is the
    ///   root chance), otherwise append an announcement entry
    /// - a player parent: record the action if it was the player's own
    ///   move, else append a sentinel entry; overwrite the observation
    ///   when the move also realized a new outcome
    /// - trailing sentinel entries are trimmed so that "no information"
    ///   never conveys information; the root entry always stays
    /// - the mover appends a player-move marker so that infosets and
    ///   augmented infosets never collide
    pub fn aoh(&self, player: Player) -> Vec<AoPair> {
        let Some(parent) = self.parent.as_ref() else {
            return match self.kind {
                NodeKind::Chance => vec![AoPair::NONE],
                NodeKind::Player(acting) => {
                    // a deterministic root outcome may already have
                    // told the players something
                    let initial = self
                        .last_outcome
                        .as_ref()
                        .expect("player root carries an outcome")
                        .privates[player.index()];
                    let mut aoh = vec![AoPair {
                        action: NO_ACTION,
                        observation: initial,
                    }];
                    if acting == player {
                        aoh.push(AoPair {
                            action: NO_ACTION,
                            observation: ObservationId::player_move(player),
                        });
                    }
                    aoh
                }
                NodeKind::Terminal => unreachable!("root cannot be terminal"),
            };
        };

        let mut aoh = parent.aoh(player);
        let observation = self
            .last_outcome
            .as_ref()
            .expect("non-root node carries an outcome")
            .privates[player.index()];
        let action = self.incoming.expect("non-root node has an incoming action");
        let last = aoh.last_mut().expect("the root entry always exists");

        match parent.kind {
            NodeKind::Chance => {
                let moved = parent.parent.is_none() || parent.state().players().contains(&player);
                if moved {
                    last.observation = observation;
                } else {
                    // announced without the player doing anything
                    aoh.push(AoPair {
                        action: NO_ACTION,
                        observation,
                    });
                }
            }
            NodeKind::Player(acting) => {
                if acting == player {
                    last.action = action;
                } else {
                    aoh.push(AoPair::NONE);
                }
                if self.has_new_outcome() {
                    aoh.last_mut().expect("nonempty").observation = observation;
                }
            }
            NodeKind::Terminal => unreachable!("parent cannot be terminal"),
        }

        if aoh.len() > 1 && *aoh.last().expect("nonempty") == AoPair::NONE {
            aoh.pop();
        }
        if let NodeKind::Player(acting) = self.kind {
            if acting == player {
                aoh.push(AoPair {
                    action: NO_ACTION,
                    observation: ObservationId::player_move(player),
                });
            }
        }
        aoh
    }

    /// the acting player's infoset at this node
    pub fn infoset(&self) -> Aoh {
        Aoh::from(self.player(), self.aoh(self.player()))
    }

    /// `player`'s awareness at this node, whether they act here or not
    pub fn augmented_infoset(&self, player: Player) -> Aoh {
        Aoh::from(player, self.aoh(player))
    }

    /// public observations along the path, with a marker whenever the
    /// mover changes (a repeated move of the same player may be secret)
    pub fn public_observations(&self) -> Vec<ObservationId> {
        let Some(parent) = self.parent.as_ref() else {
            return vec![];
        };
        let mut observations = parent.public_observations();
        let public = self
            .last_outcome
            .as_ref()
            .expect("non-root node carries an outcome")
            .public;
        if self.has_new_outcome() && public != NO_OBSERVATION {
            observations.push(public);
        }
        if let NodeKind::Player(acting) = self.kind {
            let announce = match parent.kind {
                NodeKind::Chance => true,
                NodeKind::Player(previous) => previous != acting,
                NodeKind::Terminal => unreachable!("parent cannot be terminal"),
            };
            if announce {
                observations.push(ObservationId::player_move(acting));
            }
        }
        observations
    }

    pub fn public_state(&self) -> PublicState {
        PublicState::from(self.public_observations())
    }
}

impl PartialEq for EfgNode {
    fn eq(&self, other: &Self) -> bool {
        self.history == other.history
    }
}
impl Eq for EfgNode {}

impl std::hash::Hash for EfgNode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.history.hash(state)
    }
}

impl std::fmt::Display for EfgNode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "N[")?;
        for action in &self.history {
            write!(f, "{},", action)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::goofspiel::Goofspiel;
    use crate::domains::goofspiel::GoofspielVariant;
    use crate::domains::pennies::MatchingPennies;
    use crate::domains::pennies::PenniesVariant;
    use crate::efg::tree::tree_walk;

    #[test]
    fn alternating_pennies_unfolds_to_seven_nodes() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let mut nodes = 0;
        let mut terminals = 0;
        tree_walk(&domain, &mut |node| {
            nodes += 1;
            if node.is_terminal() {
                terminals += 1;
                assert_eq!(node.utilities()[0] + node.utilities()[1], 0.);
            }
        });
        assert_eq!(nodes, 7);
        assert_eq!(terminals, 4);
    }

    #[test]
    fn state_depth_is_monotone_and_tracks_outcomes() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        tree_walk(&domain, &mut |node| {
            if let Some(parent) = node.parent() {
                assert!(node.state_depth() >= parent.state_depth());
                assert!(node.state_depth() <= parent.state_depth() + 1);
            }
        });
    }

    #[test]
    fn second_player_cannot_distinguish_first_move() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let root = EfgNode::root(&domain);
        assert_eq!(root.kind(), NodeKind::Player(Player(0)));
        let heads = root.perform(ActionId(0));
        let tails = root.perform(ActionId(1));
        assert_eq!(heads.kind(), NodeKind::Player(Player(1)));
        // one infoset for player 1, but distinct augmented awareness
        // of player 0 who knows what they played
        assert_eq!(heads.infoset(), tails.infoset());
        assert_ne!(
            heads.augmented_infoset(Player(0)),
            tails.augmented_infoset(Player(0))
        );
        // the mover's own infoset differs from the augmented view of
        // the same history
        assert_ne!(heads.infoset(), heads.augmented_infoset(Player(0)));
    }

    #[test]
    fn own_actions_are_recorded_in_aoh() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let root = EfgNode::root(&domain);
        let heads = root.perform(ActionId(0));
        let aoh = heads.aoh(Player(0));
        assert_eq!(aoh[0].action, ActionId(0));
        let aoh = heads.aoh(Player(1));
        assert!(aoh.iter().all(|pair| pair.action == NO_ACTION));
    }

    #[test]
    fn terminal_rewards_accumulate_along_the_path() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let root = EfgNode::root(&domain);
        let both_heads = root.perform(ActionId(0)).perform(ActionId(0));
        assert!(both_heads.is_terminal());
        assert_eq!(both_heads.utilities(), [1., -1.]);
        let mismatched = root.perform(ActionId(0)).perform(ActionId(1));
        assert_eq!(mismatched.utilities(), [-1., 1.]);
    }

    #[test]
    fn random_deal_goofspiel_roots_at_a_chance_node() {
        let domain = Goofspiel::random_deal(3, GoofspielVariant::IncompleteObservations);
        let root = EfgNode::root(&domain);
        assert_eq!(root.kind(), NodeKind::Chance);
        assert_eq!(root.state_depth(), 0);
        assert_eq!(root.count_actions(), 3);
        let sum = root.chance_probs().iter().sum::<f64>();
        assert!((sum - 1.).abs() < 1e-9);
        // realizing a prize card enters the first bidding round
        let child = root.perform(ActionId(0));
        assert_eq!(child.kind(), NodeKind::Player(Player(0)));
        assert_eq!(child.state_depth(), 1);
    }

    #[test]
    fn chance_padding_reveals_later_prizes() {
        let domain = Goofspiel::random_deal(2, GoofspielVariant::IncompleteObservations);
        let root = EfgNode::root(&domain);
        // deal, bid, bid: the second deal is a padding chance round
        // where nobody acts but both players observe the new prize
        let bid = root.perform(ActionId(0)).perform(ActionId(0));
        let padding = bid.perform(ActionId(0));
        assert_eq!(padding.kind(), NodeKind::Chance);
        assert_eq!(padding.count_actions(), 1);
        let next_round = padding.perform(ActionId(0));
        assert_eq!(next_round.kind(), NodeKind::Player(Player(0)));
    }

    #[test]
    fn simultaneous_round_players_share_the_state() {
        let domain = MatchingPennies::new(PenniesVariant::Simultaneous);
        let root = EfgNode::root(&domain);
        assert_eq!(root.kind(), NodeKind::Player(Player(0)));
        let second = root.perform(ActionId(0));
        // the state has not transitioned yet
        assert_eq!(second.kind(), NodeKind::Player(Player(1)));
        assert_eq!(second.state_depth(), root.state_depth());
        // and the second mover has not seen the first move
        assert_eq!(
            second.infoset(),
            root.perform(ActionId(1)).infoset()
        );
        assert!(second.perform(ActionId(0)).is_terminal());
    }

    #[test]
    fn histories_in_one_infoset_are_ao_compatible() {
        use crate::efg::aoh::is_ao_compatible;
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let root = EfgNode::root(&domain);
        let heads = root.perform(ActionId(0));
        let tails = root.perform(ActionId(1));
        let infoset = heads.infoset();
        assert!(is_ao_compatible(
            infoset.pairs(),
            tails.aoh(Player(1)).as_slice()
        ));
    }
}
