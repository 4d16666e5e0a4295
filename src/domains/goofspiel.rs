use crate::game::action::PlayerAction;
use crate::game::domain::Domain;
use crate::game::observation::ObservationId;
use crate::game::outcome::Outcome;
use crate::game::outcome::OutcomeDistribution;
use crate::game::outcome::OutcomeEntry;
use crate::game::player::Player;
use crate::game::state::State;
use crate::Utility;
use std::rc::Rc;

/// goofspiel. each round nature reveals a prize card, both players
/// simultaneously bid one card from their hand, and the higher bid
/// wins the prize value (the loser pays it; ties burn the prize).
///
/// with complete observations the bids become public; with incomplete
/// observations only the round result does. IIGS-N is the incomplete
/// variant with the prize deck dealt in fixed descending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoofspielVariant {
    CompleteObservations,
    IncompleteObservations,
}

pub struct Goofspiel {
    cards: u8,
    variant: GoofspielVariant,
    /// prize order when the deal is fixed, nothing for a random deal
    chance_cards: Option<Vec<u8>>,
}

impl Goofspiel {
    pub fn fixed_deal(chance_cards: Vec<u8>, variant: GoofspielVariant) -> Self {
        Self {
            cards: chance_cards.len() as u8,
            variant,
            chance_cards: Some(chance_cards),
        }
    }
    pub fn random_deal(cards: u8, variant: GoofspielVariant) -> Self {
        Self {
            cards,
            variant,
            chance_cards: None,
        }
    }
    /// imperfect-information goofspiel with N cards dealt N, N-1, .., 1
    pub fn iigs(cards: u8) -> Self {
        Self::fixed_deal(
            (1..=cards).rev().collect(),
            GoofspielVariant::IncompleteObservations,
        )
    }
}

impl Domain for Goofspiel {
    fn root_distribution(&self) -> OutcomeDistribution {
        let deck = (1..=self.cards).collect::<Vec<u8>>();
        match &self.chance_cards {
            Some(order) => {
                // the first prize is already on the table
                let prize = order[0];
                Outcome {
                    state: Rc::new(GoofspielState {
                        variant: self.variant,
                        decks: [deck.clone(), deck],
                        nature: order[1..].to_vec(),
                        fixed: true,
                        prize: Some(prize),
                    }),
                    privates: [prize_observation(prize), prize_observation(prize)],
                    public: prize_observation(prize),
                    rewards: [0., 0.],
                }
                .deterministic()
            }
            None => Outcome {
                state: Rc::new(GoofspielState {
                    variant: self.variant,
                    decks: [deck.clone(), deck.clone()],
                    nature: deck,
                    fixed: false,
                    prize: None,
                }),
                privates: [prize_observation(0), prize_observation(0)],
                public: prize_observation(0),
                rewards: [0., 0.],
            }
            .deterministic(),
        }
    }
    fn is_zero_sum(&self) -> bool {
        true
    }
    fn max_utility(&self) -> Utility {
        (1..=self.cards).map(|card| card as Utility).sum()
    }
    fn max_state_depth(&self) -> u32 {
        2 * self.cards as u32 + 2
    }
}

impl std::fmt::Display for Goofspiel {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let variant = match self.variant {
            GoofspielVariant::CompleteObservations => "GS",
            GoofspielVariant::IncompleteObservations => "IIGS",
        };
        write!(f, "{}-{}", variant, self.cards)
    }
}

const OBS_ROUND_WIN: u32 = 0;
const OBS_ROUND_LOSS: u32 = 1;
const OBS_ROUND_DRAW: u32 = 2;

fn prize_observation(card: u8) -> ObservationId {
    ObservationId(16 + card as u32)
}
fn bids_observation(bid0: u8, bid1: u8) -> ObservationId {
    ObservationId(64 + 16 * bid0 as u32 + bid1 as u32)
}

struct GoofspielState {
    variant: GoofspielVariant,
    /// remaining hand of each player, ascending; action ids index it
    decks: [Vec<u8>; 2],
    /// remaining prize cards: upcoming order when fixed, a pool when random
    nature: Vec<u8>,
    fixed: bool,
    prize: Option<u8>,
}

impl GoofspielState {
    fn reveal(&self, index: usize) -> Outcome {
        let prize = self.nature[index];
        let mut nature = self.nature.clone();
        nature.remove(index);
        Outcome {
            state: Rc::new(GoofspielState {
                variant: self.variant,
                decks: self.decks.clone(),
                nature,
                fixed: self.fixed,
                prize: Some(prize),
            }),
            privates: [prize_observation(prize), prize_observation(prize)],
            public: prize_observation(prize),
            rewards: [0., 0.],
        }
    }
}

impl State for GoofspielState {
    fn players(&self) -> Vec<Player> {
        if self.prize.is_some() && !self.is_terminal() {
            vec![Player(0), Player(1)]
        } else {
            vec![]
        }
    }

    fn count_actions(&self, player: Player) -> usize {
        if self.prize.is_some() {
            self.decks[player.index()].len()
        } else {
            0
        }
    }

    fn apply_actions(&self, round: &[PlayerAction]) -> OutcomeDistribution {
        let Some(prize) = self.prize else {
            // prize-reveal round: nobody acts, nature shows a card
            return match self.fixed {
                true => self.reveal(0).deterministic(),
                false => {
                    let prob = 1. / self.nature.len() as f64;
                    (0..self.nature.len())
                        .map(|index| OutcomeEntry {
                            outcome: self.reveal(index),
                            prob,
                        })
                        .collect()
                }
            };
        };

        let mut bids = [0u8; 2];
        for (player, action) in round {
            bids[player.index()] = self.decks[player.index()][action.index()];
        }
        let mut decks = self.decks.clone();
        decks[0].retain(|card| *card != bids[0]);
        decks[1].retain(|card| *card != bids[1]);
        let value = prize as Utility;
        let rewards = match bids[0].cmp(&bids[1]) {
            std::cmp::Ordering::Greater => [value, -value],
            std::cmp::Ordering::Less => [-value, value],
            std::cmp::Ordering::Equal => [0., 0.],
        };
        let (privates, public) = match self.variant {
            GoofspielVariant::CompleteObservations => {
                let bids = bids_observation(bids[0], bids[1]);
                ([bids, bids], bids)
            }
            GoofspielVariant::IncompleteObservations => {
                let result = match bids[0].cmp(&bids[1]) {
                    std::cmp::Ordering::Greater => OBS_ROUND_WIN,
                    std::cmp::Ordering::Less => OBS_ROUND_LOSS,
                    std::cmp::Ordering::Equal => OBS_ROUND_DRAW,
                };
                let mirrored = match result {
                    OBS_ROUND_WIN => OBS_ROUND_LOSS,
                    OBS_ROUND_LOSS => OBS_ROUND_WIN,
                    _ => OBS_ROUND_DRAW,
                };
                (
                    [ObservationId(result), ObservationId(mirrored)],
                    ObservationId(result),
                )
            }
        };
        Outcome {
            state: Rc::new(GoofspielState {
                variant: self.variant,
                decks,
                nature: self.nature.clone(),
                fixed: self.fixed,
                prize: None,
            }),
            privates,
            public,
            rewards,
        }
        .deterministic()
    }

    fn is_terminal(&self) -> bool {
        self.prize.is_none() && self.decks[0].is_empty()
    }
}

impl std::fmt::Display for GoofspielState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "[{:?}|{:?}|prize {:?}]",
            self.decks[0], self.decks[1], self.prize
        )
    }
}
