use crate::cache::infosets::InfosetCache;
use crate::cache::TreeCache;
use crate::efg::aoh::Aoh;
use crate::game::domain::Domain;
use crate::Probability;
use std::rc::Rc;

/// how the playing loop should proceed after an iteration batch:
/// keep calling in this round, stop for this round, or abandon the
/// match and let the driver play uniformly at random from now on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayControl {
    ContinueImproving,
    StopImproving,
    GiveUp,
}

/// an algorithm capable of playing a match by being told the infoset
/// it currently stands in. `None` means preplay from the root.
///
/// the algorithm must not run any computation at construction time;
/// all work happens inside `run_play_iteration`, which is the only
/// suspension point the driver budgets.
pub trait GamePlayingAlgorithm {
    fn run_play_iteration(&mut self, current: Option<&Rc<Aoh>>) -> PlayControl;

    /// distribution over the actions of the current infoset, summing
    /// to 1. `None` means the algorithm failed to find one and gives
    /// up the game.
    fn play_distribution(&mut self, current: &Rc<Aoh>) -> Option<Vec<Probability>>;
}

/// gives up right away; the driver then plays uniformly at random
pub struct RandomPlayer;

impl GamePlayingAlgorithm for RandomPlayer {
    fn run_play_iteration(&mut self, _: Option<&Rc<Aoh>>) -> PlayControl {
        PlayControl::StopImproving
    }
    fn play_distribution(&mut self, _: &Rc<Aoh>) -> Option<Vec<Probability>> {
        None
    }
}

/// always plays the fixed action index, in modulo arithmetic so that
/// negative indices count from the back
pub struct FixedActionPlayer {
    cache: InfosetCache,
    action_index: i64,
    built: bool,
}

impl FixedActionPlayer {
    pub fn new(domain: &dyn Domain, action_index: i64) -> Self {
        Self {
            cache: InfosetCache::new(domain),
            action_index,
            built: false,
        }
    }
}

impl GamePlayingAlgorithm for FixedActionPlayer {
    fn run_play_iteration(&mut self, _: Option<&Rc<Aoh>>) -> PlayControl {
        if !self.built {
            self.cache.build_tree();
            self.built = true;
        }
        PlayControl::StopImproving
    }
    fn play_distribution(&mut self, current: &Rc<Aoh>) -> Option<Vec<Probability>> {
        let histories = self.cache.histories_for(current);
        let actions = histories.first()?.count_actions() as i64;
        let chosen = (actions + self.action_index % actions) % actions;
        let mut distribution = vec![0.; actions as usize];
        distribution[chosen as usize] = 1.;
        Some(distribution)
    }
}
