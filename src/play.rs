use crate::efg::aoh::Aoh;
use crate::efg::node::EfgNode;
use crate::efg::node::NodeKind;
use crate::game::action::ActionId;
use crate::game::domain::Domain;
use crate::solver::algorithm::GamePlayingAlgorithm;
use crate::solver::algorithm::PlayControl;
use crate::solver::sampling::pick_from;
use crate::Utility;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetType {
    /// wall-clock microseconds
    Time,
    /// iteration count
    Iterations,
}

/// run play iterations until the budget runs out or the algorithm
/// stops. budgets are enforced at iteration boundaries only: a running
/// iteration is allowed to finish, and an overshoot beyond the
/// tolerance lands in the log. returns whether the algorithm is still
/// in the game (gave up ⇒ false).
pub fn play_for_budget(
    algorithm: &mut dyn GamePlayingAlgorithm,
    infoset: Option<&Rc<Aoh>>,
    budget: u64,
    budget_type: BudgetType,
) -> bool {
    let mut state = PlayControl::ContinueImproving;
    match budget_type {
        BudgetType::Iterations => {
            for _ in 0..budget {
                state = algorithm.run_play_iteration(infoset);
                if state != PlayControl::ContinueImproving {
                    break;
                }
            }
        }
        BudgetType::Time => {
            let mut remaining = budget as i128;
            while remaining > 0 && state == PlayControl::ContinueImproving {
                let clock = std::time::Instant::now();
                state = algorithm.run_play_iteration(infoset);
                remaining -= clock.elapsed().as_micros() as i128;
            }
            if remaining < -(crate::BUDGET_OVERSHOOT_US as i128) {
                log::warn!("budget missed by {} us", -remaining);
            }
        }
    }
    state != PlayControl::GiveUp
}

/// play one match between two algorithms on the true EFG: preplay
/// both, then walk from the root sampling chance by the domain
/// distribution and moves from the acting algorithm's play
/// distribution. an algorithm that gave up (or returned no
/// distribution) plays uniformly at random for the rest of the match.
/// returns the terminal utilities.
pub fn play_match(
    domain: &dyn Domain,
    mut algorithms: [&mut dyn GamePlayingAlgorithm; 2],
    preplay_budget: [u64; 2],
    move_budget: [u64; 2],
    budget_type: BudgetType,
    seed: u64,
) -> [Utility; 2] {
    let mut alive = [true, true];
    for (index, algorithm) in algorithms.iter_mut().enumerate() {
        alive[index] = play_for_budget(&mut **algorithm, None, preplay_budget[index], budget_type);
    }

    let mut rng = SmallRng::seed_from_u64(seed);
    let mut node = EfgNode::root(domain);
    while !node.is_terminal() {
        let action = match node.kind() {
            NodeKind::Chance => pick_from(&node.chance_probs(), &mut rng),
            NodeKind::Player(player) => {
                let seat = player.index();
                let infoset = Rc::new(node.infoset());
                if alive[seat] {
                    alive[seat] = play_for_budget(
                        &mut *algorithms[seat],
                        Some(&infoset),
                        move_budget[seat],
                        budget_type,
                    );
                }
                let mut distribution = None;
                if alive[seat] {
                    distribution = algorithms[seat].play_distribution(&infoset);
                    if distribution.is_none() {
                        log::info!("{} found no distribution and gives up", player);
                        alive[seat] = false;
                    }
                }
                let actions = node.count_actions();
                let distribution =
                    distribution.unwrap_or_else(|| vec![1. / actions as f64; actions]);
                assert!(distribution.len() == actions);
                debug_assert!((distribution.iter().sum::<f64>() - 1.).abs() < 1e-9);
                pick_from(&distribution, &mut rng)
            }
            NodeKind::Terminal => unreachable!(),
        };
        node = node.perform(ActionId(action as u32));
    }
    log::info!("match finished with utilities {:?}", node.utilities());
    node.utilities()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::oos_data::OosData;
    use crate::domains::goofspiel::Goofspiel;
    use crate::domains::pennies::MatchingPennies;
    use crate::domains::pennies::PenniesVariant;
    use crate::game::player::Player;
    use crate::solver::algorithm::FixedActionPlayer;
    use crate::solver::algorithm::RandomPlayer;
    use crate::solver::oos::OosAlgorithm;
    use crate::solver::oos::OosSettings;

    #[test]
    fn fixed_players_produce_a_deterministic_match() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let mut first = FixedActionPlayer::new(&domain, 0);
        let mut second = FixedActionPlayer::new(&domain, -1);
        let utilities = play_match(
            &domain,
            [&mut first, &mut second],
            [1, 1],
            [1, 1],
            BudgetType::Iterations,
            42,
        );
        // heads against tails: the first player loses
        assert_eq!(utilities, [-1., 1.]);
    }

    #[test]
    fn givers_up_fall_back_to_uniform_random() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let mut first = RandomPlayer;
        let mut second = RandomPlayer;
        let utilities = play_match(
            &domain,
            [&mut first, &mut second],
            [1, 1],
            [1, 1],
            BudgetType::Iterations,
            7,
        );
        assert_eq!(utilities[0] + utilities[1], 0.);
    }

    /// the same seeds everywhere make the whole match reproducible
    #[test]
    fn seeded_oos_match_is_reproducible() {
        let domain = Goofspiel::iigs(3);
        let mut outcomes = vec![];
        for _ in 0..2 {
            let mut first =
                OosAlgorithm::new(OosData::new(&domain), Player(0), OosSettings::default());
            let mut second =
                OosAlgorithm::new(OosData::new(&domain), Player(1), OosSettings::default());
            outcomes.push(play_match(
                &domain,
                [&mut first, &mut second],
                [20, 20],
                [5, 5],
                BudgetType::Iterations,
                1234,
            ));
        }
        assert_eq!(outcomes[0], outcomes[1]);
    }

    #[test]
    fn time_budget_runs_at_least_one_iteration() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let mut oos = OosAlgorithm::new(OosData::new(&domain), Player(0), OosSettings::default());
        assert!(play_for_budget(&mut oos, None, 500, BudgetType::Time));
        assert!(oos.stats().node_visits > 0);
    }
}
