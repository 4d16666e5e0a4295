use crate::efg::node::EfgNode;
use crate::efg::node::NodeKind;
use crate::game::action::ActionId;
use crate::Probability;
use crate::Utility;
use rand::rngs::SmallRng;
use rand::Rng;
use std::rc::Rc;

/// sample an index from a normalized distribution by CDF inversion.
/// cannot fail: floating residue falls onto the last index.
pub fn pick_from(probs: &[Probability], rng: &mut SmallRng) -> usize {
    pick_from_unnormalized(probs, 1., rng)
}

/// same, over an unnormalized distribution with a known sum. entries
/// that carry no mass — including the negative zeros marking banned
/// actions — are never picked.
pub fn pick_from_unnormalized(probs: &[f64], sum: f64, rng: &mut SmallRng) -> usize {
    let mut point = rng.random::<f64>() * sum;
    let mut last = 0;
    for (index, &prob) in probs.iter().enumerate() {
        if prob > 0. {
            last = index;
            point -= prob;
            if point <= 0. {
                return index;
            }
        }
    }
    last
}

pub fn pick_uniform(outcomes: usize, rng: &mut SmallRng) -> usize {
    rng.random_range(0..outcomes)
}

/// what a uniform rollout to a terminal found out
pub struct RandomLeafOutcome {
    pub utilities: [Utility; 2],
    /// product of the uniform action probabilities per player
    pub player_reach: [Probability; 2],
    /// product of the sampled chance probabilities
    pub chance_reach: Probability,
}

/// roll out uniformly at random from `start` to a terminal: players
/// pick uniformly, chance plays by its distribution. nothing is cached.
pub fn pick_random_leaf(start: &Rc<EfgNode>, rng: &mut SmallRng) -> RandomLeafOutcome {
    let mut out = RandomLeafOutcome {
        utilities: [0., 0.],
        player_reach: [1., 1.],
        chance_reach: 1.,
    };
    let mut node = start.clone();
    while !node.is_terminal() {
        match node.kind() {
            NodeKind::Player(player) => {
                let actions = node.count_actions();
                let action = pick_uniform(actions, rng);
                out.player_reach[player.index()] *= 1. / actions as f64;
                node = node.perform(ActionId(action as u32));
            }
            NodeKind::Chance => {
                let probs = node.chance_probs();
                let action = pick_from(&probs, rng);
                out.chance_reach *= probs[action];
                node = node.perform(ActionId(action as u32));
            }
            NodeKind::Terminal => unreachable!(),
        }
    }
    out.utilities = node.utilities();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn cdf_inversion_respects_the_distribution() {
        let mut rng = SmallRng::seed_from_u64(7);
        let probs = vec![0.25, 0.5, 0.25];
        let mut counts = [0usize; 3];
        for _ in 0..10_000 {
            counts[pick_from(&probs, &mut rng)] += 1;
        }
        assert!(counts[1] > counts[0]);
        assert!(counts[1] > counts[2]);
        assert!(counts.iter().sum::<usize>() == 10_000);
    }

    #[test]
    fn negative_zero_entries_are_never_picked() {
        let mut rng = SmallRng::seed_from_u64(7);
        let probs = vec![-0.0, 0.7, -0.0, 0.3];
        for _ in 0..1000 {
            let picked = pick_from_unnormalized(&probs, 1.0, &mut rng);
            assert!(picked == 1 || picked == 3);
        }
    }
}
