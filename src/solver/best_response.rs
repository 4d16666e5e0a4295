use crate::cache::cfr_data::calc_avg_probs;
use crate::cache::cfr_data::CfrData;
use crate::efg::aoh::Aoh;
use crate::efg::node::EfgNode;
use crate::efg::node::NodeKind;
use crate::game::action::ActionId;
use crate::game::domain::Domain;
use crate::game::player::Player;
use crate::Probability;
use crate::Utility;
use std::collections::HashMap;
use std::rc::Rc;

/// per-infoset action distribution of one player
pub type BehavioralStrategy = HashMap<Rc<Aoh>, Vec<Probability>>;

/// extract both players' average strategies from the CFR accumulators
pub fn average_strategy(data: &CfrData) -> [BehavioralStrategy; 2] {
    let mut profile = [HashMap::new(), HashMap::new()];
    for (infoset, table) in data.infoset_data.iter() {
        profile[infoset.player().index()].insert(
            infoset.clone(),
            calc_avg_probs(&table.avg_accumulator),
        );
    }
    profile
}

/// exact expected utility of a strategy profile for player 0, by full
/// tree walk; unvisited infosets play uniformly
pub fn expected_utility(domain: &dyn Domain, profile: &[BehavioralStrategy; 2]) -> Utility {
    fn walk(node: &Rc<EfgNode>, profile: &[BehavioralStrategy; 2]) -> Utility {
        match node.kind() {
            NodeKind::Terminal => node.utilities()[0],
            NodeKind::Chance => node
                .chance_probs()
                .iter()
                .enumerate()
                .map(|(index, prob)| prob * walk(&node.perform(ActionId(index as u32)), profile))
                .sum(),
            NodeKind::Player(acting) => {
                let strategy = strategy_at(node, &profile[acting.index()]);
                strategy
                    .iter()
                    .enumerate()
                    .filter(|(_, prob)| **prob > 0.)
                    .map(|(index, prob)| {
                        prob * walk(&node.perform(ActionId(index as u32)), profile)
                    })
                    .sum()
            }
        }
    }
    walk(&EfgNode::root(domain), profile)
}

fn strategy_at(node: &Rc<EfgNode>, strategy: &BehavioralStrategy) -> Vec<Probability> {
    strategy
        .get(&node.infoset())
        .cloned()
        .unwrap_or_else(|| vec![1. / node.count_actions() as f64; node.count_actions()])
}

/// value of the best response of `player` against the opponent's fixed
/// behavioral strategy. the response picks, per infoset, the action
/// maximizing the opponent-and-chance weighted continuation, which is
/// optimal under perfect recall.
pub fn best_response_value(
    domain: &dyn Domain,
    opponent_strategy: &BehavioralStrategy,
    player: Player,
) -> Utility {
    let root = EfgNode::root(domain);
    let mut groups: HashMap<Aoh, Vec<(Rc<EfgNode>, f64)>> = HashMap::new();
    collect(&root, 1., player, opponent_strategy, &mut groups);
    let mut decisions: HashMap<Aoh, usize> = HashMap::new();
    respond(&root, player, opponent_strategy, &groups, &mut decisions)
}

/// exploitability of a profile in a zero-sum game: the mean of both
/// players' best-response values against it
pub fn exploitability(domain: &dyn Domain, profile: &[BehavioralStrategy; 2]) -> Utility {
    let response0 = best_response_value(domain, &profile[1], Player(0));
    let response1 = best_response_value(domain, &profile[0], Player(1));
    (response0 + response1) / 2.
}

/// group the responder's histories by infoset, weighted by the reach
/// of everybody else
fn collect(
    node: &Rc<EfgNode>,
    weight: f64,
    player: Player,
    opponent_strategy: &BehavioralStrategy,
    groups: &mut HashMap<Aoh, Vec<(Rc<EfgNode>, f64)>>,
) {
    match node.kind() {
        NodeKind::Terminal => {}
        NodeKind::Chance => {
            for (index, prob) in node.chance_probs().iter().enumerate() {
                collect(
                    &node.perform(ActionId(index as u32)),
                    weight * prob,
                    player,
                    opponent_strategy,
                    groups,
                );
            }
        }
        NodeKind::Player(acting) if acting == player => {
            groups
                .entry(node.infoset())
                .or_default()
                .push((node.clone(), weight));
            for action in node.actions() {
                collect(&node.perform(action), weight, player, opponent_strategy, groups);
            }
        }
        NodeKind::Player(_) => {
            let strategy = strategy_at(node, opponent_strategy);
            for (index, prob) in strategy.iter().enumerate() {
                collect(
                    &node.perform(ActionId(index as u32)),
                    weight * prob,
                    player,
                    opponent_strategy,
                    groups,
                );
            }
        }
    }
}

/// expected value for the responder when it plays the per-infoset
/// argmax continuation, computed on demand and memoized
fn respond(
    node: &Rc<EfgNode>,
    player: Player,
    opponent_strategy: &BehavioralStrategy,
    groups: &HashMap<Aoh, Vec<(Rc<EfgNode>, f64)>>,
    decisions: &mut HashMap<Aoh, usize>,
) -> Utility {
    match node.kind() {
        NodeKind::Terminal => node.utilities()[player.index()],
        NodeKind::Chance => node
            .chance_probs()
            .iter()
            .enumerate()
            .map(|(index, prob)| {
                prob * respond(
                    &node.perform(ActionId(index as u32)),
                    player,
                    opponent_strategy,
                    groups,
                    decisions,
                )
            })
            .sum(),
        NodeKind::Player(acting) if acting == player => {
            let infoset = node.infoset();
            let best = match decisions.get(&infoset) {
                Some(best) => *best,
                None => {
                    let members = &groups[&infoset];
                    let best = node
                        .actions()
                        .into_iter()
                        .map(|action| {
                            members
                                .iter()
                                .map(|(history, weight)| {
                                    weight
                                        * respond(
                                            &history.perform(action),
                                            player,
                                            opponent_strategy,
                                            groups,
                                            decisions,
                                        )
                                })
                                .sum::<Utility>()
                        })
                        .enumerate()
                        .max_by(|(_, a), (_, b)| a.partial_cmp(b).expect("finite values"))
                        .map(|(index, _)| index)
                        .expect("player nodes offer actions");
                    decisions.insert(infoset, best);
                    best
                }
            };
            respond(
                &node.perform(ActionId(best as u32)),
                player,
                opponent_strategy,
                groups,
                decisions,
            )
        }
        NodeKind::Player(_) => {
            let strategy = strategy_at(node, opponent_strategy);
            strategy
                .iter()
                .enumerate()
                .filter(|(_, prob)| **prob > 0.)
                .map(|(index, prob)| {
                    prob * respond(
                        &node.perform(ActionId(index as u32)),
                        player,
                        opponent_strategy,
                        groups,
                        decisions,
                    )
                })
                .sum()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::cfr_data::CfrUpdating;
    use crate::cache::TreeCache;
    use crate::domains::goofspiel::Goofspiel;
    use crate::domains::goofspiel::GoofspielVariant;
    use crate::domains::pennies::MatchingPennies;
    use crate::domains::pennies::PenniesVariant;
    use crate::solver::cfr::CfrAlgorithm;
    use crate::solver::cfr::CfrSettings;

    fn uniform_profile(domain: &dyn Domain) -> [BehavioralStrategy; 2] {
        let data = CfrData::new(domain, CfrUpdating::Histories);
        average_strategy(&data)
    }

    #[test]
    fn uniform_pennies_is_unexploitable_in_value() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let profile = uniform_profile(&domain);
        assert_eq!(expected_utility(&domain, &profile), 0.);
        // the uniform strategy cannot be beaten in matching pennies
        assert_eq!(best_response_value(&domain, &profile[1], Player(0)), 0.);
        assert_eq!(best_response_value(&domain, &profile[0], Player(1)), 0.);
    }

    #[test]
    fn skewed_pennies_strategy_is_exploitable() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let mut data = CfrData::new(&domain, CfrUpdating::Histories);
        data.build_tree();
        let root = data.root();
        let child = data.child_for(&root, ActionId(0));
        let child_infoset = data.infoset_for(&child);
        let mut skewed: BehavioralStrategy = HashMap::new();
        // the second player leans three-to-one toward heads
        skewed.insert(child_infoset, vec![0.75, 0.25]);
        // so the first player plays heads and wins half the margin
        let response = best_response_value(&domain, &skewed, Player(0));
        assert!((response - 0.5).abs() < 1e-12, "response {}", response);
    }

    /// the original library's goofspiel-3 CFR convergence scenario:
    /// near-zero best responses, and the first player's root strategy
    /// matching the second player's strategy at the equivalent infoset
    #[test]
    fn goofspiel3_cfr_equilibrium() {
        let domain = Goofspiel::fixed_deal(vec![3, 2, 1], GoofspielVariant::IncompleteObservations);
        let mut settings = CfrSettings::default();
        settings.cfr_updating = CfrUpdating::Infosets;
        let mut data = CfrData::new(&domain, settings.cfr_updating);
        data.build_tree();
        let root = data.root();
        let child = data.child_for(&root, ActionId(0));
        let root_infoset = data.infoset_for(&root);
        let child_infoset = data.infoset_for(&child);
        let mut cfr = CfrAlgorithm::new(data, Player(0), settings);
        cfr.run_iterations(1000);
        let profile = average_strategy(cfr.data());
        let utility = expected_utility(&domain, &profile);
        let response0 = best_response_value(&domain, &profile[1], Player(0));
        let response1 = best_response_value(&domain, &profile[0], Player(1));
        assert!(utility.abs() <= 1e-3, "utility {}", utility);
        assert!(response0 <= 2e-3, "best response {}", response0);
        assert!(response1 <= 2e-3, "best response {}", response1);
        // the game is symmetric, so both players' first bids agree
        let first = &profile[0][&root_infoset];
        let second = &profile[1][&child_infoset];
        for (mine, theirs) in first.iter().zip(second.iter()) {
            assert!((mine - theirs).abs() < 1e-3, "{:?} vs {:?}", first, second);
        }
    }

    /// the two-card game is symmetric between the players
    #[test]
    fn goofspiel2_strategies_are_symmetric() {
        let domain = Goofspiel::fixed_deal(vec![2, 1], GoofspielVariant::IncompleteObservations);
        let mut settings = CfrSettings::default();
        settings.cfr_updating = CfrUpdating::Infosets;
        let mut data = CfrData::new(&domain, settings.cfr_updating);
        data.build_tree();
        let root = data.root();
        let child = data.child_for(&root, ActionId(0));
        let root_infoset = data.infoset_for(&root);
        let child_infoset = data.infoset_for(&child);
        let mut cfr = CfrAlgorithm::new(data, Player(0), settings);
        cfr.run_iterations(1000);
        let profile = average_strategy(cfr.data());
        let first = &profile[0][&root_infoset];
        let second = &profile[1][&child_infoset];
        assert!((first[0] - second[0]).abs() < 1e-9);
    }
}
