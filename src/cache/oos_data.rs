use super::cfr_data::CfrData;
use super::cfr_data::CfrUpdating;
use super::cfr_data::InfosetData;
use super::TreeCache;
use crate::efg::aoh::Aoh;
use crate::efg::node::EfgNode;
use crate::efg::public_state::PublicState;
use crate::game::action::ActionId;
use crate::game::domain::Domain;
use crate::game::player::Player;
use crate::Probability;
use crate::Utility;
use std::collections::HashMap;
use std::rc::Rc;

/// variance-reduction baseline of one history, tracked as a ratio.
/// stored in player-0 convention and sign-flipped at read time.
#[derive(Debug, Clone)]
pub struct Baseline {
    pub nominator: f64,
    pub denominator: f64,
}

impl Default for Baseline {
    fn default() -> Self {
        Self {
            nominator: 0.,
            denominator: 1.,
        }
    }
}

impl Baseline {
    pub fn value(&self) -> f64 {
        self.nominator / self.denominator
    }
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// long-run expected value of one history on the original EFG scale,
/// in player-0 convention. feeds the public-state summaries that seed
/// gadget games.
#[derive(Debug, Clone, Default)]
pub struct NodeValue {
    pub nominator: f64,
    pub denominator: f64,
}

impl NodeValue {
    pub fn value(&self) -> f64 {
        if self.denominator > 0. {
            self.nominator / self.denominator
        } else {
            0.
        }
    }
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// everything the gadget builder needs to know about a public state:
/// the histories that first enter it, their reach probabilities
/// `[player 0, player 1, chance]` under the cached average strategy,
/// and their expected utilities per player.
pub struct PublicStateSummary {
    pub public_state: Rc<PublicState>,
    pub topmost_histories: Vec<Rc<EfgNode>>,
    pub reach_probs: Vec<[Probability; 3]>,
    pub expected_utilities: Vec<[Utility; 2]>,
}

/// the outermost cache layer: CFR tables plus per-history baseline and
/// node-value estimators, allocated as nodes appear.
pub struct OosData {
    cfr: CfrData,
    pub baselines: HashMap<Rc<EfgNode>, Baseline>,
    pub node_values: HashMap<Rc<EfgNode>, NodeValue>,
}

impl OosData {
    pub fn new(domain: &dyn Domain) -> Self {
        let cfr = CfrData::new(domain, CfrUpdating::Histories);
        let root = cfr.root();
        let mut cache = Self {
            cfr,
            baselines: HashMap::new(),
            node_values: HashMap::new(),
        };
        cache.index(&root);
        cache
    }

    fn index(&mut self, node: &Rc<EfgNode>) {
        self.baselines.insert(node.clone(), Baseline::default());
        self.node_values.insert(node.clone(), NodeValue::default());
    }

    /// forwarded lookups

    pub fn is_zero_sum(&self) -> bool {
        self.cfr.is_zero_sum()
    }
    pub fn has_any_children(&self, node: &Rc<EfgNode>) -> bool {
        self.cfr.has_any_children(node)
    }
    pub fn cached_child(&self, node: &Rc<EfgNode>, action: ActionId) -> Option<Rc<EfgNode>> {
        self.cfr.cached_child(node, action)
    }
    pub fn has_infoset(&self, aoh: &Aoh) -> bool {
        self.cfr.has_infoset(aoh)
    }
    pub fn infoset_for(&self, node: &Rc<EfgNode>) -> Rc<Aoh> {
        self.cfr.infoset_for(node)
    }
    pub fn histories_for(&self, aoh: &Aoh) -> &[Rc<EfgNode>] {
        self.cfr.histories_for(aoh)
    }
    pub fn public_state_for(&self, node: &Rc<EfgNode>) -> Rc<PublicState> {
        self.cfr.public_states().public_state_for(node)
    }
    pub fn public_state_of_infoset(&self, aoh: &Aoh) -> Option<Rc<PublicState>> {
        self.cfr.public_states().public_state_of_infoset(aoh)
    }
    pub fn infoset_data(&self) -> &HashMap<Rc<Aoh>, InfosetData> {
        &self.cfr.infoset_data
    }
    pub fn infoset_data_mut(&mut self) -> &mut HashMap<Rc<Aoh>, InfosetData> {
        &mut self.cfr.infoset_data
    }
    pub fn strategy_for(&self, aoh: &Aoh) -> Option<Vec<Probability>> {
        self.cfr.strategy_for(aoh)
    }
    pub fn cfr(&self) -> &CfrData {
        &self.cfr
    }

    /// summarize a public state for gadget construction. reach is taken
    /// under the cached average strategy (the trunk strategy, assumed
    /// frozen between preplay and resolving), utilities from the
    /// node-value estimators.
    pub fn public_state_summary(&self, public_state: &Rc<PublicState>) -> PublicStateSummary {
        let topmost = self.cfr.public_states().topmost_histories(public_state);
        let reach_probs = topmost.iter().map(|node| self.reach_probs(node)).collect();
        let expected_utilities = topmost
            .iter()
            .map(|node| {
                let value = self
                    .node_values
                    .get(node)
                    .map(|estimate| estimate.value())
                    .unwrap_or(0.);
                [value, -value]
            })
            .collect();
        PublicStateSummary {
            public_state: public_state.clone(),
            topmost_histories: topmost,
            reach_probs,
            expected_utilities,
        }
    }

    /// per-player and chance reach of a history under the cached
    /// average strategy, uniform where no table exists yet
    fn reach_probs(&self, node: &Rc<EfgNode>) -> [Probability; 3] {
        let mut reach = [1., 1., 1.];
        let mut current = node.clone();
        while let (Some(parent), Some(incoming)) = (
            current.parent().cloned(),
            current.incoming(),
        ) {
            match parent.kind() {
                crate::efg::node::NodeKind::Chance => {
                    reach[2] *= parent.chance_prob(incoming);
                }
                crate::efg::node::NodeKind::Player(player) => {
                    let infoset = self.infoset_for(&parent);
                    let strategy = self
                        .strategy_for(&infoset)
                        .unwrap_or_else(|| vec![1. / parent.count_actions() as f64; parent.count_actions()]);
                    reach[player.index()] *= strategy[incoming.index()];
                }
                crate::efg::node::NodeKind::Terminal => unreachable!(),
            }
            current = parent;
        }
        reach
    }

    /// retention policies on gadget rebuild

    /// zero every table, baseline and node value, keep the node graph
    pub fn reset_data(&mut self) {
        self.cfr.reset_tables();
        for baseline in self.baselines.values_mut() {
            baseline.reset();
        }
        for value in self.node_values.values_mut() {
            value.reset();
        }
    }
    pub fn reset_avg_accumulators(&mut self) {
        for data in self.cfr.infoset_data.values_mut() {
            data.avg_accumulator.fill(0.);
        }
    }
    pub fn reset_baselines(&mut self) {
        for baseline in self.baselines.values_mut() {
            baseline.reset();
        }
    }
    pub fn scale_node_values(&mut self, factor: f64) {
        for value in self.node_values.values_mut() {
            value.nominator *= factor;
        }
    }

    /// the baseline of a history from the exploring player's view
    pub fn baseline_for(&self, node: &Rc<EfgNode>, exploring: Player) -> f64 {
        self.baselines
            .get(node)
            .map(|baseline| baseline.value())
            .unwrap_or(0.)
            * exploring.sign()
    }
}

impl TreeCache for OosData {
    fn root(&self) -> Rc<EfgNode> {
        self.cfr.root()
    }
    fn child_for(&mut self, node: &Rc<EfgNode>, action: ActionId) -> Rc<EfgNode> {
        let (child, fresh) = self.cfr.expand(node, action);
        if fresh {
            self.index(&child);
        }
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::pennies::MatchingPennies;
    use crate::domains::pennies::PenniesVariant;

    #[test]
    fn every_cached_node_gets_estimator_slots() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let mut data = OosData::new(&domain);
        data.build_tree();
        assert_eq!(data.baselines.len(), 7);
        assert_eq!(data.node_values.len(), 7);
        assert!(data.baselines.values().all(|b| b.value() == 0.));
    }

    #[test]
    fn baselines_flip_sign_for_the_second_player() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let mut data = OosData::new(&domain);
        let root = data.root();
        data.baselines.get_mut(&root).expect("cached").nominator = 2.;
        assert_eq!(data.baseline_for(&root, Player(0)), 2.);
        assert_eq!(data.baseline_for(&root, Player(1)), -2.);
    }

    #[test]
    fn reset_data_clears_accumulators_but_keeps_nodes() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let mut data = OosData::new(&domain);
        data.build_tree();
        let nodes = data.baselines.len();
        let root = data.root();
        data.baselines.get_mut(&root).expect("cached").nominator = 1.;
        data.node_values.get_mut(&root).expect("cached").nominator = 1.;
        data.reset_data();
        assert_eq!(data.baselines.len(), nodes);
        assert_eq!(data.baselines[&root].value(), 0.);
        assert_eq!(data.node_values[&root].value(), 0.);
    }
}
