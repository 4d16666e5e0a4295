use super::public_states::PublicStateCache;
use super::TreeCache;
use crate::efg::aoh::Aoh;
use crate::efg::node::EfgNode;
use crate::game::action::ActionId;
use crate::game::domain::Domain;
use crate::Probability;
use crate::Utility;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::rc::Rc;

/// when regret increments land in the tables: at every visit of a
/// history, or buffered and applied once per player iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CfrUpdating {
    Histories,
    Infosets,
}

/// the regret-minimization table of one infoset. vector lengths equal
/// the action count of any history in the infoset, which is well
/// defined by perfect recall.
#[derive(Debug, Clone)]
pub struct InfosetData {
    pub regrets: Vec<Utility>,
    pub avg_accumulator: Vec<f64>,
    /// buffered increments, allocated only for infoset-level updating
    pub regret_updates: Vec<Utility>,
    pub fix_rm_strategy: bool,
    pub fix_avg_strategy: bool,
}

impl InfosetData {
    pub fn new(actions: usize, updating: CfrUpdating) -> Self {
        Self {
            regrets: vec![0.; actions],
            avg_accumulator: vec![0.; actions],
            regret_updates: match updating {
                CfrUpdating::Histories => vec![],
                CfrUpdating::Infosets => vec![0.; actions],
            },
            fix_rm_strategy: false,
            fix_avg_strategy: false,
        }
    }

    pub fn reset(&mut self) {
        self.regrets.fill(0.);
        self.avg_accumulator.fill(0.);
        self.regret_updates.fill(0.);
    }

    /// fold the buffered increments into the regrets
    pub fn apply_updates(&mut self, plus: bool) {
        for (regret, update) in self.regrets.iter_mut().zip(self.regret_updates.iter_mut()) {
            *regret += *update;
            if plus {
                *regret = regret.max(0.);
            }
            *update = 0.;
        }
    }
}

/// regret matching: positive regrets normalized, with an optional
/// epsilon-uniform floor that keeps every action samplable
pub fn calc_rm_probs(regrets: &[Utility], epsilon: f64) -> Vec<Probability> {
    let n = regrets.len();
    let positive = regrets.iter().map(|r| r.max(0.)).sum::<Utility>();
    if positive > 0. {
        regrets
            .iter()
            .map(|r| (1. - epsilon) * r.max(0.) / positive + epsilon / n as f64)
            .collect()
    } else {
        vec![1. / n as f64; n]
    }
}

/// normalized average strategy, uniform where nothing accumulated yet
pub fn calc_avg_probs(accumulator: &[f64]) -> Vec<Probability> {
    let n = accumulator.len();
    let sum = accumulator.iter().sum::<f64>();
    if sum > 0. {
        accumulator.iter().map(|a| a / sum).collect()
    } else {
        vec![1. / n as f64; n]
    }
}

/// overlays the per-infoset CFR tables onto the cache stack. a table is
/// allocated the moment its first history is expanded.
pub struct CfrData {
    public_states: PublicStateCache,
    pub infoset_data: HashMap<Rc<Aoh>, InfosetData>,
    updating: CfrUpdating,
}

impl CfrData {
    pub fn new(domain: &dyn Domain, updating: CfrUpdating) -> Self {
        let public_states = PublicStateCache::new(domain);
        let root = public_states.root();
        let mut cache = Self {
            public_states,
            infoset_data: HashMap::new(),
            updating,
        };
        cache.index(&root);
        cache
    }

    pub fn updating(&self) -> CfrUpdating {
        self.updating
    }
    pub fn public_states(&self) -> &PublicStateCache {
        &self.public_states
    }

    pub(crate) fn expand(&mut self, node: &Rc<EfgNode>, action: ActionId) -> (Rc<EfgNode>, bool) {
        let (child, fresh) = self.public_states.expand(node, action);
        if fresh {
            self.index(&child);
        }
        (child, fresh)
    }

    fn index(&mut self, node: &Rc<EfgNode>) {
        if !node.is_player_node() {
            return;
        }
        let updating = self.updating;
        let infoset = self.public_states.infosets().infoset_for(node);
        self.infoset_data
            .entry(infoset)
            .or_insert_with(|| InfosetData::new(node.count_actions(), updating));
    }

    /// forwarded lookups

    pub fn is_zero_sum(&self) -> bool {
        self.public_states.infosets().efg().is_zero_sum()
    }
    pub fn has_any_children(&self, node: &Rc<EfgNode>) -> bool {
        self.public_states.infosets().efg().has_any_children(node)
    }
    pub fn cached_child(&self, node: &Rc<EfgNode>, action: ActionId) -> Option<Rc<EfgNode>> {
        self.public_states.infosets().efg().cached_child(node, action)
    }
    pub fn has_infoset(&self, aoh: &Aoh) -> bool {
        self.public_states.infosets().has_infoset(aoh)
    }
    pub fn infoset_for(&self, node: &Rc<EfgNode>) -> Rc<Aoh> {
        self.public_states.infosets().infoset_for(node)
    }
    pub fn histories_for(&self, aoh: &Aoh) -> &[Rc<EfgNode>] {
        self.public_states.infosets().histories_for(aoh)
    }

    /// average behavioral strategy at an infoset, if it has a table
    pub fn strategy_for(&self, aoh: &Aoh) -> Option<Vec<Probability>> {
        self.infoset_data
            .get(aoh)
            .map(|data| calc_avg_probs(&data.avg_accumulator))
    }

    pub fn reset_tables(&mut self) {
        for data in self.infoset_data.values_mut() {
            data.reset();
        }
    }
}

impl TreeCache for CfrData {
    fn root(&self) -> Rc<EfgNode> {
        self.public_states.root()
    }
    fn child_for(&mut self, node: &Rc<EfgNode>, action: ActionId) -> Rc<EfgNode> {
        self.expand(node, action).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regret_matching_normalizes_positive_regrets() {
        let probs = calc_rm_probs(&[3., -1., 1.], 0.);
        assert_eq!(probs, vec![0.75, 0., 0.25]);
        let uniform = calc_rm_probs(&[-1., -2.], 0.);
        assert_eq!(uniform, vec![0.5, 0.5]);
    }

    #[test]
    fn epsilon_floor_keeps_all_actions_samplable() {
        let probs = calc_rm_probs(&[1., 0.], 0.1);
        assert!((probs[0] - 0.95).abs() < 1e-12);
        assert!((probs[1] - 0.05).abs() < 1e-12);
        assert!((probs.iter().sum::<f64>() - 1.).abs() < 1e-12);
    }

    #[test]
    fn average_probs_fall_back_to_uniform() {
        assert_eq!(calc_avg_probs(&[0., 0.]), vec![0.5, 0.5]);
        assert_eq!(calc_avg_probs(&[1., 3.]), vec![0.25, 0.75]);
    }

    #[test]
    fn buffered_updates_apply_once() {
        let mut data = InfosetData::new(2, CfrUpdating::Infosets);
        data.regret_updates[0] = 1.;
        data.regret_updates[1] = -2.;
        data.apply_updates(false);
        assert_eq!(data.regrets, vec![1., -2.]);
        assert_eq!(data.regret_updates, vec![0., 0.]);
        data.regret_updates[1] = -1.;
        data.apply_updates(true);
        assert_eq!(data.regrets, vec![1., 0.]);
    }
}
