use super::algorithm::GamePlayingAlgorithm;
use super::algorithm::PlayControl;
use crate::cache::cfr_data::calc_rm_probs;
use crate::cache::cfr_data::CfrData;
use crate::cache::cfr_data::CfrUpdating;
use crate::cache::TreeCache;
use crate::efg::aoh::Aoh;
use crate::efg::node::EfgNode;
use crate::efg::node::NodeKind;
use crate::game::action::ActionId;
use crate::game::player::Player;
use crate::Probability;
use crate::Utility;
use serde::Deserialize;
use serde::Serialize;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegretMatching {
    Normal,
    /// clamp regrets at zero on every update
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccumulatorWeighting {
    Uniform,
    Linear,
    XLogX,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CfrSettings {
    pub cfr_updating: CfrUpdating,
    pub regret_matching: RegretMatching,
    pub accumulator_weighting: AccumulatorWeighting,
}

impl Default for CfrSettings {
    fn default() -> Self {
        Self {
            cfr_updating: CfrUpdating::Histories,
            regret_matching: RegretMatching::Normal,
            accumulator_weighting: AccumulatorWeighting::Uniform,
        }
    }
}

impl CfrSettings {
    /// string-keyed configuration hook for external loaders
    pub fn update(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "cfr_updating" => {
                self.cfr_updating = match value {
                    "histories" => CfrUpdating::Histories,
                    "infosets" => CfrUpdating::Infosets,
                    _ => anyhow::bail!("unknown cfr_updating '{}'", value),
                }
            }
            "regret_matching" => {
                self.regret_matching = match value {
                    "normal" => RegretMatching::Normal,
                    "plus" => RegretMatching::Plus,
                    _ => anyhow::bail!("unknown regret_matching '{}'", value),
                }
            }
            "accumulator_weighting" => {
                self.accumulator_weighting = match value {
                    "uniform" => AccumulatorWeighting::Uniform,
                    "linear" => AccumulatorWeighting::Linear,
                    "xlogx" => AccumulatorWeighting::XLogX,
                    _ => anyhow::bail!("unknown accumulator_weighting '{}'", value),
                }
            }
            _ => anyhow::bail!("unknown cfr option '{}'", key),
        }
        Ok(())
    }
}

/// vanilla counterfactual regret minimization over the cached tree.
///
/// one iteration walks the whole tree once per updating player,
/// computing reach-weighted counterfactual values, accumulating
/// regrets at the updating player's infosets and the weighted average
/// strategy alongside.
pub struct CfrAlgorithm {
    data: CfrData,
    playing: Player,
    cfg: CfrSettings,
    iterations: usize,
}

impl CfrAlgorithm {
    pub fn new(data: CfrData, playing: Player, cfg: CfrSettings) -> Self {
        assert!(
            cfg.cfr_updating == data.updating(),
            "cache and settings disagree on the updating mode"
        );
        Self {
            data,
            playing,
            cfg,
            iterations: 0,
        }
    }

    pub fn playing(&self) -> Player {
        self.playing
    }
    pub fn data(&self) -> &CfrData {
        &self.data
    }
    pub fn data_mut(&mut self) -> &mut CfrData {
        &mut self.data
    }
    pub fn into_data(self) -> CfrData {
        self.data
    }

    /// run both players' updates `count` times
    pub fn run_iterations(&mut self, count: usize) {
        let root = self.data.root();
        for _ in 0..count {
            self.iterations += 1;
            for player in Player::both() {
                self.run_iteration(&root, [1., 1., 1.], player);
                self.delayed_apply_regret_updates();
            }
        }
        log::debug!("cfr has run {} iterations", self.iterations);
    }

    /// one recursive pass for `updating`. `reach` carries the reach
    /// probabilities of player 0, player 1 and chance to this node.
    /// returns the counterfactual value of the node for `updating`.
    pub fn run_iteration(
        &mut self,
        node: &Rc<EfgNode>,
        reach: [Probability; 3],
        updating: Player,
    ) -> Utility {
        if reach[0] == 0. && reach[1] == 0. {
            return 0.;
        }
        match node.kind() {
            NodeKind::Terminal => {
                debug_assert!(
                    !self.data.is_zero_sum()
                        || node.utilities().iter().sum::<Utility>().abs() < 1e-9
                );
                node.utilities()[updating.index()]
            }
            NodeKind::Chance => {
                let probs = node.chance_probs();
                let mut value = 0.;
                for (index, prob) in probs.iter().enumerate() {
                    let child = self.data.child_for(node, ActionId(index as u32));
                    let mut reach = reach;
                    reach[2] *= prob;
                    value += prob * self.run_iteration(&child, reach, updating);
                }
                value
            }
            NodeKind::Player(acting) => self.player_iteration(node, acting, reach, updating),
        }
    }

    fn player_iteration(
        &mut self,
        node: &Rc<EfgNode>,
        acting: Player,
        reach: [Probability; 3],
        updating: Player,
    ) -> Utility {
        let infoset = self.data.infoset_for(node);
        let rm_probs = {
            let data = self.data.infoset_data.get(&infoset).expect("indexed");
            calc_rm_probs(&data.regrets, 0.)
        };
        let actions = rm_probs.len();
        let mut action_values = vec![0.; actions];
        let mut value = 0.;
        for (index, prob) in rm_probs.iter().enumerate() {
            let child = self.data.child_for(node, ActionId(index as u32));
            let mut reach = reach;
            reach[acting.index()] *= prob;
            action_values[index] = self.run_iteration(&child, reach, updating);
            value += prob * action_values[index];
        }
        if acting == updating {
            self.update_tables(&infoset, &rm_probs, &action_values, value, reach, updating);
        }
        value
    }

    fn update_tables(
        &mut self,
        infoset: &Rc<Aoh>,
        rm_probs: &[Probability],
        action_values: &[Utility],
        value: Utility,
        reach: [Probability; 3],
        updating: Player,
    ) {
        let counterfactual = reach[updating.opponent().index()] * reach[2];
        let weight = match self.cfg.accumulator_weighting {
            AccumulatorWeighting::Uniform => 1.,
            AccumulatorWeighting::Linear => self.iterations as f64,
            AccumulatorWeighting::XLogX => {
                let t = self.iterations as f64;
                t * t.log10().max(0.)
            }
        };
        let plus = self.cfg.regret_matching == RegretMatching::Plus;
        let updating_mode = self.cfg.cfr_updating;
        let data = self
            .data
            .infoset_data
            .get_mut(infoset)
            .expect("infoset has a table");
        if !data.fix_rm_strategy {
            for (index, action_value) in action_values.iter().enumerate() {
                let increment = counterfactual * (action_value - value);
                match updating_mode {
                    CfrUpdating::Histories => {
                        data.regrets[index] += increment;
                        if plus {
                            data.regrets[index] = data.regrets[index].max(0.);
                        }
                    }
                    CfrUpdating::Infosets => data.regret_updates[index] += increment,
                }
            }
        }
        if !data.fix_avg_strategy {
            for (index, prob) in rm_probs.iter().enumerate() {
                data.avg_accumulator[index] += weight * reach[updating.index()] * prob;
            }
            log::trace!("avg accumulator update @ {}", infoset);
        }
    }

    /// fold the buffered infoset-level increments into the regrets;
    /// a no-op under history-level updating
    pub fn delayed_apply_regret_updates(&mut self) {
        if self.cfg.cfr_updating != CfrUpdating::Infosets {
            return;
        }
        let plus = self.cfg.regret_matching == RegretMatching::Plus;
        for data in self.data.infoset_data.values_mut() {
            if !data.fix_rm_strategy {
                data.apply_updates(plus);
            }
        }
    }
}

impl GamePlayingAlgorithm for CfrAlgorithm {
    fn run_play_iteration(&mut self, current: Option<&Rc<Aoh>>) -> PlayControl {
        if let Some(infoset) = current {
            if !self.data.has_infoset(infoset) {
                return PlayControl::GiveUp;
            }
        }
        self.run_iterations(1);
        PlayControl::ContinueImproving
    }

    fn play_distribution(&mut self, current: &Rc<Aoh>) -> Option<Vec<Probability>> {
        self.data.strategy_for(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::pennies::MatchingPennies;
    use crate::domains::pennies::PenniesVariant;

    fn tables(
        cfr: &CfrAlgorithm,
        node: &Rc<EfgNode>,
    ) -> crate::cache::cfr_data::InfosetData {
        let infoset = cfr.data().infoset_for(node);
        cfr.data().infoset_data[&infoset].clone()
    }

    /// mirror of the original library's fine-grained regret checks on
    /// alternating matching pennies, history-level updating
    #[test]
    fn regrets_and_accumulators_in_small_domain() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let settings = CfrSettings::default();
        let mut data = CfrData::new(&domain, settings.cfr_updating);
        data.build_tree();
        let root = data.root();
        let child = data.child_for(&root, ActionId(0));
        let mut cfr = CfrAlgorithm::new(data, Player(0), settings);

        // iteration of player 0
        let value = cfr.run_iteration(&root, [1., 1., 1.], Player(0));
        assert_eq!(value, 0.);
        let root_data = tables(&cfr, &root);
        let child_data = tables(&cfr, &child);
        assert_eq!(root_data.regrets, vec![0., 0.]);
        assert_eq!(root_data.avg_accumulator, vec![0.5, 0.5]);
        assert_eq!(child_data.regrets, vec![0., 0.]);
        assert_eq!(child_data.avg_accumulator, vec![0., 0.]);

        // iteration of player 1: the two histories of the second
        // player's infoset are visited in sequence, so the regrets
        // shift between the visits and the value ends up nonzero
        let value = cfr.run_iteration(&root, [1., 1., 1.], Player(1));
        assert_eq!(value, -0.5);
        let root_data = tables(&cfr, &root);
        let child_data = tables(&cfr, &child);
        assert_eq!(root_data.regrets, vec![0., 0.]);
        assert_eq!(root_data.avg_accumulator, vec![0.5, 0.5]);
        assert_eq!(child_data.regrets, vec![0.5, 0.5]);
        assert_eq!(child_data.avg_accumulator, vec![0.5, 1.5]);
    }

    /// same checks under infoset-level (buffered) updating
    #[test]
    fn regrets_and_accumulators_with_infoset_updating() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let mut settings = CfrSettings::default();
        settings.cfr_updating = CfrUpdating::Infosets;
        let mut data = CfrData::new(&domain, settings.cfr_updating);
        data.build_tree();
        let root = data.root();
        let child = data.child_for(&root, ActionId(0));
        let mut cfr = CfrAlgorithm::new(data, Player(0), settings);

        let value = cfr.run_iteration(&root, [1., 1., 1.], Player(0));
        cfr.delayed_apply_regret_updates();
        assert_eq!(value, 0.);
        let root_data = tables(&cfr, &root);
        assert_eq!(root_data.regrets, vec![0., 0.]);
        assert_eq!(root_data.regret_updates, vec![0., 0.]);
        assert_eq!(root_data.avg_accumulator, vec![0.5, 0.5]);

        let value = cfr.run_iteration(&root, [1., 1., 1.], Player(1));
        cfr.delayed_apply_regret_updates();
        assert_eq!(value, 0.);
        let child_data = tables(&cfr, &child);
        // the buffered increments of the two histories cancel exactly
        assert_eq!(child_data.regrets, vec![0., 0.]);
        assert_eq!(child_data.regret_updates, vec![0., 0.]);
        assert_eq!(child_data.avg_accumulator, vec![1., 1.]);

        cfr.run_iterations(100);
        let root_data = tables(&cfr, &root);
        let child_data = tables(&cfr, &child);
        assert_eq!(root_data.avg_accumulator, vec![50.5, 50.5]);
        assert_eq!(child_data.avg_accumulator, vec![101., 101.]);
    }

    /// frozen tables stay frozen while the rest keeps learning
    #[test]
    fn freeze_flags_pin_the_tables() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let mut settings = CfrSettings::default();
        settings.cfr_updating = CfrUpdating::Infosets;
        let mut data = CfrData::new(&domain, settings.cfr_updating);
        data.build_tree();
        let root = data.root();
        let child = data.child_for(&root, ActionId(0));
        let root_infoset = data.infoset_for(&root);
        let child_infoset = data.infoset_for(&child);
        {
            let root_data = data.infoset_data.get_mut(&root_infoset).expect("table");
            root_data.regrets = vec![0.75, 0.25];
            root_data.fix_rm_strategy = true;
        }
        {
            let child_data = data.infoset_data.get_mut(&child_infoset).expect("table");
            child_data.avg_accumulator = vec![0.125, 0.875];
            child_data.fix_avg_strategy = true;
        }
        let mut cfr = CfrAlgorithm::new(data, Player(0), settings);

        let value = cfr.run_iteration(&root, [1., 1., 1.], Player(0));
        cfr.delayed_apply_regret_updates();
        assert_eq!(value, 0.);
        let root_data = tables(&cfr, &root);
        assert_eq!(root_data.regrets, vec![0.75, 0.25]);
        assert_eq!(root_data.avg_accumulator, vec![0.75, 0.25]);

        let value = cfr.run_iteration(&root, [1., 1., 1.], Player(1));
        cfr.delayed_apply_regret_updates();
        assert_eq!(value, 0.);
        let child_data = tables(&cfr, &child);
        assert_eq!(child_data.regrets, vec![-0.5, 0.5]);
        assert_eq!(child_data.avg_accumulator, vec![0.125, 0.875]);

        cfr.run_iterations(100);
        let root_data = tables(&cfr, &root);
        let child_data = tables(&cfr, &child);
        assert_eq!(root_data.regrets, vec![0.75, 0.25]);
        assert_eq!(root_data.avg_accumulator, vec![75.75, 25.25]);
        assert_eq!(child_data.regrets, vec![-100.5, 0.5]);
        assert_eq!(child_data.avg_accumulator, vec![0.125, 0.875]);
    }

    /// matching pennies equilibrates to the uniform strategy; under
    /// infoset updating the increments cancel and the average is exact
    #[test]
    fn pennies_average_strategy_is_uniform() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let mut settings = CfrSettings::default();
        settings.cfr_updating = CfrUpdating::Infosets;
        let data = CfrData::new(&domain, settings.cfr_updating);
        let mut cfr = CfrAlgorithm::new(data, Player(0), settings);
        cfr.run_iterations(1000);
        for (_, table) in cfr.data().infoset_data.iter() {
            let avg = crate::cache::cfr_data::calc_avg_probs(&table.avg_accumulator);
            assert!((avg[0] - 0.5).abs() < 1e-6);
            assert!((avg[1] - 0.5).abs() < 1e-6);
        }
    }
}
