use super::algorithm::GamePlayingAlgorithm;
use super::algorithm::PlayControl;
use super::gadget::Gadget;
use super::gadget::FOLLOW;
use super::gadget::TERMINATE;
use super::oos::OosAlgorithm;
use super::oos::OosSettings;
use super::sampling::pick_from_unnormalized;
use crate::cache::cfr_data::calc_rm_probs;
use crate::cache::cfr_data::CfrUpdating;
use crate::cache::cfr_data::InfosetData;
use crate::cache::oos_data::OosData;
use crate::cache::TreeCache;
use crate::efg::aoh::is_ao_compatible;
use crate::efg::aoh::Aoh;
use crate::efg::node::EfgNode;
use crate::efg::public_state::PublicState;
use crate::game::player::Player;
use crate::Probability;
use crate::Utility;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::rc::Rc;

/// what happens to the accumulated tables when a new gadget is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetentionPolicy {
    /// zero all CFR tables, baselines and node values
    ResetData,
    /// keep everything; assumes the trunk strategy is frozen between
    /// preplay and resolving
    KeepData,
    /// scale node-value nominators by `p/(1+p)` for the probability
    /// `p` of the last own action into the play infoset, and reset the
    /// average-strategy accumulators
    ReweighKeepData,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MccrSettings {
    pub oos: OosSettings,
    pub retention_policy: RetentionPolicy,
}

impl Default for MccrSettings {
    fn default() -> Self {
        Self {
            oos: OosSettings::default(),
            retention_policy: RetentionPolicy::ResetData,
        }
    }
}

impl MccrSettings {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("settings serialize")
    }

    pub fn update(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "retention_policy" => {
                self.retention_policy = match value {
                    "reset" => RetentionPolicy::ResetData,
                    "keep" => RetentionPolicy::KeepData,
                    "reweigh_keep" => RetentionPolicy::ReweighKeepData,
                    _ => anyhow::bail!("unknown retention_policy '{}'", value),
                }
            }
            _ => return self.oos.update(key, value),
        }
        Ok(())
    }
}

/// outcome sampling specialised to iterate gadget roots.
///
/// the gadget chance and opponent nodes are handled here; once the
/// walk Follows into the original subgame it continues as plain OOS.
/// regrets of the gadget opponent nodes live in their own tables,
/// keyed by the opponent's augmented infoset.
pub struct MccrResolver {
    oos: OosAlgorithm,
    gadget: Option<Gadget>,
    gadget_infoset_data: HashMap<Rc<Aoh>, InfosetData>,
    /// biased probabilities over the topmost histories, precomputed at
    /// every gadget change
    gadget_chance_probs: Vec<Probability>,
    gadget_bsum: f64,
}

impl MccrResolver {
    pub fn new(data: OosData, playing: Player, cfg: OosSettings) -> Self {
        Self {
            oos: OosAlgorithm::new(data, playing, cfg),
            gadget: None,
            gadget_infoset_data: HashMap::new(),
            gadget_chance_probs: vec![],
            gadget_bsum: 0.,
        }
    }

    pub fn oos(&self) -> &OosAlgorithm {
        &self.oos
    }
    pub fn data(&self) -> &OosData {
        self.oos.data()
    }
    pub fn data_mut(&mut self) -> &mut OosData {
        self.oos.data_mut()
    }
    pub fn gadget(&self) -> Option<&Gadget> {
        self.gadget.as_ref()
    }

    /// install a freshly built gadget: recompute the play-infoset
    /// reach, the biased root distribution, and the terminal scale
    fn install_gadget(&mut self, gadget: Gadget) {
        self.gadget_infoset_data.clear();
        let play_infoset_reach = gadget.play_infoset_reach();
        self.update_gadget_biasing_probs(&gadget, play_infoset_reach);
        self.oos.leaf_weight = gadget.pub_state_reach();
        self.gadget = Some(gadget);
    }

    /// the biased root distribution is an ε-convex of uniform and a
    /// δ-convex of the play infoset and the whole subgame, so sampling
    /// keeps every history reachable while favoring the target
    fn update_gadget_biasing_probs(&mut self, gadget: &Gadget, play_infoset_reach: Probability) {
        let histories = gadget.histories();
        let uniform = 1. / histories as f64;
        self.gadget_bsum = 0.;
        self.gadget_chance_probs = (0..histories)
            .map(|index| {
                let targeted = match gadget.is_target_history(index) && play_infoset_reach > 0. {
                    true => gadget.chance_prob(index) / play_infoset_reach,
                    false => 0.,
                };
                self.oos
                    .explore_mix(uniform, self.oos.bias(targeted, gadget.chance_prob(index)))
            })
            .inspect(|prob| self.gadget_bsum += prob)
            .collect();
    }

    /// one gadget-rooted sample for `exploring`
    fn gadget_root_iteration(&mut self, compensation: f64, exploring: Player) {
        let (index, probability, biased) = {
            let gadget = self.gadget.as_ref().expect("gadget is installed");
            let index = match gadget.histories() {
                1 => 0,
                _ => pick_from_unnormalized(
                    &self.gadget_chance_probs,
                    self.gadget_bsum,
                    &mut self.oos.rng,
                ),
            };
            let probability = gadget.chance_prob(index);
            let biased = self.gadget_chance_probs[index] / self.gadget_bsum;
            (index, probability, biased)
        };
        self.gadget_player_iteration(
            index,
            1.,
            1.,
            probability,
            compensation * biased,
            compensation * probability,
            exploring,
        );
        self.oos.rm_zh_all *= probability;
    }

    /// the gadget opponent node of one topmost history. Follow is
    /// always the sampled action; Terminate only ever enters through
    /// its known utility, which is what makes the resolving safe.
    #[allow(clippy::too_many_arguments)]
    fn gadget_player_iteration(
        &mut self,
        index: usize,
        rm_h_pl: f64,
        rm_h_opp: f64,
        rm_h_cn: f64,
        bs_h_all: f64,
        us_h_all: f64,
        exploring: Player,
    ) -> Utility {
        let gadget = self.gadget.as_ref().expect("gadget is installed");
        let actions = gadget.opponent_actions();
        let follow = gadget.follow(index).clone();
        let opponent = gadget.opponent();
        let infoset = Self::intern(&self.gadget_infoset_data, gadget.opponent_infoset(index));
        let exploring_move = opponent == exploring;

        // the trivial gadget short-circuits: a lone Follow is played
        // with probability one and needs no regret bookkeeping
        let rm_probs = match actions {
            1 => vec![1.],
            _ => {
                let data = self
                    .gadget_infoset_data
                    .entry(infoset.clone())
                    .or_insert_with(|| InfosetData::new(2, CfrUpdating::Histories));
                calc_rm_probs(&data.regrets, self.oos.cfg.approx_regret_matching)
            }
        };

        // under targeting only Follow can still reach the play infoset
        let target = self.oos.play_infoset.clone();
        let targeted = self.oos.cfg.target_biasing > 0.
            && bs_h_all > 0.
            && !self.oos.is_below_target
            && target
                .as_ref()
                .map(|target| {
                    is_ao_compatible(target.pairs(), &follow.aoh(target.player()))
                })
                .unwrap_or(false);
        let (applicable, bsum, biased) = match targeted {
            true => (1, rm_probs[FOLLOW], vec![rm_probs[FOLLOW], -0.0]),
            false => (actions, 1., rm_probs.clone()),
        };

        let rm_ha_all = rm_probs[FOLLOW];
        let us_ha_all = 1.;
        let bs_ha_prob = biased[FOLLOW];
        let bs_ha_all = match exploring_move {
            true => match bs_ha_prob > 0. {
                true => self
                    .oos
                    .explore_mix(1. / applicable as f64, bs_ha_prob / bsum),
                false => 0.,
            },
            false => bs_ha_prob / bsum,
        };

        let u_ha = self.oos.iteration(
            &follow,
            if exploring_move { rm_h_pl * rm_ha_all } else { rm_h_pl },
            if exploring_move { rm_h_opp } else { rm_h_opp * rm_ha_all },
            rm_h_cn,
            bs_h_all * bs_ha_all,
            us_h_all * us_ha_all,
            exploring,
        );

        let s_ha_all = self.oos.bias(bs_ha_all, us_ha_all);
        let u_h = u_ha * rm_ha_all / s_ha_all;

        let rm_zha_all = self.oos.rm_zh_all;
        self.oos.rm_zh_all *= rm_ha_all;

        if exploring_move && actions > 1 {
            self.update_gadget_infoset_regrets(
                index, &infoset, exploring, rm_h_cn, rm_zha_all, rm_ha_all,
            );
        }
        // no average strategy at gadget nodes; nobody ever plays them
        u_h
    }

    /// safe-resolving regret update: the opponent weighs following
    /// into the subgame against escaping for the known value
    fn update_gadget_infoset_regrets(
        &mut self,
        index: usize,
        infoset: &Rc<Aoh>,
        exploring: Player,
        us_h_cn: f64,
        rm_zha_all: f64,
        rm_ha_all: f64,
    ) {
        let gadget = self.gadget.as_ref().expect("gadget is installed");
        let u_terminate = gadget.terminate_utility(index, exploring) * gadget.pub_state_reach();
        let u_follow = self.oos.u_z * us_h_cn * rm_zha_all / self.oos.s_z_all;
        let p_follow = rm_ha_all;
        let difference = u_follow - u_terminate;
        let data = self
            .gadget_infoset_data
            .get_mut(infoset)
            .expect("gadget infoset has a table");
        data.regrets[FOLLOW] += (1. - p_follow) * difference;
        data.regrets[TERMINATE] += -p_follow * difference;
    }

    fn intern(tables: &HashMap<Rc<Aoh>, InfosetData>, aoh: Aoh) -> Rc<Aoh> {
        tables
            .get_key_value(&aoh)
            .map(|(key, _)| key.clone())
            .unwrap_or_else(|| Rc::new(aoh))
    }
}

/// monte-carlo continual resolving.
///
/// during preplay, outcome-sampling iterations run from the root. once
/// real play reaches a public state, a gadget is built over its topmost
/// histories, the retention policy is applied, and further iterations
/// run from the gadget root targeted at the current infoset.
pub struct MccrAlgorithm {
    resolver: MccrResolver,
    cfg: MccrSettings,
    playing: Player,
    play_infoset: Option<Rc<Aoh>>,
    play_public_state: Option<Rc<PublicState>>,
}

impl MccrAlgorithm {
    pub fn new(data: OosData, playing: Player, cfg: MccrSettings) -> Self {
        Self {
            resolver: MccrResolver::new(data, playing, cfg.oos),
            cfg,
            playing,
            play_infoset: None,
            play_public_state: None,
        }
    }

    pub fn resolver(&self) -> &MccrResolver {
        &self.resolver
    }
    pub fn data(&self) -> &OosData {
        self.resolver.data()
    }
    pub fn data_mut(&mut self) -> &mut OosData {
        self.resolver.data_mut()
    }

    /// rebuild the gadget at the newly reached public state, then
    /// apply the retention policy to the cached tables
    fn update_gadget(&mut self) {
        let public_state = self
            .play_public_state
            .clone()
            .expect("resolving happens within a public state");
        let target = self.play_infoset.clone().expect("resolving has a target");
        let summary = self.resolver.data().public_state_summary(&public_state);
        let gadget = Gadget::new(summary, self.playing, target);
        log::debug!(
            "rebuilt {:?} gadget over {} histories at {}",
            gadget.variant(),
            gadget.histories(),
            public_state
        );
        self.resolver.install_gadget(gadget);

        match self.cfg.retention_policy {
            RetentionPolicy::ResetData => self.resolver.data_mut().reset_data(),
            RetentionPolicy::KeepData => {}
            RetentionPolicy::ReweighKeepData => {
                let p = self.calc_prob_of_last_action();
                let magnitude = p / (1. + p);
                self.resolver.oos.update_magnitude = magnitude;
                self.resolver.data_mut().reset_avg_accumulators();
                self.resolver.data_mut().reset_baselines();
                self.resolver.data_mut().scale_node_values(magnitude);
            }
        }
    }

    /// probability, under the trunk average strategy, of the last own
    /// action that took us into the current play infoset. assumes the
    /// trunk strategy has not changed since it was accumulated.
    fn calc_prob_of_last_action(&self) -> Probability {
        let infoset = self.play_infoset.as_ref().expect("resolving has a target");
        let data = self.resolver.data();
        let Some(current) = data.histories_for(infoset).first().cloned() else {
            return 1.;
        };
        let mut node: Option<Rc<EfgNode>> = current.parent().cloned();
        while let Some(candidate) = node.as_ref() {
            if candidate.is_player_node() && candidate.player() == self.playing {
                break;
            }
            node = candidate.parent().cloned();
        }
        let Some(ancestor) = node else {
            return 1.;
        };
        let last_action = current.history()[ancestor.history().len()];
        data.strategy_for(&data.infoset_for(&ancestor))
            .map(|strategy| strategy[last_action.index()])
            .unwrap_or(1.)
    }

    fn preplay_iteration(&mut self) -> PlayControl {
        let oos = &mut self.resolver.oos;
        oos.is_biased_iteration = false; // nothing to bias towards yet
        oos.is_below_target = true; // everything is below the "target"
        oos.leaf_weight = 1.; // no gadget from the root
        for _ in 0..oos.cfg.batch_size {
            for exploring in Player::both() {
                let root = oos.data.root();
                oos.iteration(&root, 1., 1., 1., 1., 1., exploring);
            }
        }
        PlayControl::ContinueImproving
    }

    fn resolve_iteration(&mut self, infoset: &Rc<Aoh>) -> PlayControl {
        assert!(self.resolver.data().has_infoset(infoset));
        self.resolver.oos.play_infoset = Some(infoset.clone());
        self.resolver.oos.play_public_state = self.play_public_state.clone();
        let batch = self.resolver.oos.cfg.batch_size;
        let biasing = self.resolver.oos.cfg.target_biasing;
        for _ in 0..batch {
            for exploring in Player::both() {
                self.resolver.oos.is_biased_iteration =
                    self.resolver.oos.rng.random::<f64>() <= biasing;
                self.resolver.oos.is_below_target = false;
                self.resolver.gadget_root_iteration(1., exploring);
            }
        }
        PlayControl::ContinueImproving
    }
}

impl GamePlayingAlgorithm for MccrAlgorithm {
    fn run_play_iteration(&mut self, current: Option<&Rc<Aoh>>) -> PlayControl {
        if let Some(infoset) = current {
            // we cannot target what the cache has never seen
            if self.resolver.data().public_state_of_infoset(infoset).is_none() {
                return PlayControl::GiveUp;
            }
        }
        let current = current.cloned();
        if self.play_infoset != current {
            self.play_infoset = current.clone();
            self.play_public_state = current
                .as_ref()
                .and_then(|aoh| self.resolver.data().public_state_of_infoset(aoh));
            if self.play_infoset.is_some() {
                self.update_gadget();
            }
        }
        match self.play_infoset.clone() {
            None => self.preplay_iteration(),
            Some(infoset) => self.resolve_iteration(&infoset),
        }
    }

    fn play_distribution(&mut self, current: &Rc<Aoh>) -> Option<Vec<Probability>> {
        self.resolver.data().strategy_for(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TreeCache;
    use crate::domains::pennies::MatchingPennies;
    use crate::domains::pennies::PenniesVariant;
    use crate::game::action::ActionId;

    fn resolved_head_probability(iterations: usize, seed: u64) -> f64 {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let mut data = OosData::new(&domain);
        data.build_tree();
        let root = data.root();
        let child = data.child_for(&root, ActionId(0));
        let infoset = data.infoset_for(&child);
        // resolving without any preplay: the counterfactual values of
        // the second player's public state are implicitly correct
        // (zero), and the regret-matching floor keeps both actions
        // sampled throughout
        let mut cfg = MccrSettings::default();
        cfg.oos.approx_regret_matching = 0.1;
        cfg.oos.seed = seed;
        let mut mccr = MccrAlgorithm::new(data, Player(1), cfg);
        for _ in 0..iterations {
            mccr.run_play_iteration(Some(&infoset));
        }
        let distribution = mccr.play_distribution(&infoset).expect("known infoset");
        distribution[0]
    }

    /// the resolved strategy closes in on the equilibrium head
    /// probability as the budget grows tenfold. the bounds are loose
    /// and probabilistic, so several seeds are checked against each.
    #[test]
    fn resolving_converges_towards_uniform() {
        let bounds = [
            (10, 0.5),
            (100, 0.2),
            (1000, 0.1),
            (10_000, 0.02),
            (100_000, 0.005),
        ];
        for seed in 0..5 {
            for (iterations, bound) in bounds {
                let deviation = (resolved_head_probability(iterations, seed) - 0.5).abs();
                assert!(
                    deviation < bound,
                    "seed {} deviates {} after {} iterations",
                    seed,
                    deviation,
                    iterations
                );
            }
        }
    }

    #[test]
    fn settings_round_trip_through_json() {
        let mut cfg = MccrSettings::default();
        cfg.update("retention_policy", "reweigh_keep").expect("known key");
        cfg.update("exploration", "0.4").expect("known key");
        let clone = MccrSettings::from_json(&cfg.to_json()).expect("valid json");
        assert_eq!(clone.retention_policy, RetentionPolicy::ReweighKeepData);
        assert_eq!(clone.oos.exploration, 0.4);
        assert!(cfg.update("bogus", "1").is_err());
    }

    #[test]
    fn unknown_infoset_gives_up() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let data = OosData::new(&domain);
        let mut mccr = MccrAlgorithm::new(data, Player(1), MccrSettings::default());
        let foreign = Rc::new(Aoh::from(Player(1), vec![]));
        assert_eq!(mccr.run_play_iteration(Some(&foreign)), PlayControl::GiveUp);
    }

    #[test]
    fn keep_data_retains_the_preplay_tables() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let mut data = OosData::new(&domain);
        data.build_tree();
        let root = data.root();
        let child = data.child_for(&root, ActionId(0));
        let infoset = data.infoset_for(&child);
        let mut cfg = MccrSettings::default();
        cfg.retention_policy = RetentionPolicy::KeepData;
        let mut mccr = MccrAlgorithm::new(data, Player(1), cfg);
        for _ in 0..100 {
            mccr.run_play_iteration(None);
        }
        let before = mccr.data().infoset_data()[&infoset].avg_accumulator.clone();
        assert!(before.iter().sum::<f64>() > 0.);
        mccr.run_play_iteration(Some(&infoset));
        let after = &mccr.data().infoset_data()[&infoset].avg_accumulator;
        assert!(after.iter().sum::<f64>() >= before.iter().sum::<f64>());
    }

    #[test]
    fn reset_data_clears_the_preplay_tables() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let mut data = OosData::new(&domain);
        data.build_tree();
        let root = data.root();
        let child = data.child_for(&root, ActionId(0));
        let infoset = data.infoset_for(&child);
        let mut mccr = MccrAlgorithm::new(data, Player(1), MccrSettings::default());
        for _ in 0..100 {
            mccr.run_play_iteration(None);
        }
        // the reset happens on the public-state transition, after the
        // summary is taken
        mccr.run_play_iteration(Some(&infoset));
        let stats = mccr.resolver().oos().stats();
        assert!(stats.node_visits > 0);
    }
}
