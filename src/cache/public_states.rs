use super::infosets::InfosetCache;
use super::TreeCache;
use crate::efg::aoh::Aoh;
use crate::efg::node::EfgNode;
use crate::efg::public_state::PublicState;
use crate::game::action::ActionId;
use crate::game::domain::Domain;
use std::collections::HashMap;
use std::rc::Rc;

/// adds the public-state ↔ histories maps. every cached node — chance,
/// player or terminal — belongs to exactly one public state.
pub struct PublicStateCache {
    infosets: InfosetCache,
    public_states: HashMap<Rc<PublicState>, Vec<Rc<EfgNode>>>,
    node_public_states: HashMap<Rc<EfgNode>, Rc<PublicState>>,
    infoset_public_states: HashMap<Rc<Aoh>, Rc<PublicState>>,
}

impl PublicStateCache {
    pub fn new(domain: &dyn Domain) -> Self {
        let infosets = InfosetCache::new(domain);
        let root = infosets.root();
        let mut cache = Self {
            infosets,
            public_states: HashMap::new(),
            node_public_states: HashMap::new(),
            infoset_public_states: HashMap::new(),
        };
        cache.index(&root);
        cache
    }

    pub fn infosets(&self) -> &InfosetCache {
        &self.infosets
    }

    pub(crate) fn expand(&mut self, node: &Rc<EfgNode>, action: ActionId) -> (Rc<EfgNode>, bool) {
        let (child, fresh) = self.infosets.expand(node, action);
        if fresh {
            self.index(&child);
        }
        (child, fresh)
    }

    fn index(&mut self, node: &Rc<EfgNode>) {
        let key = self.intern(node.public_state());
        self.public_states
            .entry(key.clone())
            .or_default()
            .push(node.clone());
        self.node_public_states.insert(node.clone(), key.clone());
        if node.is_player_node() {
            let infoset = self.infosets.infoset_for(node);
            self.infoset_public_states.entry(infoset).or_insert(key);
        }
    }

    fn intern(&self, public_state: PublicState) -> Rc<PublicState> {
        self.public_states
            .get_key_value(&public_state)
            .map(|(key, _)| key.clone())
            .unwrap_or_else(|| Rc::new(public_state))
    }

    pub fn public_state_for(&self, node: &Rc<EfgNode>) -> Rc<PublicState> {
        self.node_public_states
            .get(node)
            .expect("node has been cached")
            .clone()
    }
    pub fn public_state_of_infoset(&self, aoh: &Aoh) -> Option<Rc<PublicState>> {
        self.infoset_public_states.get(aoh).cloned()
    }
    pub fn histories_of_public_state(&self, public_state: &Rc<PublicState>) -> &[Rc<EfgNode>] {
        self.public_states
            .get(public_state)
            .map(|histories| histories.as_slice())
            .unwrap_or(&[])
    }

    /// the nodes that first enter the public state: members whose
    /// parent lies outside of it (or who are the root)
    pub fn topmost_histories(&self, public_state: &Rc<PublicState>) -> Vec<Rc<EfgNode>> {
        self.histories_of_public_state(public_state)
            .iter()
            .filter(|node| match node.parent() {
                None => true,
                Some(parent) => self
                    .node_public_states
                    .get(parent)
                    .map(|ps| ps != public_state)
                    .unwrap_or(true),
            })
            .cloned()
            .collect()
    }
}

impl TreeCache for PublicStateCache {
    fn root(&self) -> Rc<EfgNode> {
        self.infosets.root()
    }
    fn child_for(&mut self, node: &Rc<EfgNode>, action: ActionId) -> Rc<EfgNode> {
        self.expand(node, action).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::pennies::MatchingPennies;
    use crate::domains::pennies::PenniesVariant;

    #[test]
    fn every_node_maps_to_one_public_state() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let mut cache = PublicStateCache::new(&domain);
        cache.build_tree();
        let grouped = cache
            .public_states
            .values()
            .map(|histories| histories.len())
            .sum::<usize>();
        assert_eq!(grouped, cache.infosets().efg().node_count());
    }

    #[test]
    fn topmost_histories_enter_the_public_state() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let mut cache = PublicStateCache::new(&domain);
        cache.build_tree();
        let root = cache.root();
        let child = cache.child_for(&root, ActionId(0));
        let ps = cache.public_state_for(&child);
        // both second-player histories first enter this public state
        let topmost = cache.topmost_histories(&ps);
        assert_eq!(topmost.len(), 2);
        assert!(topmost.iter().all(|node| node.is_player_node()));
    }
}
