use super::efg::EfgCache;
use super::TreeCache;
use crate::efg::aoh::Aoh;
use crate::efg::node::EfgNode;
use crate::game::action::ActionId;
use crate::game::domain::Domain;
use std::collections::HashMap;
use std::rc::Rc;

/// adds the infoset ↔ histories maps on top of plain expansion.
/// infosets are interned, so equal histories share one `Rc<Aoh>` key.
pub struct InfosetCache {
    efg: EfgCache,
    infosets: HashMap<Rc<Aoh>, Vec<Rc<EfgNode>>>,
    node_infosets: HashMap<Rc<EfgNode>, Rc<Aoh>>,
}

impl InfosetCache {
    pub fn new(domain: &dyn Domain) -> Self {
        let efg = EfgCache::new(domain);
        let root = efg.root();
        let mut cache = Self {
            efg,
            infosets: HashMap::new(),
            node_infosets: HashMap::new(),
        };
        cache.index(&root);
        cache
    }

    pub fn efg(&self) -> &EfgCache {
        &self.efg
    }

    pub(crate) fn expand(&mut self, node: &Rc<EfgNode>, action: ActionId) -> (Rc<EfgNode>, bool) {
        let (child, fresh) = self.efg.expand(node, action);
        if fresh {
            self.index(&child);
        }
        (child, fresh)
    }

    fn index(&mut self, node: &Rc<EfgNode>) {
        if !node.is_player_node() {
            return;
        }
        let key = self.intern(node.infoset());
        let histories = self.infosets.entry(key.clone()).or_default();
        if let Some(first) = histories.first() {
            // perfect recall: every member offers the same actions
            assert!(
                first.count_actions() == node.count_actions(),
                "inconsistent infoset {}",
                key
            );
        }
        histories.push(node.clone());
        self.node_infosets.insert(node.clone(), key);
    }

    fn intern(&self, aoh: Aoh) -> Rc<Aoh> {
        self.infosets
            .get_key_value(&aoh)
            .map(|(key, _)| key.clone())
            .unwrap_or_else(|| Rc::new(aoh))
    }

    pub fn has_infoset(&self, aoh: &Aoh) -> bool {
        self.infosets.contains_key(aoh)
    }
    /// the interned infoset of a cached player node
    pub fn infoset_for(&self, node: &Rc<EfgNode>) -> Rc<Aoh> {
        self.node_infosets
            .get(node)
            .expect("player node has been cached")
            .clone()
    }
    pub fn histories_for(&self, aoh: &Aoh) -> &[Rc<EfgNode>] {
        self.infosets
            .get(aoh)
            .map(|histories| histories.as_slice())
            .unwrap_or(&[])
    }
    pub fn infosets(&self) -> impl Iterator<Item = (&Rc<Aoh>, &Vec<Rc<EfgNode>>)> {
        self.infosets.iter()
    }
}

impl TreeCache for InfosetCache {
    fn root(&self) -> Rc<EfgNode> {
        self.efg.root()
    }
    fn child_for(&mut self, node: &Rc<EfgNode>, action: ActionId) -> Rc<EfgNode> {
        self.expand(node, action).0
    }
}
