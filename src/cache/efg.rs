use super::TreeCache;
use crate::efg::node::EfgNode;
use crate::game::action::ActionId;
use crate::game::domain::Domain;
use std::collections::HashMap;
use std::rc::Rc;

/// memoizes `EfgNode::perform` so that each history is expanded at most
/// once and every caller sees the same handle. also the owner of the
/// node graph: parents are kept alive by their children, children by
/// this map.
pub struct EfgCache {
    root: Rc<EfgNode>,
    children: HashMap<Rc<EfgNode>, Vec<Option<Rc<EfgNode>>>>,
    zero_sum: bool,
}

impl EfgCache {
    pub fn new(domain: &dyn Domain) -> Self {
        let root = EfgNode::root(domain);
        let mut children = HashMap::new();
        children.insert(root.clone(), vec![None; root.count_actions()]);
        Self {
            root,
            children,
            zero_sum: domain.is_zero_sum(),
        }
    }

    pub fn is_zero_sum(&self) -> bool {
        self.zero_sum
    }
    pub fn has_node(&self, node: &Rc<EfgNode>) -> bool {
        self.children.contains_key(node)
    }
    pub fn has_any_children(&self, node: &Rc<EfgNode>) -> bool {
        self.children
            .get(node)
            .map(|slots| slots.iter().any(|slot| slot.is_some()))
            .unwrap_or(false)
    }
    pub fn has_child(&self, node: &Rc<EfgNode>, action: ActionId) -> bool {
        self.cached_child(node, action).is_some()
    }
    /// read-only lookup, never expands
    pub fn cached_child(&self, node: &Rc<EfgNode>, action: ActionId) -> Option<Rc<EfgNode>> {
        self.children
            .get(node)
            .and_then(|slots| slots.get(action.index()).cloned().flatten())
    }
    pub fn nodes(&self) -> impl Iterator<Item = &Rc<EfgNode>> {
        self.children.keys()
    }
    pub fn node_count(&self) -> usize {
        self.children.len()
    }

    /// memoized expansion; the flag reports whether this call created
    /// the child
    pub(crate) fn expand(&mut self, node: &Rc<EfgNode>, action: ActionId) -> (Rc<EfgNode>, bool) {
        if let Some(child) = self.cached_child(node, action) {
            return (child, false);
        }
        assert!(self.has_node(node), "expansion must start at a cached node");
        let child = node.perform(action);
        self.children
            .insert(child.clone(), vec![None; child.count_actions()]);
        self.children
            .get_mut(node)
            .expect("parent is cached")
            [action.index()] = Some(child.clone());
        (child, true)
    }
}

impl TreeCache for EfgCache {
    fn root(&self) -> Rc<EfgNode> {
        self.root.clone()
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
    fn expansion_is_memoized_by_identity() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let mut cache = EfgCache::new(&domain);
        let root = cache.root();
        let once = cache.child_for(&root, ActionId(0));
        let again = cache.child_for(&root, ActionId(0));
        assert!(Rc::ptr_eq(&once, &again));
    }

    #[test]
    fn build_tree_is_idempotent() {
        let domain = MatchingPennies::new(PenniesVariant::Alternating);
        let mut cache = EfgCache::new(&domain);
        cache.build_tree();
        let count = cache.node_count();
        assert_eq!(count, 7);
        cache.build_tree();
        assert_eq!(cache.node_count(), count);
    }
}
