use super::node::EfgNode;
use crate::game::action::ActionId;
use crate::game::domain::Domain;
use std::rc::Rc;

/// call the visitor at every node of the unfolded EFG, leaves included,
/// in depth-first order. expansion is not memoized; use a cache when
/// handles must stay stable across visits.
pub fn tree_walk(domain: &dyn Domain, visit: &mut impl FnMut(&Rc<EfgNode>)) {
    walk_from(&EfgNode::root(domain), visit)
}

pub fn walk_from(node: &Rc<EfgNode>, visit: &mut impl FnMut(&Rc<EfgNode>)) {
    visit(node);
    for action in 0..node.count_actions() as u32 {
        walk_from(&node.perform(ActionId(action)), visit);
    }
}
