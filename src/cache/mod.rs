pub mod cfr_data;
pub mod efg;
pub mod infosets;
pub mod oos_data;
pub mod public_states;

use crate::efg::node::EfgNode;
use crate::game::action::ActionId;
use std::rc::Rc;

/// memoized lazy expansion, shared by every cache layer.
///
/// each layer hooks node creation to maintain its own indices, so
/// expansion must go through the outermost layer you hold; reaching
/// into an inner layer to expand would leave the outer indices stale.
pub trait TreeCache {
    fn root(&self) -> Rc<EfgNode>;

    /// expand (or fetch) the child of `node` under `action`. repeated
    /// calls hand back the same `Rc`.
    fn child_for(&mut self, node: &Rc<EfgNode>, action: ActionId) -> Rc<EfgNode>;

    /// depth-first expansion of every node whose state depth is below
    /// the limit, allocating slots along the way. building twice
    /// leaves the cache unchanged.
    fn build_tree_to(&mut self, state_depth: u32) {
        let mut stack = vec![self.root()];
        while let Some(node) = stack.pop() {
            if node.state_depth() >= state_depth {
                continue;
            }
            for index in (0..node.count_actions() as u32).rev() {
                stack.push(self.child_for(&node, ActionId(index)));
            }
        }
    }

    /// expand the whole tree
    fn build_tree(&mut self) {
        self.build_tree_to(u32::MAX)
    }
}
