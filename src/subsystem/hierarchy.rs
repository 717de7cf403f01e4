//! The `hierarchy` facet: a subsystem's place in the parent/child tree,
//! backing lineage walks and pre/BFS traversal. Per `spec.md` §4.5, the
//! kernel itself is the implicit root; every other subsystem has exactly
//! one parent, assigned at `registerSubsystem` time.
//!
//! Grounded on the teacher's `host::lifecycle` parent-tracking (a `Weak`
//! back-pointer plus an owned children list), generalized from "host owns
//! workers" to "any subsystem may parent any other".

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// One node in the subsystem tree. Child and parent links are both kept as
/// `Arc`/`Weak` handles to the node itself (not the owning `Subsystem`) so
/// the hierarchy facet can be cloned and shared independently of the rest
/// of a subsystem's state.
pub struct HierarchyNode {
    name: String,
    parent: Mutex<Option<Weak<HierarchyNode>>>,
    children: Mutex<Vec<Arc<HierarchyNode>>>,
}

impl HierarchyNode {
    pub fn root(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { name: name.into(), parent: Mutex::new(None), children: Mutex::new(Vec::new()) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<Arc<HierarchyNode>> {
        self.parent.lock().as_ref().and_then(Weak::upgrade)
    }

    pub fn children(&self) -> Vec<Arc<HierarchyNode>> {
        self.children.lock().clone()
    }

    /// Attaches `child` under `self`, replacing any prior parent `child`
    /// had. Matches `registerSubsystem`'s "re-parenting is allowed, the
    /// last registration wins" behavior.
    pub fn attach_child(self: &Arc<Self>, child: &Arc<HierarchyNode>) {
        if let Some(old_parent) = child.parent() {
            old_parent.children.lock().retain(|c| !Arc::ptr_eq(c, child));
        }
        *child.parent.lock() = Some(Arc::downgrade(self));
        self.children.lock().push(child.clone());
    }

    /// Ancestor chain from `self` up to (and including) the root, closest
    /// first. Per §4.5's `getLineage`.
    pub fn lineage(self: &Arc<Self>) -> Vec<Arc<HierarchyNode>> {
        let mut chain = vec![self.clone()];
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            chain.push(parent.clone());
            current = parent;
        }
        chain
    }

    /// Pre-order (depth-first, parent before children) traversal of the
    /// subtree rooted at `self`.
    pub fn traverse(self: &Arc<Self>, mut visit: impl FnMut(&Arc<HierarchyNode>)) {
        fn walk(node: &Arc<HierarchyNode>, visit: &mut dyn FnMut(&Arc<HierarchyNode>)) {
            visit(node);
            for child in node.children.lock().iter() {
                walk(child, visit);
            }
        }
        walk(self, &mut visit);
    }

    /// Breadth-first traversal of the subtree rooted at `self`.
    pub fn traverse_bfs(self: &Arc<Self>, mut visit: impl FnMut(&Arc<HierarchyNode>)) {
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(self.clone());
        while let Some(node) = queue.pop_front() {
            visit(&node);
            queue.extend(node.children.lock().iter().cloned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_tree() -> (Arc<HierarchyNode>, Arc<HierarchyNode>, Arc<HierarchyNode>) {
        let root = HierarchyNode::root("kernel");
        let mid = HierarchyNode::root("orders");
        let leaf = HierarchyNode::root("orders.billing");
        root.attach_child(&mid);
        mid.attach_child(&leaf);
        (root, mid, leaf)
    }

    #[test]
    fn lineage_walks_up_to_root_closest_first() {
        let (root, mid, leaf) = build_tree();
        let names: Vec<&str> = leaf.lineage().iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["orders.billing", "orders", "kernel"]);
        assert!(root.parent().is_none());
    }

    #[test]
    fn reattaching_a_child_moves_it_out_of_its_old_parent() {
        let root = HierarchyNode::root("kernel");
        let a = HierarchyNode::root("a");
        let b = HierarchyNode::root("b");
        let child = HierarchyNode::root("child");
        a.attach_child(&child);
        b.attach_child(&child);
        assert!(a.children().is_empty());
        assert_eq!(b.children().len(), 1);
        assert_eq!(child.parent().unwrap().name(), "b");
        let _ = root;
    }

    #[test]
    fn traverse_visits_parent_before_children() {
        let (root, _mid, _leaf) = build_tree();
        let mut order = Vec::new();
        root.traverse(|n| order.push(n.name().to_string()));
        assert_eq!(order, vec!["kernel", "orders", "orders.billing"]);
    }

    #[test]
    fn traverse_bfs_visits_level_by_level() {
        let root = HierarchyNode::root("kernel");
        let a = HierarchyNode::root("a");
        let b = HierarchyNode::root("b");
        let a_child = HierarchyNode::root("a.child");
        root.attach_child(&a);
        root.attach_child(&b);
        a.attach_child(&a_child);

        let mut order = Vec::new();
        root.traverse_bfs(|n| order.push(n.name().to_string()));
        assert_eq!(order, vec!["kernel", "a", "b", "a.child"]);
    }
}
