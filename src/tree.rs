//! Arena representation of a page subtree.
//!
//! Nodes live in a flat vector in breadth-first order and point at their
//! parent by index, so iteration always yields a parent before any of its
//! children and never follows a cycle.

use std::collections::{HashMap, VecDeque};

use crate::error::{Error, Result};
use crate::page::{Page, PageId};

/// Deepest ancestor chain or subtree the store will walk.
pub const MAX_DEPTH: i64 = 512;

#[derive(Debug, Clone)]
struct Node {
    id: PageId,
    parent: Option<usize>,
    /// 1 for the subtree root.
    depth: usize,
}

#[derive(Debug, Clone)]
pub struct PageTree {
    nodes: Vec<Node>,
    index: HashMap<PageId, usize>,
}

impl PageTree {
    /// Build the subtree rooted at `root` from its descendant rows.
    ///
    /// Rows may arrive in any order; siblings are laid out by their `index`.
    /// A row whose parent is not part of the subtree is a consistency error.
    pub fn build(root: PageId, descendants: &[Page]) -> Result<Self> {
        let mut children: HashMap<PageId, Vec<&Page>> = HashMap::new();
        for page in descendants {
            let parent = page.parent_id.ok_or_else(|| {
                Error::Consistency(format!("descendant {} of {root} has no parent", page.id))
            })?;
            children.entry(parent).or_default().push(page);
        }
        for siblings in children.values_mut() {
            siblings.sort_by_key(|p| (p.index, p.id));
        }

        let mut nodes = vec![Node {
            id: root,
            parent: None,
            depth: 1,
        }];
        let mut index = HashMap::from([(root, 0)]);
        let mut queue = VecDeque::from([0usize]);

        while let Some(at) = queue.pop_front() {
            let (id, depth) = (nodes[at].id, nodes[at].depth);
            for child in children.remove(&id).unwrap_or_default() {
                if index.contains_key(&child.id) {
                    return Err(Error::Consistency(format!(
                        "page {} appears twice under {root}",
                        child.id
                    )));
                }
                let slot = nodes.len();
                nodes.push(Node {
                    id: child.id,
                    parent: Some(at),
                    depth: depth + 1,
                });
                index.insert(child.id, slot);
                queue.push_back(slot);
            }
        }

        if let Some(orphans) = children.values().next() {
            return Err(Error::Consistency(format!(
                "page {} is not connected to {root}",
                orphans[0].id
            )));
        }

        Ok(Self { nodes, index })
    }

    pub fn page_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of levels in the subtree; a lone root has height 1.
    pub fn height(&self) -> usize {
        // Breadth-first layout puts a deepest node last.
        self.nodes.last().map_or(0, |n| n.depth)
    }

    /// Ancestors of `id` inside the subtree, nearest first, excluding `id`.
    pub fn ancestors(&self, id: PageId) -> Vec<PageId> {
        let mut out = Vec::new();
        let mut cursor = self.index.get(&id).and_then(|&at| self.nodes[at].parent);
        while let Some(at) = cursor {
            out.push(self.nodes[at].id);
            cursor = self.nodes[at].parent;
        }
        out
    }

    /// Every page of the subtree, root first, each parent before its children.
    pub fn iter(&self) -> impl Iterator<Item = PageId> + '_ {
        self.nodes.iter().map(|n| n.id)
    }
}
