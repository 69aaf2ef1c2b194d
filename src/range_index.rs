//! Ordered range index: a splay tree over disjoint `[base, limit)`
//! ranges, keyed by `base`, optionally augmented with a `max_size`
//! statistic enabling `find_first`/`find_last`.
//!
//! Nodes live in a [`NodePool`] arena and reference each other by
//! [`NodeId`] rather than pointer, per the "intrusive tree with explicit
//! parent indices" strategy: no `unsafe`, no `Rc`/`RefCell`, ownership of
//! the tree shape is entirely in `parent`/`left`/`right` fields.
//!
//! The comparator matches the source exactly: a `base1` key compares
//! `LESS` than a node if `base1 < base2`, `GREATER` if `base1 >= limit2`,
//! and `EQUAL` otherwise (i.e. `base1` falls inside `[base2, limit2)`).

use tracing::trace;

use crate::node_pool::{AllocError, NodeId, NodePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compare {
    Less,
    Equal,
    Greater,
}

/// Outcome of [`RangeIndex::neighbours`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neighbours {
    /// The probed key is not inside any tracked range; these are the
    /// immediate predecessor/successor blocks around it.
    Gap(Option<NodeId>, Option<NodeId>),
    /// The probed key falls inside this already-tracked range.
    Contains(NodeId),
}

struct BlockRecord {
    base: usize,
    limit: usize,
    /// Max size over this node and both subtrees; meaningful only when
    /// the owning index has `fast_find` enabled.
    max_size: usize,
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
}

impl BlockRecord {
    fn size(&self) -> usize {
        self.limit - self.base
    }
}

/// An ordered, splay-tree-backed set of disjoint ranges.
pub struct RangeIndex {
    pool: NodePool<BlockRecord>,
    root: Option<NodeId>,
    fast_find: bool,
}

impl RangeIndex {
    pub fn new(capacity: Option<usize>, fast_find: bool) -> Self {
        let pool = match capacity {
            Some(cap) => NodePool::with_capacity(cap),
            None => NodePool::new(),
        };
        RangeIndex {
            pool,
            root: None,
            fast_find,
        }
    }

    pub fn live_count(&self) -> usize {
        self.pool.live_count()
    }

    pub fn base(&self, id: NodeId) -> usize {
        self.pool.get(id).base
    }

    pub fn limit(&self, id: NodeId) -> usize {
        self.pool.get(id).limit
    }

    pub fn size(&self, id: NodeId) -> usize {
        self.pool.get(id).size()
    }

    pub fn max_size(&self, id: NodeId) -> usize {
        self.pool.get(id).max_size
    }

    fn compare(key: usize, node: &BlockRecord) -> Compare {
        if key < node.base {
            Compare::Less
        } else if key >= node.limit {
            Compare::Greater
        } else {
            Compare::Equal
        }
    }

    fn update_node(&mut self, id: NodeId) {
        if !self.fast_find {
            return;
        }
        let (left, right, own_size) = {
            let node = self.pool.get(id);
            (node.left, node.right, node.size())
        };
        let mut max_size = own_size;
        if let Some(l) = left {
            max_size = max_size.max(self.pool.get(l).max_size);
        }
        if let Some(r) = right {
            max_size = max_size.max(self.pool.get(r).max_size);
        }
        self.pool.get_mut(id).max_size = max_size;
    }

    // -- rotations --------------------------------------------------

    fn rotate(&mut self, id: NodeId) {
        let parent_id = self.pool.get(id).parent.expect("rotate requires a parent");
        let grandparent = self.pool.get(parent_id).parent;
        let parent_is_left_child = grandparent.map(|g| self.pool.get(g).left == Some(parent_id));

        if self.pool.get(parent_id).left == Some(id) {
            // zig-right: id is left child of parent
            let b = self.pool.get(id).right;
            self.pool.get_mut(parent_id).left = b;
            if let Some(b) = b {
                self.pool.get_mut(b).parent = Some(parent_id);
            }
            self.pool.get_mut(id).right = Some(parent_id);
        } else {
            // zig-left: id is right child of parent
            let b = self.pool.get(id).left;
            self.pool.get_mut(parent_id).right = b;
            if let Some(b) = b {
                self.pool.get_mut(b).parent = Some(parent_id);
            }
            self.pool.get_mut(id).left = Some(parent_id);
        }

        self.pool.get_mut(parent_id).parent = Some(id);
        self.pool.get_mut(id).parent = grandparent;

        if let Some(g) = grandparent {
            if parent_is_left_child == Some(true) {
                self.pool.get_mut(g).left = Some(id);
            } else {
                self.pool.get_mut(g).right = Some(id);
            }
        } else {
            self.root = Some(id);
        }

        // parent's subtree changed shape before id's; update bottom-up.
        self.update_node(parent_id);
        self.update_node(id);
    }

    /// Splays `id` to the root via the standard zig/zig-zig/zig-zag
    /// sequence.
    fn splay(&mut self, id: NodeId) {
        while let Some(parent_id) = self.pool.get(id).parent {
            match self.pool.get(parent_id).parent {
                None => {
                    // zig
                    self.rotate(id);
                }
                Some(grandparent) => {
                    let parent_is_left = self.pool.get(grandparent).left == Some(parent_id);
                    let id_is_left = self.pool.get(parent_id).left == Some(id);
                    if parent_is_left == id_is_left {
                        // zig-zig: rotate parent first, then id
                        self.rotate(parent_id);
                        self.rotate(id);
                    } else {
                        // zig-zag
                        self.rotate(id);
                        self.rotate(id);
                    }
                }
            }
        }
    }

    /// Descends the tree comparing `key` against each visited node,
    /// splaying the last node visited to the root. Returns that node's
    /// id and how `key` compared against it.
    fn splay_to(&mut self, key: usize) -> Option<(NodeId, Compare)> {
        let mut current = self.root?;
        loop {
            let cmp = Self::compare(key, self.pool.get(current));
            let next = match cmp {
                Compare::Equal => None,
                Compare::Less => self.pool.get(current).left,
                Compare::Greater => self.pool.get(current).right,
            };
            match next {
                Some(n) => current = n,
                None => {
                    self.splay(current);
                    return Some((current, cmp));
                }
            }
        }
    }

    /// Finds the node whose range contains `key`, splaying it to the
    /// root on success.
    pub fn search(&mut self, key: usize) -> Option<NodeId> {
        match self.splay_to(key) {
            Some((id, Compare::Equal)) => Some(id),
            _ => None,
        }
    }

    /// Finds the immediate left and right neighbours of `key`, i.e. the
    /// predecessor and successor blocks around the gap containing it —
    /// or, if `key` already falls inside a tracked range, reports that
    /// range back instead of guessing at neighbours either side of it.
    pub fn neighbours(&mut self, key: usize) -> Neighbours {
        let Some((id, cmp)) = self.splay_to(key) else {
            return Neighbours::Gap(None, None);
        };
        match cmp {
            Compare::Less => {
                // id is the right neighbour; left neighbour is the
                // predecessor, i.e. the max of id's left subtree.
                let left = self.pool.get(id).left.map(|l| self.subtree_max(l));
                Neighbours::Gap(left, Some(id))
            }
            Compare::Greater => {
                let right = self.pool.get(id).right.map(|r| self.subtree_min(r));
                Neighbours::Gap(Some(id), right)
            }
            Compare::Equal => Neighbours::Contains(id),
        }
    }

    fn subtree_min(&self, mut id: NodeId) -> NodeId {
        while let Some(l) = self.pool.get(id).left {
            id = l;
        }
        id
    }

    fn subtree_max(&self, mut id: NodeId) -> NodeId {
        while let Some(r) = self.pool.get(id).right {
            id = r;
        }
        id
    }

    /// Inserts a brand-new disjoint range, returning its node id.
    ///
    /// The caller (the engine) is responsible for having already
    /// established, via [`RangeIndex::neighbours`], that `[base, limit)`
    /// does not overlap any tracked range.
    pub fn insert_node(&mut self, base: usize, limit: usize) -> Result<NodeId, AllocError> {
        let size = limit - base;
        let id = self.pool.alloc(BlockRecord {
            base,
            limit,
            max_size: size,
            parent: None,
            left: None,
            right: None,
        })?;

        match self.root {
            None => {
                self.root = Some(id);
            }
            Some(mut current) => loop {
                let cmp = Self::compare(base, self.pool.get(current));
                debug_assert_ne!(cmp, Compare::Equal, "insert_node overlaps an existing range");
                let side = match cmp {
                    Compare::Less => &mut self.pool.get_mut(current).left,
                    _ => &mut self.pool.get_mut(current).right,
                };
                match *side {
                    Some(next) => current = next,
                    None => {
                        *side = Some(id);
                        break;
                    }
                }
            },
        }

        // Fix up the parent pointer for the node we just linked, and
        // recompute augmentation on the path up to the root, then splay.
        self.relink_parent(id);
        self.splay(id);
        trace!(base, limit, "inserted new range node");
        Ok(id)
    }

    /// After a plain BST link, walk from the root to find `id`'s actual
    /// parent (the link loop above doesn't have a handle to set it
    /// directly without fighting the borrow checker) and set it, then
    /// refresh augmentation bottom-up.
    fn relink_parent(&mut self, id: NodeId) {
        if self.root == Some(id) {
            self.update_node(id);
            return;
        }
        let base = self.pool.get(id).base;
        let mut current = self.root.expect("non-root insert implies a root exists");
        loop {
            let (left, right) = {
                let node = self.pool.get(current);
                (node.left, node.right)
            };
            if left == Some(id) || right == Some(id) {
                self.pool.get_mut(id).parent = Some(current);
                break;
            }
            current = if base < self.pool.get(current).base {
                left.expect("BST descent must reach id")
            } else {
                right.expect("BST descent must reach id")
            };
        }
        // Refresh augmentation from the new leaf up to the root.
        let mut node = Some(id);
        while let Some(n) = node {
            self.update_node(n);
            node = self.pool.get(n).parent;
        }
    }

    /// Updates the extent of an existing node in place (used for
    /// grow/shrink), refreshing augmentation along the path to the root.
    ///
    /// Does not re-splay or re-link; `base`/`limit` change but the node
    /// keeps its tree position, matching the source's `CBSBlockShrink`/
    /// `CBSBlockGrow`, which mutate `block->base`/`block->limit` in place
    /// and call `SplayNodeRefresh` rather than re-inserting.
    pub fn set_range(&mut self, id: NodeId, base: usize, limit: usize) {
        {
            let node = self.pool.get_mut(id);
            node.base = base;
            node.limit = limit;
        }
        let mut node = Some(id);
        while let Some(n) = node {
            self.update_node(n);
            node = self.pool.get(n).parent;
        }
    }

    /// Removes `id` from the tree and frees its cell.
    pub fn delete_node(&mut self, id: NodeId) {
        self.splay(id);
        debug_assert_eq!(self.root, Some(id));

        let (left, right) = {
            let node = self.pool.get(id);
            (node.left, node.right)
        };

        let new_root = match (left, right) {
            (None, None) => None,
            (Some(l), None) => {
                self.pool.get_mut(l).parent = None;
                Some(l)
            }
            (None, Some(r)) => {
                self.pool.get_mut(r).parent = None;
                Some(r)
            }
            (Some(l), Some(r)) => {
                self.pool.get_mut(l).parent = None;
                self.root = Some(l);
                // Splay the max of the left subtree to its root, then
                // hang the right subtree off it; it has no right child
                // by construction, so this can't overlap.
                let new_left_root = self.subtree_max(l);
                self.splay(new_left_root);
                self.pool.get_mut(new_left_root).right = Some(r);
                self.pool.get_mut(r).parent = Some(new_left_root);
                self.update_node(new_left_root);
                Some(new_left_root)
            }
        };

        self.root = new_root;
        self.pool.free(id);
    }

    /// Leftmost node in base order, i.e. the first element of the
    /// ascending iteration. Does not splay.
    pub fn first(&self) -> Option<NodeId> {
        let mut current = self.root?;
        while let Some(l) = self.pool.get(current).left {
            current = l;
        }
        Some(current)
    }

    /// In-order successor of `id`. Does not splay.
    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        if let Some(r) = self.pool.get(id).right {
            return Some(self.subtree_min(r));
        }
        let mut current = id;
        let mut parent = self.pool.get(current).parent;
        while let Some(p) = parent {
            if self.pool.get(p).left == Some(current) {
                return Some(p);
            }
            current = p;
            parent = self.pool.get(p).parent;
        }
        None
    }

    /// Finds the leftmost (smallest base) range whose size is at least
    /// `size`, using the `max_size` augmentation to avoid a full scan.
    ///
    /// Requires `fast_find` to have been enabled at construction.
    pub fn find_first(&mut self, size: usize) -> Option<NodeId> {
        debug_assert!(self.fast_find, "find_first requires fast_find");
        let root = self.root?;
        if self.pool.get(root).max_size < size {
            return None;
        }
        let mut current = root;
        loop {
            let node = self.pool.get(current);
            if let Some(l) = node.left {
                if self.pool.get(l).max_size >= size {
                    current = l;
                    continue;
                }
            }
            if node.size() >= size {
                self.splay(current);
                return Some(current);
            }
            current = node.right.expect("max_size invariant guarantees a qualifying descendant");
        }
    }

    /// Finds the rightmost (largest base) range whose size is at least
    /// `size`. Mirror of [`RangeIndex::find_first`].
    pub fn find_last(&mut self, size: usize) -> Option<NodeId> {
        debug_assert!(self.fast_find, "find_last requires fast_find");
        let root = self.root?;
        if self.pool.get(root).max_size < size {
            return None;
        }
        let mut current = root;
        loop {
            let node = self.pool.get(current);
            if let Some(r) = node.right {
                if self.pool.get(r).max_size >= size {
                    current = r;
                    continue;
                }
            }
            if node.size() >= size {
                self.splay(current);
                return Some(current);
            }
            current = node.left.expect("max_size invariant guarantees a qualifying descendant");
        }
    }

    /// Visits every range in ascending base order, stopping early if
    /// `visit` returns `false`.
    pub fn iterate(&self, mut visit: impl FnMut(usize, usize, usize) -> bool) {
        let mut current = self.first();
        while let Some(id) = current {
            let node = self.pool.get(id);
            if !visit(node.base, node.limit, node.max_size) {
                break;
            }
            current = self.next(id);
        }
    }
}
