//! Fixed-shape cell allocator for tree nodes.
//!
//! Stands in for the source's `MFS` (manual fixed-size) pool: a slab of
//! same-sized cells with a free list threaded through vacant slots. The
//! only failure mode is exhaustion, matching the original's one-and-only
//! node allocator contract.

use thiserror::Error;

/// The node pool could not supply a cell.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
#[error("node pool exhausted (capacity {capacity})")]
pub struct AllocError {
    pub capacity: usize,
}

/// Opaque handle into a [`NodePool`]'s slab.
///
/// Stable for the lifetime of the cell it names; reused only after the
/// cell has been freed, exactly like the source reusing freed
/// `CBSBlockStruct` cells from the `MFS` pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    fn index(self) -> usize {
        self.0
    }
}

enum Slot<T> {
    Occupied(T),
    Vacant { next_free: Option<usize> },
}

/// A bounded (or unbounded) slab allocator of `T`-shaped cells.
///
/// `capacity`, when set, bounds how many cells may be live at once; this
/// is what lets tests and callers deliberately reproduce the allocation
/// exhaustion the emergency fallback path exists to handle. `None` means
/// unbounded, growing the backing `Vec` as needed.
pub struct NodePool<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<usize>,
    live: usize,
    capacity: Option<usize>,
}

impl<T> NodePool<T> {
    /// Creates an empty pool with no capacity limit.
    pub fn new() -> Self {
        NodePool {
            slots: Vec::new(),
            free_head: None,
            live: 0,
            capacity: None,
        }
    }

    /// Creates an empty pool that can hold at most `capacity` live cells.
    pub fn with_capacity(capacity: usize) -> Self {
        NodePool {
            slots: Vec::with_capacity(capacity),
            free_head: None,
            live: 0,
            capacity: Some(capacity),
        }
    }

    /// Number of cells currently allocated.
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Allocates a cell holding `value`, returning its handle.
    pub fn alloc(&mut self, value: T) -> Result<NodeId, AllocError> {
        if let Some(cap) = self.capacity {
            if self.live >= cap {
                return Err(AllocError { capacity: cap });
            }
        }

        let index = if let Some(free) = self.free_head {
            let Slot::Vacant { next_free } = &self.slots[free] else {
                unreachable!("free list pointed at an occupied slot");
            };
            self.free_head = *next_free;
            self.slots[free] = Slot::Occupied(value);
            free
        } else {
            self.slots.push(Slot::Occupied(value));
            self.slots.len() - 1
        };

        self.live += 1;
        Ok(NodeId(index))
    }

    /// Frees a cell, returning its stored value.
    ///
    /// Panics if `id` does not name a currently occupied cell; every
    /// caller in this crate frees a node exactly once, immediately after
    /// removing its last reference from the index.
    pub fn free(&mut self, id: NodeId) -> T {
        let slot = &mut self.slots[id.index()];
        let value = match std::mem::replace(slot, Slot::Vacant { next_free: self.free_head }) {
            Slot::Occupied(value) => value,
            Slot::Vacant { .. } => panic!("double free of node pool cell"),
        };
        self.free_head = Some(id.index());
        self.live -= 1;
        value
    }

    pub fn get(&self, id: NodeId) -> &T {
        match &self.slots[id.index()] {
            Slot::Occupied(value) => value,
            Slot::Vacant { .. } => panic!("use of freed node pool cell"),
        }
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut T {
        match &mut self.slots[id.index()] {
            Slot::Occupied(value) => value,
            Slot::Vacant { .. } => panic!("use of freed node pool cell"),
        }
    }
}

impl<T> Default for NodePool<T> {
    fn default() -> Self {
        Self::new()
    }
}
