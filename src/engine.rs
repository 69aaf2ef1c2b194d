//! The coalescing block structure itself.
//!
//! [`Cbs`] ties the [`crate::range_index::RangeIndex`] (the tree
//! proper) and [`crate::emergency::EmergencyLists`] (the fallback) into
//! a single engine implementing the insert/delete/find/iterate
//! operations, firing [`CbsObserver`] callbacks on every size
//! transition across `min_size`.

use std::cell::Cell;
use std::fmt;

use tracing::{debug, trace};

use crate::config::CbsConfig;
use crate::emergency::EmergencyLists;
use crate::error::{CbsError, CbsResult};
use crate::node_pool::NodeId;
use crate::observer::{BlockInfo, CbsObserver};
use crate::range::Range;
use crate::range_index::{Neighbours, RangeIndex};

/// A coalescing block structure.
///
/// Tracks a disjoint set of `[base, limit)` ranges, merging adjacent
/// ranges on insert and splitting on partial delete. `O` is the
/// observer type notified of size transitions across `min_size`;
/// defaults to `()`, the no-op observer, so `Cbs<()>` (the type alias
/// most callers want) pays nothing for callbacks they never asked for.
pub struct Cbs<O: CbsObserver = ()> {
    index: RangeIndex,
    emergency: Option<EmergencyLists>,
    config: CbsConfig,
    observer: O,
    in_cbs: Cell<bool>,
}

impl<O: CbsObserver> Cbs<O> {
    /// Builds a new, empty structure with the given configuration and
    /// observer. Panics (via [`CbsConfig::validate`]) on invalid
    /// configuration.
    pub fn new(config: CbsConfig, observer: O) -> Self {
        config.validate();
        let emergency = config.may_use_inline.then(|| EmergencyLists::new(config.alignment));
        Cbs {
            index: RangeIndex::new(config.node_pool_capacity, config.fast_find),
            emergency,
            config,
            observer,
            in_cbs: Cell::new(false),
        }
    }

    /// The configuration this instance was built with. `min_size` is
    /// the only field [`Cbs::set_min_size`] can change afterwards.
    pub fn config(&self) -> &CbsConfig {
        &self.config
    }

    /// Number of ranges currently held in the tree proper (excludes
    /// anything parked in the emergency lists).
    pub fn block_count(&self) -> usize {
        self.index.live_count()
    }

    /// The observer supplied at construction.
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// The observer supplied at construction, mutably — useful for
    /// draining or resetting recorded state between assertions.
    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    fn enter(&self) {
        assert!(!self.in_cbs.get(), "re-entrant call into Cbs");
        self.in_cbs.set(true);
    }

    fn leave(&self) {
        assert!(self.in_cbs.get());
        self.in_cbs.set(false);
    }

    fn check_range(&self, base: usize, limit: usize) {
        assert!(base < limit, "base must be strictly less than limit");
        assert_eq!(base % self.config.alignment, 0, "base must be alignment-aligned");
        assert_eq!(limit % self.config.alignment, 0, "limit must be alignment-aligned");
    }

    fn block_info(&self, id: NodeId) -> BlockInfo {
        BlockInfo {
            base: self.index.base(id),
            limit: self.index.limit(id),
        }
    }

    fn fire_grow(&mut self, id: NodeId, old_size: usize) {
        let new_size = self.index.size(id);
        let info = self.block_info(id);
        let min_size = self.config.min_size;
        if old_size < min_size && new_size >= min_size {
            self.observer.on_new(info, old_size, new_size);
        } else if old_size >= min_size {
            self.observer.on_grow(info, old_size, new_size);
        }
    }

    fn fire_shrink(&mut self, id: NodeId, old_size: usize) {
        let new_size = self.index.size(id);
        let info = self.block_info(id);
        let min_size = self.config.min_size;
        if old_size >= min_size && new_size < min_size {
            self.observer.on_delete(info, old_size, new_size);
        } else if new_size >= min_size {
            self.observer.on_shrink(info, old_size, new_size);
        }
    }

    fn fire_block_delete(&mut self, id: NodeId) {
        let old_size = self.index.size(id);
        let info = self.block_info(id);
        self.index.delete_node(id);
        if old_size >= self.config.min_size {
            self.observer.on_delete(info, old_size, 0);
        }
    }

    fn insert_new_block(&mut self, base: usize, limit: usize) -> CbsResult<()> {
        let id = self.index.insert_node(base, limit).map_err(|_| CbsError::AllocFail)?;
        let size = self.index.size(id);
        if size >= self.config.min_size {
            self.observer.on_new(BlockInfo { base, limit }, 0, size);
        }
        Ok(())
    }

    /// Inserts `[base, limit)` into the tree proper, merging with
    /// whichever neighbours it touches. Returns [`CbsError::Conflict`]
    /// if `base` falls inside an existing range, or if `[base, limit)`
    /// runs into its right neighbour. Does not consult or populate the
    /// emergency lists — callers needing the fallback path use
    /// [`Cbs::insert`].
    fn insert_into_tree(&mut self, base: usize, limit: usize) -> CbsResult<()> {
        let (left, right) = match self.index.neighbours(base) {
            Neighbours::Contains(_) => return Err(CbsError::Conflict),
            Neighbours::Gap(left, right) => (left, right),
        };

        if let Some(r) = right {
            if limit > self.index.base(r) {
                return Err(CbsError::Conflict);
            }
        }

        let left_merge = left.is_some_and(|l| self.index.limit(l) == base);
        let right_merge = right.is_some_and(|r| self.index.base(r) == limit);

        match (left_merge, right_merge) {
            (true, true) => {
                let l = left.unwrap();
                let r = right.unwrap();
                let old_left_size = self.index.size(l);
                let old_right_size = self.index.size(r);
                // The larger neighbour survives and absorbs the other,
                // matching the source's "must block larger neighbour
                // and destroy smaller neighbour" rule; ties favour left.
                // The absorbed neighbour is gone, so it goes through
                // `fire_block_delete` just like an outright delete,
                // before the survivor's boundary is widened.
                if old_left_size >= old_right_size {
                    let right_limit = self.index.limit(r);
                    self.fire_block_delete(r);
                    self.index.set_range(l, self.index.base(l), right_limit);
                    self.fire_grow(l, old_left_size);
                } else {
                    let left_base = self.index.base(l);
                    self.fire_block_delete(l);
                    self.index.set_range(r, left_base, self.index.limit(r));
                    self.fire_grow(r, old_right_size);
                }
            }
            (true, false) => {
                let l = left.unwrap();
                let old_size = self.index.size(l);
                self.index.set_range(l, self.index.base(l), limit);
                self.fire_grow(l, old_size);
            }
            (false, true) => {
                let r = right.unwrap();
                let old_size = self.index.size(r);
                self.index.set_range(r, base, self.index.limit(r));
                self.fire_grow(r, old_size);
            }
            (false, false) => {
                self.insert_new_block(base, limit)?;
            }
        }

        Ok(())
    }

    fn flush_emergency(&mut self) {
        let Some(mut emergency) = self.emergency.take() else {
            return;
        };
        // SAFETY: every range on the lists was added through `add`,
        // which only ever receives ranges satisfying the module's
        // memory-ownership contract.
        unsafe {
            emergency.flush(|base, limit| self.insert_into_tree(base, limit).is_ok());
        }
        self.emergency = Some(emergency);
    }

    /// Inserts `[base, limit)`, coalescing with any adjacent tracked
    /// range.
    ///
    /// If the node pool is exhausted and inline fallback is enabled,
    /// the range is instead written into the emergency lists and `Ok`
    /// is returned; a later insert or delete may flush it back into the
    /// tree. With inline fallback disabled, pool exhaustion surfaces as
    /// [`CbsError::AllocFail`].
    ///
    /// # Safety
    /// When [`crate::CbsConfig::may_use_inline`] is set, the caller must
    /// guarantee `[base, limit)` is writable memory it exclusively owns
    /// for as long as it remains tracked by this structure — insertion
    /// may write bookkeeping metadata directly into it.
    pub unsafe fn insert(&mut self, base: usize, limit: usize) -> CbsResult<()> {
        self.enter();
        self.check_range(base, limit);

        let (base, limit) = if self.config.may_use_inline {
            let emergency = self.emergency.as_mut().expect("may_use_inline implies emergency lists");
            unsafe { emergency.coalesce(base, limit) }
        } else {
            (base, limit)
        };

        let insert_result = self.insert_into_tree(base, limit);
        let result = if self.config.may_use_inline {
            match insert_result {
                Ok(()) => {
                    self.flush_emergency();
                    Ok(())
                }
                Err(CbsError::AllocFail) => {
                    debug!(base, limit, "node pool exhausted, falling back to emergency lists");
                    unsafe {
                        self.emergency.as_mut().unwrap().add(base, limit);
                    }
                    Ok(())
                }
                other => other,
            }
        } else {
            insert_result
        };

        trace!(base, limit, ok = result.is_ok(), "insert");
        self.leave();
        result
    }

    fn delete_from_tree(&mut self, base: usize, limit: usize) -> CbsResult<()> {
        let id = self.index.search(base).ok_or(CbsError::NotFound)?;
        let block_base = self.index.base(id);
        let block_limit = self.index.limit(id);

        if limit > block_limit {
            return Err(CbsError::Conflict);
        }

        if base == block_base {
            if limit == block_limit {
                self.fire_block_delete(id);
            } else {
                let old_size = self.index.size(id);
                self.index.set_range(id, limit, block_limit);
                self.fire_shrink(id, old_size);
            }
        } else if limit == block_limit {
            let old_size = self.index.size(id);
            self.index.set_range(id, block_base, base);
            self.fire_shrink(id, old_size);
        } else {
            // Interior split: the larger residual is kept in place
            // (shrunk), the smaller residual becomes a new node. If
            // that new-node allocation fails, the shrink has already
            // happened and is not rolled back — the larger residual
            // remains correctly tracked, and the caller gets
            // `AllocFail` back so it can retry once there's room.
            let left_new_size = base - block_base;
            let right_new_size = block_limit - limit;
            if left_new_size >= right_new_size {
                let old_size = self.index.size(id);
                self.index.set_range(id, block_base, base);
                self.fire_shrink(id, old_size);
                self.insert_new_block(limit, block_limit)?;
            } else {
                let old_size = self.index.size(id);
                self.index.set_range(id, limit, block_limit);
                self.fire_shrink(id, old_size);
                self.insert_new_block(block_base, base)?;
            }
        }

        Ok(())
    }

    /// Removes `[base, limit)` from the tracked set, shrinking or
    /// splitting whatever range currently contains it.
    ///
    /// Returns [`CbsError::NotFound`] if no tracked range contains
    /// `[base, limit)`, or [`CbsError::Conflict`] if it only partially
    /// overlaps one.
    pub fn delete(&mut self, base: usize, limit: usize) -> CbsResult<()> {
        self.enter();
        self.check_range(base, limit);

        let mut result = self.delete_from_tree(base, limit);

        if self.config.may_use_inline {
            if result == Err(CbsError::NotFound) {
                // SAFETY: the block/grain lists only ever contain
                // ranges added via `insert`'s own safety contract.
                let found_block = unsafe { self.emergency.as_mut().unwrap().delete_from_block_list(base, limit) };
                result = if found_block {
                    Ok(())
                } else {
                    let found_grain = unsafe { self.emergency.as_mut().unwrap().delete_from_grain_list(base, limit) };
                    if found_grain { Ok(()) } else { Err(CbsError::NotFound) }
                };
            }
            // Always worth trying, regardless of where the range was found.
            self.flush_emergency();
        }

        trace!(base, limit, ok = result.is_ok(), "delete");
        self.leave();
        result
    }

    /// Finds the leftmost (lowest-base) tracked range of at least
    /// `size`. Requires `fast_find` to be enabled.
    ///
    /// Never consults the emergency lists beyond an initial flush
    /// attempt — a range parked there that could satisfy the request
    /// but fails to flush (pool still exhausted) is not found. This
    /// matches the source exactly, which documents the same limitation
    /// rather than paying for a fallback scan on every failed find.
    pub fn find_first(&mut self, size: usize) -> Option<Range> {
        self.enter();
        assert!(size > 0);
        assert!(self.config.fast_find, "find_first requires fast_find");
        if self.config.may_use_inline {
            self.flush_emergency();
        }
        let result = self.index.find_first(size).map(|id| Range::new(self.index.base(id), self.index.limit(id)));
        self.leave();
        result
    }

    /// Finds the rightmost (highest-base) tracked range of at least
    /// `size`. See [`Cbs::find_first`] for the emergency-list caveat.
    pub fn find_last(&mut self, size: usize) -> Option<Range> {
        self.enter();
        assert!(size > 0);
        assert!(self.config.fast_find, "find_last requires fast_find");
        if self.config.may_use_inline {
            self.flush_emergency();
        }
        let result = self.index.find_last(size).map(|id| Range::new(self.index.base(id), self.index.limit(id)));
        self.leave();
        result
    }

    /// Visits every tracked range in ascending base order until `visit`
    /// returns `false`. Not necessarily efficient — a full in-order
    /// walk, same as the source.
    pub fn iterate(&self, mut visit: impl FnMut(Range) -> bool) {
        self.enter();
        self.index.iterate(|base, limit, _max_size| visit(Range::new(base, limit)));
        self.leave();
    }

    /// Like [`Cbs::iterate`], but skips ranges smaller than `min_size`.
    pub fn iterate_large(&self, mut visit: impl FnMut(Range) -> bool) {
        self.enter();
        let min_size = self.config.min_size;
        self.index.iterate(|base, limit, _max_size| {
            if limit - base >= min_size {
                visit(Range::new(base, limit))
            } else {
                true
            }
        });
        self.leave();
    }

    /// Changes the minimum interesting size, firing `on_new` for blocks
    /// that cross above the new threshold (if it's lower than the old
    /// one) or `on_delete` for blocks that cross below it (if higher).
    pub fn set_min_size(&mut self, new_min_size: usize) {
        self.enter();
        let old_min_size = self.config.min_size;

        if new_min_size < old_min_size {
            self.index.iterate(|base, limit, _max_size| {
                let size = limit - base;
                if size < old_min_size && size >= new_min_size {
                    self.observer.on_new(BlockInfo { base, limit }, size, size);
                }
                true
            });
        } else if new_min_size > old_min_size {
            self.index.iterate(|base, limit, _max_size| {
                let size = limit - base;
                if size >= old_min_size && size < new_min_size {
                    self.observer.on_delete(BlockInfo { base, limit }, size, size);
                }
                true
            });
        }

        self.config.min_size = new_min_size;
        self.leave();
    }

    /// Writes a human-readable dump of the tree to `w`: one
    /// `[base,limit) {max_size}` line per tracked range.
    pub fn describe(&self, w: &mut impl fmt::Write) -> CbsResult<()> {
        writeln!(w, "Cbs {{").map_err(|_| CbsError::IoErr)?;
        let mut write_failed = false;
        self.index.iterate(|base, limit, max_size| {
            if writeln!(w, "  [{base:#x},{limit:#x}) {{{max_size}}}").is_err() {
                write_failed = true;
                return false;
            }
            true
        });
        if write_failed {
            return Err(CbsError::IoErr);
        }
        writeln!(w, "}}").map_err(|_| CbsError::IoErr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CbsConfig;

    fn test_config() -> CbsConfig {
        CbsConfig {
            min_size: 0,
            alignment: 8,
            may_use_inline: false,
            fast_find: true,
            node_pool_capacity: None,
        }
    }

    #[test]
    fn insert_then_find() {
        let mut cbs = Cbs::new(test_config(), ());
        unsafe {
            cbs.insert(0x1000, 0x2000).unwrap();
        }
        let found = cbs.find_first(0x500).unwrap();
        assert_eq!(found, Range::new(0x1000, 0x2000));
    }

    #[test]
    fn adjacent_inserts_coalesce() {
        let mut cbs = Cbs::new(test_config(), ());
        unsafe {
            cbs.insert(0x1000, 0x2000).unwrap();
            cbs.insert(0x2000, 0x3000).unwrap();
        }
        assert_eq!(cbs.block_count(), 1);
        let found = cbs.find_first(0x1fff).unwrap();
        assert_eq!(found, Range::new(0x1000, 0x3000));
    }

    #[test]
    fn delete_splits_middle() {
        let mut cbs = Cbs::new(test_config(), ());
        unsafe {
            cbs.insert(0x1000, 0x4000).unwrap();
        }
        cbs.delete(0x2000, 0x3000).unwrap();
        assert_eq!(cbs.block_count(), 2);

        let mut ranges = Vec::new();
        cbs.iterate(|r| {
            ranges.push(r);
            true
        });
        assert_eq!(ranges, vec![Range::new(0x1000, 0x2000), Range::new(0x3000, 0x4000)]);
    }

    #[test]
    fn delete_entire_block_removes_it() {
        let mut cbs = Cbs::new(test_config(), ());
        unsafe {
            cbs.insert(0x1000, 0x2000).unwrap();
        }
        cbs.delete(0x1000, 0x2000).unwrap();
        assert_eq!(cbs.block_count(), 0);
    }

    #[test]
    fn delete_conflict_on_partial_overlap() {
        let mut cbs = Cbs::new(test_config(), ());
        unsafe {
            cbs.insert(0x1000, 0x2000).unwrap();
        }
        assert_eq!(cbs.delete(0x1800, 0x2800), Err(CbsError::Conflict));
    }

    #[test]
    fn delete_not_found() {
        let mut cbs = Cbs::new(test_config(), ());
        assert_eq!(cbs.delete(0x1000, 0x2000), Err(CbsError::NotFound));
    }

    #[test]
    fn describe_lists_every_range() {
        let mut cbs = Cbs::new(test_config(), ());
        unsafe {
            cbs.insert(0x1000, 0x2000).unwrap();
        }
        let mut out = String::new();
        cbs.describe(&mut out).unwrap();
        assert!(out.contains("[0x1000,0x2000) {0x1000}"));
    }

    struct CountingObserver {
        new_calls: usize,
        delete_calls: usize,
    }

    impl CbsObserver for CountingObserver {
        fn on_new(&mut self, _block: BlockInfo, _old_size: usize, _new_size: usize) {
            self.new_calls += 1;
        }

        fn on_delete(&mut self, _block: BlockInfo, _old_size: usize, _new_size: usize) {
            self.delete_calls += 1;
        }
    }

    #[test]
    fn observer_fires_new_and_delete() {
        let mut cbs = Cbs::new(
            test_config(),
            CountingObserver {
                new_calls: 0,
                delete_calls: 0,
            },
        );
        unsafe {
            cbs.insert(0x1000, 0x2000).unwrap();
        }
        cbs.delete(0x1000, 0x2000).unwrap();
        assert_eq!(cbs.observer.new_calls, 1);
        assert_eq!(cbs.observer.delete_calls, 1);
    }

    #[test]
    fn set_min_size_crosses_threshold() {
        let mut cbs = Cbs::new(
            test_config(),
            CountingObserver {
                new_calls: 0,
                delete_calls: 0,
            },
        );
        unsafe {
            cbs.insert(0x1000, 0x1100).unwrap();
        }
        cbs.set_min_size(0x200);
        assert_eq!(cbs.observer.delete_calls, 1);
        cbs.set_min_size(0);
        assert_eq!(cbs.observer.new_calls, 1);
    }
}
