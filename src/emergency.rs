//! Emergency fallback storage.
//!
//! When the node pool is exhausted, the engine still has to remember a
//! freed range somewhere. Rather than fail the operation outright, it
//! writes a small linked-list header directly into the first few words
//! of the range itself — the memory being tracked doubles as the
//! storage for tracking it. This is the one place in the crate that
//! touches raw memory; every other module is built entirely out of safe
//! arena indices.
//!
//! Two lists are kept, ascending by address, each holding ranges too
//! small to host the other's header: a **block list** for ranges big
//! enough to hold a `next` pointer and a `limit`, and a **grain list**
//! for exactly-one-`alignment`-sized ranges that can only hold a `next`
//! pointer. Both lists are kept free of adjacent entries — an adjacent
//! pair is always coalesced into a single entry, so at most one entry
//! on each list can ever border a newly freed range, bounding
//! `coalesce` to at most two absorptions.
//!
//! # Safety contract
//!
//! Every `base`/`limit` passed into this module must name memory that
//! is writable and exclusively owned by the [`crate::Cbs`] instance for
//! as long as the range remains on one of these lists. The instant a
//! range leaves both lists (flushed into the tree, or handed back via
//! delete), that contract lapses and the caller regains ownership.

use std::ptr;

const NULL: usize = 0;

#[repr(C)]
struct BlockHeader {
    next: usize,
    limit: usize,
}

#[repr(C)]
struct GrainHeader {
    next: usize,
}

/// Ascending-order emergency storage for a single [`crate::Cbs`]
/// instance.
pub struct EmergencyLists {
    block_head: usize,
    grain_head: usize,
    grain_size: usize,
}

impl EmergencyLists {
    /// `grain_size` is the CBS's configured alignment: every grain-list
    /// entry is exactly one grain wide.
    pub fn new(grain_size: usize) -> Self {
        EmergencyLists {
            block_head: NULL,
            grain_head: NULL,
            grain_size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.block_head == NULL && self.grain_head == NULL
    }

    /// The smallest range size that can hold a block header; ranges
    /// smaller than this (but equal to `grain_size`) go on the grain
    /// list instead.
    pub fn block_threshold() -> usize {
        std::mem::size_of::<BlockHeader>()
    }

    fn block_ptr(addr: usize) -> *mut BlockHeader {
        addr as *mut BlockHeader
    }

    fn grain_ptr(addr: usize) -> *mut GrainHeader {
        addr as *mut GrainHeader
    }

    /// # Safety
    /// `base` must satisfy the module's safety contract for at least
    /// `size_of::<BlockHeader>()` bytes.
    unsafe fn write_block(base: usize, next: usize, limit: usize) {
        unsafe { ptr::write(Self::block_ptr(base), BlockHeader { next, limit }) };
    }

    /// # Safety
    /// `base` must currently hold a valid `BlockHeader` written by
    /// [`Self::write_block`].
    unsafe fn read_block(base: usize) -> BlockHeader {
        unsafe { ptr::read(Self::block_ptr(base)) }
    }

    /// # Safety
    /// `base` must satisfy the module's safety contract for at least
    /// `size_of::<GrainHeader>()` bytes.
    unsafe fn write_grain(base: usize, next: usize) {
        unsafe { ptr::write(Self::grain_ptr(base), GrainHeader { next }) };
    }

    /// # Safety
    /// `base` must currently hold a valid `GrainHeader` written by
    /// [`Self::write_grain`].
    unsafe fn read_grain(base: usize) -> GrainHeader {
        unsafe { ptr::read(Self::grain_ptr(base)) }
    }

    /// Adds `[base, limit)` to the appropriate list, in address order.
    ///
    /// The range must not be adjacent to anything already listed —
    /// callers coalesce first via [`Self::coalesce`].
    ///
    /// # Safety
    /// `[base, limit)` must satisfy the module's safety contract.
    pub unsafe fn add(&mut self, base: usize, limit: usize) {
        let size = limit - base;
        if size >= Self::block_threshold() {
            unsafe { self.insert_block(base, limit) };
        } else if size == self.grain_size {
            unsafe { self.insert_grain(base) };
        } else {
            debug_assert!(false, "emergency range of size {size} fits neither bucket");
        }
    }

    unsafe fn insert_block(&mut self, new_base: usize, new_limit: usize) {
        let mut prev = NULL;
        let mut cur = self.block_head;
        while cur != NULL && cur < new_base {
            prev = cur;
            cur = unsafe { Self::read_block(cur) }.next;
        }
        unsafe { Self::write_block(new_base, cur, new_limit) };
        if prev == NULL {
            self.block_head = new_base;
        } else {
            let prev_limit = unsafe { Self::read_block(prev) }.limit;
            unsafe { Self::write_block(prev, new_base, prev_limit) };
        }
    }

    unsafe fn insert_grain(&mut self, new_base: usize) {
        let mut prev = NULL;
        let mut cur = self.grain_head;
        while cur != NULL && cur < new_base {
            prev = cur;
            cur = unsafe { Self::read_grain(cur) }.next;
        }
        unsafe { Self::write_grain(new_base, cur) };
        if prev == NULL {
            self.grain_head = new_base;
        } else {
            unsafe { Self::write_grain(prev, new_base) };
        }
    }

    /// Extends `[base, limit)` by absorbing at most two adjacent
    /// emergency-list entries (at most one per list), returning the
    /// possibly-widened range. Entries absorbed are removed from their
    /// list.
    ///
    /// # Safety
    /// `[base, limit)` must satisfy the module's safety contract.
    pub unsafe fn coalesce(&mut self, base: usize, limit: usize) -> (usize, usize) {
        let mut base = base;
        let mut limit = limit;
        let mut n_coalescences = 0u32;

        if self.block_head != NULL {
            let mut prev = NULL;
            let mut cur = self.block_head;
            while cur != NULL && cur <= limit {
                let hdr = unsafe { Self::read_block(cur) };
                if hdr.limit == base {
                    base = cur;
                    let next = hdr.next;
                    if prev == NULL {
                        self.block_head = next;
                    } else {
                        let prev_limit = unsafe { Self::read_block(prev) }.limit;
                        unsafe { Self::write_block(prev, next, prev_limit) };
                    }
                    n_coalescences += 1;
                    prev = cur;
                    cur = next;
                } else if cur == limit {
                    limit = hdr.limit;
                    let next = hdr.next;
                    if prev == NULL {
                        self.block_head = next;
                    } else {
                        let prev_limit = unsafe { Self::read_block(prev) }.limit;
                        unsafe { Self::write_block(prev, next, prev_limit) };
                    }
                    n_coalescences += 1;
                    break;
                } else {
                    prev = cur;
                    cur = hdr.next;
                }
            }
        }

        if self.grain_head != NULL {
            let mut prev = NULL;
            let mut cur = self.grain_head;
            while cur != NULL && cur <= limit && n_coalescences < 2 {
                let hdr = unsafe { Self::read_grain(cur) };
                let grain_limit = cur + self.grain_size;
                if grain_limit == base {
                    base = cur;
                    let next = hdr.next;
                    if prev == NULL {
                        self.grain_head = next;
                    } else {
                        unsafe { Self::write_grain(prev, next) };
                    }
                    n_coalescences += 1;
                    prev = cur;
                    cur = next;
                } else if cur == limit {
                    limit = grain_limit;
                    let next = hdr.next;
                    if prev == NULL {
                        self.grain_head = next;
                    } else {
                        unsafe { Self::write_grain(prev, next) };
                    }
                    n_coalescences += 1;
                    break;
                } else {
                    prev = cur;
                    cur = hdr.next;
                }
            }
        }

        debug_assert!(n_coalescences <= 2, "emergency lists are invariant-non-adjacent");
        (base, limit)
    }

    /// Attempts to move every listed range back into the tree via
    /// `try_insert`, draining the block list first, then the grain
    /// list. Stops at the first failed insertion, leaving the remainder
    /// (including, if the block list failed, the entire grain list)
    /// untouched — matching the all-or-stop behaviour of a single node
    /// pool that just ran out.
    ///
    /// # Safety
    /// Every entry currently listed must satisfy the module's safety
    /// contract (guaranteed by construction: entries only get here via
    /// [`Self::add`]).
    pub unsafe fn flush(&mut self, mut try_insert: impl FnMut(usize, usize) -> bool) {
        while self.block_head != NULL {
            let hdr = unsafe { Self::read_block(self.block_head) };
            if try_insert(self.block_head, hdr.limit) {
                self.block_head = hdr.next;
            } else {
                return;
            }
        }
        while self.grain_head != NULL {
            let hdr = unsafe { Self::read_grain(self.grain_head) };
            let limit = self.grain_head + self.grain_size;
            if try_insert(self.grain_head, limit) {
                self.grain_head = hdr.next;
            } else {
                return;
            }
        }
    }

    /// Removes `[base, limit)` from the block list, re-adding any
    /// head/tail fragment of the containing entry that is not covered
    /// by the deleted range. Returns whether a containing entry was
    /// found (a range straddling list boundaries, or absent entirely,
    /// both report `false`).
    ///
    /// # Safety
    /// `[base, limit)` must satisfy the module's safety contract and
    /// the block list's entries must all satisfy it too.
    pub unsafe fn delete_from_block_list(&mut self, base: usize, limit: usize) -> bool {
        let mut prev = NULL;
        let mut cur = self.block_head;
        while cur != NULL {
            let hdr = unsafe { Self::read_block(cur) };
            if hdr.limit >= limit {
                break;
            }
            prev = cur;
            cur = hdr.next;
        }
        if cur == NULL {
            return false;
        }
        let hdr = unsafe { Self::read_block(cur) };
        let (block_base, block_limit) = (cur, hdr.limit);
        if !(block_base <= base && limit <= block_limit) {
            return false;
        }

        if prev == NULL {
            self.block_head = hdr.next;
        } else {
            let prev_limit = unsafe { Self::read_block(prev) }.limit;
            unsafe { Self::write_block(prev, hdr.next, prev_limit) };
        }
        if block_base < base {
            unsafe { self.add(block_base, base) };
        }
        if limit < block_limit {
            unsafe { self.add(limit, block_limit) };
        }
        true
    }

    /// Removes `[base, limit)` (which must be exactly one grain) from
    /// the grain list. Returns whether it was found there.
    ///
    /// # Safety
    /// `[base, limit)` must satisfy the module's safety contract and
    /// the grain list's entries must all satisfy it too.
    pub unsafe fn delete_from_grain_list(&mut self, base: usize, limit: usize) -> bool {
        if limit - base != self.grain_size {
            return false;
        }
        let mut prev = NULL;
        let mut cur = self.grain_head;
        while cur != NULL {
            let grain_limit = cur + self.grain_size;
            if grain_limit >= limit {
                break;
            }
            prev = cur;
            cur = unsafe { Self::read_grain(cur) }.next;
        }
        if cur == NULL {
            return false;
        }
        let (grain_base, grain_limit) = (cur, cur + self.grain_size);
        if !(grain_base <= base && limit <= grain_limit) {
            return false;
        }
        debug_assert_eq!(grain_base, base);
        debug_assert_eq!(grain_limit, limit);

        let next = unsafe { Self::read_grain(cur) }.next;
        if prev == NULL {
            self.grain_head = next;
        } else {
            unsafe { Self::write_grain(prev, next) };
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backs emergency-list storage with real, owned memory so the
    /// unsafe reads/writes in `EmergencyLists` have somewhere valid to
    /// land — mirroring how the engine overlays bookkeeping onto the
    /// exact range a caller just freed.
    struct Backing {
        // `usize`-backed so `base` is guaranteed aligned for the
        // `usize`-fielded headers this module writes through it — a
        // `Vec<u8>` buffer carries no such guarantee.
        buf: Vec<usize>,
        base: usize,
    }

    impl Backing {
        fn new(size: usize) -> Self {
            let buf = vec![0usize; size.div_ceil(std::mem::size_of::<usize>())];
            let base = buf.as_ptr() as usize;
            Backing { buf, base }
        }

        fn range(&self, offset: usize, len: usize) -> (usize, usize) {
            (self.base + offset, self.base + offset + len)
        }
    }

    const GRAIN: usize = std::mem::size_of::<usize>();
    const BLOCK: usize = 4 * GRAIN;

    #[test]
    fn add_and_flush_block_sized_range() {
        let backing = Backing::new(64);
        let mut lists = EmergencyLists::new(GRAIN);
        let (base, limit) = backing.range(0, BLOCK);
        unsafe { lists.add(base, limit) };
        assert!(!lists.is_empty());

        let mut inserted = Vec::new();
        unsafe {
            lists.flush(|b, l| {
                inserted.push((b, l));
                true
            });
        }
        assert_eq!(inserted, vec![(base, limit)]);
        assert!(lists.is_empty());
        let _ = backing.buf.len();
    }

    #[test]
    fn add_grain_sized_range() {
        let backing = Backing::new(64);
        let mut lists = EmergencyLists::new(GRAIN);
        let (base, limit) = backing.range(0, GRAIN);
        unsafe { lists.add(base, limit) };
        assert!(!lists.is_empty());
    }

    #[test]
    fn coalesce_absorbs_adjacent_block() {
        let backing = Backing::new(128);
        let mut lists = EmergencyLists::new(GRAIN);
        let (b0, l0) = backing.range(0, BLOCK);
        unsafe { lists.add(b0, l0) };

        let (base, limit) = unsafe { lists.coalesce(l0, l0 + GRAIN) };
        assert_eq!((base, limit), (b0, l0 + GRAIN));
        assert!(lists.is_empty());
    }

    #[test]
    fn delete_from_block_list_splits_remainder() {
        let backing = Backing::new(128);
        let mut lists = EmergencyLists::new(GRAIN);
        let (b0, l0) = backing.range(0, BLOCK);
        unsafe { lists.add(b0, l0) };

        let mid_base = b0 + GRAIN;
        let mid_limit = b0 + 2 * GRAIN;
        let found = unsafe { lists.delete_from_block_list(mid_base, mid_limit) };
        assert!(found);
        assert!(!lists.is_empty());

        let mut remaining = Vec::new();
        unsafe {
            lists.flush(|b, l| {
                remaining.push((b, l));
                true
            });
        }
        assert_eq!(remaining.len(), 2);
    }
}
