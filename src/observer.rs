//! Client callback protocol.
//!
//! The source reports block lifecycle transitions through four optional
//! function pointers (`new`/`delete`/`grow`/`shrink`), fired whenever a
//! block's size crosses the configured `minSize` threshold. Here that is
//! a trait with default no-op bodies: a `Cbs<()>` pays nothing for
//! observation, and a consumer implements only the hooks it cares about.

/// A snapshot of a block's extent at the moment a hook fires.
///
/// Deliberately a plain value rather than a reference into the tree: the
/// hook is invoked while the engine already holds the structure
/// mutably, so handing back a live reference into it would require
/// aliasing the same borrow the mutation is using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub base: usize,
    pub limit: usize,
}

impl BlockInfo {
    pub fn size(&self) -> usize {
        self.limit - self.base
    }
}

/// Observes block size transitions across the configured `min_size`
/// threshold.
///
/// Every method receives the block's old and new size in addition to
/// its current extent, matching the four-argument shape of the
/// source's `CBSChangeSizeMethod`. `old_size == 0` on `on_new` and
/// `new_size == 0` on `on_delete` mirror the source's convention for a
/// block coming from or going to nothing.
#[allow(unused_variables)]
pub trait CbsObserver {
    /// A block became interesting: either freshly created at or above
    /// `min_size`, or grown/shrunk across the threshold from below.
    fn on_new(&mut self, block: BlockInfo, old_size: usize, new_size: usize) {}

    /// A block stopped being interesting: deleted outright, or shrunk
    /// below `min_size`.
    fn on_delete(&mut self, block: BlockInfo, old_size: usize, new_size: usize) {}

    /// An already-interesting block grew, remaining at or above
    /// `min_size`.
    fn on_grow(&mut self, block: BlockInfo, old_size: usize, new_size: usize) {}

    /// An already-interesting block shrank, remaining at or above
    /// `min_size`.
    fn on_shrink(&mut self, block: BlockInfo, old_size: usize, new_size: usize) {}
}

/// No-op observer, used when a caller has no interest in callbacks.
impl CbsObserver for () {}
