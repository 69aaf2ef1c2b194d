//! # cbs
//!
//! A **coalescing block structure**: a splay-tree-backed range map over
//! disjoint, half-open `[base, limit)` extents, merging adjacent ranges
//! on insert and splitting on partial delete. Originally designed as
//! the free-address-space tracker inside a memory manager — handing out
//! and reclaiming ranges of an arena without fragmenting it into
//! unusable slivers — but equally at home tracking any disjoint integer
//! ranges (file-offset extents, id pools) that need cheap coalescing.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                         Cbs<O>                             │
//! │                                                             │
//! │  ┌───────────────────┐        ┌───────────────────────┐   │
//! │  │   RangeIndex       │        │   EmergencyLists       │   │
//! │  │  splay tree, arena  │◄──────┤  (may_use_inline only) │   │
//! │  │  -indexed, maxSize  │ flush │  block/grain linked    │   │
//! │  │  augmentation       │──────►│  lists written into    │   │
//! │  └─────────┬──────────┘        │  the tracked memory    │   │
//! │            │                   └───────────────────────┘   │
//! │            │ on_new/on_delete/on_grow/on_shrink              │
//! │            ▼                                                │
//! │     CbsObserver (user-supplied)                              │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | [`Cbs`], the public entry point: insert, delete, find, iterate, set_min_size |
//! | [`range_index`] | The arena-indexed splay tree with fast-find augmentation |
//! | [`emergency`] | Fallback bookkeeping written into caller memory when the node pool is full |
//! | [`node_pool`] | Fixed-capacity slab arena backing the tree's nodes |
//! | [`range`] | The `[base, limit)` value type |
//! | [`observer`] | The `CbsObserver` callback trait and `BlockInfo` |
//! | [`config`] | [`CbsConfig`] |
//! | [`error`] | [`CbsError`] / [`CbsResult`] |
//!
//! ## Key properties
//!
//! - **Coalescing on insert** — a newly inserted range absorbs whichever
//!   neighbour(s) it touches, so the tracked set never accumulates
//!   artificially adjacent fragments.
//! - **Splitting on delete** — deleting part of a tracked range leaves
//!   the rest correctly tracked as one or two residual ranges.
//! - **Fast find** — with `fast_find` enabled, `find_first`/`find_last`
//!   locate a range of at least a given size in `O(log n)` via a
//!   `maxSize` augmentation carried on every node, rather than scanning.
//! - **Inline emergency fallback** — with `may_use_inline` enabled, a
//!   range that can't get a tree node (pool exhausted) is instead
//!   tracked by writing a small header directly into its own memory,
//!   and flushed back into the tree as space frees up.
//! - **Size-threshold callbacks** — a [`CbsObserver`] is notified
//!   whenever a block's size crosses `min_size`, in either direction.
//!
//! ## Quick start
//!
//! ```rust
//! use cbs::{Cbs, CbsConfig};
//!
//! let config = CbsConfig {
//!     min_size: 0,
//!     alignment: std::mem::size_of::<usize>(),
//!     may_use_inline: false,
//!     fast_find: true,
//!     node_pool_capacity: None,
//! };
//! let mut cbs = Cbs::new(config, ());
//!
//! // `may_use_inline` is off, so nothing here touches memory through
//! // the addresses — they're just opaque integer ranges.
//! unsafe {
//!     cbs.insert(0x1000, 0x2000).unwrap();
//!     cbs.insert(0x2000, 0x3000).unwrap(); // coalesces with the above
//! }
//! assert_eq!(cbs.block_count(), 1);
//!
//! cbs.delete(0x1800, 0x2800).unwrap_err(); // only partially overlaps
//! cbs.delete(0x1000, 0x3000).unwrap();
//! assert_eq!(cbs.block_count(), 0);
//! ```

#![allow(dead_code)]

pub mod config;
pub mod emergency;
pub mod engine;
pub mod error;
pub mod node_pool;
pub mod observer;
pub mod range;
pub mod range_index;

pub use config::CbsConfig;
pub use engine::Cbs;
pub use error::{CbsError, CbsResult};
pub use observer::{BlockInfo, CbsObserver};
pub use range::Range;
