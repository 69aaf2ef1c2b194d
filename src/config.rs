//! Configuration for a [`crate::Cbs`] instance.

/// Configuration passed to [`crate::Cbs::new`].
///
/// Mirrors the parameters the source's `CBSInit` takes alongside the
/// callback pointers (which live on [`crate::CbsObserver`] here instead).
#[derive(Debug, Clone, Copy)]
pub struct CbsConfig {
    /// Ranges below this size never fire `on_new`/`on_grow`/`on_shrink`
    /// and are reported as deleted if they cross below it.
    pub min_size: usize,

    /// Alignment every inserted/deleted range's endpoints must satisfy.
    /// Must be a power of two.
    pub alignment: usize,

    /// Whether the structure may fall back to writing bookkeeping
    /// metadata directly into caller-owned memory when the node pool is
    /// exhausted.
    pub may_use_inline: bool,

    /// Whether to maintain the `maxSize` augmentation enabling
    /// `find_first`/`find_last`.
    pub fast_find: bool,

    /// Optional cap on the number of nodes the internal node pool may
    /// hold live at once. `None` means unbounded.
    pub node_pool_capacity: Option<usize>,
}

impl CbsConfig {
    /// Validates the configuration, asserting on violation.
    ///
    /// Invalid configuration is a programming error in the source (the
    /// `AVER`s inside `CBSInit`), not a recoverable [`crate::CbsError`];
    /// the same split is kept here.
    pub fn validate(&self) {
        assert!(self.alignment.is_power_of_two(), "alignment must be a power of two");
        if self.may_use_inline {
            assert!(
                self.alignment >= std::mem::size_of::<usize>(),
                "alignment must be large enough to store a grain record when mayUseInline is set"
            );
        }
    }
}

impl Default for CbsConfig {
    /// `min_size = 0`, word-aligned, no inline fallback, fast-find on.
    fn default() -> Self {
        CbsConfig {
            min_size: 0,
            alignment: std::mem::size_of::<usize>(),
            may_use_inline: false,
            fast_find: true,
            node_pool_capacity: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "power of two")]
    fn rejects_non_power_of_two_alignment() {
        let cfg = CbsConfig {
            alignment: 3,
            ..Default::default()
        };
        cfg.validate();
    }

    #[test]
    fn default_config_validates() {
        CbsConfig::default().validate();
    }
}
