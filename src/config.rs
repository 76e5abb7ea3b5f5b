//! Engine configuration.
//!
//! Kept deliberately small: this engine has one tunable knob that matters
//! (the B+-tree's `n`) plus the block size the heap packs records into.
//! Both default to the values spec'd for the reference dataset (~27k rows,
//! ~400 distinct `ft_pct` values).

/// Size of a heap block in bytes. Records never span a block boundary.
pub const HEAP_BLOCK_SIZE: usize = 4096;

/// Maximum keys per B+-tree node (internal and leaf share one `n`).
///
/// Calibrated so a full leaf's worst-case bucket overhead still leaves the
/// node well under a block: with `n = 100` and a conservative 4-locator
/// average bucket size, a leaf's locators occupy `100 * 4 * 6 = 2400` bytes
/// plus `100 * 4` bytes of keys, comfortably inside 4096.
pub const DEFAULT_ORDER: usize = 100;

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Max keys per B+-tree node.
    pub order: usize,
    /// Heap block size in bytes.
    pub block_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            order: DEFAULT_ORDER,
            block_size: HEAP_BLOCK_SIZE,
        }
    }
}

impl EngineConfig {
    /// Minimum keys a non-root node must hold: `ceil((n+1)/2)`.
    pub fn min_keys(&self) -> usize {
        (self.order + 1).div_ceil(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_keys_matches_ceiling_formula() {
        let cfg = EngineConfig { order: 4, block_size: HEAP_BLOCK_SIZE };
        assert_eq!(cfg.min_keys(), 3); // ceil(5/2) = 3
        let cfg = EngineConfig { order: 5, block_size: HEAP_BLOCK_SIZE };
        assert_eq!(cfg.min_keys(), 3); // ceil(6/2) = 3
    }
}
