//! Binary delta codec.
//!
//! Diff entries store an opaque delta produced by a [`DeltaCodec`]. The
//! default [`RsyncCodec`] uses fast_rsync's rolling-hash signatures.

pub mod apply;
pub mod delta;
pub mod signature;

use crate::utils::errors::Result;

pub trait DeltaCodec: Send + Sync {
    /// Delta turning `old` into `new`.
    fn create(&self, old: &[u8], new: &[u8]) -> Result<Vec<u8>>;

    /// Rebuild `new` from `old` and a delta made by [`DeltaCodec::create`].
    fn apply(&self, old: &[u8], delta: &[u8]) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Default)]
pub struct RsyncCodec {
    /// Fixed block size; `None` scales it with the baseline size
    block_size: Option<u32>,
}

impl RsyncCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block_size(block_size: u32) -> Self {
        Self {
            block_size: Some(block_size.max(1)),
        }
    }
}

impl DeltaCodec for RsyncCodec {
    fn create(&self, old: &[u8], new: &[u8]) -> Result<Vec<u8>> {
        let sig = signature::calculate(old, self.block_size);
        delta::compute_delta(&sig, new)
    }

    fn apply(&self, old: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
        apply::apply_delta(old, delta)
    }
}
