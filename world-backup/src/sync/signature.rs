//! Block signatures of a baseline snapshot.
//!
//! The signature is what a delta is computed against: fast_rsync hashes the
//! baseline in fixed-size blocks with a rolling checksum plus a short strong hash.

use fast_rsync::{Signature, SignatureOptions};

/// Block size used for baselines of unknown size (16KB)
pub const DEFAULT_BLOCK_SIZE: u32 = 16 * 1024;

const MIN_BLOCK_SIZE: u32 = 512;
const MAX_BLOCK_SIZE: u32 = 128 * 1024;

/// Strong hash bytes kept per block (8 bytes = 64 bits)
const CRYPTO_HASH_SIZE: u32 = 8;

/// Block size for a baseline of `len` bytes.
///
/// Grows with the square root of the size, like rsync, so signature size and
/// delta granularity stay balanced between small and large worlds.
pub fn block_size_for(len: usize) -> u32 {
    let root = (len as f64).sqrt() as u32;
    let aligned = root.next_multiple_of(64);
    aligned.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE)
}

/// Calculate the signature of `data`.
///
/// `block_size` of `None` picks one from the data length.
pub fn calculate(data: &[u8], block_size: Option<u32>) -> Signature {
    let options = SignatureOptions {
        block_size: block_size.unwrap_or_else(|| block_size_for(data.len())),
        crypto_hash_size: CRYPTO_HASH_SIZE,
    };

    Signature::calculate(data, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_size_bounds() {
        assert_eq!(block_size_for(0), MIN_BLOCK_SIZE);
        assert_eq!(block_size_for(1024), MIN_BLOCK_SIZE);
        assert_eq!(block_size_for(usize::MAX / 2), MAX_BLOCK_SIZE);

        let mid = block_size_for(64 * 1024 * 1024);
        assert_eq!(mid, 8192);
        assert_eq!(mid % 64, 0);
    }

    #[test]
    fn test_signature_respects_block_size() {
        let data = vec![7u8; 64 * 1024];
        let coarse = calculate(&data, Some(DEFAULT_BLOCK_SIZE));
        let fine = calculate(&data, Some(1024));

        assert!(fine.serialized().len() > coarse.serialized().len());
    }

    #[test]
    fn test_signature_of_empty_data() {
        let sig = calculate(b"", None);
        assert!(!sig.serialized().is_empty());
    }
}
