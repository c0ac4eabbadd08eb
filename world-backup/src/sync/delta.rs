//! Delta computation between a baseline snapshot and the current world.

use crate::utils::errors::{BackupError, Result};
use fast_rsync::{diff, Signature};

/// Compute the delta that turns the signed baseline into `new_data`.
pub fn compute_delta(baseline_sig: &Signature, new_data: &[u8]) -> Result<Vec<u8>> {
    let mut delta = Vec::new();
    diff(&baseline_sig.index(), new_data, &mut delta)
        .map_err(|e| BackupError::DeltaCodec(format!("diff failed: {}", e)))?;
    Ok(delta)
}

/// Delta size relative to the file it encodes.
///
/// Below 1.0 the delta is smaller than the file; 0.0 for an empty file.
pub fn delta_compression_ratio(delta_size: usize, new_file_size: usize) -> f64 {
    if new_file_size == 0 {
        return 0.0;
    }
    delta_size as f64 / new_file_size as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::signature;

    #[test]
    fn test_small_change_small_delta() -> Result<()> {
        let baseline: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut modified = baseline.clone();
        modified[100_000..100_016].copy_from_slice(&[0xAA; 16]);

        let sig = signature::calculate(&baseline, None);
        let delta = compute_delta(&sig, &modified)?;

        assert!(delta_compression_ratio(delta.len(), modified.len()) < 0.1);
        Ok(())
    }

    #[test]
    fn test_unrelated_data_still_encodes() -> Result<()> {
        let sig = signature::calculate(&[b'A'; 4096], None);
        let delta = compute_delta(&sig, &[b'B'; 4096])?;
        assert!(!delta.is_empty());
        Ok(())
    }

    #[test]
    fn test_delta_compression_ratio() {
        assert!((delta_compression_ratio(10, 1000) - 0.01).abs() < 1e-9);
        assert!((delta_compression_ratio(1000, 1000) - 1.0).abs() < 1e-9);
        assert_eq!(delta_compression_ratio(100, 0), 0.0);
    }
}
