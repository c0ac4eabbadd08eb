//! Reconstruction of a snapshot from its baseline and a delta.

use crate::utils::errors::{BackupError, Result};
use fast_rsync::apply;

/// Apply `delta` to `baseline`, returning the reconstructed bytes.
///
/// A delta computed against different baseline bytes either fails or
/// produces garbage; the caller is responsible for pairing them.
pub fn apply_delta(baseline: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(baseline.len());
    apply(baseline, delta, &mut output)
        .map_err(|e| BackupError::DeltaCodec(format!("apply failed: {}", e)))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{delta::compute_delta, signature};

    #[test]
    fn test_reconstructs_modified_data() -> Result<()> {
        let baseline = vec![b'A'; 10_000];
        let mut modified = baseline.clone();
        modified[5000..5100].fill(b'B');
        modified.extend_from_slice(b"appended tail");

        let delta = compute_delta(&signature::calculate(&baseline, None), &modified)?;
        assert_eq!(apply_delta(&baseline, &delta)?, modified);
        Ok(())
    }

    #[test]
    fn test_shrinking_file() -> Result<()> {
        let baseline = b"a much longer baseline than the new version".to_vec();
        let modified = b"short".to_vec();

        let delta = compute_delta(&signature::calculate(&baseline, None), &modified)?;
        assert_eq!(apply_delta(&baseline, &delta)?, modified);
        Ok(())
    }

    #[test]
    fn test_garbage_delta_rejected() {
        let result = apply_delta(b"baseline", b"not a delta");
        assert!(matches!(result, Err(BackupError::DeltaCodec(_))));
    }
}
