//! Prover input construction.
//!
//! The guest-input codec is an external concern: a pure function from block
//! JSON + execution witness to an input artifact on disk. [`InputBuilder`] is
//! the seam; deployments that link the native codec substitute their own
//! implementation.
//!
//! The artifact is written to `<workdir>/<block>.bin`. That exact name is
//! load-bearing: the input generator's poll loop checks for it before
//! enqueueing a block, so input work completed before a restart is not
//! redone.

use std::path::{Path, PathBuf};

/// Builds the input artifact the prover consumes.
///
/// Errors are plain strings; the caller folds them into the missed-block
/// reason.
pub trait InputBuilder: Send + Sync {
    fn build(
        &self,
        block: u64,
        block_json: &[u8],
        witness_json: &[u8],
    ) -> Result<PathBuf, String>;
}

/// Path of the input artifact (and restart marker) for a block.
pub fn input_artifact_path(workdir: &Path, block: u64) -> PathBuf {
    workdir.join(format!("{block}.bin"))
}

/// Bundles the raw block and witness documents into one JSON object:
/// `{"block": …, "witness": …}`.
pub struct CombinedJsonInputBuilder {
    workdir: PathBuf,
}

impl CombinedJsonInputBuilder {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

impl InputBuilder for CombinedJsonInputBuilder {
    fn build(
        &self,
        block: u64,
        block_json: &[u8],
        witness_json: &[u8],
    ) -> Result<PathBuf, String> {
        // Both inputs are already JSON; splice them instead of reparsing.
        let mut combined =
            Vec::with_capacity(block_json.len() + witness_json.len() + 24);
        combined.extend_from_slice(b"{\"block\":");
        combined.extend_from_slice(block_json);
        combined.extend_from_slice(b",\"witness\":");
        combined.extend_from_slice(witness_json);
        combined.push(b'}');

        let path = input_artifact_path(&self.workdir, block);
        std::fs::write(&path, combined)
            .map_err(|e| format!("failed to write input file: {e}"))?;
        Ok(path)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_combined_document_at_marker_path() {
        let dir = tempfile::tempdir().unwrap();
        let builder = CombinedJsonInputBuilder::new(dir.path());

        let path = builder
            .build(21_500_100, br#"{"number":"0x1"}"#, br#"{"state":[]}"#)
            .unwrap();

        assert_eq!(path, input_artifact_path(dir.path(), 21_500_100));
        assert_eq!(path.file_name().unwrap(), "21500100.bin");

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["block"]["number"], "0x1");
        assert!(written["witness"]["state"].as_array().unwrap().is_empty());
    }

    #[test]
    fn unwritable_workdir_reports_reason() {
        let builder = CombinedJsonInputBuilder::new("/nonexistent/dir");
        let err = builder.build(1, b"{}", b"{}").unwrap_err();
        assert!(err.contains("failed to write input file"));
    }
}
