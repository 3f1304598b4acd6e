//! Reading prover output artifacts.
//!
//! After `cargo-zisk` exits, its output directory is expected to hold a
//! `result.json` with run statistics and the final proof binary. Both are
//! read back here; any missing or malformed piece is an error string the
//! prover folds into the missed-block reason.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use serde::Deserialize;

/// Proof binary names, in preference order.
const PROOF_FILES: [&str; 2] = ["vadcop_final_proof.compressed.bin", "vadcop_final_proof.bin"];

/// Everything the proved report needs, read from the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofArtifact {
    pub cycles: u64,
    pub time_ms: u64,
    pub proof_b64: String,
    pub verifier_id: String,
}

/// `result.json` as written by the prover.
#[derive(Debug, Deserialize)]
struct ResultJson {
    cycles: u64,
    /// Proving time in seconds.
    time: f64,
    id: String,
}

/// Read and validate the artifacts for one proving run.
pub fn read_proof_artifact(output_dir: &Path) -> Result<ProofArtifact, String> {
    let result_path = output_dir.join("result.json");
    let result_bytes = std::fs::read(&result_path)
        .map_err(|e| format!("failed to read {}: {e}", result_path.display()))?;
    let result: ResultJson = serde_json::from_slice(&result_bytes)
        .map_err(|e| format!("failed to parse {}: {e}", result_path.display()))?;

    let proof_path = PROOF_FILES
        .iter()
        .map(|name| output_dir.join(name))
        .find(|path| path.exists())
        .ok_or_else(|| {
            format!(
                "no proof binary in {} (looked for {})",
                output_dir.display(),
                PROOF_FILES.join(", ")
            )
        })?;
    let proof_bytes = std::fs::read(&proof_path)
        .map_err(|e| format!("failed to read {}: {e}", proof_path.display()))?;

    Ok(ProofArtifact {
        cycles: result.cycles,
        time_ms: (result.time * 1000.0).floor() as u64,
        proof_b64: STANDARD_NO_PAD.encode(&proof_bytes),
        verifier_id: result.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_result(dir: &Path, body: &str) {
        std::fs::write(dir.join("result.json"), body).unwrap();
    }

    #[test]
    fn reads_compressed_proof_preferentially() {
        let dir = tempfile::tempdir().unwrap();
        write_result(dir.path(), r#"{"cycles":12345,"time":17.25,"id":"v1"}"#);
        std::fs::write(dir.path().join("vadcop_final_proof.compressed.bin"), b"ABCD").unwrap();
        std::fs::write(dir.path().join("vadcop_final_proof.bin"), b"other").unwrap();

        let artifact = read_proof_artifact(dir.path()).unwrap();
        assert_eq!(
            artifact,
            ProofArtifact {
                cycles: 12_345,
                time_ms: 17_250,
                // Unpadded base64 of "ABCD".
                proof_b64: "QUJDRA".into(),
                verifier_id: "v1".into(),
            }
        );
    }

    #[test]
    fn falls_back_to_plain_proof() {
        let dir = tempfile::tempdir().unwrap();
        write_result(dir.path(), r#"{"cycles":1,"time":0.5,"id":"v1"}"#);
        std::fs::write(dir.path().join("vadcop_final_proof.bin"), b"ABCD").unwrap();

        let artifact = read_proof_artifact(dir.path()).unwrap();
        assert_eq!(artifact.proof_b64, "QUJDRA");
        assert_eq!(artifact.time_ms, 500);
    }

    #[test]
    fn missing_proof_binary_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_result(dir.path(), r#"{"cycles":1,"time":1.0,"id":"v1"}"#);

        let err = read_proof_artifact(dir.path()).unwrap_err();
        assert!(err.contains("no proof binary"));
    }

    #[test]
    fn missing_result_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_proof_artifact(dir.path()).unwrap_err();
        assert!(err.contains("result.json"));
    }

    #[test]
    fn malformed_result_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_result(dir.path(), r#"{"cycles":"not a number"}"#);
        let err = read_proof_artifact(dir.path()).unwrap_err();
        assert!(err.contains("failed to parse"));
    }

    #[test]
    fn time_is_floored_to_milliseconds() {
        let dir = tempfile::tempdir().unwrap();
        write_result(dir.path(), r#"{"cycles":1,"time":1.2349,"id":"v1"}"#);
        std::fs::write(dir.path().join("vadcop_final_proof.bin"), b"x").unwrap();

        assert_eq!(read_proof_artifact(dir.path()).unwrap().time_ms, 1234);
    }
}
