use crate::backend::{AnalysisPayload, Backend, BackendError, ExecutionPlan};
use crate::workbook::UploadedArtifact;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Local subprocess adapter
///
/// Stages the artifact as a file, runs the analysis script over it and
/// collects the images it renders into the staging directory. The script
/// covers both phases in one run, so this adapter declares the combined
/// plan.
#[derive(Clone, Debug)]
pub struct LocalBackend {
    python_bin: String,
    script_path: String,
}

const STAGED_INPUT: &str = "data.xlsx";

/// Images the script must render; a missing one fails the session as
/// incomplete output
const EXPECTED_ARTIFACTS: [&str; 3] = [
    "matriz_similitud_completa.png",
    "matriz_similitud_escalera.png",
    "dendrograma_card_sorting.png",
];

/// stderr lines carrying these markers are fatal; anything that is only a
/// `UserWarning` is routine plotting-library noise
const FATAL_STDERR_MARKERS: [&str; 2] = ["ERROR:", "Traceback"];
const BENIGN_STDERR_MARKER: &str = "UserWarning";

impl LocalBackend {
    pub fn new(python_bin: impl Into<String>, script_path: impl Into<String>) -> Self {
        LocalBackend {
            python_bin: python_bin.into(),
            script_path: script_path.into(),
        }
    }

    /// Decide whether a stderr stream means the run failed
    ///
    /// Returns the extracted error message for fatal output, `None` when
    /// the stream holds only benign warnings.
    fn classify_stderr(stderr: &str) -> Option<String> {
        if stderr.trim().is_empty() {
            return None;
        }

        let looks_fatal = FATAL_STDERR_MARKERS.iter().any(|m| stderr.contains(m))
            || !stderr.contains(BENIGN_STDERR_MARKER);

        if !looks_fatal {
            return None;
        }

        // Prefer the script's own ERROR line when it printed one
        let re = Regex::new(r"ERROR:?\s*(.*)").expect("static pattern");
        let message = re
            .captures(stderr)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "The analysis script reported an error.".to_string());
        Some(message)
    }

    async fn read_artifact_as_data_url(dir: &Path, name: &str) -> Result<String, BackendError> {
        let path = dir.join(name);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|_| BackendError::Incomplete(format!("expected output {name} was not generated")))?;
        Ok(format!("data:image/png;base64,{}", BASE64.encode(bytes)))
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn label(&self) -> &'static str {
        "local"
    }

    fn plan(&self) -> ExecutionPlan {
        ExecutionPlan::Combined
    }

    fn needs_staging(&self) -> bool {
        true
    }

    async fn run_combined(
        &self,
        artifact: &UploadedArtifact,
        staging: Option<&Path>,
    ) -> Result<AnalysisPayload, BackendError> {
        let staging = staging.ok_or_else(|| {
            BackendError::execution("local backend invoked without a staging directory")
        })?;

        let input_path = staging.join(STAGED_INPUT);
        tokio::fs::write(&input_path, artifact.bytes())
            .await
            .map_err(|e| BackendError::execution(format!("failed to stage input file: {e}")))?;

        debug!(
            script = %self.script_path,
            input = %input_path.display(),
            "spawning analysis subprocess"
        );

        // kill_on_drop guarantees the process dies if the orchestrator's
        // timeout drops this future mid-wait.
        let output = Command::new(&self.python_bin)
            .arg(&self.script_path)
            .arg(&input_path)
            .arg(staging)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                BackendError::execution(format!(
                    "failed to spawn {}: {e}",
                    self.python_bin
                ))
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if let Some(message) = Self::classify_stderr(&stderr) {
            return Err(BackendError::execution_with_details(
                message,
                serde_json::json!({ "stderr": stderr.trim() }),
            ));
        }
        if !stderr.trim().is_empty() {
            warn!(stderr = %stderr.trim(), "analysis script emitted non-fatal warnings");
        }
        if !output.status.success() {
            return Err(BackendError::execution(format!(
                "analysis script exited with status {}",
                output.status
            )));
        }

        // Every expected image must exist before any is returned; a partial
        // render is incomplete output, not success.
        for name in EXPECTED_ARTIFACTS {
            let present = tokio::fs::try_exists(staging.join(name)).await.unwrap_or(false);
            if !present {
                return Err(BackendError::Incomplete(format!(
                    "expected output {name} was not generated"
                )));
            }
        }

        let matriz_escalera =
            Self::read_artifact_as_data_url(staging, EXPECTED_ARTIFACTS[1]).await?;
        let dendrograma = Self::read_artifact_as_data_url(staging, EXPECTED_ARTIFACTS[2]).await?;

        Ok(AnalysisPayload::Images {
            matriz_escalera,
            dendrograma,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_warnings_alone_are_not_fatal() {
        let stderr = "matplotlib/__init__.py:123: UserWarning: tight_layout\n";
        assert_eq!(LocalBackend::classify_stderr(stderr), None);
    }

    #[test]
    fn error_lines_are_fatal_and_extracted() {
        let stderr = "something\nERROR: missing grouping column\n";
        assert_eq!(
            LocalBackend::classify_stderr(stderr),
            Some("missing grouping column".to_string())
        );
    }

    #[test]
    fn unknown_stderr_noise_is_fatal() {
        let stderr = "Segmentation fault (core dumped)\n";
        assert!(LocalBackend::classify_stderr(stderr).is_some());
    }

    #[test]
    fn empty_stderr_is_clean() {
        assert_eq!(LocalBackend::classify_stderr("   \n"), None);
    }

    #[tokio::test]
    async fn missing_interpreter_is_a_structured_failure() {
        let backend = LocalBackend::new("/nonexistent/python", "script.py");
        let artifact = UploadedArtifact::new(vec![1, 2, 3], "a.xlsx", "");
        let staging = tempfile::tempdir().unwrap();

        let err = backend
            .run_combined(&artifact, Some(staging.path()))
            .await
            .err()
            .expect("spawn must fail");
        assert_eq!(
            err.kind(),
            crate::envelope::ErrorKind::BackendExecutionFailed
        );
    }

    #[tokio::test]
    async fn missing_output_artifacts_are_incomplete() {
        // `true` exits cleanly without rendering anything.
        let backend = LocalBackend::new("true", "ignored.py");
        let artifact = UploadedArtifact::new(vec![1, 2, 3], "a.xlsx", "");
        let staging = tempfile::tempdir().unwrap();

        let err = backend
            .run_combined(&artifact, Some(staging.path()))
            .await
            .err()
            .expect("artifacts are missing");
        assert_eq!(err.kind(), crate::envelope::ErrorKind::OutputIncomplete);
    }
}
