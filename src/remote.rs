use crate::backend::{AnalysisPayload, Backend, BackendError, ExecutionPlan, PhaseResult};
use crate::workbook::UploadedArtifact;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Remote service adapter
///
/// Ships the artifact to a service exposing the same two-phase contract
/// over HTTP (`/api/preprocess` then `/api/analyze`). The per-request
/// timeout aborts the connection when it fires, so a timed-out call never
/// keeps running on our side.
#[derive(Clone, Debug)]
pub struct RemoteBackend {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct PreprocessRequest<'a> {
    #[serde(rename = "fileBase64")]
    file_base64: &'a str,
}

/// Envelope shape both remote endpoints answer with
#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct RemoteEnvelope<T> {
    success: bool,
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    error: Option<RemoteError>,
}

#[derive(Deserialize)]
struct RemoteError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl RemoteBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::execution(format!("failed to build HTTP client: {e}")))?;
        Ok(RemoteBackend {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post_phase<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T, BackendError> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(url = %url, "calling remote processing service");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout(format!("{endpoint} did not answer in time"))
                } else {
                    BackendError::execution(format!("request to {endpoint} failed: {e}"))
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::execution(format!("failed to read {endpoint} body: {e}")))?;

        if !status.is_success() {
            return Err(BackendError::execution_with_details(
                format!("{endpoint} answered {status}"),
                Value::String(text),
            ));
        }

        let envelope: RemoteEnvelope<T> = serde_json::from_str(&text).map_err(|e| {
            BackendError::execution(format!("{endpoint} returned malformed JSON: {e}"))
        })?;

        if !envelope.success {
            let (code, message) = envelope
                .error
                .map(|e| (e.code, e.message))
                .unwrap_or_default();
            return Err(BackendError::execution_with_details(
                message.unwrap_or_else(|| format!("{endpoint} reported a failure")),
                serde_json::json!({ "remoteCode": code }),
            ));
        }

        envelope
            .data
            .ok_or_else(|| BackendError::Incomplete(format!("{endpoint} succeeded without data")))
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    fn label(&self) -> &'static str {
        "remote"
    }

    fn plan(&self) -> ExecutionPlan {
        ExecutionPlan::TwoPhase
    }

    async fn preprocess(
        &self,
        artifact: &UploadedArtifact,
        _staging: Option<&Path>,
    ) -> Result<PhaseResult, BackendError> {
        let encoded = BASE64.encode(artifact.bytes());
        self.post_phase(
            "/api/preprocess",
            &PreprocessRequest {
                file_base64: &encoded,
            },
        )
        .await
    }

    async fn analyze(&self, phase: PhaseResult) -> Result<AnalysisPayload, BackendError> {
        self.post_phase("/api/analyze", &phase).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let backend =
            RemoteBackend::new("http://localhost:5000/", Duration::from_secs(1)).unwrap();
        assert_eq!(backend.base_url, "http://localhost:5000");
    }

    #[tokio::test]
    async fn unreachable_service_maps_to_execution_failure() {
        // Port 9 is discard; nothing answers HTTP there.
        let backend =
            RemoteBackend::new("http://127.0.0.1:9", Duration::from_millis(300)).unwrap();
        let artifact = UploadedArtifact::new(vec![1, 2, 3], "a.xlsx", "");

        let err = backend
            .preprocess(&artifact, None)
            .await
            .err()
            .expect("request must fail");
        assert!(matches!(
            err.kind(),
            crate::envelope::ErrorKind::BackendExecutionFailed | crate::envelope::ErrorKind::Timeout
        ));
    }
}
