use crate::config::{BackendMode, Config};
use crate::envelope::ErrorKind;
use crate::fallback::FallbackBackend;
use crate::remote::RemoteBackend;
use crate::runner::LocalBackend;
use crate::workbook::UploadedArtifact;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// How an adapter exposes the preprocess → analyze computation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionPlan {
    /// Separate preprocess and analyze operations
    TwoPhase,
    /// One combined operation covering both steps
    Combined,
}

/// Intermediate data handed from the preprocess phase to the analyze phase
///
/// Owned by the orchestrator for the duration of one session; never
/// persisted. Wire names match the remote service contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PhaseResult {
    /// One normalized text record per unique identifier
    #[serde(rename = "descriptions")]
    pub normalized_records: Vec<String>,
    pub unique_ids: Vec<String>,
    pub id_url_mapping: BTreeMap<String, String>,
}

/// Ordered similarity matrix plus the identifiers labeling its axes
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Heatmap {
    pub z: Vec<Vec<f64>>,
    pub ids: Vec<String>,
}

/// Dendrogram linkage structure in plot coordinates
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dendrogram {
    pub ivl: Vec<String>,
    pub dcoord: Vec<Vec<f64>>,
    pub icoord: Vec<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub color_list: Option<Vec<String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlotMetadata {
    pub id_url_mapping: BTreeMap<String, String>,
}

/// Final visualization payload, in whichever shape the adapter declares
///
/// The orchestrator passes this through unchanged; it never reshapes one
/// variant into the other.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnalysisPayload {
    /// Structured plot data (two-phase adapters)
    Plot {
        heatmap: Heatmap,
        dendrogram: Dendrogram,
        metadata: PlotMetadata,
    },
    /// Pre-rendered images as base64 data URLs (combined local adapter)
    Images {
        matriz_escalera: String,
        dendrograma: String,
    },
}

/// Structured failure returned by adapters; never an opaque panic or
/// unclassified error across the component boundary
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{message}")]
    Execution {
        message: String,
        details: Option<Value>,
    },

    #[error("backend output incomplete: {0}")]
    Incomplete(String),

    #[error("backend call timed out: {0}")]
    Timeout(String),

    #[error("unsupported in this environment: {0}")]
    Unsupported(String),
}

impl BackendError {
    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
            details: None,
        }
    }

    pub fn execution_with_details(message: impl Into<String>, details: Value) -> Self {
        BackendError::Execution {
            message: message.into(),
            details: Some(details),
        }
    }

    /// The taxonomy kind this failure maps to
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::Execution { .. } => ErrorKind::BackendExecutionFailed,
            BackendError::Incomplete(_) => ErrorKind::OutputIncomplete,
            BackendError::Timeout(_) => ErrorKind::Timeout,
            BackendError::Unsupported(_) => ErrorKind::EnvironmentUnsupported,
        }
    }

    /// Structured detail payload, when the upstream failure carried one
    pub fn details(&self) -> Option<Value> {
        match self {
            BackendError::Execution { details, .. } => details.clone(),
            _ => None,
        }
    }
}

/// Common contract implemented by every execution strategy
///
/// An adapter implements the methods of its declared plan; calling the
/// other plan's methods is a programming error and answers `Unsupported`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name used in logs and session records
    fn label(&self) -> &'static str;

    fn plan(&self) -> ExecutionPlan;

    /// Whether the orchestrator must provide on-disk staging
    fn needs_staging(&self) -> bool {
        false
    }

    /// Phase 1: turn the validated artifact into normalized records
    async fn preprocess(
        &self,
        _artifact: &UploadedArtifact,
        _staging: Option<&Path>,
    ) -> Result<PhaseResult, BackendError> {
        Err(BackendError::Unsupported(format!(
            "{} backend has no split preprocess phase",
            self.label()
        )))
    }

    /// Phase 2: turn normalized records into the visualization payload
    async fn analyze(&self, _phase: PhaseResult) -> Result<AnalysisPayload, BackendError> {
        Err(BackendError::Unsupported(format!(
            "{} backend has no split analyze phase",
            self.label()
        )))
    }

    /// Both phases as one operation, for adapters without a phase split
    async fn run_combined(
        &self,
        _artifact: &UploadedArtifact,
        _staging: Option<&Path>,
    ) -> Result<AnalysisPayload, BackendError> {
        Err(BackendError::Unsupported(format!(
            "{} backend has no combined operation",
            self.label()
        )))
    }
}

/// Pick the execution backend for this deployment
///
/// A pure function of injected configuration, decided once and never per
/// phase: an explicit override wins; otherwise subprocess capability
/// selects the local adapter, a configured remote endpoint selects the
/// remote one. The fallback adapter is reachable only through the explicit
/// override, never by inference.
///
/// # Arguments
/// * `config` - Deployment configuration
///
/// # Returns
/// * `Result<Arc<dyn Backend>, BackendError>` - The adapter, or
///   `Unsupported` when no capability is available
pub fn select_backend(config: &Config) -> Result<Arc<dyn Backend>, BackendError> {
    match config.backend {
        Some(BackendMode::Fallback) => Ok(Arc::new(FallbackBackend::new())),
        Some(BackendMode::Local) => Ok(Arc::new(LocalBackend::new(
            &config.python_bin,
            &config.script_path,
        ))),
        Some(BackendMode::Remote) => match &config.remote_base_url {
            Some(base) => Ok(Arc::new(RemoteBackend::new(base, config.phase_timeout)?)),
            None => Err(BackendError::Unsupported(
                "remote backend requested but no remote URL is configured".to_string(),
            )),
        },
        None => {
            if config.allow_subprocess {
                Ok(Arc::new(LocalBackend::new(
                    &config.python_bin,
                    &config.script_path,
                )))
            } else if let Some(base) = &config.remote_base_url {
                Ok(Arc::new(RemoteBackend::new(base, config.phase_timeout)?))
            } else {
                Err(BackendError::Unsupported(
                    "neither subprocess execution nor a remote service is available".to_string(),
                ))
            }
        }
    }
}
