use crate::backend::{select_backend, AnalysisPayload, Backend, BackendError, ExecutionPlan};
use crate::config::Config;
use crate::envelope::{classify, succeed, ErrorKind, ResultEnvelope, ValidationVerdict};
use crate::scanner::{ScanOutcome, SignatureScanner};
use crate::schema;
use crate::security;
use crate::session::{ProcessingSession, SessionState};
use crate::workbook::Workbook;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Internal failure record carried between pipeline steps until the
/// envelope is built at the boundary
struct PipelineFailure {
    kind: ErrorKind,
    message: String,
    details: Option<Value>,
}

impl PipelineFailure {
    fn from_verdict(verdict: ValidationVerdict) -> Self {
        let kind = verdict.kind.unwrap_or(ErrorKind::Unknown);
        let message = match verdict.reason {
            Some(reason) => format!("{} {}", kind.default_message(), reason),
            None => kind.default_message().to_string(),
        };
        PipelineFailure {
            kind,
            message,
            details: verdict.details,
        }
    }

    fn from_backend(phase: &str, error: BackendError) -> Self {
        PipelineFailure {
            kind: error.kind(),
            message: format!("{} phase: {}", phase, error),
            details: error.details(),
        }
    }

    fn server_fault(context: &str, error: impl std::fmt::Display) -> Self {
        PipelineFailure {
            kind: ErrorKind::ServerFault,
            message: ErrorKind::ServerFault.default_message().to_string(),
            details: Some(serde_json::json!({
                "context": context,
                "error": error.to_string(),
            })),
        }
    }

    fn into_envelope(self) -> ResultEnvelope<AnalysisPayload> {
        classify(self.kind, Some(self.message), self.details)
    }
}

/// Drives one upload through validation, backend selection and the two
/// processing phases, and normalizes every outcome into the envelope
///
/// Validation always precedes any computation; the only way around it is
/// the explicit test-mode flag, and each use of that flag is logged.
pub struct Orchestrator {
    config: Arc<Config>,
    backend: Result<Arc<dyn Backend>, String>,
    scanner: Option<SignatureScanner>,
}

impl Orchestrator {
    /// Build an orchestrator with the backend chosen from configuration
    pub fn new(config: Arc<Config>) -> Self {
        let backend = select_backend(&config).map_err(|e| e.to_string());
        let scanner = config
            .scanner
            .as_ref()
            .map(|s| SignatureScanner::new(s.host.clone(), s.port, s.timeout));
        Orchestrator {
            config,
            backend,
            scanner,
        }
    }

    /// Build an orchestrator around a concrete adapter
    pub fn with_backend(config: Arc<Config>, backend: Arc<dyn Backend>) -> Self {
        let scanner = config
            .scanner
            .as_ref()
            .map(|s| SignatureScanner::new(s.host.clone(), s.port, s.timeout));
        Orchestrator {
            config,
            backend: Ok(backend),
            scanner,
        }
    }

    /// Run one session start to finish
    ///
    /// Never panics across the boundary and never returns a partial
    /// result: the answer is either the complete payload or a classified
    /// failure. Session resources are released on every exit path.
    pub async fn process(
        &self,
        artifact: crate::workbook::UploadedArtifact,
    ) -> ResultEnvelope<AnalysisPayload> {
        let mut session = ProcessingSession::new(artifact, self.config.phase_timeout);
        match self.drive(&mut session).await {
            Ok(payload) => {
                session.advance(SessionState::Complete);
                succeed(payload, Some("File processed successfully.".to_string()))
            }
            Err(failure) => {
                session.fail(failure.kind);
                failure.into_envelope()
            }
        }
    }

    async fn drive(
        &self,
        session: &mut ProcessingSession,
    ) -> Result<AnalysisPayload, PipelineFailure> {
        if self.config.test_mode {
            warn!(session = %session.id(), "test mode active: content validation skipped");
        } else {
            self.validate(session).await?;
        }
        session.advance(SessionState::Validated);

        let backend = match &self.backend {
            Ok(backend) => backend.clone(),
            Err(message) => {
                return Err(PipelineFailure {
                    kind: ErrorKind::EnvironmentUnsupported,
                    message: format!(
                        "{} {}",
                        ErrorKind::EnvironmentUnsupported.default_message(),
                        message
                    ),
                    details: None,
                });
            }
        };
        info!(session = %session.id(), backend = backend.label(), "backend selected");

        if backend.needs_staging() {
            session
                .ensure_staging()
                .map_err(|e| PipelineFailure::server_fault("acquiring staging directory", e))?;
        }
        session.advance(SessionState::BackendSelected);

        let budget = session.phase_timeout();
        match backend.plan() {
            ExecutionPlan::Combined => {
                // No phase split: one transition covers both steps, with
                // the same outward semantics.
                session.advance(SessionState::Phase1Running);
                let payload = run_phase(
                    budget,
                    "processing",
                    backend.run_combined(session.artifact(), session.staging_path()),
                )
                .await?;
                Ok(payload)
            }
            ExecutionPlan::TwoPhase => {
                session.advance(SessionState::Phase1Running);
                let phase = run_phase(
                    budget,
                    "preprocess",
                    backend.preprocess(session.artifact(), session.staging_path()),
                )
                .await?;
                session.advance(SessionState::Phase1Done);

                session.advance(SessionState::Phase2Running);
                let payload = run_phase(budget, "analyze", backend.analyze(phase)).await?;
                Ok(payload)
            }
        }
    }

    /// Security checks first, then structure; both must pass before any
    /// computation is attempted
    async fn validate(&self, session: &ProcessingSession) -> Result<(), PipelineFailure> {
        let artifact = session.artifact();

        let verdict = security::verify_file_type(artifact);
        if !verdict.ok {
            return Err(PipelineFailure::from_verdict(verdict));
        }

        let workbook = match Workbook::parse(artifact.bytes()) {
            Ok(workbook) => workbook,
            Err(parse_error) => {
                return Err(PipelineFailure::from_verdict(ValidationVerdict::fail(
                    ErrorKind::FileUnparseable,
                    parse_error,
                )));
            }
        };

        let verdict = security::check_workbook(&workbook);
        if !verdict.ok {
            return Err(PipelineFailure::from_verdict(verdict));
        }

        // Scanner verdicts are hard failures; scanner absence is not.
        if let Some(scanner) = &self.scanner {
            match scanner.scan(artifact.bytes()).await {
                ScanOutcome::Infected(signature) => {
                    return Err(PipelineFailure::from_verdict(ValidationVerdict::fail(
                        ErrorKind::FileInsecure,
                        format!("Signature scanner flagged the file: {signature}"),
                    )));
                }
                ScanOutcome::Clean | ScanOutcome::Unavailable(_) => {}
            }
        }

        let verdict = schema::verify_columns(&workbook);
        if !verdict.ok {
            return Err(PipelineFailure::from_verdict(verdict));
        }

        Ok(())
    }
}

/// Await one phase under its time budget
///
/// On timeout the phase future is dropped, which cancels the in-flight
/// work: the local adapter's subprocess is killed via `kill_on_drop`, the
/// remote adapter's request is aborted with its connection. Nothing keeps
/// running after the orchestrator declares the phase timed out.
async fn run_phase<T>(
    budget: Duration,
    phase: &str,
    work: impl Future<Output = Result<T, BackendError>>,
) -> Result<T, PipelineFailure> {
    match tokio::time::timeout(budget, work).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(PipelineFailure::from_backend(phase, error)),
        Err(_) => Err(PipelineFailure {
            kind: ErrorKind::Timeout,
            message: format!(
                "{} The {phase} phase exceeded its {}s budget.",
                ErrorKind::Timeout.default_message(),
                budget.as_secs()
            ),
            details: None,
        }),
    }
}
