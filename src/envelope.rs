use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of failure classifications used throughout the pipeline
///
/// Every failure path in the service maps to exactly one of these kinds.
/// The serialized form is the stable wire slug consumed by the frontend,
/// so renaming a variant here is a breaking API change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No file was present in the request
    #[serde(rename = "file_not_provided")]
    FileMissing,

    /// The declared filename/content-type is not an accepted spreadsheet format
    #[serde(rename = "file_type_invalid")]
    FileTypeInvalid,

    /// The upload exceeds the byte-size cap
    #[serde(rename = "file_size_exceeded")]
    FileTooLarge,

    /// The content failed a security check (type mismatch, dangerous
    /// formula, resource bomb, or positive signature scan)
    #[serde(rename = "file_insecure")]
    FileInsecure,

    /// The bytes could not be read as a workbook
    #[serde(rename = "file_parsing_error")]
    FileUnparseable,

    /// One or more required columns are absent from the header row
    #[serde(rename = "missing_columns")]
    SchemaColumnsMissing,

    /// One or more required columns contain no data
    #[serde(rename = "empty_columns")]
    SchemaColumnsEmpty,

    /// The execution backend reported or caused a failure
    #[serde(rename = "backend_execution_error")]
    BackendExecutionFailed,

    /// The backend finished but did not produce every expected artifact
    #[serde(rename = "output_incomplete")]
    OutputIncomplete,

    /// No execution backend is available in this deployment
    #[serde(rename = "environment_unsupported")]
    EnvironmentUnsupported,

    /// A phase exceeded its time budget
    #[serde(rename = "timeout")]
    Timeout,

    /// An unexpected server-side fault, downgraded at the orchestrator boundary
    #[serde(rename = "server_error")]
    ServerFault,

    /// Anything that could not be classified
    #[serde(rename = "unknown_error")]
    Unknown,
}

impl ErrorKind {
    /// Stable default message shown to users when the caller supplies
    /// nothing more specific. Callers may override the message but must
    /// keep the kind.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorKind::FileMissing => {
                "No file was provided. Please select an Excel file to process."
            }
            ErrorKind::FileTypeInvalid => {
                "The file format is not valid. Please upload an Excel (.xlsx) file."
            }
            ErrorKind::FileTooLarge => {
                "The file exceeds the maximum allowed size of 5MB. Please reduce its size."
            }
            ErrorKind::FileInsecure => {
                "The file contains potentially unsafe elements (such as macros or disallowed formulas)."
            }
            ErrorKind::FileUnparseable => {
                "The Excel file could not be read. Make sure it is not corrupted and has the correct format."
            }
            ErrorKind::SchemaColumnsMissing => {
                "The file does not contain all the columns required for the analysis."
            }
            ErrorKind::SchemaColumnsEmpty => {
                "Some required columns have no data. Every required column must contain at least one value."
            }
            ErrorKind::BackendExecutionFailed => {
                "The data analysis failed to run. The processing backend reported an error."
            }
            ErrorKind::OutputIncomplete => {
                "The analysis finished but did not produce all of the expected results."
            }
            ErrorKind::EnvironmentUnsupported => {
                "No processing backend is available in this environment."
            }
            ErrorKind::Timeout => {
                "Processing took too long and was cancelled. Try again with a smaller file."
            }
            ErrorKind::ServerFault => "Server error. Please try again later.",
            ErrorKind::Unknown => "An unexpected error occurred. Please try again later.",
        }
    }

    /// Whether the failure is the client's fault (HTTP 400) or ours (HTTP 500)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::FileMissing
                | ErrorKind::FileTypeInvalid
                | ErrorKind::FileTooLarge
                | ErrorKind::FileInsecure
                | ErrorKind::FileUnparseable
                | ErrorKind::SchemaColumnsMissing
                | ErrorKind::SchemaColumnsEmpty
        )
    }
}

/// Error half of the response envelope
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<Value>,
}

/// Uniform success/failure wrapper returned at the system boundary
///
/// Exactly one variant is ever populated; `Success.data` is only present
/// when the whole pipeline completed. Partial results are never surfaced
/// as success.
///
/// Wire shapes:
/// - `{ "success": true, "data": <payload>, "message"?: string }`
/// - `{ "success": false, "error": { "code", "message", "details"? } }`
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultEnvelope<T> {
    Success {
        success: bool,
        data: T,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        message: Option<String>,
    },
    Failure {
        success: bool,
        error: ErrorBody,
    },
}

/// Build a success envelope
///
/// # Arguments
/// * `data` - The final payload; only complete results belong here
/// * `message` - Optional human-readable note accompanying the payload
///
/// # Returns
/// * `ResultEnvelope<T>` - The `Success` variant
pub fn succeed<T>(data: T, message: Option<String>) -> ResultEnvelope<T> {
    ResultEnvelope::Success {
        success: true,
        data,
        message,
    }
}

/// Build a failure envelope from a classified kind
///
/// Every component constructs failures exclusively through this factory so
/// the wire format is uniform regardless of which validator or backend
/// produced the failure.
///
/// # Arguments
/// * `kind` - The classification; determines the wire slug and HTTP status
/// * `message` - Optional override of the kind's default message
/// * `details` - Optional structured payload for programmatic consumers
///
/// # Returns
/// * `ResultEnvelope<T>` - The `Failure` variant
pub fn classify<T>(
    kind: ErrorKind,
    message: Option<String>,
    details: Option<Value>,
) -> ResultEnvelope<T> {
    ResultEnvelope::Failure {
        success: false,
        error: ErrorBody {
            code: kind,
            message: message.unwrap_or_else(|| kind.default_message().to_string()),
            details,
        },
    }
}

impl<T> ResultEnvelope<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, ResultEnvelope::Success { .. })
    }

    /// The failure kind, if any
    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match self {
            ResultEnvelope::Success { .. } => None,
            ResultEnvelope::Failure { error, .. } => Some(error.code),
        }
    }
}

/// Pass/fail judgment with a classified reason, produced by a validator
///
/// Both the schema validator and the security validator emit this shape so
/// the orchestrator can treat them uniformly. Immutable once produced.
#[derive(Clone, Debug)]
pub struct ValidationVerdict {
    pub ok: bool,
    pub kind: Option<ErrorKind>,
    pub reason: Option<String>,
    pub details: Option<Value>,
}

impl ValidationVerdict {
    pub fn pass() -> Self {
        ValidationVerdict {
            ok: true,
            kind: None,
            reason: None,
            details: None,
        }
    }

    pub fn fail(kind: ErrorKind, reason: impl Into<String>) -> Self {
        ValidationVerdict {
            ok: false,
            kind: Some(kind),
            reason: Some(reason.into()),
            details: None,
        }
    }

    pub fn fail_with_details(kind: ErrorKind, reason: impl Into<String>, details: Value) -> Self {
        ValidationVerdict {
            ok: false,
            kind: Some(kind),
            reason: Some(reason.into()),
            details: Some(details),
        }
    }

    /// Convert a failed verdict into a failure envelope
    ///
    /// The reason is appended to the kind's default message so the user
    /// always sees something actionable; the structured details ride along
    /// untouched. Calling this on a passing verdict is a logic error and
    /// degrades to `Unknown`.
    pub fn into_failure<T>(self) -> ResultEnvelope<T> {
        let kind = self.kind.unwrap_or(ErrorKind::Unknown);
        let message = match self.reason {
            Some(reason) => format!("{} {}", kind.default_message(), reason),
            None => kind.default_message().to_string(),
        };
        classify(kind, Some(message), self.details)
    }
}
