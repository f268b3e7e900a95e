/*!
# Card-Sort Processing Service

A web service that ingests card-sorting spreadsheets, validates them and
turns them into clustering visualizations, built in Rust.

## Overview

Users upload a spreadsheet of card-sorting session data. The service
verifies that the file is safe and structurally valid, then drives a
two-phase computation (preprocess → analyze) over a pluggable execution
backend and returns the resulting similarity matrix and dendrogram data.
Every response, success or failure, uses one uniform JSON envelope.

## Architecture

The pipeline runs strictly in this order:

### Validation Layer
- **Content security** - Byte-signature sniffing, a deny-list scan over
  every cell formula, resource-exhaustion ceilings and an optional
  signature scanner
- **Structural schema** - Required columns must exist and carry data

### Orchestration Layer
- **Session** - Per-request state machine with scoped staging storage,
  released on every exit path
- **Orchestrator** - Sequences the phases, enforces per-phase timeouts
  with active cancellation, and normalizes every outcome into the envelope

### Execution Backends
- **Local** - Spawns the analysis script as a subprocess over a staged file
- **Remote** - Calls a service exposing the same two-phase contract
- **Fallback** - Canned synthetic payload behind an explicit opt-in

## Modules

- **envelope**: error taxonomy and the uniform response wrapper
- **workbook**: uploaded artifact and the parsed-workbook capability
- **schema**: structural column validation
- **security**: content security checks
- **scanner**: clamd-compatible signature scanner client
- **session**: per-request state and resource lifetime
- **orchestrator**: phase sequencing and failure normalization
- **backend**: adapter contract and capability-based selection
- **runner / remote / fallback**: the three adapters
- **config**: environment-driven configuration
- **app**: routing and request extraction

## REST API Endpoints

- `POST /api/process` - Validate and analyze an uploaded spreadsheet
- `POST /api/test-upload` - Echo upload metadata without processing
- `GET /health` - Liveness probe
*/

pub mod app;
pub mod backend;
pub mod config;
pub mod envelope;
pub mod fallback;
pub mod orchestrator;
pub mod remote;
pub mod runner;
pub mod scanner;
pub mod schema;
pub mod security;
pub mod session;
pub mod workbook;

/// Re-export the types most callers need
pub use backend::{AnalysisPayload, Backend, BackendError, ExecutionPlan, PhaseResult};
pub use envelope::{ErrorKind, ResultEnvelope, ValidationVerdict, classify, succeed};
pub use orchestrator::Orchestrator;
pub use session::{ProcessingSession, SessionState};
pub use workbook::{UploadedArtifact, Workbook};
