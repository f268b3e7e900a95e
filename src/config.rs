use std::time::Duration;

/// Upload cap enforced at the request boundary, before any parsing
pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// Which execution strategy runs the two analysis phases
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendMode {
    /// Spawn the analysis script as a local subprocess
    Local,
    /// Call a remote service implementing the same two-phase contract
    Remote,
    /// Canned synthetic response; demo/test flows only
    Fallback,
}

impl BackendMode {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "local" => Some(BackendMode::Local),
            "remote" => Some(BackendMode::Remote),
            "fallback" => Some(BackendMode::Fallback),
            _ => None,
        }
    }
}

/// Connection settings for the optional signature scanner
#[derive(Clone, Debug)]
pub struct ScannerConfig {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

/// Process-wide configuration, injected once at startup
///
/// Backend choice is an explicit capability decision made here, not
/// inferred at runtime from hostnames or file contents.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address the HTTP server binds to
    pub bind_addr: String,
    /// Explicit backend override; `None` means capability-based selection
    pub backend: Option<BackendMode>,
    /// Whether this deployment may spawn subprocesses
    pub allow_subprocess: bool,
    /// Interpreter used by the local backend
    pub python_bin: String,
    /// Analysis script run by the local backend
    pub script_path: String,
    /// Base URL of the remote processing service, when one is deployed
    pub remote_base_url: Option<String>,
    /// Time budget for each processing phase
    pub phase_timeout: Duration,
    /// Signature scanner, when one is deployed alongside the service
    pub scanner: Option<ScannerConfig>,
    /// Skip content validation entirely. Audited escape hatch for test
    /// flows; every activation is logged.
    pub test_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            backend: None,
            allow_subprocess: true,
            python_bin: "python".to_string(),
            script_path: "py_chart_generator.py".to_string(),
            remote_base_url: None,
            phase_timeout: Duration::from_secs(60),
            scanner: None,
            test_mode: false,
        }
    }
}

impl Config {
    /// Build the configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable
    pub fn from_env() -> Self {
        let default = Self::default();
        let scanner = std::env::var("CLAMAV_HOST").ok().map(|host| ScannerConfig {
            host,
            port: std::env::var("CLAMAV_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3310),
            timeout: Duration::from_millis(
                std::env::var("CLAMAV_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60_000),
            ),
        });

        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(default.bind_addr),
            backend: std::env::var("PROCESS_BACKEND")
                .ok()
                .and_then(|v| BackendMode::parse(&v)),
            allow_subprocess: std::env::var("ALLOW_SUBPROCESS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.allow_subprocess),
            python_bin: std::env::var("PYTHON_BIN").unwrap_or(default.python_bin),
            script_path: std::env::var("ANALYSIS_SCRIPT").unwrap_or(default.script_path),
            remote_base_url: std::env::var("REMOTE_API_URL").ok(),
            phase_timeout: Duration::from_secs(
                std::env::var("PHASE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60),
            ),
            scanner,
            test_mode: std::env::var("TEST_MODE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.test_mode),
        }
    }
}
