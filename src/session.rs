use crate::envelope::ErrorKind;
use crate::workbook::UploadedArtifact;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tracing::debug;
use uuid::Uuid;

/// Where a session currently stands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Received,
    Validated,
    BackendSelected,
    Phase1Running,
    Phase1Done,
    Phase2Running,
    Complete,
    Failed(ErrorKind),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Complete | SessionState::Failed(_))
    }
}

/// Everything scoped to one request: the artifact, the phase time budget
/// and the staging directory when the backend needs one
///
/// Staging is released unconditionally at any terminal transition and,
/// as a backstop, when the session is dropped, whichever comes first.
/// Every session gets a distinct directory, so concurrent uploads never
/// contend.
pub struct ProcessingSession {
    id: Uuid,
    artifact: UploadedArtifact,
    state: SessionState,
    phase_timeout: Duration,
    staging: Option<TempDir>,
}

impl ProcessingSession {
    pub fn new(artifact: UploadedArtifact, phase_timeout: Duration) -> Self {
        let session = ProcessingSession {
            id: Uuid::new_v4(),
            artifact,
            state: SessionState::Received,
            phase_timeout,
            staging: None,
        };
        debug!(session = %session.id, "session received");
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn artifact(&self) -> &UploadedArtifact {
        &self.artifact
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn phase_timeout(&self) -> Duration {
        self.phase_timeout
    }

    /// Move the session forward, releasing staging at terminal states
    pub fn advance(&mut self, next: SessionState) {
        debug!(session = %self.id, from = ?self.state, to = ?next, "session transition");
        self.state = next;
        if self.state.is_terminal() {
            self.release_staging();
        }
    }

    pub fn fail(&mut self, kind: ErrorKind) {
        self.advance(SessionState::Failed(kind));
    }

    /// Acquire the scoped staging directory, creating it on first use
    ///
    /// The directory name carries a random suffix, so concurrent sessions
    /// can never collide.
    pub fn ensure_staging(&mut self) -> std::io::Result<&Path> {
        if self.staging.is_none() {
            let dir = tempfile::Builder::new().prefix("excel-process-").tempdir()?;
            debug!(session = %self.id, dir = %dir.path().display(), "staging acquired");
            self.staging = Some(dir);
        }
        match &self.staging {
            Some(dir) => Ok(dir.path()),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "staging directory unavailable",
            )),
        }
    }

    pub fn staging_path(&self) -> Option<&Path> {
        self.staging.as_ref().map(|d| d.path())
    }

    fn release_staging(&mut self) {
        if let Some(dir) = self.staging.take() {
            let path = dir.path().display().to_string();
            // TempDir removes its contents on drop; nothing to do beyond
            // letting go of the handle.
            drop(dir);
            debug!(session = %self.id, dir = %path, "staging released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ProcessingSession {
        let artifact = UploadedArtifact::new(vec![1], "a.xlsx", "");
        ProcessingSession::new(artifact, Duration::from_secs(1))
    }

    #[test]
    fn staging_is_released_on_completion() {
        let mut session = session();
        let path = session.ensure_staging().unwrap().to_path_buf();
        assert!(path.exists());

        session.advance(SessionState::Complete);
        assert!(session.staging_path().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn staging_is_released_on_failure() {
        let mut session = session();
        let path = session.ensure_staging().unwrap().to_path_buf();

        session.fail(ErrorKind::Timeout);
        assert_eq!(session.state(), SessionState::Failed(ErrorKind::Timeout));
        assert!(!path.exists());
    }

    #[test]
    fn staging_is_released_on_drop() {
        let path;
        {
            let mut session = session();
            path = session.ensure_staging().unwrap().to_path_buf();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn concurrent_sessions_get_distinct_staging() {
        let mut a = session();
        let mut b = session();
        assert_ne!(a.ensure_staging().unwrap(), b.ensure_staging().unwrap());
    }

    #[test]
    fn terminal_states_are_recognized() {
        assert!(SessionState::Complete.is_terminal());
        assert!(SessionState::Failed(ErrorKind::Unknown).is_terminal());
        assert!(!SessionState::Phase2Running.is_terminal());
    }
}
