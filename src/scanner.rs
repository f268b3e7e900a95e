use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::warn;

/// Outcome of a signature scan
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The daemon inspected the stream and found nothing
    Clean,
    /// The daemon matched a signature; carries the signature name
    Infected(String),
    /// The daemon could not be reached or answered nonsense. Treated as a
    /// soft failure: logged, never blocking.
    Unavailable(String),
}

/// Client for a clamd-compatible signature scanner
///
/// Speaks the daemon's INSTREAM protocol over TCP: the file is streamed in
/// length-prefixed chunks and the daemon answers with a single verdict
/// line. The whole exchange runs under one bounded timeout.
#[derive(Clone, Debug)]
pub struct SignatureScanner {
    host: String,
    port: u16,
    timeout: Duration,
}

const INSTREAM_CHUNK: usize = 8192;

impl SignatureScanner {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        SignatureScanner {
            host: host.into(),
            port,
            timeout,
        }
    }

    /// Stream a byte buffer to the daemon and report its verdict
    ///
    /// Never returns an error: availability problems become
    /// `ScanOutcome::Unavailable` so the caller can decide whether to
    /// block (it does not).
    pub async fn scan(&self, bytes: &[u8]) -> ScanOutcome {
        match tokio::time::timeout(self.timeout, self.instream(bytes)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!(host = %self.host, port = self.port, error = %e, "signature scanner unavailable");
                ScanOutcome::Unavailable(e.to_string())
            }
            Err(_) => {
                warn!(host = %self.host, port = self.port, "signature scan timed out");
                ScanOutcome::Unavailable(format!(
                    "scan did not finish within {:?}",
                    self.timeout
                ))
            }
        }
    }

    async fn instream(&self, bytes: &[u8]) -> std::io::Result<ScanOutcome> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;

        stream.write_all(b"zINSTREAM\0").await?;
        for chunk in bytes.chunks(INSTREAM_CHUNK) {
            stream.write_all(&(chunk.len() as u32).to_be_bytes()).await?;
            stream.write_all(chunk).await?;
        }
        // Zero-length chunk terminates the stream
        stream.write_all(&0u32.to_be_bytes()).await?;

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await?;
        let text = String::from_utf8_lossy(&response);

        Ok(Self::parse_verdict(text.trim_matches(&['\0', '\n', ' '][..])))
    }

    fn parse_verdict(line: &str) -> ScanOutcome {
        // "stream: OK" | "stream: <Signature-Name> FOUND" | error text
        if let Some(rest) = line.strip_suffix("FOUND") {
            let name = rest
                .trim()
                .trim_start_matches("stream:")
                .trim()
                .to_string();
            ScanOutcome::Infected(name)
        } else if line.ends_with("OK") {
            ScanOutcome::Clean
        } else {
            ScanOutcome::Unavailable(format!("unexpected scanner response: {line}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_lines_parse() {
        assert_eq!(
            SignatureScanner::parse_verdict("stream: OK"),
            ScanOutcome::Clean
        );
        assert_eq!(
            SignatureScanner::parse_verdict("stream: Eicar-Test-Signature FOUND"),
            ScanOutcome::Infected("Eicar-Test-Signature".to_string())
        );
        assert!(matches!(
            SignatureScanner::parse_verdict("INSTREAM size limit exceeded. ERROR"),
            ScanOutcome::Unavailable(_)
        ));
    }

    #[tokio::test]
    async fn unreachable_daemon_is_soft_failure() {
        // Nothing listens on this port; the scan must degrade, not error.
        let scanner = SignatureScanner::new("127.0.0.1", 1, Duration::from_millis(200));
        let outcome = scanner.scan(b"some bytes").await;
        assert!(matches!(outcome, ScanOutcome::Unavailable(_)));
    }
}
