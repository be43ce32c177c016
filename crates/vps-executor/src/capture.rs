//! Scrapes the one-time session line out of the terminal-sharing helper's
//! output stream.
//!
//! Helper startup time is environment-dependent and unbounded in the worst
//! case, so the read is bounded per line rather than in aggregate: one stuck
//! helper cannot wedge a provisioning workflow, while normal startup jitter
//! (several status lines before the session line) is tolerated.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::timeout;
use tracing::warn;

/// Literal marker the helper prints ahead of the connection string.
pub const SESSION_MARKER: &str = "ssh session:";

/// Bound on a single line read.
pub const LINE_TIMEOUT: Duration = Duration::from_secs(10);

/// Reads lines until one contains [`SESSION_MARKER`]; the trimmed text after
/// the marker is the credential.
///
/// Returns `None` on end-of-stream, on a single read exceeding
/// `per_line_timeout`, or on any read error. All three are ordinary outcomes
/// the caller reacts to (typically by rolling back), never raised failures.
pub async fn read_session_line<R>(reader: R, per_line_timeout: Duration) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match timeout(per_line_timeout, lines.next_line()).await {
            Err(_) => {
                warn!("Timed out waiting for helper output");
                return None;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Error reading helper output");
                return None;
            }
            Ok(Ok(None)) => return None,
            Ok(Ok(Some(line))) => {
                if let Some((_, rest)) = line.split_once(SESSION_MARKER) {
                    return Some(rest.trim().to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn test_extracts_trimmed_session_line() {
        let output: &[u8] = b"Tip: you can configure tmate\n\
            web session: https://tmate.io/t/abc\n\
            ssh session:   ssh abc123@sgp1.tmate.io  \n";
        let session = read_session_line(BufReader::new(output), LINE_TIMEOUT).await;
        assert_eq!(session.as_deref(), Some("ssh abc123@sgp1.tmate.io"));
    }

    #[tokio::test]
    async fn test_eof_without_marker_yields_none() {
        let output: &[u8] = b"starting up\nno session here\n";
        let session = read_session_line(BufReader::new(output), LINE_TIMEOUT).await;
        assert_eq!(session, None);
    }

    #[tokio::test]
    async fn test_empty_stream_yields_none() {
        let output: &[u8] = b"";
        let session = read_session_line(BufReader::new(output), LINE_TIMEOUT).await;
        assert_eq!(session, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_stream_times_out_per_line() {
        // Writer half stays open and never produces the marker, so the
        // per-line bound is the only way out.
        let (tx, rx) = tokio::io::duplex(64);
        let session = read_session_line(BufReader::new(rx), LINE_TIMEOUT).await;
        assert_eq!(session, None);
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_but_steady_lines_are_tolerated() {
        let (mut tx, rx) = tokio::io::duplex(256);
        let writer = tokio::spawn(async move {
            for _ in 0..5 {
                tx.write_all(b"waiting for tmate daemon...\n").await.unwrap();
                tokio::time::sleep(Duration::from_secs(8)).await;
            }
            tx.write_all(b"ssh session: ssh xyz@nyc1.tmate.io\n")
                .await
                .unwrap();
        });

        // Aggregate wait is ~40s, well past a single line bound; each
        // individual line arrives inside it.
        let session = read_session_line(BufReader::new(rx), LINE_TIMEOUT).await;
        assert_eq!(session.as_deref(), Some("ssh xyz@nyc1.tmate.io"));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_marker_mid_line_splits_correctly() {
        let output: &[u8] = b"[tmate] ssh session: ssh u@host\n";
        let session = read_session_line(BufReader::new(output), LINE_TIMEOUT).await;
        assert_eq!(session.as_deref(), Some("ssh u@host"));
    }
}
