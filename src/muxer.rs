//! Merges the emulator's stdout and stderr line streams into a single
//! consumption point.
//!
//! Order within each source is preserved; no ordering is guaranteed across
//! sources. The merged channel is bounded, so a slow consumer applies
//! backpressure to the pumps instead of lines being dropped.

use tokio::sync::mpsc;

/// Capacity of the merged channel. Small enough to bound memory, large
/// enough that a bursty kernel log does not stall the pumps in practice.
const MERGED_CHANNEL_CAPACITY: usize = 256;

/// Which stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// One line of emulator output, tagged with its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub source: StreamSource,
    pub text: String,
}

/// Merge two line streams into one.
///
/// Each source is polled until it closes; a closed source is excluded from
/// further waits without terminating the other. The merge task exits when
/// both sources are exhausted (or the consumer goes away).
pub fn multiplex(
    mut stdout: mpsc::Receiver<String>,
    mut stderr: mpsc::Receiver<String>,
) -> mpsc::Receiver<OutputLine> {
    let (tx, rx) = mpsc::channel(MERGED_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut stdout_open = true;
        let mut stderr_open = true;

        while stdout_open || stderr_open {
            let line = tokio::select! {
                line = stdout.recv(), if stdout_open => match line {
                    Some(text) => OutputLine { source: StreamSource::Stdout, text },
                    None => {
                        stdout_open = false;
                        continue;
                    }
                },
                line = stderr.recv(), if stderr_open => match line {
                    Some(text) => OutputLine { source: StreamSource::Stderr, text },
                    None => {
                        stderr_open = false;
                        continue;
                    }
                },
            };
            if tx.send(line).await.is_err() {
                // Consumer dropped the merged end; nothing left to do.
                break;
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn merges_lines_from_both_sources() {
        let (out_tx, out_rx) = mpsc::channel(8);
        let (err_tx, err_rx) = mpsc::channel(8);
        let mut merged = multiplex(out_rx, err_rx);

        out_tx.send("o1".to_string()).await.unwrap();
        err_tx.send("e1".to_string()).await.unwrap();
        drop(out_tx);
        drop(err_tx);

        let mut seen = Vec::new();
        while let Some(line) = merged.recv().await {
            seen.push((line.source, line.text));
        }
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&(StreamSource::Stdout, "o1".to_string())));
        assert!(seen.contains(&(StreamSource::Stderr, "e1".to_string())));
    }

    #[tokio::test]
    async fn preserves_order_within_a_source() {
        let (out_tx, out_rx) = mpsc::channel(8);
        let (_err_tx, err_rx) = mpsc::channel::<String>(8);
        let mut merged = multiplex(out_rx, err_rx);

        for i in 0..5 {
            out_tx.send(format!("line {}", i)).await.unwrap();
        }
        drop(out_tx);

        let mut stdout_lines = Vec::new();
        for _ in 0..5 {
            let line = merged.recv().await.unwrap();
            assert_eq!(line.source, StreamSource::Stdout);
            stdout_lines.push(line.text);
        }
        assert_eq!(stdout_lines, vec!["line 0", "line 1", "line 2", "line 3", "line 4"]);
    }

    #[tokio::test]
    async fn one_source_closing_does_not_end_the_other() {
        let (out_tx, out_rx) = mpsc::channel(8);
        let (err_tx, err_rx) = mpsc::channel(8);
        let mut merged = multiplex(out_rx, err_rx);

        drop(err_tx);

        out_tx.send("still alive".to_string()).await.unwrap();
        let line = merged.recv().await.unwrap();
        assert_eq!(line.text, "still alive");
        assert_eq!(line.source, StreamSource::Stdout);

        drop(out_tx);
        assert!(merged.recv().await.is_none());
    }

    #[tokio::test]
    async fn merged_channel_closes_when_both_sources_close() {
        let (out_tx, out_rx) = mpsc::channel::<String>(8);
        let (err_tx, err_rx) = mpsc::channel::<String>(8);
        let mut merged = multiplex(out_rx, err_rx);

        drop(out_tx);
        drop(err_tx);
        assert!(merged.recv().await.is_none());
    }
}
