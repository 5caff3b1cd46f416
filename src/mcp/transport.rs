use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;

/// Newline-delimited JSON over stdio.
///
/// Reads happen on the caller's task. Writes are funneled through an mpsc
/// channel drained by a single writer task, so responses from concurrent
/// tool tasks never interleave partial lines on stdout.
pub struct StdioTransport {
    lines: Lines<BufReader<Stdin>>,
    outbound: mpsc::Sender<String>,
}

impl StdioTransport {
    pub fn new() -> Self {
        let (outbound, mut rx) = mpsc::channel::<String>(32);
        tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(line) = rx.recv().await {
                let write = async {
                    stdout.write_all(line.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                    stdout.flush().await
                };
                if let Err(e) = write.await {
                    log::error!("stdout write failed, stopping writer: {e}");
                    break;
                }
            }
        });
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            outbound,
        }
    }

    /// Next inbound line; `None` when the host closed stdin.
    pub async fn recv(&mut self) -> Result<Option<String>> {
        self.lines
            .next_line()
            .await
            .context("failed to read from stdin")
    }

    /// Handle for queueing outbound lines, cloneable into spawned tasks.
    pub fn sender(&self) -> mpsc::Sender<String> {
        self.outbound.clone()
    }
}
