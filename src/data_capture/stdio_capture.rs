use std::future::Future;
use std::io;

use log::{debug, trace, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error_handling::types::CaptureError;
use crate::storage::storage_trait::EntrySink;

use super::recorder::{CaptureEngine, CaptureSummary};

/// Drives a `CaptureEngine` from an async line source, optionally echoing
/// every raw line to a passthrough sink.
pub struct StdioCapture<W: EntrySink> {
    engine: CaptureEngine<W>,
}

impl<W: EntrySink> StdioCapture<W> {
    pub fn new(engine: CaptureEngine<W>) -> Self {
        Self { engine }
    }

    /// Reads `input` to the end, or until `shutdown` resolves, then flushes
    /// and closes the session.
    ///
    /// A failing passthrough sink (closed pipe and the like) only disables the
    /// echo. A read error still flushes and closes before it is returned.
    pub async fn run<R, P, S>(
        mut self,
        mut input: R,
        mut passthrough: P,
        shutdown: S,
    ) -> Result<CaptureSummary, CaptureError>
    where
        R: AsyncBufRead + Unpin,
        P: AsyncWrite + Unpin,
        S: Future<Output = ()>,
    {
        let session_id = self.engine.session().id.clone();
        let mut echo = self.engine.options().passthrough;
        let mut buf = Vec::with_capacity(1024);
        tokio::pin!(shutdown);

        let read_result: io::Result<()> = loop {
            buf.clear();
            let n = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    debug!("[{}] Shutdown requested", session_id);
                    break Ok(());
                }
                res = input.read_until(b'\n', &mut buf) => match res {
                    Ok(n) => n,
                    Err(e) => break Err(e),
                },
            };
            if n == 0 {
                trace!("[{}] Input EOF", session_id);
                break Ok(());
            }
            if echo {
                if let Err(e) = echo_line(&mut passthrough, &buf).await {
                    warn!("[{}] Passthrough disabled: {}", session_id, e);
                    echo = false;
                }
            }
            self.engine.process_line(&decode_line(&buf));
        };

        // A line interrupted by shutdown has no terminator yet.
        if !buf.is_empty() && read_result.is_ok() {
            self.engine.process_line(&decode_line(&buf));
        }

        let summary = self.engine.finish()?;
        read_result?;
        Ok(summary)
    }
}

async fn echo_line<P: AsyncWrite + Unpin>(out: &mut P, line: &[u8]) -> io::Result<()> {
    out.write_all(line).await?;
    out.flush().await
}

fn decode_line(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.trim_end_matches('\n').trim_end_matches('\r').to_string()
}
