use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

use super::extract::read_image_file;
use super::{describe_event, CommandError};
use crate::config::AppConfig;
use crate::pipeline::extraction::DateExtractor;
use crate::verification::{AgeGate, FlowEvent, SubmissionChannel, VerificationFlow};

/// Terminal front end: the image comes from a file, typed entry from stdin.
pub struct TerminalChannel<R, W> {
    image: Option<Vec<u8>>,
    lines: Lines<R>,
    out: W,
    gate: AgeGate,
    json: bool,
}

impl<R, W> TerminalChannel<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: Write + Send,
{
    pub fn new(image: Vec<u8>, input: R, out: W, gate: AgeGate, json: bool) -> Self {
        Self {
            image: Some(image),
            lines: input.lines(),
            out,
            gate,
            json,
        }
    }

    pub fn into_output(self) -> W {
        self.out
    }
}

impl<R, W> SubmissionChannel for TerminalChannel<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: Write + Send,
{
    async fn next_image(&mut self) -> Option<Vec<u8>> {
        self.image.take()
    }

    async fn next_text(&mut self) -> Option<String> {
        match self.lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read typed entry");
                None
            }
        }
    }

    async fn notify(&mut self, event: FlowEvent) {
        let written = if self.json {
            serde_json::to_string(&event)
                .map_err(std::io::Error::from)
                .and_then(|line| writeln!(self.out, "{line}"))
        } else {
            writeln!(self.out, "{}", describe_event(&event, &self.gate))
        };
        if let Err(e) = written.and_then(|()| self.out.flush()) {
            tracing::warn!(error = %e, "Failed to write flow event");
        }
    }
}

/// `agegate verify`: image first, typed entry on stdin as fallback.
pub fn run_verify(
    config: &AppConfig,
    path: &Path,
    today: Option<NaiveDate>,
    json: bool,
) -> Result<bool, CommandError> {
    let image = read_image_file(path)?;

    let extractor = match DateExtractor::from_backend(&config.backend, config.extractor.clone()) {
        Ok(extractor) => extractor,
        Err(e) => {
            tracing::warn!(error = %e, "OCR engine unavailable, only typed entry will work");
            DateExtractor::text_only(config.extractor.pattern)
        }
    };

    let mut flow = VerificationFlow::new(Arc::new(extractor))
        .with_gate(config.gate)
        .with_timeouts(config.upload_timeout, config.manual_timeout);
    if let Some(today) = today {
        flow = flow.with_today(today);
    }

    // Engines holding a blocking HTTP client must live outside the runtime.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let (outcome, mut out) = runtime.block_on(async {
        let mut channel = TerminalChannel::new(
            image,
            BufReader::new(tokio::io::stdin()),
            std::io::stdout(),
            config.gate,
            json,
        );
        let outcome = flow.run(&mut channel).await;
        (outcome, channel.into_output())
    });
    // A stdin read may still be parked on the blocking pool after a timeout.
    runtime.shutdown_background();

    if json {
        serde_json::to_writer_pretty(&mut out, &outcome)?;
        writeln!(out)?;
    } else {
        writeln!(out, "Session {}", outcome.session_id)?;
    }
    Ok(outcome.granted)
}
