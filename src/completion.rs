//! Completion providers.
//!
//! - **[`OllamaCompleter`]**: `POST {url}/api/generate` with `stream: true`.
//!   The response body is newline-delimited JSON; each object carries a
//!   `response` text fragment and the last one has `done: true`.
//! - **[`DisabledCompleter`]**: always errors. Requests that reach
//!   generation fail with a completion error.
//!
//! Decoding is split from transport: [`decode_ndjson`] turns any byte
//! stream into a [`FragmentStream`], so it can be tested without a server.

use anyhow::{anyhow, bail, Context, Result};
use answer_harness_core::completion::{Completer, Fragment, FragmentStream};
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CompletionConfig;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

pub struct DisabledCompleter;

#[async_trait]
impl Completer for DisabledCompleter {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn stream(&self, _prompt: &str) -> Result<FragmentStream> {
        bail!("Completion provider is disabled")
    }

    async fn ping(&self) -> Result<()> {
        bail!("Completion provider is disabled")
    }
}

pub struct OllamaCompleter {
    model: String,
    url: String,
    client: reqwest::Client,
}

impl OllamaCompleter {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("completion.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl Completer for OllamaCompleter {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, prompt: &str) -> Result<FragmentStream> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": true,
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Ollama connection error (is Ollama running at {}?)", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }

        Ok(decode_ndjson(response.bytes_stream()))
    }

    async fn ping(&self) -> Result<()> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.url))
            .send()
            .await
            .with_context(|| format!("Ollama not reachable at {}", self.url))?;
        if !resp.status().is_success() {
            bail!("Ollama returned {}", resp.status());
        }
        Ok(())
    }
}

/// Create the [`Completer`] selected by `[completion].provider`.
pub fn create_completer(config: &CompletionConfig) -> Result<Arc<dyn Completer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompleter)),
        "ollama" => Ok(Arc::new(OllamaCompleter::new(config)?)),
        other => bail!("Unknown completion provider: {}", other),
    }
}

/// Decode one NDJSON line from `/api/generate`.
///
/// Blank lines yield nothing. Lines that are not JSON become
/// [`Fragment::Skipped`]. An `error` field is a hard failure.
pub fn parse_generate_line(line: &str) -> Result<Vec<Fragment>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Vec::new());
    }

    let json: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return Ok(vec![Fragment::Skipped(line.to_string())]),
    };

    if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
        bail!("Ollama generation error: {}", err);
    }

    let mut out = Vec::new();
    if let Some(text) = json.get("response").and_then(|r| r.as_str()) {
        if !text.is_empty() {
            out.push(Fragment::Text(text.to_string()));
        }
    }
    if json.get("done").and_then(|d| d.as_bool()).unwrap_or(false) {
        out.push(Fragment::Done);
    }
    Ok(out)
}

/// Splits a byte stream on `\n`, holding partial lines between chunks.
#[derive(Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

struct DecodeState<S> {
    bytes: std::pin::Pin<Box<S>>,
    lines: LineBuffer,
    pending: VecDeque<Result<Fragment>>,
    finished: bool,
}

/// Turn an NDJSON byte stream into fragments. A transport error ends the
/// stream after yielding the error.
pub fn decode_ndjson<S, B, E>(bytes: S) -> FragmentStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = DecodeState {
        bytes: Box::pin(bytes),
        lines: LineBuffer::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for line in state.lines.push(chunk.as_ref()) {
                        enqueue(&mut state.pending, &line);
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state
                        .pending
                        .push_back(Err(anyhow!("completion stream error: {}", e)));
                }
                None => {
                    state.finished = true;
                    if let Some(rest) = state.lines.finish() {
                        enqueue(&mut state.pending, &rest);
                    }
                }
            }
        }
    })
    .boxed()
}

fn enqueue(pending: &mut VecDeque<Result<Fragment>>, line: &str) {
    match parse_generate_line(line) {
        Ok(fragments) => pending.extend(fragments.into_iter().map(Ok)),
        Err(e) => pending.push_back(Err(e)),
    }
}
