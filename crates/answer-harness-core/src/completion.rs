//! Completion (LLM generation) service trait and bounded stream consumption.
//!
//! A [`Completer`] turns a prompt into a stream of [`Fragment`]s. The
//! orchestrator drains that stream with [`collect_completion`], which
//! enforces a fragment bound and observes a [`CancellationToken`] so a
//! dropped caller never leaves a runaway generation behind.
//!
//! ```text
//! Text("Docker") ─▶ Text(" is…") ─▶ Skipped(..) ─▶ Done
//!        └────────── concatenated ─────────┘        stop
//! ```

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AnswerError;

/// Upper bound on fragments read from one completion.
pub const DEFAULT_MAX_FRAGMENTS: usize = 8192;

/// One decoded unit of a streamed completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Generated text to append to the answer.
    Text(String),
    /// Explicit end-of-generation marker.
    Done,
    /// A line the decoder could not interpret. Ignored by the consumer.
    Skipped(String),
}

pub type FragmentStream = BoxStream<'static, Result<Fragment>>;

/// Streaming text generation backend.
#[async_trait]
pub trait Completer: Send + Sync {
    fn model_name(&self) -> &str;

    /// Start generating for `prompt`. Errors here mean the request could not
    /// be issued at all; errors during generation arrive inside the stream.
    async fn stream(&self, prompt: &str) -> Result<FragmentStream>;

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Drain `stream` into a single string.
///
/// Stops at [`Fragment::Done`] or end of stream. Reading more than
/// `max_fragments` fragments, or a transport error inside the stream, is an
/// [`AnswerError::UpstreamCompletion`]. If `cancel` fires first the stream
/// is dropped and [`AnswerError::Cancelled`] is returned.
pub async fn collect_completion(
    mut stream: FragmentStream,
    cancel: &CancellationToken,
    max_fragments: usize,
) -> Result<String, AnswerError> {
    let mut answer = String::new();
    let mut seen = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(fragments = seen, "completion cancelled");
                return Err(AnswerError::Cancelled);
            }
            next = stream.next() => next,
        };

        let fragment = match next {
            None => break,
            Some(Ok(fragment)) => fragment,
            Some(Err(e)) => {
                return Err(AnswerError::UpstreamCompletion(format!("{:#}", e)));
            }
        };

        seen += 1;
        if seen > max_fragments {
            return Err(AnswerError::UpstreamCompletion(format!(
                "stream exceeded {} fragments",
                max_fragments
            )));
        }

        match fragment {
            Fragment::Text(text) => answer.push_str(&text),
            Fragment::Done => break,
            Fragment::Skipped(line) => {
                warn!(line = %line, "skipping undecodable completion fragment");
            }
        }
    }

    debug!(fragments = seen, chars = answer.len(), "completion finished");
    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use futures::stream;

    fn from_fragments(items: Vec<Result<Fragment>>) -> FragmentStream {
        stream::iter(items).boxed()
    }

    fn text(s: &str) -> Result<Fragment> {
        Ok(Fragment::Text(s.to_string()))
    }

    #[tokio::test]
    async fn test_concatenates_until_done() {
        let s = from_fragments(vec![
            text("Docker"),
            text(" is a tool"),
            Ok(Fragment::Done),
            text(" never read"),
        ]);
        let out = collect_completion(s, &CancellationToken::new(), 100)
            .await
            .unwrap();
        assert_eq!(out, "Docker is a tool");
    }

    #[tokio::test]
    async fn test_end_of_stream_without_done() {
        let s = from_fragments(vec![text("a"), text("b")]);
        let out = collect_completion(s, &CancellationToken::new(), 100)
            .await
            .unwrap();
        assert_eq!(out, "ab");
    }

    #[tokio::test]
    async fn test_skipped_fragments_are_ignored() {
        let s = from_fragments(vec![
            text("a"),
            Ok(Fragment::Skipped("{not json".to_string())),
            text("b"),
        ]);
        let out = collect_completion(s, &CancellationToken::new(), 100)
            .await
            .unwrap();
        assert_eq!(out, "ab");
    }

    #[tokio::test]
    async fn test_bound_is_enforced() {
        let s = stream::repeat_with(|| text("x")).boxed();
        let err = collect_completion(s, &CancellationToken::new(), 50)
            .await
            .unwrap_err();
        assert!(matches!(err, AnswerError::UpstreamCompletion(_)));
    }

    #[tokio::test]
    async fn test_stream_error_is_upstream_completion() {
        let s = from_fragments(vec![text("a"), Err(anyhow!("connection reset"))]);
        let err = collect_completion(s, &CancellationToken::new(), 100)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AnswerError::UpstreamCompletion("connection reset".to_string())
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let s = stream::pending::<Result<Fragment>>().boxed();
        let err = collect_completion(s, &cancel, 100).await.unwrap_err();
        assert_eq!(err, AnswerError::Cancelled);
    }

    #[tokio::test]
    async fn test_cancelled_mid_stream() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let s = stream::once(async { text("partial") })
            .chain(stream::pending())
            .boxed();
        let err = collect_completion(s, &cancel, 100).await.unwrap_err();
        assert_eq!(err, AnswerError::Cancelled);
    }
}
