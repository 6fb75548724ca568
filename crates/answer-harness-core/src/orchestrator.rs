//! Generation orchestrator: the per-request state machine.
//!
//! ```text
//! AwaitingInput ──unsafe──────────▶ InputRejected
//!       │        ──injection───────▶ InputRejected
//!       │ safe
//!       ▼
//!   retrieval ──no evidence──────▶ NoEvidence        (completer not called)
//!       │
//!       ▼
//!   Generating ──stream error────▶ Err(UpstreamCompletion)
//!       │       ──cancelled──────▶ Err(Cancelled)
//!       ▼
//!   output check ──ungrounded────▶ OutputRejected    (fallback text, no citations)
//!       │
//!       ▼
//!   Completed                                        (answer + citations)
//! ```
//!
//! Every request runs through exactly this sequence once. Refusals are
//! successful [`Answer`]s whose [`Stage`] records where the request stopped;
//! only completion failures, cancellation, and malformed requests are
//! returned as `Err`.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::completion::{collect_completion, Completer, DEFAULT_MAX_FRAGMENTS};
use crate::error::AnswerError;
use crate::fusion::RetrievalEngine;
use crate::guardrail::{Guardrails, Verdict};
use crate::models::{Chunk, Citation, FusedChunk, QueryRequest, QueryResponse};
use crate::prompt::{
    build_prompt, citations, DEFAULT_CITATION_SNIPPET_CHARS, DEFAULT_SNIPPET_CHARS,
};

/// Where a request ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    AwaitingInput,
    InputRejected,
    NoEvidence,
    Generating,
    OutputRejected,
    Completed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Stage::AwaitingInput | Stage::Generating)
    }
}

/// Final outcome of one request.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub stage: Stage,
    pub text: String,
    /// Non-empty only when `stage == Completed`.
    pub citations: Vec<Citation>,
    #[serde(skip)]
    refusal: Option<AnswerError>,
}

impl Answer {
    fn refused(stage: Stage, text: String, reason: AnswerError) -> Self {
        Self {
            stage,
            text,
            citations: Vec::new(),
            refusal: Some(reason),
        }
    }

    fn completed(text: String, citations: Vec<Citation>) -> Self {
        Self {
            stage: Stage::Completed,
            text,
            citations,
            refusal: None,
        }
    }

    /// The taxonomy kind for a refused answer, `None` when completed.
    pub fn refusal(&self) -> Option<&AnswerError> {
        self.refusal.as_ref()
    }

    pub fn into_response(self) -> QueryResponse {
        QueryResponse {
            answer: self.text,
            citations: self.citations,
        }
    }
}

/// Caller-visible texts and limits for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub snippet_chars: usize,
    pub citation_snippet_chars: usize,
    pub unsafe_refusal: String,
    pub injection_refusal: String,
    pub no_evidence_text: String,
    pub ungrounded_fallback: String,
    pub max_fragments: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            snippet_chars: DEFAULT_SNIPPET_CHARS,
            citation_snippet_chars: DEFAULT_CITATION_SNIPPET_CHARS,
            unsafe_refusal: "❌ Unsafe query refused.".to_string(),
            injection_refusal: "❌ Prompt injection attempt detected and refused.".to_string(),
            no_evidence_text: "I don't know.".to_string(),
            ungrounded_fallback: "I don't know.".to_string(),
            max_fragments: DEFAULT_MAX_FRAGMENTS,
        }
    }
}

pub struct Orchestrator {
    retrieval: Arc<RetrievalEngine>,
    guardrails: Guardrails,
    completer: Arc<dyn Completer>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        retrieval: Arc<RetrievalEngine>,
        guardrails: Guardrails,
        completer: Arc<dyn Completer>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            retrieval,
            guardrails,
            completer,
            config,
        }
    }

    pub fn retrieval(&self) -> &RetrievalEngine {
        &self.retrieval
    }

    pub fn guardrails(&self) -> &Guardrails {
        &self.guardrails
    }

    /// Answer a question end to end.
    pub async fn answer(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<Answer, AnswerError> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(AnswerError::InvalidRequest(
                "question must not be empty".to_string(),
            ));
        }
        if request.top_k == 0 {
            return Err(AnswerError::InvalidRequest(
                "top_k must be at least 1".to_string(),
            ));
        }

        let request_id = Uuid::new_v4();
        let span = info_span!("answer", %request_id, mode = %request.mode, top_k = request.top_k);

        async move {
            match self.guardrails.check_input(question) {
                Verdict::UnsafeInput => {
                    info!(stage = "input_rejected", reason = "unsafe_input", "request refused");
                    return Ok(Answer::refused(
                        Stage::InputRejected,
                        self.config.unsafe_refusal.clone(),
                        AnswerError::UnsafeInput,
                    ));
                }
                Verdict::InjectionDetected => {
                    info!(stage = "input_rejected", reason = "prompt_injection", "request refused");
                    return Ok(Answer::refused(
                        Stage::InputRejected,
                        self.config.injection_refusal.clone(),
                        AnswerError::PromptInjectionDetected,
                    ));
                }
                _ => {}
            }

            let evidence = self
                .retrieval
                .search(question, request.top_k, request.mode)
                .await;
            info!(evidence = evidence.len(), "retrieval finished");

            self.generate(question, evidence, cancel).await
        }
        .instrument(span)
        .await
    }

    /// Skip retrieval and generate from caller-supplied evidence. Input
    /// guardrails still apply.
    pub async fn answer_with_evidence(
        &self,
        question: &str,
        evidence: Vec<FusedChunk>,
        cancel: &CancellationToken,
    ) -> Result<Answer, AnswerError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AnswerError::InvalidRequest(
                "question must not be empty".to_string(),
            ));
        }
        match self.guardrails.check_input(question) {
            Verdict::UnsafeInput => Ok(Answer::refused(
                Stage::InputRejected,
                self.config.unsafe_refusal.clone(),
                AnswerError::UnsafeInput,
            )),
            Verdict::InjectionDetected => Ok(Answer::refused(
                Stage::InputRejected,
                self.config.injection_refusal.clone(),
                AnswerError::PromptInjectionDetected,
            )),
            _ => self.generate(question, evidence, cancel).await,
        }
    }

    async fn generate(
        &self,
        question: &str,
        evidence: Vec<FusedChunk>,
        cancel: &CancellationToken,
    ) -> Result<Answer, AnswerError> {
        if evidence.is_empty() {
            info!(stage = "no_evidence", "no evidence, skipping generation");
            return Ok(Answer::refused(
                Stage::NoEvidence,
                self.config.no_evidence_text.clone(),
                AnswerError::NoEvidenceFound,
            ));
        }
        if cancel.is_cancelled() {
            return Err(AnswerError::Cancelled);
        }

        let prompt = build_prompt(question, &evidence, self.config.snippet_chars);
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AnswerError::Cancelled),
            res = self.completer.stream(&prompt) => {
                res.map_err(|e| AnswerError::UpstreamCompletion(format!("{:#}", e)))?
            }
        };
        let text = collect_completion(stream, cancel, self.config.max_fragments).await?;

        let chunks: Vec<Chunk> = evidence.iter().map(|f| f.chunk.clone()).collect();
        if !self.guardrails.is_grounded_output(&text, &chunks).await {
            info!(stage = "output_rejected", "answer not grounded, returning fallback");
            return Ok(Answer::refused(
                Stage::OutputRejected,
                self.config.ungrounded_fallback.clone(),
                AnswerError::UngroundedOutput,
            ));
        }

        info!(stage = "completed", citations = evidence.len(), "answer accepted");
        let cites = citations(&evidence, self.config.citation_snippet_chars);
        Ok(Answer::completed(text.trim().to_string(), cites))
    }
}
