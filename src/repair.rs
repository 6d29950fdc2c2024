//! Generic bounded repair loop for failing SQL statements.
//!
//! Both exploration probes and generation candidates repair the same way:
//! feed the failure transcript back to the model, parse a corrected
//! statement, execute it, and either succeed or grow the transcript and go
//! again. The loop gives up after `max_repair_attempts` consecutive failed
//! corrections. Unparseable corrections (including the transport-failure
//! sentinel) do not grow the transcript; they consume a separate
//! `stage_parse_retries` bound instead.

use serde_json::Value;
use tracing::warn;

use crate::context::StageContext;
use crate::conversation::Conversation;
use crate::database::FinalizedStatement;
use crate::error::Result;
use crate::llm::LlmReply;
use crate::question::Question;
use crate::telemetry::StatusRecord;

/// One failed execution in the repair transcript.
#[derive(Debug, Clone)]
pub struct FailedAttempt {
    /// The failing statement (or its enclosing status) rendered verbatim
    pub rendered: String,
    /// The execution error message
    pub error: String,
}

impl FailedAttempt {
    pub fn new(rendered: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            rendered: rendered.into(),
            error: error.into(),
        }
    }
}

/// A correction parsed out of a model reply, not yet executed.
pub struct ParsedCorrection<P> {
    /// The caller's parsed payload, returned on success
    pub payload: P,
    /// The statement to finalize and execute
    pub statement: String,
    /// Verbatim text to embed in the transcript if execution fails
    pub rendered: String,
    /// Structured status for telemetry, when the reply carries one
    pub status: Option<Value>,
}

/// A successful repair: the parsed payload plus the passing execution.
pub struct RepairOutcome<P> {
    /// The caller's parsed payload from the passing correction
    pub payload: P,
    /// The finalized statement that executed successfully
    pub statement: FinalizedStatement,
    /// The rendered execution result, annotated if the statement was
    /// expanded from an abbreviation
    pub result: String,
    /// Corrective executions consumed, including the passing one
    pub attempts: u32,
}

/// Bounded repair loop over a failure transcript.
pub struct RepairLoop<'a> {
    ctx: &'a StageContext,
    step: String,
}

impl<'a> RepairLoop<'a> {
    /// Create a repair loop logging under the given telemetry step label.
    pub fn new(ctx: &'a StageContext, step: impl Into<String>) -> Self {
        Self {
            ctx,
            step: step.into(),
        }
    }

    /// Run the loop to completion.
    ///
    /// `build_prompt` turns the current transcript (seed first, failed
    /// corrections after) into the full conversation for the next repair
    /// request. `parse` extracts a correction from a reply; any error it
    /// returns counts against the parse bound. Returns `None` when either
    /// bound is exhausted — repair exhaustion is a soft outcome, decided by
    /// the caller, never an `Err`.
    pub async fn run<P>(
        &self,
        question: &Question,
        seed: FailedAttempt,
        build_prompt: impl Fn(&[FailedAttempt]) -> Conversation,
        parse: impl Fn(&LlmReply) -> Result<ParsedCorrection<P>>,
    ) -> Option<RepairOutcome<P>> {
        let mut transcript = vec![seed];
        let mut repairs = 0u32;
        let mut parse_failures = 0u32;

        while repairs < self.ctx.config.max_repair_attempts {
            let prompt = build_prompt(&transcript);
            let reply = self.ctx.llm.call(&prompt).await;

            let correction = match parse(&reply) {
                Ok(c) => c,
                Err(e) => {
                    warn!(
                        question_id = %question.id,
                        step = %self.step,
                        error = %e,
                        "unparseable repair reply"
                    );
                    self.log(question, &reply, None);
                    parse_failures += 1;
                    if parse_failures >= self.ctx.config.stage_parse_retries {
                        return None;
                    }
                    continue;
                }
            };

            self.log(question, &reply, correction.status.clone());

            let finalized = self
                .ctx
                .finalizer
                .finalize(&correction.statement, question.dialect);
            let outcome = self
                .ctx
                .executor
                .execute(question.dialect, &finalized.sql, &question.database)
                .await;
            repairs += 1;

            if outcome.is_ok() {
                let result = finalized.annotate_result(&outcome.payload);
                return Some(RepairOutcome {
                    payload: correction.payload,
                    statement: finalized,
                    result,
                    attempts: repairs,
                });
            }

            warn!(
                question_id = %question.id,
                step = %self.step,
                attempt = repairs,
                "corrected statement still fails"
            );
            transcript.push(FailedAttempt::new(correction.rendered, outcome.payload));
        }

        None
    }

    fn log(&self, question: &Question, reply: &LlmReply, status: Option<Value>) {
        self.ctx.status.log(StatusRecord::new(
            &question.id,
            &self.step,
            true,
            reply.input_tokens,
            reply.output_tokens,
            status,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LlmSettings, RunConfig};
    use crate::conversation::Turn;
    use crate::database::{ExecutionResult, IdentityFinalizer};
    use crate::error::Error;
    use crate::llm::{LlmCaller, LlmReply};
    use crate::question::Dialect;
    use crate::telemetry::MemoryStatusSink;
    use crate::testing::{ScriptedExecutor, ScriptedTransport};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn context(
        replies: Vec<LlmReply>,
        results: Vec<ExecutionResult>,
    ) -> (StageContext, Arc<ScriptedExecutor>, Arc<MemoryStatusSink>) {
        let executor = Arc::new(ScriptedExecutor::with_results(results));
        let sink = Arc::new(MemoryStatusSink::new());
        let ctx = StageContext::new(
            LlmCaller::new(
                Arc::new(ScriptedTransport::with_replies(replies)),
                LlmSettings::new("https://api", "k", "m").with_max_retries(1),
            ),
            executor.clone(),
            Arc::new(IdentityFinalizer),
            sink.clone(),
            RunConfig::default(),
        );
        (ctx, executor, sink)
    }

    fn question() -> Question {
        Question::new("q1", "How many?", "schema", "db1", Dialect::Sqlite)
    }

    fn plain_parse(reply: &LlmReply) -> crate::error::Result<ParsedCorrection<String>> {
        if reply.is_transport_failure() {
            return Err(Error::NotFound("transport failure".into()));
        }
        Ok(ParsedCorrection {
            payload: reply.content.clone(),
            statement: reply.content.clone(),
            rendered: reply.content.clone(),
            status: None,
        })
    }

    fn transcript_prompt(transcript: &[FailedAttempt]) -> Conversation {
        let mut text = String::new();
        for attempt in transcript {
            text.push_str(&attempt.rendered);
            text.push('\n');
            text.push_str(&attempt.error);
            text.push('\n');
        }
        Conversation::new().with_turn(Turn::user(text))
    }

    #[tokio::test]
    async fn test_first_correction_succeeds() {
        let (ctx, executor, sink) = context(
            vec![LlmReply::new("SELECT fixed")],
            vec![ExecutionResult::ok("rows")],
        );
        let repair = RepairLoop::new(&ctx, "Repair Stage");

        let outcome = repair
            .run(
                &question(),
                FailedAttempt::new("SELECT broken", "no such table"),
                transcript_prompt,
                plain_parse,
            )
            .await
            .unwrap();

        assert_eq!(outcome.payload, "SELECT fixed");
        assert_eq!(outcome.result, "rows");
        assert_eq!(outcome.attempts, 1);
        assert_eq!(executor.executed(), vec!["SELECT fixed"]);
        assert_eq!(sink.records().len(), 1);
        assert!(sink.records()[0].in_repair);
    }

    #[tokio::test]
    async fn test_transcript_grows_across_failures() {
        let (ctx, executor, _) = context(
            vec![LlmReply::new("SELECT v2"), LlmReply::new("SELECT v3")],
            vec![
                ExecutionResult::error("still broken"),
                ExecutionResult::ok("rows"),
            ],
        );
        let repair = RepairLoop::new(&ctx, "Repair Stage");

        let outcome = repair
            .run(
                &question(),
                FailedAttempt::new("SELECT v1", "no such table"),
                |transcript| {
                    // The second request must carry both earlier failures.
                    if transcript.len() == 2 {
                        assert_eq!(transcript[0].rendered, "SELECT v1");
                        assert_eq!(transcript[1].rendered, "SELECT v2");
                        assert_eq!(transcript[1].error, "still broken");
                    }
                    transcript_prompt(transcript)
                },
                plain_parse,
            )
            .await
            .unwrap();

        assert_eq!(outcome.payload, "SELECT v3");
        assert_eq!(outcome.attempts, 2);
        assert_eq!(executor.executed(), vec!["SELECT v2", "SELECT v3"]);
    }

    #[tokio::test]
    async fn test_exhaustion_after_max_repair_attempts() {
        let replies = (0..5).map(|i| LlmReply::new(format!("SELECT v{i}"))).collect();
        let results = (0..5)
            .map(|_| ExecutionResult::error("still broken"))
            .collect();
        let (ctx, executor, _) = context(replies, results);
        let repair = RepairLoop::new(&ctx, "Repair Stage");

        let outcome = repair
            .run(
                &question(),
                FailedAttempt::new("SELECT v", "boom"),
                transcript_prompt,
                plain_parse,
            )
            .await;

        assert!(outcome.is_none());
        assert_eq!(executor.executed().len(), 5);
    }

    #[tokio::test]
    async fn test_parse_failures_do_not_grow_transcript() {
        // One unparseable sentinel reply, then a good correction.
        let (ctx, _, sink) = context(
            vec![LlmReply::transport_failure(), LlmReply::new("SELECT fixed")],
            vec![ExecutionResult::ok("rows")],
        );
        let repair = RepairLoop::new(&ctx, "Repair Stage");

        let outcome = repair
            .run(
                &question(),
                FailedAttempt::new("SELECT broken", "boom"),
                |transcript| {
                    assert_eq!(transcript.len(), 1, "parse failure must not grow transcript");
                    transcript_prompt(transcript)
                },
                plain_parse,
            )
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 1);
        // Sentinel reply logged with no status, correction logged after.
        assert_eq!(sink.records().len(), 2);
        assert!(sink.records()[0].status.is_none());
    }

    #[tokio::test]
    async fn test_parse_bound_exhaustion() {
        let (ctx, executor, _) = context(vec![], vec![]);
        let repair = RepairLoop::new(&ctx, "Repair Stage");

        // Every call degrades to the sentinel; the parse bound trips
        // without a single execution.
        let outcome = repair
            .run(
                &question(),
                FailedAttempt::new("SELECT broken", "boom"),
                transcript_prompt,
                plain_parse,
            )
            .await;

        assert!(outcome.is_none());
        assert!(executor.executed().is_empty());
    }
}
