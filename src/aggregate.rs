//! Information aggregation stage.
//!
//! Condenses the exploration transcript into a summary the generation
//! stages can afford to carry in every prompt. Unlike exploration this
//! stage is load-bearing: if no tagged summary arrives within the attempt
//! bound the whole question workflow fails.

use tracing::warn;

use crate::context::StageContext;
use crate::conversation::{Conversation, Turn};
use crate::error::{Error, Result};
use crate::explore::ExplorationTranscript;
use crate::extract::extract_tagged;
use crate::prompt;
use crate::question::Question;
use crate::telemetry::StatusRecord;

const STEP: &str = "Information Aggregation Stage";

/// The aggregation stage runner.
pub struct AggregationStage<'a> {
    ctx: &'a StageContext,
}

impl<'a> AggregationStage<'a> {
    pub fn new(ctx: &'a StageContext) -> Self {
        Self { ctx }
    }

    /// Summarize the exploration transcript for one question.
    pub async fn run(
        &self,
        question: &Question,
        transcript: &ExplorationTranscript,
    ) -> Result<String> {
        let prompt_convo = Conversation::new().with_turn(Turn::user(prompt::aggregation(
            question,
            &transcript.render(),
        )));

        for attempt in 1..=self.ctx.config.aggregation_attempts {
            let reply = self.ctx.llm.call(&prompt_convo).await;
            self.ctx.status.log(StatusRecord::new(
                &question.id,
                STEP,
                false,
                reply.input_tokens,
                reply.output_tokens,
                None,
            ));

            if reply.is_transport_failure() {
                warn!(question_id = %question.id, attempt, "aggregation call failed");
                continue;
            }
            match extract_tagged(&reply.content, "answer") {
                Ok(summary) => return Ok(summary),
                Err(e) => {
                    warn!(
                        question_id = %question.id,
                        attempt,
                        error = %e,
                        "aggregation reply carries no answer tag"
                    );
                }
            }
        }

        Err(Error::StageFailed(format!(
            "aggregation produced no summary for question '{}' after {} attempts",
            question.id, self.ctx.config.aggregation_attempts
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LlmSettings, RunConfig};
    use crate::database::IdentityFinalizer;
    use crate::llm::{LlmCaller, LlmReply};
    use crate::question::Dialect;
    use crate::telemetry::MemoryStatusSink;
    use crate::testing::{ScriptedExecutor, ScriptedTransport};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn context(replies: Vec<LlmReply>) -> (StageContext, Arc<MemoryStatusSink>) {
        let sink = Arc::new(MemoryStatusSink::new());
        let ctx = StageContext::new(
            LlmCaller::new(
                Arc::new(ScriptedTransport::with_replies(replies)),
                LlmSettings::new("https://api", "k", "m").with_max_retries(1),
            ),
            Arc::new(ScriptedExecutor::with_results(vec![])),
            Arc::new(IdentityFinalizer),
            sink.clone(),
            RunConfig::default(),
        );
        (ctx, sink)
    }

    fn question() -> Question {
        Question::new("q1", "How many?", "schema", "db1", Dialect::Sqlite)
    }

    fn transcript() -> ExplorationTranscript {
        let mut t = ExplorationTranscript::default();
        t.record("SELECT 1", "1");
        t
    }

    #[tokio::test]
    async fn test_tagged_summary_extracted() {
        let (ctx, sink) = context(vec![LlmReply::new(
            "Here is my summary.\n<answer>Table t has 42 rows.</answer>",
        )]);

        let summary = AggregationStage::new(&ctx)
            .run(&question(), &transcript())
            .await
            .unwrap();

        assert_eq!(summary, "Table t has 42 rows.");
        assert_eq!(sink.records().len(), 1);
        assert_eq!(sink.records()[0].step, STEP);
    }

    #[tokio::test]
    async fn test_untagged_reply_retried() {
        let (ctx, _) = context(vec![
            LlmReply::new("no tags at all"),
            LlmReply::new("<answer>second try</answer>"),
        ]);

        let summary = AggregationStage::new(&ctx)
            .run(&question(), &transcript())
            .await
            .unwrap();
        assert_eq!(summary, "second try");
    }

    #[tokio::test]
    async fn test_exhaustion_is_fatal() {
        let replies = (0..3).map(|_| LlmReply::new("still no tags")).collect();
        let (ctx, _) = context(replies);

        let err = AggregationStage::new(&ctx)
            .run(&question(), &transcript())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StageFailed(_)));
    }
}
