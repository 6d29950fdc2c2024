//! Per-question workflow: exploration, aggregation, then generation.
//!
//! Each phase checkpoints its output under the task namespace, so a
//! re-run of a partially finished question picks up exactly where the
//! previous attempt stopped. Exploration is best-effort; aggregation is
//! load-bearing; generation owns its own resume semantics.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::aggregate::AggregationStage;
use crate::checkpoint::CheckpointStore;
use crate::context::StageContext;
use crate::error::Result;
use crate::explore::{ExplorationStage, ExplorationTranscript};
use crate::generate::{GenerationOutcome, SqlGenerator};
use crate::question::Question;
use crate::telemetry::StatusRecord;

/// Marker written in place of SQL when generation never converged.
pub const GENERATION_FAILED: &str = "SQL Generation Failed";

/// Final report for one task, as it lands in the result file.
///
/// `provisional_sql` and `final_sql` hold the same value in every path;
/// external consumers read both names, so neither field is collapsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionReport {
    /// Task namespace (`{question_id}_{run}`)
    pub instance_id: String,
    /// Latest statement that executed successfully, or the failure marker
    #[serde(rename = "temp_SQL")]
    pub provisional_sql: String,
    /// Same value under the other name consumers expect
    #[serde(rename = "final_SQL")]
    pub final_sql: String,
    /// Generation steps consumed
    #[serde(rename = "Step_counter")]
    pub step_counter: u32,
}

impl QuestionReport {
    fn new(namespace: &str, sql: String, step_counter: u32) -> Self {
        Self {
            instance_id: namespace.to_string(),
            provisional_sql: sql.clone(),
            final_sql: sql,
            step_counter,
        }
    }

    /// Whether generation produced a statement rather than the failure
    /// marker. The statement may be provisional if the run stopped at the
    /// step budget.
    pub fn has_sql(&self) -> bool {
        self.final_sql != GENERATION_FAILED
    }
}

/// The full workflow for one question.
pub struct QuestionWorkflow {
    ctx: StageContext,
    store: Arc<CheckpointStore>,
}

impl QuestionWorkflow {
    pub fn new(ctx: StageContext, store: Arc<CheckpointStore>) -> Self {
        Self { ctx, store }
    }

    /// Run the workflow under the given task namespace.
    pub async fn run(&self, question: &Question, namespace: &str) -> Result<QuestionReport> {
        let started = Instant::now();

        let transcript = self.exploration(question, namespace).await?;
        let aggregated = self.aggregation(question, namespace, &transcript).await?;

        let outcome = SqlGenerator::new(&self.ctx, &self.store)
            .run(question, &aggregated, namespace)
            .await?;

        let report = match outcome {
            GenerationOutcome::Converged { sql, step_counter } => {
                QuestionReport::new(namespace, sql, step_counter)
            }
            // A run that ran out of budget or stalled still reports its
            // latest known-good statement as a best-effort answer.
            GenerationOutcome::BudgetExceeded {
                provisional_sql,
                step_counter,
            }
            | GenerationOutcome::Stage2Interrupted {
                provisional_sql,
                step_counter,
            } => QuestionReport::new(namespace, provisional_sql, step_counter),
            // The consumed bootstrap attempt counts as a step even though
            // it never produced an executable statement.
            GenerationOutcome::Stage1Failed => {
                QuestionReport::new(namespace, GENERATION_FAILED.to_string(), 1)
            }
        };

        self.ctx.status.log(StatusRecord::new(
            &question.id,
            "Time Cost",
            false,
            0,
            0,
            Some(json!({ "seconds": started.elapsed().as_secs_f64() })),
        ));
        info!(
            question_id = %question.id,
            namespace,
            produced_sql = report.has_sql(),
            steps = report.step_counter,
            "workflow finished"
        );
        Ok(report)
    }

    async fn exploration(
        &self,
        question: &Question,
        namespace: &str,
    ) -> Result<ExplorationTranscript> {
        if let Some(cached) = self.store.load_exploration(namespace)? {
            info!(question_id = %question.id, "reusing cached exploration");
            return Ok(cached);
        }
        let transcript = ExplorationStage::new(&self.ctx).run(question).await;
        self.store.save_exploration(namespace, &transcript)?;
        Ok(transcript)
    }

    async fn aggregation(
        &self,
        question: &Question,
        namespace: &str,
        transcript: &ExplorationTranscript,
    ) -> Result<String> {
        if let Some(cached) = self.store.load_aggregation(namespace)? {
            info!(question_id = %question.id, "reusing cached aggregation");
            return Ok(cached);
        }
        let summary = AggregationStage::new(&self.ctx)
            .run(question, transcript)
            .await?;
        self.store.save_aggregation(namespace, &summary)?;
        Ok(summary)
    }
}
