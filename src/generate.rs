//! Two-stage SQL generation state machine.
//!
//! Stage 1 bootstraps: decompose the question and get a first executable
//! statement. Stage 2 evolves it one step at a time, feeding each execution
//! result back and asking the model to extend, revise, rephrase or explore.
//! Convergence is `result_acceptable` together with `current_state ==
//! "rephrase"`. The machine carries a rolling conversation window — the
//! bootstrap exchange plus the latest step's delta — and snapshots it to
//! the checkpoint store after every accepted step, so an interrupted run
//! resumes at the step after the snapshot without repeating Stage 1.

use serde_json::Value;
use tracing::{info, warn};

use crate::checkpoint::{CheckpointStore, GenerationCheckpoint};
use crate::context::StageContext;
use crate::conversation::{Conversation, Turn};
use crate::error::{Error, Result};
use crate::extract::extract_json;
use crate::llm::LlmReply;
use crate::prompt;
use crate::question::Question;
use crate::repair::{FailedAttempt, ParsedCorrection, RepairLoop, RepairOutcome};
use crate::status::{GenerationStatus, Stage1Status, Stage2Status};
use crate::telemetry::StatusRecord;

const STAGE1_STEP: &str = "Initial SQL Generation Stage";
const STAGE1_REPAIR_STEP: &str = "Initial SQL Generation Repair Stage";
const STAGE2_STEP: &str = "SQL Generation Stage";
const STAGE2_REPAIR_STEP: &str = "SQL Generation Repair Stage";

/// Terminal outcome of the generation state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    /// Stage 2 reached the terminal condition
    Converged { sql: String, step_counter: u32 },
    /// The step budget ran out before convergence
    BudgetExceeded {
        provisional_sql: String,
        step_counter: u32,
    },
    /// Stage 1 never produced an executable statement
    Stage1Failed,
    /// Stage 2 stalled: repair or parse retries exhausted mid-evolution
    Stage2Interrupted {
        provisional_sql: String,
        step_counter: u32,
    },
}

impl GenerationOutcome {
    /// Whether the machine converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged { .. })
    }
}

/// The generation state machine runner.
pub struct SqlGenerator<'a> {
    ctx: &'a StageContext,
    store: &'a CheckpointStore,
}

struct Bootstrap {
    status: Stage1Status,
    result: String,
    executed_sql: String,
}

impl<'a> SqlGenerator<'a> {
    pub fn new(ctx: &'a StageContext, store: &'a CheckpointStore) -> Self {
        Self { ctx, store }
    }

    /// Run generation for one question under the given checkpoint
    /// namespace. Errors only on checkpoint persistence failure; every
    /// model-side dead end is a [`GenerationOutcome`] variant.
    pub async fn run(
        &self,
        question: &Question,
        aggregated: &str,
        namespace: &str,
    ) -> Result<GenerationOutcome> {
        if let Some(checkpoint) = self.store.load_generation(namespace)? {
            if checkpoint.is_converged() {
                info!(
                    question_id = %question.id,
                    step_counter = checkpoint.step_counter,
                    "converged checkpoint found, skipping generation"
                );
                return Ok(GenerationOutcome::Converged {
                    sql: checkpoint.latest_sql,
                    step_counter: checkpoint.step_counter,
                });
            }
            info!(
                question_id = %question.id,
                step_counter = checkpoint.step_counter,
                "resuming generation from checkpoint"
            );
            return self.evolve(question, namespace, checkpoint).await;
        }

        let prompt_convo =
            Conversation::new().with_turn(Turn::user(prompt::stage1(question, aggregated)));
        let Some(bootstrap) = self.bootstrap(question, &prompt_convo).await else {
            return Ok(GenerationOutcome::Stage1Failed);
        };

        let checkpoint = GenerationCheckpoint {
            initial_conversation: prompt_convo,
            latest_delta: vec![
                Turn::assistant(GenerationStatus::Stage1(bootstrap.status.clone()).render()),
                Turn::user(format!(
                    "Execution result:\n{}\n{}",
                    bootstrap.result,
                    prompt::stage2(question.dialect)
                )),
            ],
            status: GenerationStatus::Stage1(bootstrap.status.clone()),
            latest_sql: bootstrap.status.sql.clone(),
            provisional_sql: bootstrap.executed_sql,
            step_counter: 1,
        };
        self.store.save_generation(namespace, &checkpoint)?;

        self.evolve(question, namespace, checkpoint).await
    }

    /// Stage 1: obtain a first executable statement, repairing it on
    /// execution failure. `None` means Stage 1 failed for good.
    async fn bootstrap(&self, question: &Question, prompt_convo: &Conversation) -> Option<Bootstrap> {
        for attempt in 1..=self.ctx.config.stage_parse_retries {
            let reply = self.ctx.llm.call(prompt_convo).await;
            let status = match parse_stage1(&reply) {
                Ok(status) => status,
                Err(e) => {
                    warn!(
                        question_id = %question.id,
                        attempt,
                        error = %e,
                        "unparseable bootstrap reply"
                    );
                    self.log(question, STAGE1_STEP, &reply, None);
                    continue;
                }
            };
            self.log(
                question,
                STAGE1_STEP,
                &reply,
                Some(GenerationStatus::Stage1(status.clone()).to_value()),
            );

            let finalized = self.ctx.finalizer.finalize(&status.sql, question.dialect);
            let outcome = self
                .ctx
                .executor
                .execute(question.dialect, &finalized.sql, &question.database)
                .await;
            if outcome.is_ok() {
                return Some(Bootstrap {
                    result: finalized.annotate_result(&outcome.payload),
                    executed_sql: finalized.sql,
                    status,
                });
            }

            let repaired: Option<RepairOutcome<Stage1Status>> =
                RepairLoop::new(self.ctx, STAGE1_REPAIR_STEP)
                    .run(
                        question,
                        FailedAttempt::new(
                            GenerationStatus::Stage1(status).render(),
                            outcome.payload,
                        ),
                        |failures| repair_prompt(prompt_convo, question, failures),
                        parse_stage1_fix,
                    )
                    .await;
            return repaired.map(|fix| Bootstrap {
                result: fix.result,
                executed_sql: fix.statement.sql,
                status: fix.payload,
            });
        }
        warn!(question_id = %question.id, "bootstrap parse retries exhausted");
        None
    }

    /// Stage 2: evolve the statement until convergence, budget exhaustion
    /// or a dead end.
    async fn evolve(
        &self,
        question: &Question,
        namespace: &str,
        mut checkpoint: GenerationCheckpoint,
    ) -> Result<GenerationOutcome> {
        loop {
            if checkpoint.step_counter >= self.ctx.config.max_total_steps {
                warn!(
                    question_id = %question.id,
                    step_counter = checkpoint.step_counter,
                    "step budget exhausted before convergence"
                );
                return Ok(GenerationOutcome::BudgetExceeded {
                    provisional_sql: checkpoint.provisional_sql,
                    step_counter: checkpoint.step_counter,
                });
            }

            let convo = checkpoint.conversation();
            let Some(status) = self.request_status(question, &convo).await else {
                return Ok(GenerationOutcome::Stage2Interrupted {
                    provisional_sql: checkpoint.provisional_sql,
                    step_counter: checkpoint.step_counter,
                });
            };

            if status.is_converged() {
                // The accepted statement goes through finalization like any
                // executed one, so the checkpoint and the artifact always
                // hold executable SQL.
                let sql = self
                    .ctx
                    .finalizer
                    .finalize(&status.sql, question.dialect)
                    .sql;
                checkpoint.latest_sql = sql.clone();
                checkpoint.provisional_sql = sql.clone();
                checkpoint.latest_delta =
                    vec![Turn::assistant(GenerationStatus::Stage2(status.clone()).render())];
                checkpoint.status = GenerationStatus::Stage2(status);
                self.store.save_generation(namespace, &checkpoint)?;
                info!(
                    question_id = %question.id,
                    step_counter = checkpoint.step_counter,
                    "generation converged"
                );
                return Ok(GenerationOutcome::Converged {
                    sql,
                    step_counter: checkpoint.step_counter,
                });
            }

            let finalized = self.ctx.finalizer.finalize(&status.sql, question.dialect);
            let outcome = self
                .ctx
                .executor
                .execute(question.dialect, &finalized.sql, &question.database)
                .await;

            let (status, result, executed_sql) = if outcome.is_ok() {
                let result = finalized.annotate_result(&outcome.payload);
                (status, result, finalized.sql)
            } else {
                let repaired: Option<RepairOutcome<Stage2Status>> =
                    RepairLoop::new(self.ctx, STAGE2_REPAIR_STEP)
                        .run(
                            question,
                            FailedAttempt::new(
                                GenerationStatus::Stage2(status).render(),
                                outcome.payload,
                            ),
                            |failures| repair_prompt(&convo, question, failures),
                            parse_stage2_fix,
                        )
                        .await;
                match repaired {
                    Some(fix) => (fix.payload, fix.result, fix.statement.sql),
                    None => {
                        return Ok(GenerationOutcome::Stage2Interrupted {
                            provisional_sql: checkpoint.provisional_sql,
                            step_counter: checkpoint.step_counter,
                        })
                    }
                }
            };

            checkpoint.step_counter += 1;
            checkpoint.latest_sql = status.sql.clone();
            checkpoint.provisional_sql = executed_sql;
            checkpoint.latest_delta = vec![
                Turn::assistant(GenerationStatus::Stage2(status.clone()).render()),
                Turn::user(format!(
                    "Execution result:\n{result}\n{}",
                    prompt::stage2(question.dialect)
                )),
            ];
            checkpoint.status = GenerationStatus::Stage2(status);
            self.store.save_generation(namespace, &checkpoint)?;
        }
    }

    /// One bounded-retry Stage-2 status request.
    async fn request_status(
        &self,
        question: &Question,
        convo: &Conversation,
    ) -> Option<Stage2Status> {
        for attempt in 1..=self.ctx.config.stage_parse_retries {
            let reply = self.ctx.llm.call(convo).await;
            match parse_stage2(&reply) {
                Ok(status) => {
                    self.log(
                        question,
                        STAGE2_STEP,
                        &reply,
                        Some(GenerationStatus::Stage2(status.clone()).to_value()),
                    );
                    return Some(status);
                }
                Err(e) => {
                    warn!(
                        question_id = %question.id,
                        attempt,
                        error = %e,
                        "unparseable evolution reply"
                    );
                    self.log(question, STAGE2_STEP, &reply, None);
                }
            }
        }
        warn!(question_id = %question.id, "evolution parse retries exhausted");
        None
    }

    fn log(&self, question: &Question, step: &str, reply: &LlmReply, status: Option<Value>) {
        self.ctx.status.log(StatusRecord::new(
            &question.id,
            step,
            false,
            reply.input_tokens,
            reply.output_tokens,
            status,
        ));
    }
}

/// Build a repair prompt: the conversation that produced the failing
/// status, then alternating (status, error + fix instruction) turns for
/// each failed attempt.
fn repair_prompt(
    base: &Conversation,
    question: &Question,
    failures: &[FailedAttempt],
) -> Conversation {
    let mut convo = base.clone();
    for (i, failure) in failures.iter().enumerate() {
        convo.push(Turn::assistant(failure.rendered.clone()));
        convo.push(Turn::user(format!(
            "{}\n{}",
            failure.error,
            prompt::repair_instruction(question.dialect, i > 0)
        )));
    }
    convo
}

fn parse_stage1(reply: &LlmReply) -> Result<Stage1Status> {
    if reply.is_transport_failure() {
        return Err(Error::NotFound("transport failure reply".to_string()));
    }
    Stage1Status::from_value(&extract_json(&reply.content)?)
}

fn parse_stage2(reply: &LlmReply) -> Result<Stage2Status> {
    if reply.is_transport_failure() {
        return Err(Error::NotFound("transport failure reply".to_string()));
    }
    Stage2Status::from_value(&extract_json(&reply.content)?)
}

fn parse_stage1_fix(reply: &LlmReply) -> Result<ParsedCorrection<Stage1Status>> {
    let status = parse_stage1(reply)?;
    Ok(ParsedCorrection {
        statement: status.sql.clone(),
        rendered: GenerationStatus::Stage1(status.clone()).render(),
        status: Some(GenerationStatus::Stage1(status.clone()).to_value()),
        payload: status,
    })
}

fn parse_stage2_fix(reply: &LlmReply) -> Result<ParsedCorrection<Stage2Status>> {
    let status = parse_stage2(reply)?;
    Ok(ParsedCorrection {
        statement: status.sql.clone(),
        rendered: GenerationStatus::Stage2(status.clone()).render(),
        status: Some(GenerationStatus::Stage2(status.clone()).to_value()),
        payload: status,
    })
}
