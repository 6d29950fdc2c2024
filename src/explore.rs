//! Schema exploration stage.
//!
//! Asks the model for a batch of probe statements, executes each one, and
//! collects the passing probes into a transcript of (statement, result)
//! pairs. Failing probes go through the repair loop; probes that exhaust it
//! are dropped. The stage itself never fails hard: if no parseable proposal
//! arrives within the retry bound, the transcript is simply empty and the
//! workflow carries on without exploration context.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::context::StageContext;
use crate::conversation::{Conversation, Turn};
use crate::error::{Error, Result};
use crate::extract::extract_json;
use crate::llm::LlmReply;
use crate::prompt;
use crate::question::Question;
use crate::repair::{FailedAttempt, ParsedCorrection, RepairLoop};
use crate::telemetry::StatusRecord;

const STEP: &str = "Exploration Stage";
const REPAIR_STEP: &str = "Exploration Repair Stage";

/// Transcript of executed probes: a user turn carrying the statement, an
/// assistant turn carrying its rendered result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExplorationTranscript {
    pub turns: Vec<Turn>,
}

impl ExplorationTranscript {
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Record one passing probe.
    pub fn record(&mut self, statement: &str, result: &str) {
        self.turns.push(Turn::user(statement));
        self.turns
            .push(Turn::assistant(format!("Execution result:\n{result}")));
    }

    /// Render the transcript as text for the aggregation prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for turn in &self.turns {
            out.push_str(&format!("[{}]\n{}\n", turn.role, turn.content));
        }
        out
    }
}

/// The exploration stage runner.
pub struct ExplorationStage<'a> {
    ctx: &'a StageContext,
}

impl<'a> ExplorationStage<'a> {
    pub fn new(ctx: &'a StageContext) -> Self {
        Self { ctx }
    }

    /// Run exploration for one question.
    pub async fn run(&self, question: &Question) -> ExplorationTranscript {
        let prompt_convo =
            Conversation::new().with_turn(Turn::user(prompt::exploration(question)));

        for attempt in 1..=self.ctx.config.exploration_parse_retries {
            let reply = self.ctx.llm.call(&prompt_convo).await;
            let probes = match parse_probes(&reply) {
                Ok(probes) => probes,
                Err(e) => {
                    warn!(
                        question_id = %question.id,
                        attempt,
                        error = %e,
                        "unparseable exploration proposal"
                    );
                    self.log(question, &reply, None);
                    continue;
                }
            };

            self.log(
                question,
                &reply,
                Some(Value::Object(
                    probes
                        .iter()
                        .map(|(name, sql)| (name.clone(), Value::String(sql.clone())))
                        .collect(),
                )),
            );

            let mut transcript = ExplorationTranscript::default();
            for (name, statement) in &probes {
                self.run_probe(question, name, statement, &mut transcript)
                    .await;
            }
            info!(
                question_id = %question.id,
                probes = probes.len(),
                kept = transcript.turns.len() / 2,
                "exploration complete"
            );
            return transcript;
        }

        warn!(
            question_id = %question.id,
            "exploration proposal retries exhausted, continuing without exploration"
        );
        ExplorationTranscript::default()
    }

    /// Execute one probe, repairing it on failure. Probes whose repair
    /// exhausts are dropped.
    async fn run_probe(
        &self,
        question: &Question,
        name: &str,
        statement: &str,
        transcript: &mut ExplorationTranscript,
    ) {
        let finalized = self.ctx.finalizer.finalize(statement, question.dialect);
        let outcome = self
            .ctx
            .executor
            .execute(question.dialect, &finalized.sql, &question.database)
            .await;

        if outcome.is_ok() {
            transcript.record(&finalized.sql, &finalized.annotate_result(&outcome.payload));
            return;
        }

        let repair = RepairLoop::new(self.ctx, REPAIR_STEP);
        let repaired = repair
            .run(
                question,
                FailedAttempt::new(&finalized.sql, &outcome.payload),
                |failures| fix_prompt(question, failures),
                parse_fix,
            )
            .await;

        match repaired {
            Some(fix) => transcript.record(&fix.statement.sql, &fix.result),
            None => warn!(
                question_id = %question.id,
                probe = name,
                "probe repair exhausted, dropping probe"
            ),
        }
    }

    fn log(&self, question: &Question, reply: &LlmReply, status: Option<Value>) {
        self.ctx.status.log(StatusRecord::new(
            &question.id,
            STEP,
            false,
            reply.input_tokens,
            reply.output_tokens,
            status,
        ));
    }
}

/// Parse a proposal reply into named probe statements. Non-string values
/// are ignored; an object with no SQL strings at all is a schema mismatch.
fn parse_probes(reply: &LlmReply) -> Result<Vec<(String, String)>> {
    if reply.is_transport_failure() {
        return Err(Error::NotFound("transport failure reply".to_string()));
    }
    let value = extract_json(&reply.content)?;
    let Value::Object(map) = value else {
        return Err(Error::schema_mismatch("proposal is not a JSON object"));
    };
    let probes: Vec<(String, String)> = map
        .into_iter()
        .filter_map(|(name, v)| match v {
            Value::String(sql) => Some((name, sql)),
            _ => None,
        })
        .collect();
    if probes.is_empty() {
        return Err(Error::schema_mismatch(
            "proposal object carries no SQL strings",
        ));
    }
    Ok(probes)
}

/// Build the repair prompt from the accumulated probe failures.
fn fix_prompt(question: &Question, failures: &[FailedAttempt]) -> Conversation {
    let mut accumulated = format!(
        "Original SQL:\n{}\nError Message:\n{}\n",
        failures[0].rendered, failures[0].error
    );
    for (i, failure) in failures.iter().enumerate().skip(1) {
        accumulated.push_str(&format!(
            "\nFixed SQL attempt {i}:\n{}\nError Message:\n{}\n",
            failure.rendered, failure.error
        ));
    }
    Conversation::new().with_turn(Turn::user(format!(
        "{accumulated}\n{}",
        prompt::probe_fix(question)
    )))
}

/// Parse a probe-fix reply: a JSON object whose first string value is the
/// corrected statement.
fn parse_fix(reply: &LlmReply) -> Result<ParsedCorrection<()>> {
    if reply.is_transport_failure() {
        return Err(Error::NotFound("transport failure reply".to_string()));
    }
    let value = extract_json(&reply.content)?;
    let Value::Object(map) = value else {
        return Err(Error::schema_mismatch("fix reply is not a JSON object"));
    };
    let sql = map
        .into_iter()
        .find_map(|(_, v)| match v {
            Value::String(s) => Some(s),
            _ => None,
        })
        .ok_or_else(|| Error::schema_mismatch("fix reply carries no SQL string"))?;
    Ok(ParsedCorrection {
        payload: (),
        statement: sql.clone(),
        rendered: sql,
        status: None,
    })
}
