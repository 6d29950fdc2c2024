//! # nl2sql-core
//!
//! An LLM-driven text-to-SQL engine: exploration, aggregation, and a
//! two-stage iterative generation state machine with execution-guided
//! repair, durable checkpoints and idempotent batch execution.
//!
//! ## Core Components
//!
//! - **Explore**: probe the database schema and collect execution evidence
//! - **Aggregate**: condense the exploration transcript into a summary
//! - **Generate**: bootstrap a statement, then evolve it step by step until
//!   the model accepts its own result
//! - **Runner**: fan a batch of questions out over a bounded worker pool
//!
//! ## Example
//!
//! ```rust,ignore
//! use nl2sql_core::{
//!     CheckpointStore, LlmCaller, LlmSettings, OpenAiCompatClient, Question,
//!     QuestionWorkflow, RunConfig, StageContext,
//! };
//!
//! let settings = LlmSettings::from_file("llm.json")?;
//! let transport = std::sync::Arc::new(OpenAiCompatClient::new(settings.clone())?);
//! let ctx = StageContext::new(
//!     LlmCaller::new(transport, settings),
//!     executor,
//!     finalizer,
//!     status_sink,
//!     RunConfig::new("work"),
//! );
//! let store = std::sync::Arc::new(CheckpointStore::open("work/checkpoints")?);
//!
//! let report = QuestionWorkflow::new(ctx, store).run(&question, "q1_0").await?;
//! println!("{}", report.final_sql);
//! ```

pub mod aggregate;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod conversation;
pub mod database;
pub mod error;
pub mod explore;
pub mod extract;
pub mod generate;
pub mod llm;
pub mod prompt;
pub mod question;
pub mod repair;
pub mod runner;
pub mod status;
pub mod telemetry;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use aggregate::AggregationStage;
pub use checkpoint::{CheckpointStore, GenerationCheckpoint};
pub use config::{LlmSettings, RunConfig};
pub use context::StageContext;
pub use conversation::{Conversation, Role, Turn};
pub use database::{
    ExecutionResult, ExecutionStatus, FinalizedStatement, IdentityFinalizer, SqlExecutor,
    StatementFinalizer, ABBREVIATION_NOTE,
};
pub use error::{Error, Result};
pub use explore::{ExplorationStage, ExplorationTranscript};
pub use extract::{extract_json, extract_tagged, repair_json};
pub use generate::{GenerationOutcome, SqlGenerator};
pub use llm::{
    LlmCaller, LlmReply, LlmRequest, LlmTransport, OpenAiCompatClient,
    TRANSPORT_FAILURE_SENTINEL,
};
pub use question::{Dialect, Question};
pub use repair::{FailedAttempt, ParsedCorrection, RepairLoop, RepairOutcome};
pub use runner::{ResultSink, TaskRunner};
pub use status::{EvolutionState, GenerationStatus, Stage1Status, Stage2Status};
pub use telemetry::{JsonlStatusSink, MemoryStatusSink, StatusRecord, StatusSink};
pub use workflow::{QuestionReport, QuestionWorkflow, GENERATION_FAILED};
