//! Shared collaborators handed to every stage.

use std::sync::Arc;

use crate::config::RunConfig;
use crate::database::{SqlExecutor, StatementFinalizer};
use crate::llm::LlmCaller;
use crate::telemetry::StatusSink;

/// The collaborators a stage needs: the retrying LLM caller, the database
/// adapters, the status sink and the run configuration.
///
/// Cheap to clone; the adapters are shared behind [`Arc`].
#[derive(Clone)]
pub struct StageContext {
    /// Retrying LLM caller
    pub llm: LlmCaller,
    /// Dialect-aware statement runner
    pub executor: Arc<dyn SqlExecutor>,
    /// Abbreviated-statement expander
    pub finalizer: Arc<dyn StatementFinalizer>,
    /// Telemetry sink
    pub status: Arc<dyn StatusSink>,
    /// Retry bounds and budgets
    pub config: RunConfig,
}

impl StageContext {
    pub fn new(
        llm: LlmCaller,
        executor: Arc<dyn SqlExecutor>,
        finalizer: Arc<dyn StatementFinalizer>,
        status: Arc<dyn StatusSink>,
        config: RunConfig,
    ) -> Self {
        Self {
            llm,
            executor,
            finalizer,
            status,
            config,
        }
    }
}
