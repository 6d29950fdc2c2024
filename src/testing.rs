//! Scripted test doubles shared by the unit tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::database::{ExecutionResult, SqlExecutor};
use crate::error::{Error, Result};
use crate::llm::{LlmReply, LlmRequest, LlmTransport};
use crate::question::Dialect;

/// Transport that plays back a fixed script of replies in order.
///
/// Once the script is exhausted every further call errors, so an empty
/// script makes the caller degrade to the sentinel reply.
pub struct ScriptedTransport {
    replies: Mutex<std::vec::IntoIter<LlmReply>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn with_replies(replies: Vec<LlmReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `complete` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmTransport for ScriptedTransport {
    async fn complete(&self, _request: &LlmRequest) -> Result<LlmReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .expect("script lock poisoned")
            .next()
            .ok_or_else(|| Error::Transport("scripted transport exhausted".to_string()))
    }
}

/// Executor that plays back a fixed script of execution results in order.
///
/// Records every executed statement. Once the script is exhausted every
/// further execution fails.
pub struct ScriptedExecutor {
    results: Mutex<std::vec::IntoIter<ExecutionResult>>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn with_results(results: Vec<ExecutionResult>) -> Self {
        Self {
            results: Mutex::new(results.into_iter()),
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Statements executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().expect("executor lock poisoned").clone()
    }
}

#[async_trait]
impl SqlExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        _dialect: Dialect,
        statement: &str,
        _connection: &str,
    ) -> ExecutionResult {
        self.executed
            .lock()
            .expect("executor lock poisoned")
            .push(statement.to_string());
        self.results
            .lock()
            .expect("executor lock poisoned")
            .next()
            .unwrap_or_else(|| ExecutionResult::error("scripted executor exhausted"))
    }
}
