//! Database execution and statement finalization collaborators.
//!
//! Execution never raises: failure is a value carried in
//! [`ExecutionResult`], which is what lets the repair loop treat errors as
//! prompt material rather than control-flow exceptions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::question::Dialect;

/// Note appended to a rendered result when the executed statement was an
/// expansion of an abbreviated one. Cosmetic; carries no control-flow
/// weight.
pub const ABBREVIATION_NOTE: &str = "\n*The SQL remains in an abbreviated form, but the returned answer is generated from the full version of the SQL.";

/// Outcome status of a statement execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Ok,
    Error,
}

/// Result of executing a statement: rendered tabular text on success, an
/// error description on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Execution status
    pub status: ExecutionStatus,
    /// Rendered tabular output, or the error message
    pub payload: String,
}

impl ExecutionResult {
    /// Create a successful result.
    pub fn ok(payload: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Ok,
            payload: payload.into(),
        }
    }

    /// Create a failed result.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Error,
            payload: message.into(),
        }
    }

    /// Whether the execution succeeded.
    pub fn is_ok(&self) -> bool {
        self.status == ExecutionStatus::Ok
    }
}

/// A statement after finalization, ready for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedStatement {
    /// Executable SQL text
    pub sql: String,
    /// Whether the input was abbreviated and had to be expanded
    pub was_abbreviated: bool,
}

impl FinalizedStatement {
    /// Render an execution payload, appending the abbreviation note when
    /// the executed statement was an expansion.
    pub fn annotate_result(&self, payload: &str) -> String {
        if self.was_abbreviated {
            format!("{payload}{ABBREVIATION_NOTE}")
        } else {
            payload.to_string()
        }
    }
}

/// Dialect-aware statement runner.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Execute a statement against the named connection. Failure is a
    /// value; this call does not error.
    async fn execute(&self, dialect: Dialect, statement: &str, connection: &str)
        -> ExecutionResult;
}

/// Expands an abbreviated statement into an executable one.
pub trait StatementFinalizer: Send + Sync {
    /// Finalize a statement, reporting whether expansion was needed.
    fn finalize(&self, statement: &str, dialect: Dialect) -> FinalizedStatement;
}

/// Pass-through finalizer: treats every statement as already full.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityFinalizer;

impl StatementFinalizer for IdentityFinalizer {
    fn finalize(&self, statement: &str, _dialect: Dialect) -> FinalizedStatement {
        FinalizedStatement {
            sql: statement.to_string(),
            was_abbreviated: false,
        }
    }
}
