//! Question and dialect types.

use serde::{Deserialize, Serialize};

/// SQL dialect tag for the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    Bigquery,
    #[serde(rename = "snow")]
    Snowflake,
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite => write!(f, "sqlite"),
            Self::Bigquery => write!(f, "bigquery"),
            Self::Snowflake => write!(f, "snow"),
        }
    }
}

/// A natural-language question against a target database.
///
/// Immutable once constructed; each question's workflow owns its own
/// conversation, step budget and checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// Stable instance identifier
    pub id: String,
    /// The natural-language question text
    pub question: String,
    /// Optional evidence text accompanying the question
    pub evidence: Option<String>,
    /// Schema representation handed to the model
    pub schema: String,
    /// Database/connection identifier for the execution adapter
    pub database: String,
    /// SQL dialect of the target database
    pub dialect: Dialect,
}

impl Question {
    /// Create a question without evidence.
    pub fn new(
        id: impl Into<String>,
        question: impl Into<String>,
        schema: impl Into<String>,
        database: impl Into<String>,
        dialect: Dialect,
    ) -> Self {
        Self {
            id: id.into(),
            question: question.into(),
            evidence: None,
            schema: schema.into(),
            database: database.into(),
            dialect,
        }
    }

    /// Attach evidence text.
    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }

    /// Build the user-facing input block, with evidence when present.
    pub fn user_input(&self) -> String {
        match &self.evidence {
            Some(evidence) => format!(
                "[Evidence]\n{}\n[Question]\n{}\n",
                evidence, self.question
            ),
            None => format!("[Question]\n{}\n", self.question),
        }
    }
}
