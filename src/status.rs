//! Structured generation-status responses.
//!
//! Each generation stage expects a response whose key set matches exactly
//! one fixed schema. Anything else — an extra key, a missing key, or an
//! out-of-enum `current_state` — is a schema mismatch and triggers a
//! whole-attempt retry of the stage, never the statement repair loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Stage-2 evolution state. Matching is case-insensitive on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EvolutionState {
    /// Extend the current statement with the next sub-question
    Extend,
    /// Revise the current statement
    Revise,
    /// Rephrase the final answer (terminal when the result is acceptable)
    Rephrase,
    /// Explore the schema further
    Explore,
}

impl FromStr for EvolutionState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "extend" => Ok(Self::Extend),
            "revise" => Ok(Self::Revise),
            "rephrase" => Ok(Self::Rephrase),
            "explore" => Ok(Self::Explore),
            other => Err(Error::schema_mismatch(format!(
                "current_state '{other}' is not one of extend/revise/rephrase/explore"
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for EvolutionState {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for EvolutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Extend => write!(f, "extend"),
            Self::Revise => write!(f, "revise"),
            Self::Rephrase => write!(f, "rephrase"),
            Self::Explore => write!(f, "explore"),
        }
    }
}

/// Stage-1 (bootstrap) response: exactly `{sql, solved_subquestions_list}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stage1Status {
    /// The candidate SQL statement
    pub sql: String,
    /// Sub-questions the model considers solved so far
    #[serde(rename = "solved_subquestions_list")]
    pub solved_subquestions: Vec<Value>,
}

impl Stage1Status {
    /// Validate a parsed response against the Stage-1 schema.
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| Error::schema_mismatch(format!("stage-1 keys {}: {e}", key_set(value))))
    }
}

/// Stage-2 (iterative evolution) response: exactly
/// `{result_acceptable, current_state, sql, solved_subquestions_list}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stage2Status {
    /// Whether the model judges the latest execution result acceptable
    pub result_acceptable: bool,
    /// The evolution action the model chose for this iteration
    pub current_state: EvolutionState,
    /// The candidate SQL statement
    pub sql: String,
    /// Sub-questions the model considers solved so far
    #[serde(rename = "solved_subquestions_list")]
    pub solved_subquestions: Vec<Value>,
}

impl Stage2Status {
    /// Validate a parsed response against the Stage-2 schema.
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| Error::schema_mismatch(format!("stage-2 keys {}: {e}", key_set(value))))
    }

    /// Stage-2 terminal condition: the result is acceptable and the model
    /// has moved to rephrasing.
    pub fn is_converged(&self) -> bool {
        self.result_acceptable && self.current_state == EvolutionState::Rephrase
    }
}

/// A validated generation-status response from either stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GenerationStatus {
    Stage2(Stage2Status),
    Stage1(Stage1Status),
}

impl GenerationStatus {
    /// The SQL statement carried by the status.
    pub fn sql(&self) -> &str {
        match self {
            Self::Stage1(s) => &s.sql,
            Self::Stage2(s) => &s.sql,
        }
    }

    /// Render the status for embedding in a conversation turn.
    pub fn render(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// The status as a JSON value, for telemetry records.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Whether the status satisfies the Stage-2 terminal condition. A
    /// Stage-1 status is never terminal.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Stage2(s) if s.is_converged())
    }
}

impl From<Stage1Status> for GenerationStatus {
    fn from(s: Stage1Status) -> Self {
        Self::Stage1(s)
    }
}

impl From<Stage2Status> for GenerationStatus {
    fn from(s: Stage2Status) -> Self {
        Self::Stage2(s)
    }
}

fn key_set(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            format!("{{{}}}", keys.join(", "))
        }
        other => format!("(not an object: {other})"),
    }
}
