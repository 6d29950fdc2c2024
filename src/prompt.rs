//! Prompt construction helpers.
//!
//! Wording quality is not this crate's concern; these helpers exist so the
//! stages are runnable and testable, and so the dialect-specific repair
//! guidance is applied consistently.

use crate::question::{Dialect, Question};

/// Prompt for the open-ended schema exploration proposal.
pub fn exploration(question: &Question) -> String {
    format!(
        "You are exploring a {dialect} database to answer a question.\n\
         {input}\
         [Schema]\n{schema}\n\
         Propose a set of probe SQL statements that inspect tables, columns \
         and value distributions relevant to the question. Return them as a \
         JSON object mapping a short name for each probe to its SQL string, \
         wrapped in a ```json``` block.",
        dialect = question.dialect,
        input = question.user_input(),
        schema = question.schema,
    )
}

/// Prompt asking the model to fix one failing probe statement. The caller
/// prepends the accumulated failure transcript.
pub fn probe_fix(question: &Question) -> String {
    format!(
        "Fix the failing {dialect} SQL statement above using the error \
         message and this schema:\n{schema}\n\
         Return a JSON object with a single key mapping to the corrected \
         SQL, wrapped in a ```json``` block.",
        dialect = question.dialect,
        schema = question.schema,
    )
}

/// Prompt for condensing an exploration transcript.
pub fn aggregation(question: &Question, transcript: &str) -> String {
    format!(
        "{input}\
         [Schema]\n{schema}\n\
         [Database Exploration]\n{transcript}\n\
         Summarize the information from the exploration that is useful for \
         answering the question. Wrap your summary in <answer></answer> tags.",
        input = question.user_input(),
        schema = question.schema,
        transcript = transcript,
    )
}

/// Prompt for the Stage-1 bootstrap request.
pub fn stage1(question: &Question, aggregated: &str) -> String {
    format!(
        "{input}\
         [Schema]\n{schema}\n\
         [Aggregated Information]\n{aggregated}\n\
         Decompose the question and write {dialect} SQL for the first \
         sub-question. Respond with a JSON object containing exactly the \
         keys \"sql\" and \"solved_subquestions_list\", wrapped in a \
         ```json``` block.",
        input = question.user_input(),
        schema = question.schema,
        aggregated = aggregated,
        dialect = question.dialect,
    )
}

/// Follow-up instruction for a Stage-2 evolution request. Appended after
/// each execution result; the schema and question already ride in the
/// bootstrap prompt at the head of the conversation.
pub fn stage2(dialect: Dialect) -> String {
    format!(
        "Judge whether this result answers the question, then evolve the \
         {dialect} SQL toward the final answer. Respond with a JSON object \
         containing exactly the keys \"result_acceptable\", \
         \"current_state\", \"sql\" and \"solved_subquestions_list\", where \
         \"current_state\" is one of \"extend\", \"revise\", \"rephrase\" or \
         \"explore\", wrapped in a ```json``` block.",
    )
}

/// Dialect-aware repair instruction appended after an execution error.
pub fn repair_instruction(dialect: Dialect, again: bool) -> String {
    let mut out = String::from("\nPlease analyze and fix the current ");
    out.push_str(&dialect.to_string());
    out.push_str(" SQL error");
    if again {
        out.push_str(" again");
    }
    match dialect {
        Dialect::Snowflake => out.push_str(
            ", and note that in certain cases, some columns in the current \
             database do not support the use of double quotes. Please detect \
             and handle such situations",
        ),
        Dialect::Bigquery => out.push_str(
            ", and pay close attention to BigQuery's quoting rules: use \
             backticks (`` ` ``) for identifiers (like `project.dataset.table`) \
             and single/double quotes (' or \") for string values. Misusing \
             quotes is a very common error",
        ),
        Dialect::Sqlite => {}
    }
    out.push_str(
        ", and return the corrected SQL in the same Markdown JSON format \
         (including the key names) with ```json```.",
    );
    out
}
