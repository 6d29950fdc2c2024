//! Batch execution of question workflows.
//!
//! The runner fans tasks out over a bounded worker pool, one task per
//! (question, run) pair, and appends each finished report to a shared
//! result file. Task identity is the namespace `{question_id}_{run}`:
//! namespaces already present in the result file are skipped, which makes
//! a restarted batch idempotent on top of the per-phase checkpoints.

use futures::future::join_all;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, info_span, warn, Instrument};

use crate::checkpoint::CheckpointStore;
use crate::context::StageContext;
use crate::error::Result;
use crate::question::Question;
use crate::workflow::{QuestionReport, QuestionWorkflow};

/// Shared result file: a single JSON array, rewritten in full under a lock
/// after every finished task.
pub struct ResultSink {
    path: PathBuf,
    reports: Mutex<Vec<QuestionReport>>,
}

impl ResultSink {
    /// Open a sink, loading any reports a previous run left behind.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let reports = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            reports: Mutex::new(reports),
        })
    }

    /// Namespaces already recorded.
    pub async fn completed(&self) -> HashSet<String> {
        self.reports
            .lock()
            .await
            .iter()
            .map(|r| r.instance_id.clone())
            .collect()
    }

    /// Snapshot of all recorded reports.
    pub async fn reports(&self) -> Vec<QuestionReport> {
        self.reports.lock().await.clone()
    }

    /// Append one report and rewrite the file. The lock is held across the
    /// write so concurrent tasks never interleave partial arrays.
    pub async fn record(&self, report: QuestionReport) -> Result<()> {
        let mut reports = self.reports.lock().await;
        reports.push(report);
        let raw = serde_json::to_vec_pretty(&*reports)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }
}

/// Bounded-concurrency runner over a batch of questions.
pub struct TaskRunner {
    ctx: StageContext,
    store: Arc<CheckpointStore>,
    sink: Arc<ResultSink>,
}

struct Task {
    question: Question,
    run: u32,
    namespace: String,
}

impl TaskRunner {
    pub fn new(ctx: StageContext, store: Arc<CheckpointStore>, sink: Arc<ResultSink>) -> Self {
        Self { ctx, store, sink }
    }

    /// Process the batch to completion and return everything the result
    /// file now holds.
    ///
    /// The runner loops until no pending task remains, waiting once for
    /// `wait_before_exit` before concluding there is nothing left — a
    /// grace period for sibling processes still filling the result file.
    /// A task that fails at the workflow boundary is logged and not
    /// retried within this invocation.
    pub async fn run(&self, questions: &[Question]) -> Result<Vec<QuestionReport>> {
        let mut attempted: HashSet<String> = HashSet::new();
        let mut waited = false;

        loop {
            let completed = self.sink.completed().await;
            let pending: Vec<Task> = (0..self.ctx.config.runs)
                .flat_map(|run| {
                    questions.iter().map(move |q| Task {
                        question: q.clone(),
                        run,
                        namespace: format!("{}_{run}", q.id),
                    })
                })
                .filter(|t| !completed.contains(&t.namespace) && !attempted.contains(&t.namespace))
                .collect();

            if pending.is_empty() {
                if !waited {
                    waited = true;
                    tokio::time::sleep(self.ctx.config.wait_before_exit).await;
                    continue;
                }
                break;
            }

            info!(tasks = pending.len(), "processing pending tasks");
            for task in &pending {
                attempted.insert(task.namespace.clone());
            }
            self.process(pending).await;
        }

        Ok(self.sink.reports().await)
    }

    async fn process(&self, tasks: Vec<Task>) {
        let semaphore = Arc::new(Semaphore::new(self.ctx.config.max_parallel));
        let jobs = tasks.into_iter().map(|task| {
            let semaphore = semaphore.clone();
            let workflow = QuestionWorkflow::new(self.ctx.clone(), self.store.clone());
            let sink = self.sink.clone();
            let span = info_span!("task", question_id = %task.question.id, run = task.run);
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                match workflow.run(&task.question, &task.namespace).await {
                    Ok(report) => {
                        if let Err(e) = sink.record(report).await {
                            warn!(namespace = %task.namespace, error = %e, "failed to record report");
                        }
                    }
                    Err(e) => {
                        warn!(namespace = %task.namespace, error = %e, "task failed");
                    }
                }
            }
            .instrument(span)
        });
        join_all(jobs).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LlmSettings, RunConfig};
    use crate::database::{ExecutionResult, IdentityFinalizer};
    use crate::llm::{LlmCaller, LlmReply};
    use crate::question::Dialect;
    use crate::telemetry::MemoryStatusSink;
    use crate::testing::{ScriptedExecutor, ScriptedTransport};
    use crate::workflow::GENERATION_FAILED;
    use pretty_assertions::assert_eq;

    fn context(
        replies: Vec<LlmReply>,
        results: Vec<ExecutionResult>,
        config: RunConfig,
    ) -> (StageContext, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::with_replies(replies));
        let ctx = StageContext::new(
            LlmCaller::new(
                transport.clone(),
                LlmSettings::new("https://api", "k", "m").with_max_retries(1),
            ),
            Arc::new(ScriptedExecutor::with_results(results)),
            Arc::new(IdentityFinalizer),
            Arc::new(MemoryStatusSink::new()),
            config.with_max_parallel(1),
        );
        (ctx, transport)
    }

    fn question(id: &str) -> Question {
        Question::new(id, "How many?", "CREATE TABLE t (a INT)", "db1", Dialect::Sqlite)
    }

    /// Replies driving one question through all three phases to
    /// convergence.
    fn solved_question_replies(sql: &str) -> Vec<LlmReply> {
        vec![
            LlmReply::new("```json\n{\"probe\": \"SELECT COUNT(*) FROM t\"}\n```"),
            LlmReply::new("<answer>t is small.</answer>"),
            LlmReply::new(format!(
                "```json\n{{\"sql\": \"{sql}\", \"solved_subquestions_list\": []}}\n```"
            )),
            LlmReply::new(format!(
                "```json\n{{\"result_acceptable\": true, \"current_state\": \"rephrase\", \
                 \"sql\": \"{sql}\", \"solved_subquestions_list\": []}}\n```"
            )),
        ]
    }

    #[tokio::test]
    async fn test_batch_writes_result_file() {
        let dir = tempfile::tempdir().unwrap();
        let result_path = dir.path().join("results.json");

        let mut replies = solved_question_replies("SELECT 1");
        replies.extend(solved_question_replies("SELECT 2"));
        let results = (0..4).map(|_| ExecutionResult::ok("rows")).collect();
        let (ctx, _) = context(replies, results, RunConfig::default());

        let store = Arc::new(CheckpointStore::open(dir.path().join("ckpt")).unwrap());
        let sink = Arc::new(ResultSink::open(&result_path).await.unwrap());
        let runner = TaskRunner::new(ctx, store, sink);

        let reports = runner
            .run(&[question("q1"), question("q2")])
            .await
            .unwrap();

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.has_sql()));

        // The file holds the same array.
        let raw = std::fs::read_to_string(&result_path).unwrap();
        let on_disk: Vec<QuestionReport> = serde_json::from_str(&raw).unwrap();
        assert_eq!(on_disk, reports);
        assert!(raw.contains("temp_SQL"));
        assert!(raw.contains("final_SQL"));
        assert!(raw.contains("Step_counter"));
    }

    #[tokio::test]
    async fn test_recorded_tasks_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let result_path = dir.path().join("results.json");

        // q1_0 is already in the result file; only q2_0 needs work.
        std::fs::write(
            &result_path,
            serde_json::to_vec_pretty(&vec![QuestionReport {
                instance_id: "q1_0".into(),
                provisional_sql: "SELECT 1".into(),
                final_sql: "SELECT 1".into(),
                step_counter: 1,
            }])
            .unwrap(),
        )
        .unwrap();

        // q2 executes twice: its exploration probe and its Stage-1 statement.
        let (ctx, transport) = context(
            solved_question_replies("SELECT 2"),
            vec![ExecutionResult::ok("rows"), ExecutionResult::ok("rows")],
            RunConfig::default(),
        );
        let store = Arc::new(CheckpointStore::open(dir.path().join("ckpt")).unwrap());
        let sink = Arc::new(ResultSink::open(&result_path).await.unwrap());
        let runner = TaskRunner::new(ctx, store, sink);

        let reports = runner
            .run(&[question("q1"), question("q2")])
            .await
            .unwrap();

        assert_eq!(reports.len(), 2);
        // Four calls drive q2 through its phases; q1 used none.
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test]
    async fn test_multiple_runs_get_distinct_namespaces() {
        let dir = tempfile::tempdir().unwrap();
        let mut replies = solved_question_replies("SELECT 1");
        replies.extend(solved_question_replies("SELECT 1"));
        let results = (0..4).map(|_| ExecutionResult::ok("rows")).collect();
        let (ctx, _) = context(replies, results, RunConfig::default().with_runs(2));

        let store = Arc::new(CheckpointStore::open(dir.path().join("ckpt")).unwrap());
        let sink = Arc::new(
            ResultSink::open(dir.path().join("results.json"))
                .await
                .unwrap(),
        );
        let runner = TaskRunner::new(ctx, store, sink);

        let mut reports = runner.run(&[question("q1")]).await.unwrap();
        reports.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));

        let ids: Vec<&str> = reports.iter().map(|r| r.instance_id.as_str()).collect();
        assert_eq!(ids, vec!["q1_0", "q1_1"]);
    }

    #[tokio::test]
    async fn test_failed_task_is_not_recorded_or_retried() {
        let dir = tempfile::tempdir().unwrap();
        // Exploration parse retries (5), then aggregation attempts (3):
        // the workflow errors out of aggregation.
        let replies = (0..8).map(|_| LlmReply::new("garbage")).collect();
        let (ctx, transport) = context(replies, vec![], RunConfig::default());

        let store = Arc::new(CheckpointStore::open(dir.path().join("ckpt")).unwrap());
        let sink = Arc::new(
            ResultSink::open(dir.path().join("results.json"))
                .await
                .unwrap(),
        );
        let runner = TaskRunner::new(ctx, store, sink);

        let reports = runner.run(&[question("q1")]).await.unwrap();
        assert!(reports.is_empty());
        // Exactly one pass over the task, no retry loop.
        assert_eq!(transport.calls(), 8);
    }

    #[tokio::test]
    async fn test_sink_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");

        let sink = ResultSink::open(&path).await.unwrap();
        sink.record(QuestionReport {
            instance_id: "q1_0".into(),
            provisional_sql: "SELECT 1".into(),
            final_sql: GENERATION_FAILED.into(),
            step_counter: 3,
        })
        .await
        .unwrap();

        let reopened = ResultSink::open(&path).await.unwrap();
        let completed = reopened.completed().await;
        assert!(completed.contains("q1_0"));
        assert_eq!(reopened.reports().await[0].step_counter, 3);
    }
}
