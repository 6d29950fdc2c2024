//! Durable per-question checkpoints.
//!
//! Each stage persists its output under a namespaced identifier so an
//! interrupted batch can resume without repeating finished work. Blobs are
//! JSON files in a flat directory, written atomically via a temp-file
//! rename.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::conversation::{Conversation, Turn};
use crate::error::Result;
use crate::explore::ExplorationTranscript;
use crate::status::GenerationStatus;

/// Snapshot of a generation state machine, taken after each accepted
/// Stage-2 status and final at convergence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationCheckpoint {
    /// The conversation up to and including the Stage-1 exchange
    pub initial_conversation: Conversation,
    /// The delta produced by the latest accepted step, ending with the
    /// prompt turn for the next one
    pub latest_delta: Vec<Turn>,
    /// The latest accepted status
    pub status: GenerationStatus,
    /// SQL of the latest accepted status
    pub latest_sql: String,
    /// SQL of the latest step whose execution result was acceptable
    pub provisional_sql: String,
    /// Steps consumed from the budget so far
    pub step_counter: u32,
}

impl GenerationCheckpoint {
    /// Whether this snapshot is terminal.
    pub fn is_converged(&self) -> bool {
        self.status.is_converged()
    }

    /// The conversation to resume Stage 2 from.
    pub fn conversation(&self) -> Conversation {
        self.initial_conversation.with_delta(&self.latest_delta)
    }
}

/// Flat directory of id-keyed JSON checkpoint blobs.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Open (creating if needed) a store rooted at the given directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The store's root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load_exploration(&self, id: &str) -> Result<Option<ExplorationTranscript>> {
        self.load(id, "exploration")
    }

    pub fn save_exploration(&self, id: &str, transcript: &ExplorationTranscript) -> Result<()> {
        self.save(id, "exploration", transcript)
    }

    pub fn load_aggregation(&self, id: &str) -> Result<Option<String>> {
        self.load(id, "aggregation")
    }

    pub fn save_aggregation(&self, id: &str, summary: &str) -> Result<()> {
        self.save(id, "aggregation", &summary)
    }

    pub fn load_generation(&self, id: &str) -> Result<Option<GenerationCheckpoint>> {
        self.load(id, "generation")
    }

    pub fn save_generation(&self, id: &str, checkpoint: &GenerationCheckpoint) -> Result<()> {
        self.save(id, "generation", checkpoint)
    }

    fn path(&self, id: &str, kind: &str) -> PathBuf {
        self.dir.join(format!("{id}_{kind}.json"))
    }

    fn load<T: DeserializeOwned>(&self, id: &str, kind: &str) -> Result<Option<T>> {
        let path = self.path(id, kind);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "loaded checkpoint");
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save<T: Serialize + ?Sized>(&self, id: &str, kind: &str, value: &T) -> Result<()> {
        let path = self.path(id, kind);
        let tmp = self.dir.join(format!(".{id}_{kind}.json.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), "saved checkpoint");
        Ok(())
    }
}
