//! Cross-run knowledge: previously evaluated points kept between runs.
//!
//! A repository is injected into the orchestrator; nothing is persisted
//! unless one is supplied. Loaded rows only enrich surrogate training data
//! and never count as evaluations of the current run.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use scout_types::{sentinel, Candidate, Record, ScoutError, ScoutResult, SearchSpace};

use crate::surrogate::TrainingRow;

pub const DEFAULT_MAX_ROWS: usize = 5000;

/// One remembered evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRow {
    pub x: Candidate,
    pub feasible: bool,
    #[serde(with = "sentinel::score")]
    pub score: f64,
    #[serde(with = "sentinel::violation")]
    pub violation: f64,
    #[serde(default, with = "sentinel::optional")]
    pub min_margin: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

impl KnowledgeRow {
    pub fn from_record(record: &Record, recorded_at: DateTime<Utc>) -> Self {
        Self {
            x: record.x.clone(),
            feasible: record.feasible(),
            score: record.score(),
            violation: record.violation(),
            min_margin: record.result.evidence.min_margin(),
            recorded_at,
        }
    }

    /// Training row in `space`, or `None` if the row's variables differ.
    pub fn training_row(&self, space: &SearchSpace) -> Option<TrainingRow> {
        if self.x.len() != space.dims() {
            return None;
        }
        let x = space.vector(&self.x)?;
        if x.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let margin = match self.min_margin {
            Some(m) => m,
            None if self.feasible => 0.0,
            None => -self.violation,
        };
        Some(TrainingRow {
            x: space.clamp(&x),
            feasible: self.feasible,
            score: self.score,
            margin,
        })
    }
}

/// Load/save access to remembered evaluations.
pub trait Repository: Send + Sync {
    fn load(&self) -> ScoutResult<Vec<KnowledgeRow>>;

    /// Append `rows` to what is already stored.
    fn save(&self, rows: &[KnowledgeRow]) -> ScoutResult<()>;
}

/// Rows stored as one JSON array in a file, most recent last.
#[derive(Debug, Clone)]
pub struct JsonFileRepository {
    path: PathBuf,
    max_rows: usize,
}

impl JsonFileRepository {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_rows: DEFAULT_MAX_ROWS,
        }
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Repository for JsonFileRepository {
    fn load(&self) -> ScoutResult<Vec<KnowledgeRow>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let bytes = std::fs::read(&self.path)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        let rows: Vec<KnowledgeRow> = serde_json::from_slice(&bytes).map_err(|e| {
            ScoutError::Repository(format!("cannot parse {}: {e}", self.path.display()))
        })?;
        debug!(path = %self.path.display(), rows = rows.len(), "knowledge loaded");
        Ok(rows)
    }

    fn save(&self, rows: &[KnowledgeRow]) -> ScoutResult<()> {
        let mut all = match self.load() {
            Ok(existing) => existing,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "discarding unreadable knowledge file");
                Vec::new()
            }
        };
        all.extend_from_slice(rows);
        if all.len() > self.max_rows {
            all.drain(..all.len() - self.max_rows);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(&all)?)?;
        debug!(path = %self.path.display(), rows = all.len(), "knowledge saved");
        Ok(())
    }
}

/// In-process repository.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    rows: Mutex<Vec<KnowledgeRow>>,
    max_rows: Option<usize>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<KnowledgeRow>) -> Self {
        Self {
            rows: Mutex::new(rows),
            max_rows: None,
        }
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

impl Repository for MemoryRepository {
    fn load(&self) -> ScoutResult<Vec<KnowledgeRow>> {
        Ok(self.rows.lock().clone())
    }

    fn save(&self, rows: &[KnowledgeRow]) -> ScoutResult<()> {
        let mut stored = self.rows.lock();
        stored.extend_from_slice(rows);
        if let Some(max) = self.max_rows {
            if stored.len() > max {
                let excess = stored.len() - max;
                stored.drain(..excess);
            }
        }
        Ok(())
    }
}
