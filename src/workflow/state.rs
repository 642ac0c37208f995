//! Run State Persistence
//!
//! Records, per task, the fingerprint of the parameters its outputs were
//! produced with, plus the failures of the last run. The incremental check
//! compares these fingerprints against the freshly built graph, so changing
//! e.g. the mutation rate reruns exactly the tasks that depend on it.
//!
//! State is saved to `<output root>/.nerunner/state.json` after each task
//! completion.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::workflow::layout::STATE_DIR;

const STATE_FILE: &str = "state.json";

/// Persistent state of the runs under one output root.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RunState {
    /// Output root this state belongs to
    #[serde(skip)]
    root: PathBuf,

    /// Fingerprint recorded by each task's last successful run
    pub completed: BTreeMap<String, String>,

    /// Tasks that failed in the last run, with their error message
    #[serde(default)]
    pub failed: BTreeMap<String, String>,

    /// Last time the state was updated
    pub updated: DateTime<Utc>,
}

impl RunState {
    /// Creates an empty state for an output root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            completed: BTreeMap::new(),
            failed: BTreeMap::new(),
            updated: Utc::now(),
        }
    }

    /// Loads the state of an output root.
    ///
    /// Returns an error if no state file exists or it can't be read.
    pub fn load(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let state_file = Self::state_file_for(&root);

        let content = fs::read_to_string(&state_file)?;
        let mut state: RunState = serde_json::from_str(&content)?;
        state.root = root;

        info!(
            "Loaded run state from {} ({} task(s) recorded)",
            state_file.display(),
            state.completed.len()
        );
        Ok(state)
    }

    /// Loads the state, starting fresh when none can be read.
    pub fn load_or_new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self::load(&root).unwrap_or_else(|e| {
            debug!("No usable run state ({}), starting fresh", e);
            Self::new(root)
        })
    }

    /// Saves the state into the output root's state directory.
    pub fn save(&self) -> Result<()> {
        let state_file = self.state_file();
        if let Some(dir) = state_file.parent() {
            fs::create_dir_all(dir)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        fs::write(&state_file, json)?;

        debug!("Saved run state to {}", state_file.display());
        Ok(())
    }

    pub fn state_file(&self) -> PathBuf {
        Self::state_file_for(&self.root)
    }

    fn state_file_for(root: &Path) -> PathBuf {
        root.join(STATE_DIR).join(STATE_FILE)
    }

    /// Fingerprint recorded for a task, if it ever completed.
    pub fn fingerprint(&self, task_id: &str) -> Option<&str> {
        self.completed.get(task_id).map(|s| s.as_str())
    }

    /// Marks a task as completed with the fingerprint it ran with.
    pub fn mark_completed(&mut self, task_id: &str, fingerprint: &str) {
        self.completed.insert(task_id.to_string(), fingerprint.to_string());
        self.failed.remove(task_id);
        self.updated = Utc::now();
    }

    /// Marks a task as failed; its old record no longer vouches for its outputs.
    pub fn mark_failed(&mut self, task_id: &str, error: &str) {
        self.completed.remove(task_id);
        self.failed.insert(task_id.to_string(), error.to_string());
        self.updated = Utc::now();
    }

    /// Returns true if an earlier run left anything behind.
    pub fn is_resume(&self) -> bool {
        !self.completed.is_empty() || !self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_state_creation() {
        let state = RunState::new("out");
        assert_eq!(state.state_file(), PathBuf::from("out/.nerunner/state.json"));
        assert!(state.completed.is_empty());
        assert!(!state.is_resume());
    }

    #[test]
    fn test_mark_completed_and_failed() {
        let mut state = RunState::new("out");
        state.mark_completed("step1", "abc");
        assert_eq!(state.fingerprint("step1"), Some("abc"));
        assert!(state.is_resume());

        state.mark_failed("step1", "boom");
        assert_eq!(state.fingerprint("step1"), None);
        assert_eq!(state.failed["step1"], "boom");

        // Completing after failure clears the failed status
        state.mark_completed("step1", "def");
        assert!(state.failed.is_empty());
        assert_eq!(state.fingerprint("step1"), Some("def"));
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = tempdir().unwrap();
        let mut state = RunState::new(temp_dir.path());
        state.mark_completed("simulation[chrom=chr1,seed=1]", "f00");
        state.mark_failed("smcpp_run[seed=1]", "exit 1");
        state.save().unwrap();

        assert!(temp_dir.path().join(STATE_DIR).join(STATE_FILE).exists());

        let loaded = RunState::load(temp_dir.path()).unwrap();
        assert_eq!(loaded.fingerprint("simulation[chrom=chr1,seed=1]"), Some("f00"));
        assert_eq!(loaded.failed.len(), 1);
        assert_eq!(loaded.state_file(), state.state_file());
    }

    #[test]
    fn test_load_nonexistent() {
        assert!(RunState::load("/nonexistent/path").is_err());
        assert!(!RunState::load_or_new("/nonexistent/path").is_resume());
    }

    #[test]
    fn test_corrupt_state_starts_fresh() {
        let temp_dir = tempdir().unwrap();
        fs::create_dir_all(temp_dir.path().join(STATE_DIR)).unwrap();
        fs::write(temp_dir.path().join(STATE_DIR).join(STATE_FILE), "{not json").unwrap();

        assert!(RunState::load(temp_dir.path()).is_err());
        assert!(!RunState::load_or_new(temp_dir.path()).is_resume());
    }
}
