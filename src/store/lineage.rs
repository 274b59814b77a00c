//! Append-only lineage store for candidate packs and baseline anchors.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::{BaselineAnchor, CandidatePack};

/// Store failures. Conflicts are scoped to a single write; callers can
/// continue a run past them.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed artifact: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("run {run_id} already persisted with different content")]
    Conflict { run_id: String },
    #[error("run {run_id} not found")]
    NotFound { run_id: String },
}

/// Filesystem-backed lineage store.
///
/// Layout under the root:
///
/// - `packs/<run_id>.json` - one write-once pack per gated candidate
/// - `baseline.json` - the current anchor
/// - `baselines/<episode_id>.json` - snapshot of the anchor an episode
///   ended with, used for historical comparisons
#[derive(Debug, Clone)]
pub struct LineageStore {
    root: PathBuf,
}

impl LineageStore {
    /// Open a store, creating its directories as needed.
    pub fn open<P: AsRef<Path>>(root: P) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("packs"))?;
        fs::create_dir_all(root.join("baselines"))?;
        Ok(Self { root })
    }

    fn pack_path(&self, run_id: &str) -> PathBuf {
        self.root.join("packs").join(format!("{run_id}.json"))
    }

    /// Persist a pack under its run id. Re-persisting identical content
    /// is a no-op; different content under an existing run id is a
    /// conflict and the stored pack stays untouched.
    pub fn persist(&self, pack: &CandidatePack) -> Result<(), StoreError> {
        let path = self.pack_path(&pack.run_id);
        let json = serde_json::to_string_pretty(pack)?;
        if path.exists() {
            let existing: Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
            let incoming: Value = serde_json::from_str(&json)?;
            if existing == incoming {
                debug!("pack {} already persisted; skipping", pack.run_id);
                return Ok(());
            }
            return Err(StoreError::Conflict {
                run_id: pack.run_id.clone(),
            });
        }
        fs::write(&path, json)?;
        Ok(())
    }

    /// Load a pack by run id.
    pub fn load(&self, run_id: &str) -> Result<CandidatePack, StoreError> {
        let path = self.pack_path(run_id);
        if !path.exists() {
            return Err(StoreError::NotFound {
                run_id: run_id.to_string(),
            });
        }
        Ok(serde_json::from_str(&fs::read_to_string(&path)?)?)
    }

    /// All persisted run ids, sorted.
    pub fn run_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join("packs"))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Current anchor. Empty when none has been written yet.
    pub fn load_baseline(&self) -> Result<BaselineAnchor, StoreError> {
        let path = self.root.join("baseline.json");
        if !path.exists() {
            return Ok(BaselineAnchor::new());
        }
        Ok(serde_json::from_str(&fs::read_to_string(&path)?)?)
    }

    /// Rewrite the current anchor.
    pub fn save_baseline(&self, baseline: &BaselineAnchor) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(baseline)?;
        fs::write(self.root.join("baseline.json"), json)?;
        Ok(())
    }

    /// Snapshot the anchor an episode ended with.
    pub fn snapshot_baseline(
        &self,
        episode_id: &str,
        baseline: &BaselineAnchor,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(baseline)?;
        let path = self.root.join("baselines").join(format!("{episode_id}.json"));
        fs::write(path, json)?;
        Ok(())
    }

    fn episode_baseline(&self, episode_id: &str) -> Result<Option<BaselineAnchor>, StoreError> {
        let path = self.root.join("baselines").join(format!("{episode_id}.json"));
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&fs::read_to_string(&path)?)?))
    }

    /// Compare a historical run against its baseline.
    ///
    /// Prefers the snapshot taken when the run's episode concluded; runs
    /// predating snapshotting fall back to the current anchor.
    pub fn compare(&self, run_id: &str) -> Result<RunComparison, StoreError> {
        let pack = self.load(run_id)?;
        let baseline = match self.episode_baseline(&pack.episode_id)? {
            Some(anchor) => anchor,
            None => self.load_baseline()?,
        };

        let delta = pack
            .raw_metrics
            .iter()
            .filter_map(|(name, value)| {
                baseline
                    .get(name)
                    .map(|anchor| (name.clone(), value - anchor.mean))
            })
            .collect();

        Ok(RunComparison {
            run_id: run_id.to_string(),
            current: pack.raw_metrics,
            baseline,
            delta,
        })
    }
}

/// Output of [`LineageStore::compare`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunComparison {
    /// Run being inspected.
    pub run_id: String,
    /// Metrics the run recorded.
    pub current: BTreeMap<String, f64>,
    /// Anchor the run is measured against.
    pub baseline: BaselineAnchor,
    /// Current minus baseline mean, per shared metric.
    pub delta: BTreeMap<String, f64>,
}
