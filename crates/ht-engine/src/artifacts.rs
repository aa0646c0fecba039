//! On-disk layout of a trials directory.
//!
//! ```text
//! <store_dir>/trials.json
//! <store_dir>/current/<dataset>/results_<run>.json
//! <store_dir>/current/<dataset>/labels.json
//! <store_dir>/best/...                     (mirror of current/)
//! ```

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use ht_types::{ArtifactError, HtResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const STORE_FILE: &str = "trials.json";
pub const CURRENT_DIR: &str = "current";
pub const BEST_DIR: &str = "best";
pub const LABELS_FILE: &str = "labels.json";
const RESULT_PREFIX: &str = "results_";
const PROMOTION_TMP: &str = ".best.tmp";
const RETIRED_TMP: &str = ".best.old";

/// Output of one job.
///
/// In passive mode `outcome` is the inclusion probability of every item and
/// `aux` the training indices. In active mode `outcome` is the time at which
/// each item was read and `aux` the prior indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultArtifact {
    pub outcome: Vec<f64>,
    pub aux: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new<P: AsRef<Path>>(store_dir: P) -> Self {
        Self {
            root: store_dir.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_path(&self) -> PathBuf {
        self.root.join(STORE_FILE)
    }

    pub fn current_dir(&self) -> PathBuf {
        self.root.join(CURRENT_DIR)
    }

    pub fn best_dir(&self) -> PathBuf {
        self.root.join(BEST_DIR)
    }

    pub fn dataset_dir(&self, dataset_id: &str) -> PathBuf {
        self.current_dir().join(dataset_id)
    }

    pub fn result_path(&self, dataset_id: &str, run_index: u32) -> PathBuf {
        self.dataset_dir(dataset_id)
            .join(format!("{RESULT_PREFIX}{run_index}.json"))
    }

    pub fn labels_path(&self, dataset_id: &str) -> PathBuf {
        self.dataset_dir(dataset_id).join(LABELS_FILE)
    }

    /// Result files of every run of one dataset, in run order.
    pub fn result_paths(&self, dataset_id: &str, n_run: u32) -> Vec<PathBuf> {
        (0..n_run).map(|run| self.result_path(dataset_id, run)).collect()
    }

    /// Write (or overwrite) the artifact of one job.
    pub fn write_result(&self, dataset_id: &str, run_index: u32, artifact: &ResultArtifact) -> HtResult<PathBuf> {
        fs::create_dir_all(self.dataset_dir(dataset_id))?;
        let path = self.result_path(dataset_id, run_index);
        fs::write(&path, serde_json::to_vec(artifact)?)?;
        Ok(path)
    }

    /// Write the labels file unless it already exists. Returns whether this
    /// call created it.
    pub fn write_labels_once(&self, dataset_id: &str, labels: &[u8]) -> HtResult<bool> {
        fs::create_dir_all(self.dataset_dir(dataset_id))?;
        let path = self.labels_path(dataset_id);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        file.write_all(&serde_json::to_vec(labels)?)?;
        debug!("Wrote labels for {} to {}", dataset_id, path.display());
        Ok(true)
    }

    /// Remove stale `results_*.json` files under `current/`. Labels stay.
    /// Files or directories that are already gone are skipped.
    pub fn reset_current(&self) -> HtResult<usize> {
        let datasets = match fs::read_dir(self.current_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for dataset in datasets {
            let dataset_dir = dataset?.path();
            if !dataset_dir.is_dir() {
                continue;
            }
            let files = match fs::read_dir(&dataset_dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for file in files {
                let path = file?.path();
                if !is_result_file(&path) {
                    continue;
                }
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        if removed > 0 {
            info!("Removed {} stale result files from {}", removed, self.current_dir().display());
        }
        Ok(removed)
    }

    /// Replace `best/` with a copy of `current/`.
    ///
    /// The copy is assembled in a sibling directory first. The old `best/` is
    /// moved aside before the copy is renamed into place and only deleted
    /// afterwards, so a failed swap leaves the previous snapshot.
    pub fn promote_current_to_best(&self) -> HtResult<()> {
        let current = self.current_dir();
        if !current.is_dir() {
            return Err(ArtifactError::Promotion {
                message: format!("{} does not exist", current.display()),
            }
            .into());
        }

        let staging = self.root.join(PROMOTION_TMP);
        remove_dir_if_present(&staging)?;
        copy_dir_recursive(&current, &staging)?;

        let best = self.best_dir();
        let retired = self.root.join(RETIRED_TMP);
        remove_dir_if_present(&retired)?;
        let had_best = match fs::rename(&best, &retired) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                return Err(ArtifactError::Promotion {
                    message: format!("cannot move {} aside: {}", best.display(), e),
                }
                .into())
            }
        };
        if let Err(e) = fs::rename(&staging, &best) {
            if had_best {
                // Put the previous snapshot back.
                fs::rename(&retired, &best)?;
            }
            return Err(ArtifactError::Promotion {
                message: format!("cannot move {} to {}: {}", staging.display(), best.display(), e),
            }
            .into());
        }
        remove_dir_if_present(&retired)?;

        debug!("Promoted {} to {}", current.display(), best.display());
        Ok(())
    }
}

fn is_result_file(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.starts_with(RESULT_PREFIX) && n.ends_with(".json"))
}

fn remove_dir_if_present(path: &Path) -> HtResult<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn copy_dir_recursive(from: &Path, to: &Path) -> HtResult<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> HtResult<T> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ArtifactError::Missing {
                path: path.to_path_buf(),
            }
            .into())
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes).map_err(|e| {
        ArtifactError::Malformed {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
        .into()
    })
}

/// Read one result artifact. A missing file is [`ArtifactError::Missing`].
pub fn read_artifact(path: &Path) -> HtResult<ResultArtifact> {
    read_json_file(path)
}

/// Read a labels file written by [`ArtifactLayout::write_labels_once`].
pub fn read_labels(path: &Path) -> HtResult<Vec<u8>> {
    read_json_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn artifact(x: f64) -> ResultArtifact {
        ResultArtifact {
            outcome: vec![x, 1.0 - x],
            aux: vec![0],
        }
    }

    #[test]
    fn paths_follow_layout() {
        let layout = ArtifactLayout::new("/tmp/run");
        assert_eq!(layout.store_path(), PathBuf::from("/tmp/run/trials.json"));
        assert_eq!(
            layout.result_path("ptsd", 3),
            PathBuf::from("/tmp/run/current/ptsd/results_3.json")
        );
        assert_eq!(
            layout.labels_path("ptsd"),
            PathBuf::from("/tmp/run/current/ptsd/labels.json")
        );
        assert_eq!(layout.result_paths("ace", 2).len(), 2);
    }

    #[test]
    fn result_is_overwritten_and_readable() {
        let dir = tempdir().unwrap();
        let layout = ArtifactLayout::new(dir.path());

        layout.write_result("ace", 0, &artifact(0.1)).unwrap();
        let path = layout.write_result("ace", 0, &artifact(0.7)).unwrap();
        assert_eq!(read_artifact(&path).unwrap(), artifact(0.7));
    }

    #[test]
    fn labels_are_written_once() {
        let dir = tempdir().unwrap();
        let layout = ArtifactLayout::new(dir.path());

        assert!(layout.write_labels_once("ace", &[1, 0, 1]).unwrap());
        assert!(!layout.write_labels_once("ace", &[0, 0, 0]).unwrap());
        assert_eq!(read_labels(&layout.labels_path("ace")).unwrap(), vec![1, 0, 1]);
    }

    #[test]
    fn missing_and_malformed_artifacts() {
        let dir = tempdir().unwrap();
        let missing = read_artifact(&dir.path().join("results_0.json")).unwrap_err();
        assert!(missing.to_string().contains("missing"));

        let bad = dir.path().join("results_1.json");
        fs::write(&bad, "{not json").unwrap();
        assert!(read_artifact(&bad).unwrap_err().to_string().contains("malformed"));
    }

    #[test]
    fn reset_removes_results_but_keeps_labels() {
        let dir = tempdir().unwrap();
        let layout = ArtifactLayout::new(dir.path());
        assert_eq!(layout.reset_current().unwrap(), 0);

        layout.write_result("ace", 0, &artifact(0.1)).unwrap();
        layout.write_result("ptsd", 1, &artifact(0.2)).unwrap();
        layout.write_labels_once("ace", &[1, 0]).unwrap();

        assert_eq!(layout.reset_current().unwrap(), 2);
        assert!(!layout.result_path("ace", 0).exists());
        assert!(layout.labels_path("ace").exists());
    }

    #[test]
    fn promotion_replaces_best_wholesale() {
        let dir = tempdir().unwrap();
        let layout = ArtifactLayout::new(dir.path());
        assert!(layout.promote_current_to_best().is_err());

        layout.write_result("ace", 0, &artifact(0.1)).unwrap();
        layout.write_result("ace", 1, &artifact(0.1)).unwrap();
        layout.promote_current_to_best().unwrap();
        assert!(layout.best_dir().join("ace/results_1.json").exists());

        layout.reset_current().unwrap();
        layout.write_result("ace", 0, &artifact(0.9)).unwrap();
        layout.promote_current_to_best().unwrap();

        let best = layout.best_dir().join("ace");
        assert_eq!(read_artifact(&best.join("results_0.json")).unwrap(), artifact(0.9));
        assert!(!best.join("results_1.json").exists());
        assert!(!dir.path().join(PROMOTION_TMP).exists());        assert!(!dir.path().join(RETIRED_TMP).exists());
    }

    #[test]
    fn promotion_recovers_from_interrupted_swap() {
        let dir = tempdir().unwrap();
        let layout = ArtifactLayout::new(dir.path());
        layout.write_result("ace", 0, &artifact(0.3)).unwrap();

        // State left behind by a crash after the old snapshot was moved aside.
        let retired = dir.path().join(RETIRED_TMP).join("ace");
        fs::create_dir_all(&retired).unwrap();
        fs::write(retired.join("results_0.json"), "stale").unwrap();
        fs::create_dir_all(dir.path().join(PROMOTION_TMP)).unwrap();

        layout.promote_current_to_best().unwrap();
        assert_eq!(
            read_artifact(&layout.best_dir().join("ace/results_0.json")).unwrap(),
            artifact(0.3)
        );
        assert!(!dir.path().join(RETIRED_TMP).exists());
        assert!(!dir.path().join(PROMOTION_TMP).exists());
    }
}
