//! Durable, resumable trial history.
//!
//! The whole store is one JSON document, rewritten after every trial. Writes go
//! to a sibling temp file that is renamed over the target, so a crash leaves
//! either the previous or the new version on disk.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use ht_types::{
    best_trial, validation_error, ChoiceTable, EncodedValue, HtResult, ParameterValue, StoreError, Trial,
    WorkflowMetadata,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Name of the loss column in [`TrialStore::decoded_values`].
pub const LOSS_COLUMN: &str = "loss";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialStoreData {
    pub trials: Vec<Trial>,
    pub choice_table: ChoiceTable,
    pub workflow_metadata: WorkflowMetadata,
}

#[derive(Debug)]
pub struct TrialStore {
    path: PathBuf,
    data: TrialStoreData,
}

impl TrialStore {
    /// Read a persisted store. A missing file means a cold start.
    pub fn load<P: AsRef<Path>>(path: P) -> HtResult<Option<TrialStoreData>> {
        let path = path.as_ref();
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let data = serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Some(data))
    }

    /// Resume the store at `path`, or start an empty one.
    ///
    /// A stored workflow that differs from `workflow_metadata` is an error:
    /// its trials were evaluated against a different search space.
    pub fn open<P: AsRef<Path>>(
        path: P,
        choice_table: ChoiceTable,
        workflow_metadata: WorkflowMetadata,
    ) -> HtResult<Self> {
        let path = path.as_ref().to_path_buf();
        let data = match Self::load(&path)? {
            Some(stored) => {
                if stored.workflow_metadata != workflow_metadata {
                    return Err(StoreError::WorkflowMismatch {
                        stored: stored.workflow_metadata.to_string(),
                        current: workflow_metadata.to_string(),
                    }
                    .into());
                }
                if stored.choice_table != choice_table {
                    return Err(StoreError::ChoiceTableMismatch {
                        stored: format!("{:?}", stored.choice_table),
                        current: format!("{:?}", choice_table),
                    }
                    .into());
                }
                info!("Resuming {} with {} trials", path.display(), stored.trials.len());
                stored
            }
            None => {
                warn!("No trial store at {}, creating a new optimization run", path.display());
                TrialStoreData {
                    trials: Vec::new(),
                    choice_table,
                    workflow_metadata,
                }
            }
        };
        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn trials(&self) -> &[Trial] {
        &self.data.trials
    }

    pub fn len(&self) -> usize {
        self.data.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.trials.is_empty()
    }

    pub fn choice_table(&self) -> &ChoiceTable {
        &self.data.choice_table
    }

    pub fn workflow_metadata(&self) -> &WorkflowMetadata {
        &self.data.workflow_metadata
    }

    pub fn data(&self) -> &TrialStoreData {
        &self.data
    }

    /// First trial with the lowest loss.
    pub fn best(&self) -> Option<&Trial> {
        best_trial(&self.data.trials)
    }

    /// Whether the most recently appended trial is the best one so far.
    pub fn latest_is_best(&self) -> bool {
        match (self.best(), self.data.trials.last()) {
            (Some(best), Some(last)) => best.tid == last.tid,
            _ => false,
        }
    }

    /// Append the next trial and write the whole store to disk.
    pub fn append_and_persist(&mut self, trial: Trial) -> HtResult<()> {
        let expected = self.data.trials.len();
        if trial.tid != expected {
            return Err(StoreError::OutOfSequence {
                tid: trial.tid,
                last: expected.saturating_sub(1),
            }
            .into());
        }
        self.data.trials.push(trial);
        if let Err(e) = self.persist() {
            self.data.trials.pop();
            return Err(e);
        }
        Ok(())
    }

    pub fn persist(&self) -> HtResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&self.data)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Persisted {} trials to {}", self.len(), self.path.display());
        Ok(())
    }

    /// Column view of the history: parameter name to its decoded values in
    /// trial order, plus a `loss` column.
    ///
    /// Choice indices become labels. A real-valued column whose values are all
    /// integral becomes an integer column.
    pub fn decoded_values(&self) -> HtResult<BTreeMap<String, Vec<ParameterValue>>> {
        let names: BTreeSet<&String> = self.data.trials.iter().flat_map(|t| t.vals.keys()).collect();
        let table = &self.data.choice_table;

        let mut columns = BTreeMap::new();
        for name in names {
            let mut raw = Vec::with_capacity(self.len());
            for trial in &self.data.trials {
                let value = trial
                    .vals
                    .get(name)
                    .ok_or_else(|| validation_error!("trial {} has no value for {}", trial.tid, name))?;
                raw.push(*value);
            }

            let column = if table.contains(name) {
                raw.iter()
                    .map(|value| match value {
                        EncodedValue::Index(i) => Ok(ParameterValue::Label(table.label(name, *i)?.to_string())),
                        EncodedValue::Real(v) => Err(validation_error!("{name} expects a choice index, got {v}")),
                    })
                    .collect::<HtResult<Vec<_>>>()?
            } else if raw.iter().all(|v| v.as_f64().fract() == 0.0) {
                raw.iter()
                    .map(|v| ParameterValue::Int(v.as_f64() as i64))
                    .collect()
            } else {
                raw.iter().map(|v| ParameterValue::Float(v.as_f64())).collect()
            };
            columns.insert(name.clone(), column);
        }

        columns.insert(
            LOSS_COLUMN.to_string(),
            self.data
                .trials
                .iter()
                .map(|t| ParameterValue::Float(t.loss))
                .collect(),
        );
        Ok(columns)
    }
}
