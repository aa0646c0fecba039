//! Units of work handed to the dispatcher.

use serde::{Deserialize, Serialize};

use crate::params::ParameterSet;

/// One parameter vector evaluated against one dataset for one repeated run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub parameters: ParameterSet,
    pub dataset_id: String,
    pub run_index: u32,
}

impl Job {
    pub fn new(parameters: ParameterSet, dataset_id: impl Into<String>, run_index: u32) -> Self {
        Self {
            parameters,
            dataset_id: dataset_id.into(),
            run_index,
        }
    }

    /// Build the full batch for one trial: every dataset crossed with every run.
    pub fn batch(parameters: &ParameterSet, dataset_ids: &[String], n_run: u32) -> Vec<Job> {
        dataset_ids
            .iter()
            .flat_map(|dataset_id| {
                (0..n_run).map(move |run_index| Job::new(parameters.clone(), dataset_id.clone(), run_index))
            })
            .collect()
    }

    /// Short human-readable job label for logs and errors.
    pub fn label(&self) -> String {
        format!("{}/run {}", self.dataset_id, self.run_index)
    }
}
