//! Recorded trials and the workflow they belong to.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::params::EncodedVector;

/// Whether the review is simulated with a train/test split or as an
/// active-learning screening loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewMode {
    Passive,
    Active,
}

impl Default for ReviewMode {
    fn default() -> Self {
        Self::Passive
    }
}

impl fmt::Display for ReviewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passive => write!(f, "passive"),
            Self::Active => write!(f, "active"),
        }
    }
}

/// Names of the strategies that make up the evaluated workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub mode: ReviewMode,
    pub model: String,
    /// Passive reviews never query, so they carry no query strategy.
    pub query: Option<String>,
    pub balance: String,
    pub feature: String,
}

impl WorkflowMetadata {
    /// Strategy names in model, query, balance, feature order.
    pub fn names(&self) -> Vec<&str> {
        let mut names = vec![self.model.as_str()];
        if let Some(query) = &self.query {
            names.push(query);
        }
        names.push(&self.balance);
        names.push(&self.feature);
        names
    }
}

impl fmt::Display for WorkflowMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.mode, self.names().join("+"))
    }
}

/// One evaluated parameter vector and its loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// Sequence id assigned by the optimizer.
    pub tid: usize,
    pub vals: EncodedVector,
    pub loss: f64,
}

/// The first trial with the lowest loss. NaN losses never win.
pub fn best_trial(trials: &[Trial]) -> Option<&Trial> {
    trials.iter().fold(None, |best: Option<&Trial>, trial| match best {
        _ if trial.loss.is_nan() => best,
        Some(current) if current.loss <= trial.loss => Some(current),
        _ => Some(trial),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::EncodedValue;

    fn trial(tid: usize, loss: f64) -> Trial {
        let mut vals = EncodedVector::new();
        vals.insert("mdl_shrinkage".into(), EncodedValue::Real(tid as f64 / 10.0));
        Trial { tid, vals, loss }
    }

    #[test]
    fn best_trial_keeps_first_minimum() {
        let trials = vec![trial(0, 0.4), trial(1, 0.2), trial(2, 0.2), trial(3, 0.3)];
        assert_eq!(best_trial(&trials).unwrap().tid, 1);
        assert!(best_trial(&[]).is_none());
    }

    #[test]
    fn workflow_display_lists_strategies() {
        let workflow = WorkflowMetadata {
            mode: ReviewMode::Active,
            model: "logistic".into(),
            query: Some("max".into()),
            balance: "simple".into(),
            feature: "raw".into(),
        };
        assert_eq!(workflow.to_string(), "active:logistic+max+simple+raw");

        let passive = WorkflowMetadata {
            mode: ReviewMode::Passive,
            query: None,
            ..workflow
        };
        assert_eq!(passive.names(), vec!["logistic", "simple", "raw"]);
    }

    #[test]
    fn review_mode_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&ReviewMode::Active).unwrap(), "\"active\"");
    }
}
