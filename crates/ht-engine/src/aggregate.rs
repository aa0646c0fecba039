//! Reduction of a trial's result artifacts into one loss.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use ht_types::{validation_error, ArtifactError, HtResult, ReviewMode};
use tracing::debug;

use crate::artifacts::{read_artifact, read_labels, ArtifactLayout, ResultArtifact};
use crate::config::LossSettings;

/// How a dataset's artifacts become a loss. Lower is better.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LossPolicy {
    /// Passive reviews: how far down the ranking the held-out inclusions end up.
    RankQuality { alpha: f64 },
    /// Active reviews: how long it takes to read every inclusion.
    DiscoveryEffort { moment: f64 },
}

impl LossPolicy {
    pub fn for_mode(mode: ReviewMode, settings: &LossSettings) -> Self {
        match mode {
            ReviewMode::Passive => Self::RankQuality { alpha: settings.alpha },
            ReviewMode::Active => Self::DiscoveryEffort {
                moment: settings.moment,
            },
        }
    }

    /// Loss of one dataset from the artifacts of all its runs.
    pub fn dataset_loss(&self, result_paths: &[PathBuf], labels_path: &Path) -> HtResult<f64> {
        let labels = read_labels(labels_path)?;
        let artifacts = result_paths
            .iter()
            .map(|path| {
                let artifact = read_artifact(path)?;
                check_shape(&artifact, labels.len(), path)?;
                Ok(artifact)
            })
            .collect::<HtResult<Vec<_>>>()?;

        match *self {
            Self::RankQuality { alpha } => quality(&rank_positions(&artifacts, &labels), alpha),
            Self::DiscoveryEffort { moment } => {
                discovery_effort(&average_discovery_times(&artifacts, &labels), labels.len(), moment)
            }
        }
    }

    /// Mean of the per-dataset losses of the current trial.
    pub fn trial_loss(&self, layout: &ArtifactLayout, dataset_ids: &[String], n_run: u32) -> HtResult<f64> {
        if dataset_ids.is_empty() {
            return Err(validation_error!("no datasets to aggregate"));
        }
        let mut total = 0.0;
        for dataset_id in dataset_ids {
            let loss = self.dataset_loss(&layout.result_paths(dataset_id, n_run), &layout.labels_path(dataset_id))?;
            debug!("Dataset {} loss {:.6}", dataset_id, loss);
            total += loss;
        }
        Ok(total / dataset_ids.len() as f64)
    }
}

fn check_shape(artifact: &ResultArtifact, n_items: usize, path: &Path) -> HtResult<()> {
    let malformed = |message: String| ArtifactError::Malformed {
        path: path.to_path_buf(),
        message,
    };
    if artifact.outcome.len() != n_items {
        return Err(malformed(format!("{} outcomes for {} labels", artifact.outcome.len(), n_items)).into());
    }
    if let Some(idx) = artifact.aux.iter().find(|idx| **idx >= n_items) {
        return Err(malformed(format!("index {idx} out of range")).into());
    }
    Ok(())
}

/// Normalized ranking position of every held-out inclusion, averaged over
/// the runs in which it was held out, sorted ascending.
pub fn rank_positions(artifacts: &[ResultArtifact], labels: &[u8]) -> Vec<(usize, f64)> {
    let mut positions: BTreeMap<usize, (f64, usize)> = BTreeMap::new();

    for artifact in artifacts {
        let train: HashSet<usize> = artifact.aux.iter().copied().collect();
        let mut test: Vec<usize> = (0..labels.len()).filter(|idx| !train.contains(idx)).collect();
        // Stable sort: equal probabilities keep index order.
        test.sort_by(|a, b| artifact.outcome[*b].total_cmp(&artifact.outcome[*a]));

        let n_test = test.len() as f64;
        for (position, idx) in test.iter().enumerate() {
            if labels[*idx] == 1 {
                let entry = positions.entry(*idx).or_insert((0.0, 0));
                entry.0 += position as f64 / n_test;
                entry.1 += 1;
            }
        }
    }

    let mut ranks: Vec<(usize, f64)> = positions
        .into_iter()
        .map(|(idx, (sum, count))| (idx, sum / count as f64))
        .collect();
    ranks.sort_by(|a, b| a.1.total_cmp(&b.1));
    ranks
}

/// Power mean of the ranks: `(mean(rank^alpha))^(1/alpha)`.
pub fn quality(ranks: &[(usize, f64)], alpha: f64) -> HtResult<f64> {
    if ranks.is_empty() {
        return Err(validation_error!("no held-out inclusions to rank"));
    }
    let sum: f64 = ranks.iter().map(|(_, rank)| rank.powf(alpha)).sum();
    Ok((sum / ranks.len() as f64).powf(1.0 / alpha))
}

/// Mean read time of every inclusion that was not a prior, per item.
pub fn average_discovery_times(artifacts: &[ResultArtifact], labels: &[u8]) -> BTreeMap<usize, f64> {
    let mut times: BTreeMap<usize, (f64, usize)> = BTreeMap::new();
    for artifact in artifacts {
        let priors: HashSet<usize> = artifact.aux.iter().copied().collect();
        for (idx, label) in labels.iter().enumerate() {
            if *label == 1 && !priors.contains(&idx) {
                let entry = times.entry(idx).or_insert((0.0, 0));
                entry.0 += artifact.outcome[idx];
                entry.1 += 1;
            }
        }
    }
    times
        .into_iter()
        .map(|(idx, (sum, count))| (idx, sum / count as f64))
        .collect()
}

/// `(sum_i (t_i / n_items)^moment)^(1/moment) / count`.
pub fn discovery_effort(times: &BTreeMap<usize, f64>, n_items: usize, moment: f64) -> HtResult<f64> {
    if times.is_empty() {
        return Err(validation_error!("no inclusions outside the priors"));
    }
    let sum: f64 = times
        .values()
        .map(|t| (t / n_items as f64).powf(moment))
        .sum();
    Ok(sum.powf(1.0 / moment) / times.len() as f64)
}
