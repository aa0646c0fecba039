use std::collections::HashMap;
use std::sync::Arc;

use ht_types::{DataError, HtResult};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::{Dataset, DatasetLoader};

/// How the hyperparameter-independent indices of one run are derived.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SplitPolicy {
    /// Per class, draw `round(fraction * n)` training items, keeping at least
    /// one item of each class on both sides of the split.
    TrainFraction { fraction: f64 },
    /// Draw the prior knowledge an active review starts from.
    Priors { n_included: usize, n_excluded: usize },
}

impl Default for SplitPolicy {
    fn default() -> Self {
        Self::TrainFraction { fraction: 0.75 }
    }
}

/// Seed for the randomness of one repeated run.
pub fn run_seed(global_seed: u64, run_index: u32) -> u64 {
    global_seed.wrapping_add(u64::from(run_index))
}

/// Derive the split / prior indices for `run_index`. Pure in
/// `(dataset, run_index, global_seed)`.
pub fn derive_indices(
    dataset: &Dataset,
    policy: SplitPolicy,
    run_index: u32,
    global_seed: u64,
) -> HtResult<Vec<usize>> {
    let mut rng = ChaCha8Rng::seed_from_u64(run_seed(global_seed, run_index));
    let ones = dataset.positives();
    let zeros = dataset.negatives();

    let (n_one, n_zero) = match policy {
        SplitPolicy::TrainFraction { fraction } => {
            if ones.len() < 2 || zeros.len() < 2 {
                return Err(DataError::InsufficientData {
                    name: dataset.name.clone(),
                    message: "a train/test split needs two items of each class".to_string(),
                }
                .into());
            }
            let per_class = |n: usize| ((fraction * n as f64).round() as usize).max(1).min(n - 1);
            (per_class(ones.len()), per_class(zeros.len()))
        }
        SplitPolicy::Priors {
            n_included,
            n_excluded,
        } => {
            if ones.len() < n_included || zeros.len() < n_excluded {
                return Err(DataError::InsufficientData {
                    name: dataset.name.clone(),
                    message: format!(
                        "need {n_included} included and {n_excluded} excluded prior items, have {} and {}",
                        ones.len(),
                        zeros.len()
                    ),
                }
                .into());
            }
            (n_included, n_excluded)
        }
    };

    let mut indices: Vec<usize> = ones.choose_multiple(&mut rng, n_one).copied().collect();
    indices.extend(zeros.choose_multiple(&mut rng, n_zero).copied());
    Ok(indices)
}

/// Memoized dataset state for one job runner.
///
/// Loaded datasets are keyed by dataset id; split / prior indices by
/// `(dataset_id, run_index)`. Nothing here depends on hyperparameters, so
/// entries stay valid across all trials.
#[derive(Debug)]
pub struct DatasetCache<L> {
    loader: L,
    policy: SplitPolicy,
    global_seed: u64,
    datasets: HashMap<String, Arc<Dataset>>,
    indices: HashMap<(String, u32), Arc<Vec<usize>>>,
    stats: CacheStats,
}

impl<L: DatasetLoader> DatasetCache<L> {
    pub fn new(loader: L, policy: SplitPolicy, global_seed: u64) -> Self {
        Self {
            loader,
            policy,
            global_seed,
            datasets: HashMap::new(),
            indices: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn policy(&self) -> SplitPolicy {
        self.policy
    }

    pub fn dataset(&mut self, dataset_id: &str) -> HtResult<Arc<Dataset>> {
        if let Some(dataset) = self.datasets.get(dataset_id) {
            self.stats.hits += 1;
            return Ok(Arc::clone(dataset));
        }

        self.stats.misses += 1;
        let dataset = Arc::new(self.loader.load(dataset_id)?);
        self.datasets.insert(dataset_id.to_string(), Arc::clone(&dataset));
        self.stats.datasets_loaded += 1;
        Ok(dataset)
    }

    pub fn indices(&mut self, dataset_id: &str, run_index: u32) -> HtResult<Arc<Vec<usize>>> {
        let key = (dataset_id.to_string(), run_index);
        if let Some(indices) = self.indices.get(&key) {
            self.stats.hits += 1;
            return Ok(Arc::clone(indices));
        }

        self.stats.misses += 1;
        let dataset = self.dataset(dataset_id)?;
        let indices = Arc::new(derive_indices(&dataset, self.policy, run_index, self.global_seed)?);
        debug!(
            "Cached {} indices for {}/run {}",
            indices.len(),
            dataset_id,
            run_index
        );
        self.indices.insert(key, Arc::clone(&indices));
        Ok(indices)
    }

    pub fn clear(&mut self) {
        self.datasets.clear();
        self.indices.clear();
        self.stats = CacheStats::default();
    }

    pub fn get_stats(&self) -> CacheStats {
        self.stats.clone()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub datasets_loaded: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}
