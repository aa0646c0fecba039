//! Evaluation backends.
//!
//! A backend declares the search space it consumes and turns one grouped
//! parameter vector, one dataset and one run's indices into a
//! [`ResultArtifact`]. [`WorkflowBackend`] composes a feature extraction, a
//! balance strategy, a classifier and (for active reviews) a query strategy.

mod balance;
mod features;
mod models;
mod query;
mod simulate;

pub use balance::BalanceStrategy;
pub use features::FeatureExtraction;
pub use models::{Classifier, FittedModel};
pub use query::QueryStrategy;
pub use simulate::simulate_review;

use ht_optimizer::SearchSpace;
use ht_types::{config_error, GroupedParameters, HtResult, ReviewMode, WorkflowMetadata};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::artifacts::ResultArtifact;
use crate::cache::SplitPolicy;
use crate::config::{ActiveSettings, OptimizationConfig};
use crate::data::Dataset;

/// Numeric work behind a job.
pub trait EvaluationBackend {
    /// Every tunable hyperparameter, tagged with its group prefix.
    fn declare_search_space(&self) -> SearchSpace;

    /// How the per-run indices handed to [`evaluate`](Self::evaluate) are drawn.
    fn split_policy(&self) -> SplitPolicy;

    /// Deterministic for a fixed `seed`.
    fn evaluate(
        &self,
        params: &GroupedParameters,
        dataset: &Dataset,
        indices: &[usize],
        seed: u64,
    ) -> HtResult<ResultArtifact>;
}

/// The strategies named by a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workflow {
    pub feature: FeatureExtraction,
    pub balance: BalanceStrategy,
    pub model: Classifier,
    pub query: Option<QueryStrategy>,
}

impl Workflow {
    pub fn from_metadata(metadata: &WorkflowMetadata) -> HtResult<Self> {
        Ok(Self {
            feature: FeatureExtraction::from_name(&metadata.feature)?,
            balance: BalanceStrategy::from_name(&metadata.balance)?,
            model: Classifier::from_name(&metadata.model)?,
            query: metadata.query.as_deref().map(QueryStrategy::from_name).transpose()?,
        })
    }

    pub fn search_space(&self) -> SearchSpace {
        let space = self
            .model
            .search_space()
            .merge(self.query.map(|q| q.search_space()).unwrap_or_default())
            .merge(self.balance.search_space());
        space.merge(self.feature.search_space())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Review {
    Passive { train_fraction: f64 },
    Active { query: QueryStrategy, settings: ActiveSettings },
}

/// Reference backend over numeric datasets.
#[derive(Debug, Clone)]
pub struct WorkflowBackend {
    workflow: Workflow,
    review: Review,
}

impl WorkflowBackend {
    /// Train on a split, score every item.
    pub fn passive(workflow: Workflow, train_fraction: f64) -> Self {
        Self {
            workflow: Workflow { query: None, ..workflow },
            review: Review::Passive { train_fraction },
        }
    }

    /// Simulate screening from prior knowledge.
    pub fn active(workflow: Workflow, settings: ActiveSettings) -> HtResult<Self> {
        let query = workflow
            .query
            .ok_or_else(|| config_error!("active reviews need a query strategy"))?;
        Ok(Self {
            workflow,
            review: Review::Active { query, settings },
        })
    }

    pub fn from_config(config: &OptimizationConfig) -> HtResult<Self> {
        let workflow = Workflow::from_metadata(&config.workflow_metadata())?;
        match config.mode {
            ReviewMode::Passive => Ok(Self::passive(workflow, config.passive.train_fraction)),
            ReviewMode::Active => Self::active(workflow, config.active),
        }
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }
}

impl EvaluationBackend for WorkflowBackend {
    fn declare_search_space(&self) -> SearchSpace {
        self.workflow.search_space()
    }

    fn split_policy(&self) -> SplitPolicy {
        match self.review {
            Review::Passive { train_fraction } => SplitPolicy::TrainFraction {
                fraction: train_fraction,
            },
            Review::Active { settings, .. } => SplitPolicy::Priors {
                n_included: settings.n_included,
                n_excluded: settings.n_excluded,
            },
        }
    }

    fn evaluate(
        &self,
        params: &GroupedParameters,
        dataset: &Dataset,
        indices: &[usize],
        seed: u64,
    ) -> HtResult<ResultArtifact> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let features = self
            .workflow
            .feature
            .fit_transform(&params.feature, &dataset.features)?;

        let outcome = match &self.review {
            Review::Passive { .. } => {
                let train = self
                    .workflow
                    .balance
                    .sample(&params.balance, indices, &dataset.labels, &mut rng)?;
                let model = self
                    .workflow
                    .model
                    .fit(&params.model, &features, &dataset.labels, &train)?;
                features.iter().map(|row| model.predict_proba(row)).collect()
            }
            Review::Active { query, settings } => simulate_review(
                &self.workflow,
                *query,
                params,
                &features,
                &dataset.labels,
                indices,
                settings,
                &mut rng,
            )?,
        };

        debug!("Evaluated {} items of {}", outcome.len(), dataset.name);
        Ok(ResultArtifact {
            outcome,
            aux: indices.to_vec(),
        })
    }
}
