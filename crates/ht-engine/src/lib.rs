//! # ht-engine
//!
//! Job dispatch and checkpointed trial storage for hyperparameter
//! optimization of review workflows.
//!
//! Every iteration the [`OptimizationDriver`] asks the optimizer for a
//! parameter vector, fans one job per dataset and run out through a
//! [`Dispatcher`], reduces the written artifacts to a loss, appends the trial
//! to the [`TrialStore`] and snapshots the artifacts of the best trial.
//! Stopping and restarting a session continues from the stored history.

pub mod aggregate;
pub mod artifacts;
pub mod backend;
pub mod cache;
pub mod config;
pub mod data;
pub mod dispatch;
pub mod driver;
pub mod logging;
pub mod runner;
pub mod store;

pub use aggregate::{quality, LossPolicy};
pub use artifacts::{ArtifactLayout, ResultArtifact};
pub use backend::{EvaluationBackend, Workflow, WorkflowBackend};
pub use cache::{CacheStats, DatasetCache, SplitPolicy};
pub use config::{ActiveSettings, DispatchSettings, LossSettings, OptimizationConfig, OptimizerSettings, PassiveSettings};
pub use data::{resolve_dataset_names, CsvDatasetLoader, Dataset, DatasetLoader, InMemoryDatasetLoader};
pub use dispatch::{DispatchOptions, Dispatcher, SerialDispatcher, WorkerPool};
pub use driver::{DriverState, OptimizationDriver, RunSummary};
pub use runner::{EvaluationRunner, JobRunner};
pub use store::{TrialStore, TrialStoreData};
