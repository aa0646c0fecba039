//! The optimization control loop.
//!
//! ```text
//! Init -> LoadStore -> { Suggest -> BuildJobs -> Dispatch -> Aggregate
//!                        -> RecordTrial -> MaybePromote } x n_iter
//!      -> ReleaseWorkers -> Done
//! ```

use ht_optimizer::{BayesianSearch, Optimizer, SearchSpace};
use ht_types::{config_error, validation_error, HtResult, Job, Trial, WorkflowMetadata};
use tracing::{debug, info};

use crate::aggregate::LossPolicy;
use crate::artifacts::ArtifactLayout;
use crate::backend::{EvaluationBackend, WorkflowBackend};
use crate::config::OptimizationConfig;
use crate::data::{resolve_dataset_names, CsvDatasetLoader};
use crate::dispatch::{DispatchOptions, Dispatcher, SerialDispatcher, WorkerPool};
use crate::runner::{EvaluationRunner, JobRunner};
use crate::store::TrialStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Init,
    LoadStore,
    Suggest,
    BuildJobs,
    Dispatch,
    Aggregate,
    RecordTrial,
    MaybePromote,
    ReleaseWorkers,
    Done,
}

/// Outcome of [`OptimizationDriver::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Iterations completed in this session.
    pub iterations: usize,
    /// Trials in the store, including resumed ones.
    pub total_trials: usize,
    pub best: Option<Trial>,
}

pub struct OptimizationDriver {
    space: SearchSpace,
    workflow: WorkflowMetadata,
    optimizer: Box<dyn Optimizer>,
    runner: Box<dyn JobRunner>,
    dispatcher: Box<dyn Dispatcher>,
    layout: ArtifactLayout,
    policy: LossPolicy,
    dataset_ids: Vec<String>,
    n_run: u32,
    server_participates: bool,
    state: DriverState,
    store: Option<TrialStore>,
}

impl OptimizationDriver {
    /// A serial driver with one run per dataset and the default rank loss.
    pub fn new(
        space: SearchSpace,
        workflow: WorkflowMetadata,
        optimizer: Box<dyn Optimizer>,
        runner: Box<dyn JobRunner>,
        layout: ArtifactLayout,
        dataset_ids: Vec<String>,
    ) -> Self {
        Self {
            space,
            workflow,
            optimizer,
            runner,
            dispatcher: Box::new(SerialDispatcher),
            layout,
            policy: LossPolicy::RankQuality { alpha: 1.0 },
            dataset_ids,
            n_run: 1,
            server_participates: false,
            state: DriverState::Init,
            store: None,
        }
    }

    /// Wire up the reference backend, CSV datasets and Bayesian search.
    pub fn from_config(config: &OptimizationConfig) -> HtResult<Self> {
        config.validate()?;

        let dataset_ids = resolve_dataset_names(&config.data_dir, &config.datasets)?;
        if dataset_ids.is_empty() {
            return Err(config_error!(
                "no datasets matching {:?} in {}",
                config.datasets,
                config.data_dir.display()
            ));
        }
        let layout = ArtifactLayout::new(config.trials_dir(&dataset_ids));
        info!("Optimizing over {} datasets in {}", dataset_ids.len(), layout.root().display());

        let backend = WorkflowBackend::from_config(config)?;
        let space = backend.declare_search_space();
        space.validate()?;

        let optimizer = BayesianSearch::new(space.clone(), config.seed)
            .with_exploration_weight(config.optimizer.exploration_weight)
            .with_startup(config.optimizer.n_startup);
        let runner = EvaluationRunner::new(
            backend.clone(),
            CsvDatasetLoader::new(&config.data_dir),
            layout.clone(),
            config.seed,
        );

        let dispatcher: Box<dyn Dispatcher> = if config.dispatch.distributed {
            let data_dir = config.data_dir.clone();
            let worker_layout = layout.clone();
            let seed = config.seed;
            Box::new(WorkerPool::spawn(config.dispatch.n_workers, move |_| {
                Ok(EvaluationRunner::new(
                    backend.clone(),
                    CsvDatasetLoader::new(&data_dir),
                    worker_layout.clone(),
                    seed,
                ))
            })?)
        } else {
            Box::new(SerialDispatcher)
        };

        Ok(Self::new(
            space,
            config.workflow_metadata(),
            Box::new(optimizer),
            Box::new(runner),
            layout,
            dataset_ids,
        )
        .with_dispatcher(dispatcher)
        .with_loss_policy(LossPolicy::for_mode(config.mode, &config.loss))
        .with_runs(config.n_run)
        .with_server_participation(config.dispatch.server_participates))
    }

    pub fn with_dispatcher(mut self, dispatcher: Box<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_loss_policy(mut self, policy: LossPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_runs(mut self, n_run: u32) -> Self {
        self.n_run = n_run;
        self
    }

    pub fn with_server_participation(mut self, server_participates: bool) -> Self {
        self.server_participates = server_participates;
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn dataset_ids(&self) -> &[String] {
        &self.dataset_ids
    }

    /// The trial store, once [`run`](Self::run) has finished.
    pub fn store(&self) -> Option<&TrialStore> {
        self.store.as_ref()
    }

    /// Run `n_iter` iterations on top of whatever the store already holds,
    /// then release the workers. A driver runs one session.
    pub fn run(&mut self, n_iter: usize) -> HtResult<RunSummary> {
        if self.store.is_some() {
            return Err(validation_error!("driver has already finished its session"));
        }

        self.transition(DriverState::LoadStore);
        let mut store = TrialStore::open(self.layout.store_path(), self.space.choice_table(), self.workflow.clone())?;
        self.optimizer.resume(store.len());
        self.layout.reset_current()?;

        for iteration in 0..n_iter {
            self.iterate(&mut store)?;
            info!(
                "Iteration {}/{} done, {} trials, best loss {:.6}",
                iteration + 1,
                n_iter,
                store.len(),
                store.best().map_or(f64::NAN, |t| t.loss)
            );
        }

        self.transition(DriverState::ReleaseWorkers);
        let options = DispatchOptions {
            keep_workers_alive: false,
            server_participates: self.server_participates,
        };
        self.dispatcher.dispatch(Vec::new(), self.runner.as_mut(), options)?;

        self.transition(DriverState::Done);
        let summary = RunSummary {
            iterations: n_iter,
            total_trials: store.len(),
            best: store.best().cloned(),
        };
        self.store = Some(store);
        Ok(summary)
    }

    fn iterate(&mut self, store: &mut TrialStore) -> HtResult<()> {
        self.transition(DriverState::Suggest);
        let vals = self.optimizer.suggest(store.trials())?;

        self.transition(DriverState::BuildJobs);
        let params = self.space.decode(&vals)?;
        let jobs = Job::batch(&params, &self.dataset_ids, self.n_run);

        self.transition(DriverState::Dispatch);
        let options = DispatchOptions {
            keep_workers_alive: true,
            server_participates: self.server_participates,
        };
        self.dispatcher.dispatch(jobs, self.runner.as_mut(), options)?;

        self.transition(DriverState::Aggregate);
        let loss = self.policy.trial_loss(&self.layout, &self.dataset_ids, self.n_run)?;
        if !loss.is_finite() {
            return Err(validation_error!("trial produced a non-finite loss {loss}"));
        }

        self.transition(DriverState::RecordTrial);
        let trial = self.optimizer.record(vals, loss);
        info!("Trial {} loss {:.6}", trial.tid, trial.loss);
        store.append_and_persist(trial)?;

        self.transition(DriverState::MaybePromote);
        if store.latest_is_best() {
            self.layout.promote_current_to_best()?;
            info!("Trial {} is the new best, snapshot promoted", store.len() - 1);
        }
        Ok(())
    }

    fn transition(&mut self, next: DriverState) {
        debug!(from = ?self.state, to = ?next, "driver transition");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ResultArtifact;
    use crate::cache::SplitPolicy;
    use crate::data::{Dataset, InMemoryDatasetLoader};
    use ht_optimizer::RandomSearch;
    use ht_types::{GroupedParameters, ReviewMode};
    use tempfile::tempdir;

    /// Puts the positive item first when `mdl_x` is below one half.
    struct ThresholdBackend;

    impl EvaluationBackend for ThresholdBackend {
        fn declare_search_space(&self) -> SearchSpace {
            SearchSpace::new().add_float("mdl_x", 0.0, 1.0)
        }

        fn split_policy(&self) -> SplitPolicy {
            SplitPolicy::TrainFraction { fraction: 0.5 }
        }

        fn evaluate(
            &self,
            params: &GroupedParameters,
            dataset: &Dataset,
            indices: &[usize],
            _seed: u64,
        ) -> HtResult<ResultArtifact> {
            let x = params.model.get("x").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let outcome = dataset
                .labels
                .iter()
                .map(|label| if (*label == 1) == (x < 0.5) { 1.0 } else { 0.0 })
                .collect();
            Ok(ResultArtifact {
                outcome,
                aux: indices.to_vec(),
            })
        }
    }

    fn driver(dir: &std::path::Path) -> OptimizationDriver {
        let features = (0..8).map(|i| vec![i as f64]).collect();
        let labels = vec![1, 0, 1, 0, 1, 0, 1, 0];
        let loader = InMemoryDatasetLoader::new()
            .with_dataset(Dataset::new("ace", vec!["f".into()], features, labels).unwrap());
        let layout = ArtifactLayout::new(dir);
        let space = ThresholdBackend.declare_search_space();
        let runner = EvaluationRunner::new(ThresholdBackend, loader, layout.clone(), 0);
        let workflow = WorkflowMetadata {
            mode: ReviewMode::Passive,
            model: "threshold".into(),
            query: None,
            balance: "simple".into(),
            feature: "raw".into(),
        };
        OptimizationDriver::new(
            space.clone(),
            workflow,
            Box::new(RandomSearch::new(space, 3)),
            Box::new(runner),
            layout,
            vec!["ace".to_string()],
        )
        .with_runs(2)
    }

    #[test]
    fn run_appends_trials_and_finishes() {
        let dir = tempdir().unwrap();
        let mut driver = driver(dir.path());

        let summary = driver.run(3).unwrap();
        assert_eq!(summary.iterations, 3);
        assert_eq!(summary.total_trials, 3);
        assert_eq!(driver.state(), DriverState::Done);
        assert!(driver.layout().best_dir().join("ace/results_1.json").exists());

        let tids: Vec<usize> = driver.store().unwrap().trials().iter().map(|t| t.tid).collect();
        assert_eq!(tids, vec![0, 1, 2]);
        assert!(driver.run(1).is_err());
    }

    #[test]
    fn resumed_session_continues_ids() {
        let dir = tempdir().unwrap();
        driver(dir.path()).run(2).unwrap();

        let mut resumed = driver(dir.path());
        let summary = resumed.run(2).unwrap();
        assert_eq!(summary.total_trials, 4);
        let tids: Vec<usize> = resumed.store().unwrap().trials().iter().map(|t| t.tid).collect();
        assert_eq!(tids, vec![0, 1, 2, 3]);
    }
}
