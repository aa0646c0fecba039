use ht_types::{GroupedParameters, HtResult, Job};
use tracing::{debug, warn};

use crate::artifacts::ArtifactLayout;
use crate::backend::EvaluationBackend;
use crate::cache::{run_seed, DatasetCache};
use crate::data::DatasetLoader;

/// Executes single jobs. Each execution context owns exactly one runner.
pub trait JobRunner {
    fn execute(&mut self, job: &Job) -> HtResult<()>;
}

/// Runs a job through an [`EvaluationBackend`] and writes its artifact.
pub struct EvaluationRunner<B, L> {
    backend: B,
    cache: DatasetCache<L>,
    layout: ArtifactLayout,
    global_seed: u64,
}

impl<B: EvaluationBackend, L: DatasetLoader> EvaluationRunner<B, L> {
    pub fn new(backend: B, loader: L, layout: ArtifactLayout, global_seed: u64) -> Self {
        let cache = DatasetCache::new(loader, backend.split_policy(), global_seed);
        Self {
            backend,
            cache,
            layout,
            global_seed,
        }
    }

    pub fn cache(&self) -> &DatasetCache<L> {
        &self.cache
    }
}

impl<B: EvaluationBackend, L: DatasetLoader> JobRunner for EvaluationRunner<B, L> {
    fn execute(&mut self, job: &Job) -> HtResult<()> {
        let (params, ignored) = GroupedParameters::split(&job.parameters);
        for name in &ignored {
            warn!("Parameter {} has no group prefix and is ignored", name);
        }

        let dataset = self.cache.dataset(&job.dataset_id)?;
        let indices = self.cache.indices(&job.dataset_id, job.run_index)?;
        let seed = run_seed(self.global_seed, job.run_index);

        let artifact = self.backend.evaluate(&params, &dataset, &indices, seed)?;
        let path = self.layout.write_result(&job.dataset_id, job.run_index, &artifact)?;
        debug!("Job {} wrote {}", job.label(), path.display());

        if job.run_index == 0 {
            self.layout.write_labels_once(&job.dataset_id, &dataset.labels)?;
        }
        Ok(())
    }
}

impl<R: JobRunner + ?Sized> JobRunner for Box<R> {
    fn execute(&mut self, job: &Job) -> HtResult<()> {
        (**self).execute(job)
    }
}
