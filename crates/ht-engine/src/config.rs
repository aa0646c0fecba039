use std::path::{Path, PathBuf};

use ht_types::{config_error, HtResult, ReviewMode, WorkflowMetadata};
use serde::{Deserialize, Serialize};

use crate::backend::Workflow;

/// Everything one optimization session needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// Dataset names, or `["all"]` for every dataset in `data_dir`.
    pub datasets: Vec<String>,
    pub data_dir: PathBuf,
    /// Explicit trials directory. Derived from the workflow when unset.
    pub output_dir: Option<PathBuf>,
    pub n_iter: usize,
    pub n_run: u32,
    pub seed: u64,
    pub mode: ReviewMode,
    pub model: String,
    /// Only used by active reviews.
    pub query: Option<String>,
    pub balance: String,
    pub feature: String,
    pub loss: LossSettings,
    pub optimizer: OptimizerSettings,
    pub dispatch: DispatchSettings,
    pub passive: PassiveSettings,
    pub active: ActiveSettings,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            datasets: vec!["all".to_string()],
            data_dir: PathBuf::from("data"),
            output_dir: None,
            n_iter: 1,
            n_run: 8,
            seed: 0,
            mode: ReviewMode::Passive,
            model: "logistic".to_string(),
            query: Some("max".to_string()),
            balance: "simple".to_string(),
            feature: "standardize".to_string(),
            loss: LossSettings::default(),
            optimizer: OptimizerSettings::default(),
            dispatch: DispatchSettings::default(),
            passive: PassiveSettings::default(),
            active: ActiveSettings::default(),
        }
    }
}

impl OptimizationConfig {
    pub fn new(mode: ReviewMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Read a JSON config file. Missing keys take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> HtResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| config_error!("cannot read config {}: {}", path.display(), e))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| config_error!("invalid config {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_datasets<S: Into<String>>(mut self, datasets: Vec<S>) -> Self {
        self.datasets = datasets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_data_dir<P: Into<PathBuf>>(mut self, data_dir: P) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_output_dir<P: Into<PathBuf>>(mut self, output_dir: P) -> Self {
        self.output_dir = Some(output_dir.into());
        self
    }

    pub fn with_iterations(mut self, n_iter: usize) -> Self {
        self.n_iter = n_iter;
        self
    }

    pub fn with_runs(mut self, n_run: u32) -> Self {
        self.n_run = n_run;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_workflow(mut self, model: &str, query: Option<&str>, balance: &str, feature: &str) -> Self {
        self.model = model.to_string();
        self.query = query.map(str::to_string);
        self.balance = balance.to_string();
        self.feature = feature.to_string();
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchSettings) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_active(mut self, active: ActiveSettings) -> Self {
        self.active = active;
        self
    }

    /// Strategy names as they are recorded in the trial store. Passive
    /// reviews carry no query strategy.
    pub fn workflow_metadata(&self) -> WorkflowMetadata {
        WorkflowMetadata {
            mode: self.mode,
            model: self.model.clone(),
            query: match self.mode {
                ReviewMode::Passive => None,
                ReviewMode::Active => self.query.clone(),
            },
            balance: self.balance.clone(),
            feature: self.feature.clone(),
        }
    }

    /// Directory holding the trial store and artifacts:
    /// `output/<mode>/<strategies>/<datasets>` unless `output_dir` is set.
    pub fn trials_dir(&self, dataset_names: &[String]) -> PathBuf {
        match &self.output_dir {
            Some(dir) => dir.clone(),
            None => PathBuf::from("output")
                .join(self.mode.to_string())
                .join(self.workflow_metadata().names().join("_"))
                .join(dataset_names.join("_")),
        }
    }

    pub fn validate(&self) -> HtResult<()> {
        if self.datasets.is_empty() {
            return Err(config_error!("at least one dataset is required"));
        }
        if self.n_run == 0 {
            return Err(config_error!("n_run must be at least 1"));
        }
        if !(self.loss.alpha > 0.0) || !(self.loss.moment > 0.0) {
            return Err(config_error!(
                "loss alpha and moment must be positive, got {} and {}",
                self.loss.alpha,
                self.loss.moment
            ));
        }
        if !(0.0..=1.0).contains(&self.optimizer.exploration_weight) {
            return Err(config_error!("exploration_weight must lie in [0, 1]"));
        }
        if self.dispatch.distributed && self.dispatch.n_workers == 0 {
            return Err(config_error!("distributed dispatch needs at least one worker"));
        }

        match self.mode {
            ReviewMode::Passive => {
                let fraction = self.passive.train_fraction;
                if !(fraction > 0.0 && fraction < 1.0) {
                    return Err(config_error!("train_fraction must lie in (0, 1), got {fraction}"));
                }
            }
            ReviewMode::Active => {
                if self.query.is_none() {
                    return Err(config_error!("active reviews need a query strategy"));
                }
                let active = &self.active;
                if active.n_instances == 0 || active.n_included == 0 || active.n_excluded == 0 {
                    return Err(config_error!(
                        "n_instances, n_included and n_excluded must all be at least 1"
                    ));
                }
            }
        }

        Workflow::from_metadata(&self.workflow_metadata()).map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossSettings {
    /// Exponent of the passive rank-quality loss.
    pub alpha: f64,
    /// Exponent of the active discovery-effort loss.
    pub moment: f64,
}

impl Default for LossSettings {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            moment: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSettings {
    pub exploration_weight: f64,
    pub n_startup: usize,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            exploration_weight: 0.3,
            n_startup: 3,
        }
    }
}

/// How jobs are spread over execution contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Use a worker pool instead of running jobs on the driver thread.
    pub distributed: bool,
    /// Worker threads in the pool, not counting the driver.
    pub n_workers: usize,
    /// Let the driver thread take a share of the jobs as well.
    pub server_participates: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            distributed: false,
            n_workers: 4,
            server_participates: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassiveSettings {
    pub train_fraction: f64,
}

impl Default for PassiveSettings {
    fn default() -> Self {
        Self { train_fraction: 0.75 }
    }
}

/// Parameters of the simulated screening loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveSettings {
    /// Items read per query round.
    pub n_instances: usize,
    /// Reading budget after the priors; unlimited when unset.
    pub n_papers: Option<usize>,
    /// Prior inclusions per run.
    pub n_included: usize,
    /// Prior exclusions per run.
    pub n_excluded: usize,
}

impl Default for ActiveSettings {
    fn default() -> Self {
        Self {
            n_instances: 50,
            n_papers: None,
            n_included: 1,
            n_excluded: 1,
        }
    }
}
