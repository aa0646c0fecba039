//! Sequential suggest/record optimizers.
//!
//! Both strategies draw from a ChaCha RNG seeded with `seed + n_evals`, so a
//! suggestion depends only on the seed, the evaluation counter and the trial
//! history. Resuming from a stored history therefore continues the exact
//! sequence an uninterrupted session would have produced.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use ht_types::{best_trial, validation_error, EncodedVector, HtResult, Trial};

use crate::search::SearchSpace;

/// Common trait for sequential search strategies.
pub trait Optimizer: Send {
    /// Propose the next vector given the full trial history so far.
    fn suggest(&mut self, history: &[Trial]) -> HtResult<EncodedVector>;

    /// Record the outcome of a suggested vector and assign its sequence id.
    fn record(&mut self, vals: EncodedVector, loss: f64) -> Trial;

    /// Continue the sequence id space after `n_evals` stored trials.
    fn resume(&mut self, n_evals: usize);

    /// Number of evaluations recorded or resumed so far.
    fn n_evals(&self) -> usize;

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

fn rng_for(seed: u64, n_evals: usize) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed.wrapping_add(n_evals as u64))
}

fn next_trial(n_evals: &mut usize, vals: EncodedVector, loss: f64) -> Trial {
    let trial = Trial {
        tid: *n_evals,
        vals,
        loss,
    };
    *n_evals += 1;
    trial
}

// ---- Random search ----

/// Independent random sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    seed: u64,
    n_evals: usize,
}

impl RandomSearch {
    pub fn new(space: SearchSpace, seed: u64) -> Self {
        Self {
            space,
            seed,
            n_evals: 0,
        }
    }
}

impl Optimizer for RandomSearch {
    fn suggest(&mut self, _history: &[Trial]) -> HtResult<EncodedVector> {
        if self.space.is_empty() {
            return Err(validation_error!("cannot search an empty space"));
        }
        Ok(self.space.sample(&mut rng_for(self.seed, self.n_evals)))
    }

    fn record(&mut self, vals: EncodedVector, loss: f64) -> Trial {
        next_trial(&mut self.n_evals, vals, loss)
    }

    fn resume(&mut self, n_evals: usize) {
        self.n_evals = n_evals;
    }

    fn n_evals(&self) -> usize {
        self.n_evals
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Bayesian search ----

/// Sequential model-based search with an explore/exploit surrogate.
///
/// The first `n_startup` evaluations sample the space at random. Afterwards,
/// with probability `exploration_weight` a fresh random point is drawn,
/// otherwise the lowest-loss trial of the history is perturbed.
#[derive(Debug, Clone)]
pub struct BayesianSearch {
    space: SearchSpace,
    exploration_weight: f64,
    n_startup: usize,
    seed: u64,
    n_evals: usize,
}

impl BayesianSearch {
    pub fn new(space: SearchSpace, seed: u64) -> Self {
        Self {
            space,
            exploration_weight: 0.3,
            n_startup: 3,
            seed,
            n_evals: 0,
        }
    }

    pub fn with_exploration_weight(mut self, weight: f64) -> Self {
        self.exploration_weight = weight.clamp(0.0, 1.0);
        self
    }

    pub fn with_startup(mut self, n: usize) -> Self {
        self.n_startup = n;
        self
    }

    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    /// Exploitation: perturb the best-known point.
    fn exploit<R: Rng>(&self, base: &EncodedVector, rng: &mut R) -> EncodedVector {
        self.space
            .parameters
            .iter()
            .map(|param| {
                let value = match base.get(&param.name) {
                    Some(value) => param.kind.perturb(*value, rng),
                    None => param.kind.sample(rng),
                };
                (param.name.clone(), value)
            })
            .collect()
    }
}

impl Optimizer for BayesianSearch {
    fn suggest(&mut self, history: &[Trial]) -> HtResult<EncodedVector> {
        if self.space.is_empty() {
            return Err(validation_error!("cannot search an empty space"));
        }

        let mut rng = rng_for(self.seed, self.n_evals);
        let explore = history.len() < self.n_startup || rng.gen::<f64>() < self.exploration_weight;

        match best_trial(history) {
            Some(best) if !explore => {
                debug!(tid = best.tid, loss = best.loss, "exploiting around best trial");
                Ok(self.exploit(&best.vals, &mut rng))
            }
            _ => Ok(self.space.sample(&mut rng)),
        }
    }

    fn record(&mut self, vals: EncodedVector, loss: f64) -> Trial {
        next_trial(&mut self.n_evals, vals, loss)
    }

    fn resume(&mut self, n_evals: usize) {
        self.n_evals = n_evals;
    }

    fn n_evals(&self) -> usize {
        self.n_evals
    }

    fn name(&self) -> &str {
        "bayesian"
    }
}
