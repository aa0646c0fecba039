//! # ht-optimizer
//!
//! Search space declaration and sequential parameter search for hypertune.
//!
//! Provides search space definitions, the encode/decode step between optimizer
//! vectors and backend parameters, and suggest/record strategies (random and
//! Bayesian) whose suggestions are reproducible from a seed and a trial history.

mod optimizer;
mod search;

pub use optimizer::{BayesianSearch, Optimizer, RandomSearch};
pub use search::{ParameterDef, ParameterKind, SearchSpace};
