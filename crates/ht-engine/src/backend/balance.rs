use ht_optimizer::SearchSpace;
use ht_types::{config_error, param_f64, validation_error, HtResult, ParameterGroup, ParameterSet};
use rand::seq::SliceRandom;
use rand::Rng;

/// Chooses which labelled items the model is trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceStrategy {
    /// Train on every labelled item.
    Simple,
    /// Keep every inclusion and draw exclusions until `inclusions / exclusions`
    /// reaches `bal_ratio`.
    Undersample,
}

impl BalanceStrategy {
    pub fn from_name(name: &str) -> HtResult<Self> {
        match name {
            "simple" => Ok(Self::Simple),
            "undersample" => Ok(Self::Undersample),
            other => Err(config_error!("unknown balance strategy {other:?}")),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Undersample => "undersample",
        }
    }

    pub fn search_space(&self) -> SearchSpace {
        match self {
            Self::Simple => SearchSpace::new(),
            Self::Undersample => SearchSpace::new().add_float(ParameterGroup::Balance.tag("ratio"), 0.1, 1.0),
        }
    }

    /// Training indices drawn from the labelled set `labelled`.
    pub fn sample<R: Rng>(
        &self,
        params: &ParameterSet,
        labelled: &[usize],
        labels: &[u8],
        rng: &mut R,
    ) -> HtResult<Vec<usize>> {
        match self {
            Self::Simple => Ok(labelled.to_vec()),
            Self::Undersample => {
                let ratio = param_f64(params, "ratio", 1.0)?;
                if ratio <= 0.0 {
                    return Err(validation_error!("bal_ratio must be positive, got {ratio}"));
                }

                let (ones, zeros): (Vec<usize>, Vec<usize>) =
                    labelled.iter().copied().partition(|idx| labels[*idx] == 1);
                let n_zero = ((ones.len() as f64 / ratio).round() as usize)
                    .max(1)
                    .min(zeros.len());

                let mut train = ones;
                train.extend(zeros.choose_multiple(rng, n_zero).copied());
                Ok(train)
            }
        }
    }
}
