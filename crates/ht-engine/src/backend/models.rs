use ht_optimizer::SearchSpace;
use ht_types::{config_error, param_f64, param_label, validation_error, HtResult, ParameterGroup, ParameterSet};

/// Classifier families the backend can train.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classifier {
    /// Distance to per-class centroids, shrunk towards the global mean.
    NearestCentroid,
    /// L2-regularized logistic regression trained by full-batch gradient descent.
    Logistic,
}

/// A trained classifier.
#[derive(Debug, Clone, PartialEq)]
pub enum FittedModel {
    Centroid { included: Vec<f64>, excluded: Vec<f64> },
    Logistic { weights: Vec<f64>, bias: f64 },
}

impl Classifier {
    pub fn from_name(name: &str) -> HtResult<Self> {
        match name {
            "nearest_centroid" => Ok(Self::NearestCentroid),
            "logistic" => Ok(Self::Logistic),
            other => Err(config_error!("unknown model {other:?}")),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NearestCentroid => "nearest_centroid",
            Self::Logistic => "logistic",
        }
    }

    pub fn search_space(&self) -> SearchSpace {
        let model = ParameterGroup::Model;
        match self {
            Self::NearestCentroid => SearchSpace::new().add_float(model.tag("shrinkage"), 0.0, 1.0),
            Self::Logistic => SearchSpace::new()
                .add_log_uniform(model.tag("learning_rate"), 1e-3, 1.0)
                .add_int(model.tag("epochs"), 5, 50)
                .add_log_uniform(model.tag("l2"), 1e-6, 1e-1)
                .add_choice(model.tag("class_weight"), vec!["balanced", "none"]),
        }
    }

    /// Fit on the rows of `features` listed in `train`.
    pub fn fit(
        &self,
        params: &ParameterSet,
        features: &[Vec<f64>],
        labels: &[u8],
        train: &[usize],
    ) -> HtResult<FittedModel> {
        let n_one = train.iter().filter(|idx| labels[**idx] == 1).count();
        let n_zero = train.len() - n_one;
        if n_one == 0 || n_zero == 0 {
            return Err(validation_error!(
                "training set needs both classes, got {n_one} included and {n_zero} excluded"
            ));
        }
        let width = features.first().map_or(0, Vec::len);

        match self {
            Self::NearestCentroid => {
                let shrinkage = param_f64(params, "shrinkage", 0.0)?.clamp(0.0, 1.0);
                let overall = centroid(features, train.iter().copied(), width);
                let included = centroid(features, train.iter().copied().filter(|i| labels[*i] == 1), width);
                let excluded = centroid(features, train.iter().copied().filter(|i| labels[*i] == 0), width);
                let shrink = |c: Vec<f64>| -> Vec<f64> {
                    c.iter()
                        .zip(&overall)
                        .map(|(v, m)| (1.0 - shrinkage) * v + shrinkage * m)
                        .collect()
                };
                Ok(FittedModel::Centroid {
                    included: shrink(included),
                    excluded: shrink(excluded),
                })
            }
            Self::Logistic => {
                let learning_rate = param_f64(params, "learning_rate", 0.1)?;
                let epochs = param_f64(params, "epochs", 20.0)?.max(1.0) as usize;
                let l2 = param_f64(params, "l2", 1e-4)?;
                let (w_one, w_zero) = match param_label(params, "class_weight", "balanced")? {
                    "balanced" => (
                        train.len() as f64 / (2.0 * n_one as f64),
                        train.len() as f64 / (2.0 * n_zero as f64),
                    ),
                    "none" => (1.0, 1.0),
                    other => return Err(validation_error!("unknown class weight {other:?}")),
                };

                let mut weights = vec![0.0; width];
                let mut bias = 0.0;
                let n = train.len() as f64;
                for _ in 0..epochs {
                    let mut grad_w = vec![0.0; width];
                    let mut grad_b = 0.0;
                    for &idx in train {
                        let row = &features[idx];
                        let y = f64::from(labels[idx]);
                        let sample_weight = if labels[idx] == 1 { w_one } else { w_zero };
                        let err = sample_weight * (sigmoid(dot(&weights, row) + bias) - y);
                        for (g, x) in grad_w.iter_mut().zip(row) {
                            *g += err * x;
                        }
                        grad_b += err;
                    }
                    for (w, g) in weights.iter_mut().zip(&grad_w) {
                        *w -= learning_rate * (g / n + l2 * *w);
                    }
                    bias -= learning_rate * grad_b / n;
                }
                Ok(FittedModel::Logistic { weights, bias })
            }
        }
    }
}

impl FittedModel {
    /// Probability that `row` should be included.
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        match self {
            Self::Centroid { included, excluded } => {
                let d_one = squared_distance(row, included);
                let d_zero = squared_distance(row, excluded);
                sigmoid(d_zero - d_one)
            }
            Self::Logistic { weights, bias } => sigmoid(dot(weights, row) + bias),
        }
    }
}

fn centroid(features: &[Vec<f64>], rows: impl Iterator<Item = usize>, width: usize) -> Vec<f64> {
    let mut sum = vec![0.0; width];
    let mut count = 0usize;
    for idx in rows {
        for (s, v) in sum.iter_mut().zip(&features[idx]) {
            *s += v;
        }
        count += 1;
    }
    if count > 0 {
        for s in &mut sum {
            *s /= count as f64;
        }
    }
    sum
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}
