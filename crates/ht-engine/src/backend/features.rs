use ht_optimizer::SearchSpace;
use ht_types::{config_error, param_f64, validation_error, HtResult, ParameterGroup, ParameterSet};

/// Turns raw dataset columns into the matrix the model is trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureExtraction {
    /// Use the numeric columns as they are.
    Raw,
    /// Z-score every column over the whole dataset, then clip to `±fex_clip`.
    Standardize,
}

impl FeatureExtraction {
    pub fn from_name(name: &str) -> HtResult<Self> {
        match name {
            "raw" => Ok(Self::Raw),
            "standardize" => Ok(Self::Standardize),
            other => Err(config_error!("unknown feature extraction {other:?}")),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Standardize => "standardize",
        }
    }

    pub fn search_space(&self) -> SearchSpace {
        match self {
            Self::Raw => SearchSpace::new(),
            Self::Standardize => SearchSpace::new().add_float(ParameterGroup::Feature.tag("clip"), 1.0, 10.0),
        }
    }

    pub fn fit_transform(&self, params: &ParameterSet, features: &[Vec<f64>]) -> HtResult<Vec<Vec<f64>>> {
        match self {
            Self::Raw => Ok(features.to_vec()),
            Self::Standardize => {
                let clip = param_f64(params, "clip", 5.0)?;
                if clip <= 0.0 {
                    return Err(validation_error!("fex_clip must be positive, got {clip}"));
                }
                Ok(standardize(features, clip))
            }
        }
    }
}

fn standardize(features: &[Vec<f64>], clip: f64) -> Vec<Vec<f64>> {
    let n = features.len();
    let width = features.first().map_or(0, Vec::len);
    if n == 0 {
        return Vec::new();
    }

    let mut mean = vec![0.0; width];
    for row in features {
        for (m, v) in mean.iter_mut().zip(row) {
            *m += v / n as f64;
        }
    }
    let mut std = vec![0.0; width];
    for row in features {
        for ((s, v), m) in std.iter_mut().zip(row).zip(&mean) {
            *s += (v - m).powi(2) / n as f64;
        }
    }
    for s in &mut std {
        *s = s.sqrt();
    }

    features
        .iter()
        .map(|row| {
            row.iter()
                .zip(mean.iter().zip(&std))
                .map(|(v, (m, s))| if *s > 0.0 { ((v - m) / s).clamp(-clip, clip) } else { 0.0 })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ht_types::ParameterValue;

    #[test]
    fn names_round_trip() {
        for fe in [FeatureExtraction::Raw, FeatureExtraction::Standardize] {
            assert_eq!(FeatureExtraction::from_name(fe.name()).unwrap(), fe);
        }
        assert!(FeatureExtraction::from_name("tfidf").is_err());
    }

    #[test]
    fn standardize_centers_and_clips() {
        let features = vec![vec![1.0, 4.0], vec![3.0, 4.0], vec![5.0, 4.0], vec![100.0, 4.0]];
        let mut params = ParameterSet::new();
        params.insert("clip".into(), ParameterValue::Float(1.0));

        let out = FeatureExtraction::Standardize.fit_transform(&params, &features).unwrap();
        assert!(out.iter().all(|row| row[0].abs() <= 1.0));
        assert_eq!(out[3][0], 1.0);
        // Constant columns carry no information
        assert!(out.iter().all(|row| row[1] == 0.0));
    }

    #[test]
    fn search_space_is_tagged() {
        let space = FeatureExtraction::Standardize.search_space();
        assert!(space.get("fex_clip").is_some());
        assert!(FeatureExtraction::Raw.search_space().is_empty());
    }
}
