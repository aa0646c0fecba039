//! Search space definitions and the encode/decode step between optimizer
//! vectors and backend parameters.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use ht_types::{
    validation_error, ChoiceTable, EncodedValue, EncodedVector, HtResult, ParameterSet, ParameterValue,
};

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Full, group-tagged parameter name (e.g. "mdl_shrinkage").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Categorical choices, encoded as an index into `labels`.
    Choice { labels: Vec<String> },
}

impl ParameterKind {
    /// Draw one encoded value.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> EncodedValue {
        match self {
            Self::FloatRange { low, high } => EncodedValue::Real(rng.gen_range(*low..=*high)),
            Self::IntRange { low, high } => EncodedValue::Real(rng.gen_range(*low..=*high) as f64),
            Self::LogUniform { low, high } => {
                let log_val: f64 = rng.gen_range(low.ln()..=high.ln());
                EncodedValue::Real(log_val.exp())
            }
            Self::Choice { labels } => EncodedValue::Index(rng.gen_range(0..labels.len())),
        }
    }

    /// Move `value` by a small random step, staying inside the range.
    /// Choices are resampled.
    pub fn perturb<R: Rng>(&self, value: EncodedValue, rng: &mut R) -> EncodedValue {
        match (self, value) {
            (Self::FloatRange { low, high }, EncodedValue::Real(v)) => {
                let noise = rng.gen_range(-0.1..0.1_f64) * (high - low);
                EncodedValue::Real((v + noise).clamp(*low, *high))
            }
            (Self::IntRange { low, high }, EncodedValue::Real(v)) => {
                let delta: i64 = rng.gen_range(-2..=2);
                EncodedValue::Real(((v.round() as i64) + delta).clamp(*low, *high) as f64)
            }
            (Self::LogUniform { low, high }, EncodedValue::Real(v)) if v > 0.0 => {
                let noise = rng.gen_range(-0.1..0.1_f64) * (high.ln() - low.ln());
                EncodedValue::Real((v.ln() + noise).exp().clamp(*low, *high))
            }
            _ => self.sample(rng),
        }
    }

    fn decode(&self, name: &str, value: EncodedValue) -> HtResult<ParameterValue> {
        match (self, value) {
            (Self::Choice { labels }, EncodedValue::Index(i)) => labels
                .get(i)
                .map(|label| ParameterValue::Label(label.clone()))
                .ok_or_else(|| validation_error!("choice index {i} out of range for {name}")),
            (Self::Choice { .. }, EncodedValue::Real(v)) => {
                Err(validation_error!("{name} expects a choice index, got {v}"))
            }
            (Self::IntRange { .. }, value) => Ok(ParameterValue::Int(value.as_f64().round() as i64)),
            (Self::FloatRange { .. } | Self::LogUniform { .. }, value) => {
                Ok(ParameterValue::Float(value.as_f64()))
            }
        }
    }

    fn validate(&self, name: &str) -> HtResult<()> {
        let ok = match self {
            Self::FloatRange { low, high } => low.is_finite() && high.is_finite() && low <= high,
            Self::IntRange { low, high } => low <= high,
            Self::LogUniform { low, high } => *low > 0.0 && high.is_finite() && low <= high,
            Self::Choice { labels } => !labels.is_empty(),
        };
        if ok {
            Ok(())
        } else {
            Err(validation_error!("invalid range for parameter {name}: {:?}", self))
        }
    }
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::FloatRange { low, high },
        });
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::IntRange { low, high },
        });
        self
    }

    pub fn add_log_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::LogUniform { low, high },
        });
        self
    }

    pub fn add_choice<S: Into<String>>(mut self, name: impl Into<String>, labels: Vec<S>) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Choice {
                labels: labels.into_iter().map(Into::into).collect(),
            },
        });
        self
    }

    /// Append every dimension of `other`.
    pub fn merge(mut self, other: SearchSpace) -> Self {
        self.parameters.extend(other.parameters);
        self
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Reject duplicate names and empty or inverted ranges.
    pub fn validate(&self) -> HtResult<()> {
        let mut seen = HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(validation_error!("duplicate parameter {}", param.name));
            }
            param.kind.validate(&param.name)?;
        }
        Ok(())
    }

    /// Option labels of every categorical dimension.
    pub fn choice_table(&self) -> ChoiceTable {
        let mut table = ChoiceTable::new();
        for param in &self.parameters {
            if let ParameterKind::Choice { labels } = &param.kind {
                table.insert(param.name.clone(), labels.clone());
            }
        }
        table
    }

    /// Draw an independent value for every dimension.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> EncodedVector {
        self.parameters
            .iter()
            .map(|param| (param.name.clone(), param.kind.sample(rng)))
            .collect()
    }

    /// Turn an optimizer vector into the values the backend consumes.
    pub fn decode(&self, vector: &EncodedVector) -> HtResult<ParameterSet> {
        let mut decoded = ParameterSet::new();
        for param in &self.parameters {
            let value = vector
                .get(&param.name)
                .ok_or_else(|| validation_error!("vector is missing parameter {}", param.name))?;
            decoded.insert(param.name.clone(), param.kind.decode(&param.name, *value)?);
        }
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn sample_space() -> SearchSpace {
        SearchSpace::new()
            .add_int("mdl_epochs", 5, 15)
            .add_float("mdl_shrinkage", 0.0, 1.0)
            .add_log_uniform("mdl_learning_rate", 1e-3, 1.0)
            .add_choice("mdl_class_weight", vec!["balanced", "none"])
    }

    #[test]
    fn samples_respect_bounds() {
        let space = sample_space();
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        for _ in 0..100 {
            let vector = space.sample(&mut rng);
            match vector.get("mdl_epochs") {
                Some(EncodedValue::Real(v)) => assert!(*v >= 5.0 && *v <= 15.0 && v.fract() == 0.0),
                other => panic!("unexpected mdl_epochs value: {other:?}"),
            }
            match vector.get("mdl_learning_rate") {
                Some(EncodedValue::Real(v)) => assert!(*v >= 1e-3 && *v <= 1.0, "lr out of bounds: {v}"),
                other => panic!("unexpected mdl_learning_rate value: {other:?}"),
            }
            match vector.get("mdl_class_weight") {
                Some(EncodedValue::Index(i)) => assert!(*i < 2),
                other => panic!("unexpected mdl_class_weight value: {other:?}"),
            }
        }
    }

    #[test]
    fn decode_maps_choices_and_integers() {
        let space = sample_space();
        let mut vector = EncodedVector::new();
        vector.insert("mdl_epochs".into(), EncodedValue::Real(9.0));
        vector.insert("mdl_shrinkage".into(), EncodedValue::Real(0.25));
        vector.insert("mdl_learning_rate".into(), EncodedValue::Real(0.01));
        vector.insert("mdl_class_weight".into(), EncodedValue::Index(1));

        let decoded = space.decode(&vector).unwrap();
        assert_eq!(decoded["mdl_epochs"], ParameterValue::Int(9));
        assert_eq!(decoded["mdl_shrinkage"], ParameterValue::Float(0.25));
        assert_eq!(decoded["mdl_class_weight"], ParameterValue::Label("none".into()));
    }

    #[test]
    fn decode_rejects_missing_and_out_of_range() {
        let space = sample_space();
        let mut vector = space.sample(&mut ChaCha8Rng::seed_from_u64(1));
        vector.insert("mdl_class_weight".into(), EncodedValue::Index(5));
        assert!(space.decode(&vector).is_err());

        vector.remove("mdl_class_weight");
        assert!(space.decode(&vector).is_err());
    }

    #[test]
    fn choice_table_lists_categorical_dimensions() {
        let table = sample_space().choice_table();
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.labels("mdl_class_weight").unwrap(),
            &["balanced".to_string(), "none".to_string()]
        );
    }

    #[test]
    fn validate_catches_duplicates_and_bad_ranges() {
        assert!(sample_space().validate().is_ok());
        assert!(SearchSpace::new()
            .add_float("fex_clip", 1.0, 2.0)
            .merge(SearchSpace::new().add_float("fex_clip", 0.0, 1.0))
            .validate()
            .is_err());
        assert!(SearchSpace::new().add_log_uniform("mdl_l2", 0.0, 1.0).validate().is_err());
        assert!(SearchSpace::new()
            .add_choice::<String>("mdl_kind", vec![])
            .validate()
            .is_err());
    }

    #[test]
    fn perturb_stays_in_range() {
        let kind = ParameterKind::IntRange { low: 5, high: 7 };
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..50 {
            let v = kind.perturb(EncodedValue::Real(7.0), &mut rng).as_f64();
            assert!((5.0..=7.0).contains(&v));
        }
    }
}
