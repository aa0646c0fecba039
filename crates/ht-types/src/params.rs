//! Parameter values in their encoded (optimizer) and decoded (backend) forms.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{HtError, HtResult};

/// A raw value as the optimizer represents it: categorical choices are indices
/// into the choice table, everything else is a real number.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EncodedValue {
    Index(usize),
    Real(f64),
}

impl EncodedValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Index(i) => *i as f64,
            Self::Real(v) => *v,
        }
    }
}

impl fmt::Display for EncodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "#{i}"),
            Self::Real(v) => write!(f, "{v}"),
        }
    }
}

/// One encoded parameter vector, keyed by full parameter name.
pub type EncodedVector = BTreeMap<String, EncodedValue>;

/// A concrete parameter value handed to the evaluation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Label(String),
}

impl ParameterValue {
    /// Numeric view of the value; labels have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Label(_) => None,
        }
    }

    pub fn as_label(&self) -> Option<&str> {
        match self {
            Self::Label(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Label(v) => write!(f, "{v}"),
        }
    }
}

/// A decoded parameter vector, keyed by full parameter name.
pub type ParameterSet = BTreeMap<String, ParameterValue>;

/// Decode map from a categorical parameter name to its ordered option labels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChoiceTable {
    choices: BTreeMap<String, Vec<String>>,
}

impl ChoiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, labels: Vec<String>) {
        self.choices.insert(name.into(), labels);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.choices.contains_key(name)
    }

    pub fn labels(&self, name: &str) -> Option<&[String]> {
        self.choices.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    /// Map a choice index back to its label.
    pub fn label(&self, name: &str, index: usize) -> HtResult<&str> {
        let labels = self
            .choices
            .get(name)
            .ok_or_else(|| HtError::Validation(format!("{name} is not a categorical parameter")))?;
        labels.get(index).map(String::as_str).ok_or_else(|| {
            HtError::Validation(format!(
                "choice index {index} out of range for {name} ({} options)",
                labels.len()
            ))
        })
    }
}

/// Which part of the review workflow a parameter configures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParameterGroup {
    Model,
    Query,
    Balance,
    Feature,
}

impl ParameterGroup {
    pub const ALL: [ParameterGroup; 4] = [Self::Model, Self::Query, Self::Balance, Self::Feature];

    /// The name prefix that tags a parameter with this group.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Model => "mdl_",
            Self::Query => "qry_",
            Self::Balance => "bal_",
            Self::Feature => "fex_",
        }
    }

    /// Split a full parameter name into its group and bare name.
    pub fn classify(name: &str) -> Option<(ParameterGroup, &str)> {
        Self::ALL.iter().find_map(|group| {
            name.strip_prefix(group.prefix())
                .filter(|bare| !bare.is_empty())
                .map(|bare| (*group, bare))
        })
    }

    /// Full parameter name for a bare name in this group.
    pub fn tag(&self, bare: &str) -> String {
        format!("{}{}", self.prefix(), bare)
    }
}

/// Parameters split by group, prefixes stripped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupedParameters {
    pub model: ParameterSet,
    pub query: ParameterSet,
    pub balance: ParameterSet,
    pub feature: ParameterSet,
}

impl GroupedParameters {
    /// Split `params` by prefix. Returns the names that carry no recognized
    /// group tag alongside the grouped result.
    pub fn split(params: &ParameterSet) -> (Self, Vec<String>) {
        let mut grouped = Self::default();
        let mut ignored = Vec::new();
        for (name, value) in params {
            match ParameterGroup::classify(name) {
                Some((group, bare)) => {
                    grouped.group_mut(group).insert(bare.to_string(), value.clone());
                }
                None => ignored.push(name.clone()),
            }
        }
        (grouped, ignored)
    }

    pub fn group(&self, group: ParameterGroup) -> &ParameterSet {
        match group {
            ParameterGroup::Model => &self.model,
            ParameterGroup::Query => &self.query,
            ParameterGroup::Balance => &self.balance,
            ParameterGroup::Feature => &self.feature,
        }
    }

    fn group_mut(&mut self, group: ParameterGroup) -> &mut ParameterSet {
        match group {
            ParameterGroup::Model => &mut self.model,
            ParameterGroup::Query => &mut self.query,
            ParameterGroup::Balance => &mut self.balance,
            ParameterGroup::Feature => &mut self.feature,
        }
    }
}

/// Read a numeric parameter from a group, falling back to `default` when the
/// search space does not define it.
pub fn param_f64(params: &ParameterSet, name: &str, default: f64) -> HtResult<f64> {
    match params.get(name) {
        None => Ok(default),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| HtError::Validation(format!("parameter {name} must be numeric, got {value}"))),
    }
}

/// Read a label parameter from a group.
pub fn param_label<'a>(params: &'a ParameterSet, name: &str, default: &'a str) -> HtResult<&'a str> {
    match params.get(name) {
        None => Ok(default),
        Some(value) => value
            .as_label()
            .ok_or_else(|| HtError::Validation(format!("parameter {name} must be a label, got {value}"))),
    }
}
