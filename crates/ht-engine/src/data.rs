//! Labelled review datasets and how they are found on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use ht_types::{DataError, HtResult};
use tracing::{debug, info};

/// File extension of datasets the CSV loader understands.
pub const DATASET_EXTENSION: &str = "csv";

/// Column names recognised as the inclusion label, in order of preference.
const LABEL_COLUMNS: [&str; 4] = ["label_included", "included", "final_included", "label"];

/// A fully labelled dataset: one numeric feature row and one 0/1 label per item.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub name: String,
    pub feature_names: Vec<String>,
    pub features: Vec<Vec<f64>>,
    pub labels: Vec<u8>,
}

impl Dataset {
    pub fn new(
        name: impl Into<String>,
        feature_names: Vec<String>,
        features: Vec<Vec<f64>>,
        labels: Vec<u8>,
    ) -> HtResult<Self> {
        let name = name.into();
        if features.len() != labels.len() {
            return Err(DataError::ParseError {
                name,
                message: format!("{} feature rows but {} labels", features.len(), labels.len()),
            }
            .into());
        }
        if let Some(row) = features.iter().find(|row| row.len() != feature_names.len()) {
            return Err(DataError::ParseError {
                name,
                message: format!("row width {} does not match {} feature columns", row.len(), feature_names.len()),
            }
            .into());
        }
        if labels.iter().any(|label| *label > 1) {
            return Err(DataError::ParseError {
                name,
                message: "labels must be 0 or 1".to_string(),
            }
            .into());
        }

        Ok(Self {
            name,
            feature_names,
            features,
            labels,
        })
    }

    pub fn n_items(&self) -> usize {
        self.labels.len()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Indices of included (relevant) items.
    pub fn positives(&self) -> Vec<usize> {
        self.indices_with_label(1)
    }

    /// Indices of excluded items.
    pub fn negatives(&self) -> Vec<usize> {
        self.indices_with_label(0)
    }

    fn indices_with_label(&self, label: u8) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == label)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Source of datasets by id.
pub trait DatasetLoader {
    fn load(&self, dataset_id: &str) -> HtResult<Dataset>;
}

/// Loads `<data_dir>/<dataset_id>.csv`.
///
/// One column carries the label (see [`LABEL_COLUMNS`]); every other column
/// whose values all parse as numbers becomes a feature. Text columns such as
/// titles and abstracts are skipped.
#[derive(Debug, Clone)]
pub struct CsvDatasetLoader {
    data_dir: PathBuf,
}

impl CsvDatasetLoader {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    pub fn dataset_path(&self, dataset_id: &str) -> PathBuf {
        self.data_dir.join(format!("{dataset_id}.{DATASET_EXTENSION}"))
    }
}

impl DatasetLoader for CsvDatasetLoader {
    fn load(&self, dataset_id: &str) -> HtResult<Dataset> {
        let path = self.dataset_path(dataset_id);
        if !path.is_file() {
            return Err(DataError::NotFound {
                name: dataset_id.to_string(),
            }
            .into());
        }
        info!("Loading dataset {} from {}", dataset_id, path.display());

        let parse_error = |message: String| DataError::ParseError {
            name: dataset_id.to_string(),
            message,
        };

        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_path(&path)
            .map_err(|e| parse_error(format!("failed to open {}: {}", path.display(), e)))?;

        let headers = rdr
            .headers()
            .map_err(|e| parse_error(format!("failed to read headers: {e}")))?
            .clone();

        let label_idx = LABEL_COLUMNS
            .iter()
            .find_map(|wanted| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(wanted)))
            .ok_or_else(|| DataError::MissingLabels {
                name: dataset_id.to_string(),
            })?;

        let mut records = Vec::new();
        for (line_num, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| parse_error(format!("bad record at line {}: {}", line_num + 2, e)))?;
            records.push(record);
        }

        let mut labels = Vec::with_capacity(records.len());
        for (line_num, record) in records.iter().enumerate() {
            let raw = record.get(label_idx).unwrap_or("").trim();
            let label = match raw.parse::<f64>() {
                Ok(v) if v == 0.0 => 0,
                Ok(v) if v == 1.0 => 1,
                _ => return Err(parse_error(format!("invalid label {:?} at line {}", raw, line_num + 2)).into()),
            };
            labels.push(label);
        }

        // Keep only columns that are numeric on every row.
        let feature_columns: Vec<usize> = (0..headers.len())
            .filter(|idx| *idx != label_idx)
            .filter(|idx| {
                records
                    .iter()
                    .all(|record| record.get(*idx).map_or(false, |v| v.trim().parse::<f64>().is_ok()))
            })
            .collect();

        let feature_names = feature_columns
            .iter()
            .map(|idx| headers.get(*idx).unwrap_or("").trim().to_string())
            .collect();
        let features = records
            .iter()
            .map(|record| {
                feature_columns
                    .iter()
                    .map(|idx| record.get(*idx).and_then(|v| v.trim().parse::<f64>().ok()).unwrap_or(0.0))
                    .collect()
            })
            .collect();

        let dataset = Dataset::new(dataset_id, feature_names, features, labels)?;
        debug!(
            "Dataset {}: {} items, {} features, {} included",
            dataset.name,
            dataset.n_items(),
            dataset.n_features(),
            dataset.positives().len()
        );
        Ok(dataset)
    }
}

/// Serves pre-built datasets, e.g. generated ones.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatasetLoader {
    datasets: HashMap<String, Dataset>,
}

impl InMemoryDatasetLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(mut self, dataset: Dataset) -> Self {
        self.datasets.insert(dataset.name.clone(), dataset);
        self
    }
}

impl DatasetLoader for InMemoryDatasetLoader {
    fn load(&self, dataset_id: &str) -> HtResult<Dataset> {
        self.datasets.get(dataset_id).cloned().ok_or_else(|| {
            DataError::NotFound {
                name: dataset_id.to_string(),
            }
            .into()
        })
    }
}

/// Names of the datasets in `data_dir` to optimize over. The keyword `all`
/// selects every dataset; otherwise only the requested names that exist.
pub fn resolve_dataset_names<P: AsRef<Path>>(data_dir: P, requested: &[String]) -> HtResult<Vec<String>> {
    let data_dir = data_dir.as_ref();
    let entries = std::fs::read_dir(data_dir).map_err(|_| DataError::DirectoryUnavailable {
        path: data_dir.to_path_buf(),
    })?;

    let select_all = requested.iter().any(|name| name == "all");
    let mut names = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|s| s.to_str()) != Some(DATASET_EXTENSION) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if select_all || requested.iter().any(|name| name == stem) {
            names.push(stem.to_string());
        }
    }

    names.sort();
    Ok(names)
}
