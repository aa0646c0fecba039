use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use ht_engine::OptimizationConfig;
use ht_types::ReviewMode;

/// Write a small labelled review dataset: every fourth item is an inclusion
/// and scores higher on `relevance`.
pub fn write_dataset(dir: &Path, name: &str, n_items: usize, shift: f64) {
    let mut csv = String::from("title,relevance,length,label_included\n");
    for i in 0..n_items {
        let label = u8::from(i % 4 == 0);
        let relevance = f64::from(label) * 1.5 + ((i * 7) % 10) as f64 / 10.0 + shift;
        let length = ((i * 13) % 17) as f64;
        writeln!(csv, "Paper {i},{relevance},{length},{label}").unwrap();
    }
    fs::write(dir.join(format!("{name}.csv")), csv).unwrap();
}

pub fn write_datasets(dir: &Path) {
    write_dataset(dir, "ace", 32, 0.0);
    write_dataset(dir, "ptsd", 28, 0.3);
}

pub fn passive_config(data_dir: &Path, output_dir: &Path) -> OptimizationConfig {
    OptimizationConfig::new(ReviewMode::Passive)
        .with_datasets(vec!["all"])
        .with_data_dir(data_dir)
        .with_output_dir(output_dir)
        .with_runs(2)
        .with_seed(7)
        .with_workflow("logistic", None, "undersample", "standardize")
}
