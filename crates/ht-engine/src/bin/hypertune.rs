use anyhow::Context;
use ht_engine::logging::init_logging;
use ht_engine::{OptimizationConfig, OptimizationDriver};
use ht_types::EncodedValue;

fn main() -> anyhow::Result<()> {
    let level = std::env::var("HYPERTUNE_LOG").unwrap_or_else(|_| "info".to_string());
    init_logging(&level);

    let config_path = std::env::var("HYPERTUNE_CONFIG").unwrap_or_else(|_| "hypertune.json".to_string());
    let config = OptimizationConfig::from_json_file(&config_path)
        .with_context(|| format!("loading configuration from {config_path}"))?;

    let mut driver = OptimizationDriver::from_config(&config).context("setting up the optimization run")?;
    let summary = driver.run(config.n_iter).context("optimization run failed")?;

    println!(
        "Completed {} iterations, {} trials stored in {}",
        summary.iterations,
        summary.total_trials,
        driver.layout().root().display()
    );
    if let (Some(best), Some(store)) = (summary.best, driver.store()) {
        println!("Best trial {} with loss {:.6}", best.tid, best.loss);
        for (name, value) in &best.vals {
            match value {
                EncodedValue::Index(i) => println!("  {name} = {}", store.choice_table().label(name, *i)?),
                EncodedValue::Real(v) => println!("  {name} = {v}"),
            }
        }
    }
    Ok(())
}
