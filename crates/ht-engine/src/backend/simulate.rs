//! Simulated active-learning screening.
//!
//! Starting from the prior items, the loop repeatedly trains on everything
//! read so far, scores the unread pool and reads the next `n_instances`
//! queried items. It stops once every inclusion has been read, the reading
//! budget is spent, or the pool is empty.

use ht_types::{GroupedParameters, HtResult};
use rand::Rng;

use super::{QueryStrategy, Workflow};
use crate::config::ActiveSettings;

/// Time at which every item was read: priors at 0, the k-th read item at k,
/// unread items at the item count.
pub fn simulate_review<R: Rng>(
    workflow: &Workflow,
    query: QueryStrategy,
    params: &GroupedParameters,
    features: &[Vec<f64>],
    labels: &[u8],
    priors: &[usize],
    settings: &ActiveSettings,
    rng: &mut R,
) -> HtResult<Vec<f64>> {
    let n_items = labels.len();
    let mut times = vec![n_items as f64; n_items];
    let mut unread = vec![true; n_items];
    for &idx in priors {
        times[idx] = 0.0;
        unread[idx] = false;
    }

    let mut labelled = priors.to_vec();
    let mut remaining = (0..n_items).filter(|i| unread[*i] && labels[*i] == 1).count();
    let budget = settings.n_papers.unwrap_or(n_items);
    let mut n_read = 0usize;

    while remaining > 0 && n_read < budget {
        let pool: Vec<usize> = (0..n_items).filter(|i| unread[*i]).collect();
        if pool.is_empty() {
            break;
        }

        let train = workflow.balance.sample(&params.balance, &labelled, labels, rng)?;
        let model = workflow.model.fit(&params.model, features, labels, &train)?;
        let proba: Vec<f64> = (0..n_items)
            .map(|i| if unread[i] { model.predict_proba(&features[i]) } else { 0.0 })
            .collect();

        let n = settings.n_instances.min(budget - n_read);
        for idx in query.select(&params.query, &proba, &pool, n, rng)? {
            n_read += 1;
            times[idx] = n_read as f64;
            unread[idx] = false;
            labelled.push(idx);
            if labels[idx] == 1 {
                remaining -= 1;
            }
        }
    }

    Ok(times)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BalanceStrategy, Classifier, FeatureExtraction};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn workflow() -> Workflow {
        Workflow {
            feature: FeatureExtraction::Raw,
            balance: BalanceStrategy::Simple,
            model: Classifier::NearestCentroid,
            query: Some(QueryStrategy::Max),
        }
    }

    fn settings(n_papers: Option<usize>) -> ActiveSettings {
        ActiveSettings {
            n_instances: 1,
            n_papers,
            n_included: 1,
            n_excluded: 1,
        }
    }

    #[test]
    fn separable_inclusions_are_read_first() {
        let features: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let labels = vec![0, 0, 0, 0, 0, 0, 0, 1, 1, 1];
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let times = simulate_review(
            &workflow(),
            QueryStrategy::Max,
            &GroupedParameters::default(),
            &features,
            &labels,
            &[9, 0],
            &settings(None),
            &mut rng,
        )
        .unwrap();

        assert_eq!(times[9], 0.0);
        assert_eq!(times[0], 0.0);
        assert_eq!(times[8], 1.0);
        assert_eq!(times[7], 2.0);
        // Stopped after the last inclusion, the rest stays unread
        assert_eq!(times[1], 10.0);
    }

    #[test]
    fn budget_limits_reading() {
        let features: Vec<Vec<f64>> = (0..6).map(|i| vec![-(i as f64)]).collect();
        let labels = vec![1, 0, 0, 0, 0, 1];
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let times = simulate_review(
            &workflow(),
            QueryStrategy::Max,
            &GroupedParameters::default(),
            &features,
            &labels,
            &[0, 1],
            &settings(Some(2)),
            &mut rng,
        )
        .unwrap();

        let read = times.iter().filter(|t| **t > 0.0 && **t < 6.0).count();
        assert_eq!(read, 2);
        assert_eq!(times[5], 6.0);
    }
}
