use ht_optimizer::SearchSpace;
use ht_types::{config_error, param_f64, HtResult, ParameterGroup, ParameterSet};
use rand::Rng;

/// Picks the next items to screen from the unlabelled pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStrategy {
    /// Highest inclusion probability first.
    Max,
    /// Each pick is the most probable item with probability `qry_mix_ratio`,
    /// otherwise a random pool item.
    MaxRandom,
}

impl QueryStrategy {
    pub fn from_name(name: &str) -> HtResult<Self> {
        match name {
            "max" => Ok(Self::Max),
            "max_random" => Ok(Self::MaxRandom),
            other => Err(config_error!("unknown query strategy {other:?}")),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Max => "max",
            Self::MaxRandom => "max_random",
        }
    }

    pub fn search_space(&self) -> SearchSpace {
        match self {
            Self::Max => SearchSpace::new(),
            Self::MaxRandom => SearchSpace::new().add_float(ParameterGroup::Query.tag("mix_ratio"), 0.0, 1.0),
        }
    }

    /// Select up to `n` items from `pool`. `proba` is indexed by item.
    pub fn select<R: Rng>(
        &self,
        params: &ParameterSet,
        proba: &[f64],
        pool: &[usize],
        n: usize,
        rng: &mut R,
    ) -> HtResult<Vec<usize>> {
        let mix_ratio = match self {
            Self::Max => 1.0,
            Self::MaxRandom => param_f64(params, "mix_ratio", 0.95)?,
        };

        // Ties keep pool order, so equal scores resolve deterministically.
        let mut ranked = pool.to_vec();
        ranked.sort_by(|a, b| proba[*b].total_cmp(&proba[*a]));

        let mut selected = Vec::with_capacity(n.min(ranked.len()));
        while selected.len() < n && !ranked.is_empty() {
            let pos = if mix_ratio >= 1.0 || rng.gen::<f64>() < mix_ratio {
                0
            } else {
                rng.gen_range(0..ranked.len())
            };
            selected.push(ranked.remove(pos));
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ht_types::ParameterValue;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn max_takes_highest_scores() {
        let proba = vec![0.1, 0.9, 0.5, 0.7];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let picked = QueryStrategy::Max
            .select(&ParameterSet::new(), &proba, &[0, 2, 3], 2, &mut rng)
            .unwrap();
        assert_eq!(picked, vec![3, 2]);
    }

    #[test]
    fn selection_never_exceeds_pool() {
        let proba = vec![0.1, 0.2];
        let mut params = ParameterSet::new();
        params.insert("mix_ratio".into(), ParameterValue::Float(0.0));
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let mut picked = QueryStrategy::MaxRandom
            .select(&params, &proba, &[0, 1], 5, &mut rng)
            .unwrap();
        picked.sort();
        assert_eq!(picked, vec![0, 1]);
    }

    #[test]
    fn names_round_trip() {
        for q in [QueryStrategy::Max, QueryStrategy::MaxRandom] {
            assert_eq!(QueryStrategy::from_name(q.name()).unwrap(), q);
        }
        assert!(QueryStrategy::MaxRandom.search_space().get("qry_mix_ratio").is_some());
    }
}
