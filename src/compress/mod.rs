use crate::history::History;
use crate::space::ConfigSpace;
use crate::space::Configuration;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::sync::Arc;

/// seeded sampler over the sample space, handed out by the compressor and
/// owned by the advisor
#[derive(Debug, Clone)]
pub struct SamplingStrategy {
    space: Arc<ConfigSpace>,
    rng: SmallRng,
}

impl SamplingStrategy {
    pub fn new(space: Arc<ConfigSpace>, seed: u64) -> Self {
        Self {
            space,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn space(&self) -> &Arc<ConfigSpace> {
        &self.space
    }

    pub fn sample(&mut self, n: usize) -> Vec<Configuration> {
        (0..n).map(|_| self.space.sample(&mut self.rng)).collect()
    }
}

/// space-compression seam consumed by the advisor. implementations may
/// project the original space down for the surrogate and widen or narrow it
/// for sampling; the identity implementation keeps both equal to the
/// original.
pub trait Compressor: Send + Sync {
    /// (surrogate_space, sample_space), possibly informed by source
    /// histories and their similarities
    fn compress_space(
        &self,
        space_history: &[History],
        source_similarities: &BTreeMap<usize, f64>,
    ) -> (Arc<ConfigSpace>, Arc<ConfigSpace>);

    fn surrogate_space(&self) -> Arc<ConfigSpace>;

    fn sample_space(&self) -> Arc<ConfigSpace>;

    fn get_sampling_strategy(&self, seed: u64) -> SamplingStrategy {
        SamplingStrategy::new(self.sample_space(), seed)
    }

    /// whether sampled candidates live in a reduced space and must be
    /// lifted back to the original before evaluation
    fn needs_unproject(&self) -> bool;

    /// lift candidates from the sample space into the original space,
    /// caching the low-dimensional projection on each configuration
    fn unproject_points(&self, configs: &mut [Configuration]);

    /// project an original-space configuration into the sample space,
    /// returning the low-dimensional values by parameter name
    fn project_point(&self, config: &Configuration) -> Option<BTreeMap<String, f64>>;

    /// training-input representation of a configuration
    fn convert_config_to_surrogate_space(&self, config: &Configuration) -> Configuration;

    /// representation of an original-space configuration in the sample
    /// space (used when seeding warm-start candidates)
    fn convert_config_to_sample_space(&self, config: &Configuration) -> Configuration;

    /// map source observations into the surrogate space
    fn transform_source_data(&self, histories: &[History]) -> Vec<History>;

    /// refresh the compression from accumulated target observations;
    /// returns true iff the spaces changed shape
    fn update_compression(&self, history: &History) -> bool;

    fn get_compression_summary(&self) -> serde_json::Value;
}

/// no compression: surrogate space and sample space are the original space
pub struct IdentityCompressor {
    space: Arc<ConfigSpace>,
}

impl IdentityCompressor {
    pub fn new(space: Arc<ConfigSpace>) -> Self {
        Self { space }
    }
}

impl Compressor for IdentityCompressor {
    fn compress_space(
        &self,
        _space_history: &[History],
        _source_similarities: &BTreeMap<usize, f64>,
    ) -> (Arc<ConfigSpace>, Arc<ConfigSpace>) {
        (self.space.clone(), self.space.clone())
    }

    fn surrogate_space(&self) -> Arc<ConfigSpace> {
        self.space.clone()
    }

    fn sample_space(&self) -> Arc<ConfigSpace> {
        self.space.clone()
    }

    fn needs_unproject(&self) -> bool {
        false
    }

    fn unproject_points(&self, _configs: &mut [Configuration]) {}

    fn project_point(&self, _config: &Configuration) -> Option<BTreeMap<String, f64>> {
        None
    }

    fn convert_config_to_surrogate_space(&self, config: &Configuration) -> Configuration {
        config.clone()
    }

    fn convert_config_to_sample_space(&self, config: &Configuration) -> Configuration {
        config.clone()
    }

    fn transform_source_data(&self, histories: &[History]) -> Vec<History> {
        histories.to_vec()
    }

    fn update_compression(&self, _history: &History) -> bool {
        false
    }

    fn get_compression_summary(&self) -> serde_json::Value {
        serde_json::json!({ "strategy": "none", "dimension": self.space.len() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::Hyperparameter;

    fn space() -> Arc<ConfigSpace> {
        ConfigSpace::new(vec![Hyperparameter::Integer {
            name: "a".to_string(),
            lower: 0,
            upper: 4,
            default: 2,
        }])
        .unwrap()
    }

    #[test]
    fn identity_keeps_both_spaces() {
        let space = space();
        let compressor = IdentityCompressor::new(space.clone());
        let (surrogate, sample) = compressor.compress_space(&[], &BTreeMap::new());
        assert!(surrogate.len() == space.len());
        assert!(sample.len() == space.len());
        assert!(!compressor.needs_unproject());
    }

    #[test]
    fn identity_update_is_idempotent() {
        let space = space();
        let compressor = IdentityCompressor::new(space.clone());
        let history = History::new("t", space);
        assert!(!compressor.update_compression(&history));
        assert!(!compressor.update_compression(&history));
    }

    #[test]
    fn sampling_strategy_is_deterministic_given_seed() {
        let space = space();
        let compressor = IdentityCompressor::new(space);
        let mut a = compressor.get_sampling_strategy(9);
        let mut b = compressor.get_sampling_strategy(9);
        assert!(a.sample(5) == b.sample(5));
    }
}
