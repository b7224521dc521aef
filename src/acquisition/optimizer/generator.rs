use crate::compress::SamplingStrategy;
use crate::history::Observation;
use crate::space::Configuration;
use rand::rngs::SmallRng;
use std::collections::BTreeSet;

/// candidate generators for acquisition maximization. local search walks
/// one-exchange neighborhoods of the best observations (the caller pre-sorts
/// them by acquisition value); random search draws from the sampling
/// strategy.
#[derive(Debug, Clone)]
pub enum Generator {
    Random,
    Local {
        max_neighbors: usize,
        n_start_points: usize,
    },
}

impl Generator {
    pub fn local() -> Self {
        Generator::Local {
            max_neighbors: crate::LOCAL_MAX_NEIGHBORS,
            n_start_points: crate::LOCAL_START_POINTS,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Generator::Local { .. })
    }

    pub fn generate(
        &self,
        observations: &[Observation],
        num_points: usize,
        sampling: &mut SamplingStrategy,
        rng: &mut SmallRng,
    ) -> Vec<Configuration> {
        match self {
            Generator::Random => {
                let mut configs = sampling.sample(num_points);
                for config in configs.iter_mut() {
                    config.origin = "Random Search".to_string();
                }
                configs
            }
            Generator::Local {
                max_neighbors,
                n_start_points,
            } => {
                let starts = observations
                    .iter()
                    .take(*n_start_points)
                    .map(|o| &o.config)
                    .collect::<Vec<&Configuration>>();
                if starts.is_empty() {
                    let mut configs = sampling.sample(num_points);
                    for config in configs.iter_mut() {
                        config.origin = "Local Search (Random Fallback)".to_string();
                    }
                    return configs;
                }
                let mut seen = BTreeSet::new();
                let mut candidates = Vec::new();
                for start in starts {
                    for mut neighbor in start.neighbors(rng).into_iter().take(*max_neighbors) {
                        if seen.insert(neighbor.canonical()) {
                            neighbor.origin = "Local Search Neighbor".to_string();
                            candidates.push(neighbor);
                        }
                    }
                }
                candidates.truncate(num_points * 2);
                candidates
            }
        }
    }
}
