use super::generator::Generator;
use super::selector::Selector;
use crate::acquisition::Acquisition;
use crate::acquisition::AcquisitionContext;
use crate::compress::SamplingStrategy;
use crate::history::Observation;
use crate::space::Configuration;
use rand::rngs::SmallRng;
use rand::Rng;
use rand::SeedableRng;

/// dense matrix over candidate configurations, with any non-finite cell
/// imputed by the owning hyperparameter's normalized default
pub fn convert_configurations_to_array(configs: &[Configuration]) -> Vec<Vec<f64>> {
    configs
        .iter()
        .map(|config| {
            config
                .to_vector()
                .into_iter()
                .enumerate()
                .map(|(i, cell)| {
                    if cell.is_finite() {
                        cell
                    } else {
                        config.space().param(i).normalized_default()
                    }
                })
                .collect()
        })
        .collect()
}

/// acquisition maximizer combining search generators behind a selector:
/// pick a generator, oversample candidates, batch-evaluate the acquisition,
/// keep the best. local search receives observations pre-sorted by
/// acquisition value so it never evaluates twice.
pub struct CompositeOptimizer {
    acq: Acquisition,
    strategies: Vec<Generator>,
    selector: Selector,
    rng: SmallRng,
    candidate_multiplier: f64,
    iter_id: usize,
}

impl CompositeOptimizer {
    pub fn new(
        acq: Acquisition,
        strategies: Vec<Generator>,
        selector: Selector,
        seed: u64,
        candidate_multiplier: f64,
    ) -> Self {
        assert!(!strategies.is_empty(), "at least one strategy is required");
        Self {
            acq,
            strategies,
            selector,
            rng: SmallRng::seed_from_u64(seed),
            candidate_multiplier,
            iter_id: 0,
        }
    }

    /// the standard pairing: local search with weight 1 - rand_prob, random
    /// search with weight rand_prob
    pub fn local_random(acq: Acquisition, rand_prob: f64, seed: u64) -> Self {
        Self::new(
            acq,
            vec![Generator::local(), Generator::Random],
            Selector::probabilistic(vec![1.0 - rand_prob, rand_prob]),
            seed,
            crate::CANDIDATE_MULTIPLIER,
        )
    }

    pub fn update_acquisition(&mut self, context: &AcquisitionContext) {
        self.acq.update(context);
    }

    pub fn acquisition(&self) -> &Acquisition {
        &self.acq
    }

    /// returns up to num_points (value, configuration) pairs, best first
    pub fn maximize(
        &mut self,
        observations: &[Observation],
        num_points: usize,
        sampling: &mut SamplingStrategy,
    ) -> Vec<(f64, Configuration)> {
        let choice = self.selector.select(self.strategies.len(), &mut self.rng);
        let strategy = self.strategies[choice].clone();

        let sorted;
        let observations = if strategy.is_local() && !observations.is_empty() {
            sorted = self.sort_by_acq(observations);
            &sorted[..]
        } else {
            observations
        };

        let n_candidates = (num_points as f64 * self.candidate_multiplier).ceil() as usize;
        let candidates = strategy.generate(observations, n_candidates, sampling, &mut self.rng);
        if candidates.is_empty() {
            log::error!("strategy generated no candidates");
            return Vec::new();
        }

        let scores = self.evaluate_batch(&candidates);
        let mut order = (0..candidates.len()).collect::<Vec<usize>>();
        order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).expect("finite scores"));
        order.truncate(num_points);
        self.iter_id += 1;
        order
            .into_iter()
            .map(|i| (scores[i], candidates[i].clone()))
            .collect()
    }

    fn evaluate_batch(&self, configs: &[Configuration]) -> Vec<f64> {
        self.acq.compute(&convert_configurations_to_array(configs))
    }

    /// descending by acquisition value with a uniform random tie-breaker
    /// (lexsort with the acquisition as the primary key)
    fn sort_by_acq(&mut self, observations: &[Observation]) -> Vec<Observation> {
        let configs = observations
            .iter()
            .map(|o| o.config.clone())
            .collect::<Vec<Configuration>>();
        let scores = self.evaluate_batch(&configs);
        let noise = (0..scores.len())
            .map(|_| self.rng.random::<f64>())
            .collect::<Vec<f64>>();
        let mut order = (0..observations.len()).collect::<Vec<usize>>();
        order.sort_by(|&a, &b| {
            scores[b]
                .partial_cmp(&scores[a])
                .expect("finite scores")
                .then(noise[b].partial_cmp(&noise[a]).expect("finite noise"))
        });
        order
            .into_iter()
            .map(|i| observations[i].clone())
            .collect()
    }

    pub fn reset(&mut self) {
        self.iter_id = 0;
        self.selector.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::Predictor;
    use crate::acquisition::TaskContext;
    use crate::compress::Compressor;
    use crate::compress::IdentityCompressor;
    use crate::history::ExtraInfo;
    use crate::history::TrialState;
    use crate::space::ConfigSpace;
    use crate::space::Hyperparameter;
    use crate::space::Value;
    use crate::surrogate::BaseKind;
    use std::sync::Arc;

    fn space() -> Arc<ConfigSpace> {
        ConfigSpace::new(vec![Hyperparameter::Integer {
            name: "a".to_string(),
            lower: 0,
            upper: 30,
            default: 15,
        }])
        .unwrap()
    }

    fn optimizer() -> CompositeOptimizer {
        let x = (0..=30).map(|i| vec![i as f64 / 30.0]).collect::<Vec<_>>();
        let y = x.iter().map(|r| (r[0] - 0.2).abs()).collect::<Vec<f64>>();
        let mut model = BaseKind::Prf.build(3);
        model.train(&x, &y);
        let mut acq = Acquisition::ei();
        acq.update(&AcquisitionContext::single(TaskContext {
            predictor: Predictor::Base(model),
            eta: Some(0.5),
            num_data: y.len(),
        }));
        CompositeOptimizer::local_random(acq, crate::DEFAULT_RAND_PROB, 17)
    }

    fn observations(space: &Arc<ConfigSpace>, values: &[i64]) -> Vec<Observation> {
        values
            .iter()
            .map(|v| {
                let mut config = space.default_configuration();
                config.set("a", Value::Int(*v));
                Observation {
                    config,
                    objectives: vec![*v as f64],
                    trial_state: TrialState::Success,
                    elapsed_time: 0.0,
                    extra_info: ExtraInfo::default(),
                }
            })
            .collect()
    }

    #[test]
    fn maximize_returns_sorted_pairs() {
        let space = space();
        let mut optimizer = optimizer();
        let mut sampling = IdentityCompressor::new(space.clone()).get_sampling_strategy(5);
        let obs = observations(&space, &[3, 9, 21, 27]);
        let best = optimizer.maximize(&obs, 8, &mut sampling);
        assert!(!best.is_empty());
        assert!(best.len() <= 8);
        for pair in best.windows(2) {
            assert!(pair[0].0 >= pair[1].0);
        }
    }

    #[test]
    fn imputation_replaces_nonfinite_cells() {
        let space = space();
        let config = space.default_configuration();
        let rows = convert_configurations_to_array(&[config]);
        assert!(rows[0].iter().all(|v| v.is_finite()));
    }

    #[test]
    fn maximize_is_deterministic_given_seed() {
        let space = space();
        let mut sampling_a = IdentityCompressor::new(space.clone()).get_sampling_strategy(5);
        let mut sampling_b = IdentityCompressor::new(space.clone()).get_sampling_strategy(5);
        let obs = observations(&space, &[3, 9, 21]);
        let a = optimizer().maximize(&obs, 6, &mut sampling_a);
        let b = optimizer().maximize(&obs, 6, &mut sampling_b);
        let configs_a = a.iter().map(|(_, c)| c.canonical()).collect::<Vec<_>>();
        let configs_b = b.iter().map(|(_, c)| c.canonical()).collect::<Vec<_>>();
        assert!(configs_a == configs_b);
    }
}
