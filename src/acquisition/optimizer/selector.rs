use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::rngs::SmallRng;

/// chooses which search generator runs on a given maximize call
#[derive(Debug, Clone)]
pub enum Selector {
    /// always the same generator
    Fixed(usize),
    /// draw by probability per call
    Probabilistic(Vec<f64>),
    /// cycle through all generators evenly
    RoundRobin { counter: usize },
    /// deterministic weighted cycle, e.g. [4, 1] runs 0,0,0,0,1,...
    Interleaved { weights: Vec<usize>, counter: usize },
}

impl Selector {
    pub fn probabilistic(probabilities: Vec<f64>) -> Self {
        let sum = probabilities.iter().sum::<f64>();
        assert!(sum > 0.0, "probabilities must have positive mass");
        if (sum - 1.0).abs() > 1e-6 {
            Selector::Probabilistic(probabilities.iter().map(|p| p / sum).collect())
        } else {
            Selector::Probabilistic(probabilities)
        }
    }

    pub fn select(&mut self, num_strategies: usize, rng: &mut SmallRng) -> usize {
        assert!(num_strategies > 0);
        match self {
            Selector::Fixed(index) => {
                assert!(*index < num_strategies, "fixed index out of range");
                *index
            }
            Selector::Probabilistic(probabilities) => {
                assert!(probabilities.len() == num_strategies);
                WeightedIndex::new(probabilities.iter())
                    .expect("positive probabilities")
                    .sample(rng)
            }
            Selector::RoundRobin { counter } => {
                let choice = *counter % num_strategies;
                *counter += 1;
                choice
            }
            Selector::Interleaved { weights, counter } => {
                assert!(weights.len() == num_strategies);
                let total = weights.iter().sum::<usize>();
                let position = *counter % total;
                *counter += 1;
                let mut cumulative = 0;
                for (i, weight) in weights.iter().enumerate() {
                    cumulative += weight;
                    if position < cumulative {
                        return i;
                    }
                }
                0
            }
        }
    }

    pub fn reset(&mut self) {
        match self {
            Selector::RoundRobin { counter } => *counter = 0,
            Selector::Interleaved { counter, .. } => *counter = 0,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn interleaved_follows_the_declared_cycle() {
        let mut selector = Selector::Interleaved {
            weights: vec![4, 1],
            counter: 0,
        };
        let mut rng = SmallRng::seed_from_u64(0);
        let picks = (0..10)
            .map(|_| selector.select(2, &mut rng))
            .collect::<Vec<usize>>();
        assert!(picks == vec![0, 0, 0, 0, 1, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn probabilistic_renormalizes() {
        let mut selector = Selector::probabilistic(vec![3.0, 1.0]);
        let mut rng = SmallRng::seed_from_u64(42);
        let picks = (0..1000)
            .map(|_| selector.select(2, &mut rng))
            .collect::<Vec<usize>>();
        let ones = picks.iter().filter(|p| **p == 1).count();
        assert!(ones > 150 && ones < 350, "{}", ones);
    }

    #[test]
    fn round_robin_cycles_and_resets() {
        let mut selector = Selector::RoundRobin { counter: 0 };
        let mut rng = SmallRng::seed_from_u64(0);
        assert!(selector.select(3, &mut rng) == 0);
        assert!(selector.select(3, &mut rng) == 1);
        selector.reset();
        assert!(selector.select(3, &mut rng) == 0);
    }
}
