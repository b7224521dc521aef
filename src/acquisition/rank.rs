use super::build_single;
use super::AcquisitionContext;
use super::Single;
use super::SingleKind;
use crate::Weight;

/// transfer acquisition combining per-task inner acquisitions by weighted
/// rank-sum. ranks are computed within each task (descending, rank 1 is
/// best, ties averaged); the combined rank is flipped so larger is better.
/// the only_target fast path returns the target acquisition unchanged.
#[derive(Debug, Clone)]
pub struct WeightedRank {
    inner: SingleKind,
    pub only_target: bool,
    weights: Vec<Weight>,
    funcs: Vec<Single>,
}

impl WeightedRank {
    pub fn new(inner: SingleKind) -> Self {
        Self {
            inner,
            only_target: true,
            weights: Vec::new(),
            funcs: Vec::new(),
        }
    }

    pub fn update(&mut self, context: &AcquisitionContext) {
        assert!(!context.tasks.is_empty(), "weighted rank needs a task");
        self.weights = context.weights.clone();
        self.funcs = context
            .tasks
            .iter()
            .map(|task| build_single(self.inner, task))
            .collect();
    }

    pub fn compute(&self, x: &[Vec<f64>]) -> Vec<f64> {
        assert!(!self.funcs.is_empty(), "acquisition updated before use");
        if self.only_target || self.funcs.len() == 1 {
            return self.funcs[self.funcs.len() - 1].compute(x);
        }
        let rankings = self
            .funcs
            .iter()
            .map(|f| descending_ranks(&f.compute(x)))
            .collect::<Vec<Vec<f64>>>();
        let mut combined = vec![0.0; x.len()];
        for (ranking, weight) in rankings.iter().zip(self.weights.iter()) {
            for (c, r) in combined.iter_mut().zip(ranking.iter()) {
                *c += weight * r;
            }
        }
        let max = combined.iter().cloned().fold(f64::MIN, f64::max);
        combined.iter().map(|c| max - c).collect()
    }
}

/// average ranks with the largest value ranked 1
pub fn descending_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut order = (0..n).collect::<Vec<usize>>();
    order.sort_by(|&a, &b| values[b].partial_cmp(&values[a]).expect("finite scores"));
    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let average = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            ranks[order[k]] = average;
        }
        i = j + 1;
    }
    ranks
}
