use crate::VAR_FLOOR;
use rand::rngs::SmallRng;
use rand::Rng;
use rand::SeedableRng;

const MIN_SAMPLES_SPLIT: usize = 2;

/// probabilistic random forest: an ensemble of regression trees fit on
/// bootstrap resamples with sqrt-of-dimensions feature subsetting. the
/// prediction is the across-tree mean and variance per input point.
#[derive(Debug, Clone)]
pub struct ProbabilisticForest {
    num_trees: usize,
    seed: u64,
    trees: Vec<Node>,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        dim: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl ProbabilisticForest {
    pub fn new(num_trees: usize, seed: u64) -> Self {
        Self {
            num_trees,
            seed,
            trees: Vec::new(),
        }
    }

    pub fn is_trained(&self) -> bool {
        !self.trees.is_empty()
    }

    pub fn train(&mut self, x: &[Vec<f64>], y: &[f64]) {
        assert!(x.len() == y.len() && !x.is_empty());
        self.trees = (0..self.num_trees)
            .map(|t| {
                let mut rng = SmallRng::seed_from_u64(self.seed.wrapping_add(t as u64));
                let indices = (0..x.len())
                    .map(|_| rng.random_range(0..x.len()))
                    .collect::<Vec<usize>>();
                Self::grow(x, y, &indices, &mut rng)
            })
            .collect();
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> (Vec<f64>, Vec<f64>) {
        assert!(self.is_trained(), "forest must be trained before predict");
        let mut mu = Vec::with_capacity(x.len());
        let mut var = Vec::with_capacity(x.len());
        for row in x {
            let votes = self
                .trees
                .iter()
                .map(|t| Self::walk(t, row))
                .collect::<Vec<f64>>();
            let mean = votes.iter().sum::<f64>() / votes.len() as f64;
            let spread =
                votes.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / votes.len() as f64;
            mu.push(mean);
            var.push(spread.max(VAR_FLOOR));
        }
        (mu, var)
    }

    fn walk(node: &Node, row: &[f64]) -> f64 {
        match node {
            Node::Leaf(value) => *value,
            Node::Split {
                dim,
                threshold,
                left,
                right,
            } => {
                if row[*dim] <= *threshold {
                    Self::walk(left, row)
                } else {
                    Self::walk(right, row)
                }
            }
        }
    }

    fn grow(x: &[Vec<f64>], y: &[f64], indices: &[usize], rng: &mut SmallRng) -> Node {
        let mean = indices.iter().map(|&i| y[i]).sum::<f64>() / indices.len() as f64;
        if indices.len() < MIN_SAMPLES_SPLIT {
            return Node::Leaf(mean);
        }
        if indices.iter().all(|&i| y[i] == y[indices[0]]) {
            return Node::Leaf(mean);
        }
        let dims = x[0].len();
        let subset = ((dims as f64).sqrt().floor() as usize).max(1);
        let mut candidates = (0..dims).collect::<Vec<usize>>();
        for i in (1..candidates.len()).rev() {
            candidates.swap(i, rng.random_range(0..=i));
        }
        candidates.truncate(subset);

        match Self::best_split(x, y, indices, &candidates) {
            None => Node::Leaf(mean),
            Some((dim, threshold)) => {
                let (left, right): (Vec<usize>, Vec<usize>) =
                    indices.iter().partition(|&&i| x[i][dim] <= threshold);
                Node::Split {
                    dim,
                    threshold,
                    left: Box::new(Self::grow(x, y, &left, rng)),
                    right: Box::new(Self::grow(x, y, &right, rng)),
                }
            }
        }
    }

    /// exhaustive threshold search over the candidate dimensions, minimizing
    /// the summed squared error of the two children via prefix sums.
    fn best_split(
        x: &[Vec<f64>],
        y: &[f64],
        indices: &[usize],
        dims: &[usize],
    ) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64, f64)> = None;
        for &dim in dims {
            let mut order = indices.to_vec();
            order.sort_by(|&a, &b| x[a][dim].partial_cmp(&x[b][dim]).expect("finite features"));
            let values = order.iter().map(|&i| x[i][dim]).collect::<Vec<f64>>();
            let targets = order.iter().map(|&i| y[i]).collect::<Vec<f64>>();
            let n = order.len();
            let mut sum = vec![0.0; n + 1];
            let mut sq = vec![0.0; n + 1];
            for i in 0..n {
                sum[i + 1] = sum[i] + targets[i];
                sq[i + 1] = sq[i] + targets[i] * targets[i];
            }
            for split in 1..n {
                if values[split] == values[split - 1] {
                    continue;
                }
                let (ln, rn) = (split as f64, (n - split) as f64);
                let left_sse = sq[split] - sum[split] * sum[split] / ln;
                let right_sse =
                    (sq[n] - sq[split]) - (sum[n] - sum[split]).powi(2) / rn;
                let sse = left_sse + right_sse;
                if best.map(|(_, _, b)| sse < b).unwrap_or(true) {
                    let threshold = (values[split - 1] + values[split]) / 2.0;
                    best = Some((dim, threshold, sse));
                }
            }
        }
        best.map(|(dim, threshold, _)| (dim, threshold))
    }
}
