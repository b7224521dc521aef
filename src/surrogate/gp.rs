use crate::VAR_FLOOR;
use nalgebra::DMatrix;
use nalgebra::DVector;
use rand::rngs::SmallRng;
use rand::Rng;
use rand::SeedableRng;

const N_RESTARTS: usize = 10;
const JITTER: f64 = 1e-10;
const AMPLITUDE_BOUNDS: (f64, f64) = (1e-3, 1e3);
const LENGTH_BOUNDS: (f64, f64) = (1e-5, 1e5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    Matern25,
    Rbf,
}

impl Kernel {
    /// covariance contribution for a scaled distance r = ||x - x'|| / l,
    /// before the constant amplitude factor
    fn apply(&self, r: f64) -> f64 {
        match self {
            Kernel::Matern25 => {
                let s = 5f64.sqrt() * r;
                (1.0 + s + s * s / 3.0) * (-s).exp()
            }
            Kernel::Rbf => (-0.5 * r * r).exp(),
        }
    }
}

/// gaussian process regressor with a constant-times-(matern nu=2.5 or rbf)
/// kernel and an isotropic length scale. kernel hyperparameters are chosen
/// by restarted log-marginal-likelihood maximization; prediction goes
/// through cholesky solves with the variance clamped from below.
#[derive(Debug, Clone)]
pub struct GaussianProcess {
    kernel: Kernel,
    seed: u64,
    trained: Option<Trained>,
}

#[derive(Debug, Clone)]
struct Trained {
    x: Vec<Vec<f64>>,
    lower: DMatrix<f64>,
    weights: DVector<f64>,
    amplitude: f64,
    length: f64,
}

impl GaussianProcess {
    pub fn new(kernel: Kernel, seed: u64) -> Self {
        Self {
            kernel,
            seed,
            trained: None,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.trained.is_some()
    }

    pub fn train(&mut self, x: &[Vec<f64>], y: &[f64]) {
        assert!(x.len() == y.len() && !x.is_empty());
        let mut rng = SmallRng::seed_from_u64(self.seed);
        let mut candidates = vec![(1.0, 1.0)];
        for _ in 0..N_RESTARTS {
            candidates.push((
                log_uniform(&mut rng, AMPLITUDE_BOUNDS),
                log_uniform(&mut rng, LENGTH_BOUNDS),
            ));
        }
        let y_vec = DVector::from_column_slice(y);
        let mut best: Option<(f64, Trained)> = None;
        for (amplitude, length) in candidates {
            if let Some((ll, trained)) = self.factorize(x, &y_vec, amplitude, length) {
                if best.as_ref().map(|(b, _)| ll > *b).unwrap_or(true) {
                    best = Some((ll, trained));
                }
            }
        }
        self.trained = best.map(|(_, trained)| trained);
        assert!(self.trained.is_some(), "gp factorization failed");
    }

    /// build K + jitter*I, factorize, and score the log marginal likelihood
    fn factorize(
        &self,
        x: &[Vec<f64>],
        y: &DVector<f64>,
        amplitude: f64,
        length: f64,
    ) -> Option<(f64, Trained)> {
        let n = x.len();
        let mut jitter = JITTER;
        while jitter <= 1e-4 {
            let k = DMatrix::from_fn(n, n, |i, j| {
                let base = amplitude * self.kernel.apply(distance(&x[i], &x[j]) / length);
                if i == j {
                    base + jitter
                } else {
                    base
                }
            });
            if let Some(chol) = k.cholesky() {
                let weights = chol.solve(y);
                let lower = chol.l();
                let log_det = lower.diagonal().iter().map(|d| d.ln()).sum::<f64>();
                let ll = -0.5 * y.dot(&weights)
                    - log_det
                    - 0.5 * n as f64 * (2.0 * std::f64::consts::PI).ln();
                return Some((
                    ll,
                    Trained {
                        x: x.to_vec(),
                        lower,
                        weights,
                        amplitude,
                        length,
                    },
                ));
            }
            jitter *= 10.0;
        }
        None
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> (Vec<f64>, Vec<f64>) {
        let trained = self.trained.as_ref().expect("gp trained before predict");
        let n = trained.x.len();
        let mut mu = Vec::with_capacity(x.len());
        let mut var = Vec::with_capacity(x.len());
        for row in x {
            let k_star = DVector::from_fn(n, |i, _| {
                trained.amplitude
                    * self
                        .kernel
                        .apply(distance(&trained.x[i], row) / trained.length)
            });
            mu.push(k_star.dot(&trained.weights));
            let v = trained
                .lower
                .solve_lower_triangular(&k_star)
                .expect("triangular solve");
            var.push((trained.amplitude - v.norm_squared()).max(VAR_FLOOR));
        }
        (mu, var)
    }
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn log_uniform(rng: &mut SmallRng, bounds: (f64, f64)) -> f64 {
    let (lo, hi) = (bounds.0.ln(), bounds.1.ln());
    (lo + rng.random::<f64>() * (hi - lo)).exp()
}
