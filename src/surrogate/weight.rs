use crate::Weight;
use rand::rngs::SmallRng;
use rand_distr::Distribution;
use rand_distr::Normal;

/// count index pairs (i, j) where prediction and truth order agree, along
/// with the total pair count
pub fn order_preserving_pairs(pred: &[f64], truth: &[f64]) -> (usize, usize) {
    assert!(pred.len() == truth.len());
    let n = pred.len();
    let mut preserved = 0;
    let mut total = 0;
    for i in 0..n {
        for j in (i + 1)..n {
            if (truth[i] > truth[j]) == (pred[i] > pred[j]) {
                preserved += 1;
            }
            total += 1;
        }
    }
    (preserved, total)
}

#[derive(Debug, Clone)]
pub enum WeightKind {
    /// power rule over per-task order-preservation ratios
    Mfgpe { n_power: i32 },
    /// monte-carlo ranking loss, optionally with weight dilution
    Rgpe { num_sample: usize, use_dilution: bool },
}

/// computes ensemble weights from per-task predictions at the target points.
/// tasks are ordered sources first, target last.
#[derive(Debug, Clone)]
pub struct WeightCalculator {
    kind: WeightKind,
    ignored: Vec<bool>,
}

impl WeightCalculator {
    pub fn mfgpe() -> Self {
        Self {
            kind: WeightKind::Mfgpe {
                n_power: crate::MFGPE_POWER,
            },
            ignored: Vec::new(),
        }
    }

    pub fn rgpe() -> Self {
        Self {
            kind: WeightKind::Rgpe {
                num_sample: crate::RGPE_SAMPLES,
                use_dilution: true,
            },
            ignored: Vec::new(),
        }
    }

    pub fn ignored_flags(&self) -> &[bool] {
        &self.ignored
    }

    /// `mu`/`var` hold one prediction vector per task over the target points;
    /// `y` is the observed target vector. returns one weight per task,
    /// summing to one.
    pub fn calculate(
        &mut self,
        mu: &[Vec<f64>],
        var: &[Vec<f64>],
        y: &[f64],
        instance_num: usize,
        k_fold_num: usize,
        only_source: bool,
        rng: &mut SmallRng,
    ) -> Vec<Weight> {
        let num_tasks = mu.len();
        assert!(var.len() == num_tasks && num_tasks > 0);
        match self.kind {
            WeightKind::Mfgpe { n_power } => {
                self.ignored = vec![false; num_tasks];
                let ratios = mu
                    .iter()
                    .map(|pred| {
                        let (preserved, total) = order_preserving_pairs(pred, y);
                        if total == 0 {
                            0.0
                        } else {
                            preserved as f64 / total as f64
                        }
                    })
                    .collect::<Vec<f64>>();
                let powered = ratios.iter().map(|p| p.powi(n_power)).collect::<Vec<f64>>();
                let sum = powered.iter().sum::<f64>();
                if sum > 0.0 {
                    powered.iter().map(|p| p / sum).collect()
                } else {
                    vec![1.0 / num_tasks as f64; num_tasks]
                }
            }
            WeightKind::Rgpe {
                num_sample,
                use_dilution,
            } => self.rgpe_impl(
                mu,
                var,
                y,
                num_sample,
                use_dilution,
                instance_num,
                k_fold_num,
                only_source,
                rng,
            ),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn rgpe_impl(
        &mut self,
        mu: &[Vec<f64>],
        var: &[Vec<f64>],
        y: &[f64],
        num_sample: usize,
        use_dilution: bool,
        instance_num: usize,
        k_fold_num: usize,
        only_source: bool,
        rng: &mut SmallRng,
    ) -> Vec<Weight> {
        let num_tasks = mu.len();
        let mut argmin_counts = vec![0usize; num_tasks];
        let mut loss_caches = Vec::with_capacity(num_sample);
        for _ in 0..num_sample {
            let mut losses = Vec::with_capacity(num_tasks);
            for task in 0..(num_tasks - 1) {
                losses.push(sampled_rank_loss(&mu[task], &var[task], y, rng));
            }
            let target_loss = if !use_dilution || instance_num >= k_fold_num {
                sampled_rank_loss(&mu[num_tasks - 1], &var[num_tasks - 1], y, rng)
            } else {
                instance_num * instance_num
            };
            losses.push(target_loss);
            let winner = losses
                .iter()
                .enumerate()
                .min_by_key(|(_, loss)| **loss)
                .map(|(i, _)| i)
                .expect("at least one task");
            argmin_counts[winner] += 1;
            loss_caches.push(losses);
        }
        let mut w = argmin_counts
            .iter()
            .map(|c| *c as f64 / num_sample as f64)
            .collect::<Vec<f64>>();

        self.ignored = vec![false; num_tasks];
        if use_dilution {
            // the dilution threshold is the 95th-percentile rank loss of the
            // target across draws; a source whose median exceeds it is zeroed
            let threshold = percentile_loss(&loss_caches, num_tasks - 1, num_sample * 95 / 100);
            for task in 0..(num_tasks - 1) {
                let median = percentile_loss(&loss_caches, task, num_sample / 2);
                self.ignored[task] = median > threshold;
            }
            self.ignored[num_tasks - 1] = only_source;
            for task in 0..(num_tasks - 1) {
                if self.ignored[task] {
                    w[task] = 0.0;
                }
            }
        }

        let sum = w.iter().sum::<f64>();
        if sum == 0.0 {
            if only_source {
                let uniform = 1.0 / (num_tasks - 1) as f64;
                (0..num_tasks)
                    .map(|i| if i < num_tasks - 1 { uniform } else { 0.0 })
                    .collect()
            } else {
                (0..num_tasks)
                    .map(|i| if i == num_tasks - 1 { 1.0 } else { 0.0 })
                    .collect()
            }
        } else {
            w.iter().map(|v| v / sum).collect()
        }
    }
}

fn sampled_rank_loss(mu: &[f64], var: &[f64], y: &[f64], rng: &mut SmallRng) -> usize {
    let sampled = mu
        .iter()
        .zip(var.iter())
        .map(|(m, v)| {
            Normal::new(*m, v.max(0.0).sqrt())
                .map(|d| d.sample(rng))
                .unwrap_or(*m)
        })
        .collect::<Vec<f64>>();
    let (preserved, total) = order_preserving_pairs(&sampled, y);
    total - preserved
}

fn percentile_loss(caches: &[Vec<usize>], task: usize, index: usize) -> usize {
    let mut losses = caches.iter().map(|row| row[task]).collect::<Vec<usize>>();
    losses.sort_unstable();
    losses[index.min(losses.len() - 1)]
}
