use super::normalizer::Normalizer;
use super::weight::WeightCalculator;
use super::BaseKind;
use super::BaseSurrogate;
use crate::acquisition::AcquisitionContext;
use crate::acquisition::Predictor;
use crate::acquisition::TaskContext;
use crate::history::History;
use crate::history::Transform;
use crate::Weight;
use crate::VAR_FLOOR;
use rand::rngs::SmallRng;
use rand::Rng;
use rand::SeedableRng;

/// a source task's training data in surrogate space
#[derive(Debug, Clone)]
pub struct SourceTask {
    pub task_id: String,
    pub x: Vec<Vec<f64>>,
    pub y: Vec<f64>,
}

impl SourceTask {
    pub fn from_history(history: &History, num_src_trials: usize) -> Self {
        let x = history
            .get_config_array()
            .into_iter()
            .take(num_src_trials)
            .collect();
        let y = history
            .get_objectives(Transform::Infeasible)
            .into_iter()
            .take(num_src_trials)
            .collect();
        Self {
            task_id: history.task_id.clone(),
            x,
            y,
        }
    }
}

/// a frozen snapshot of the ensemble used by acquisition functions: source
/// and target surrogates fused by the current weights, ignored sources
/// skipped entirely.
#[derive(Debug, Clone)]
pub struct EnsemblePredictor {
    sources: Vec<BaseSurrogate>,
    target: BaseSurrogate,
    weights: Vec<Weight>,
    ignored: Vec<bool>,
}

impl EnsemblePredictor {
    pub fn predict(&self, x: &[Vec<f64>]) -> (Vec<f64>, Vec<f64>) {
        let (mut mu, mut var) = self.target.predict(x);
        if self.sources.is_empty() {
            return (mu, var);
        }
        let w_t = *self.weights.last().expect("target weight");
        for m in mu.iter_mut() {
            *m *= w_t;
        }
        for v in var.iter_mut() {
            *v *= w_t * w_t;
        }
        for (i, source) in self.sources.iter().enumerate() {
            if self.ignored.get(i).copied().unwrap_or(false) {
                continue;
            }
            let w = self.weights.get(i).copied().unwrap_or(0.0);
            if w == 0.0 {
                continue;
            }
            let (mu_s, var_s) = source.predict(x);
            for (m, s) in mu.iter_mut().zip(mu_s.iter()) {
                *m += w * s;
            }
            for (v, s) in var.iter_mut().zip(var_s.iter()) {
                *v += w * w * s;
            }
        }
        for v in var.iter_mut() {
            *v = v.max(VAR_FLOOR);
        }
        (mu, var)
    }
}

/// transfer-learning ensemble: one surrogate per source history plus a
/// target surrogate retrained every iteration; weights refreshed from
/// rank-preservation statistics with a monotone non-decreasing target.
#[derive(Debug, Clone)]
pub struct TransferEnsemble {
    kind: BaseKind,
    rng: SmallRng,
    calculator: WeightCalculator,
    num_src_trials: usize,
    k_fold_num: usize,
    only_source: bool,
    norm_y: bool,
    sources: Vec<SourceTask>,
    source_surrogates: Vec<BaseSurrogate>,
    target: Option<BaseSurrogate>,
    w: Vec<Weight>,
    current_target_weight: Weight,
    ignored: Vec<bool>,
    pub hist_ws: Vec<Vec<String>>,
    pub target_weight: Vec<Weight>,
    iteration_id: usize,
}

impl TransferEnsemble {
    pub fn new(
        kind: BaseKind,
        seed: u64,
        calculator: WeightCalculator,
        sources: Vec<SourceTask>,
        only_source: bool,
        norm_y: bool,
    ) -> Self {
        let mut ensemble = Self {
            kind,
            rng: SmallRng::seed_from_u64(seed),
            calculator,
            num_src_trials: crate::NUM_SRC_TRIALS,
            k_fold_num: crate::K_FOLD_NUM,
            only_source,
            norm_y,
            sources,
            source_surrogates: Vec::new(),
            target: None,
            w: vec![1.0],
            current_target_weight: 0.0,
            ignored: Vec::new(),
            hist_ws: Vec::new(),
            target_weight: Vec::new(),
            iteration_id: 0,
        };
        ensemble.build_source_surrogates();
        ensemble
    }

    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    pub fn weights(&self) -> &[Weight] {
        &self.w
    }

    pub fn ignored_flags(&self) -> &[bool] {
        &self.ignored
    }

    /// how many weight refreshes have been recorded
    pub fn iteration(&self) -> usize {
        self.iteration_id
    }

    /// replace the source set (the multi-fidelity advisor feeds per-resource
    /// histories through here) and rebuild source surrogates
    pub fn update_mf_trials(&mut self, sources: Vec<SourceTask>) {
        self.sources = sources;
        self.build_source_surrogates();
    }

    fn build_source_surrogates(&mut self) {
        self.source_surrogates = Vec::with_capacity(self.sources.len());
        let trials = self.num_src_trials;
        for i in 0..self.sources.len() {
            let x = self.sources[i].x.iter().take(trials).cloned().collect::<Vec<_>>();
            let y = self.sources[i].y.iter().take(trials).copied().collect::<Vec<_>>();
            let model = self.build_single(&x, &y);
            self.source_surrogates.push(model);
        }
    }

    fn build_single(&mut self, x: &[Vec<f64>], y: &[f64]) -> BaseSurrogate {
        let mut normalizer = Normalizer::new(self.norm_y);
        normalizer.fit(y);
        let y = normalizer.transform(y);
        let mut model = self.kind.build(self.rng.random::<u64>());
        model.train(x, &y);
        model
    }

    pub fn train(&mut self, x: &[Vec<f64>], y: &[f64]) {
        self.target = Some(self.build_single(x, y));
        let num_sources = self.sources.len();
        if num_sources == 0 {
            return;
        }

        let mut mu_list = Vec::with_capacity(num_sources + 1);
        let mut var_list = Vec::with_capacity(num_sources + 1);
        for surrogate in self.source_surrogates.iter() {
            let (mu, var) = surrogate.predict(x);
            mu_list.push(mu);
            var_list.push(var);
        }

        if y.len() >= self.k_fold_num {
            let (tar_mu, tar_var) = self.predict_target_cv(x, y);
            mu_list.push(tar_mu);
            var_list.push(tar_var);
            let new_w = self.calculator.calculate(
                &mu_list,
                &var_list,
                y,
                y.len(),
                self.k_fold_num,
                self.only_source,
                &mut self.rng,
            );
            self.ignored = self.calculator.ignored_flags().to_vec();
            self.modify_weights(new_w);
            self.record_weights();
        } else {
            // not enough data for cross-validation: uniform over all tasks
            let num_tasks = num_sources + 1;
            self.w = vec![1.0 / num_tasks as f64; num_tasks];
            self.ignored = vec![false; num_tasks];
        }
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> (Vec<f64>, Vec<f64>) {
        self.predictor().predict(x)
    }

    pub fn predictor(&self) -> EnsemblePredictor {
        EnsemblePredictor {
            sources: self.source_surrogates.clone(),
            target: self
                .target
                .clone()
                .expect("ensemble trained before predict"),
            weights: self.w.clone(),
            ignored: self.ignored.clone(),
        }
    }

    pub fn get_acquisition_context(&self, history: &History) -> AcquisitionContext {
        let mut tasks = Vec::with_capacity(self.sources.len() + 1);
        for (source, surrogate) in self.sources.iter().zip(self.source_surrogates.iter()) {
            let eta = source
                .y
                .iter()
                .copied()
                .filter(|v| v.is_finite())
                .min_by(|a, b| a.partial_cmp(b).expect("finite objectives"));
            tasks.push(TaskContext {
                predictor: Predictor::Base(surrogate.clone()),
                eta,
                num_data: source.y.len(),
            });
        }
        tasks.push(TaskContext {
            predictor: Predictor::Base(
                self.target
                    .clone()
                    .expect("ensemble trained before context"),
            ),
            eta: history.get_incumbent_value(),
            num_data: history.len(),
        });
        AcquisitionContext {
            tasks,
            weights: self.w.clone(),
            main: Some(Predictor::Ensemble(self.predictor())),
        }
    }

    /// leave-fold-out predictions of the target surrogate over its own
    /// training points; folds are contiguous, never shuffled
    fn predict_target_cv(&mut self, x: &[Vec<f64>], y: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let n = x.len();
        let k = self.k_fold_num;
        let base = n / k;
        let extra = n % k;
        let mut mu = Vec::with_capacity(n);
        let mut var = Vec::with_capacity(n);
        let mut start = 0;
        for fold in 0..k {
            let size = base + usize::from(fold < extra);
            let end = start + size;
            let train_x = x[..start]
                .iter()
                .chain(x[end..].iter())
                .cloned()
                .collect::<Vec<Vec<f64>>>();
            let train_y = y[..start]
                .iter()
                .chain(y[end..].iter())
                .copied()
                .collect::<Vec<f64>>();
            let model = self.build_single(&train_x, &train_y);
            let (fold_mu, fold_var) = model.predict(&x[start..end]);
            mu.extend(fold_mu);
            var.extend(fold_var);
            start = end;
        }
        (mu, var)
    }

    /// the target weight never decreases across iterations; when the new
    /// estimate is lower, pin it and rescale the source weights to fill the
    /// remaining mass
    fn modify_weights(&mut self, mut new_w: Vec<Weight>) {
        let target = new_w.len() - 1;
        if new_w[target] < self.current_target_weight {
            new_w[target] = self.current_target_weight;
            let source_sum = new_w[..target].iter().sum::<f64>();
            if source_sum > 0.0 {
                let scale = (1.0 - new_w[target]) / source_sum;
                for w in new_w[..target].iter_mut() {
                    *w *= scale;
                }
            }
        }
        self.current_target_weight = new_w[target];
        self.w = new_w;
    }

    fn record_weights(&mut self) {
        let weight_str = self
            .w
            .iter()
            .map(|w| format!("{:.2}", w))
            .collect::<Vec<String>>()
            .join(",");
        log::info!("weight: {}", weight_str);
        if self.ignored.iter().any(|f| *f) {
            log::info!("weight ignore flag: {:?}", self.ignored);
        }
        let mut labels = self
            .sources
            .iter()
            .zip(self.w.iter())
            .map(|(s, w)| format!("{}: w{:.4}", s.task_id, w))
            .collect::<Vec<String>>();
        labels.push(format!("target: {:.4}", self.w[self.w.len() - 1]));
        self.hist_ws.push(labels);
        self.target_weight.push(self.w[self.w.len() - 1]);
        self.iteration_id += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: usize, offset: f64) -> (Vec<Vec<f64>>, Vec<f64>) {
        let x = (0..n)
            .map(|i| vec![i as f64 / n as f64, (i % 3) as f64 / 3.0])
            .collect::<Vec<Vec<f64>>>();
        let y = x.iter().map(|r| offset + r[0] * 2.0).collect();
        (x, y)
    }

    fn source(n: usize, offset: f64) -> SourceTask {
        let (x, y) = rows(n, offset);
        SourceTask {
            task_id: format!("src{}", offset),
            x,
            y,
        }
    }

    fn ensemble(sources: Vec<SourceTask>) -> TransferEnsemble {
        TransferEnsemble::new(
            BaseKind::Prf,
            42,
            WeightCalculator::mfgpe(),
            sources,
            false,
            true,
        )
    }

    #[test]
    fn no_sources_behaves_as_single_task() {
        let mut e = ensemble(Vec::new());
        let (x, y) = rows(10, 0.0);
        e.train(&x, &y);
        assert!(e.weights() == [1.0]);
        let (mu, var) = e.predict(&x);
        assert!(mu.len() == x.len() && var.len() == x.len());
    }

    #[test]
    fn weights_form_a_simplex() {
        let mut e = ensemble(vec![source(12, 0.0), source(12, 5.0)]);
        let (x, y) = rows(10, 0.1);
        e.train(&x, &y);
        let sum = e.weights().iter().sum::<f64>();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(e.weights().iter().all(|w| (0.0..=1.0).contains(w)));
    }

    #[test]
    fn small_history_defaults_to_uniform() {
        let mut e = ensemble(vec![source(12, 0.0)]);
        let (x, y) = rows(3, 0.0);
        e.train(&x, &y);
        assert!(e.weights().len() == 2);
        assert!((e.weights()[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn target_weight_is_monotone_nondecreasing() {
        let mut e = ensemble(vec![source(12, 0.0), source(12, 1.0)]);
        for n in [6usize, 8, 10, 12] {
            let (x, y) = rows(n, 0.1);
            e.train(&x, &y);
        }
        let trajectory = e.target_weight.clone();
        for pair in trajectory.windows(2) {
            assert!(pair[1] >= pair[0] - 1e-12, "{:?}", trajectory);
        }
        let sum = e.weights().iter().sum::<f64>();
        assert!((sum - 1.0).abs() < 1e-9);
    }
}
