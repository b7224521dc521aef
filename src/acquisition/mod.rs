pub mod ei;
pub mod optimizer;
pub mod rank;
pub mod ucb;

pub use ei::Ei;
pub use rank::WeightedRank;
pub use ucb::Ucb;

use crate::surrogate::BaseSurrogate;
use crate::surrogate::EnsemblePredictor;
use crate::Objective;
use crate::Weight;

/// what an acquisition function queries for mean and variance: either a
/// single base surrogate or a frozen ensemble snapshot
#[derive(Debug, Clone)]
pub enum Predictor {
    Base(BaseSurrogate),
    Ensemble(EnsemblePredictor),
}

impl Predictor {
    pub fn predict(&self, x: &[Vec<f64>]) -> (Vec<f64>, Vec<f64>) {
        match self {
            Predictor::Base(model) => model.predict(x),
            Predictor::Ensemble(model) => model.predict(x),
        }
    }
}

/// one task's view handed to acquisition functions after surrogate training
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub predictor: Predictor,
    pub eta: Option<Objective>,
    pub num_data: usize,
}

/// everything an acquisition needs for one update: per-task contexts with
/// the target last, the ensemble weights, and (for transfer surrogates) the
/// fused main predictor
#[derive(Debug, Clone)]
pub struct AcquisitionContext {
    pub tasks: Vec<TaskContext>,
    pub weights: Vec<Weight>,
    pub main: Option<Predictor>,
}

impl AcquisitionContext {
    pub fn single(task: TaskContext) -> Self {
        Self {
            tasks: vec![task],
            weights: vec![1.0],
            main: None,
        }
    }

    pub fn is_multi_task(&self) -> bool {
        self.tasks.len() > 1
    }

    pub fn target(&self) -> &TaskContext {
        self.tasks.last().expect("at least one task")
    }

    pub fn main_predictor(&self) -> &Predictor {
        self.main
            .as_ref()
            .unwrap_or_else(|| &self.target().predictor)
    }
}

/// single-task acquisition kinds, used standalone and as the inner function
/// of the weighted-rank combiner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleKind {
    Ei,
    Ucb,
}

impl SingleKind {
    fn build(&self) -> Single {
        match self {
            SingleKind::Ei => Single::Ei(Ei::new(0.0)),
            SingleKind::Ucb => Single::Ucb(Ucb::new(2.0)),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Single {
    Ei(Ei),
    Ucb(Ucb),
}

impl Single {
    pub fn update(&mut self, context: &AcquisitionContext) {
        match self {
            Single::Ei(f) => f.update(context),
            Single::Ucb(f) => f.update(context),
        }
    }

    pub fn compute(&self, x: &[Vec<f64>]) -> Vec<f64> {
        match self {
            Single::Ei(f) => f.compute(x),
            Single::Ucb(f) => f.compute(x),
        }
    }
}

/// the advisor-facing acquisition variant
#[derive(Debug, Clone)]
pub enum Acquisition {
    Ei(Ei),
    Ucb(Ucb),
    WeightedRank(WeightedRank),
}

impl Acquisition {
    pub fn ei() -> Self {
        Acquisition::Ei(Ei::new(0.0))
    }

    pub fn ucb() -> Self {
        Acquisition::Ucb(Ucb::new(2.0))
    }

    pub fn weighted_rank(inner: SingleKind) -> Self {
        Acquisition::WeightedRank(WeightedRank::new(inner))
    }

    pub fn update(&mut self, context: &AcquisitionContext) {
        match self {
            Acquisition::Ei(f) => f.update(context),
            Acquisition::Ucb(f) => f.update(context),
            Acquisition::WeightedRank(f) => f.update(context),
        }
    }

    /// batch acquisition values, larger is better
    pub fn compute(&self, x: &[Vec<f64>]) -> Vec<f64> {
        match self {
            Acquisition::Ei(f) => f.compute(x),
            Acquisition::Ucb(f) => f.compute(x),
            Acquisition::WeightedRank(f) => f.compute(x),
        }
    }
}

pub(crate) fn build_single(kind: SingleKind, task: &TaskContext) -> Single {
    let mut single = kind.build();
    single.update(&AcquisitionContext::single(task.clone()));
    single
}
