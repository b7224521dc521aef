pub mod ensemble;
pub mod forest;
pub mod gp;
pub mod normalizer;
pub mod weight;

pub use ensemble::EnsemblePredictor;
pub use ensemble::SourceTask;
pub use ensemble::TransferEnsemble;
pub use forest::ProbabilisticForest;
pub use gp::GaussianProcess;
pub use gp::Kernel;
pub use normalizer::Normalizer;
pub use weight::WeightCalculator;

use crate::acquisition::AcquisitionContext;
use crate::acquisition::Predictor;
use crate::acquisition::TaskContext;
use crate::history::History;

/// which probabilistic regressor backs a single task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseKind {
    Prf,
    Gp(Kernel),
}

impl BaseKind {
    pub fn build(&self, seed: u64) -> BaseSurrogate {
        match self {
            BaseKind::Prf => BaseSurrogate::Forest(ProbabilisticForest::new(10, seed)),
            BaseKind::Gp(kernel) => BaseSurrogate::Gp(GaussianProcess::new(*kernel, seed)),
        }
    }
}

/// a per-task probabilistic regressor returning mean and variance per point
#[derive(Debug, Clone)]
pub enum BaseSurrogate {
    Forest(ProbabilisticForest),
    Gp(GaussianProcess),
}

impl BaseSurrogate {
    pub fn train(&mut self, x: &[Vec<f64>], y: &[f64]) {
        match self {
            BaseSurrogate::Forest(model) => model.train(x, y),
            BaseSurrogate::Gp(model) => model.train(x, y),
        }
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> (Vec<f64>, Vec<f64>) {
        match self {
            BaseSurrogate::Forest(model) => model.predict(x),
            BaseSurrogate::Gp(model) => model.predict(x),
        }
    }
}

/// the advisor-facing surrogate: either a single base regressor or the
/// transfer-learning ensemble
#[derive(Debug, Clone)]
pub enum Surrogate {
    Base(BaseSurrogate),
    Ensemble(TransferEnsemble),
}

impl Surrogate {
    pub fn train(&mut self, x: &[Vec<f64>], y: &[f64]) {
        match self {
            Surrogate::Base(model) => model.train(x, y),
            Surrogate::Ensemble(model) => model.train(x, y),
        }
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> (Vec<f64>, Vec<f64>) {
        match self {
            Surrogate::Base(model) => model.predict(x),
            Surrogate::Ensemble(model) => model.predict(x),
        }
    }

    pub fn get_acquisition_context(&self, history: &History) -> AcquisitionContext {
        match self {
            Surrogate::Base(model) => AcquisitionContext {
                tasks: vec![TaskContext {
                    predictor: Predictor::Base(model.clone()),
                    eta: history.get_incumbent_value(),
                    num_data: history.len(),
                }],
                weights: vec![1.0],
                main: None,
            },
            Surrogate::Ensemble(model) => model.get_acquisition_context(history),
        }
    }

    /// the recorded weight trajectory, present only for ensembles
    pub fn hist_ws(&self) -> Option<&[Vec<String>]> {
        match self {
            Surrogate::Base(_) => None,
            Surrogate::Ensemble(model) => Some(&model.hist_ws),
        }
    }

    pub fn as_ensemble_mut(&mut self) -> Option<&mut TransferEnsemble> {
        match self {
            Surrogate::Base(_) => None,
            Surrogate::Ensemble(model) => Some(model),
        }
    }
}
