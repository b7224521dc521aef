use super::AcquisitionContext;
use super::Predictor;

/// lower-confidence-bound acquisition for minimization, flipped so larger is
/// better: -mu + kappa * sigma
#[derive(Debug, Clone)]
pub struct Ucb {
    pub kappa: f64,
    model: Option<Predictor>,
}

impl Ucb {
    pub fn new(kappa: f64) -> Self {
        Self { kappa, model: None }
    }

    pub fn update(&mut self, context: &AcquisitionContext) {
        self.model = Some(context.main_predictor().clone());
    }

    pub fn compute(&self, x: &[Vec<f64>]) -> Vec<f64> {
        let model = self.model.as_ref().expect("acquisition updated before use");
        let (mu, var) = model.predict(x);
        mu.iter()
            .zip(var.iter())
            .map(|(m, v)| -m + self.kappa * v.max(0.0).sqrt())
            .collect()
    }
}
