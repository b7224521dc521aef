use super::AcquisitionContext;
use super::Predictor;
use crate::Objective;
use crate::EI_SIGMA_FLOOR;
use statrs::distribution::Continuous;
use statrs::distribution::ContinuousCDF;
use statrs::distribution::Normal;

/// expected improvement for minimization:
/// z = (eta - mu - par) / max(sigma, floor)
/// ei = (eta - mu - par) * cdf(z) + sigma * pdf(z), zero where sigma
/// collapses or no incumbent exists yet
#[derive(Debug, Clone)]
pub struct Ei {
    pub par: f64,
    model: Option<Predictor>,
    eta: Option<Objective>,
}

impl Ei {
    pub fn new(par: f64) -> Self {
        Self {
            par,
            model: None,
            eta: None,
        }
    }

    pub fn update(&mut self, context: &AcquisitionContext) {
        self.model = Some(context.main_predictor().clone());
        self.eta = context.target().eta;
    }

    pub fn compute(&self, x: &[Vec<f64>]) -> Vec<f64> {
        let model = self.model.as_ref().expect("acquisition updated before use");
        let eta = match self.eta {
            Some(eta) => eta,
            None => return vec![0.0; x.len()],
        };
        let standard = Normal::new(0.0, 1.0).expect("standard normal");
        let (mu, var) = model.predict(x);
        mu.iter()
            .zip(var.iter())
            .map(|(m, v)| {
                let sigma = v.max(0.0).sqrt();
                if sigma < EI_SIGMA_FLOOR {
                    return 0.0;
                }
                let improvement = eta - m - self.par;
                let z = improvement / sigma.max(EI_SIGMA_FLOOR);
                improvement * standard.cdf(z) + sigma * standard.pdf(z)
            })
            .collect()
    }
}
