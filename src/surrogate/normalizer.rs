use crate::VAR_FLOOR;

/// zero-mean unit-variance scaler for objective values. a degenerate target
/// vector (all entries equal) gets its first entry perturbed so the fitted
/// std never collapses to zero; no error is raised.
#[derive(Debug, Clone)]
pub struct Normalizer {
    norm_y: bool,
    mean: Option<f64>,
    std: Option<f64>,
}

impl Normalizer {
    pub fn new(norm_y: bool) -> Self {
        Self {
            norm_y,
            mean: None,
            std: None,
        }
    }

    fn perturbed(y: &[f64]) -> Vec<f64> {
        let mut y = y.to_vec();
        if !y.is_empty() && y.iter().all(|v| *v == y[0]) {
            y[0] += 1e-4;
        }
        y
    }

    pub fn fit(&mut self, y: &[f64]) {
        if !self.norm_y || y.is_empty() {
            return;
        }
        let y = Self::perturbed(y);
        let mean = y.iter().sum::<f64>() / y.len() as f64;
        let var = y.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / y.len() as f64;
        let std = var.sqrt();
        self.mean = Some(mean);
        self.std = Some(if std < VAR_FLOOR { 1.0 } else { std });
    }

    pub fn transform(&self, y: &[f64]) -> Vec<f64> {
        if !self.norm_y {
            return y.to_vec();
        }
        let (mean, std) = (self.mean.unwrap_or(0.0), self.std.unwrap_or(1.0));
        Self::perturbed(y).iter().map(|v| (v - mean) / std).collect()
    }

    pub fn inverse_transform(&self, y: &[f64]) -> Vec<f64> {
        if !self.norm_y {
            return y.to_vec();
        }
        let (mean, std) = (self.mean.unwrap_or(0.0), self.std.unwrap_or(1.0));
        y.iter().map(|v| v * std + mean).collect()
    }

    pub fn transform_variance(&self, var: &[f64]) -> Vec<f64> {
        if !self.norm_y {
            return var.to_vec();
        }
        let std = self.std.unwrap_or(1.0);
        var.iter().map(|v| v * std * std).collect()
    }
}
