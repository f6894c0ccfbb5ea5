//! Loss terms for adversarial super-resolution training
//!
//! The leaf terms (pixel, perceptual, edge) are pure `(prediction, target) →
//! scalar` functions. Each is gated by its configured weight: a zero weight
//! means the term is never constructed, so the corresponding sub-network or
//! operator forward pass never runs.

pub mod adversarial;

use candle_core::Tensor;

use crate::config::CriterionKind;
use crate::error::Result;

pub use adversarial::{AdversarialLoss, DiscriminatorLosses, QcTerms};

/// A distance criterion with a fixed scalar weight
#[derive(Debug, Clone, Copy)]
pub struct WeightedCriterion {
    kind: CriterionKind,
    weight: f64,
}

impl WeightedCriterion {
    /// Build the term, or `None` when the weight disables it.
    pub fn new(kind: CriterionKind, weight: f64) -> Option<Self> {
        (weight > 0.0).then_some(Self { kind, weight })
    }

    /// The configured weight
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Weighted scalar loss between a prediction and its target.
    pub fn loss(&self, pred: &Tensor, target: &Tensor) -> Result<Tensor> {
        let raw = match self.kind {
            CriterionKind::L1 => (pred - target)?.abs()?.mean_all()?,
            CriterionKind::L2 => candle_nn::loss::mse(pred, target)?,
        };
        Ok(raw.affine(self.weight, 0.0)?)
    }
}

/// Edge-structure loss: mean squared difference of two edge maps.
pub fn edge_loss(fake_edges: &Tensor, real_edges: &Tensor) -> Result<Tensor> {
    Ok((real_edges - fake_edges)?.sqr()?.mean_all()?)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use candle_core::{Device, Tensor};

    use super::*;

    fn scalar(t: &Tensor) -> f32 {
        t.to_scalar::<f32>().unwrap()
    }

    #[test]
    fn zero_weight_disables_term() {
        assert!(WeightedCriterion::new(CriterionKind::L1, 0.0).is_none());
        assert!(WeightedCriterion::new(CriterionKind::L1, 0.01).is_some());
    }

    #[test]
    fn l1_matches_mean_absolute_error() {
        let dev = Device::Cpu;
        let pred = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], (4,), &dev).unwrap();
        let target = Tensor::from_vec(vec![0.0f32, 0.0, 0.0, 0.0], (4,), &dev).unwrap();
        let cri = WeightedCriterion::new(CriterionKind::L1, 2.0).unwrap();
        assert_relative_eq!(scalar(&cri.loss(&pred, &target).unwrap()), 5.0, epsilon = 1e-6);
    }

    #[test]
    fn l2_matches_mean_squared_error() {
        let dev = Device::Cpu;
        let pred = Tensor::from_vec(vec![1.0f32, 3.0], (2,), &dev).unwrap();
        let target = Tensor::from_vec(vec![0.0f32, 1.0], (2,), &dev).unwrap();
        let cri = WeightedCriterion::new(CriterionKind::L2, 1.0).unwrap();
        assert_relative_eq!(scalar(&cri.loss(&pred, &target).unwrap()), 2.5, epsilon = 1e-6);
    }

    #[test]
    fn edge_loss_is_mean_squared_difference() {
        let dev = Device::Cpu;
        let fake = Tensor::from_vec(vec![0.0f32, 1.0], (2,), &dev).unwrap();
        let real = Tensor::from_vec(vec![1.0f32, 1.0], (2,), &dev).unwrap();
        assert_relative_eq!(scalar(&edge_loss(&fake, &real).unwrap()), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn loss_is_deterministic_for_fixed_inputs() {
        let dev = Device::Cpu;
        let pred = Tensor::from_vec(vec![0.3f32, 0.7, 0.1], (3,), &dev).unwrap();
        let target = Tensor::from_vec(vec![0.5f32, 0.5, 0.5], (3,), &dev).unwrap();
        let cri = WeightedCriterion::new(CriterionKind::L2, 0.01).unwrap();
        let a = scalar(&cri.loss(&pred, &target).unwrap());
        let b = scalar(&cri.loss(&pred, &target).unwrap());
        assert_eq!(a, b);
    }
}
