//! Training infrastructure for adversarial super-resolution
//!
//! The centerpiece is [`trainer::SrGanTrainer`], the alternating
//! optimization scheduler: one `optimize(step, batch)` call runs a gated
//! generator update followed by an unconditional discriminator update and
//! returns the step's [`LogRecord`]. Learning-rate schedules and checkpoint
//! I/O live in their own submodules.

pub mod checkpoints;
pub mod lr_scheduler;
pub mod trainer;

use candle_core::Tensor;

use crate::error::{Error, Result};

pub use lr_scheduler::{build_schedule, CosineAnnealingRestart, LrSchedule, MultiStepRestart};
pub use trainer::SrGanTrainer;

/// One training batch: low-quality input, high-quality ground truth, and an
/// optional reference image for the discriminator's real branch.
///
/// The reference defaults to the ground truth; supplying one explicitly lets
/// the discriminator train against a different real-image distribution than
/// the pixel-paired targets.
pub struct TrainingBatch {
    /// Low-quality input images `(batch, channels, h, w)`
    pub lq: Tensor,
    /// High-quality ground truth, spatially aligned with the reference
    pub gt: Tensor,
    reference: Option<Tensor>,
}

impl TrainingBatch {
    /// Batch whose reference is the ground truth itself.
    pub fn new(lq: Tensor, gt: Tensor) -> Result<Self> {
        Self::build(lq, gt, None)
    }

    /// Batch with an explicit reference for the discriminator.
    pub fn with_reference(lq: Tensor, gt: Tensor, reference: Tensor) -> Result<Self> {
        Self::build(lq, gt, Some(reference))
    }

    fn build(lq: Tensor, gt: Tensor, reference: Option<Tensor>) -> Result<Self> {
        let (lb, ..) = lq.dims4()?;
        let (gb, ..) = gt.dims4()?;
        if lb != gb {
            return Err(Error::invalid_input(format!(
                "batch size mismatch between lq ({lb}) and gt ({gb})"
            )));
        }
        if let Some(r) = &reference {
            if r.dims4()? != gt.dims4()? {
                return Err(Error::invalid_input(
                    "reference must be spatially aligned with the ground truth",
                ));
            }
        }
        Ok(Self { lq, gt, reference })
    }

    /// The discriminator's real-branch image.
    pub fn reference(&self) -> &Tensor {
        self.reference.as_ref().unwrap_or(&self.gt)
    }
}

/// Insertion-ordered metric name → scalar mapping, rebuilt on every step.
/// The core retains no history; that is a reporting collaborator's concern.
#[derive(Debug, Clone, Default)]
pub struct LogRecord {
    entries: Vec<(String, f64)>,
}

impl LogRecord {
    /// Empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a metric, replacing an existing one in place.
    pub fn insert(&mut self, name: &str, value: f64) {
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| n == name) {
            entry.1 = value;
        } else {
            self.entries.push((name.to_string(), value));
        }
    }

    /// Look up a metric by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    /// Whether the record contains a metric.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate metrics in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    /// Number of metrics
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the record is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{Device, Tensor};

    use super::*;

    #[test]
    fn log_record_preserves_insertion_order() {
        let mut log = LogRecord::new();
        log.insert("l_g_pix", 0.1);
        log.insert("l_d_real", 0.2);
        log.insert("l_g_pix", 0.3);
        let names: Vec<&str> = log.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["l_g_pix", "l_d_real"]);
        assert_eq!(log.get("l_g_pix"), Some(0.3));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn reference_defaults_to_ground_truth() {
        let dev = Device::Cpu;
        let lq = Tensor::zeros((2, 1, 4, 4), candle_core::DType::F32, &dev).unwrap();
        let gt = Tensor::ones((2, 1, 8, 8), candle_core::DType::F32, &dev).unwrap();
        let batch = TrainingBatch::new(lq, gt).unwrap();
        let gt_sum = batch.gt.sum_all().unwrap().to_scalar::<f32>().unwrap();
        let ref_sum = batch.reference().sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert_eq!(gt_sum, ref_sum);
    }

    #[test]
    fn misaligned_reference_is_rejected() {
        let dev = Device::Cpu;
        let lq = Tensor::zeros((1, 1, 4, 4), candle_core::DType::F32, &dev).unwrap();
        let gt = Tensor::zeros((1, 1, 8, 8), candle_core::DType::F32, &dev).unwrap();
        let reference = Tensor::zeros((1, 1, 6, 6), candle_core::DType::F32, &dev).unwrap();
        assert!(TrainingBatch::with_reference(lq, gt, reference).is_err());
    }
}
