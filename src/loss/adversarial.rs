//! Adversarial loss strategy
//!
//! Three mutually exclusive GAN formulations behind one scores-in/losses-out
//! contract, so the training scheduler never branches on formulation names:
//!
//! - **Standard**: BCE-with-logits against absolute real/fake labels.
//! - **Relativistic average**: each side is scored relative to the batch
//!   mean of the opposing side.
//! - **Wasserstein quadratic-cost**: the generator matches mean scores; the
//!   discriminator regresses its scores onto externally solved dual
//!   potentials plus a γ-scaled quadratic-cost penalty.
//!
//! The formulation is selected at construction and fixed for the run.

use candle_core::Tensor;
use candle_nn::loss::{binary_cross_entropy_with_logit, mse};

use crate::config::GanFormulation;
use crate::error::{Error, Result};

/// Auxiliary inputs for the quadratic-cost formulation, produced from the
/// external optimal-transport solve over the detached (real, fake) batch.
pub struct QcTerms {
    /// Dual potentials aligned with the real score batch
    pub h_star_real: Tensor,
    /// Dual potentials aligned with the fake score batch
    pub h_star_fake: Tensor,
    /// Quadratic-cost regularization term (differentiable)
    pub penalty: Tensor,
    /// Configured scale on the penalty
    pub gamma: f64,
}

/// Discriminator-side losses, kept separate for logging.
pub struct DiscriminatorLosses {
    /// Combined loss the optimizer steps on
    pub total: Tensor,
    /// Real-branch component
    pub real: Tensor,
    /// Fake-branch component
    pub fake: Tensor,
}

/// Adversarial loss with a fixed formulation and generator-side weight.
#[derive(Debug, Clone, Copy)]
pub struct AdversarialLoss {
    formulation: GanFormulation,
    weight: f64,
}

impl AdversarialLoss {
    /// Create the strategy for the configured formulation.
    pub fn new(formulation: GanFormulation, weight: f64) -> Self {
        Self { formulation, weight }
    }

    /// The fixed formulation
    pub fn formulation(&self) -> GanFormulation {
        self.formulation
    }

    /// Whether the generator phase needs discriminator scores on the
    /// reference image (detached). Only the standard formulation does not.
    pub fn needs_reference_scores(&self) -> bool {
        self.formulation != GanFormulation::Standard
    }

    /// Generator-side adversarial loss. `scores_real` must be detached from
    /// the discriminator graph and is required for every formulation except
    /// the standard one.
    pub fn generator_loss(
        &self,
        scores_fake: &Tensor,
        scores_real: Option<&Tensor>,
    ) -> Result<Tensor> {
        let loss = match self.formulation {
            GanFormulation::Standard => bce_against(scores_fake, true)?,
            GanFormulation::RelativisticAverage => {
                let real = require_real(scores_real)?;
                let mean_fake = scores_fake.mean_all()?;
                let mean_real = real.mean_all()?;
                let l_real = bce_against(&real.broadcast_sub(&mean_fake)?, false)?;
                let l_fake = bce_against(&scores_fake.broadcast_sub(&mean_real)?, true)?;
                (&l_real + &l_fake)?.affine(0.5, 0.0)?
            }
            GanFormulation::WassersteinQc => {
                let real = require_real(scores_real)?;
                let gap = (real.mean_all()? - scores_fake.mean_all()?)?;
                gap.sqr()?
            }
        };
        Ok(loss.affine(self.weight, 0.0)?)
    }

    /// Discriminator-side losses. `scores_fake` must come from a fake image
    /// detached from the generator graph. The quadratic-cost formulation
    /// requires `qc`; passing it for any other formulation is ignored.
    pub fn discriminator_loss(
        &self,
        scores_real: &Tensor,
        scores_fake: &Tensor,
        qc: Option<&QcTerms>,
    ) -> Result<DiscriminatorLosses> {
        match self.formulation {
            GanFormulation::Standard => {
                let real = bce_against(scores_real, true)?;
                let fake = bce_against(scores_fake, false)?;
                let total = (&real + &fake)?;
                Ok(DiscriminatorLosses { total, real, fake })
            }
            GanFormulation::RelativisticAverage => {
                let mean_fake = scores_fake.mean_all()?;
                let mean_real = scores_real.mean_all()?;
                let real = bce_against(&scores_real.broadcast_sub(&mean_fake)?, true)?;
                let fake = bce_against(&scores_fake.broadcast_sub(&mean_real)?, false)?;
                let total = (&real + &fake)?.affine(0.5, 0.0)?;
                Ok(DiscriminatorLosses { total, real, fake })
            }
            GanFormulation::WassersteinQc => {
                let qc = qc.ok_or_else(|| {
                    Error::config("wgan-qc discriminator loss requires transport solver terms")
                })?;
                let real = mse(scores_real, &qc.h_star_real)?;
                let fake = mse(scores_fake, &qc.h_star_fake)?;
                let potentials = (&real + &fake)?.affine(0.5, 0.0)?;
                let total = (qc.penalty.affine(qc.gamma, 0.0)? + potentials)?;
                Ok(DiscriminatorLosses { total, real, fake })
            }
        }
    }
}

fn require_real(scores_real: Option<&Tensor>) -> Result<&Tensor> {
    scores_real.ok_or_else(|| {
        Error::config("this GAN formulation needs detached reference scores in the generator phase")
    })
}

fn bce_against(logits: &Tensor, real_label: bool) -> Result<Tensor> {
    let target = if real_label {
        logits.ones_like()?
    } else {
        logits.zeros_like()?
    };
    Ok(binary_cross_entropy_with_logit(logits, &target)?)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use candle_core::{Device, Tensor};

    use super::*;

    const LN2: f32 = std::f32::consts::LN_2;

    fn t(values: &[f32]) -> Tensor {
        Tensor::from_vec(values.to_vec(), (values.len(),), &Device::Cpu).unwrap()
    }

    fn scalar(t: &Tensor) -> f32 {
        t.to_scalar::<f32>().unwrap()
    }

    #[test]
    fn standard_generator_loss_at_zero_logits_is_ln2() {
        let adv = AdversarialLoss::new(GanFormulation::Standard, 1.0);
        let loss = adv.generator_loss(&t(&[0.0, 0.0]), None).unwrap();
        assert_relative_eq!(scalar(&loss), LN2, epsilon = 1e-5);
    }

    #[test]
    fn standard_discriminator_loss_sums_both_branches() {
        let adv = AdversarialLoss::new(GanFormulation::Standard, 1.0);
        let losses = adv
            .discriminator_loss(&t(&[0.0, 0.0]), &t(&[0.0, 0.0]), None)
            .unwrap();
        assert_relative_eq!(scalar(&losses.real), LN2, epsilon = 1e-5);
        assert_relative_eq!(scalar(&losses.fake), LN2, epsilon = 1e-5);
        assert_relative_eq!(scalar(&losses.total), 2.0 * LN2, epsilon = 1e-5);
    }

    #[test]
    fn relativistic_loss_depends_only_on_score_gaps() {
        let adv = AdversarialLoss::new(GanFormulation::RelativisticAverage, 1.0);
        // Shifting both sides by the same constant leaves the loss unchanged.
        let a = adv
            .discriminator_loss(&t(&[1.0, 2.0]), &t(&[0.0, 1.0]), None)
            .unwrap();
        let b = adv
            .discriminator_loss(&t(&[6.0, 7.0]), &t(&[5.0, 6.0]), None)
            .unwrap();
        assert_relative_eq!(scalar(&a.total), scalar(&b.total), epsilon = 1e-5);
    }

    #[test]
    fn relativistic_generator_needs_reference_scores() {
        let adv = AdversarialLoss::new(GanFormulation::RelativisticAverage, 1.0);
        assert!(adv.needs_reference_scores());
        assert!(adv.generator_loss(&t(&[0.0]), None).is_err());
    }

    #[test]
    fn wgan_qc_generator_loss_is_squared_mean_gap() {
        let adv = AdversarialLoss::new(GanFormulation::WassersteinQc, 0.5);
        let loss = adv
            .generator_loss(&t(&[0.0, 0.0]), Some(&t(&[3.0, 1.0])))
            .unwrap();
        // (mean(real)=2 - mean(fake)=0)^2 = 4, times weight 0.5.
        assert_relative_eq!(scalar(&loss), 2.0, epsilon = 1e-5);
    }

    #[test]
    fn wgan_qc_discriminator_regresses_onto_potentials() {
        let adv = AdversarialLoss::new(GanFormulation::WassersteinQc, 1.0);
        let qc = QcTerms {
            h_star_real: t(&[1.0, 1.0]),
            h_star_fake: t(&[0.0, 0.0]),
            penalty: Tensor::from_vec(vec![4.0f32], (), &Device::Cpu).unwrap(),
            gamma: 0.25,
        };
        let losses = adv
            .discriminator_loss(&t(&[1.0, 1.0]), &t(&[2.0, 2.0]), Some(&qc))
            .unwrap();
        assert_relative_eq!(scalar(&losses.real), 0.0, epsilon = 1e-5);
        assert_relative_eq!(scalar(&losses.fake), 4.0, epsilon = 1e-5);
        // gamma*penalty + (real + fake)/2 = 1 + 2
        assert_relative_eq!(scalar(&losses.total), 3.0, epsilon = 1e-5);
    }

    #[test]
    fn wgan_qc_discriminator_requires_transport_terms() {
        let adv = AdversarialLoss::new(GanFormulation::WassersteinQc, 1.0);
        let err = adv.discriminator_loss(&t(&[0.0]), &t(&[0.0]), None);
        assert!(matches!(err, Err(Error::Config(_))));
    }
}
