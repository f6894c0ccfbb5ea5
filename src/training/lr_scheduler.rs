//! Learning rate schedules
//!
//! Two restart-aware schedules cover the configured `lr_scheme` surface:
//! milestone gamma decay (`MultiStepLR`) and per-period cosine annealing
//! (`CosineAnnealingLR_Restart`). Both optimizers (generator and
//! discriminator) get their own instance.

use std::f64::consts::PI;

use crate::config::{LrScheme, TrainOptions};
use crate::error::{Error, Result};

/// A stateful learning-rate schedule advanced once per training step.
pub trait LrSchedule: Send {
    /// Schedule name for logging
    fn name(&self) -> &'static str;

    /// Advance one step.
    fn step(&mut self);

    /// Learning rate for the current step.
    fn lr(&self) -> f64;
}

/// Milestone decay with warm restarts: the rate is multiplied by `gamma` at
/// every milestone and reset to `base_lr * weight` at every restart step.
pub struct MultiStepRestart {
    base_lr: f64,
    milestones: Vec<u64>,
    gamma: f64,
    restarts: Vec<u64>,
    restart_weights: Vec<f64>,
    current_step: u64,
    current_lr: f64,
}

impl MultiStepRestart {
    /// Create the schedule. `restarts` and `restart_weights` must be aligned.
    pub fn new(
        base_lr: f64,
        milestones: Vec<u64>,
        gamma: f64,
        restarts: Vec<u64>,
        restart_weights: Vec<f64>,
    ) -> Result<Self> {
        if restarts.len() != restart_weights.len() {
            return Err(Error::config(
                "restarts and restart_weights must have the same length",
            ));
        }
        Ok(Self {
            base_lr,
            milestones,
            gamma,
            restarts,
            restart_weights,
            current_step: 0,
            current_lr: base_lr,
        })
    }
}

impl LrSchedule for MultiStepRestart {
    fn name(&self) -> &'static str {
        "MultiStepLR"
    }

    fn step(&mut self) {
        self.current_step += 1;
        if let Some(i) = self.restarts.iter().position(|&r| r == self.current_step) {
            self.current_lr = self.base_lr * self.restart_weights[i];
        } else if self.milestones.contains(&self.current_step) {
            self.current_lr *= self.gamma;
        }
    }

    fn lr(&self) -> f64 {
        self.current_lr
    }
}

/// Cosine annealing over consecutive periods. Each period anneals from
/// `base_lr * weight` down to `eta_min`; the weight of period `i > 0` comes
/// from `restart_weights[i - 1]` (1.0 when absent). Steps beyond the last
/// period hold at its floor.
pub struct CosineAnnealingRestart {
    base_lr: f64,
    periods: Vec<u64>,
    eta_min: f64,
    restart_weights: Vec<f64>,
    current_step: u64,
}

impl CosineAnnealingRestart {
    /// Create the schedule; at least one period is required.
    pub fn new(
        base_lr: f64,
        periods: Vec<u64>,
        eta_min: f64,
        restart_weights: Vec<f64>,
    ) -> Result<Self> {
        if periods.is_empty() || periods.iter().any(|&p| p == 0) {
            return Err(Error::config("T_period must be non-empty with positive periods"));
        }
        Ok(Self {
            base_lr,
            periods,
            eta_min,
            restart_weights,
            current_step: 0,
        })
    }

    fn lr_at(&self, step: u64) -> f64 {
        let mut start = 0u64;
        let last = self.periods.len() - 1;
        for (i, &period) in self.periods.iter().enumerate() {
            if step < start + period || i == last {
                let weight = if i == 0 {
                    1.0
                } else {
                    self.restart_weights.get(i - 1).copied().unwrap_or(1.0)
                };
                let t = (step - start).min(period) as f64;
                let peak = self.base_lr * weight;
                return self.eta_min
                    + 0.5 * (peak - self.eta_min) * (1.0 + (PI * t / period as f64).cos());
            }
            start += period;
        }
        self.eta_min
    }
}

impl LrSchedule for CosineAnnealingRestart {
    fn name(&self) -> &'static str {
        "CosineAnnealingLR_Restart"
    }

    fn step(&mut self) {
        self.current_step += 1;
    }

    fn lr(&self) -> f64 {
        self.lr_at(self.current_step)
    }
}

/// Build the configured schedule for one optimizer's base learning rate.
pub fn build_schedule(opts: &TrainOptions, base_lr: f64) -> Result<Box<dyn LrSchedule>> {
    match opts.lr_scheme {
        LrScheme::MultiStep => Ok(Box::new(MultiStepRestart::new(
            base_lr,
            opts.lr_steps.clone(),
            opts.lr_gamma,
            opts.restarts.clone(),
            opts.restart_weights.clone(),
        )?)),
        LrScheme::CosineAnnealingRestart => Ok(Box::new(CosineAnnealingRestart::new(
            base_lr,
            opts.t_period.clone(),
            opts.eta_min,
            opts.restart_weights.clone(),
        )?)),
    }
}
