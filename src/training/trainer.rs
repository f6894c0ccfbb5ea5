//! Alternating optimization scheduler for adversarial SR training
//!
//! One [`SrGanTrainer::optimize`] call runs a single training step: a gated
//! generator update (pixel + perceptual + adversarial + edge terms, gradient
//! norm clipped) followed by an unconditional discriminator update. Steps
//! never overlap; the caller serializes `optimize` calls against one
//! trainer. Numerical failures are not caught here: a NaN loss propagates
//! to the caller, who decides between aborting and reloading a checkpoint.

use std::path::Path;

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use tracing::{debug, info};

use crate::config::{AdamParams, GanFormulation, TrainOptions};
use crate::error::{Error, Result};
use crate::loss::{edge_loss, AdversarialLoss, QcTerms, WeightedCriterion};
use crate::model::{
    Discriminator, EdgeDetector, FeatureExtractor, Generator, ModelState, TransportSolver,
};
use crate::training::lr_scheduler::{build_schedule, LrSchedule};
use crate::training::{checkpoints, LogRecord, TrainingBatch};

/// Fixed bound on the generator gradient norm. The discriminator is never
/// clipped.
const GRAD_CLIP_NORM: f64 = 5.0;

/// Per-step alternating generator/discriminator trainer.
pub struct SrGanTrainer {
    opts: TrainOptions,

    net_g: Box<dyn Generator>,
    vars_g: candle_nn::VarMap,
    net_d: Box<dyn Discriminator>,
    vars_d: candle_nn::VarMap,

    opt_g: AdamW,
    opt_d: AdamW,
    params_g: Vec<Var>,

    cri_pix: Option<WeightedCriterion>,
    perceptual: Option<(WeightedCriterion, Box<dyn FeatureExtractor>)>,
    edge: Option<(f64, Box<dyn EdgeDetector>)>,
    cri_gan: AdversarialLoss,
    transport: Option<Box<dyn TransportSolver>>,

    sched_g: Box<dyn LrSchedule>,
    sched_d: Box<dyn LrSchedule>,

    rank: i64,
}

impl SrGanTrainer {
    /// Build a trainer from validated options and an owned model state.
    ///
    /// `rank` identifies this process in a distributed group; pass `None`
    /// for single-process training. Every unrecognized or inconsistent
    /// option is rejected here, before any optimizer state exists.
    pub fn new(opts: TrainOptions, state: ModelState, rank: Option<usize>) -> Result<Self> {
        opts.validate()?;
        if opts.dist && rank.is_none() {
            return Err(Error::config("distributed training requires a process rank"));
        }
        let rank = rank.map(|r| r as i64).unwrap_or(-1);
        let primary = rank <= 0;

        let ModelState {
            net_g,
            vars_g,
            net_d,
            vars_d,
            net_f,
            edge,
            transport,
        } = state;
        let net_d =
            net_d.ok_or_else(|| Error::config("training requires a discriminator network"))?;
        let vars_d =
            vars_d.ok_or_else(|| Error::config("training requires discriminator parameters"))?;

        let cri_pix = WeightedCriterion::new(opts.pixel_criterion, opts.pixel_weight);
        if cri_pix.is_none() && primary {
            info!("pixel loss disabled");
        }

        let perceptual = match WeightedCriterion::new(opts.feature_criterion, opts.feature_weight)
        {
            Some(cri) => {
                let net_f = net_f.ok_or_else(|| {
                    Error::config("feature_weight > 0 requires a feature extractor")
                })?;
                Some((cri, net_f))
            }
            None => {
                if primary {
                    info!("feature loss disabled");
                }
                None
            }
        };

        let edge = if opts.edge_weight > 0.0 {
            let detector =
                edge.ok_or_else(|| Error::config("edge_weight > 0 requires an edge detector"))?;
            Some((opts.edge_weight, detector))
        } else {
            if primary {
                info!("edge loss disabled");
            }
            None
        };

        let cri_gan = AdversarialLoss::new(opts.gan_type, opts.gan_weight);
        if opts.gan_type == GanFormulation::WassersteinQc && transport.is_none() {
            return Err(Error::config(
                "wgan-qc requires an optimal-transport solver collaborator",
            ));
        }

        let params_g = vars_g.all_vars();
        let params_d = vars_d.all_vars();
        let opt_g = AdamW::new(params_g.clone(), adamw_params(&opts.adam_g()))?;
        let opt_d = AdamW::new(params_d, adamw_params(&opts.adam_d()))?;

        let sched_g = build_schedule(&opts, opts.lr_g)?;
        let sched_d = build_schedule(&opts, opts.lr_d)?;

        if primary {
            info!(
                gan_type = %opts.gan_type,
                d_update_ratio = opts.d_update_ratio,
                d_init_iters = opts.d_init_iters,
                "trainer initialized"
            );
        }

        Ok(Self {
            opts,
            net_g,
            vars_g,
            net_d,
            vars_d,
            opt_g,
            opt_d,
            params_g,
            cri_pix,
            perceptual,
            edge,
            cri_gan,
            transport,
            sched_g,
            sched_d,
            rank,
        })
    }

    /// Whether the generator updates on this step.
    fn generator_phase(&self, step: u64) -> bool {
        step % self.opts.d_update_ratio == 0 && step >= self.opts.d_init_iters
    }

    /// Run one training step and return the metrics actually computed.
    ///
    /// The generator phase runs only when the step passes the update gate;
    /// the discriminator phase runs on every step. The returned record is
    /// rebuilt from scratch each call.
    pub fn optimize(&mut self, step: u64, batch: &TrainingBatch) -> Result<LogRecord> {
        let mut log = LogRecord::new();

        let fake = self.net_g.forward(&batch.lq, true)?;

        if self.generator_phase(step) {
            self.generator_step(batch, &fake, &mut log)?;
        }
        self.discriminator_step(batch, &fake.detach(), &mut log)?;

        Ok(log)
    }

    fn generator_step(
        &mut self,
        batch: &TrainingBatch,
        fake: &Tensor,
        log: &mut LogRecord,
    ) -> Result<()> {
        let mut total: Option<Tensor> = None;

        if let Some(cri) = &self.cri_pix {
            let l_g_pix = cri.loss(fake, &batch.gt)?;
            log.insert("l_g_pix", scalar(&l_g_pix)?);
            accumulate(&mut total, l_g_pix)?;
        }

        if let Some((cri, net_f)) = &self.perceptual {
            let real_fea = net_f.forward(&batch.gt)?.detach();
            let fake_fea = net_f.forward(fake)?;
            let l_g_fea = cri.loss(&fake_fea, &real_fea)?;
            log.insert("l_g_fea", scalar(&l_g_fea)?);
            accumulate(&mut total, l_g_fea)?;
        }

        if self.opts.gan_weight > 0.0 {
            let scores_fake = self.net_d.forward(fake)?;
            let scores_real = if self.cri_gan.needs_reference_scores() {
                Some(self.net_d.forward(batch.reference())?.detach())
            } else {
                None
            };
            let l_g_gan = self.cri_gan.generator_loss(&scores_fake, scores_real.as_ref())?;
            log.insert("l_g_gan", scalar(&l_g_gan)?);
            accumulate(&mut total, l_g_gan)?;
        }

        if let Some((weight, detector)) = &self.edge {
            let real_edge = detector.edges(&batch.gt)?;
            let fake_edge = detector.edges(fake)?;
            let l_g_edge = edge_loss(&fake_edge, &real_edge)?.affine(*weight, 0.0)?;
            log.insert("l_g_edge", scalar(&l_g_edge)?);
            accumulate(&mut total, l_g_edge)?;
        }

        let Some(l_g_total) = total else {
            debug!("all generator loss terms disabled; skipping generator update");
            return Ok(());
        };

        // Gradients reach the discriminator's parameters here too, but its
        // optimizer never sees them: each phase steps its own Var set.
        let mut grads = l_g_total.backward()?;
        let grad_norm = clip_gradient_norm(&self.params_g, &mut grads, GRAD_CLIP_NORM)?;
        self.opt_g.step(&grads)?;

        if self.rank <= 0 {
            debug!(l_g_total = scalar(&l_g_total)?, grad_norm, "generator update");
        }
        Ok(())
    }

    fn discriminator_step(
        &mut self,
        batch: &TrainingBatch,
        fake: &Tensor,
        log: &mut LogRecord,
    ) -> Result<()> {
        let scores_real = self.net_d.forward(batch.reference())?;

        let (scores_fake, qc) = if self.cri_gan.formulation() == GanFormulation::WassersteinQc {
            // The fake image is cut from the generator graph and re-marked
            // as a gradient leaf: the penalty's gradient terminates in the
            // image itself, never in generator parameters.
            let image_leaf = Var::from_tensor(fake)?;
            let scores_fake = self.net_d.forward(image_leaf.as_tensor())?;

            let solver = self
                .transport
                .as_ref()
                .ok_or_else(|| Error::config("wgan-qc requires a transport solver"))?;
            let k_coef = self.opts.wqc_k_coef;
            let (h_real, h_fake) = solver.dual_potentials(fake, batch.reference(), k_coef)?;
            let device = scores_real.device();
            let n_real = h_real.len();
            let n_fake = h_fake.len();
            let penalty = solver.quadratic_cost_penalty(
                &scores_fake,
                batch.reference(),
                image_leaf.as_tensor(),
                k_coef,
            )?;
            let qc = QcTerms {
                h_star_real: Tensor::from_vec(h_real, (n_real,), device)?,
                h_star_fake: Tensor::from_vec(h_fake, (n_fake,), device)?,
                penalty,
                gamma: self.opts.wqc_gamma,
            };
            (scores_fake, Some(qc))
        } else {
            (self.net_d.forward(fake)?, None)
        };

        let losses = self
            .cri_gan
            .discriminator_loss(&scores_real, &scores_fake, qc.as_ref())?;

        let grads = losses.total.backward()?;
        self.opt_d.step(&grads)?;

        log.insert("l_d_real", scalar(&losses.real)?);
        log.insert("l_d_fake", scalar(&losses.fake)?);
        log.insert("D_real", scalar(&scores_real.detach().mean_all()?)?);
        log.insert("D_fake", scalar(&scores_fake.detach().mean_all()?)?);
        Ok(())
    }

    /// Whole-image evaluation forward pass; no training side effects.
    pub fn test(&self, lq: &Tensor) -> Result<Tensor> {
        self.net_g.forward(lq, false)
    }

    /// Read-only access to the generator, e.g. for tiled inference.
    pub fn generator(&self) -> &dyn Generator {
        self.net_g.as_ref()
    }

    /// Advance both learning-rate schedules one step and apply the new
    /// rates to the optimizers. Called once per step by the outer loop.
    pub fn update_learning_rate(&mut self) {
        self.sched_g.step();
        self.sched_d.step();
        self.opt_g.set_learning_rate(self.sched_g.lr());
        self.opt_d.set_learning_rate(self.sched_d.lr());
    }

    /// Current (generator, discriminator) learning rates.
    pub fn learning_rates(&self) -> (f64, f64) {
        (self.opt_g.learning_rate(), self.opt_d.learning_rate())
    }

    /// Save both networks under their role tags.
    pub fn save_networks(&self, dir: &Path, step: u64) -> Result<()> {
        checkpoints::save_network(&self.vars_g, dir, "G", step)?;
        checkpoints::save_network(&self.vars_d, dir, "D", step)?;
        Ok(())
    }

    /// Load pretrained parameters, honoring `strict_load`.
    pub fn load_networks(&mut self, path_g: Option<&Path>, path_d: Option<&Path>) -> Result<()> {
        if let Some(path) = path_g {
            if self.rank <= 0 {
                info!(path = %path.display(), "loading model for G");
            }
            checkpoints::load_network(&self.vars_g, path, self.opts.strict_load)?;
        }
        if let Some(path) = path_d {
            if self.rank <= 0 {
                info!(path = %path.display(), "loading model for D");
            }
            checkpoints::load_network(&self.vars_d, path, self.opts.strict_load)?;
        }
        Ok(())
    }
}

fn adamw_params(p: &AdamParams) -> ParamsAdamW {
    ParamsAdamW {
        lr: p.lr,
        beta1: p.beta1,
        beta2: p.beta2,
        eps: 1e-8,
        weight_decay: p.weight_decay,
    }
}

fn scalar(t: &Tensor) -> Result<f64> {
    Ok(t.to_scalar::<f32>()? as f64)
}

fn accumulate(total: &mut Option<Tensor>, term: Tensor) -> Result<()> {
    *total = Some(match total.take() {
        Some(t) => (t + term)?,
        None => term,
    });
    Ok(())
}

/// Scale gradients so their global L2 norm does not exceed `max_norm`.
/// Returns the pre-clip norm.
fn clip_gradient_norm(vars: &[Var], grads: &mut GradStore, max_norm: f64) -> Result<f64> {
    let mut sq_sum = 0f64;
    for var in vars {
        if let Some(grad) = grads.get(var) {
            sq_sum += grad.sqr()?.sum_all()?.to_scalar::<f32>()? as f64;
        }
    }
    let norm = sq_sum.sqrt();
    if norm > max_norm {
        let scale = max_norm / norm;
        for var in vars {
            let clipped = match grads.get(var) {
                Some(grad) => (grad * scale)?,
                None => continue,
            };
            grads.insert(var, clipped);
        }
    }
    Ok(norm)
}
