//! Training configuration for the OTSR system
//!
//! Option names mirror the experiment files this crate consumes
//! (`pixel_weight`, `D_update_ratio`, `WQC_KCoef`, ...); typed enums reject
//! unrecognized values at parse time. Every configuration error is fatal at
//! construction; nothing here is retried.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Criterion used by the pixel and feature loss terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CriterionKind {
    /// Mean absolute error
    L1,
    /// Mean squared error
    L2,
}

/// Adversarial loss formulation, fixed for the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GanFormulation {
    /// BCE against absolute real/fake labels
    #[serde(rename = "gan")]
    Standard,
    /// Scores relative to the batch mean of the opposing class
    #[serde(rename = "ragan")]
    RelativisticAverage,
    /// Optimal-transport quadratic-cost formulation (WGAN-QC); requires an
    /// external dual-potential solver
    #[serde(rename = "wgan-qc")]
    WassersteinQc,
}

/// Edge-detector variant used by the edge-structure loss
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// Gradient-magnitude operator
    Sobel,
    /// Threshold-based operator
    Canny,
    /// Frozen learned edge network
    Hednet,
}

/// Learning-rate schedule family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LrScheme {
    /// Milestone gamma decay with optional warm restarts
    #[serde(rename = "MultiStepLR")]
    MultiStep,
    /// Per-period cosine annealing with warm restarts
    #[serde(rename = "CosineAnnealingLR_Restart")]
    CosineAnnealingRestart,
}

impl FromStr for CriterionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "l1" => Ok(Self::L1),
            "l2" => Ok(Self::L2),
            other => Err(Error::config(format!("Loss type [{other}] not recognized"))),
        }
    }
}

impl FromStr for GanFormulation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gan" => Ok(Self::Standard),
            "ragan" => Ok(Self::RelativisticAverage),
            "wgan-qc" => Ok(Self::WassersteinQc),
            other => Err(Error::config(format!("GAN type [{other}] not recognized"))),
        }
    }
}

impl FromStr for EdgeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sobel" => Ok(Self::Sobel),
            "canny" => Ok(Self::Canny),
            "hednet" => Ok(Self::Hednet),
            other => Err(Error::config(format!("Edge type [{other}] not recognized"))),
        }
    }
}

impl FromStr for LrScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MultiStepLR" => Ok(Self::MultiStep),
            "CosineAnnealingLR_Restart" => Ok(Self::CosineAnnealingRestart),
            other => Err(Error::config(format!("LR scheme [{other}] not recognized"))),
        }
    }
}

impl fmt::Display for GanFormulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Standard => "gan",
            Self::RelativisticAverage => "ragan",
            Self::WassersteinQc => "wgan-qc",
        };
        f.write_str(name)
    }
}

/// Per-optimizer Adam hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdamParams {
    /// Learning rate
    pub lr: f64,
    /// First moment decay
    pub beta1: f64,
    /// Second moment decay
    pub beta2: f64,
    /// Decoupled weight decay
    #[serde(default)]
    pub weight_decay: f64,
}

impl Default for AdamParams {
    fn default() -> Self {
        Self {
            lr: 1e-4,
            beta1: 0.9,
            beta2: 0.999,
            weight_decay: 0.0,
        }
    }
}

/// Full training configuration surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainOptions {
    /// Pixel loss weight; zero disables the term entirely
    #[serde(default)]
    pub pixel_weight: f64,

    /// Criterion for the pixel loss
    #[serde(default = "default_l1")]
    pub pixel_criterion: CriterionKind,

    /// Perceptual (feature) loss weight; zero disables the term and the
    /// feature-extractor forward pass
    #[serde(default)]
    pub feature_weight: f64,

    /// Criterion for the feature loss
    #[serde(default = "default_l1")]
    pub feature_criterion: CriterionKind,

    /// Adversarial loss formulation
    pub gan_type: GanFormulation,

    /// Adversarial loss weight
    pub gan_weight: f64,

    /// Generator updates only on steps divisible by this ratio
    #[serde(rename = "D_update_ratio", default = "default_ratio")]
    pub d_update_ratio: u64,

    /// Discriminator-only warm-up steps before the first generator update
    #[serde(rename = "D_init_iters", default)]
    pub d_init_iters: u64,

    /// Edge loss weight; zero disables the edge-detector forward pass
    #[serde(default)]
    pub edge_weight: f64,

    /// Edge-detector variant
    #[serde(default = "default_edge")]
    pub edge_type: EdgeKind,

    /// Generator learning rate
    #[serde(rename = "lr_G")]
    pub lr_g: f64,

    /// Generator Adam beta1
    #[serde(rename = "beta1_G", default = "default_beta1")]
    pub beta1_g: f64,

    /// Generator Adam beta2
    #[serde(rename = "beta2_G", default = "default_beta2")]
    pub beta2_g: f64,

    /// Generator weight decay
    #[serde(rename = "weight_decay_G", default)]
    pub weight_decay_g: f64,

    /// Discriminator learning rate
    #[serde(rename = "lr_D")]
    pub lr_d: f64,

    /// Discriminator Adam beta1
    #[serde(rename = "beta1_D", default = "default_beta1")]
    pub beta1_d: f64,

    /// Discriminator Adam beta2
    #[serde(rename = "beta2_D", default = "default_beta2")]
    pub beta2_d: f64,

    /// Discriminator weight decay
    #[serde(rename = "weight_decay_D", default)]
    pub weight_decay_d: f64,

    /// Learning-rate schedule family
    pub lr_scheme: LrScheme,

    /// MultiStepLR decay milestones (steps)
    #[serde(default)]
    pub lr_steps: Vec<u64>,

    /// MultiStepLR decay factor
    #[serde(default = "default_gamma")]
    pub lr_gamma: f64,

    /// Warm-restart steps
    #[serde(default)]
    pub restarts: Vec<u64>,

    /// Learning-rate weight applied at each restart
    #[serde(default)]
    pub restart_weights: Vec<f64>,

    /// Cosine annealing period lengths (steps)
    #[serde(rename = "T_period", default)]
    pub t_period: Vec<u64>,

    /// Cosine annealing floor
    #[serde(default)]
    pub eta_min: f64,

    /// Kernel coefficient handed to the optimal-transport solver
    #[serde(rename = "WQC_KCoef", default = "default_kcoef")]
    pub wqc_k_coef: f64,

    /// Scale on the quadratic-cost regularization term
    #[serde(rename = "WQC_gamma", default = "default_wqc_gamma")]
    pub wqc_gamma: f64,

    /// Generator upsampling factor
    pub scale: usize,

    /// Back-projection residual weight
    #[serde(default = "default_bp_lambda")]
    pub back_projection_lambda: f64,

    /// Whether this process is part of a distributed group
    #[serde(default)]
    pub dist: bool,

    /// Whether checkpoint loads require every parameter to be present
    #[serde(default = "default_true")]
    pub strict_load: bool,
}

fn default_l1() -> CriterionKind {
    CriterionKind::L1
}

fn default_edge() -> EdgeKind {
    EdgeKind::Sobel
}

fn default_ratio() -> u64 {
    1
}

fn default_beta1() -> f64 {
    0.9
}

fn default_beta2() -> f64 {
    0.999
}

fn default_gamma() -> f64 {
    0.5
}

fn default_kcoef() -> f64 {
    1.0
}

fn default_wqc_gamma() -> f64 {
    0.1
}

fn default_bp_lambda() -> f64 {
    0.2
}

fn default_true() -> bool {
    true
}

impl TrainOptions {
    /// Load options from a YAML file and validate them
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Parse options from a YAML string and validate them
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let opts: Self = serde_yaml::from_str(text)?;
        opts.validate()?;
        Ok(opts)
    }

    /// Parse options from a JSON string and validate them
    pub fn from_json_str(text: &str) -> Result<Self> {
        let opts: Self = serde_json::from_str(text)?;
        opts.validate()?;
        Ok(opts)
    }

    /// Adam hyperparameters for the generator optimizer
    pub fn adam_g(&self) -> AdamParams {
        AdamParams {
            lr: self.lr_g,
            beta1: self.beta1_g,
            beta2: self.beta2_g,
            weight_decay: self.weight_decay_g,
        }
    }

    /// Adam hyperparameters for the discriminator optimizer
    pub fn adam_d(&self) -> AdamParams {
        AdamParams {
            lr: self.lr_d,
            beta1: self.beta1_d,
            beta2: self.beta2_d,
            weight_decay: self.weight_decay_d,
        }
    }

    /// Check cross-field invariants. Called by the loaders and by the
    /// trainer constructor; any failure is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.d_update_ratio == 0 {
            return Err(Error::config("D_update_ratio must be at least 1"));
        }
        if self.scale == 0 {
            return Err(Error::config("scale must be at least 1"));
        }
        for (name, w) in [
            ("pixel_weight", self.pixel_weight),
            ("feature_weight", self.feature_weight),
            ("gan_weight", self.gan_weight),
            ("edge_weight", self.edge_weight),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(Error::config(format!("{name} must be finite and non-negative")));
            }
        }
        if !self.restarts.is_empty() && self.restarts.len() != self.restart_weights.len() {
            return Err(Error::config(
                "restarts and restart_weights must have the same length",
            ));
        }
        if self.lr_scheme == LrScheme::CosineAnnealingRestart && self.t_period.is_empty() {
            return Err(Error::config(
                "CosineAnnealingLR_Restart requires a non-empty T_period",
            ));
        }
        if self.lr_g <= 0.0 || self.lr_d <= 0.0 {
            return Err(Error::config("learning rates must be positive"));
        }
        Ok(())
    }
}
