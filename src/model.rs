//! Collaborator interfaces and owned model state
//!
//! Network topologies are deliberately opaque to this crate: the trainer and
//! the tiled inference engine only rely on the forward contracts below.
//! Implementations wrap whatever candle modules (or remote services) define
//! the actual architectures.

use candle_core::Tensor;
use candle_nn::VarMap;

use crate::error::Result;

/// Super-resolution generator: low-quality image in, high-quality image out.
///
/// Images are `(batch, channels, height, width)` tensors in `[0, 1]`.
pub trait Generator: Send + Sync {
    /// Run the generator. `train` selects training-time behavior for modules
    /// that care (batch norm, dropout); inference passes `false`.
    fn forward(&self, lq: &Tensor, train: bool) -> Result<Tensor>;

    /// Spatial upsampling factor of the generator output.
    fn scale(&self) -> usize;

    /// Forward pass returning every output head. Generators with auxiliary
    /// outputs override this; the default wraps the primary output.
    fn forward_all(&self, lq: &Tensor, train: bool) -> Result<Vec<Tensor>> {
        Ok(vec![self.forward(lq, train)?])
    }
}

/// Discriminator: image in, one realism score per batch sample out.
pub trait Discriminator: Send + Sync {
    /// Score a batch of images; the result has shape `(batch,)`.
    fn forward(&self, img: &Tensor) -> Result<Tensor>;
}

/// Frozen perceptual feature extractor (never updated).
pub trait FeatureExtractor: Send + Sync {
    /// Map an image batch to its feature representation.
    fn forward(&self, img: &Tensor) -> Result<Tensor>;
}

/// Edge-detector collaborator: image in, edge map out. Which of the
/// interchangeable variants (gradient-magnitude, threshold-based, learned
/// network) backs this is fixed by configuration.
pub trait EdgeDetector: Send + Sync {
    /// Compute the edge map of an image batch.
    fn edges(&self, img: &Tensor) -> Result<Tensor>;
}

/// External optimal-transport solver backing the WGAN-QC formulation.
pub trait TransportSolver: Send + Sync {
    /// Solve the dual-potential problem over a detached (fake, real) image
    /// batch. The two arrays are batch-aligned with the discriminator's
    /// fake/real score batches.
    fn dual_potentials(
        &self,
        fake: &Tensor,
        real: &Tensor,
        k_coef: f64,
    ) -> Result<(Vec<f32>, Vec<f32>)>;

    /// Quadratic-cost regularization term. `fake` carries a gradient-leaf
    /// flag independent of the generator graph; the returned scalar must be
    /// differentiable w.r.t. `scores_fake` and `fake`.
    fn quadratic_cost_penalty(
        &self,
        scores_fake: &Tensor,
        real: &Tensor,
        fake: &Tensor,
        k_coef: f64,
    ) -> Result<Tensor>;
}

/// Exclusively-owned model state: the networks plus the parameter maps the
/// optimizers and checkpoint I/O operate on. Constructed once at start and
/// mutated only by the trainer.
pub struct ModelState {
    /// The generator network
    pub net_g: Box<dyn Generator>,
    /// Generator trainable parameters
    pub vars_g: VarMap,
    /// The discriminator network (training only)
    pub net_d: Option<Box<dyn Discriminator>>,
    /// Discriminator trainable parameters (training only)
    pub vars_d: Option<VarMap>,
    /// Frozen feature extractor for the perceptual loss
    pub net_f: Option<Box<dyn FeatureExtractor>>,
    /// Edge detector for the edge-structure loss
    pub edge: Option<Box<dyn EdgeDetector>>,
    /// Optimal-transport solver for the WGAN-QC formulation
    pub transport: Option<Box<dyn TransportSolver>>,
}

impl ModelState {
    /// Inference-only state: a generator with no training collaborators.
    pub fn inference(net_g: Box<dyn Generator>, vars_g: VarMap) -> Self {
        Self {
            net_g,
            vars_g,
            net_d: None,
            vars_d: None,
            net_f: None,
            edge: None,
            transport: None,
        }
    }
}
