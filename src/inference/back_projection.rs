//! Back-projection refinement
//!
//! Corrects low-frequency bias in an upscaled output: downsample the output
//! back to input resolution, take the residual against the original input,
//! upsample the residual and add a `lambda`-weighted fraction of it. The
//! result is clamped to `[0, 1]`. Purely corrective, and idempotent only at
//! a zero-residual fixed point.

use candle_core::Tensor;

use crate::error::{Error, Result};
use crate::inference::resize::bicubic_resize;

/// Refine an upscaled output `sr` against its low-quality source `lq`.
///
/// `sr` must be exactly `scale` times the spatial size of `lq`.
pub fn refine(sr: &Tensor, lq: &Tensor, scale: usize, lambda: f64) -> Result<Tensor> {
    if scale == 0 {
        return Err(Error::invalid_input("scale must be at least 1"));
    }
    let (_b, _c, lh, lw) = lq.dims4()?;
    let (_b, _c, sh, sw) = sr.dims4()?;
    if sh != lh * scale || sw != lw * scale {
        return Err(Error::invalid_input(format!(
            "output {sh}x{sw} is not {scale}x the input {lh}x{lw}"
        )));
    }

    let down = bicubic_resize(sr, lh, lw)?;
    let residual = (lq - down)?;
    let up = bicubic_resize(&residual, sh, sw)?;
    let refined = (sr + up.affine(lambda, 0.0)?)?;
    Ok(refined.clamp(0f32, 1f32)?)
}
