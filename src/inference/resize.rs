//! Separable bicubic resampling
//!
//! Resizing is expressed as two interpolation matrices, one per spatial
//! axis, applied by matrix multiplication: `out = W_h * img * W_w^T`. The
//! matrices use the Catmull-Rom-style cubic kernel with `a = -0.75` and
//! half-pixel sample alignment, with taps clamped at the borders, so the
//! result matches the convention of mainstream image pipelines.

use candle_core::{Device, Tensor};

use crate::error::{Error, Result};

const KERNEL_A: f64 = -0.75;

/// Resize an image batch `(batch, channels, h, w)` to `(out_h, out_w)`.
pub fn bicubic_resize(img: &Tensor, out_h: usize, out_w: usize) -> Result<Tensor> {
    let (_b, _c, in_h, in_w) = img.dims4()?;
    if out_h == 0 || out_w == 0 {
        return Err(Error::invalid_input("resize target must be non-zero"));
    }
    let device = img.device();
    let resized = if out_h == in_h {
        img.clone()
    } else {
        let wh = interp_matrix(out_h, in_h, device)?;
        wh.broadcast_matmul(img)?
    };
    if out_w == in_w {
        return Ok(resized);
    }
    let ww = interp_matrix(out_w, in_w, device)?.t()?;
    Ok(resized.broadcast_matmul(&ww)?)
}

/// Build the `(out_len, in_len)` interpolation matrix for one axis.
///
/// Each output row holds the four kernel weights of its cubic window,
/// accumulated into clamped source columns at the borders. Interior rows
/// sum to exactly one by the kernel's partition-of-unity property, and
/// clamping preserves that sum.
fn interp_matrix(out_len: usize, in_len: usize, device: &Device) -> Result<Tensor> {
    let ratio = in_len as f64 / out_len as f64;
    let mut weights = vec![0f32; out_len * in_len];
    for (i, row) in weights.chunks_mut(in_len).enumerate() {
        let src = (i as f64 + 0.5) * ratio - 0.5;
        let base = src.floor();
        let frac = src - base;
        for tap in -1i64..=2 {
            let weight = cubic(frac - tap as f64) as f32;
            let col = (base as i64 + tap).clamp(0, in_len as i64 - 1) as usize;
            row[col] += weight;
        }
    }
    Ok(Tensor::from_vec(weights, (out_len, in_len), device)?)
}

fn cubic(x: f64) -> f64 {
    let a = KERNEL_A;
    let x = x.abs();
    if x <= 1.0 {
        (a + 2.0) * x.powi(3) - (a + 3.0) * x.powi(2) + 1.0
    } else if x < 2.0 {
        a * x.powi(3) - 5.0 * a * x.powi(2) + 8.0 * a * x - 4.0 * a
    } else {
        0.0
    }
}
