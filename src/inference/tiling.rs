//! Recursive overlap-aware tiled inference
//!
//! Large inputs are split into four quadrants, each extended by a `shave`
//! border into its neighbors so convolutional boundary artifacts land in
//! pixels that are cropped away again before stitching. Quadrants above the
//! area budget recurse with the same parameters; quadrants within it run
//! through the generator directly, dispatched in parallel groups.
//!
//! The partition is planned first as a pure [`TileTree`], then executed.
//! Planning is total: any input down to a single pixel gets a tree, and the
//! four children of every split reassemble the parent region exactly.

use candle_core::Tensor;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::model::Generator;

/// Recursive quadrant partition of an image.
///
/// All four tiles of a split share one shape, so a single child plan covers
/// them. `Leaf` runs the generator on the region as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileTree {
    /// Run the generator on the whole region.
    Leaf,
    /// Split into four shave-overlapped tiles of `tile_h x tile_w` and apply
    /// the child plan to each.
    Branch {
        /// Tile height, `ceil(h/2) + shave` clamped to the region height
        tile_h: usize,
        /// Tile width, `ceil(w/2) + shave` clamped to the region width
        tile_w: usize,
        /// Plan applied to each of the four tiles
        child: Box<TileTree>,
    },
}

impl TileTree {
    /// Plan the partition of an `h x w` region.
    ///
    /// Regions under `4 * min_size` in area split exactly once; larger
    /// regions recurse until their tiles fit the budget. Regions too small
    /// to halve (or whose tiles would not shrink) run whole.
    pub fn plan(h: usize, w: usize, shave: usize, min_size: usize) -> TileTree {
        if h < 2 || w < 2 {
            return TileTree::Leaf;
        }
        // The tile must cover the larger (ceiling) half of an odd dimension
        // even at shave 0, or the stitch would come up one pixel short.
        let tile_h = (h - h / 2 + shave).min(h);
        let tile_w = (w - w / 2 + shave).min(w);
        if tile_h >= h || tile_w >= w {
            return TileTree::Leaf;
        }
        let child = if h * w < 4 * min_size {
            TileTree::Leaf
        } else {
            Self::plan(tile_h, tile_w, shave, min_size)
        };
        TileTree::Branch {
            tile_h,
            tile_w,
            child: Box::new(child),
        }
    }

    /// Number of generator invocations this plan will make.
    pub fn leaf_count(&self) -> usize {
        match self {
            TileTree::Leaf => 1,
            TileTree::Branch { child, .. } => 4 * child.leaf_count(),
        }
    }

    /// Number of split levels above the leaves.
    pub fn depth(&self) -> usize {
        match self {
            TileTree::Leaf => 0,
            TileTree::Branch { child, .. } => 1 + child.depth(),
        }
    }
}

/// Memory-bounded inference engine for a fixed generator contract.
///
/// `min_size` bounds the area of any region handed to the generator;
/// `parallelism` bounds how many tiles are dispatched concurrently within
/// one split level. Levels combine their four tiles before the enclosing
/// level continues, keeping peak memory proportional to one level's tiles.
#[derive(Debug, Clone)]
pub struct TiledInference {
    shave: usize,
    min_size: usize,
    parallelism: usize,
}

impl Default for TiledInference {
    fn default() -> Self {
        Self {
            shave: 10,
            min_size: 160_000,
            parallelism: 4,
        }
    }
}

impl TiledInference {
    /// Engine with the default shave (10), area budget (160000) and
    /// dispatch group size (4).
    pub fn new() -> Self {
        Self::default()
    }

    /// Border width absorbed into each tile and cropped before stitching.
    pub fn with_shave(mut self, shave: usize) -> Self {
        self.shave = shave;
        self
    }

    /// Maximum region area handed to the generator in one call.
    pub fn with_min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    /// Number of tiles dispatched concurrently; clamped to at least 1.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// The partition this engine would use for an `h x w` input.
    pub fn plan(&self, h: usize, w: usize) -> TileTree {
        TileTree::plan(h, w, self.shave, self.min_size)
    }

    /// Tiled forward pass returning the generator's primary output.
    pub fn infer(&self, net: &dyn Generator, lq: &Tensor) -> Result<Tensor> {
        self.infer_all(net, lq)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::invalid_input("generator produced no outputs"))
    }

    /// Tiled forward pass returning every generator output head, stitched
    /// independently. Heads may differ in upsampling factor as long as each
    /// factor is a whole number.
    pub fn infer_all(&self, net: &dyn Generator, lq: &Tensor) -> Result<Vec<Tensor>> {
        let (_b, _c, h, w) = lq.dims4()?;
        let tree = self.plan(h, w);
        self.run_node(net, lq, &tree)
    }

    fn run_node(&self, net: &dyn Generator, x: &Tensor, tree: &TileTree) -> Result<Vec<Tensor>> {
        let (tile_h, tile_w, child) = match tree {
            TileTree::Leaf => return net.forward_all(x, false),
            TileTree::Branch { tile_h, tile_w, child } => (*tile_h, *tile_w, child.as_ref()),
        };
        let (_b, _c, h, w) = x.dims4()?;

        let tiles = [
            x.narrow(2, 0, tile_h)?.narrow(3, 0, tile_w)?,
            x.narrow(2, 0, tile_h)?.narrow(3, w - tile_w, tile_w)?,
            x.narrow(2, h - tile_h, tile_h)?.narrow(3, 0, tile_w)?,
            x.narrow(2, h - tile_h, tile_h)?.narrow(3, w - tile_w, tile_w)?,
        ];

        // Dispatch in groups of `parallelism`; each group completes before
        // the next starts so peak memory stays at one group's tiles.
        let mut quadrants: Vec<Vec<Tensor>> = Vec::with_capacity(4);
        for group in tiles.chunks(self.parallelism) {
            let group_outputs: Vec<Vec<Tensor>> = group
                .par_iter()
                .map(|tile| self.run_node(net, tile, child))
                .collect::<Result<_>>()?;
            quadrants.extend(group_outputs);
        }

        let heads = quadrants[0].len();
        if quadrants.iter().any(|q| q.len() != heads) {
            return Err(Error::invalid_input(
                "generator produced a different number of outputs per tile",
            ));
        }

        let mut stitched = Vec::with_capacity(heads);
        for k in 0..heads {
            stitched.push(stitch_quadrants(
                &quadrants[0][k],
                &quadrants[1][k],
                &quadrants[2][k],
                &quadrants[3][k],
                (h, w),
                (tile_h, tile_w),
            )?);
        }
        Ok(stitched)
    }
}

/// Reassemble four shave-overlapped quadrant outputs into the full output.
///
/// The split point is `h/2` (resp. `w/2`) in input coordinates; each
/// quadrant output contributes only its non-overlapping quarter, with the
/// bottom/right quadrants cropped from their far edge so the shaved border
/// never reaches the result. Every output pixel is written exactly once.
fn stitch_quadrants(
    tl: &Tensor,
    tr: &Tensor,
    bl: &Tensor,
    br: &Tensor,
    (h, w): (usize, usize),
    (tile_h, tile_w): (usize, usize),
) -> Result<Tensor> {
    let (_b, _c, out_h, out_w) = tl.dims4()?;
    if out_h % tile_h != 0 || out_w % tile_w != 0 {
        return Err(Error::invalid_input(format!(
            "tile output {out_h}x{out_w} is not an integer multiple of tile input {tile_h}x{tile_w}"
        )));
    }
    let sh = out_h / tile_h;
    let sw = out_w / tile_w;

    let h_top = h / 2;
    let h_bot = h - h_top;
    let w_left = w / 2;
    let w_right = w - w_left;

    let top = Tensor::cat(
        &[
            tl.narrow(3, 0, w_left * sw)?,
            tr.narrow(3, out_w - w_right * sw, w_right * sw)?,
        ],
        3,
    )?;
    let bottom = Tensor::cat(
        &[
            bl.narrow(3, 0, w_left * sw)?,
            br.narrow(3, out_w - w_right * sw, w_right * sw)?,
        ],
        3,
    )?;
    Ok(Tensor::cat(
        &[
            top.narrow(2, 0, h_top * sh)?,
            bottom.narrow(2, out_h - h_bot * sh, h_bot * sh)?,
        ],
        2,
    )?)
}

#[cfg(test)]
mod tests {
    use candle_core::{Device, Tensor};
    use candle_nn::VarMap;

    use super::*;
    use crate::model::testing::{DualHeadGenerator, LinearGenerator};

    fn linear_generator(scale: usize) -> LinearGenerator {
        let vars = VarMap::new();
        LinearGenerator::new(&vars, scale, 0.5, &Device::Cpu).unwrap()
    }

    fn values(t: &Tensor) -> Vec<f32> {
        t.flatten_all().unwrap().to_vec1::<f32>().unwrap()
    }

    #[test]
    fn plan_splits_once_within_area_budget() {
        // 320*320 = 102400 < 4*40000, so the base case applies: one split,
        // four direct generator calls.
        let tree = TileTree::plan(320, 320, 10, 40_000);
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.leaf_count(), 4);
        match tree {
            TileTree::Branch { tile_h, tile_w, .. } => {
                assert_eq!((tile_h, tile_w), (170, 170));
            }
            TileTree::Leaf => panic!("expected a split"),
        }
    }

    #[test]
    fn plan_recurses_until_tiles_fit() {
        let tree = TileTree::plan(320, 320, 10, 10_000);
        // 102400 >= 40000 forces a recursion; the 170x170 tiles
        // (28900 < 40000) then hit the base case.
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.leaf_count(), 16);
    }

    #[test]
    fn plan_degenerate_region_runs_whole() {
        assert_eq!(TileTree::plan(1, 512, 10, 100), TileTree::Leaf);
        assert_eq!(TileTree::plan(512, 1, 10, 100), TileTree::Leaf);
    }

    #[test]
    fn plan_terminates_when_shave_dominates() {
        // shave >= half the region: tiles would not shrink, so run whole.
        assert_eq!(TileTree::plan(8, 8, 16, 1), TileTree::Leaf);
    }

    #[test]
    fn output_dimensions_scale_with_the_generator() {
        let net = linear_generator(2);
        let lq = Tensor::rand(0f32, 1f32, (1, 3, 320, 320), &Device::Cpu).unwrap();
        let engine = TiledInference::new().with_min_size(40_000);
        let sr = engine.infer(&net, &lq).unwrap();
        assert_eq!(sr.dims4().unwrap(), (1, 3, 640, 640));
    }

    #[test]
    fn tiled_matches_whole_image_inference() {
        // Pointwise generator: tiling must reproduce the whole-image pass
        // exactly, including through two levels of recursion.
        let net = linear_generator(2);
        let lq = Tensor::rand(0f32, 1f32, (1, 1, 64, 64), &Device::Cpu).unwrap();
        let whole = net.forward(&lq, false).unwrap();
        let engine = TiledInference::new().with_shave(4).with_min_size(256);
        assert!(engine.plan(64, 64).depth() >= 2);
        let tiled = engine.infer(&net, &lq).unwrap();
        assert_eq!(values(&tiled), values(&whole));
    }

    #[test]
    fn result_is_invariant_to_shave() {
        let net = linear_generator(1);
        let lq = Tensor::rand(0f32, 1f32, (1, 1, 48, 48), &Device::Cpu).unwrap();
        let a = TiledInference::new()
            .with_shave(2)
            .with_min_size(64)
            .infer(&net, &lq)
            .unwrap();
        let b = TiledInference::new()
            .with_shave(10)
            .with_min_size(64)
            .infer(&net, &lq)
            .unwrap();
        assert_eq!(values(&a), values(&b));
    }

    #[test]
    fn odd_dimensions_stitch_without_gaps() {
        let net = linear_generator(2);
        let lq = Tensor::rand(0f32, 1f32, (1, 1, 33, 47), &Device::Cpu).unwrap();
        let whole = net.forward(&lq, false).unwrap();
        let tiled = TiledInference::new()
            .with_shave(3)
            .with_min_size(100)
            .infer(&net, &lq)
            .unwrap();
        assert_eq!(tiled.dims4().unwrap(), (1, 1, 66, 94));
        assert_eq!(values(&tiled), values(&whole));
    }

    #[test]
    fn zero_shave_odd_dimensions_stitch_exactly() {
        // With no shave, each tile is exactly the ceiling half, so the
        // bottom/right quadrants of a 33x33 input still cover their 17 rows.
        let net = linear_generator(2);
        let lq = Tensor::rand(0f32, 1f32, (1, 1, 33, 33), &Device::Cpu).unwrap();
        let whole = net.forward(&lq, false).unwrap();
        let tiled = TiledInference::new()
            .with_shave(0)
            .with_min_size(100)
            .infer(&net, &lq)
            .unwrap();
        assert_eq!(tiled.dims4().unwrap(), (1, 1, 66, 66));
        assert_eq!(values(&tiled), values(&whole));
    }

    #[test]
    fn auxiliary_heads_are_stitched_independently() {
        let vars = VarMap::new();
        let net = DualHeadGenerator::new(&vars, 1, &Device::Cpu).unwrap();
        let lq = Tensor::rand(0f32, 1f32, (1, 1, 32, 32), &Device::Cpu).unwrap();
        let outputs = TiledInference::new()
            .with_shave(2)
            .with_min_size(64)
            .infer_all(&net, &lq)
            .unwrap();
        assert_eq!(outputs.len(), 2);
        let primary = values(&outputs[0]);
        let aux = values(&outputs[1]);
        for (p, a) in primary.iter().zip(&aux) {
            assert_eq!(*a, -p);
        }
    }

    #[test]
    fn sequential_dispatch_matches_parallel() {
        let net = linear_generator(1);
        let lq = Tensor::rand(0f32, 1f32, (1, 1, 40, 40), &Device::Cpu).unwrap();
        let parallel = TiledInference::new()
            .with_min_size(64)
            .infer(&net, &lq)
            .unwrap();
        let sequential = TiledInference::new()
            .with_min_size(64)
            .with_parallelism(1)
            .infer(&net, &lq)
            .unwrap();
        assert_eq!(values(&parallel), values(&sequential));
    }
}
