//! Memory-bounded inference on large images
//!
//! [`tiling::TiledInference`] runs a generator over arbitrarily large
//! inputs by recursive overlap-aware quadrant splitting;
//! [`back_projection::refine`] optionally corrects the stitched result
//! against the original input. [`resize`] provides the bicubic resampler
//! both the refiner and callers use.

pub mod back_projection;
pub mod resize;
pub mod tiling;

pub use back_projection::refine;
pub use resize::bicubic_resize;
pub use tiling::{TileTree, TiledInference};
