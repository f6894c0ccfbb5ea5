//! Checkpoint I/O for generator and discriminator parameters
//!
//! Parameter sets are stored as safetensors files keyed by role tag and step
//! number (`{step}_{role}.safetensors`, e.g. `400000_G.safetensors`). The
//! file format itself is the collaborator's concern; this module only maps
//! variable maps in and out of it.

use std::path::{Path, PathBuf};

use candle_core::Device;
use candle_nn::VarMap;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Save one network's parameters under its role tag.
pub fn save_network(vars: &VarMap, dir: &Path, role: &str, step: u64) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{step}_{role}.safetensors"));
    vars.save(&path)?;
    info!(role, step, path = %path.display(), "saved network checkpoint");
    Ok(path)
}

/// Load parameters into an existing variable map.
///
/// With `strict` set, every variable in the map must be present in the file.
/// Otherwise the intersection is loaded and missing names are logged.
pub fn load_network(vars: &VarMap, path: &Path, strict: bool) -> Result<()> {
    if !path.exists() {
        return Err(Error::checkpoint(format!(
            "checkpoint file not found: {}",
            path.display()
        )));
    }
    if strict {
        let mut shared = vars.clone();
        shared.load(path)?;
    } else {
        let tensors = candle_core::safetensors::load(path, &Device::Cpu)?;
        let data = vars.data().lock().unwrap();
        for (name, var) in data.iter() {
            match tensors.get(name) {
                Some(t) => {
                    let t = t.to_device(var.device())?.to_dtype(var.dtype())?;
                    var.set(&t)?;
                }
                None => warn!(name, "checkpoint is missing a parameter; keeping current value"),
            }
        }
    }
    info!(path = %path.display(), strict, "loaded network checkpoint");
    Ok(())
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, Tensor};
    use candle_nn::Init;

    use super::*;

    fn make_vars(init: f64) -> VarMap {
        let vars = VarMap::new();
        vars.get((2, 2), "conv.w", Init::Const(init), DType::F32, &Device::Cpu)
            .unwrap();
        vars.get((2,), "conv.b", Init::Const(init), DType::F32, &Device::Cpu)
            .unwrap();
        vars
    }

    fn first_value(vars: &VarMap, name: &str) -> f32 {
        let data = vars.data().lock().unwrap();
        data[name].flatten_all().unwrap().to_vec1::<f32>().unwrap()[0]
    }

    #[test]
    fn round_trip_restores_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let saved = make_vars(0.75);
        let path = save_network(&saved, dir.path(), "G", 1000).unwrap();
        assert!(path.ends_with("1000_G.safetensors"));

        let fresh = make_vars(0.0);
        load_network(&fresh, &path, true).unwrap();
        assert_eq!(first_value(&fresh, "conv.w"), 0.75);
        assert_eq!(first_value(&fresh, "conv.b"), 0.75);
    }

    #[test]
    fn lenient_load_keeps_missing_parameters() {
        let dir = tempfile::tempdir().unwrap();
        // File only knows about conv.w.
        let partial = VarMap::new();
        partial
            .get((2, 2), "conv.w", Init::Const(0.25), DType::F32, &Device::Cpu)
            .unwrap();
        let path = save_network(&partial, dir.path(), "D", 5).unwrap();

        let target = make_vars(0.9);
        load_network(&target, &path, false).unwrap();
        assert_eq!(first_value(&target, "conv.w"), 0.25);
        assert_eq!(first_value(&target, "conv.b"), 0.9);
    }

    #[test]
    fn strict_load_fails_on_missing_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let partial = VarMap::new();
        partial
            .get((2, 2), "conv.w", Init::Const(0.25), DType::F32, &Device::Cpu)
            .unwrap();
        let path = save_network(&partial, dir.path(), "D", 5).unwrap();

        let target = make_vars(0.9);
        assert!(load_network(&target, &path, true).is_err());
    }

    #[test]
    fn missing_file_is_a_checkpoint_error() {
        let vars = make_vars(0.0);
        let err = load_network(&vars, Path::new("/nonexistent/0_G.safetensors"), true);
        assert!(matches!(err, Err(Error::Checkpoint(_))));
    }
}
