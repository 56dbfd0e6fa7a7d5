// Copyright 2024-2026 GG-CORE Contributors
// Licensed under the Apache License, Version 2.0

//! GPU Offload Negotiation
//!
//! Resolves a caller's GPU request against what the backend can actually do
//! and loads model weights with a single CPU-only retry when an accelerated
//! load fails. The outcome is recorded as a [`GpuPlacement`] on the session
//! instead of being reported as an error.

use std::fmt;
use std::path::Path;

use tracing::{info, warn};

use super::error::LoadError;
use crate::backend::{Backend, ModelParams};

/// Layer count meaning "offload every layer".
pub const ALL_LAYERS: u32 = 99;

/// Caller's GPU preference for a generation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpuRequest {
    /// Whether accelerated execution is wanted at all.
    pub enabled: bool,
    /// Layers to offload; negative means all.
    pub layers: i32,
}

impl GpuRequest {
    /// CPU-only execution.
    pub fn cpu() -> Self {
        Self { enabled: false, layers: 0 }
    }

    /// Offload every layer.
    pub fn all_layers() -> Self {
        Self { enabled: true, layers: -1 }
    }

    pub fn with_layers(layers: i32) -> Self {
        Self { enabled: true, layers }
    }

    /// Layers requested once the `enabled` switch is applied.
    fn requested_layers(&self) -> i32 {
        if self.enabled {
            self.layers
        } else {
            0
        }
    }
}

/// Where a loaded model's layers ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpuPlacement {
    pub using_gpu: bool,
    pub gpu_layers: u32,
}

impl GpuPlacement {
    pub fn cpu() -> Self {
        Self::default()
    }

    fn with_layers(gpu_layers: u32) -> Self {
        Self { using_gpu: gpu_layers > 0, gpu_layers }
    }
}

impl fmt::Display for GpuPlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.using_gpu {
            write!(f, "GPU ({} layers)", self.gpu_layers)
        } else {
            write!(f, "CPU")
        }
    }
}

/// Resolve a requested layer count against backend capability.
///
/// Unavailable acceleration always yields 0; a negative request yields
/// [`ALL_LAYERS`].
pub fn resolve_layer_count(requested: i32, available: bool) -> u32 {
    if !available {
        return 0;
    }
    u32::try_from(requested).unwrap_or(ALL_LAYERS)
}

/// Load `path` with the layer count `request` resolves to.
///
/// When that load fails with at least one layer offloaded, it is retried
/// exactly once on the CPU. Only a failure of the final attempt is returned.
pub fn load_with_fallback<B: Backend>(
    backend: &B,
    path: &Path,
    request: GpuRequest,
) -> Result<(B::Model, GpuPlacement), LoadError> {
    let available = backend.supports_gpu_offload();
    let layers = resolve_layer_count(request.requested_layers(), available);
    if request.enabled && !available {
        info!(backend = backend.name(), "GPU requested but not available, using CPU");
    }

    match backend.load_model(path, &ModelParams { n_gpu_layers: layers }) {
        Ok(model) => Ok((model, GpuPlacement::with_layers(layers))),
        Err(e) if layers > 0 => {
            warn!(layers, error = %e, "GPU model load failed, retrying on CPU");
            let model = backend
                .load_model(path, &ModelParams { n_gpu_layers: 0 })
                .map_err(|e| LoadError::ModelLoad { path: path.to_path_buf(), reason: e.to_string() })?;
            Ok((model, GpuPlacement::cpu()))
        }
        Err(e) => Err(LoadError::ModelLoad { path: path.to_path_buf(), reason: e.to_string() }),
    }
}

#[cfg(test)]
#[path = "gpu_tests.rs"]
mod tests;
