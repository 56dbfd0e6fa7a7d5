// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Sampler chain description.
//!
//! The chain is built fresh for every generation call and handed to the
//! backend, which turns it into a native sampler that lives only for that
//! call.

use super::config::GenerationParams;

/// Repetition-penalty lookback window (tokens).
pub const PENALTY_LAST_N: i32 = 256;
/// Repeat penalty coefficient.
pub const PENALTY_REPEAT: f32 = 1.15;
/// Frequency penalty coefficient.
pub const PENALTY_FREQUENCY: f32 = 0.1;
/// Presence penalty coefficient.
pub const PENALTY_PRESENCE: f32 = 0.0;
/// Top-p never filters below this many candidates.
pub const TOP_P_MIN_KEEP: usize = 1;
/// Seed of the final draw.
pub const DEFAULT_SEED: u32 = 42;

/// One token-selection stage.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplerStage {
    Penalties { last_n: i32, repeat: f32, frequency: f32, presence: f32 },
    TopK(i32),
    TopP { p: f32, min_keep: usize },
    Temperature(f32),
    Distribution { seed: u32 },
}

/// Ordered sampler stages ending in one stochastic draw.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerChain {
    stages: Vec<SamplerStage>,
}

impl SamplerChain {
    /// penalties → top-k → top-p → temperature → draw.
    pub fn for_generation(params: &GenerationParams) -> Self {
        Self {
            stages: vec![
                SamplerStage::Penalties {
                    last_n: PENALTY_LAST_N,
                    repeat: PENALTY_REPEAT,
                    frequency: PENALTY_FREQUENCY,
                    presence: PENALTY_PRESENCE,
                },
                SamplerStage::TopK(params.top_k),
                SamplerStage::TopP { p: params.top_p, min_keep: TOP_P_MIN_KEEP },
                SamplerStage::Temperature(params.temperature),
                SamplerStage::Distribution { seed: params.seed },
            ],
        }
    }

    pub fn stages(&self) -> &[SamplerStage] {
        &self.stages
    }
}
