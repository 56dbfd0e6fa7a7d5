// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-call generation parameters.

use super::sampler::DEFAULT_SEED;

/// Caller-supplied parameters for one generation call.
///
/// Values are passed to the sampler chain as given; nothing is clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// Maximum draws; `<= 0` generates nothing.
    pub max_tokens: i32,
    /// Temperature for sampling (0.0 = greedy).
    pub temperature: f32,
    /// Top-p (nucleus) threshold.
    pub top_p: f32,
    /// Top-k limit (<= 0 keeps every candidate).
    pub top_k: i32,
    /// Seed of the final stochastic draw.
    pub seed: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            seed: DEFAULT_SEED,
        }
    }
}

impl GenerationParams {
    pub fn new(max_tokens: i32, temperature: f32, top_p: f32, top_k: i32) -> Self {
        Self { max_tokens, temperature, top_p, top_k, seed: DEFAULT_SEED }
    }

    /// Number of generation iterations this call may run.
    pub fn iterations(&self) -> usize {
        usize::try_from(self.max_tokens).unwrap_or(0)
    }
}
