//! Shared helpers for the integration tests
//!
//! - Seeded input generators, so every run sees the same tensors
//! - The reference scenario shapes
//! - `serial` for tests that touch the global tracing subscriber

#![allow(dead_code)]

use half::f16;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tileforge::pipeline::PipelineConfig;
use tileforge::tensor::{Element, Tile};

pub use serial_test::serial;

pub const SEED: u64 = 0x5EED_F1A5;

/// Query rows of the reference scenario
pub const S0: usize = 64;
pub const HEAD_SIZE: usize = 128;
pub const S1: usize = 256;
pub const TILE_WIDTH: usize = 128;

/// The reference scenario with the given preload and FIFO depths
pub fn scenario(preload_depth: usize, fifo_depth: usize) -> PipelineConfig {
    PipelineConfig::new()
        .with_shape(S0, S1, HEAD_SIZE)
        .with_tile_width(TILE_WIDTH)
        .with_matmul_block_size(TILE_WIDTH)
        .with_block_rows(S0)
        .with_preload_depth(preload_depth)
        .with_fifo_depth(fifo_depth)
}

/// A `rows x cols` tile of uniform values in `[-1, 1)`
pub fn random_tile<T: Element>(rng: &mut StdRng, rows: usize, cols: usize) -> Tile<T> {
    Tile::from_fn(rows, cols, |_, _| T::from_f32(rng.gen_range(-1.0f32..1.0)))
}

/// Q, K and V for `config`, drawn from one seeded stream
pub fn qkv<T: Element>(config: &PipelineConfig, seed: u64) -> (Tile<T>, Tile<T>, Tile<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let q = random_tile(&mut rng, config.s0, config.head_size);
    let k = random_tile(&mut rng, config.s1, config.head_size);
    let v = random_tile(&mut rng, config.s1, config.head_size);
    (q, k, v)
}

/// Half-precision inputs, the default element type of the scenarios
pub fn qkv_f16(config: &PipelineConfig) -> (Tile<f16>, Tile<f16>, Tile<f16>) {
    qkv(config, SEED)
}

/// Bitwise equality of two f32 tiles
pub fn bits_equal(a: &Tile<f32>, b: &Tile<f32>) -> bool {
    a.shape() == b.shape()
        && a
            .as_slice()
            .iter()
            .zip(b.as_slice())
            .all(|(x, y)| x.to_bits() == y.to_bits())
}
