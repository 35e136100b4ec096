//! Pipeline output against dense attention across preload and FIFO depths

mod common;

use common::{qkv, qkv_f16, scenario, SEED};
use half::{bf16, f16};
use tileforge::attention::{compare_tiles, dense_attention, Tolerance};
use tileforge::pipeline::{FlashAttention, PipelineConfig};
use tileforge::tensor::Tile;

fn run_f16(config: &PipelineConfig) -> Tile<f32> {
    let (q, k, v) = qkv_f16(config);
    FlashAttention::<f16>::new(config.clone())
        .unwrap()
        .run(&q, &k, &v)
        .unwrap()
        .output
}

fn reference_f16(config: &PipelineConfig) -> Tile<f32> {
    let (q, k, v) = qkv_f16(config);
    dense_attention(&q, &k, &v, config.scale(), config.causal_mask).unwrap()
}

#[test]
fn test_scenario_grid_matches_reference() {
    for preload in [1, 2, 4] {
        for depth in [2, 4, 8] {
            if preload > depth {
                continue;
            }
            let config = scenario(preload, depth);
            let report = compare_tiles(&run_f16(&config), &reference_f16(&config), Tolerance::OUTPUT).unwrap();
            assert!(
                report.is_match(),
                "P={} F={}: {} mismatches, max abs err {:e}",
                preload,
                depth,
                report.mismatches,
                report.max_abs_err
            );
        }
    }
}

#[test]
fn test_many_tiles_match_reference() {
    // 16 tiles: deep enough that every FIFO wraps several times
    let config = scenario(3, 6)
        .with_shape(64, 1024, 32)
        .with_tile_width(64)
        .with_matmul_block_size(32)
        .with_sync_period(3);
    let report = compare_tiles(&run_f16(&config), &reference_f16(&config), Tolerance::OUTPUT).unwrap();
    assert!(report.is_match(), "max abs err {:e}", report.max_abs_err);
}

#[test]
fn test_single_tile() {
    let config = scenario(1, 1).with_shape(64, 128, 128);
    assert_eq!(config.num_tiles(), 1);
    let attention = FlashAttention::<f16>::new(config.clone()).unwrap();
    let (q, k, v) = qkv_f16(&config);
    let out = attention.run(&q, &k, &v).unwrap();
    compare_tiles(&out.output, &reference_f16(&config), Tolerance::OUTPUT)
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(out.stats.tiles_per_block, 1);
}

#[test]
fn test_f32_inputs() {
    let config = scenario(2, 4).with_shape(64, 512, 64);
    let (q, k, v) = qkv::<f32>(&config, SEED + 1);
    let out = FlashAttention::<f32>::new(config.clone())
        .unwrap()
        .run(&q, &k, &v)
        .unwrap();
    let expected = dense_attention(&q, &k, &v, config.scale(), false).unwrap();
    compare_tiles(&out.output, &expected, Tolerance::OUTPUT)
        .unwrap()
        .into_result()
        .unwrap();
}

#[test]
fn test_bf16_inputs() {
    // bf16 keeps 8 mantissa bits, so probabilities round coarser than f16
    let config = scenario(2, 2).with_shape(64, 512, 64);
    let (q, k, v) = qkv::<bf16>(&config, SEED + 2);
    let out = FlashAttention::<bf16>::new(config.clone())
        .unwrap()
        .run(&q, &k, &v)
        .unwrap();
    let expected = dense_attention(&q, &k, &v, config.scale(), false).unwrap();
    compare_tiles(&out.output, &expected, Tolerance::CHECKPOINT)
        .unwrap()
        .into_result()
        .unwrap();
}

#[test]
fn test_multiple_query_blocks() {
    for parallel in [false, true] {
        let config = scenario(2, 4)
            .with_shape(256, 512, 64)
            .with_block_rows(64)
            .with_vec_lanes(4)
            .with_parallel_blocks(parallel);
        compare_tiles(&run_f16(&config), &reference_f16(&config), Tolerance::OUTPUT)
            .unwrap()
            .into_result()
            .unwrap();
    }
}
