//! Causal masking across tiles and query blocks

mod common;

use common::{qkv_f16, scenario};
use half::f16;
use tileforge::attention::{compare_tiles, dense_attention, Tolerance};
use tileforge::pipeline::{FlashAttention, PipelineConfig};

fn check_against_dense(config: &PipelineConfig) {
    let (q, k, v) = qkv_f16(config);
    let out = FlashAttention::<f16>::new(config.clone())
        .unwrap()
        .run(&q, &k, &v)
        .unwrap();
    let expected = dense_attention(&q, &k, &v, config.scale(), true).unwrap();
    let report = compare_tiles(&out.output, &expected, Tolerance::OUTPUT).unwrap();
    assert!(report.is_match(), "{:?}", report.first_mismatch);
}

#[test]
fn test_causal_scenario() {
    for (preload, depth) in [(1, 2), (2, 2), (2, 8)] {
        check_against_dense(&scenario(preload, depth).with_causal_mask(true));
    }
}

#[test]
fn test_causal_tiles_narrower_than_block() {
    // 32-wide tiles: rows of a 64-row block straddle two diagonal tiles
    let config = scenario(2, 4)
        .with_shape(64, 256, 32)
        .with_tile_width(32)
        .with_matmul_block_size(16)
        .with_causal_mask(true);
    check_against_dense(&config);
}

#[test]
fn test_causal_multi_block_skips_masked_tiles() {
    let config = scenario(2, 4)
        .with_shape(256, 256, 32)
        .with_block_rows(64)
        .with_tile_width(64)
        .with_matmul_block_size(64)
        .with_vec_lanes(2)
        .with_causal_mask(true);
    check_against_dense(&config);

    let (q, k, v) = qkv_f16(&config);
    let out = FlashAttention::<f16>::new(config.clone())
        .unwrap()
        .run(&q, &k, &v)
        .unwrap();
    // block b sees tiles 0..=b; the remaining 3 - b tiles pass through on both lanes
    let masked: usize = (0..4).map(|b| 2 * (3 - b)).sum();
    assert_eq!(out.stats.masked_tiles, masked);
    assert_eq!(out.stats.pv_sub_matmuls, 4 * 4 - masked / 2);
}

#[test]
fn test_causal_rejects_more_queries_than_keys() {
    let config = scenario(2, 4).with_shape(512, 256, 32).with_causal_mask(true);
    let err = FlashAttention::<f16>::new(config).err().unwrap();
    assert!(err.is_user_error());
}

#[test]
fn test_first_row_attends_only_to_first_key() {
    let config = scenario(2, 4).with_shape(64, 256, 16).with_causal_mask(true);
    let (q, k, v) = qkv_f16(&config);
    let out = FlashAttention::<f16>::new(config.clone())
        .unwrap()
        .run(&q, &k, &v)
        .unwrap();
    for c in 0..config.head_size {
        let expected = v.get(0, c).to_f32();
        assert!((out.output.get(0, c) - expected).abs() < 1e-6);
    }
}
