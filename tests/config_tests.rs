//! Configuration loading and rejection

mod common;

use common::scenario;
use half::f16;
use tileforge::error::{ErrorCategory, TileForgeError};
use tileforge::pipeline::{FlashAttention, PipelineConfig};
use tileforge::tensor::Tile;

#[test]
fn test_unsatisfiable_configs_fail_before_running() {
    let cases = [
        ("preload deeper than fifo", scenario(4, 2)),
        ("period not dividing depth", scenario(2, 8).with_sync_period(3)),
        ("sub-tiling without preload", scenario(1, 2).with_matmul_block_size(64)),
        ("ragged key tiles", scenario(2, 4).with_tile_width(96)),
        ("ragged lanes", scenario(2, 4).with_vec_lanes(3)),
        ("zero period", scenario(2, 4).with_sync_period(0)),
        ("negative scale", scenario(2, 4).with_scale(-1.0)),
    ];
    for (what, config) in cases {
        let err = FlashAttention::<f16>::new(config).err().expect(what);
        assert_eq!(err.category(), ErrorCategory::User, "{}: {}", what, err);
        assert!(matches!(err, TileForgeError::InvalidConfiguration(_)), "{}: {}", what, err);
    }
}

#[test]
fn test_input_shapes_are_checked_per_run() {
    let config = scenario(2, 4).with_shape(64, 256, 16);
    let attention = FlashAttention::<f16>::new(config).unwrap();
    let q = Tile::<f16>::zeros(64, 16);
    let kv = Tile::<f16>::zeros(256, 16);
    let short = Tile::<f16>::zeros(128, 16);
    let narrow = Tile::<f16>::zeros(64, 8);

    assert!(attention.run(&q, &kv, &kv).is_ok());
    for err in [
        attention.run(&narrow, &kv, &kv).unwrap_err(),
        attention.run(&q, &short, &kv).unwrap_err(),
        attention.run(&q, &kv, &short).unwrap_err(),
    ] {
        assert!(err.is_user_error(), "{}", err);
    }
}

#[test]
fn test_config_file_drives_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("attention.json");
    std::fs::write(
        &path,
        r#"{
            "s0": 64, "s1": 256, "head_size": 16,
            "tile_width": 64, "matmul_block_size": 32,
            "preload_depth": 2, "fifo_depth": 4, "sync_period": 2,
            "causal_mask": true
        }"#,
    )
    .unwrap();
    let config = PipelineConfig::from_json_file(&path).unwrap();
    assert_eq!(config.num_tiles(), 4);
    assert_eq!(config.k_tile_factor(), 2);

    let attention = FlashAttention::<f16>::new(config).unwrap();
    assert_eq!(attention.programs(0).unwrap().masked_tiles(), 3);
}

#[test]
fn test_bad_config_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("attention.json");
    std::fs::write(&path, r#"{"s0": "many"}"#).unwrap();
    let err = PipelineConfig::from_json_file(&path).unwrap_err();
    assert!(matches!(err, TileForgeError::Serialization(_)), "{}", err);

    std::fs::write(&path, r#"{"preload_depth": 9, "fifo_depth": 8}"#).unwrap();
    let err = PipelineConfig::from_json_file(&path).unwrap_err();
    assert!(matches!(err, TileForgeError::InvalidConfiguration(_)), "{}", err);

    let err = PipelineConfig::from_json_file(dir.path().join("missing.json")).unwrap_err();
    assert!(matches!(err, TileForgeError::IoError(_)), "{}", err);
    assert_eq!(err.category(), ErrorCategory::User);
}
