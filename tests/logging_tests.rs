//! Subscriber installation with a JSON log file

mod common;

use common::{qkv_f16, scenario, serial};
use half::f16;
use tileforge::logging::{init_with_config, is_initialized, LogLevel, LoggingConfig};
use tileforge::pipeline::FlashAttention;

#[test]
#[serial]
fn test_pipeline_events_reach_the_log_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logs").join("tileforge.jsonl");
    init_with_config(
        &LoggingConfig::new()
            .with_level(LogLevel::Debug)
            .with_log_file(&path),
    );
    assert!(is_initialized());

    let config = scenario(2, 4).with_shape(64, 256, 16);
    let (q, k, v) = qkv_f16(&config);
    FlashAttention::<f16>::new(config)
        .unwrap()
        .run(&q, &k, &v)
        .unwrap();

    let log = std::fs::read_to_string(&path).unwrap();
    let events: Vec<serde_json::Value> = log
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert!(!events.is_empty());
    assert!(events
        .iter()
        .all(|event| event["target"].as_str().unwrap_or("").starts_with("tileforge")));

    // later configurations are ignored once a subscriber is installed
    init_with_config(&LoggingConfig::new().with_level(LogLevel::Trace));
    assert!(is_initialized());
}
