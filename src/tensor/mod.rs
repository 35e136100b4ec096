//! Tile storage
//!
//! - [`Tile`] - a `rows x cols` buffer with a row- or column-major layout
//! - [`Element`] - the storage scalar (`f32`, `half::f16`, `half::bf16`)
//! - [`json_f32`] - serde helpers that keep `inf`/`nan` in JSON

pub mod element;
pub mod json_f32;
pub mod tile;

pub use element::{DType, Element};
pub use tile::{Layout, Tile};
