//! JSON encoding of `f32` data that keeps non-finite values
//!
//! `serde_json` writes `inf`, `-inf` and `NaN` as `null` and cannot read
//! them back. Masked scores and saturated outputs are legitimately
//! non-finite, so checkpoint fields go through these helpers instead:
//! finite values stay plain numbers, the rest become the strings `"inf"`,
//! `"-inf"` and `"nan"`.
//!
//! ```ignore
//! #[serde(with = "crate::tensor::json_f32::tile")]
//! qk: Tile<f32>,
//! #[serde(with = "crate::tensor::json_f32::values")]
//! running_max: Vec<f32>,
//! ```

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
struct LosslessF32(f32);

impl Serialize for LosslessF32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let v = self.0;
        if v.is_finite() {
            serializer.serialize_f32(v)
        } else if v.is_nan() {
            serializer.serialize_str("nan")
        } else if v > 0.0 {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }
}

struct LosslessF32Visitor;

impl<'de> Visitor<'de> for LosslessF32Visitor {
    type Value = LosslessF32;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number or one of \"inf\", \"-inf\", \"nan\"")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<LosslessF32, E> {
        Ok(LosslessF32(v as f32))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<LosslessF32, E> {
        Ok(LosslessF32(v as f32))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<LosslessF32, E> {
        Ok(LosslessF32(v as f32))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<LosslessF32, E> {
        match v {
            "inf" => Ok(LosslessF32(f32::INFINITY)),
            "-inf" => Ok(LosslessF32(f32::NEG_INFINITY)),
            "nan" => Ok(LosslessF32(f32::NAN)),
            other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
        }
    }
}

impl<'de> Deserialize<'de> for LosslessF32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(LosslessF32Visitor)
    }
}

/// `Vec<f32>` fields
pub mod values {
    use super::LosslessF32;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[f32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|&v| LosslessF32(v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f32>, D::Error> {
        let values = Vec::<LosslessF32>::deserialize(deserializer)?;
        Ok(values.into_iter().map(|v| v.0).collect())
    }
}

/// `Tile<f32>` fields, same shape as the derived encoding
pub mod tile {
    use super::LosslessF32;
    use crate::tensor::{Layout, Tile};
    use serde::de::Error as _;
    use serde::ser::SerializeStruct;
    use serde::{Deserialize, Deserializer, Serializer};

    struct Data<'a>(&'a [f32]);

    impl serde::Serialize for Data<'_> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            super::values::serialize(self.0, serializer)
        }
    }

    #[derive(Deserialize)]
    struct RawTile {
        rows: usize,
        cols: usize,
        #[serde(default)]
        layout: Layout,
        data: Vec<LosslessF32>,
    }

    pub fn serialize<S: Serializer>(tile: &Tile<f32>, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Tile", 4)?;
        state.serialize_field("rows", &tile.rows())?;
        state.serialize_field("cols", &tile.cols())?;
        state.serialize_field("layout", &tile.layout())?;
        state.serialize_field("data", &Data(tile.as_slice()))?;
        state.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Tile<f32>, D::Error> {
        let raw = RawTile::deserialize(deserializer)?;
        let data = raw.data.into_iter().map(|v| v.0).collect();
        Tile::from_vec_with_layout(raw.rows, raw.cols, raw.layout, data).map_err(D::Error::custom)
    }
}
