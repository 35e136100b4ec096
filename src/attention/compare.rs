//! Tolerance comparison against a reference

use crate::error::{shape_mismatch, TileForgeError, TileResult};
use crate::tensor::Tile;
use serde::{Deserialize, Serialize};

/// `|actual - expected| <= atol + rtol * |expected|`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub atol: f32,
    pub rtol: f32,
}

impl Tolerance {
    /// Final attention output
    pub const OUTPUT: Tolerance = Tolerance {
        atol: 1e-3,
        rtol: 1e-3,
    };

    /// Intermediate max/sum/probability checkpoints
    pub const CHECKPOINT: Tolerance = Tolerance {
        atol: 1e-2,
        rtol: 1e-2,
    };

    pub const EXACT: Tolerance = Tolerance { atol: 0.0, rtol: 0.0 };

    pub fn allows(&self, actual: f32, expected: f32) -> bool {
        if actual == expected {
            return true;
        }
        if actual.is_nan() || expected.is_nan() || actual.is_infinite() || expected.is_infinite() {
            return false;
        }
        (actual - expected).abs() <= self.atol + self.rtol * expected.abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Mismatch {
    pub index: usize,
    pub actual: f32,
    pub expected: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompareReport {
    pub elements: usize,
    pub mismatches: usize,
    pub max_abs_err: f32,
    pub max_rel_err: f32,
    /// First out-of-tolerance element in row-major order
    pub first_mismatch: Option<Mismatch>,
}

impl CompareReport {
    pub fn is_match(&self) -> bool {
        self.mismatches == 0
    }

    /// Turn a failed comparison into [`TileForgeError::ToleranceExceeded`]
    pub fn into_result(self) -> TileResult<Self> {
        if self.is_match() {
            Ok(self)
        } else {
            Err(TileForgeError::ToleranceExceeded {
                mismatches: self.mismatches,
                max_abs_err: self.max_abs_err,
            })
        }
    }
}

pub fn compare_slices(actual: &[f32], expected: &[f32], tol: Tolerance) -> TileResult<CompareReport> {
    if actual.len() != expected.len() {
        return Err(shape_mismatch("compare", expected.len(), actual.len()));
    }
    let mut report = CompareReport {
        elements: actual.len(),
        mismatches: 0,
        max_abs_err: 0.0,
        max_rel_err: 0.0,
        first_mismatch: None,
    };
    for (index, (&a, &e)) in actual.iter().zip(expected).enumerate() {
        if a != e {
            let abs = (a - e).abs();
            report.max_abs_err = report.max_abs_err.max(abs);
            if e != 0.0 {
                report.max_rel_err = report.max_rel_err.max(abs / e.abs());
            }
        }
        if !tol.allows(a, e) {
            report.mismatches += 1;
            if report.first_mismatch.is_none() {
                report.first_mismatch = Some(Mismatch {
                    index,
                    actual: a,
                    expected: e,
                });
            }
        }
    }
    Ok(report)
}

/// Element-wise comparison in logical (row-major) order
pub fn compare_tiles(actual: &Tile<f32>, expected: &Tile<f32>, tol: Tolerance) -> TileResult<CompareReport> {
    if actual.shape() != expected.shape() {
        return Err(shape_mismatch(
            "compare",
            format!("{}x{}", expected.rows(), expected.cols()),
            format!("{}x{}", actual.rows(), actual.cols()),
        ));
    }
    compare_slices(
        actual.to_row_major().as_slice(),
        expected.to_row_major().as_slice(),
        tol,
    )
}
