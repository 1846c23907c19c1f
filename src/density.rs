//! Crowd density heuristic and threshold check.
//!
//! The estimate treats the average person box as a proxy for how much ground
//! one person covers, then scales the frame to square metres against a
//! reference area. It is uncalibrated and must stay numerically stable across
//! releases: stored samples and alert thresholds depend on the exact values.

use serde::{Deserialize, Serialize};

use crate::detect::Detection;

pub const DEFAULT_REFERENCE_AREA_SQM: f64 = 100.0;
pub const DEFAULT_DENSITY_THRESHOLD: f64 = 0.65;

/// Person density above which `density_value` saturates at 1.0.
const SATURATION_PER_SQM: f64 = 2.0;
const GROUND_AREA_FACTOR: f64 = 1.5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DensityEstimate {
    pub person_count: u32,
    /// Normalised to `[0, 1]`, rounded to 3 decimals.
    pub density_value: f64,
    /// Rounded to 2 decimals.
    pub density_per_sqm: f64,
}

/// One frame's estimate plus its alert decision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DensitySample {
    #[serde(flatten)]
    pub estimate: DensityEstimate,
    pub alert: bool,
}

impl DensitySample {
    pub fn evaluate(estimate: DensityEstimate, threshold: f64) -> Self {
        Self {
            estimate,
            alert: check_threshold(estimate.density_value, threshold),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DensityEngine {
    reference_area_sqm: f64,
}

impl Default for DensityEngine {
    fn default() -> Self {
        Self::new(DEFAULT_REFERENCE_AREA_SQM)
    }
}

impl DensityEngine {
    pub fn new(reference_area_sqm: f64) -> Self {
        Self { reference_area_sqm }
    }

    pub fn estimate(
        &self,
        detections: &[Detection],
        frame_width: u32,
        frame_height: u32,
    ) -> DensityEstimate {
        let person_count = detections.len();
        if person_count == 0 {
            return DensityEstimate::default();
        }

        let frame_area = frame_width as f64 * frame_height as f64;
        let total_area: i64 = detections.iter().map(|d| d.bbox.area()).sum();
        let avg_area = total_area as f64 / person_count as f64;

        let ground_area = if avg_area > 0.0 {
            (frame_area / avg_area) * GROUND_AREA_FACTOR
        } else {
            self.reference_area_sqm
        };
        let area_sqm = (ground_area / 100.0) * self.reference_area_sqm;
        let per_sqm = if area_sqm > 0.0 {
            person_count as f64 / area_sqm
        } else {
            0.0
        };
        let value = (per_sqm / SATURATION_PER_SQM).min(1.0);

        DensityEstimate {
            person_count: person_count as u32,
            density_value: round_to(value, 3),
            density_per_sqm: round_to(per_sqm, 2),
        }
    }
}

/// `true` iff `density_value >= threshold`. No hysteresis.
pub fn check_threshold(density_value: f64, threshold: f64) -> bool {
    density_value >= threshold
}

/// Round to `places` decimals from the exact binary value, so 0.0025 (stored
/// slightly above the tie) becomes 0.003.
fn round_to(value: f64, places: usize) -> f64 {
    format!("{:.*}", places, value).parse().unwrap_or(value)
}
