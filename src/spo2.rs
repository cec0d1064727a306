//! Single-sample SpO2 approximation.
//!
//! Uses the linear empirical curve `110 - 25 * (red / ir)` on raw intensities.
//! The curve is uncalibrated and takes the plain intensity ratio rather than a
//! ratio of AC/DC components, so results are indicative only and must not be
//! used for medical decisions.

/// Estimate SpO2 in percent from one IR/red pair.
///
/// Returns `None` unless both intensities are strictly positive. The result is
/// clamped to `[0, 100]`.
pub fn estimate_spo2(ir: i32, red: i32) -> Option<f64> {
    if ir <= 0 || red <= 0 {
        return None;
    }
    let ratio = red as f64 / ir as f64;
    Some((110.0 - 25.0 * ratio).clamp(0.0, 100.0))
}
