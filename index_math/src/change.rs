//! Percentage-change arithmetic with explicit undefined values
//!
//! Every helper takes and returns `Option<f64>`; a missing operand, a zero
//! denominator or a non-finite input yields `None` rather than NaN.

/// Percent change from `prior` to `current`: `(current / prior - 1) * 100`
pub fn pct_change(current: Option<f64>, prior: Option<f64>) -> Option<f64> {
    let (current, prior) = (current?, prior?);
    if !current.is_finite() || !prior.is_finite() || prior == 0.0 {
        return None;
    }
    Some((current / prior - 1.0) * 100.0)
}

/// `a - b`, undefined if either side is
pub fn difference(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    let (a, b) = (a?, b?);
    if !a.is_finite() || !b.is_finite() {
        return None;
    }
    Some(a - b)
}

/// Multiplier taking `from` onto `to` (`to / from`)
pub fn scale_factor(to: f64, from: f64) -> Option<f64> {
    if !to.is_finite() || !from.is_finite() || from == 0.0 {
        return None;
    }
    let factor = to / from;
    factor.is_finite().then_some(factor)
}
