//! Ordinary least squares trend over a month index
//!
//! The regressor is the zero-based position of each value in the input
//! (`0, 1, 2, ...`), so callers pass a contiguous, already windowed slice.

use crate::{MathError, Result};

/// A fitted straight line `y = slope * x + intercept`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    slope: f64,
    intercept: f64,
    len: usize,
    r_squared: Option<f64>,
}

impl LinearFit {
    /// Fit values against their index positions
    pub fn fit(values: &[f64]) -> Result<Self> {
        if values.len() < 2 {
            return Err(MathError::InsufficientData(
                "Not enough data for a trend fit. Need at least 2 points.".to_string(),
            ));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(MathError::InvalidInput(
                "Trend fit requires finite values".to_string(),
            ));
        }

        let n = values.len() as f64;

        // Calculate means
        let x_mean = (0..values.len()).map(|i| i as f64).sum::<f64>() / n;
        let y_mean = values.iter().sum::<f64>() / n;

        let mut numerator = 0.0;
        let mut denominator = 0.0;

        for (i, &y) in values.iter().enumerate() {
            let x = i as f64;
            numerator += (x - x_mean) * (y - y_mean);
            denominator += (x - x_mean) * (x - x_mean);
        }

        if denominator.abs() < 1e-10 {
            return Err(MathError::CalculationError(
                "Cannot calculate slope: x values are too similar".to_string(),
            ));
        }

        let slope = numerator / denominator;
        let intercept = y_mean - slope * x_mean;

        let mut ss_total = 0.0;
        let mut ss_residual = 0.0;
        for (i, &y) in values.iter().enumerate() {
            let y_pred = slope * i as f64 + intercept;
            ss_total += (y - y_mean).powi(2);
            ss_residual += (y - y_pred).powi(2);
        }

        // A flat series has no variance to explain
        let r_squared = (ss_total.abs() >= 1e-10).then(|| 1.0 - ss_residual / ss_total);

        Ok(Self {
            slope,
            intercept,
            len: values.len(),
            r_squared,
        })
    }

    /// Regression value at index `x`
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }

    /// Regression value at the final training index
    pub fn fitted_last(&self) -> f64 {
        self.predict((self.len - 1) as f64)
    }

    /// Regression value `periods_ahead` steps past the final training index
    pub fn project(&self, periods_ahead: usize) -> f64 {
        self.predict((self.len - 1 + periods_ahead) as f64)
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Number of training points
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Coefficient of determination, `None` for a flat series
    pub fn r_squared(&self) -> Option<f64> {
        self.r_squared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fits_exact_line() {
        let fit = LinearFit::fit(&[1.0, 3.0, 5.0, 7.0]).unwrap();
        assert_relative_eq!(fit.slope(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(fit.intercept(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(fit.fitted_last(), 7.0, epsilon = 1e-12);
        assert_relative_eq!(fit.project(2), 11.0, epsilon = 1e-12);
        assert_relative_eq!(fit.r_squared().unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn hand_computed_slope() {
        // x_mean = 2.5, y_mean = 103.666..., Sxy = 26.5, Sxx = 17.5
        let fit = LinearFit::fit(&[100.0, 101.0, 103.0, 104.0, 106.0, 108.0]).unwrap();
        assert_relative_eq!(fit.slope(), 26.5 / 17.5, epsilon = 1e-12);
    }

    #[test]
    fn flat_series_has_no_r_squared() {
        let fit = LinearFit::fit(&[5.0, 5.0, 5.0]).unwrap();
        assert_eq!(fit.slope(), 0.0);
        assert!(fit.r_squared().is_none());
    }

    #[test]
    fn rejects_short_or_non_finite_input() {
        assert!(matches!(
            LinearFit::fit(&[1.0]),
            Err(MathError::InsufficientData(_))
        ));
        assert!(matches!(
            LinearFit::fit(&[]),
            Err(MathError::InsufficientData(_))
        ));
        assert!(matches!(
            LinearFit::fit(&[1.0, f64::NAN]),
            Err(MathError::InvalidInput(_))
        ));
    }

    #[test]
    fn fit_is_deterministic() {
        let values = [100.3, 101.7, 99.2, 104.9, 106.1, 103.3, 108.8];
        let a = LinearFit::fit(&values).unwrap();
        let b = LinearFit::fit(&values).unwrap();
        assert_eq!(a.slope().to_bits(), b.slope().to_bits());
        assert_eq!(a.intercept().to_bits(), b.intercept().to_bits());
    }
}
