use serde::{Deserialize, Serialize};

/// Maps values onto [0, 1] using the range seen by `fit`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    min: f64,
    scale: f64,
}

impl MinMaxScaler {
    /// A constant input gets scale 1 so transforms stay finite.
    pub fn fit(values: &[f64]) -> Self {
        let (min, max) = values
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        if !min.is_finite() {
            return Self { min: 0.0, scale: 1.0 };
        }
        let range = max - min;
        Self {
            min,
            scale: if range > 0.0 { range } else { 1.0 },
        }
    }

    pub fn transform(&self, value: f64) -> f64 {
        (value - self.min) / self.scale
    }

    pub fn inverse(&self, value: f64) -> f64 {
        value * self.scale + self.min
    }

    pub fn transform_all(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|&v| self.transform(v)).collect()
    }

    pub fn inverse_all(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|&v| self.inverse(v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_into_unit_interval() {
        let scaler = MinMaxScaler::fit(&[-2.0, 0.0, 6.0]);
        assert_eq!(scaler.transform_all(&[-2.0, 0.0, 6.0]), vec![0.0, 0.25, 1.0]);
        assert!((scaler.inverse(0.5) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn constant_input_uses_unit_scale() {
        let scaler = MinMaxScaler::fit(&[3.0, 3.0]);
        assert_eq!(scaler.transform(3.0), 0.0);
        assert_eq!(scaler.inverse(1.0), 4.0);
    }
}
