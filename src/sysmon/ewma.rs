//! Exponentially weighted moving average.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ewma {
    alpha: f64,
    value: Option<f64>,
}

impl Ewma {
    /// Smoothing over `n` samples, `alpha = 2 / (n + 1)`.
    pub fn new(n: u32) -> Self {
        Self {
            alpha: 2.0 / (f64::from(n) + 1.0),
            value: None,
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Feeds a sample and returns the updated average. The first sample
    /// seeds the average.
    pub fn update(&mut self, sample: f64) -> f64 {
        let next = match self.value {
            None => sample,
            Some(s) => self.alpha * sample + (1.0 - self.alpha) * s,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}
