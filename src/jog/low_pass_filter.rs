// Licensed under the EUPL-1.2-or-later

//! Contains the first-order low-pass filter applied to outgoing joint positions.

/// A scalar first-order IIR filter with unit DC gain.
///
/// With coefficient `c` the recurrence is `y = (x + (c - 1) * y_last) / c`, so
/// a larger coefficient smooths harder. [`reset`](Self::reset) seeds the
/// internal state, after which filtering the seeded value returns it exactly;
/// the jog loop relies on that to avoid a position jump when jogging resumes.
///
/// # Panics
/// [`filter`](Self::filter) panics if the input is infinite or NaN. Command
/// validation rejects non-finite samples before they reach the filter bank.
#[derive(Debug, Clone)]
pub struct LowPassFilter {
    coefficient: f64,
    previous_output: f64,
}

impl LowPassFilter {
    /// Creates a filter with the given coefficient. The coefficient must be
    /// greater than 1, which parameter validation guarantees.
    pub fn new(coefficient: f64) -> Self {
        assert!(coefficient > 1.0 && coefficient.is_finite());
        LowPassFilter {
            coefficient,
            previous_output: 0.0,
        }
    }

    /// Seeds the filter state to `value`.
    pub fn reset(&mut self, value: f64) {
        self.previous_output = value;
    }

    /// Advances the filter by one sample and returns the filtered value.
    pub fn filter(&mut self, value: f64) -> f64 {
        assert!(value.is_finite());
        let output = (value + (self.coefficient - 1.0) * self.previous_output) / self.coefficient;
        self.previous_output = output;
        output
    }
}
