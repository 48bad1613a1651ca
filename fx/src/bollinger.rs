//! Bollinger Bands over daily rate series.
//!
//! Each window of `period` days yields a band: the middle band is the
//! window mean and the outer bands sit `k` sample standard deviations
//! away from it. A series of `n` days yields `n - period + 1` bands,
//! oldest window first.

use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};

use ratekeeper_common::{RatesError, Result};

/// Width of the outer bands in standard deviations.
pub const BAND_WIDTH_STD: Decimal = Decimal::TWO;

/// One band triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Band {
    pub lower: Decimal,
    pub middle: Decimal,
    pub upper: Decimal,
}

impl Band {
    /// Distance between the outer bands.
    pub fn corridor(&self) -> Decimal {
        self.upper - self.lower
    }
}

/// Band calculator for a fixed window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BollingerBands {
    period: usize,
}

impl BollingerBands {
    /// Create a calculator; `period` must be at least 2.
    pub fn new(period: usize) -> Result<Self> {
        if period < 2 {
            return Err(RatesError::InvalidPeriod(period));
        }
        Ok(Self { period })
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Input days needed to produce `days` bands.
    pub fn required_inputs(&self, days: usize) -> usize {
        days + self.period - 1
    }

    /// Bands for every full window of `series`. Shorter series yield none.
    pub fn compute(&self, series: &[Decimal]) -> Vec<Band> {
        let n = Decimal::from(self.period);
        let dof = Decimal::from(self.period - 1);

        series
            .windows(self.period)
            .map(|window| {
                let middle = window.iter().sum::<Decimal>() / n;
                let variance = window
                    .iter()
                    .map(|x| (*x - middle) * (*x - middle))
                    .sum::<Decimal>()
                    / dof;
                let std_dev = variance.sqrt().unwrap_or(Decimal::ZERO);

                Band {
                    lower: middle - BAND_WIDTH_STD * std_dev,
                    middle,
                    upper: middle + BAND_WIDTH_STD * std_dev,
                }
            })
            .collect()
    }

    /// Exactly `days` bands, or [`RatesError::InvalidBandLength`].
    pub fn bands_for_days(&self, series: &[Decimal], days: usize) -> Result<Vec<Band>> {
        let bands = self.compute(series);
        if bands.len() != days {
            return Err(RatesError::InvalidBandLength {
                expected: days,
                actual: bands.len(),
            });
        }
        Ok(bands)
    }
}
