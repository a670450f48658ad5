use crate::utils;

/// Self-rebiasing Bernoulli gate used for valid/ready stalling.
///
/// A fixed 50% toggle rarely produces long bursts or long stalls, so every
/// `period` draws the probability is redrawn uniformly from `[low, high]`.
#[derive(Debug, Clone)]
pub struct Randomizer {
    p: f64,
    counter: u32,
    period: u32,
    low: f64,
    high: f64,
}

impl Default for Randomizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Randomizer {
    pub fn new() -> Self {
        Self::with_band(100, 0.1, 0.9)
    }

    pub fn with_band(period: u32, low: f64, high: f64) -> Self {
        let mut r = Self {
            p: 0.5,
            counter: 0,
            period: period.max(1),
            low,
            high,
        };
        r.rebias();
        r
    }

    fn rebias(&mut self) {
        self.p = self.low + utils::rand() * (self.high - self.low);
    }

    pub fn probability(&self) -> f64 {
        self.p
    }

    pub fn get(&mut self) -> bool {
        self.counter += 1;
        if self.counter == self.period {
            self.counter = 0;
            self.rebias();
        }
        utils::rand() < self.p
    }
}
