use num_format::{Locale, ToFormattedString};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::time;

use crate::prelude::*;

thread_local! {
    static RNG: RefCell<StdRng> = RefCell::new(StdRng::seed_from_u64(0));
}

/// Reseeds the randomness of the current thread. The runner does this before
/// every test so a test is reproducible on its own.
pub fn seed(seed: u64) {
    RNG.with(|r| *r.borrow_mut() = StdRng::seed_from_u64(seed));
}

pub fn with_rng<R>(f: impl FnOnce(&mut StdRng) -> R) -> R {
    RNG.with(|r| f(&mut r.borrow_mut()))
}

#[inline]
pub fn rand() -> f64 {
    with_rng(|r| r.gen::<f64>())
}

#[inline]
pub fn rand_int(ceil: u64) -> u64 {
    if ceil == 0 {
        return 0;
    }
    with_rng(|r| r.gen_range(0..ceil))
}

/// Uniform value of `width` bits.
#[inline]
pub fn rand_bits(width: u32) -> u64 {
    match width {
        0 => 0,
        w if w >= 64 => with_rng(|r| r.gen::<u64>()),
        w => with_rng(|r| r.gen::<u64>()) & ((1u64 << w) - 1),
    }
}

#[inline]
pub fn rand_bool() -> bool {
    with_rng(|r| r.gen::<bool>())
}

pub fn choose<T: Clone>(items: &[T]) -> Option<T> {
    if items.is_empty() {
        return None;
    }
    Some(items[rand_int(items.len() as u64) as usize].clone())
}

pub async fn clock_cycles(signal: SimObject, n_cycles: u32) -> TbResult {
    for _ in 0..n_cycles {
        signal.rising_edge().await;
    }
    Ok(())
}

pub async fn clock(clk: SimObject, period: u64, unit: &str) -> TbResult {
    let high_t = period / 2;
    let low_t = period - high_t;
    if period % 2 != 0 {
        log::warn!(
            "Clock period {}{} not dividable by 2. High time will be {}{}; low time will be {}{}.",
            period,
            unit,
            high_t,
            unit,
            low_t,
            unit
        );
    }
    let low = kernel::get_sim_steps(low_t as f64, unit)?;
    let high = kernel::get_sim_steps(high_t as f64, unit)?;
    loop {
        clk.set(0);
        Trigger::timer_steps(low).await;
        clk.set(1);
        Trigger::timer_steps(high).await;
    }
}

/// Clock, optional reset and the reset polarity shared by all agents of one
/// clock domain.
#[derive(Clone, Copy, Debug)]
pub struct ClockDomain {
    pub clk: SimObject,
    pub reset: Option<SimObject>,
    pub reset_active_level: bool,
    pub half_period: u64,
    pub unit: &'static str,
}

impl ClockDomain {
    pub fn new(clk: SimObject, reset: Option<SimObject>) -> Self {
        Self {
            clk,
            reset,
            reset_active_level: true,
            half_period: 5,
            unit: "ns",
        }
    }

    pub fn with_half_period(mut self, half_period: u64, unit: &'static str) -> Self {
        self.half_period = half_period;
        self.unit = unit;
        self
    }

    pub fn with_reset_active_level(mut self, level: bool) -> Self {
        self.reset_active_level = level;
        self
    }

    /// Holds reset active for three half periods, releases it, then toggles
    /// the clock forever.
    pub async fn start(self) -> TbResult {
        let half = kernel::get_sim_steps(self.half_period as f64, self.unit)?;
        self.clk.set(0);
        if let Some(reset) = self.reset {
            reset.set_bool(self.reset_active_level);
        }
        Trigger::timer_steps(half).await;
        self.clk.set(1);
        Trigger::timer_steps(half).await;
        self.clk.set(0);
        Trigger::timer_steps(half).await;
        if let Some(reset) = self.reset {
            reset.set_bool(!self.reset_active_level);
        }
        loop {
            self.clk.set(1);
            Trigger::timer_steps(half).await;
            self.clk.set(0);
            Trigger::timer_steps(half).await;
        }
    }

    pub fn is_reset_active(&self) -> bool {
        match self.reset {
            Some(reset) => reset.bool() == self.reset_active_level,
            None => false,
        }
    }

    pub async fn wait_reset_release(&self) -> TbResult {
        if let Some(reset) = self.reset {
            while self.is_reset_active() {
                reset.edge().await;
            }
        }
        Ok(())
    }
}

/// Logs simulated cycles and throughput every `every_n_cycles` rising edges.
pub async fn sim_speed_printer(clk: SimObject, every_n_cycles: u64) -> TbResult {
    let start = time::Instant::now();
    let mut cycles: u64 = 0;
    loop {
        clk.rising_edge().await;
        cycles += 1;
        if every_n_cycles > 0 && cycles % every_n_cycles == 0 {
            let secs = start.elapsed().as_secs_f64();
            let speed = if secs > 0.0 {
                (cycles as f64 / secs) as u64
            } else {
                0
            };
            log::info!(
                "{} cycles, {} ns simulated, {} cycles/s",
                cycles.to_formatted_string(&Locale::en),
                kernel::sim_time_ns().to_formatted_string(&Locale::en),
                speed.to_formatted_string(&Locale::en)
            );
        }
    }
}
