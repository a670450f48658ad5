use crate::{TbError, TbResult};

/// A signal change reported by [`SimIf::eval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    pub handle: usize,
    pub old: u64,
    pub new: u64,
}

/// The clocked register file the harness drives. Everything behind this trait
/// (an HDL simulator binding, a compiled model, a plain register table) is
/// external to the verification engine.
pub trait SimIf {
    fn get_handle_by_name(&self, name: &str) -> TbResult<usize>;
    fn get_value(&self, handle: usize) -> u64;
    fn set_value(&mut self, handle: usize, value: u64);
    fn get_size(&self, handle: usize) -> u32;
    fn get_full_name(&self, handle: usize) -> String;
    fn signal_names(&self) -> Vec<String>;

    /// Called after each batch of applied writes. A model with combinational
    /// logic settles here and reports what else changed.
    fn eval(&mut self) -> Vec<Change> {
        Vec::new()
    }
}

pub(crate) fn time_scale(unit: &str) -> Option<i8> {
    match unit {
        "fs" => Some(-15),
        "ps" => Some(-12),
        "ns" => Some(-9),
        "us" => Some(-6),
        "ms" => Some(-3),
        "sec" => Some(0),
        _ => None,
    }
}

fn ldexp10(frac: f64, exp: i8) -> f64 {
    // Like math.ldexp, but base 10
    if exp >= 0 {
        frac * 10_u64.pow(exp as u32) as f64
    } else {
        let div = 10_u64.pow(-exp as u32) as f64;
        frac / div
    }
}

/// Converts `time` in `unit` to simulation steps of `precision`.
pub fn get_sim_steps(time: f64, unit: &str, precision: i8) -> TbResult<u64> {
    let scale = time_scale(unit).ok_or_else(|| TbError::TimeConversion {
        time,
        unit: unit.to_string(),
        reason: "unknown unit".to_string(),
    })?;
    let steps = ldexp10(time, scale - precision);
    if steps % 1.0 == 0.0 && steps >= 0.0 {
        Ok(steps as u64)
    } else {
        Err(TbError::TimeConversion {
            time,
            unit: unit.to_string(),
            reason: format!("not a whole number of steps at precision 1e{}", precision),
        })
    }
}

/// Converts `steps` back to `unit`. Does not preserve precision, so don't use carelessly.
pub fn steps_to_time(steps: u64, unit: &str, precision: i8) -> f64 {
    let scale = time_scale(unit).unwrap_or(precision);
    ldexp10(steps as f64, precision - scale)
}
