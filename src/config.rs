use serde::Deserialize;
use std::path::Path;

use crate::{TbError, TbResult};

pub const ENV_SEED: &str = "BUSVERIF_SEED";
pub const ENV_MAX_SIM_TIME_NS: &str = "BUSVERIF_MAX_SIM_TIME_NS";
pub const ENV_JUNIT: &str = "BUSVERIF_JUNIT";

/// Run-wide settings. Every field has a default so partial TOML files work.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TbConfig {
    /// Seed of the per-test random generator.
    pub seed: u64,
    /// Simulation precision as power of ten seconds, -12 means 1 step = 1 ps.
    pub precision: i8,
    /// Hard ceiling of simulated time for one test.
    pub max_sim_time_ns: u64,
    pub max_delta_cycles: u32,
    pub junit_path: Option<String>,
    pub suite_name: String,
}

impl Default for TbConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            precision: -12,
            max_sim_time_ns: 100_000_000,
            max_delta_cycles: 1000,
            junit_path: None,
            suite_name: "busverif".to_string(),
        }
    }
}

impl TbConfig {
    pub fn from_toml_str(s: &str) -> TbResult<Self> {
        let cfg: TbConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> TbResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Applies `BUSVERIF_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> TbResult<Self> {
        if let Ok(seed) = std::env::var(ENV_SEED) {
            self.seed = seed
                .parse()
                .map_err(|_| TbError::Config(format!("{}={} is not an integer", ENV_SEED, seed)))?;
        }
        if let Ok(t) = std::env::var(ENV_MAX_SIM_TIME_NS) {
            self.max_sim_time_ns = t.parse().map_err(|_| {
                TbError::Config(format!("{}={} is not an integer", ENV_MAX_SIM_TIME_NS, t))
            })?;
        }
        if let Ok(path) = std::env::var(ENV_JUNIT) {
            self.junit_path = Some(path);
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> TbResult<()> {
        if !matches!(self.precision, -15 | -12 | -9 | -6 | -3 | 0) {
            return Err(TbError::Config(format!(
                "precision {} is not one of -15, -12, -9, -6, -3, 0",
                self.precision
            )));
        }
        if self.max_delta_cycles == 0 {
            return Err(TbError::Config("max_delta_cycles must be > 0".into()));
        }
        Ok(())
    }
}
