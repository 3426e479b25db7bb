//! Ambient runtime configuration: the defaults an estimation job starts from
//! before a caller overrides them, loadable from a TOML file, environment
//! variables (`CSM_*`), and a `.env` file, in that precedence order.

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::params::{PiInitMethod, Q0InitMethod, StoppingConditions};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsmConfig {
    pub estimation: EstimationSettings,
    pub stopping: StoppingSettings,
    pub logging: LoggingSettings,
}

impl Default for CsmConfig {
    fn default() -> Self {
        Self {
            estimation: EstimationSettings::default(),
            stopping: StoppingSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl CsmConfig {
    /// Loads configuration from (lowest to highest precedence) built-in
    /// defaults, an optional `config.toml` in the working directory, a
    /// `.env` file, and `CSM_*` environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        let defaults = toml::to_string(&Self::default()).context("serialising default configuration")?;
        let config = config::Config::builder()
            .add_source(config::File::from_str(&defaults, config::FileFormat::Toml))
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("CSM").separator("__"))
            .build()
            .context("building configuration sources")?;
        config.try_deserialize().context("deserialising configuration")
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !(0.0..=1.0).contains(&self.estimation.tr_prob_nn) {
            errors.push("estimation.tr_prob_nn must lie in [0, 1]".to_string());
        }
        if self.estimation.regularisation_lambda < 0.0 {
            errors.push("estimation.regularisation_lambda must be non-negative".to_string());
        }
        if self.stopping.maxeval == 0 {
            errors.push("stopping.maxeval must be > 0".to_string());
        }
        if self.stopping.maxtime <= 0.0 {
            errors.push("stopping.maxtime must be > 0".to_string());
        }
        errors
    }

    pub fn stopping_conditions(&self) -> StoppingConditions {
        StoppingConditions {
            stopval: self.stopping.stopval,
            ftol_abs: 0.0,
            ftol_rel: self.stopping.ftol_rel,
            xtol_abs: 0.0,
            xtol_rel: self.stopping.xtol_rel,
            maxeval: self.stopping.maxeval,
            maxtime: self.stopping.maxtime,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimationSettings {
    pub memory: usize,
    pub tr_prob_nn: f64,
    pub regularisation_lambda: f64,
    pub pi_init: String,
    pub q0_init: String,
}

impl Default for EstimationSettings {
    fn default() -> Self {
        Self {
            memory: 0,
            tr_prob_nn: 1.0,
            regularisation_lambda: 0.0,
            pi_init: PiInitMethod::Heuristic.as_str().to_string(),
            q0_init: Q0InitMethod::FromData.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StoppingSettings {
    pub stopval: f64,
    pub ftol_rel: f64,
    pub xtol_rel: f64,
    pub maxeval: usize,
    pub maxtime: f64,
}

impl Default for StoppingSettings {
    fn default() -> Self {
        let d = StoppingConditions::default();
        Self {
            stopval: d.stopval,
            ftol_rel: d.ftol_rel,
            xtol_rel: d.xtol_rel,
            maxeval: d.maxeval,
            maxtime: d.maxtime,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub verbose: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { verbose: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(CsmConfig::default().validate().is_empty());
    }

    #[test]
    fn rejects_zero_maxeval() {
        let mut config = CsmConfig::default();
        config.stopping.maxeval = 0;
        assert_eq!(config.validate(), vec!["stopping.maxeval must be > 0".to_string()]);
    }

    #[test]
    fn pi_init_default_round_trips() {
        let config = CsmConfig::default();
        assert_eq!(
            PiInitMethod::parse(&config.estimation.pi_init).unwrap(),
            PiInitMethod::Heuristic
        );
    }
}
