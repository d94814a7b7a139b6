//! Pipeline configuration, read from YAML with kebab-case keys.
//!
//! ```yaml
//! match-tolerance: 0.01
//! tempo-floor: 50
//! tempo-ceiling: 180
//! median-band: 0.2
//! jitter: 0.1
//! jitter-seed: 7
//! empty-region: propagate
//! oracle:
//!   program: ./MIDIToMIDIAlign.sh
//!   timeout-secs: 300
//! ```
//!
//! Every key is optional.

use crate::error::AlignError;
use crate::oracle::ProcessOracle;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// What a tempo region without two matched notes gets as its base tempo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmptyRegionPolicy {
    /// The previous region's tempo, or the next one for a leading region
    #[default]
    Propagate,
    LeaveUnset,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct OracleConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            program: "MIDIToMIDIAlign.sh".to_string(),
            args: Vec::new(),
            timeout_secs: 600,
        }
    }
}

impl OracleConfig {
    pub fn process_oracle(&self) -> ProcessOracle {
        ProcessOracle::new(
            self.program.clone(),
            self.args.clone(),
            Duration::from_secs(self.timeout_secs),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PipelineConfig {
    /// Seconds either side of an oracle time that still counts as the same onset
    pub match_tolerance: f64,
    pub tempo_floor: f64,
    pub tempo_ceiling: f64,
    /// Estimates further than this fraction from the median are discarded
    pub median_band: f64,
    /// Interpolated tempos are scaled by a draw from `[1 - jitter, 1 + jitter]`
    pub jitter: f64,
    /// Unseeded when absent
    pub jitter_seed: Option<u64>,
    pub empty_region: EmptyRegionPolicy,
    pub oracle: OracleConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            match_tolerance: 0.01,
            tempo_floor: 50.0,
            tempo_ceiling: 180.0,
            median_band: 0.2,
            jitter: 0.1,
            jitter_seed: None,
            empty_region: EmptyRegionPolicy::default(),
            oracle: OracleConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, AlignError> {
        let config: PipelineConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, AlignError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<(), AlignError> {
        if !(self.match_tolerance > 0.0) {
            return Err(AlignError::Config(format!(
                "match-tolerance must be positive, got {}",
                self.match_tolerance
            )));
        }
        if !(self.tempo_floor > 0.0 && self.tempo_floor < self.tempo_ceiling) {
            return Err(AlignError::Config(format!(
                "tempo bounds [{}, {}] are inverted or non-positive",
                self.tempo_floor, self.tempo_ceiling
            )));
        }
        if !(0.0..1.0).contains(&self.median_band) {
            return Err(AlignError::Config(format!(
                "median-band must be in [0, 1), got {}",
                self.median_band
            )));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(AlignError::Config(format!(
                "jitter must be in [0, 1), got {}",
                self.jitter
            )));
        }
        if self.oracle.timeout_secs == 0 {
            return Err(AlignError::Config("oracle timeout-secs must be positive".to_string()));
        }
        Ok(())
    }

    /// Generator for the tempo jitter. `offset` separates jobs sharing one seed.
    pub fn rng(&self, offset: u64) -> StdRng {
        match self.jitter_seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(offset)),
            None => StdRng::from_entropy(),
        }
    }
}
