//! Observed glacier-wide mass balance and its source.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// One observed mean mass balance for a glacier, with its uncertainty and
/// the time window it covers. Loaded once per glacier and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Observed mean mass balance [m w.e. yr⁻¹]
    pub mass_balance: f64,

    /// One-sigma uncertainty of the observation [m w.e. yr⁻¹]
    pub uncertainty: f64,

    /// Start of the observation window [decimal year]
    pub t1: f64,

    /// End of the observation window [decimal year]
    pub t2: f64,

    /// Index of the first time step of the window in the model series
    pub t1_idx: usize,

    /// Index one past the last time step of the window
    pub t2_idx: usize,
}

impl Observation {
    /// Length of the observation window in years.
    pub fn window_years(&self) -> f64 {
        self.t2 - self.t1
    }

    pub fn validate(&self) -> Result<()> {
        if self.uncertainty <= 0.0 {
            return Err(Error::Configuration(format!(
                "observation uncertainty must be positive, got {}",
                self.uncertainty
            )));
        }
        if self.t2 <= self.t1 || self.t2_idx <= self.t1_idx {
            return Err(Error::Configuration(format!(
                "observation window is empty: t1={}, t2={}, t1_idx={}, t2_idx={}",
                self.t1, self.t2, self.t1_idx, self.t2_idx
            )));
        }
        Ok(())
    }
}

/// Source of per-glacier observations.
///
/// Returns `None` when a glacier has no usable observation, in which case it
/// is excluded from calibration.
pub trait ObservationProvider {
    fn get_observation(&self, glacier_id: &str) -> Option<Observation>;
}
