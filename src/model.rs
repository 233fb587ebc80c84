//! Interface to the glacier mass-balance forward model.
//!
//! The calibration engine treats the forward model as an opaque deterministic
//! function from a parameter set to a glacier-wide mass-balance series; the
//! physics live behind [`MassBalanceModel`] so the sampler (and tests) can
//! substitute a cheap analytic stand-in.

use crate::observation::Observation;
use crate::params::EffectiveParameters;
use crate::{Error, Result};
use ndarray::Array1;

/// Forward model for one glacier with its climate context bound in.
///
/// `evaluate` is called thousands of times per calibration, so implementors
/// must do all input loading at construction time. Same parameters must give
/// the same series.
pub trait MassBalanceModel {
    /// Run the model and return the glacier-wide mass balance per time step
    /// [m w.e.]. The precipitation factor in `params` is already transformed.
    fn evaluate(&self, params: &EffectiveParameters) -> Result<Array1<f64>>;
}

/// Supplies a forward model per glacier.
///
/// A [`Error::MissingContext`] from `model_for` means the shared climate or
/// glacier inputs are unusable and the whole batch aborts.
pub trait ModelProvider {
    type Model: MassBalanceModel;

    fn model_for(&self, glacier_id: &str) -> Result<Self::Model>;
}

/// Mean annual mass balance over the observation window:
/// sum of per-step mass balance within `[t1_idx, t2_idx)` divided by the
/// window length in years.
pub fn windowed_mean(series: &Array1<f64>, observation: &Observation) -> Result<f64> {
    if observation.t2_idx > series.len() {
        return Err(Error::MissingContext(format!(
            "model series has {} steps but the observation window ends at index {}",
            series.len(),
            observation.t2_idx
        )));
    }
    let total: f64 = series
        .slice(ndarray::s![observation.t1_idx..observation.t2_idx])
        .sum();
    Ok(total / observation.window_years())
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;

    #[test]
    fn windowed_mean_divides_by_years() {
        // 24 monthly steps of -0.1 m w.e. over a 2-year window
        let series = Array1::from_elem(24, -0.1);
        let obs = Observation {
            mass_balance: -1.2,
            uncertainty: 0.2,
            t1: 2000.0,
            t2: 2002.0,
            t1_idx: 0,
            t2_idx: 24,
        };
        let mean = windowed_mean(&series, &obs).unwrap();
        assert!(is_close!(mean, -1.2));
    }

    #[test]
    fn windowed_mean_uses_only_the_window() {
        let mut series = Array1::zeros(36);
        for i in 12..24 {
            series[i] = -0.2;
        }
        let obs = Observation {
            mass_balance: -2.4,
            uncertainty: 0.2,
            t1: 2001.0,
            t2: 2002.0,
            t1_idx: 12,
            t2_idx: 24,
        };
        assert!(is_close!(windowed_mean(&series, &obs).unwrap(), -2.4));
    }

    #[test]
    fn window_past_series_end_is_a_context_error() {
        let series = Array1::zeros(10);
        let obs = Observation {
            mass_balance: 0.0,
            uncertainty: 0.2,
            t1: 2000.0,
            t2: 2001.0,
            t1_idx: 0,
            t2_idx: 12,
        };
        let err = windowed_mean(&series, &obs).unwrap_err();
        assert!(err.is_batch_fatal());
    }
}
