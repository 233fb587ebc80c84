//! Calibrated and pass-through model parameters.
//!
//! The sampler walks the *raw* precipitation factor; the forward model sees
//! the transformed value (see [`prec_transform`]). Temperature bias and the
//! degree-day factor of snow are used as sampled.

use serde::{Deserialize, Serialize};

/// One candidate parameter set for the mass-balance model.
///
/// `prec_factor_raw` is the untransformed value the sampler walks. The
/// effective multiplicative precipitation factor is
/// [`ParameterSet::prec_factor`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    /// Raw (untransformed) precipitation factor [-]
    pub prec_factor_raw: f64,

    /// Temperature bias [°C]
    pub temp_bias: f64,

    /// Degree-day factor of snow [m w.e. °C⁻¹ d⁻¹]
    pub ddf_snow: f64,
}

impl ParameterSet {
    /// Effective precipitation factor after the transformation.
    ///
    /// Always > 0; with the default prior bounds of [-2, 2] the effective
    /// factor ranges from 1/3 to 3.
    pub fn prec_factor(&self) -> f64 {
        prec_transform(self.prec_factor_raw)
    }

    /// Parameters as the forward model consumes them, with the
    /// precipitation factor transformed.
    pub fn effective(&self) -> EffectiveParameters {
        EffectiveParameters {
            prec_factor: self.prec_factor(),
            temp_bias: self.temp_bias,
            ddf_snow: self.ddf_snow,
        }
    }
}

/// Parameter values as seen by the forward model.
///
/// `prec_factor` here is the multiplicative factor (> 0), not the raw value
/// the sampler walks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectiveParameters {
    /// Multiplicative precipitation factor [-]
    pub prec_factor: f64,

    /// Temperature bias [°C]
    pub temp_bias: f64,

    /// Degree-day factor of snow [m w.e. °C⁻¹ d⁻¹]
    pub ddf_snow: f64,
}

/// Map a raw precipitation-factor sample to the effective factor.
///
/// `x >= 0` maps to `x + 1`, `x < 0` maps to `1 / (1 - x)`. The map is
/// continuous and strictly increasing, with both branches meeting at 1.
pub fn prec_transform(x: f64) -> f64 {
    if x >= 0.0 {
        x + 1.0
    } else {
        1.0 / (1.0 - x)
    }
}

/// Inverse of [`prec_transform`], for reporting effective factors back in
/// raw sampling space.
pub fn prec_transform_inv(p: f64) -> f64 {
    if p >= 1.0 {
        p - 1.0
    } else {
        1.0 - 1.0 / p
    }
}

/// Parameters the calibration does not touch but every ensemble member
/// carries for downstream forward simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixedParameters {
    /// Lapse rate applied to the climate-grid temperature [°C m⁻¹]
    pub lapse_rate_gcm: f64,

    /// Lapse rate applied on-glacier [°C m⁻¹]
    pub lapse_rate_glacier: f64,

    /// Precipitation gradient with elevation [m⁻¹]
    pub prec_gradient: f64,

    /// Degree-day factor of ice [m w.e. °C⁻¹ d⁻¹]
    pub ddf_ice: f64,

    /// Temperature threshold for snow vs. rain [°C]
    pub temp_snow: f64,
}

impl Default for FixedParameters {
    fn default() -> Self {
        Self {
            lapse_rate_gcm: -0.0065,
            lapse_rate_glacier: -0.0065,
            prec_gradient: 0.0001,
            // ddfsnow / ddfice ratio of 0.7
            ddf_ice: 0.0041 / 0.7,
            temp_snow: 1.0,
        }
    }
}
