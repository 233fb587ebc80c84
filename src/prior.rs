//! Prior distributions for the three calibrated parameters.
//!
//! Two families are supported: a normal distribution truncated to finite
//! bounds (internally parameterized through the standardized z-scores of the
//! bounds) and a uniform distribution over an interval. Specs are plain data
//! so the adaptation policy can rewrite means and bounds between sampler
//! rounds; [`PriorSpec::build`] validates and produces the distribution.

use crate::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::function::erf::{erf_inv, erfc};
use std::f64::consts::SQRT_2;

const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_7;

/// Standard normal CDF.
fn normal_cdf(z: f64) -> f64 {
    0.5 * erfc(-z / SQRT_2)
}

/// Standard normal quantile function.
fn normal_quantile(p: f64) -> f64 {
    SQRT_2 * erf_inv(2.0 * p - 1.0)
}

/// Distribution family of a prior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributionKind {
    /// Normal distribution truncated to `[lower, upper]`.
    BoundedNormal,
    /// Uniform distribution over `[lower, upper]`.
    Uniform,
}

/// Declarative description of one parameter's prior.
///
/// For [`DistributionKind::Uniform`] the `mean` and `std_dev` fields are
/// ignored by [`PriorSpec::build`] but are kept so a spec can switch kinds
/// without losing information.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorSpec {
    pub kind: DistributionKind,
    pub mean: f64,
    pub std_dev: f64,
    pub lower: f64,
    pub upper: f64,
}

impl PriorSpec {
    /// Spec for a normal prior truncated to `[lower, upper]`.
    pub fn bounded_normal(mean: f64, std_dev: f64, lower: f64, upper: f64) -> Self {
        Self {
            kind: DistributionKind::BoundedNormal,
            mean,
            std_dev,
            lower,
            upper,
        }
    }

    /// Spec for a uniform prior over `[lower, upper]`.
    pub fn uniform(lower: f64, upper: f64) -> Self {
        Self {
            kind: DistributionKind::Uniform,
            mean: 0.5 * (lower + upper),
            std_dev: 0.0,
            lower,
            upper,
        }
    }

    /// Validate the spec and construct the distribution.
    pub fn build(&self) -> Result<Prior> {
        if self.lower >= self.upper {
            return Err(Error::Configuration(format!(
                "prior lower bound {} must be below upper bound {}",
                self.lower, self.upper
            )));
        }
        match self.kind {
            DistributionKind::BoundedNormal => {
                if self.std_dev <= 0.0 {
                    return Err(Error::Configuration(format!(
                        "bounded-normal std dev must be positive, got {}",
                        self.std_dev
                    )));
                }
                if self.mean < self.lower || self.mean > self.upper {
                    return Err(Error::Configuration(format!(
                        "bounded-normal mean {} outside bounds [{}, {}]",
                        self.mean, self.lower, self.upper
                    )));
                }
                Ok(Prior::BoundedNormal {
                    mean: self.mean,
                    std_dev: self.std_dev,
                    lower: self.lower,
                    upper: self.upper,
                })
            }
            DistributionKind::Uniform => Ok(Prior::Uniform {
                lower: self.lower,
                upper: self.upper,
            }),
        }
    }
}

/// A validated prior distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Prior {
    BoundedNormal {
        mean: f64,
        std_dev: f64,
        lower: f64,
        upper: f64,
    },
    Uniform {
        lower: f64,
        upper: f64,
    },
}

impl Prior {
    pub fn lower(&self) -> f64 {
        match *self {
            Prior::BoundedNormal { lower, .. } | Prior::Uniform { lower, .. } => lower,
        }
    }

    pub fn upper(&self) -> f64 {
        match *self {
            Prior::BoundedNormal { upper, .. } | Prior::Uniform { upper, .. } => upper,
        }
    }

    /// Log prior density at `x`; `-inf` outside the bounds.
    pub fn ln_density(&self, x: f64) -> f64 {
        match *self {
            Prior::BoundedNormal {
                mean,
                std_dev,
                lower,
                upper,
            } => {
                if x < lower || x > upper {
                    return f64::NEG_INFINITY;
                }
                let z = (x - mean) / std_dev;
                let a = (lower - mean) / std_dev;
                let b = (upper - mean) / std_dev;
                let mass = normal_cdf(b) - normal_cdf(a);
                -0.5 * z * z - std_dev.ln() - LN_SQRT_2PI - mass.ln()
            }
            Prior::Uniform { lower, upper } => {
                if x < lower || x > upper {
                    f64::NEG_INFINITY
                } else {
                    -(upper - lower).ln()
                }
            }
        }
    }

    /// Draw one value from the prior.
    ///
    /// The truncated normal is sampled by inverse-CDF: a uniform draw on
    /// `[Φ(a), Φ(b)]` mapped back through the normal quantile function, so a
    /// single RNG draw always yields an in-bounds value.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            Prior::BoundedNormal {
                mean,
                std_dev,
                lower,
                upper,
            } => {
                let a = (lower - mean) / std_dev;
                let b = (upper - mean) / std_dev;
                let (phi_a, phi_b) = (normal_cdf(a), normal_cdf(b));
                if phi_b - phi_a < 1e-12 {
                    // Bounds are far out in one tail; the mass collapses to a point.
                    return mean.clamp(lower, upper);
                }
                let u = phi_a + rng.gen::<f64>() * (phi_b - phi_a);
                (mean + std_dev * normal_quantile(u)).clamp(lower, upper)
            }
            Prior::Uniform { lower, upper } => rng.gen_range(lower..upper),
        }
    }

    /// Initial Metropolis proposal scale for a parameter with this prior.
    pub fn proposal_scale(&self) -> f64 {
        match *self {
            Prior::BoundedNormal { std_dev, .. } => std_dev,
            Prior::Uniform { lower, upper } => (upper - lower) / 6.0,
        }
    }
}

/// Prior specs for the three calibrated parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorSpecSet {
    pub prec_factor: PriorSpec,
    pub temp_bias: PriorSpec,
    pub ddf_snow: PriorSpec,
}

/// The three validated priors, matching [`PriorSpecSet`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorSet {
    pub prec_factor: Prior,
    pub temp_bias: Prior,
    pub ddf_snow: Prior,
}

impl PriorSpecSet {
    /// Default first-round priors.
    ///
    /// Precipitation factor N(0, 1) on [-2, 2] in raw space (effective factor
    /// 1/3 to 3 after the transform), temperature bias N(0, 4) on [-10, 10],
    /// degree-day factor of snow N(0.0041, 0.0015) truncated to its central
    /// 95% interval (Braithwaite, 2008).
    pub fn default_spec() -> Self {
        let ddf_mu = 0.0041;
        let ddf_sigma = 0.0015;
        Self {
            prec_factor: PriorSpec::bounded_normal(0.0, 1.0, -2.0, 2.0),
            temp_bias: PriorSpec::bounded_normal(0.0, 4.0, -10.0, 10.0),
            ddf_snow: PriorSpec::bounded_normal(
                ddf_mu,
                ddf_sigma,
                ddf_mu - 1.96 * ddf_sigma,
                ddf_mu + 1.96 * ddf_sigma,
            ),
        }
    }

    /// Validate all three specs and construct the priors.
    pub fn build(&self) -> Result<PriorSet> {
        Ok(PriorSet {
            prec_factor: self.prec_factor.build()?,
            temp_bias: self.temp_bias.build()?,
            ddf_snow: self.ddf_snow.build()?,
        })
    }
}
