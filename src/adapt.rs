//! One-shot prior adaptation when the posterior disagrees with the
//! observation.
//!
//! After a sampler run, the posterior mean mass balance is compared to the
//! observed value. If they differ by more than the tolerance, the priors for
//! the precipitation factor and temperature bias are re-centered at their
//! posterior means, their bounds are reassigned by the sign of the mismatch,
//! and the distribution family switches to the secondary kind for a single
//! retry. This is a best-effort heuristic correction, not a procedure that
//! is guaranteed to converge; the system never retries more than once.

use crate::observation::Observation;
use crate::prior::{DistributionKind, PriorSpec, PriorSpecSet};
use crate::sampler::Trace;
use serde::{Deserialize, Serialize};

/// Default acceptable mismatch between posterior mean and observed mass
/// balance [m w.e. yr⁻¹].
pub const DEFAULT_MB_TOLERANCE: f64 = 0.1;

/// Tolerance and retry family for the adaptation step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptationPolicy {
    /// Maximum `|posterior mean - observed|` accepted without a retry.
    pub tolerance: f64,

    /// Distribution kind the retry priors switch to.
    pub secondary_kind: DistributionKind,
}

impl Default for AdaptationPolicy {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_MB_TOLERANCE,
            secondary_kind: DistributionKind::Uniform,
        }
    }
}

/// Outcome of reviewing a completed sampler run.
#[derive(Debug, Clone, PartialEq)]
pub enum AdaptationDecision {
    /// Posterior is consistent with the observation; keep the trace.
    Accept,
    /// Re-run the sampler once with these priors.
    Retry(PriorSpecSet),
}

impl AdaptationPolicy {
    /// Compare the trace's posterior mean mass balance against the
    /// observation and decide whether a retry is needed.
    pub fn review(
        &self,
        trace: &Trace,
        observation: &Observation,
        spec: &PriorSpecSet,
    ) -> AdaptationDecision {
        let delta = trace.mass_balance_mean() - observation.mass_balance;
        if delta.abs() <= self.tolerance {
            return AdaptationDecision::Accept;
        }
        AdaptationDecision::Retry(self.shifted_priors(trace, delta, spec))
    }

    /// Retry priors when the first run failed before producing a trace:
    /// no posterior means exist to re-center on, so only the distribution
    /// family switches.
    pub fn fallback_priors(&self, spec: &PriorSpecSet) -> PriorSpecSet {
        PriorSpecSet {
            prec_factor: PriorSpec {
                kind: self.secondary_kind,
                ..spec.prec_factor
            },
            temp_bias: PriorSpec {
                kind: self.secondary_kind,
                ..spec.temp_bias
            },
            ddf_snow: PriorSpec {
                kind: self.secondary_kind,
                ..spec.ddf_snow
            },
        }
    }

    fn shifted_priors(&self, trace: &Trace, delta: f64, spec: &PriorSpecSet) -> PriorSpecSet {
        // Too positive: the model accumulates too much / melts too little,
        // so force the retry toward less precipitation and more melt.
        // Too negative: mirror the bounds.
        let (pf_lower, pf_upper, tb_lower, tb_upper) = if delta > 0.0 {
            (spec.prec_factor.lower, 0.0, 0.0, spec.temp_bias.upper)
        } else {
            (0.0, spec.prec_factor.upper, spec.temp_bias.lower, 0.0)
        };

        let pf_mean = clamp_for(self.secondary_kind, trace.prec_factor_mean(), pf_lower, pf_upper);
        let tb_mean = clamp_for(self.secondary_kind, trace.temp_bias_mean(), tb_lower, tb_upper);

        PriorSpecSet {
            prec_factor: PriorSpec {
                kind: self.secondary_kind,
                mean: pf_mean,
                std_dev: spec.prec_factor.std_dev,
                lower: pf_lower,
                upper: pf_upper,
            },
            temp_bias: PriorSpec {
                kind: self.secondary_kind,
                mean: tb_mean,
                std_dev: spec.temp_bias.std_dev,
                lower: tb_lower,
                upper: tb_upper,
            },
            // The degree-day factor keeps its hyperparameters; only the
            // family follows the switch.
            ddf_snow: PriorSpec {
                kind: self.secondary_kind,
                ..spec.ddf_snow
            },
        }
    }
}

/// A bounded-normal retry prior must keep its mean inside the reassigned
/// bounds; the recentered mean can fall outside them.
fn clamp_for(kind: DistributionKind, mean: f64, lower: f64, upper: f64) -> f64 {
    match kind {
        DistributionKind::BoundedNormal => mean.clamp(lower, upper),
        DistributionKind::Uniform => mean,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::Trace;
    use ndarray::Array1;

    fn observation() -> Observation {
        Observation {
            mass_balance: -0.5,
            uncertainty: 0.2,
            t1: 2000.0,
            t2: 2015.0,
            t1_idx: 0,
            t2_idx: 180,
        }
    }

    fn trace_with_means(mb: f64, pf: f64, tb: f64) -> Trace {
        let n = 10;
        Trace::new(
            Array1::from_elem(n, mb),
            Array1::from_elem(n, pf),
            Array1::from_elem(n, tb),
            Array1::from_elem(n, 0.0041),
        )
        .unwrap()
    }

    #[test]
    fn accepts_within_tolerance() {
        let policy = AdaptationPolicy::default();
        let spec = PriorSpecSet::default_spec();
        let trace = trace_with_means(-0.45, 0.1, 0.5);

        let decision = policy.review(&trace, &observation(), &spec);
        assert_eq!(decision, AdaptationDecision::Accept);
    }

    #[test]
    fn positive_mismatch_forces_less_precipitation_more_melt() {
        // Modeled -0.30 vs observed -0.50: Δ = +0.20 > tolerance.
        let policy = AdaptationPolicy::default();
        let spec = PriorSpecSet::default_spec();
        let trace = trace_with_means(-0.30, 0.4, -1.5);

        match policy.review(&trace, &observation(), &spec) {
            AdaptationDecision::Retry(shifted) => {
                assert_eq!(shifted.prec_factor.upper, 0.0);
                assert_eq!(shifted.prec_factor.lower, -2.0);
                assert_eq!(shifted.temp_bias.lower, 0.0);
                assert_eq!(shifted.temp_bias.upper, 10.0);
                assert_eq!(shifted.prec_factor.mean, 0.4);
                assert_eq!(shifted.temp_bias.mean, -1.5);
                assert_eq!(shifted.prec_factor.kind, DistributionKind::Uniform);
                assert_eq!(shifted.ddf_snow.kind, DistributionKind::Uniform);
            }
            AdaptationDecision::Accept => panic!("expected a retry"),
        }
    }

    #[test]
    fn negative_mismatch_mirrors_the_bounds() {
        // Modeled -0.80 vs observed -0.50: Δ = -0.30.
        let policy = AdaptationPolicy::default();
        let spec = PriorSpecSet::default_spec();
        let trace = trace_with_means(-0.80, -0.3, 2.0);

        match policy.review(&trace, &observation(), &spec) {
            AdaptationDecision::Retry(shifted) => {
                assert_eq!(shifted.prec_factor.lower, 0.0);
                assert_eq!(shifted.prec_factor.upper, 2.0);
                assert_eq!(shifted.temp_bias.lower, -10.0);
                assert_eq!(shifted.temp_bias.upper, 0.0);
            }
            AdaptationDecision::Accept => panic!("expected a retry"),
        }
    }

    #[test]
    fn ddf_prior_keeps_its_hyperparameters() {
        let policy = AdaptationPolicy::default();
        let spec = PriorSpecSet::default_spec();
        let trace = trace_with_means(-0.30, 0.4, -1.5);

        match policy.review(&trace, &observation(), &spec) {
            AdaptationDecision::Retry(shifted) => {
                assert_eq!(shifted.ddf_snow.mean, spec.ddf_snow.mean);
                assert_eq!(shifted.ddf_snow.lower, spec.ddf_snow.lower);
                assert_eq!(shifted.ddf_snow.upper, spec.ddf_snow.upper);
            }
            AdaptationDecision::Accept => panic!("expected a retry"),
        }
    }

    #[test]
    fn bounded_normal_retry_clamps_the_recentered_mean() {
        let policy = AdaptationPolicy {
            tolerance: DEFAULT_MB_TOLERANCE,
            secondary_kind: DistributionKind::BoundedNormal,
        };
        let spec = PriorSpecSet::default_spec();
        // Posterior pf mean 0.6, but Δ > 0 shrinks the pf bounds to [-2, 0].
        let trace = trace_with_means(-0.30, 0.6, 1.0);

        match policy.review(&trace, &observation(), &spec) {
            AdaptationDecision::Retry(shifted) => {
                assert_eq!(shifted.prec_factor.mean, 0.0);
                // The shifted spec must still be buildable.
                assert!(shifted.build().is_ok());
            }
            AdaptationDecision::Accept => panic!("expected a retry"),
        }
    }

    #[test]
    fn fallback_switches_family_only() {
        let policy = AdaptationPolicy::default();
        let spec = PriorSpecSet::default_spec();
        let fallback = policy.fallback_priors(&spec);

        assert_eq!(fallback.prec_factor.kind, DistributionKind::Uniform);
        assert_eq!(fallback.prec_factor.lower, spec.prec_factor.lower);
        assert_eq!(fallback.prec_factor.upper, spec.prec_factor.upper);
        assert_eq!(fallback.temp_bias.mean, spec.temp_bias.mean);
        assert!(fallback.build().is_ok());
    }
}
