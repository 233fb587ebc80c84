//! Reduction of a posterior trace to a small parameter ensemble.
//!
//! Downstream projection runs cannot afford thousands of forward simulations
//! per glacier, so the trace is reduced to `k` representative parameter sets
//! that still span the posterior spread of modeled mass balance. Rows are
//! sorted by mass balance, split into `k` equally sized contiguous strata,
//! and each stratum contributes its lower-median row.

use crate::params::FixedParameters;
use crate::sampler::Trace;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// One parameter set selected for downstream simulation.
///
/// Unlike the trace, the precipitation factor here is the *effective*
/// multiplicative factor, ready for the forward model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnsembleMember {
    /// Position of this member in the ensemble (0-based, ordered by
    /// modeled mass balance).
    pub run_index: usize,

    /// Row of the trace this member was drawn from.
    pub source_index: usize,

    /// Effective (transformed) precipitation factor [-]
    pub prec_factor: f64,

    /// Temperature bias [°C]
    pub temp_bias: f64,

    /// Degree-day factor of snow [m w.e. °C⁻¹ d⁻¹]
    pub ddf_snow: f64,

    /// Modeled mean mass balance of the source row [m w.e. yr⁻¹]
    pub mass_balance: f64,

    /// Pass-through parameters every member carries for the forward runs.
    pub fixed: FixedParameters,
}

/// Reduced ensemble for one glacier, ordered by modeled mass balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ensemble {
    members: Vec<EnsembleMember>,
}

impl Ensemble {
    pub fn members(&self) -> &[EnsembleMember] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Select `k` representative rows from `trace` by stratified sampling.
///
/// Rows are ordered by modeled mass balance (stable sort, so ties keep
/// their trace order), partitioned into `k` contiguous strata of near-equal
/// size, and each stratum is represented by its lower-median row. The
/// resulting members are ordered from most negative to most positive mass
/// balance.
///
/// # Errors
///
/// [`Error::InsufficientSamples`] if the trace holds fewer than `k` rows,
/// [`Error::Configuration`] if `k` is zero.
pub fn stratified_sample(trace: &Trace, k: usize, fixed: FixedParameters) -> Result<Ensemble> {
    if k == 0 {
        return Err(Error::Configuration(
            "ensemble size must be at least 1".to_string(),
        ));
    }
    let n = trace.len();
    if n < k {
        return Err(Error::InsufficientSamples {
            available: n,
            requested: k,
        });
    }

    let mass_balance = trace.mass_balance();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        mass_balance[a]
            .partial_cmp(&mass_balance[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut members = Vec::with_capacity(k);
    for stratum in 0..k {
        let start = stratum * n / k;
        let end = (stratum + 1) * n / k;
        // Lower median of the stratum.
        let source_index = order[start + (end - start - 1) / 2];
        let params = trace.parameter_set(source_index);
        members.push(EnsembleMember {
            run_index: stratum,
            source_index,
            prec_factor: params.prec_factor(),
            temp_bias: params.temp_bias,
            ddf_snow: params.ddf_snow,
            mass_balance: mass_balance[source_index],
            fixed,
        });
    }

    Ok(Ensemble { members })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    fn trace_from_mb(values: Vec<f64>) -> Trace {
        let n = values.len();
        let mb = Array1::from_vec(values);
        // Distinct raw parameters so source rows are identifiable.
        let pf = Array1::from_iter((0..n).map(|i| i as f64 * 0.01));
        let tb = Array1::from_iter((0..n).map(|i| i as f64 * 0.1));
        let ddf = Array1::from_elem(n, 0.0041);
        Trace::new(mb, pf, tb, ddf).unwrap()
    }

    #[test]
    fn selects_exactly_k_members() {
        let trace = trace_from_mb((0..100).map(|i| -1.0 + i as f64 * 0.01).collect());
        let ensemble = stratified_sample(&trace, 12, FixedParameters::default()).unwrap();
        assert_eq!(ensemble.len(), 12);
    }

    #[test]
    fn members_are_ordered_and_distinct() {
        let values: Vec<f64> = (0..50).map(|i| ((i * 37) % 50) as f64 * -0.02).collect();
        let trace = trace_from_mb(values);
        let ensemble = stratified_sample(&trace, 10, FixedParameters::default()).unwrap();

        let mut seen = std::collections::HashSet::new();
        let mut prev = f64::NEG_INFINITY;
        for (i, member) in ensemble.members().iter().enumerate() {
            assert_eq!(member.run_index, i);
            assert!(seen.insert(member.source_index), "duplicate source row");
            assert!(
                member.mass_balance >= prev,
                "members not ordered by mass balance"
            );
            prev = member.mass_balance;
        }
    }

    #[test]
    fn member_carries_the_source_row_parameters() {
        let trace = trace_from_mb(vec![-0.9, -0.5, -0.1]);
        let ensemble = stratified_sample(&trace, 3, FixedParameters::default()).unwrap();

        // Each stratum has one row, so each row is its own representative.
        let member = &ensemble.members()[1];
        assert_eq!(member.source_index, 1);
        let params = trace.parameter_set(1);
        assert_eq!(member.prec_factor, params.prec_factor());
        assert_eq!(member.temp_bias, params.temp_bias);
        assert_eq!(member.mass_balance, -0.5);
    }

    #[test]
    fn prec_factor_is_the_effective_value() {
        let mb = Array1::from_vec(vec![-0.5]);
        let pf = Array1::from_vec(vec![-1.0]);
        let tb = Array1::from_vec(vec![0.0]);
        let ddf = Array1::from_vec(vec![0.0041]);
        let trace = Trace::new(mb, pf, tb, ddf).unwrap();

        let ensemble = stratified_sample(&trace, 1, FixedParameters::default()).unwrap();
        assert_eq!(ensemble.members()[0].prec_factor, 0.5);
    }

    #[test]
    fn too_small_trace_is_rejected() {
        let trace = trace_from_mb(vec![-0.5, -0.4]);
        let err = stratified_sample(&trace, 5, FixedParameters::default()).unwrap_err();
        match err {
            Error::InsufficientSamples {
                available,
                requested,
            } => {
                assert_eq!(available, 2);
                assert_eq!(requested, 5);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn zero_ensemble_size_is_a_configuration_error() {
        let trace = trace_from_mb(vec![-0.5]);
        assert!(matches!(
            stratified_sample(&trace, 0, FixedParameters::default()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn deterministic_for_equal_input() {
        let values: Vec<f64> = (0..64).map(|i| (i as f64).sin()).collect();
        let trace = trace_from_mb(values);
        let a = stratified_sample(&trace, 8, FixedParameters::default()).unwrap();
        let b = stratified_sample(&trace, 8, FixedParameters::default()).unwrap();
        assert_eq!(a, b);
    }
}
