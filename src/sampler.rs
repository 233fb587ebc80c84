//! Adaptive Metropolis sampler for the joint parameter posterior.
//!
//! One sampler run walks the three calibrated parameters with component-wise
//! Metropolis updates, evaluating the forward model for every candidate and
//! scoring it with a Gaussian likelihood of the observed mass balance. The
//! retained, thinned samples form a [`Trace`].

use crate::model::{windowed_mean, MassBalanceModel};
use crate::observation::Observation;
use crate::params::ParameterSet;
use crate::prior::{Prior, PriorSet};
use crate::{Error, Result};
use indexmap::IndexMap;
use ndarray::Array1;
use rand::Rng;
use rand_distr::{Distribution as _, StandardNormal};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Trace variable names, in tally order.
pub const TRACE_VARIABLES: [&str; 4] = ["massbal", "precfactor", "tempchange", "ddfsnow"];

/// Retained samples from one sampler run.
///
/// All four sequences have identical length. The precipitation factor is
/// stored untransformed (raw sampling space); the mass balance is the forward
/// model output used in the likelihood. A trace is immutable once produced;
/// a re-run produces a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    mass_balance: Array1<f64>,
    prec_factor: Array1<f64>,
    temp_bias: Array1<f64>,
    ddf_snow: Array1<f64>,
}

impl Trace {
    pub fn new(
        mass_balance: Array1<f64>,
        prec_factor: Array1<f64>,
        temp_bias: Array1<f64>,
        ddf_snow: Array1<f64>,
    ) -> Result<Self> {
        let n = mass_balance.len();
        if prec_factor.len() != n || temp_bias.len() != n || ddf_snow.len() != n {
            return Err(Error::Configuration(format!(
                "trace variables have unequal lengths: {}, {}, {}, {}",
                n,
                prec_factor.len(),
                temp_bias.len(),
                ddf_snow.len()
            )));
        }
        Ok(Self {
            mass_balance,
            prec_factor,
            temp_bias,
            ddf_snow,
        })
    }

    pub fn len(&self) -> usize {
        self.mass_balance.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mass_balance.is_empty()
    }

    /// Look up a variable's samples by name (see [`TRACE_VARIABLES`]).
    pub fn get(&self, variable: &str) -> Option<&Array1<f64>> {
        match variable {
            "massbal" => Some(&self.mass_balance),
            "precfactor" => Some(&self.prec_factor),
            "tempchange" => Some(&self.temp_bias),
            "ddfsnow" => Some(&self.ddf_snow),
            _ => None,
        }
    }

    pub fn mass_balance(&self) -> &Array1<f64> {
        &self.mass_balance
    }

    pub fn prec_factor(&self) -> &Array1<f64> {
        &self.prec_factor
    }

    pub fn temp_bias(&self) -> &Array1<f64> {
        &self.temp_bias
    }

    pub fn ddf_snow(&self) -> &Array1<f64> {
        &self.ddf_snow
    }

    /// Posterior mean of the modeled mass balance.
    pub fn mass_balance_mean(&self) -> f64 {
        self.mass_balance.mean().unwrap_or(f64::NAN)
    }

    pub fn prec_factor_mean(&self) -> f64 {
        self.prec_factor.mean().unwrap_or(f64::NAN)
    }

    pub fn temp_bias_mean(&self) -> f64 {
        self.temp_bias.mean().unwrap_or(f64::NAN)
    }

    /// The parameter set stored at `index`.
    pub fn parameter_set(&self, index: usize) -> ParameterSet {
        ParameterSet {
            prec_factor_raw: self.prec_factor[index],
            temp_bias: self.temp_bias[index],
            ddf_snow: self.ddf_snow[index],
        }
    }

    /// Name-keyed view of all variables, useful for diagnostics output.
    pub fn to_param_map(&self) -> IndexMap<String, Array1<f64>> {
        let mut map = IndexMap::new();
        for name in TRACE_VARIABLES {
            if let Some(values) = self.get(name) {
                map.insert(name.to_string(), values.clone());
            }
        }
        map
    }
}

/// Step method for parameter proposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepMethod {
    /// Metropolis with periodic proposal-scale tuning.
    Adaptive,
    /// Metropolis with fixed proposal scales.
    Plain,
}

/// Configuration of one sampler run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Total number of iterations.
    pub iterations: usize,

    /// Iterations discarded before tallying begins.
    pub burn: usize,

    /// Tally every `thin`-th post-burn-in iteration.
    pub thin: usize,

    /// Proposal scales are retuned at intervals of this many iterations.
    pub tune_interval: usize,

    pub step: StepMethod,

    /// Keep tuning after the burn-in period ends.
    pub tune_throughout: bool,

    /// Consecutive non-finite forward-model or likelihood evaluations before
    /// the run fails with [`Error::NumericalInstability`].
    pub max_consecutive_failures: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            iterations: 10_000,
            burn: 0,
            thin: 1,
            tune_interval: 1000,
            step: StepMethod::Adaptive,
            tune_throughout: true,
            max_consecutive_failures: 100,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(Error::Configuration("iterations must be positive".into()));
        }
        if self.burn >= self.iterations {
            return Err(Error::Configuration(format!(
                "burn-in ({}) must be below iterations ({})",
                self.burn, self.iterations
            )));
        }
        if self.thin == 0 {
            return Err(Error::Configuration("thinning interval must be at least 1".into()));
        }
        if self.tune_interval == 0 {
            return Err(Error::Configuration("tune interval must be at least 1".into()));
        }
        if self.max_consecutive_failures == 0 {
            return Err(Error::Configuration(
                "max consecutive failures must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Number of samples a completed run retains per variable.
    pub fn trace_len(&self) -> usize {
        (self.iterations - self.burn) / self.thin
    }
}

/// Wall-clock limit for a sampler run.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    pub at: Instant,
    pub budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

/// Progress of a running sampler, passed to progress callbacks.
#[derive(Debug, Clone, Copy)]
pub struct ProgressInfo {
    /// Current iteration (0-indexed)
    pub iteration: usize,

    /// Total number of iterations
    pub total: usize,

    /// Acceptance rate across all parameters so far
    pub acceptance_rate: f64,
}

/// Per-parameter Metropolis step state.
#[derive(Debug, Clone, Copy)]
struct StepState {
    scale: f64,
    accepted: u64,
    proposed: u64,
    accepted_since_tune: u64,
    proposed_since_tune: u64,
}

impl StepState {
    fn new(scale: f64) -> Self {
        Self {
            scale,
            accepted: 0,
            proposed: 0,
            accepted_since_tune: 0,
            proposed_since_tune: 0,
        }
    }

    /// Multiplicative scale adjustment based on the acceptance rate since the
    /// last tuning, following the pymc Metropolis schedule.
    fn tune(&mut self) {
        if self.proposed_since_tune == 0 {
            return;
        }
        let rate = self.accepted_since_tune as f64 / self.proposed_since_tune as f64;
        self.scale *= match rate {
            r if r < 0.001 => 0.1,
            r if r < 0.05 => 0.5,
            r if r < 0.2 => 0.9,
            r if r > 0.95 => 10.0,
            r if r > 0.75 => 2.0,
            r if r > 0.5 => 1.1,
            _ => 1.0,
        };
        self.accepted_since_tune = 0;
        self.proposed_since_tune = 0;
    }
}

/// Component-wise Metropolis sampler for one glacier.
pub struct MetropolisSampler<'a, M: MassBalanceModel> {
    model: &'a M,
    observation: Observation,
    config: SamplerConfig,
}

impl<'a, M: MassBalanceModel> MetropolisSampler<'a, M> {
    pub fn new(model: &'a M, observation: Observation, config: SamplerConfig) -> Result<Self> {
        config.validate()?;
        observation.validate()?;
        Ok(Self {
            model,
            observation,
            config,
        })
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Run the chain and produce a trace.
    pub fn sample<R: Rng>(&self, priors: &PriorSet, rng: &mut R) -> Result<Trace> {
        self.sample_inner(priors, rng, None, None::<fn(&ProgressInfo)>)
    }

    /// Run the chain with a wall-clock deadline; exceeding it fails the run
    /// with a recoverable [`Error::TimeBudgetExceeded`].
    pub fn sample_until<R: Rng>(
        &self,
        priors: &PriorSet,
        rng: &mut R,
        deadline: Option<Deadline>,
    ) -> Result<Trace> {
        self.sample_inner(priors, rng, deadline, None::<fn(&ProgressInfo)>)
    }

    /// Run the chain with a per-iteration progress callback.
    pub fn sample_with_progress<R: Rng, F: FnMut(&ProgressInfo)>(
        &self,
        priors: &PriorSet,
        rng: &mut R,
        deadline: Option<Deadline>,
        callback: F,
    ) -> Result<Trace> {
        self.sample_inner(priors, rng, deadline, Some(callback))
    }

    /// Gaussian log-likelihood of the observation given a modeled mass
    /// balance. The normalization constant cancels in acceptance ratios and
    /// is dropped.
    fn ln_likelihood(&self, modeled: f64) -> f64 {
        let z = (self.observation.mass_balance - modeled) / self.observation.uncertainty;
        -0.5 * z * z
    }

    /// Evaluate the forward model and extract the windowed mean mass balance.
    ///
    /// Context errors propagate; any other model failure or a non-finite
    /// result is reported as `None` so the caller can count it against the
    /// consecutive-failure limit.
    fn modeled_mass_balance(&self, params: &ParameterSet) -> Result<Option<f64>> {
        let series = match self.model.evaluate(&params.effective()) {
            Ok(series) => series,
            Err(e) if e.is_batch_fatal() => return Err(e),
            Err(e) => {
                log::debug!("forward model evaluation failed: {e}");
                return Ok(None);
            }
        };
        let mb = windowed_mean(&series, &self.observation)?;
        Ok(if mb.is_finite() { Some(mb) } else { None })
    }

    fn sample_inner<R: Rng, F: FnMut(&ProgressInfo)>(
        &self,
        priors: &PriorSet,
        rng: &mut R,
        deadline: Option<Deadline>,
        mut progress: Option<F>,
    ) -> Result<Trace> {
        let cfg = &self.config;
        let limit = cfg.max_consecutive_failures;
        let prior_list: [Prior; 3] = [priors.prec_factor, priors.temp_bias, priors.ddf_snow];

        // Initialize from the prior, re-drawing until the model is finite.
        let mut failures = 0usize;
        let (mut current, mut current_mb) = loop {
            let candidate = ParameterSet {
                prec_factor_raw: priors.prec_factor.sample(rng),
                temp_bias: priors.temp_bias.sample(rng),
                ddf_snow: priors.ddf_snow.sample(rng),
            };
            match self.modeled_mass_balance(&candidate)? {
                Some(mb) => break (candidate, mb),
                None => {
                    failures += 1;
                    if failures >= limit {
                        return Err(Error::NumericalInstability {
                            consecutive: failures,
                            limit,
                        });
                    }
                }
            }
        };
        failures = 0;

        let mut steps = [
            StepState::new(priors.prec_factor.proposal_scale()),
            StepState::new(priors.temp_bias.proposal_scale()),
            StepState::new(priors.ddf_snow.proposal_scale()),
        ];

        let n_keep = cfg.trace_len();
        let mut tally_mb = Vec::with_capacity(n_keep);
        let mut tally_pf = Vec::with_capacity(n_keep);
        let mut tally_tb = Vec::with_capacity(n_keep);
        let mut tally_ddf = Vec::with_capacity(n_keep);

        for iteration in 0..cfg.iterations {
            if let Some(d) = deadline {
                if d.expired() {
                    return Err(Error::TimeBudgetExceeded {
                        budget_secs: d.budget.as_secs_f64(),
                    });
                }
            }

            for (j, prior) in prior_list.iter().enumerate() {
                let old_value = match j {
                    0 => current.prec_factor_raw,
                    1 => current.temp_bias,
                    _ => current.ddf_snow,
                };
                let noise: f64 = StandardNormal.sample(rng);
                let new_value = old_value + steps[j].scale * noise;
                steps[j].proposed += 1;
                steps[j].proposed_since_tune += 1;

                let lp_new = prior.ln_density(new_value);
                if lp_new == f64::NEG_INFINITY {
                    // Outside the prior support; reject without a model call.
                    continue;
                }
                let lp_old = prior.ln_density(old_value);

                let mut candidate = current;
                match j {
                    0 => candidate.prec_factor_raw = new_value,
                    1 => candidate.temp_bias = new_value,
                    _ => candidate.ddf_snow = new_value,
                }

                let candidate_mb = match self.modeled_mass_balance(&candidate)? {
                    Some(mb) => {
                        failures = 0;
                        mb
                    }
                    None => {
                        failures += 1;
                        if failures >= limit {
                            return Err(Error::NumericalInstability {
                                consecutive: failures,
                                limit,
                            });
                        }
                        continue;
                    }
                };

                let log_ratio = (lp_new - lp_old)
                    + (self.ln_likelihood(candidate_mb) - self.ln_likelihood(current_mb));
                if log_ratio >= 0.0 || rng.gen::<f64>() < log_ratio.exp() {
                    current = candidate;
                    current_mb = candidate_mb;
                    steps[j].accepted += 1;
                    steps[j].accepted_since_tune += 1;
                }
            }

            if cfg.step == StepMethod::Adaptive
                && (iteration + 1) % cfg.tune_interval == 0
                && (iteration < cfg.burn || cfg.tune_throughout)
            {
                for step in steps.iter_mut() {
                    step.tune();
                }
                log::debug!(
                    "tuned proposal scales at iteration {iteration}: [{:.4}, {:.4}, {:.6}]",
                    steps[0].scale,
                    steps[1].scale,
                    steps[2].scale
                );
            }

            if iteration >= cfg.burn && (iteration - cfg.burn + 1) % cfg.thin == 0 {
                tally_mb.push(current_mb);
                tally_pf.push(current.prec_factor_raw);
                tally_tb.push(current.temp_bias);
                tally_ddf.push(current.ddf_snow);
            }

            if let Some(ref mut callback) = progress {
                let proposed: u64 = steps.iter().map(|s| s.proposed).sum();
                let accepted: u64 = steps.iter().map(|s| s.accepted).sum();
                callback(&ProgressInfo {
                    iteration,
                    total: cfg.iterations,
                    acceptance_rate: if proposed > 0 {
                        accepted as f64 / proposed as f64
                    } else {
                        0.0
                    },
                });
            }
        }

        Trace::new(
            Array1::from_vec(tally_mb),
            Array1::from_vec(tally_pf),
            Array1::from_vec(tally_tb),
            Array1::from_vec(tally_ddf),
        )
    }
}
