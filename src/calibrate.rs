//! Per-glacier calibration orchestration and batch execution.
//!
//! One glacier is calibrated independently of all others: build its priors,
//! run the sampler, let the adaptation policy decide on the single retry,
//! and reduce the accepted trace to an ensemble. A batch walks a list of
//! glacier ids, splitting it into contiguous chunks across workers; one
//! failing glacier is logged and skipped, only a broken shared context
//! aborts the batch.

use crate::adapt::{AdaptationDecision, AdaptationPolicy};
use crate::ensemble::{stratified_sample, Ensemble};
use crate::model::ModelProvider;
use crate::observation::ObservationProvider;
use crate::params::FixedParameters;
use crate::prior::PriorSpecSet;
use crate::sampler::{Deadline, MetropolisSampler, SamplerConfig, Trace};
use crate::{Error, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration of a calibration batch.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Sampler settings shared by every glacier.
    pub sampler: SamplerConfig,

    /// Initial prior hyperparameters shared by every glacier.
    pub priors: PriorSpecSet,

    /// Tolerance and retry family for the post-run review.
    pub policy: AdaptationPolicy,

    /// Pass-through model parameters carried by every ensemble member.
    pub fixed: FixedParameters,

    /// Ensemble members retained per glacier.
    pub ensemble_size: usize,

    /// Wall-clock budget per glacier, covering both sampler rounds.
    pub glacier_budget: Option<Duration>,

    /// Number of worker threads the glacier list is chunked across.
    pub n_workers: usize,

    /// Run chunks on a thread pool. Even when set, small batches
    /// (fewer than two glaciers per worker) run sequentially.
    pub parallel: bool,

    /// Base seed mixed into each glacier's RNG seed.
    pub seed: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerConfig::default(),
            priors: PriorSpecSet::default_spec(),
            policy: AdaptationPolicy::default(),
            fixed: FixedParameters::default(),
            ensemble_size: 100,
            glacier_budget: None,
            n_workers: 1,
            parallel: false,
            seed: 0,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        self.sampler.validate()?;
        if self.ensemble_size == 0 {
            return Err(Error::Configuration(
                "ensemble size must be at least 1".to_string(),
            ));
        }
        if self.ensemble_size > self.sampler.trace_len() {
            return Err(Error::Configuration(format!(
                "ensemble size {} exceeds the {} samples a run retains",
                self.ensemble_size,
                self.sampler.trace_len()
            )));
        }
        if self.n_workers == 0 {
            return Err(Error::Configuration(
                "worker count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Completed calibration of one glacier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub glacier_id: String,

    /// Sampler round the trace came from: 1 for the initial priors, 2 after
    /// the adaptation retry.
    pub round: u8,

    /// Prior hyperparameters the accepted trace was sampled under.
    pub priors: PriorSpecSet,

    pub trace: Trace,

    pub ensemble: Ensemble,
}

/// A glacier the batch gave up on, with the error that caused it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedGlacier {
    pub glacier_id: String,
    pub reason: String,
}

/// Results and skips of one batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub results: Vec<CalibrationResult>,
    pub skipped: Vec<SkippedGlacier>,
}

/// Deterministic per-glacier RNG seed: FNV-1a of the glacier id, mixed with
/// the batch seed. Identical ids always replay the same chain.
pub fn glacier_seed(base: u64, glacier_id: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in glacier_id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash ^ base
}

/// Calibrates glaciers against a model provider and an observation source.
pub struct Calibrator<P, O> {
    models: P,
    observations: O,
    config: BatchConfig,
}

impl<P, O> Calibrator<P, O>
where
    P: ModelProvider,
    O: ObservationProvider,
{
    pub fn new(models: P, observations: O, config: BatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            models,
            observations,
            config,
        })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Calibrate a single glacier: at most two sampler rounds, then the
    /// ensemble reduction.
    ///
    /// # Errors
    ///
    /// Any error from the forward model, sampler, or reduction. Only
    /// [`Error::MissingContext`] should abort a surrounding batch; everything
    /// else is specific to this glacier.
    pub fn calibrate_glacier(&self, glacier_id: &str) -> Result<CalibrationResult> {
        let observation = self.observations.get_observation(glacier_id).ok_or_else(|| {
            Error::Configuration(format!("no usable observation for glacier {glacier_id}"))
        })?;
        let model = self.models.model_for(glacier_id)?;
        let sampler = MetropolisSampler::new(&model, observation, self.config.sampler)?;

        let mut rng = ChaCha8Rng::seed_from_u64(glacier_seed(self.config.seed, glacier_id));
        let deadline = self.config.glacier_budget.map(Deadline::after);

        let spec = self.config.priors;
        let (round, spec, trace) = match self.run_round(&sampler, &spec, &mut rng, deadline) {
            Ok(trace) => match self.config.policy.review(&trace, &observation, &spec) {
                AdaptationDecision::Accept => (1, spec, trace),
                AdaptationDecision::Retry(shifted) => {
                    log::info!(
                        "glacier {glacier_id}: posterior mean {:.3} vs observed {:.3}, retrying with shifted priors",
                        trace.mass_balance_mean(),
                        observation.mass_balance
                    );
                    let trace = self.run_round(&sampler, &shifted, &mut rng, deadline)?;
                    (2, shifted, trace)
                }
            },
            // A numerically unstable first round gets the same single retry,
            // but with no posterior to re-center on.
            Err(Error::NumericalInstability { consecutive, .. }) => {
                let fallback = self.config.policy.fallback_priors(&spec);
                log::info!(
                    "glacier {glacier_id}: {consecutive} consecutive non-finite evaluations, \
                     retrying with {:?} priors",
                    fallback.prec_factor.kind
                );
                let trace = self.run_round(&sampler, &fallback, &mut rng, deadline)?;
                (2, fallback, trace)
            }
            Err(e) => return Err(e),
        };

        if round == 2 {
            let residual = trace.mass_balance_mean() - observation.mass_balance;
            if residual.abs() > self.config.policy.tolerance {
                log::warn!(
                    "glacier {glacier_id}: still {residual:.3} m w.e. yr⁻¹ from the observation \
                     after the retry; keeping the round-2 trace"
                );
            }
        }

        let ensemble = stratified_sample(&trace, self.config.ensemble_size, self.config.fixed)?;
        Ok(CalibrationResult {
            glacier_id: glacier_id.to_string(),
            round,
            priors: spec,
            trace,
            ensemble,
        })
    }

    fn run_round<R: rand::Rng>(
        &self,
        sampler: &MetropolisSampler<'_, P::Model>,
        spec: &PriorSpecSet,
        rng: &mut R,
        deadline: Option<Deadline>,
    ) -> Result<Trace> {
        let priors = spec.build()?;
        sampler.sample_until(&priors, rng, deadline)
    }

    fn run_chunk(&self, glacier_ids: &[String]) -> Result<BatchOutcome> {
        let mut results = Vec::new();
        let mut skipped = Vec::new();
        for glacier_id in glacier_ids {
            match self.calibrate_glacier(glacier_id) {
                Ok(result) => results.push(result),
                Err(e) if e.is_batch_fatal() => return Err(e),
                Err(e) => {
                    log::warn!("skipping glacier {glacier_id}: {e}");
                    skipped.push(SkippedGlacier {
                        glacier_id: glacier_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(BatchOutcome { results, skipped })
    }
}

impl<P, O> Calibrator<P, O>
where
    P: ModelProvider + Sync,
    O: ObservationProvider + Sync,
{
    /// Calibrate every glacier in the list.
    ///
    /// The list is split into contiguous chunks, one per worker; with
    /// `parallel` set and at least two glaciers per worker the chunks run on
    /// the rayon thread pool, otherwise sequentially. Per-glacier failures
    /// are collected in [`BatchOutcome::skipped`]; only a
    /// [`Error::MissingContext`] aborts the batch.
    pub fn calibrate_batch(&self, glacier_ids: &[String]) -> Result<BatchOutcome> {
        if glacier_ids.is_empty() {
            return Ok(BatchOutcome {
                results: Vec::new(),
                skipped: Vec::new(),
            });
        }

        let n_workers = self.config.n_workers;
        let chunk_size = glacier_ids.len().div_ceil(n_workers);
        let run_parallel = self.config.parallel && glacier_ids.len() >= 2 * n_workers;
        log::info!(
            "calibrating {} glaciers in chunks of {chunk_size} ({})",
            glacier_ids.len(),
            if run_parallel { "parallel" } else { "sequential" }
        );

        let outcomes: Vec<Result<BatchOutcome>> = if run_parallel {
            glacier_ids
                .par_chunks(chunk_size)
                .map(|chunk| self.run_chunk(chunk))
                .collect()
        } else {
            glacier_ids
                .chunks(chunk_size)
                .map(|chunk| self.run_chunk(chunk))
                .collect()
        };

        let mut results = Vec::new();
        let mut skipped = Vec::new();
        for outcome in outcomes {
            let outcome = outcome?;
            results.extend(outcome.results);
            skipped.extend(outcome.skipped);
        }
        log::info!(
            "batch finished: {} calibrated, {} skipped",
            results.len(),
            skipped.len()
        );
        Ok(BatchOutcome { results, skipped })
    }
}
