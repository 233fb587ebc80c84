//! Bayesian calibration of glacier mass-balance model parameters.
//!
//! For every glacier, three model parameters (a precipitation factor, a
//! temperature bias, and the degree-day factor of snow) are calibrated
//! against one observed glacier-wide mass balance. A component-wise adaptive
//! Metropolis sampler walks the joint posterior with the forward model in
//! the loop; an adaptation policy grants a single retry with shifted priors
//! when the posterior disagrees with the observation; the accepted trace is
//! reduced to a small stratified ensemble for downstream projection runs.
//!
//! Glaciers are independent: a batch run chunks the glacier list across
//! workers, skips and logs the ones that fail, and persists each result as
//! it arrives.

pub mod adapt;
pub mod calibrate;
pub mod ensemble;
pub mod errors;
pub mod model;
pub mod observation;
pub mod output;
pub mod params;
pub mod prior;
pub mod sampler;

pub use crate::adapt::{AdaptationDecision, AdaptationPolicy};
pub use crate::calibrate::{
    BatchConfig, BatchOutcome, CalibrationResult, Calibrator, SkippedGlacier,
};
pub use crate::ensemble::{Ensemble, EnsembleMember};
pub use crate::errors::{Error, Result};
pub use crate::model::{MassBalanceModel, ModelProvider};
pub use crate::observation::{Observation, ObservationProvider};
pub use crate::params::{EffectiveParameters, FixedParameters, ParameterSet};
pub use crate::prior::{DistributionKind, Prior, PriorSet, PriorSpec, PriorSpecSet};
pub use crate::sampler::{MetropolisSampler, SamplerConfig, StepMethod, Trace};
