/*!
# Sampling Loop

The [`Sampler`] binds a [`Model`] to a [`StepMethod`] and drives the main
MCMC loop: propose a joint perturbation, evaluate the joint
log-probability, accept or reject, and record the post-decision state into
a [`Chain`]. Optional pre-tuning runs before the loop when both tuning
parameters are supplied.

Execution is strictly sequential; each step's proposal starts from the
previous step's accepted state, so there is no intra-chain parallelism.

## Example

```rust
use hiermh::metropolis::MetropolisHastings;
use hiermh::model::{Model, StochBuilder};
use hiermh::sampler::Sampler;

let mut model = Model::new();
model
    .add_stoch(
        StochBuilder::new("x")
            .value(0.0)
            .logp(|value, _| -0.5 * value.scalar().unwrap().powi(2)),
    )
    .unwrap();

let mut sampler = Sampler::new(model);
sampler.assign_step_method(MetropolisHastings::new().set_seed(42));
let chain = sampler.sample(100).unwrap();
assert_eq!(chain.len(), 100);
```
*/

use indicatif::{ProgressBar, ProgressStyle};

use crate::chain::Chain;
use crate::error::{Error, Result};
use crate::model::{DType, Model, NodeId};

/// A proposal/accept engine driving one MCMC step at a time.
///
/// [`MetropolisHastings`](crate::metropolis::MetropolisHastings) is the
/// built-in implementation. Step methods that support it also expose the
/// adaptive pre-tuning procedure; the default implementation reports
/// tuning as unsupported.
pub trait StepMethod {
    /// Perturbs every free variable of the model in place, once.
    fn propose(&mut self, model: &mut Model);

    /// Accept/reject decision between the current and proposed joint
    /// log-probabilities.
    fn decide(&mut self, current_logp: f64, new_logp: f64) -> bool;

    /// Whether [`StepMethod::pre_tune`] is implemented.
    fn supports_tuning(&self) -> bool {
        false
    }

    /// Adaptive step-size calibration, run before sampling.
    fn pre_tune(
        &mut self,
        model: &mut Model,
        ntune_iterlim: usize,
        tune_interval: usize,
        verbose: bool,
    ) -> Result<()> {
        let _ = (model, ntune_iterlim, tune_interval, verbose);
        Err(Error::TuningUnsupported)
    }
}

/// Options for [`Sampler::sample_with`].
///
/// Tuning runs only when `ntune_iterlim` is set; setting it without
/// `tune_interval` is a configuration error.
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleOptions {
    /// Iteration budget for each tuning phase.
    pub ntune_iterlim: Option<usize>,
    /// Length of one tuning interval.
    pub tune_interval: Option<usize>,
    /// Print tuning progress reports to stdout.
    pub verbose: bool,
    /// Display a progress bar over the sampling steps.
    pub show_progress: bool,
}

/// Drives repeated proposal/accept cycles against a model and step
/// method, accumulating the resulting chain.
pub struct Sampler {
    pub model: Model,
    step_method: Option<Box<dyn StepMethod>>,
}

impl Sampler {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            step_method: None,
        }
    }

    /// Assigns the step method used by subsequent sampling runs.
    pub fn assign_step_method(&mut self, step_method: impl StepMethod + 'static) {
        self.step_method = Some(Box::new(step_method));
    }

    pub fn step_method(&self) -> Option<&dyn StepMethod> {
        self.step_method.as_deref()
    }

    /// Joint log-probability of the model's current state.
    pub fn logp(&self) -> f64 {
        self.model.logp()
    }

    /// Runs `nsteps` sampling steps with default options (no tuning, no
    /// progress bar).
    pub fn sample(&mut self, nsteps: usize) -> Result<Chain> {
        self.sample_with(nsteps, SampleOptions::default())
    }

    /// Runs `nsteps` sampling steps, optionally pre-tuning first.
    ///
    /// Fails with [`Error::MissingStepMethod`] when no step method is
    /// assigned, [`Error::TuneIntervalUnset`] when a tuning budget is
    /// given without an interval length, and propagates tuning failures.
    pub fn sample_with(&mut self, nsteps: usize, options: SampleOptions) -> Result<Chain> {
        let mut step_method = self.step_method.take().ok_or(Error::MissingStepMethod)?;
        let result = self.run(step_method.as_mut(), nsteps, options);
        self.step_method = Some(step_method);
        result
    }

    fn run(
        &mut self,
        step_method: &mut dyn StepMethod,
        nsteps: usize,
        options: SampleOptions,
    ) -> Result<Chain> {
        if let Some(ntune_iterlim) = options.ntune_iterlim {
            if !step_method.supports_tuning() {
                return Err(Error::TuningUnsupported);
            }
            let tune_interval = options.tune_interval.ok_or(Error::TuneIntervalUnset)?;
            step_method.pre_tune(
                &mut self.model,
                ntune_iterlim,
                tune_interval,
                options.verbose,
            )?;
        }

        let free: Vec<NodeId> = self.model.free();
        let params: Vec<(String, DType)> = free
            .iter()
            .filter_map(|&id| {
                self.model
                    .stoch(id)
                    .map(|s| (s.name().to_string(), s.dtype()))
            })
            .collect();
        let mut chain = Chain::preallocated(params, nsteps);

        // Snapshot of the last accepted state, seeded from the model's
        // present (possibly tuned) values.
        let mut current: Vec<f64> = free.iter().map(|&id| self.model.scalar(id)).collect();
        let mut current_logp = self.model.logp();

        let progress = options.show_progress.then(|| {
            let pb = ProgressBar::new(nsteps as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                    .unwrap()
                    .progress_chars("##-"),
            );
            pb
        });

        for i in 0..nsteps {
            step_method.propose(&mut self.model);
            let new_logp = self.model.logp();
            let accepted = step_method.decide(current_logp, new_logp);
            if accepted {
                current_logp = new_logp;
                for (slot, &id) in current.iter_mut().zip(&free) {
                    *slot = self.model.scalar(id);
                }
            } else {
                for (&id, &v) in free.iter().zip(&current) {
                    self.model.set_scalar(id, v);
                }
            }
            chain.record(i, &current, current_logp, accepted);
            if let Some(pb) = &progress {
                pb.inc(1);
            }
        }
        if let Some(pb) = &progress {
            pb.finish_with_message("done");
        }
        Ok(chain)
    }
}
