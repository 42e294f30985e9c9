/*!
# Metropolis-Hastings Step Method

Implements the adaptive Metropolis-Hastings proposal/accept engine for
hierarchical models: Gaussian proposals with one step size per free
variable, the symmetric-proposal acceptance rule, and a two-phase
pre-tuning procedure that calibrates step sizes to a target
acceptance-rate band before the main sampling run.

The tuning runs in two phases. Phase A perturbs one parameter at a time,
holding the rest at their starting values, and rescales that parameter's
step size after every interval until five consecutive intervals land in
the 20-40% acceptance band. This equalizes the *relative* scales of the
step sizes. Phase B then perturbs all parameters jointly and adjusts a
single rescale factor applied to every step size, calibrating the overall
proposal size against the joint posterior; its success band is 20-35%.
Either phase fails fatally if its iteration budget runs out first.

## Example

```rust
use hiermh::metropolis::MetropolisHastings;
use hiermh::sampler::StepMethod;

let mut mh = MetropolisHastings::new().set_seed(42);
// Uphill moves are always accepted.
assert!(mh.decide(-10.0, -5.0));
```
*/

use std::collections::HashMap;

use rand::prelude::*;
use rand::rngs::SmallRng;
use rand_distr::Normal;

use crate::error::{Error, Result};
use crate::model::{Model, NodeId};
use crate::sampler::StepMethod;

/// Required number of consecutive successful tuning intervals.
const NCONSECUTIVE: usize = 5;

/// Extra shrink applied to a step size once phase A converges for a
/// parameter, leaving headroom for the joint rescaling of phase B.
const PHASE_A_SAFETY_FACTOR: f64 = 0.3;

/// Draws proposal offsets. The default is a zero-mean Gaussian whose
/// standard deviation is the per-parameter step size; any symmetric
/// replacement keeps the acceptance rule valid without a proposal-ratio
/// correction.
pub trait ProposalDistribution {
    fn draw(&self, sigma: f64, rng: &mut dyn RngCore) -> f64;
}

/// Zero-mean Gaussian proposal offsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GaussianProposal;

impl ProposalDistribution for GaussianProposal {
    fn draw(&self, sigma: f64, rng: &mut dyn RngCore) -> f64 {
        Normal::new(0.0, sigma)
            .expect("step sizes are positive")
            .sample(rng)
    }
}

/// The adaptive Metropolis-Hastings step method.
///
/// Owns the per-parameter step sizes (Gaussian proposal standard
/// deviations) and the RNG driving proposals and accept/reject draws.
/// Construct with [`MetropolisHastings::new`], optionally chain
/// [`set_seed`](MetropolisHastings::set_seed) for reproducibility and
/// [`step_size`](MetropolisHastings::step_size) to configure initial
/// spreads; unset parameters default to 1.0.
pub struct MetropolisHastings<Q = GaussianProposal> {
    /// Per-parameter proposal standard deviations.
    pub step_sizes: HashMap<String, f64>,
    proposal: Q,
    /// The random seed.
    pub seed: u64,
    rng: SmallRng,
}

impl MetropolisHastings<GaussianProposal> {
    pub fn new() -> Self {
        Self::with_proposal(GaussianProposal)
    }
}

impl Default for MetropolisHastings<GaussianProposal> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Q: ProposalDistribution> MetropolisHastings<Q> {
    /// Creates a step method with a custom proposal distribution.
    pub fn with_proposal(proposal: Q) -> Self {
        let seed = thread_rng().gen::<u64>();
        Self {
            step_sizes: HashMap::new(),
            proposal,
            seed,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Reseeds the internal RNG for reproducible runs.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// Sets the initial step size for one parameter.
    pub fn step_size(mut self, name: &str, sigma: f64) -> Self {
        self.step_sizes.insert(name.to_string(), sigma);
        self
    }

    fn sigma_for(&self, name: &str) -> f64 {
        self.step_sizes.get(name).copied().unwrap_or(1.0)
    }

    fn ensure_step_sizes(&mut self, names: &[String]) {
        for name in names {
            self.step_sizes.entry(name.clone()).or_insert(1.0);
        }
    }

    fn accept(&mut self, current_logp: f64, new_logp: f64) -> bool {
        let beta = new_logp - current_logp;
        if beta > 0.0 {
            true
        } else {
            let z: f64 = self.rng.gen();
            z <= beta.exp()
        }
    }

    /// Per-parameter relative tuning: for each free variable, in ancestry
    /// order, perturb it alone until five consecutive intervals land in
    /// the 20-40% acceptance band.
    fn tune_each(
        &mut self,
        model: &mut Model,
        free: &[NodeId],
        names: &[String],
        orig: &[f64],
        m: usize,
        n: usize,
        verbose: bool,
    ) -> Result<()> {
        for (j, (&id_j, name_j)) in free.iter().zip(names).enumerate() {
            let mut i = 0usize;
            let mut nsuccess = 0usize;
            let mut interval = TuningInterval::new(n);
            let mut current_logp = model.logp();
            let mut current_value = model.scalar(id_j);
            loop {
                if nsuccess >= NCONSECUTIVE {
                    if let Some(sigma) = self.step_sizes.get_mut(name_j) {
                        *sigma *= PHASE_A_SAFETY_FACTOR;
                    }
                    break;
                }
                if i == m {
                    return Err(Error::TuningFailed { limit: m });
                }
                let k = i % n;
                i += 1;

                // Start of an interval: reset every parameter to its
                // baseline so the tuning chain cannot drift into a
                // low-probability region of parameter space.
                if k == 0 {
                    for (&id, &v) in free.iter().zip(orig) {
                        model.set_scalar(id, v);
                    }
                    current_value = model.scalar(id_j);
                    current_logp = model.logp();
                }

                // Perturb the target parameter alone, holding the rest
                // fixed.
                let delta = self.proposal.draw(self.sigma_for(name_j), &mut self.rng);
                model.nudge(id_j, delta);
                let new_logp = model.logp();
                let accepted = self.accept(current_logp, new_logp);
                if accepted {
                    current_logp = new_logp;
                    current_value = model.scalar(id_j);
                } else {
                    model.set_scalar(id_j, current_value);
                }
                interval.record(k, accepted, current_value, current_logp);

                if k == n - 1 {
                    let accfrac = interval.acceptance_fraction();
                    if let Some(sigma) = self.step_sizes.get_mut(name_j) {
                        *sigma *= step_size_multiplier(accfrac);
                    }
                    if (0.2..=0.40).contains(&accfrac) {
                        nsuccess += 1;
                    } else {
                        nsuccess = 0;
                    }
                    if verbose {
                        println!(
                            "\nPre-tuning update for parameter {} ({} of {}):",
                            name_j,
                            j + 1,
                            free.len()
                        );
                        println!("Consecutive successes = {nsuccess}");
                        println!("Accepted fraction from last {n} steps = {accfrac}");
                        println!(
                            "(require {NCONSECUTIVE} consecutive intervals \
                             with acceptance rate 0.2-0.4)"
                        );
                        println!(
                            "Median value of last {} steps: median({}) = {}",
                            n,
                            name_j,
                            interval.median_value()
                        );
                        println!("Starting value for comparison: {}", orig[j]);
                        println!("Mean logp of last {} steps: {}", n, interval.mean_logp());
                    }
                }
            }
        }
        Ok(())
    }

    /// Joint rescaling: perturb all free variables simultaneously and
    /// adjust one shared rescale factor until five consecutive intervals
    /// land in the 20-35% acceptance band.
    fn tune_jointly(
        &mut self,
        model: &mut Model,
        free: &[NodeId],
        names: &[String],
        orig: &[f64],
        m: usize,
        n: usize,
        verbose: bool,
    ) -> Result<()> {
        let mut i = 0usize;
        let mut nsuccess = 0usize;
        let mut rescale = 1.0 / (free.len() as f64).sqrt();
        let mut accepted_flags = vec![false; n];
        let mut current: Vec<f64> = orig.to_vec();
        let mut current_logp = model.logp();
        let mut accfrac = 0.0;
        if verbose {
            println!("\nNow tuning the step sizes simultaneously...\n");
        }
        loop {
            if nsuccess >= NCONSECUTIVE {
                break;
            }
            if i == m {
                return Err(Error::TuningFailed { limit: m });
            }
            let k = i % n;
            i += 1;

            // Interval start: reset to baseline and fold the current
            // rescale factor into every step size before the first
            // perturbation.
            if k == 0 {
                for (&id, &v) in free.iter().zip(orig) {
                    model.set_scalar(id, v);
                }
                current.copy_from_slice(orig);
                current_logp = model.logp();
                for name in names {
                    if let Some(sigma) = self.step_sizes.get_mut(name) {
                        *sigma *= rescale;
                    }
                }
            }

            for (&id, name) in free.iter().zip(names) {
                let delta = self.proposal.draw(self.sigma_for(name), &mut self.rng);
                model.nudge(id, delta);
            }
            let new_logp = model.logp();
            let accepted = self.accept(current_logp, new_logp);
            if accepted {
                current_logp = new_logp;
                for (slot, &id) in current.iter_mut().zip(free) {
                    *slot = model.scalar(id);
                }
            } else {
                for (&id, &v) in free.iter().zip(&current) {
                    model.set_scalar(id, v);
                }
            }
            accepted_flags[k] = accepted;

            if k == n - 1 {
                let naccepted = accepted_flags.iter().filter(|&&a| a).count();
                accfrac = naccepted as f64 / n as f64;
                if (0.2..=0.35).contains(&accfrac) {
                    nsuccess += 1;
                    rescale = 1.0;
                } else {
                    nsuccess = 0;
                    rescale = rescale_factor(accfrac);
                }
                if verbose {
                    println!("Consecutive successes = {nsuccess}");
                    println!("Accepted fraction from last {n} steps = {accfrac}");
                }
            }
        }
        if verbose {
            println!(
                "Finished tuning with acceptance rate of {:.1}%",
                accfrac * 100.0
            );
        }
        Ok(())
    }
}

impl<Q: ProposalDistribution> StepMethod for MetropolisHastings<Q> {
    /// Perturbs every free variable in place with one draw from the
    /// proposal distribution at that variable's step size.
    fn propose(&mut self, model: &mut Model) {
        for id in model.free() {
            let sigma = match model.stoch(id) {
                Some(s) => self.sigma_for(s.name()),
                None => continue,
            };
            let delta = self.proposal.draw(sigma, &mut self.rng);
            model.nudge(id, delta);
        }
    }

    /// The Metropolis acceptance rule for a symmetric proposal: accept
    /// uphill moves unconditionally, downhill moves with probability
    /// `exp(new_logp - current_logp)`.
    fn decide(&mut self, current_logp: f64, new_logp: f64) -> bool {
        self.accept(current_logp, new_logp)
    }

    fn supports_tuning(&self) -> bool {
        true
    }

    /// Two-phase adaptive calibration of the step sizes.
    ///
    /// `ntune_iterlim` is the per-phase (and in phase A, per-parameter)
    /// iteration budget, `tune_interval` the interval length over which
    /// acceptance fractions are measured. Fails with
    /// [`Error::TuningFailed`] when a budget is exhausted; the step sizes
    /// are then partially adjusted and must not be reused.
    fn pre_tune(
        &mut self,
        model: &mut Model,
        ntune_iterlim: usize,
        tune_interval: usize,
        verbose: bool,
    ) -> Result<()> {
        if verbose {
            println!("\nTuning step sizes...");
        }
        let free = model.free_by_depth();
        if free.is_empty() {
            return Ok(());
        }
        let names: Vec<String> = free
            .iter()
            .filter_map(|&id| model.stoch(id).map(|s| s.name().to_string()))
            .collect();
        self.ensure_step_sizes(&names);

        // Baseline values every interval restarts from.
        let orig: Vec<f64> = free.iter().map(|&id| model.scalar(id)).collect();

        self.tune_each(
            model,
            &free,
            &names,
            &orig,
            ntune_iterlim,
            tune_interval,
            verbose,
        )?;
        self.tune_jointly(
            model,
            &free,
            &names,
            &orig,
            ntune_iterlim,
            tune_interval,
            verbose,
        )
    }
}

/// One tuning interval's record for a single parameter: accept flags and
/// the resulting values and log-probabilities. Reused across intervals
/// and discarded once the acceptance fraction has been read off.
struct TuningInterval {
    accepted: Vec<bool>,
    values: Vec<f64>,
    logp: Vec<f64>,
}

impl TuningInterval {
    fn new(n: usize) -> Self {
        Self {
            accepted: vec![false; n],
            values: vec![0.0; n],
            logp: vec![0.0; n],
        }
    }

    fn record(&mut self, k: usize, accepted: bool, value: f64, logp: f64) {
        self.accepted[k] = accepted;
        self.values[k] = value;
        self.logp[k] = logp;
    }

    fn acceptance_fraction(&self) -> f64 {
        let naccepted = self.accepted.iter().filter(|&&a| a).count();
        naccepted as f64 / self.accepted.len() as f64
    }

    fn median_value(&self) -> f64 {
        let mut sorted = self.values.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        sorted[sorted.len() / 2]
    }

    fn mean_logp(&self) -> f64 {
        self.logp.iter().sum::<f64>() / self.logp.len() as f64
    }
}

/// Phase-A step-size multiplier for an interval's acceptance fraction.
///
/// Fractions in the 25-35% band leave the step size unchanged; lower
/// fractions shrink it (down to a factor of 5 when almost nothing was
/// accepted), higher fractions grow it.
pub fn step_size_multiplier(accfrac: f64) -> f64 {
    let a = accfrac;
    if a <= 0.01 {
        1.0 / 5.0
    } else if a <= 0.05 {
        1.0 / 2.0
    } else if a <= 0.10 {
        1.0 / 1.5
    } else if a <= 0.15 {
        1.0 / 1.2
    } else if a < 0.20 {
        1.0 / 1.1
    } else if a > 0.20 && a < 0.25 {
        1.0 / 1.01
    } else if a <= 0.35 {
        1.0
    } else if a <= 0.40 {
        1.01
    } else if a <= 0.45 {
        1.1
    } else if a <= 0.50 {
        1.2
    } else if a <= 0.55 {
        1.5
    } else if a <= 0.60 {
        2.0
    } else {
        5.0
    }
}

/// Phase-B rescale factor for a joint interval's acceptance fraction.
///
/// Coarser bands than phase A; the success band 20-35% resets the factor
/// to 1.0 rather than compounding it.
pub fn rescale_factor(accfrac: f64) -> f64 {
    let a = accfrac;
    if (0.2..=0.35).contains(&a) {
        1.0
    } else if a <= 0.01 {
        1.0 / 2.0
    } else if a <= 0.05 {
        1.0 / 1.5
    } else if a <= 0.10 {
        1.0 / 1.2
    } else if a <= 0.15 {
        1.0 / 1.1
    } else if a < 0.20 {
        1.0 / 1.01
    } else if a <= 0.45 {
        1.01
    } else if a <= 0.50 {
        1.1
    } else if a <= 0.55 {
        1.2
    } else if a <= 0.60 {
        1.5
    } else {
        2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ParentValues, StochBuilder, Value};
    use approx::assert_abs_diff_eq;

    #[test]
    fn decide_always_accepts_uphill() {
        let mut mh = MetropolisHastings::new().set_seed(1);
        for _ in 0..100 {
            assert!(mh.decide(-10.0, -9.9));
            assert!(mh.decide(0.0, 100.0));
        }
    }

    #[test]
    fn decide_always_accepts_equal_logp() {
        // beta = 0 gives exp(beta) = 1 and z is drawn from [0, 1).
        let mut mh = MetropolisHastings::new().set_seed(2);
        for _ in 0..1000 {
            assert!(mh.decide(-3.0, -3.0));
        }
    }

    #[test]
    fn decide_matches_exp_beta_frequency() {
        let mut mh = MetropolisHastings::new().set_seed(3);
        let beta = -1.0f64;
        let trials = 200_000;
        let accepted = (0..trials).filter(|_| mh.decide(0.0, beta)).count();
        let freq = accepted as f64 / trials as f64;
        assert_abs_diff_eq!(freq, beta.exp(), epsilon = 0.01);
    }

    #[test]
    fn step_size_table_boundaries() {
        assert_eq!(step_size_multiplier(0.01), 1.0 / 5.0);
        assert_eq!(step_size_multiplier(0.05), 1.0 / 2.0);
        assert_eq!(step_size_multiplier(0.10), 1.0 / 1.5);
        assert_eq!(step_size_multiplier(0.15), 1.0 / 1.2);
        // 0.20 sits between the two shrink bands and is left unchanged.
        assert_eq!(step_size_multiplier(0.20), 1.0);
        assert_eq!(step_size_multiplier(0.25), 1.0);
        assert_eq!(step_size_multiplier(0.35), 1.0);
        assert_eq!(step_size_multiplier(0.40), 1.01);
        assert_eq!(step_size_multiplier(0.45), 1.1);
        assert_eq!(step_size_multiplier(0.50), 1.2);
        assert_eq!(step_size_multiplier(0.55), 1.5);
        assert_eq!(step_size_multiplier(0.60), 2.0);
        assert_eq!(step_size_multiplier(0.61), 5.0);
        assert_eq!(step_size_multiplier(0.19), 1.0 / 1.1);
        assert_eq!(step_size_multiplier(0.22), 1.0 / 1.01);
    }

    #[test]
    fn rescale_table_boundaries() {
        assert_eq!(rescale_factor(0.20), 1.0);
        assert_eq!(rescale_factor(0.35), 1.0);
        assert_eq!(rescale_factor(0.01), 1.0 / 2.0);
        assert_eq!(rescale_factor(0.05), 1.0 / 1.5);
        assert_eq!(rescale_factor(0.19), 1.0 / 1.01);
        assert_eq!(rescale_factor(0.36), 1.01);
        assert_eq!(rescale_factor(0.60), 1.5);
        assert_eq!(rescale_factor(0.61), 2.0);
    }

    fn flat(_: &Value, _: &ParentValues) -> f64 {
        0.0
    }

    #[test]
    fn propose_perturbs_every_free_variable() {
        let mut model = Model::new();
        let a = model
            .add_stoch(StochBuilder::new("a").value(0.0).logp(flat))
            .unwrap();
        let b = model
            .add_stoch(StochBuilder::new("b").value(5.0).logp(flat))
            .unwrap();
        model
            .add_stoch(
                StochBuilder::new("y")
                    .observed(true)
                    .data(vec![1.0])
                    .logp(flat),
            )
            .unwrap();
        let mut mh = MetropolisHastings::new().set_seed(4);
        mh.propose(&mut model);
        assert_ne!(model.scalar(a), 0.0);
        assert_ne!(model.scalar(b), 5.0);
        // Observed variables are never perturbed.
        assert_eq!(model.value(model.id("y").unwrap()).array(), Some(&[1.0][..]));
    }

    #[test]
    fn pre_tune_without_free_variables_is_a_no_op() {
        let mut model = Model::new();
        model
            .add_stoch(
                StochBuilder::new("y")
                    .observed(true)
                    .data(vec![1.0])
                    .logp(flat),
            )
            .unwrap();
        let mut mh = MetropolisHastings::new().set_seed(5);
        mh.pre_tune(&mut model, 100, 10, false).unwrap();
    }

    #[test]
    fn pre_tune_fails_on_flat_posterior() {
        // A flat logp accepts every proposal, so the acceptance fraction
        // is pinned at 1.0 and the success band can never be reached.
        let mut model = Model::new();
        model
            .add_stoch(StochBuilder::new("a").value(0.0).logp(flat))
            .unwrap();
        let mut mh = MetropolisHastings::new().set_seed(6);
        let err = mh.pre_tune(&mut model, 100, 10, false).unwrap_err();
        assert!(matches!(err, Error::TuningFailed { limit: 100 }));
    }
}
