//! A small demo: infer the mean and noise level of Gaussian data with a
//! two-level hierarchical model, pre-tuning the step sizes first.

use std::error::Error;

use hiermh::distributions::{gamma, gaussian, gaussian_observed};
use hiermh::metropolis::MetropolisHastings;
use hiermh::model::Model;
use hiermh::sampler::{SampleOptions, Sampler};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

fn main() -> Result<(), Box<dyn Error>> {
    const NSTEPS: usize = 20_000;
    const NBURN: usize = 2_000;
    const SEED: u64 = 42;

    // Synthetic data: 50 draws from N(2.0, 1.5).
    let mut rng = SmallRng::seed_from_u64(SEED);
    let truth = Normal::new(2.0, 1.5)?;
    let data: Vec<f64> = (0..50).map(|_| truth.sample(&mut rng)).collect();

    // mu ~ Gaussian(0, 10); noise ~ Gamma(2, 2); data ~ Gaussian(mu, noise).
    // The Gamma prior keeps the noise standard deviation positive.
    let mut model = Model::new();
    let prior_mu = model.constant(0.0);
    let prior_sigma = model.constant(10.0);
    let mu = gaussian(&mut model, "mu", prior_mu, prior_sigma, Some(0.0))?;
    let shape = model.constant(2.0);
    let rate = model.constant(2.0);
    let noise = gamma(&mut model, "noise", shape, rate, Some(1.0))?;
    gaussian_observed(&mut model, "data", mu, noise, data)?;

    println!("Ancestry depths: {:?}", {
        let mut depths: Vec<_> = model.ancestries().iter().map(|(k, v)| (k.clone(), *v)).collect();
        depths.sort();
        depths
    });

    let mut sampler = Sampler::new(model);
    sampler.assign_step_method(MetropolisHastings::new().set_seed(SEED));
    let chain = sampler.sample_with(
        NSTEPS,
        SampleOptions {
            ntune_iterlim: Some(20_000),
            tune_interval: Some(100),
            verbose: true,
            show_progress: true,
        },
    )?;

    let kept = chain.thin(NBURN, 1);
    println!(
        "\nAcceptance fraction after burn-in: {:.3}",
        kept.acceptance_fraction()
    );
    for name in kept.names() {
        if let Some(summary) = kept.summary(name) {
            println!(
                "{name}: mean = {:.3}, sd = {:.3}, range = [{:.3}, {:.3}]",
                summary.mean,
                summary.var.sqrt(),
                summary.min,
                summary.max
            );
        }
    }
    Ok(())
}
