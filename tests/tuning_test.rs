//! Pre-tuning must converge on a simple unimodal posterior and leave step
//! sizes that sample in the target acceptance band.

use hiermh::metropolis::MetropolisHastings;
use hiermh::model::{Model, StochBuilder};
use hiermh::sampler::{SampleOptions, Sampler};

fn standard_normal_model() -> Model {
    let mut model = Model::new();
    model
        .add_stoch(
            StochBuilder::new("x")
                .value(0.0)
                .logp(|value, _| -0.5 * value.scalar().unwrap().powi(2)),
        )
        .unwrap();
    model
}

#[test]
fn tuning_converges_and_calibrates_the_acceptance_rate() {
    const SEED: u64 = 42;

    let mut sampler = Sampler::new(standard_normal_model());
    sampler.assign_step_method(MetropolisHastings::new().set_seed(SEED));
    let chain = sampler
        .sample_with(
            1_000,
            SampleOptions {
                ntune_iterlim: Some(5_000),
                tune_interval: Some(50),
                ..Default::default()
            },
        )
        .expect("tuning must converge within the iteration budget");

    let accfrac = chain.acceptance_fraction();
    assert!(
        (0.15..=0.45).contains(&accfrac),
        "tuned acceptance fraction {accfrac} outside [0.15, 0.45]"
    );
}

#[test]
fn tuning_failure_reports_the_exceeded_limit() {
    // A two-point-scale budget cannot fit even one interval run of five
    // successes, so tuning must fail rather than return a partial result.
    let mut sampler = Sampler::new(standard_normal_model());
    sampler.assign_step_method(MetropolisHastings::new().set_seed(0));
    let err = sampler
        .sample_with(
            100,
            SampleOptions {
                ntune_iterlim: Some(10),
                tune_interval: Some(50),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(
        err,
        hiermh::error::Error::TuningFailed { limit: 10 }
    ));
}
