/*!
# hiermh

Adaptive Metropolis-Hastings MCMC for Bayesian hierarchical models.

A model is a graph of named stochastic variables ([`model::Stoch`]) whose
parents are other variables or constants. Observed variables hold data and
contribute to the joint log-probability; the remaining free variables are
the sampling targets. The [`metropolis::MetropolisHastings`] step method
proposes Gaussian perturbations with one step size per free variable,
optionally calibrating those step sizes with a two-phase adaptive tuning
procedure before the [`sampler::Sampler`] records the chain.

## Example

```rust
use hiermh::distributions::{gaussian, gaussian_observed};
use hiermh::metropolis::MetropolisHastings;
use hiermh::model::Model;
use hiermh::sampler::Sampler;

// mu ~ Gaussian(0, 10); data ~ Gaussian(mu, 1).
let mut model = Model::new();
let prior_mu = model.constant(0.0);
let prior_sigma = model.constant(10.0);
let mu = gaussian(&mut model, "mu", prior_mu, prior_sigma, Some(0.0)).unwrap();
let noise = model.constant(1.0);
gaussian_observed(&mut model, "data", mu, noise, vec![1.8, 2.1, 2.4]).unwrap();

let mut sampler = Sampler::new(model);
sampler.assign_step_method(MetropolisHastings::new().set_seed(42));
let chain = sampler.sample(2_000).unwrap();
assert_eq!(chain.len(), 2_000);
let posterior_mu = chain.summary("mu").unwrap().mean;
assert!((posterior_mu - 2.1).abs() < 1.0);
```
*/

pub mod ancestry;
pub mod chain;
pub mod distributions;
pub mod error;
pub mod io;
pub mod metropolis;
pub mod model;
pub mod sampler;
