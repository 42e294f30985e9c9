/*!
# Builtin Stochastics

Constructors for stochastic variables with standard probability
distributions (Gaussian, Uniform, Gamma), wired up with the matching
log-density and prior-draw closures so that models can be assembled
without writing either by hand. Additional distributions can be added the
same way via [`StochBuilder`](crate::model::StochBuilder).

Parents are passed as [`NodeId`]s; use
[`Model::constant`](crate::model::Model::constant) for fixed
hyperparameters or another stochastic's id for hierarchical links. When no
initial value is given, one is drawn from the prior conditioned on the
parents' current values.

## Example

```rust
use hiermh::distributions::gaussian;
use hiermh::model::Model;

let mut model = Model::new();
let mu = model.constant(0.0);
let sigma = model.constant(1.0);
let x = gaussian(&mut model, "x", mu, sigma, Some(0.3)).unwrap();
assert_eq!(model.scalar(x), 0.3);
```
*/

use num_traits::{Float, FloatConst};
use rand::prelude::*;
use rand_distr::{Gamma as GammaDist, Normal, Uniform};

use crate::error::{Error, Result};
use crate::model::{Model, NodeId, ParentValues, StochBuilder, Value};

/// Log-density of a normal distribution at `x`.
pub fn normal_logpdf<T: Float + FloatConst>(x: T, mu: T, sigma: T) -> T {
    let half = T::from(0.5).unwrap();
    let two = T::from(2.0).unwrap();
    let z = (x - mu) / sigma;
    -half * (two * T::PI() * sigma * sigma).ln() - half * z * z
}

/// Natural log of the gamma function via the Lanczos approximation (g=7).
pub fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 8] = [
        676.5203681218851,
        -1259.1392167224028,
        771.32342877765313,
        -176.61502916214059,
        12.507343278686905,
        -0.13857109526572012,
        9.9843695780195716e-6,
        1.5056327351493116e-7,
    ];

    if x < 0.5 {
        // Reflection formula: Gamma(x) = pi / (sin(pi x) * Gamma(1 - x)).
        (f64::PI() / (f64::PI() * x).sin()).ln() - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut ag = 0.99999999999980993_f64;
        for (i, &c) in COEFFS.iter().enumerate() {
            ag += c / (x + i as f64 + 1.0);
        }
        let t = x + 7.5;
        0.5 * (2.0 * f64::PI()).ln() + (x + 0.5) * t.ln() - t + ag.ln()
    }
}

fn parent_scalar(model: &Model, name: &str, role: &str, id: NodeId) -> Result<f64> {
    model
        .value(id)
        .scalar()
        .ok_or_else(|| Error::InvalidParameter {
            name: name.to_string(),
            reason: format!("parent {role:?} must be scalar"),
        })
}

/// An unobserved Gaussian variable with mean `mu` and standard deviation
/// `sigma`. Draws the initial value from the prior when `value` is `None`.
pub fn gaussian(
    model: &mut Model,
    name: &str,
    mu: NodeId,
    sigma: NodeId,
    value: Option<f64>,
) -> Result<NodeId> {
    let mu_now = parent_scalar(model, name, "mu", mu)?;
    let sigma_now = parent_scalar(model, name, "sigma", sigma)?;
    if sigma_now <= 0.0 {
        return Err(Error::InvalidParameter {
            name: name.to_string(),
            reason: "sigma must be > 0".to_string(),
        });
    }
    let value = value.unwrap_or_else(|| {
        Normal::new(mu_now, sigma_now)
            .expect("sigma checked above")
            .sample(&mut thread_rng())
    });
    model.add_stoch(
        StochBuilder::new(name)
            .value(value)
            .parent("mu", mu)
            .parent("sigma", sigma)
            .logp(gaussian_logp)
            .random(|parents, rng| {
                Normal::new(parents.scalar("mu"), parents.scalar("sigma"))
                    .expect("sigma must stay positive")
                    .sample(rng)
            }),
    )
}

/// An observed Gaussian variable: `data` is fixed and contributes the sum
/// of per-element log-densities given `mu` and `sigma`.
pub fn gaussian_observed(
    model: &mut Model,
    name: &str,
    mu: NodeId,
    sigma: NodeId,
    data: Vec<f64>,
) -> Result<NodeId> {
    model.add_stoch(
        StochBuilder::new(name)
            .observed(true)
            .data(data)
            .parent("mu", mu)
            .parent("sigma", sigma)
            .logp(gaussian_logp),
    )
}

fn gaussian_logp(value: &Value, parents: &ParentValues) -> f64 {
    let mu = parents.scalar("mu");
    let sigma = parents.scalar("sigma");
    if sigma <= 0.0 {
        return f64::NEG_INFINITY;
    }
    match value {
        Value::Scalar(x) => normal_logpdf(*x, mu, sigma),
        Value::Array(xs) => xs.iter().map(|&x| normal_logpdf(x, mu, sigma)).sum(),
    }
}

/// An unobserved Uniform variable on `[lower, upper]`.
pub fn uniform(
    model: &mut Model,
    name: &str,
    lower: NodeId,
    upper: NodeId,
    value: Option<f64>,
) -> Result<NodeId> {
    let lower_now = parent_scalar(model, name, "lower", lower)?;
    let upper_now = parent_scalar(model, name, "upper", upper)?;
    if lower_now >= upper_now {
        return Err(Error::InvalidParameter {
            name: name.to_string(),
            reason: "lower must be < upper".to_string(),
        });
    }
    let value =
        value.unwrap_or_else(|| Uniform::new(lower_now, upper_now).sample(&mut thread_rng()));
    model.add_stoch(
        StochBuilder::new(name)
            .value(value)
            .parent("lower", lower)
            .parent("upper", upper)
            .logp(|value, parents| {
                let lower = parents.scalar("lower");
                let upper = parents.scalar("upper");
                let width = upper - lower;
                let in_support = |x: f64| x >= lower && x <= upper;
                match value {
                    Value::Scalar(x) if in_support(*x) => -width.ln(),
                    Value::Array(xs) if xs.iter().all(|&x| in_support(x)) => {
                        -(xs.len() as f64) * width.ln()
                    }
                    _ => f64::NEG_INFINITY,
                }
            })
            .random(|parents, rng| {
                Uniform::new(parents.scalar("lower"), parents.scalar("upper")).sample(rng)
            }),
    )
}

/// An unobserved Gamma variable with shape `alpha` and rate `beta`:
///
/// `logp(x) = -ln_gamma(alpha) + alpha ln(beta) + (alpha - 1) ln(x) - beta x`
///
/// for `x > 0`, `-inf` otherwise.
pub fn gamma(
    model: &mut Model,
    name: &str,
    alpha: NodeId,
    beta: NodeId,
    value: Option<f64>,
) -> Result<NodeId> {
    let alpha_now = parent_scalar(model, name, "alpha", alpha)?;
    let beta_now = parent_scalar(model, name, "beta", beta)?;
    if alpha_now <= 0.0 || beta_now <= 0.0 {
        return Err(Error::InvalidParameter {
            name: name.to_string(),
            reason: "alpha and beta must both be > 0".to_string(),
        });
    }
    let value = value.unwrap_or_else(|| {
        GammaDist::new(alpha_now, 1.0 / beta_now)
            .expect("parameters checked above")
            .sample(&mut thread_rng())
    });
    model.add_stoch(
        StochBuilder::new(name)
            .value(value)
            .parent("alpha", alpha)
            .parent("beta", beta)
            .logp(|value, parents| {
                let alpha = parents.scalar("alpha");
                let beta = parents.scalar("beta");
                let term = |x: f64| {
                    if x <= 0.0 {
                        f64::NEG_INFINITY
                    } else {
                        -ln_gamma(alpha) + alpha * beta.ln() + (alpha - 1.0) * x.ln() - beta * x
                    }
                };
                match value {
                    Value::Scalar(x) => term(*x),
                    Value::Array(xs) => xs.iter().map(|&x| term(x)).sum(),
                }
            })
            .random(|parents, rng| {
                GammaDist::new(parents.scalar("alpha"), 1.0 / parents.scalar("beta"))
                    .expect("gamma parameters must stay positive")
                    .sample(rng)
            }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn normal_logpdf_matches_closed_form() {
        // Standard normal at 0: -0.5 ln(2 pi).
        let expected = -0.5 * (2.0 * std::f64::consts::PI).ln();
        assert_abs_diff_eq!(normal_logpdf(0.0, 0.0, 1.0), expected, epsilon = 1e-12);
        // Shifted and scaled.
        assert_abs_diff_eq!(
            normal_logpdf(3.0, 1.0, 2.0),
            -0.5 * (2.0 * std::f64::consts::PI * 4.0).ln() - 0.5,
            epsilon = 1e-12
        );
    }

    #[test]
    fn ln_gamma_matches_known_values() {
        // Gamma(n) = (n-1)! for integers.
        assert_abs_diff_eq!(ln_gamma(1.0), 0.0, epsilon = 1e-10);
        assert_abs_diff_eq!(ln_gamma(5.0), 24.0f64.ln(), epsilon = 1e-10);
        // Gamma(1/2) = sqrt(pi).
        assert_abs_diff_eq!(
            ln_gamma(0.5),
            0.5 * std::f64::consts::PI.ln(),
            epsilon = 1e-10
        );
    }

    #[test]
    fn gaussian_logp_sums_over_observed_data() {
        let mut model = Model::new();
        let mu = model.constant(0.0);
        let sigma = model.constant(1.0);
        gaussian_observed(&mut model, "y", mu, sigma, vec![0.0, 1.0]).unwrap();
        let expected = normal_logpdf(0.0, 0.0, 1.0) + normal_logpdf(1.0, 0.0, 1.0);
        assert_abs_diff_eq!(model.logp(), expected, epsilon = 1e-12);
    }

    #[test]
    fn gaussian_rejects_nonpositive_sigma() {
        let mut model = Model::new();
        let mu = model.constant(0.0);
        let sigma = model.constant(0.0);
        let err = gaussian(&mut model, "x", mu, sigma, Some(0.0)).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { .. }));
    }

    #[test]
    fn uniform_is_flat_inside_and_impossible_outside() {
        let mut model = Model::new();
        let lower = model.constant(0.0);
        let upper = model.constant(2.0);
        let u = uniform(&mut model, "u", lower, upper, Some(1.0)).unwrap();
        assert_abs_diff_eq!(model.logp(), -2.0f64.ln(), epsilon = 1e-12);
        model.set_scalar(u, 3.0);
        assert_eq!(model.logp(), f64::NEG_INFINITY);
    }

    #[test]
    fn uniform_rejects_inverted_bounds() {
        let mut model = Model::new();
        let lower = model.constant(2.0);
        let upper = model.constant(1.0);
        let err = uniform(&mut model, "u", lower, upper, Some(1.5)).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { .. }));
    }

    #[test]
    fn gamma_rejects_nonpositive_parameters() {
        let mut model = Model::new();
        let alpha = model.constant(0.0);
        let beta = model.constant(1.0);
        let err = gamma(&mut model, "g", alpha, beta, Some(1.0)).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { .. }));
    }

    #[test]
    fn gamma_logp_matches_formula() {
        let mut model = Model::new();
        let alpha = model.constant(2.0);
        let beta = model.constant(3.0);
        gamma(&mut model, "g", alpha, beta, Some(0.5)).unwrap();
        let expected = -ln_gamma(2.0) + 2.0 * 3.0f64.ln() + 0.5f64.ln() - 1.5;
        assert_abs_diff_eq!(model.logp(), expected, epsilon = 1e-12);
    }

    #[test]
    fn gamma_is_impossible_at_nonpositive_values() {
        let mut model = Model::new();
        let alpha = model.constant(2.0);
        let beta = model.constant(3.0);
        let g = gamma(&mut model, "g", alpha, beta, Some(1.0)).unwrap();
        model.set_scalar(g, -0.5);
        assert_eq!(model.logp(), f64::NEG_INFINITY);
    }

    #[test]
    fn prior_draws_respect_support() {
        let mut model = Model::new();
        let lower = model.constant(-1.0);
        let upper = model.constant(1.0);
        let u = uniform(&mut model, "u", lower, upper, Some(0.0)).unwrap();
        let alpha = model.constant(2.0);
        let beta = model.constant(1.0);
        let g = gamma(&mut model, "g", alpha, beta, Some(1.0)).unwrap();
        let mut rng = SmallRng::seed_from_u64(11);
        for _ in 0..100 {
            model.draw_from_prior(u, &mut rng).unwrap();
            model.draw_from_prior(g, &mut rng).unwrap();
            let uv = model.scalar(u);
            assert!((-1.0..1.0).contains(&uv));
            assert!(model.scalar(g) > 0.0);
        }
    }
}
