/*!
# Ancestry Resolution

Determines, for every free variable in a [`Model`](crate::model::Model),
how many stochastic generations separate it from the nearest
non-stochastic inputs. A perturbation of a variable affects the
distributions of everything below it in the hierarchy, so prior draws and
per-parameter tuning must walk the hierarchy from the shallowest (root-like)
variables down to the most derived ones; the depths computed here define
that order.
*/

use std::collections::HashMap;

use rand::RngCore;

use crate::error::Result;
use crate::model::{Model, NodeId};

/// Computes the ancestry depth of every free variable.
///
/// The depth of a variable is the length of its longest chain of stochastic
/// ancestors: starting from its parents, each level that contains at least
/// one stochastic node adds a generation, and traversal stops at the first
/// level with none. A variable whose parents are all constants gets
/// depth 1.
///
/// The parent graph must be acyclic; this is an invariant of model
/// construction and is not checked here.
pub fn trace_ancestries(model: &Model) -> HashMap<String, usize> {
    let mut depths = HashMap::new();
    for id in model.free() {
        let stoch = match model.stoch(id) {
            Some(s) => s,
            None => continue,
        };
        let mut counter = 0usize;
        let mut current: Vec<NodeId> = stoch.parents().values().copied().collect();
        loop {
            let mut grandparents: Vec<NodeId> = Vec::new();
            let mut any_stochastic = false;
            for &pid in &current {
                if model.node(pid).is_stochastic() {
                    any_stochastic = true;
                    if let Some(parent) = model.stoch(pid) {
                        grandparents.extend(parent.parents().values().copied());
                    }
                }
            }
            counter += 1;
            if !any_stochastic {
                break;
            }
            grandparents.sort_unstable();
            grandparents.dedup();
            current = grandparents;
        }
        depths.insert(stoch.name().to_string(), counter);
    }
    depths
}

/// Draws every free variable from its prior, shallowest ancestry depth
/// first so that each draw conditions on already-refreshed parents.
///
/// Fails if any free variable lacks a random-draw function.
pub fn random_draw(model: &mut Model, rng: &mut dyn RngCore) -> Result<()> {
    for id in model.free_by_depth() {
        model.draw_from_prior(id, rng)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::model::{ParentValues, StochBuilder, Value};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn flat(_: &Value, _: &ParentValues) -> f64 {
        0.0
    }

    #[test]
    fn constants_only_gives_depth_one() {
        let mut model = Model::new();
        let mu = model.constant(0.0);
        model
            .add_stoch(StochBuilder::new("a").value(0.0).parent("mu", mu).logp(flat))
            .unwrap();
        assert_eq!(trace_ancestries(&model)["a"], 1);
    }

    #[test]
    fn no_parents_gives_depth_one() {
        let mut model = Model::new();
        model
            .add_stoch(StochBuilder::new("a").value(0.0).logp(flat))
            .unwrap();
        assert_eq!(trace_ancestries(&model)["a"], 1);
    }

    #[test]
    fn chain_depths_increase() {
        let mut model = Model::new();
        let a = model
            .add_stoch(StochBuilder::new("a").value(0.0).logp(flat))
            .unwrap();
        let b = model
            .add_stoch(StochBuilder::new("b").value(0.0).parent("mu", a).logp(flat))
            .unwrap();
        model
            .add_stoch(StochBuilder::new("c").value(0.0).parent("mu", b).logp(flat))
            .unwrap();
        let depths = trace_ancestries(&model);
        assert_eq!(depths["a"], 1);
        assert_eq!(depths["b"], 2);
        assert_eq!(depths["c"], 3);
    }

    #[test]
    fn depth_follows_longest_lineage() {
        // d has two lineages: d <- b <- a (2 stochastic generations above d)
        // and d <- c (1 generation). The deeper one wins.
        let mut model = Model::new();
        let a = model
            .add_stoch(StochBuilder::new("a").value(0.0).logp(flat))
            .unwrap();
        let b = model
            .add_stoch(StochBuilder::new("b").value(0.0).parent("mu", a).logp(flat))
            .unwrap();
        let c = model
            .add_stoch(StochBuilder::new("c").value(0.0).logp(flat))
            .unwrap();
        model
            .add_stoch(
                StochBuilder::new("d")
                    .value(0.0)
                    .parent("mu", b)
                    .parent("sigma", c)
                    .logp(flat),
            )
            .unwrap();
        assert_eq!(trace_ancestries(&model)["d"], 3);
    }

    #[test]
    fn observed_parents_count_as_stochastic() {
        let mut model = Model::new();
        let y = model
            .add_stoch(
                StochBuilder::new("y")
                    .observed(true)
                    .data(vec![1.0])
                    .logp(flat),
            )
            .unwrap();
        model
            .add_stoch(StochBuilder::new("a").value(0.0).parent("mu", y).logp(flat))
            .unwrap();
        assert_eq!(trace_ancestries(&model)["a"], 2);
    }

    #[test]
    fn random_draw_propagates_shallowest_first() {
        let mut model = Model::new();
        let a = model
            .add_stoch(
                StochBuilder::new("a")
                    .value(0.0)
                    .logp(flat)
                    .random(|_, _| 10.0),
            )
            .unwrap();
        let b = model
            .add_stoch(
                StochBuilder::new("b")
                    .value(0.0)
                    .parent("mu", a)
                    .logp(flat)
                    // b's draw sees a's refreshed value.
                    .random(|parents, _| parents.scalar("mu") + 1.0),
            )
            .unwrap();
        let mut rng = SmallRng::seed_from_u64(0);
        random_draw(&mut model, &mut rng).unwrap();
        assert_eq!(model.scalar(a), 10.0);
        assert_eq!(model.scalar(b), 11.0);
    }

    #[test]
    fn random_draw_requires_random_fns() {
        let mut model = Model::new();
        model
            .add_stoch(StochBuilder::new("a").value(0.0).logp(flat))
            .unwrap();
        let mut rng = SmallRng::seed_from_u64(0);
        let err = random_draw(&mut model, &mut rng).unwrap_err();
        assert!(matches!(err, Error::MissingRandomFn { .. }));
    }
}
