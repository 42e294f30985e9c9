/*!
# Hierarchical Model Graph

This module defines the building blocks of a hierarchical Bayesian model:
stochastic variable nodes ([`Stoch`]), the arena-style [`Model`] that owns
them, and the [`StochBuilder`] used to construct nodes with validation.

A model is a directed acyclic graph. Each node is either a stochastic
variable or a plain constant, and every stochastic variable references its
parents by [`NodeId`]. Observed variables carry fixed data and contribute to
the joint log-probability; unobserved ("free") variables are the sampling
targets and additionally carry a random-draw function for sampling from
their prior.

## Example

```rust
use hiermh::model::{Model, StochBuilder};

let mut model = Model::new();
let mu = model.constant(0.0);
let sigma = model.constant(1.0);
let x = model
    .add_stoch(
        StochBuilder::new("x")
            .value(0.5)
            .parent("mu", mu)
            .parent("sigma", sigma)
            .logp(|value, parents| {
                let x = value.scalar().unwrap();
                let mu = parents.scalar("mu");
                let sigma = parents.scalar("sigma");
                -0.5 * ((x - mu) / sigma).powi(2)
            }),
    )
    .unwrap();
assert_eq!(model.free(), vec![x]);
```
*/

use std::collections::{BTreeMap, HashMap};

use rand::RngCore;

use crate::ancestry;
use crate::error::{Error, Result};

/// Index of a node in a [`Model`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// Declared numeric type of a stochastic variable.
///
/// Values are held as `f64` internally; the dtype controls how a variable's
/// samples are recorded and serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DType {
    #[default]
    F64,
    I64,
}

/// Current value of a node: a scalar for free variables and most
/// hyperparameters, an array for observed data vectors.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Array(Vec<f64>),
}

impl Value {
    /// Returns the scalar value, or `None` for arrays.
    pub fn scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(v) => Some(*v),
            Value::Array(_) => None,
        }
    }

    /// Returns the array contents, or `None` for scalars.
    pub fn array(&self) -> Option<&[f64]> {
        match self {
            Value::Scalar(_) => None,
            Value::Array(v) => Some(v),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Scalar(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Array(v)
    }
}

/// Snapshot of a node's parent values at evaluation time, keyed by the role
/// names given at construction (e.g. `"mu"`, `"sigma"`).
///
/// Passed to a variable's log-probability and random-draw closures.
#[derive(Debug, Clone, Default)]
pub struct ParentValues(BTreeMap<String, Value>);

impl ParentValues {
    /// Looks up a parent value by role name.
    pub fn get(&self, role: &str) -> Option<&Value> {
        self.0.get(role)
    }

    /// Scalar value of the named parent.
    ///
    /// # Panics
    /// Panics if the parent is absent or array-valued; both indicate a
    /// mistake in the model definition.
    pub fn scalar(&self, role: &str) -> f64 {
        match self.0.get(role) {
            Some(Value::Scalar(v)) => *v,
            Some(Value::Array(_)) => panic!("parent {role:?} is array-valued, expected scalar"),
            None => panic!("no parent named {role:?}"),
        }
    }

    /// Array contents of the named parent.
    ///
    /// # Panics
    /// Panics if the parent is absent or scalar-valued.
    pub fn array(&self, role: &str) -> &[f64] {
        match self.0.get(role) {
            Some(Value::Array(v)) => v,
            Some(Value::Scalar(_)) => panic!("parent {role:?} is scalar, expected array"),
            None => panic!("no parent named {role:?}"),
        }
    }
}

/// Log-probability of a variable given its value and parent values.
pub type LogpFn = Box<dyn Fn(&Value, &ParentValues) -> f64>;

/// Draw from a variable's prior given its parent values. Free variables are
/// scalar, so draws are too.
pub type RandomFn = Box<dyn Fn(&ParentValues, &mut dyn RngCore) -> f64>;

/// A stochastic variable node.
///
/// Holds a mutable current value, parent references by role name, and the
/// closures evaluating its log-probability and (for unobserved variables)
/// drawing from its prior. Construct via [`StochBuilder`].
pub struct Stoch {
    name: String,
    value: Value,
    dtype: DType,
    observed: bool,
    parents: BTreeMap<String, NodeId>,
    logp_fn: LogpFn,
    random_fn: Option<RandomFn>,
}

impl Stoch {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn observed(&self) -> bool {
        self.observed
    }

    /// Parent references by role name.
    pub fn parents(&self) -> &BTreeMap<String, NodeId> {
        &self.parents
    }

    pub fn has_random_fn(&self) -> bool {
        self.random_fn.is_some()
    }
}

impl std::fmt::Debug for Stoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stoch")
            .field("name", &self.name)
            .field("value", &self.value)
            .field("dtype", &self.dtype)
            .field("observed", &self.observed)
            .field("parents", &self.parents)
            .finish_non_exhaustive()
    }
}

/// A node in the model graph: a stochastic variable or a plain constant.
///
/// The explicit variants replace attribute probing: graph traversals
/// dispatch on [`Node::is_stochastic`].
#[derive(Debug)]
pub enum Node {
    Stoch(Stoch),
    Const(Value),
}

impl Node {
    pub fn is_stochastic(&self) -> bool {
        matches!(self, Node::Stoch(_))
    }

    pub fn value(&self) -> &Value {
        match self {
            Node::Stoch(s) => &s.value,
            Node::Const(v) => v,
        }
    }
}

/// Builder for [`Stoch`] nodes.
///
/// Validation happens once, in [`Model::add_stoch`]: a log-probability
/// function is required, observed variables must not carry a random-draw
/// function, and free variables must be scalar.
pub struct StochBuilder {
    name: String,
    value: Option<Value>,
    dtype: DType,
    observed: bool,
    parents: BTreeMap<String, NodeId>,
    logp_fn: Option<LogpFn>,
    random_fn: Option<RandomFn>,
}

impl StochBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: None,
            dtype: DType::F64,
            observed: false,
            parents: BTreeMap::new(),
            logp_fn: None,
            random_fn: None,
        }
    }

    /// Sets the initial scalar value.
    pub fn value(mut self, v: f64) -> Self {
        self.value = Some(Value::Scalar(v));
        self
    }

    /// Sets an array value (observed data).
    pub fn data(mut self, v: Vec<f64>) -> Self {
        self.value = Some(Value::Array(v));
        self
    }

    pub fn dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn observed(mut self, observed: bool) -> Self {
        self.observed = observed;
        self
    }

    /// Registers a parent under a role name. The id must come from the same
    /// model this builder will be added to.
    pub fn parent(mut self, role: &str, id: NodeId) -> Self {
        self.parents.insert(role.to_string(), id);
        self
    }

    pub fn logp(mut self, f: impl Fn(&Value, &ParentValues) -> f64 + 'static) -> Self {
        self.logp_fn = Some(Box::new(f));
        self
    }

    pub fn random(mut self, f: impl Fn(&ParentValues, &mut dyn RngCore) -> f64 + 'static) -> Self {
        self.random_fn = Some(Box::new(f));
        self
    }
}

/// A hierarchical model: an arena of nodes plus the bookkeeping needed to
/// evaluate the joint log-probability and to resolve ancestry depths.
#[derive(Debug, Default)]
pub struct Model {
    nodes: Vec<Node>,
    names: HashMap<String, NodeId>,
    stochs: Vec<NodeId>,
    ancestries: Option<HashMap<String, usize>>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a constant scalar node and returns its id.
    pub fn constant(&mut self, v: f64) -> NodeId {
        self.push(Node::Const(Value::Scalar(v)))
    }

    /// Adds a constant array node (e.g. a fixed data vector used as a
    /// parent) and returns its id.
    pub fn constant_array(&mut self, v: Vec<f64>) -> NodeId {
        self.push(Node::Const(Value::Array(v)))
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Validates and adds a stochastic variable to the model.
    ///
    /// Adding a node invalidates any cached ancestry depths; they are
    /// recomputed on the next [`Model::ancestries`] call.
    pub fn add_stoch(&mut self, builder: StochBuilder) -> Result<NodeId> {
        let StochBuilder {
            name,
            value,
            dtype,
            observed,
            parents,
            logp_fn,
            random_fn,
        } = builder;

        if self.names.contains_key(&name) {
            return Err(Error::DuplicateName { name });
        }
        let logp_fn = logp_fn.ok_or_else(|| Error::MissingLogp { name: name.clone() })?;
        let value = value.ok_or_else(|| Error::MissingValue { name: name.clone() })?;
        if observed && random_fn.is_some() {
            return Err(Error::RandomOnObserved { name });
        }
        if !observed && matches!(value, Value::Array(_)) {
            return Err(Error::NonScalarFree { name });
        }
        for (role, id) in &parents {
            if id.0 >= self.nodes.len() {
                return Err(Error::UnknownParent {
                    name: name.clone(),
                    parent: role.clone(),
                });
            }
        }

        let id = self.push(Node::Stoch(Stoch {
            name: name.clone(),
            value,
            dtype,
            observed,
            parents,
            logp_fn,
            random_fn,
        }));
        self.names.insert(name, id);
        self.stochs.push(id);
        self.ancestries = None;
        Ok(id)
    }

    /// Looks up a stochastic variable's id by name.
    pub fn id(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// The stochastic variable at `id`, or `None` for constants.
    pub fn stoch(&self, id: NodeId) -> Option<&Stoch> {
        match &self.nodes[id.0] {
            Node::Stoch(s) => Some(s),
            Node::Const(_) => None,
        }
    }

    /// Ids of all stochastic variables (observed and unobserved), in
    /// insertion order.
    pub fn stochastics(&self) -> &[NodeId] {
        &self.stochs
    }

    /// Ids of the free (unobserved) variables, in insertion order.
    pub fn free(&self) -> Vec<NodeId> {
        self.stochs
            .iter()
            .copied()
            .filter(|&id| match &self.nodes[id.0] {
                Node::Stoch(s) => !s.observed,
                Node::Const(_) => false,
            })
            .collect()
    }

    /// Current value of a node.
    pub fn value(&self, id: NodeId) -> &Value {
        self.nodes[id.0].value()
    }

    /// Current scalar value of a node.
    ///
    /// # Panics
    /// Panics on array-valued nodes. Free variables are validated to be
    /// scalar at construction, so this is safe for sampling targets.
    pub fn scalar(&self, id: NodeId) -> f64 {
        match self.nodes[id.0].value() {
            Value::Scalar(v) => *v,
            Value::Array(_) => panic!("node {:?} is array-valued, expected scalar", id),
        }
    }

    /// Overwrites a stochastic variable's value.
    ///
    /// # Panics
    /// Panics if `id` refers to a constant node.
    pub fn set_value(&mut self, id: NodeId, value: Value) {
        match &mut self.nodes[id.0] {
            Node::Stoch(s) => s.value = value,
            Node::Const(_) => panic!("cannot assign to constant node {:?}", id),
        }
    }

    /// Overwrites a stochastic variable's value with a scalar.
    pub fn set_scalar(&mut self, id: NodeId, v: f64) {
        self.set_value(id, Value::Scalar(v));
    }

    /// Adds `delta` to a free variable's current value in place.
    pub fn nudge(&mut self, id: NodeId, delta: f64) {
        let v = self.scalar(id);
        self.set_scalar(id, v + delta);
    }

    /// Snapshot of the named parents' current values for the node at `id`.
    pub fn parent_values(&self, id: NodeId) -> ParentValues {
        let mut values = BTreeMap::new();
        if let Node::Stoch(s) = &self.nodes[id.0] {
            for (role, pid) in &s.parents {
                values.insert(role.clone(), self.nodes[pid.0].value().clone());
            }
        }
        ParentValues(values)
    }

    /// Joint log-probability of the model's current state: the sum over all
    /// stochastic variables, observed and unobserved.
    pub fn logp(&self) -> f64 {
        let mut total = 0.0;
        for &id in &self.stochs {
            if let Node::Stoch(s) = &self.nodes[id.0] {
                let parents = self.parent_values(id);
                total += (s.logp_fn)(&s.value, &parents);
            }
        }
        total
    }

    /// Draws a free variable's value from its prior given the current
    /// parent values, mutating it in place.
    pub fn draw_from_prior(&mut self, id: NodeId, rng: &mut dyn RngCore) -> Result<()> {
        let parents = self.parent_values(id);
        let drawn = match &self.nodes[id.0] {
            Node::Stoch(s) => match &s.random_fn {
                Some(f) => f(&parents, rng),
                None => {
                    return Err(Error::MissingRandomFn {
                        name: s.name.clone(),
                    })
                }
            },
            Node::Const(_) => panic!("cannot draw a prior sample for constant node {:?}", id),
        };
        self.set_scalar(id, drawn);
        Ok(())
    }

    /// Ancestry depth of every free variable, computed once and cached.
    ///
    /// The cache is cleared when the graph changes structurally (a node is
    /// added); callers holding depths across edits should re-fetch them.
    pub fn ancestries(&mut self) -> &HashMap<String, usize> {
        if self.ancestries.is_none() {
            let traced = ancestry::trace_ancestries(self);
            self.ancestries = Some(traced);
        }
        match &self.ancestries {
            Some(a) => a,
            None => unreachable!(),
        }
    }

    /// Free-variable ids ordered shallowest-first by ancestry depth, with
    /// name order breaking ties. This is the order used for per-parameter
    /// tuning and prior propagation.
    pub fn free_by_depth(&mut self) -> Vec<NodeId> {
        let depths = self.ancestries().clone();
        let mut free = self.free();
        free.sort_by_key(|&id| {
            let name = match &self.nodes[id.0] {
                Node::Stoch(s) => s.name.clone(),
                Node::Const(_) => String::new(),
            };
            (depths.get(&name).copied().unwrap_or(1), name)
        });
        free
    }
}
