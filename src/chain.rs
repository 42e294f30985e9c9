/*!
# Chain Output

The [`Chain`] type records a sampling run: one fixed-length series per free
variable plus parallel `logp` and `accepted` series. Chains are
preallocated to the run length, filled in step order by the sampling loop,
and immutable afterwards. Post-processing (burn-in removal, thinning,
combining runs) produces new chains.
*/

use std::collections::HashMap;

use ndarray::Array1;
use ndarray_stats::QuantileExt;

use crate::error::{Error, Result};
use crate::model::DType;

/// Recorded samples from one run: per-parameter series plus the joint
/// log-probability and accept flag at every step.
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    names: Vec<String>,
    dtypes: HashMap<String, DType>,
    values: HashMap<String, Array1<f64>>,
    logp: Array1<f64>,
    accepted: Array1<u8>,
}

/// Summary statistics for one recorded series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesSummary {
    pub mean: f64,
    pub var: f64,
    pub min: f64,
    pub max: f64,
}

impl Chain {
    /// Allocates an all-zero chain of length `nsteps` for the given
    /// parameters. The sampling loop fills it in step order.
    pub fn preallocated(params: Vec<(String, DType)>, nsteps: usize) -> Self {
        let mut names = Vec::with_capacity(params.len());
        let mut dtypes = HashMap::new();
        let mut values = HashMap::new();
        for (name, dtype) in params {
            values.insert(name.clone(), Array1::zeros(nsteps));
            dtypes.insert(name.clone(), dtype);
            names.push(name);
        }
        Self {
            names,
            dtypes,
            values,
            logp: Array1::zeros(nsteps),
            accepted: Array1::zeros(nsteps),
        }
    }

    /// Records step `i`: one value per parameter (in [`Chain::names`]
    /// order), the post-decision joint log-probability, and the accept
    /// flag. Integer-typed parameters are truncated on recording.
    pub(crate) fn record(&mut self, i: usize, step_values: &[f64], logp: f64, accepted: bool) {
        for (name, &v) in self.names.iter().zip(step_values) {
            let recorded = match self.dtypes.get(name) {
                Some(DType::I64) => v.trunc(),
                _ => v,
            };
            if let Some(series) = self.values.get_mut(name) {
                series[i] = recorded;
            }
        }
        self.logp[i] = logp;
        self.accepted[i] = accepted as u8;
    }

    /// Number of recorded steps.
    pub fn len(&self) -> usize {
        self.logp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logp.is_empty()
    }

    /// Parameter names, in recording order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn dtype(&self, name: &str) -> Option<DType> {
        self.dtypes.get(name).copied()
    }

    /// The recorded series for one parameter.
    pub fn values(&self, name: &str) -> Option<&Array1<f64>> {
        self.values.get(name)
    }

    /// Joint log-probability after each step.
    pub fn logp(&self) -> &Array1<f64> {
        &self.logp
    }

    /// Accept flag (0/1) for each step.
    pub fn accepted(&self) -> &Array1<u8> {
        &self.accepted
    }

    /// Fraction of steps accepted over the whole run.
    pub fn acceptance_fraction(&self) -> f64 {
        if self.accepted.is_empty() {
            return 0.0;
        }
        self.accepted.iter().map(|&a| a as usize).sum::<usize>() as f64
            / self.accepted.len() as f64
    }

    /// Mean, variance (with one delta degree of freedom), and range of one
    /// parameter's series. `None` for unknown parameters or empty chains.
    pub fn summary(&self, name: &str) -> Option<SeriesSummary> {
        let series = self.values.get(name)?;
        let mean = series.mean()?;
        let var = series.var(1.0);
        let min = series.min().ok().copied()?;
        let max = series.max().ok().copied()?;
        Some(SeriesSummary {
            mean,
            var,
            min,
            max,
        })
    }

    /// Returns a new chain with the first `nburn` steps dropped and every
    /// `thin`-th remaining step kept. A `thin` of 0 is treated as 1.
    pub fn thin(&self, nburn: usize, thin: usize) -> Chain {
        let thin = thin.max(1);
        let keep: Vec<usize> = (nburn..self.len()).step_by(thin).collect();
        let gather = |series: &Array1<f64>| -> Array1<f64> {
            keep.iter().map(|&i| series[i]).collect()
        };
        Chain {
            names: self.names.clone(),
            dtypes: self.dtypes.clone(),
            values: self
                .values
                .iter()
                .map(|(name, series)| (name.clone(), gather(series)))
                .collect(),
            logp: gather(&self.logp),
            accepted: keep.iter().map(|&i| self.accepted[i]).collect(),
        }
    }

    /// Combines several runs into one chain, dropping `nburn` steps from
    /// the start of each and thinning by `thin` before concatenating.
    ///
    /// All chains must record the same parameters.
    pub fn combine(chains: &[Chain], nburn: usize, thin: usize) -> Result<Chain> {
        let first = chains.first().ok_or(Error::ChainMismatch)?;
        if chains.iter().any(|c| c.names != first.names) {
            return Err(Error::ChainMismatch);
        }
        let thinned: Vec<Chain> = chains.iter().map(|c| c.thin(nburn, thin)).collect();
        let mut values = HashMap::new();
        for name in &first.names {
            let mut series = Vec::new();
            for c in &thinned {
                if let Some(part) = c.values.get(name) {
                    series.extend(part.iter().copied());
                }
            }
            values.insert(name.clone(), Array1::from_vec(series));
        }
        let logp: Array1<f64> = thinned
            .iter()
            .flat_map(|c| c.logp.iter().copied())
            .collect();
        let accepted: Array1<u8> = thinned
            .iter()
            .flat_map(|c| c.accepted.iter().copied())
            .collect();
        Ok(Chain {
            names: first.names.clone(),
            dtypes: first.dtypes.clone(),
            values,
            logp,
            accepted,
        })
    }
}
