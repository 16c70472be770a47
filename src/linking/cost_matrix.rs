//! Cost matrix creators: turn candidate objects into a sparse LAP.

use log::debug;

use crate::error::{Result, TrackingError};
use crate::linking::cost_function::CostFunction;
use crate::linking::sparse_matrix::SparseCostMatrix;

/// A linking problem ready for the solver.
///
/// Rows are `sources`, columns are `targets`. The alternative costs give
/// the price of leaving each row or column unlinked.
#[derive(Debug, Clone)]
pub struct CostMatrix<K, J> {
    pub matrix: SparseCostMatrix,
    pub sources: Vec<K>,
    pub targets: Vec<J>,
    pub row_alternative_costs: Vec<f64>,
    pub column_alternative_costs: Vec<f64>,
}

impl<K, J> CostMatrix<K, J> {
    /// Builds a problem whose rows and columns share one alternative cost.
    pub fn with_alternative_cost(
        matrix: SparseCostMatrix,
        sources: Vec<K>,
        targets: Vec<J>,
        alternative_cost: f64,
    ) -> Result<Self> {
        if !alternative_cost.is_finite() || alternative_cost < 0.0 {
            return Err(TrackingError::Matrix(format!(
                "alternative cost must be finite and non-negative, got {}",
                alternative_cost
            )));
        }
        if matrix.n_rows() != sources.len() || matrix.n_cols() != targets.len() {
            return Err(TrackingError::Matrix(format!(
                "a {}x{} matrix cannot link {} sources to {} targets",
                matrix.n_rows(),
                matrix.n_cols(),
                sources.len(),
                targets.len()
            )));
        }
        Ok(Self {
            row_alternative_costs: vec![alternative_cost; sources.len()],
            column_alternative_costs: vec![alternative_cost; targets.len()],
            matrix,
            sources,
            targets,
        })
    }
}

/// Produces the cost matrix of one linking problem.
///
/// `Ok(None)` means no candidate pair passed the threshold: the problem has
/// zero links, which is not an error.
pub trait CostMatrixCreator {
    type Source;
    type Target;

    fn create(&self) -> Result<Option<CostMatrix<Self::Source, Self::Target>>>;
}

impl<C: CostMatrixCreator + ?Sized> CostMatrixCreator for &C {
    type Source = C::Source;
    type Target = C::Target;

    fn create(&self) -> Result<Option<CostMatrix<Self::Source, Self::Target>>> {
        (**self).create()
    }
}

/// Nearest-rank percentile of `values`, `p` in `(0, 1]`. `p = 1` is the
/// maximum. Returns `NaN` on an empty slice.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let rank = ((p * n as f64).ceil() as usize).clamp(1, n);
    sorted[rank - 1]
}

/// Exhaustive source × target creator used for frame-to-frame linking.
///
/// Every pair is evaluated; pairs costing at least `cost_threshold` are
/// dropped. Only sources and targets with at least one candidate become
/// rows and columns. The alternative cost is
/// `alternative_cost_factor × percentile(candidate costs)`.
pub struct LinkingCostMatrixCreator<'a, S, T, F> {
    sources: &'a [S],
    targets: &'a [T],
    cost_function: &'a F,
    cost_threshold: f64,
    alternative_cost_factor: f64,
    percentile: f64,
}

impl<'a, S, T, F> LinkingCostMatrixCreator<'a, S, T, F>
where
    S: Clone,
    T: Clone,
    F: CostFunction<S, T>,
{
    pub fn new(
        sources: &'a [S],
        targets: &'a [T],
        cost_function: &'a F,
        cost_threshold: f64,
        alternative_cost_factor: f64,
        percentile: f64,
    ) -> Self {
        Self {
            sources,
            targets,
            cost_function,
            cost_threshold,
            alternative_cost_factor,
            percentile,
        }
    }

    fn check_input(&self) -> Result<()> {
        if !(self.cost_threshold.is_finite() && self.cost_threshold > 0.0) {
            return Err(TrackingError::Config(format!(
                "cost threshold must be strictly positive and finite, got {}",
                self.cost_threshold
            )));
        }
        if !(self.alternative_cost_factor.is_finite() && self.alternative_cost_factor > 0.0) {
            return Err(TrackingError::Config(format!(
                "alternative cost factor must be strictly positive and finite, got {}",
                self.alternative_cost_factor
            )));
        }
        if !(self.percentile > 0.0 && self.percentile <= 1.0) {
            return Err(TrackingError::Config(format!(
                "percentile must be in ]0, 1], got {}",
                self.percentile
            )));
        }
        Ok(())
    }
}

impl<S, T, F> CostMatrixCreator for LinkingCostMatrixCreator<'_, S, T, F>
where
    S: Clone,
    T: Clone,
    F: CostFunction<S, T>,
{
    type Source = S;
    type Target = T;

    fn create(&self) -> Result<Option<CostMatrix<S, T>>> {
        self.check_input()?;

        let mut candidates = Vec::new();
        let mut accepted_targets = vec![false; self.targets.len()];
        let mut accepted_sources = Vec::new();
        for (i, source) in self.sources.iter().enumerate() {
            let before = candidates.len();
            for (j, target) in self.targets.iter().enumerate() {
                let cost = self.cost_function.linking_cost(source, target);
                if cost < self.cost_threshold {
                    candidates.push((i, j, cost));
                    accepted_targets[j] = true;
                }
            }
            if candidates.len() > before {
                accepted_sources.push(i);
            }
        }

        if candidates.is_empty() {
            debug!(
                "No candidate under {} among {} x {} pairs",
                self.cost_threshold,
                self.sources.len(),
                self.targets.len()
            );
            return Ok(None);
        }

        // Compact column indices onto the accepted targets only.
        let mut column_of = vec![usize::MAX; self.targets.len()];
        let mut targets = Vec::new();
        for (j, _) in accepted_targets.iter().enumerate().filter(|(_, a)| **a) {
            column_of[j] = targets.len();
            targets.push(self.targets[j].clone());
        }

        let mut row_of = vec![usize::MAX; self.sources.len()];
        let sources = accepted_sources
            .iter()
            .enumerate()
            .map(|(row, &i)| {
                row_of[i] = row;
                self.sources[i].clone()
            })
            .collect::<Vec<_>>();

        let costs: Vec<f64> = candidates.iter().map(|c| c.2).collect();
        let triplets = candidates
            .into_iter()
            .map(|(i, j, c)| (row_of[i], column_of[j], c))
            .collect();
        let matrix = SparseCostMatrix::from_triplets(sources.len(), targets.len(), triplets)?;

        // A zero alternative cost would tie every zero-cost link with leaving
        // both ends unlinked.
        let alternative_cost = (self.alternative_cost_factor * percentile(&costs, self.percentile))
            .max(f64::MIN_POSITIVE);
        debug!(
            "{} candidates for {} sources and {} targets, alternative cost {:.3}",
            costs.len(),
            sources.len(),
            targets.len(),
            alternative_cost
        );

        CostMatrix::with_alternative_cost(matrix, sources, targets, alternative_cost).map(Some)
    }
}
