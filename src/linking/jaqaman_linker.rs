//! LAP linking over the augmented matrix of Jaqaman et al. (2008).
//!
//! For `R` sources and `T` targets with real costs `C` (R×T), the solver
//! sees the (R+T)×(T+R) matrix
//!
//! ```text
//! | C          diag(row alt) |
//! | diag(col alt)   Cᵗ ← m   |
//! ```
//!
//! where the bottom-right block is `Cᵗ` with every cell set to the
//! smallest alternative cost `m`. Assigning a row into the top-right block
//! or a column from the bottom-left block means "no link".

use std::collections::BTreeMap;

use log::debug;

use crate::error::Result;
use crate::linking::cost_matrix::{CostMatrix, CostMatrixCreator};
use crate::linking::sparse_lapjv::lapjv;
use crate::linking::sparse_matrix::SparseCostMatrix;

/// Accepted links of one LAP, keyed by source.
#[derive(Debug, Clone)]
pub struct Assignment<K, J> {
    links: BTreeMap<K, (J, f64)>,
}

impl<K: Ord, J> Default for Assignment<K, J> {
    fn default() -> Self {
        Self {
            links: BTreeMap::new(),
        }
    }
}

impl<K: Ord, J> Assignment<K, J> {
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Target assigned to `source`, if any.
    pub fn target(&self, source: &K) -> Option<&J> {
        self.links.get(source).map(|(t, _)| t)
    }

    /// Cost of the link leaving `source`, if any.
    pub fn cost(&self, source: &K) -> Option<f64> {
        self.links.get(source).map(|(_, c)| *c)
    }

    /// Links as `(source, target, cost)`, ordered by source.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &J, f64)> {
        self.links.iter().map(|(s, (t, c))| (s, t, *c))
    }

    /// Sum of the costs of the accepted links.
    pub fn total_cost(&self) -> f64 {
        self.links.values().map(|(_, c)| c).sum()
    }
}

impl<K, J> IntoIterator for Assignment<K, J> {
    type Item = (K, (J, f64));
    type IntoIter = std::collections::btree_map::IntoIter<K, (J, f64)>;

    fn into_iter(self) -> Self::IntoIter {
        self.links.into_iter()
    }
}

/// Assembles the augmented matrix of a linking problem.
pub fn augmented_matrix<K, J>(cm: &CostMatrix<K, J>) -> Result<SparseCostMatrix> {
    let min_alternative = cm
        .row_alternative_costs
        .iter()
        .chain(cm.column_alternative_costs.iter())
        .copied()
        .fold(f64::INFINITY, f64::min);

    let top_right = SparseCostMatrix::diagonal(&cm.row_alternative_costs)?;
    let bottom_left = SparseCostMatrix::diagonal(&cm.column_alternative_costs)?;
    let mut bottom_right = cm.matrix.transpose();
    bottom_right.fill_with(min_alternative)?;

    let top = cm.matrix.hcat(&top_right)?;
    let bottom = bottom_left.hcat(&bottom_right)?;
    // At most two copies of the dense block are alive at once.
    drop(bottom_right);
    top.vcat(&bottom)
}

/// Solves the LAP produced by a [`CostMatrixCreator`].
pub struct JaqamanLinker<C> {
    creator: C,
}

impl<C> JaqamanLinker<C> {
    pub fn new(creator: C) -> Self {
        Self { creator }
    }

    /// Runs the creator and the solver. A creator that finds no candidate
    /// yields an empty assignment.
    pub fn process(&self) -> Result<Assignment<C::Source, C::Target>>
    where
        C: CostMatrixCreator,
        C::Source: Ord + Clone,
        C::Target: Clone,
    {
        let Some(cm) = self.creator.create()? else {
            return Ok(Assignment::default());
        };

        let n_sources = cm.sources.len();
        let n_targets = cm.targets.len();
        let full = augmented_matrix(&cm)?;
        let row_to_col = lapjv(&full)?;

        let mut links = BTreeMap::new();
        for (i, &j) in row_to_col.iter().take(n_sources).enumerate() {
            if j < n_targets {
                let cost = cm.matrix.get(i, j, f64::NAN);
                links.insert(cm.sources[i].clone(), (cm.targets[j].clone(), cost));
            }
        }
        debug!(
            "Linked {} of {} sources to {} targets",
            links.len(),
            n_sources,
            n_targets
        );
        Ok(Assignment { links })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackingError;
    use rand::Rng;

    struct Fixed(Option<CostMatrix<usize, usize>>);

    impl CostMatrixCreator for Fixed {
        type Source = usize;
        type Target = usize;

        fn create(&self) -> Result<Option<CostMatrix<usize, usize>>> {
            Ok(self.0.clone())
        }
    }

    fn problem(
        n_rows: usize,
        n_cols: usize,
        triplets: Vec<(usize, usize, f64)>,
        alternative_cost: f64,
    ) -> CostMatrix<usize, usize> {
        let matrix = SparseCostMatrix::from_triplets(n_rows, n_cols, triplets).unwrap();
        CostMatrix::with_alternative_cost(
            matrix,
            (0..n_rows).collect(),
            (100..100 + n_cols).collect(),
            alternative_cost,
        )
        .unwrap()
    }

    /// Minimum of the original objective: linked costs, plus the row or
    /// column alternative cost for everything left unlinked, plus the
    /// bottom-right cost once per link.
    fn brute_force(cm: &CostMatrix<usize, usize>) -> f64 {
        fn go(
            cm: &CostMatrix<usize, usize>,
            row: usize,
            used: &mut Vec<bool>,
            links: usize,
            acc: f64,
            best: &mut f64,
        ) {
            let alt = cm.row_alternative_costs[0];
            if row == cm.sources.len() {
                let unlinked = cm.sources.len() + cm.targets.len() - 2 * links;
                *best = best.min(acc + unlinked as f64 * alt + links as f64 * alt);
                return;
            }
            go(cm, row + 1, used, links, acc, best);
            for (j, c) in cm.matrix.row(row) {
                if !used[j] {
                    used[j] = true;
                    go(cm, row + 1, used, links + 1, acc + c, best);
                    used[j] = false;
                }
            }
        }
        let mut best = f64::INFINITY;
        go(cm, 0, &mut vec![false; cm.targets.len()], 0, 0.0, &mut best);
        best
    }

    fn augmented_cost(cm: &CostMatrix<usize, usize>, assignment: &Assignment<usize, usize>) -> f64 {
        let alt = cm.row_alternative_costs[0];
        let links = assignment.len();
        let unlinked = cm.sources.len() + cm.targets.len() - 2 * links;
        assignment.total_cost() + unlinked as f64 * alt + links as f64 * alt
    }

    #[test]
    fn test_augmented_matrix_layout() {
        let cm = problem(2, 1, vec![(0, 0, 3.0), (1, 0, 4.0)], 5.0);
        let full = augmented_matrix(&cm).unwrap();
        assert_eq!(full.n_rows(), 3);
        assert_eq!(full.n_cols(), 3);
        assert_eq!(full.get(0, 0, -1.0), 3.0);
        assert_eq!(full.get(1, 0, -1.0), 4.0);
        assert_eq!(full.get(0, 1, -1.0), 5.0);
        assert_eq!(full.get(1, 2, -1.0), 5.0);
        assert_eq!(full.get(0, 2, -1.0), -1.0);
        assert_eq!(full.get(2, 0, -1.0), 5.0);
        assert_eq!(full.get(2, 1, -1.0), 5.0);
        assert_eq!(full.get(2, 2, -1.0), 5.0);
    }

    #[test]
    fn test_prefers_no_link_over_expensive_link() {
        let cm = problem(1, 1, vec![(0, 0, 100.0)], 1.0);
        let assignment = JaqamanLinker::new(Fixed(Some(cm))).process().unwrap();
        assert!(assignment.is_empty());
    }

    #[test]
    fn test_links_cheap_pairs() {
        let cm = problem(
            2,
            2,
            vec![(0, 0, 1.0), (0, 1, 2.0), (1, 0, 2.0), (1, 1, 1.0)],
            2.1,
        );
        let assignment = JaqamanLinker::new(Fixed(Some(cm))).process().unwrap();
        assert_eq!(assignment.len(), 2);
        assert_eq!(assignment.target(&0), Some(&100));
        assert_eq!(assignment.target(&1), Some(&101));
        assert_eq!(assignment.cost(&1), Some(1.0));
        assert_eq!(assignment.total_cost(), 2.0);
    }

    #[test]
    fn test_global_optimum_beats_greedy() {
        // Greedy would take (0 -> 0) at cost 1 and strand row 1.
        let cm = problem(2, 2, vec![(0, 0, 1.0), (0, 1, 2.0), (1, 0, 2.0)], 10.0);
        let assignment = JaqamanLinker::new(Fixed(Some(cm))).process().unwrap();
        assert_eq!(assignment.target(&0), Some(&101));
        assert_eq!(assignment.target(&1), Some(&100));
    }

    #[test]
    fn test_no_matrix_gives_empty_assignment() {
        let assignment = JaqamanLinker::new(Fixed(None)).process().unwrap();
        assert!(assignment.is_empty());
    }

    #[test]
    fn test_negative_alternative_cost_is_rejected() {
        let matrix = SparseCostMatrix::from_triplets(1, 1, vec![(0, 0, 1.0)]).unwrap();
        let res = CostMatrix::with_alternative_cost(matrix, vec![0usize], vec![0usize], -1.0);
        assert!(matches!(res, Err(TrackingError::Matrix(_))));
    }

    #[test]
    fn test_matches_brute_force_on_small_problems() {
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let n_rows = rng.gen_range(1..=4);
            let n_cols = rng.gen_range(1..=4);
            let mut triplets = Vec::new();
            for i in 0..n_rows {
                for j in 0..n_cols {
                    if rng.gen_bool(0.6) {
                        triplets.push((i, j, rng.gen_range(0.0..10.0)));
                    }
                }
            }
            let alt = rng.gen_range(0.5..8.0);
            let cm = problem(n_rows, n_cols, triplets, alt);
            let expected = brute_force(&cm);
            let assignment = JaqamanLinker::new(Fixed(Some(cm.clone()))).process().unwrap();
            assert!(
                (augmented_cost(&cm, &assignment) - expected).abs() < 1e-9,
                "expected {}, got {}",
                expected,
                augmented_cost(&cm, &assignment)
            );
        }
    }
}
