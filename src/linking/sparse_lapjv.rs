//! Jonker-Volgenant linear assignment on a sparse square cost matrix.
//!
//! Missing cells are forbidden assignments. The solver runs a column
//! reduction with reduction transfer, then one shortest augmenting path
//! (Dijkstra over reduced costs) per row left free.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{Result, TrackingError};
use crate::linking::sparse_matrix::SparseCostMatrix;

/// Solves the LAP and returns, for each row, its assigned column.
pub fn lapjv(cost: &SparseCostMatrix) -> Result<Vec<usize>> {
    let n = cost.n_rows();
    if n != cost.n_cols() {
        return Err(TrackingError::Solver(format!(
            "cost matrix must be square, got {}x{}",
            n,
            cost.n_cols()
        )));
    }
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut x: Vec<Option<usize>> = vec![None; n];
    let mut y: Vec<Option<usize>> = vec![None; n];
    let mut v = vec![f64::INFINITY; n];

    let free_rows = column_reduction(cost, &mut x, &mut y, &mut v)?;
    for free_row in free_rows {
        let (final_j, pred) = find_path(cost, free_row, &y, &mut v)?;
        augment(free_row, final_j, &pred, &mut x, &mut y);
    }

    x.into_iter()
        .enumerate()
        .map(|(i, j)| {
            j.ok_or_else(|| TrackingError::Solver(format!("row {} left unassigned", i)))
        })
        .collect()
}

/// Assigns each column to its cheapest row, keeps one column per row, and
/// transfers the slack of uniquely assigned rows to their column price.
/// Returns the rows left free.
fn column_reduction(
    cost: &SparseCostMatrix,
    x: &mut [Option<usize>],
    y: &mut [Option<usize>],
    v: &mut [f64],
) -> Result<Vec<usize>> {
    let n = cost.n_rows();
    for i in 0..n {
        for (j, c) in cost.row(i) {
            if c < v[j] {
                v[j] = c;
                y[j] = Some(i);
            }
        }
    }
    if let Some(j) = v.iter().position(|p| !p.is_finite()) {
        return Err(TrackingError::Solver(format!(
            "column {} has no entry, no complete assignment exists",
            j
        )));
    }

    let mut unique = vec![true; n];
    for j in (0..n).rev() {
        if let Some(i) = y[j] {
            if x[i].is_none() {
                x[i] = Some(j);
            } else {
                unique[i] = false;
                y[j] = None;
            }
        }
    }

    let mut free_rows = Vec::new();
    for i in 0..n {
        match x[i] {
            None => free_rows.push(i),
            Some(j) if unique[i] => {
                let min = cost
                    .row(i)
                    .filter(|&(k, _)| k != j)
                    .map(|(k, c)| c - v[k])
                    .fold(f64::INFINITY, f64::min);
                if min.is_finite() {
                    v[j] -= min;
                }
            }
            Some(_) => {}
        }
    }
    Ok(free_rows)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    dist: f64,
    assigned: bool,
    col: usize,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    // Reversed so that `BinaryHeap` pops the shortest distance first, free
    // columns before assigned ones on ties.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .dist
            .total_cmp(&self.dist)
            .then(other.assigned.cmp(&self.assigned))
            .then(other.col.cmp(&self.col))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Dijkstra from `start_i` over reduced costs until a free column is
/// reached. Updates the column prices of every scanned column and returns
/// the free column with the predecessor row of each column.
fn find_path(
    cost: &SparseCostMatrix,
    start_i: usize,
    y: &[Option<usize>],
    v: &mut [f64],
) -> Result<(usize, Vec<usize>)> {
    let n = cost.n_rows();
    let mut d = vec![f64::INFINITY; n];
    let mut pred = vec![start_i; n];
    let mut scanned = vec![false; n];
    let mut ready = Vec::new();
    let mut heap = BinaryHeap::new();

    for (j, c) in cost.row(start_i) {
        d[j] = c - v[j];
        heap.push(Candidate {
            dist: d[j],
            assigned: y[j].is_some(),
            col: j,
        });
    }

    let (final_j, mind) = loop {
        let Some(Candidate { dist, col: j, .. }) = heap.pop() else {
            return Err(TrackingError::Solver(format!(
                "no augmenting path from row {}",
                start_i
            )));
        };
        if scanned[j] || dist > d[j] {
            continue;
        }
        let Some(i) = y[j] else {
            break (j, dist);
        };
        scanned[j] = true;
        ready.push(j);

        // Row i holds j, and j is its cheapest reduced cost.
        let h = cost.get(i, j, f64::NAN) - v[j] - dist;
        for (k, c) in cost.row(i) {
            if scanned[k] {
                continue;
            }
            let cred = c - v[k] - h;
            if cred < d[k] {
                d[k] = cred;
                pred[k] = i;
                heap.push(Candidate {
                    dist: cred,
                    assigned: y[k].is_some(),
                    col: k,
                });
            }
        }
    };

    for j in ready {
        v[j] += d[j] - mind;
    }
    Ok((final_j, pred))
}

/// Flips the alternating path ending at the free column `final_j`.
fn augment(
    start_i: usize,
    final_j: usize,
    pred: &[usize],
    x: &mut [Option<usize>],
    y: &mut [Option<usize>],
) {
    let mut j = final_j;
    loop {
        let i = pred[j];
        y[j] = Some(i);
        let previous = x[i].replace(j);
        match previous {
            Some(prev_j) if i != start_i => j = prev_j,
            _ => break,
        }
    }
}
