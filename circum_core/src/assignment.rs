//! Minimum-cost one-to-one assignment (Hungarian / Kuhn–Munkres).
//!
//! Works on rectangular cost matrices: every row is matched when there are
//! fewer rows than columns, every column otherwise. Runs in O(n²·m) using
//! row/column potentials and shortest augmenting paths.

use nalgebra::DMatrix;

/// Stand-in for NaN or infinite costs so the augmenting search always terminates.
const UNREACHABLE_COST: f64 = 1.0e12;

/// Solve the assignment problem for `costs` (rows × columns).
///
/// Returns `(row, column)` pairs sorted by row. The total cost of the
/// returned pairs is minimal among all maximum-cardinality matchings.
pub fn solve(costs: &DMatrix<f64>) -> Vec<(usize, usize)> {
    let (rows, cols) = costs.shape();
    if rows == 0 || cols == 0 {
        return Vec::new();
    }

    if rows > cols {
        let mut pairs: Vec<(usize, usize)> = solve(&costs.transpose())
            .into_iter()
            .map(|(col, row)| (row, col))
            .collect();
        pairs.sort_unstable();
        return pairs;
    }

    let cost = |r: usize, c: usize| {
        let value = costs[(r, c)];
        if value.is_finite() {
            value
        } else {
            UNREACHABLE_COST
        }
    };

    // 1-based indices; column 0 is the virtual source of each augmenting path.
    let mut u = vec![0.0; rows + 1];
    let mut v = vec![0.0; cols + 1];
    let mut matched_row = vec![0usize; cols + 1];
    let mut way = vec![0usize; cols + 1];

    for row in 1..=rows {
        matched_row[0] = row;
        let mut j0 = 0;
        let mut min_slack = vec![f64::INFINITY; cols + 1];
        let mut used = vec![false; cols + 1];

        loop {
            used[j0] = true;
            let i0 = matched_row[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0;

            for j in 1..=cols {
                if used[j] {
                    continue;
                }
                let reduced = cost(i0 - 1, j - 1) - u[i0] - v[j];
                if reduced < min_slack[j] {
                    min_slack[j] = reduced;
                    way[j] = j0;
                }
                if min_slack[j] < delta {
                    delta = min_slack[j];
                    j1 = j;
                }
            }

            for j in 0..=cols {
                if used[j] {
                    u[matched_row[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_slack[j] -= delta;
                }
            }

            j0 = j1;
            if matched_row[j0] == 0 {
                break;
            }
        }

        // Flip the augmenting path
        loop {
            let j1 = way[j0];
            matched_row[j0] = matched_row[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut pairs: Vec<(usize, usize)> = (1..=cols)
        .filter(|&j| matched_row[j] != 0)
        .map(|j| (matched_row[j] - 1, j - 1))
        .collect();
    pairs.sort_unstable();
    pairs
}
