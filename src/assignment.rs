//! Linear sum assignment (minimum-cost bipartite matching).
//!
//! Shortest augmenting path formulation of the Hungarian algorithm with
//! row/column potentials, `O(n^2 m)` for an `n x m` matrix with `n <= m`.
//! Wider-than-tall inputs are solved on the transpose.

use crate::error::ModelError;
use crate::tensor::Matrix;

/// Minimum-cost one-to-one assignment of rows to columns.
///
/// Returns `min(n, m)` `(row, col)` pairs sorted by row.
pub fn linear_sum_assignment(cost: &Matrix) -> Result<Vec<(usize, usize)>, ModelError> {
    let (n, m) = cost.shape();
    if n == 0 || m == 0 {
        return Ok(Vec::new());
    }
    if !cost.all_finite() {
        return Err(ModelError::Assignment {
            message: "cost matrix contains NaN or infinite values".into(),
        });
    }
    if n <= m {
        return Ok(solve(cost));
    }
    let mut pairs: Vec<(usize, usize)> = solve(&cost.transpose())
        .into_iter()
        .map(|(c, r)| (r, c))
        .collect();
    pairs.sort_unstable();
    Ok(pairs)
}

/// Assignment maximising total similarity.
pub fn maximize_similarity(sim: &Matrix) -> Result<Vec<(usize, usize)>, ModelError> {
    linear_sum_assignment(&sim.map(|x| -x))
}

/// Requires `rows <= cols`.
fn solve(cost: &Matrix) -> Vec<(usize, usize)> {
    let (n, m) = cost.shape();
    debug_assert!(n <= m);
    // 1-based; column 0 and row 0 are sentinels.
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; m + 1];
    let mut row_of = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        row_of[0] = i;
        let mut j0 = 0usize;
        let mut min_v = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];
        loop {
            used[j0] = true;
            let i0 = row_of[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;
            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let reduced = f64::from(cost.get(i0 - 1, j - 1)) - u[i0] - v[j];
                if reduced < min_v[j] {
                    min_v[j] = reduced;
                    way[j] = j0;
                }
                if min_v[j] < delta {
                    delta = min_v[j];
                    j1 = j;
                }
            }
            for j in 0..=m {
                if used[j] {
                    u[row_of[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_v[j] -= delta;
                }
            }
            j0 = j1;
            if row_of[j0] == 0 {
                break;
            }
        }
        // Flip the augmenting path.
        loop {
            let j1 = way[j0];
            row_of[j0] = row_of[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut pairs: Vec<(usize, usize)> = (1..=m)
        .filter(|&j| row_of[j] != 0)
        .map(|j| (row_of[j] - 1, j - 1))
        .collect();
    pairs.sort_unstable();
    pairs
}
