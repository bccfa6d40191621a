//! Parallel nearest-neighbour search over precomputed distance matrices.
//!
//! Used to pick hard negatives: for every training entity, the entities of the
//! same graph whose current embeddings are closest to it.

use rayon::prelude::*;

use crate::tensor::Matrix;

/// Indices of the `k` smallest entries of `row`, ascending by value,
/// skipping index `skip`.
fn k_smallest(row: &[f32], skip: usize, k: usize) -> Vec<usize> {
    let mut candidates: Vec<(f32, usize)> = row
        .iter()
        .enumerate()
        .filter(|&(j, _)| j != skip)
        .map(|(j, &d)| (d, j))
        .collect();
    let k = k.min(candidates.len());
    if k == 0 {
        return Vec::new();
    }
    let cmp = |a: &(f32, usize), b: &(f32, usize)| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1));
    if k < candidates.len() {
        candidates.select_nth_unstable_by(k - 1, cmp);
        candidates.truncate(k);
    }
    candidates.sort_unstable_by(cmp);
    candidates.into_iter().map(|(_, j)| j).collect()
}

/// For every row `i` of the square matrix `dist` (distances among `ids`),
/// the ids of its `k` nearest other members, closest first.
///
/// `k` is clamped to `ids.len() - 1`.
pub fn nearest_neighbors(dist: &Matrix, ids: &[usize], k: usize) -> Vec<Vec<usize>> {
    debug_assert_eq!(dist.rows(), ids.len());
    debug_assert_eq!(dist.cols(), ids.len());
    (0..dist.rows())
        .into_par_iter()
        .map(|i| {
            k_smallest(dist.row(i), i, k)
                .into_iter()
                .map(|j| ids[j])
                .collect()
        })
        .collect()
}

/// Run `f` on a dedicated rayon pool of `workers` threads, falling back to the
/// global pool if the dedicated one cannot be created.
pub fn with_workers<T: Send>(workers: usize, f: impl FnOnce() -> T + Send) -> T {
    match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool.install(f),
        Err(e) => {
            tracing::warn!(workers, "could not build worker pool, using global pool: {e}");
            f()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dist_1d(points: &[f32]) -> Matrix {
        let n = points.len();
        let mut m = Matrix::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                m.set(i, j, (points[i] - points[j]).abs());
            }
        }
        m
    }

    #[test]
    fn finds_closest_excluding_self() {
        let dist = dist_1d(&[0.0, 1.0, 5.0, 1.5]);
        let ids = [10, 11, 12, 13];
        let nns = nearest_neighbors(&dist, &ids, 2);
        assert_eq!(nns[0], vec![11, 13]);
        assert_eq!(nns[2], vec![13, 11]);
    }

    #[test]
    fn k_is_clamped() {
        let dist = dist_1d(&[0.0, 1.0, 3.0]);
        let nns = nearest_neighbors(&dist, &[0, 1, 2], 10);
        assert_eq!(nns[1], vec![0, 2]);
        let single = nearest_neighbors(&dist_1d(&[0.0]), &[7], 3);
        assert!(single[0].is_empty());
    }

    #[test]
    fn runs_on_dedicated_pool() {
        let threads = with_workers(2, rayon::current_num_threads);
        assert_eq!(threads, 2);
    }
}
