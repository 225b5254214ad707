//! Dynamic time warping over sequences of points.
//!
//! [`fast_dtw`] solves a coarsened copy of the problem first (both sequences
//! halved recursively), then only searches a band of `radius` cells around
//! the projected coarse path at each finer resolution. Sequences no longer
//! than `radius + 2` are solved exactly.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// One sample of a sequence; all samples in a call share the same dimension.
pub type Point = Vec<f32>;

#[derive(Debug, Error, PartialEq)]
pub enum DtwError {
    #[error("cannot align an empty sequence")]
    Empty,
    #[error("point dimensions differ: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("invalid distance {value} between samples {i} and {j}")]
    InvalidDistance { i: usize, j: usize, value: f64 },
}

/// Alignment cost and the warping path that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    pub distance: f64,
    pub path: Vec<(usize, usize)>,
}

impl Alignment {
    /// Cost per aligned pair.
    pub fn mean_cost(&self) -> f64 {
        if self.path.is_empty() {
            return self.distance;
        }
        self.distance / self.path.len() as f64
    }
}

/// Euclidean distance between two samples of equal dimension.
pub fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(p, q)| {
            let d = (*p as f64) - (*q as f64);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

fn check_dimensions(x: &[Point], y: &[Point]) -> Result<(), DtwError> {
    let (Some(first), Some(_)) = (x.first(), y.first()) else {
        return Err(DtwError::Empty);
    };
    let dim = first.len();
    for p in x.iter().chain(y) {
        if p.len() != dim {
            return Err(DtwError::DimensionMismatch {
                left: dim,
                right: p.len(),
            });
        }
    }
    Ok(())
}

/// Distance between two inputs: Euclidean when both are single points,
/// radius-bounded DTW otherwise.
pub fn distance(x: &[Point], y: &[Point], radius: usize) -> Result<f64, DtwError> {
    check_dimensions(x, y)?;
    if x.len() == 1 && y.len() == 1 {
        let d = euclidean(&x[0], &y[0]);
        if !d.is_finite() {
            return Err(DtwError::InvalidDistance { i: 0, j: 0, value: d });
        }
        return Ok(d);
    }
    Ok(fast_dtw(x, y, radius)?.distance)
}

/// Exact DTW over the full cost matrix.
pub fn dtw(x: &[Point], y: &[Point]) -> Result<Alignment, DtwError> {
    check_dimensions(x, y)?;
    let cells: Vec<(usize, usize)> = (0..x.len())
        .flat_map(|i| (0..y.len()).map(move |j| (i, j)))
        .collect();
    // the full matrix always reaches the last cell
    Ok(solve(x, y, &cells)?.unwrap_or(Alignment {
        distance: f64::INFINITY,
        path: Vec::new(),
    }))
}

/// Approximate DTW with a search band of `radius` around the coarse path.
pub fn fast_dtw(x: &[Point], y: &[Point], radius: usize) -> Result<Alignment, DtwError> {
    check_dimensions(x, y)?;
    fast_dtw_core(x, y, radius)
}

fn fast_dtw_core(x: &[Point], y: &[Point], radius: usize) -> Result<Alignment, DtwError> {
    let min_size = radius + 2;
    if x.len() <= min_size || y.len() <= min_size {
        return dtw(x, y);
    }

    let coarse = fast_dtw_core(&halve(x), &halve(y), radius)?;
    let window = expand_window(&coarse.path, x.len(), y.len(), radius);
    match solve(x, y, &window)? {
        Some(alignment) => Ok(alignment),
        None => dtw(x, y),
    }
}

/// Average neighbouring pairs; an odd trailing sample is kept as is.
fn halve(x: &[Point]) -> Vec<Point> {
    x.chunks(2)
        .map(|pair| match pair {
            [a, b] => a.iter().zip(b).map(|(p, q)| (p + q) / 2.0).collect(),
            _ => pair[0].clone(),
        })
        .collect()
}

/// Project a coarse path onto the finer grid, widened by `radius` cells, and
/// keep each row's cells contiguous so the band stays connected.
fn expand_window(
    path: &[(usize, usize)],
    len_x: usize,
    len_y: usize,
    radius: usize,
) -> Vec<(usize, usize)> {
    let r = radius as isize;
    let mut coarse: HashSet<(usize, usize)> = HashSet::new();
    for &(i, j) in path {
        for a in -r..=r {
            for b in -r..=r {
                let (ci, cj) = (i as isize + a, j as isize + b);
                if ci >= 0 && cj >= 0 {
                    coarse.insert((ci as usize, cj as usize));
                }
            }
        }
    }

    let mut fine: HashSet<(usize, usize)> = HashSet::with_capacity(coarse.len() * 4);
    for (i, j) in coarse {
        fine.insert((i * 2, j * 2));
        fine.insert((i * 2, j * 2 + 1));
        fine.insert((i * 2 + 1, j * 2));
        fine.insert((i * 2 + 1, j * 2 + 1));
    }

    let mut window = Vec::new();
    let mut start_j = 0;
    for i in 0..len_x {
        let mut row_start = None;
        for j in start_j..len_y {
            if fine.contains(&(i, j)) {
                window.push((i, j));
                row_start.get_or_insert(j);
            } else if row_start.is_some() {
                break;
            }
        }
        if let Some(j) = row_start {
            start_j = j;
        }
    }
    window
}

#[derive(Clone, Copy)]
struct Cell {
    cost: f64,
    from: (usize, usize),
}

/// Dynamic programme restricted to `cells` (row-major, zero-based). Returns
/// `None` when the window does not connect both sequence ends.
fn solve(
    x: &[Point],
    y: &[Point],
    cells: &[(usize, usize)],
) -> Result<Option<Alignment>, DtwError> {
    let mut table: HashMap<(usize, usize), Cell> = HashMap::with_capacity(cells.len() + 1);
    table.insert(
        (0, 0),
        Cell {
            cost: 0.0,
            from: (0, 0),
        },
    );

    for &(ci, cj) in cells {
        let (i, j) = (ci + 1, cj + 1);
        let dt = euclidean(&x[ci], &y[cj]);
        if !dt.is_finite() || dt < 0.0 {
            return Err(DtwError::InvalidDistance {
                i: ci,
                j: cj,
                value: dt,
            });
        }
        let best = [(i - 1, j), (i, j - 1), (i - 1, j - 1)]
            .into_iter()
            .filter_map(|k| table.get(&k).map(|c| (c.cost + dt, k)))
            .min_by(|a, b| a.0.total_cmp(&b.0));
        if let Some((cost, from)) = best {
            table.insert((i, j), Cell { cost, from });
        }
    }

    let (mut i, mut j) = (x.len(), y.len());
    let Some(last) = table.get(&(i, j)).copied() else {
        return Ok(None);
    };

    let mut path = Vec::new();
    while i > 0 || j > 0 {
        let Some(cell) = table.get(&(i, j)) else {
            break;
        };
        path.push((i - 1, j - 1));
        (i, j) = cell.from;
    }
    path.reverse();

    Ok(Some(Alignment {
        distance: last.cost,
        path,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalars(v: &[f32]) -> Vec<Point> {
        v.iter().map(|x| vec![*x]).collect()
    }

    /// Deterministic pseudo-random walk so tests need no RNG crate.
    fn walk(seed: u64, len: usize) -> Vec<Point> {
        let mut s = seed;
        let mut acc = 0.0f32;
        (0..len)
            .map(|_| {
                s = s.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                acc += ((s >> 33) % 1000) as f32 / 1000.0 - 0.5;
                vec![acc, acc * 0.5]
            })
            .collect()
    }

    #[test]
    fn identical_sequences_cost_nothing() {
        let x = walk(7, 40);
        assert_eq!(fast_dtw(&x, &x, 2).unwrap().distance, 0.0);
        assert_eq!(distance(&x, &x, 1).unwrap(), 0.0);
    }

    #[test]
    fn single_points_use_euclidean() {
        let d = distance(&[vec![0.0, 0.0]], &[vec![3.0, 4.0]], 2).unwrap();
        assert!((d - 5.0).abs() < 1e-9);
    }

    #[test]
    fn exact_dtw_small_example() {
        // 1,2,3 against 1,1,2,3,3: every sample has an exact partner
        let a = dtw(&scalars(&[1.0, 2.0, 3.0]), &scalars(&[1.0, 1.0, 2.0, 3.0, 3.0])).unwrap();
        assert_eq!(a.distance, 0.0);
        assert_eq!(a.path.first(), Some(&(0, 0)));
        assert_eq!(a.path.last(), Some(&(2, 4)));

        let b = dtw(&scalars(&[0.0, 0.0]), &scalars(&[1.0])).unwrap();
        assert!((b.distance - 2.0).abs() < 1e-9);
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let err = distance(&[vec![1.0, 2.0]], &[vec![1.0, 2.0, 3.0]], 2).unwrap_err();
        assert_eq!(err, DtwError::DimensionMismatch { left: 2, right: 3 });
        assert!(matches!(
            fast_dtw(&walk(1, 10), &scalars(&[1.0; 10]), 1),
            Err(DtwError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert_eq!(distance(&[], &scalars(&[1.0]), 2).unwrap_err(), DtwError::Empty);
    }

    #[test]
    fn non_finite_samples_are_rejected() {
        let err = dtw(&scalars(&[f32::NAN, 1.0]), &scalars(&[1.0, 1.0])).unwrap_err();
        assert!(matches!(err, DtwError::InvalidDistance { i: 0, .. }));
    }

    #[test]
    fn approximation_never_beats_exact() {
        for seed in 0..6 {
            let x = walk(seed, 57);
            let y = walk(seed + 100, 43);
            let exact = dtw(&x, &y).unwrap().distance;
            for radius in [0, 1, 2, 5] {
                let approx = fast_dtw(&x, &y, radius).unwrap().distance;
                assert!(approx + 1e-9 >= exact, "radius {radius}: {approx} < {exact}");
            }
        }
    }

    #[test]
    fn wide_radius_matches_exact() {
        let x = walk(3, 30);
        let y = walk(4, 25);
        let exact = dtw(&x, &y).unwrap().distance;
        let approx = fast_dtw(&x, &y, 30).unwrap().distance;
        assert!((approx - exact).abs() < 1e-9);
    }

    #[test]
    fn path_is_monotone_and_connected() {
        let x = walk(11, 64);
        let y = walk(12, 50);
        let a = fast_dtw(&x, &y, 1).unwrap();
        assert_eq!(a.path.first(), Some(&(0, 0)));
        assert_eq!(a.path.last(), Some(&(63, 49)));
        for w in a.path.windows(2) {
            let (di, dj) = (w[1].0 - w[0].0, w[1].1 - w[0].1);
            assert!(di <= 1 && dj <= 1 && di + dj >= 1);
        }
    }

    #[test]
    fn halve_keeps_odd_tail() {
        let h = halve(&scalars(&[1.0, 3.0, 5.0]));
        assert_eq!(h, scalars(&[2.0, 5.0]));
    }
}
