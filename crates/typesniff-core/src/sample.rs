//! Bounded, center-biased sampling of a file population.
//!
//! Directories of test data are often large and mostly uniform. Instead of
//! sniffing every file, local detection reads a handful chosen with a normal
//! distribution over list position, so files in the middle of the sorted
//! listing (away from oddly named outliers at either end) are favored.

use std::collections::BTreeSet;
use std::f64::consts::TAU;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Draws attempted per requested sample before falling back.
const DRAWS_PER_SAMPLE: usize = 16;

/// Pick at most `k` items, biased towards the middle of `items`.
///
/// The result keeps the original order and is deterministic for a given
/// `items.len()` and `k`.
pub fn normal_distributed<T: Clone>(items: &[T], k: usize) -> Vec<T> {
    sample_indices(items.len(), k)
        .into_iter()
        .map(|i| items[i].clone())
        .collect()
}

/// Ascending, distinct indices into a population of `n`.
///
/// Indices are drawn from N((n - 1) / 2, n / 6) and rounded; draws outside
/// `0..n` are rejected. If the draw budget runs out before `k` distinct
/// indices are found, the rest are taken from the center outwards.
pub fn sample_indices(n: usize, k: usize) -> Vec<usize> {
    if k == 0 || n == 0 {
        return Vec::new();
    }
    if n <= k {
        return (0..n).collect();
    }

    let mut rng = StdRng::seed_from_u64(seed(n, k));
    let mean = (n - 1) as f64 / 2.0;
    let sigma = n as f64 / 6.0;

    let mut chosen = BTreeSet::new();
    let mut budget = k.saturating_mul(DRAWS_PER_SAMPLE);
    while chosen.len() < k && budget > 0 {
        budget -= 1;
        let x = (mean + standard_normal(&mut rng) * sigma).round();
        if x < 0.0 || x >= n as f64 {
            continue;
        }
        chosen.insert(x as usize);
    }

    if chosen.len() < k {
        for index in center_outwards(n) {
            if chosen.len() == k {
                break;
            }
            chosen.insert(index);
        }
    }

    chosen.into_iter().collect()
}

fn seed(n: usize, k: usize) -> u64 {
    (n as u64).rotate_left(32) ^ k as u64
}

// Box-Muller
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
}

fn center_outwards(n: usize) -> Vec<usize> {
    let center = (n - 1) / 2;
    let mut indices: Vec<usize> = (0..n).collect();
    indices.sort_by_key(|&i| (i.abs_diff(center), i));
    indices
}
