//! Steinhardt bond-orientational order parameters and solid identification.

use crate::error::{Error, Result};
use crate::harmonics::{self, spherical_harmonics};
use crate::neighbors::Neighbor;
use nalgebra::Complex;
use rayon::prelude::*;
use std::collections::VecDeque;
use std::f64::consts::PI;
use tracing::info_span;

pub const MIN_DEGREE: u32 = 2;
pub const MAX_DEGREE: u32 = harmonics::MAX_DEGREE;
/// Number of supported degrees, `MIN_DEGREE..=MAX_DEGREE`.
pub const N_DEGREES: usize = (MAX_DEGREE - MIN_DEGREE + 1) as usize;

/// `q_lm` coefficients of one atom, indexed by `m + l`.
pub type Qlm = Vec<Complex<f64>>;

pub fn check_degree(l: u32) -> Result<()> {
    if (MIN_DEGREE..=MAX_DEGREE).contains(&l) {
        Ok(())
    } else {
        Err(Error::InvalidDegree(l))
    }
}

/// Weighted average of `Y_lm` over the bonds of one atom.
pub fn atom_qlm(neighbors: &[Neighbor], l: u32) -> Qlm {
    let mut acc = vec![Complex::new(0.0, 0.0); 2 * l as usize + 1];
    let total_weight: f64 = neighbors.iter().map(|n| n.weight).sum();
    if neighbors.is_empty() || total_weight <= 0.0 {
        return acc;
    }
    for n in neighbors {
        for (a, y) in acc.iter_mut().zip(spherical_harmonics(l, &n.direction)) {
            *a += y * n.weight;
        }
    }
    for a in &mut acc {
        *a /= total_weight;
    }
    acc
}

/// `sqrt(4π/(2l+1) Σ_m |q_lm|²)`
pub fn ql(qlm: &[Complex<f64>]) -> f64 {
    let two_l_plus_one = qlm.len() as f64;
    let sum: f64 = qlm.iter().map(|q| q.norm_sqr()).sum();
    (4.0 * PI / two_l_plus_one * sum).sqrt()
}

pub fn compute_qlm(neighbor_lists: &[&[Neighbor]], l: u32, parallel: bool) -> Vec<Qlm> {
    let _span = info_span!("compute_qlm", l, n_atoms = neighbor_lists.len()).entered();
    if parallel {
        neighbor_lists
            .par_iter()
            .map(|list| atom_qlm(list, l))
            .collect()
    } else {
        neighbor_lists.iter().map(|list| atom_qlm(list, l)).collect()
    }
}

/// Lechner-Dellago average: `q_lm` of each atom averaged with those of its neighbors.
pub fn average_qlm(neighbor_lists: &[&[Neighbor]], qlm: &[Qlm], parallel: bool) -> Vec<Qlm> {
    let _span = info_span!("average_qlm", n_atoms = qlm.len()).entered();
    let average = |(list, own): (&&[Neighbor], &Qlm)| {
        let mut acc = own.clone();
        for n in list.iter() {
            for (a, q) in acc.iter_mut().zip(&qlm[n.index]) {
                *a += *q;
            }
        }
        let count = (list.len() + 1) as f64;
        for a in &mut acc {
            *a /= count;
        }
        acc
    };
    if parallel {
        neighbor_lists.par_iter().zip(qlm.par_iter()).map(average).collect()
    } else {
        neighbor_lists.iter().zip(qlm.iter()).map(average).collect()
    }
}

/// Normalized bond correlation `Re Σ_m q_lm(i) conj(q_lm(j)) / (|q(i)| |q(j)|)`.
pub fn bond_correlation(qi: &[Complex<f64>], qj: &[Complex<f64>]) -> f64 {
    let norm_i: f64 = qi.iter().map(|q| q.norm_sqr()).sum::<f64>().sqrt();
    let norm_j: f64 = qj.iter().map(|q| q.norm_sqr()).sum::<f64>().sqrt();
    if norm_i == 0.0 || norm_j == 0.0 {
        return 0.0;
    }
    let dot: f64 = qi.iter().zip(qj).map(|(a, b)| (*a * b.conj()).re).sum();
    dot / (norm_i * norm_j)
}

/// Number of bonds per atom whose correlation exceeds `threshold`.
pub fn count_solid_bonds(
    neighbor_lists: &[&[Neighbor]],
    qlm: &[Qlm],
    threshold: f64,
    parallel: bool,
) -> Vec<usize> {
    let _span = info_span!("count_solid_bonds", threshold).entered();
    let count = |(i, list): (usize, &&[Neighbor])| {
        list.iter()
            .filter(|n| bond_correlation(&qlm[i], &qlm[n.index]) > threshold)
            .count()
    };
    if parallel {
        neighbor_lists.par_iter().enumerate().map(count).collect()
    } else {
        neighbor_lists.iter().enumerate().map(count).collect()
    }
}

/// Marks the members of the largest connected cluster of solid atoms.
///
/// Two solid atoms are connected when one appears in the other's neighbor
/// list. Ties between equally large clusters go to the one found first.
pub fn largest_cluster(neighbor_lists: &[&[Neighbor]], solid: &[bool]) -> Vec<bool> {
    let n = solid.len();
    let mut label = vec![usize::MAX; n];
    let mut sizes = Vec::new();
    let mut queue = VecDeque::new();

    for start in 0..n {
        if !solid[start] || label[start] != usize::MAX {
            continue;
        }
        let id = sizes.len();
        let mut size = 0;
        label[start] = id;
        queue.push_back(start);
        while let Some(i) = queue.pop_front() {
            size += 1;
            for nb in neighbor_lists[i] {
                let j = nb.index;
                if solid[j] && label[j] == usize::MAX {
                    label[j] = id;
                    queue.push_back(j);
                }
            }
        }
        sizes.push(size);
    }

    let Some((largest, _)) = sizes
        .iter()
        .enumerate()
        .rev()
        .max_by_key(|&(_, &size)| size)
    else {
        return vec![false; n];
    };
    label.iter().map(|&l| l == largest).collect()
}
