use crate::cell::Cell;
use crate::config;
use crate::error::{Error, Result};
use crate::search::{self, CellList, Contact, ContactLists};
use nalgebra::{Matrix3, Vector3};
use tracing::info_span;

pub const AUTO_BOX_MARGIN: f64 = 1.0;

/// Pairs closer than this have no defined bond direction.
pub const MIN_SEPARATION: f64 = 1e-8;

/// How neighbors are assigned to each atom.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NeighborMethod {
    /// Every atom (or periodic image) closer than the given distance.
    Cutoff(f64),
    /// Atoms whose Voronoi cells share a face.
    Voronoi,
}

impl std::fmt::Display for NeighborMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NeighborMethod::Cutoff(r) => write!(f, "cutoff({r})"),
            NeighborMethod::Voronoi => f.write_str("voronoi"),
        }
    }
}

/// One entry of an atom's neighbor list.
#[derive(Clone, Debug, PartialEq)]
pub struct Neighbor {
    /// Index of the neighbor in the system's atom list.
    pub index: usize,
    /// Periodic image of the neighbor, in box vectors.
    pub shift: Vector3<i32>,
    pub distance: f64,
    /// Unit vector pointing from the atom to the neighbor image.
    pub direction: Vector3<f64>,
    /// 1 for cutoff neighbors, the shared face area for Voronoi neighbors.
    pub weight: f64,
}

/// Full contact lists within `cutoff`, choosing brute force or a cell list.
///
/// Without a cell, the atoms are enclosed in a non-periodic box with a margin
/// wide enough that no image can come within the cutoff.
pub fn search_contacts(
    positions: &[Vector3<f64>],
    cell: Option<&Cell>,
    cutoff: f64,
    parallel: bool,
) -> Result<ContactLists> {
    if !cutoff.is_finite() || cutoff <= 0.0 {
        return Err(Error::InvalidCutoff(cutoff));
    }
    let n_atoms = positions.len();
    if n_atoms == 0 {
        return Ok(vec![]);
    }

    let auto_cell;
    let cell = match cell {
        Some(c) => c,
        None => {
            auto_cell = enclosing_cell(positions, cutoff)?;
            &auto_cell
        }
    };

    let perp = cell.perpendicular_widths();
    let min_width = perp.x.min(perp.y).min(perp.z);
    let mic_safe = cutoff * 2.0 < min_width;

    if n_atoms < config::get_brute_force_threshold() && mic_safe {
        Ok(search::brute_force_search(cell, positions, cutoff))
    } else {
        let cl = CellList::build(cell, positions, cutoff);
        if parallel && n_atoms >= config::get_parallel_threshold() {
            Ok(cl.par_search(cell, cutoff))
        } else {
            Ok(cl.search(cell, cutoff))
        }
    }
}

/// Cutoff neighbor lists, one per atom, sorted by distance.
pub fn cutoff_neighbors(
    positions: &[Vector3<f64>],
    cell: Option<&Cell>,
    cutoff: f64,
    parallel: bool,
) -> Result<Vec<Vec<Neighbor>>> {
    let _span = info_span!("cutoff_neighbors", n_atoms = positions.len(), cutoff).entered();
    let contacts = search_contacts(positions, cell, cutoff, parallel)?;
    for (i, list) in contacts.iter().enumerate() {
        check_separation(i, list)?;
    }
    Ok(contacts
        .into_iter()
        .map(|list| {
            list.into_iter()
                .map(|c| {
                    let distance = c.dist_sq.sqrt();
                    Neighbor {
                        index: c.j,
                        shift: c.shift,
                        distance,
                        direction: c.disp / distance,
                        weight: 1.0,
                    }
                })
                .collect()
        })
        .collect())
}

/// Fails if any contact of atom `i` sits on top of it.
pub(crate) fn check_separation(i: usize, contacts: &[Contact]) -> Result<()> {
    match contacts
        .iter()
        .find(|c| c.dist_sq < MIN_SEPARATION * MIN_SEPARATION)
    {
        Some(c) => Err(Error::CoincidentAtoms { i, j: c.j }),
        None => Ok(()),
    }
}

fn enclosing_cell(positions: &[Vector3<f64>], cutoff: f64) -> Result<Cell> {
    let mut min_bound = Vector3::repeat(f64::INFINITY);
    let mut max_bound = Vector3::repeat(f64::NEG_INFINITY);
    for p in positions {
        min_bound = min_bound.inf(p);
        max_bound = max_bound.sup(p);
    }
    let margin = cutoff + AUTO_BOX_MARGIN;
    let span = max_bound - min_bound;
    let h_mat = Matrix3::from_diagonal(&span.add_scalar(2.0 * margin));
    let origin = min_bound.add_scalar(-margin);
    Ok(Cell::with_origin(
        h_mat,
        origin,
        Vector3::new(false, false, false),
    )?)
}
