use crate::atom::{Atom, degree_slot};
use crate::cell::Cell;
use crate::config;
use crate::error::{Error, Result};
use crate::io;
use crate::neighbors::{self, Neighbor, NeighborMethod};
use crate::order::{self, check_degree};
use crate::voronoi;
use nalgebra::Vector3;
use std::path::Path;
use tracing::{debug, info_span};

/// Parameters of [`System::find_solids`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolidOptions {
    /// Degree of the `q_lm` vectors correlated across bonds.
    pub degree: u32,
    /// Minimum normalized correlation for a bond to count as solid.
    pub bond_threshold: f64,
    /// Minimum number of solid bonds for an atom to be solid.
    pub min_bonds: usize,
    /// Also label the largest cluster of solid atoms and report its size.
    pub largest_cluster: bool,
}

impl Default for SolidOptions {
    fn default() -> Self {
        Self {
            degree: 6,
            bond_threshold: 0.5,
            min_bonds: 7,
            largest_cluster: true,
        }
    }
}

/// A set of atoms in a simulation box and the analyses run on them.
#[derive(Clone, Debug)]
pub struct System {
    cell: Option<Cell>,
    atoms: Vec<Atom>,
    method: Option<NeighborMethod>,
    parallel: bool,
}

impl Default for System {
    fn default() -> Self {
        Self::new()
    }
}

impl System {
    pub fn new() -> Self {
        Self {
            cell: None,
            atoms: Vec::new(),
            method: None,
            parallel: true,
        }
    }

    /// Enables or disables rayon parallelism for this system's analyses.
    pub fn set_parallel(&mut self, parallel: bool) {
        self.parallel = parallel;
    }

    /// Loads atoms into the box, wrapping them along periodic axes.
    ///
    /// Any previous analysis results are discarded.
    pub fn assign_atoms(&mut self, mut atoms: Vec<Atom>, cell: Cell) -> Result<()> {
        if atoms.is_empty() {
            return Err(Error::EmptySystem);
        }
        for (index, atom) in atoms.iter_mut().enumerate() {
            let pos = *atom.position();
            if pos.iter().any(|x| !x.is_finite()) {
                return Err(Error::InvalidPosition { index });
            }
            let frac = cell.to_fractional(&pos);
            for axis in 0..3 {
                if !cell.pbc()[axis] && !(0.0..=1.0).contains(&frac[axis]) {
                    return Err(Error::OutsideBox { index, axis });
                }
            }
            atom.set_position(cell.wrap(&pos));
            atom.reset();
        }
        debug!(n_atoms = atoms.len(), volume = cell.volume(), "assigned atoms");
        self.atoms = atoms;
        self.cell = Some(cell);
        self.method = None;
        Ok(())
    }

    /// Reads the first frame of a LAMMPS dump file and assigns its atoms.
    pub fn read_inputfile(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let frame = io::read_dump_file(path)?;
        self.assign_atoms(frame.atoms, frame.cell)
    }

    /// Writes the atoms and box as a LAMMPS dump file.
    pub fn write_outputfile(&self, path: impl AsRef<Path>) -> Result<()> {
        let cell = self.cell.as_ref().ok_or(Error::EmptySystem)?;
        io::write_dump_file(path, 0, &self.atoms, cell)
    }

    pub fn cell(&self) -> Option<&Cell> {
        self.cell.as_ref()
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn atom(&self, index: usize) -> Result<&Atom> {
        self.atoms.get(index).ok_or(Error::AtomIndex {
            index,
            len: self.atoms.len(),
        })
    }

    pub fn n_atoms(&self) -> usize {
        self.atoms.len()
    }

    /// The method used by the last successful [`find_neighbors`](Self::find_neighbors).
    pub fn neighbor_method(&self) -> Option<NeighborMethod> {
        self.method
    }

    fn run_parallel(&self) -> bool {
        self.parallel && self.atoms.len() >= config::get_parallel_threshold()
    }

    /// Builds every atom's neighbor list with the given method.
    ///
    /// The Voronoi method also stores each atom's Voronoi cell. Order
    /// parameters computed from an earlier neighbor list are discarded.
    pub fn find_neighbors(&mut self, method: NeighborMethod) -> Result<()> {
        let _span = info_span!("System::find_neighbors", %method, n_atoms = self.atoms.len())
            .entered();
        let cell = self.cell.as_ref().ok_or(Error::EmptySystem)?;
        let positions: Vec<Vector3<f64>> = self.atoms.iter().map(|a| *a.position()).collect();

        match method {
            NeighborMethod::Cutoff(cutoff) => {
                let lists =
                    neighbors::cutoff_neighbors(&positions, Some(cell), cutoff, self.parallel)?;
                for (atom, list) in self.atoms.iter_mut().zip(lists) {
                    atom.reset();
                    atom.neighbors = Some(list);
                }
            }
            NeighborMethod::Voronoi => {
                let cells = voronoi::tessellate(cell, &positions, self.parallel)?;
                for (atom, t) in self.atoms.iter_mut().zip(cells) {
                    atom.reset();
                    atom.neighbors = Some(t.neighbors);
                    atom.voronoi = Some(t.cell);
                }
            }
        }

        let total: usize = self.atoms.iter().map(Atom::coordination).sum();
        debug!(
            mean_coordination = total as f64 / self.atoms.len() as f64,
            "neighbors assigned"
        );
        self.method = Some(method);
        Ok(())
    }

    fn neighbor_lists(&self) -> Result<Vec<&[Neighbor]>> {
        if self.method.is_none() {
            return Err(Error::NeighborsNotComputed);
        }
        Ok(self.atoms.iter().map(Atom::neighbors).collect())
    }

    fn check_degrees(degrees: &[u32]) -> Result<()> {
        degrees.iter().try_for_each(|&l| check_degree(l))
    }

    /// Computes the Steinhardt parameter `q_l` of every atom for each degree.
    pub fn calculate_q(&mut self, degrees: &[u32]) -> Result<()> {
        let _span = info_span!("System::calculate_q", ?degrees).entered();
        Self::check_degrees(degrees)?;
        let parallel = self.run_parallel();
        let results: Vec<(u32, Vec<f64>)> = {
            let lists = self.neighbor_lists()?;
            degrees
                .iter()
                .map(|&l| {
                    let qlm = order::compute_qlm(&lists, l, parallel);
                    (l, qlm.iter().map(|q| order::ql(q)).collect())
                })
                .collect()
        };
        for (l, values) in results {
            let Some(slot) = degree_slot(l) else { continue };
            for (atom, v) in self.atoms.iter_mut().zip(values) {
                atom.q[slot] = Some(v);
            }
        }
        Ok(())
    }

    /// Computes the neighbor-averaged parameter `aq_l` of every atom for each degree.
    pub fn calculate_aq(&mut self, degrees: &[u32]) -> Result<()> {
        let _span = info_span!("System::calculate_aq", ?degrees).entered();
        Self::check_degrees(degrees)?;
        let parallel = self.run_parallel();
        let results: Vec<(u32, Vec<f64>)> = {
            let lists = self.neighbor_lists()?;
            degrees
                .iter()
                .map(|&l| {
                    let qlm = order::compute_qlm(&lists, l, parallel);
                    let avg = order::average_qlm(&lists, &qlm, parallel);
                    (l, avg.iter().map(|q| order::ql(q)).collect())
                })
                .collect()
        };
        for (l, values) in results {
            let Some(slot) = degree_slot(l) else { continue };
            for (atom, v) in self.atoms.iter_mut().zip(values) {
                atom.aq[slot] = Some(v);
            }
        }
        Ok(())
    }

    fn collect_values(
        &self,
        l: u32,
        what: &str,
        get: impl Fn(&Atom) -> Option<f64>,
    ) -> Result<Vec<f64>> {
        check_degree(l)?;
        self.atoms
            .iter()
            .map(|a| {
                get(a).ok_or_else(|| Error::NotCalculated {
                    what: format!("{what}{l}"),
                })
            })
            .collect()
    }

    /// Per-atom `q_l` values in atom order.
    pub fn qvals(&self, l: u32) -> Result<Vec<f64>> {
        self.collect_values(l, "q", |a| a.q(l))
    }

    /// Per-atom averaged `aq_l` values in atom order.
    pub fn aqvals(&self, l: u32) -> Result<Vec<f64>> {
        self.collect_values(l, "aq", |a| a.aq(l))
    }

    /// Labels solid atoms from the correlation of `q_lm` vectors across bonds.
    ///
    /// Returns the number of solid atoms, or the size of the largest solid
    /// cluster when `opts.largest_cluster` is set.
    pub fn find_solids(&mut self, opts: &SolidOptions) -> Result<usize> {
        let _span = info_span!("System::find_solids", ?opts).entered();
        check_degree(opts.degree)?;
        let parallel = self.run_parallel();
        let (bonds, cluster) = {
            let lists = self.neighbor_lists()?;
            let qlm = order::compute_qlm(&lists, opts.degree, parallel);
            let bonds = order::count_solid_bonds(&lists, &qlm, opts.bond_threshold, parallel);
            let solid: Vec<bool> = bonds.iter().map(|&b| b >= opts.min_bonds).collect();
            let cluster = opts
                .largest_cluster
                .then(|| order::largest_cluster(&lists, &solid));
            (bonds, cluster)
        };

        let mut n_solid = 0;
        for (k, atom) in self.atoms.iter_mut().enumerate() {
            let is_solid = bonds[k] >= opts.min_bonds;
            n_solid += usize::from(is_solid);
            atom.solid_bonds = Some(bonds[k]);
            atom.solid = Some(is_solid);
            atom.in_largest_cluster = cluster.as_ref().map(|c| c[k]);
        }

        let result = match &cluster {
            Some(c) => c.iter().filter(|&&m| m).count(),
            None => n_solid,
        };
        debug!(n_solid, result, "solid identification finished");
        Ok(result)
    }
}
