//! Ideal crystal lattices in orthogonal periodic boxes.

use crate::atom::Atom;
use crate::cell::Cell;
use crate::error::{Error, Result};
use nalgebra::{Matrix3, Vector3};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Structure {
    Sc,
    Bcc,
    Fcc,
    /// Ideal hcp (`c/a = sqrt(8/3)`) in an orthohexagonal cell.
    Hcp,
    Diamond,
}

impl Structure {
    pub fn name(&self) -> &'static str {
        match self {
            Structure::Sc => "sc",
            Structure::Bcc => "bcc",
            Structure::Fcc => "fcc",
            Structure::Hcp => "hcp",
            Structure::Diamond => "diamond",
        }
    }

    /// Fractional coordinates of the atoms in one unit cell.
    fn basis(&self) -> Vec<[f64; 3]> {
        const FCC: [[f64; 3]; 4] = [
            [0.0, 0.0, 0.0],
            [0.5, 0.5, 0.0],
            [0.5, 0.0, 0.5],
            [0.0, 0.5, 0.5],
        ];
        match self {
            Structure::Sc => vec![[0.0, 0.0, 0.0]],
            Structure::Bcc => vec![[0.0, 0.0, 0.0], [0.5, 0.5, 0.5]],
            Structure::Fcc => FCC.to_vec(),
            Structure::Hcp => vec![
                [0.0, 0.0, 0.0],
                [0.5, 0.5, 0.0],
                [0.5, 1.0 / 6.0, 0.5],
                [0.0, 2.0 / 3.0, 0.5],
            ],
            Structure::Diamond => FCC
                .iter()
                .flat_map(|b| [*b, [b[0] + 0.25, b[1] + 0.25, b[2] + 0.25]])
                .collect(),
        }
    }

    /// Unit cell edge lengths for lattice constant `a`.
    fn unit_cell(&self, a: f64) -> Vector3<f64> {
        match self {
            Structure::Hcp => Vector3::new(a, 3f64.sqrt() * a, (8.0f64 / 3.0).sqrt() * a),
            _ => Vector3::repeat(a),
        }
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Structure {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sc" | "simple_cubic" => Ok(Structure::Sc),
            "bcc" => Ok(Structure::Bcc),
            "fcc" => Ok(Structure::Fcc),
            "hcp" => Ok(Structure::Hcp),
            "diamond" => Ok(Structure::Diamond),
            other => Err(Error::InvalidLattice(format!(
                "unknown structure '{other}'"
            ))),
        }
    }
}

/// Builds `repetitions` unit cells of `structure` and the periodic box holding them.
///
/// Atoms are numbered from 1 and all have type 1.
pub fn make_crystal(
    structure: Structure,
    lattice_constant: f64,
    repetitions: [usize; 3],
) -> Result<(Vec<Atom>, Cell)> {
    if !lattice_constant.is_finite() || lattice_constant <= 0.0 {
        return Err(Error::InvalidLattice(format!(
            "lattice constant must be positive, got {lattice_constant}"
        )));
    }
    if repetitions.contains(&0) {
        return Err(Error::InvalidLattice(
            "repetitions must be at least 1 along every axis".into(),
        ));
    }

    let dims = structure.unit_cell(lattice_constant);
    let basis = structure.basis();
    let n_atoms = basis.len() * repetitions.iter().product::<usize>();
    let mut atoms = Vec::with_capacity(n_atoms);

    for i in 0..repetitions[0] {
        for j in 0..repetitions[1] {
            for k in 0..repetitions[2] {
                for b in &basis {
                    let pos = [
                        (i as f64 + b[0]) * dims.x,
                        (j as f64 + b[1]) * dims.y,
                        (k as f64 + b[2]) * dims.z,
                    ];
                    atoms.push(Atom::new(atoms.len() + 1, 1, pos));
                }
            }
        }
    }

    let reps = Vector3::new(
        repetitions[0] as f64,
        repetitions[1] as f64,
        repetitions[2] as f64,
    );
    let h = Matrix3::from_diagonal(&dims.component_mul(&reps));
    let cell = Cell::new(h, Vector3::new(true, true, true))?;
    Ok((atoms, cell))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neighbors::cutoff_neighbors;
    use approx::assert_relative_eq;

    fn coordination(structure: Structure, cutoff: f64) -> Vec<usize> {
        let (atoms, cell) = make_crystal(structure, 1.0, [3, 3, 3]).unwrap();
        let positions: Vec<_> = atoms.iter().map(|a| *a.position()).collect();
        cutoff_neighbors(&positions, Some(&cell), cutoff, false)
            .unwrap()
            .iter()
            .map(Vec::len)
            .collect()
    }

    #[test]
    fn test_atom_counts_and_box() {
        for (s, per_cell) in [
            (Structure::Sc, 1),
            (Structure::Bcc, 2),
            (Structure::Fcc, 4),
            (Structure::Hcp, 4),
            (Structure::Diamond, 8),
        ] {
            let (atoms, cell) = make_crystal(s, 2.0, [2, 3, 1]).unwrap();
            assert_eq!(atoms.len(), per_cell * 6, "{s}");
            assert_eq!(atoms[0].id(), 1);
            assert_eq!(atoms.last().unwrap().id(), atoms.len());
            assert!(atoms.iter().all(|a| a.atom_type() == 1));
            assert!(cell.pbc().iter().all(|&p| p));
        }

        let (_, cell) = make_crystal(Structure::Fcc, 2.0, [2, 3, 1]).unwrap();
        assert_relative_eq!(cell.volume(), 8.0 * 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_nearest_neighbor_shells() {
        // sc: 1, bcc: sqrt(3)/2, fcc and hcp: 1/sqrt(2), diamond: sqrt(3)/4
        assert!(coordination(Structure::Sc, 1.1).iter().all(|&c| c == 6));
        assert!(coordination(Structure::Bcc, 0.9).iter().all(|&c| c == 8));
        assert!(coordination(Structure::Fcc, 0.75).iter().all(|&c| c == 12));
        assert!(coordination(Structure::Hcp, 1.1).iter().all(|&c| c == 12));
        assert!(coordination(Structure::Diamond, 0.45).iter().all(|&c| c == 4));
    }

    #[test]
    fn test_parse_structure() {
        assert_eq!("BCC".parse::<Structure>().unwrap(), Structure::Bcc);
        assert_eq!(" hcp ".parse::<Structure>().unwrap(), Structure::Hcp);
        assert_eq!(Structure::Diamond.to_string(), "diamond");
        assert!(matches!(
            "bct".parse::<Structure>(),
            Err(Error::InvalidLattice(_))
        ));
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(make_crystal(Structure::Sc, 0.0, [1, 1, 1]).is_err());
        assert!(make_crystal(Structure::Sc, f64::NAN, [1, 1, 1]).is_err());
        assert!(make_crystal(Structure::Sc, 1.0, [1, 0, 1]).is_err());
    }
}
