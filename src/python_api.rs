use crate::atom::Atom;
use crate::cell::Cell;
use crate::config;
use crate::error::Error;
use crate::lattice::{self, Structure};
use crate::neighbors::NeighborMethod;
use crate::system::{SolidOptions, System};
use nalgebra::Vector3;
use numpy::{IntoPyArray, PyArray1, PyArrayMethods, PyReadonlyArray2, PyUntypedArrayMethods};
use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use std::path::PathBuf;

fn to_py_err(err: Error) -> PyErr {
    match err {
        Error::Io(e) => PyIOError::new_err(e.to_string()),
        other => PyValueError::new_err(other.to_string()),
    }
}

/// One degree or a list of degrees.
#[derive(FromPyObject)]
enum Degrees {
    One(u32),
    Many(Vec<u32>),
}

impl Degrees {
    fn into_vec(self) -> Vec<u32> {
        match self {
            Degrees::One(l) => vec![l],
            Degrees::Many(ls) => ls,
        }
    }
}

#[pyclass(name = "Atom")]
#[derive(Clone)]
pub struct PyAtom {
    pub(crate) inner: Atom,
}

#[pymethods]
impl PyAtom {
    #[new]
    #[pyo3(signature = (pos=[0.0, 0.0, 0.0], id=1, atom_type=1))]
    fn new(pos: [f64; 3], id: usize, atom_type: i32) -> Self {
        PyAtom {
            inner: Atom::new(id, atom_type, pos),
        }
    }

    fn get_pos(&self) -> [f64; 3] {
        let p = self.inner.position();
        [p.x, p.y, p.z]
    }

    fn get_id(&self) -> usize {
        self.inner.id()
    }

    fn get_type(&self) -> i32 {
        self.inner.atom_type()
    }

    fn get_coordination(&self) -> usize {
        self.inner.coordination()
    }

    /// Indices of the neighbors in the system's atom list.
    fn get_neighbors(&self) -> Vec<usize> {
        self.inner.neighbors().iter().map(|n| n.index).collect()
    }

    fn get_neighborweights(&self) -> Vec<f64> {
        self.inner.neighbors().iter().map(|n| n.weight).collect()
    }

    fn get_vorovector(&self) -> Option<[u32; 4]> {
        self.inner.voronoi_vector()
    }

    fn get_volume(&self) -> Option<f64> {
        self.inner.volume()
    }

    #[pyo3(signature = (q, averaged=false))]
    fn get_q(&self, q: u32, averaged: bool) -> PyResult<f64> {
        let value = if averaged {
            self.inner.aq(q)
        } else {
            self.inner.q(q)
        };
        value.ok_or_else(|| {
            let what = if averaged { "aq" } else { "q" };
            to_py_err(Error::NotCalculated {
                what: format!("{what}{q}"),
            })
        })
    }

    fn get_solid(&self) -> Option<bool> {
        self.inner.is_solid()
    }

    fn get_cluster(&self) -> Option<bool> {
        self.inner.in_largest_cluster()
    }

    fn __repr__(&self) -> String {
        let p = self.inner.position();
        format!(
            "Atom(id={}, type={}, pos=[{}, {}, {}])",
            self.inner.id(),
            self.inner.atom_type(),
            p.x,
            p.y,
            p.z
        )
    }
}

enum PositionData<'a> {
    Slice(&'a [Vector3<f64>]),
    Owned(Vec<Vector3<f64>>),
}

impl std::ops::Deref for PositionData<'_> {
    type Target = [Vector3<f64>];
    fn deref(&self) -> &Self::Target {
        match self {
            Self::Slice(s) => s,
            Self::Owned(v) => v,
        }
    }
}

fn extract_positions<'a>(positions: &'a PyReadonlyArray2<'a, f64>) -> PyResult<PositionData<'a>> {
    if positions.shape()[1] != 3 {
        return Err(PyValueError::new_err("Positions must be (N, 3)"));
    }

    if let Ok(slice) = positions.as_slice()
        && let Ok(cast_slice) = bytemuck::try_cast_slice(slice)
    {
        return Ok(PositionData::Slice(cast_slice));
    }

    // Non-contiguous input
    let pos_view = positions.as_array();
    Ok(PositionData::Owned(
        pos_view
            .rows()
            .into_iter()
            .map(|row| Vector3::new(row[0], row[1], row[2]))
            .collect(),
    ))
}

fn cell_from_boxdims(boxdims: [[f64; 2]; 3]) -> PyResult<Cell> {
    Cell::from_bounds(boxdims).map_err(|e| to_py_err(e.into()))
}

#[pyclass(name = "System")]
pub struct PySystem {
    inner: System,
}

#[pymethods]
impl PySystem {
    #[new]
    fn new() -> Self {
        PySystem {
            inner: System::new(),
        }
    }

    /// Loads atoms into an orthogonal periodic box `[[xlo, xhi], [ylo, yhi], [zlo, zhi]]`.
    fn assign_atoms(&mut self, atoms: Vec<PyAtom>, boxdims: [[f64; 2]; 3]) -> PyResult<()> {
        let cell = cell_from_boxdims(boxdims)?;
        let atoms = atoms.into_iter().map(|a| a.inner).collect();
        self.inner.assign_atoms(atoms, cell).map_err(to_py_err)
    }

    /// Loads an `(N, 3)` position array; ids are numbered from 1.
    #[pyo3(signature = (positions, boxdims, types=None))]
    fn assign_positions(
        &mut self,
        positions: PyReadonlyArray2<'_, f64>,
        boxdims: [[f64; 2]; 3],
        types: Option<Vec<i32>>,
    ) -> PyResult<()> {
        let cell = cell_from_boxdims(boxdims)?;
        let pos = extract_positions(&positions)?;
        if let Some(t) = &types
            && t.len() != pos.len()
        {
            return Err(PyValueError::new_err("types must have one entry per atom"));
        }
        let atoms = pos
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let atom_type = types.as_ref().map_or(1, |t| t[i]);
                Atom::new(i + 1, atom_type, [p.x, p.y, p.z])
            })
            .collect();
        self.inner.assign_atoms(atoms, cell).map_err(to_py_err)
    }

    fn read_inputfile(&mut self, filename: PathBuf) -> PyResult<()> {
        self.inner.read_inputfile(filename).map_err(to_py_err)
    }

    fn write_outputfile(&self, filename: PathBuf) -> PyResult<()> {
        self.inner.write_outputfile(filename).map_err(to_py_err)
    }

    fn get_boxdims(&self) -> Option<[[f64; 3]; 3]> {
        self.inner.cell().map(|c| {
            let h = c.h();
            [
                [h[(0, 0)], h[(1, 0)], h[(2, 0)]],
                [h[(0, 1)], h[(1, 1)], h[(2, 1)]],
                [h[(0, 2)], h[(1, 2)], h[(2, 2)]],
            ]
        })
    }

    #[pyo3(signature = (method="cutoff", cutoff=None))]
    fn get_neighbors(&mut self, method: &str, cutoff: Option<f64>) -> PyResult<()> {
        let method = match (method, cutoff) {
            ("voronoi", _) => NeighborMethod::Voronoi,
            ("cutoff", Some(r)) => NeighborMethod::Cutoff(r),
            ("cutoff", None) => {
                return Err(PyValueError::new_err("method 'cutoff' needs a cutoff"));
            }
            (other, _) => {
                return Err(PyValueError::new_err(format!(
                    "unknown neighbor method '{other}', use 'cutoff' or 'voronoi'"
                )));
            }
        };
        self.inner.find_neighbors(method).map_err(to_py_err)
    }

    fn get_allatoms(&self) -> Vec<PyAtom> {
        self.inner
            .atoms()
            .iter()
            .map(|a| PyAtom { inner: a.clone() })
            .collect()
    }

    fn get_atom(&self, index: usize) -> PyResult<PyAtom> {
        self.inner
            .atom(index)
            .map(|a| PyAtom { inner: a.clone() })
            .map_err(to_py_err)
    }

    fn get_positions<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, numpy::PyArray2<f64>>> {
        let positions: Vec<Vector3<f64>> =
            self.inner.atoms().iter().map(|a| *a.position()).collect();
        let flat: &[f64] = bytemuck::cast_slice(&positions);
        PyArray1::from_slice(py, flat).reshape((positions.len(), 3))
    }

    #[pyo3(signature = (q, averaged=false))]
    fn calculate_q(&mut self, q: Degrees, averaged: bool) -> PyResult<()> {
        let degrees = q.into_vec();
        let res = if averaged {
            self.inner.calculate_aq(&degrees)
        } else {
            self.inner.calculate_q(&degrees)
        };
        res.map_err(to_py_err)
    }

    #[pyo3(signature = (q, averaged=false))]
    fn get_qvals<'py>(
        &self,
        py: Python<'py>,
        q: u32,
        averaged: bool,
    ) -> PyResult<Bound<'py, PyArray1<f64>>> {
        let values = if averaged {
            self.inner.aqvals(q)
        } else {
            self.inner.qvals(q)
        };
        Ok(values.map_err(to_py_err)?.into_pyarray(py))
    }

    #[pyo3(signature = (bonds=7, threshold=0.5, q=6, cluster=true))]
    fn find_solids(
        &mut self,
        bonds: usize,
        threshold: f64,
        q: u32,
        cluster: bool,
    ) -> PyResult<usize> {
        let opts = SolidOptions {
            degree: q,
            bond_threshold: threshold,
            min_bonds: bonds,
            largest_cluster: cluster,
        };
        self.inner.find_solids(&opts).map_err(to_py_err)
    }

    fn __len__(&self) -> usize {
        self.inner.n_atoms()
    }
}

/// Atoms and box dimensions of an ideal crystal.
#[pyfunction]
#[pyo3(signature = (structure, lattice_constant=1.0, repetitions=[1, 1, 1]))]
fn make_crystal(
    structure: &str,
    lattice_constant: f64,
    repetitions: [usize; 3],
) -> PyResult<(Vec<PyAtom>, [[f64; 2]; 3])> {
    let structure: Structure = structure.parse().map_err(to_py_err)?;
    let (atoms, cell) =
        lattice::make_crystal(structure, lattice_constant, repetitions).map_err(to_py_err)?;
    let o = cell.origin();
    let h = cell.h();
    let boxdims = [
        [o.x, o.x + h[(0, 0)]],
        [o.y, o.y + h[(1, 1)]],
        [o.z, o.z + h[(2, 2)]],
    ];
    let atoms = atoms.into_iter().map(|inner| PyAtom { inner }).collect();
    Ok((atoms, boxdims))
}

#[pyfunction]
fn get_num_threads() -> usize {
    config::get_num_threads()
}

#[pyfunction]
fn set_num_threads(n: usize) -> bool {
    config::set_num_threads(n)
}

#[pyfunction]
fn get_brute_force_threshold() -> usize {
    config::get_brute_force_threshold()
}

#[pyfunction]
fn set_brute_force_threshold(val: usize) {
    config::set_brute_force_threshold(val);
}

#[pyfunction]
fn get_parallel_threshold() -> usize {
    config::get_parallel_threshold()
}

#[pyfunction]
fn set_parallel_threshold(val: usize) {
    config::set_parallel_threshold(val);
}

#[pyfunction]
fn get_voronoi_search_factor() -> f64 {
    config::get_voronoi_search_factor()
}

#[pyfunction]
fn set_voronoi_search_factor(val: f64) {
    config::set_voronoi_search_factor(val);
}

#[pyfunction]
fn get_face_area_threshold() -> f64 {
    config::get_face_area_threshold()
}

#[pyfunction]
fn set_face_area_threshold(val: f64) {
    config::set_face_area_threshold(val);
}

#[pyfunction]
#[pyo3(name = "init_logging", signature = (level=None))]
fn py_init_logging(level: Option<String>) {
    crate::init_logging(level.as_deref());
}

#[pymodule]
fn bop_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PySystem>()?;
    m.add_class::<PyAtom>()?;
    m.add_function(wrap_pyfunction!(make_crystal, m)?)?;
    m.add_function(wrap_pyfunction!(get_num_threads, m)?)?;
    m.add_function(wrap_pyfunction!(set_num_threads, m)?)?;
    m.add_function(wrap_pyfunction!(py_init_logging, m)?)?;
    m.add_function(wrap_pyfunction!(get_brute_force_threshold, m)?)?;
    m.add_function(wrap_pyfunction!(set_brute_force_threshold, m)?)?;
    m.add_function(wrap_pyfunction!(get_parallel_threshold, m)?)?;
    m.add_function(wrap_pyfunction!(set_parallel_threshold, m)?)?;
    m.add_function(wrap_pyfunction!(get_voronoi_search_factor, m)?)?;
    m.add_function(wrap_pyfunction!(set_voronoi_search_factor, m)?)?;
    m.add_function(wrap_pyfunction!(get_face_area_threshold, m)?)?;
    m.add_function(wrap_pyfunction!(set_face_area_threshold, m)?)?;
    Ok(())
}

#[cfg(test)]
#[allow(deprecated)]
mod tests {
    use super::*;

    fn bcc_system(n: usize) -> PySystem {
        let (atoms, boxdims) = make_crystal("bcc", 1.0, [n, n, n]).unwrap();
        let mut sys = PySystem::new();
        sys.assign_atoms(atoms, boxdims).unwrap();
        sys
    }

    #[test]
    fn test_make_crystal_boxdims() {
        let (atoms, boxdims) = make_crystal("fcc", 2.0, [2, 1, 3]).unwrap();
        assert_eq!(atoms.len(), 24);
        assert_eq!(boxdims, [[0.0, 4.0], [0.0, 2.0], [0.0, 6.0]]);
        assert!(make_crystal("quasicrystal", 1.0, [1, 1, 1]).is_err());
    }

    #[test]
    fn test_voronoi_vector_through_python_api() {
        let mut sys = bcc_system(2);
        sys.get_neighbors("voronoi", None).unwrap();
        let atoms = sys.get_allatoms();
        assert_eq!(atoms[0].get_vorovector(), Some([0, 6, 0, 8]));
        assert_eq!(atoms[0].get_coordination(), 14);
    }

    #[test]
    fn test_qvals_through_python_api() {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let mut sys = bcc_system(3);
            sys.get_neighbors("cutoff", Some(0.9)).unwrap();
            sys.calculate_q(Degrees::Many(vec![4, 6]), false).unwrap();
            let q6 = sys.get_qvals(py, 6, false).unwrap();
            let q6 = q6.readonly();
            assert!(q6.as_slice().unwrap().iter().all(|q| (q - 0.62854).abs() < 1e-4));
            assert!(sys.get_qvals(py, 8, false).is_err());

            let pos = sys.get_positions(py).unwrap();
            assert_eq!(pos.shape(), [54, 3]);
        });
    }

    #[test]
    fn test_bad_arguments() {
        pyo3::prepare_freethreaded_python();
        let mut sys = bcc_system(2);
        assert!(sys.get_neighbors("cutoff", None).is_err());
        assert!(sys.get_neighbors("delaunay", None).is_err());
        assert!(sys.get_atom(100).is_err());
        assert!(sys.read_inputfile(PathBuf::from("/nonexistent/dump")).is_err());
    }

    #[test]
    fn test_domain_errors_are_value_errors() {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let err = to_py_err(crate::cell::CellError::NotRestrictedTriclinic.into());
            assert!(err.is_instance_of::<PyValueError>(py));
            let err = to_py_err(Error::CoincidentAtoms { i: 0, j: 1 });
            assert!(err.is_instance_of::<PyValueError>(py));
            let err = to_py_err(std::io::Error::other("disk").into());
            assert!(err.is_instance_of::<PyIOError>(py));
        });
    }

    #[test]
    fn test_global_configs() {
        pyo3::prepare_freethreaded_python();
        set_num_threads(2);
        assert!(get_num_threads() > 0);

        py_init_logging(Some("debug".to_string()));

        let old = get_brute_force_threshold();
        set_brute_force_threshold(500);
        assert_eq!(get_brute_force_threshold(), 500);
        set_brute_force_threshold(old);

        assert!(get_voronoi_search_factor() > 0.0);
        assert!((0.0..1.0).contains(&get_face_area_threshold()));
    }
}
