use crate::neighbors::Neighbor;
use crate::order::{MIN_DEGREE, N_DEGREES};
use crate::voronoi::VoronoiCell;
use nalgebra::Vector3;

/// An atom together with the analysis results its [`System`](crate::System) computed.
#[derive(Clone, Debug, PartialEq)]
pub struct Atom {
    id: usize,
    atom_type: i32,
    position: Vector3<f64>,
    pub(crate) neighbors: Option<Vec<Neighbor>>,
    pub(crate) voronoi: Option<VoronoiCell>,
    pub(crate) q: [Option<f64>; N_DEGREES],
    pub(crate) aq: [Option<f64>; N_DEGREES],
    pub(crate) solid_bonds: Option<usize>,
    pub(crate) solid: Option<bool>,
    pub(crate) in_largest_cluster: Option<bool>,
}

impl Atom {
    pub fn new(id: usize, atom_type: i32, position: [f64; 3]) -> Self {
        Self {
            id,
            atom_type,
            position: Vector3::from(position),
            neighbors: None,
            voronoi: None,
            q: [None; N_DEGREES],
            aq: [None; N_DEGREES],
            solid_bonds: None,
            solid: None,
            in_largest_cluster: None,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn atom_type(&self) -> i32 {
        self.atom_type
    }

    pub fn position(&self) -> &Vector3<f64> {
        &self.position
    }

    pub(crate) fn set_position(&mut self, position: Vector3<f64>) {
        self.position = position;
    }

    /// Neighbor list, empty until neighbors have been computed.
    pub fn neighbors(&self) -> &[Neighbor] {
        self.neighbors.as_deref().unwrap_or(&[])
    }

    pub fn coordination(&self) -> usize {
        self.neighbors().len()
    }

    pub fn voronoi(&self) -> Option<&VoronoiCell> {
        self.voronoi.as_ref()
    }

    /// Counts of Voronoi faces with 3, 4, 5 and 6 edges.
    pub fn voronoi_vector(&self) -> Option<[u32; 4]> {
        self.voronoi.as_ref().map(|v| v.voronoi_vector)
    }

    pub fn volume(&self) -> Option<f64> {
        self.voronoi.as_ref().map(|v| v.volume)
    }

    /// `q_l`, if it was calculated for degree `l`.
    pub fn q(&self, l: u32) -> Option<f64> {
        degree_slot(l).and_then(|k| self.q[k])
    }

    /// Averaged `q_l`, if it was calculated for degree `l`.
    pub fn aq(&self, l: u32) -> Option<f64> {
        degree_slot(l).and_then(|k| self.aq[k])
    }

    pub fn solid_bonds(&self) -> Option<usize> {
        self.solid_bonds
    }

    pub fn is_solid(&self) -> Option<bool> {
        self.solid
    }

    pub fn in_largest_cluster(&self) -> Option<bool> {
        self.in_largest_cluster
    }

    /// Drops every analysis result.
    pub(crate) fn reset(&mut self) {
        self.neighbors = None;
        self.voronoi = None;
        self.reset_order();
    }

    /// Drops the results that depend on the neighbor list.
    pub(crate) fn reset_order(&mut self) {
        self.q = [None; N_DEGREES];
        self.aq = [None; N_DEGREES];
        self.solid_bonds = None;
        self.solid = None;
        self.in_largest_cluster = None;
    }
}

pub(crate) fn degree_slot(l: u32) -> Option<usize> {
    l.checked_sub(MIN_DEGREE)
        .map(|k| k as usize)
        .filter(|&k| k < N_DEGREES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_atom_has_no_results() {
        let atom = Atom::new(7, 2, [1.0, 2.0, 3.0]);
        assert_eq!(atom.id(), 7);
        assert_eq!(atom.atom_type(), 2);
        assert_eq!(atom.position(), &Vector3::new(1.0, 2.0, 3.0));
        assert!(atom.neighbors().is_empty());
        assert_eq!(atom.voronoi_vector(), None);
        assert_eq!(atom.q(6), None);
        assert_eq!(atom.is_solid(), None);
    }

    #[test]
    fn test_degree_slots() {
        assert_eq!(degree_slot(1), None);
        assert_eq!(degree_slot(2), Some(0));
        assert_eq!(degree_slot(12), Some(10));
        assert_eq!(degree_slot(13), None);
    }
}
