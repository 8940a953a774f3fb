//! Voronoi tessellation by half-space clipping.
//!
//! Each atom's cell starts as a cube around the atom and is cut by the
//! bisector plane of every candidate neighbor image, nearest first. Candidates
//! come from the cell list search; if the search radius turns out too small to
//! guarantee the cell is final, the atom is retried with a larger radius.

use crate::cell::Cell;
use crate::config;
use crate::error::{Error, Result};
use crate::neighbors::{self, Neighbor};
use crate::search::{CellList, Contact};
use nalgebra::Vector3;
use rayon::prelude::*;
use tracing::{debug, info_span};

/// Relative tolerance, in units of the search radius, for plane classification.
const PLANE_EPS: f64 = 1e-9;
/// Relative tolerance, in units of the search radius, for merging vertices.
const MERGE_EPS: f64 = 1e-7;
/// Growth applied to the retry radius on top of twice the cell radius.
const RETRY_MARGIN: f64 = 1.01;
/// The search radius may not exceed this many times the summed box vector lengths.
const RADIUS_CAP_FACTOR: f64 = 4.0;

/// Geometry of one atom's Voronoi cell.
#[derive(Clone, Debug, PartialEq)]
pub struct VoronoiCell {
    pub volume: f64,
    /// Area of each face.
    pub face_areas: Vec<f64>,
    /// Number of edges (equivalently vertices) of each face.
    pub face_vertices: Vec<usize>,
    /// Distinct vertices of the polyhedron.
    pub vertex_count: usize,
    /// Number of faces with 3, 4, 5 and 6 edges.
    pub voronoi_vector: [u32; 4],
}

/// Tessellation result for a single atom.
#[derive(Clone, Debug)]
pub struct TessellatedAtom {
    pub cell: VoronoiCell,
    /// Face-sharing neighbors, weighted by face area and sorted by distance.
    pub neighbors: Vec<Neighbor>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum FaceSource {
    /// Initial bounding cube; never part of a finished cell.
    Bound,
    /// Box wall along a non-periodic axis.
    Wall,
    /// Bisector with the contact at this index.
    Contact(usize),
}

#[derive(Clone, Debug)]
struct Face {
    source: FaceSource,
    vertices: Vec<Vector3<f64>>,
}

impl Face {
    fn area(&self) -> f64 {
        let v0 = self.vertices[0];
        let mut sum = Vector3::zeros();
        for w in self.vertices[1..].windows(2) {
            sum += (w[0] - v0).cross(&(w[1] - v0));
        }
        0.5 * sum.norm()
    }

    /// Volume of the pyramid between this face and the origin.
    fn cone_volume(&self) -> f64 {
        let v0 = self.vertices[0];
        self.vertices[1..]
            .windows(2)
            .map(|w| v0.dot(&w[0].cross(&w[1])).abs() / 6.0)
            .sum()
    }
}

/// Convex polyhedron in coordinates relative to its atom.
struct Polyhedron {
    faces: Vec<Face>,
    plane_tol: f64,
    merge_tol: f64,
    max_radius: f64,
}

impl Polyhedron {
    fn cube(half_width: f64) -> Self {
        let mut faces = Vec::with_capacity(6);
        for axis in 0..3 {
            let (b, c) = ((axis + 1) % 3, (axis + 2) % 3);
            for sign in [-1.0, 1.0] {
                let vertices = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)]
                    .iter()
                    .map(|&(sb, sc)| {
                        let mut v = Vector3::zeros();
                        v[axis] = sign * half_width;
                        v[b] = sb * half_width;
                        v[c] = sc * half_width;
                        v
                    })
                    .collect();
                faces.push(Face {
                    source: FaceSource::Bound,
                    vertices,
                });
            }
        }
        Self {
            faces,
            plane_tol: PLANE_EPS * half_width,
            merge_tol: MERGE_EPS * half_width,
            max_radius: half_width * 3f64.sqrt(),
        }
    }

    /// Keeps the half-space `normal · x <= offset`. `normal` must be a unit vector.
    fn clip(&mut self, normal: &Vector3<f64>, offset: f64, source: FaceSource) {
        let tol = self.plane_tol;
        let cuts = self
            .faces
            .iter()
            .flat_map(|f| f.vertices.iter())
            .any(|v| normal.dot(v) - offset > tol);
        if !cuts {
            return;
        }

        let mut cap_points: Vec<Vector3<f64>> = Vec::new();
        let mut faces = Vec::with_capacity(self.faces.len() + 1);
        for face in self.faces.drain(..) {
            let n = face.vertices.len();
            let mut kept = Vec::with_capacity(n + 1);
            for k in 0..n {
                let a = face.vertices[k];
                let b = face.vertices[(k + 1) % n];
                let sa = normal.dot(&a) - offset;
                let sb = normal.dot(&b) - offset;
                if sa <= tol {
                    kept.push(a);
                    if sa >= -tol {
                        cap_points.push(a);
                    }
                }
                if (sa < -tol && sb > tol) || (sa > tol && sb < -tol) {
                    let p = a + (b - a) * (sa / (sa - sb));
                    kept.push(p);
                    cap_points.push(p);
                }
            }
            dedup_ring(&mut kept, self.merge_tol);
            if kept.len() >= 3 {
                faces.push(Face {
                    source: face.source,
                    vertices: kept,
                });
            }
        }

        let mut cap = Vec::with_capacity(cap_points.len());
        for p in cap_points {
            if !cap.iter().any(|q: &Vector3<f64>| (q - p).norm() <= self.merge_tol) {
                cap.push(p);
            }
        }
        if cap.len() >= 3 {
            order_around(&mut cap, normal);
            faces.push(Face {
                source,
                vertices: cap,
            });
        }

        self.faces = faces;
        self.max_radius = self
            .faces
            .iter()
            .flat_map(|f| f.vertices.iter())
            .map(|v| v.norm())
            .fold(0.0, f64::max);
    }

    fn distinct_vertices(&self) -> usize {
        let mut seen: Vec<Vector3<f64>> = Vec::new();
        for v in self.faces.iter().flat_map(|f| f.vertices.iter()) {
            if !seen.iter().any(|q| (q - v).norm() <= self.merge_tol) {
                seen.push(*v);
            }
        }
        seen.len()
    }
}

/// Removes consecutive (cyclically) coincident points.
fn dedup_ring(points: &mut Vec<Vector3<f64>>, tol: f64) {
    points.dedup_by(|a, b| (*a - *b).norm() <= tol);
    while points.len() > 1 {
        let first = points[0];
        let last = points[points.len() - 1];
        if (first - last).norm() <= tol {
            points.pop();
        } else {
            break;
        }
    }
}

/// Sorts coplanar points counter-clockwise around `normal`.
fn order_around(points: &mut [Vector3<f64>], normal: &Vector3<f64>) {
    let centroid = points.iter().sum::<Vector3<f64>>() / points.len() as f64;
    let u = (points[0] - centroid).normalize();
    let w = normal.cross(&u);
    points.sort_by(|a, b| {
        let angle = |p: &Vector3<f64>| {
            let d = p - centroid;
            d.dot(&w).atan2(d.dot(&u))
        };
        angle(a).total_cmp(&angle(b))
    });
}

/// Outcome of clipping one atom's cell with a given candidate set.
enum CellOutcome {
    Done(TessellatedAtom),
    /// The candidates did not reach far enough; carries the provisional cell radius.
    NeedsRadius(f64),
}

fn build_cell(
    cell: &Cell,
    position: &Vector3<f64>,
    contacts: &[Contact],
    radius: f64,
) -> CellOutcome {
    let mut poly = Polyhedron::cube(radius);

    let frac = cell.to_fractional(position);
    for k in 0..3 {
        if cell.pbc()[k] {
            continue;
        }
        let grad = cell.h_inv().row(k).transpose();
        let norm = grad.norm();
        let normal = grad / norm;
        poly.clip(&normal, (1.0 - frac[k]) / norm, FaceSource::Wall);
        poly.clip(&(-normal), frac[k] / norm, FaceSource::Wall);
    }

    let mut exhausted_early = false;
    for (idx, contact) in contacts.iter().enumerate() {
        let d = contact.dist_sq.sqrt();
        if d >= 2.0 * poly.max_radius {
            exhausted_early = true;
            break;
        }
        poly.clip(&(contact.disp / d), 0.5 * d, FaceSource::Contact(idx));
    }

    let has_bound = poly.faces.iter().any(|f| f.source == FaceSource::Bound);
    if has_bound || (!exhausted_early && 2.0 * poly.max_radius > radius) {
        return CellOutcome::NeedsRadius(poly.max_radius);
    }

    CellOutcome::Done(summarize(&poly, contacts))
}

fn summarize(poly: &Polyhedron, contacts: &[Contact]) -> TessellatedAtom {
    let areas: Vec<f64> = poly.faces.iter().map(Face::area).collect();
    let mean_area = areas.iter().sum::<f64>() / areas.len().max(1) as f64;
    let min_area = config::get_face_area_threshold() * mean_area;

    let mut face_areas = Vec::with_capacity(areas.len());
    let mut face_vertices = Vec::with_capacity(areas.len());
    let mut voronoi_vector = [0u32; 4];
    let mut neighbors = Vec::new();

    for (face, &area) in poly.faces.iter().zip(&areas) {
        if area < min_area {
            continue;
        }
        let edges = face.vertices.len();
        face_areas.push(area);
        face_vertices.push(edges);
        if (3..=6).contains(&edges) {
            voronoi_vector[edges - 3] += 1;
        }
        if let FaceSource::Contact(idx) = face.source {
            let c = &contacts[idx];
            let distance = c.dist_sq.sqrt();
            neighbors.push(Neighbor {
                index: c.j,
                shift: c.shift,
                distance,
                direction: c.disp / distance,
                weight: area,
            });
        }
    }
    neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.index.cmp(&b.index)));

    TessellatedAtom {
        cell: VoronoiCell {
            volume: poly.faces.iter().map(Face::cone_volume).sum(),
            face_areas,
            face_vertices,
            vertex_count: poly.distinct_vertices(),
            voronoi_vector,
        },
        neighbors,
    }
}

/// Computes the Voronoi cell and face-sharing neighbors of every atom.
///
/// Positions along non-periodic axes must lie inside the box; the box walls
/// close the cells there.
pub fn tessellate(
    cell: &Cell,
    positions: &[Vector3<f64>],
    parallel: bool,
) -> Result<Vec<TessellatedAtom>> {
    let n_atoms = positions.len();
    let _span = info_span!("voronoi::tessellate", n_atoms).entered();
    if n_atoms == 0 {
        return Ok(vec![]);
    }

    let spacing = (cell.volume() / n_atoms as f64).cbrt();
    let box_extent: f64 = cell.h().column_iter().map(|c| c.norm()).sum();
    let radius_cap = RADIUS_CAP_FACTOR * box_extent;
    let parallel = parallel && n_atoms >= config::get_parallel_threshold();

    let mut radius = config::get_voronoi_search_factor() * spacing;
    let mut results: Vec<Option<TessellatedAtom>> = vec![None; n_atoms];
    let mut pending: Vec<usize> = (0..n_atoms).collect();

    while !pending.is_empty() {
        if radius > radius_cap {
            return Err(Error::VoronoiUnbounded {
                index: pending[0],
                radius,
            });
        }

        let cl = CellList::build(cell, positions, radius);
        let contacts = cl.search_subset(cell, radius, &pending, parallel);
        for (&i, list) in pending.iter().zip(&contacts) {
            neighbors::check_separation(i, list)?;
        }
        let work = |(&i, list): (&usize, &Vec<Contact>)| {
            (i, build_cell(cell, &positions[i], list, radius))
        };
        let outcomes: Vec<(usize, CellOutcome)> = if parallel {
            pending.par_iter().zip(contacts.par_iter()).map(work).collect()
        } else {
            pending.iter().zip(contacts.iter()).map(work).collect()
        };

        let mut retry = Vec::new();
        let mut next_radius = radius;
        for (i, outcome) in outcomes {
            match outcome {
                CellOutcome::Done(t) => results[i] = Some(t),
                CellOutcome::NeedsRadius(r) => {
                    retry.push(i);
                    next_radius = next_radius.max(2.0 * RETRY_MARGIN * r);
                }
            }
        }

        if !retry.is_empty() {
            debug!(
                n_retry = retry.len(),
                radius, next_radius, "Voronoi search radius too small, retrying"
            );
        }
        pending = retry;
        radius = next_radius;
    }

    Ok(results.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Matrix3;

    fn cubic_cell(l: f64) -> Cell {
        Cell::new(Matrix3::identity() * l, Vector3::new(true, true, true)).unwrap()
    }

    #[test]
    fn test_cube_clip_makes_triangle_corner() {
        let mut poly = Polyhedron::cube(1.0);
        let n = Vector3::new(1.0, 1.0, 1.0).normalize();
        // Cut off the (+,+,+) corner
        poly.clip(&n, 2.0 / 3f64.sqrt(), FaceSource::Contact(0));

        assert_eq!(poly.faces.len(), 7);
        let cap = poly
            .faces
            .iter()
            .find(|f| f.source == FaceSource::Contact(0))
            .unwrap();
        assert_eq!(cap.vertices.len(), 3);
        // Corner tetrahedron with legs of length 1 has volume 1/6
        let volume: f64 = poly.faces.iter().map(Face::cone_volume).sum();
        assert_relative_eq!(volume, 8.0 - 1.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_plane_outside_is_noop() {
        let mut poly = Polyhedron::cube(1.0);
        poly.clip(&Vector3::x(), 1.0, FaceSource::Contact(0));
        poly.clip(&Vector3::x(), 2.0, FaceSource::Contact(1));
        assert_eq!(poly.faces.len(), 6);
        assert!(poly.faces.iter().all(|f| f.source == FaceSource::Bound));
    }

    #[test]
    fn test_simple_cubic_cell() {
        let cell = cubic_cell(3.0);
        let positions: Vec<_> = (0..27)
            .map(|n| Vector3::new((n % 3) as f64, ((n / 3) % 3) as f64, (n / 9) as f64))
            .collect();

        let result = tessellate(&cell, &positions, false).unwrap();
        assert_eq!(result.len(), 27);
        for atom in &result {
            assert_eq!(atom.cell.voronoi_vector, [0, 6, 0, 0]);
            assert_eq!(atom.cell.vertex_count, 8);
            assert_relative_eq!(atom.cell.volume, 1.0, epsilon = 1e-9);
            assert_eq!(atom.neighbors.len(), 6);
            for nb in &atom.neighbors {
                assert_relative_eq!(nb.weight, 1.0, epsilon = 1e-9);
                assert_relative_eq!(nb.distance, 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_single_atom_sees_own_images() {
        let cell = cubic_cell(2.0);
        let result = tessellate(&cell, &[Vector3::new(0.3, 1.1, 1.9)], false).unwrap();

        assert_relative_eq!(result[0].cell.volume, 8.0, epsilon = 1e-9);
        assert_eq!(result[0].neighbors.len(), 6);
        assert!(result[0].neighbors.iter().all(|n| n.index == 0));
    }

    #[test]
    fn test_walls_close_non_periodic_cells() {
        let cell = Cell::new(Matrix3::identity() * 4.0, Vector3::new(false, false, false)).unwrap();
        let positions = vec![Vector3::new(1.0, 2.0, 2.0), Vector3::new(3.0, 2.0, 2.0)];

        let result = tessellate(&cell, &positions, false).unwrap();

        // The box splits into two 2x4x4 halves
        for atom in &result {
            assert_relative_eq!(atom.cell.volume, 32.0, epsilon = 1e-9);
            assert_eq!(atom.cell.voronoi_vector, [0, 6, 0, 0]);
            assert_eq!(atom.neighbors.len(), 1);
            assert_relative_eq!(atom.neighbors[0].weight, 16.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_face_area_threshold_drops_small_faces() {
        // Shifting one atom of a simple cubic lattice splits the fourfold
        // edges of its cube into thin faces shared with diagonal neighbors.
        let cell = cubic_cell(3.0);
        let mut positions: Vec<_> = (0..27)
            .map(|n| Vector3::new((n % 3) as f64, ((n / 3) % 3) as f64, (n / 9) as f64))
            .collect();
        positions[13] += Vector3::repeat(0.01);

        let full = tessellate(&cell, &positions, false).unwrap();
        config::set_face_area_threshold(0.1);
        let filtered = tessellate(&cell, &positions, false);
        config::set_face_area_threshold(0.0);
        let filtered = filtered.unwrap();

        let (full, filtered) = (&full[13], &filtered[13]);
        assert!(full.neighbors.len() > 6);
        assert!(full.cell.face_areas.len() > 6);
        assert!(full.cell.face_areas.iter().any(|&a| a < 0.05));

        assert_eq!(filtered.neighbors.len(), 6);
        assert_eq!(filtered.cell.face_areas.len(), 6);
        assert!(filtered.cell.voronoi_vector.iter().sum::<u32>() <= 6);
        for nb in &filtered.neighbors {
            assert_relative_eq!(nb.distance, 1.0, epsilon = 0.02);
        }
        // Dropped faces still bound the cell
        assert_relative_eq!(full.cell.volume, filtered.cell.volume, epsilon = 1e-12);
    }

    #[test]
    fn test_coincident_atoms_are_rejected() {
        let cell = cubic_cell(4.0);
        let positions = vec![
            Vector3::new(1.0, 1.0, 1.0),
            Vector3::new(3.0, 3.0, 3.0),
            Vector3::new(1.0, 1.0, 1.0),
        ];
        assert!(matches!(
            tessellate(&cell, &positions, false),
            Err(Error::CoincidentAtoms { i: 0, j: 2 })
        ));
    }

    #[test]
    fn test_small_initial_radius_is_retried() {
        // A tiny starting radius only costs retries, never changes results,
        // so other tests running concurrently are unaffected.
        config::set_voronoi_search_factor(0.3);
        let cell = cubic_cell(4.0);
        let positions = vec![Vector3::new(0.5, 0.5, 0.5), Vector3::new(2.5, 2.5, 2.5)];
        let result = tessellate(&cell, &positions, false);
        config::set_voronoi_search_factor(0.0);
        let result = result.unwrap();

        let total: f64 = result.iter().map(|a| a.cell.volume).sum();
        assert_relative_eq!(total, 64.0, epsilon = 1e-8);
        for atom in &result {
            assert_eq!(atom.cell.voronoi_vector, [0, 6, 0, 8]);
            assert_eq!(atom.neighbors.len(), 14);
        }
    }
}
