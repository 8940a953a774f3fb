use crate::cell::Cell;
use nalgebra::Vector3;
use rayon::prelude::*;
use tracing::info_span;

// Internal tuning parameters
const Z_ORDER_BITS: u32 = 21;
const Z_ORDER_CLAMP_MAX: f64 = 0.999999;
const PARALLEL_TASKS_PER_THREAD: usize = 64;

/// A neighbor image of some atom `i`: atom `j` translated by `shift` box vectors.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Contact {
    pub j: usize,
    pub shift: Vector3<i32>,
    /// `r_j + h * shift - r_i`
    pub disp: Vector3<f64>,
    pub dist_sq: f64,
}

/// Per-atom contact lists, indexed by the original atom order.
pub type ContactLists = Vec<Vec<Contact>>;

pub struct CellList {
    /// particles[sorted_idx] = original_idx
    particles: Vec<usize>,
    /// cell_starts[bin_rank] = start index in particles
    cell_starts: Vec<usize>,
    /// Maps linear bin index (bx + nx*(by + ny*bz)) to Morton rank
    bin_ranks: Vec<usize>,
    /// Wrapped positions in sorted order (index matches sorted_idx).
    pos_wrapped: Vec<Vector3<f64>>,
    /// Wrapping shifts in sorted order (index matches sorted_idx).
    atom_shifts: Vec<Vector3<i32>>,
    num_bins: Vector3<usize>,
    n_search: Vector3<i32>,
    pbc: Vector3<bool>,
}

impl CellList {
    /// Bins `positions` for searches up to `cutoff`.
    ///
    /// Along non-periodic axes atoms are expected to lie inside the box; they
    /// are never wrapped and bins do not connect across that boundary.
    pub fn build(cell: &Cell, positions: &[Vector3<f64>], cutoff: f64) -> Self {
        let _span = info_span!("CellList::build", n_atoms = positions.len()).entered();
        let n_atoms = positions.len();
        let pbc = *cell.pbc();

        // 1. Compute Z-order indices in parallel
        let mut atom_data: Vec<(u64, usize)> = {
            let _s = info_span!("compute_z_order").entered();
            positions
                .par_iter()
                .enumerate()
                .map(|(i, pos)| (compute_z_order(&reduced(cell, pos)), i))
                .collect()
        };

        // 2. Sort atoms spatially by global Z-order
        {
            let _s = info_span!("spatial_sort").entered();
            atom_data.sort_unstable_by_key(|&(z, _)| z);
        }

        // 3. Setup bins and compute Morton ranks for bins
        let perp_widths = cell.perpendicular_widths();
        let num_bins = perp_widths.map(|w| ((w / cutoff).floor() as usize).max(1));
        let total_bins = num_bins.x * num_bins.y * num_bins.z;

        let mut bin_ranks = vec![0; total_bins];
        {
            let _s = info_span!("compute_bin_ranks").entered();
            let mut bin_morton: Vec<(u64, usize)> = (0..total_bins)
                .map(|i| {
                    let bx = i % num_bins.x;
                    let by = (i / num_bins.x) % num_bins.y;
                    let bz = i / (num_bins.x * num_bins.y);
                    (
                        interleave_3(bx as u64)
                            | (interleave_3(by as u64) << 1)
                            | (interleave_3(bz as u64) << 2),
                        i,
                    )
                })
                .collect();
            bin_morton.sort_unstable_by_key(|&(z, _)| z);
            for (rank, &(_z, linear_idx)) in bin_morton.iter().enumerate() {
                bin_ranks[linear_idx] = rank;
            }
        }

        let n_search = Vector3::new(
            (cutoff * num_bins.x as f64 / perp_widths.x).ceil() as i32,
            (cutoff * num_bins.y as f64 / perp_widths.y).ceil() as i32,
            (cutoff * num_bins.z as f64 / perp_widths.z).ceil() as i32,
        );

        // 4. Bin every atom once, then count and fill
        let binned: Vec<(usize, Vector3<i32>, usize)> = atom_data
            .iter()
            .map(|&(_z, original_idx)| {
                let frac = cell.to_fractional(&positions[original_idx]);
                let mut shift = Vector3::zeros();
                let mut bin = [0usize; 3];
                for k in 0..3 {
                    let u = if pbc[k] {
                        let f = frac[k].floor();
                        shift[k] = -f as i32;
                        frac[k] - f
                    } else {
                        frac[k]
                    };
                    let b = (u * num_bins[k] as f64).floor();
                    bin[k] = (b.max(0.0) as usize).min(num_bins[k] - 1);
                }
                let linear_idx = bin[0] + num_bins.x * (bin[1] + num_bins.y * bin[2]);
                (original_idx, shift, bin_ranks[linear_idx])
            })
            .collect();

        let mut counts = vec![0; total_bins];
        for &(_, _, rank) in &binned {
            counts[rank] += 1;
        }

        let mut cell_starts = vec![0; total_bins + 1];
        let mut accum = 0;
        for i in 0..total_bins {
            cell_starts[i] = accum;
            accum += counts[i];
        }
        cell_starts[total_bins] = accum;

        let mut final_pos_wrapped = vec![Vector3::zeros(); n_atoms];
        let mut final_atom_shifts = vec![Vector3::zeros(); n_atoms];
        let mut final_particles = vec![0; n_atoms];
        let mut current_fill = cell_starts.clone();

        // 5. Fill final arrays
        {
            let _s = info_span!("bin_fill").entered();
            for &(original_idx, atom_shift, rank) in &binned {
                let loc = current_fill[rank];
                final_pos_wrapped[loc] = positions[original_idx] + cell.image_offset(&atom_shift);
                final_atom_shifts[loc] = atom_shift;
                final_particles[loc] = original_idx;
                current_fill[rank] += 1;
            }
        }

        Self {
            particles: final_particles,
            cell_starts,
            bin_ranks,
            pos_wrapped: final_pos_wrapped,
            atom_shifts: final_atom_shifts,
            num_bins,
            n_search,
            pbc,
        }
    }

    pub fn get_atoms_in_bin(&self, bx: usize, by: usize, bz: usize) -> &[usize] {
        if bx >= self.num_bins.x || by >= self.num_bins.y || bz >= self.num_bins.z {
            return &[];
        }
        let linear_idx = bx + self.num_bins.x * (by + self.num_bins.y * bz);
        let rank = self.bin_ranks[linear_idx];
        &self.particles[self.cell_starts[rank]..self.cell_starts[rank + 1]]
    }

    /// Full contact lists: every image of every atom (its own images included)
    /// closer than `cutoff`, sorted by distance.
    pub fn search(&self, cell: &Cell, cutoff: f64) -> ContactLists {
        let cutoff_sq = cutoff * cutoff;
        let mut lists = vec![Vec::new(); self.particles.len()];
        for si in 0..self.particles.len() {
            let mut contacts = Vec::new();
            self.search_atom_contacts(si, cell, cutoff_sq, &mut contacts);
            sort_contacts(&mut contacts);
            lists[self.particles[si]] = contacts;
        }
        lists
    }

    pub fn par_search(&self, cell: &Cell, cutoff: f64) -> ContactLists {
        let _span = info_span!("CellList::par_search").entered();
        let cutoff_sq = cutoff * cutoff;
        let n_atoms = self.particles.len();

        let num_threads = rayon::current_num_threads();
        let min_len = (n_atoms / (num_threads * PARALLEL_TASKS_PER_THREAD)).max(1);

        let per_sorted: Vec<Vec<Contact>> = (0..n_atoms)
            .into_par_iter()
            .with_min_len(min_len)
            .map(|si| {
                let mut contacts = Vec::new();
                self.search_atom_contacts(si, cell, cutoff_sq, &mut contacts);
                sort_contacts(&mut contacts);
                contacts
            })
            .collect();

        let mut lists = vec![Vec::new(); n_atoms];
        for (si, contacts) in per_sorted.into_iter().enumerate() {
            lists[self.particles[si]] = contacts;
        }
        lists
    }

    /// Contacts of the atoms at the given original indices only, in the same order.
    pub fn search_subset(
        &self,
        cell: &Cell,
        cutoff: f64,
        atoms: &[usize],
        parallel: bool,
    ) -> ContactLists {
        let _span = info_span!("CellList::search_subset", n = atoms.len()).entered();
        let cutoff_sq = cutoff * cutoff;
        let mut sorted_of = vec![0; self.particles.len()];
        for (si, &orig) in self.particles.iter().enumerate() {
            sorted_of[orig] = si;
        }
        let contacts_of = |&i: &usize| {
            let mut contacts = Vec::new();
            self.search_atom_contacts(sorted_of[i], cell, cutoff_sq, &mut contacts);
            sort_contacts(&mut contacts);
            contacts
        };
        if parallel {
            atoms.par_iter().map(contacts_of).collect()
        } else {
            atoms.iter().map(contacts_of).collect()
        }
    }

    fn search_atom_contacts(
        &self,
        si: usize,
        cell: &Cell,
        cutoff_sq: f64,
        contacts: &mut Vec<Contact>,
    ) {
        let pos_i_w = self.pos_wrapped[si];
        let s_i = self.atom_shifts[si];
        let h_matrix = cell.h();

        let frac_i = cell.to_fractional(&pos_i_w);
        let bin_of = |k: usize| {
            let b = (frac_i[k] * self.num_bins[k] as f64).floor().max(0.0) as i32;
            b.min(self.num_bins[k] as i32 - 1)
        };
        let (bx, by, bz) = (bin_of(0), bin_of(1), bin_of(2));

        let i_orig = self.particles[si];

        for dx in -self.n_search.x..=self.n_search.x {
            let (nbx, sx) = div_mod(bx + dx, self.num_bins.x as i32);
            if sx != 0 && !self.pbc.x {
                continue;
            }
            for dy in -self.n_search.y..=self.n_search.y {
                let (nby, sy) = div_mod(by + dy, self.num_bins.y as i32);
                if sy != 0 && !self.pbc.y {
                    continue;
                }
                for dz in -self.n_search.z..=self.n_search.z {
                    let (nbz, sz) = div_mod(bz + dz, self.num_bins.z as i32);
                    if sz != 0 && !self.pbc.z {
                        continue;
                    }

                    let linear_idx = nbx + self.num_bins.x * (nby + self.num_bins.y * nbz);
                    let rank = self.bin_ranks[linear_idx];
                    let start_j = self.cell_starts[rank];
                    let end_j = self.cell_starts[rank + 1];

                    if start_j == end_j {
                        continue;
                    }

                    let offset_vec = h_matrix * Vector3::new(sx as f64, sy as f64, sz as f64);

                    for sorted_idx_j in start_j..end_j {
                        let disp: Vector3<f64> =
                            (self.pos_wrapped[sorted_idx_j] - pos_i_w) + offset_vec;
                        let dist_sq = disp.norm_squared();
                        if dist_sq >= cutoff_sq {
                            continue;
                        }
                        let s_j = self.atom_shifts[sorted_idx_j];
                        let shift = Vector3::new(
                            s_j.x - s_i.x + sx,
                            s_j.y - s_i.y + sy,
                            s_j.z - s_i.z + sz,
                        );
                        let j_orig = self.particles[sorted_idx_j];
                        if j_orig == i_orig && shift == Vector3::zeros() {
                            continue;
                        }
                        contacts.push(Contact {
                            j: j_orig,
                            shift,
                            disp,
                            dist_sq,
                        });
                    }
                }
            }
        }
    }
}

/// Fractional coordinates reduced to [0, 1) on periodic axes.
fn reduced(cell: &Cell, pos: &Vector3<f64>) -> Vector3<f64> {
    let mut frac = cell.to_fractional(pos);
    for k in 0..3 {
        if cell.pbc()[k] {
            frac[k] -= frac[k].floor();
        }
    }
    frac
}

fn sort_contacts(contacts: &mut [Contact]) {
    contacts.sort_by(|a, b| {
        a.dist_sq
            .total_cmp(&b.dist_sq)
            .then(a.j.cmp(&b.j))
            .then_with(|| a.shift.as_slice().cmp(b.shift.as_slice()))
    });
}

fn div_mod(val: i32, max: i32) -> (usize, i32) {
    let rem = val.rem_euclid(max);
    let shift = val.div_euclid(max);
    (rem as usize, shift)
}

/// Computes a 64-bit Morton (Z-order) index for fractional coordinates [0, 1).
fn compute_z_order(frac: &Vector3<f64>) -> u64 {
    let x = (frac.x.clamp(0.0, Z_ORDER_CLAMP_MAX) * (1u64 << Z_ORDER_BITS) as f64) as u64;
    let y = (frac.y.clamp(0.0, Z_ORDER_CLAMP_MAX) * (1u64 << Z_ORDER_BITS) as f64) as u64;
    let z = (frac.z.clamp(0.0, Z_ORDER_CLAMP_MAX) * (1u64 << Z_ORDER_BITS) as f64) as u64;

    interleave_3(x) | (interleave_3(y) << 1) | (interleave_3(z) << 2)
}

fn interleave_3(mut x: u64) -> u64 {
    x &= 0x1fffff;
    x = (x | x << 32) & 0x1f00000000ffffu64;
    x = (x | x << 16) & 0x1f0000ff0000ffu64;
    x = (x | x << 8) & 0x100f00f00f00f00fu64;
    x = (x | x << 4) & 0x10c30c30c30c30c3u64;
    x = (x | x << 2) & 0x1249249249249249u64;
    x
}

/// O(N²) reference search using the minimum image convention.
///
/// Only valid when `2 * cutoff` is smaller than every perpendicular width of
/// the cell, so that no pair has more than one image within the cutoff.
pub fn brute_force_search(cell: &Cell, positions: &[Vector3<f64>], cutoff: f64) -> ContactLists {
    let _span = info_span!("brute_force_search", n_atoms = positions.len()).entered();
    let n = positions.len();
    let cutoff_sq = cutoff * cutoff;
    let mut lists = vec![Vec::new(); n];

    for i in 0..n {
        for j in (i + 1)..n {
            let (shift, disp) = cell.get_shift_and_displacement(&positions[i], &positions[j]);
            let dist_sq = disp.norm_squared();
            if dist_sq < cutoff_sq {
                lists[i].push(Contact {
                    j,
                    shift,
                    disp,
                    dist_sq,
                });
                lists[j].push(Contact {
                    j: i,
                    shift: -shift,
                    disp: -disp,
                    dist_sq,
                });
            }
        }
    }
    for contacts in &mut lists {
        sort_contacts(contacts);
    }
    lists
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Matrix3;

    fn cubic(l: f64) -> Cell {
        Cell::new(Matrix3::identity() * l, Vector3::new(true, true, true)).unwrap()
    }

    fn pairs(lists: &ContactLists) -> Vec<(usize, usize, [i32; 3])> {
        let mut out: Vec<_> = lists
            .iter()
            .enumerate()
            .flat_map(|(i, c)| c.iter().map(move |c| (i, c.j, [c.shift.x, c.shift.y, c.shift.z])))
            .collect();
        out.sort();
        out
    }

    #[test]
    fn test_z_order_calculation() {
        let z1 = compute_z_order(&Vector3::new(0.1, 0.1, 0.1));
        let z2 = compute_z_order(&Vector3::new(0.1, 0.1, 0.11));
        let z3 = compute_z_order(&Vector3::new(0.9, 0.9, 0.9));

        assert!(z1 < z2);
        assert!(z2 < z3);

        // Test clamping
        let z_out = compute_z_order(&Vector3::new(1.1, -0.1, 0.5));
        assert!(z_out > 0);
    }

    #[test]
    fn test_cell_list_structure() {
        let cell = cubic(10.0);
        let positions = vec![
            Vector3::new(1.0, 1.0, 1.0), // Bin [0, 0, 0]
            Vector3::new(9.0, 9.0, 9.0), // Bin [2, 2, 2]
            Vector3::new(1.1, 1.1, 1.1), // Bin [0, 0, 0]
        ];

        let cl = CellList::build(&cell, &positions, 3.0);

        assert_eq!(cl.num_bins, Vector3::new(3, 3, 3));

        let bin0 = cl.get_atoms_in_bin(0, 0, 0);
        assert_eq!(bin0.len(), 2);
        assert!(bin0.contains(&0));
        assert!(bin0.contains(&2));

        assert_eq!(cl.get_atoms_in_bin(2, 2, 2), &[1]);
        assert!(cl.get_atoms_in_bin(1, 1, 1).is_empty());
        assert!(cl.get_atoms_in_bin(5, 0, 0).is_empty());
    }

    #[test]
    fn test_contacts_are_symmetric_and_periodic() {
        let cell = cubic(10.0);
        let positions = vec![
            Vector3::new(1.0, 1.0, 1.0),
            Vector3::new(1.2, 1.2, 1.2), // Neighbor to 0
            Vector3::new(9.9, 9.9, 9.9), // Neighbor to 0 via PBC
            Vector3::new(5.0, 5.0, 5.0), // Isolated
        ];

        let cl = CellList::build(&cell, &positions, 2.0);
        let lists = cl.search(&cell, 2.0);

        assert_eq!(lists[0].len(), 2);
        assert!(lists[3].is_empty());

        let via_pbc = lists[0].iter().find(|c| c.j == 2).unwrap();
        assert_eq!(via_pbc.shift, Vector3::new(-1, -1, -1));
        assert_relative_eq!(via_pbc.disp, Vector3::new(-1.1, -1.1, -1.1), epsilon = 1e-12);

        let back = lists[2].iter().find(|c| c.j == 0).unwrap();
        assert_eq!(back.shift, Vector3::new(1, 1, 1));
        // Sorted by distance: atom 1 is closer to 0 than atom 2
        assert_eq!(lists[0][0].j, 1);
    }

    #[test]
    fn test_self_images_in_small_box() {
        // A single atom in a box of width 1 sees its 6 face images at 1.0
        let cell = cubic(1.0);
        let positions = vec![Vector3::new(0.5, 0.5, 0.5)];

        let cl = CellList::build(&cell, &positions, 1.2);
        let lists = cl.search(&cell, 1.2);

        assert_eq!(lists[0].len(), 6);
        for c in &lists[0] {
            assert_eq!(c.j, 0);
            assert_relative_eq!(c.dist_sq, 1.0, epsilon = 1e-12);
        }

        // Up to the face-diagonal images: 6 + 12
        let cl = CellList::build(&cell, &positions, 1.5);
        assert_eq!(cl.par_search(&cell, 1.5)[0].len(), 18);
    }

    #[test]
    fn test_non_periodic_axis_does_not_connect() {
        let cell = Cell::new(Matrix3::identity() * 10.0, Vector3::new(true, true, false)).unwrap();
        let positions = vec![Vector3::new(5.0, 5.0, 0.5), Vector3::new(5.0, 5.0, 9.5)];

        let cl = CellList::build(&cell, &positions, 2.0);
        let lists = cl.search(&cell, 2.0);
        assert!(lists.iter().all(|c| c.is_empty()));
    }

    #[test]
    fn test_cell_list_search_vs_brute_force() {
        let cell = cubic(10.0);
        let positions = vec![
            Vector3::new(1.0, 1.0, 1.0),
            Vector3::new(1.2, 1.2, 1.2),
            Vector3::new(9.8, 9.8, 9.8),
            Vector3::new(5.0, 5.0, 5.0),
            Vector3::new(5.5, 4.0, 5.0),
        ];

        let cutoff = 2.0;
        let expected = brute_force_search(&cell, &positions, cutoff);
        let cl = CellList::build(&cell, &positions, cutoff);

        assert_eq!(pairs(&cl.search(&cell, cutoff)), pairs(&expected));
        assert_eq!(pairs(&cl.par_search(&cell, cutoff)), pairs(&expected));
    }

    #[test]
    fn test_subset_matches_full_search() {
        let cell = cubic(6.0);
        let mut positions = Vec::new();
        for i in 0..4 {
            for j in 0..4 {
                for k in 0..4 {
                    positions.push(Vector3::new(i as f64, j as f64, k as f64) * 1.5);
                }
            }
        }
        let cl = CellList::build(&cell, &positions, 1.6);
        let full = cl.par_search(&cell, 1.6);
        let subset = cl.search_subset(&cell, 1.6, &[3, 17, 40], true);

        assert_eq!(subset[0], full[3]);
        assert_eq!(subset[1], full[17]);
        assert_eq!(subset[2], full[40]);
        assert!(full.iter().all(|c| c.len() == 6));
    }

    #[cfg(feature = "dhat-heap")]
    #[test]
    fn test_memory_profile() {
        let _profiler = dhat::Profiler::new_heap();

        let cell = cubic(20.0);
        let mut positions = Vec::new();
        for i in 0..100 {
            for j in 0..100 {
                positions.push(Vector3::new(i as f64 * 0.2, j as f64 * 0.2, 0.0));
            }
        }

        let cl = CellList::build(&cell, &positions, 3.0);
        let _ = cl.par_search(&cell, 3.0);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_search_correctness(
                box_size in 10.0..20.0,
                cutoff in 1.0..3.0,
                positions_data in prop::collection::vec(prop::collection::vec(-5.0..25.0, 3), 2..50)
            ) {
                let cell = cubic(box_size);
                let positions: Vec<_> = positions_data
                    .iter()
                    .map(|p| Vector3::new(p[0], p[1], p[2]))
                    .collect();

                let expected = brute_force_search(&cell, &positions, cutoff);
                let cl = CellList::build(&cell, &positions, cutoff);
                let result = cl.search(&cell, cutoff);

                prop_assert_eq!(pairs(&result), pairs(&expected));
            }
        }
    }
}
