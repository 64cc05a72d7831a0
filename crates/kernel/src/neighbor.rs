//! Neighbour gathering.
//!
//! Two interchangeable strategies produce candidate interaction lists:
//! a uniform-grid spatial hash (sorted-index + cell-offset arrays, no
//! pointer chasing) and a brute-force scan used for small systems and as
//! the reference in tests.  A candidate list always carries the largest
//! smoothing length it can support, `h_max`: the h-solver reports back when
//! a particle's kernel outgrows the list so the caller can widen the search
//! and retry.

use crate::particle::ParticleArrays;
use crate::{vec, BIG_NUMBER};

/// A candidate neighbour list and the largest smoothing length for which it
/// is guaranteed complete.
#[derive(Debug, Clone)]
pub struct GatherList {
    /// Candidate neighbour indices (never includes the target particle).
    pub neighbors: Vec<usize>,
    /// Upper bound on h supported by this list.
    pub h_max: f64,
}

/// Brute-force neighbour search: every other particle is a candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BruteForceSearch;

impl BruteForceSearch {
    /// All particles except `i`, valid for any smoothing length.
    pub fn gather_all<const D: usize>(&self, parts: &ParticleArrays<D>, i: usize) -> GatherList {
        let neighbors = (0..parts.total()).filter(|&j| j != i).collect();
        GatherList { neighbors, h_max: BIG_NUMBER }
    }

    /// Particles within `radius` of `pos` (excluding `exclude`).
    pub fn gather_within<const D: usize>(
        &self,
        parts: &ParticleArrays<D>,
        pos: &[f64; D],
        radius: f64,
        exclude: Option<usize>,
    ) -> Vec<usize> {
        let radius_sqd = radius * radius;
        (0..parts.total())
            .filter(|&j| Some(j) != exclude)
            .filter(|&j| {
                let dr = vec::sub(&parts.r[j], pos);
                vec::dot(&dr, &dr) <= radius_sqd
            })
            .collect()
    }
}

/// Uniform-grid spatial hash over a fixed axis-aligned domain.
///
/// Cell size is normally the kernel support of the largest smoothing length
/// so a one-cell neighbourhood suffices; larger query radii scan
/// proportionally more cells.
#[derive(Debug, Clone)]
pub struct UniformGrid<const D: usize> {
    cell_size: f64,
    grid_min: [f64; D],
    dims: [usize; D],
    cell_indices: Vec<u32>,
    sorted_indices: Vec<u32>,
    cell_offsets: Vec<u32>,
    cell_counts: Vec<u32>,
}

impl<const D: usize> UniformGrid<D> {
    /// Create a grid covering `[domain_min, domain_max]`.
    pub fn new(cell_size: f64, domain_min: [f64; D], domain_max: [f64; D]) -> Self {
        assert!(cell_size > 0.0, "cell_size must be positive");
        let mut dims = [1usize; D];
        for k in 0..D {
            dims[k] = (((domain_max[k] - domain_min[k]) / cell_size).ceil() as usize).max(1);
        }
        let total: usize = dims.iter().product();
        Self {
            cell_size,
            grid_min: domain_min,
            dims,
            cell_indices: Vec::new(),
            sorted_indices: Vec::new(),
            cell_offsets: vec![0; total],
            cell_counts: vec![0; total],
        }
    }

    fn total_cells(&self) -> usize {
        self.dims.iter().product()
    }

    #[inline]
    fn cell_coords(&self, pos: &[f64; D]) -> [usize; D] {
        let mut c = [0usize; D];
        for k in 0..D {
            let t = ((pos[k] - self.grid_min[k]) / self.cell_size).floor();
            c[k] = (t.max(0.0) as usize).min(self.dims[k] - 1);
        }
        c
    }

    #[inline]
    fn flatten(&self, c: &[usize; D]) -> usize {
        let mut idx = 0;
        let mut stride = 1;
        for k in 0..D {
            idx += c[k] * stride;
            stride *= self.dims[k];
        }
        idx
    }

    /// Rebuild the grid from current particle positions.
    pub fn update(&mut self, r: &[[f64; D]]) {
        let n = r.len();
        let total = self.total_cells();

        self.cell_indices.resize(n, 0);
        for (i, pos) in r.iter().enumerate() {
            let c = self.cell_coords(pos);
            self.cell_indices[i] = self.flatten(&c) as u32;
        }

        self.cell_counts.clear();
        self.cell_counts.resize(total, 0);
        for &ci in &self.cell_indices {
            self.cell_counts[ci as usize] += 1;
        }

        self.cell_offsets.clear();
        self.cell_offsets.resize(total, 0);
        let mut running = 0u32;
        for c in 0..total {
            self.cell_offsets[c] = running;
            running += self.cell_counts[c];
        }

        self.sorted_indices.resize(n, 0);
        let mut write_heads = self.cell_offsets.clone();
        for i in 0..n {
            let ci = self.cell_indices[i] as usize;
            self.sorted_indices[write_heads[ci] as usize] = i as u32;
            write_heads[ci] += 1;
        }
    }

    /// Invoke `f` for every particle within `radius` of `pos`, excluding
    /// `exclude`.  Scans as many cell shells as the radius requires.
    pub fn for_each_neighbor<F>(
        &self,
        pos: &[f64; D],
        radius: f64,
        exclude: Option<usize>,
        r: &[[f64; D]],
        mut f: F,
    ) where
        F: FnMut(usize),
    {
        let centre = self.cell_coords(pos);
        let reach = (radius / self.cell_size).ceil() as i64;
        let side = (2 * reach + 1) as usize;
        let total: usize = (0..D).map(|_| side).product();
        let radius_sqd = radius * radius;

        'cells: for t in 0..total {
            let mut rem = t;
            let mut c = [0usize; D];
            for k in 0..D {
                let delta = (rem % side) as i64 - reach;
                rem /= side;
                let ck = centre[k] as i64 + delta;
                if ck < 0 || ck >= self.dims[k] as i64 {
                    continue 'cells;
                }
                c[k] = ck as usize;
            }
            let cell = self.flatten(&c);
            let start = self.cell_offsets[cell] as usize;
            let count = self.cell_counts[cell] as usize;
            for s in start..start + count {
                let j = self.sorted_indices[s] as usize;
                if Some(j) == exclude {
                    continue;
                }
                let dr = vec::sub(&r[j], pos);
                if vec::dot(&dr, &dr) <= radius_sqd {
                    f(j);
                }
            }
        }
    }

    /// Gather a candidate list for particle `i` complete out to `radius`.
    /// The returned `h_max` is `radius` divided by the kernel range factor
    /// supplied by the caller.
    pub fn gather(
        &self,
        parts: &ParticleArrays<D>,
        i: usize,
        radius: f64,
        kern_range: f64,
    ) -> GatherList {
        let mut neighbors = Vec::new();
        self.for_each_neighbor(&parts.r[i], radius, Some(i), &parts.r, |j| {
            neighbors.push(j);
        });
        GatherList { neighbors, h_max: radius / kern_range }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::ParticleArrays;

    fn three_particles() -> ParticleArrays<3> {
        let mut p = ParticleArrays::<3>::with_capacity(8);
        p.push_particle([0.5, 0.5, 0.5], [0.0; 3], 1.0, 0.1, 1.0).unwrap();
        p.push_particle([0.51, 0.5, 0.5], [0.0; 3], 1.0, 0.1, 1.0).unwrap();
        p.push_particle([0.9, 0.9, 0.9], [0.0; 3], 1.0, 0.1, 1.0).unwrap();
        p
    }

    #[test]
    fn brute_force_gathers_everyone() {
        let p = three_particles();
        let list = BruteForceSearch.gather_all(&p, 0);
        assert_eq!(list.neighbors, vec![1, 2]);
        assert!(list.h_max > 1.0e20);
    }

    #[test]
    fn brute_force_radius_filter() {
        let p = three_particles();
        let close = BruteForceSearch.gather_within(&p, &[0.5, 0.5, 0.5], 0.2, Some(0));
        assert_eq!(close, vec![1]);
    }

    #[test]
    fn grid_finds_close_pair() {
        let p = three_particles();
        let mut grid = UniformGrid::<3>::new(0.2, [0.0; 3], [1.0; 3]);
        grid.update(&p.r);

        let mut found = Vec::new();
        grid.for_each_neighbor(&p.r[0], 0.2, Some(0), &p.r, |j| found.push(j));
        assert_eq!(found, vec![1]);
    }

    #[test]
    fn grid_cross_cell_boundary() {
        let mut p = ParticleArrays::<2>::with_capacity(4);
        p.push_particle([0.19, 0.5], [0.0; 2], 1.0, 0.1, 1.0).unwrap();
        p.push_particle([0.21, 0.5], [0.0; 2], 1.0, 0.1, 1.0).unwrap();
        let mut grid = UniformGrid::<2>::new(0.2, [0.0; 2], [1.0; 2]);
        grid.update(&p.r);

        let mut found = Vec::new();
        grid.for_each_neighbor(&p.r[0], 0.2, Some(0), &p.r, |j| found.push(j));
        assert_eq!(found, vec![1]);
    }

    #[test]
    fn grid_wide_radius_scans_multiple_shells() {
        let mut p = ParticleArrays::<1>::with_capacity(16);
        for i in 0..10 {
            p.push_particle([0.05 + 0.1 * i as f64], [0.0], 1.0, 0.1, 1.0).unwrap();
        }
        let mut grid = UniformGrid::<1>::new(0.1, [0.0], [1.0]);
        grid.update(&p.r);

        let mut found = Vec::new();
        grid.for_each_neighbor(&p.r[0], 0.35, Some(0), &p.r, |j| found.push(j));
        found.sort_unstable();
        assert_eq!(found, vec![1, 2, 3]);
    }

    #[test]
    fn grid_matches_brute_force() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(7);
        let mut p = ParticleArrays::<3>::with_capacity(256);
        for _ in 0..200 {
            let r = [rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()];
            p.push_particle(r, [0.0; 3], 1.0, 0.05, 1.0).unwrap();
        }
        let mut grid = UniformGrid::<3>::new(0.13, [0.0; 3], [1.0; 3]);
        grid.update(&p.r);

        for i in (0..200).step_by(17) {
            let mut from_grid = Vec::new();
            grid.for_each_neighbor(&p.r[i], 0.13, Some(i), &p.r, |j| from_grid.push(j));
            from_grid.sort_unstable();
            let mut from_brute = BruteForceSearch.gather_within(&p, &p.r[i], 0.13, Some(i));
            from_brute.sort_unstable();
            assert_eq!(from_grid, from_brute, "mismatch for particle {i}");
        }
    }
}
