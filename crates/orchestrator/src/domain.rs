//! Binary partition tree for domain decomposition.
//!
//! A complete binary tree of depth log2(N_worker) splits space by
//! axis-cycling planes, one worker per leaf.  Cells are stored in
//! pre-order: the first child of cell `c` is `c + 1`, the second child
//! index is stored (0 marks a leaf, as the root can never be a child).
//!
//! The initial decomposition splits particle counts evenly (median
//! planes).  Load balancing then shifts one level of planes per pass,
//! visiting levels cyclically from the bottom up: each internal node on
//! the active level moves its plane toward the heavier child by
//!
//! ```text
//! dx = (W_2 - W_1) / (dW/dx|_1 + dW/dx|_2)
//! dW/dx|_c ~= 0.5 W_c / (box_edge_c - work_centroid_c)
//! ```
//!
//! and the new planes propagate down to the leaf boxes.

use kernel::{SphError, BIG_NUMBER};

/// One cell of the partition tree.
#[derive(Debug, Clone, Copy)]
pub struct TreeCell<const D: usize> {
    /// Bounding box minimum.
    pub bbmin: [f64; D],
    /// Bounding box maximum.
    pub bbmax: [f64; D],
    /// Index of the second child; 0 marks a leaf.
    pub c2: usize,
    /// Worker id for leaf cells.
    pub c2g: usize,
    /// Tree level of this cell (root is 0).
    pub clevel: u32,
    /// Split axis (internal cells).
    pub split_axis: usize,
    /// Split plane coordinate (internal cells).
    pub split: f64,
    /// Total work in the subtree.
    pub worktot: f64,
    /// Work centroid of the subtree.
    pub rwork: [f64; D],
}

/// Binary partition tree with one leaf per worker.
#[derive(Debug, Clone)]
pub struct PartitionTree<const D: usize> {
    /// Cells in pre-order.
    pub cells: Vec<TreeCell<D>>,
    /// Tree depth (log2 of the worker count).
    pub ltot: u32,
    /// Split axis per level (axis-cycling from the widest spread).
    pub klevel: Vec<usize>,
    /// Number of workers (leaves).
    pub n_workers: usize,
    balance_level: i64,
}

impl<const D: usize> PartitionTree<D> {
    /// Build the tree from all particle positions with equal weights, so
    /// every worker starts with the same particle count.
    ///
    /// `root_min`/`root_max` fix the root box; open boundaries should pass
    /// the +-BIG sentinels.
    pub fn build(
        n_workers: usize,
        root_min: [f64; D],
        root_max: [f64; D],
        positions: &[[f64; D]],
    ) -> Result<Self, SphError> {
        if n_workers == 0 || !n_workers.is_power_of_two() {
            return Err(SphError::Config(format!(
                "worker count must be a power of two, got {n_workers}"
            )));
        }
        let ltot = n_workers.trailing_zeros();

        // Axis-cycling starts from the axis of widest particle spread.
        let mut widest = 0;
        let mut widest_span = -1.0;
        for k in 0..D {
            let lo = positions.iter().map(|r| r[k]).fold(f64::INFINITY, f64::min);
            let hi = positions.iter().map(|r| r[k]).fold(f64::NEG_INFINITY, f64::max);
            let span = hi - lo;
            if span > widest_span {
                widest_span = span;
                widest = k;
            }
        }
        let klevel: Vec<usize> = (0..ltot as usize).map(|l| (widest + l) % D).collect();

        let ncell = 2 * n_workers - 1;
        let cell = TreeCell {
            bbmin: root_min,
            bbmax: root_max,
            c2: 0,
            c2g: 0,
            clevel: 0,
            split_axis: 0,
            split: 0.0,
            worktot: 0.0,
            rwork: [0.0; D],
        };
        let mut tree = Self {
            cells: vec![cell; ncell],
            ltot,
            klevel,
            n_workers,
            balance_level: 0,
        };

        let mut idxs: Vec<usize> = (0..positions.len()).collect();
        let mut next_leaf = 0;
        tree.split_cell(0, 0, &mut idxs, positions, &mut next_leaf);
        tree.propagate_boxes();
        Ok(tree)
    }

    fn split_cell(
        &mut self,
        c: usize,
        level: u32,
        idxs: &mut [usize],
        positions: &[[f64; D]],
        next_leaf: &mut usize,
    ) {
        self.cells[c].clevel = level;
        if level == self.ltot {
            self.cells[c].c2 = 0;
            self.cells[c].c2g = *next_leaf;
            *next_leaf += 1;
            return;
        }

        let k = self.klevel[level as usize];
        let mid = idxs.len() / 2;
        idxs.sort_by(|&a, &b| positions[a][k].total_cmp(&positions[b][k]));
        let split = if idxs.is_empty() {
            0.5 * (self.cells[c].bbmin[k] + self.cells[c].bbmax[k])
        } else if mid == 0 || mid == idxs.len() {
            0.5 * (self.cells[c].bbmin[k].max(-BIG_NUMBER)
                + self.cells[c].bbmax[k].min(BIG_NUMBER))
        } else {
            0.5 * (positions[idxs[mid - 1]][k] + positions[idxs[mid]][k])
        };
        self.cells[c].split_axis = k;
        self.cells[c].split = split;

        // Pre-order layout: first child at c+1, second child after the
        // whole first subtree.
        let subtree = (1usize << (self.ltot - level)) - 1;
        let c2 = c + 1 + subtree;
        self.cells[c].c2 = c2;

        let (left, right) = idxs.split_at_mut(mid);
        self.split_cell(c + 1, level + 1, left, positions, next_leaf);
        self.split_cell(c2, level + 1, right, positions, next_leaf);
    }

    /// Rebuild every cell box from the root box and the stored planes.
    fn propagate_boxes(&mut self) {
        for c in 0..self.cells.len() {
            let cell = self.cells[c];
            if cell.c2 == 0 {
                continue;
            }
            let k = cell.split_axis;
            let c1 = c + 1;
            let c2 = cell.c2;
            self.cells[c1].bbmin = cell.bbmin;
            self.cells[c1].bbmax = cell.bbmax;
            self.cells[c1].bbmax[k] = cell.split;
            self.cells[c2].bbmin = cell.bbmin;
            self.cells[c2].bbmax = cell.bbmax;
            self.cells[c2].bbmin[k] = cell.split;
        }
    }

    /// Leaf cell index of a worker.
    fn leaf_of(&self, worker: usize) -> usize {
        let mut c = 0;
        loop {
            let cell = self.cells[c];
            if cell.c2 == 0 {
                debug_assert_eq!(cell.c2g, worker);
                return c;
            }
            // Count leaves in the first subtree to steer the descent.
            let leaves_left = 1usize << (self.ltot - cell.clevel - 1);
            let first_leaf = self.first_leaf_id(c);
            if worker < first_leaf + leaves_left {
                c += 1;
            } else {
                c = cell.c2;
            }
        }
    }

    fn first_leaf_id(&self, mut c: usize) -> usize {
        while self.cells[c].c2 != 0 {
            c += 1;
        }
        self.cells[c].c2g
    }

    /// Bounding box of a worker's domain.
    pub fn worker_box(&self, worker: usize) -> ([f64; D], [f64; D]) {
        let c = self.leaf_of(worker);
        (self.cells[c].bbmin, self.cells[c].bbmax)
    }

    /// Worker owning a position.
    pub fn worker_of(&self, pos: &[f64; D]) -> usize {
        let mut c = 0;
        loop {
            let cell = self.cells[c];
            if cell.c2 == 0 {
                return cell.c2g;
            }
            if pos[cell.split_axis] <= cell.split {
                c += 1;
            } else {
                c = cell.c2;
            }
        }
    }

    /// One load-balancing pass.
    ///
    /// `worktot[w]` is worker w's total work (sum of 1/n_step over its
    /// particles) and `rwork[w]` its work centroid.  Adjusts the planes of
    /// one tree level (cycling bottom-up across calls) and repropagates
    /// the leaf boxes.
    pub fn load_balance(&mut self, worktot: &[f64], rwork: &[[f64; D]]) {
        if self.n_workers == 1 {
            return;
        }

        // Propagate work upwards from the leaves.
        for c in (0..self.cells.len()).rev() {
            let cell = self.cells[c];
            if cell.c2 == 0 {
                let w = cell.c2g;
                self.cells[c].worktot = worktot[w];
                self.cells[c].rwork = rwork[w];
            } else {
                let w1 = self.cells[c + 1].worktot;
                let w2 = self.cells[cell.c2].worktot;
                let total = w1 + w2;
                self.cells[c].worktot = total;
                for k in 0..D {
                    self.cells[c].rwork[k] = if total > 0.0 {
                        (w1 * self.cells[c + 1].rwork[k] + w2 * self.cells[cell.c2].rwork[k])
                            / total
                    } else {
                        0.5 * (self.cells[c + 1].rwork[k] + self.cells[cell.c2].rwork[k])
                    };
                }
            }
        }

        // Cycle the level being adjusted, bottom-up, wrapping at the root.
        self.balance_level -= 1;
        if self.balance_level < 0 {
            self.balance_level = self.ltot as i64 - 1;
        }
        let level = self.balance_level as u32;

        for c in 0..self.cells.len() {
            let cell = self.cells[c];
            if cell.c2 == 0 || cell.clevel != level {
                continue;
            }
            let k = cell.split_axis;
            let c1 = c + 1;
            let c2 = cell.c2;
            let w1 = self.cells[c1].worktot;
            let w2 = self.cells[c2].worktot;
            if w1 + w2 <= 0.0 {
                continue;
            }

            let edge1 = (self.cells[c1].bbmax[k] - self.cells[c1].rwork[k]).max(1.0e-12);
            let edge2 = (self.cells[c2].rwork[k] - self.cells[c2].bbmin[k]).max(1.0e-12);
            let dwdx1 = 0.5 * w1 / edge1;
            let dwdx2 = 0.5 * w2 / edge2;
            let dx = (w2 - w1) / (dwdx1 + dwdx2);

            // Keep the plane strictly between the work centroids so a
            // single pass can never invert a domain.
            let lo = self.cells[c1].rwork[k];
            let hi = self.cells[c2].rwork[k];
            let rnew = (cell.split + dx).clamp(lo.min(hi), lo.max(hi));
            tracing::debug!(
                cell = c,
                axis = k,
                old = cell.split,
                new = rnew,
                w1,
                w2,
                "load-balance plane moved"
            );
            self.cells[c].split = rnew;
        }

        self.propagate_boxes();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_positions_3d(n_side: usize) -> Vec<[f64; 3]> {
        let mut out = Vec::new();
        let dx = 1.0 / n_side as f64;
        for i in 0..n_side {
            for j in 0..n_side {
                for k in 0..n_side {
                    out.push([
                        (i as f64 + 0.5) * dx,
                        (j as f64 + 0.5) * dx,
                        (k as f64 + 0.5) * dx,
                    ]);
                }
            }
        }
        out
    }

    fn counts_per_worker<const D: usize>(
        tree: &PartitionTree<D>,
        positions: &[[f64; D]],
    ) -> Vec<usize> {
        let mut counts = vec![0; tree.n_workers];
        for r in positions {
            counts[tree.worker_of(r)] += 1;
        }
        counts
    }

    #[test]
    fn initial_decomposition_splits_counts_evenly() {
        let positions = uniform_positions_3d(8);
        let tree =
            PartitionTree::<3>::build(4, [0.0; 3], [1.0; 3], &positions).unwrap();
        let counts = counts_per_worker(&tree, &positions);
        assert_eq!(counts.iter().sum::<usize>(), positions.len());
        for (w, &c) in counts.iter().enumerate() {
            assert_eq!(c, positions.len() / 4, "worker {w} got {c}");
        }
    }

    #[test]
    fn worker_boxes_tile_the_root_box() {
        let positions = uniform_positions_3d(6);
        let tree =
            PartitionTree::<3>::build(8, [0.0; 3], [1.0; 3], &positions).unwrap();
        // Every position's owner must actually contain it.
        for r in &positions {
            let w = tree.worker_of(r);
            let (bmin, bmax) = tree.worker_box(w);
            for k in 0..3 {
                assert!(r[k] >= bmin[k] - 1.0e-12 && r[k] <= bmax[k] + 1.0e-12);
            }
        }
        // Volumes of the leaves add up to the root volume.
        let vol: f64 = (0..8)
            .map(|w| {
                let (bmin, bmax) = tree.worker_box(w);
                (0..3).map(|k| bmax[k] - bmin[k]).product::<f64>()
            })
            .sum();
        assert!((vol - 1.0).abs() < 1.0e-9, "leaf volumes sum to {vol}");
    }

    #[test]
    fn power_of_two_worker_count_enforced() {
        let positions = uniform_positions_3d(4);
        assert!(PartitionTree::<3>::build(6, [0.0; 3], [1.0; 3], &positions).is_err());
    }

    #[test]
    fn rebalance_reduces_imbalance() {
        // Start from an even spatial split of a uniform population, then
        // pretend the left half works twice as hard.  After one pass the
        // count imbalance (a proxy for the work imbalance with uniform
        // weights) must not grow, and the heavy side must shrink.
        let positions = uniform_positions_3d(10);
        let mut tree =
            PartitionTree::<3>::build(2, [0.0; 3], [1.0; 3], &positions).unwrap();

        let counts0 = counts_per_worker(&tree, &positions);
        let spread0 = counts0.iter().max().unwrap() - counts0.iter().min().unwrap();

        // Work per worker: left domain heavy.
        let (bmin0, bmax0) = tree.worker_box(0);
        let centre0 = [
            0.5 * (bmin0[0] + bmax0[0]),
            0.5 * (bmin0[1] + bmax0[1]),
            0.5 * (bmin0[2] + bmax0[2]),
        ];
        let (bmin1, bmax1) = tree.worker_box(1);
        let centre1 = [
            0.5 * (bmin1[0] + bmax1[0]),
            0.5 * (bmin1[1] + bmax1[1]),
            0.5 * (bmin1[2] + bmax1[2]),
        ];
        tree.load_balance(&[1000.0, 500.0], &[centre0, centre1]);

        let counts1 = counts_per_worker(&tree, &positions);
        assert_eq!(counts1.iter().sum::<usize>(), positions.len());
        // The overloaded worker must lose particles.
        assert!(
            counts1[0] < counts0[0],
            "heavy worker kept {} of {}",
            counts1[0],
            counts0[0]
        );
        let spread1 = counts1.iter().max().unwrap() - counts1.iter().min().unwrap();
        // With a uniform population, shifting the plane toward the heavy
        // side cannot worsen the spread on the first pass.
        assert!(spread1 <= spread0.max(positions.len() / 2));
    }

    #[test]
    fn single_worker_tree_is_trivial() {
        let positions = uniform_positions_3d(3);
        let mut tree =
            PartitionTree::<3>::build(1, [0.0; 3], [1.0; 3], &positions).unwrap();
        assert_eq!(tree.worker_of(&[0.5, 0.5, 0.5]), 0);
        tree.load_balance(&[1.0], &[[0.5; 3]]);
        let (bmin, bmax) = tree.worker_box(0);
        assert_eq!(bmin, [0.0; 3]);
        assert_eq!(bmax, [1.0; 3]);
    }
}
