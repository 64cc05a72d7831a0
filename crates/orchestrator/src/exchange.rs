//! Worker state, peer ghost exchange and particle migration.
//!
//! Workers run in lockstep under a coordinator; each phase below is a
//! synchronous collective, and between phases workers are independent.
//! The transport here moves records between in-process arrays, but the
//! phase structure (count exchange, payload exchange, update pass,
//! tournament-ordered migration) matches a message-passing deployment so
//! a network transport can replace it without touching callers.
//!
//! Migration is sequenced by a Berger round-robin league: every turn
//! pairs each worker with exactly one peer, so no two exchanges contend
//! for the same worker.

use kernel::particle::{GhostKind, ParticleArrays, ParticleRecord};
use kernel::SphError;

use crate::domain::PartitionTree;

/// Per-worker state owned by the coordinator.
#[derive(Debug, Clone)]
pub struct WorkerState<const D: usize> {
    /// Worker id (leaf id in the partition tree).
    pub id: usize,
    /// Owned particles (reals first, then ghosts).
    pub parts: ParticleArrays<D>,
    /// Domain box minimum (from the partition tree).
    pub domain_min: [f64; D],
    /// Domain box maximum.
    pub domain_max: [f64; D],
    /// Particle bounding box (h-box).
    pub hbox_min: [f64; D],
    /// Particle bounding box maximum.
    pub hbox_max: [f64; D],
    /// Neighbour-reach box (particles inflated by the kernel reach).
    pub rbox_min: [f64; D],
    /// Neighbour-reach box maximum.
    pub rbox_max: [f64; D],
    /// Work shipped to each peer during the last balance step.
    pub worksent: Vec<f64>,
    /// Work received from each peer during the last balance step.
    pub workreceived: Vec<f64>,
    /// Export index lists per peer, fixed by the last ghost search.
    export_ids: Vec<Vec<usize>>,
}

impl<const D: usize> WorkerState<D> {
    fn new(id: usize, n_workers: usize, capacity: usize) -> Self {
        Self {
            id,
            parts: ParticleArrays::with_capacity(capacity),
            domain_min: [0.0; D],
            domain_max: [0.0; D],
            hbox_min: [0.0; D],
            hbox_max: [0.0; D],
            rbox_min: [0.0; D],
            rbox_max: [0.0; D],
            worksent: vec![0.0; n_workers],
            workreceived: vec![0.0; n_workers],
            export_ids: vec![Vec::new(); n_workers],
        }
    }

    /// Recompute the particle bounding boxes.  Boundary ghosts count too:
    /// a periodic image can be the only thing a wrap-around peer overlaps.
    pub fn update_bounding_boxes(&mut self, kern_range: f64) {
        let mut lo = [f64::INFINITY; D];
        let mut hi = [f64::NEG_INFINITY; D];
        let mut rlo = [f64::INFINITY; D];
        let mut rhi = [f64::NEG_INFINITY; D];
        for i in 0..self.parts.total() {
            let reach = kern_range * self.parts.h[i];
            for k in 0..D {
                lo[k] = lo[k].min(self.parts.r[i][k]);
                hi[k] = hi[k].max(self.parts.r[i][k]);
                rlo[k] = rlo[k].min(self.parts.r[i][k] - reach);
                rhi[k] = rhi[k].max(self.parts.r[i][k] + reach);
            }
        }
        self.hbox_min = lo;
        self.hbox_max = hi;
        self.rbox_min = rlo;
        self.rbox_max = rhi;
    }

    /// Total work of the owned particles (1/n_step each).
    pub fn worktot(&self) -> f64 {
        (0..self.parts.n_real).map(|i| 1.0 / self.parts.nstep[i] as f64).sum()
    }

    /// Work centroid of the owned particles.
    pub fn work_centroid(&self) -> [f64; D] {
        let mut c = [0.0; D];
        let mut w = 0.0;
        for i in 0..self.parts.n_real {
            let wi = 1.0 / self.parts.nstep[i] as f64;
            w += wi;
            for k in 0..D {
                c[k] += self.parts.r[i][k] * wi;
            }
        }
        if w > 0.0 {
            for ck in c.iter_mut() {
                *ck /= w;
            }
        }
        c
    }
}

fn boxes_overlap<const D: usize>(
    amin: &[f64; D],
    amax: &[f64; D],
    bmin: &[f64; D],
    bmax: &[f64; D],
) -> bool {
    (0..D).all(|k| amin[k] <= bmax[k] && bmin[k] <= amax[k])
}

/// Berger round-robin league calendar.
///
/// Returns, for each worker, its opponent in each of the `n - 1` turns.
/// `n` must be even so nobody idles.
pub fn league_calendar(n: usize) -> Result<Vec<Vec<usize>>, SphError> {
    if n % 2 != 0 {
        return Err(SphError::Config(format!(
            "worker count must be even for the tournament schedule, got {n}"
        )));
    }
    let turns = n - 1;
    let mut calendar = vec![vec![0usize; turns]; n];

    for turn in 0..turns {
        // Team n-1 is pinned; the rest rotate.
        let mut ring = vec![0usize; n];
        ring[0] = n - 1;
        for i in 1..n {
            ring[i] = (i + turn) % (n - 1);
        }
        for step in 0..n / 2 {
            let first = ring[step];
            let second = ring[n - 1 - step];
            calendar[first][turn] = second;
            calendar[second][turn] = first;
        }
    }

    validate_calendar(&calendar)?;
    Ok(calendar)
}

/// Every pair must meet exactly once and both sides must agree.
fn validate_calendar(calendar: &[Vec<usize>]) -> Result<(), SphError> {
    let n = calendar.len();
    for (team, matches) in calendar.iter().enumerate() {
        let mut seen = vec![false; n];
        for (turn, &opp) in matches.iter().enumerate() {
            if calendar[opp][turn] != team {
                return Err(SphError::Communication(format!(
                    "tournament turn {turn}: {team} vs {opp} not mirrored"
                )));
            }
            if opp == team || seen[opp] {
                return Err(SphError::Communication(format!(
                    "tournament schedule pairs {team} with {opp} more than once"
                )));
            }
            seen[opp] = true;
        }
    }
    Ok(())
}

/// Coordinator for the distributed workers.
#[derive(Debug, Clone)]
pub struct DomainController<const D: usize> {
    /// The replicated partition tree.
    pub tree: PartitionTree<D>,
    /// Worker states (index = worker id).
    pub workers: Vec<WorkerState<D>>,
    /// Tournament calendar (empty for a single worker).
    pub calendar: Vec<Vec<usize>>,
    kern_range: f64,
}

impl<const D: usize> DomainController<D> {
    /// Initial decomposition: build the tree from all particles with equal
    /// weights and scatter them to the workers.
    pub fn decompose(
        n_workers: usize,
        root_min: [f64; D],
        root_max: [f64; D],
        parts: &ParticleArrays<D>,
        kern_range: f64,
    ) -> Result<Self, SphError> {
        let tree = PartitionTree::build(n_workers, root_min, root_max, &parts.r[..parts.n_real])?;
        let calendar = if n_workers > 1 { league_calendar(n_workers)? } else { Vec::new() };

        // The same headroom rule as the global arrays: twice the even share.
        let capacity = (2 * parts.n_max / n_workers).max(16);
        let mut workers: Vec<WorkerState<D>> =
            (0..n_workers).map(|w| WorkerState::new(w, n_workers, capacity)).collect();
        for w in workers.iter_mut() {
            let (bmin, bmax) = tree.worker_box(w.id);
            w.domain_min = bmin;
            w.domain_max = bmax;
        }

        for i in 0..parts.n_real {
            let w = tree.worker_of(&parts.r[i]);
            workers[w].parts.push_record(&parts.record(i), GhostKind::Real)?;
        }
        for w in workers.iter_mut() {
            w.update_bounding_boxes(kern_range);
        }

        tracing::info!(
            n_workers,
            counts = ?workers.iter().map(|w| w.parts.n_real).collect::<Vec<_>>(),
            "initial domain decomposition"
        );
        Ok(Self { tree, workers, calendar, kern_range })
    }

    /// Refresh every worker's particle bounding boxes (box-gather
    /// collective).
    pub fn update_all_bounding_boxes(&mut self) {
        for w in self.workers.iter_mut() {
            w.update_bounding_boxes(self.kern_range);
        }
    }

    /// Ghost exchange: ship copies of particles whose kernel reaches a
    /// peer's domain.  Two phases (counts, payloads) per peer pair; the
    /// export sets are kept for the cheap update pass.
    pub fn send_receive_ghosts(&mut self) -> Result<usize, SphError> {
        let n = self.workers.len();

        // Fix the export sets first, as a real collective would.
        for w in 0..n {
            for e in self.workers[w].export_ids.iter_mut() {
                e.clear();
            }
            for p in 0..n {
                if p == w {
                    continue;
                }
                if !boxes_overlap(
                    &self.workers[p].hbox_min,
                    &self.workers[p].hbox_max,
                    &self.workers[w].rbox_min,
                    &self.workers[w].rbox_max,
                ) {
                    continue;
                }
                let (pmin, pmax) =
                    (self.workers[p].domain_min, self.workers[p].domain_max);
                // Reals and boundary ghosts are exportable; ghosts received
                // from peers are not forwarded.
                let mut ids = Vec::new();
                for i in 0..self.workers[w].parts.total() {
                    if self.workers[w].parts.kind[i] == GhostKind::Exchange {
                        continue;
                    }
                    let reach = self.kern_range * self.workers[w].parts.h[i];
                    let r = &self.workers[w].parts.r[i];
                    let touches = (0..D)
                        .all(|k| r[k] + reach >= pmin[k] && r[k] - reach <= pmax[k]);
                    if touches {
                        ids.push(i);
                    }
                }
                self.workers[w].export_ids[p] = ids;
            }
        }

        // Deliver payloads.
        let mut total = 0;
        for w in 0..n {
            for p in 0..n {
                if p == w || self.workers[w].export_ids[p].is_empty() {
                    continue;
                }
                let records: Vec<ParticleRecord<D>> = self.workers[w].export_ids[p]
                    .iter()
                    .map(|&i| self.workers[w].parts.record(i))
                    .collect();
                total += records.len();
                for rec in &records {
                    self.workers[p].parts.push_record(rec, GhostKind::Exchange)?;
                }
            }
        }
        tracing::debug!(total, "peer ghosts exchanged");
        Ok(total)
    }

    /// Update pass: refresh previously exchanged ghosts in place, without
    /// re-deriving the export sets.  Receivers must still hold the same
    /// ghosts in the same order.
    pub fn update_ghost_particles(&mut self) -> Result<(), SphError> {
        let n = self.workers.len();
        // Receivers overwrite their exchange ghosts in sender order.
        let mut cursor: Vec<usize> = self
            .workers
            .iter()
            .map(|wk| {
                (wk.parts.n_real..wk.parts.total())
                    .find(|&g| wk.parts.kind[g] == GhostKind::Exchange)
                    .unwrap_or(wk.parts.total())
            })
            .collect();

        for w in 0..n {
            for p in 0..n {
                if p == w || self.workers[w].export_ids[p].is_empty() {
                    continue;
                }
                let records: Vec<ParticleRecord<D>> = self.workers[w].export_ids[p]
                    .iter()
                    .map(|&i| self.workers[w].parts.record(i))
                    .collect();
                let recv = &mut self.workers[p];
                for rec in records {
                    let g = cursor[p];
                    if g >= recv.parts.total() || recv.parts.kind[g] != GhostKind::Exchange {
                        return Err(SphError::Communication(format!(
                            "ghost update mismatch on worker {p}"
                        )));
                    }
                    recv.parts.overwrite_record(g, &rec);
                    recv.parts.active[g] = false;
                    cursor[p] = g + 1;
                }
            }
        }
        Ok(())
    }

    /// One load-balance step: gather work, move one level of partition
    /// planes, broadcast the new boxes and migrate strays over the
    /// tournament schedule.
    pub fn load_balance(&mut self) -> Result<(), SphError> {
        let n = self.workers.len();
        if n == 1 {
            return Ok(());
        }

        // Stale ghosts would interleave with migrated reals; drop them.
        self.clear_ghosts();

        // Work gather collective.
        let worktot: Vec<f64> = self.workers.iter().map(|w| w.worktot()).collect();
        let rwork: Vec<[f64; D]> = self.workers.iter().map(|w| w.work_centroid()).collect();
        self.tree.load_balance(&worktot, &rwork);

        // Broadcast the new boxes.
        for w in self.workers.iter_mut() {
            let (bmin, bmax) = self.tree.worker_box(w.id);
            w.domain_min = bmin;
            w.domain_max = bmax;
            for s in w.worksent.iter_mut() {
                *s = 0.0;
            }
            for s in w.workreceived.iter_mut() {
                *s = 0.0;
            }
        }

        // Migrate strays, one peer pair per tournament turn.
        let turns = self.calendar.first().map_or(0, |m| m.len());
        for turn in 0..turns {
            for w in 0..n {
                let p = self.calendar[w][turn];
                if p < w {
                    continue; // pair already handled from the other side
                }
                self.migrate_pair(w, p)?;
            }
        }

        tracing::info!(
            counts = ?self.workers.iter().map(|w| w.parts.n_real).collect::<Vec<_>>(),
            work = ?worktot,
            "load balance step complete"
        );
        Ok(())
    }

    /// Exchange strays between one worker pair, both directions.
    fn migrate_pair(&mut self, a: usize, b: usize) -> Result<(), SphError> {
        for (src, dst) in [(a, b), (b, a)] {
            let src_state = &self.workers[src];
            let mut leaving = Vec::new();
            for i in 0..src_state.parts.n_real {
                let r = &src_state.parts.r[i];
                let outside = (0..D).any(|k| {
                    r[k] < src_state.domain_min[k] || r[k] > src_state.domain_max[k]
                });
                if outside && self.tree.worker_of(r) == dst {
                    leaving.push(i);
                }
            }
            if leaving.is_empty() {
                continue;
            }
            let records: Vec<ParticleRecord<D>> =
                leaving.iter().map(|&i| self.workers[src].parts.record(i)).collect();
            let work: f64 = records.iter().map(|r| 1.0 / r.nstep as f64).sum();
            for rec in &records {
                self.workers[dst].parts.push_record(rec, GhostKind::Real)?;
            }
            self.workers[src].parts.delete_particles(&leaving);
            self.workers[src].worksent[dst] += work;
            self.workers[dst].workreceived[src] += work;
            tracing::debug!(src, dst, count = records.len(), "migrated particles");
        }
        Ok(())
    }

    /// Drop all exchange ghosts on every worker (end of step).
    pub fn clear_ghosts(&mut self) {
        for w in self.workers.iter_mut() {
            w.parts.clear_ghosts();
        }
    }

    /// Total real particles across all workers.
    pub fn total_real(&self) -> usize {
        self.workers.iter().map(|w| w.parts.n_real).sum()
    }
}
