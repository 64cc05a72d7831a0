//! Snapshot interface.
//!
//! The core hands particle arrays and the simulation time to a snapshot
//! sink and reads them back without knowing anything about on-disk
//! formats; format implementations live with the I/O layer.  The
//! in-memory implementation backs tests and the embedded use case.

use kernel::particle::ParticleArrays;
use kernel::SphError;

/// Minimal particle state stored in a snapshot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotData<const D: usize> {
    /// Simulation time.
    pub t: f64,
    /// Positions.
    pub r: Vec<[f64; D]>,
    /// Velocities.
    pub v: Vec<[f64; D]>,
    /// Masses.
    pub m: Vec<f64>,
    /// Smoothing lengths.
    pub h: Vec<f64>,
    /// Specific internal energies.
    pub u: Vec<f64>,
}

impl<const D: usize> SnapshotData<D> {
    /// Capture the real particles of an array.
    pub fn capture(parts: &ParticleArrays<D>, t: f64) -> Self {
        let n = parts.n_real;
        Self {
            t,
            r: parts.r[..n].to_vec(),
            v: parts.v[..n].to_vec(),
            m: parts.m[..n].to_vec(),
            h: parts.h[..n].to_vec(),
            u: parts.u[..n].to_vec(),
        }
    }

    /// Restore into a fresh particle array with the given capacity.
    pub fn restore(&self, capacity: usize) -> Result<ParticleArrays<D>, SphError> {
        let mut parts = ParticleArrays::with_capacity(capacity);
        for i in 0..self.r.len() {
            parts.push_particle(self.r[i], self.v[i], self.m[i], self.h[i], self.u[i])?;
        }
        Ok(parts)
    }
}

/// Snapshot reader/writer contract.
pub trait SnapshotIo<const D: usize> {
    /// Persist a snapshot.
    fn write(&mut self, snap: &SnapshotData<D>) -> Result<(), SphError>;
    /// Number of stored snapshots.
    fn len(&self) -> usize;
    /// True when nothing has been stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Fetch a stored snapshot by index.
    fn read(&self, index: usize) -> Result<SnapshotData<D>, SphError>;
}

/// In-memory snapshot buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshots<const D: usize> {
    frames: Vec<SnapshotData<D>>,
}

impl<const D: usize> MemorySnapshots<D> {
    /// Empty buffer.
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }
}

impl<const D: usize> SnapshotIo<D> for MemorySnapshots<D> {
    fn write(&mut self, snap: &SnapshotData<D>) -> Result<(), SphError> {
        self.frames.push(snap.clone());
        Ok(())
    }

    fn len(&self) -> usize {
        self.frames.len()
    }

    fn read(&self, index: usize) -> Result<SnapshotData<D>, SphError> {
        self.frames
            .get(index)
            .cloned()
            .ok_or_else(|| SphError::Config(format!("no snapshot at index {index}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_restore_roundtrip() {
        let mut parts = ParticleArrays::<2>::with_capacity(8);
        parts.push_particle([0.1, 0.2], [1.0, -1.0], 2.0, 0.05, 1.5).unwrap();
        parts.push_particle([0.3, 0.4], [0.0, 0.5], 3.0, 0.06, 2.5).unwrap();

        let snap = SnapshotData::capture(&parts, 1.25);
        let mut io = MemorySnapshots::new();
        io.write(&snap).unwrap();
        assert_eq!(io.len(), 1);

        let back = io.read(0).unwrap();
        assert_eq!(back.t, 1.25);
        let restored = back.restore(8).unwrap();
        assert_eq!(restored.n_real, 2);
        assert_eq!(restored.r[1], [0.3, 0.4]);
        assert_eq!(restored.u[1], 2.5);
        assert!(io.read(3).is_err());
    }
}
