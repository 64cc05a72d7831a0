//! SPH smoothing kernels and their gravitational softening profiles.
//!
//! Every kernel exposes the same seven scalar functions of `s = r/h`
//! (or of `s^2`, for the sums that already carry squared distances):
//!
//! ```text
//! w0       kernel value W(s)
//! w1       kernel gradient dW/ds
//! womega   dW/dh weight, -d*w0(s) - s*w1(s)   (grad-h Omega correction)
//! wzeta    dphi/dh weight, wpot(s) - s*wgrav(s)  (grad-h gravity correction)
//! wgrav    softened gravitational acceleration, a = (m/h^2) wgrav(s)
//! wpot     softened gravitational potential,   phi = -(m/h) wpot(s)
//! ```
//!
//! All functions return 0 beyond the compact-support range (gravity reverts
//! to `1/s^2` and `1/s` there) and `w0` is monotone non-increasing.
//!
//! The M4 cubic spline carries fully analytic gravity polynomials; the
//! quintic and Gaussian kernels obtain their gravity profiles through
//! [`KernelTable`], which samples any base kernel onto uniform s and s^2
//! grids and integrates the 3D mass profile by quadrature.  The simulation
//! holds a `KernelTable`, so the hot loops are free of dispatch.

use crate::SphError;

/// Number of entries in each lookup table.
const TABLE_SIZE: usize = 1024;

/// Quadrature refinement per table interval for the gravity integrals.
const QUAD_REFINE: usize = 16;

/// Kernel catalogue selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelKind {
    /// M4 cubic spline (Monaghan & Lattanzio 1985), range 2.
    M4,
    /// Quintic spline, range 3.
    Quintic,
    /// Truncated Gaussian, range 3.
    Gaussian,
}

impl KernelKind {
    /// Parse a configuration tag.  Unknown tags are a fatal config error.
    pub fn from_name(name: &str) -> Result<Self, SphError> {
        match name {
            "m4" => Ok(KernelKind::M4),
            "quintic" => Ok(KernelKind::Quintic),
            "gaussian" => Ok(KernelKind::Gaussian),
            other => Err(SphError::Config(format!("unrecognised kernel '{other}'"))),
        }
    }
}

/// Base analytic form of a smoothing kernel.
///
/// `norm` is the normalisation for the compiled dimension; `norm_3d` is the
/// 3D normalisation used when integrating the gravitational softening
/// profile (softened self-gravity is a 3D construction for every kernel).
pub trait KernelShape {
    /// Compact-support range in units of h.
    fn range(&self) -> f64;
    /// Normalisation constant for the compiled dimension.
    fn norm(&self) -> f64;
    /// Normalisation constant in 3D.
    fn norm_3d(&self) -> f64;
    /// Kernel value W(s) including normalisation.
    fn w0(&self, s: f64) -> f64;
    /// Kernel gradient dW/ds including normalisation.
    fn w1(&self, s: f64) -> f64;
    /// dW/dh weight: -d*w0(s) - s*w1(s) for the compiled dimension.
    fn womega(&self, s: f64) -> f64;
    /// Kernel value as a function of s^2.
    fn w0_s2(&self, s2: f64) -> f64 {
        self.w0(s2.sqrt())
    }
}

// ---------------------------------------------------------------------------
// M4 cubic spline
// ---------------------------------------------------------------------------

/// M4 cubic spline kernel with analytic softened-gravity polynomials
/// (Price & Monaghan 2007).
#[derive(Debug, Clone, Copy, Default)]
pub struct M4Kernel<const D: usize>;

impl<const D: usize> M4Kernel<D> {
    fn norm_for(d: usize) -> f64 {
        match d {
            1 => 2.0 / 3.0,
            2 => 10.0 / (7.0 * std::f64::consts::PI),
            _ => 1.0 / std::f64::consts::PI,
        }
    }

    /// dphi/dh weight (dimensionless).
    pub fn wzeta(&self, s: f64) -> f64 {
        if s < 1.0 {
            1.4 - 2.0 * s * s + 1.5 * s.powi(4) - 0.6 * s.powi(5)
        } else if s < 2.0 {
            1.6 - 4.0 * s * s + 4.0 * s.powi(3) - 1.5 * s.powi(4) + 0.2 * s.powi(5)
        } else {
            0.0
        }
    }

    /// Softened gravitational acceleration factor.
    pub fn wgrav(&self, s: f64) -> f64 {
        if s < 1.0 {
            (4.0 / 3.0) * s - 1.2 * s.powi(3) + 0.5 * s.powi(4)
        } else if s < 2.0 {
            (8.0 / 3.0) * s - 3.0 * s * s + 1.2 * s.powi(3) - s.powi(4) / 6.0
                - 1.0 / (15.0 * s * s)
        } else {
            1.0 / (s * s)
        }
    }

    /// Softened gravitational potential factor (positive magnitude).
    pub fn wpot(&self, s: f64) -> f64 {
        if s < 1.0 {
            1.4 - (2.0 / 3.0) * s * s + 0.3 * s.powi(4) - 0.1 * s.powi(5)
        } else if s < 2.0 {
            1.6 - (4.0 / 3.0) * s * s + s.powi(3) - 0.3 * s.powi(4) + s.powi(5) / 30.0
                - 1.0 / (15.0 * s)
        } else {
            1.0 / s
        }
    }
}

impl<const D: usize> KernelShape for M4Kernel<D> {
    fn range(&self) -> f64 {
        2.0
    }

    fn norm(&self) -> f64 {
        Self::norm_for(D)
    }

    fn norm_3d(&self) -> f64 {
        Self::norm_for(3)
    }

    fn w0(&self, s: f64) -> f64 {
        let norm = self.norm();
        if s < 1.0 {
            norm * (1.0 - 1.5 * s * s + 0.75 * s * s * s)
        } else if s < 2.0 {
            let t = 2.0 - s;
            0.25 * norm * t * t * t
        } else {
            0.0
        }
    }

    fn w1(&self, s: f64) -> f64 {
        let norm = self.norm();
        if s < 1.0 {
            norm * (-3.0 * s + 2.25 * s * s)
        } else if s < 2.0 {
            let t = 2.0 - s;
            -0.75 * norm * t * t
        } else {
            0.0
        }
    }

    fn womega(&self, s: f64) -> f64 {
        let norm = self.norm();
        let d = D as f64;
        if s < 1.0 {
            norm * (-d + 1.5 * (d + 2.0) * s * s - 0.75 * (d + 3.0) * s * s * s)
        } else if s < 2.0 {
            norm * (-2.0 * d + 3.0 * (d + 1.0) * s - 1.5 * (d + 2.0) * s * s
                + 0.25 * (d + 3.0) * s * s * s)
        } else {
            0.0
        }
    }
}

// ---------------------------------------------------------------------------
// Quintic spline
// ---------------------------------------------------------------------------

/// Quintic (M6) spline kernel, range 3.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuinticKernel<const D: usize>;

impl<const D: usize> QuinticKernel<D> {
    fn norm_for(d: usize) -> f64 {
        match d {
            1 => 1.0 / 120.0,
            2 => 7.0 / (478.0 * std::f64::consts::PI),
            _ => 1.0 / (120.0 * std::f64::consts::PI),
        }
    }
}

impl<const D: usize> KernelShape for QuinticKernel<D> {
    fn range(&self) -> f64 {
        3.0
    }

    fn norm(&self) -> f64 {
        Self::norm_for(D)
    }

    fn norm_3d(&self) -> f64 {
        Self::norm_for(3)
    }

    fn w0(&self, s: f64) -> f64 {
        let norm = self.norm();
        if s < 1.0 {
            norm * ((3.0 - s).powi(5) - 6.0 * (2.0 - s).powi(5) + 15.0 * (1.0 - s).powi(5))
        } else if s < 2.0 {
            norm * ((3.0 - s).powi(5) - 6.0 * (2.0 - s).powi(5))
        } else if s < 3.0 {
            norm * (3.0 - s).powi(5)
        } else {
            0.0
        }
    }

    fn w1(&self, s: f64) -> f64 {
        let norm = self.norm();
        if s < 1.0 {
            norm * (-5.0 * (3.0 - s).powi(4) + 30.0 * (2.0 - s).powi(4)
                - 75.0 * (1.0 - s).powi(4))
        } else if s < 2.0 {
            norm * (-5.0 * (3.0 - s).powi(4) + 30.0 * (2.0 - s).powi(4))
        } else if s < 3.0 {
            norm * (-5.0 * (3.0 - s).powi(4))
        } else {
            0.0
        }
    }

    fn womega(&self, s: f64) -> f64 {
        -(D as f64) * self.w0(s) - s * self.w1(s)
    }
}

// ---------------------------------------------------------------------------
// Truncated Gaussian
// ---------------------------------------------------------------------------

/// Gaussian kernel exp(-s^2), truncated at s = 3.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianKernel<const D: usize>;

impl<const D: usize> GaussianKernel<D> {
    fn norm_for(d: usize) -> f64 {
        std::f64::consts::PI.powf(-(d as f64) / 2.0)
    }
}

impl<const D: usize> KernelShape for GaussianKernel<D> {
    fn range(&self) -> f64 {
        3.0
    }

    fn norm(&self) -> f64 {
        Self::norm_for(D)
    }

    fn norm_3d(&self) -> f64 {
        Self::norm_for(3)
    }

    fn w0(&self, s: f64) -> f64 {
        if s < 3.0 {
            self.norm() * (-s * s).exp()
        } else {
            0.0
        }
    }

    fn w1(&self, s: f64) -> f64 {
        if s < 3.0 {
            -2.0 * s * self.norm() * (-s * s).exp()
        } else {
            0.0
        }
    }

    fn womega(&self, s: f64) -> f64 {
        if s < 3.0 {
            self.norm() * (-s * s).exp() * (2.0 * s * s - D as f64)
        } else {
            0.0
        }
    }
}

// ---------------------------------------------------------------------------
// Tabulated kernel
// ---------------------------------------------------------------------------

/// Precomputed kernel tables on uniform s and s^2 grids.
///
/// Built once at start-up from any [`KernelShape`]; the gravity profiles are
/// obtained by integrating the 3D mass profile of the base kernel, so every
/// catalogue entry gets a consistent softening without hand-derived
/// polynomials.  All lookups are linear interpolations.
#[derive(Debug, Clone)]
pub struct KernelTable<const D: usize> {
    /// Compact-support range in units of h.
    pub kern_range: f64,
    /// Squared range.
    pub kern_range_sqd: f64,
    /// Normalisation constant for dimension D.
    pub kern_norm: f64,
    inv_ds: f64,
    inv_ds2: f64,
    w0_tab: Vec<f64>,
    w1_tab: Vec<f64>,
    wgrav_tab: Vec<f64>,
    wpot_tab: Vec<f64>,
    w0_s2_tab: Vec<f64>,
    womega_s2_tab: Vec<f64>,
    wzeta_s2_tab: Vec<f64>,
}

impl<const D: usize> KernelTable<D> {
    /// Build the tables for a catalogue kernel.
    pub fn new(kind: KernelKind) -> Self {
        match kind {
            KernelKind::M4 => Self::from_shape(&M4Kernel::<D>),
            KernelKind::Quintic => Self::from_shape(&QuinticKernel::<D>),
            KernelKind::Gaussian => Self::from_shape(&GaussianKernel::<D>),
        }
    }

    /// Sample an arbitrary base kernel onto the lookup grids.
    pub fn from_shape<S: KernelShape>(shape: &S) -> Self {
        let range = shape.range();
        let n = TABLE_SIZE;
        let ds = range / (n - 1) as f64;
        let ds2 = range * range / (n - 1) as f64;

        let mut w0_tab = vec![0.0; n];
        let mut w1_tab = vec![0.0; n];
        let mut w0_s2_tab = vec![0.0; n];
        let mut womega_s2_tab = vec![0.0; n];
        for i in 0..n {
            let s = i as f64 * ds;
            w0_tab[i] = shape.w0(s);
            w1_tab[i] = shape.w1(s);
            let s2 = i as f64 * ds2;
            w0_s2_tab[i] = shape.w0(s2.sqrt());
            womega_s2_tab[i] = shape.womega(s2.sqrt());
        }

        // Gravity profiles from the 3D mass integral of the base kernel:
        //   M(s)     = int_0^s 4 pi t^2 w0_3d(t) dt
        //   wgrav(s) = M(s) / s^2
        //   wpot(s)  = M(s) / s + int_s^R 4 pi t w0_3d(t) dt
        // integrated on a grid QUAD_REFINE times finer than the tables.
        let scale_3d = shape.norm_3d() / shape.norm();
        let m = (n - 1) * QUAD_REFINE + 1;
        let dq = range / (m - 1) as f64;
        let four_pi = 4.0 * std::f64::consts::PI;
        let mut mass = vec![0.0; m];
        let mut tail = vec![0.0; m];
        for i in 1..m {
            let a = (i - 1) as f64 * dq;
            let b = i as f64 * dq;
            let fa = four_pi * a * a * scale_3d * shape.w0(a);
            let fb = four_pi * b * b * scale_3d * shape.w0(b);
            mass[i] = mass[i - 1] + 0.5 * (fa + fb) * dq;
        }
        for i in (0..m - 1).rev() {
            let a = i as f64 * dq;
            let b = (i + 1) as f64 * dq;
            let fa = four_pi * a * scale_3d * shape.w0(a);
            let fb = four_pi * b * scale_3d * shape.w0(b);
            tail[i] = tail[i + 1] + 0.5 * (fa + fb) * dq;
        }
        // The integrated mass at the support edge defines the Newtonian
        // match; normalise away the residual quadrature error.
        let total = mass[m - 1];
        for v in mass.iter_mut() {
            *v /= total;
        }
        for v in tail.iter_mut() {
            *v /= total;
        }

        let mut wgrav_tab = vec![0.0; n];
        let mut wpot_tab = vec![0.0; n];
        let mut wzeta_s2_tab = vec![0.0; n];
        for i in 0..n {
            let s = i as f64 * ds;
            let q = i * QUAD_REFINE;
            if i == 0 {
                wgrav_tab[0] = 0.0;
                wpot_tab[0] = tail[0];
            } else {
                wgrav_tab[i] = mass[q] / (s * s);
                wpot_tab[i] = mass[q] / s + tail[q];
            }
        }
        // wzeta = wpot - s*wgrav collapses to the potential tail integral.
        for i in 0..n {
            let s2 = i as f64 * ds2;
            let q = ((s2.sqrt() / dq).round() as usize).min(m - 1);
            wzeta_s2_tab[i] = tail[q];
        }

        Self {
            kern_range: range,
            kern_range_sqd: range * range,
            kern_norm: shape.norm(),
            inv_ds: 1.0 / ds,
            inv_ds2: 1.0 / ds2,
            w0_tab,
            w1_tab,
            wgrav_tab,
            wpot_tab,
            w0_s2_tab,
            womega_s2_tab,
            wzeta_s2_tab,
        }
    }

    #[inline]
    fn lookup(table: &[f64], x: f64, inv_dx: f64) -> f64 {
        let t = x * inv_dx;
        let i = (t as usize).min(table.len() - 2);
        let f = t - i as f64;
        table[i] * (1.0 - f) + table[i + 1] * f
    }

    /// Kernel value W(s).
    #[inline]
    pub fn w0(&self, s: f64) -> f64 {
        if s >= self.kern_range {
            return 0.0;
        }
        Self::lookup(&self.w0_tab, s, self.inv_ds)
    }

    /// Kernel value as a function of s^2.
    #[inline]
    pub fn w0_s2(&self, s2: f64) -> f64 {
        if s2 >= self.kern_range_sqd {
            return 0.0;
        }
        Self::lookup(&self.w0_s2_tab, s2, self.inv_ds2)
    }

    /// Kernel gradient dW/ds.
    #[inline]
    pub fn w1(&self, s: f64) -> f64 {
        if s >= self.kern_range {
            return 0.0;
        }
        Self::lookup(&self.w1_tab, s, self.inv_ds)
    }

    /// dW/dh weight as a function of s^2.
    #[inline]
    pub fn womega_s2(&self, s2: f64) -> f64 {
        if s2 >= self.kern_range_sqd {
            return 0.0;
        }
        Self::lookup(&self.womega_s2_tab, s2, self.inv_ds2)
    }

    /// dphi/dh weight as a function of s^2.
    #[inline]
    pub fn wzeta_s2(&self, s2: f64) -> f64 {
        if s2 >= self.kern_range_sqd {
            return 0.0;
        }
        Self::lookup(&self.wzeta_s2_tab, s2, self.inv_ds2)
    }

    /// Softened gravitational acceleration factor; 1/s^2 beyond the support.
    #[inline]
    pub fn wgrav(&self, s: f64) -> f64 {
        if s >= self.kern_range {
            return 1.0 / (s * s);
        }
        Self::lookup(&self.wgrav_tab, s, self.inv_ds)
    }

    /// Softened gravitational potential factor; 1/s beyond the support.
    #[inline]
    pub fn wpot(&self, s: f64) -> f64 {
        if s >= self.kern_range {
            return 1.0 / s;
        }
        Self::lookup(&self.wpot_tab, s, self.inv_ds)
    }
}
