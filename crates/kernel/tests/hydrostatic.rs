//! Static equilibrium: a uniform lattice must feel no net hydro force.
//!
//! Interior particles of a uniform-pressure lattice sit in a symmetric
//! neighbourhood, so the pressure gradient estimate must vanish to the
//! lattice truncation level and velocities must stay zero when nothing
//! drives them.

use kernel::forces::{self, ForceParams};
use kernel::{
    BruteForceSearch, EquationOfState, GatherList, HSolver, KernelKind, KernelTable,
    ParticleArrays, StarArrays, vec,
};

#[test]
fn uniform_lattice_is_force_free() {
    let n = 10;
    let dx = 0.1;
    let kern = KernelTable::<3>::new(KernelKind::M4);
    let eos = EquationOfState::Isothermal { temp0: 1.0, mu_bar: 1.0, gamma: 5.0 / 3.0 };

    let mut parts = ParticleArrays::<3>::with_capacity(n * n * n + 4);
    let m = dx * dx * dx;
    for i in 0..n {
        for j in 0..n {
            for k in 0..n {
                parts
                    .push_particle(
                        [i as f64 * dx, j as f64 * dx, k as f64 * dx],
                        [0.0; 3],
                        m,
                        1.2 * dx,
                        1.5,
                    )
                    .unwrap();
            }
        }
    }

    let stars = StarArrays::<3>::new();
    let solver = HSolver { h_converge: 1.0e-7, ..Default::default() };
    let snapshot = parts.clone();
    let gather = move |i: usize, radius: f64| GatherList {
        neighbors: BruteForceSearch.gather_within(&snapshot, &snapshot.r[i], radius, Some(i)),
        h_max: radius / 2.0,
    };
    solver
        .update_all(&mut parts, &stars, &kern, &eos, &gather, 10.0)
        .unwrap();

    let total = parts.total();
    let partners = move |i: usize| (0..total).filter(|&j| j != i).collect::<Vec<_>>();
    forces::evaluate_forces(&mut parts, &stars, &kern, &eos, &ForceParams::default(), &partners);
    forces::post_hydro_quantities(&mut parts, &eos);

    // Pressure scale: a = grad P / rho ~ P / (rho dx).  Interior residuals
    // must be a tiny fraction of that.
    let p = eos.pressure(1.0, 1.5);
    let scale = p / dx;
    for i in 0..n {
        for j in 0..n {
            for k in 0..n {
                // Deep interior only: every neighbour within the kernel
                // support must itself have a complete neighbourhood.
                if !(4..n - 4).contains(&i) || !(4..n - 4).contains(&j) || !(4..n - 4).contains(&k)
                {
                    continue;
                }
                let idx = i * n * n + j * n + k;
                let amag = vec::norm(&parts.a[idx]);
                assert!(
                    amag < 1.0e-6 * scale,
                    "interior particle {idx} feels residual force {amag:.3e}"
                );
                assert!(parts.div_v[idx].abs() < 1.0e-10);
            }
        }
    }
}
