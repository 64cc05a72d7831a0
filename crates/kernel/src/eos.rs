//! Equations of state.
//!
//! The SPH engine talks to the EOS through four scalar queries evaluated
//! after each density update: pressure, sound speed, specific internal
//! energy (for closures where u is fixed by the density) and temperature.
//! All quantities are in code units.

use crate::SphError;

/// Equation-of-state closures recognised by the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EquationOfState {
    /// Fixed-temperature gas: u is pinned to `temp0 / ((gamma-1) mu_bar)`.
    Isothermal {
        /// Gas temperature.
        temp0: f64,
        /// Mean molecular weight.
        mu_bar: f64,
        /// Ratio of specific heats.
        gamma: f64,
    },
    /// Piecewise isothermal/adiabatic transition around `rho_bary`, used for
    /// collapse calculations: T = temp0 (1 + (rho/rho_bary)^(gamma-1)).
    Barotropic {
        /// Low-density temperature floor.
        temp0: f64,
        /// Mean molecular weight.
        mu_bar: f64,
        /// Ratio of specific heats.
        gamma: f64,
        /// Transition density.
        rho_bary: f64,
    },
    /// Ideal gas with u evolved by the energy equation.
    Adiabatic {
        /// Mean molecular weight.
        mu_bar: f64,
        /// Ratio of specific heats.
        gamma: f64,
    },
}

impl EquationOfState {
    /// Build an EOS from a configuration tag.  Unknown tags are fatal.
    pub fn from_name(
        name: &str,
        temp0: f64,
        mu_bar: f64,
        gamma: f64,
        rho_bary: f64,
    ) -> Result<Self, SphError> {
        match name {
            "isothermal" => Ok(EquationOfState::Isothermal { temp0, mu_bar, gamma }),
            "barotropic" => Ok(EquationOfState::Barotropic { temp0, mu_bar, gamma, rho_bary }),
            "adiabatic" => Ok(EquationOfState::Adiabatic { mu_bar, gamma }),
            other => Err(SphError::Config(format!("unrecognised EOS '{other}'"))),
        }
    }

    /// Ratio of specific heats.
    pub fn gamma(&self) -> f64 {
        match *self {
            EquationOfState::Isothermal { gamma, .. } => gamma,
            EquationOfState::Barotropic { gamma, .. } => gamma,
            EquationOfState::Adiabatic { gamma, .. } => gamma,
        }
    }

    /// Whether this closure evolves u through the energy equation.
    pub fn evolves_energy(&self) -> bool {
        matches!(self, EquationOfState::Adiabatic { .. })
    }

    /// Specific internal energy.  For the isothermal and barotropic closures
    /// this is determined by the closure (the evolved value is ignored); the
    /// adiabatic closure returns the evolved value unchanged.
    pub fn specific_internal_energy(&self, rho: f64, u: f64) -> f64 {
        match *self {
            EquationOfState::Isothermal { temp0, mu_bar, gamma } => {
                temp0 / (gamma - 1.0) / mu_bar
            }
            EquationOfState::Barotropic { temp0, mu_bar, gamma, rho_bary } => {
                temp0 * (1.0 + (rho / rho_bary).powf(gamma - 1.0)) / (gamma - 1.0) / mu_bar
            }
            EquationOfState::Adiabatic { .. } => u,
        }
    }

    /// Thermal pressure, P = (gamma - 1) rho u for every closure.
    pub fn pressure(&self, rho: f64, u: f64) -> f64 {
        (self.gamma() - 1.0) * rho * self.specific_internal_energy(rho, u)
    }

    /// Sound speed.
    pub fn sound_speed(&self, rho: f64, u: f64) -> f64 {
        let gamma = self.gamma();
        let ueff = self.specific_internal_energy(rho, u);
        match self {
            // Isothermal sound speed omits the adiabatic gamma factor.
            EquationOfState::Isothermal { .. } | EquationOfState::Barotropic { .. } => {
                ((gamma - 1.0) * ueff).sqrt()
            }
            EquationOfState::Adiabatic { .. } => (gamma * (gamma - 1.0) * ueff).sqrt(),
        }
    }

    /// Gas temperature.
    pub fn temperature(&self, rho: f64, u: f64) -> f64 {
        match *self {
            EquationOfState::Isothermal { temp0, .. } => temp0,
            EquationOfState::Barotropic { temp0, gamma, rho_bary, .. } => {
                temp0 * (1.0 + (rho / rho_bary).powf(gamma - 1.0))
            }
            EquationOfState::Adiabatic { mu_bar, gamma } => (gamma - 1.0) * mu_bar * u,
        }
    }

    /// Entropic function A = P / rho^gamma.
    pub fn entropic_function(&self, rho: f64, u: f64) -> f64 {
        self.pressure(rho, u) * rho.powf(-self.gamma())
    }
}
