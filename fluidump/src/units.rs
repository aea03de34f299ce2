//! Conversion factors from code units to CGS.
//!
use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Gravitational constant, cm^3 g^-1 s^-2
pub const G: f64 = 6.6743e-8;

/// Speed of light, cm/s
pub const C: f64 = 2.99792458e10;

/// Solar mass, g
pub const MSUN: f64 = 1.989e33;

/// Scale factors relating code units to physical units.
///
/// Lengths and times are set by the black hole mass, densities by the free mass unit. Everything
/// else follows from those and the speed of light.
///
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Units {
    /// Black hole mass in solar masses
    pub mbh: f64,

    /// Mass unit, g
    pub m_unit: f64,

    /// Adiabatic index of the fluid
    pub gam: f64,

    pub l_unit: f64,
    pub t_unit: f64,
    pub rho_unit: f64,
    pub u_unit: f64,
    pub b_unit: f64,
}

impl Units {
    pub fn new(mbh: f64, m_unit: f64, gam: f64) -> Self {
        let l_unit = G * mbh * MSUN / (C * C);
        let t_unit = l_unit / C;
        let rho_unit = m_unit / l_unit.powi(3);
        let u_unit = rho_unit * C * C;
        let b_unit = C * (4.0 * PI * rho_unit).sqrt();

        Self {
            mbh,
            m_unit,
            gam,
            l_unit,
            t_unit,
            rho_unit,
            u_unit,
            b_unit,
        }
    }
}
