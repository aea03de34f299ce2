//! Coordinate systems.
//!
//! Simulations are run in "native" coordinates `X`, chosen to make the grid uniform. Everything
//! here is pointwise: functions take a native 4-position and return values at that point.
//!
use std::f64::consts::PI;

use crate::errors::{Error, Result};
use crate::field::{Params, ParamsExt};

/// Smallest magnitude allowed for `sin(th)`, to stay clear of the coordinate singularity at the
/// poles
pub const SMALL: f64 = 1e-20;

/// Step used for finite differences of the metric
pub const DELTA: f64 = 1e-5;

pub type Vector = [f64; 4];
pub type Tensor = [[f64; 4]; 4];

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CoordinateSystem {
    /// Flat space, native coordinates are `(t, x, y, z)`
    Cartesian,

    /// Exponential Kerr-Schild: `r = exp(X1)`, `th = X2`, `phi = X3`, around a black hole with
    /// spin `a`
    Eks { a: f64 },
}

impl CoordinateSystem {
    pub fn from_params(params: &Params) -> Result<Self> {
        let name = match params.get("coordinates") {
            Some(_) => params.str("coordinates")?,
            None => return Ok(CoordinateSystem::Cartesian),
        };

        match name {
            "cartesian" | "minkowski" => Ok(CoordinateSystem::Cartesian),
            "eks" => Ok(CoordinateSystem::Eks {
                a: params.f64("a")?,
            }),
            _ => Err(Error::bad_param(
                "coordinates",
                format!("unsupported coordinate system {name}"),
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CoordinateSystem::Cartesian => "cartesian",
            CoordinateSystem::Eks { .. } => "eks",
        }
    }

    /// Native coordinates at cell `index` of a grid, given the grid's first coordinate and
    /// spacing. `offset` locates the point within the cell: 0 for the lower face, 0.5 for the
    /// centre.
    pub fn native(startx: [f64; 3], dx: [f64; 3], index: [f64; 3], offset: [f64; 3]) -> Vector {
        let mut x = [0.0; 4];
        for axis in 0..3 {
            x[axis + 1] = startx[axis] + (index[axis] + offset[axis]) * dx[axis];
        }

        x
    }

    /// `(r, th, phi)` at native position `x`
    pub fn spherical(&self, x: Vector) -> [f64; 3] {
        match self {
            CoordinateSystem::Cartesian => {
                let [_, x, y, z] = x;
                let r = (x * x + y * y + z * z).sqrt();
                let th = if r > 0.0 { (z / r).acos() } else { 0.0 };
                [r, th, y.atan2(x)]
            }
            CoordinateSystem::Eks { .. } => [x[1].exp(), x[2], x[3]],
        }
    }

    /// `(x, y, z)` at native position `x`
    pub fn cartesian(&self, x: Vector) -> [f64; 3] {
        match self {
            CoordinateSystem::Cartesian => [x[1], x[2], x[3]],
            CoordinateSystem::Eks { .. } => {
                let [r, th, phi] = self.spherical(x);
                [
                    r * th.sin() * phi.cos(),
                    r * th.sin() * phi.sin(),
                    r * th.cos(),
                ]
            }
        }
    }

    /// Jacobian of the named coordinates with respect to native ones: `dxdX[i][j] = dx^i/dX^j`
    #[allow(non_snake_case)]
    pub fn dxdX(&self, x: Vector) -> Tensor {
        let mut dxdX = identity();
        if let CoordinateSystem::Eks { .. } = self {
            dxdX[1][1] = x[1].exp();
        }

        dxdX
    }

    /// Inverse Jacobian: `dXdx[i][j] = dX^i/dx^j`
    #[allow(non_snake_case)]
    pub fn dXdx(&self, x: Vector) -> Tensor {
        let mut dXdx = identity();
        if let CoordinateSystem::Eks { .. } = self {
            dXdx[1][1] = 1.0 / x[1].exp();
        }

        dXdx
    }

    /// Covariant metric in native coordinates
    pub fn gcov(&self, x: Vector) -> Tensor {
        match *self {
            CoordinateSystem::Cartesian => {
                let mut gcov = identity();
                gcov[0][0] = -1.0;
                gcov
            }
            CoordinateSystem::Eks { a } => {
                let [r, th, _] = self.spherical(x);
                let gcov_ks = kerr_schild(a, r, th);
                let jacobian = self.dxdX(x);

                // g_native = J^T g_ks J
                let mut gcov = [[0.0; 4]; 4];
                for (i, row) in gcov.iter_mut().enumerate() {
                    for (j, entry) in row.iter_mut().enumerate() {
                        for m in 0..4 {
                            for n in 0..4 {
                                *entry += gcov_ks[m][n] * jacobian[m][i] * jacobian[n][j];
                            }
                        }
                    }
                }

                gcov
            }
        }
    }

    /// Connection coefficients `conn[l][m][n]`, the Christoffel symbols of the second kind in
    /// native coordinates, by central differences of the metric.
    pub fn conn(&self, x: Vector) -> [Tensor; 4] {
        // dg[k][m][n] = d g_mn / dX^k. Nothing depends on X0.
        let mut dg = [[[0.0; 4]; 4]; 4];
        for (k, derivative) in dg.iter_mut().enumerate().skip(1) {
            let mut above = x;
            let mut below = x;
            above[k] += DELTA;
            below[k] -= DELTA;
            let above = self.gcov(above);
            let below = self.gcov(below);
            for m in 0..4 {
                for n in 0..4 {
                    derivative[m][n] = (above[m][n] - below[m][n]) / (2.0 * DELTA);
                }
            }
        }

        // Christoffel symbols of the first kind
        let mut lower = [[[0.0; 4]; 4]; 4];
        for (k, by_k) in lower.iter_mut().enumerate() {
            for (m, by_m) in by_k.iter_mut().enumerate() {
                for (n, entry) in by_m.iter_mut().enumerate() {
                    *entry = 0.5 * (dg[n][k][m] + dg[m][k][n] - dg[k][m][n]);
                }
            }
        }

        let gcon = invert(&self.gcov(x)).unwrap_or([[0.0; 4]; 4]);
        let mut conn = [[[0.0; 4]; 4]; 4];
        for (l, by_l) in conn.iter_mut().enumerate() {
            for (m, by_m) in by_l.iter_mut().enumerate() {
                for (n, entry) in by_m.iter_mut().enumerate() {
                    for k in 0..4 {
                        *entry += gcon[l][k] * lower[k][m][n];
                    }
                }
            }
        }

        conn
    }
}

/// The Kerr metric in Kerr-Schild coordinates `(t, r, th, phi)`
fn kerr_schild(a: f64, r: f64, th: f64) -> Tensor {
    let cth = th.cos();
    let mut sth = th.sin();
    if sth.abs() < SMALL {
        sth = if sth < 0.0 { -SMALL } else { SMALL };
    }
    let s2 = sth * sth;
    let rho2 = r * r + a * a * cth * cth;
    let z = 2.0 * r / rho2;

    let mut g = [[0.0; 4]; 4];
    g[0][0] = z - 1.0;
    g[0][1] = z;
    g[0][3] = -z * a * s2;
    g[1][1] = 1.0 + z;
    g[1][3] = -a * s2 * (1.0 + z);
    g[2][2] = rho2;
    g[3][3] = s2 * (rho2 + a * a * s2 * (1.0 + z));
    g[1][0] = g[0][1];
    g[3][0] = g[0][3];
    g[3][1] = g[1][3];

    g
}

fn identity() -> Tensor {
    let mut m = [[0.0; 4]; 4];
    for (i, row) in m.iter_mut().enumerate() {
        row[i] = 1.0;
    }

    m
}

/// Invert a 4x4 matrix by Gauss-Jordan elimination with partial pivoting. Returns `None` if the
/// matrix is singular.
pub fn invert(m: &Tensor) -> Option<Tensor> {
    let mut a = *m;
    let mut inverse = identity();
    for col in 0..4 {
        let pivot = (col..4).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col] == 0.0 {
            return None;
        }
        a.swap(col, pivot);
        inverse.swap(col, pivot);

        let scale = a[col][col];
        for j in 0..4 {
            a[col][j] /= scale;
            inverse[col][j] /= scale;
        }
        for row in 0..4 {
            if row != col {
                let factor = a[row][col];
                for j in 0..4 {
                    a[row][j] -= factor * a[col][j];
                    inverse[row][j] -= factor * inverse[col][j];
                }
            }
        }
    }

    Some(inverse)
}

/// Determinant of a 4x4 matrix, by elimination
pub fn determinant(m: &Tensor) -> f64 {
    let mut a = *m;
    let mut det = 1.0;
    for col in 0..4 {
        let pivot = match (col..4).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs())) {
            Some(pivot) => pivot,
            None => return 0.0,
        };
        if a[pivot][col] == 0.0 {
            return 0.0;
        }
        if pivot != col {
            a.swap(col, pivot);
            det = -det;
        }
        det *= a[col][col];
        for row in col + 1..4 {
            let factor = a[row][col] / a[col][col];
            for j in col..4 {
                a[row][j] -= factor * a[col][j];
            }
        }
    }

    det
}

/// First native coordinate and grid spacing along each axis.
///
/// Explicit `startx{i}`/`dx{i}` parameters win. Otherwise Cartesian grids span `x{i}min` to
/// `x{i}max` (default 0 to 1), and EKS grids span `r_in` to `r_out` logarithmically in radius and
/// cover the whole sphere.
///
pub fn native_grid(coords: &CoordinateSystem, params: &Params) -> Result<([f64; 3], [f64; 3])> {
    let n = [params.usize("n1")?, params.usize("n2")?, params.usize("n3")?];
    let optional = |name: &str| params.get(name).map(|_| params.f64(name)).transpose();

    let mut startx = [0.0; 3];
    let mut dx = [0.0; 3];
    for axis in 0..3 {
        let explicit = (
            optional(&format!("startx{}", axis + 1))?,
            optional(&format!("dx{}", axis + 1))?,
        );
        let (start, step) = match (explicit, coords) {
            ((Some(start), Some(step)), _) => (start, step),
            (_, CoordinateSystem::Cartesian) => {
                let min = optional(&format!("x{}min", axis + 1))?.unwrap_or(0.0);
                let max = optional(&format!("x{}max", axis + 1))?.unwrap_or(1.0);
                (min, (max - min) / n[axis] as f64)
            }
            (_, CoordinateSystem::Eks { .. }) => match axis {
                0 => {
                    let r_in = params.f64("r_in")?.ln();
                    let r_out = params.f64("r_out")?.ln();
                    (r_in, (r_out - r_in) / n[axis] as f64)
                }
                1 => (0.0, PI / n[axis] as f64),
                _ => (0.0, 2.0 * PI / n[axis] as f64),
            },
        };
        startx[axis] = start;
        dx[axis] = step;
    }

    Ok((startx, dx))
}
