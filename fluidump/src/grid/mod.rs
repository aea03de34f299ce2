//! Geometry of the simulation grid.
//!
mod coords;

use std::{collections::HashMap, sync::Arc};

use ndarray::{arr0, Array2, ArrayD, Dimension, IxDyn};
use parking_lot::Mutex;

use crate::errors::{Error, Result};
use crate::field::{stack, Params, ParamsExt};
use crate::region::{select, Region, Selector};

pub use coords::{determinant, invert, native_grid, CoordinateSystem, Tensor, Vector};

/// Something that knows the geometry of a dump's grid: metric, coordinates, Jacobians.
///
/// Arrays are restricted to the provider's region, with spatial axes trailing like any other
/// field.
///
pub trait Geometry: Send + Sync {
    fn can_provide(&self, name: &str) -> bool;

    /// Get a named geometric quantity.
    ///
    /// Quantities defined at several locations within a cell (`gcov`, `gcon`, `gdet`, `lapse`)
    /// carry a leading location axis, indexed by `Loci`.
    ///
    fn get(&self, name: &str) -> Result<ArrayD<f64>>;

    /// The geometry of a sub-region, relative to this one.
    fn slice(&self, selector: &Selector) -> Result<Box<dyn Geometry>>;

    /// Jacobian of named coordinates with respect to native ones at cell centres, `[4, 4, ...]`
    #[allow(non_snake_case)]
    fn dxdX(&self) -> Result<ArrayD<f64>>;

    /// Inverse Jacobian at cell centres, `[4, 4, ...]`
    #[allow(non_snake_case)]
    fn dXdx(&self) -> Result<ArrayD<f64>>;
}

/// Locations within a cell
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Loci {
    Face1 = 0,
    Face2 = 1,
    Face3 = 2,
    Cent = 3,
    Corn = 4,
}

impl Loci {
    pub const ALL: [Loci; 5] = [Loci::Face1, Loci::Face2, Loci::Face3, Loci::Cent, Loci::Corn];

    /// Offset of this location from a cell's lower corner, in cells
    pub fn offset(&self) -> [f64; 3] {
        match self {
            Loci::Face1 => [0.0, 0.5, 0.5],
            Loci::Face2 => [0.5, 0.0, 0.5],
            Loci::Face3 => [0.5, 0.5, 0.0],
            Loci::Cent => [0.5, 0.5, 0.5],
            Loci::Corn => [0.0, 0.0, 0.0],
        }
    }
}

/// Names of everything a `Grid` can provide
pub const NAMES: [&str; 18] = [
    "gcov", "gcon", "gdet", "lapse", "conn", "X", "X1", "X2", "X3", "r", "th", "phi", "x", "y",
    "z", "dx1", "dx2", "dx3",
];

/// Options for building a `Grid`
#[derive(Clone, Copy, Debug)]
pub struct GridOptions {
    /// Keep computed geometry around for later lookups
    pub cache_geometry: bool,

    /// Also keep connection coefficients, which are large
    pub cache_connection_coefficients: bool,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            cache_geometry: true,
            cache_connection_coefficients: false,
        }
    }
}

/// Geometry of a uniform grid in some native coordinate system
pub struct Grid {
    coords: CoordinateSystem,
    startx: [f64; 3],
    dx: [f64; 3],

    /// Width of ghost zones included in the domain. Cell `ng` is the first physical cell.
    ng: usize,

    region: Region,
    options: GridOptions,
    cache: Mutex<HashMap<String, Arc<ArrayD<f64>>>>,
}

impl Grid {
    pub fn new(params: &Params, options: GridOptions) -> Result<Self> {
        let coords = CoordinateSystem::from_params(params)?;
        let (startx, dx) = native_grid(&coords, params)?;
        let ng = match params.get("ng") {
            Some(_) => params.usize("ng")?,
            None => 0,
        };
        let region = Region::full(params.domain_shape()?);

        Ok(Self {
            coords,
            startx,
            dx,
            ng,
            region,
            options,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn coords(&self) -> &CoordinateSystem {
        &self.coords
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn startx(&self) -> [f64; 3] {
        self.startx
    }

    pub fn dx(&self) -> [f64; 3] {
        self.dx
    }

    /// Native coordinates at a location of the cell at `index` within this grid's region
    fn native(&self, index: &[usize], locus: Loci) -> Vector {
        let cell = self.region.absolute(index);
        let ng = self.ng as f64;
        let cell = cell.map(|i| i as f64 - ng);

        CoordinateSystem::native(self.startx, self.dx, cell, locus.offset())
    }

    /// Evaluate a pointwise function over the region.
    ///
    /// `f` returns the components of some quantity at a point, flattened in row major order to
    /// match `leading`, the quantity's shape.
    ///
    fn tensor_field<F>(&self, name: &str, leading: &[usize], locus: Loci, f: F) -> Result<ArrayD<f64>>
    where
        F: Fn(Vector) -> Result<Vec<f64>>,
    {
        let spatial = self.region.shape();
        let n_cells: usize = spatial.iter().product();
        let n_components: usize = leading.iter().product();

        let mut data = Vec::with_capacity(n_cells * n_components);
        for index in ndarray::indices(IxDyn(&spatial)) {
            data.extend(f(self.native(index.slice(), locus))?);
        }

        let mut shape = leading.to_vec();
        shape.extend_from_slice(&spatial);
        let by_cell = Array2::from_shape_vec((n_cells, n_components), data)
            .map_err(|_| Error::shape_mismatch(name, &shape, &[n_cells, n_components]))?;
        by_cell
            .reversed_axes()
            .as_standard_layout()
            .into_owned()
            .into_shape(IxDyn(&shape))
            .map_err(|_| Error::shape_mismatch(name, &shape, &[n_components, n_cells]))
    }

    /// Evaluate a pointwise tensor at every location in each cell, stacking locations along a new
    /// leading axis.
    fn at_all_loci<F>(&self, name: &str, leading: &[usize], f: F) -> Result<ArrayD<f64>>
    where
        F: Fn(Vector) -> Result<Vec<f64>>,
    {
        let mut arrays = Vec::with_capacity(Loci::ALL.len());
        for locus in Loci::ALL {
            arrays.push(self.tensor_field(name, leading, locus, &f)?);
        }

        stack(name, &arrays)
    }

    fn compute(&self, name: &str) -> Result<ArrayD<f64>> {
        let coords = self.coords;
        let gcon = |x: Vector| {
            invert(&coords.gcov(x))
                .ok_or_else(|| Error::bad_param("coordinates", format!("singular metric at {x:?}")))
        };

        match name {
            "gcov" => self.at_all_loci(name, &[4, 4], |x| Ok(flatten(&coords.gcov(x)))),
            "gcon" => self.at_all_loci(name, &[4, 4], |x| Ok(flatten(&gcon(x)?))),
            "gdet" => self.at_all_loci(name, &[], |x| {
                Ok(vec![(-determinant(&coords.gcov(x))).sqrt()])
            }),
            "lapse" => self.at_all_loci(name, &[], |x| Ok(vec![1.0 / (-gcon(x)?[0][0]).sqrt()])),
            "conn" => self.tensor_field(name, &[4, 4, 4], Loci::Cent, |x| {
                Ok(coords.conn(x).iter().flat_map(flatten).collect())
            }),
            "X" => self.tensor_field(name, &[4], Loci::Cent, |x| Ok(x.to_vec())),
            "X1" | "X2" | "X3" => {
                let axis = axis_of(name)?;
                self.tensor_field(name, &[], Loci::Cent, |x| Ok(vec![x[axis]]))
            }
            "r" | "th" | "phi" => {
                let axis = position(&["r", "th", "phi"], name);
                self.tensor_field(name, &[], Loci::Cent, |x| {
                    Ok(vec![coords.spherical(x)[axis]])
                })
            }
            "x" | "y" | "z" => {
                let axis = position(&["x", "y", "z"], name);
                self.tensor_field(name, &[], Loci::Cent, |x| {
                    Ok(vec![coords.cartesian(x)[axis]])
                })
            }
            "dx1" | "dx2" | "dx3" => Ok(arr0(self.dx[axis_of(name)? - 1]).into_dyn()),
            _ => Err(Error::KeyResolution(name.to_string())),
        }
    }
}

fn flatten(m: &Tensor) -> Vec<f64> {
    m.iter().flatten().copied().collect()
}

fn position(names: &[&str], name: &str) -> usize {
    names.iter().position(|n| *n == name).unwrap_or(0)
}

/// Native axis named by the trailing digit of `name`
fn axis_of(name: &str) -> Result<usize> {
    name.chars()
        .last()
        .and_then(|c| c.to_digit(10))
        .map(|d| d as usize)
        .filter(|d| (1..=3).contains(d))
        .ok_or_else(|| Error::KeyResolution(name.to_string()))
}

impl Geometry for Grid {
    fn can_provide(&self, name: &str) -> bool {
        NAMES.contains(&name)
    }

    fn get(&self, name: &str) -> Result<ArrayD<f64>> {
        if let Some(array) = self.cache.lock().get(name) {
            return Ok(array.as_ref().clone());
        }

        let array = self.compute(name)?;
        let keep = self.options.cache_geometry
            && (name != "conn" || self.options.cache_connection_coefficients);
        if keep {
            tracing::debug!(name, shape = ?array.shape(), "caching geometry");
            self.cache
                .lock()
                .insert(name.to_string(), Arc::new(array.clone()));
        }

        Ok(array)
    }

    fn slice(&self, selector: &Selector) -> Result<Box<dyn Geometry>> {
        let region = self.region.compose(selector)?;
        let mut cache = HashMap::new();
        for (name, array) in self.cache.lock().iter() {
            let sliced = select(name, array, selector, &self.region)?;
            cache.insert(name.clone(), Arc::new(sliced));
        }

        Ok(Box::new(Grid {
            coords: self.coords,
            startx: self.startx,
            dx: self.dx,
            ng: self.ng,
            region,
            options: self.options,
            cache: Mutex::new(cache),
        }))
    }

    fn dxdX(&self) -> Result<ArrayD<f64>> {
        let coords = self.coords;
        self.tensor_field("dxdX", &[4, 4], Loci::Cent, |x| Ok(flatten(&coords.dxdX(x))))
    }

    fn dXdx(&self) -> Result<ArrayD<f64>> {
        let coords = self.coords;
        self.tensor_field("dXdx", &[4, 4], Loci::Cent, |x| Ok(flatten(&coords.dXdx(x))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testing;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9 * (1.0 + b.abs())
    }

    #[test]
    fn test_cartesian() -> Result<()> {
        let grid = Grid::new(&testing::params([4, 2, 2]), GridOptions::default())?;
        assert!(grid.can_provide("gcov"));
        assert!(!grid.can_provide("rho"));

        let gcov = grid.get("gcov")?;
        assert_eq!(gcov.shape(), &[5, 4, 4, 4, 2, 2]);
        assert_eq!(gcov[[3, 0, 0, 1, 1, 1]], -1.0);
        assert_eq!(gcov[[0, 2, 2, 0, 0, 0]], 1.0);
        assert_eq!(gcov[[4, 1, 2, 3, 1, 0]], 0.0);

        let gdet = grid.get("gdet")?;
        assert_eq!(gdet.shape(), &[5, 4, 2, 2]);
        assert!(gdet.iter().all(|g| *g == 1.0));

        let x1 = grid.get("X1")?;
        assert_eq!(x1.shape(), &[4, 2, 2]);
        assert!(close(x1[[0, 0, 0]], 0.125));
        assert!(close(x1[[3, 1, 1]], 0.875));
        assert_eq!(grid.get("x")?, x1);

        let dx2 = grid.get("dx2")?;
        assert_eq!(dx2.ndim(), 0);
        assert_eq!(dx2.sum(), 0.5);

        assert!(matches!(grid.get("rho"), Err(Error::KeyResolution(_))));

        Ok(())
    }

    #[test]
    fn test_eks() -> Result<()> {
        let params = testing::eks_params([8, 4, 4]);
        let grid = Grid::new(&params, GridOptions::default())?;

        let r = grid.get("r")?;
        let th = grid.get("th")?;
        let gdet = grid.get("gdet")?;
        let lapse = grid.get("lapse")?;
        let a = params.f64("a")?;
        for (index, r) in r.indexed_iter() {
            let r = *r;
            let i = index.slice();
            let th = th[i];
            let rho2 = r * r + a * a * th.cos().powi(2);
            assert!(close(gdet[[3, i[0], i[1], i[2]]], r * rho2 * th.sin()));

            // KS lapse is 1 / sqrt(1 + 2r / rho^2)
            let expected = 1.0 / (1.0 + 2.0 * r / rho2).sqrt();
            assert!(close(lapse[[3, i[0], i[1], i[2]]], expected));
        }

        let r_in = params.f64("r_in")?;
        let first = r[[0, 0, 0]];
        assert!(first > r_in);
        assert!(close(first, (r_in.ln() + 0.5 * grid.dx()[0]).exp()));

        let dxdx = grid.dxdX()?;
        assert_eq!(dxdx.shape(), &[4, 4, 8, 4, 4]);
        assert!(close(dxdx[[1, 1, 2, 0, 0]], r[[2, 0, 0]]));
        assert!(close(grid.dXdx()?[[1, 1, 2, 0, 0]], 1.0 / r[[2, 0, 0]]));

        Ok(())
    }

    #[test]
    fn test_ghost_zones_offset_coordinates() -> Result<()> {
        let mut params = testing::params([4, 2, 2]);
        params.insert("ng".into(), 1_i64.into());
        let grid = Grid::new(&params, GridOptions::default())?;

        let x1 = grid.get("X1")?;
        assert_eq!(x1.shape(), &[6, 4, 4]);
        assert!(close(x1[[0, 0, 0]], -0.125));
        assert!(close(x1[[1, 0, 0]], 0.125));

        Ok(())
    }

    #[test]
    fn test_slice() -> Result<()> {
        let grid = Grid::new(&testing::eks_params([8, 4, 4]), GridOptions::default())?;
        let full_r = grid.get("r")?;

        let selector = Selector::new(2..5, 1, ..);
        let sliced = grid.slice(&selector)?;

        // From the sliced cache
        let r = sliced.get("r")?;
        assert_eq!(r.shape(), &[3, 4]);
        assert_eq!(r[[0, 3]], full_r[[2, 1, 3]]);

        // Computed fresh for the sub-region
        let th = sliced.get("th")?;
        assert_eq!(th.shape(), &[3, 4]);
        assert!(close(th[[2, 0]], grid.get("th")?[[4, 1, 0]]));

        let gcov = sliced.get("gcov")?;
        assert_eq!(gcov.shape(), &[5, 4, 4, 3, 4]);

        Ok(())
    }

    #[test]
    fn test_conn_caching() -> Result<()> {
        let params = testing::eks_params([2, 2, 2]);
        let grid = Grid::new(&params, GridOptions::default())?;
        let conn = grid.get("conn")?;
        assert_eq!(conn.shape(), &[4, 4, 4, 2, 2, 2]);
        assert!(!grid.cache.lock().contains_key("conn"));

        let options = GridOptions {
            cache_geometry: true,
            cache_connection_coefficients: true,
        };
        let grid = Grid::new(&params, options)?;
        grid.get("conn")?;
        grid.get("gdet")?;
        assert!(grid.cache.lock().contains_key("conn"));

        let options = GridOptions {
            cache_geometry: false,
            cache_connection_coefficients: true,
        };
        let grid = Grid::new(&params, options)?;
        grid.get("gdet")?;
        grid.get("conn")?;
        assert!(grid.cache.lock().is_empty());

        Ok(())
    }
}
