//! Fields derived from the primitive variables.
//!
//! Derived fields are computed by plain functions of a dump. A function asks the dump for
//! whatever it needs, which may itself be derived, so dependencies are resolved (and cached)
//! recursively on demand.
//!
use std::{collections::HashMap, fmt};

use ndarray::{ArrayD, Axis, Slice};

use crate::dump::Dump;
use crate::errors::Result;
use crate::field::{dot, matvec, stack, Field};

/// Computes a derived field over a dump's region
pub type DerivedFn = fn(&Dump) -> Result<Field>;

/// A set of named derived field functions
///
/// Build one up front and share it between dumps. It's read only once in use.
///
#[derive(Clone, Default)]
pub struct Registry {
    functions: HashMap<String, DerivedFn>,
}

impl Registry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard set of fluid and magnetic field quantities
    pub fn standard() -> Self {
        Self::new()
            .with("Pg", pg)
            .with("gamma", gamma)
            .with("ucon", ucon)
            .with("ucov", ucov)
            .with("bcon", bcon)
            .with("bcov", bcov)
            .with("bsq", bsq)
            .with("Pb", pb)
            .with("Ptot", ptot)
            .with("beta", beta)
            .with("sigma", sigma)
    }

    pub fn insert(&mut self, name: &str, function: DerivedFn) {
        self.functions.insert(name.to_string(), function);
    }

    pub fn with(mut self, name: &str, function: DerivedFn) -> Self {
        self.insert(name, function);
        self
    }

    pub fn get(&self, name: &str) -> Option<DerivedFn> {
        self.functions.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();

        names
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("functions", &self.names())
            .finish()
    }
}

/// Gas pressure
fn pg(dump: &Dump) -> Result<Field> {
    let gam = dump.param_f64("gam")?;
    let u = dump.array("u")?;

    Ok(Field::F64(u * (gam - 1.0)))
}

/// Spatial (1, 2, 3) block of a `[4, 4, ...]` tensor
fn spatial_block(tensor: &ArrayD<f64>) -> ArrayD<f64> {
    let mut block = tensor.slice_axis(Axis(0), Slice::from(1..));
    block.slice_axis_inplace(Axis(1), Slice::from(1..));
    block.to_owned()
}

/// Three primitives stacked along a new leading axis
fn triple(dump: &Dump, names: [&str; 3], name: &str) -> Result<ArrayD<f64>> {
    let arrays = [
        dump.array(names[0])?,
        dump.array(names[1])?,
        dump.array(names[2])?,
    ];

    stack(name, &arrays)
}

/// Lorentz factor of the fluid relative to normal observers
fn gamma(dump: &Dump) -> Result<Field> {
    let utilde = triple(dump, ["u1", "u2", "u3"], "gamma")?;
    let gcov = spatial_block(&dump.array("gcov")?);
    let qsq = dot("gamma", &utilde, &matvec("gamma", &gcov, &utilde)?)?;

    Ok(Field::F64(qsq.mapv(|q| (1.0 + q).sqrt())))
}

/// Contravariant fluid 4-velocity
fn ucon(dump: &Dump) -> Result<Field> {
    let utilde = triple(dump, ["u1", "u2", "u3"], "ucon")?;
    let gamma = dump.array("gamma")?;
    let lapse = dump.array("lapse")?;
    let gcon = dump.array("gcon")?;

    let mut components = Vec::with_capacity(4);
    components.push(&gamma / &lapse);
    for i in 1..4 {
        let gcon_0i = gcon.index_axis(Axis(0), 0).index_axis_move(Axis(0), i);
        let utilde_i = utilde.index_axis(Axis(0), i - 1);
        components.push(&utilde_i - &(&gamma * &lapse * &gcon_0i));
    }

    Ok(Field::F64(stack("ucon", &components)?))
}

/// Covariant fluid 4-velocity
fn ucov(dump: &Dump) -> Result<Field> {
    let gcov = dump.array("gcov")?;
    let ucon = dump.array("ucon")?;

    Ok(Field::F64(matvec("ucov", &gcov, &ucon)?))
}

/// Contravariant magnetic field 4-vector, in the fluid frame
fn bcon(dump: &Dump) -> Result<Field> {
    let b = triple(dump, ["B1", "B2", "B3"], "bcon")?;
    let ucon = dump.array("ucon")?;
    let ucov = dump.array("ucov")?;

    // b^0 = B^i u_i
    let ucov_spatial = ucov.slice_axis(Axis(0), Slice::from(1..)).to_owned();
    let bcon_0 = dot("bcon", &b, &ucov_spatial)?;
    let ucon_0 = ucon.index_axis(Axis(0), 0);

    let mut components = Vec::with_capacity(4);
    for i in 1..4 {
        let b_i = b.index_axis(Axis(0), i - 1);
        let ucon_i = ucon.index_axis(Axis(0), i);
        components.push(&(&b_i + &(&bcon_0 * &ucon_i)) / &ucon_0);
    }
    components.insert(0, bcon_0);

    Ok(Field::F64(stack("bcon", &components)?))
}

/// Covariant magnetic field 4-vector
fn bcov(dump: &Dump) -> Result<Field> {
    let gcov = dump.array("gcov")?;
    let bcon = dump.array("bcon")?;

    Ok(Field::F64(matvec("bcov", &gcov, &bcon)?))
}

/// Magnetic field strength squared, `b^mu b_mu`
fn bsq(dump: &Dump) -> Result<Field> {
    let bcon = dump.array("bcon")?;
    let bcov = dump.array("bcov")?;

    Ok(Field::F64(dot("bsq", &bcon, &bcov)?))
}

/// Magnetic pressure
fn pb(dump: &Dump) -> Result<Field> {
    Ok(Field::F64(dump.array("bsq")? / 2.0))
}

/// Total pressure
fn ptot(dump: &Dump) -> Result<Field> {
    Ok(Field::F64(dump.array("Pg")? + dump.array("Pb")?))
}

/// Ratio of gas to magnetic pressure
fn beta(dump: &Dump) -> Result<Field> {
    Ok(Field::F64(dump.array("Pg")? / dump.array("Pb")?))
}

/// Magnetization
fn sigma(dump: &Dump) -> Result<Field> {
    Ok(Field::F64(dump.array("bsq")? / dump.array("rho")?))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::testing;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9 * (1.0 + b.abs())
    }

    /// `u^mu u_mu`, which should be -1 everywhere
    fn unorm(dump: &Dump) -> Result<ArrayD<f64>> {
        dot("unorm", &dump.array("ucon")?, &dump.array("ucov")?)
    }

    #[test]
    fn test_registry() {
        let registry = Registry::standard();
        assert!(registry.contains("bsq"));
        assert!(!registry.contains("rho"));
        assert!(registry.get("Pg").is_some());
        assert_eq!(registry.names().len(), 11);

        let registry = Registry::new().with("Pg", pg);
        assert_eq!(registry.names(), vec!["Pg"]);
        assert!(format!("{registry:?}").contains("Pg"));
    }

    #[test]
    fn test_pg() -> Result<()> {
        let dump = testing::memory_dump([4, 3, 2])?;
        let pg = dump.array("Pg")?;
        let u = dump.array("u")?;
        assert_eq!(pg, u * (dump.param_f64("gam")? - 1.0));

        Ok(())
    }

    #[test]
    fn test_four_velocity_normalized() -> Result<()> {
        for dump in [
            testing::memory_dump([4, 3, 2])?,
            testing::eks_memory_dump([8, 4, 2])?,
        ] {
            for n in unorm(&dump)?.iter() {
                assert!(close(*n, -1.0));
            }
        }

        Ok(())
    }

    #[test]
    fn test_bcon_orthogonal_to_ucon() -> Result<()> {
        let dump = testing::eks_memory_dump([8, 4, 2])?;
        let bcon = dump.array("bcon")?;
        let ucov = dump.array("ucov")?;
        let b_dot_u = dot("b.u", &bcon, &ucov)?;
        for n in b_dot_u.iter() {
            assert!(n.abs() < 1e-9);
        }

        let bsq = dump.array("bsq")?;
        assert!(bsq.iter().all(|b| *b >= 0.0));

        let beta = dump.array("beta")?;
        let expected = dump.array("Pg")? / (bsq.clone() / 2.0);
        assert_eq!(beta, expected);

        let sigma = dump.array("sigma")?;
        assert_eq!(sigma, bsq / dump.array("rho")?);

        Ok(())
    }

    #[test]
    fn test_flat_space_at_rest() -> Result<()> {
        // With no velocity in flat space, u^mu = (1, 0, 0, 0) and b^0 vanishes
        let dump = testing::memory_dump_with([2, 2, 2], |name, _| match name {
            "u1" | "u2" | "u3" => 0.0,
            "B1" => 2.0,
            _ => 1.0,
        })?;
        let ucon = dump.array("ucon")?;
        assert!(ucon.index_axis(Axis(0), 0).iter().all(|u| *u == 1.0));
        assert!(ucon.index_axis(Axis(0), 1).iter().all(|u| *u == 0.0));

        let bcon = dump.array("bcon")?;
        assert!(bcon.index_axis(Axis(0), 0).iter().all(|b| *b == 0.0));
        assert!(bcon.index_axis(Axis(0), 1).iter().all(|b| *b == 2.0));
        assert!(dump.array("bsq")?.iter().all(|b| *b == 6.0));
        assert!(dump.array("Pb")?.iter().all(|b| *b == 3.0));

        Ok(())
    }

    #[test]
    fn test_derived_fields_are_cached() -> Result<()> {
        let dump = testing::memory_dump([4, 3, 2])?;
        let first = dump.field("bsq")?;
        for name in ["gamma", "ucon", "ucov", "bcon", "bcov", "bsq"] {
            assert!(dump.cache().contains(name), "{name} should be cached");
        }
        assert!(Arc::ptr_eq(&first, &dump.field("bsq")?));

        Ok(())
    }
}
