//! Standard analyses.
//!
use std::sync::Arc;

use ndarray::{arr0, ArrayD, Axis};

use super::ResultMap;
use crate::config::AnalysisOptions;
use crate::dump::Dump;
use crate::errors::{Error, Result};
use crate::region::Selector;

/// Variables profiled when `profile_vars` isn't set
const PROFILE_VARS: &str = "rho,Pg,bsq";

fn scalar(value: f64) -> ArrayD<f64> {
    arr0(value).into_dyn()
}

/// A variable over a dump that must cover all three spatial axes
fn volume(dump: &Dump, name: &str) -> Result<ArrayD<f64>> {
    let array = dump.array(name)?;
    if array.ndim() != 3 {
        return Err(Error::shape_mismatch(name, &dump.region().shape(), array.shape()));
    }

    Ok(array)
}

/// Time and a few global scalars, recorded for every dump
pub(super) fn basic(
    dump: &Arc<Dump>,
    out: &mut ResultMap,
    _options: &AnalysisOptions,
) -> Result<()> {
    out.insert("coord/t".to_string(), scalar(dump.param_f64("t")?));

    let rho = dump.array("rho")?;
    let rho_mean = rho
        .mean()
        .ok_or_else(|| Error::shape_mismatch("rho", &dump.region().shape(), rho.shape()))?;
    let rho_max = rho.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    out.insert("t/rho_mean".to_string(), scalar(rho_mean));
    out.insert("t/rho_max".to_string(), scalar(rho_max));

    Ok(())
}

/// Shell averages over the second and third axes, as a function of the first.
///
/// Each profile is recorded twice: under `rt/` to keep one per dump, and under `rav/` to be summed
/// over dumps. Averages are volume weighted when the dump has geometry.
///
pub(super) fn profiles(
    dump: &Arc<Dump>,
    out: &mut ResultMap,
    options: &AnalysisOptions,
) -> Result<()> {
    let weight = match dump.grid() {
        Some(_) => volume(dump, "gdet")?,
        None => ArrayD::ones(dump.region().shape()),
    };
    let norm = weight.sum_axis(Axis(2)).sum_axis(Axis(1));

    let names = options.setting("profile_vars").unwrap_or(PROFILE_VARS);
    for name in names.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        let array = volume(dump, name)?;
        let profile = (array * &weight).sum_axis(Axis(2)).sum_axis(Axis(1)) / &norm;
        let profile = profile.into_dyn();
        out.insert(format!("rav/{name}"), profile.clone());
        out.insert(format!("rt/{name}"), profile);
    }

    Ok(())
}

/// Mass accretion rate and magnetic flux through a shell of constant `X1`.
///
/// The shell is at index `flux_index` along the first axis, the middle of the domain if that isn't
/// set.
///
pub(super) fn fluxes(
    dump: &Arc<Dump>,
    out: &mut ResultMap,
    options: &AnalysisOptions,
) -> Result<()> {
    let n1 = volume(dump, "rho")?.len_of(Axis(0));
    let index = match options.setting("flux_index") {
        Some(index) => index
            .parse::<usize>()
            .map_err(|err| Error::bad_param("flux_index", err.to_string()))?,
        None => n1 / 2,
    };
    if index >= n1 {
        return Err(Error::IndexOutOfRange {
            key: "flux_index".to_string(),
            index,
            len: n1,
        });
    }

    let shell = dump.slice(Selector::new(index as isize, .., ..))?;
    // Cell widths are 0 dimensional
    let face = shell.array("dx2")?.sum() * shell.array("dx3")?.sum();
    let area = shell.array("gdet")? * face;

    let mdot = -(shell.array("rho")? * shell.array("u^1")? * &area).sum();
    let phi = 0.5 * (shell.array("abs_B1")? * &area).sum();
    out.insert("t/Mdot".to_string(), scalar(mdot));
    out.insert("t/Phi_b".to_string(), scalar(phi));

    Ok(())
}
