//! Restart files.
//!
//! A restart file is a container (see the native format) holding only what a simulation needs to
//! pick up where it left off: a handful of restart-named parameters and a single primitive block,
//! `p`, with its spatial axes stored in reverse order (`[p, k, j, i]`). Ghost zones are never
//! stored.
//!
use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;

use super::native::{read_data, read_header, write_container, Header, VariableInfo};
use super::{prim_index, Reader, ReaderOptions, PRIM_NAMES};
use crate::dump::Dump;
use crate::errors::{Error, Result};
use crate::field::{stack, ElementType, Field, Param, Params, ParamsExt};
use crate::region::{Extent, Region};

pub(crate) const MAGIC_NUMBER: u16 = 0xF1D1;

/// Recorded in restart files written by this crate
pub const CONVERTER_VERSION: &str = "fluidump-converter-0.1";

/// Name of the primitive block in a restart file
const PRIMS: &str = "p";

/// Parameter names that differ between restart files and dumps, as (restart, dump) pairs
const RENAMES: [(&str, &str); 12] = [
    ("nstep", "n_step"),
    ("dump_cnt", "n_dump"),
    ("Rhor", "r_eh"),
    ("Rin", "r_in"),
    ("Rout", "r_out"),
    ("x1Min", "x1min"),
    ("x1Max", "x1max"),
    ("x2Min", "x2min"),
    ("x2Max", "x2max"),
    ("x3Min", "x3min"),
    ("x3Max", "x3max"),
    ("DTd", "dump_cadence"),
];

/// Write the state of a dump as a restart file.
///
/// Primitives are read from the dump's file, as a `prims` block if there is one or else variable
/// by variable, over the whole domain regardless of how the dump has been sliced.
///
pub fn write_restart(dump: &Dump, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let params = restart_params(dump.params())?;
    let prims = Field::F64(restart_prims(dump)?);

    let mut file = BufWriter::new(File::create(path)?);
    write_container(&mut file, MAGIC_NUMBER, &params, [(PRIMS, &prims)])?;
    file.flush()?;

    tracing::debug!(path = %path.display(), source = %dump.path().display(), "wrote restart file");

    Ok(())
}

/// Translate a dump's parameters to those recorded by a restart file.
fn restart_params(params: &Params) -> Result<Params> {
    let get = |name: &str| {
        params
            .get(name)
            .cloned()
            .ok_or_else(|| Error::MissingParam(name.to_string()))
    };

    let mut restart = Params::new();
    restart.insert("version".into(), CONVERTER_VERSION.into());
    for name in ["n1", "n2", "n3", "gam", "cour", "t", "dt"] {
        restart.insert(name.into(), get(name)?);
    }

    if params.contains_key("tf") {
        restart.insert("tf".into(), get("tf")?);
    } else if params.contains_key("tlim") {
        restart.insert("tf".into(), get("tlim")?);
    }

    if params.contains_key("a") {
        restart.insert("a".into(), get("a")?);
        restart.insert("hslope".into(), get("hslope")?);
        restart.insert("Rhor".into(), get("r_eh")?);
        restart.insert("Rin".into(), get("r_in")?);
        restart.insert("Rout".into(), get("r_out")?);
        restart.insert("R0".into(), 0.0.into());
    } else {
        for axis in 1..=3 {
            restart.insert(format!("x{axis}Min"), get(&format!("x{axis}min"))?);
            restart.insert(format!("x{axis}Max"), get(&format!("x{axis}max"))?);
        }
    }

    if params.contains_key("n_step") {
        restart.insert("nstep".into(), get("n_step")?);
    }
    if params.contains_key("n_dump") {
        restart.insert("dump_cnt".into(), get("n_dump")?);
    }
    if params.contains_key("game") {
        restart.insert("game".into(), get("game")?);
        restart.insert("gamp".into(), get("gamp")?);
        restart.insert("fel0".into(), get("fel0")?);
    }

    // Every dump is a full dump
    let cadence = get("dump_cadence")?;
    restart.insert("DTd".into(), cadence.clone());
    restart.insert("DTf".into(), cadence);
    restart.insert("DTl".into(), 0.1.into());
    restart.insert("DTp".into(), 100_i64.into());
    restart.insert("DTr".into(), 10000_i64.into());
    restart.insert("restart_id".into(), 100_i64.into());

    let t = params.f64("t")?;
    let tdump = match params.get("next_dump_time") {
        Some(tdump) => tdump.clone(),
        None => (t + params.f64("dump_cadence")?).into(),
    };
    restart.insert("tdump".into(), tdump);
    let tlog = match params.get("next_log_time") {
        Some(tlog) => tlog.clone(),
        None => (t + 0.1).into(),
    };
    restart.insert("tlog".into(), tlog);

    Ok(restart)
}

/// The dump's primitives, without ghost zones, with spatial axes reversed.
fn restart_prims(dump: &Dump) -> Result<ndarray::ArrayD<f64>> {
    let reader = dump.reader();
    let params = reader.params();
    let full = Region::full(params.domain_shape()?);

    let prims = match reader.read_variable("prims", ElementType::F64, &full)? {
        Some(prims) => prims.to_f64(),
        None => {
            let mut arrays = Vec::with_capacity(PRIM_NAMES.len());
            for name in PRIM_NAMES {
                let prim = reader
                    .read_variable(name, ElementType::F64, &full)?
                    .ok_or_else(|| Error::KeyResolution(name.to_string()))?;
                arrays.push(prim.to_f64());
            }
            stack("prims", &arrays)?
        }
    };

    let ng = match params.get("ng") {
        Some(_) => params.usize("ng")?,
        None => 0,
    };
    let prims = if ng > 0 {
        let n = [params.usize("n1")?, params.usize("n2")?, params.usize("n3")?];
        let bulk = Region::new(n.map(|n| Extent::Range {
            start: ng,
            stop: n + ng,
        }));
        bulk.apply("prims", &prims)?
    } else {
        prims
    };

    if prims.ndim() != 4 {
        return Err(Error::shape_mismatch("prims", &[PRIM_NAMES.len(), 0, 0, 0], prims.shape()));
    }

    Ok(prims.permuted_axes(vec![0, 3, 2, 1]))
}

/// Translate a restart file's parameters into the names dumps use.
fn dump_params(restart: Params) -> Params {
    let mut params = Params::new();
    for (name, value) in restart {
        let name = RENAMES
            .iter()
            .find(|(from, _)| *from == name)
            .map_or(name.clone(), |(_, to)| to.to_string());
        params.insert(name, value);
    }

    let coordinates = if params.contains_key("a") {
        "eks"
    } else {
        "cartesian"
    };
    params.insert("coordinates".into(), coordinates.into());
    params.insert("ng".into(), Param::Int(0));

    params
}

/// Reader for restart files
///
/// Each primitive is available under its own name and all of them, stacked, as `prims`.
///
pub struct RestartReader {
    path: PathBuf,
    file: Mutex<BufReader<File>>,
    info: VariableInfo,
    params: Arc<Params>,
    prims: Mutex<Option<Arc<Field>>>,
}

impl RestartReader {
    pub fn open(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = BufReader::new(File::open(&path)?);
        let Header {
            params,
            mut variables,
        } = read_header(&mut file, MAGIC_NUMBER)?;
        let info = take_prims(&path, &mut variables)?;
        let params = match options.params {
            Some(params) => params,
            None => Arc::new(dump_params(params)),
        };

        Ok(Self {
            path,
            file: Mutex::new(file),
            info,
            params,
            prims: Mutex::new(None),
        })
    }

    /// The primitive block in `[p, i, j, k]` order
    fn prims(&self) -> Result<Arc<Field>> {
        let mut prims = self.prims.lock();
        if let Some(prims) = &*prims {
            return Ok(Arc::clone(prims));
        }

        let stored = read_data(&mut *self.file.lock(), &self.info)?.to_f64();
        if stored.ndim() != 4 {
            return Err(Error::Format(format!(
                "{}: expecting a 4 dimensional primitive block, found shape {:?}",
                self.path.display(),
                stored.shape()
            )));
        }
        let field = Arc::new(Field::F64(
            stored.permuted_axes(vec![0, 3, 2, 1]).as_standard_layout().into_owned(),
        ));
        tracing::debug!(path = %self.path.display(), shape = ?field.shape(), "read restart prims");
        *prims = Some(Arc::clone(&field));

        Ok(field)
    }
}

fn take_prims(path: &Path, variables: &mut HashMap<String, VariableInfo>) -> Result<VariableInfo> {
    variables.remove(PRIMS).ok_or_else(|| {
        Error::Format(format!("{}: no primitive block in restart file", path.display()))
    })
}

impl Reader for RestartReader {
    fn path(&self) -> &Path {
        &self.path
    }

    fn params(&self) -> &Arc<Params> {
        &self.params
    }

    fn read_variable(
        &self,
        name: &str,
        element: ElementType,
        region: &Region,
    ) -> Result<Option<Field>> {
        let field = if name == "prims" {
            region.apply_field(name, &*self.prims()?)?
        } else if let Some(index) = prim_index(name) {
            let prim = self.prims()?.component(name, index)?;
            region.apply_field(name, &prim)?
        } else {
            return Ok(None);
        };

        Ok(Some(field.cast(element)))
    }

    fn reopen(&self, params: Arc<Params>) -> Result<Box<dyn Reader>> {
        let file = BufReader::new(File::open(&self.path)?);

        Ok(Box::new(Self {
            path: self.path.clone(),
            file: Mutex::new(file),
            info: self.info.clone(),
            params,
            prims: Mutex::new(None),
        }))
    }
}
