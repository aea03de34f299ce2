//! Lazy, cached access to everything in (or computable from) a dump file.
//!
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use ndarray::{ArrayD, Axis};
use parking_lot::Mutex;

use crate::cache::FieldCache;
use crate::config::DumpOptions;
use crate::errors::{Error, Result};
use crate::field::{contract, ElementType, Field, Param, Params, ParamsExt, Unary};
use crate::grid::{Geometry, Grid, GridOptions, Loci};
use crate::reader::{open_reader, Reader, ReaderOptions};
use crate::region::{select_field, Region, Selector};
use crate::units::Units;
use crate::variables::Registry;

/// Something that can be looked up in a dump: a variable by name or a sub-region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key<'a> {
    Name(&'a str),
    Region(Selector),
}

impl<'a> From<&'a str> for Key<'a> {
    fn from(name: &'a str) -> Self {
        Key::Name(name)
    }
}

impl From<Selector> for Key<'_> {
    fn from(selector: Selector) -> Self {
        Key::Region(selector)
    }
}

/// The value of a named key
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Field(Arc<Field>),
    Param(Param),
}

/// The result of resolving a key
#[derive(Clone, Debug)]
pub enum Resolved {
    Value(Value),
    Dump(Arc<Dump>),
}

impl Resolved {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Resolved::Value(value) => Some(value),
            Resolved::Dump(_) => None,
        }
    }

    pub fn into_dump(self) -> Option<Arc<Dump>> {
        match self {
            Resolved::Dump(dump) => Some(dump),
            Resolved::Value(_) => None,
        }
    }
}

/// A single dump file, or a region of one.
///
/// Variables are read or computed on first request. Computed (derived) variables are cached for
/// the lifetime of the dump, so asking for the same thing twice returns the same allocation.
/// Values read straight from the file are left to the reader to cache.
///
/// Slicing a dump creates a new, independent dump over a sub-region. Everything already cached
/// is copied over, restricted to the new region; anything else is computed lazily over just that
/// region.
///
pub struct Dump {
    path: PathBuf,
    label: String,
    units: Mutex<Option<Units>>,
    params: Arc<Params>,
    cache: FieldCache,
    region: Region,
    grid: Option<Box<dyn Geometry>>,
    reader: Box<dyn Reader>,
    registry: Arc<Registry>,
}

/// One way of resolving a name, tried in order until one matches
struct Strategy {
    name: &'static str,
    matches: fn(&Dump, &str) -> bool,
    resolve: fn(&Dump, &str) -> Result<Value>,
}

/// Everything after the cache, in order of precedence
const CASCADE: [Strategy; 8] = [
    Strategy {
        name: "params",
        matches: |dump, name| dump.params.contains_key(name),
        resolve: resolve_param,
    },
    Strategy {
        name: "registry",
        matches: |dump, name| dump.registry.contains(name),
        resolve: resolve_derived,
    },
    Strategy {
        name: "geometry",
        matches: |dump, name| dump.grid.as_ref().map_or(false, |grid| grid.can_provide(name)),
        resolve: resolve_geometry,
    },
    Strategy {
        name: "math",
        matches: |_, name| Unary::parse(name).is_some(),
        resolve: resolve_math,
    },
    Strategy {
        name: "vector index",
        matches: |_, name| vector_index(name).is_some(),
        resolve: resolve_vector_index,
    },
    Strategy {
        name: "named component",
        matches: |_, name| named_component(name).is_some(),
        resolve: resolve_named_component,
    },
    Strategy {
        name: "constant",
        matches: |_, name| constant(name).is_some(),
        resolve: resolve_constant,
    },
    Strategy {
        name: "reader",
        matches: |_, _| true,
        resolve: resolve_read,
    },
];

/// Geometry quantities that are handed out at cell centres only
const CENTRED: [&str; 4] = ["gcov", "gcon", "gdet", "lapse"];

/// Names of the coordinates of transformed vector components
const COMPONENT_NAMES: [&str; 4] = ["t", "r", "th", "phi"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Variance {
    Covariant,
    Contravariant,
}

impl Variance {
    fn from_separator(separator: char) -> Option<Self> {
        match separator {
            '_' => Some(Variance::Covariant),
            '^' => Some(Variance::Contravariant),
            _ => None,
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            Variance::Covariant => "cov",
            Variance::Contravariant => "con",
        }
    }
}

/// Parse `<prefix>_<d>` or `<prefix>^<d>`, with `d` in 0..=3
fn vector_index(name: &str) -> Option<(&str, Variance, usize)> {
    if Unary::parse(name).is_some() {
        return None;
    }

    let mut chars = name.chars().rev();
    let index = chars.next()?.to_digit(10).filter(|d| *d <= 3)? as usize;
    let variance = Variance::from_separator(chars.next()?)?;
    let prefix = &name[..name.len() - 2];
    if prefix.is_empty() {
        return None;
    }

    Some((prefix, variance, index))
}

/// Parse `<base>..._t`, `_r`, `_th`, `_phi` and their `^` counterparts. The vector is named by
/// the first character of the key.
fn named_component(name: &str) -> Option<(char, Variance, usize)> {
    if Unary::parse(name).is_some() {
        return None;
    }

    let (head, component) = name.rsplit_once(|c| c == '_' || c == '^')?;
    let index = COMPONENT_NAMES.iter().position(|n| *n == component)?;
    let separator = name[head.len()..].chars().next()?;
    let variance = Variance::from_separator(separator)?;
    let base = head.chars().next()?;

    Some((base, variance, index))
}

fn constant(name: &str) -> Option<bool> {
    match name {
        "zero" | "0" => Some(false),
        "one" | "1" => Some(true),
        _ => None,
    }
}

fn resolve_param(dump: &Dump, name: &str) -> Result<Value> {
    dump.params
        .get(name)
        .cloned()
        .map(Value::Param)
        .ok_or_else(|| Error::KeyResolution(name.to_string()))
}

fn resolve_derived(dump: &Dump, name: &str) -> Result<Value> {
    let function = dump
        .registry
        .get(name)
        .ok_or_else(|| Error::KeyResolution(name.to_string()))?;
    let field = function(dump)?;
    tracing::debug!(dump = %dump.label, name, shape = ?field.shape(), "caching derived field");

    Ok(Value::Field(dump.cache.insert(name, field)))
}

fn resolve_geometry(dump: &Dump, name: &str) -> Result<Value> {
    let grid = dump.grid().ok_or_else(|| Error::KeyResolution(name.to_string()))?;
    let array = grid.get(name)?;
    let array = if CENTRED.contains(&name) {
        array.index_axis_move(Axis(0), Loci::Cent as usize)
    } else {
        array
    };

    Ok(Value::Field(Arc::new(Field::F64(array))))
}

fn resolve_math(dump: &Dump, name: &str) -> Result<Value> {
    let (op, rest) = Unary::parse(name).ok_or_else(|| Error::KeyResolution(name.to_string()))?;

    Ok(Value::Field(Arc::new(dump.field(rest)?.unary(op))))
}

fn resolve_vector_index(dump: &Dump, name: &str) -> Result<Value> {
    let (prefix, variance, index) =
        vector_index(name).ok_or_else(|| Error::KeyResolution(name.to_string()))?;
    let vector = dump.field(&format!("{prefix}{}", variance.suffix()))?;

    Ok(Value::Field(Arc::new(vector.component(name, index)?)))
}

fn resolve_named_component(dump: &Dump, name: &str) -> Result<Value> {
    let (base, variance, index) =
        named_component(name).ok_or_else(|| Error::KeyResolution(name.to_string()))?;
    let grid = dump.grid().ok_or_else(|| Error::KeyResolution(name.to_string()))?;
    let vector = dump.array(&format!("{base}{}", variance.suffix()))?;

    // Both contract over the Jacobian's first index
    let jacobian = match variance {
        Variance::Covariant => grid.dxdX()?,
        Variance::Contravariant => grid.dXdx()?,
    };
    let transformed = contract(name, &vector, &jacobian)?;
    let component = transformed.index_axis_move(Axis(0), index);

    Ok(Value::Field(Arc::new(Field::F64(component))))
}

fn resolve_constant(dump: &Dump, name: &str) -> Result<Value> {
    let one = constant(name).ok_or_else(|| Error::KeyResolution(name.to_string()))?;
    let rho = dump.field("rho")?;
    let field = if one { rho.ones_like() } else { rho.zeros_like() };

    Ok(Value::Field(Arc::new(field)))
}

fn resolve_read(dump: &Dump, name: &str) -> Result<Value> {
    let element = ElementType::for_name(name);
    match dump.reader.read_variable(name, element, &dump.region)? {
        Some(field) => Ok(Value::Field(Arc::new(field))),
        None => Err(Error::KeyResolution(name.to_string())),
    }
}

impl Dump {
    /// Open a dump file.
    pub fn open(path: impl AsRef<Path>, options: DumpOptions) -> Result<Arc<Self>> {
        let reader = open_reader(
            path,
            ReaderOptions {
                include_ghost_zones: options.include_ghost_zones,
                params: options.params.clone(),
            },
        )?;

        Self::from_reader(reader, options)
    }

    /// Build a dump over an already opened reader.
    pub fn from_reader(reader: Box<dyn Reader>, options: DumpOptions) -> Result<Arc<Self>> {
        let params = match options.params {
            Some(params) => params,
            None => Arc::clone(reader.params()),
        };
        let region = Region::full(params.domain_shape()?);
        let grid: Option<Box<dyn Geometry>> = if options.build_geometry {
            let grid_options = GridOptions {
                cache_geometry: options.cache_geometry,
                cache_connection_coefficients: options.cache_connection_coefficients,
            };
            Some(Box::new(Grid::new(&params, grid_options)?))
        } else {
            None
        };
        let path = reader.path().to_path_buf();
        let label = options
            .label
            .unwrap_or_else(|| path.display().to_string());
        tracing::debug!(path = %path.display(), %label, shape = ?region.shape(), "opened dump");

        Ok(Arc::new(Self {
            path,
            label,
            units: Mutex::new(options.units),
            params,
            cache: FieldCache::new(),
            region,
            grid,
            reader,
            registry: options.registry,
        }))
    }

    /// Look up a key.
    ///
    /// A name resolves to a value. A region selector resolves to a dump over that region, or to
    /// this same dump if the selector doesn't restrict anything.
    ///
    pub fn resolve<'a>(self: &Arc<Self>, key: impl Into<Key<'a>>) -> Result<Resolved> {
        match key.into() {
            Key::Name(name) => Ok(Resolved::Value(self.get(name)?)),
            Key::Region(selector) => Ok(Resolved::Dump(self.slice(selector)?)),
        }
    }

    /// Look up a value by name.
    pub fn get(&self, name: &str) -> Result<Value> {
        if let Some(field) = self.cache.get(name) {
            return Ok(Value::Field(field));
        }

        for strategy in &CASCADE {
            if (strategy.matches)(self, name) {
                tracing::trace!(dump = %self.label, name, strategy = strategy.name, "resolving");
                return (strategy.resolve)(self, name);
            }
        }

        Err(Error::KeyResolution(name.to_string()))
    }

    /// Look up a value by name as a field. Numeric parameters become 0 dimensional fields.
    pub fn field(&self, name: &str) -> Result<Arc<Field>> {
        match self.get(name)? {
            Value::Field(field) => Ok(field),
            Value::Param(param) => param
                .to_field()
                .map(Arc::new)
                .ok_or_else(|| Error::bad_param(name, "expecting a number")),
        }
    }

    /// Look up a value by name as a floating point array.
    pub fn array(&self, name: &str) -> Result<ArrayD<f64>> {
        Ok(self.field(name)?.to_f64())
    }

    /// A dump over a sub-region of this one.
    ///
    /// The selector is relative to this dump's region. If it doesn't restrict anything, this
    /// dump is returned.
    ///
    pub fn slice(self: &Arc<Self>, selector: impl Into<Selector>) -> Result<Arc<Self>> {
        let selector = selector.into();
        if !selector.is_concrete() {
            return Ok(Arc::clone(self));
        }

        let region = self.region.compose(&selector)?;
        let reader = self.reader.reopen(Arc::clone(&self.params))?;
        let grid = match &self.grid {
            Some(grid) => Some(grid.slice(&selector)?),
            None => None,
        };
        let cache = FieldCache::new();
        for (name, field) in self.cache.entries() {
            cache.insert(&name, select_field(&name, &field, &selector, &self.region)?);
        }
        tracing::debug!(
            dump = %self.label,
            ?selector,
            shape = ?region.shape(),
            cached = cache.len(),
            "sliced dump"
        );

        Ok(Arc::new(Self {
            path: self.path.clone(),
            label: self.label.clone(),
            units: Mutex::new(*self.units.lock()),
            params: Arc::clone(&self.params),
            cache,
            region,
            grid,
            reader,
            registry: Arc::clone(&self.registry),
        }))
    }

    /// Associate physical units with this dump, given the black hole mass in solar masses and the
    /// mass unit in grams. Units can only be set once.
    pub fn set_units(&self, mbh: f64, m_unit: f64) -> Result<()> {
        let gam = self.params.f64("gam")?;
        let mut units = self.units.lock();
        if units.is_some() {
            return Err(Error::UnitsAlreadySet);
        }
        *units = Some(Units::new(mbh, m_unit, gam));

        Ok(())
    }

    pub fn units(&self) -> Option<Units> {
        *self.units.lock()
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.get(name)
    }

    pub fn param_f64(&self, name: &str) -> Result<f64> {
        self.params.f64(name)
    }

    pub fn params(&self) -> &Arc<Params> {
        &self.params
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn grid(&self) -> Option<&dyn Geometry> {
        self.grid.as_deref()
    }

    pub fn reader(&self) -> &dyn Reader {
        self.reader.as_ref()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn cache(&self) -> &FieldCache {
        &self.cache
    }
}

impl fmt::Debug for Dump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dump")
            .field("path", &self.path)
            .field("label", &self.label)
            .field("region", &self.region)
            .field("cached", &self.cache.keys())
            .finish()
    }
}

impl Drop for Dump {
    fn drop(&mut self) {
        tracing::trace!(dump = %self.label, cached = self.cache.len(), "dropping dump");
    }
}
