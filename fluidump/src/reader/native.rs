//! The native dump format.
//!
//! All numbers are Big Endian. A file is laid out as:
//!
//! ```text
//! magic: u16
//! version: u32
//! n_params: u32
//! n_params * (name: str, tag: u8, value: i64 | f64 | str)
//! n_variables: u32
//! n_variables * (name: str, element: u8, ndim: u8, ndim * u64, data)
//! ```
//!
//! Strings are a u32 byte length followed by UTF-8 bytes. Variable data is stored in row major
//! order.
//!
use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use ndarray::{ArrayD, IxDyn};
use parking_lot::Mutex;

use super::{ghost_zones, Reader, ReaderOptions};
use crate::errors::{Error, Result};
use crate::extio::{ExtendedRead, ExtendedWrite};
use crate::field::{ElementType, Field, Param, Params};
use crate::region::{Extent, Region};

pub(crate) const MAGIC_NUMBER: u16 = 0xF1D0;
pub(crate) const FORMAT_VERSION: u32 = 1;

const PARAM_INT: u8 = 0;
const PARAM_FLOAT: u8 = 1;
const PARAM_STR: u8 = 2;

const ELEMENT_F64: u8 = 0;
const ELEMENT_I32: u8 = 1;

/// Where a variable's data lives in a container file
#[derive(Clone, Debug)]
pub(crate) struct VariableInfo {
    pub element: ElementType,
    pub shape: Vec<usize>,
    pub offset: u64,
}

/// Header and variable index of a container file
pub(crate) struct Header {
    pub params: Params,
    pub variables: HashMap<String, VariableInfo>,
}

/// Read the header of a container file and index its variables, skipping over their data.
pub(crate) fn read_header(stream: &mut (impl Read + Seek), magic: u16) -> Result<Header> {
    let found = stream.read_u16()?;
    if found != magic {
        return Err(Error::Format(format!(
            "expecting magic number {magic:#06x}, found {found:#06x}"
        )));
    }
    let version = stream.read_u32()?;
    if version != FORMAT_VERSION {
        return Err(Error::Format(format!("unsupported format version {version}")));
    }

    let n_params = stream.read_u32()?;
    let mut params = Params::new();
    for _ in 0..n_params {
        let name = stream.read_str()?;
        let value = match stream.read_byte()? {
            PARAM_INT => Param::Int(stream.read_i64()?),
            PARAM_FLOAT => Param::Float(stream.read_f64()?),
            PARAM_STR => Param::Str(stream.read_str()?),
            tag => {
                return Err(Error::Format(format!(
                    "bad type tag {tag} for parameter {name}"
                )))
            }
        };
        params.insert(name, value);
    }

    let n_variables = stream.read_u32()?;
    let mut variables = HashMap::new();
    for _ in 0..n_variables {
        let name = stream.read_str()?;
        let element = match stream.read_byte()? {
            ELEMENT_F64 => ElementType::F64,
            ELEMENT_I32 => ElementType::I32,
            tag => {
                return Err(Error::Format(format!(
                    "bad element type {tag} for variable {name}"
                )))
            }
        };
        let ndim = stream.read_byte()?;
        let mut shape = Vec::with_capacity(ndim as usize);
        for _ in 0..ndim {
            shape.push(stream.read_u64()? as usize);
        }

        let offset = stream.stream_position()?;
        let size = match element {
            ElementType::F64 => 8,
            ElementType::I32 => 4,
        };
        let len: usize = shape.iter().product();
        stream.seek(SeekFrom::Current((len * size) as i64))?;

        variables.insert(
            name,
            VariableInfo {
                element,
                shape,
                offset,
            },
        );
    }

    Ok(Header { params, variables })
}

/// Read a variable's data, given its location in the file.
pub(crate) fn read_data(stream: &mut (impl Read + Seek), info: &VariableInfo) -> Result<Field> {
    stream.seek(SeekFrom::Start(info.offset))?;
    let len: usize = info.shape.iter().product();
    let shape = IxDyn(&info.shape);

    let field = match info.element {
        ElementType::F64 => {
            let mut data = Vec::with_capacity(len);
            for _ in 0..len {
                data.push(stream.read_f64()?);
            }
            Field::F64(ArrayD::from_shape_vec(shape, data).map_err(shape_error)?)
        }
        ElementType::I32 => {
            let mut data = Vec::with_capacity(len);
            for _ in 0..len {
                data.push(stream.read_i32()?);
            }
            Field::I32(ArrayD::from_shape_vec(shape, data).map_err(shape_error)?)
        }
    };

    Ok(field)
}

fn shape_error(err: ndarray::ShapeError) -> Error {
    Error::Format(err.to_string())
}

/// Write a container file.
pub(crate) fn write_container<'a>(
    stream: &mut impl Write,
    magic: u16,
    params: &Params,
    variables: impl IntoIterator<Item = (&'a str, &'a Field)>,
) -> Result<()> {
    stream.write_u16(magic)?;
    stream.write_u32(FORMAT_VERSION)?;

    stream.write_u32(params.len() as u32)?;
    for (name, value) in params {
        stream.write_str(name)?;
        match value {
            Param::Int(n) => {
                stream.write_byte(PARAM_INT)?;
                stream.write_i64(*n)?;
            }
            Param::Float(n) => {
                stream.write_byte(PARAM_FLOAT)?;
                stream.write_f64(*n)?;
            }
            Param::Str(s) => {
                stream.write_byte(PARAM_STR)?;
                stream.write_str(s)?;
            }
        }
    }

    let variables: Vec<(&str, &Field)> = variables.into_iter().collect();
    stream.write_u32(variables.len() as u32)?;
    for (name, field) in variables {
        stream.write_str(name)?;
        stream.write_byte(match field.element_type() {
            ElementType::F64 => ELEMENT_F64,
            ElementType::I32 => ELEMENT_I32,
        })?;
        stream.write_byte(field.ndim() as u8)?;
        for len in field.shape() {
            stream.write_u64(*len as u64)?;
        }

        // Logical order, whatever the memory layout
        match field {
            Field::F64(array) => {
                for n in array.iter() {
                    stream.write_f64(*n)?;
                }
            }
            Field::I32(array) => {
                for n in array.iter() {
                    stream.write_i32(*n)?;
                }
            }
        }
    }

    Ok(())
}

/// Write a dump file in the native format.
///
/// Spatial variables should have the domain's full shape, including ghost zones if the `ng`
/// parameter says there are any, as trailing axes.
///
pub fn write_native<'a>(
    path: impl AsRef<Path>,
    params: &Params,
    variables: impl IntoIterator<Item = (&'a str, &'a Field)>,
) -> Result<()> {
    let path = path.as_ref();
    let mut file = BufWriter::new(File::create(path)?);
    write_container(&mut file, MAGIC_NUMBER, params, variables)?;
    file.flush()?;

    tracing::debug!(path = %path.display(), "wrote native dump");

    Ok(())
}

/// Reader for native format dump files
///
/// A variable is read whole the first time it's asked for and kept, so that reading many regions
/// of the same variable only touches the file once.
///
pub struct NativeReader {
    path: PathBuf,
    file: Mutex<BufReader<File>>,
    index: Arc<HashMap<String, VariableInfo>>,
    params: Arc<Params>,

    /// Width of ghost zones to strip from stored arrays
    strip: usize,

    loaded: Mutex<HashMap<String, Arc<Field>>>,
}

impl NativeReader {
    pub fn open(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = BufReader::new(File::open(&path)?);
        let Header { params, variables } = read_header(&mut file, MAGIC_NUMBER)?;
        let (strip, params) = ghost_zones(params, &options)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            index: Arc::new(variables),
            params,
            strip,
            loaded: Mutex::new(HashMap::new()),
        })
    }

    /// Names of the variables stored in the file
    pub fn variables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.index.keys().map(String::as_str).collect();
        names.sort_unstable();

        names
    }

    fn load(&self, name: &str, info: &VariableInfo) -> Result<Arc<Field>> {
        if let Some(field) = self.loaded.lock().get(name) {
            return Ok(Arc::clone(field));
        }

        let field = read_data(&mut *self.file.lock(), info)?;
        let field = if self.strip > 0 && field.ndim() >= 3 {
            let shape = field.shape();
            let ndim = shape.len();
            let g = self.strip;
            let mut extents = [Extent::Index(0); 3];
            for (axis, extent) in extents.iter_mut().enumerate() {
                let len = shape[ndim - 3 + axis];
                if len < 2 * g {
                    return Err(Error::shape_mismatch(name, &[2 * g], &[len]));
                }
                *extent = Extent::Range {
                    start: g,
                    stop: len - g,
                };
            }
            Region::new(extents).apply_field(name, &field)?
        } else {
            field
        };
        tracing::debug!(path = %self.path.display(), name, shape = ?field.shape(), "read variable");

        let field = Arc::new(field);
        self.loaded
            .lock()
            .insert(name.to_string(), Arc::clone(&field));

        Ok(field)
    }
}

impl Reader for NativeReader {
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
        let info = match self.index.get(name) {
            Some(info) => info,
            None => return Ok(None),
        };
        let field = self.load(name, info)?;
        let field = if field.ndim() >= 3 {
            region.apply_field(name, &field)?
        } else {
            field.as_ref().clone()
        };

        Ok(Some(field.cast(element)))
    }

    fn reopen(&self, params: Arc<Params>) -> Result<Box<dyn Reader>> {
        let file = BufReader::new(File::open(&self.path)?);

        Ok(Box::new(Self {
            path: self.path.clone(),
            file: Mutex::new(file),
            index: Arc::clone(&self.index),
            params,
            strip: self.strip,
            loaded: Mutex::new(HashMap::new()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::{Array3, Array4};

    use crate::region::Selector;

    fn params(ng: i64) -> Params {
        let mut params = Params::new();
        params.insert("n1".into(), 4_i64.into());
        params.insert("n2".into(), 3_i64.into());
        params.insert("n3".into(), 2_i64.into());
        params.insert("ng".into(), ng.into());
        params.insert("gam".into(), (4.0 / 3.0).into());
        params.insert("coordinates".into(), "cartesian".into());

        params
    }

    fn cube(shape: (usize, usize, usize)) -> Field {
        Field::from(
            Array3::from_shape_fn(shape, |(i, j, k)| (i * 100 + j * 10 + k) as f64).into_dyn(),
        )
    }

    #[test]
    fn test_write_then_read() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("dump.fd");

        let rho = cube((4, 3, 2));
        let flags = Field::I32(Array3::from_shape_fn((4, 3, 2), |(i, _, _)| i as i32).into_dyn());
        let vector = Field::from(
            Array4::from_shape_fn((3, 4, 3, 2), |(c, i, j, k)| (c * 1000 + i * 100 + j * 10 + k) as f64)
                .into_dyn(),
        );
        write_native(
            &path,
            &params(0),
            [("rho", &rho), ("fail_flag", &flags), ("B", &vector)],
        )?;

        let reader = NativeReader::open(&path, ReaderOptions::default())?;
        assert_eq!(reader.params().as_ref(), &params(0));
        assert_eq!(reader.variables(), vec!["B", "fail_flag", "rho"]);

        let full = Region::full([4, 3, 2]);
        let read = reader.read_variable("rho", ElementType::F64, &full)?.unwrap();
        assert_eq!(read, rho);

        let read = reader.read_variable("fail_flag", ElementType::I32, &full)?.unwrap();
        assert_eq!(read, flags);

        let region = full.compose(&Selector::new(1..3, 2, ..))?;
        let read = reader.read_variable("B", ElementType::F64, &region)?.unwrap();
        assert_eq!(read.shape(), &[3, 2, 2]);
        assert_eq!(read.as_f64().unwrap()[[2, 1, 1]], 2221.0);

        assert!(reader.read_variable("nope", ElementType::F64, &full)?.is_none());

        Ok(())
    }

    #[test]
    fn test_ghost_zones_stripped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("dump.fd");
        write_native(&path, &params(1), [("rho", &cube((6, 5, 4)))])?;

        let reader = NativeReader::open(&path, ReaderOptions::default())?;
        assert_eq!(reader.params().get("ng"), Some(&Param::Int(0)));
        let rho = reader
            .read_variable("rho", ElementType::F64, &Region::full([4, 3, 2]))?
            .unwrap();
        assert_eq!(rho.shape(), &[4, 3, 2]);
        assert_eq!(rho.as_f64().unwrap()[[0, 0, 0]], 111.0);

        let options = ReaderOptions {
            include_ghost_zones: true,
            params: None,
        };
        let reader = NativeReader::open(&path, options)?;
        assert_eq!(reader.params().get("ng"), Some(&Param::Int(1)));
        let rho = reader
            .read_variable("rho", ElementType::F64, &Region::full([6, 5, 4]))?
            .unwrap();
        assert_eq!(rho.as_f64().unwrap()[[0, 0, 0]], 0.0);

        Ok(())
    }

    #[test]
    fn test_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("dump.fd");
        write_native(&path, &params(0), [("rho", &cube((4, 3, 2)))])?;

        let reader = NativeReader::open(&path, ReaderOptions::default())?;
        let mut other = params(0);
        other.insert("t".into(), 10.0.into());
        let reopened = reader.reopen(Arc::new(other.clone()))?;
        assert_eq!(reopened.params().as_ref(), &other);
        assert_eq!(reopened.path(), path.as_path());

        let rho = reopened
            .read_variable("rho", ElementType::F64, &Region::full([4, 3, 2]))?
            .unwrap();
        assert_eq!(rho, cube((4, 3, 2)));

        Ok(())
    }

    #[test]
    fn test_bad_magic() -> Result<()> {
        let mut buffer: Vec<u8> = Vec::new();
        write_container(&mut buffer, MAGIC_NUMBER + 1, &params(0), [])?;
        let result = read_header(&mut std::io::Cursor::new(buffer), MAGIC_NUMBER);
        assert!(matches!(result, Err(Error::Format(_))));

        Ok(())
    }
}
