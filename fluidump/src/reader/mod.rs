//! Reading variables out of dump files.
//!
//! A `Reader` is bound to a single file. It knows the file's header parameters and can read any
//! variable stored in the file, restricted to a region of the domain. Readers are region aware but
//! stateless with respect to regions: the same reader serves a dump and every dump sliced from it.
//!
mod memory;
mod native;
mod restart;

use std::{
    fs::File,
    io::BufReader,
    path::Path,
    sync::Arc,
};

use crate::errors::{Error, Result};
use crate::extio::ExtendedRead;
use crate::field::{ElementType, Field, Params};
use crate::region::Region;

pub use memory::MemoryReader;
pub use native::{write_native, NativeReader};
pub use restart::{write_restart, RestartReader};

/// Names of the primitive variables, in the order they're stored in a primitive block
pub const PRIM_NAMES: [&str; 8] = ["rho", "u", "u1", "u2", "u3", "B1", "B2", "B3"];

/// The index of a primitive variable in a primitive block
pub fn prim_index(name: &str) -> Option<usize> {
    PRIM_NAMES.iter().position(|prim| *prim == name)
}

pub trait Reader: Send + Sync {
    /// The file this reader is bound to
    fn path(&self) -> &Path;

    /// The file's header parameters
    fn params(&self) -> &Arc<Params>;

    /// Read a variable restricted to `region`.
    ///
    /// `region` is expressed in the domain this reader reports through `params`, so if ghost
    /// zones are being hidden, region index 0 is the first cell past the ghost zones.
    ///
    /// Returns `Ok(None)` if the file has no such variable.
    ///
    fn read_variable(
        &self,
        name: &str,
        element: ElementType,
        region: &Region,
    ) -> Result<Option<Field>>;

    /// A new reader for the same file, for use by a dump derived from this reader's dump.
    ///
    /// `params` replaces whatever this reader would report, saving a re-read of the header.
    ///
    fn reopen(&self, params: Arc<Params>) -> Result<Box<dyn Reader>>;
}

/// Options for opening a reader
#[derive(Clone, Debug, Default)]
pub struct ReaderOptions {
    /// Keep ghost zones stored in the file as part of the domain
    pub include_ghost_zones: bool,

    /// Use these parameters instead of the ones in the file's header
    pub params: Option<Arc<Params>>,
}

/// Open a reader for a dump file, picking the implementation from the file's magic number.
pub fn open_reader(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Box<dyn Reader>> {
    let path = path.as_ref();
    let magic = {
        let mut file = BufReader::new(File::open(path)?);
        file.read_u16()?
    };

    tracing::debug!(path = %path.display(), magic, "opening reader");
    match magic {
        native::MAGIC_NUMBER => Ok(Box::new(NativeReader::open(path, options)?)),
        restart::MAGIC_NUMBER => Ok(Box::new(RestartReader::open(path, options)?)),
        _ => Err(Error::Format(format!(
            "{}: unrecognized magic number {magic:#06x}",
            path.display()
        ))),
    }
}

/// Ghost zones to strip from stored arrays, given the file's parameters and whether the caller
/// asked to see them.
///
/// Returns the file's ghost zone width and the parameters the reader should report, with `ng`
/// zeroed if ghost zones are hidden.
///
fn ghost_zones(params: Params, options: &ReaderOptions) -> Result<(usize, Arc<Params>)> {
    let ng = match params.get("ng") {
        Some(ng) => ng
            .as_i64()
            .and_then(|ng| usize::try_from(ng).ok())
            .ok_or_else(|| Error::bad_param("ng", "expecting a non-negative integer"))?,
        None => 0,
    };
    let strip = if options.include_ghost_zones { 0 } else { ng };

    let params = match &options.params {
        Some(params) => Arc::clone(params),
        None if strip > 0 => {
            let mut params = params;
            params.insert("ng".to_string(), 0_i64.into());
            Arc::new(params)
        }
        None => Arc::new(params),
    };

    Ok((strip, params))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    #[test]
    fn test_prim_index() {
        assert_eq!(prim_index("rho"), Some(0));
        assert_eq!(prim_index("B3"), Some(7));
        assert_eq!(prim_index("bsq"), None);
    }

    #[test]
    fn test_open_reader_bad_magic() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(&[0xBA, 0xAD, 0, 0])?;

        let result = open_reader(file.path(), ReaderOptions::default());
        assert!(matches!(result, Err(Error::Format(_))));

        Ok(())
    }

    #[test]
    fn test_ghost_zones() -> Result<()> {
        let mut params = Params::new();
        params.insert("ng".into(), 2_i64.into());

        let (strip, reported) = ghost_zones(params.clone(), &ReaderOptions::default())?;
        assert_eq!(strip, 2);
        assert_eq!(reported.get("ng"), Some(&0_i64.into()));

        let options = ReaderOptions {
            include_ghost_zones: true,
            params: None,
        };
        let (strip, reported) = ghost_zones(params, &options)?;
        assert_eq!(strip, 0);
        assert_eq!(reported.get("ng"), Some(&2_i64.into()));

        Ok(())
    }
}
