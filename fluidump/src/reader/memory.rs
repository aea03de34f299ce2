use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use super::Reader;
use crate::errors::Result;
use crate::field::{ElementType, Field, Params};
use crate::region::Region;

/// A reader over variables held in memory
///
/// Spatial variables span the whole domain described by the parameters.
///
#[derive(Clone)]
pub struct MemoryReader {
    path: PathBuf,
    params: Arc<Params>,
    variables: Arc<HashMap<String, Field>>,
}

impl MemoryReader {
    pub fn new(params: Params, variables: impl IntoIterator<Item = (String, Field)>) -> Self {
        Self {
            path: PathBuf::from("<memory>"),
            params: Arc::new(params),
            variables: Arc::new(variables.into_iter().collect()),
        }
    }

    /// Report `path` as the file this reader is bound to.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }
}

impl Reader for MemoryReader {
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
        let field = match self.variables.get(name) {
            Some(field) if field.ndim() >= 3 => region.apply_field(name, field)?,
            Some(field) => field.clone(),
            None => return Ok(None),
        };

        Ok(Some(field.cast(element)))
    }

    fn reopen(&self, params: Arc<Params>) -> Result<Box<dyn Reader>> {
        Ok(Box::new(Self {
            path: self.path.clone(),
            params,
            variables: Arc::clone(&self.variables),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::Array3;

    use crate::region::Selector;

    #[test]
    fn test_read_variable() -> Result<()> {
        let rho = Array3::from_shape_fn((4, 3, 2), |(i, j, k)| (i * 100 + j * 10 + k) as f64);
        let reader = MemoryReader::new(
            Params::new(),
            [("rho".to_string(), Field::F64(rho.into_dyn()))],
        )
        .with_path("dump_00000010.fd");
        assert_eq!(reader.path(), Path::new("dump_00000010.fd"));

        let region = Region::full([4, 3, 2]).compose(&Selector::new(.., 1, 1..))?;
        let read = reader
            .read_variable("rho", ElementType::I32, &region)?
            .unwrap();
        assert_eq!(read.shape(), &[4, 1]);
        assert_eq!(read.as_i32().unwrap()[[3, 0]], 311);

        assert!(reader.read_variable("u", ElementType::F64, &region)?.is_none());

        Ok(())
    }
}
