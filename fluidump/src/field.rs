//! Arrays and header values handed out by a dump.
//!
use std::collections::BTreeMap;

use ndarray::{arr0, ArrayD, ArrayViewD, Axis, Zip};
use num_traits::{cast, Float};
use paste::paste;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// The kind of numeric data stored in a `Field`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementType {
    F64,
    I32,
}

impl ElementType {
    /// Flag variables are stored as integers, everything else as floating point.
    pub fn for_name(name: &str) -> Self {
        if name.contains("flag") {
            ElementType::I32
        } else {
            ElementType::F64
        }
    }
}

/// An n-dimensional array of values read from or computed over a dump.
///
/// Spatial axes are always the trailing axes. Vectors carry a leading component axis and tensors
/// two leading axes. Scalars are 0-dimensional arrays.
///
#[derive(Clone, Debug, PartialEq)]
pub enum Field {
    F64(ArrayD<f64>),
    I32(ArrayD<i32>),
}

macro_rules! Accessors {
    ($variant:ident, $type:ident) => {
        paste! {
            impl Field {
                #[doc = "Borrow the underlying array, if this field stores `" $type "`."]
                pub fn [<as_ $type>](&self) -> Option<&ArrayD<$type>> {
                    match self {
                        Field::$variant(array) => Some(array),
                        _ => None,
                    }
                }

                #[doc = "Build a field of `" $type "` zeros with the given shape."]
                pub fn [<zeros_ $type>](shape: &[usize]) -> Self {
                    Field::$variant(ArrayD::zeros(shape))
                }
            }

            impl From<ArrayD<$type>> for Field {
                fn from(array: ArrayD<$type>) -> Self {
                    Field::$variant(array)
                }
            }
        }
    };
}

Accessors!(F64, f64);
Accessors!(I32, i32);

impl Field {
    pub fn shape(&self) -> &[usize] {
        match self {
            Field::F64(array) => array.shape(),
            Field::I32(array) => array.shape(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Field::F64(_) => ElementType::F64,
            Field::I32(_) => ElementType::I32,
        }
    }

    /// Copy out the values as `f64`, converting integers if necessary.
    pub fn to_f64(&self) -> ArrayD<f64> {
        match self {
            Field::F64(array) => array.clone(),
            Field::I32(array) => array.mapv(|n| n as f64),
        }
    }

    /// Convert this field to the requested element type. Floats are truncated toward zero when
    /// cast to integers.
    pub fn cast(self, element: ElementType) -> Self {
        match (self, element) {
            (Field::F64(array), ElementType::I32) => Field::I32(array.mapv(|n| n as i32)),
            (Field::I32(array), ElementType::F64) => Field::F64(array.mapv(|n| n as f64)),
            (field, _) => field,
        }
    }

    /// Select one entry along the leading axis, eg a single component of a vector.
    pub fn component(&self, name: &str, index: usize) -> Result<Field> {
        let len = match self.shape().first() {
            Some(len) => *len,
            None => return Err(Error::shape_mismatch(name, &[index + 1], self.shape())),
        };
        if index >= len {
            return Err(Error::IndexOutOfRange {
                key: name.to_string(),
                index,
                len,
            });
        }

        Ok(match self {
            Field::F64(array) => Field::F64(array.index_axis(Axis(0), index).to_owned()),
            Field::I32(array) => Field::I32(array.index_axis(Axis(0), index).to_owned()),
        })
    }

    /// Apply `op` elementwise. The result is always floating point.
    pub fn unary(&self, op: Unary) -> Field {
        Field::F64(self.to_f64().mapv(|n| op.apply(n)))
    }

    /// A field of zeros with the same shape and element type as this one
    pub fn zeros_like(&self) -> Field {
        match self {
            Field::F64(array) => Field::F64(ArrayD::zeros(array.raw_dim())),
            Field::I32(array) => Field::I32(ArrayD::zeros(array.raw_dim())),
        }
    }

    /// A field of ones with the same shape and element type as this one
    pub fn ones_like(&self) -> Field {
        match self {
            Field::F64(array) => Field::F64(ArrayD::ones(array.raw_dim())),
            Field::I32(array) => Field::I32(ArrayD::ones(array.raw_dim())),
        }
    }
}

/// Elementwise math operations that can be requested with a name prefix, eg `sqrt_rho`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unary {
    Sqrt,
    Abs,
    Log10,
    Ln,
}

impl Unary {
    pub const PREFIXES: [(&'static str, Unary); 4] = [
        ("sqrt_", Unary::Sqrt),
        ("abs_", Unary::Abs),
        ("log_", Unary::Log10),
        ("ln_", Unary::Ln),
    ];

    /// Split a name into the operation its prefix requests and the rest of the name.
    pub fn parse(name: &str) -> Option<(Unary, &str)> {
        Self::PREFIXES.iter().find_map(|(prefix, op)| {
            name.strip_prefix(*prefix)
                .filter(|rest| !rest.is_empty())
                .map(|rest| (*op, rest))
        })
    }

    pub fn apply<F: Float>(self, n: F) -> F {
        match self {
            Unary::Sqrt => n.sqrt(),
            Unary::Abs => n.abs(),
            Unary::Log10 => n.log10(),
            Unary::Ln => n.ln(),
        }
    }
}

/// A scalar or string value from a dump file's header
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Param {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Param {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Param::Int(n) => cast(*n),
            Param::Float(n) => Some(*n),
            Param::Str(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Param::Int(n) => Some(*n),
            Param::Float(n) if n.fract() == 0.0 => cast(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Param::Str(s) => Some(s),
            _ => None,
        }
    }

    /// A numeric parameter as a 0-dimensional field
    pub fn to_field(&self) -> Option<Field> {
        match self {
            Param::Int(n) => Some(Field::F64(arr0(*n as f64).into_dyn())),
            Param::Float(n) => Some(Field::F64(arr0(*n).into_dyn())),
            Param::Str(_) => None,
        }
    }
}

impl From<i64> for Param {
    fn from(n: i64) -> Self {
        Param::Int(n)
    }
}

impl From<f64> for Param {
    fn from(n: f64) -> Self {
        Param::Float(n)
    }
}

impl From<&str> for Param {
    fn from(s: &str) -> Self {
        Param::Str(s.to_string())
    }
}

impl From<String> for Param {
    fn from(s: String) -> Self {
        Param::Str(s)
    }
}

/// Header metadata of a dump file
pub type Params = BTreeMap<String, Param>;

/// Typed access to header parameters.
pub trait ParamsExt {
    fn f64(&self, name: &str) -> Result<f64>;
    fn usize(&self, name: &str) -> Result<usize>;
    fn str(&self, name: &str) -> Result<&str>;

    /// Shape of the stored domain, `n{1,2,3}` plus ghost zones on either side.
    fn domain_shape(&self) -> Result<[usize; 3]>;
}

impl ParamsExt for Params {
    fn f64(&self, name: &str) -> Result<f64> {
        self.get(name)
            .ok_or_else(|| Error::MissingParam(name.to_string()))?
            .as_f64()
            .ok_or_else(|| Error::bad_param(name, "expecting a number"))
    }

    fn usize(&self, name: &str) -> Result<usize> {
        let n = self
            .get(name)
            .ok_or_else(|| Error::MissingParam(name.to_string()))?
            .as_i64()
            .ok_or_else(|| Error::bad_param(name, "expecting an integer"))?;

        usize::try_from(n).map_err(|_| Error::bad_param(name, format!("{n} is negative")))
    }

    fn str(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| Error::MissingParam(name.to_string()))?
            .as_str()
            .ok_or_else(|| Error::bad_param(name, "expecting a string"))
    }

    fn domain_shape(&self) -> Result<[usize; 3]> {
        let ng = if self.contains_key("ng") {
            self.usize("ng")?
        } else {
            0
        };

        Ok([
            self.usize("n1")? + 2 * ng,
            self.usize("n2")? + 2 * ng,
            self.usize("n3")? + 2 * ng,
        ])
    }
}

/// Check that `vector` (`[n, ...]`) and `matrix` (`[n, n, ...]`) agree on the component count and
/// on their trailing (spatial) axes.
fn check_tensor_shapes(name: &str, vector: &ArrayD<f64>, matrix: &ArrayD<f64>) -> Result<usize> {
    let n = vector.shape().first().copied().unwrap_or(0);
    let mut expected = vec![n, n];
    if vector.ndim() > 0 {
        expected.extend_from_slice(&vector.shape()[1..]);
    }
    if n == 0 || matrix.shape() != expected.as_slice() {
        return Err(Error::shape_mismatch(name, &expected, matrix.shape()));
    }

    Ok(n)
}

/// Sum over the first index of the matrix: `out[j] = sum_i vector[i] * matrix[i][j]`
///
/// Used to carry vector components between native and named coordinates with one of the grid's
/// Jacobians.
///
pub(crate) fn contract(name: &str, vector: &ArrayD<f64>, matrix: &ArrayD<f64>) -> Result<ArrayD<f64>> {
    let n = check_tensor_shapes(name, vector, matrix)?;
    let mut out = ArrayD::zeros(vector.raw_dim());
    for j in 0..n {
        let mut component = out.index_axis_mut(Axis(0), j);
        for i in 0..n {
            let m_ij = matrix.index_axis(Axis(0), i).index_axis_move(Axis(0), j);
            let v_i = vector.index_axis(Axis(0), i);
            Zip::from(&mut component)
                .and(&m_ij)
                .and(&v_i)
                .for_each(|c, &m, &v| *c += m * v);
        }
    }

    Ok(out)
}

/// Matrix-vector product: `out[i] = sum_j matrix[i][j] * vector[j]`
///
/// Lowers an index when `matrix` is the covariant metric.
///
pub(crate) fn matvec(name: &str, matrix: &ArrayD<f64>, vector: &ArrayD<f64>) -> Result<ArrayD<f64>> {
    let n = check_tensor_shapes(name, vector, matrix)?;
    let mut out = ArrayD::zeros(vector.raw_dim());
    for i in 0..n {
        let mut component = out.index_axis_mut(Axis(0), i);
        let row = matrix.index_axis(Axis(0), i);
        for j in 0..n {
            let m_ij = row.index_axis(Axis(0), j);
            let v_j = vector.index_axis(Axis(0), j);
            Zip::from(&mut component)
                .and(&m_ij)
                .and(&v_j)
                .for_each(|c, &m, &v| *c += m * v);
        }
    }

    Ok(out)
}

/// Sum of products of components over the leading axis
pub(crate) fn dot(name: &str, a: &ArrayD<f64>, b: &ArrayD<f64>) -> Result<ArrayD<f64>> {
    if a.shape() != b.shape() || a.ndim() == 0 {
        return Err(Error::shape_mismatch(name, a.shape(), b.shape()));
    }
    let mut out = a.index_axis(Axis(0), 0).to_owned();
    out.fill(0.0);
    for (a_i, b_i) in a.outer_iter().zip(b.outer_iter()) {
        Zip::from(&mut out)
            .and(&a_i)
            .and(&b_i)
            .for_each(|c, &x, &y| *c += x * y);
    }

    Ok(out)
}

/// Stack same-shaped arrays along a new leading axis.
pub(crate) fn stack(name: &str, arrays: &[ArrayD<f64>]) -> Result<ArrayD<f64>> {
    let views: Vec<ArrayViewD<f64>> = arrays.iter().map(|array| array.view()).collect();
    ndarray::stack(Axis(0), &views).map_err(|_| {
        let expected = arrays.first().map(|a| a.shape().to_vec()).unwrap_or_default();
        let found = arrays
            .iter()
            .map(|a| a.shape())
            .find(|shape| *shape != expected.as_slice())
            .unwrap_or(&[])
            .to_vec();
        Error::shape_mismatch(name, &expected, &found)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::{array, Array3};

    #[test]
    fn test_element_type_for_name() {
        assert_eq!(ElementType::for_name("fail_flag"), ElementType::I32);
        assert_eq!(ElementType::for_name("flags"), ElementType::I32);
        assert_eq!(ElementType::for_name("rho"), ElementType::F64);
    }

    #[test]
    fn test_accessors() {
        let field = Field::from(array![1.0, 2.0].into_dyn());
        assert!(field.as_f64().is_some());
        assert!(field.as_i32().is_none());
        assert_eq!(field.element_type(), ElementType::F64);

        let field = Field::zeros_i32(&[2, 3]);
        assert_eq!(field.shape(), &[2, 3]);
        assert_eq!(field.ndim(), 2);
        assert!(field.as_i32().is_some());
    }

    #[test]
    fn test_cast() {
        let field = Field::from(array![1.7, -2.2].into_dyn()).cast(ElementType::I32);
        assert_eq!(field, Field::I32(array![1, -2].into_dyn()));

        let field = field.cast(ElementType::F64);
        assert_eq!(field, Field::F64(array![1.0, -2.0].into_dyn()));
    }

    #[test]
    fn test_component() -> Result<()> {
        let vector = Field::from(Array3::from_shape_fn((4, 2, 2), |(i, j, k)| {
            (i * 100 + j * 10 + k) as f64
        }).into_dyn());
        let second = vector.component("v", 2)?;
        assert_eq!(second, Field::F64(array![[200.0, 201.0], [210.0, 211.0]].into_dyn()));

        assert!(matches!(
            vector.component("v", 4),
            Err(Error::IndexOutOfRange { index: 4, len: 4, .. })
        ));

        let scalar = Field::F64(arr0(1.0).into_dyn());
        assert!(matches!(scalar.component("s", 0), Err(Error::ShapeMismatch { .. })));

        Ok(())
    }

    #[test]
    fn test_unary_parse() {
        assert_eq!(Unary::parse("sqrt_rho"), Some((Unary::Sqrt, "rho")));
        assert_eq!(Unary::parse("abs_u_1"), Some((Unary::Abs, "u_1")));
        assert_eq!(Unary::parse("log_one"), Some((Unary::Log10, "one")));
        assert_eq!(Unary::parse("ln_sqrt_rho"), Some((Unary::Ln, "sqrt_rho")));
        assert_eq!(Unary::parse("sqrt_"), None);
        assert_eq!(Unary::parse("rho"), None);
        assert_eq!(Unary::parse("logistic"), None);
    }

    #[test]
    fn test_unary_apply() {
        let field = Field::I32(array![-4, 100].into_dyn());
        assert_eq!(field.unary(Unary::Abs), Field::F64(array![4.0, 100.0].into_dyn()));

        let field = Field::F64(array![100.0, 1.0].into_dyn());
        assert_eq!(field.unary(Unary::Log10), Field::F64(array![2.0, 0.0].into_dyn()));
    }

    #[test]
    fn test_param_conversions() {
        assert_eq!(Param::from(3_i64).as_f64(), Some(3.0));
        assert_eq!(Param::from(3.0).as_i64(), Some(3));
        assert_eq!(Param::from(3.5).as_i64(), None);
        assert_eq!(Param::from("eks").as_str(), Some("eks"));
        assert_eq!(Param::from("eks").as_f64(), None);
        assert_eq!(
            Param::from(2_i64).to_field(),
            Some(Field::F64(arr0(2.0).into_dyn()))
        );
    }

    #[test]
    fn test_params_ext() -> Result<()> {
        let mut params = Params::new();
        params.insert("n1".into(), 8_i64.into());
        params.insert("n2".into(), 4_i64.into());
        params.insert("n3".into(), 2_i64.into());
        params.insert("gam".into(), 1.5.into());
        params.insert("coordinates".into(), "eks".into());

        assert_eq!(params.f64("gam")?, 1.5);
        assert_eq!(params.usize("n1")?, 8);
        assert_eq!(params.str("coordinates")?, "eks");
        assert_eq!(params.domain_shape()?, [8, 4, 2]);
        assert!(matches!(params.f64("dt"), Err(Error::MissingParam(_))));
        assert!(matches!(params.usize("gam"), Err(Error::BadParam { .. })));

        params.insert("ng".into(), 2_i64.into());
        assert_eq!(params.domain_shape()?, [12, 8, 6]);

        Ok(())
    }

    #[test]
    fn test_contract_and_matvec() -> Result<()> {
        // Non-symmetric matrix, constant over a 2 cell domain
        let m = array![[1.0, 2.0], [3.0, 4.0]];
        let matrix = ArrayD::from_shape_fn(vec![2, 2, 2], |ix| m[[ix[0], ix[1]]]);
        let vector = ArrayD::from_shape_fn(vec![2, 2], |ix| [1.0, 10.0][ix[0]]);

        // v . M
        let out = contract("m", &vector, &matrix)?;
        assert_eq!(out, array![[31.0, 31.0], [42.0, 42.0]].into_dyn());

        // M . v
        let out = matvec("m", &matrix, &vector)?;
        assert_eq!(out, array![[21.0, 21.0], [43.0, 43.0]].into_dyn());

        let bad = ArrayD::zeros(vec![2, 2, 3]);
        assert!(matches!(
            contract("m", &vector, &bad),
            Err(Error::ShapeMismatch { .. })
        ));

        Ok(())
    }

    #[test]
    fn test_dot_and_stack() -> Result<()> {
        let a = stack("a", &[array![1.0, 2.0].into_dyn(), array![3.0, 4.0].into_dyn()])?;
        assert_eq!(a.shape(), &[2, 2]);

        let out = dot("a", &a, &a)?;
        assert_eq!(out, array![10.0, 20.0].into_dyn());

        assert!(stack("a", &[array![1.0].into_dyn(), array![1.0, 2.0].into_dyn()]).is_err());

        Ok(())
    }
}
