use std::sync::Arc;

use ndarray::{Array3, Array4, ArrayD, Axis};
use rand::Rng;

use crate::config::DumpOptions;
use crate::dump::Dump;
use crate::errors::Result;
use crate::field::{Field, Params};
use crate::reader::{MemoryReader, PRIM_NAMES};

/// Header parameters for a Cartesian box on the unit cube
pub(crate) fn params(shape: [usize; 3]) -> Params {
    let mut params = Params::new();
    params.insert("n1".into(), (shape[0] as i64).into());
    params.insert("n2".into(), (shape[1] as i64).into());
    params.insert("n3".into(), (shape[2] as i64).into());
    params.insert("gam".into(), (4.0 / 3.0).into());
    params.insert("cour".into(), 0.9.into());
    params.insert("t".into(), 10.0.into());
    params.insert("dt".into(), 0.01.into());
    params.insert("dump_cadence".into(), 5.0.into());
    params.insert("coordinates".into(), "cartesian".into());
    for axis in 1..=3 {
        params.insert(format!("x{axis}min"), 0.0.into());
        params.insert(format!("x{axis}max"), 1.0.into());
    }

    params
}

/// Header parameters for a spinning black hole in EKS coordinates
pub(crate) fn eks_params(shape: [usize; 3]) -> Params {
    let a: f64 = 0.9375;
    let mut params = params(shape);
    for axis in 1..=3 {
        params.remove(&format!("x{axis}min"));
        params.remove(&format!("x{axis}max"));
    }
    params.insert("coordinates".into(), "eks".into());
    params.insert("a".into(), a.into());
    params.insert("hslope".into(), 0.3.into());
    params.insert("r_in".into(), 2.0.into());
    params.insert("r_out".into(), 40.0.into());
    params.insert("r_eh".into(), (1.0 + (1.0 - a * a).sqrt()).into());

    params
}

/// A deterministic primitive block, `[8, n1, n2, n3]`, with positive density and internal
/// energy and modest velocities and fields
pub(crate) fn prims(shape: [usize; 3]) -> ArrayD<f64> {
    let [n1, n2, n3] = shape;
    Array4::from_shape_fn((PRIM_NAMES.len(), n1, n2, n3), |(p, i, j, k)| {
        let (i, j, k) = (i as f64, j as f64, k as f64);
        match p {
            0 => 1.0 + 0.1 * i + 0.01 * j + 0.001 * k,
            1 => 0.5 + 0.05 * i - 0.01 * k,
            2 => 0.1 - 0.02 * i + 0.01 * j,
            3 => 0.01 * j - 0.005 * k,
            4 => 0.2 + 0.01 * k,
            5 => 0.3 + 0.01 * i,
            6 => -0.1 + 0.02 * j,
            _ => 0.05 * k - 0.02 * i,
        }
    })
    .into_dyn()
}

/// Named primitives from `prims`, plus an integer flag variable
pub(crate) fn prim_variables(shape: [usize; 3]) -> Vec<(String, Field)> {
    let prims = prims(shape);
    let mut variables: Vec<(String, Field)> = PRIM_NAMES
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let prim = prims.index_axis(Axis(0), index).to_owned();
            (name.to_string(), Field::F64(prim))
        })
        .collect();

    let [n1, n2, n3] = shape;
    let flags = Array3::from_shape_fn((n1, n2, n3), |(i, j, _)| ((i + j) % 2) as i32);
    variables.push(("fail_flag".to_string(), Field::I32(flags.into_dyn())));

    variables
}

pub(crate) fn memory_dump_from(params: Params, shape: [usize; 3]) -> Result<Arc<Dump>> {
    let reader = MemoryReader::new(params, prim_variables(shape));

    Dump::from_reader(Box::new(reader), DumpOptions::default())
}

/// A dump of a Cartesian box held in memory
pub(crate) fn memory_dump(shape: [usize; 3]) -> Result<Arc<Dump>> {
    memory_dump_from(params(shape), shape)
}

/// A dump around a spinning black hole held in memory
pub(crate) fn eks_memory_dump(shape: [usize; 3]) -> Result<Arc<Dump>> {
    memory_dump_from(eks_params(shape), shape)
}

/// A dump of a Cartesian box whose primitives are given by `value(name, [i, j, k])`
pub(crate) fn memory_dump_with<F>(shape: [usize; 3], value: F) -> Result<Arc<Dump>>
where
    F: Fn(&str, [usize; 3]) -> f64,
{
    let [n1, n2, n3] = shape;
    let variables = PRIM_NAMES.iter().map(|name| {
        let prim = Array3::from_shape_fn((n1, n2, n3), |(i, j, k)| value(name, [i, j, k]));
        (name.to_string(), Field::F64(prim.into_dyn()))
    });
    let reader = MemoryReader::new(params(shape), variables.collect::<Vec<_>>());

    Dump::from_reader(Box::new(reader), DumpOptions::default())
}

/// A dump of a Cartesian box with random primitives. Density and internal energy are positive.
pub(crate) fn random_dump(shape: [usize; 3]) -> Result<Arc<Dump>> {
    let mut rng = rand::thread_rng();
    let [n1, n2, n3] = shape;
    let variables: Vec<(String, Field)> = PRIM_NAMES
        .iter()
        .map(|name| {
            let range = match *name {
                "rho" | "u" => 0.1..10.0,
                _ => -0.5..0.5,
            };
            let prim = Array3::from_shape_simple_fn((n1, n2, n3), || rng.gen_range(range.clone()));
            (name.to_string(), Field::F64(prim.into_dyn()))
        })
        .collect();
    let reader = MemoryReader::new(params(shape), variables);

    Dump::from_reader(Box::new(reader), DumpOptions::default())
}
