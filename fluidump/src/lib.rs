mod analysis;
mod batch;
mod cache;
mod config;
mod dump;
mod errors;
mod extio;
mod field;
mod grid;
mod reader;
mod region;
mod units;
mod variables;

#[cfg(test)]
mod testing;

pub use analysis::{
    analyze, analyze_catch_err, run_analyses, Aggregate, Analyses, AnalysisContext, AnalysisFn,
    EntryKind, MergeFailure, ResultMap,
};
pub use batch::{run_batch, run_batch_into};
pub use cache::FieldCache;
pub use config::{AnalysisOptions, BatchConfig, DumpOptions};
pub use dump::{Dump, Key, Resolved, Value};
pub use errors::{Error, Result};
pub use field::{ElementType, Field, Param, Params, ParamsExt, Unary};
pub use grid::{
    determinant, invert, native_grid, CoordinateSystem, Geometry, Grid, GridOptions, Loci, Tensor,
    Vector,
};
pub use reader::{
    open_reader, write_native, write_restart, MemoryReader, NativeReader, Reader, ReaderOptions,
    RestartReader, PRIM_NAMES,
};
pub use region::{AxisSelector, Extent, Region, Selector};
pub use units::{Units, C, G, MSUN};
pub use variables::{DerivedFn, Registry};
