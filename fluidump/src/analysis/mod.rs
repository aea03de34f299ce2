//! Running analyses over dumps and combining their results.
//!
//! An analysis is a plain function that asks a dump for whatever it needs and records results in
//! a flat map from key to array. Keys are namespaced with `/`: the namespace decides how results
//! for the same key from different dumps are combined (see `merge`).
//!
mod analyses;
mod merge;

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::Path,
    sync::Arc,
};

use ndarray::ArrayD;

use crate::config::{AnalysisOptions, BatchConfig, DumpOptions};
use crate::dump::Dump;
use crate::errors::{Error, Result};

pub use merge::{Aggregate, EntryKind, MergeFailure};

/// Results of analysing a single dump
pub type ResultMap = BTreeMap<String, ArrayD<f64>>;

/// Analyses a dump, adding results to the map
pub type AnalysisFn = fn(&Arc<Dump>, &mut ResultMap, &AnalysisOptions) -> Result<()>;

/// A set of named analyses
#[derive(Clone, Default)]
pub struct Analyses {
    functions: HashMap<String, AnalysisFn>,
}

impl Analyses {
    pub fn new() -> Self {
        Self::default()
    }

    /// `basic`, `profiles` and `fluxes`
    pub fn standard() -> Self {
        Self::new()
            .with("basic", analyses::basic)
            .with("profiles", analyses::profiles)
            .with("fluxes", analyses::fluxes)
    }

    pub fn insert(&mut self, name: &str, function: AnalysisFn) {
        self.functions.insert(name.to_string(), function);
    }

    pub fn with(mut self, name: &str, function: AnalysisFn) -> Self {
        self.insert(name, function);
        self
    }

    pub fn get(&self, name: &str) -> Option<AnalysisFn> {
        self.functions.get(name).copied()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();

        names
    }
}

impl fmt::Debug for Analyses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analyses")
            .field("functions", &self.names())
            .finish()
    }
}

/// Everything needed to analyse a dump file, shared by every file in a batch.
#[derive(Clone, Debug)]
pub struct AnalysisContext {
    pub dump_options: DumpOptions,
    pub analyses: Arc<Analyses>,
    pub options: AnalysisOptions,
}

impl AnalysisContext {
    /// The standard analyses, with default options for opening dumps
    pub fn new(options: AnalysisOptions) -> Self {
        Self {
            dump_options: DumpOptions::default(),
            analyses: Arc::new(Analyses::standard()),
            options,
        }
    }

    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(config.analysis.clone())
    }
}

/// Run the requested analyses over an open dump.
///
/// Names are checked before anything is run, so an unknown name fails fast.
///
pub fn run_analyses(dump: &Arc<Dump>, context: &AnalysisContext) -> Result<ResultMap> {
    let mut functions = vec![];
    for name in context.options.analysis_types() {
        let function = context
            .analyses
            .get(name)
            .ok_or_else(|| Error::UnknownAnalysis(name.to_string()))?;
        functions.push((name, function));
    }

    let mut out = ResultMap::new();
    for (name, function) in functions {
        tracing::debug!(dump = %dump.label(), analysis = name, "running analysis");
        function(dump, &mut out, &context.options)?;
    }

    Ok(out)
}

/// Open a dump file and analyse it.
pub fn analyze(path: impl AsRef<Path>, context: &AnalysisContext) -> Result<ResultMap> {
    let dump = Dump::open(path, context.dump_options.clone())?;

    run_analyses(&dump, context)
}

/// Open a dump file and analyse it, logging any failure and returning `None` in its place.
pub fn analyze_catch_err(path: impl AsRef<Path>, context: &AnalysisContext) -> Option<ResultMap> {
    let path = path.as_ref();
    match analyze(path, context) {
        Ok(out) => Some(out),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "analysis failed");
            None
        }
    }
}
