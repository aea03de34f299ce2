//! Configuration for opening dumps and running analyses over them.

use std::{collections::BTreeMap, sync::Arc, thread};

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::field::Params;
use crate::units::Units;
use crate::variables::Registry;

/// Options for opening a dump.
#[derive(Clone, Debug)]
pub struct DumpOptions {
    /// Display tag for the dump. Defaults to the file path.
    pub label: Option<String>,

    /// Keep ghost zones stored in the file as part of the domain.
    pub include_ghost_zones: bool,

    /// Keep computed geometry in the grid's cache.
    pub cache_geometry: bool,

    /// Also keep connection coefficients, which are large.
    pub cache_connection_coefficients: bool,

    /// Units to associate with the dump from the start.
    pub units: Option<Units>,

    /// Build a geometry provider for the dump.
    pub build_geometry: bool,

    /// Use these parameters instead of the ones in the file's header.
    pub params: Option<Arc<Params>>,

    /// Derived field functions available to the dump.
    pub registry: Arc<Registry>,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            label: None,
            include_ghost_zones: false,
            cache_geometry: true,
            cache_connection_coefficients: false,
            units: None,
            build_geometry: true,
            params: None,
            registry: Arc::new(Registry::standard()),
        }
    }
}

/// Options passed to every analysis function.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Comma delimited names of the analyses to run.
    pub analysis_types: String,

    /// Free form settings read by individual analyses.
    pub settings: BTreeMap<String, String>,
}

impl AnalysisOptions {
    pub fn new(analysis_types: &str) -> Self {
        Self {
            analysis_types: analysis_types.to_string(),
            settings: BTreeMap::new(),
        }
    }

    /// Add a setting.
    pub fn with_setting(mut self, name: &str, value: &str) -> Self {
        self.settings.insert(name.to_string(), value.to_string());
        self
    }

    /// The analyses to run, in order. `basic` is always run, last if not requested explicitly.
    pub fn analysis_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self
            .analysis_types
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect();
        if !types.contains(&"basic") {
            types.push("basic");
        }

        types
    }

    pub fn setting(&self, name: &str) -> Option<&str> {
        self.settings.get(name).map(String::as_str)
    }
}

/// Configuration for a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of files processed at once.
    pub workers: usize,

    pub analysis: AnalysisOptions,
}

impl Default for BatchConfig {
    fn default() -> Self {
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            workers,
            analysis: AnalysisOptions::default(),
        }
    }
}

impl BatchConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration using `lookup` to find variable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup("FLUIDUMP_WORKERS") {
            if let Ok(workers) = val.parse() {
                config.workers = workers;
            }
        }

        if let Some(val) = lookup("FLUIDUMP_ANALYSES") {
            config.analysis.analysis_types = val;
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::bad_param("workers", "must be > 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    #[test]
    fn test_analysis_types() {
        let options = AnalysisOptions::new("profiles, fluxes,");
        assert_eq!(options.analysis_types(), vec!["profiles", "fluxes", "basic"]);

        let options = AnalysisOptions::new("basic,profiles");
        assert_eq!(options.analysis_types(), vec!["basic", "profiles"]);

        let options = AnalysisOptions::default();
        assert_eq!(options.analysis_types(), vec!["basic"]);
    }

    #[test]
    fn test_settings() {
        let options = AnalysisOptions::new("profiles").with_setting("profile_vars", "rho,bsq");
        assert_eq!(options.setting("profile_vars"), Some("rho,bsq"));
        assert_eq!(options.setting("flux_index"), None);
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("FLUIDUMP_WORKERS", "3"),
            ("FLUIDUMP_ANALYSES", "profiles"),
        ]
        .into_iter()
        .collect();
        let config = BatchConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.workers, 3);
        assert_eq!(config.analysis.analysis_types(), vec!["profiles", "basic"]);
        assert!(config.validate().is_ok());

        let config = BatchConfig::from_lookup(|name| {
            (name == "FLUIDUMP_WORKERS").then(|| "zero".to_string())
        });
        assert!(config.workers > 0);

        let config = BatchConfig {
            workers: 0,
            ..BatchConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::BadParam { .. })));
    }

    #[test]
    fn test_dump_options_default() {
        let options = DumpOptions::default();
        assert!(options.cache_geometry);
        assert!(!options.cache_connection_coefficients);
        assert!(options.build_geometry);
        assert!(options.registry.contains("bsq"));
    }
}
