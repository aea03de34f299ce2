//! Analysing many dump files in parallel.
//!
use std::{path::PathBuf, sync::Arc};

use futures::{stream, StreamExt};

use crate::analysis::{analyze_catch_err, Aggregate, AnalysisContext};
use crate::config::BatchConfig;
use crate::errors::Result;

/// Analyse every file in `paths` and combine the results.
///
/// Files are analysed on blocking worker threads, at most `config.workers` at a time, and merged
/// one at a time as they complete. A file that fails, for whatever reason, is recorded as skipped.
///
pub async fn run_batch(
    paths: Vec<PathBuf>,
    config: &BatchConfig,
    context: Arc<AnalysisContext>,
) -> Result<Aggregate> {
    run_batch_into(paths, config, context, Aggregate::new()).await
}

/// Like `run_batch`, merging into an existing aggregate, eg one with overrides set.
pub async fn run_batch_into(
    paths: Vec<PathBuf>,
    config: &BatchConfig,
    context: Arc<AnalysisContext>,
    mut aggregate: Aggregate,
) -> Result<Aggregate> {
    config.validate()?;
    let total = paths.len();
    tracing::info!(files = total, workers = config.workers, "starting batch");

    let mut completed = stream::iter(paths.into_iter().enumerate())
        .map(|(index, path)| {
            let context = Arc::clone(&context);
            async move {
                let task = tokio::task::spawn_blocking(move || analyze_catch_err(&path, &context));
                let result = match task.await {
                    Ok(result) => result,
                    Err(err) => {
                        tracing::warn!(file_index = index, error = %err, "analysis task failed");
                        None
                    }
                };

                (index, result)
            }
        })
        .buffer_unordered(config.workers);

    while let Some((index, result)) = completed.next().await {
        aggregate.merge(result, index, total);
    }

    tracing::info!(
        files = total,
        merged = aggregate.merged(),
        skipped = aggregate.skipped().len(),
        "finished batch"
    );

    Ok(aggregate)
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::{arr0, Array1};

    use crate::analysis::{Analyses, EntryKind, ResultMap};
    use crate::config::{AnalysisOptions, DumpOptions};
    use crate::dump::Dump;
    use crate::errors::Error;
    use crate::reader::write_native;
    use crate::testing;

    fn write_dumps(dir: &tempfile::TempDir, count: usize) -> Result<Vec<PathBuf>> {
        let variables = testing::prim_variables([4, 3, 2]);
        let mut paths = vec![];
        for n in 0..count {
            let path = dir.path().join(format!("dump_{n:08}.fd"));
            let mut params = testing::params([4, 3, 2]);
            params.insert("t".into(), (n as f64).into());
            write_native(
                &path,
                &params,
                variables.iter().map(|(name, field)| (name.as_str(), field)),
            )?;
            paths.push(path);
        }

        Ok(paths)
    }

    fn explode(dump: &Arc<Dump>, out: &mut ResultMap, _options: &AnalysisOptions) -> Result<()> {
        if dump.param_f64("t")? == 3.0 {
            panic!("boom");
        }
        out.insert("exploded".to_string(), arr0(0.0).into_dyn());

        Ok(())
    }

    #[tokio::test]
    async fn test_run_batch() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut paths = write_dumps(&dir, 5)?;
        paths[2] = dir.path().join("missing.fd");

        let config = BatchConfig {
            workers: 2,
            analysis: AnalysisOptions::new("profiles").with_setting("profile_vars", "rho"),
        };
        let context = Arc::new(AnalysisContext::from_config(&config));
        let aggregate = run_batch(paths, &config, context).await?;

        assert_eq!(aggregate.skipped(), &[2]);
        assert_eq!(aggregate.merged(), 4);
        assert!(aggregate.failures().is_empty());
        assert_eq!(
            aggregate.get("coord/t"),
            Some(&Array1::from(vec![0.0, 1.0, 0.0, 3.0, 4.0]).into_dyn())
        );
        assert_eq!(aggregate.kind("rt/rho"), Some(EntryKind::Stacked));
        assert_eq!(aggregate.get("rt/rho").unwrap().shape(), &[5, 4]);

        // Every file holds the same data, so the sum is four times any one profile
        let profile = aggregate
            .get("rt/rho")
            .unwrap()
            .index_axis(ndarray::Axis(0), 0)
            .to_owned();
        let total = aggregate.get("rav/rho").unwrap();
        for (sum, one) in total.iter().zip(profile.iter()) {
            assert!((sum - 4.0 * one).abs() < 1e-9);
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_panicking_analysis() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let paths = write_dumps(&dir, 5)?;

        let config = BatchConfig {
            workers: 3,
            analysis: AnalysisOptions::new("explode"),
        };
        let context = Arc::new(AnalysisContext {
            dump_options: DumpOptions::default(),
            analyses: Arc::new(Analyses::standard().with("explode", explode)),
            options: config.analysis.clone(),
        });
        let aggregate = Aggregate::new().with_override("exploded", EntryKind::TimeSeries);
        let aggregate = run_batch_into(paths, &config, context, aggregate).await?;

        assert_eq!(aggregate.skipped(), &[3]);
        assert_eq!(aggregate.kind("exploded"), Some(EntryKind::TimeSeries));
        assert_eq!(aggregate.get("exploded").unwrap().shape(), &[5]);

        Ok(())
    }

    #[tokio::test]
    async fn test_bad_config() {
        let config = BatchConfig {
            workers: 0,
            ..BatchConfig::default()
        };
        let context = Arc::new(AnalysisContext::from_config(&config));
        let result = run_batch(vec![], &config, context).await;
        assert!(matches!(result, Err(Error::BadParam { .. })));
    }
}
