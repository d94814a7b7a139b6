//! # Batch Processing
//!
//! Runs many (score, performance) pairs in parallel with rayon. Pairs share no
//! state: each job loads its own inputs, runs its own oracle and owns its own
//! random generator (seeded as `jitter-seed + job index` when a seed is set).
//!
//! A failing job never stops the batch. Its error is recorded in the
//! [`BatchSummary`] and the remaining jobs carry on.
//!
//! ## Manifest
//! ```yaml
//! jobs:
//!   - name: etude-1
//!     score: etude1/score.yaml
//!     performance: etude1/take1.yaml
//!     corresp: etude1/take1_corresp.txt
//!     match: etude1/take1_match.txt
//!     output: out/etude1_take1.json
//!   - score: etude2/score.yaml
//!     performance: etude2/take1.yaml
//!     reference-midi: etude2/score.mid
//!     performance-midi: etude2/take1.mid
//! ```
//! Relative paths are resolved against the manifest's directory.

use crate::config::PipelineConfig;
use crate::document::{Performance, ScoreDocument};
use crate::error::AlignError;
use crate::features::PieceFeatures;
use crate::keywords::EmbeddingTables;
use crate::oracle::{AlignmentOracle, PrecomputedOracle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BatchJob {
    #[serde(default)]
    pub name: Option<String>,
    pub score: PathBuf,
    pub performance: PathBuf,
    #[serde(default)]
    pub corresp: Option<PathBuf>,
    #[serde(default, rename = "match")]
    pub matches: Option<PathBuf>,
    #[serde(default)]
    pub reference_midi: Option<PathBuf>,
    #[serde(default)]
    pub performance_midi: Option<PathBuf>,
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl BatchJob {
    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.performance.display().to_string())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.score);
        join(&mut self.performance);
        for path in [
            &mut self.corresp,
            &mut self.matches,
            &mut self.reference_midi,
            &mut self.performance_midi,
            &mut self.output,
        ]
        .into_iter()
        .flatten()
        {
            join(path);
        }
    }

    /// Read precomputed artifacts when given, otherwise run the oracle on the
    /// two MIDI renderings.
    pub fn oracle(
        &self,
        config: &PipelineConfig,
    ) -> Result<(Box<dyn AlignmentOracle>, PathBuf, PathBuf), AlignError> {
        match (
            &self.corresp,
            &self.matches,
            &self.reference_midi,
            &self.performance_midi,
        ) {
            (Some(corresp), Some(matches), _, _) => Ok((
                Box::new(PrecomputedOracle::new(corresp, matches)),
                self.score.clone(),
                self.performance.clone(),
            )),
            (_, _, Some(reference), Some(performance)) => Ok((
                Box::new(config.oracle.process_oracle()),
                reference.clone(),
                performance.clone(),
            )),
            _ => Err(AlignError::Config(format!(
                "job '{}' needs corresp and match files or reference-midi and performance-midi",
                self.label()
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchManifest {
    pub jobs: Vec<BatchJob>,
}

impl BatchManifest {
    pub fn load(path: &Path) -> Result<Self, AlignError> {
        let text = std::fs::read_to_string(path)?;
        let mut manifest: BatchManifest = serde_yaml::from_str(&text)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for job in manifest.jobs.iter_mut() {
            job.resolve_paths(base);
        }
        Ok(manifest)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSuccess {
    pub name: String,
    pub notes: usize,
    pub matched: usize,
    pub omitted: usize,
    pub extra: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobFailure {
    pub name: String,
    pub reason: String,
    /// Input or oracle problem rather than a broken alignment
    pub recoverable: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub succeeded: Vec<JobSuccess>,
    pub failed: Vec<JobFailure>,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn all_failed(&self) -> bool {
        self.succeeded.is_empty() && !self.failed.is_empty()
    }
}

/// Load, align and featurize one job, writing its features when an output is set.
pub fn run_job(
    job: &BatchJob,
    index: usize,
    config: &PipelineConfig,
) -> Result<PieceFeatures, AlignError> {
    let score = ScoreDocument::load(&job.score)?;
    let performance = Performance::load(&job.performance)?;
    let (oracle, reference, performed) = job.oracle(config)?;
    let oracle_output = oracle.align(&reference, &performed)?;

    let mut rng = config.rng(index as u64);
    let features = crate::process_pair_with(
        &score,
        &performance,
        &oracle_output,
        config,
        &EmbeddingTables::default(),
        &mut rng,
    )?;

    if let Some(output) = &job.output {
        write_features(output, &features)?;
    }
    Ok(features)
}

/// Run every job in parallel and collect the outcome of each.
pub fn run_batch(jobs: &[BatchJob], config: &PipelineConfig) -> BatchSummary {
    let outcomes: Vec<(String, Result<PieceFeatures, AlignError>)> = jobs
        .par_iter()
        .enumerate()
        .map(|(index, job)| (job.label(), run_job(job, index, config)))
        .collect();

    let mut summary = BatchSummary::default();
    for (name, outcome) in outcomes {
        match outcome {
            Ok(features) => {
                tracing::info!(job = %name, notes = features.notes.len(), "Job succeeded");
                summary.succeeded.push(JobSuccess {
                    name,
                    notes: features.notes.len(),
                    matched: features.matched,
                    omitted: features.omitted,
                    extra: features.extra,
                });
            }
            Err(e) => {
                tracing::warn!(job = %name, error = %e, "Job failed, skipping");
                summary.failed.push(JobFailure {
                    name,
                    reason: e.to_string(),
                    recoverable: e.is_recoverable(),
                });
            }
        }
    }
    tracing::info!(
        succeeded = summary.succeeded.len(),
        failed = summary.failed.len(),
        "Batch finished"
    );
    summary
}

pub fn write_features(path: &Path, features: &PieceFeatures) -> Result<(), AlignError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), features)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_paths_resolved_against_manifest_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let manifest_path = dir.path().join("jobs.yaml");
        std::fs::write(
            &manifest_path,
            "jobs:\n  - name: a\n    score: s.yaml\n    performance: /abs/p.yaml\n    corresp: c.txt\n    match: m.txt\n",
        )
        .unwrap();
        let manifest = BatchManifest::load(&manifest_path).unwrap();
        let job = &manifest.jobs[0];
        assert_eq!(job.score, dir.path().join("s.yaml"));
        assert_eq!(job.performance, PathBuf::from("/abs/p.yaml"));
        assert_eq!(job.matches, Some(dir.path().join("m.txt")));
    }

    #[test]
    fn test_job_without_oracle_source_is_config_error() {
        let job = BatchJob {
            name: None,
            score: "s.yaml".into(),
            performance: "p.yaml".into(),
            corresp: Some("c.txt".into()),
            matches: None,
            reference_midi: None,
            performance_midi: None,
            output: None,
        };
        let err = job.oracle(&PipelineConfig::default()).err().unwrap();
        assert!(matches!(err, AlignError::Config(_)));
        assert_eq!(job.label(), "p.yaml");
    }

    #[test]
    fn test_failing_jobs_do_not_stop_batch() {
        let jobs: Vec<BatchJob> = (0..3)
            .map(|i| BatchJob {
                name: Some(format!("missing-{}", i)),
                score: format!("/nonexistent/{}.yaml", i).into(),
                performance: "/nonexistent/p.yaml".into(),
                corresp: None,
                matches: None,
                reference_midi: None,
                performance_midi: None,
                output: None,
            })
            .collect();
        let summary = run_batch(&jobs, &PipelineConfig::default());
        assert_eq!(summary.total(), 3);
        assert!(summary.all_failed());
        assert!(summary.failed.iter().all(|f| f.recoverable));
    }
}
