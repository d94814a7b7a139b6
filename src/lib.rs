pub mod batch;
pub mod config;
pub mod directions;
pub mod document;
pub mod error;
pub mod features;
pub mod keywords;
pub mod matching;
pub mod normalize;
pub mod oracle;
pub mod tempo;

pub use config::{EmptyRegionPolicy, OracleConfig, PipelineConfig};
pub use directions::{resolve, Marking, MarkingCategory, MarkingContext, ResolvedDirections};
pub use document::{Performance, PerformedNote, Pitch, Position, ScoreDocument};
pub use error::*;
pub use features::{NoteFeature, PieceFeatures};
pub use keywords::{EmbeddingTables, KeywordEmbedding};
pub use matching::{build_pairs, Alignment, AlignmentPair};
pub use normalize::{normalize, NoteSequence, ScoreNote};
pub use oracle::{AlignmentOracle, OracleError, OracleOutput, PrecomputedOracle, ProcessOracle};

use rand::Rng;

/// Align one performance with its score and derive the per-note features.
/// This is the main entry point for the library.
pub fn process_pair<R: Rng + ?Sized>(
    score: &ScoreDocument,
    performance: &Performance,
    oracle_output: &OracleOutput,
    config: &PipelineConfig,
    rng: &mut R,
) -> Result<PieceFeatures, AlignError> {
    process_pair_with(
        score,
        performance,
        oracle_output,
        config,
        &EmbeddingTables::default(),
        rng,
    )
}

/// Same as [`process_pair`] with a custom keyword embedding.
pub fn process_pair_with<R: Rng + ?Sized>(
    score: &ScoreDocument,
    performance: &Performance,
    oracle_output: &OracleOutput,
    config: &PipelineConfig,
    embedding: &dyn KeywordEmbedding,
    rng: &mut R,
) -> Result<PieceFeatures, AlignError> {
    config.validate()?;
    let directions = resolve(score);
    let sequence = normalize(score, &directions);
    let alignment = build_pairs(&sequence.notes, performance, oracle_output, config.match_tolerance)?;
    Ok(features::derive(
        score.title.clone(),
        &sequence,
        performance,
        &alignment,
        &directions,
        config,
        embedding,
        rng,
    ))
}
