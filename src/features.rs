//! Per-note feature records built from aligned pairs.
//!
//! One [`NoteFeature`] is produced per score pair, in score order. Tempo fields
//! come from the onset group the note belongs to; velocity and articulation come
//! from the matched performed note and are absent for omitted notes.

use crate::config::PipelineConfig;
use crate::directions::{MarkingCategory, ResolvedDirections};
use crate::document::{ratio_to_f64, Notations, Performance, Position};
use crate::keywords::KeywordEmbedding;
use crate::matching::Alignment;
use crate::normalize::NoteSequence;
use crate::tempo::{self, TempoRegion};
use rand::Rng;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteFeature {
    pub pitch: u8,
    pub pitch_class: u8,
    pub measure: usize,
    pub position: Position,
    pub beat_position: f64,
    pub beat_location: f64,
    pub length_in_beat: f64,
    /// Beats to the next onset group; serialized as `null` for the last group
    pub ioi: f64,
    pub time_numerator: u32,
    pub time_denominator: u32,
    pub dynamic_text: String,
    pub tempo_text: String,
    pub dynamic: Vec<f64>,
    pub tempo: Vec<f64>,
    pub notations: Notations,
    pub is_grace: bool,
    pub grace_order: i32,
    pub follows_grace: bool,
    pub num_grace: usize,
    pub tempo_region: usize,
    pub base_tempo: Option<f64>,
    pub local_tempo: Option<f64>,
    pub local_tempo_interpolated: bool,
    pub performed_start: Option<f64>,
    pub velocity: Option<u8>,
    pub articulation: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PieceFeatures {
    pub title: Option<String>,
    pub notes: Vec<NoteFeature>,
    pub regions: Vec<TempoRegion>,
    pub matched: usize,
    pub omitted: usize,
    pub extra: usize,
}

/// Derive every per-note feature for one aligned piece.
#[allow(clippy::too_many_arguments)]
pub fn derive<R: Rng + ?Sized>(
    title: Option<String>,
    sequence: &NoteSequence,
    performance: &Performance,
    alignment: &Alignment,
    directions: &ResolvedDirections,
    config: &PipelineConfig,
    embedding: &dyn KeywordEmbedding,
    rng: &mut R,
) -> PieceFeatures {
    let notes = &sequence.notes;
    let score_pairs = alignment.score_pairs();

    let starts = tempo::region_starts(&directions.abs_tempos);
    let mut groups = tempo::group_onsets(score_pairs, notes);
    for group in groups.iter_mut() {
        let first = group
            .members
            .first()
            .and_then(|&m| score_pairs[m].score_index);
        if let Some(note) = first {
            group.region = tempo::region_of(&starts, notes[note].position);
        }
    }

    let regions = tempo::base_tempos(&starts, score_pairs, notes, performance, config.empty_region);
    tempo::estimate_local_tempos(&mut groups, score_pairs, performance, config);
    tempo::interpolate_local_tempos(&mut groups, &regions, config.jitter, rng);

    let mut group_of = vec![0usize; score_pairs.len()];
    for (g, group) in groups.iter().enumerate() {
        for &member in &group.members {
            group_of[member] = g;
        }
    }

    let mut features = Vec::with_capacity(score_pairs.len());
    for (pair_idx, pair) in score_pairs.iter().enumerate() {
        let Some(note) = pair.score_index.map(|i| &notes[i]) else {
            continue;
        };
        let group = &groups[group_of[pair_idx]];
        let played = pair.performed_index.map(|i| &performance.notes[i]);
        let length_in_beat = ratio_to_f64(note.beat.length_in_beat);

        let articulation = match (played, group.local_tempo) {
            (Some(p), Some(tempo)) if tempo > 0.0 && length_in_beat > 0.0 => {
                Some((p.end - p.start) / (60.0 * length_in_beat / tempo))
            }
            _ => None,
        };

        let dynamic_text = note.dynamic.flatten();
        let tempo_text = note.tempo.flatten();
        features.push(NoteFeature {
            pitch: note.pitch.midi,
            pitch_class: note.pitch.class(),
            measure: note.measure_number,
            position: note.position,
            beat_position: ratio_to_f64(note.beat.position),
            beat_location: ratio_to_f64(note.beat.location),
            length_in_beat,
            ioi: group.ioi,
            time_numerator: note.time_signature.numerator,
            time_denominator: note.time_signature.denominator,
            dynamic: embedding.embed(MarkingCategory::Dynamic, &dynamic_text),
            tempo: embedding.embed(MarkingCategory::Tempo, &tempo_text),
            dynamic_text,
            tempo_text,
            notations: note.notations,
            is_grace: note.is_grace,
            grace_order: note.grace_order,
            follows_grace: note.follows_grace,
            num_grace: note.num_grace,
            tempo_region: group.region,
            base_tempo: regions.get(group.region).and_then(|r| r.base_tempo),
            local_tempo: group.local_tempo,
            local_tempo_interpolated: group.interpolated,
            performed_start: played.map(|p| p.start),
            velocity: played.map(|p| p.velocity),
            articulation,
        });
    }

    PieceFeatures {
        title,
        notes: features,
        regions,
        matched: alignment.matched_count(),
        omitted: alignment.omitted_count(),
        extra: alignment.extra_pairs().len(),
    }
}
