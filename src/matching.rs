//! # Score–Performance Pairing
//!
//! Resolves the oracle's match records into [`AlignmentPair`]s that point at
//! concrete notes.
//!
//! A performed record is resolved by onset: the first performed note starting at
//! or after `time - tolerance` is found by binary search, then candidates are
//! scanned while they start within `tolerance` of the target, taking the first
//! unused one with the right pitch. A score id is first translated to
//! (pitch, seconds) through the correspondence table and then resolved the same
//! way against the score notes' rendering times, skipping overlapped duplicates.
//!
//! Any record that cannot be resolved aborts the pair: it means the oracle's
//! output does not describe these inputs.
//!
//! Pairs holding a score note come first, in score order (position, grace order,
//! descending pitch); extra performed notes follow, ordered by (onset,
//! descending pitch).

use crate::document::Performance;
use crate::error::AlignError;
use crate::normalize::ScoreNote;
use crate::oracle::{MatchRecord, OracleOutput};
use std::cmp::Reverse;

/// A score note, a performed note, or both. Indices refer to the normalized
/// note list and to the performance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentPair {
    pub score_index: Option<usize>,
    pub performed_index: Option<usize>,
    pub score_id: Option<String>,
}

impl AlignmentPair {
    pub fn is_matched(&self) -> bool {
        self.score_index.is_some() && self.performed_index.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Alignment {
    /// Score pairs followed by extra pairs
    pub pairs: Vec<AlignmentPair>,
    score_pair_count: usize,
}

impl Alignment {
    /// Pairs with a score note, in score order
    pub fn score_pairs(&self) -> &[AlignmentPair] {
        &self.pairs[..self.score_pair_count]
    }

    /// Performed notes with no notated counterpart
    pub fn extra_pairs(&self) -> &[AlignmentPair] {
        &self.pairs[self.score_pair_count..]
    }

    pub fn matched_count(&self) -> usize {
        self.score_pairs().iter().filter(|p| p.is_matched()).count()
    }

    pub fn omitted_count(&self) -> usize {
        self.score_pair_count - self.matched_count()
    }
}

/// Resolve every match record of `oracle` against the inputs.
pub fn build_pairs(
    notes: &[ScoreNote],
    performance: &Performance,
    oracle: &OracleOutput,
    tolerance: f64,
) -> Result<Alignment, AlignError> {
    let performed = &performance.notes;
    let mut used_performed = vec![false; performed.len()];
    let mut used_score = vec![false; notes.len()];
    let mut score_pairs = Vec::new();
    let mut extra_pairs = Vec::new();

    // Grace shifts leave `notes` out of rendered-time order
    let mut by_time: Vec<usize> = (0..notes.len()).collect();
    by_time.sort_by(|&a, &b| notes[a].time_position.total_cmp(&notes[b].time_position));

    for (record_idx, record) in oracle.matches.iter().enumerate() {
        let (performed_index, score_id) = match record {
            MatchRecord::Missing { score_id } => (None, Some(score_id)),
            MatchRecord::Performed {
                time,
                pitch,
                score_id,
            } => {
                let idx = find_performed(performance, &used_performed, *time, *pitch, tolerance)
                    .ok_or(AlignError::PerformedNoteNotFound {
                        record: record_idx,
                        pitch: *pitch,
                        time: *time,
                        tolerance,
                    })?;
                used_performed[idx] = true;
                (Some(idx), score_id.as_ref())
            }
        };

        let score_index = match score_id {
            Some(id) => {
                let (pitch, time) = *oracle.correspondence.get(id).ok_or_else(|| {
                    AlignError::UnknownScoreId {
                        record: record_idx,
                        score_id: id.clone(),
                    }
                })?;
                let idx = find_score_note(notes, &by_time, &used_score, time, pitch, tolerance).ok_or_else(
                    || AlignError::ScoreNoteNotFound {
                        record: record_idx,
                        score_id: id.clone(),
                        pitch,
                        time,
                        tolerance,
                    },
                )?;
                used_score[idx] = true;
                Some(idx)
            }
            None => None,
        };

        let pair = AlignmentPair {
            score_index,
            performed_index,
            score_id: score_id.cloned(),
        };
        if pair.score_index.is_some() {
            score_pairs.push(pair);
        } else if pair.performed_index.is_some() {
            extra_pairs.push(pair);
        }
    }

    // Normalized notes are already in (position, grace order, -pitch) order
    score_pairs.sort_by_key(|p| p.score_index);
    extra_pairs.sort_by(|a, b| {
        let (a, b) = match (a.performed_index, b.performed_index) {
            (Some(a), Some(b)) => (&performed[a], &performed[b]),
            _ => return std::cmp::Ordering::Equal,
        };
        a.start
            .total_cmp(&b.start)
            .then(Reverse(a.pitch).cmp(&Reverse(b.pitch)))
    });

    let score_pair_count = score_pairs.len();
    let mut pairs = score_pairs;
    pairs.extend(extra_pairs);
    let alignment = Alignment {
        pairs,
        score_pair_count,
    };
    tracing::debug!(
        matched = alignment.matched_count(),
        omitted = alignment.omitted_count(),
        extra = alignment.extra_pairs().len(),
        "Built alignment pairs"
    );
    Ok(alignment)
}

fn find_performed(
    performance: &Performance,
    used: &[bool],
    time: f64,
    pitch: u8,
    tolerance: f64,
) -> Option<usize> {
    let notes = &performance.notes;
    let start = notes.partition_point(|n| n.start < time - tolerance);
    (start..notes.len())
        .take_while(|&i| notes[i].start - time <= tolerance)
        .find(|&i| !used[i] && notes[i].pitch == pitch)
}

/// `by_time` holds note indices ordered by rendered time. Scanning starts at the
/// last note rendered at or before `time - tolerance` so a note sitting right on
/// the window edge is still seen.
fn find_score_note(
    notes: &[ScoreNote],
    by_time: &[usize],
    used: &[bool],
    time: f64,
    pitch: u8,
    tolerance: f64,
) -> Option<usize> {
    let start = by_time
        .partition_point(|&i| notes[i].time_position <= time - tolerance)
        .saturating_sub(1);
    by_time[start..]
        .iter()
        .copied()
        .take_while(|&i| notes[i].time_position - time < tolerance)
        .find(|&i| {
            let note = &notes[i];
            !used[i]
                && !note.is_overlapped
                && note.pitch.midi == pitch
                && (note.time_position - time).abs() < tolerance
        })
}
