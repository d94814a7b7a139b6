//! # Score Note Normalization
//!
//! Converts the notes of a [`ScoreDocument`] into a clean, ordered
//! [`NoteSequence`]. The passes run in a fixed order and each one depends on the
//! previous:
//!
//! 1. **Read and beat-locate** every note of the first part against the governing
//!    time signature. Printed rests are kept on the side.
//! 2. **Reorder grace notes** so a run of graces occupies the beats immediately
//!    before its main note in the same voice.
//! 3. **Propagate the grace flag** to every chord note sharing the main note's
//!    position and voice.
//! 4. **Merge ties** into the note that opened them.
//! 5. **Sort** by (position, grace order, descending pitch) and flag the shorter of
//!    two same-pitch notes at one position as overlapped.
//! 6. **Attach** the dynamic and tempo markings active at each note.
//!
//! No pass fails on a single bad note: inconsistencies are logged and skipped.

use crate::directions::{MarkingCategory, MarkingContext, ResolvedDirections};
use crate::document::{ratio_to_f64, Notations, Pitch, Position, ScoreDocument, TimeSignature};
use num_rational::Ratio;
use std::collections::{HashMap, HashSet};

/// Seconds per quarter note until a measure states otherwise (quarter = 120).
pub const DEFAULT_SECONDS_PER_QUARTER: f64 = 0.5;

/// Beat-relative placement of a note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BeatInfo {
    /// Beats from the start of the measure
    pub location: Position,
    /// Beats from the start of the piece
    pub position: Position,
    pub length_in_beat: Position,
}

/// A normalized score note
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreNote {
    pub pitch: Pitch,
    /// Symbolic onset in quarter notes
    pub position: Position,
    pub duration: Position,
    /// Onset in seconds on the score's own rendering
    pub time_position: f64,
    pub seconds: f64,
    pub voice: u32,
    pub staff: u32,
    pub measure_number: usize,
    /// 0 for ordinary notes, -1 for the grace note closest to its main note
    pub grace_order: i32,
    pub is_grace: bool,
    pub follows_grace: bool,
    /// Size of the grace run this note belongs to
    pub num_grace: usize,
    pub is_tied_start: bool,
    pub is_tied_stop: bool,
    pub is_overlapped: bool,
    pub notations: Notations,
    pub beat: BeatInfo,
    pub time_signature: TimeSignature,
    pub dynamic: MarkingContext,
    pub tempo: MarkingContext,
}

/// A printed rest
#[derive(Debug, Clone, PartialEq)]
pub struct Rest {
    pub position: Position,
    pub duration: Position,
    pub voice: u32,
    pub staff: u32,
    pub measure_number: usize,
    pub beat: BeatInfo,
}

#[derive(Debug, Clone, Default)]
pub struct NoteSequence {
    pub notes: Vec<ScoreNote>,
    pub rests: Vec<Rest>,
}

/// Run every normalization pass over the first part of `doc`.
pub fn normalize(doc: &ScoreDocument, directions: &ResolvedDirections) -> NoteSequence {
    let (mut notes, rests) = read_notes(doc);
    propagate_grace_to_chords(&mut notes);
    let mut notes = merge_ties(notes);
    notes.sort_by(|a, b| {
        a.position
            .cmp(&b.position)
            .then(a.grace_order.cmp(&b.grace_order))
            .then(b.pitch.midi.cmp(&a.pitch.midi))
    });
    mark_duplicates(&mut notes);

    for note in notes.iter_mut() {
        note.dynamic = directions.active_for_note(MarkingCategory::Dynamic, note.position, note.staff);
        note.tempo = directions.active_for_note(MarkingCategory::Tempo, note.position, note.staff);
    }

    tracing::debug!(
        notes = notes.len(),
        rests = rests.len(),
        overlapped = notes.iter().filter(|n| n.is_overlapped).count(),
        "Normalized score notes"
    );
    NoteSequence { notes, rests }
}

fn read_notes(doc: &ScoreDocument) -> (Vec<ScoreNote>, Vec<Rest>) {
    let mut notes: Vec<ScoreNote> = Vec::new();
    let mut rests = Vec::new();
    let Some(part) = doc.parts.first() else {
        return (notes, rests);
    };

    let signatures = doc.time_signatures();
    let mut pending_graces: Vec<usize> = Vec::new();
    let mut measure_beat = Ratio::from_integer(0);
    let mut seconds_per_quarter = DEFAULT_SECONDS_PER_QUARTER;

    for measure in &part.measures {
        if let Some(spq) = measure.seconds_per_quarter {
            seconds_per_quarter = spq;
        }
        let measure_start = doc.ticks(measure.start);

        for note in &measure.notes {
            let position = doc.ticks(note.position);
            let duration = doc.ticks(note.duration);
            let time_signature = signatures.at(position);
            let beat_length = time_signature.beat_length();
            let location = (position - measure_start) / beat_length;

            let Some(pitch) = note.pitch.clone() else {
                if note.print_object {
                    rests.push(Rest {
                        position,
                        duration,
                        voice: note.voice,
                        staff: note.staff,
                        measure_number: measure.number,
                        beat: BeatInfo {
                            location,
                            position: measure_beat + location,
                            length_in_beat: duration / beat_length,
                        },
                    });
                }
                continue;
            };

            // Grace notes carry no notated duration; their length comes from the
            // note type, in quarters.
            let (length_in_beat, seconds) = match note.grace {
                Some(grace) => {
                    let quarters = grace.duration() * 4;
                    (
                        quarters / beat_length,
                        ratio_to_f64(quarters) * seconds_per_quarter,
                    )
                }
                None => (duration / beat_length, note.seconds),
            };

            notes.push(ScoreNote {
                pitch,
                position,
                duration,
                time_position: note.time_position,
                seconds,
                voice: note.voice,
                staff: note.staff,
                measure_number: measure.number,
                grace_order: 0,
                is_grace: note.grace.is_some(),
                follows_grace: false,
                num_grace: 0,
                is_tied_start: note.tie_start,
                is_tied_stop: note.tie_stop,
                is_overlapped: false,
                notations: note.notations,
                beat: BeatInfo {
                    location,
                    position: measure_beat + location,
                    length_in_beat,
                },
                time_signature,
                dynamic: MarkingContext::default(),
                tempo: MarkingContext::default(),
            });

            let idx = notes.len() - 1;
            if note.grace.is_some() {
                pending_graces.push(idx);
            } else if !pending_graces.is_empty() {
                pending_graces = order_grace_notes(&mut notes, idx, pending_graces);
            }
        }

        let measure_beat_length = signatures.at(measure_start).beat_length();
        measure_beat += doc.ticks(measure.duration) / measure_beat_length;
    }

    if !pending_graces.is_empty() {
        tracing::warn!(
            count = pending_graces.len(),
            "Grace notes at the end of the piece have no main note"
        );
    }
    (notes, rests)
}

/// Place the graces of `main`'s voice immediately before it, closest first.
/// Returns the graces of other voices, still in reading order.
fn order_grace_notes(notes: &mut [ScoreNote], main: usize, pending: Vec<usize>) -> Vec<usize> {
    let voice = notes[main].voice;
    let mut remaining = Vec::new();
    let mut added = Vec::new();
    let mut seconds_to_following = 0.0;
    let mut beats_to_following = Ratio::from_integer(0);

    for idx in pending.into_iter().rev() {
        let grace = &mut notes[idx];
        if grace.voice != voice {
            remaining.push(idx);
            continue;
        }
        added.push(idx);
        grace.grace_order = -(added.len() as i32);
        grace.time_position -= seconds_to_following + grace.seconds;
        let shift = beats_to_following + grace.beat.length_in_beat;
        grace.beat.position -= shift;
        grace.beat.location -= shift;
        seconds_to_following += grace.seconds;
        beats_to_following += grace.beat.length_in_beat;
    }

    if !added.is_empty() {
        notes[main].follows_grace = true;
        for idx in &added {
            notes[*idx].num_grace = added.len();
        }
    }
    remaining.reverse();
    remaining
}

fn propagate_grace_to_chords(notes: &mut [ScoreNote]) {
    let onsets: HashSet<(Position, u32)> = notes
        .iter()
        .filter(|n| n.follows_grace)
        .map(|n| (n.position, n.voice))
        .collect();
    for note in notes.iter_mut().filter(|n| !n.is_grace) {
        if onsets.contains(&(note.position, note.voice)) {
            note.follows_grace = true;
        }
    }
}

/// Fold every tie stop into the open tie start of the same pitch, preferring one
/// in the same voice. The open-tie index stays keyed by pitch so a chain
/// `start → stop+start → stop` keeps extending the first note.
fn merge_ties(notes: Vec<ScoreNote>) -> Vec<ScoreNote> {
    let mut kept: Vec<ScoreNote> = Vec::with_capacity(notes.len());
    let mut open: HashMap<u8, Vec<usize>> = HashMap::new();

    for note in notes {
        let midi = note.pitch.midi;
        if note.is_tied_stop {
            let target = open.get(&midi).and_then(|candidates| {
                candidates
                    .iter()
                    .rev()
                    .find(|&&i| kept[i].voice == note.voice)
                    .or_else(|| candidates.last())
                    .copied()
            });
            match target {
                Some(i) => {
                    let start = &mut kept[i];
                    start.duration += note.duration;
                    start.seconds += note.seconds;
                    start.beat.length_in_beat += note.beat.length_in_beat;
                    if !note.is_tied_start {
                        if let Some(candidates) = open.get_mut(&midi) {
                            candidates.retain(|&c| c != i);
                        }
                    }
                }
                None => tracing::warn!(
                    pitch = %note.pitch.name,
                    position = %note.position,
                    measure = note.measure_number,
                    "No open tie found for tied stop note"
                ),
            }
            continue;
        }
        if note.is_tied_start {
            open.entry(midi).or_default().push(kept.len());
        }
        kept.push(note);
    }
    kept
}

/// Notes must already be sorted. Grace notes are exempt since they may repeat
/// a pitch at their main note's position.
fn mark_duplicates(notes: &mut [ScoreNote]) {
    let mut onset: Option<Position> = None;
    let mut first_of_pitch: Vec<usize> = Vec::new();

    for i in 0..notes.len() {
        if notes[i].is_grace {
            continue;
        }
        if onset != Some(notes[i].position) {
            onset = Some(notes[i].position);
            first_of_pitch.clear();
            first_of_pitch.push(i);
            continue;
        }
        let same_pitch = first_of_pitch
            .iter()
            .position(|&j| notes[j].pitch.midi == notes[i].pitch.midi);
        match same_pitch {
            Some(k) if notes[first_of_pitch[k]].duration > notes[i].duration => {
                notes[i].is_overlapped = true
            }
            // Each pitch keeps pointing at its longest note so far
            Some(k) => {
                notes[first_of_pitch[k]].is_overlapped = true;
                first_of_pitch[k] = i;
            }
            None => first_of_pitch.push(i),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directions;

    /// One part, divisions 2 (an eighth is one tick), measures given as YAML.
    fn normalize_yaml(measures: &str) -> NoteSequence {
        let yaml = format!("divisions: 2\nparts:\n  - id: P1\n    measures:\n{}", measures);
        let doc = ScoreDocument::from_yaml_str(&yaml).unwrap();
        let resolved = directions::resolve(&doc);
        normalize(&doc, &resolved)
    }

    fn r(n: i64, d: i64) -> Position {
        Ratio::new(n, d)
    }

    #[test]
    fn test_beat_location_follows_meter_change() {
        let seq = normalize_yaml(
            "      - number: 1
        start: 0
        duration: 8
        notes:
          - { pitch: C4, position: 0, duration: 8 }
      - number: 2
        start: 8
        duration: 6
        time-signature: { numerator: 6, denominator: 8 }
        notes:
          - { pitch: D4, position: 8, duration: 3 }
          - { pitch: E4, position: 11, duration: 3 }",
        );
        assert_eq!(seq.notes.len(), 3);
        assert_eq!(seq.notes[0].beat.length_in_beat, r(4, 1));
        // 6/8: a beat is an eighth, so the measure starts at beat 4
        assert_eq!(seq.notes[1].beat.position, r(4, 1));
        assert_eq!(seq.notes[1].beat.length_in_beat, r(3, 1));
        assert_eq!(seq.notes[2].beat.location, r(3, 1));
        assert_eq!(seq.notes[2].beat.position, r(7, 1));
        assert_eq!(seq.notes[2].time_signature.denominator, 8);
    }

    #[test]
    fn test_grace_notes_fill_beats_before_main_note() {
        let seq = normalize_yaml(
            "      - number: 1
        start: 0
        duration: 8
        notes:
          - { pitch: C4, position: 0, duration: 4, time-position: 0.0, seconds: 1.0 }
          - { pitch: D5, position: 4, grace: { type: eighth }, time-position: 1.0 }
          - { pitch: E5, position: 4, grace: { type: eighth }, time-position: 1.0 }
          - { pitch: F5, position: 4, duration: 4, time-position: 1.0, seconds: 1.0 }",
        );
        let notes = &seq.notes;
        assert_eq!(notes.len(), 4);
        let names: Vec<&str> = notes.iter().map(|n| n.pitch.name.as_str()).collect();
        assert_eq!(names, vec!["C4", "D5", "E5", "F5"]);

        assert_eq!(notes[1].grace_order, -2);
        assert_eq!(notes[2].grace_order, -1);
        assert_eq!(notes[1].num_grace, 2);
        assert!(notes[3].follows_grace);

        let main = notes[3].beat.position;
        assert_eq!(main, r(2, 1));
        assert!(notes[1].beat.position < notes[2].beat.position);
        assert!(notes[2].beat.position < main);
        assert_eq!(
            notes[1].beat.position + notes[1].beat.length_in_beat,
            notes[2].beat.position,
            "graces must not overlap"
        );
        assert_eq!(notes[2].beat.position + notes[2].beat.length_in_beat, main);

        // An eighth at 0.5 s per quarter lasts 0.25 s
        assert!((notes[2].time_position - 0.75).abs() < 1e-9);
        assert!((notes[1].time_position - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_grace_waits_for_main_note_in_its_voice() {
        let seq = normalize_yaml(
            "      - number: 1
        start: 0
        duration: 8
        notes:
          - { pitch: G5, position: 2, grace: { type: 16th }, voice: 2 }
          - { pitch: C4, position: 2, duration: 2, voice: 1 }
          - { pitch: A5, position: 2, duration: 2, voice: 2 }",
        );
        let grace = seq.notes.iter().find(|n| n.is_grace).unwrap();
        assert_eq!(grace.grace_order, -1);
        let c4 = seq.notes.iter().find(|n| n.pitch.name == "C4").unwrap();
        assert!(!c4.follows_grace);
        let a5 = seq.notes.iter().find(|n| n.pitch.name == "A5").unwrap();
        assert!(a5.follows_grace);
    }

    #[test]
    fn test_follows_grace_propagates_to_chord() {
        let seq = normalize_yaml(
            "      - number: 1
        start: 0
        duration: 8
        notes:
          - { pitch: B4, position: 0, grace: { type: eighth } }
          - { pitch: C4, position: 0, duration: 2 }
          - { pitch: E4, position: 0, duration: 2 }
          - { pitch: G4, position: 0, duration: 2, voice: 2 }",
        );
        let flag = |name: &str| seq.notes.iter().find(|n| n.pitch.name == name).unwrap().follows_grace;
        assert!(flag("C4"));
        assert!(flag("E4"));
        assert!(!flag("G4"));
    }

    #[test]
    fn test_tied_notes_are_merged() {
        let seq = normalize_yaml(
            "      - number: 1
        start: 0
        duration: 8
        notes:
          - { pitch: C4, position: 4, duration: 4, seconds: 1.0, tie-start: true }
      - number: 2
        start: 8
        duration: 8
        notes:
          - { pitch: C4, position: 8, duration: 2, seconds: 0.5, tie-stop: true }
          - { pitch: D4, position: 10, duration: 2 }",
        );
        assert_eq!(seq.notes.len(), 2);
        let c4 = &seq.notes[0];
        assert_eq!(c4.duration, r(3, 1));
        assert_eq!(c4.beat.length_in_beat, r(3, 1));
        assert!((c4.seconds - 1.5).abs() < 1e-9);
        assert!(!seq.notes.iter().any(|n| n.pitch.midi == 60 && n.position == r(4, 1)));
    }

    #[test]
    fn test_tie_chain_extends_first_note() {
        let seq = normalize_yaml(
            "      - number: 1
        start: 0
        duration: 8
        notes:
          - { pitch: E4, position: 0, duration: 2, tie-start: true }
          - { pitch: E4, position: 2, duration: 2, tie-start: true, tie-stop: true }
          - { pitch: E4, position: 4, duration: 2, tie-stop: true }",
        );
        assert_eq!(seq.notes.len(), 1);
        assert_eq!(seq.notes[0].duration, r(3, 1));
    }

    #[test]
    fn test_orphan_tie_stop_is_dropped() {
        let seq = normalize_yaml(
            "      - number: 1
        start: 0
        duration: 8
        notes:
          - { pitch: F4, position: 0, duration: 2, tie-stop: true }
          - { pitch: G4, position: 2, duration: 2 }",
        );
        assert_eq!(seq.notes.len(), 1);
        assert_eq!(seq.notes[0].pitch.name, "G4");
    }

    #[test]
    fn test_shorter_duplicate_is_overlapped() {
        let seq = normalize_yaml(
            "      - number: 1
        start: 0
        duration: 8
        notes:
          - { pitch: A4, position: 0, duration: 1, voice: 1 }
          - { pitch: A4, position: 0, duration: 2, voice: 2 }
          - { pitch: C4, position: 0, duration: 2, voice: 2 }",
        );
        let a4: Vec<&ScoreNote> = seq.notes.iter().filter(|n| n.pitch.name == "A4").collect();
        assert_eq!(a4.len(), 2);
        let short = a4.iter().find(|n| n.duration == r(1, 2)).unwrap();
        let long = a4.iter().find(|n| n.duration == r(1, 1)).unwrap();
        assert!(short.is_overlapped);
        assert!(!long.is_overlapped);
        assert_eq!(seq.notes.iter().filter(|n| !n.is_overlapped).count(), 2);
    }

    #[test]
    fn test_three_way_duplicate_keeps_only_longest() {
        let seq = normalize_yaml(
            "      - number: 1
        start: 0
        duration: 8
        notes:
          - { pitch: A4, position: 0, duration: 1, voice: 1 }
          - { pitch: A4, position: 0, duration: 2, voice: 2 }
          - { pitch: A4, position: 0, duration: 4, voice: 3 }",
        );
        let kept: Vec<Position> = seq
            .notes
            .iter()
            .filter(|n| !n.is_overlapped)
            .map(|n| n.duration)
            .collect();
        assert_eq!(kept, vec![r(2, 1)], "only the longest A4 survives");
    }

    #[test]
    fn test_only_printed_rests_are_kept() {
        let seq = normalize_yaml(
            "      - number: 1
        start: 0
        duration: 8
        notes:
          - { position: 0, duration: 4 }
          - { position: 4, duration: 4, print-object: false }",
        );
        assert!(seq.notes.is_empty());
        assert_eq!(seq.rests.len(), 1);
        assert_eq!(seq.rests[0].beat.length_in_beat, r(2, 1));
    }

    #[test]
    fn test_markings_attached_by_position() {
        let seq = normalize_yaml(
            "      - number: 1
        start: 0
        duration: 8
        notes:
          - { pitch: C4, position: 0, duration: 4 }
          - { pitch: D4, position: 4, duration: 4 }
        directions:
          - { position: 0, type: words, content: Allegro }
          - { position: 0, type: dynamic, content: p }
          - { position: 4, type: words, content: cresc. }",
        );
        assert_eq!(seq.notes[0].tempo.absolute.as_deref(), Some("Allegro"));
        assert_eq!(seq.notes[0].dynamic.flatten(), "p");
        assert_eq!(seq.notes[1].dynamic.flatten(), "p cresc.");
    }
}
