//! # Input Documents
//!
//! This module defines the structures handed to the pipeline by its collaborators:
//! the score parser (a [`ScoreDocument`]) and the performance reader (a
//! [`Performance`]). Both are plain serde types so they can be loaded from YAML or
//! JSON text produced by whatever tool parsed the original files.
//!
//! ## Type Hierarchy
//! ```text
//! ScoreDocument
//!   ├── divisions: ticks per quarter note
//!   └── Vec<Part>
//!         └── Vec<Measure>
//!               ├── start / duration (ticks)
//!               ├── time_signature: Option<TimeSignature> (change at this measure)
//!               ├── seconds_per_quarter: Option<f64> (tempo change of the rendering)
//!               ├── Vec<DocNote> (notes and rests, reading order)
//!               └── Vec<Direction> (words, dynamics, wedges, pedals)
//!
//! Performance
//!   └── Vec<PerformedNote> (pitch, start, end, velocity, pedal)
//! ```
//!
//! ## Time Units
//! - Score positions and durations arrive as integer ticks (`divisions` per quarter)
//!   and are converted to exact [`Position`] values measured in quarter notes.
//! - `time_position` / `seconds` are the note's onset and length in the score's own
//!   rendering, the timeline the alignment oracle reports score times in.
//! - Performance times are seconds.
//!
//! ## Grace Notes
//! Grace notes carry no notated duration. Their length comes from the note type
//! table combined with tuplet ratio and augmentation dots:
//! `duration = type/tuplet + Σ_{d=1..dots} (1/2)^d · type/tuplet` (in whole notes).

use crate::error::AlignError;
use num_rational::Ratio;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Exact symbolic time, measured in quarter notes.
pub type Position = Ratio<i64>;

/// Convert an exact ratio to a float for tempo arithmetic.
pub fn ratio_to_f64(value: Ratio<i64>) -> f64 {
    *value.numer() as f64 / *value.denom() as f64
}

/// Time signature (e.g., 4/4, 3/4, 6/8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

impl TimeSignature {
    /// Length of one beat in quarter notes.
    /// In 4/4 a beat is one quarter; in 6/8 a beat is half a quarter.
    pub fn beat_length(&self) -> Position {
        Ratio::new(4, i64::from(self.denominator))
    }
}

/// Notated note type, used for grace note durations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteType {
    Maxima,
    Long,
    Breve,
    Whole,
    Half,
    Quarter,
    Eighth,
    #[serde(rename = "16th")]
    Sixteenth,
    #[serde(rename = "32nd")]
    ThirtySecond,
    #[serde(rename = "64th")]
    SixtyFourth,
    #[serde(rename = "128th")]
    HundredTwentyEighth,
    #[serde(rename = "256th")]
    TwoHundredFiftySixth,
    #[serde(rename = "512th")]
    FiveHundredTwelfth,
    #[serde(rename = "1024th")]
    ThousandTwentyFourth,
}

impl NoteType {
    /// Returns the type as a fraction of a whole note
    pub fn whole_ratio(&self) -> Ratio<i64> {
        match self {
            NoteType::Maxima => Ratio::from_integer(8),
            NoteType::Long => Ratio::from_integer(4),
            NoteType::Breve => Ratio::from_integer(2),
            NoteType::Whole => Ratio::from_integer(1),
            NoteType::Half => Ratio::new(1, 2),
            NoteType::Quarter => Ratio::new(1, 4),
            NoteType::Eighth => Ratio::new(1, 8),
            NoteType::Sixteenth => Ratio::new(1, 16),
            NoteType::ThirtySecond => Ratio::new(1, 32),
            NoteType::SixtyFourth => Ratio::new(1, 64),
            NoteType::HundredTwentyEighth => Ratio::new(1, 128),
            NoteType::TwoHundredFiftySixth => Ratio::new(1, 256),
            NoteType::FiveHundredTwelfth => Ratio::new(1, 512),
            NoteType::ThousandTwentyFourth => Ratio::new(1, 1024),
        }
    }
}

/// Tuplet ratio (e.g., triplet = 3 notes in the time of 2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Tuplet {
    pub actual: u32,
    pub normal: u32,
}

/// Rhythmic information of a grace note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct GraceNote {
    #[serde(rename = "type")]
    pub note_type: NoteType,
    #[serde(default)]
    pub dots: u32,
    #[serde(default)]
    pub tuplet: Option<Tuplet>,
}

impl GraceNote {
    /// Performed length of the grace note as a fraction of a whole note.
    pub fn duration(&self) -> Ratio<i64> {
        let tuplet_ratio = match self.tuplet {
            Some(t) if t.actual > 0 && t.normal > 0 => {
                Ratio::new(i64::from(t.actual), i64::from(t.normal))
            }
            _ => Ratio::from_integer(1),
        };
        let base = self.note_type.whole_ratio() / tuplet_ratio;
        let mut total = base;
        let mut factor = Ratio::new(1, 2);
        for _ in 0..self.dots {
            total += factor * base;
            factor /= 2;
        }
        total
    }
}

/// Spelled pitch with its MIDI number (C4 = 60)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Pitch {
    pub name: String,
    pub midi: u8,
}

impl Pitch {
    /// Parse a spelled pitch word such as `C4`, `F#3` or `Bb2`.
    pub fn parse(word: &str) -> Option<Self> {
        let chars: Vec<char> = word.trim().chars().collect();
        let (step, alter, octave) = match chars.as_slice() {
            [step, octave] => (*step, 0, *octave),
            [step, '#', octave] => (*step, 1, *octave),
            [step, 'b', octave] => (*step, -1, *octave),
            _ => return None,
        };
        let base: i32 = match step.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return None,
        };
        let octave = octave.to_digit(10)? as i32;
        let midi = (octave + 1) * 12 + base + alter;
        let midi = u8::try_from(midi).ok().filter(|m| *m <= 127)?;
        Some(Self {
            name: word.trim().to_string(),
            midi,
        })
    }

    /// Pitch class (0 = C, 11 = B)
    pub fn class(&self) -> u8 {
        self.midi % 12
    }
}

impl TryFrom<String> for Pitch {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Pitch::parse(&value).ok_or_else(|| format!("invalid pitch '{}'", value))
    }
}

/// Notation flags printed on a note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Notations {
    pub accent: bool,
    pub fermata: bool,
    pub staccato: bool,
    pub tenuto: bool,
}

fn default_staff() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// A notated event as produced by the score parser: a note or a rest
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DocNote {
    /// `None` marks a rest
    #[serde(default)]
    pub pitch: Option<Pitch>,
    /// Onset in ticks from the start of the piece
    pub position: i64,
    /// Notated duration in ticks (zero for grace notes)
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub time_position: f64,
    #[serde(default)]
    pub seconds: f64,
    #[serde(default = "default_staff")]
    pub voice: u32,
    #[serde(default = "default_staff")]
    pub staff: u32,
    #[serde(default)]
    pub grace: Option<GraceNote>,
    #[serde(default)]
    pub tie_start: bool,
    #[serde(default)]
    pub tie_stop: bool,
    #[serde(default)]
    pub notations: Notations,
    #[serde(default = "default_true")]
    pub print_object: bool,
}

/// Visual placement of a direction relative to its staff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Above,
    Below,
}

/// Kind of a notated direction, as reported by the score parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectionKind {
    /// Free text (`cresc.`, `allegro`, `a tempo`)
    Words,
    /// Dynamic letters (`p`, `ff`, `sfz`)
    Dynamic,
    Crescendo,
    Diminuendo,
    Pedal,
    /// Content-free half of a spanner, identified only by its group number
    None,
    #[serde(other)]
    Other,
}

impl DirectionKind {
    /// Name used when the kind itself is the keyword (`crescendo`, `dynamic`)
    pub fn keyword(&self) -> &'static str {
        match self {
            DirectionKind::Words => "words",
            DirectionKind::Dynamic => "dynamic",
            DirectionKind::Crescendo => "crescendo",
            DirectionKind::Diminuendo => "diminuendo",
            DirectionKind::Pedal => "pedal",
            DirectionKind::None => "none",
            DirectionKind::Other => "other",
        }
    }

    /// Spanning indicators that come as start/stop halves
    pub fn is_spanner(&self) -> bool {
        matches!(
            self,
            DirectionKind::Crescendo | DirectionKind::Diminuendo | DirectionKind::Pedal
        )
    }
}

/// A direction (dynamic, tempo text, wedge, pedal) attached to a measure
#[derive(Debug, Clone, Deserialize)]
pub struct Direction {
    /// Position in ticks from the start of the piece
    pub position: i64,
    #[serde(default = "default_staff")]
    pub staff: u32,
    #[serde(default)]
    pub placement: Option<Placement>,
    #[serde(rename = "type")]
    pub kind: DirectionKind,
    /// Text, dynamic letters, or `start`/`stop` for spanners
    #[serde(default)]
    pub content: String,
    /// Spanner group id (wedge/slur number)
    #[serde(default)]
    pub number: Option<u32>,
}

/// A single measure of a part
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Measure {
    pub number: usize,
    /// First tick of the measure
    pub start: i64,
    /// Measure length in ticks
    pub duration: i64,
    #[serde(default)]
    pub time_signature: Option<TimeSignature>,
    #[serde(default)]
    pub seconds_per_quarter: Option<f64>,
    #[serde(default)]
    pub notes: Vec<DocNote>,
    #[serde(default)]
    pub directions: Vec<Direction>,
}

/// A part (instrument) of the score
#[derive(Debug, Clone, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub id: String,
    pub measures: Vec<Measure>,
}

/// A complete parsed score
#[derive(Debug, Clone, Deserialize)]
pub struct ScoreDocument {
    #[serde(default)]
    pub title: Option<String>,
    /// Ticks per quarter note
    pub divisions: i64,
    pub parts: Vec<Part>,
}

impl ScoreDocument {
    /// Parse a score document from YAML (or JSON) text and validate it.
    pub fn from_yaml_str(text: &str) -> Result<Self, AlignError> {
        let doc: ScoreDocument = serde_yaml::from_str(text)?;
        doc.validate()?;
        Ok(doc)
    }

    pub fn load(path: &Path) -> Result<Self, AlignError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    fn validate(&self) -> Result<(), AlignError> {
        if self.divisions <= 0 {
            return Err(AlignError::Document(format!(
                "divisions must be positive, got {}",
                self.divisions
            )));
        }
        if self.parts.is_empty() {
            return Err(AlignError::Document("score has no parts".to_string()));
        }
        for part in &self.parts {
            for measure in &part.measures {
                if let Some(sig) = measure.time_signature {
                    if sig.numerator == 0 || sig.denominator == 0 {
                        return Err(AlignError::Document(format!(
                            "measure {} has time signature {}/{}",
                            measure.number, sig.numerator, sig.denominator
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Convert a tick count to an exact position in quarter notes.
    pub fn ticks(&self, ticks: i64) -> Position {
        Ratio::new(ticks, self.divisions)
    }

    /// Time signature changes of the first part, in order.
    /// The first measure falls back to 4/4 when it declares none.
    pub fn time_signatures(&self) -> TimeSignatureMap {
        let mut changes: Vec<(Position, TimeSignature)> = Vec::new();
        if let Some(part) = self.parts.first() {
            for measure in &part.measures {
                match measure.time_signature {
                    Some(sig) => {
                        let start = self.ticks(measure.start);
                        if changes.last().map(|(_, prev)| *prev) != Some(sig) {
                            changes.push((start, sig));
                        }
                    }
                    None if changes.is_empty() => {
                        changes.push((self.ticks(measure.start), TimeSignature::default()));
                    }
                    None => {}
                }
            }
        }
        TimeSignatureMap { changes }
    }
}

/// Governing time signature lookup
#[derive(Debug, Clone, Default)]
pub struct TimeSignatureMap {
    changes: Vec<(Position, TimeSignature)>,
}

impl TimeSignatureMap {
    /// Rightmost signature whose position is at or before `position`.
    /// Positions before the first change use the first signature.
    pub fn at(&self, position: Position) -> TimeSignature {
        let idx = self.changes.partition_point(|(start, _)| *start <= position);
        match idx {
            0 => self.changes.first().map(|(_, sig)| *sig).unwrap_or_default(),
            i => self.changes[i - 1].1,
        }
    }

    pub fn changes(&self) -> &[(Position, TimeSignature)] {
        &self.changes
    }
}

/// A note event captured from the performance
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PerformedNote {
    pub pitch: u8,
    /// Onset in seconds
    pub start: f64,
    /// Release in seconds
    pub end: f64,
    pub velocity: u8,
    #[serde(default)]
    pub pedal: bool,
}

/// A recorded performance, sorted by onset
#[derive(Debug, Clone, Deserialize)]
pub struct Performance {
    pub notes: Vec<PerformedNote>,
}

impl Performance {
    /// Build a performance from notes in any order.
    pub fn new(mut notes: Vec<PerformedNote>) -> Self {
        notes.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.pitch.cmp(&b.pitch)));
        Self { notes }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, AlignError> {
        let raw: Performance = serde_yaml::from_str(text)?;
        for (i, note) in raw.notes.iter().enumerate() {
            if note.velocity > 127 || note.pitch > 127 {
                return Err(AlignError::Document(format!(
                    "performed note {} has pitch {} / velocity {} outside 0-127",
                    i, note.pitch, note.velocity
                )));
            }
            if !(note.end >= note.start) {
                return Err(AlignError::Document(format!(
                    "performed note {} ends ({}) before it starts ({})",
                    i, note.end, note.start
                )));
            }
        }
        Ok(Self::new(raw.notes))
    }

    pub fn load(path: &Path) -> Result<Self, AlignError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pitch_words() {
        assert_eq!(Pitch::parse("C4").map(|p| p.midi), Some(60));
        assert_eq!(Pitch::parse("F#3").map(|p| p.midi), Some(54));
        assert_eq!(Pitch::parse("Bb2").map(|p| p.midi), Some(46));
        assert_eq!(Pitch::parse("A0").map(|p| p.midi), Some(21));
        assert_eq!(Pitch::parse("C4").map(|p| p.class()), Some(0));
        assert!(Pitch::parse("H4").is_none());
        assert!(Pitch::parse("C?4").is_none());
        assert!(Pitch::parse("").is_none());
    }

    #[test]
    fn test_grace_duration_table() {
        let grace = GraceNote {
            note_type: NoteType::Eighth,
            dots: 0,
            tuplet: None,
        };
        assert_eq!(grace.duration(), Ratio::new(1, 8));

        // Dotted sixteenth: 1/16 + 1/32
        let dotted = GraceNote {
            note_type: NoteType::Sixteenth,
            dots: 1,
            tuplet: None,
        };
        assert_eq!(dotted.duration(), Ratio::new(3, 32));

        // Triplet eighth: (1/8) / (3/2)
        let triplet = GraceNote {
            note_type: NoteType::Eighth,
            dots: 0,
            tuplet: Some(Tuplet { actual: 3, normal: 2 }),
        };
        assert_eq!(triplet.duration(), Ratio::new(1, 12));
    }

    #[test]
    fn test_beat_length() {
        let four_four = TimeSignature::default();
        assert_eq!(four_four.beat_length(), Ratio::from_integer(1));
        let six_eight = TimeSignature {
            numerator: 6,
            denominator: 8,
        };
        assert_eq!(six_eight.beat_length(), Ratio::new(1, 2));
    }

    #[test]
    fn test_time_signature_lookup_is_rightmost_at_or_before() {
        let source = r#"
divisions: 4
parts:
  - id: P1
    measures:
      - number: 1
        start: 0
        duration: 16
        time-signature: { numerator: 4, denominator: 4 }
      - number: 2
        start: 16
        duration: 12
        time-signature: { numerator: 3, denominator: 4 }
      - number: 3
        start: 28
        duration: 12
"#;
        let doc = ScoreDocument::from_yaml_str(source).unwrap();
        let map = doc.time_signatures();
        assert_eq!(map.changes().len(), 2);
        assert_eq!(map.at(doc.ticks(0)).numerator, 4);
        assert_eq!(map.at(doc.ticks(15)).numerator, 4);
        assert_eq!(map.at(doc.ticks(16)).numerator, 3);
        assert_eq!(map.at(doc.ticks(30)).numerator, 3);
    }

    #[test]
    fn test_document_rejects_zero_divisions() {
        let result = ScoreDocument::from_yaml_str("divisions: 0\nparts: [{ measures: [] }]\n");
        assert!(matches!(result, Err(AlignError::Document(_))));
    }

    #[test]
    fn test_performance_sorted_by_onset() {
        let source = r#"
notes:
  - { pitch: 64, start: 1.0, end: 1.4, velocity: 70 }
  - { pitch: 60, start: 0.5, end: 0.9, velocity: 60 }
"#;
        let perf = Performance::from_yaml_str(source).unwrap();
        assert_eq!(perf.notes[0].pitch, 60);
        assert_eq!(perf.notes[1].pitch, 64);
    }

    #[test]
    fn test_performance_rejects_reversed_note() {
        let source = "notes:\n  - { pitch: 60, start: 1.0, end: 0.5, velocity: 60 }\n";
        assert!(Performance::from_yaml_str(source).is_err());
    }
}
