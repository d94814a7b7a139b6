//! # Direction Resolution
//!
//! Turns the document-ordered directions of a score into dynamic and tempo
//! [`Marking`]s that notes can query by position.
//!
//! ## Steps
//! 1. Collect directions from every part and stable-sort them by position.
//! 2. Placeholder halves (kind `none`) inherit the wedge kind of the most recent
//!    earlier direction with the same group number.
//! 3. Classify by keyword into absolute/relative dynamics and tempos. A direction
//!    may land in more than one list (`smorzando` is both a dynamic and a tempo
//!    change).
//! 4. Dynamics: point accents (`sf`, `fz`, `sfz`, `sffz`) become zero-width
//!    relative markings, `fp` is split into `f sfz` and a `p` one tick later, and
//!    wedge start/stop halves are merged into one interval.
//! 5. Tempos: `tempo i` is restored to the opening tempo text.
//! 6. Each relative marking is linked to the surrounding absolute markings and
//!    its end is clipped to the next relative or absolute marking.
//!
//! ## Intervals
//! Relative markings cover `[start, end)`; `end == None` means open to the end of
//! the piece. Point accents are active only at their own position.

use crate::document::{Direction, DirectionKind, Placement, Position, ScoreDocument};
use crate::keywords::{
    standardize, KeywordMatcher, ABS_DYNAMICS, ABS_TEMPOS, POINT_ACCENTS, REL_DYNAMICS,
    REL_TEMPOS, TEMPO_PRIMO,
};
use num_rational::Ratio;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkingCategory {
    Dynamic,
    Tempo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkingKind {
    /// Establishes a new baseline (`allegro`, `f`)
    Absolute,
    /// Modifies the baseline over an interval (`cresc.`, `rit.`)
    Relative,
}

/// A resolved dynamic or tempo indication
#[derive(Debug, Clone, PartialEq)]
pub struct Marking {
    pub category: MarkingCategory,
    pub kind: MarkingKind,
    /// Words content, dynamic letters, or the wedge name for spanners
    pub text: String,
    pub source: DirectionKind,
    pub start: Position,
    /// Exclusive end; `None` is open-ended
    pub end: Option<Position>,
    /// Zero-width accent (`sf`, `fz`)
    pub point: bool,
    pub staff: u32,
    pub placement: Option<Placement>,
    pub previous_absolute: Option<String>,
    pub next_absolute: Option<String>,
}

impl Marking {
    pub fn is_active_at(&self, position: Position) -> bool {
        if self.point {
            return position == self.start;
        }
        position >= self.start && self.end.map_or(true, |end| position < end)
    }

    fn is_wedge(&self) -> bool {
        matches!(
            self.source,
            DirectionKind::Crescendo | DirectionKind::Diminuendo
        )
    }
}

/// Markings governing one note in one category
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkingContext {
    pub absolute: Option<String>,
    pub relative: Vec<Marking>,
}

impl MarkingContext {
    /// Absolute text followed by every relative marking's text, space separated.
    pub fn flatten(&self) -> String {
        let mut words: Vec<&str> = Vec::new();
        if let Some(abs) = &self.absolute {
            words.push(abs);
        }
        words.extend(self.relative.iter().map(|m| m.text.as_str()));
        words.join(" ")
    }
}

/// Every dynamic and tempo marking of a score, each list sorted by start
#[derive(Debug, Clone, Default)]
pub struct ResolvedDirections {
    pub abs_dynamics: Vec<Marking>,
    pub rel_dynamics: Vec<Marking>,
    pub abs_tempos: Vec<Marking>,
    pub rel_tempos: Vec<Marking>,
}

impl ResolvedDirections {
    pub fn absolutes(&self, category: MarkingCategory) -> &[Marking] {
        match category {
            MarkingCategory::Dynamic => &self.abs_dynamics,
            MarkingCategory::Tempo => &self.abs_tempos,
        }
    }

    pub fn relatives(&self, category: MarkingCategory) -> &[Marking] {
        match category {
            MarkingCategory::Dynamic => &self.rel_dynamics,
            MarkingCategory::Tempo => &self.rel_tempos,
        }
    }

    /// Markings in effect for a note at `position` on `staff`.
    pub fn active_for_note(
        &self,
        category: MarkingCategory,
        position: Position,
        staff: u32,
    ) -> MarkingContext {
        let absolutes = self.absolutes(category);
        let idx = absolutes.partition_point(|m| m.start <= position);
        let absolute = idx.checked_sub(1).map(|i| absolutes[i].text.clone());

        let mut relative: Vec<Marking> = self
            .relatives(category)
            .iter()
            .filter(|m| m.is_active_at(position))
            .cloned()
            .collect();
        if category == MarkingCategory::Dynamic && relative.len() > 1 {
            divide_wedges_by_staff(&mut relative, staff);
        }

        MarkingContext { absolute, relative }
    }
}

/// On a grand staff the same hairpin is often engraved for both hands. When a
/// note sees both a crescendo and a diminuendo, wedges placed on the far side of
/// the note's staff are dropped.
fn divide_wedges_by_staff(relative: &mut Vec<Marking>, staff: u32) {
    let has_cresc = relative
        .iter()
        .any(|m| m.source == DirectionKind::Crescendo);
    let has_dim = relative
        .iter()
        .any(|m| m.source == DirectionKind::Diminuendo);
    if !(has_cresc && has_dim) {
        return;
    }
    relative.retain(|m| {
        !(m.is_wedge()
            && matches!(
                (m.placement, staff),
                (Some(Placement::Above), 2) | (Some(Placement::Below), 1)
            ))
    });
}

#[derive(Debug, Clone)]
struct RawDirection {
    position: Position,
    staff: u32,
    placement: Option<Placement>,
    kind: DirectionKind,
    content: String,
    number: Option<u32>,
}

impl RawDirection {
    fn from_document(doc: &ScoreDocument, dir: &Direction) -> Self {
        Self {
            position: doc.ticks(dir.position),
            staff: dir.staff,
            placement: dir.placement,
            kind: dir.kind,
            content: dir.content.trim().to_string(),
            number: dir.number,
        }
    }

    fn is_stop(&self) -> bool {
        self.kind.is_spanner() && standardize(&self.content) == "stop"
    }

    /// Text carried by the resulting marking
    fn marking_text(&self) -> String {
        match self.kind {
            DirectionKind::Words | DirectionKind::Dynamic => self.content.clone(),
            other => other.keyword().to_string(),
        }
    }

    fn matches(&self, matcher: &KeywordMatcher) -> bool {
        if matcher.contains(self.kind.keyword()) {
            return true;
        }
        self.kind == DirectionKind::Words && matcher.match_text(&self.content).is_some()
    }
}

/// Collect, order and classify the directions of a score.
pub fn resolve(doc: &ScoreDocument) -> ResolvedDirections {
    let directions = collect_directions(doc);

    let abs_dynamic_words = KeywordMatcher::new(ABS_DYNAMICS);
    let rel_dynamic_words = KeywordMatcher::new(REL_DYNAMICS);
    let abs_tempo_words = KeywordMatcher::new(ABS_TEMPOS);
    let rel_tempo_words = KeywordMatcher::new(REL_TEMPOS);
    let one_tick = Ratio::new(1, doc.divisions);

    // Dynamics
    let mut abs_dynamics = Vec::new();
    let mut rel_dynamic_dirs = Vec::new();
    for dir in &directions {
        let is_abs = dir.matches(&abs_dynamic_words);
        let is_rel = dir.matches(&rel_dynamic_words);
        let text = standardize(&dir.content);
        if (is_abs || is_rel) && POINT_ACCENTS.contains(&text.as_str()) {
            rel_dynamic_dirs.push(dir.clone());
            continue;
        }
        if is_abs {
            if text == "fp" {
                abs_dynamics.push(absolute(MarkingCategory::Dynamic, dir, "f sfz".to_string()));
                let mut soft = absolute(MarkingCategory::Dynamic, dir, "p".to_string());
                soft.start += one_tick;
                abs_dynamics.push(soft);
            } else {
                abs_dynamics.push(absolute(MarkingCategory::Dynamic, dir, dir.marking_text()));
            }
        }
        if is_rel {
            rel_dynamic_dirs.push(dir.clone());
        }
    }
    abs_dynamics.sort_by(|a, b| a.start.cmp(&b.start));
    rel_dynamic_dirs.sort_by(|a, b| a.position.cmp(&b.position));
    let rel_dynamics = link_relatives(
        MarkingCategory::Dynamic,
        merge_spanners(rel_dynamic_dirs),
        &abs_dynamics,
    );

    // Tempos
    let mut abs_tempos: Vec<Marking> = directions
        .iter()
        .filter(|d| d.matches(&abs_tempo_words))
        .map(|d| absolute(MarkingCategory::Tempo, d, d.marking_text()))
        .collect();
    if let Some(opening) = abs_tempos.first().map(|m| m.text.clone()) {
        for tempo in abs_tempos.iter_mut() {
            if standardize(&tempo.text).contains(TEMPO_PRIMO) {
                tempo.text = opening.clone();
            }
        }
    }
    let rel_tempo_dirs: Vec<(RawDirection, Option<Position>)> = directions
        .iter()
        .filter(|d| d.matches(&rel_tempo_words) && !d.is_stop())
        .map(|d| (d.clone(), None))
        .collect();
    let rel_tempos = link_relatives(MarkingCategory::Tempo, rel_tempo_dirs, &abs_tempos);

    tracing::debug!(
        abs_dynamics = abs_dynamics.len(),
        rel_dynamics = rel_dynamics.len(),
        abs_tempos = abs_tempos.len(),
        rel_tempos = rel_tempos.len(),
        "Resolved directions"
    );

    ResolvedDirections {
        abs_dynamics,
        rel_dynamics,
        abs_tempos,
        rel_tempos,
    }
}

/// All directions of all parts in position order, with placeholder halves
/// resolved to the wedge they close.
fn collect_directions(doc: &ScoreDocument) -> Vec<RawDirection> {
    let mut directions: Vec<RawDirection> = doc
        .parts
        .iter()
        .flat_map(|part| part.measures.iter())
        .flat_map(|measure| measure.directions.iter())
        .map(|dir| RawDirection::from_document(doc, dir))
        .collect();
    directions.sort_by(|a, b| a.position.cmp(&b.position));

    let mut last_kind_by_number: HashMap<u32, DirectionKind> = HashMap::new();
    for dir in directions.iter_mut() {
        match (dir.kind, dir.number) {
            (DirectionKind::None, Some(number)) => match last_kind_by_number.get(&number) {
                Some(kind @ (DirectionKind::Crescendo | DirectionKind::Diminuendo)) => {
                    dir.kind = *kind;
                    if dir.content.is_empty() {
                        dir.content = "stop".to_string();
                    }
                }
                _ => {
                    tracing::warn!(number, position = %dir.position, "Placeholder direction has no wedge to close");
                }
            },
            (DirectionKind::None, None) => {
                tracing::warn!(position = %dir.position, "Direction with empty type ignored");
            }
            (kind, Some(number)) => {
                last_kind_by_number.insert(number, kind);
            }
            _ => {}
        }
    }
    directions
}

fn absolute(category: MarkingCategory, dir: &RawDirection, text: String) -> Marking {
    Marking {
        category,
        kind: MarkingKind::Absolute,
        text,
        source: dir.kind,
        start: dir.position,
        end: None,
        point: false,
        staff: dir.staff,
        placement: dir.placement,
        previous_absolute: None,
        next_absolute: None,
    }
}

/// Close each spanner start with the next matching stop (same kind and staff)
/// and drop the stop halves. Words and point accents pass through unchanged.
fn merge_spanners(directions: Vec<RawDirection>) -> Vec<(RawDirection, Option<Position>)> {
    let mut merged: Vec<(RawDirection, Option<Position>)> = Vec::new();
    for dir in directions {
        if dir.is_stop() {
            let open = merged.iter_mut().rev().find(|(start, end)| {
                end.is_none() && start.kind == dir.kind && start.staff == dir.staff
            });
            match open {
                Some((_, end)) => *end = Some(dir.position),
                None => tracing::warn!(
                    kind = dir.kind.keyword(),
                    staff = dir.staff,
                    position = %dir.position,
                    "Spanner stop without an open start"
                ),
            }
            continue;
        }
        match dir.kind {
            DirectionKind::Words
            | DirectionKind::Dynamic
            | DirectionKind::Crescendo
            | DirectionKind::Diminuendo => merged.push((dir, None)),
            _ => {}
        }
    }
    merged
}

/// Link relative markings to their surrounding absolutes and clip their ends.
fn link_relatives(
    category: MarkingCategory,
    relatives: Vec<(RawDirection, Option<Position>)>,
    absolutes: &[Marking],
) -> Vec<Marking> {
    let points: Vec<bool> = relatives
        .iter()
        .map(|(dir, _)| POINT_ACCENTS.contains(&standardize(&dir.content).as_str()))
        .collect();

    let mut markings = Vec::with_capacity(relatives.len());
    for (i, (dir, explicit_end)) in relatives.iter().enumerate() {
        let start = dir.position;
        let idx = absolutes.partition_point(|m| m.start <= start);
        let previous_absolute = match idx {
            0 => {
                tracing::warn!(
                    category = ?category,
                    text = %dir.content,
                    position = %start,
                    "No absolute marking before relative marking"
                );
                None
            }
            n => Some(absolutes[n - 1].text.clone()),
        };
        let next_abs = absolutes.get(idx);

        let point = points[i];
        let end = if point {
            Some(start)
        } else {
            let next_relative = relatives
                .iter()
                .zip(&points)
                .skip(i + 1)
                .find(|((other, _), is_point)| other.position > start && !**is_point)
                .map(|((other, _), _)| other.position);
            [*explicit_end, next_relative, next_abs.map(|m| m.start)]
                .into_iter()
                .flatten()
                .min()
        };

        markings.push(Marking {
            category,
            kind: MarkingKind::Relative,
            text: dir.marking_text(),
            source: dir.kind,
            start,
            end,
            point,
            staff: dir.staff,
            placement: dir.placement,
            previous_absolute,
            next_absolute: next_abs.map(|m| m.text.clone()),
        });
    }
    markings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score_with_directions(directions: &str) -> ScoreDocument {
        let yaml = format!(
            "divisions: 2\nparts:\n  - id: P1\n    measures:\n      - number: 1\n        start: 0\n        duration: 32\n        directions:\n{}",
            directions
        );
        ScoreDocument::from_yaml_str(&yaml).unwrap()
    }

    fn q(n: i64) -> Position {
        Ratio::from_integer(n)
    }

    #[test]
    fn test_relative_tempo_linked_to_absolutes() {
        let doc = score_with_directions(
            "          - { position: 0, type: words, content: Allegro }
          - { position: 8, type: words, content: rit. }
          - { position: 16, type: words, content: Adagio }",
        );
        let resolved = resolve(&doc);
        assert_eq!(resolved.abs_tempos.len(), 2);
        assert_eq!(resolved.rel_tempos.len(), 1);

        let rit = &resolved.rel_tempos[0];
        assert_eq!(rit.start, q(4));
        assert_eq!(rit.end, Some(q(8)), "rit. must stop at the next absolute tempo");
        assert_eq!(rit.previous_absolute.as_deref(), Some("Allegro"));
        assert_eq!(rit.next_absolute.as_deref(), Some("Adagio"));
    }

    #[test]
    fn test_relative_without_preceding_absolute_keeps_null_link() {
        let doc = score_with_directions("          - { position: 4, type: words, content: accel. }");
        let resolved = resolve(&doc);
        let accel = &resolved.rel_tempos[0];
        assert_eq!(accel.previous_absolute, None);
        assert_eq!(accel.end, None);
        assert!(accel.is_active_at(q(100)));
    }

    #[test]
    fn test_wedge_placeholder_closes_crescendo() {
        let doc = score_with_directions(
            "          - { position: 0, type: dynamic, content: p }
          - { position: 2, type: crescendo, content: start, number: 1 }
          - { position: 6, type: none, number: 1 }",
        );
        let resolved = resolve(&doc);
        assert_eq!(resolved.rel_dynamics.len(), 1);
        let cresc = &resolved.rel_dynamics[0];
        assert_eq!(cresc.text, "crescendo");
        assert_eq!(cresc.start, q(1));
        assert_eq!(cresc.end, Some(q(3)));
        assert_eq!(cresc.previous_absolute.as_deref(), Some("p"));
        assert!(cresc.is_active_at(q(2)));
        assert!(!cresc.is_active_at(q(3)));
    }

    #[test]
    fn test_fp_splits_into_loud_then_soft() {
        let doc = score_with_directions("          - { position: 4, type: dynamic, content: fp }");
        let resolved = resolve(&doc);
        let texts: Vec<&str> = resolved.abs_dynamics.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["f sfz", "p"]);
        assert_eq!(resolved.abs_dynamics[0].start, q(2));
        assert_eq!(resolved.abs_dynamics[1].start, q(2) + Ratio::new(1, 2));

        let at = resolved.active_for_note(MarkingCategory::Dynamic, q(2), 1);
        assert_eq!(at.absolute.as_deref(), Some("f sfz"));
        let after = resolved.active_for_note(MarkingCategory::Dynamic, q(3), 1);
        assert_eq!(after.absolute.as_deref(), Some("p"));
    }

    #[test]
    fn test_point_accent_is_active_only_at_its_position() {
        let doc = score_with_directions(
            "          - { position: 0, type: dynamic, content: mf }
          - { position: 4, type: dynamic, content: sfz }",
        );
        let resolved = resolve(&doc);
        assert_eq!(resolved.abs_dynamics.len(), 1);
        assert_eq!(resolved.rel_dynamics.len(), 1);
        let sfz = &resolved.rel_dynamics[0];
        assert!(sfz.point);
        assert!(sfz.is_active_at(q(2)));
        assert!(!sfz.is_active_at(q(2) + Ratio::new(1, 2)));

        let ctx = resolved.active_for_note(MarkingCategory::Dynamic, q(2), 1);
        assert_eq!(ctx.flatten(), "mf sfz");
    }

    #[test]
    fn test_tempo_primo_restores_opening_text() {
        let doc = score_with_directions(
            "          - { position: 0, type: words, content: Andante }
          - { position: 8, type: words, content: Presto }
          - { position: 16, type: words, content: Tempo I }",
        );
        let resolved = resolve(&doc);
        assert_eq!(resolved.abs_tempos[2].text, "Andante");
    }

    #[test]
    fn test_relative_marking_clipped_by_next_relative() {
        let doc = score_with_directions(
            "          - { position: 0, type: words, content: Allegro }
          - { position: 4, type: words, content: rit. }
          - { position: 8, type: words, content: a tempo }",
        );
        let resolved = resolve(&doc);
        assert_eq!(resolved.rel_tempos[0].end, Some(q(4)));
        assert_eq!(resolved.rel_tempos[1].end, None);
    }

    #[test]
    fn test_grand_staff_wedges_divided_by_placement() {
        let doc = score_with_directions(
            "          - { position: 0, type: crescendo, content: start, number: 1, staff: 1, placement: above }
          - { position: 0, type: diminuendo, content: start, number: 2, staff: 2, placement: below }
          - { position: 8, type: crescendo, content: stop, number: 1, staff: 1 }
          - { position: 8, type: diminuendo, content: stop, number: 2, staff: 2 }",
        );
        let resolved = resolve(&doc);
        assert_eq!(resolved.rel_dynamics.len(), 2);

        let upper = resolved.active_for_note(MarkingCategory::Dynamic, q(1), 1);
        assert_eq!(upper.relative.len(), 1);
        assert_eq!(upper.relative[0].source, DirectionKind::Crescendo);

        let lower = resolved.active_for_note(MarkingCategory::Dynamic, q(1), 2);
        assert_eq!(lower.relative.len(), 1);
        assert_eq!(lower.relative[0].source, DirectionKind::Diminuendo);
    }

    #[test]
    fn test_pedal_is_not_a_dynamic() {
        let doc = score_with_directions(
            "          - { position: 0, type: dynamic, content: p }
          - { position: 0, type: crescendo, content: start, number: 1 }
          - { position: 2, type: pedal, content: start }
          - { position: 4, type: pedal, content: stop }
          - { position: 8, type: crescendo, content: stop, number: 1 }",
        );
        let resolved = resolve(&doc);
        assert_eq!(resolved.rel_dynamics.len(), 1);
        let cresc = &resolved.rel_dynamics[0];
        assert_eq!(cresc.source, DirectionKind::Crescendo);
        assert_eq!(cresc.end, Some(q(4)), "pedal stop must not close the wedge");
        assert!(resolved.abs_dynamics.iter().all(|m| m.source != DirectionKind::Pedal));
    }
}
