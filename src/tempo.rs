//! # Tempo Estimation
//!
//! Onset grouping, base tempo per absolute-tempo region, robust local tempo
//! between adjacent onset groups, and stochastic interpolation of the gaps.
//!
//! ## Regions
//! Absolute tempo markings split the piece into regions; region 0 always starts at
//! position 0. A region's base tempo is `60 × Δbeat / Δseconds` between its first
//! and last matched notes.
//!
//! ## Local Tempo
//! Between two adjacent groups every pair of matched onsets gives an estimate.
//! Estimates outside `[floor, ceiling]` are dropped, then those outside
//! `[(1 - band) × median, (1 + band) × median]`, and the rest are averaged.
//!
//! ## Interpolation
//! Groups without an estimate are filled inside their region, and a grace group
//! belongs to the region of its main note. Leading and trailing runs copy the
//! nearest estimate, interior runs interpolate linearly by beat position. Every filled value is scaled by an independent uniform draw in
//! `[1 - jitter, 1 + jitter]`, so filled tempos differ run to run unless the
//! generator is seeded.

use crate::config::{EmptyRegionPolicy, PipelineConfig};
use crate::directions::Marking;
use crate::document::{ratio_to_f64, Performance, Position};
use crate::matching::AlignmentPair;
use crate::normalize::ScoreNote;
use num_rational::Ratio;
use rand::Rng;
use serde::Serialize;

/// Notes sounding at one beat position
#[derive(Debug, Clone, PartialEq)]
pub struct NoteGroup {
    pub beat_position: Position,
    /// Indices into the score pairs
    pub members: Vec<usize>,
    /// Beats to the next group, infinite for the last
    pub ioi: f64,
    pub region: usize,
    pub local_tempo: Option<f64>,
    /// Value a filled tempo was jittered from
    pub tempo_baseline: Option<f64>,
    pub interpolated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TempoRegion {
    pub index: usize,
    pub start: Position,
    /// Absolute tempo text opening the region
    pub marking: Option<String>,
    pub matched_notes: usize,
    pub base_tempo: Option<f64>,
    /// Base tempo copied from a neighbouring region
    pub inherited: bool,
}

/// Group score pairs by identical beat position and compute each group's IOI.
pub fn group_onsets(score_pairs: &[AlignmentPair], notes: &[ScoreNote]) -> Vec<NoteGroup> {
    let mut order: Vec<(usize, Position)> = score_pairs
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.score_index.map(|s| (i, notes[s].beat.position)))
        .collect();
    order.sort_by(|a, b| a.1.cmp(&b.1));

    let mut groups: Vec<NoteGroup> = Vec::new();
    for (pair_idx, beat) in order {
        match groups.last_mut() {
            Some(group) if group.beat_position == beat => group.members.push(pair_idx),
            _ => groups.push(NoteGroup {
                beat_position: beat,
                members: vec![pair_idx],
                ioi: f64::INFINITY,
                region: 0,
                local_tempo: None,
                tempo_baseline: None,
                interpolated: false,
            }),
        }
    }

    for i in 0..groups.len().saturating_sub(1) {
        groups[i].ioi = ratio_to_f64(groups[i + 1].beat_position - groups[i].beat_position);
    }
    groups
}

/// Region boundaries from the absolute tempo markings
pub fn region_starts(abs_tempos: &[Marking]) -> Vec<(Position, Option<String>)> {
    let zero = Ratio::from_integer(0);
    let mut starts: Vec<(Position, Option<String>)> = Vec::new();
    if abs_tempos.first().map_or(true, |m| m.start > zero) {
        starts.push((zero, None));
    }
    for marking in abs_tempos {
        match starts.last_mut() {
            // Two markings at one position: the later one names the region
            Some(last) if last.0 == marking.start => last.1 = Some(marking.text.clone()),
            _ => starts.push((marking.start, Some(marking.text.clone()))),
        }
    }
    starts
}

pub fn region_of(starts: &[(Position, Option<String>)], position: Position) -> usize {
    starts
        .partition_point(|(start, _)| *start <= position)
        .saturating_sub(1)
}

/// Base tempo of every region, with empty regions handled per `policy`.
pub fn base_tempos(
    starts: &[(Position, Option<String>)],
    score_pairs: &[AlignmentPair],
    notes: &[ScoreNote],
    performance: &Performance,
    policy: EmptyRegionPolicy,
) -> Vec<TempoRegion> {
    let mut regions: Vec<TempoRegion> = starts
        .iter()
        .enumerate()
        .map(|(index, (start, marking))| {
            let matched: Vec<(Position, f64)> = score_pairs
                .iter()
                .filter_map(|p| {
                    let note = &notes[p.score_index?];
                    let played = &performance.notes[p.performed_index?];
                    (region_of(starts, note.position) == index)
                        .then_some((note.beat.position, played.start))
                })
                .collect();

            let base_tempo = match (matched.first(), matched.last()) {
                (Some(first), Some(last)) if matched.len() >= 2 => {
                    let beats = ratio_to_f64(last.0 - first.0);
                    let seconds = last.1 - first.1;
                    (beats > 0.0 && seconds > 0.0).then(|| 60.0 * beats / seconds)
                }
                _ => None,
            };
            if base_tempo.is_none() {
                tracing::warn!(
                    region = index,
                    start = %start,
                    matched = matched.len(),
                    "Tempo region has no usable span of matched notes"
                );
            }

            TempoRegion {
                index,
                start: *start,
                marking: marking.clone(),
                matched_notes: matched.len(),
                base_tempo,
                inherited: false,
            }
        })
        .collect();

    if policy == EmptyRegionPolicy::Propagate {
        let mut previous: Option<f64> = None;
        for region in regions.iter_mut() {
            match region.base_tempo {
                Some(tempo) => previous = Some(tempo),
                None if previous.is_some() => {
                    region.base_tempo = previous;
                    region.inherited = true;
                }
                None => {}
            }
        }
        let mut next: Option<f64> = None;
        for region in regions.iter_mut().rev() {
            match region.base_tempo {
                Some(tempo) => next = Some(tempo),
                None => {
                    region.base_tempo = next;
                    region.inherited = next.is_some();
                }
            }
        }
    }
    regions
}

/// Outlier-robust average of tempo estimates.
pub fn robust_tempo(estimates: &[f64], floor: f64, ceiling: f64, band: f64) -> Option<f64> {
    let mut kept: Vec<f64> = estimates
        .iter()
        .copied()
        .filter(|t| t.is_finite() && *t >= floor && *t <= ceiling)
        .collect();
    if kept.is_empty() {
        return None;
    }
    kept.sort_by(f64::total_cmp);
    let mid = kept.len() / 2;
    let median = if kept.len() % 2 == 1 {
        kept[mid]
    } else {
        (kept[mid - 1] + kept[mid]) / 2.0
    };

    let low = (1.0 - band) * median;
    let high = (1.0 + band) * median;
    let near: Vec<f64> = kept.into_iter().filter(|t| *t >= low && *t <= high).collect();
    if near.is_empty() {
        return Some(median);
    }
    Some(near.iter().sum::<f64>() / near.len() as f64)
}

/// Estimate the local tempo of each group from the next one.
pub fn estimate_local_tempos(
    groups: &mut [NoteGroup],
    score_pairs: &[AlignmentPair],
    performance: &Performance,
    config: &PipelineConfig,
) {
    let onsets = |group: &NoteGroup| -> Vec<f64> {
        group
            .members
            .iter()
            .filter_map(|&m| score_pairs[m].performed_index)
            .map(|p| performance.notes[p].start)
            .collect()
    };

    for i in 0..groups.len().saturating_sub(1) {
        let beats = groups[i].ioi;
        let current = onsets(&groups[i]);
        let next = onsets(&groups[i + 1]);
        let estimates: Vec<f64> = current
            .iter()
            .flat_map(|t0| next.iter().map(move |t1| t1 - t0))
            .filter(|dt| *dt > 0.0)
            .map(|dt| 60.0 * beats / dt)
            .collect();
        groups[i].local_tempo = robust_tempo(
            &estimates,
            config.tempo_floor,
            config.tempo_ceiling,
            config.median_band,
        );
    }
}

/// Fill missing local tempos region by region. A grace group belongs to its
/// main note's region even when it sounds before the previous region's last
/// group, so a region's groups need not be contiguous.
pub fn interpolate_local_tempos<R: Rng + ?Sized>(
    groups: &mut [NoteGroup],
    regions: &[TempoRegion],
    jitter: f64,
    rng: &mut R,
) {
    let mut order: Vec<usize> = Vec::new();
    for group in groups.iter() {
        if !order.contains(&group.region) {
            order.push(group.region);
        }
    }
    for region in order {
        let members: Vec<usize> = (0..groups.len())
            .filter(|&i| groups[i].region == region)
            .collect();
        let base = regions.get(region).and_then(|r| r.base_tempo);
        fill_region(groups, &members, base, jitter, rng);
    }
}

/// `members` indexes one region's groups in beat order.
fn fill_region<R: Rng + ?Sized>(
    groups: &mut [NoteGroup],
    members: &[usize],
    base_tempo: Option<f64>,
    jitter: f64,
    rng: &mut R,
) {
    let defined: Vec<usize> = members
        .iter()
        .copied()
        .filter(|&i| groups[i].local_tempo.is_some())
        .collect();

    for &i in members {
        if groups[i].local_tempo.is_some() {
            continue;
        }
        let after = defined.partition_point(|&d| d < i);
        let before = after.checked_sub(1).map(|k| defined[k]);
        let after = defined.get(after).copied();

        let baseline = match (before, after) {
            (Some(b), Some(a)) => {
                let (b0, v0) = (ratio_to_f64(groups[b].beat_position), groups[b].local_tempo);
                let (b1, v1) = (ratio_to_f64(groups[a].beat_position), groups[a].local_tempo);
                let x = ratio_to_f64(groups[i].beat_position);
                match (v0, v1) {
                    (Some(v0), Some(v1)) => Some(v0 + (v1 - v0) * (x - b0) / (b1 - b0)),
                    _ => None,
                }
            }
            (Some(nearest), None) | (None, Some(nearest)) => groups[nearest].local_tempo,
            (None, None) => base_tempo,
        };

        if let Some(baseline) = baseline {
            let scale = rng.gen_range((1.0 - jitter)..=(1.0 + jitter));
            let group = &mut groups[i];
            group.tempo_baseline = Some(baseline);
            group.local_tempo = Some(baseline * scale);
            group.interpolated = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn group(beat: i64, region: usize, tempo: Option<f64>) -> NoteGroup {
        NoteGroup {
            beat_position: Ratio::from_integer(beat),
            members: Vec::new(),
            ioi: 1.0,
            region,
            local_tempo: tempo,
            tempo_baseline: None,
            interpolated: false,
        }
    }

    fn all(n: usize) -> Vec<usize> {
        (0..n).collect()
    }

    #[test]
    fn test_robust_tempo_rejects_outliers() {
        let tempo = robust_tempo(&[60.0, 61.0, 59.0, 400.0], 50.0, 180.0, 0.2).unwrap();
        assert!((59.0..=61.0).contains(&tempo), "got {}", tempo);
    }

    #[test]
    fn test_robust_tempo_median_band() {
        // 150 is inside the floor/ceiling but far from the median of 100
        let tempo = robust_tempo(&[100.0, 102.0, 98.0, 150.0, 99.0], 50.0, 180.0, 0.2).unwrap();
        assert!((tempo - 99.75).abs() < 1e-9);
    }

    #[test]
    fn test_robust_tempo_nothing_in_range() {
        assert_eq!(robust_tempo(&[20.0, 400.0], 50.0, 180.0, 0.2), None);
        assert_eq!(robust_tempo(&[], 50.0, 180.0, 0.2), None);
    }

    #[test]
    fn test_interior_run_interpolated_within_jitter() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..50 {
            let mut groups = vec![
                group(0, 0, Some(100.0)),
                group(1, 0, None),
                group(2, 0, None),
                group(3, 0, None),
                group(4, 0, Some(140.0)),
            ];
            fill_region(&mut groups, &all(5), None, 0.1, &mut rng);
            for (g, expected) in groups[1..4].iter().zip([110.0, 120.0, 130.0]) {
                assert_eq!(g.tempo_baseline, Some(expected));
                let value = g.local_tempo.unwrap();
                assert!(value >= expected * 0.9 - 1e-9 && value <= expected * 1.1 + 1e-9);
                assert!(g.interpolated);
            }
            assert_eq!(groups[0].local_tempo, Some(100.0));
            assert_eq!(groups[4].local_tempo, Some(140.0));
        }
    }

    #[test]
    fn test_leading_and_trailing_runs_copy_nearest() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut groups = vec![
            group(0, 0, None),
            group(1, 0, Some(90.0)),
            group(2, 0, None),
        ];
        fill_region(&mut groups, &all(3), Some(200.0), 0.1, &mut rng);
        assert_eq!(groups[0].tempo_baseline, Some(90.0));
        assert_eq!(groups[2].tempo_baseline, Some(90.0));
        for g in &groups {
            let v = g.local_tempo.unwrap();
            assert!((81.0 - 1e-9..=99.0 + 1e-9).contains(&v));
        }
    }

    #[test]
    fn test_regions_interpolated_independently() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut groups = vec![
            group(0, 0, Some(100.0)),
            group(1, 0, None),
            group(2, 1, None),
            group(3, 1, Some(60.0)),
        ];
        let regions = vec![];
        interpolate_local_tempos(&mut groups, &regions, 0.0, &mut rng);
        assert_eq!(groups[1].local_tempo, Some(100.0));
        assert_eq!(groups[2].local_tempo, Some(60.0));
    }

    #[test]
    fn test_grace_group_ahead_of_previous_region_stays_in_its_own() {
        // Region 1's grace group sounds before region 0's last group
        let mut rng = StdRng::seed_from_u64(2);
        let mut groups = vec![
            group(0, 0, Some(100.0)),
            group(1, 1, None),
            group(2, 0, None),
            group(3, 1, Some(60.0)),
        ];
        let regions = vec![];
        interpolate_local_tempos(&mut groups, &regions, 0.0, &mut rng);
        assert_eq!(groups[1].tempo_baseline, Some(60.0), "grace copies its own region");
        assert_eq!(groups[2].tempo_baseline, Some(100.0));
        assert!(groups.iter().all(|g| g.local_tempo.is_some()));
    }

    #[test]
    fn test_empty_region_without_base_stays_unset() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut groups = vec![group(0, 0, None), group(1, 0, None)];
        fill_region(&mut groups, &all(2), None, 0.1, &mut rng);
        assert!(groups.iter().all(|g| g.local_tempo.is_none()));
    }

    #[test]
    fn test_region_zero_starts_at_origin() {
        let starts = region_starts(&[]);
        assert_eq!(starts, vec![(Ratio::from_integer(0), None)]);
        assert_eq!(region_of(&starts, Ratio::from_integer(12)), 0);
    }
}
