// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Hybrid discovery: given a request window, produce an ordered coverage
//! plan over chunks and raw segments.
//!
//! Chunks are preferred wherever one covers the sweep position, because one
//! chunk extract replaces up to fifteen per-segment cuts in the assembler.
//! The planner itself is pure; [`discover`] wires it to the indexes.

use crate::chunks::{self, Chunk};
use crate::segments::{self, Segment};
use base::time::{Duration, Time};
use base::Error;
use rusqlite::Connection;

/// How far a chunk's bounds may be extended when deciding whether it covers
/// the sweep position, absorbing clock skew at segment boundaries.
pub const CHUNK_SLOP: Duration = Duration::seconds(30);

/// Equivalent tolerance for raw segments, which are cut on exact boundaries.
pub const SEGMENT_TOLERANCE: Duration = Duration::seconds(1);

/// One materialization source in a coverage plan.
#[derive(Clone, Debug, PartialEq)]
pub enum Source {
    /// A sub-range of a chunk: skip `skip` from its start, take `take`.
    ChunkExtract {
        chunk: Chunk,
        skip: Duration,
        take: Duration,
    },
    /// A whole segment file, used verbatim.
    SegmentRef { segment: Segment },
    /// A sub-range of a segment, cut like a chunk extract.
    SegmentExtract {
        segment: Segment,
        skip: Duration,
        take: Duration,
    },
}

/// A plan entry, with the window slice `[start, end)` it covers.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanEntry {
    pub source: Source,
    pub start: Time,
    pub end: Time,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CoveragePlan {
    /// Entries in window order; consumed left-to-right, never reordered.
    pub entries: Vec<PlanEntry>,
    /// True when some part of the window had no source at all.
    pub coverage_missing: bool,
}

impl CoveragePlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total covered span, summed over entries.
    pub fn covered(&self) -> Duration {
        Duration(self.entries.iter().map(|e| (e.end - e.start).0).sum())
    }
}

/// Builds a coverage plan for `[start, end)` from pre-fetched candidates.
///
/// `chunks` and `segments` must each be ordered by start (the index queries
/// return them that way); both may intersect the window only partially.
pub fn plan(chunks: &[Chunk], segments: &[Segment], start: Time, end: Time) -> CoveragePlan {
    let mut entries = Vec::new();
    let mut coverage_missing = false;
    let mut t = start;
    while t < end {
        // Prefer the chunk reaching furthest past t.
        let best_chunk = chunks
            .iter()
            .filter(|c| c.start - CHUNK_SLOP <= t && t < c.end)
            .max_by_key(|c| c.end);
        if let Some(c) = best_chunk {
            let covered_end = end.min(c.end);
            entries.push(PlanEntry {
                source: Source::ChunkExtract {
                    chunk: c.clone(),
                    skip: Duration((t - c.start).0.max(0)),
                    take: covered_end - t,
                },
                start: t,
                end: covered_end,
            });
            t = covered_end;
            continue;
        }
        let best_seg = segments
            .iter()
            .filter(|s| s.start - SEGMENT_TOLERANCE <= t && t < s.end)
            .max_by_key(|s| s.end);
        if let Some(s) = best_seg {
            let covered_end = end.min(s.end);
            let whole =
                (t - s.start).0.abs() <= SEGMENT_TOLERANCE.0 && s.end <= end + SEGMENT_TOLERANCE;
            let source = if whole {
                Source::SegmentRef { segment: s.clone() }
            } else {
                Source::SegmentExtract {
                    segment: s.clone(),
                    skip: Duration((t - s.start).0.max(0)),
                    take: covered_end - t,
                }
            };
            entries.push(PlanEntry {
                source,
                start: t,
                end: covered_end,
            });
            t = covered_end;
            continue;
        }
        // Nothing covers t; skip forward to the next source start, if any.
        let next = chunks
            .iter()
            .map(|c| c.start)
            .chain(segments.iter().map(|s| s.start))
            .filter(|&s| s > t && s < end)
            .min();
        match next {
            Some(n) => {
                coverage_missing = true;
                t = n;
            }
            None => {
                coverage_missing = true;
                break;
            }
        }
    }
    CoveragePlan {
        entries,
        coverage_missing,
    }
}

/// Fetches candidates from the indexes and plans coverage of `[start, end)`.
pub fn discover(
    conn: &Connection,
    camera: &str,
    start: Time,
    end: Time,
) -> Result<CoveragePlan, Error> {
    // Widen the chunk fetch by the slop so a chunk that begins just before
    // the window is still a candidate.
    let chunks = chunks::list_intersecting(conn, camera, start - CHUNK_SLOP, end)?;
    let segments = segments::list_intersecting(conn, camera, start - SEGMENT_TOLERANCE, end)?;
    Ok(plan(&chunks, &segments, start, end))
}

/// True iff a request for this window would find at least one source.
pub fn check_availability(
    conn: &Connection,
    camera: &str,
    start: Time,
    end: Time,
) -> Result<bool, Error> {
    Ok(!discover(conn, camera, start, end)?.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(id: i64, start: i64, end: i64) -> Segment {
        Segment {
            id,
            camera: "cam1".to_owned(),
            disk_id: "disk-a".to_owned(),
            rel_path: format!("recordings/cam1/mp4/s{id}.mp4"),
            start: Time(start),
            end: Time(end),
            size_bytes: 1 << 20,
        }
    }

    fn chunk(id: i64, start: i64, end: i64) -> Chunk {
        Chunk {
            id,
            camera: "cam1".to_owned(),
            disk_id: "disk-a".to_owned(),
            rel_path: format!("chunks/cam1/c{id}.mp4"),
            start: Time(start),
            end: Time(end),
            segment_ids: vec![],
        }
    }

    /// Concatenated entry intervals must tile the window minus gaps.
    fn assert_contiguous(p: &CoveragePlan) {
        for w in p.entries.windows(2) {
            assert!(w[0].end <= w[1].start, "overlapping entries: {w:?}");
        }
        for e in &p.entries {
            assert!(e.start < e.end, "empty entry: {e:?}");
        }
    }

    #[test]
    fn empty_store() {
        let p = plan(&[], &[], Time(0), Time(60));
        assert!(p.is_empty());
        assert!(p.coverage_missing);
    }

    #[test]
    fn window_matching_single_segment() {
        let segs = [seg(1, 1000, 1060)];
        let p = plan(&[], &segs, Time(1000), Time(1060));
        assert!(!p.coverage_missing);
        assert_eq!(p.entries.len(), 1);
        assert!(matches!(
            p.entries[0].source,
            Source::SegmentRef { ref segment } if segment.id == 1
        ));
        assert_eq!(p.covered(), Duration::seconds(60));
    }

    #[test]
    fn segment_cut_when_window_is_interior() {
        let segs = [seg(1, 1000, 1060)];
        let p = plan(&[], &segs, Time(1010), Time(1050));
        assert_eq!(p.entries.len(), 1);
        match &p.entries[0].source {
            Source::SegmentExtract { segment, skip, take } => {
                assert_eq!(segment.id, 1);
                assert_eq!(*skip, Duration::seconds(10));
                assert_eq!(*take, Duration::seconds(40));
            }
            other => panic!("expected SegmentExtract, got {other:?}"),
        }
        assert!(!p.coverage_missing);
    }

    #[test]
    fn chunk_preferred_over_segments() {
        let segs: Vec<Segment> = (0..15).map(|i| seg(i, i * 60, (i + 1) * 60)).collect();
        let cks = [chunk(1, 0, 900)];
        let p = plan(&cks, &segs, Time(0), Time(900));
        assert_eq!(p.entries.len(), 1);
        assert!(matches!(
            p.entries[0].source,
            Source::ChunkExtract { ref chunk, skip, take }
                if chunk.id == 1 && skip == Duration(0) && take == Duration(900)
        ));
    }

    #[test]
    fn chunk_then_segments_tail() {
        // A chunk covers the first 15 minutes; fresher segments follow.
        let cks = [chunk(1, 0, 900)];
        let segs = [seg(20, 900, 960), seg(21, 960, 1020)];
        let p = plan(&cks, &segs, Time(600), Time(1000));
        assert!(!p.coverage_missing);
        assert_contiguous(&p);
        assert_eq!(p.entries.len(), 3);
        match &p.entries[0].source {
            Source::ChunkExtract { skip, take, .. } => {
                assert_eq!(*skip, Duration::seconds(600));
                assert_eq!(*take, Duration::seconds(300));
            }
            other => panic!("{other:?}"),
        }
        assert!(matches!(p.entries[1].source, Source::SegmentRef { .. }));
        match &p.entries[2].source {
            // The last segment runs past the window end, so it is cut.
            Source::SegmentExtract { skip, take, .. } => {
                assert_eq!(*skip, Duration::seconds(0));
                assert_eq!(*take, Duration::seconds(40));
            }
            other => panic!("{other:?}"),
        }
        assert_eq!(p.covered(), Duration::seconds(400));
    }

    #[test]
    fn gap_marks_missing_but_covers_rest() {
        // Segments 0-60 and 120-180; one-segment outage between.
        let segs = [seg(1, 0, 60), seg(2, 120, 180)];
        let p = plan(&[], &segs, Time(0), Time(180));
        assert!(p.coverage_missing);
        assert_eq!(p.entries.len(), 2);
        assert_eq!(p.covered(), Duration::seconds(120));
        assert_contiguous(&p);
    }

    #[test]
    fn trailing_gap_marks_missing() {
        let segs = [seg(1, 0, 60)];
        let p = plan(&[], &segs, Time(0), Time(120));
        assert!(p.coverage_missing);
        assert_eq!(p.entries.len(), 1);
    }

    #[test]
    fn chunk_slop_absorbs_boundary_skew() {
        // Chunk starts 20 s after the window; within the 30 s slop, so it is
        // still chosen to cover from t with skip clamped to zero.
        let cks = [chunk(1, 1020, 1920)];
        let p = plan(&cks, &[], Time(1000), Time(1900));
        assert_eq!(p.entries.len(), 1);
        match &p.entries[0].source {
            Source::ChunkExtract { skip, take, .. } => {
                assert_eq!(*skip, Duration::seconds(0));
                assert_eq!(*take, Duration::seconds(900));
            }
            other => panic!("{other:?}"),
        }
        assert!(!p.coverage_missing);
    }

    #[test]
    fn longest_chunk_wins_at_equal_start() {
        let cks = [chunk(1, 0, 600), chunk(2, 0, 900)];
        let p = plan(&cks, &[], Time(0), Time(900));
        assert_eq!(p.entries.len(), 1);
        assert!(matches!(
            p.entries[0].source,
            Source::ChunkExtract { ref chunk, .. } if chunk.id == 2
        ));
    }

    #[test]
    fn overlapping_chunk_and_segments_no_duplication() {
        // Chunk covers [0, 900); segments also exist for the same span.
        // The plan must use the chunk and not re-cover with segments.
        let segs: Vec<Segment> = (0..20).map(|i| seg(i, i * 60, (i + 1) * 60)).collect();
        let cks = [chunk(1, 0, 900)];
        let p = plan(&cks, &segs, Time(0), Time(1200));
        assert_contiguous(&p);
        assert_eq!(p.covered(), Duration::seconds(1200));
        assert!(matches!(p.entries[0].source, Source::ChunkExtract { .. }));
        // Remainder is segments 900..1200.
        assert_eq!(p.entries.len(), 1 + 5);
    }

    #[test]
    fn window_straddling_two_disks() {
        // Rotation mid-window: same camera, different disk ids; both sides
        // must appear in the plan.
        let mut a = seg(1, 0, 60);
        a.disk_id = "disk-a".to_owned();
        let mut b = seg(2, 60, 120);
        b.disk_id = "disk-b".to_owned();
        let p = plan(&[], &[a, b], Time(0), Time(120));
        assert!(!p.coverage_missing);
        assert_eq!(p.entries.len(), 2);
    }
}
