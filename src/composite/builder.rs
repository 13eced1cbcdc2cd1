use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// One contiguous marker range of a composite reference, naming the real
/// haplotype that backs it (§4.E: "segments may be materialized ... or
/// stored as a list-of-segments").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeSegment {
    pub start: usize,
    pub end: usize,
    pub hap: u32,
}

/// One of the `K` composite references built for a target haplotype: its
/// own segments are contiguous, non-overlapping, and together span
/// `[0, nMarkers)` (§8 testable property 5).
#[derive(Debug, Clone, Default)]
pub struct CompositeReference {
    pub segments: Vec<CompositeSegment>,
}

impl CompositeReference {
    /// The real haplotype backing this composite at `marker`. Composites
    /// carry few segments in practice, so a linear scan beats maintaining
    /// a binary-search index.
    pub fn hap_at(&self, marker: usize) -> u32 {
        self.segments
            .iter()
            .find(|s| marker >= s.start && marker < s.end)
            .or_else(|| self.segments.last())
            .map(|s| s.hap)
            .expect("composite reference has at least one segment")
    }
}

struct CompositeState {
    anchor: u32,
    /// Forward: marker where the open segment begins. Reverse: marker
    /// where it ends. The meaning flips with direction because the
    /// builder walks the window in the PBWT's own processing order, which
    /// runs right-to-left on reverse passes (§4.D "two directions
    /// supported").
    boundary: usize,
    last_step: usize,
    segments: Vec<CompositeSegment>,
}

/// Incrementally assembles one target haplotype's `K` composite references
/// as its per-step PBWT candidate stream arrives (§4.E). The caller drives
/// one session per target haplotype for the duration of a single PBWT pass
/// over the window, feeding it via `observe`, then calls `finish` once
/// every step has been seen.
pub struct CompositeBuilderSession {
    k: usize,
    min_steps: u32,
    forward: bool,
    n_markers: usize,
    composites: Vec<CompositeState>,
    anchor_index: HashMap<u32, usize>,
    queue: BinaryHeap<Reverse<(usize, usize)>>,
}

impl CompositeBuilderSession {
    pub fn new(k: usize, min_steps: u32, forward: bool, n_markers: usize) -> Self {
        CompositeBuilderSession {
            k: k.max(1),
            min_steps,
            forward,
            n_markers,
            composites: Vec::new(),
            anchor_index: HashMap::new(),
            queue: BinaryHeap::new(),
        }
    }

    /// Feed step `t`'s (processing order, zero-based) chosen candidate, if
    /// `CandidateSelector::select_one` found one. `step_marker` maps a
    /// processing-order step index to the marker coordinate
    /// `steps.start(...)` of that step, used for the eviction midpoint
    /// (`midMarker = steps.start((oldLast + curStep)/2)`).
    pub fn observe(&mut self, t: usize, candidate: u32, step_marker: impl Fn(usize) -> usize) {
        if let Some(&idx) = self.anchor_index.get(&candidate) {
            self.composites[idx].last_step = t;
            self.queue.push(Reverse((t, idx)));
            return;
        }
        if self.composites.len() < self.k {
            let idx = self.composites.len();
            let boundary0 = if self.forward { 0 } else { self.n_markers };
            self.composites.push(CompositeState {
                anchor: candidate,
                boundary: boundary0,
                last_step: t,
                segments: Vec::new(),
            });
            self.anchor_index.insert(candidate, idx);
            self.queue.push(Reverse((t, idx)));
            return;
        }
        let Some(idx) = self.least_recent() else { return };
        let old_last = self.composites[idx].last_step;
        if t.saturating_sub(old_last) < self.min_steps as usize {
            return;
        }
        let mid = step_marker((old_last + t) / 2);
        let old_anchor = self.composites[idx].anchor;
        let old_boundary = self.composites[idx].boundary;
        let (seg_start, seg_end) = if self.forward { (old_boundary, mid) } else { (mid, old_boundary) };
        if seg_start < seg_end {
            self.composites[idx].segments.push(CompositeSegment { start: seg_start, end: seg_end, hap: old_anchor });
        }
        self.anchor_index.remove(&old_anchor);
        self.composites[idx].anchor = candidate;
        self.composites[idx].boundary = mid;
        self.composites[idx].last_step = t;
        self.anchor_index.insert(candidate, idx);
        self.queue.push(Reverse((t, idx)));
    }

    /// Finds the composite whose current `last_step` is smallest, lazily
    /// discarding heap entries invalidated by a later `observe` (§9's
    /// "priority queue with mutated keys" pattern: pop, compare against
    /// the live value, push back if still current).
    fn least_recent(&mut self) -> Option<usize> {
        while let Some(Reverse((step, idx))) = self.queue.pop() {
            if self.composites[idx].last_step == step {
                self.queue.push(Reverse((step, idx)));
                return Some(idx);
            }
        }
        None
    }

    /// Closes every composite's open segment out to the window boundary and
    /// returns exactly `K` composite references. If fewer than `K` distinct
    /// candidates were ever observed (including none at all), the
    /// remaining slots are filled with random distinct haplotypes instead
    /// (`excluded` should reject the target's own sample's haplotypes).
    pub fn finish(self, seed: u64, n_haps: usize, mut excluded: impl FnMut(u32) -> bool) -> Vec<CompositeReference> {
        let n_built = self.composites.len();
        let k = self.k;
        let forward = self.forward;
        let n_markers = self.n_markers;
        let mut out: Vec<CompositeReference> = self
            .composites
            .into_iter()
            .map(|mut c| {
                let (start, end) = if forward { (c.boundary, n_markers) } else { (0, c.boundary) };
                if start < end {
                    c.segments.push(CompositeSegment { start, end, hap: c.anchor });
                }
                c.segments.sort_by_key(|s| s.start);
                CompositeReference { segments: c.segments }
            })
            .collect();

        for i in n_built..k {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
            let mut chosen = 0u32;
            for _ in 0..(n_haps.max(1) * 4) {
                let cand = rng.gen_range(0..n_haps.max(1)) as u32;
                if !excluded(cand) {
                    chosen = cand;
                    break;
                }
            }
            out.push(CompositeReference { segments: vec![CompositeSegment { start: 0, end: n_markers, hap: chosen }] });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers(refs: &[CompositeReference], n_markers: usize) {
        for r in refs {
            assert!(!r.segments.is_empty());
            assert_eq!(r.segments[0].start, 0);
            assert_eq!(r.segments.last().unwrap().end, n_markers);
            for w in r.segments.windows(2) {
                assert_eq!(w[0].end, w[1].start, "segments must be contiguous");
            }
        }
    }

    #[test]
    fn single_composite_covers_the_whole_window_after_eviction() {
        let n_markers = 100;
        let step_marker = |t: usize| t * 10;
        let mut session = CompositeBuilderSession::new(1, 2, true, n_markers);
        session.observe(0, 7, step_marker);
        session.observe(5, 9, step_marker); // evicts 7 once min_steps satisfied
        let refs = session.finish(1, 20, |_| false);
        assert_eq!(refs.len(), 1);
        markers(&refs, n_markers);
        assert_eq!(refs[0].segments.len(), 2);
        assert_eq!(refs[0].segments[0].hap, 7);
        assert_eq!(refs[0].segments[1].hap, 9);
    }

    #[test]
    fn rebinding_the_same_anchor_does_not_evict() {
        let n_markers = 50;
        let step_marker = |t: usize| t * 5;
        let mut session = CompositeBuilderSession::new(1, 2, true, n_markers);
        session.observe(0, 3, step_marker);
        session.observe(1, 3, step_marker);
        session.observe(2, 3, step_marker);
        let refs = session.finish(1, 10, |_| false);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].segments.len(), 1);
        assert_eq!(refs[0].segments[0].hap, 3);
    }

    #[test]
    fn reverse_direction_closes_segments_down_to_zero() {
        let n_markers = 80;
        let step_marker = |t: usize| n_markers - t * 10;
        let mut session = CompositeBuilderSession::new(1, 2, false, n_markers);
        session.observe(0, 1, step_marker);
        session.observe(5, 2, step_marker);
        let refs = session.finish(2, 10, |_| false);
        markers(&refs, n_markers);
    }

    #[test]
    fn fewer_distinct_candidates_than_k_pads_remaining_slots() {
        let n_markers = 30;
        let step_marker = |t: usize| t * 3;
        // k = 4 but only haplotype 5 is ever observed as a candidate.
        let mut session = CompositeBuilderSession::new(4, 1, true, n_markers);
        session.observe(0, 5, step_marker);
        let refs = session.finish(9, 20, |h| h == 0);
        assert_eq!(refs.len(), 4);
        assert_eq!(refs[0].segments.len(), 1);
        assert_eq!(refs[0].segments[0].hap, 5);
        for r in &refs[1..] {
            markers(std::slice::from_ref(r), n_markers);
            assert_ne!(r.segments[0].hap, 0);
        }
    }

    #[test]
    fn no_candidates_ever_observed_falls_back_to_random_fill() {
        let session = CompositeBuilderSession::new(4, 10, true, 40);
        let refs = session.finish(3, 12, |h| h == 0);
        assert_eq!(refs.len(), 4);
        for r in &refs {
            assert_eq!(r.segments.len(), 1);
            assert_eq!(r.segments[0].start, 0);
            assert_eq!(r.segments[0].end, 40);
            assert_ne!(r.segments[0].hap, 0, "excluded haplotype must never be picked");
        }
    }

    #[test]
    fn hap_at_resolves_the_covering_segment() {
        let reference = CompositeReference {
            segments: vec![
                CompositeSegment { start: 0, end: 10, hap: 1 },
                CompositeSegment { start: 10, end: 30, hap: 2 },
            ],
        };
        assert_eq!(reference.hap_at(0), 1);
        assert_eq!(reference.hap_at(9), 1);
        assert_eq!(reference.hap_at(10), 2);
        assert_eq!(reference.hap_at(29), 2);
    }
}
