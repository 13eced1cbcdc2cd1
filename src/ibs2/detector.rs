use std::collections::HashMap;

use crate::model::config::PhasingParameters;

/// An unordered pair-of-samples, inclusive marker-interval IBS2 segment
/// (§3). Stored symmetrically in `Ibs2Index` so `areIbs2` is symmetric by
/// construction (testable property §8.9), not by runtime normalisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ibs2Segment {
    pub other_sample: u32,
    pub start_marker: u32,
    pub end_marker: u32,
}

/// Per-sample list of IBS2 segments, queryable in `O(#segments(s))` (§4.C).
#[derive(Debug, Clone, Default)]
pub struct Ibs2Index {
    by_sample: Vec<Vec<Ibs2Segment>>,
}

impl Ibs2Index {
    pub fn empty(n_samples: usize) -> Self {
        Ibs2Index {
            by_sample: vec![Vec::new(); n_samples],
        }
    }

    fn insert_symmetric(&mut self, s1: usize, s2: usize, start: usize, end: usize) {
        self.by_sample[s1].push(Ibs2Segment {
            other_sample: s2 as u32,
            start_marker: start as u32,
            end_marker: end as u32,
        });
        self.by_sample[s2].push(Ibs2Segment {
            other_sample: s1 as u32,
            start_marker: start as u32,
            end_marker: end as u32,
        });
    }

    pub fn are_ibs2(&self, s1: usize, s2: usize, m: usize) -> bool {
        self.by_sample[s1].iter().any(|seg| {
            seg.other_sample as usize == s2
                && m >= seg.start_marker as usize
                && m < seg.end_marker as usize
        })
    }

    pub fn are_ibs2_range(&self, s1: usize, s2: usize, start_m: usize, end_m: usize) -> bool {
        self.by_sample[s1].iter().any(|seg| {
            seg.other_sample as usize == s2
                && seg.start_marker as usize <= start_m
                && seg.end_marker as usize >= end_m
        })
    }

    pub fn segments(&self, s: usize) -> &[Ibs2Segment] {
        &self.by_sample[s]
    }
}

/// Per-marker genotype classification the detector needs: unordered allele
/// pair, or `None` if missing.
pub type GenotypeLookup<'a> = dyn Fn(usize, usize) -> Option<(i32, i32)> + 'a;

pub struct Ibs2Detector;

impl Ibs2Detector {
    /// Step 1: diagnostic markers with MAF >= threshold, missing rate <=
    /// threshold, spaced apart in cM (§4.C).
    pub fn select_diagnostic_markers(
        mafs: &[f64],
        missing_rates: &[f64],
        gen_pos_cm: &[f64],
        params: &PhasingParameters,
    ) -> Vec<usize> {
        let mut out = Vec::new();
        let mut last_cm = f64::NEG_INFINITY;
        for m in 0..mafs.len() {
            if mafs[m] >= params.ibs2_maf_min
                && missing_rates[m] <= params.ibs2_missing_max
                && gen_pos_cm[m] - last_cm >= params.ibs2_marker_spacing_cm
            {
                out.push(m);
                last_cm = gen_pos_cm[m];
            }
        }
        out
    }

    fn group_windows(diag_markers: &[usize], min_markers: usize) -> Vec<Vec<usize>> {
        if diag_markers.is_empty() {
            return Vec::new();
        }
        let mut windows = Vec::new();
        let mut i = 0;
        while i < diag_markers.len() {
            let end = (i + min_markers).min(diag_markers.len());
            // if the final window would be smaller than min_markers, fold
            // it into the previous window rather than emit a short tail.
            if diag_markers.len() - i < min_markers && !windows.is_empty() {
                let last: &mut Vec<usize> = windows.last_mut().unwrap();
                last.extend_from_slice(&diag_markers[i..]);
                break;
            }
            windows.push(diag_markers[i..end].to_vec());
            i = end;
        }
        windows
    }

    /// Steps 2-3: within each diagnostic window, refine target samples by
    /// joint genotype; any final cluster of size > 1 not entirely
    /// homozygous yields IBS2 pairs over the window's marker span. Pairs
    /// are merged within `ibs2_merge_cm`, extended outward across
    /// homozygous-compatible sites, re-merged, then segments shorter than
    /// `ibs2_min_segment_cm` are discarded.
    pub fn detect(
        genotypes: &GenotypeLookup,
        diag_markers: &[usize],
        gen_pos_cm: &[f64],
        n_samples: usize,
        n_markers: usize,
        params: &PhasingParameters,
    ) -> Ibs2Index {
        let windows = Self::group_windows(diag_markers, params.ibs2_window_min_markers);

        let mut raw: HashMap<(u32, u32), Vec<(usize, usize)>> = HashMap::new();
        for win in &windows {
            let pairs = Self::window_pairs(genotypes, win, n_samples);
            let start_m = *win.first().unwrap();
            let end_m = *win.last().unwrap() + 1;
            for (a, b) in pairs {
                let key = (a.min(b) as u32, a.max(b) as u32);
                raw.entry(key).or_default().push((start_m, end_m));
            }
        }

        let mut index = Ibs2Index::empty(n_samples);
        for ((s1, s2), mut intervals) in raw {
            intervals.sort_unstable();
            let merged = Self::merge_intervals(&intervals, gen_pos_cm, params.ibs2_merge_cm);
            let extended: Vec<(usize, usize)> = merged
                .into_iter()
                .map(|(start, end)| {
                    Self::extend_across_homozygous_sites(
                        genotypes, s1 as usize, s2 as usize, start, end, n_markers,
                    )
                })
                .collect();
            let remerged = Self::merge_intervals(&extended, gen_pos_cm, params.ibs2_merge_cm);
            for (start, end) in remerged {
                let span_cm = gen_pos_cm[end - 1] - gen_pos_cm[start];
                if span_cm >= params.ibs2_min_segment_cm {
                    index.insert_symmetric(s1 as usize, s2 as usize, start, end);
                }
            }
        }
        index
    }

    fn window_pairs(
        genotypes: &GenotypeLookup,
        win: &[usize],
        n_samples: usize,
    ) -> Vec<(usize, usize)> {
        let mut cluster_of: Vec<Option<u32>> = vec![Some(0); n_samples];
        let mut hom_only: HashMap<u32, bool> = HashMap::from([(0, true)]);
        let mut next_id = 1u32;

        for &m in win {
            let mut key_to_new: HashMap<(u32, i32, i32), u32> = HashMap::new();
            let mut new_hom_only: HashMap<u32, bool> = HashMap::new();
            for s in 0..n_samples {
                let Some(cid) = cluster_of[s] else { continue };
                match genotypes(s, m) {
                    None => cluster_of[s] = None,
                    Some((a, b)) => {
                        let (lo, hi) = (a.min(b), a.max(b));
                        let key = (cid, lo, hi);
                        let new_id = *key_to_new.entry(key).or_insert_with(|| {
                            let id = next_id;
                            next_id += 1;
                            id
                        });
                        let is_hom_here = lo == hi;
                        let parent_hom = hom_only.get(&cid).copied().unwrap_or(true);
                        let e = new_hom_only.entry(new_id).or_insert(true);
                        *e = *e && is_hom_here && parent_hom;
                        cluster_of[s] = Some(new_id);
                    }
                }
            }
            hom_only = new_hom_only;
        }

        let mut groups: HashMap<u32, Vec<usize>> = HashMap::new();
        for (s, cid) in cluster_of.iter().enumerate() {
            if let Some(cid) = cid {
                groups.entry(*cid).or_default().push(s);
            }
        }

        let mut pairs = Vec::new();
        for (cid, members) in groups {
            if members.len() > 1 && !hom_only.get(&cid).copied().unwrap_or(true) {
                for i in 0..members.len() {
                    for j in (i + 1)..members.len() {
                        pairs.push((members[i], members[j]));
                    }
                }
            }
        }
        pairs
    }

    fn merge_intervals(
        intervals: &[(usize, usize)],
        gen_pos_cm: &[f64],
        merge_cm: f64,
    ) -> Vec<(usize, usize)> {
        if intervals.is_empty() {
            return Vec::new();
        }
        let mut sorted = intervals.to_vec();
        sorted.sort_unstable();
        let mut merged = vec![sorted[0]];
        for &(s, e) in &sorted[1..] {
            let last = merged.last_mut().unwrap();
            if s <= last.1 {
                last.1 = last.1.max(e);
                continue;
            }
            let gap_cm = gen_pos_cm[s] - gen_pos_cm[last.1 - 1];
            if gap_cm <= merge_cm {
                last.1 = last.1.max(e);
            } else {
                merged.push((s, e));
            }
        }
        merged
    }

    fn extend_across_homozygous_sites(
        genotypes: &GenotypeLookup,
        s1: usize,
        s2: usize,
        mut start: usize,
        mut end: usize,
        n_markers: usize,
    ) -> (usize, usize) {
        while start > 0 {
            let prev = start - 1;
            if Self::homozygous_compatible(genotypes, s1, s2, prev) {
                start = prev;
            } else {
                break;
            }
        }
        while end < n_markers {
            if Self::homozygous_compatible(genotypes, s1, s2, end) {
                end += 1;
            } else {
                break;
            }
        }
        (start, end)
    }

    fn homozygous_compatible(genotypes: &GenotypeLookup, s1: usize, s2: usize, m: usize) -> bool {
        match (genotypes(s1, m), genotypes(s2, m)) {
            (Some((a1, b1)), Some((a2, b2))) if a1 == b1 && a2 == b2 => a1 == a2,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_twins_are_ibs2_everywhere_in_window() {
        let n_markers = 120;
        let n_samples = 3;
        // sample 0 and 1 identical heterozygous genotype at every marker,
        // sample 2 homozygous everywhere (no IBS2 signal expected with it).
        let gts = move |s: usize, m: usize| -> Option<(i32, i32)> {
            if s == 2 {
                Some((0, 0))
            } else {
                let _ = m;
                Some((0, 1))
            }
        };
        let gen_pos_cm: Vec<f64> = (0..n_markers).map(|i| i as f64 * 0.1).collect();
        let mafs = vec![0.3; n_markers];
        let missing = vec![0.0; n_markers];
        let params = PhasingParameters::default();
        let diag = Ibs2Detector::select_diagnostic_markers(&mafs, &missing, &gen_pos_cm, &params);
        let mut params = params;
        params.ibs2_window_min_markers = 20;
        let index = Ibs2Detector::detect(&gts, &diag, &gen_pos_cm, n_samples, n_markers, &params);
        assert!(index.are_ibs2(0, 1, 0));
        assert!(index.are_ibs2(1, 0, n_markers / 2));
        assert!(!index.are_ibs2(0, 2, n_markers / 2));
    }

    #[test]
    fn short_segments_are_discarded() {
        let n_markers = 10;
        let n_samples = 2;
        let gts = |_s: usize, m: usize| -> Option<(i32, i32)> {
            if m == 5 {
                Some((0, 1))
            } else {
                Some((0, 0))
            }
        };
        let gen_pos_cm: Vec<f64> = (0..n_markers).map(|i| i as f64 * 0.01).collect();
        let mafs = vec![0.3; n_markers];
        let missing = vec![0.0; n_markers];
        let params = PhasingParameters::default();
        let diag: Vec<usize> = (0..n_markers).collect();
        let index = Ibs2Detector::detect(&gts, &diag, &gen_pos_cm, n_samples, n_markers, &params);
        // span of the whole window is only 0.09 cM, well below the 2 cM floor
        assert!(!index.are_ibs2(0, 1, 5));
    }
}
