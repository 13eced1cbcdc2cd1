use rand::Rng;

use crate::ibs2::detector::Ibs2Index;
use crate::pbwt::updater::PbwtState;

/// Symmetric-expansion candidate selection around a target haplotype's
/// position in the PBWT array (§4.D). Neighbours are merged outward from
/// the target by divergence (smaller divergence = longer shared prefix =
/// picked first), stopping at `cap` candidates or the array boundary.
/// Haplotypes belonging to the target's own sample, and haplotypes already
/// known to be IBS2 with the target over `[window_start, window_end)`, are
/// skipped rather than counted against the cap.
pub struct CandidateSelector;

impl CandidateSelector {
    pub fn select(
        state: &PbwtState,
        target_hap: u32,
        target_sample: usize,
        sample_of_hap: impl Fn(u32) -> usize,
        ibs2: Option<&Ibs2Index>,
        window_start: usize,
        window_end: usize,
        cap: usize,
    ) -> Vec<u32> {
        let n = state.a.len();
        let i = state.position_of(target_hap);
        let mut lo = i; // next candidate scanned going down is at lo - 1
        let mut hi = i; // next candidate scanned going up is at hi + 1
        let mut out = Vec::with_capacity(cap);

        let excluded = |h: u32| -> bool {
            if sample_of_hap(h) == target_sample {
                return true;
            }
            if let Some(idx) = ibs2 {
                let s = sample_of_hap(h);
                if idx.are_ibs2_range(target_sample, s, window_start, window_end) {
                    return true;
                }
            }
            false
        };

        while out.len() < cap && (lo > 0 || hi + 1 < n) {
            let down_div = if lo > 0 { Some(state.d[lo]) } else { None };
            let up_div = if hi + 1 < n { Some(state.d[hi + 1]) } else { None };

            let take_down = match (down_div, up_div) {
                (Some(d_down), Some(d_up)) => d_down <= d_up,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };

            if take_down {
                lo -= 1;
                let h = state.a[lo];
                if !excluded(h) {
                    out.push(h);
                }
            } else {
                hi += 1;
                let h = state.a[hi];
                if !excluded(h) {
                    out.push(h);
                }
            }
        }
        out
    }

    /// Per-step candidate draw (§4.D): expand the same way as `select`,
    /// then pick one of the surviving candidates uniformly at random.
    /// `None` when the expansion has nothing eligible to offer.
    #[allow(clippy::too_many_arguments)]
    pub fn select_one(
        state: &PbwtState,
        target_hap: u32,
        target_sample: usize,
        sample_of_hap: impl Fn(u32) -> usize,
        ibs2: Option<&Ibs2Index>,
        window_start: usize,
        window_end: usize,
        cap: usize,
        rng: &mut impl Rng,
    ) -> Option<u32> {
        let pool = Self::select(state, target_hap, target_sample, sample_of_hap, ibs2, window_start, window_end, cap);
        if pool.is_empty() {
            None
        } else {
            Some(pool[rng.gen_range(0..pool.len())])
        }
    }

    /// Stage-2 variant: same expansion, but candidates carrying the target's
    /// rare allele (per the rare-carrier index) are taken first, then the
    /// remaining cap budget is filled by ordinary proximity (§4.D low-
    /// frequency handling, SPEC_FULL.md supplemented feature).
    pub fn select_low_frequency_aware(
        state: &PbwtState,
        target_hap: u32,
        target_sample: usize,
        sample_of_hap: impl Fn(u32) -> usize,
        ibs2: Option<&Ibs2Index>,
        window_start: usize,
        window_end: usize,
        cap: usize,
        rare_carriers: &[u32],
    ) -> Vec<u32> {
        let mut out = Vec::with_capacity(cap);
        let mut seen = std::collections::HashSet::new();

        for &h in rare_carriers {
            if out.len() >= cap {
                break;
            }
            if h == target_hap || sample_of_hap(h) == target_sample {
                continue;
            }
            if let Some(idx) = ibs2 {
                let s = sample_of_hap(h);
                if idx.are_ibs2_range(target_sample, s, window_start, window_end) {
                    continue;
                }
            }
            if seen.insert(h) {
                out.push(h);
            }
        }

        if out.len() < cap {
            let remaining = cap - out.len();
            let extra = Self::select(
                state,
                target_hap,
                target_sample,
                &sample_of_hap,
                ibs2,
                window_start,
                window_end,
                remaining + out.len(),
            );
            for h in extra {
                if out.len() >= cap {
                    break;
                }
                if seen.insert(h) {
                    out.push(h);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn build_state(steps: &[Vec<u32>], n_haps: usize) -> PbwtState {
        let mut state = PbwtState::initial(n_haps);
        for (t, step) in steps.iter().enumerate() {
            state.update_forward(t, step, 2);
        }
        state
    }

    #[test]
    fn candidates_exclude_own_sample_and_respect_cap() {
        // 6 haplotypes = 3 samples; samples are (0,1) (2,3) (4,5).
        let steps: Vec<Vec<u32>> = vec![
            vec![0, 0, 1, 1, 0, 1],
            vec![0, 1, 1, 0, 0, 1],
            vec![1, 1, 0, 0, 1, 1],
        ];
        let state = build_state(&steps, 6);
        let sample_of = |h: u32| (h / 2) as usize;
        let cands = CandidateSelector::select(&state, 0, 0, sample_of, None, 0, 3, 10);
        assert!(cands.iter().all(|&h| sample_of(h) != 0));
        assert!(cands.len() <= 4); // at most the 4 non-self haplotypes
    }

    #[test]
    fn cap_limits_candidate_count() {
        let steps: Vec<Vec<u32>> = vec![vec![0, 1, 0, 1, 0, 1, 0, 1]];
        let state = build_state(&steps, 8);
        let sample_of = |h: u32| (h / 2) as usize;
        let cands = CandidateSelector::select(&state, 0, 0, sample_of, None, 0, 1, 2);
        assert_eq!(cands.len(), 2);
    }

    #[test]
    fn select_one_returns_none_when_pool_is_empty() {
        let steps: Vec<Vec<u32>> = vec![vec![0, 0]];
        let state = build_state(&steps, 2);
        let sample_of = |h: u32| (h / 2) as usize;
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let picked = CandidateSelector::select_one(&state, 0, 0, sample_of, None, 0, 1, 10, &mut rng);
        assert!(picked.is_none());
    }

    #[test]
    fn select_one_always_picks_from_the_expanded_pool() {
        let steps: Vec<Vec<u32>> = vec![vec![0, 1, 0, 1, 0, 1]];
        let state = build_state(&steps, 6);
        let sample_of = |h: u32| (h / 2) as usize;
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        for _ in 0..20 {
            let picked = CandidateSelector::select_one(&state, 0, 0, sample_of, None, 0, 1, 10, &mut rng);
            let pool = CandidateSelector::select(&state, 0, 0, sample_of, None, 0, 1, 10);
            assert!(pool.contains(&picked.unwrap()));
        }
    }

    #[test]
    fn empty_ibs2_index_excludes_nothing_extra() {
        let steps: Vec<Vec<u32>> = vec![vec![0, 0, 0, 0]];
        let state = build_state(&steps, 4);
        let sample_of = |h: u32| (h / 2) as usize;
        let idx = Ibs2Index::empty(2);
        let with_idx = CandidateSelector::select(&state, 0, 0, sample_of, Some(&idx), 0, 4, 10);
        let without_idx = CandidateSelector::select(&state, 0, 0, sample_of, None, 0, 4, 10);
        assert_eq!(with_idx, without_idx);
    }
}
