use rand::rngs::StdRng;

use crate::model::marker::MISSING_ALLELE;
use crate::pbwt::updater::PbwtState;
use crate::utils::math_utils::MathUtils;

/// Marker-range partition of a window into overlapping sub-windows, each of
/// width `max(4*overlap, totalCM/nThreads)` with `overlap` centimorgans
/// shared with its neighbor (§4.G).
pub struct SubWindowPlan;

impl SubWindowPlan {
    pub fn build(gen_pos_cm: &[f64], overlap_cm: f64, n_threads: usize) -> Vec<(usize, usize)> {
        let n = gen_pos_cm.len();
        if n == 0 {
            return Vec::new();
        }
        if n == 1 {
            return vec![(0, 1)];
        }
        let total_cm = gen_pos_cm[n - 1] - gen_pos_cm[0];
        let width = (4.0 * overlap_cm).max(total_cm / n_threads.max(1) as f64).max(1e-9);
        let step = (width - overlap_cm).max(width * 0.25);

        let mut windows = Vec::new();
        let mut start_cm = gen_pos_cm[0];
        loop {
            let end_cm = start_cm + width;
            let start_idx = gen_pos_cm.partition_point(|&c| c < start_cm).min(n - 1);
            let mut end_idx = gen_pos_cm.partition_point(|&c| c < end_cm);
            end_idx = end_idx.max(start_idx + 1).min(n);
            windows.push((start_idx, end_idx));
            if end_idx >= n {
                break;
            }
            start_cm += step;
        }
        windows
    }
}

/// A sample's provisional haplotype pair during greedy PBWT phasing.
#[derive(Debug, Clone, Default)]
pub struct HapPair {
    pub hap1: Vec<i32>,
    pub hap2: Vec<i32>,
}

/// Single-direction greedy PBWT phaser (§4.G): processes markers in the
/// given order over a pool of `reference_alleles` (complete, phased) plus
/// two provisional slots per target sample, using each het marker's
/// nearest already-placed PBWT neighbors to decide which allele goes to
/// which slot.
pub struct GreedyPhaser;

impl GreedyPhaser {
    #[allow(clippy::too_many_arguments)]
    pub fn phase(
        marker_order: &[usize],
        n_samples: usize,
        genotypes: &[Vec<(i32, i32)>],
        reference_alleles: &[Vec<i32>],
        allele_cdf: &[Vec<f64>],
        rng: &mut StdRng,
    ) -> Vec<HapPair> {
        use rand::Rng;

        let n_ref = reference_alleles.len();
        let n_slots = n_ref + 2 * n_samples;
        let mut state = PbwtState::initial(n_slots);
        let n_markers = marker_order.len();
        let mut pairs = vec![
            HapPair {
                hap1: vec![MISSING_ALLELE; n_markers],
                hap2: vec![MISSING_ALLELE; n_markers],
            };
            n_samples
        ];

        let slot_of = |sample: usize, which: u8| -> usize { n_ref + 2 * sample + which as usize };

        for (out_pos, &m) in marker_order.iter().enumerate() {
            let mut alleles_this_marker = vec![0i32; n_slots];
            for (r, alleles) in reference_alleles.iter().enumerate() {
                alleles_this_marker[r] = alleles[m];
            }

            for s in 0..n_samples {
                let (a1, a2) = genotypes[s][m];
                let (slot1, slot2) = (slot_of(s, 0), slot_of(s, 1));
                if a1 == MISSING_ALLELE || a2 == MISSING_ALLELE {
                    let drawn = if allele_cdf.get(m).map(|c| !c.is_empty()).unwrap_or(false) {
                        MathUtils::sample_cdf(&allele_cdf[m], rng.gen::<f64>()) as i32
                    } else {
                        0
                    };
                    alleles_this_marker[slot1] = drawn;
                    alleles_this_marker[slot2] = drawn;
                } else if a1 == a2 {
                    alleles_this_marker[slot1] = a1;
                    alleles_this_marker[slot2] = a2;
                } else {
                    let pos1 = state.position_of(slot1 as u32);
                    let pos2 = state.position_of(slot2 as u32);
                    let vote1 = Self::neighbor_vote(&state, &alleles_this_marker, pos1, slot1, slot2);
                    let vote2 = Self::neighbor_vote(&state, &alleles_this_marker, pos2, slot1, slot2);
                    let assign_a1_to_slot1 = match (vote1, vote2) {
                        (Some(v1), _) if v1 == a1 => true,
                        (Some(v1), _) if v1 == a2 => false,
                        (_, Some(v2)) if v2 == a2 => true,
                        (_, Some(v2)) if v2 == a1 => false,
                        _ => a1 <= a2,
                    };
                    if assign_a1_to_slot1 {
                        alleles_this_marker[slot1] = a1;
                        alleles_this_marker[slot2] = a2;
                    } else {
                        alleles_this_marker[slot1] = a2;
                        alleles_this_marker[slot2] = a1;
                    }
                }
                pairs[s].hap1[out_pos] = alleles_this_marker[slot1];
                pairs[s].hap2[out_pos] = alleles_this_marker[slot2];
            }

            let alphabet = alleles_this_marker.iter().copied().max().unwrap_or(0) as u32 + 1;
            let hap_to_seq: Vec<u32> = alleles_this_marker.iter().map(|&a| a.max(0) as u32).collect();
            state.update_forward(out_pos, &hap_to_seq, alphabet);
        }

        pairs
    }

    /// The allele of whichever immediate PBWT neighbor of `pos` is not one
    /// of the sample's own two slots, preferring the closer side.
    fn neighbor_vote(
        state: &PbwtState,
        alleles_this_marker: &[i32],
        pos: usize,
        own_slot1: usize,
        own_slot2: usize,
    ) -> Option<i32> {
        let n = state.a.len();
        let is_own = |h: u32| h as usize == own_slot1 || h as usize == own_slot2;
        if pos > 0 {
            let h = state.a[pos - 1];
            if !is_own(h) {
                return Some(alleles_this_marker[h as usize]);
            }
        }
        if pos + 1 < n {
            let h = state.a[pos + 1];
            if !is_own(h) {
                return Some(alleles_this_marker[h as usize]);
            }
        }
        None
    }
}

/// Reconciles a forward-phased and reverse-phased run of the same
/// sub-window by aligning haplotype labels at the first heterozygote
/// inside the overlap region (§4.G).
pub struct Reconciler;

impl Reconciler {
    /// Returns `true` if `reverse`'s hap1/hap2 labels should be swapped to
    /// match `forward`'s labelling convention.
    pub fn should_swap(forward: &HapPair, reverse: &HapPair, overlap_positions: &[usize]) -> bool {
        for &pos in overlap_positions {
            let (f1, f2) = (forward.hap1[pos], forward.hap2[pos]);
            if f1 == f2 || f1 == MISSING_ALLELE || f2 == MISSING_ALLELE {
                continue;
            }
            let (r1, r2) = (reverse.hap1[pos], reverse.hap2[pos]);
            if r1 == MISSING_ALLELE || r2 == MISSING_ALLELE {
                continue;
            }
            return f1 == r2 && f2 == r1;
        }
        false
    }

    pub fn swap(pair: &mut HapPair) {
        std::mem::swap(&mut pair.hap1, &mut pair.hap2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::rng::SeedDerivation;

    #[test]
    fn sub_window_plan_covers_whole_span_with_overlap() {
        let gen_pos_cm: Vec<f64> = (0..1000).map(|i| i as f64 * 0.01).collect();
        let windows = SubWindowPlan::build(&gen_pos_cm, 0.5, 4);
        assert!(!windows.is_empty());
        assert_eq!(windows[0].0, 0);
        assert_eq!(windows.last().unwrap().1, gen_pos_cm.len());
        for w in &windows {
            assert!(w.0 < w.1);
        }
    }

    #[test]
    fn greedy_phaser_resolves_homozygous_and_phases_het_against_reference() {
        let n_markers = 4;
        let reference_alleles = vec![vec![0, 1, 0, 1], vec![1, 0, 1, 0]];
        // sample 0 matches reference hap 0 exactly when phased correctly.
        let genotypes = vec![vec![(0, 1), (0, 1), (0, 1), (0, 1)]];
        let allele_cdf: Vec<Vec<f64>> = vec![vec![1.0]; n_markers];
        let mut rng = SeedDerivation::rng_for_sample(1, 0, 0);
        let order: Vec<usize> = (0..n_markers).collect();
        let pairs = GreedyPhaser::phase(&order, 1, &genotypes, &reference_alleles, &allele_cdf, &mut rng);
        assert_eq!(pairs.len(), 1);
        let hap1_matches_ref0 = pairs[0].hap1 == reference_alleles[0];
        let hap2_matches_ref0 = pairs[0].hap2 == reference_alleles[0];
        assert!(hap1_matches_ref0 || hap2_matches_ref0);
    }

    #[test]
    fn missing_genotype_is_drawn_from_cdf_range() {
        let n_markers = 2;
        let reference_alleles: Vec<Vec<i32>> = vec![];
        let genotypes = vec![vec![(MISSING_ALLELE, MISSING_ALLELE), (0, 0)]];
        let allele_cdf: Vec<Vec<f64>> = vec![vec![0.3, 1.0], vec![1.0]];
        let mut rng = SeedDerivation::rng_for_sample(2, 0, 0);
        let order: Vec<usize> = (0..n_markers).collect();
        let pairs = GreedyPhaser::phase(&order, 1, &genotypes, &reference_alleles, &allele_cdf, &mut rng);
        assert!(pairs[0].hap1[0] == 0 || pairs[0].hap1[0] == 1);
        assert_eq!(pairs[0].hap1[0], pairs[0].hap2[0]);
    }

    #[test]
    fn reconciler_detects_swapped_labels() {
        let forward = HapPair { hap1: vec![0, 1], hap2: vec![1, 0] };
        let reverse = HapPair { hap1: vec![1, 0], hap2: vec![0, 1] };
        assert!(Reconciler::should_swap(&forward, &reverse, &[0, 1]));
        let mut reverse = reverse;
        Reconciler::swap(&mut reverse);
        assert!(!Reconciler::should_swap(&forward, &reverse, &[0, 1]));
    }
}
