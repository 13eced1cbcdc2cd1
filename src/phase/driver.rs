use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

use crate::haplotype::cluster::{ClustType, ClusterPartition, MarkerGtState};
use crate::haplotype::coded_step::CodedSteps;
use crate::haplotype::step::StepList;
use crate::haplotype::store::HaplotypeStore;
use crate::hmm::params::{MuAccumulator, ParameterEstimator, RAccumulator};
use crate::ibs2::detector::Ibs2Index;
use crate::model::config::PhasingParameters;
use crate::model::marker::MarkerList;
use crate::model::window::WindowInput;
use crate::phase::assembler::SamplePhase;
use crate::utils::rng::SeedDerivation;

/// Swap-rate telemetry: reset and reported once per HMM iteration (§4.I).
#[derive(Debug, Default)]
pub struct SwapCounters {
    pub considered: AtomicU64,
    pub swapped: AtomicU64,
}

impl SwapCounters {
    pub fn new() -> Self {
        SwapCounters::default()
    }

    pub fn record(&self, swapped: bool) {
        self.considered.fetch_add(1, Ordering::Relaxed);
        if swapped {
            self.swapped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns `(considered, swapped, rate)` and resets both counters.
    pub fn take_rate(&self) -> (u64, u64, f64) {
        let considered = self.considered.swap(0, Ordering::Relaxed);
        let swapped = self.swapped.swap(0, Ordering::Relaxed);
        let rate = if considered > 0 {
            swapped as f64 / considered as f64
        } else {
            0.0
        };
        (considered, swapped, rate)
    }
}

/// Fixed, read-only per-window data built once and shared (immutably) by
/// every worker for the life of the window (§5 "Fixed per-window data").
pub struct WindowFixedData {
    pub markers: std::sync::Arc<MarkerList>,
    pub steps: StepList,
    pub coded_steps: CodedSteps,
    pub ibs2: Ibs2Index,
    pub marker_pos_bp: Vec<u32>,
}

impl WindowFixedData {
    /// `n_real_haps` is the reference+target haplotype universe size, which
    /// may be smaller than `store.n_haps()` when the caller has reserved
    /// extra scratch rows in the store for composite-reference
    /// materialization (§4.E) — those scratch rows must never become their
    /// own coded-step symbol.
    pub fn build(
        input: &WindowInput,
        store: &HaplotypeStore,
        params: &PhasingParameters,
        median_intermarker_cm: f64,
        n_real_haps: usize,
    ) -> (Self, Vec<ClusterPartition>) {
        let delta = params.ibs_step_cm(median_intermarker_cm);
        let steps = StepList::build(&input.gen_pos_cm, delta).expect("non-empty window");
        let coded_steps = CodedSteps::build(store, &steps, n_real_haps);

        let n_target = input.samples.n_samples();
        let mafs = Self::compute_mafs(input);
        let missing_rates = Self::compute_missing_rates(input);
        let diag = crate::ibs2::detector::Ibs2Detector::select_diagnostic_markers(
            &mafs,
            &missing_rates,
            &input.gen_pos_cm,
            params,
        );
        let gt_lookup = |s: usize, m: usize| -> Option<(i32, i32)> {
            let (h1, h2) = input.samples.hap_pair(s);
            let (a1, a2) = (input.target_gt[h1][m], input.target_gt[h2][m]);
            if a1 < 0 || a2 < 0 {
                None
            } else {
                Some((a1, a2))
            }
        };
        let ibs2 = crate::ibs2::detector::Ibs2Detector::detect(
            &gt_lookup,
            &diag,
            &input.gen_pos_cm,
            n_target,
            input.n_markers(),
            params,
        );

        let clusters: Vec<ClusterPartition> = (0..n_target)
            .map(|s| {
                let (h1, h2) = input.samples.hap_pair(s);
                let states: Vec<MarkerGtState> = (0..input.n_markers())
                    .map(|m| {
                        let (a1, a2) = (input.target_gt[h1][m], input.target_gt[h2][m]);
                        if a1 < 0 || a2 < 0 {
                            MarkerGtState::Missing
                        } else if a1 == a2 {
                            MarkerGtState::Homozygous
                        } else {
                            MarkerGtState::UnphasedHet
                        }
                    })
                    .collect();
                let mut partition =
                    ClusterPartition::build(&states, &input.gen_pos_cm, params.cluster_cm_cap, params.cluster_size_cap);
                // Clusters wholly inside the overlap prefix are already
                // phased by the previous window; freeze them so the
                // burn-in flip test never revisits a decision the caller
                // has committed to (§8 "window overlap splice").
                for idx in 0..partition.n_clusters() {
                    if partition.clusters()[idx].end() <= input.overlap_markers
                        && partition.clusters()[idx].clust_type == ClustType::UnphasedHet
                    {
                        partition.retype(idx, ClustType::PhasedHet);
                    }
                }
                partition
            })
            .collect();

        let marker_pos_bp: Vec<u32> = (0..input.n_markers()).map(|m| input.markers.marker(m).pos).collect();

        let fixed = WindowFixedData {
            markers: std::sync::Arc::new(input.markers.clone()),
            steps,
            coded_steps,
            ibs2,
            marker_pos_bp,
        };
        (fixed, clusters)
    }

    fn compute_mafs(input: &WindowInput) -> Vec<f64> {
        (0..input.n_markers())
            .map(|m| {
                let mut counts = std::collections::HashMap::new();
                let mut total = 0u32;
                for row in &input.target_gt {
                    let a = row[m];
                    if a >= 0 {
                        *counts.entry(a).or_insert(0u32) += 1;
                        total += 1;
                    }
                }
                if total == 0 {
                    return 0.0;
                }
                let max_count = counts.values().copied().max().unwrap_or(0);
                1.0 - (max_count as f64 / total as f64)
            })
            .collect()
    }

    fn compute_missing_rates(input: &WindowInput) -> Vec<f64> {
        let n = input.target_gt.len().max(1);
        (0..input.n_markers())
            .map(|m| {
                let missing = input.target_gt.iter().filter(|row| row[m] < 0).count();
                missing as f64 / n as f64
            })
            .collect()
    }
}

/// Orchestrates the burn-in + stage-1 iteration loop and the stage-2 pass
/// over a fixed thread pool (§4.I).
pub struct IterationDriver;

impl IterationDriver {
    /// Per-iteration EM update (§4.H): aggregates the shard accumulators
    /// gathered during this iteration's sample fan-out and folds the
    /// result into `(mu, r)`.
    pub fn em_update(mu_shards: Vec<MuAccumulator>, r_shards: Vec<RAccumulator>, mu: f64, r: f64) -> (f64, f64) {
        let mu_acc = MuAccumulator::concat(mu_shards);
        let r_acc = RAccumulator::concat(r_shards);
        let new_mu = ParameterEstimator::aggregate_mu(&mu_acc, mu);
        let new_r = ParameterEstimator::aggregate_r(&r_acc, r);
        (new_mu, new_r)
    }

    /// "Mask trailing unphased hets" (§4.I / Open Question 3): in any
    /// maximal run of 2-3 unphased-heterozygote clusters spanning
    /// `<= max_bp`, mask all but the run's last cluster so the HMM
    /// re-imputes them instead of phasing by the flip test — except a
    /// run of exactly 2, where only the trailing cluster is masked and
    /// the leading one is left for the flip test to decide.
    pub fn mask_trailing_unphased_runs(partition: &mut ClusterPartition, marker_pos_bp: &[u32], max_bp: u32) {
        let n = partition.n_clusters();
        let mut run_start: Option<usize> = None;
        let mut i = 0;
        while i <= n {
            let is_unphased = i < n && partition.clusters()[i].clust_type == ClustType::UnphasedHet;
            if is_unphased {
                if run_start.is_none() {
                    run_start = Some(i);
                }
            } else if let Some(start) = run_start.take() {
                let run_len = i - start;
                if (2..=3).contains(&run_len) {
                    let span_start_bp = marker_pos_bp[partition.clusters()[start].start];
                    let last = &partition.clusters()[i - 1];
                    let last_marker = last.start + last.size as usize - 1;
                    let span_end_bp = marker_pos_bp[last_marker];
                    if span_end_bp.saturating_sub(span_start_bp) <= max_bp {
                        // Run of 2: mask only the trailing cluster. Run of 3:
                        // mask the two leading clusters, leave the last one.
                        let (mask_start, mask_end) = if run_len == 2 { (start + 1, i) } else { (start, i - 1) };
                        for idx in mask_start..mask_end {
                            partition.retype(idx, ClustType::MaskedHet);
                        }
                    }
                }
            }
            i += 1;
        }
    }

    /// Whether a target sample should be drawn into this iteration's
    /// parameter re-estimation subset (§4.F "run the two-track version
    /// over a random subset of samples").
    pub fn in_reestimation_subset(sample: usize, iter: u32, seed: u64, fraction: f64) -> bool {
        let mut rng = SeedDerivation::rng_for_sample(seed, iter, sample);
        rng.gen::<f64>() < fraction
    }
}

/// Applies an adopted het-cluster swap decision: exchanges the sample's two
/// haplotype arrays (and, by the same motion, the tracks' mismatch
/// vectors, since those are carried alongside in the per-sample HMM
/// buffers) over `[c_start, next_unphased_start)` (§4.F).
pub fn swap_haplotype_range(phase: &mut SamplePhase, range: std::ops::Range<usize>) {
    for m in range {
        std::mem::swap(&mut phase.hap1[m], &mut phase.hap2[m]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_counters_report_and_reset() {
        let counters = SwapCounters::new();
        counters.record(true);
        counters.record(false);
        counters.record(true);
        let (considered, swapped, rate) = counters.take_rate();
        assert_eq!(considered, 3);
        assert_eq!(swapped, 2);
        assert!((rate - 2.0 / 3.0).abs() < 1e-12);
        let (considered2, _, _) = counters.take_rate();
        assert_eq!(considered2, 0);
    }

    #[test]
    fn reestimation_subset_draw_is_deterministic_for_seed() {
        let a = IterationDriver::in_reestimation_subset(3, 1, 42, 0.2);
        let b = IterationDriver::in_reestimation_subset(3, 1, 42, 0.2);
        assert_eq!(a, b);
    }
}
