use std::sync::Arc;

use log::{debug, info};
use scoped_threadpool::Pool;

use crate::composite::builder::{CompositeBuilderSession, CompositeReference};
use crate::haplotype::cluster::{ClustType, ClusterPartition};
use crate::haplotype::store::HaplotypeStore;
use crate::hmm::li_stephens::LiStephensHmm;
use crate::hmm::params::{MuAccumulator, RAccumulator};
use crate::model::config::PhasingParameters;
use crate::model::window::WindowInput;
use crate::pbwt::candidates::CandidateSelector;
use crate::pbwt::updater::PbwtState;
use crate::phase::assembler::{PhasedGenotype, RareCarrierIndex, ResultAssembler, SamplePhase};
use crate::phase::driver::{swap_haplotype_range, IterationDriver, SwapCounters, WindowFixedData};
use crate::phase::initial_phaser::{GreedyPhaser, HapPair, Reconciler, SubWindowPlan};
use crate::utils::errors::PhasingResult;
use crate::utils::math_utils::MathUtils;
use crate::utils::rng::SeedDerivation;

/// Fraction of target samples drawn into each iteration's parameter
/// re-estimation subset (§4.F "run ... over a random subset of samples").
const REESTIMATION_SAMPLE_FRACTION: f64 = 0.2;

/// Per-window output: row-major phased records plus the carrier index
/// built during stage 2 (§6 "Output from the core").
pub struct WindowResult {
    pub records: Vec<Vec<PhasedGenotype>>,
    pub rare_carriers: RareCarrierIndex,
    pub swap_rate: f64,
}

/// Top-level entry point tying every component together: PBWT initial
/// phasing, the iterative PBWT+HMM refinement, the stage-2 rare-variant
/// pass, and result assembly (§2 "Data flow").
pub struct PhasingEngine {
    params: PhasingParameters,
}

impl PhasingEngine {
    pub fn new(params: PhasingParameters) -> Self {
        PhasingEngine { params }
    }

    pub fn phase_window(&self, input: &WindowInput) -> PhasingResult<WindowResult> {
        input.validate()?;

        let n_markers = input.n_markers();
        let n_samples = input.samples.n_samples();
        let n_ref = input.n_reference_haps();
        let n_real_haps = n_ref + 2 * n_samples;
        let k = self.params.phase_states.max(1);
        info!(
            "phasing window: {} markers, {} samples, {} reference haplotypes",
            n_markers, n_samples, n_ref
        );

        // `n_real_haps` real rows, plus `k` scratch rows per sample for
        // that sample's materialized composite-reference panel (§4.E).
        let mut store = HaplotypeStore::new(n_real_haps + n_samples * k, Arc::new(input.markers.clone()));
        for (h, row) in input.reference_gt.iter().enumerate() {
            for (m, &a) in row.iter().enumerate() {
                if a >= 0 {
                    store.set_allele(h, m, a as u32);
                }
            }
        }

        let median_cm = Self::median_intermarker_cm(&input.gen_pos_cm);
        let mut phases = self.seed_initial_phase(input);

        let (fixed, mut clusters) = WindowFixedData::build(input, &store, &self.params, median_cm, n_real_haps);
        for s in 0..n_samples {
            for m in 0..n_markers {
                store.set_allele(n_ref + 2 * s, m, phases[s].hap1[m].max(0) as u32);
                store.set_allele(n_ref + 2 * s + 1, m, phases[s].hap2[m].max(0) as u32);
            }
        }

        let swap_counters = SwapCounters::new();
        let total_iters = self.params.burnin + self.params.iterations;
        let mut mu = self.params.rare_fraction.max(1e-3);
        let mut r = 1.0 / self.params.ne.max(1.0);

        let mut pool = Pool::new(self.params.nthreads.max(1) as u32);
        for iter in 0..total_iters {
            debug!("iteration {}/{} (burnin = {})", iter + 1, total_iters, self.params.burnin);
            let direction_forward = iter % 2 == 1;
            let cap = self.params.candidate_cap_for_iteration(iter, self.params.burnin);
            let lr_threshold = self.params.lr_threshold(iter, self.params.burnin, self.params.iterations.max(1));

            let panels = Self::build_composite_panels(
                &fixed,
                n_real_haps,
                n_samples,
                n_ref,
                n_markers,
                direction_forward,
                &self.params,
                median_cm,
                iter,
                cap,
                k,
            );
            // Materialize every sample's composite panel into its scratch
            // rows before the parallel HMM fan-out, while `store` is still
            // mutably held by this single thread (§4.E, §5 "Fixed per-
            // window data" -- scratch rows are the one exception written
            // each iteration, never read concurrently with this write).
            for (s, panel) in panels.iter().enumerate() {
                let base = n_real_haps + s * k;
                for (j, composite) in panel.iter().enumerate() {
                    let row = base + j;
                    for seg in &composite.segments {
                        store.copy_range(seg.hap as usize, row, seg.start, seg.end);
                    }
                }
            }

            let n_chunks = self.params.nthreads.max(1);
            let chunk_size = (n_samples + n_chunks - 1) / n_chunks.max(1);
            let chunk_size = chunk_size.max(1);
            let params = &self.params;
            let store_ref = &store;
            let fixed_ref = &fixed;
            let swap_counters_ref = &swap_counters;

            let mut shard_data: Vec<(MuAccumulator, RAccumulator)> =
                (0..n_samples).map(|_| (MuAccumulator::new(), RAccumulator::new())).collect();

            pool.scoped(|scope| {
                for (chunk_idx, ((phase_chunk, cluster_chunk), shard_chunk)) in phases
                    .chunks_mut(chunk_size)
                    .zip(clusters.chunks_mut(chunk_size))
                    .zip(shard_data.chunks_mut(chunk_size))
                    .enumerate()
                {
                    let base = chunk_idx * chunk_size;
                    scope.execute(move || {
                        for (offset, ((phase, partition), shard)) in
                            phase_chunk.iter_mut().zip(cluster_chunk.iter_mut()).zip(shard_chunk.iter_mut()).enumerate()
                        {
                            let s = base + offset;
                            Self::phase_sample_iteration(
                                s,
                                phase,
                                partition,
                                store_ref,
                                fixed_ref,
                                n_real_haps,
                                k,
                                params,
                                iter,
                                lr_threshold,
                                swap_counters_ref,
                                &mut shard.0,
                                &mut shard.1,
                            );
                        }
                    });
                }
            });

            for s in 0..n_samples {
                for m in 0..n_markers {
                    store.set_allele(n_ref + 2 * s, m, phases[s].hap1[m].max(0) as u32);
                    store.set_allele(n_ref + 2 * s + 1, m, phases[s].hap2[m].max(0) as u32);
                }
            }

            if self.params.em && iter < self.params.burnin {
                let (mu_shards, r_shards): (Vec<_>, Vec<_>) = shard_data.into_iter().unzip();
                let (new_mu, new_r) = IterationDriver::em_update(mu_shards, r_shards, mu, r);
                debug!("re-estimated mu {:.6} -> {:.6}, r {:.6} -> {:.6}", mu, new_mu, r, new_r);
                mu = new_mu;
                r = new_r;
            }
        }

        let rare_carriers = RareCarrierIndex::new(n_markers);
        self.stage_two_rare_pass(input, &store, &fixed, &mut phases, &rare_carriers, n_ref, n_real_haps);

        let records = ResultAssembler::transpose_to_row_major(&phases, n_markers);
        let (considered, swapped, swap_rate) = swap_counters.take_rate();
        info!("window phased: {}/{} heterozygote flips adopted", swapped, considered);

        Ok(WindowResult { records, rare_carriers, swap_rate })
    }

    fn median_intermarker_cm(gen_pos_cm: &[f64]) -> f64 {
        if gen_pos_cm.len() < 2 {
            return 1e-4;
        }
        let mut diffs: Vec<f64> = gen_pos_cm.windows(2).map(|w| w[1] - w[0]).collect();
        MathUtils::median(&mut diffs).max(1e-9)
    }

    fn seed_initial_phase(&self, input: &WindowInput) -> Vec<SamplePhase> {
        let n_samples = input.samples.n_samples();
        let n_markers = input.n_markers();
        let sub_windows = SubWindowPlan::build(&input.gen_pos_cm, self.params.window_overlap_cm, self.params.nthreads);

        let genotypes: Vec<Vec<(i32, i32)>> = (0..n_samples)
            .map(|s| {
                let (h1, h2) = input.samples.hap_pair(s);
                (0..n_markers).map(|m| (input.target_gt[h1][m], input.target_gt[h2][m])).collect()
            })
            .collect();
        let allele_cdf: Vec<Vec<f64>> = (0..n_markers)
            .map(|m| {
                let mut counts = std::collections::HashMap::new();
                for g in &genotypes {
                    for a in [g[m].0, g[m].1] {
                        if a >= 0 {
                            *counts.entry(a as u32).or_insert(0u32) += 1;
                        }
                    }
                }
                let max_allele = counts.keys().copied().max().unwrap_or(0);
                let out_counts: Vec<u32> = (0..=max_allele).map(|a| counts.get(&a).copied().unwrap_or(0)).collect();
                MathUtils::cdf_from_counts(&out_counts)
            })
            .collect();

        let mut merged: Vec<HapPair> = (0..n_samples)
            .map(|_| HapPair { hap1: vec![0; n_markers], hap2: vec![0; n_markers] })
            .collect();

        for (w_idx, &(start, end)) in sub_windows.iter().enumerate() {
            let order: Vec<usize> = (start..end).collect();
            let mut rng_f = SeedDerivation::rng_for_iteration(self.params.seed, w_idx as u32);
            let mut rng_r = SeedDerivation::rng_for_iteration(self.params.seed, w_idx as u32 + 10_000);
            let sub_genotypes: Vec<Vec<(i32, i32)>> =
                genotypes.iter().map(|g| order.iter().map(|&m| g[m]).collect()).collect();
            let sub_ref: Vec<Vec<i32>> =
                input.reference_gt.iter().map(|r| order.iter().map(|&m| r[m]).collect()).collect();
            let sub_cdf: Vec<Vec<f64>> = order.iter().map(|&m| allele_cdf[m].clone()).collect();

            let fwd = GreedyPhaser::phase(&order, n_samples, &sub_genotypes, &sub_ref, &sub_cdf, &mut rng_f);
            let rev_order: Vec<usize> = order.iter().rev().copied().collect();
            let rev_sub_genotypes: Vec<Vec<(i32, i32)>> =
                genotypes.iter().map(|g| rev_order.iter().map(|&m| g[m]).collect()).collect();
            let rev_sub_ref: Vec<Vec<i32>> =
                input.reference_gt.iter().map(|r| rev_order.iter().map(|&m| r[m]).collect()).collect();
            let rev_sub_cdf: Vec<Vec<f64>> = rev_order.iter().map(|&m| allele_cdf[m].clone()).collect();
            let mut rev = GreedyPhaser::phase(&rev_order, n_samples, &rev_sub_genotypes, &rev_sub_ref, &rev_sub_cdf, &mut rng_r);
            for pair in &mut rev {
                pair.hap1.reverse();
                pair.hap2.reverse();
            }

            let overlap_len = (self.params.window_overlap_cm * 4.0).ceil() as usize;
            let overlap_positions: Vec<usize> = (0..order.len().min(overlap_len.max(1))).collect();

            for s in 0..n_samples {
                let mut rev_pair = rev[s].clone();
                if Reconciler::should_swap(&fwd[s], &rev_pair, &overlap_positions) {
                    Reconciler::swap(&mut rev_pair);
                }
                for (i, &m) in order.iter().enumerate() {
                    let use_fwd = i < order.len() / 2;
                    let (a1, a2) = if use_fwd {
                        (fwd[s].hap1[i], fwd[s].hap2[i])
                    } else {
                        (rev_pair.hap1[i], rev_pair.hap2[i])
                    };
                    merged[s].hap1[m] = a1;
                    merged[s].hap2[m] = a2;
                }
            }
        }

        let n_clusters_hint = n_markers;
        let mut phases: Vec<SamplePhase> = merged
            .into_iter()
            .map(|pair| SamplePhase {
                hap1: pair.hap1,
                hap2: pair.hap2,
                cluster_types: vec![ClustType::UnphasedHet; n_clusters_hint],
            })
            .collect();

        for (s, phase) in phases.iter_mut().enumerate() {
            let (h1, h2) = input.samples.hap_pair(s);
            ResultAssembler::splice_overlap(
                phase,
                &input.target_gt[h1][..input.overlap_markers],
                &input.target_gt[h2][..input.overlap_markers],
            );
        }
        phases
    }

    /// Runs the PBWT forward/reverse pass one step at a time (§4.B coded
    /// steps, not raw per-marker alleles) and, at every step, draws each
    /// target haplotype's candidate from the live state and feeds it into
    /// that sample's composite-reference builder (§4.D + §4.E).
    #[allow(clippy::too_many_arguments)]
    fn build_composite_panels(
        fixed: &WindowFixedData,
        n_real_haps: usize,
        n_samples: usize,
        n_ref: usize,
        n_markers: usize,
        forward: bool,
        params: &PhasingParameters,
        median_cm: f64,
        iter: u32,
        cap: usize,
        k: usize,
    ) -> Vec<Vec<CompositeReference>> {
        let n_steps = fixed.steps.len();
        let mut state = PbwtState::initial(n_real_haps);
        let sample_of_hap = move |h: u32| -> usize {
            if (h as usize) < n_ref {
                usize::MAX
            } else {
                ((h as usize) - n_ref) / 2
            }
        };
        let min_steps = params.min_steps(params.ibs_step_cm(median_cm));
        let mut sessions: Vec<CompositeBuilderSession> =
            (0..n_samples).map(|_| CompositeBuilderSession::new(k, min_steps, forward, n_markers)).collect();
        let mut rngs: Vec<_> = (0..n_samples).map(|s| SeedDerivation::rng_for_sample(params.seed, iter, s)).collect();

        let step_marker = |proc_idx: usize| -> usize {
            let phys = if forward { proc_idx } else { n_steps - 1 - proc_idx };
            fixed.steps.step(phys).start
        };

        for t in 0..n_steps {
            let phys = if forward { t } else { n_steps - 1 - t };
            let coded = fixed.coded_steps.step(phys);
            if forward {
                state.update_forward(t, &coded.hap_to_seq, coded.alphabet_size);
            } else {
                state.update_reverse(t, &coded.hap_to_seq, coded.alphabet_size);
            }

            for s in 0..n_samples {
                let target_hap1 = (n_ref + 2 * s) as u32;
                if let Some(cand) = CandidateSelector::select_one(
                    &state,
                    target_hap1,
                    s,
                    sample_of_hap,
                    Some(&fixed.ibs2),
                    0,
                    n_markers,
                    cap,
                    &mut rngs[s],
                ) {
                    sessions[s].observe(t, cand, step_marker);
                }
            }
        }

        sessions
            .into_iter()
            .enumerate()
            .map(|(s, session)| {
                let seed = SeedDerivation::for_sample(params.seed, iter, s);
                session.finish(seed, n_real_haps, move |h| sample_of_hap(h) == s)
            })
            .collect()
    }

    /// Builds the final PBWT state for a single full pass, stepping
    /// through `StepList`/`CodedSteps` rather than raw per-marker alleles
    /// (§4.B, §4.D). Used where only the finished state is needed (the
    /// stage-2 rare-variant pass), unlike `build_composite_panels`, which
    /// needs the state at every intermediate step.
    fn build_pbwt_state_via_steps(fixed: &WindowFixedData, n_real_haps: usize, forward: bool) -> PbwtState {
        let n_steps = fixed.steps.len();
        let mut state = PbwtState::initial(n_real_haps);
        for t in 0..n_steps {
            let phys = if forward { t } else { n_steps - 1 - t };
            let coded = fixed.coded_steps.step(phys);
            if forward {
                state.update_forward(t, &coded.hap_to_seq, coded.alphabet_size);
            } else {
                state.update_reverse(t, &coded.hap_to_seq, coded.alphabet_size);
            }
        }
        state
    }

    #[allow(clippy::too_many_arguments)]
    fn phase_sample_iteration(
        sample: usize,
        phase: &mut SamplePhase,
        partition: &mut ClusterPartition,
        store: &HaplotypeStore,
        fixed: &WindowFixedData,
        n_real_haps: usize,
        k: usize,
        params: &PhasingParameters,
        iter: u32,
        lr_threshold: f64,
        swap_counters: &SwapCounters,
        mu_acc: &mut MuAccumulator,
        r_acc: &mut RAccumulator,
    ) {
        let base = n_real_haps + sample * k;
        let panel: Vec<u32> = (0..k).map(|j| (base + j) as u32).collect();
        let n_panel = panel.len();

        let in_subset = params.em
            && IterationDriver::in_reestimation_subset(sample, iter, params.seed, REESTIMATION_SAMPLE_FRACTION);

        let clusters = partition.clusters().to_vec();
        let n_clusters = clusters.len();
        if n_clusters == 0 {
            return;
        }

        // Forward pass: cache the state vector after every cluster so the
        // backward pass below can combine them into real two-sided
        // posteriors instead of reusing the forward vectors twice (§4.F).
        let mut fwd1_cache: Vec<Vec<f64>> = Vec::with_capacity(n_clusters);
        let mut fwd2_cache: Vec<Vec<f64>> = Vec::with_capacity(n_clusters);
        let mut fwd1 = LiStephensHmm::uniform_state(n_panel);
        let mut fwd2 = LiStephensHmm::uniform_state(n_panel);
        let mut last1 = 1.0;
        let mut last2 = 1.0;
        for cluster in &clusters {
            let len = cluster.size as usize;
            let mismatch = LiStephensHmm::cluster_mismatch(params.rare_fraction.max(1e-4), len);
            let p = LiStephensHmm::jump_prob(1.0 / params.ne.max(1.0), 0.01 * len as f64);
            let uninformative = matches!(cluster.clust_type, ClustType::MissingGt | ClustType::MaskedHet);
            let target_a1 = phase.hap1[cluster.start];
            let target_a2 = phase.hap2[cluster.start];

            last1 = LiStephensHmm::forward_step(&mut fwd1, last1, p, mismatch, |kk| {
                uninformative || store.allele(panel[kk] as usize, cluster.start) as i32 == target_a1
            });
            last2 = LiStephensHmm::forward_step(&mut fwd2, last2, p, mismatch, |kk| {
                uninformative || store.allele(panel[kk] as usize, cluster.start) as i32 == target_a2
            });
            fwd1_cache.push(fwd1.clone());
            fwd2_cache.push(fwd2.clone());

            if in_subset && cluster.clust_type == ClustType::Homozygous {
                let mismatching = (0..n_panel)
                    .filter(|&kk| store.allele(panel[kk] as usize, cluster.start) as i32 != target_a1)
                    .count();
                mu_acc.push(len as u64, (mismatching as f64 / n_panel as f64) * len as f64);
            }
        }

        // Backward pass: `bwd_cache[c]` folds in every cluster after `c`,
        // so combined with `fwd_cache[c]` (every cluster up to and
        // including `c`) it gives the full-chain marginal at `c` without
        // double-counting cluster `c`'s own emission.
        let mut bwd1_cache: Vec<Vec<f64>> = vec![Vec::new(); n_clusters];
        let mut bwd2_cache: Vec<Vec<f64>> = vec![Vec::new(); n_clusters];
        let mut bwd1 = LiStephensHmm::uniform_state(n_panel);
        let mut bwd2 = LiStephensHmm::uniform_state(n_panel);
        bwd1_cache[n_clusters - 1] = bwd1.clone();
        bwd2_cache[n_clusters - 1] = bwd2.clone();
        let mut last1 = 1.0;
        let mut last2 = 1.0;
        for c in (0..n_clusters - 1).rev() {
            let next = &clusters[c + 1];
            let len = next.size as usize;
            let mismatch = LiStephensHmm::cluster_mismatch(params.rare_fraction.max(1e-4), len);
            let p = LiStephensHmm::jump_prob(1.0 / params.ne.max(1.0), 0.01 * len as f64);
            let uninformative = matches!(next.clust_type, ClustType::MissingGt | ClustType::MaskedHet);
            let target_a1 = phase.hap1[next.start];
            let target_a2 = phase.hap2[next.start];

            last1 = LiStephensHmm::backward_step(&mut bwd1, last1, p, mismatch, |kk| {
                uninformative || store.allele(panel[kk] as usize, next.start) as i32 == target_a1
            });
            last2 = LiStephensHmm::backward_step(&mut bwd2, last2, p, mismatch, |kk| {
                uninformative || store.allele(panel[kk] as usize, next.start) as i32 == target_a2
            });
            bwd1_cache[c] = bwd1.clone();
            bwd2_cache[c] = bwd2.clone();
        }

        for (c, cluster) in clusters.iter().enumerate() {
            match cluster.clust_type {
                ClustType::MissingGt | ClustType::MaskedHet => {
                    let marker = fixed.markers.marker(cluster.start);
                    let a1 = LiStephensHmm::impute_allele(
                        &fwd1_cache[c],
                        &bwd1_cache[c],
                        |kk| store.allele(panel[kk] as usize, cluster.start),
                        marker.n_alleles as u32,
                    );
                    let a2 = LiStephensHmm::impute_allele(
                        &fwd2_cache[c],
                        &bwd2_cache[c],
                        |kk| store.allele(panel[kk] as usize, cluster.start),
                        marker.n_alleles as u32,
                    );
                    for m in cluster.start..cluster.end() {
                        phase.hap1[m] = a1 as i32;
                        phase.hap2[m] = a2 as i32;
                    }
                }
                ClustType::UnphasedHet => {
                    let (fwd1, fwd2, bwd1, bwd2) = (&fwd1_cache[c], &fwd2_cache[c], &bwd1_cache[c], &bwd2_cache[c]);
                    if in_subset {
                        let mut p11 = 0.0;
                        let mut p12 = 0.0;
                        let mut p21 = 0.0;
                        let mut p22 = 0.0;
                        for kk in 0..n_panel {
                            p11 += fwd1[kk] * bwd1[kk];
                            p12 += fwd1[kk] * bwd2[kk];
                            p21 += fwd2[kk] * bwd1[kk];
                            p22 += fwd2[kk] * bwd2[kk];
                        }
                        let no_switch_mass = p11 * p22;
                        let switch_mass = p12 * p21;
                        if (switch_mass + no_switch_mass) > 0.0 {
                            r_acc.push(0.01 * cluster.size as f64, switch_mass / (switch_mass + no_switch_mass));
                        }
                    }

                    let (swap, ratio) = LiStephensHmm::swap_decision(fwd1, fwd2, bwd1, bwd2);
                    let adopted = swap && ratio >= lr_threshold;
                    swap_counters.record(adopted);
                    if adopted && iter >= params.burnin {
                        swap_haplotype_range(phase, cluster.start..cluster.end());
                    }
                }
                _ => {}
            }
        }

        if lr_threshold < params.mask_trailing_lr_cap {
            IterationDriver::mask_trailing_unphased_runs(partition, &fixed.marker_pos_bp, params.mask_trailing_run_max_bp);
        }
    }

    fn stage_two_rare_pass(
        &self,
        input: &WindowInput,
        store: &HaplotypeStore,
        fixed: &WindowFixedData,
        phases: &mut [SamplePhase],
        rare_carriers: &RareCarrierIndex,
        n_ref: usize,
        n_real_haps: usize,
    ) {
        let n_markers = input.n_markers();
        let cap = self.params.candidate_cap_stage2;
        let state = Self::build_pbwt_state_via_steps(fixed, n_real_haps, true);

        for (s, phase) in phases.iter_mut().enumerate() {
            let sample_of_hap = |h: u32| -> usize {
                if (h as usize) < n_ref {
                    usize::MAX
                } else {
                    ((h as usize) - n_ref) / 2
                }
            };
            let target_hap1 = (n_ref + 2 * s) as u32;
            let candidates =
                CandidateSelector::select(&state, target_hap1, s, sample_of_hap, Some(&fixed.ibs2), 0, n_markers, cap);

            for m in 0..n_markers {
                let a = phase.hap1[m];
                if a >= 0 {
                    let marker = input.markers.marker(m);
                    let threshold = self.params.rare_carrier_threshold(input.samples.n_samples());
                    let carrier_count = candidates
                        .iter()
                        .filter(|&&h| store.allele(h as usize, m) as i32 == a)
                        .count();
                    if carrier_count > 0 && carrier_count <= threshold && (a as u32) < marker.n_alleles as u32 {
                        rare_carriers.record(m, a as u32, target_hap1);
                    }
                }
            }
        }
    }
}
