use std::sync::OnceLock;

/// Explicit enumeration of the configurable parameters from spec.md §6,
/// plus the named thresholds §4.C/§4.D/§4.E describe in prose. The teacher
/// configures its engines with plain structs built by a `make`-style
/// constructor (see `GenotypingEngine::make`) rather than a builder-derive
/// crate, so this follows the same shape instead of adding `derive_builder`.
#[derive(Debug, Clone)]
pub struct PhasingParameters {
    pub nthreads: usize,
    pub burnin: u32,
    pub iterations: u32,
    pub initial_lr: f64,
    /// `K`, max composite references per sample in stage 1; stage 2 uses
    /// `K / 2` per haplotype.
    pub phase_states: usize,
    /// Multiplier on the median inter-marker genetic distance -> step size
    /// delta in cM.
    pub step_scale: f64,
    /// Fraction-of-samples threshold: an allele is rare iff carriers <=
    /// `nSamples * rare` (floor of 3).
    pub rare_fraction: f64,
    /// Effective population size, seeds initial `r`.
    pub ne: f64,
    pub em: bool,
    pub seed: u64,
    pub window_overlap_cm: f64,
    pub buffer: usize,

    // IBS2 diagnostic-marker thresholds (§4.C step 1).
    pub ibs2_maf_min: f64,
    pub ibs2_missing_max: f64,
    pub ibs2_marker_spacing_cm: f64,
    pub ibs2_window_min_markers: usize,
    pub ibs2_merge_cm: f64,
    pub ibs2_min_segment_cm: f64,

    // Cluster partition caps (§4.B).
    pub cluster_cm_cap: f64,
    pub cluster_size_cap: u8,

    // PBWT candidate-cap schedule (§4.D).
    pub candidate_cap_burnin: usize,
    pub candidate_cap_min: usize,
    pub candidate_cap_stage2: usize,

    // Likelihood-ratio schedule (§4.I).
    pub lr_final: f64,
    pub mask_trailing_run_max_bp: u32,
    /// Trailing-run masking only engages once `lrThreshold` has decayed
    /// below this cap — early iterations still have too little evidence
    /// to prefer re-imputation over the ordinary flip test. Set close to
    /// `lr_final`, a little above it so masking is live for the last few
    /// post-burn-in iterations rather than only the final one.
    pub mask_trailing_lr_cap: f64,

    /// `minSteps` floor for composite-reference eviction (§4.E):
    /// `max(200, ceil(1 / stepSize_cM))`.
    pub min_steps_floor: u32,

    ibs_step_cm: OnceLock<f64>,
}

impl Default for PhasingParameters {
    fn default() -> Self {
        PhasingParameters {
            nthreads: 1,
            burnin: 5,
            iterations: 5,
            initial_lr: 50.0,
            phase_states: 280,
            step_scale: 1.0,
            rare_fraction: 0.001,
            ne: 1_000_000.0,
            em: true,
            seed: 0,
            window_overlap_cm: 0.5,
            buffer: 50,

            ibs2_maf_min: 0.1,
            ibs2_missing_max: 0.1,
            ibs2_marker_spacing_cm: 0.02,
            ibs2_window_min_markers: 50,
            ibs2_merge_cm: 4.0,
            ibs2_min_segment_cm: 2.0,

            cluster_cm_cap: 0.005,
            cluster_size_cap: 255,

            candidate_cap_burnin: 100,
            candidate_cap_min: 5,
            candidate_cap_stage2: 10,

            lr_final: 1.0,
            mask_trailing_run_max_bp: 3000,
            mask_trailing_lr_cap: 2.0,

            min_steps_floor: 200,

            ibs_step_cm: OnceLock::new(),
        }
    }
}

impl PhasingParameters {
    /// Minimum carrier count below which an allele is "rare" (§4.J, §6):
    /// `min(ceil(nSamples * rare), 3..)` — at least 3, consistent with the
    /// "max 3.." phrasing in the option table.
    pub fn rare_carrier_threshold(&self, n_samples: usize) -> usize {
        ((n_samples as f64) * self.rare_fraction).ceil().max(3.0) as usize
    }

    /// Composite-reference eviction floor (§4.E).
    pub fn min_steps(&self, step_size_cm: f64) -> u32 {
        debug_assert!(step_size_cm > 0.0);
        self.min_steps_floor.max((1.0 / step_size_cm).ceil() as u32)
    }

    /// Candidate cap for a given burn-in/post-burn-in iteration index,
    /// decaying linearly from `candidate_cap_burnin` toward
    /// `candidate_cap_min` across burn-in (§4.D "Candidate-cap schedule").
    pub fn candidate_cap_for_iteration(&self, iter: u32, burnin: u32) -> usize {
        if burnin == 0 {
            return self.candidate_cap_min;
        }
        let t = (iter.min(burnin) as f64) / (burnin as f64);
        let cap = self.candidate_cap_burnin as f64
            + t * (self.candidate_cap_min as f64 - self.candidate_cap_burnin as f64);
        cap.round().max(2.0) as usize
    }

    /// `ibsStep`: the derived, cached step size in cM, computed once per
    /// window from `step_scale * median inter-marker genetic distance`.
    pub fn ibs_step_cm(&self, median_intermarker_cm: f64) -> f64 {
        if let Some(v) = self.ibs_step_cm.get() {
            return *v;
        }
        let v = (self.step_scale * median_intermarker_cm).max(1.0e-6);
        let _ = self.ibs_step_cm.set(v);
        v
    }

    /// Likelihood-ratio threshold for iteration `iter` of `total`
    /// post-burn-in iterations (§4.I): `+inf` during burn-in, decaying
    /// geometrically from `initial_lr` down to `lr_final` at the final
    /// iteration.
    pub fn lr_threshold(&self, iter: u32, burnin: u32, total_post_burnin: u32) -> f64 {
        if iter < burnin {
            return f64::INFINITY;
        }
        if total_post_burnin <= 1 {
            return self.lr_final;
        }
        let post_iter = (iter - burnin).min(total_post_burnin - 1);
        let t = post_iter as f64 / (total_post_burnin - 1) as f64;
        (self.initial_lr.ln() * (1.0 - t) + self.lr_final.ln() * t).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_cap_decays_to_minimum() {
        let p = PhasingParameters::default();
        assert_eq!(p.candidate_cap_for_iteration(0, 5), p.candidate_cap_burnin);
        assert_eq!(p.candidate_cap_for_iteration(5, 5), p.candidate_cap_min);
    }

    #[test]
    fn lr_threshold_is_infinite_during_burnin_and_decays_after() {
        let p = PhasingParameters::default();
        assert!(p.lr_threshold(0, 5, 5).is_infinite());
        assert!((p.lr_threshold(5, 5, 5) - p.initial_lr).abs() < 1e-9);
        assert!((p.lr_threshold(9, 5, 5) - p.lr_final).abs() < 1e-9);
    }

    #[test]
    fn rare_carrier_threshold_has_floor_of_three() {
        let p = PhasingParameters::default();
        assert_eq!(p.rare_carrier_threshold(10), 3);
    }
}
