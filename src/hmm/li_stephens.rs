/// Haploid Li–Stephens HMM with rescaled forward/backward recursion (§4.F).
/// The HMM advances one genotype cluster at a time (not one marker at a
/// time): a homozygous cluster spanning `L` markers is folded into a single
/// transition/emission using the cluster-level mismatch approximation
/// below, while heterozygous and missing clusters are always singletons
/// (§4.B), so per-marker and per-cluster stepping coincide for them.
pub struct LiStephensHmm;

impl LiStephensHmm {
    /// `clustEm = min(0.5, L·μ)`, the per-cluster mismatch approximation
    /// used when a cluster folds `cluster_len` homozygous markers into one
    /// emission step.
    pub fn cluster_mismatch(mu: f64, cluster_len: usize) -> f64 {
        (cluster_len as f64 * mu).min(0.5)
    }

    /// Jump probability for a cluster-to-cluster transition spanning
    /// genetic distance `d_t` centimorgans, recombination intensity `r`.
    pub fn jump_prob(r: f64, d_t_cm: f64) -> f64 {
        -(-r * d_t_cm).exp_m1()
    }

    /// One forward step: `fwd[k] <- em(k)*(fwd[k]*(1-p)/lastSum + p/K)`.
    /// `is_match(k)` decides match/mismatch emission for state `k` at this
    /// cluster; returns the new `lastSum`.
    pub fn forward_step(
        fwd: &mut [f64],
        last_sum: f64,
        p: f64,
        mismatch_em: f64,
        is_match: impl Fn(usize) -> bool,
    ) -> f64 {
        let k = fwd.len() as f64;
        let mut new_sum = 0.0;
        for (kk, f) in fwd.iter_mut().enumerate() {
            let em = if is_match(kk) { 1.0 - mismatch_em } else { mismatch_em };
            let v = em * (*f * (1.0 - p) / last_sum + p / k);
            *f = v;
            new_sum += v;
        }
        new_sum
    }

    /// One backward step, moving from cluster `t+1` back to `t`: emission
    /// at `t+1` is applied first, then the result is rescaled and mixed
    /// with the uniform jump term.
    pub fn backward_step(
        bwd: &mut [f64],
        last_sum: f64,
        p: f64,
        mismatch_em: f64,
        is_match: impl Fn(usize) -> bool,
    ) -> f64 {
        let k = bwd.len() as f64;
        let mut tmp = vec![0.0; bwd.len()];
        for (kk, b) in bwd.iter().enumerate() {
            let em = if is_match(kk) { 1.0 - mismatch_em } else { mismatch_em };
            tmp[kk] = em * b;
        }
        let mut new_sum = 0.0;
        for (kk, b) in bwd.iter_mut().enumerate() {
            let v = tmp[kk] * (1.0 - p) / last_sum + p / k;
            *b = v;
            new_sum += v;
        }
        new_sum
    }

    pub fn uniform_state(n_states: usize) -> Vec<f64> {
        vec![1.0 / n_states as f64; n_states]
    }

    /// Swap decision at an unphased-heterozygote cluster (§4.F three-track
    /// variant): combine cached forward/backward vectors of tracks 1 and 2.
    /// Returns `(swap, winning_ratio)` where `winning_ratio` is the larger
    /// of `switch/noSwitch` and `noSwitch/switch` (used against
    /// `lrThreshold`).
    pub fn swap_decision(fwd1: &[f64], fwd2: &[f64], bwd1: &[f64], bwd2: &[f64]) -> (bool, f64) {
        let mut p11 = 0.0;
        let mut p12 = 0.0;
        let mut p21 = 0.0;
        let mut p22 = 0.0;
        for k in 0..fwd1.len() {
            p11 += fwd1[k] * bwd1[k];
            p12 += fwd1[k] * bwd2[k];
            p21 += fwd2[k] * bwd1[k];
            p22 += fwd2[k] * bwd2[k];
        }
        let no_switch = p11 * p22;
        let switch = p12 * p21;
        let swap = switch > no_switch;
        let ratio = if swap {
            if no_switch > 0.0 { switch / no_switch } else { f64::INFINITY }
        } else if switch > 0.0 {
            no_switch / switch
        } else {
            f64::INFINITY
        };
        (swap, ratio)
    }

    /// Imputed allele index at a missing/masked cluster: whichever track's
    /// marginal posterior `fwd[k]*bwd_missing[k]` summed by candidate
    /// allele is larger wins.
    pub fn impute_allele(
        fwd: &[f64],
        bwd_missing: &[f64],
        state_allele: impl Fn(usize) -> u32,
        n_alleles: u32,
    ) -> u32 {
        let mut mass = vec![0.0; n_alleles as usize];
        for k in 0..fwd.len() {
            let a = state_allele(k) as usize;
            if a < mass.len() {
                mass[a] += fwd[k] * bwd_missing[k];
            }
        }
        mass.iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i as u32)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_step_preserves_nonnegativity_and_scaling() {
        let mut fwd = LiStephensHmm::uniform_state(5);
        let mut last_sum = 1.0;
        for t in 0..10 {
            let match_state = t % 5;
            let new_sum = LiStephensHmm::forward_step(&mut fwd, last_sum, 0.1, 0.02, |k| k == match_state);
            let total: f64 = fwd.iter().sum();
            assert!((total - new_sum).abs() < 1e-9);
            assert!(fwd.iter().all(|&v| v >= 0.0));
            last_sum = new_sum;
        }
    }

    #[test]
    fn cluster_mismatch_is_capped_at_half() {
        assert!((LiStephensHmm::cluster_mismatch(0.01, 1) - 0.01).abs() < 1e-12);
        assert_eq!(LiStephensHmm::cluster_mismatch(0.2, 10), 0.5);
    }

    #[test]
    fn swap_decision_favours_dominant_configuration() {
        // strong evidence for track1<->state A, track2<->state B, no swap.
        let fwd1 = vec![0.9, 0.1];
        let fwd2 = vec![0.1, 0.9];
        let bwd1 = vec![0.9, 0.1];
        let bwd2 = vec![0.1, 0.9];
        let (swap, ratio) = LiStephensHmm::swap_decision(&fwd1, &fwd2, &bwd1, &bwd2);
        assert!(!swap);
        assert!(ratio > 1.0);
    }

    #[test]
    fn impute_allele_picks_highest_posterior_mass() {
        let fwd = vec![0.1, 0.8, 0.1];
        let bwd = vec![1.0, 1.0, 1.0];
        let state_allele = |k: usize| [0u32, 1, 0][k];
        let a = LiStephensHmm::impute_allele(&fwd, &bwd, state_allele, 2);
        assert_eq!(a, 1);
    }
}
