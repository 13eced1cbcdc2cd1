/// Small numeric helpers shared by the PBWT, composite and HMM layers.
///
/// Kept free of external math-crate dependencies (no `statrs`): everything
/// here is a handful of lines of arithmetic the standard library already
/// provides, and the teacher only reaches for `statrs` when it needs special
/// functions (`ln_gamma`, `digamma`) that this engine never evaluates.
pub struct MathUtils;

impl MathUtils {
    /// Map function `p = 1 - exp(-r * d)`: probability of at least one
    /// recombination over genetic distance `d` (cM, converted to Morgans by
    /// the caller) given intensity `r`.
    pub fn recomb_prob(r: f64, d: f64) -> f64 {
        debug_assert!(r > 0.0);
        debug_assert!(d >= 0.0);
        -f64::exp_m1(-r * d)
    }

    pub fn median(values: &mut [f64]) -> f64 {
        debug_assert!(!values.is_empty());
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mid = values.len() / 2;
        if values.len() % 2 == 0 {
            0.5 * (values[mid - 1] + values[mid])
        } else {
            values[mid]
        }
    }

    /// Sum of a slice, used by the forward/backward rescaling step and by
    /// the sort-then-sum parameter aggregation (§4.H: "sort by value, then
    /// sum" for bit-reproducible reduction across an unordered thread set).
    pub fn sorted_sum(values: &mut [f64]) -> f64 {
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        values.iter().sum()
    }

    /// Draw an index from a discrete CDF (non-decreasing, last entry ~1.0)
    /// given a uniform draw `u` in `[0, 1)`. Used for missing-allele
    /// imputation from the observed allele-count distribution (§4.G) and
    /// the composite-builder's empty-candidate random fill (§4.E).
    pub fn sample_cdf(cdf: &[f64], u: f64) -> usize {
        debug_assert!(!cdf.is_empty());
        match cdf.iter().position(|&c| u < c) {
            Some(i) => i,
            None => cdf.len() - 1,
        }
    }

    pub fn cdf_from_counts(counts: &[u32]) -> Vec<f64> {
        let total: u32 = counts.iter().sum();
        let mut acc = 0u32;
        let total_f = (total.max(1)) as f64;
        counts
            .iter()
            .map(|&c| {
                acc += c;
                acc as f64 / total_f
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recomb_prob_is_between_zero_and_one() {
        let p = MathUtils::recomb_prob(1.0, 0.01);
        assert!(p > 0.0 && p < 1.0);
    }

    #[test]
    fn median_odd_and_even() {
        let mut odd = vec![3.0, 1.0, 2.0];
        assert_eq!(MathUtils::median(&mut odd), 2.0);
        let mut even = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(MathUtils::median(&mut even), 2.5);
    }

    #[test]
    fn cdf_from_counts_covers_full_range() {
        let cdf = MathUtils::cdf_from_counts(&[1, 1, 2]);
        assert!((cdf[2] - 1.0).abs() < 1e-9);
        assert_eq!(MathUtils::sample_cdf(&cdf, 0.99), 2);
        assert_eq!(MathUtils::sample_cdf(&cdf, 0.0), 0);
    }
}
