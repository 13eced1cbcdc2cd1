use crate::model::marker::{Marker, MarkerList, MISSING_ALLELE};
use crate::model::sample::SampleList;
use crate::utils::errors::{PhasingError, PhasingResult};

/// A genetic-map lookup, supplied by the out-of-scope I/O subsystem (§6).
/// The core only ever calls `gen_pos`; the inverse mapping belongs to the
/// window-slicing layer, not the phasing engine.
pub trait GeneticMap {
    fn gen_pos(&self, chrom: u32, base_pos: u32) -> f64;
}

/// A constant recombination-rate map, useful for tests and for callers that
/// have no finer-grained map (falls back to `ne`-derived uniform spacing).
pub struct UniformGeneticMap {
    pub cm_per_base: f64,
}

impl GeneticMap for UniformGeneticMap {
    fn gen_pos(&self, _chrom: u32, base_pos: u32) -> f64 {
        base_pos as f64 * self.cm_per_base
    }
}

/// One window's input, as handed to the core by the (out-of-scope) sliding
/// window reader: markers, the target genotype matrix, an optional fully
/// phased reference panel, and a phased-overlap prefix already resolved by
/// the previous window (§6).
pub struct WindowInput {
    pub markers: MarkerList,
    pub samples: SampleList,
    /// `target_gt[hap][marker]`: diploid alleles laid out as the two
    /// haplotype rows per sample (`2s`, `2s+1`), `-1` for missing, possibly
    /// unphased (the engine does not assume any input ordering between the
    /// two rows of a heterozygote).
    pub target_gt: Vec<Vec<i32>>,
    /// `reference_gt[hap][marker]`, complete and already phased. Empty if
    /// no reference panel is supplied.
    pub reference_gt: Vec<Vec<i32>>,
    /// Genetic position (cM) of each marker, precomputed from the map for
    /// this window's markers.
    pub gen_pos_cm: Vec<f64>,
    /// Number of markers at the start of the window already phased from
    /// the previous window's overlap; those columns of `target_gt` must be
    /// complete and non-missing.
    pub overlap_markers: usize,
}

impl WindowInput {
    pub fn n_markers(&self) -> usize {
        self.markers.len()
    }

    pub fn n_target_haps(&self) -> usize {
        self.samples.n_haps()
    }

    pub fn n_reference_haps(&self) -> usize {
        self.reference_gt.len()
    }

    pub fn validate(&self) -> PhasingResult<()> {
        if self.markers.is_empty() || self.samples.n_samples() == 0 {
            return Err(PhasingError::EmptyWindow);
        }
        if self.gen_pos_cm.len() != self.markers.len() {
            return Err(PhasingError::UnparseableGeneticMap {
                reason: format!(
                    "expected {} genetic positions, got {}",
                    self.markers.len(),
                    self.gen_pos_cm.len()
                ),
            });
        }
        for w in self.gen_pos_cm.windows(2) {
            if w[1] < w[0] {
                return Err(PhasingError::UnparseableGeneticMap {
                    reason: "genetic positions are not monotone non-decreasing".to_string(),
                });
            }
        }
        if self.target_gt.len() != self.n_target_haps() {
            return Err(PhasingError::OverlapMismatch {
                reason: format!(
                    "target genotype matrix has {} rows, expected {}",
                    self.target_gt.len(),
                    self.n_target_haps()
                ),
            });
        }
        for (h, row) in self.target_gt.iter().enumerate() {
            if row.len() != self.n_markers() {
                return Err(PhasingError::OverlapMismatch {
                    reason: format!(
                        "target haplotype {} has {} markers, expected {}",
                        h,
                        row.len(),
                        self.n_markers()
                    ),
                });
            }
        }
        for row in &self.reference_gt {
            if row.len() != self.n_markers() {
                return Err(PhasingError::OverlapMismatch {
                    reason: "reference haplotype row length does not match marker count"
                        .to_string(),
                });
            }
        }
        if self.overlap_markers > self.n_markers() {
            return Err(PhasingError::OverlapMismatch {
                reason: "overlap_markers exceeds window marker count".to_string(),
            });
        }
        for h in 0..self.target_gt.len() {
            for m in 0..self.overlap_markers {
                if self.target_gt[h][m] == MISSING_ALLELE {
                    return Err(PhasingError::OverlapMismatch {
                        reason: format!(
                            "overlap marker {} of haplotype {} is missing, must be fully phased",
                            m, h
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn marker(&self, m: usize) -> &Marker {
        self.markers.marker(m)
    }
}
