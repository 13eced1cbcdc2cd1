use std::collections::HashMap;
use std::sync::Mutex;

use crate::haplotype::cluster::ClustType;

/// Per-sample phase state carried across iterations: two haplotype allele
/// sequences plus the cluster-type byte array driving the next iteration's
/// HMM (§4.J).
#[derive(Debug, Clone)]
pub struct SamplePhase {
    pub hap1: Vec<i32>,
    pub hap2: Vec<i32>,
    pub cluster_types: Vec<ClustType>,
}

impl SamplePhase {
    pub fn new(n_markers: usize, n_clusters: usize) -> Self {
        SamplePhase {
            hap1: vec![0; n_markers],
            hap2: vec![0; n_markers],
            cluster_types: vec![ClustType::UnphasedHet; n_clusters],
        }
    }
}

/// Thread-safe per-marker carrier index for rare alleles, populated by
/// stage 2 (§4.J, §5 "Rare-allele carrier lists are individually
/// mutex-guarded"). One lock per marker so concurrent stage-2 workers on
/// different markers never contend.
pub struct RareCarrierIndex {
    by_marker: Vec<Mutex<HashMap<u32, Vec<u32>>>>,
}

impl RareCarrierIndex {
    pub fn new(n_markers: usize) -> Self {
        RareCarrierIndex {
            by_marker: (0..n_markers).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    pub fn record(&self, marker: usize, allele: u32, hap_id: u32) {
        let mut guard = self.by_marker[marker].lock().unwrap();
        guard.entry(allele).or_default().push(hap_id);
    }

    pub fn carriers(&self, marker: usize, allele: u32) -> Vec<u32> {
        let guard = self.by_marker[marker].lock().unwrap();
        guard.get(&allele).cloned().unwrap_or_default()
    }
}

/// Per-marker, per-sample phased record, the row-major output shape (§4.J,
/// §6 "Output from the core").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhasedGenotype {
    pub a1: i32,
    pub a2: i32,
}

/// Rotates column-major (`SamplePhase` per sample) into row-major (per
/// marker, all samples) records for emission (§4.J, §9 "Row-major-to-
/// column-major assembly with disjoint writers").
pub struct ResultAssembler;

impl ResultAssembler {
    pub fn transpose_to_row_major(phases: &[SamplePhase], n_markers: usize) -> Vec<Vec<PhasedGenotype>> {
        let mut rows: Vec<Vec<PhasedGenotype>> = (0..n_markers)
            .map(|_| Vec::with_capacity(phases.len()))
            .collect();
        for phase in phases {
            for (m, row) in rows.iter_mut().enumerate() {
                row.push(PhasedGenotype {
                    a1: phase.hap1[m],
                    a2: phase.hap2[m],
                });
            }
        }
        rows
    }

    /// Splices a previous window's already-phased overlap prefix verbatim
    /// into `phase`'s leading markers (§6 input, §8 "window overlap
    /// splice" scenario).
    pub fn splice_overlap(phase: &mut SamplePhase, overlap_hap1: &[i32], overlap_hap2: &[i32]) {
        let n = overlap_hap1.len().min(phase.hap1.len());
        phase.hap1[..n].copy_from_slice(&overlap_hap1[..n]);
        phase.hap2[..n].copy_from_slice(&overlap_hap2[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transpose_round_trips_sample_major_to_marker_major() {
        let mut p0 = SamplePhase::new(3, 1);
        p0.hap1 = vec![0, 1, 0];
        p0.hap2 = vec![1, 0, 1];
        let mut p1 = SamplePhase::new(3, 1);
        p1.hap1 = vec![1, 1, 1];
        p1.hap2 = vec![0, 0, 0];
        let rows = ResultAssembler::transpose_to_row_major(&[p0, p1], 3);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec![PhasedGenotype { a1: 0, a2: 1 }, PhasedGenotype { a1: 1, a2: 0 }]);
        assert_eq!(rows[2], vec![PhasedGenotype { a1: 0, a2: 1 }, PhasedGenotype { a1: 1, a2: 0 }]);
    }

    #[test]
    fn overlap_splice_overwrites_only_prefix() {
        let mut phase = SamplePhase::new(5, 1);
        phase.hap1 = vec![9, 9, 9, 9, 9];
        phase.hap2 = vec![9, 9, 9, 9, 9];
        ResultAssembler::splice_overlap(&mut phase, &[0, 1], &[1, 0]);
        assert_eq!(&phase.hap1[..2], &[0, 1]);
        assert_eq!(&phase.hap2[..2], &[1, 0]);
        assert_eq!(&phase.hap1[2..], &[9, 9, 9]);
    }

    #[test]
    fn rare_carrier_index_accumulates_per_marker() {
        let idx = RareCarrierIndex::new(2);
        idx.record(0, 3, 100);
        idx.record(0, 3, 101);
        idx.record(1, 2, 200);
        assert_eq!(idx.carriers(0, 3), vec![100, 101]);
        assert_eq!(idx.carriers(1, 2), vec![200]);
        assert!(idx.carriers(0, 2).is_empty());
    }
}
