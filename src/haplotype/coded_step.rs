use indexmap::IndexMap;
use rayon::prelude::*;

use crate::haplotype::step::StepList;
use crate::haplotype::store::HaplotypeStore;

/// Per-step symbol assignment: `hap_to_seq[h]` is the dense sequence index
/// of haplotype `h`'s allele-content over the step, and `alphabet_size` is
/// the number of distinct contents observed (§4.B "Coded steps").
pub struct CodedStep {
    pub hap_to_seq: Vec<u32>,
    pub alphabet_size: u32,
}

impl CodedStep {
    fn build(store: &HaplotypeStore, n_haps: usize, start: usize, end: usize) -> Self {
        let mut interner: IndexMap<u64, u32> = IndexMap::new();
        let mut hap_to_seq = vec![0u32; n_haps];
        for h in 0..n_haps {
            let key = store.hash(h, start, end);
            let next_id = interner.len() as u32;
            let id = *interner.entry(key).or_insert(next_id);
            hap_to_seq[h] = id;
        }
        CodedStep {
            hap_to_seq,
            alphabet_size: interner.len() as u32,
        }
    }
}

/// Codes every step of a `StepList` against a `HaplotypeStore`. Step
/// batches are independent, so this fans out with `rayon` (§4.B
/// "Parallelizable by step batches").
pub struct CodedSteps {
    steps: Vec<CodedStep>,
}

impl CodedSteps {
    /// `n_haps` is the real-haplotype universe size (reference + target
    /// haplotypes), not necessarily `store.n_haps()`: a store may carry
    /// extra scratch rows reserved for composite-reference materialization
    /// that must never become their own coded-step symbol.
    pub fn build(store: &HaplotypeStore, steps: &StepList, n_haps: usize) -> Self {
        let coded: Vec<CodedStep> = (0..steps.len())
            .into_par_iter()
            .map(|t| {
                let s = steps.step(t);
                CodedStep::build(store, n_haps, s.start, s.end)
            })
            .collect();
        CodedSteps { steps: coded }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn step(&self, t: usize) -> &CodedStep {
        &self.steps[t]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::marker::{Marker, MarkerList};
    use std::sync::Arc;

    #[test]
    fn identical_haplotypes_share_a_symbol() {
        let markers: Vec<Marker> = (0..4).map(|i| Marker::new(1, i * 10, 2).unwrap()).collect();
        let ml = Arc::new(MarkerList::new(markers).unwrap());
        let mut store = HaplotypeStore::new(4, ml.clone());
        for m in 0..4 {
            store.set_allele(0, m, 1);
            store.set_allele(1, m, 1);
            store.set_allele(2, m, 0);
            store.set_allele(3, m, (m % 2) as u32);
        }
        let steps = crate::haplotype::step::StepList::build(&vec![0.0, 0.01, 0.02, 0.03], 0.05).unwrap();
        let coded = CodedSteps::build(&store, &steps, store.n_haps());
        let c0 = coded.step(0);
        assert_eq!(c0.hap_to_seq[0], c0.hap_to_seq[1]);
        assert_ne!(c0.hap_to_seq[0], c0.hap_to_seq[2]);
        assert!(c0.alphabet_size >= 2);
    }
}
