use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::model::marker::MarkerList;

const WORD_BITS: u64 = 64;

/// One bit-array per haplotype, packed at `b_m` bits per marker (§4.A).
/// `allele`/`set_allele` are the only read/write paths and only fail (via
/// panic) on out-of-range indices — a programmer-contract violation per
/// §7, not a recoverable `PhasingError`.
pub struct HaplotypeStore {
    markers: Arc<MarkerList>,
    n_haps: usize,
    words_per_hap: usize,
    bits: Vec<u64>,
}

impl HaplotypeStore {
    pub fn new(n_haps: usize, markers: Arc<MarkerList>) -> Self {
        let total_bits = markers.total_bits();
        // One extra guard word so a value straddling the final marker's
        // boundary never reads past the allocation.
        let words_per_hap = ((total_bits + WORD_BITS - 1) / WORD_BITS) as usize + 1;
        HaplotypeStore {
            markers,
            n_haps,
            words_per_hap,
            bits: vec![0u64; n_haps * words_per_hap],
        }
    }

    pub fn n_haps(&self) -> usize {
        self.n_haps
    }

    pub fn markers(&self) -> &MarkerList {
        &self.markers
    }

    pub fn allele(&self, hap: usize, m: usize) -> u32 {
        assert!(hap < self.n_haps, "haplotype index {} out of range", hap);
        assert!(m < self.markers.len(), "marker index {} out of range", m);
        let width = self.markers.marker(m).bits_per_allele();
        let offset = self.markers.sum_hap_bits(m);
        self.get_bits(hap, offset, width)
    }

    pub fn set_allele(&mut self, hap: usize, m: usize, a: u32) {
        assert!(hap < self.n_haps, "haplotype index {} out of range", hap);
        assert!(m < self.markers.len(), "marker index {} out of range", m);
        let width = self.markers.marker(m).bits_per_allele();
        debug_assert!(
            a < (1u32 << width.min(31)),
            "allele {} does not fit {}-bit marker {}",
            a,
            width,
            m
        );
        let offset = self.markers.sum_hap_bits(m);
        self.set_bits(hap, offset, width, a);
    }

    /// Deterministic hash of the packed bit range `[start, end)`, used as
    /// the key into the step coder (§4.B).
    pub fn hash(&self, hap: usize, start: usize, end: usize) -> u64 {
        assert!(start <= end && end <= self.markers.len());
        let mut hasher = DefaultHasher::new();
        if start == end {
            return hasher.finish();
        }
        let base = hap * self.words_per_hap;
        let start_bit = self.markers.sum_hap_bits(start);
        let end_bit = self.markers.sum_hap_bits(end);
        let start_word = (start_bit / WORD_BITS) as usize;
        let end_word = ((end_bit + WORD_BITS - 1) / WORD_BITS) as usize;
        for w in start_word..end_word {
            self.bits[base + w].hash(&mut hasher);
        }
        start_bit.hash(&mut hasher);
        end_bit.hash(&mut hasher);
        hasher.finish()
    }

    /// Bulk copy of markers `[start_marker, end_marker)` from `src_hap` to
    /// `dst_hap`, used when materialising composite-reference segments
    /// (§4.E).
    pub fn copy_range(&mut self, src_hap: usize, dst_hap: usize, start_marker: usize, end_marker: usize) {
        assert!(src_hap < self.n_haps && dst_hap < self.n_haps);
        assert!(start_marker <= end_marker && end_marker <= self.markers.len());
        for m in start_marker..end_marker {
            let a = self.allele(src_hap, m);
            self.set_allele(dst_hap, m, a);
        }
    }

    fn get_bits(&self, hap: usize, bit_offset: u64, width: u32) -> u32 {
        let base = hap * self.words_per_hap;
        let word_idx = (bit_offset / WORD_BITS) as usize;
        let bit_in_word = (bit_offset % WORD_BITS) as u32;
        let lo = self.bits[base + word_idx] >> bit_in_word;
        let value = if bit_in_word + width > 64 {
            let hi = self.bits[base + word_idx + 1];
            let hi_shift = 64 - bit_in_word;
            lo | (hi << hi_shift)
        } else {
            lo
        };
        (value & mask(width)) as u32
    }

    fn set_bits(&mut self, hap: usize, bit_offset: u64, width: u32, value: u32) {
        let base = hap * self.words_per_hap;
        let word_idx = (bit_offset / WORD_BITS) as usize;
        let bit_in_word = (bit_offset % WORD_BITS) as u32;
        let value = (value as u64) & mask(width);

        let word = self.bits[base + word_idx];
        let clear_mask = !(mask(width) << bit_in_word);
        self.bits[base + word_idx] = (word & clear_mask) | (value << bit_in_word);

        if bit_in_word + width > 64 {
            let overflow_bits = bit_in_word + width - 64;
            let hi_word = self.bits[base + word_idx + 1];
            let hi_clear_mask = !mask(overflow_bits);
            let hi_value = value >> (64 - bit_in_word);
            self.bits[base + word_idx + 1] = (hi_word & hi_clear_mask) | hi_value;
        }
    }
}

fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::marker::Marker;

    fn markers(alleles: &[u16]) -> Arc<MarkerList> {
        let ms = alleles
            .iter()
            .enumerate()
            .map(|(i, &a)| Marker::new(1, i as u32 * 10, a).unwrap())
            .collect();
        Arc::new(MarkerList::new(ms).unwrap())
    }

    #[test]
    fn round_trip_across_word_boundaries() {
        let n_markers = 200;
        let allele_counts: Vec<u16> = (0..n_markers).map(|i| 2 + (i % 3) as u16).collect();
        let ml = markers(&allele_counts);
        let mut store = HaplotypeStore::new(4, ml.clone());
        let mut expected = vec![0u32; n_markers];
        for m in 0..n_markers {
            let a = (m as u32) % (ml.marker(m).n_alleles as u32);
            store.set_allele(2, m, a);
            expected[m] = a;
        }
        for m in 0..n_markers {
            assert_eq!(store.allele(2, m), expected[m], "marker {}", m);
        }
    }

    #[test]
    fn copy_range_duplicates_segment() {
        let ml = markers(&[2, 2, 2, 2]);
        let mut store = HaplotypeStore::new(2, ml);
        store.set_allele(0, 0, 1);
        store.set_allele(0, 1, 0);
        store.set_allele(0, 2, 1);
        store.set_allele(0, 3, 1);
        store.copy_range(0, 1, 1, 3);
        assert_eq!(store.allele(1, 1), 0);
        assert_eq!(store.allele(1, 2), 1);
    }

    #[test]
    fn hash_is_deterministic_and_range_sensitive() {
        let ml = markers(&[2, 2, 2, 2]);
        let mut store = HaplotypeStore::new(2, ml);
        store.set_allele(0, 0, 1);
        store.set_allele(0, 1, 0);
        store.set_allele(0, 2, 1);
        let h1 = store.hash(0, 0, 3);
        let h2 = store.hash(0, 0, 3);
        assert_eq!(h1, h2);
        let h3 = store.hash(0, 0, 2);
        assert_ne!(h1, h3);
    }
}
