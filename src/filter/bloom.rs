use super::FilterPolicy;

/// Bloom filter with double hashing.
///
/// Layout: `bits[..] | k (1 byte)`. Ten bits per key gives roughly a 1%
/// false positive rate.
pub struct BloomFilterPolicy {
    bits_per_key: usize,
    num_probes: usize,
}

impl BloomFilterPolicy {
    pub fn new(bits_per_key: usize) -> Self {
        // k = bits_per_key * ln(2), clamped
        let num_probes = ((bits_per_key as f64 * 0.69) as usize).clamp(1, 30);
        BloomFilterPolicy {
            bits_per_key,
            num_probes,
        }
    }

    pub fn bits_per_key(&self) -> usize {
        self.bits_per_key
    }

    fn hash(data: &[u8]) -> u32 {
        const SEED: u32 = 0xbc9f_1d34;
        const M: u32 = 0xc6a4_a793;

        let mut h = SEED ^ (data.len() as u32).wrapping_mul(M);
        let mut chunks = data.chunks_exact(4);
        for chunk in &mut chunks {
            let w = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            h = h.wrapping_add(w).wrapping_mul(M);
            h ^= h >> 16;
        }
        let rest = chunks.remainder();
        for (i, &b) in rest.iter().enumerate().rev() {
            h = h.wrapping_add((b as u32) << (8 * i));
        }
        if !rest.is_empty() {
            h = h.wrapping_mul(M);
            h ^= h >> 24;
        }
        h
    }
}

impl FilterPolicy for BloomFilterPolicy {
    fn name(&self) -> &str {
        "stratakv.BloomFilter"
    }

    fn create_filter(&self, keys: &[&[u8]]) -> Vec<u8> {
        let bits = (keys.len() * self.bits_per_key).max(64);
        let bytes = bits.div_ceil(8);
        let bits = bytes * 8;

        let mut filter = vec![0u8; bytes + 1];
        filter[bytes] = self.num_probes as u8;

        for key in keys {
            let mut h = Self::hash(key);
            let delta = h.rotate_right(17);
            for _ in 0..self.num_probes {
                let bit = h as usize % bits;
                filter[bit / 8] |= 1 << (bit % 8);
                h = h.wrapping_add(delta);
            }
        }
        filter
    }

    fn may_contain(&self, filter: &[u8], key: &[u8]) -> bool {
        if filter.len() < 2 {
            return false;
        }
        let bytes = filter.len() - 1;
        let bits = bytes * 8;
        let k = filter[bytes] as usize;
        if k > 30 {
            // reserved encodings: treat as match
            return true;
        }

        let mut h = Self::hash(key);
        let delta = h.rotate_right(17);
        for _ in 0..k {
            let bit = h as usize % bits;
            if filter[bit / 8] & (1 << (bit % 8)) == 0 {
                return false;
            }
            h = h.wrapping_add(delta);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| format!("key{i:06}").into_bytes()).collect()
    }

    #[test]
    fn test_no_false_negatives() {
        let policy = BloomFilterPolicy::new(10);
        let owned = keys(1000);
        let refs: Vec<&[u8]> = owned.iter().map(|k| k.as_slice()).collect();
        let filter = policy.create_filter(&refs);
        for key in &owned {
            assert!(policy.may_contain(&filter, key));
        }
    }

    #[test]
    fn test_false_positive_rate_is_low() {
        let policy = BloomFilterPolicy::new(10);
        let owned = keys(2000);
        let refs: Vec<&[u8]> = owned.iter().map(|k| k.as_slice()).collect();
        let filter = policy.create_filter(&refs);

        let false_positives = (0..10_000)
            .filter(|i| policy.may_contain(&filter, format!("absent{i}").as_bytes()))
            .count();
        assert!(false_positives < 500, "fp = {false_positives}");
    }

    #[test]
    fn test_empty_filter_rejects_everything() {
        let policy = BloomFilterPolicy::new(10);
        let filter = policy.create_filter(&[]);
        assert!(!policy.may_contain(&filter, b"anything"));
        assert!(!policy.may_contain(&[], b"anything"));
    }
}
