//! # Portable Deterministic RNG
//!
//! Quorum selection must produce the same committees on every node and every
//! architecture, so nothing here uses a platform RNG. The generator is
//! MT19937-64, seeded either directly from a `u64` or through the standard
//! `seed_seq` expansion, and all ranged draws go through a rejection sampler
//! whose output depends only on the raw 64-bit stream.

const NN: usize = 312;
const MM: usize = 156;
const MATRIX_A: u64 = 0xB502_6F5A_A966_19E9;
const UPPER_MASK: u64 = 0xFFFF_FFFF_8000_0000;
const LOWER_MASK: u64 = 0x7FFF_FFFF;

/// 64-bit Mersenne Twister.
#[derive(Clone)]
pub struct Mt19937_64 {
    mt: [u64; NN],
    index: usize,
}

impl std::fmt::Debug for Mt19937_64 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mt19937_64")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl Mt19937_64 {
    /// Seed from a single 64-bit value.
    pub fn new(seed: u64) -> Self {
        let mut mt = [0u64; NN];
        mt[0] = seed;
        for i in 1..NN {
            mt[i] = 6_364_136_223_846_793_005u64
                .wrapping_mul(mt[i - 1] ^ (mt[i - 1] >> 62))
                .wrapping_add(i as u64);
        }
        Self { mt, index: NN }
    }

    /// Seed through `seed_seq` expansion of 32-bit words.
    pub fn from_seed_seq(words: &[u32]) -> Self {
        let mut expanded = [0u32; NN * 2];
        seed_seq_generate(words, &mut expanded);

        let mut mt = [0u64; NN];
        for (i, slot) in mt.iter_mut().enumerate() {
            *slot = u64::from(expanded[2 * i]) | (u64::from(expanded[2 * i + 1]) << 32);
        }
        if mt[0] & UPPER_MASK == 0 && mt[1..].iter().all(|&word| word == 0) {
            mt[0] = 1 << 63;
        }
        Self { mt, index: NN }
    }

    pub fn next_u64(&mut self) -> u64 {
        if self.index >= NN {
            self.twist();
        }
        let mut x = self.mt[self.index];
        self.index += 1;

        x ^= (x >> 29) & 0x5555_5555_5555_5555;
        x ^= (x << 17) & 0x71D6_7FFF_EDA6_0000;
        x ^= (x << 37) & 0xFFF7_EEE0_0000_0000;
        x ^= x >> 43;
        x
    }

    fn twist(&mut self) {
        for i in 0..NN {
            let x = (self.mt[i] & UPPER_MASK) | (self.mt[(i + 1) % NN] & LOWER_MASK);
            let mut next = x >> 1;
            if x & 1 != 0 {
                next ^= MATRIX_A;
            }
            self.mt[i] = self.mt[(i + MM) % NN] ^ next;
        }
        self.index = 0;
    }
}

/// `std::seed_seq::generate` over 32-bit words.
fn seed_seq_generate(seeds: &[u32], out: &mut [u32]) {
    let n = out.len();
    if n == 0 {
        return;
    }
    out.fill(0x8b8b_8b8b);

    let s = seeds.len();
    let t = if n >= 623 {
        11
    } else if n >= 68 {
        7
    } else if n >= 39 {
        5
    } else if n >= 7 {
        3
    } else {
        (n - 1) / 2
    };
    let p = (n - t) / 2;
    let q = p + t;
    let m = (s + 1).max(n);

    let mix = |x: u32| x ^ (x >> 27);

    for k in 0..m {
        let r1 = 1_664_525u32
            .wrapping_mul(mix(out[k % n] ^ out[(k + p) % n] ^ out[(k + n - 1) % n]));
        let r2 = if k == 0 {
            r1.wrapping_add(s as u32)
        } else if k <= s {
            r1.wrapping_add((k % n) as u32).wrapping_add(seeds[k - 1])
        } else {
            r1.wrapping_add((k % n) as u32)
        };
        out[(k + p) % n] = out[(k + p) % n].wrapping_add(r1);
        out[(k + q) % n] = out[(k + q) % n].wrapping_add(r2);
        out[k % n] = r2;
    }

    for k in m..m + n {
        let r3 = 1_566_083_941u32.wrapping_mul(mix(
            out[k % n]
                .wrapping_add(out[(k + p) % n])
                .wrapping_add(out[(k + n - 1) % n]),
        ));
        let r4 = r3.wrapping_sub((k % n) as u32);
        out[(k + p) % n] ^= r3;
        out[(k + q) % n] ^= r4;
        out[k % n] = r4;
    }
}

/// Uniform draw in `[0, n)` by rejection sampling.
pub fn uniform_distribution_portable(rng: &mut Mt19937_64, n: u64) -> u64 {
    if n <= 1 {
        return 0;
    }
    let secure_max = u64::MAX - u64::MAX % n;
    let mut x = rng.next_u64();
    while x >= secure_max {
        x = rng.next_u64();
    }
    x / (secure_max / n)
}

/// Fisher-Yates shuffle driven by [`uniform_distribution_portable`].
pub fn shuffle_portable<T>(items: &mut [T], rng: &mut Mt19937_64) {
    if items.len() <= 1 {
        return;
    }
    for i in 1..items.len() {
        let j = uniform_distribution_portable(rng, i as u64 + 1) as usize;
        items.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mt19937_64_reference_outputs() {
        let mut rng = Mt19937_64::new(5489);
        assert_eq!(rng.next_u64(), 14_514_284_786_278_117_030);

        let mut rng = Mt19937_64::new(5489);
        let mut value = 0;
        for _ in 0..10_000 {
            value = rng.next_u64();
        }
        assert_eq!(value, 9_981_545_732_273_789_042);
    }

    #[test]
    fn test_seed_seq_is_deterministic_and_sensitive() {
        let mut a = Mt19937_64::from_seed_seq(&[1, 2, 3]);
        let mut b = Mt19937_64::from_seed_seq(&[1, 2, 3]);
        let mut c = Mt19937_64::from_seed_seq(&[1, 2, 4]);
        let xs: Vec<u64> = (0..16).map(|_| a.next_u64()).collect();
        let ys: Vec<u64> = (0..16).map(|_| b.next_u64()).collect();
        let zs: Vec<u64> = (0..16).map(|_| c.next_u64()).collect();
        assert_eq!(xs, ys);
        assert_ne!(xs, zs);
    }

    #[test]
    fn test_uniform_stays_in_range() {
        let mut rng = Mt19937_64::new(42);
        for n in 1..50u64 {
            for _ in 0..20 {
                assert!(uniform_distribution_portable(&mut rng, n) < n);
            }
        }
        assert_eq!(uniform_distribution_portable(&mut rng, 0), 0);
    }

    #[test]
    fn test_shuffle_is_permutation_and_reproducible() {
        let mut a: Vec<u32> = (0..100).collect();
        let mut b = a.clone();
        shuffle_portable(&mut a, &mut Mt19937_64::new(7));
        shuffle_portable(&mut b, &mut Mt19937_64::new(7));
        assert_eq!(a, b);
        assert_ne!(a, (0..100).collect::<Vec<_>>());
        let mut sorted = a.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..100).collect::<Vec<_>>());
    }
}
