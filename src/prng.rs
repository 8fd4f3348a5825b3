//! A small, fast, deterministic pseudo-random number generator.
//!
//! The engine's Zobrist keys and castling-rights keys must be the
//! same on every run (two engine instances must agree on a
//! transposition table signature), so they cannot be seeded from the
//! system clock or `rand::thread_rng`. `Prng` is Bob Jenkins' "small
//! fast" 64-bit generator, seeded with a fixed constant and scrambled
//! a number of rounds before the first draw, giving good statistical
//! mixing without pulling in external entropy.

/// A deterministic 64-bit pseudo-random number generator.
pub struct Prng {
    a: u64,
    b: u64,
    c: u64,
    d: u64,
}

#[inline(always)]
fn rotate(x: u64, k: u32) -> u64 {
    x.rotate_left(k)
}

impl Prng {
    /// Creates a new generator seeded with `seed`, scrambled through
    /// 73 warm-up rounds.
    pub fn new(seed: u64) -> Prng {
        let mut prng = Prng {
            a: seed,
            b: 0xd4e12c77,
            c: 0xd4e12c77,
            d: 0xd4e12c77,
        };
        for _ in 0..73 {
            prng.next_u64();
        }
        prng
    }

    /// Returns the next pseudo-random `u64`.
    pub fn next_u64(&mut self) -> u64 {
        let e = self.a.wrapping_sub(rotate(self.b, 7));
        self.a = self.b ^ rotate(self.c, 13);
        self.b = self.c.wrapping_add(rotate(self.d, 37));
        self.c = self.d.wrapping_add(e);
        self.d = e.wrapping_add(self.a);
        self.d
    }
}

impl Default for Prng {
    /// The conventional "small fast" seed: `0xf1ea5eed`.
    fn default() -> Prng {
        Prng::new(0xf1ea5eed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let mut p1 = Prng::default();
        let mut p2 = Prng::default();
        for _ in 0..1000 {
            assert_eq!(p1.next_u64(), p2.next_u64());
        }
    }

    #[test]
    fn test_not_degenerate() {
        let mut p = Prng::default();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..256 {
            seen.insert(p.next_u64());
        }
        assert!(seen.len() > 250);
    }
}
