// Small, portable pseudo-random number generator.
//
// xoshiro256++ (Blackman & Vigna, 2019) seeded through SplitMix64. The only
// consumer today is room-code generation in `dune_timer_protocol::room_code`,
// which needs a handful of uniformly distributed picks from a 36-symbol
// alphabet. A seeded generator keeps those picks reproducible in tests while
// `CodeRng::from_entropy()` gives each device a different stream in practice.
//
// Entropy comes from the wall clock, the process id, and the address of a
// stack local. That is not cryptographic and does not need to be: room codes
// are a convenience for pairing devices, not a secret (there is no
// authentication in the session model).

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Xoshiro256++ generator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CodeRng {
    s: [u64; 4],
}

impl CodeRng {
    /// Create a generator from a `u64` seed. Equal seeds give equal streams.
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        Self {
            s: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    /// Create a generator seeded from the clock, pid, and stack address.
    pub fn from_entropy() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let marker = 0u8;
        let addr = &marker as *const u8 as u64;
        let pid = u64::from(std::process::id());
        Self::new(nanos ^ addr.rotate_left(32) ^ pid.wrapping_mul(0x9e37_79b9_7f4a_7c15))
    }

    /// Next `u64` in the stream.
    pub fn next_u64(&mut self) -> u64 {
        let result = (self.s[0].wrapping_add(self.s[3]))
            .rotate_left(23)
            .wrapping_add(self.s[0]);

        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];

        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }

    /// Uniform integer in `[0, bound)`, rejection-sampled to avoid modulo
    /// bias. Panics if `bound == 0`.
    pub fn below(&mut self, bound: u64) -> u64 {
        assert!(bound > 0, "below: bound must be positive");
        if bound.is_power_of_two() {
            return self.next_u64() & (bound - 1);
        }
        let threshold = bound.wrapping_neg() % bound;
        loop {
            let r = self.next_u64();
            if r >= threshold {
                return r % bound;
            }
        }
    }

    /// Pick one element of a non-empty slice uniformly.
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        let idx = self.below(items.len() as u64) as usize;
        &items[idx]
    }
}

/// SplitMix64 step, used to expand one seed word into the full state.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = CodeRng::new(7);
        let mut b = CodeRng::new(7);
        for _ in 0..500 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = CodeRng::new(7);
        let mut b = CodeRng::new(8);
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn below_stays_in_bounds() {
        let mut rng = CodeRng::new(31);
        for _ in 0..10_000 {
            assert!(rng.below(36) < 36);
        }
        for _ in 0..1_000 {
            assert!(rng.below(8) < 8);
        }
    }

    #[test]
    fn below_one_is_always_zero() {
        let mut rng = CodeRng::new(1);
        for _ in 0..100 {
            assert_eq!(rng.below(1), 0);
        }
    }

    #[test]
    fn pick_reaches_every_symbol() {
        let alphabet: Vec<char> = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789".chars().collect();
        let mut seen = std::collections::BTreeSet::new();
        let mut rng = CodeRng::new(2024);
        for _ in 0..5_000 {
            seen.insert(*rng.pick(&alphabet));
        }
        assert_eq!(seen.len(), alphabet.len());
    }

    #[test]
    fn entropy_seeded_generators_differ() {
        let mut a = CodeRng::from_entropy();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let mut b = CodeRng::from_entropy();
        let sa: Vec<u64> = (0..4).map(|_| a.next_u64()).collect();
        let sb: Vec<u64> = (0..4).map(|_| b.next_u64()).collect();
        assert_ne!(sa, sb);
    }

    #[test]
    fn state_survives_serialization() {
        let mut rng = CodeRng::new(99);
        for _ in 0..10 {
            rng.next_u64();
        }
        let json = serde_json::to_string(&rng).unwrap();
        let mut restored: CodeRng = serde_json::from_str(&json).unwrap();
        for _ in 0..10 {
            assert_eq!(rng.next_u64(), restored.next_u64());
        }
    }
}
