// Random number generation.
//
// Test data (random ops, random subtables, random scalars) is drawn from a
// seeded `StdRng` so failures reproduce.

use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};

use crate::uint256::U256Ext;
use crate::U256;

/// Deterministic RNG seeded from a u64.
pub struct DebugRng {
    inner: StdRng,
}

impl DebugRng {
    pub fn new(seed: u64) -> Self {
        Self { inner: StdRng::seed_from_u64(seed) }
    }

    pub fn get_random_u64(&mut self) -> u64 {
        self.inner.random()
    }

    pub fn get_random_u256(&mut self) -> U256 {
        U256::from_limbs([
            self.inner.random(),
            self.inner.random(),
            self.inner.random(),
            self.inner.random(),
        ])
    }

    /// 64 random bytes: enough for a modular reduction with negligible bias.
    pub fn get_random_wide_bytes(&mut self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        self.inner.fill_bytes(&mut bytes);
        bytes
    }
}
