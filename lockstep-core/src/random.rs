//! Deterministic random source
//!
//! PCG-XSH-RR 64/32. The whole generator is two integers, so it is walked by
//! the serializer and replays exactly after a snapshot load.

use crate::serializer::{Serializable, Serializer};
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

const MULTIPLIER: u64 = 6_364_136_223_846_793_005;

/// How much noise power-on state receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entropy {
    /// Everything zeroed or set to a fixed bias
    None,
    /// One random pattern repeated
    #[default]
    Low,
    /// Independent random bytes
    High,
}

impl Entropy {
    fn to_u8(self) -> u8 {
        match self {
            Entropy::None => 0,
            Entropy::Low => 1,
            Entropy::High => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Entropy::None,
            2 => Entropy::High,
            _ => Entropy::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Random {
    state: u64,
    increment: u64,
    entropy: Entropy,
}

impl Random {
    pub fn new(seed: u64, entropy: Entropy) -> Self {
        let mut random = Self {
            state: 0,
            increment: 0,
            entropy,
        };
        random.seed(seed);
        random
    }

    /// Restart the sequence from `seed`
    pub fn seed(&mut self, seed: u64) {
        self.state = 0;
        self.increment = (seed << 1) | 1;
        self.step();
        self.state = self.state.wrapping_add(seed);
        self.step();
    }

    pub fn entropy(&self) -> Entropy {
        self.entropy
    }

    pub fn set_entropy(&mut self, entropy: Entropy) {
        self.entropy = entropy;
    }

    fn step(&mut self) -> u32 {
        let old = self.state;
        self.state = old.wrapping_mul(MULTIPLIER).wrapping_add(self.increment);
        let xorshifted = (((old >> 18) ^ old) >> 27) as u32;
        let rotation = (old >> 59) as u32;
        xorshifted.rotate_right(rotation)
    }

    /// 64 random bits, or zero without entropy
    pub fn random(&mut self) -> u64 {
        if self.entropy == Entropy::None {
            return 0;
        }
        let high = self.step() as u64;
        let low = self.step() as u64;
        high << 32 | low
    }

    /// Random value, or `fallback` without entropy
    pub fn bias(&mut self, fallback: u64) -> u64 {
        if self.entropy == Entropy::None {
            return fallback;
        }
        self.random()
    }

    /// Fill power-on memory according to the entropy mode
    pub fn array(&mut self, data: &mut [u8]) {
        match self.entropy {
            Entropy::None => data.fill(0),
            Entropy::Low => {
                let pattern = self.step().to_le_bytes();
                for (byte, value) in data.iter_mut().zip(pattern.iter().cycle()) {
                    *byte = *value;
                }
            }
            Entropy::High => self.fill_bytes(data),
        }
    }
}

impl RngCore for Random {
    fn next_u32(&mut self) -> u32 {
        self.step()
    }

    fn next_u64(&mut self) -> u64 {
        let low = self.step() as u64;
        let high = self.step() as u64;
        high << 32 | low
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.step().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl SeedableRng for Random {
    type Seed = [u8; 8];

    fn from_seed(seed: Self::Seed) -> Self {
        Self::new(u64::from_le_bytes(seed), Entropy::High)
    }
}

impl Serializable for Random {
    fn serialize(&mut self, s: &mut Serializer) {
        s.integer(&mut self.state);
        s.integer(&mut self.increment);
        let mut entropy = self.entropy.to_u8();
        s.integer(&mut entropy);
        self.entropy = Entropy::from_u8(entropy);
    }
}
