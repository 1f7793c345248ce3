//! Injected randomness.
//!
//! The teacher crate reaches for `rand::rngs::OsRng` directly at every call
//! site. That is fine for production code but makes the rotation-probability
//! draw in `session` (§4.4 step 3: "with probability 1/AverageSessionSize")
//! impossible to hit deterministically in a test. This module gives every
//! caller in the workspace a single abstract capability, `RandReader`,
//! instead — production code gets it from `OsRandReader`, tests supply a
//! fixed or scripted sequence.

use rand_core::{CryptoRng, RngCore};

/// Capability for obtaining randomness. Exists so tests can supply a
/// deterministic (or deliberately-failing) source instead of the OS RNG.
pub trait RandReader: RngCore + CryptoRng {
    /// Fill `buf` with random bytes.
    fn fill(&mut self, buf: &mut [u8]) {
        self.fill_bytes(buf);
    }

    /// Draw a `u64` uniformly at random, for probability checks such as the
    /// `1/AverageSessionSize` rotation draw.
    fn next_u64_uniform(&mut self) -> u64 {
        self.next_u64()
    }
}

impl<T: RngCore + CryptoRng> RandReader for T {}

/// The production randomness source: the operating system CSPRNG.
pub type OsRandReader = rand::rngs::OsRng;

/// Returns `true` with probability `1/denominator` using the supplied
/// reader. `denominator == 0` always returns `false` (never rotate).
pub fn draw_one_in<R: RandReader + ?Sized>(reader: &mut R, denominator: u64) -> bool {
    if denominator == 0 {
        return false;
    }
    reader.next_u64_uniform() % denominator == 0
}

/// A `RandReader` that always returns zero bytes and whose `next_u64_uniform`
/// always returns `0` — useful for deterministically forcing the
/// `1/AverageSessionSize` rotation draw to fire in tests (§8 scenario 3).
#[derive(Clone, Copy, Default)]
pub struct AlwaysZeroReader;

impl RngCore for AlwaysZeroReader {
    fn next_u32(&mut self) -> u32 {
        0
    }
    fn next_u64(&mut self) -> u64 {
        0
    }
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        dest.fill(0);
    }
    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        dest.fill(0);
        Ok(())
    }
}

impl CryptoRng for AlwaysZeroReader {}

/// A `RandReader` that always returns a constant nonzero value — useful for
/// asserting the rotation draw does *not* fire.
#[derive(Clone, Copy)]
pub struct NeverReader;

impl RngCore for NeverReader {
    fn next_u32(&mut self) -> u32 {
        1
    }
    fn next_u64(&mut self) -> u64 {
        1
    }
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        dest.fill(0xAB);
    }
    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        dest.fill(0xAB);
        Ok(())
    }
}

impl CryptoRng for NeverReader {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_zero_always_fires() {
        let mut r = AlwaysZeroReader;
        assert!(draw_one_in(&mut r, 1000));
    }

    #[test]
    fn never_reader_never_fires() {
        let mut r = NeverReader;
        assert!(!draw_one_in(&mut r, 1000));
    }

    #[test]
    fn zero_denominator_never_fires() {
        let mut r = AlwaysZeroReader;
        assert!(!draw_one_in(&mut r, 0));
    }
}
