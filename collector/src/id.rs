//! Identify the computation a partial result contributes to.

use rand::RngCore;
use std::fmt::{Debug, Display, Formatter};

/// A 128-bit identifier naming one logical computation.
///
/// The requester mints a [CorrelationId] before dispatching work to the control components. Every
/// partial result produced for that work carries it back, and it is the sole key into both the
/// [crate::Store] and the [crate::registry::Tracker].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId {
    msb: u64,
    lsb: u64,
}

impl CorrelationId {
    /// Create a [CorrelationId] from its most and least significant halves.
    pub const fn new(msb: u64, lsb: u64) -> Self {
        Self { msb, lsb }
    }

    /// Mint a fresh [CorrelationId] from the provided randomness.
    pub fn random(rng: &mut impl RngCore) -> Self {
        Self::new(rng.next_u64(), rng.next_u64())
    }

    /// The most significant 64 bits.
    pub const fn msb(&self) -> u64 {
        self.msb
    }

    /// The least significant 64 bits.
    pub const fn lsb(&self) -> u64 {
        self.lsb
    }
}

impl From<u128> for CorrelationId {
    fn from(value: u128) -> Self {
        Self::new((value >> 64) as u64, value as u64)
    }
}

impl From<CorrelationId> for u128 {
    fn from(id: CorrelationId) -> Self {
        ((id.msb as u128) << 64) | id.lsb as u128
    }
}

impl Display for CorrelationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // Canonical 8-4-4-4-12 UUID text form
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            self.msb >> 32,
            (self.msb >> 16) & 0xffff,
            self.msb & 0xffff,
            self.lsb >> 48,
            self.lsb & 0xffff_ffff_ffff,
        )
    }
}

impl Debug for CorrelationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_display() {
        let id = CorrelationId::new(0x0123_4567_89ab_cdef, 0xfedc_ba98_7654_3210);
        assert_eq!(id.to_string(), "01234567-89ab-cdef-fedc-ba9876543210");
        assert_eq!(
            CorrelationId::new(1, 2).to_string(),
            "00000000-0000-0001-0000-000000000002"
        );
    }

    #[test]
    fn test_u128_conversion() {
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..100 {
            let id = CorrelationId::random(&mut rng);
            let value: u128 = id.into();
            assert_eq!(CorrelationId::from(value), id);
            assert_eq!((value >> 64) as u64, id.msb());
            assert_eq!(value as u64, id.lsb());
        }
    }
}
