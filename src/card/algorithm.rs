//! Per-card registry of supported algorithms
//!
//! Drivers describe what a card can do with keys by adding
//! [`AlgorithmInfo`] entries when the card is initialized. The registry is an
//! append log: duplicate key lengths are kept and lookups return the first
//! entry added.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::util::count_bit_string_size;

/// Public key algorithm family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Rsa,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Rsa => write!(f, "RSA"),
        }
    }
}

/// Capability flags of an algorithm entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct AlgorithmFlags(u32);

impl AlgorithmFlags {
    pub const RSA_PAD_NONE: Self = Self(0x0000_0001);
    pub const RSA_PAD_PKCS1: Self = Self(0x0000_0002);
    pub const RSA_HASH_NONE: Self = Self(0x0000_0010);
    pub const RSA_HASH_SHA1: Self = Self(0x0000_0020);
    pub const RSA_HASH_MD5: Self = Self(0x0000_0040);
    pub const ONBOARD_KEY_GEN: Self = Self(0x8000_0000);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for AlgorithmFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AlgorithmFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for AlgorithmFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: &[(AlgorithmFlags, &str)] = &[
            (AlgorithmFlags::RSA_PAD_NONE, "pad-none"),
            (AlgorithmFlags::RSA_PAD_PKCS1, "pad-pkcs1"),
            (AlgorithmFlags::RSA_HASH_NONE, "hash-none"),
            (AlgorithmFlags::RSA_HASH_SHA1, "hash-sha1"),
            (AlgorithmFlags::RSA_HASH_MD5, "hash-md5"),
            (AlgorithmFlags::ONBOARD_KEY_GEN, "onboard-keygen"),
        ];
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", names.join(","))
    }
}

/// One supported algorithm/key-size combination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmInfo {
    pub algorithm: Algorithm,
    /// Key length in bits
    pub key_length: usize,
    pub flags: AlgorithmFlags,
    /// Public exponent, 0 when any exponent is accepted
    pub exponent: u64,
}

/// Algorithms supported by one connected card
#[derive(Debug, Clone, Default)]
pub struct AlgorithmRegistry {
    entries: Vec<AlgorithmInfo>,
}

impl AlgorithmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, info: AlgorithmInfo) {
        log::trace!(
            "Registering {} {} bits ({})",
            info.algorithm,
            info.key_length,
            info.flags
        );
        self.entries.push(info);
    }

    pub fn add_rsa(&mut self, key_length: usize, flags: AlgorithmFlags, exponent: u64) {
        self.add(AlgorithmInfo {
            algorithm: Algorithm::Rsa,
            key_length,
            flags,
            exponent,
        });
    }

    /// First RSA entry with the given key length
    pub fn find_rsa(&self, key_length: usize) -> Option<&AlgorithmInfo> {
        self.find(Algorithm::Rsa, key_length)
    }

    pub fn find(&self, algorithm: Algorithm, key_length: usize) -> Option<&AlgorithmInfo> {
        self.entries
            .iter()
            .find(|e| e.algorithm == algorithm && e.key_length == key_length)
    }

    /// RSA entry whose key length equals the bit length of `modulus`
    pub fn find_for_modulus(&self, modulus: &[u8]) -> Option<&AlgorithmInfo> {
        self.find_rsa(count_bit_string_size(modulus))
    }

    pub fn iter(&self) -> impl Iterator<Item = &AlgorithmInfo> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
