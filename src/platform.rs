// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Host capability probe.
//!
//! A small, read-only description of the host that the crate consumes to
//! pick default resource caps. Correctness never depends on it: the wire
//! boundary converts endianness via `from_le_bytes`/`to_le_bytes`, which
//! lower to byte swaps on big-endian hosts.

/// Host byte order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Endianness {
    Little,
    Big,
}

/// Coarse memory-budget tier of the host, used to pick default caps.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MemoryTier {
    /// Small embedded hosts (16/32-bit address spaces): tight caps.
    Constrained,
    /// General-purpose hosts.
    Standard,
}

/// A read-only report of host capabilities.
#[derive(Clone, Copy, Debug)]
pub struct HostProfile {
    pub endianness: Endianness,
    pub memory_tier: MemoryTier,
    /// Cache-line size hint, in bytes.
    pub cache_line_size: usize,
    /// Whether the host guarantees IEEE-754 arithmetic.
    pub ieee754: bool,
    /// Whether a vectorised byte-swap is available (relevant only on
    /// big-endian hosts).
    pub simd_byteswap: bool,
}

impl HostProfile {
    /// The profile of the compilation target.
    pub const fn detect() -> Self {
        Self {
            endianness: if cfg!(target_endian = "big") {
                Endianness::Big
            } else {
                Endianness::Little
            },
            memory_tier: if cfg!(any(target_pointer_width = "16", target_pointer_width = "32")) {
                MemoryTier::Constrained
            } else {
                MemoryTier::Standard
            },
            cache_line_size: 64,
            ieee754: true,
            simd_byteswap: cfg!(any(target_arch = "x86_64", target_arch = "aarch64")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_matches_target() {
        let profile = HostProfile::detect();
        #[cfg(target_endian = "little")]
        assert_eq!(profile.endianness, Endianness::Little);
        #[cfg(target_pointer_width = "64")]
        assert_eq!(profile.memory_tier, MemoryTier::Standard);
    }
}
