// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Parsing and validation configuration.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::platform::{HostProfile, MemoryTier};

/// A cooperative cancellation token.
///
/// When armed with a flag, the decoder and validator consult it at section
/// boundaries and once per [`Config::deadline_poll_interval`] instructions;
/// on expiry the current operation fails with `Timeout` and no partial
/// output. The flag may be set from another thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct Deadline<'a>(Option<&'a AtomicBool>);

impl<'a> Deadline<'a> {
    /// A deadline that never expires.
    pub const fn none() -> Self {
        Self(None)
    }

    /// A deadline driven by the given flag; expired once the flag is set.
    pub const fn flag(flag: &'a AtomicBool) -> Self {
        Self(Some(flag))
    }

    pub fn expired(&self) -> bool {
        self.0.is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// How much of the pipeline `validate_bytes` runs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidationLevel {
    /// Magic and version only.
    HeaderOnly,
    /// Section framing, ordering, and uniqueness, without decoding bodies.
    Structural,
    /// Full decode plus type validation.
    Full,
}

/// Configuration for parsing, validation, and resource capping.
///
/// The defaults are derived from the host profile; constrained hosts get
/// tighter caps. All caps are inclusive upper bounds; exceeding one fails
/// with a `ResourceLimit` error naming the cap.
#[derive(Clone, Copy, Debug)]
pub struct Config<'a> {
    /// Reject non-custom sections out of ascending id order. When off, such
    /// sections are still decoded (duplicates remain errors), but byte-exact
    /// round-trip is not preserved.
    pub strict_section_order: bool,
    /// Accept custom sections with any name. When off, custom sections other
    /// than the standard `name` section are rejected.
    pub allow_unknown_custom_names: bool,
    /// Check names for RFC 3629 UTF-8 validity.
    pub validate_utf8: bool,
    /// Collect non-fatal validator findings.
    pub collect_warnings: bool,
    /// Recognise the `0xfc` saturating-truncation opcodes. When off they are
    /// rejected as `InvalidOpcode`.
    pub saturating_truncation: bool,

    /// Maximum size of a whole module, in bytes.
    pub max_module_bytes: usize,
    /// Maximum size of a single section body, in bytes.
    pub max_section_bytes: usize,
    /// Maximum size of a single function body, in bytes.
    pub max_function_bytes: usize,
    /// Maximum number of locals a function may declare.
    pub max_locals_per_function: u32,
    /// Maximum operand-stack depth during validation.
    pub max_operand_stack: usize,
    /// Maximum control-stack depth during validation.
    pub max_label_stack: usize,

    /// Cooperative cancellation token.
    pub deadline: Deadline<'a>,
    /// How many instructions are processed between deadline polls.
    pub deadline_poll_interval: u32,
}

impl Config<'_> {
    /// A configuration with caps derived from the given host profile.
    pub const fn for_host(profile: &HostProfile) -> Self {
        let (module, section, function, operand, label) = match profile.memory_tier {
            MemoryTier::Constrained => (
                8 << 20,   // 8 MiB module
                2 << 20,   // 2 MiB section
                256 << 10, // 256 KiB function
                4096, 256,
            ),
            MemoryTier::Standard => (
                256 << 20, // 256 MiB module
                64 << 20,  // 64 MiB section
                8 << 20,   // 8 MiB function
                16384, 1024,
            ),
        };
        Self {
            strict_section_order: true,
            allow_unknown_custom_names: true,
            validate_utf8: true,
            collect_warnings: true,
            saturating_truncation: false,
            max_module_bytes: module,
            max_section_bytes: section,
            max_function_bytes: function,
            max_locals_per_function: 50_000,
            max_operand_stack: operand,
            max_label_stack: label,
            deadline: Deadline::none(),
            deadline_poll_interval: 4096,
        }
    }

    /// The default configuration for the compilation target.
    pub const fn new() -> Self {
        Self::for_host(&HostProfile::detect())
    }
}

impl Default for Config<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Endianness;

    #[test]
    fn deadline_flag() {
        let flag = AtomicBool::new(false);
        let deadline = Deadline::flag(&flag);
        assert!(!deadline.expired());
        flag.store(true, Ordering::Relaxed);
        assert!(deadline.expired());
        assert!(!Deadline::none().expired());
    }

    #[test]
    fn constrained_hosts_get_tighter_caps() {
        let constrained = HostProfile {
            endianness: Endianness::Little,
            memory_tier: MemoryTier::Constrained,
            cache_line_size: 32,
            ieee754: true,
            simd_byteswap: false,
        };
        let tight = Config::for_host(&constrained);
        let wide = Config::new();
        assert!(tight.max_module_bytes < wide.max_module_bytes);
        assert!(tight.max_operand_stack < wide.max_operand_stack);
        assert_eq!(tight.max_locals_per_function, 50_000);
    }
}
