// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! A WebAssembly 1.0 binary-format toolkit.
//!
//! `waft` decodes a module from its binary encoding into a typed, fully
//! owned model ([`Module`]), validates it against the WebAssembly type
//! system and structural rules, and re-encodes it losslessly: for canonical
//! inputs (minimal LEB128, non-empty sections, custom sections in place),
//! decode followed by encode is byte-identical.
//!
//! Every allocating type is generic over an allocator so the crate runs
//! unchanged from embedded hosts routing everything through an arena up to
//! ordinary `std` hosts; the `_in` variants of each operation take an
//! explicit [`Config`] and allocator, and the plain variants use the global
//! allocator with host-derived defaults.
//!
//! ```
//! let bytes = [0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];
//! assert!(waft::is_wasm(&bytes));
//!
//! let module = waft::parse(&bytes).unwrap();
//! assert!(module.types.is_empty());
//!
//! let encoded = waft::encode(&module).unwrap();
//! assert_eq!(encoded.as_slice(), &bytes[..]);
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![cfg_attr(nightly, feature(allocator_api))]

#[cfg(nightly)]
extern crate alloc;

pub mod config;
pub mod core_compat;
mod decode;
mod encode;
pub mod error;
mod leb128;
pub mod platform;
mod reader;
pub mod types;
mod validate;

pub use config::{Config, Deadline, ValidationLevel};
pub use decode::SectionInfo;
pub use error::{Category, Error, ErrorKind, Errors, Warning, WarningKind, Warnings};
pub use types::Module;

use core_compat::alloc::Global;
use core_compat::vec::Vec;

/// The allocator bound used by every allocating type in this crate: the
/// (polyfilled) `core` allocator API plus cheap cloning, which arena handles
/// satisfy by copying a reference.
pub trait Allocator: core_compat::alloc::Allocator + Clone {}
impl<A: core_compat::alloc::Allocator + Clone> Allocator for A {}

/// Whether the input begins with a well-formed WebAssembly header (magic and
/// version). Never allocates.
pub fn is_wasm(bytes: &[u8]) -> bool {
    decode::is_wasm(bytes)
}

/// Decodes and validates a module. On validation failure the first error in
/// the deterministic order is returned; use [`validate_bytes`] to see all of
/// them.
pub fn parse(bytes: &[u8]) -> Result<Module<Global>, Error> {
    parse_in(bytes, &Config::new(), Global)
}

/// [`parse`] with an explicit configuration and allocator.
pub fn parse_in<'a, A: Allocator>(
    bytes: &'a [u8],
    config: &'a Config<'a>,
    alloc: A,
) -> Result<Module<A>, Error> {
    let module = decode::decode_module(bytes, config, alloc.clone())?;
    match validate::validate_module_in(&module, config, alloc) {
        Ok(_) => Ok(module),
        Err(errors) => Err(*errors.first()),
    }
}

/// Decodes a module without validating it.
pub fn parse_unvalidated(bytes: &[u8]) -> Result<Module<Global>, Error> {
    parse_unvalidated_in(bytes, &Config::new(), Global)
}

/// [`parse_unvalidated`] with an explicit configuration and allocator.
pub fn parse_unvalidated_in<'a, A: Allocator>(
    bytes: &'a [u8],
    config: &'a Config<'a>,
    alloc: A,
) -> Result<Module<A>, Error> {
    decode::decode_module(bytes, config, alloc)
}

/// Validates an already-decoded module, returning collected warnings on
/// success and the full deterministic error list on failure. Scratch state
/// is drawn from the module's own allocator.
pub fn validate<A: Allocator>(module: &Module<A>) -> Result<Warnings<A>, Errors<A>> {
    validate_in(module, &Config::new(), module.types.allocator().clone())
}

/// [`validate`] with an explicit configuration and scratch allocator.
pub fn validate_in<A: Allocator>(
    module: &Module<A>,
    config: &Config<'_>,
    alloc: A,
) -> Result<Warnings<A>, Errors<A>> {
    validate::validate_module_in(module, config, alloc)
}

/// Checks the input at the requested level: header only, section structure,
/// or the full decode-plus-validate pipeline.
pub fn validate_bytes(
    bytes: &[u8],
    level: ValidationLevel,
) -> Result<Warnings<Global>, Errors<Global>> {
    validate_bytes_in(bytes, level, &Config::new(), Global)
}

/// [`validate_bytes`] with an explicit configuration and allocator.
pub fn validate_bytes_in<'a, A: Allocator>(
    bytes: &'a [u8],
    level: ValidationLevel,
    config: &'a Config<'a>,
    alloc: A,
) -> Result<Warnings<A>, Errors<A>> {
    fn single<A: Allocator>(error: Error, alloc: A) -> Errors<A> {
        let mut errors = Vec::new_in(alloc);
        if errors.try_reserve_exact(1).is_ok() {
            errors.push(error);
        }
        Errors::new(errors)
    }

    match level {
        ValidationLevel::HeaderOnly => match decode::check_header(bytes) {
            Ok(()) => Ok(Warnings::new(Vec::new_in(alloc))),
            Err(err) => Err(single(err, alloc)),
        },
        ValidationLevel::Structural => {
            match decode::section_info_in(bytes, config, alloc.clone()) {
                Ok(_) => Ok(Warnings::new(Vec::new_in(alloc))),
                Err(err) => Err(single(err, alloc)),
            }
        }
        ValidationLevel::Full => {
            let module = match decode::decode_module(bytes, config, alloc.clone()) {
                Ok(module) => module,
                Err(err) => return Err(single(err, alloc)),
            };
            validate::validate_module_in(&module, config, alloc)
        }
    }
}

/// Serialises a module back to the binary format.
pub fn encode<A: Allocator>(module: &Module<A>) -> Result<Vec<u8, Global>, Error> {
    encode_in(module, Global)
}

/// [`encode`] with an explicit output allocator.
pub fn encode_in<A: Allocator, B: Allocator>(
    module: &Module<A>,
    alloc: B,
) -> Result<Vec<u8, B>, Error> {
    encode::encode_module_in(module, alloc)
}

/// Walks the section sequence without decoding bodies: id, offset, and size
/// of every section, plus the name of custom sections.
pub fn section_info(bytes: &[u8]) -> Result<Vec<SectionInfo<Global>, Global>, Error> {
    section_info_in(bytes, &Config::new(), Global)
}

/// [`section_info`] with an explicit configuration and allocator.
pub fn section_info_in<'a, A: Allocator>(
    bytes: &'a [u8],
    config: &'a Config<'a>,
    alloc: A,
) -> Result<Vec<SectionInfo<A>, A>, Error> {
    decode::section_info_in(bytes, config, alloc)
}
