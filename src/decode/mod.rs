// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! WebAssembly binary format decoding.
//!
//! The decoder checks the header, then walks the section sequence: one byte
//! of id, a LEB128 size, and a body that the per-section parser must consume
//! exactly. Custom sections are preserved verbatim together with their
//! ordinal position so that the encoder can reproduce the original byte
//! stream.

mod expr;
mod sections;

pub(crate) use expr::decode_expression;

use crate::Allocator;
use crate::config::Config;
use crate::core_compat::boxed::Box;
use crate::core_compat::vec::Vec;
use crate::error::{Error, ErrorKind};
use crate::leb128;
use crate::reader::Reader;
use crate::types::{
    CodeSection, CustomSection, DataSection, ElementSection, ExportSection, FuncIdx,
    FunctionSection, GlobalSection, ImportSection, MemorySection, Module, Name, SectionId,
    TableSection, TypeSection, Version,
};

/// The expected value of the magic field, `\0asm` read little-endian.
const MAGIC: u32 = 0x6d73_6100;

/// Description of one section of a module, produced by streaming
/// introspection without decoding section bodies.
#[derive(Debug)]
pub struct SectionInfo<A: Allocator> {
    /// The section id.
    pub id: SectionId,
    /// Absolute byte offset of the section's id byte.
    pub offset: usize,
    /// Declared size of the section body, in bytes.
    pub size: u32,
    /// The section name, for custom sections.
    pub name: Option<Name<A>>,
}

pub(crate) struct Decoder<'a, A: Allocator> {
    reader: Reader<'a>,
    config: &'a Config<'a>,
    alloc: A,
    until_deadline_poll: u32,
}

impl<'a, A: Allocator> Decoder<'a, A> {
    fn new(bytes: &'a [u8], config: &'a Config<'a>, alloc: A) -> Self {
        Self {
            reader: Reader::new(bytes),
            config,
            alloc,
            until_deadline_poll: config.deadline_poll_interval.max(1),
        }
    }

    pub(super) fn position(&self) -> usize {
        self.reader.position()
    }

    pub(super) fn config(&self) -> &Config<'a> {
        self.config
    }

    fn check_deadline(&self) -> Result<(), Error> {
        if self.config.deadline.expired() {
            Err(Error::new(ErrorKind::Timeout, self.reader.position()))
        } else {
            Ok(())
        }
    }

    // Consulted once per decoded instruction; polls the deadline flag every
    // `deadline_poll_interval` calls.
    pub(super) fn instruction_deadline(&mut self) -> Result<(), Error> {
        self.until_deadline_poll -= 1;
        if self.until_deadline_poll == 0 {
            self.until_deadline_poll = self.config.deadline_poll_interval.max(1);
            self.check_deadline()?;
        }
        Ok(())
    }

    pub(super) fn read_byte(&mut self) -> Result<u8, Error> {
        self.reader.read_byte()
    }

    pub(super) fn read_var_u32(&mut self) -> Result<u32, Error> {
        let start = self.reader.position();
        leb128::read(|| self.reader.read_byte()).map_err(|err: Error| err.attribute_leb(start))
    }

    pub(super) fn read_var_i32(&mut self) -> Result<i32, Error> {
        let start = self.reader.position();
        leb128::read(|| self.reader.read_byte()).map_err(|err: Error| err.attribute_leb(start))
    }

    pub(super) fn read_var_i64(&mut self) -> Result<i64, Error> {
        let start = self.reader.position();
        leb128::read(|| self.reader.read_byte()).map_err(|err: Error| err.attribute_leb(start))
    }

    pub(super) fn read_var_s33(&mut self) -> Result<i64, Error> {
        let start = self.reader.position();
        leb128::read_s33(|| self.reader.read_byte()).map_err(|err: Error| err.attribute_leb(start))
    }

    pub(super) fn read_f32(&mut self) -> Result<f32, Error> {
        self.reader.read_f32_le()
    }

    pub(super) fn read_f64(&mut self) -> Result<f64, Error> {
        self.reader.read_f64_le()
    }

    // Reads the zero byte reserved after `call_indirect`, `memory.size`, and
    // `memory.grow`.
    pub(super) fn read_zero_byte(&mut self) -> Result<(), Error> {
        let offset = self.reader.position();
        let byte = self.reader.read_byte()?;
        if byte == 0 {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::InvalidReservedByte(byte), offset))
        }
    }

    // Reads a vector count, sanity-checked against the remaining input: every
    // element occupies at least one byte, so a count beyond that is malformed
    // no matter what follows.
    pub(super) fn read_count(&mut self) -> Result<u32, Error> {
        let start = self.reader.position();
        let count = self.read_var_u32()?;
        if count as usize > self.reader.remaining() {
            return Err(Error::new(ErrorKind::UnexpectedEnd, start));
        }
        Ok(count)
    }

    // Reads a `count`-prefixed vector with per-element parser `element`.
    pub(super) fn read_vec<T>(
        &mut self,
        mut element: impl FnMut(&mut Self) -> Result<T, Error>,
    ) -> Result<Vec<T, A>, Error> {
        let count = self.read_count()?;
        let mut vec = Vec::new_in(self.alloc.clone());
        vec.try_reserve_exact(count as usize)?;
        for _ in 0..count {
            vec.push(element(self)?);
        }
        Ok(vec)
    }

    pub(super) fn boxed_bytes(&mut self, count: usize) -> Result<Box<[u8], A>, Error> {
        let bytes = self.reader.read_exact(count)?;
        let mut vec = Vec::new_in(self.alloc.clone());
        vec.try_reserve_exact(bytes.len())?;
        vec.extend_from_slice(bytes);
        Ok(vec.into_boxed_slice())
    }

    pub(super) fn read_name(&mut self) -> Result<Name<A>, Error> {
        let len = self.read_count()?;
        let start = self.reader.position();
        let bytes = self.reader.read_exact(len as usize)?;
        if self.config.validate_utf8 && core::str::from_utf8(bytes).is_err() {
            return Err(Error::new(ErrorKind::InvalidUtf8, start).in_context("name"));
        }
        let mut vec = Vec::new_in(self.alloc.clone());
        vec.try_reserve_exact(bytes.len())?;
        vec.extend_from_slice(bytes);
        Ok(Name::new(vec.into_boxed_slice()))
    }

    pub(super) fn alloc(&self) -> &A {
        &self.alloc
    }
}

// Checks the fixed 8-byte header and returns the module version.
fn read_header(reader: &mut Reader<'_>) -> Result<Version, Error> {
    let magic = reader.read_u32_le()?;
    if magic != MAGIC {
        return Err(Error::new(ErrorKind::InvalidMagic(magic), 0).in_context("magic"));
    }
    let version_offset = reader.position();
    let version = reader.read_u32_le()?;
    Version::try_from(version)
        .map_err(|_| Error::new(ErrorKind::InvalidVersion(version), version_offset))
}

/// Whether the input begins with a well-formed WebAssembly header. Never
/// allocates.
pub(crate) fn is_wasm(bytes: &[u8]) -> bool {
    check_header(bytes).is_ok()
}

/// Checks the 8-byte header without allocating.
pub(crate) fn check_header(bytes: &[u8]) -> Result<(), Error> {
    read_header(&mut Reader::new(bytes)).map(|_| ())
}

// Shared bookkeeping for the section walk: ordering, uniqueness, and
// framing bounds.
struct SectionTracker {
    seen: u16,
    last: Option<SectionId>,
}

impl SectionTracker {
    fn new() -> Self {
        Self {
            seen: 0,
            last: None,
        }
    }

    fn admit(&mut self, id: SectionId, offset: usize, config: &Config<'_>) -> Result<(), Error> {
        if id == SectionId::Custom {
            return Ok(());
        }
        if self.seen & (1u16 << (id as u8)) != 0 {
            return Err(Error::new(ErrorKind::DuplicateSection(id), offset));
        }
        if config.strict_section_order
            && let Some(last) = self.last
            && id < last
        {
            return Err(Error::new(
                ErrorKind::SectionOrder {
                    before: last,
                    after: id,
                },
                offset,
            ));
        }
        self.seen |= 1u16 << (id as u8);
        if self.last.is_none_or(|last| id > last) {
            self.last = Some(id);
        }
        Ok(())
    }
}

// Reads a section header, returning (id, body length, offset of the id
// byte). The length is capped and known to fit the remaining input.
fn read_section_header(
    reader: &mut Reader<'_>,
    config: &Config<'_>,
) -> Result<(SectionId, u32, usize), Error> {
    let offset = reader.position();
    let id_byte = reader.read_byte()?;
    let id = SectionId::try_from(id_byte)
        .map_err(|_| Error::new(ErrorKind::InvalidSectionId(id_byte), offset))?;
    let len_start = reader.position();
    let len: u32 =
        leb128::read(|| reader.read_byte()).map_err(|err: Error| err.attribute_leb(len_start))?;
    if len as usize > config.max_section_bytes {
        return Err(Error::new(ErrorKind::ResourceLimit("max_section_bytes"), offset));
    }
    if len as usize > reader.remaining() {
        return Err(Error::new(ErrorKind::UnexpectedEnd, len_start));
    }
    Ok((id, len, offset))
}

/// Decodes a module without validating it.
pub(crate) fn decode_module<'a, A: Allocator>(
    bytes: &'a [u8],
    config: &'a Config<'a>,
    alloc: A,
) -> Result<Module<A>, Error> {
    if bytes.len() > config.max_module_bytes {
        return Err(Error::new(ErrorKind::ResourceLimit("max_module_bytes"), 0));
    }

    let mut decoder = Decoder::new(bytes, config, alloc.clone());
    let version = read_header(&mut decoder.reader)?;

    let mut types = TypeSection::new(Vec::new_in(alloc.clone()));
    let mut imports = ImportSection::new(Vec::new_in(alloc.clone()));
    let mut functions = FunctionSection::new(Vec::new_in(alloc.clone()));
    let mut tables = TableSection::new(Vec::new_in(alloc.clone()));
    let mut memories = MemorySection::new(Vec::new_in(alloc.clone()));
    let mut globals = GlobalSection::new(Vec::new_in(alloc.clone()));
    let mut exports = ExportSection::new(Vec::new_in(alloc.clone()));
    let mut start = None;
    let mut elements = ElementSection::new(Vec::new_in(alloc.clone()));
    let mut code = CodeSection::new(Vec::new_in(alloc.clone()));
    let mut data = DataSection::new(Vec::new_in(alloc.clone()));
    let mut customs = Vec::new_in(alloc.clone());

    let mut tracker = SectionTracker::new();
    let mut noncustom_count: u32 = 0;

    // There is no in-band end-of-module marker: the input must end exactly at
    // a section boundary, and any trailing byte is treated as the start of a
    // section (and so rejected if it isn't one).
    while !decoder.reader.at_end() {
        decoder.check_deadline()?;

        let (id, len, sec_offset) = read_section_header(&mut decoder.reader, config)?;
        tracker.admit(id, sec_offset, config)?;
        let body_start = decoder.reader.position();
        let end = body_start + len as usize;

        match id {
            SectionId::Custom => {
                let name = decoder.read_name()?;
                if decoder.reader.position() > end {
                    return Err(Error::new(
                        ErrorKind::SectionSizeMismatch {
                            declared: len,
                            actual: (decoder.reader.position() - body_start) as u32,
                        },
                        sec_offset,
                    )
                    .in_context("customsec"));
                }
                if !config.allow_unknown_custom_names && name.as_bytes() != b"name" {
                    return Err(Error::new(ErrorKind::UnknownCustomSection, sec_offset));
                }
                let bytes = decoder.boxed_bytes(end - decoder.reader.position())?;
                customs.try_reserve_exact(1)?;
                customs.push(CustomSection {
                    name,
                    bytes,
                    ordinal: noncustom_count,
                });
            }
            SectionId::Type => types = decoder.type_section()?,
            SectionId::Import => imports = decoder.import_section()?,
            SectionId::Function => functions = decoder.function_section()?,
            SectionId::Table => tables = decoder.table_section()?,
            SectionId::Memory => memories = decoder.memory_section()?,
            SectionId::Global => globals = decoder.global_section()?,
            SectionId::Export => exports = decoder.export_section()?,
            SectionId::Start => start = Some(FuncIdx::new(decoder.read_var_u32()?)),
            SectionId::Element => elements = decoder.element_section()?,
            SectionId::Code => code = decoder.code_section()?,
            SectionId::Data => data = decoder.data_section()?,
        }
        if id != SectionId::Custom {
            noncustom_count += 1;
        }

        let actual = decoder.reader.position() - body_start;
        if actual != len as usize {
            return Err(Error::new(
                ErrorKind::SectionSizeMismatch {
                    declared: len,
                    actual: actual as u32,
                },
                sec_offset,
            ));
        }
    }

    log::debug!(
        "decoded module: {} types, {} imports, {} functions, {} customs",
        types.len(),
        imports.len(),
        functions.len(),
        customs.len()
    );

    Ok(Module {
        version,
        types,
        imports,
        functions,
        tables,
        memories,
        globals,
        exports,
        start,
        elements,
        code,
        data,
        customs,
    })
}

/// Walks the section sequence without decoding bodies, returning the id,
/// offset, and size of each section (plus the name of custom sections).
pub(crate) fn section_info_in<'a, A: Allocator>(
    bytes: &'a [u8],
    config: &'a Config<'a>,
    alloc: A,
) -> Result<Vec<SectionInfo<A>, A>, Error> {
    let mut decoder = Decoder::new(bytes, config, alloc.clone());
    read_header(&mut decoder.reader)?;

    let mut infos = Vec::new_in(alloc);
    let mut tracker = SectionTracker::new();
    while !decoder.reader.at_end() {
        decoder.check_deadline()?;

        let (id, len, sec_offset) = read_section_header(&mut decoder.reader, config)?;
        tracker.admit(id, sec_offset, config)?;
        let body_start = decoder.reader.position();
        let end = body_start + len as usize;

        let name = if id == SectionId::Custom {
            let name = decoder.read_name()?;
            if decoder.reader.position() > end {
                return Err(Error::new(
                    ErrorKind::SectionSizeMismatch {
                        declared: len,
                        actual: (decoder.reader.position() - body_start) as u32,
                    },
                    sec_offset,
                )
                .in_context("customsec"));
            }
            decoder.reader.seek(end)?;
            Some(name)
        } else {
            decoder.reader.skip(len as usize)?;
            None
        };
        infos.try_reserve_exact(1)?;
        infos.push(SectionInfo {
            id,
            offset: sec_offset,
            size: len,
            name,
        });
    }
    Ok(infos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn header_checks() {
        assert!(is_wasm(&[0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00]));
        assert!(!is_wasm(&[]));
        assert!(!is_wasm(&[0x00, 0x61, 0x73, 0x6d]));

        let err = check_header(&[0x00, 0x61, 0x73, 0x6e, 0x01, 0x00, 0x00, 0x00]).unwrap_err();
        assert_matches!(err.kind, ErrorKind::InvalidMagic(_));
        assert_eq!(err.offset, 0);

        let err = check_header(&[0x00, 0x61, 0x73, 0x6d, 0x02, 0x00, 0x00, 0x00]).unwrap_err();
        assert_matches!(err.kind, ErrorKind::InvalidVersion(2));
        assert_eq!(err.offset, 4);
    }

    #[test]
    fn tracker_enforces_order_and_uniqueness() {
        let config = Config::new();
        let mut tracker = SectionTracker::new();

        tracker.admit(SectionId::Type, 8, &config).unwrap();
        // Customs may interleave anywhere, any number of times.
        tracker.admit(SectionId::Custom, 9, &config).unwrap();
        tracker.admit(SectionId::Custom, 10, &config).unwrap();
        tracker.admit(SectionId::Memory, 11, &config).unwrap();

        let err = tracker.admit(SectionId::Import, 12, &config).unwrap_err();
        assert_matches!(
            err.kind,
            ErrorKind::SectionOrder {
                before: SectionId::Memory,
                after: SectionId::Import,
            }
        );
        assert_eq!(err.offset, 12);

        let err = tracker.admit(SectionId::Memory, 13, &config).unwrap_err();
        assert_matches!(err.kind, ErrorKind::DuplicateSection(SectionId::Memory));
    }

    #[test]
    fn tracker_order_check_is_configurable() {
        let mut config = Config::new();
        config.strict_section_order = false;
        let mut tracker = SectionTracker::new();

        tracker.admit(SectionId::Memory, 8, &config).unwrap();
        tracker.admit(SectionId::Type, 9, &config).unwrap();
        // Duplicates stay rejected regardless.
        let err = tracker.admit(SectionId::Type, 10, &config).unwrap_err();
        assert_matches!(err.kind, ErrorKind::DuplicateSection(SectionId::Type));
    }

    #[test]
    fn section_header_reads_are_capped() {
        let config = Config::new();

        // A section claiming more bytes than remain.
        let mut reader = Reader::new(&[0x01, 0x7f]);
        let err = read_section_header(&mut reader, &config).unwrap_err();
        assert_matches!(err.kind, ErrorKind::UnexpectedEnd);

        // An id outside 0..=11.
        let mut reader = Reader::new(&[0x0c, 0x00]);
        let err = read_section_header(&mut reader, &config).unwrap_err();
        assert_matches!(err.kind, ErrorKind::InvalidSectionId(0x0c));
    }
}
