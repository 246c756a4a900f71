// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! WebAssembly binary format encoding.
//!
//! The inverse of the decoder, with deterministic choices: LEB128 outputs
//! are minimal, each section body is buffered so its length prefix can be
//! written first, sections are emitted in ascending id order and only when
//! non-empty, and custom sections are re-interleaved at their recorded
//! ordinal positions. For inputs in this canonical form, decode followed by
//! encode is byte-identical.
//!
//! The encoder assumes an already-validated module; the checks it performs
//! (operand shapes against opcodes, count overflow) are a safety net that
//! fails with `EncoderInvariantViolated` rather than a semantic diagnosis.

mod expr;

use crate::Allocator;
use crate::core_compat::vec::Vec;
use crate::error::{Error, ErrorKind};
use crate::leb128;
use crate::types::{
    CustomSection, Export, ExportDescriptor, Function, FunctionType, GlobalType, Import,
    ImportDescriptor, Limits, Module, Mutability, Name, SectionId, TableType, ValType,
};

use expr::encode_expression;

const HEADER: [u8; 8] = [0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

pub(crate) struct Writer<B: Allocator> {
    out: Vec<u8, B>,
    alloc: B,
}

impl<B: Allocator> Writer<B> {
    fn new(alloc: B) -> Self {
        Self {
            out: Vec::new_in(alloc.clone()),
            alloc,
        }
    }

    fn ensure(&mut self, additional: usize) -> Result<(), Error> {
        let needed = self.out.len() + additional;
        if needed > self.out.capacity() {
            let target = needed.max(self.out.capacity() * 2).max(64);
            self.out.try_reserve_exact(target - self.out.len())?;
        }
        Ok(())
    }

    pub(super) fn byte(&mut self, byte: u8) -> Result<(), Error> {
        self.ensure(1)?;
        self.out.push(byte);
        Ok(())
    }

    pub(super) fn bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.ensure(bytes.len())?;
        self.out.extend_from_slice(bytes);
        Ok(())
    }

    pub(super) fn var_u32(&mut self, value: u32) -> Result<(), Error> {
        self.bytes(leb128::encode_u32(value).as_slice())
    }

    pub(super) fn var_i32(&mut self, value: i32) -> Result<(), Error> {
        self.bytes(leb128::encode_i32(value).as_slice())
    }

    pub(super) fn var_i64(&mut self, value: i64) -> Result<(), Error> {
        self.bytes(leb128::encode_i64(value).as_slice())
    }

    pub(super) fn var_s33(&mut self, value: i64) -> Result<(), Error> {
        self.bytes(leb128::encode_i64(value).as_slice())
    }

    pub(super) fn f32(&mut self, value: f32) -> Result<(), Error> {
        self.bytes(&value.to_le_bytes())
    }

    pub(super) fn f64(&mut self, value: f64) -> Result<(), Error> {
        self.bytes(&value.to_le_bytes())
    }

    // A vector's leading element count.
    fn count(&mut self, len: usize) -> Result<(), Error> {
        let count = u32::try_from(len)
            .map_err(|_| Error::new(ErrorKind::EncoderInvariantViolated("count overflow"), 0))?;
        self.var_u32(count)
    }

    fn name(&mut self, name: &Name<impl Allocator>) -> Result<(), Error> {
        self.count(name.as_bytes().len())?;
        self.bytes(name.as_bytes())
    }

    fn limits(&mut self, limits: Limits) -> Result<(), Error> {
        match limits.max {
            None => {
                self.byte(0x00)?;
                self.var_u32(limits.min)
            }
            Some(max) => {
                self.byte(0x01)?;
                self.var_u32(limits.min)?;
                self.var_u32(max)
            }
        }
    }

    fn table_type(&mut self, table: TableType) -> Result<(), Error> {
        self.byte(table.element as u8)?;
        self.limits(table.limits)
    }

    fn global_type(&mut self, global: GlobalType) -> Result<(), Error> {
        self.byte(global.value as u8)?;
        self.byte(match global.mutability {
            Mutability::Const => 0x00,
            Mutability::Var => 0x01,
        })
    }

    fn result_types(&mut self, types: &[ValType]) -> Result<(), Error> {
        self.count(types.len())?;
        for &ty in types {
            self.byte(ty as u8)?;
        }
        Ok(())
    }

    fn function_type(&mut self, ty: &FunctionType<impl Allocator>) -> Result<(), Error> {
        self.byte(0x60)?;
        self.result_types(ty.parameters.as_slice())?;
        self.result_types(ty.results.as_slice())
    }

    fn import(&mut self, import: &Import<impl Allocator>) -> Result<(), Error> {
        self.name(&import.module)?;
        self.name(&import.field)?;
        match import.descriptor {
            ImportDescriptor::Function(typeidx) => {
                self.byte(0x00)?;
                self.var_u32(*typeidx)
            }
            ImportDescriptor::Table(table) => {
                self.byte(0x01)?;
                self.table_type(table)
            }
            ImportDescriptor::Memory(memory) => {
                self.byte(0x02)?;
                self.limits(*memory)
            }
            ImportDescriptor::Global(global) => {
                self.byte(0x03)?;
                self.global_type(global)
            }
        }
    }

    fn export(&mut self, export: &Export<impl Allocator>) -> Result<(), Error> {
        self.name(&export.name)?;
        match export.descriptor {
            ExportDescriptor::Function(idx) => {
                self.byte(0x00)?;
                self.var_u32(*idx)
            }
            ExportDescriptor::Table(idx) => {
                self.byte(0x01)?;
                self.var_u32(*idx)
            }
            ExportDescriptor::Memory(idx) => {
                self.byte(0x02)?;
                self.var_u32(*idx)
            }
            ExportDescriptor::Global(idx) => {
                self.byte(0x03)?;
                self.var_u32(*idx)
            }
        }
    }

    fn function(&mut self, function: &Function<impl Allocator>) -> Result<(), Error> {
        // The body is buffered so the size prefix can be measured.
        let mut body = Writer::new(self.alloc.clone());
        body.count(function.locals.len())?;
        for run in function.locals.iter() {
            body.var_u32(run.count)?;
            body.byte(run.ty as u8)?;
        }
        encode_expression(&mut body, &function.body)?;
        self.count(body.out.len())?;
        self.bytes(&body.out)
    }

    // Emits one non-custom section: id, measured size, body.
    fn section(
        &mut self,
        id: SectionId,
        emit: impl FnOnce(&mut Writer<B>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let mut body = Writer::new(self.alloc.clone());
        emit(&mut body)?;
        self.byte(id as u8)?;
        self.count(body.out.len())?;
        self.bytes(&body.out)
    }

    fn custom_section(&mut self, custom: &CustomSection<impl Allocator>) -> Result<(), Error> {
        self.section(SectionId::Custom, |body| {
            body.name(&custom.name)?;
            body.bytes(&custom.bytes)
        })
    }
}

/// Serialises a module back to the binary format.
pub(crate) fn encode_module_in<A: Allocator, B: Allocator>(
    module: &Module<A>,
    alloc: B,
) -> Result<Vec<u8, B>, Error> {
    let mut writer = Writer::new(alloc);
    writer.bytes(&HEADER)?;

    // Custom sections are replayed at their recorded ordinal positions:
    // a custom with ordinal `k` was preceded by `k` non-custom sections.
    let customs = &module.customs;
    let mut next_custom = 0usize;
    let mut emitted: u32 = 0;

    macro_rules! flush_customs {
        ($upto:expr) => {
            while next_custom < customs.len() && customs[next_custom].ordinal <= $upto {
                writer.custom_section(&customs[next_custom])?;
                next_custom += 1;
            }
        };
    }

    macro_rules! emit_section {
        ($id:expr, $emit:expr) => {
            flush_customs!(emitted);
            writer.section($id, $emit)?;
            emitted += 1;
        };
    }

    if !module.types.is_empty() {
        emit_section!(SectionId::Type, |body| {
            body.count(module.types.len())?;
            for ty in module.types.iter() {
                body.function_type(ty)?;
            }
            Ok(())
        });
    }
    if !module.imports.is_empty() {
        emit_section!(SectionId::Import, |body| {
            body.count(module.imports.len())?;
            for import in module.imports.iter() {
                body.import(import)?;
            }
            Ok(())
        });
    }
    if !module.functions.is_empty() {
        emit_section!(SectionId::Function, |body| {
            body.count(module.functions.len())?;
            for typeidx in module.functions.iter() {
                body.var_u32(**typeidx)?;
            }
            Ok(())
        });
    }
    if !module.tables.is_empty() {
        emit_section!(SectionId::Table, |body| {
            body.count(module.tables.len())?;
            for table in module.tables.iter() {
                body.table_type(*table)?;
            }
            Ok(())
        });
    }
    if !module.memories.is_empty() {
        emit_section!(SectionId::Memory, |body| {
            body.count(module.memories.len())?;
            for memory in module.memories.iter() {
                body.limits(**memory)?;
            }
            Ok(())
        });
    }
    if !module.globals.is_empty() {
        emit_section!(SectionId::Global, |body| {
            body.count(module.globals.len())?;
            for global in module.globals.iter() {
                body.global_type(global.ty)?;
                encode_expression(body, &global.init)?;
            }
            Ok(())
        });
    }
    if !module.exports.is_empty() {
        emit_section!(SectionId::Export, |body| {
            body.count(module.exports.len())?;
            for export in module.exports.iter() {
                body.export(export)?;
            }
            Ok(())
        });
    }
    if let Some(start) = module.start {
        emit_section!(SectionId::Start, |body| body.var_u32(*start));
    }
    if !module.elements.is_empty() {
        emit_section!(SectionId::Element, |body| {
            body.count(module.elements.len())?;
            for segment in module.elements.iter() {
                body.var_u32(*segment.table)?;
                encode_expression(body, &segment.offset)?;
                body.count(segment.functions.len())?;
                for funcidx in segment.functions.iter() {
                    body.var_u32(**funcidx)?;
                }
            }
            Ok(())
        });
    }
    if !module.code.is_empty() {
        emit_section!(SectionId::Code, |body| {
            body.count(module.code.len())?;
            for function in module.code.iter() {
                body.function(function)?;
            }
            Ok(())
        });
    }
    if !module.data.is_empty() {
        emit_section!(SectionId::Data, |body| {
            body.count(module.data.len())?;
            for segment in module.data.iter() {
                body.var_u32(*segment.memory)?;
                encode_expression(body, &segment.offset)?;
                body.count(segment.bytes.len())?;
                body.bytes(&segment.bytes)?;
            }
            Ok(())
        });
    }

    // Trailing customs (ordinals at or beyond the emitted section count).
    flush_customs!(u32::MAX);

    log::debug!("encoded module: {} bytes", writer.out.len());
    Ok(writer.out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_compat::alloc::Global;

    fn written(emit: impl FnOnce(&mut Writer<Global>)) -> std::vec::Vec<u8> {
        let mut writer = Writer::new(Global);
        emit(&mut writer);
        writer.out.as_slice().to_vec()
    }

    #[test]
    fn leb_outputs_are_minimal() {
        assert_eq!(written(|w| w.var_u32(0).unwrap()), [0x00]);
        assert_eq!(written(|w| w.var_u32(624_485).unwrap()), [0xe5, 0x8e, 0x26]);
        assert_eq!(written(|w| w.var_i32(-1).unwrap()), [0x7f]);
        assert_eq!(written(|w| w.var_i64(i64::from(i32::MIN)).unwrap()), [
            0x80, 0x80, 0x80, 0x80, 0x78
        ]);
    }

    #[test]
    fn limits_encodings() {
        assert_eq!(
            written(|w| w.limits(Limits { min: 1, max: None }).unwrap()),
            [0x00, 0x01]
        );
        assert_eq!(
            written(|w| w
                .limits(Limits {
                    min: 1,
                    max: Some(0x100),
                })
                .unwrap()),
            [0x01, 0x01, 0x80, 0x02]
        );
    }

    #[test]
    fn floats_are_little_endian_and_bit_exact() {
        assert_eq!(written(|w| w.f32(1.0).unwrap()), 1.0f32.to_le_bytes());
        let nan = f64::from_bits(0x7ff8_0000_0000_1234);
        assert_eq!(written(|w| w.f64(nan).unwrap()), nan.to_le_bytes());
    }

    #[test]
    fn global_types_and_mutability() {
        let encoded = written(|w| {
            w.global_type(GlobalType {
                value: ValType::I64,
                mutability: Mutability::Var,
            })
            .unwrap();
        });
        assert_eq!(encoded, [0x7e, 0x01]);
    }

    #[test]
    fn sections_are_length_prefixed() {
        let encoded = written(|w| {
            w.section(SectionId::Memory, |body| {
                body.count(1)?;
                body.limits(Limits { min: 2, max: None })
            })
            .unwrap();
        });
        assert_eq!(encoded, [0x05, 0x03, 0x01, 0x00, 0x02]);
    }
}
