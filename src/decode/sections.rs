// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Per-section parsers.
//!
//! Each non-custom section is a LEB128 count followed by that many elements;
//! the shapes here are the WebAssembly 1.0 ones (element and data segments
//! carry a plain leading table/memory index).

use crate::Allocator;
use crate::core_compat::vec::Vec;
use crate::error::{Error, ErrorKind};
use crate::types::{
    CodeSection, DataSection, DataSegment, ElementSection, ElementSegment, Export,
    ExportDescriptor, ExportSection, FuncIdx, Function, FunctionSection, FunctionType,
    GlobalIdx, GlobalSection, GlobalType, Import, ImportDescriptor, ImportSection, Limits,
    LocalsRun, MemIdx, MemType, MemorySection, Mutability, RefType, ResultType, TableIdx,
    TableSection, TableType, TypeIdx, TypeSection, ValType,
};
use crate::types::Global;

use super::{Decoder, decode_expression};

// The tag introducing every entry of the type section.
const FUNCTION_TYPE_TAG: u8 = 0x60;

impl<A: Allocator> Decoder<'_, A> {
    fn read_valtype(&mut self) -> Result<ValType, Error> {
        let offset = self.position();
        let byte = self.read_byte()?;
        ValType::try_from(byte)
            .map_err(|_| Error::new(ErrorKind::InvalidToken(byte), offset).in_context("valtype"))
    }

    fn read_reftype(&mut self) -> Result<RefType, Error> {
        let offset = self.position();
        let byte = self.read_byte()?;
        RefType::try_from(byte)
            .map_err(|_| Error::new(ErrorKind::InvalidToken(byte), offset).in_context("reftype"))
    }

    fn read_result_type(&mut self) -> Result<ResultType<A>, Error> {
        Ok(ResultType::new(self.read_vec(Self::read_valtype)?))
    }

    fn read_limits(&mut self) -> Result<Limits, Error> {
        let offset = self.position();
        let flag = self.read_byte()?;
        let min = self.read_var_u32()?;
        let max = match flag {
            0x00 => None,
            0x01 => Some(self.read_var_u32()?),
            other => {
                return Err(
                    Error::new(ErrorKind::InvalidToken(other), offset).in_context("limits")
                );
            }
        };
        Ok(Limits { min, max })
    }

    fn read_table_type(&mut self) -> Result<TableType, Error> {
        Ok(TableType {
            element: self.read_reftype()?,
            limits: self.read_limits()?,
        })
    }

    fn read_mem_type(&mut self) -> Result<MemType, Error> {
        Ok(MemType::new(self.read_limits()?))
    }

    fn read_global_type(&mut self) -> Result<GlobalType, Error> {
        let value = self.read_valtype()?;
        let offset = self.position();
        let byte = self.read_byte()?;
        let mutability = Mutability::try_from(byte)
            .map_err(|_| Error::new(ErrorKind::InvalidToken(byte), offset).in_context("mut"))?;
        Ok(GlobalType { value, mutability })
    }

    fn read_function_type(&mut self) -> Result<FunctionType<A>, Error> {
        let offset = self.position();
        let tag = self.read_byte()?;
        if tag != FUNCTION_TYPE_TAG {
            return Err(Error::new(ErrorKind::InvalidToken(tag), offset).in_context("functype"));
        }
        Ok(FunctionType {
            parameters: self.read_result_type()?,
            results: self.read_result_type()?,
        })
    }

    pub(super) fn type_section(&mut self) -> Result<TypeSection<A>, Error> {
        Ok(TypeSection::new(
            self.read_vec(Self::read_function_type)
                .map_err(|err| err.in_context("typesec"))?,
        ))
    }

    fn read_import_descriptor(&mut self) -> Result<ImportDescriptor, Error> {
        let offset = self.position();
        match self.read_byte()? {
            0x00 => Ok(ImportDescriptor::Function(TypeIdx::new(
                self.read_var_u32()?,
            ))),
            0x01 => Ok(ImportDescriptor::Table(self.read_table_type()?)),
            0x02 => Ok(ImportDescriptor::Memory(self.read_mem_type()?)),
            0x03 => Ok(ImportDescriptor::Global(self.read_global_type()?)),
            other => {
                Err(Error::new(ErrorKind::InvalidToken(other), offset).in_context("importdesc"))
            }
        }
    }

    pub(super) fn import_section(&mut self) -> Result<ImportSection<A>, Error> {
        Ok(ImportSection::new(
            self.read_vec(|decoder| {
                Ok(Import {
                    module: decoder.read_name()?,
                    field: decoder.read_name()?,
                    descriptor: decoder.read_import_descriptor()?,
                })
            })
            .map_err(|err| err.in_context("importsec"))?,
        ))
    }

    pub(super) fn function_section(&mut self) -> Result<FunctionSection<A>, Error> {
        Ok(FunctionSection::new(
            self.read_vec(|decoder| Ok(TypeIdx::new(decoder.read_var_u32()?)))
                .map_err(|err| err.in_context("funcsec"))?,
        ))
    }

    pub(super) fn table_section(&mut self) -> Result<TableSection<A>, Error> {
        Ok(TableSection::new(
            self.read_vec(Self::read_table_type)
                .map_err(|err| err.in_context("tablesec"))?,
        ))
    }

    pub(super) fn memory_section(&mut self) -> Result<MemorySection<A>, Error> {
        Ok(MemorySection::new(
            self.read_vec(Self::read_mem_type)
                .map_err(|err| err.in_context("memsec"))?,
        ))
    }

    pub(super) fn global_section(&mut self) -> Result<GlobalSection<A>, Error> {
        Ok(GlobalSection::new(
            self.read_vec(|decoder| {
                Ok(Global {
                    ty: decoder.read_global_type()?,
                    init: decode_expression(decoder)?,
                })
            })
            .map_err(|err| err.in_context("globalsec"))?,
        ))
    }

    fn read_export_descriptor(&mut self) -> Result<ExportDescriptor, Error> {
        let offset = self.position();
        let tag = self.read_byte()?;
        let index = self.read_var_u32()?;
        match tag {
            0x00 => Ok(ExportDescriptor::Function(FuncIdx::new(index))),
            0x01 => Ok(ExportDescriptor::Table(TableIdx::new(index))),
            0x02 => Ok(ExportDescriptor::Memory(MemIdx::new(index))),
            0x03 => Ok(ExportDescriptor::Global(GlobalIdx::new(index))),
            other => {
                Err(Error::new(ErrorKind::InvalidToken(other), offset).in_context("exportdesc"))
            }
        }
    }

    pub(super) fn export_section(&mut self) -> Result<ExportSection<A>, Error> {
        Ok(ExportSection::new(
            self.read_vec(|decoder| {
                Ok(Export {
                    name: decoder.read_name()?,
                    descriptor: decoder.read_export_descriptor()?,
                })
            })
            .map_err(|err| err.in_context("exportsec"))?,
        ))
    }

    pub(super) fn element_section(&mut self) -> Result<ElementSection<A>, Error> {
        Ok(ElementSection::new(
            self.read_vec(|decoder| {
                Ok(ElementSegment {
                    table: TableIdx::new(decoder.read_var_u32()?),
                    offset: decode_expression(decoder)?,
                    functions: decoder
                        .read_vec(|d| Ok(FuncIdx::new(d.read_var_u32()?)))?,
                })
            })
            .map_err(|err| err.in_context("elemsec"))?,
        ))
    }

    fn read_locals(&mut self) -> Result<Vec<LocalsRun, A>, Error> {
        let max = u64::from(self.config().max_locals_per_function);
        let mut total: u64 = 0;
        self.read_vec(|decoder| {
            let offset = decoder.position();
            let count = decoder.read_var_u32()?;
            let ty = decoder.read_valtype()?;
            total += u64::from(count);
            if total > max {
                return Err(Error::new(
                    ErrorKind::ResourceLimit("max_locals_per_function"),
                    offset,
                ));
            }
            Ok(LocalsRun { count, ty })
        })
    }

    fn read_function(&mut self) -> Result<Function<A>, Error> {
        let func_offset = self.position();
        let size = self.read_var_u32()?;
        if size as usize > self.config().max_function_bytes {
            return Err(Error::new(
                ErrorKind::ResourceLimit("max_function_bytes"),
                func_offset,
            ));
        }
        let body_start = self.position();
        let locals = self.read_locals()?;
        let body = decode_expression(self)?;
        let actual = self.position() - body_start;
        if actual != size as usize {
            return Err(Error::new(
                ErrorKind::FunctionSizeMismatch {
                    declared: size,
                    actual: actual as u32,
                },
                func_offset,
            ));
        }
        Ok(Function { locals, body })
    }

    pub(super) fn code_section(&mut self) -> Result<CodeSection<A>, Error> {
        Ok(CodeSection::new(
            self.read_vec(Self::read_function)
                .map_err(|err| err.in_context("codesec"))?,
        ))
    }

    pub(super) fn data_section(&mut self) -> Result<DataSection<A>, Error> {
        Ok(DataSection::new(
            self.read_vec(|decoder| {
                let memory = MemIdx::new(decoder.read_var_u32()?);
                let offset = decode_expression(decoder)?;
                let len = decoder.read_count()?;
                let bytes = decoder.boxed_bytes(len as usize)?;
                Ok(DataSegment {
                    memory,
                    offset,
                    bytes,
                })
            })
            .map_err(|err| err.in_context("datasec"))?,
        ))
    }
}
