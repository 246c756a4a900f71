// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Module validation.
//!
//! Validation runs in two passes. The structural pass checks everything that
//! doesn't require typing code: index bounds across the combined
//! import-plus-local index spaces, limits, export-name uniqueness, the start
//! function's signature, constant expressions, and the function/code pairing.
//! Only when the structure is sound are function bodies checked with the
//! type-stack algorithm, in index order, first-error-per-function, so batch
//! tooling sees a deterministic error list (function index, then offset).

mod expr;

use crate::Allocator;
use crate::config::Config;
use crate::core_compat::vec::Vec;
use crate::error::{Error, ErrorKind, Errors, Warning, Warnings};
use crate::types::{
    FunctionType, GlobalType, ImportDescriptor, Limits, MemType, Module, TableType, ValType,
};

use expr::{validate_body, validate_constant_expression};

pub(crate) struct Validator<'m, A: Allocator> {
    module: &'m Module<A>,
    config: &'m Config<'m>,
    // Import index spaces, split by kind. Imports occupy the low indices of
    // each namespace; locally-defined entities follow.
    imported_funcs: Vec<crate::types::TypeIdx, A>,
    imported_tables: Vec<TableType, A>,
    imported_memories: Vec<MemType, A>,
    imported_globals: Vec<GlobalType, A>,
}

impl<'m, A: Allocator> Validator<'m, A> {
    fn new(module: &'m Module<A>, config: &'m Config<'m>, alloc: A) -> Result<Self, Error> {
        let mut funcs = 0usize;
        let mut tables = 0usize;
        let mut memories = 0usize;
        let mut globals = 0usize;
        for import in module.imports.iter() {
            match import.descriptor {
                ImportDescriptor::Function(_) => funcs += 1,
                ImportDescriptor::Table(_) => tables += 1,
                ImportDescriptor::Memory(_) => memories += 1,
                ImportDescriptor::Global(_) => globals += 1,
            }
        }

        let mut imported_funcs = Vec::new_in(alloc.clone());
        imported_funcs.try_reserve_exact(funcs)?;
        let mut imported_tables = Vec::new_in(alloc.clone());
        imported_tables.try_reserve_exact(tables)?;
        let mut imported_memories = Vec::new_in(alloc.clone());
        imported_memories.try_reserve_exact(memories)?;
        let mut imported_globals = Vec::new_in(alloc.clone());
        imported_globals.try_reserve_exact(globals)?;
        for import in module.imports.iter() {
            match import.descriptor {
                ImportDescriptor::Function(typeidx) => imported_funcs.push(typeidx),
                ImportDescriptor::Table(table) => imported_tables.push(table),
                ImportDescriptor::Memory(memory) => imported_memories.push(memory),
                ImportDescriptor::Global(global) => imported_globals.push(global),
            }
        }

        Ok(Self {
            module,
            config,
            imported_funcs,
            imported_tables,
            imported_memories,
            imported_globals,
        })
    }

    pub(super) fn config(&self) -> &Config<'m> {
        self.config
    }

    pub(super) fn type_count(&self) -> usize {
        self.module.types.len()
    }

    pub(super) fn function_count(&self) -> usize {
        self.imported_funcs.len() + self.module.functions.len()
    }

    pub(super) fn table_count(&self) -> usize {
        self.imported_tables.len() + self.module.tables.len()
    }

    pub(super) fn memory_count(&self) -> usize {
        self.imported_memories.len() + self.module.memories.len()
    }

    pub(super) fn global_count(&self) -> usize {
        self.imported_globals.len() + self.module.globals.len()
    }

    pub(super) fn imported_function_count(&self) -> usize {
        self.imported_funcs.len()
    }

    pub(super) fn function_type(&self, typeidx: u32) -> Option<&'m FunctionType<A>> {
        self.module.types.get(typeidx as usize)
    }

    // The signature of a function in the combined index space.
    pub(super) fn function_signature(&self, funcidx: u32) -> Option<&'m FunctionType<A>> {
        let idx = funcidx as usize;
        let typeidx = if idx < self.imported_funcs.len() {
            self.imported_funcs[idx]
        } else {
            *self.module.functions.get(idx - self.imported_funcs.len())?
        };
        self.function_type(*typeidx)
    }

    // The type of a global in the combined index space.
    pub(super) fn global_type(&self, globalidx: u32) -> Option<GlobalType> {
        let idx = globalidx as usize;
        if idx < self.imported_globals.len() {
            Some(self.imported_globals[idx])
        } else {
            self.module
                .globals
                .get(idx - self.imported_globals.len())
                .map(|global| global.ty)
        }
    }

    // Whether a global index names an imported immutable global, the only
    // kind a constant expression may read.
    pub(super) fn imported_immutable_global(&self, globalidx: u32) -> Option<ValType> {
        let global = self.imported_globals.get(globalidx as usize)?;
        (global.mutability == crate::types::Mutability::Const).then_some(global.value)
    }
}

fn check_table_limits(limits: Limits) -> Result<(), Error> {
    if let Some(max) = limits.max
        && limits.min > max
    {
        return Err(Error::new(ErrorKind::InvalidLimits(limits), 0));
    }
    Ok(())
}

fn check_memory_limits(memory: MemType) -> Result<(), Error> {
    let limits = *memory;
    let max = limits.max.unwrap_or(MemType::MAX_PAGES);
    if limits.min > MemType::MAX_PAGES || limits.min > max || max > MemType::MAX_PAGES {
        return Err(Error::new(ErrorKind::InvalidLimits(limits), 0));
    }
    Ok(())
}

// Pushes an error onto the aggregate list; allocation failure while doing so
// is itself fatal.
fn record<A: Allocator>(errors: &mut Vec<Error, A>, error: Error) -> Result<(), Error> {
    errors.try_reserve_exact(1)?;
    errors.push(error);
    Ok(())
}

impl<A: Allocator> Validator<'_, A> {
    // The structural pass. Records all findings; returns early only on fatal
    // (resource) errors.
    fn validate_structure(&self, errors: &mut Vec<Error, A>) -> Result<(), Error> {
        let module = self.module;

        for import in module.imports.iter() {
            match import.descriptor {
                ImportDescriptor::Function(typeidx) => {
                    if *typeidx as usize >= self.type_count() {
                        record(
                            errors,
                            Error::new(ErrorKind::InvalidTypeIndex(*typeidx), 0)
                                .in_context("importsec"),
                        )?;
                    }
                }
                ImportDescriptor::Table(table) => {
                    if let Err(err) = check_table_limits(table.limits) {
                        record(errors, err.in_context("importsec"))?;
                    }
                }
                ImportDescriptor::Memory(memory) => {
                    if let Err(err) = check_memory_limits(memory) {
                        record(errors, err.in_context("importsec"))?;
                    }
                }
                ImportDescriptor::Global(_) => {} // Always well-formed.
            }
        }

        for typeidx in module.functions.iter() {
            if **typeidx as usize >= self.type_count() {
                record(
                    errors,
                    Error::new(ErrorKind::InvalidTypeIndex(**typeidx), 0).in_context("funcsec"),
                )?;
            }
        }

        for table in module.tables.iter() {
            if let Err(err) = check_table_limits(table.limits) {
                record(errors, err.in_context("tablesec"))?;
            }
        }

        for memory in module.memories.iter() {
            if let Err(err) = check_memory_limits(*memory) {
                record(errors, err.in_context("memsec"))?;
            }
        }

        for global in module.globals.iter() {
            if let Err(err) = validate_constant_expression(self, &global.init, global.ty.value) {
                record(errors, err.in_context("global initializer"))?;
            }
        }

        self.validate_exports(errors)?;

        if let Some(start) = module.start {
            match self.function_signature(*start) {
                None => record(
                    errors,
                    Error::new(ErrorKind::InvalidFunctionIndex(*start), 0).in_context("startsec"),
                )?,
                Some(signature) => {
                    if !signature.parameters.is_empty() || !signature.results.is_empty() {
                        record(errors, Error::new(ErrorKind::InvalidStart(*start), 0))?;
                    }
                }
            }
        }

        for segment in module.elements.iter() {
            if *segment.table as usize >= self.table_count() {
                record(
                    errors,
                    Error::new(ErrorKind::InvalidTableIndex(*segment.table), 0)
                        .in_context("elemsec"),
                )?;
            }
            if let Err(err) = validate_constant_expression(self, &segment.offset, ValType::I32) {
                record(errors, err.in_context("element offset"))?;
            }
            for funcidx in segment.functions.iter() {
                if **funcidx as usize >= self.function_count() {
                    record(
                        errors,
                        Error::new(ErrorKind::InvalidFunctionIndex(**funcidx), 0)
                            .in_context("elemsec"),
                    )?;
                }
            }
        }

        for segment in module.data.iter() {
            if *segment.memory as usize >= self.memory_count() {
                record(
                    errors,
                    Error::new(ErrorKind::InvalidMemoryIndex(*segment.memory), 0)
                        .in_context("datasec"),
                )?;
            }
            if let Err(err) = validate_constant_expression(self, &segment.offset, ValType::I32) {
                record(errors, err.in_context("data offset"))?;
            }
        }

        if module.functions.len() != module.code.len() {
            record(
                errors,
                Error::new(
                    ErrorKind::FunctionCountMismatch {
                        functions: module.functions.len() as u32,
                        bodies: module.code.len() as u32,
                    },
                    0,
                ),
            )?;
        }

        Ok(())
    }

    fn validate_exports(&self, errors: &mut Vec<Error, A>) -> Result<(), Error> {
        use crate::types::ExportDescriptor::*;

        let exports = &self.module.exports;
        for export in exports.iter() {
            let (index, capacity) = match export.descriptor {
                Function(idx) => (*idx, self.function_count()),
                Table(idx) => (*idx, self.table_count()),
                Memory(idx) => (*idx, self.memory_count()),
                Global(idx) => (*idx, self.global_count()),
            };
            if index as usize >= capacity {
                let kind = match export.descriptor {
                    Function(_) => ErrorKind::InvalidFunctionIndex(index),
                    Table(_) => ErrorKind::InvalidTableIndex(index),
                    Memory(_) => ErrorKind::InvalidMemoryIndex(index),
                    Global(_) => ErrorKind::InvalidGlobalIndex(index),
                };
                record(errors, Error::new(kind, 0).in_context("exportsec"))?;
            }
        }

        // Export names must be pairwise distinct, by exact bytes. Export
        // counts are small enough in practice that the quadratic scan is
        // preferable to allocating a side table.
        for (idx, export) in exports.iter().enumerate() {
            if exports
                .iter()
                .take(idx)
                .any(|prev| prev.name == export.name)
            {
                record(
                    errors,
                    Error::new(ErrorKind::DuplicateExportName, 0).in_context("exportsec"),
                )?;
            }
        }
        Ok(())
    }
}

// Whether an error must abort validation rather than being aggregated.
fn is_fatal(error: &Error) -> bool {
    matches!(
        error.kind,
        ErrorKind::Timeout | ErrorKind::AllocationFailure
    )
}

// Replaces whatever has been aggregated so far with the single fatal error:
// resource failures must not surface partial results.
fn fatal<A: Allocator>(error: Error, mut errors: Vec<Error, A>) -> Result<Warnings<A>, Errors<A>> {
    errors.clear();
    if errors.try_reserve_exact(1).is_ok() {
        errors.push(error);
    }
    Err(Errors::new(errors))
}

/// Validates a decoded module, collecting warnings on success and a
/// deterministically ordered error list on failure.
pub(crate) fn validate_module_in<A: Allocator>(
    module: &Module<A>,
    config: &Config<'_>,
    alloc: A,
) -> Result<Warnings<A>, Errors<A>> {
    let mut errors: Vec<Error, A> = Vec::new_in(alloc.clone());
    let mut warnings: Vec<Warning, A> = Vec::new_in(alloc.clone());

    let validator = match Validator::new(module, config, alloc.clone()) {
        Ok(validator) => validator,
        Err(err) => return fatal(err, errors),
    };

    if let Err(err) = validator.validate_structure(&mut errors) {
        return fatal(err, errors);
    }

    // Function bodies are checked only against a structurally sound module;
    // the type-stack pass indexes types and namespaces without rechecking.
    if errors.is_empty() {
        for (body_index, (typeidx, function)) in module
            .functions
            .iter()
            .zip(module.code.iter())
            .enumerate()
        {
            let func_index = (validator.imported_function_count() + body_index) as u32;
            match validate_body(
                &validator,
                func_index,
                *typeidx,
                function,
                &mut warnings,
                alloc.clone(),
            ) {
                Ok(()) => {}
                Err(err) if is_fatal(&err) => return fatal(err, errors),
                Err(err) => {
                    if let Err(err) = record(&mut errors, err) {
                        return fatal(err, errors);
                    }
                }
            }
        }
    }

    if errors.is_empty() {
        log::debug!(
            "validated module: {} functions, {} warnings",
            module.code.len(),
            warnings.len()
        );
        Ok(Warnings::new(warnings))
    } else {
        Err(Errors::new(errors))
    }
}
