// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The WebAssembly module model.
//!
//! A decoded module is a tree of the types in this module, owned by the
//! caller and cross-referenced exclusively by dense integer indices.
//! Everything that allocates is generic over an allocator so that embedded
//! hosts can route the whole tree through an arena.

mod instr;
pub use instr::*;

use core::str;

use num_enum::TryFromPrimitive;

use crate::Allocator;
use crate::core_compat::boxed::Box;
use crate::core_compat::vec::Vec;

// Defines a public newtype without public mutable access to the underlying
// type, along with some convenience trait implementations like Deref and AsRef.
macro_rules! newtype {
    (
        $(#[$meta:meta])*
        pub struct $type:ident<A: Allocator>($underlying:ty);
    ) => {
        $(#[$meta])*
        pub struct $type<A: Allocator>($underlying);

        newtype!(@impl [A: Allocator], $type<A>, $underlying);
    };
    (
        $(#[$meta:meta])*
        pub struct $type:ident($underlying:ty);
    ) => {
        $(#[$meta])*
        pub struct $type($underlying);

        newtype!(@impl [], $type, $underlying);
    };
    (@impl [$($generic_params:tt)*], $qualified_type:ty, $underlying:ty) => {
        impl<$($generic_params)*> $qualified_type {
            pub fn new(value: $underlying) -> Self {
                Self(value)
            }
        }

        impl<$($generic_params)*> ::core::ops::Deref for $qualified_type {
            type Target = $underlying;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl<$($generic_params)*> AsRef<$underlying> for $qualified_type {
            fn as_ref(&self) -> &$underlying {
                &self.0
            }
        }
    };
}
pub(crate) use newtype;

/// WebAssembly module version.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum Version {
    V1 = 1,
}

/// The type of a reference to an object in the runtime store. Recognised as
/// a wire token; no algebra beyond equality is performed on it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum RefType {
    /// Function reference type.
    Func = 0x70,
    /// External reference type.
    Extern = 0x6f,
}

/// Value types classify the individual values that WebAssembly code can
/// compute with and the values that a variable accepts.
///
/// `V128` and the reference types are carried through decode and re-encode
/// as tokens; only the four numeric types participate in instruction typing.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum ValType {
    /// 32-bit integer.
    I32 = 0x7f,
    /// 64-bit integer.
    I64 = 0x7e,
    /// 32-bit IEEE-754 floating point number.
    F32 = 0x7d,
    /// 64-bit IEEE-754 floating point number.
    F64 = 0x7c,
    /// 128-bit SIMD vector.
    V128 = 0x7b,
    /// Function reference.
    FuncRef = RefType::Func as u8,
    /// External reference.
    ExternRef = RefType::Extern as u8,
}

impl From<RefType> for ValType {
    fn from(value: RefType) -> Self {
        match value {
            RefType::Func => Self::FuncRef,
            RefType::Extern => Self::ExternRef,
        }
    }
}

newtype!(
    /// The sequence of types representing the result of executing
    /// instructions or functions.
    #[derive(Clone, Debug)]
    pub struct ResultType<A: Allocator>(Vec<ValType, A>);
);

/// The signature of a function, mapping parameters to results.
#[derive(Clone, Debug)]
pub struct FunctionType<A: Allocator> {
    pub parameters: ResultType<A>,
    pub results: ResultType<A>,
}

/// The size range of the resizeable storage associated with memory (# of
/// pages) and table types (# of elements).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Limits {
    /// Minimum size.
    pub min: u32,
    /// Maximum size, with None indicating that there is no upper limit.
    pub max: Option<u32>,
}

newtype!(
    /// A linear memory type with its size limits.
    #[derive(Clone, Copy, Debug)]
    pub struct MemType(Limits);
);

impl MemType {
    /// The WebAssembly page size.
    pub const PAGE_SIZE: usize = 0x1_0000; // 64 KiB

    /// The maximum number of pages a linear memory may declare.
    pub const MAX_PAGES: u32 = 0x1_0000;

    /// The minimum size in bytes of the linear memory region.
    pub const fn min_size_bytes(&self) -> usize {
        (self.0.min as usize) * Self::PAGE_SIZE
    }

    /// The maximum size in bytes of the linear memory region, if any.
    pub fn max_size_bytes(&self) -> Option<usize> {
        self.0.max.map(|max| (max as usize) * Self::PAGE_SIZE)
    }
}

/// WebAssembly table type.
#[derive(Clone, Copy, Debug)]
pub struct TableType {
    /// Type of references stored in the table.
    pub element: RefType,
    /// Table size limits.
    pub limits: Limits,
}

/// The mutability of a global variable.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum Mutability {
    /// Immutable.
    Const = 0x00,
    /// Mutable.
    Var = 0x01,
}

/// The type of a global variable.
#[derive(Clone, Copy, Debug)]
pub struct GlobalType {
    /// The type of the global's value.
    pub value: ValType,
    /// Whether the global may be written after instantiation.
    pub mutability: Mutability,
}

newtype!(
    /// An index into the type section.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct TypeIdx(u32);
);

newtype!(
    /// An index into the function index space (imports first).
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct FuncIdx(u32);
);

newtype!(
    /// An index into the table index space (imports first).
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct TableIdx(u32);
);

newtype!(
    /// An index into the memory index space (imports first).
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct MemIdx(u32);
);

newtype!(
    /// An index into the global index space (imports first).
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct GlobalIdx(u32);
);

newtype!(
    /// An index into the element section.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct ElemIdx(u32);
);

newtype!(
    /// An index into the data section.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct DataIdx(u32);
);

newtype!(
    /// An index into a function's parameters-then-locals vector.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct LocalIdx(u32);
);

newtype!(
    /// A relative index referencing an enclosing structured control
    /// instruction (0 = innermost).
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct LabelIdx(u32);
);

/// A name (of an import, export, or custom section).
///
/// Stored as raw bytes so that modules parsed with UTF-8 validation disabled
/// still round-trip; [`Name::as_str`] exposes the checked view.
#[derive(Debug)]
pub struct Name<A: Allocator>(Box<[u8], A>);

impl<A: Allocator> Name<A> {
    pub fn new(bytes: Box<[u8], A>) -> Self {
        Self(bytes)
    }

    /// The raw bytes of the name. Names compare by exact bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The name as a string, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        str::from_utf8(&self.0).ok()
    }
}

impl<A: Allocator> PartialEq for Name<A> {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl<A: Allocator> Eq for Name<A> {}

/// Section identifier within a module.
///
/// Non-custom ids must appear in strictly ascending order in a module, so
/// the derived ordering is also the required section order.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, TryFromPrimitive)]
#[repr(u8)]
pub enum SectionId {
    /// Custom section with arbitrary named data.
    Custom = 0,
    /// Function type declarations.
    Type = 1,
    /// Import declarations.
    Import = 2,
    /// Function type indices for module-defined functions.
    Function = 3,
    /// Table declarations.
    Table = 4,
    /// Memory declarations.
    Memory = 5,
    /// Global declarations.
    Global = 6,
    /// Export declarations.
    Export = 7,
    /// Start function index.
    Start = 8,
    /// Element segments for table initialization.
    Element = 9,
    /// Function bodies.
    Code = 10,
    /// Data segments for memory initialization.
    Data = 11,
}

/// A custom section, preserved verbatim.
#[derive(Debug)]
pub struct CustomSection<A: Allocator> {
    /// Section name.
    pub name: Name<A>,
    /// Opaque section content (everything after the name).
    pub bytes: Box<[u8], A>,
    /// The number of non-custom sections that preceded this one, recorded so
    /// the encoder can re-interleave custom sections at their original
    /// positions.
    pub ordinal: u32,
}

newtype!(
    /// Section containing function type declarations.
    #[derive(Clone, Debug)]
    pub struct TypeSection<A: Allocator>(Vec<FunctionType<A>, A>);
);

/// Import descriptor.
#[derive(Clone, Copy, Debug)]
pub enum ImportDescriptor {
    /// Import a function with the given type index.
    Function(TypeIdx),
    /// Import a table with the given type.
    Table(TableType),
    /// Import a memory with the given type.
    Memory(MemType),
    /// Import a global with the given type.
    Global(GlobalType),
}

/// An import declaration.
#[derive(Debug)]
pub struct Import<A: Allocator> {
    /// Name of the module to import from.
    pub module: Name<A>,
    /// Name of the imported entity.
    pub field: Name<A>,
    /// Type of the imported entity.
    pub descriptor: ImportDescriptor,
}

newtype!(
    /// Section containing import declarations.
    #[derive(Debug)]
    pub struct ImportSection<A: Allocator>(Vec<Import<A>, A>);
);

newtype!(
    /// Section containing type indices for module-defined functions.
    #[derive(Clone, Debug)]
    pub struct FunctionSection<A: Allocator>(Vec<TypeIdx, A>);
);

newtype!(
    /// Section containing table type declarations.
    #[derive(Clone, Debug)]
    pub struct TableSection<A: Allocator>(Vec<TableType, A>);
);

newtype!(
    /// Section containing linear memory type declarations.
    #[derive(Clone, Debug)]
    pub struct MemorySection<A: Allocator>(Vec<MemType, A>);
);

/// A global declaration.
#[derive(Debug)]
pub struct Global<A: Allocator> {
    /// Global type and mutability.
    pub ty: GlobalType,
    /// Constant initialization expression.
    pub init: Expression<A>,
}

newtype!(
    /// Section containing global variable declarations.
    #[derive(Debug)]
    pub struct GlobalSection<A: Allocator>(Vec<Global<A>, A>);
);

/// Describes what kind of entity is being exported.
#[derive(Clone, Copy, Debug)]
pub enum ExportDescriptor {
    /// Export a function with the given index.
    Function(FuncIdx),
    /// Export a table with the given index.
    Table(TableIdx),
    /// Export a memory with the given index.
    Memory(MemIdx),
    /// Export a global with the given index.
    Global(GlobalIdx),
}

/// An export declaration.
#[derive(Debug)]
pub struct Export<A: Allocator> {
    /// Name of the exported entity; unique within a module.
    pub name: Name<A>,
    /// Kind and index of the exported entity.
    pub descriptor: ExportDescriptor,
}

newtype!(
    /// Section containing export declarations.
    #[derive(Debug)]
    pub struct ExportSection<A: Allocator>(Vec<Export<A>, A>);
);

/// An element segment initializing a slice of a table with functions.
#[derive(Debug)]
pub struct ElementSegment<A: Allocator> {
    /// The table to initialize.
    pub table: TableIdx,
    /// Constant expression computing the offset within the table.
    pub offset: Expression<A>,
    /// The function indices to place at the offset.
    pub functions: Vec<FuncIdx, A>,
}

newtype!(
    /// Section containing element segments.
    #[derive(Debug)]
    pub struct ElementSection<A: Allocator>(Vec<ElementSegment<A>, A>);
);

/// One run of a function's local-variable declarations: `count` locals of
/// type `ty`. The run-length list is preserved as written (zero-count runs
/// included) so bodies re-encode byte-exactly.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LocalsRun {
    /// Number of consecutive locals in this run.
    pub count: u32,
    /// Their common type.
    pub ty: ValType,
}

/// A function body: local declarations plus the code expression.
#[derive(Debug)]
pub struct Function<A: Allocator> {
    /// Local variable declarations, run-length encoded as on the wire.
    pub locals: Vec<LocalsRun, A>,
    /// The body expression, terminated by `end`.
    pub body: Expression<A>,
}

impl<A: Allocator> Function<A> {
    /// Total number of declared locals (excluding parameters).
    pub fn local_count(&self) -> u64 {
        self.locals.iter().map(|run| u64::from(run.count)).sum()
    }
}

newtype!(
    /// Section containing function bodies, one per entry of the function
    /// section, in the same order.
    #[derive(Debug)]
    pub struct CodeSection<A: Allocator>(Vec<Function<A>, A>);
);

/// A data segment initializing a range of a linear memory.
#[derive(Debug)]
pub struct DataSegment<A: Allocator> {
    /// The memory to initialize.
    pub memory: MemIdx,
    /// Constant expression computing the offset within the memory.
    pub offset: Expression<A>,
    /// The raw bytes to copy.
    pub bytes: Box<[u8], A>,
}

newtype!(
    /// Section containing data segments.
    #[derive(Debug)]
    pub struct DataSection<A: Allocator>(Vec<DataSegment<A>, A>);
);

/// A decoded WebAssembly module.
///
/// Owned entirely by the caller; all cross-references between fields are by
/// dense index, never by pointer, so the tree is destroyed as a unit.
#[derive(Debug)]
pub struct Module<A: Allocator> {
    pub version: Version,
    pub types: TypeSection<A>,
    pub imports: ImportSection<A>,
    pub functions: FunctionSection<A>,
    pub tables: TableSection<A>,
    pub memories: MemorySection<A>,
    pub globals: GlobalSection<A>,
    pub exports: ExportSection<A>,
    pub start: Option<FuncIdx>,
    pub elements: ElementSection<A>,
    pub code: CodeSection<A>,
    pub data: DataSection<A>,
    /// Custom sections in order of appearance, with their original ordinal
    /// positions relative to the non-custom sections.
    pub customs: Vec<CustomSection<A>, A>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_compat::alloc::Global;
    use crate::core_compat::vec::Vec;

    #[test]
    fn memory_sizes_in_bytes() {
        let memory = MemType::new(Limits {
            min: 2,
            max: Some(4),
        });
        assert_eq!(memory.min_size_bytes(), 2 * 64 * 1024);
        assert_eq!(memory.max_size_bytes(), Some(4 * 64 * 1024));

        let unbounded = MemType::new(Limits { min: 0, max: None });
        assert_eq!(unbounded.min_size_bytes(), 0);
        assert_eq!(unbounded.max_size_bytes(), None);
    }

    #[test]
    fn section_ids_order_matches_required_module_order() {
        assert!(SectionId::Type < SectionId::Import);
        assert!(SectionId::Code < SectionId::Data);
        assert!(SectionId::Custom < SectionId::Type);
        assert_eq!(SectionId::try_from(9).unwrap(), SectionId::Element);
        assert!(SectionId::try_from(12).is_err());
    }

    #[test]
    fn names_compare_by_bytes() {
        let name = |bytes: &[u8]| {
            let mut vec = Vec::new_in(Global);
            vec.extend_from_slice(bytes);
            Name::<Global>::new(vec.into_boxed_slice())
        };
        assert_eq!(name(b"memory"), name(b"memory"));
        assert_ne!(name(b"memory"), name(b"Memory"));
        assert_eq!(name(b"memory").as_str(), Some("memory"));
        assert_eq!(name(&[0xff]).as_str(), None);
    }

    #[test]
    fn locals_runs_sum_including_zero_counts() {
        let mut locals = Vec::new_in(Global);
        locals.extend_from_slice(&[
            LocalsRun {
                count: 0,
                ty: ValType::I32,
            },
            LocalsRun {
                count: 3,
                ty: ValType::F64,
            },
        ]);
        let function = Function {
            locals,
            body: Expression::new(Vec::new_in(Global)),
        };
        assert_eq!(function.local_count(), 3);
    }
}
