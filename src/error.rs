// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The error and warning model.
//!
//! Every fallible operation in the crate returns a tagged [`Error`] carrying
//! a fine-grained kind, the absolute byte offset where the offending token
//! began (0 when not applicable), and a short static context string. Errors
//! never allocate; aggregated validation results are collected into
//! allocator-parameterised [`Errors`] and [`Warnings`] lists.

use core::fmt;

use crate::Allocator;
use crate::core_compat::alloc::collections::TryReserveError;
use crate::core_compat::vec::Vec;
use crate::leb128;
use crate::types::{Limits, SectionId, newtype};

/// The broad category of an error kind, per the crate's error taxonomy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Category {
    /// The input bytes are not well-formed WebAssembly.
    BinaryFormat,
    /// The module violates the type system or structural rules.
    Validation,
    /// A configured resource cap or deadline was exceeded.
    Resource,
    /// The encoder was handed an internally inconsistent module.
    Encoder,
}

/// Fine-grained error kinds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    // Binary-format errors.
    /// The module does not begin with `\0asm`.
    InvalidMagic(u32),
    /// The version field is not 1.
    InvalidVersion(u32),
    /// The input ended before the current token was complete.
    UnexpectedEnd,
    /// Overlong or otherwise malformed LEB128 encoding.
    InvalidLeb128,
    /// A name is not valid UTF-8 (RFC 3629).
    InvalidUtf8,
    /// A section id outside 0..=11.
    InvalidSectionId(u8),
    /// Non-custom sections out of ascending id order.
    SectionOrder { before: SectionId, after: SectionId },
    /// A non-custom section appears more than once.
    DuplicateSection(SectionId),
    /// A section parser did not consume exactly the declared length.
    SectionSizeMismatch { declared: u32, actual: u32 },
    /// A function body did not consume exactly its declared size.
    FunctionSizeMismatch { declared: u32, actual: u32 },
    /// An unknown (or disabled) opcode byte.
    InvalidOpcode(u8),
    /// An unknown `0xfc`-prefixed sub-opcode.
    InvalidSatOpcode(u32),
    /// An invalid single-byte token (value type, mutability, limits flag,
    /// descriptor tag).
    InvalidToken(u8),
    /// A reserved byte that must be zero was not.
    InvalidReservedByte(u8),
    /// A custom section whose name the host declared it does not accept.
    UnknownCustomSection,

    // Validation errors.
    /// An operand's type does not match what the instruction requires.
    TypeMismatch,
    /// An instruction pops below its frame's operand-stack height.
    StackUnderflow,
    /// A configured operand- or label-stack cap was exceeded.
    StackOverflow,
    /// A branch target deeper than the current control stack.
    InvalidLabel(u32),
    /// A block type referencing a nonexistent function type.
    InvalidBlockType,
    InvalidTypeIndex(u32),
    InvalidFunctionIndex(u32),
    InvalidTableIndex(u32),
    InvalidMemoryIndex(u32),
    InvalidGlobalIndex(u32),
    InvalidLocalIndex(u32),
    /// A memory access alignment exceeding the access width.
    InvalidAlignment { align: u32, width_log2: u32 },
    /// A write to an immutable global.
    MutableGlobalWrite(u32),
    /// A disallowed instruction inside a constant expression.
    ConstantExpressionViolation,
    /// Two exports with byte-identical names.
    DuplicateExportName,
    /// A start function whose type is not `[] -> []`.
    InvalidStart(u32),
    /// Limits violating `min <= max` or a type-specific upper bound.
    InvalidLimits(Limits),
    /// Function and code section entry counts differ.
    FunctionCountMismatch { functions: u32, bodies: u32 },
    /// An `else` outside the then-arm of an `if`.
    MisplacedElse,

    // Resource errors.
    /// A configured cap was exceeded; the payload names the cap.
    ResourceLimit(&'static str),
    /// Memory allocation failed.
    AllocationFailure,
    /// The caller-supplied deadline expired.
    Timeout,

    // Encoder errors.
    /// The module handed to the encoder is internally inconsistent; the
    /// payload names the violated invariant.
    EncoderInvariantViolated(&'static str),
}

impl ErrorKind {
    /// The taxonomy category this kind belongs to.
    pub fn category(self) -> Category {
        use ErrorKind::*;
        match self {
            InvalidMagic(_) | InvalidVersion(_) | UnexpectedEnd | InvalidLeb128 | InvalidUtf8
            | InvalidSectionId(_) | SectionOrder { .. } | DuplicateSection(_)
            | SectionSizeMismatch { .. } | FunctionSizeMismatch { .. } | InvalidOpcode(_)
            | InvalidSatOpcode(_) | InvalidToken(_) | InvalidReservedByte(_)
            | UnknownCustomSection => Category::BinaryFormat,

            TypeMismatch | StackUnderflow | StackOverflow | InvalidLabel(_)
            | InvalidBlockType | InvalidTypeIndex(_) | InvalidFunctionIndex(_)
            | InvalidTableIndex(_) | InvalidMemoryIndex(_) | InvalidGlobalIndex(_)
            | InvalidLocalIndex(_) | InvalidAlignment { .. } | MutableGlobalWrite(_)
            | ConstantExpressionViolation | DuplicateExportName | InvalidStart(_)
            | InvalidLimits(_) | FunctionCountMismatch { .. } | MisplacedElse => {
                Category::Validation
            }

            ResourceLimit(_) | AllocationFailure | Timeout => Category::Resource,

            EncoderInvariantViolated(_) => Category::Encoder,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ErrorKind::*;
        match self {
            InvalidMagic(magic) => write!(f, "invalid magic ({magic:#x})"),
            InvalidVersion(version) => write!(f, "unknown version ({version:#x})"),
            UnexpectedEnd => write!(f, "unexpected end of input"),
            InvalidLeb128 => write!(f, "invalid LEB128-encoding"),
            InvalidUtf8 => write!(f, "invalid UTF-8"),
            InvalidSectionId(id) => write!(f, "invalid section ID ({id:#x})"),
            SectionOrder { before, after } => {
                write!(f, "out-of-order sections: {before:?} before {after:?}")
            }
            DuplicateSection(id) => write!(f, "duplicate of section ({id:?})"),
            SectionSizeMismatch { declared, actual } => write!(
                f,
                "invalid section length: declared {declared:#x}; got {actual:#x}"
            ),
            FunctionSizeMismatch { declared, actual } => write!(
                f,
                "invalid func length: declared {declared:#x}; got {actual:#x}"
            ),
            InvalidOpcode(op) => write!(f, "invalid opcode ({op:#x})"),
            InvalidSatOpcode(op) => write!(f, "invalid saturating opcode ({op:#x})"),
            InvalidToken(token) => write!(f, "invalid byte token ({token:#x})"),
            InvalidReservedByte(byte) => write!(f, "nonzero reserved byte ({byte:#x})"),
            UnknownCustomSection => write!(f, "custom section with unaccepted name"),
            TypeMismatch => write!(f, "type mismatch"),
            StackUnderflow => write!(f, "operand stack underflow"),
            StackOverflow => write!(f, "stack limit exceeded"),
            InvalidLabel(depth) => write!(f, "branch depth {depth} exceeds control stack"),
            InvalidBlockType => write!(f, "invalid block type"),
            InvalidTypeIndex(idx) => write!(f, "type index {idx} out of bounds"),
            InvalidFunctionIndex(idx) => write!(f, "function index {idx} out of bounds"),
            InvalidTableIndex(idx) => write!(f, "table index {idx} out of bounds"),
            InvalidMemoryIndex(idx) => write!(f, "memory index {idx} out of bounds"),
            InvalidGlobalIndex(idx) => write!(f, "global index {idx} out of bounds"),
            InvalidLocalIndex(idx) => write!(f, "local index {idx} out of bounds"),
            InvalidAlignment { align, width_log2 } => write!(
                f,
                "alignment 2^{align} exceeds access width 2^{width_log2}"
            ),
            MutableGlobalWrite(idx) => write!(f, "write to immutable global {idx}"),
            ConstantExpressionViolation => write!(f, "non-constant instruction in constant expression"),
            DuplicateExportName => write!(f, "duplicate export name"),
            InvalidStart(idx) => write!(f, "start function {idx} is not [] -> []"),
            InvalidLimits(limits) => write!(f, "invalid limits ({limits:?})"),
            FunctionCountMismatch { functions, bodies } => write!(
                f,
                "function/code section mismatch: {functions} declarations, {bodies} bodies"
            ),
            MisplacedElse => write!(f, "else outside the then-arm of an if"),
            ResourceLimit(cap) => write!(f, "configured limit exceeded: {cap}"),
            AllocationFailure => write!(f, "allocation failure"),
            Timeout => write!(f, "deadline expired"),
            EncoderInvariantViolated(what) => write!(f, "encoder invariant violated: {what}"),
        }
    }
}

/// An error with its location and context.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Error {
    /// What went wrong.
    pub kind: ErrorKind,
    /// Absolute byte offset where the offending token began; 0 when not
    /// applicable (e.g. structural validation of a decoded module).
    pub offset: usize,
    /// A short static description of what was being processed.
    pub context: &'static str,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, offset: usize) -> Self {
        Self {
            kind,
            offset,
            context: "",
        }
    }

    /// Attaches a context string if none is present yet, so the innermost
    /// (most specific) context wins.
    pub(crate) fn in_context(mut self, context: &'static str) -> Self {
        if self.context.is_empty() {
            self.context = context;
        }
        self
    }

    // LEB128 errors are constructed without location knowledge (offset 0,
    // which is never a LEB start in a well-formed header); stamp them with
    // the encoding's start offset.
    pub(crate) fn attribute_leb(mut self, offset: usize) -> Self {
        if self.kind == ErrorKind::InvalidLeb128 && self.offset == 0 {
            self.offset = offset;
        }
        self
    }

    // Stamps a location on an error built where the offset wasn't known
    // (validation helpers); an already-attributed error is left alone.
    pub(crate) fn at(mut self, offset: usize) -> Self {
        if self.offset == 0 {
            self.offset = offset;
        }
        self
    }

    /// The taxonomy category of this error.
    pub fn category(&self) -> Category {
        self.kind.category()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}: {}", self.offset, self.kind)?;
        if !self.context.is_empty() {
            write!(f, " (in {})", self.context)?;
        }
        Ok(())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Error::new(ErrorKind::AllocationFailure, 0)
    }
}

impl leb128::Error for Error {
    fn invalid_leb128() -> Self {
        Error::new(ErrorKind::InvalidLeb128, 0)
    }
}

newtype!(
    /// An aggregated, deterministically ordered list of validation errors
    /// (by function index, then by instruction offset).
    #[derive(Debug)]
    pub struct Errors<A: Allocator>(Vec<Error, A>);
);

impl<A: Allocator> Errors<A> {
    /// The first error in the deterministic order.
    pub fn first(&self) -> &Error {
        &self.0[0]
    }
}

/// Non-fatal findings the validator may emit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WarningKind {
    /// Well-typed but unreachable code after an unconditional branch.
    UnreachableCode,
}

/// A non-fatal validation finding.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Warning {
    pub kind: WarningKind,
    /// Index of the function the warning was found in.
    pub func: u32,
    /// Absolute byte offset of the first affected instruction.
    pub offset: usize,
}

newtype!(
    /// Warnings collected during validation.
    #[derive(Debug)]
    pub struct Warnings<A: Allocator>(Vec<Warning, A>);
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories() {
        assert_eq!(
            ErrorKind::InvalidMagic(0).category(),
            Category::BinaryFormat
        );
        assert_eq!(ErrorKind::TypeMismatch.category(), Category::Validation);
        assert_eq!(ErrorKind::Timeout.category(), Category::Resource);
        assert_eq!(
            ErrorKind::EncoderInvariantViolated("x").category(),
            Category::Encoder
        );
    }

    #[test]
    fn innermost_context_wins() {
        let err = Error::new(ErrorKind::TypeMismatch, 10)
            .in_context("global initializer")
            .in_context("globalsec");
        assert_eq!(err.context, "global initializer");
    }

    #[test]
    fn leb_attribution_only_applies_to_leb_errors() {
        let leb = Error::new(ErrorKind::InvalidLeb128, 0).attribute_leb(12);
        assert_eq!(leb.offset, 12);

        let other = Error::new(ErrorKind::UnexpectedEnd, 5).attribute_leb(12);
        assert_eq!(other.offset, 5);
    }
}
