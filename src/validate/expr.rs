// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Function-body validation: the type-stack algorithm.
//!
//! The operand stack holds value types plus a single "unknown" sentinel that
//! models stack polymorphism after `unreachable`, `br`, and friends; unknown
//! unifies with anything, and popping below the current frame's height while
//! unreachable yields unknown instead of underflowing. The control stack
//! records one frame per open `block`/`loop`/`if` with the value-stack height
//! at entry. Frames resolve their label types against the module's type
//! section on demand, so neither stack entry allocates.

use crate::Allocator;
use crate::core_compat::vec::Vec;
use crate::error::{Error, ErrorKind, Warning, WarningKind};
use crate::types::{
    BlockType, Expression, Function, Instruction, Opcode, Operands, SatOpcode, TypeIdx, ValType,
    memory_access_width_log2,
};

use super::Validator;

/// A value-stack entry: a concrete type, or the polymorphic unknown.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum StackValue {
    Unknown,
    Val(ValType),
}

// The function-type view of a control frame, resolved lazily so frames stay
// plain-old-data.
#[derive(Clone, Copy, Debug)]
enum FrameTypes {
    Empty,
    Single(ValType),
    Indexed(TypeIdx),
}

// A control-stack frame.
#[derive(Clone, Copy, Debug)]
struct Frame {
    // The opcode that opened the frame (Block, Loop, If, or Else), which
    // decides branch semantics and else/end legality.
    opcode: Opcode,
    types: FrameTypes,
    // Value-stack height at frame entry (before the frame's parameters).
    height: usize,
    // Set once control cannot reach the current position; makes the stack
    // polymorphic up to `height`.
    unreachable: bool,
    // Whether an unreachable-code warning was already emitted for this frame.
    warned: bool,
}

fn frame_params<'x, A: Allocator>(
    validator: &'x Validator<'_, A>,
    types: &'x FrameTypes,
) -> &'x [ValType] {
    match types {
        FrameTypes::Empty | FrameTypes::Single(_) => &[],
        FrameTypes::Indexed(typeidx) => validator
            .function_type(**typeidx)
            .map_or(&[], |ty| ty.parameters.as_slice()),
    }
}

fn frame_results<'x, A: Allocator>(
    validator: &'x Validator<'_, A>,
    types: &'x FrameTypes,
) -> &'x [ValType] {
    match types {
        FrameTypes::Empty => &[],
        FrameTypes::Single(ty) => core::slice::from_ref(ty),
        FrameTypes::Indexed(typeidx) => validator
            .function_type(**typeidx)
            .map_or(&[], |ty| ty.results.as_slice()),
    }
}

// The type a branch to the frame must supply: a loop branches back to its
// entry (parameters), everything else branches forward to its end (results).
fn label_types<'x, A: Allocator>(
    validator: &'x Validator<'_, A>,
    frame_opcode: Opcode,
    types: &'x FrameTypes,
) -> &'x [ValType] {
    if frame_opcode == Opcode::Loop {
        frame_params(validator, types)
    } else {
        frame_results(validator, types)
    }
}

// Extracts an instruction's immediates, tolerating hand-built modules whose
// operand shapes don't match their opcodes.
macro_rules! operands {
    ($instr:expr, $variant:ident) => {
        match &$instr.operands {
            Operands::$variant(value) => value,
            _ => {
                return Err(Error::new(
                    ErrorKind::InvalidOpcode($instr.opcode as u8),
                    0,
                )
                .in_context("operand shape"));
            }
        }
    };
}

struct BodyValidator<'v, 'm, 'w, A: Allocator> {
    validator: &'v Validator<'m, A>,
    // The function's parameters followed by its expanded locals.
    locals: Vec<ValType, A>,
    values: Vec<StackValue, A>,
    frames: Vec<Frame, A>,
    warnings: &'w mut Vec<Warning, A>,
    until_deadline_poll: u32,
}

impl<A: Allocator> BodyValidator<'_, '_, '_, A> {
    fn instruction_deadline(&mut self) -> Result<(), Error> {
        self.until_deadline_poll -= 1;
        if self.until_deadline_poll == 0 {
            self.until_deadline_poll = self.validator.config().deadline_poll_interval.max(1);
            if self.validator.config().deadline.expired() {
                return Err(Error::new(ErrorKind::Timeout, 0));
            }
        }
        Ok(())
    }

    fn push_val(&mut self, value: StackValue) -> Result<(), Error> {
        if self.values.len() >= self.validator.config().max_operand_stack {
            return Err(Error::new(ErrorKind::StackOverflow, 0).in_context("operand stack"));
        }
        if self.values.len() == self.values.capacity() {
            self.values.try_reserve_exact(self.values.len().max(16))?;
        }
        self.values.push(value);
        Ok(())
    }

    fn pop_val(&mut self) -> Result<StackValue, Error> {
        let Some(frame) = self.frames.last() else {
            return Err(Error::new(ErrorKind::StackUnderflow, 0));
        };
        if self.values.len() <= frame.height {
            return if frame.unreachable {
                Ok(StackValue::Unknown)
            } else {
                Err(Error::new(ErrorKind::StackUnderflow, 0))
            };
        }
        // The height guard above means the stack is non-empty.
        self.values.pop().ok_or(Error::new(ErrorKind::StackUnderflow, 0))
    }

    fn pop_expect(&mut self, expected: ValType) -> Result<(), Error> {
        match self.pop_val()? {
            StackValue::Unknown => Ok(()),
            StackValue::Val(actual) if actual == expected => Ok(()),
            StackValue::Val(_) => Err(Error::new(ErrorKind::TypeMismatch, 0)),
        }
    }

    fn pop_vals(&mut self, types: &[ValType]) -> Result<(), Error> {
        for &ty in types.iter().rev() {
            self.pop_expect(ty)?;
        }
        Ok(())
    }

    fn push_vals(&mut self, types: &[ValType]) -> Result<(), Error> {
        for &ty in types {
            self.push_val(StackValue::Val(ty))?;
        }
        Ok(())
    }

    // Opens a control frame whose parameters have already been popped; the
    // frame records the resulting height and the parameters become the top
    // of stack inside the new block.
    fn push_frame(&mut self, opcode: Opcode, types: FrameTypes) -> Result<(), Error> {
        if self.frames.len() >= self.validator.config().max_label_stack {
            return Err(Error::new(ErrorKind::StackOverflow, 0).in_context("label stack"));
        }
        if self.frames.len() == self.frames.capacity() {
            self.frames.try_reserve_exact(self.frames.len().max(8))?;
        }
        self.frames.push(Frame {
            opcode,
            types,
            height: self.values.len(),
            unreachable: false,
            warned: false,
        });
        let validator = self.validator;
        let frame_types = types;
        self.push_vals(frame_params(validator, &frame_types))?;
        Ok(())
    }

    // Closes the innermost frame: the stack must hold exactly the frame's
    // results above its entry height.
    fn pop_frame(&mut self) -> Result<Frame, Error> {
        let Some(frame) = self.frames.last().copied() else {
            return Err(Error::new(ErrorKind::StackUnderflow, 0).in_context("control stack"));
        };
        let validator = self.validator;
        let frame_types = frame.types;
        self.pop_vals(frame_results(validator, &frame_types))?;
        if self.values.len() != frame.height {
            return Err(Error::new(ErrorKind::TypeMismatch, 0).in_context("block result arity"));
        }
        self.frames.pop();
        Ok(frame)
    }

    fn set_unreachable(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            self.values.truncate(frame.height);
            frame.unreachable = true;
        }
    }

    fn frame_at(&self, depth: u32) -> Result<Frame, Error> {
        let len = self.frames.len();
        if (depth as usize) >= len {
            return Err(Error::new(ErrorKind::InvalidLabel(depth), 0));
        }
        Ok(self.frames[len - 1 - depth as usize])
    }

    fn frame_types_of(&self, block_type: BlockType) -> Result<FrameTypes, Error> {
        match block_type {
            BlockType::Empty => Ok(FrameTypes::Empty),
            BlockType::Result(ty) => Ok(FrameTypes::Single(ty)),
            BlockType::TypeIndex(typeidx) => {
                if self.validator.function_type(*typeidx).is_none() {
                    return Err(Error::new(ErrorKind::InvalidBlockType, 0));
                }
                Ok(FrameTypes::Indexed(typeidx))
            }
        }
    }

    fn local_type(&self, index: u32) -> Result<ValType, Error> {
        self.locals
            .get(index as usize)
            .copied()
            .ok_or(Error::new(ErrorKind::InvalidLocalIndex(index), 0))
    }

    fn require_memory(&self) -> Result<(), Error> {
        if self.validator.memory_count() == 0 {
            return Err(Error::new(ErrorKind::InvalidMemoryIndex(0), 0));
        }
        Ok(())
    }

    fn check_alignment(&self, instr: &Instruction<A>) -> Result<(), Error> {
        let memarg = operands!(instr, MemArg);
        // Every opcode routed here performs a memory access.
        let Some(width_log2) = memory_access_width_log2(instr.opcode) else {
            return Err(Error::new(ErrorKind::InvalidOpcode(instr.opcode as u8), 0)
                .in_context("operand shape"));
        };
        if memarg.align > width_log2 {
            return Err(Error::new(
                ErrorKind::InvalidAlignment {
                    align: memarg.align,
                    width_log2,
                },
                0,
            ));
        }
        Ok(())
    }

    fn load(&mut self, instr: &Instruction<A>, ty: ValType) -> Result<(), Error> {
        self.require_memory()?;
        self.check_alignment(instr)?;
        self.pop_expect(ValType::I32)?;
        self.push_val(StackValue::Val(ty))
    }

    fn store(&mut self, instr: &Instruction<A>, ty: ValType) -> Result<(), Error> {
        self.require_memory()?;
        self.check_alignment(instr)?;
        self.pop_expect(ty)?;
        self.pop_expect(ValType::I32)
    }

    fn constop(&mut self, ty: ValType) -> Result<(), Error> {
        self.push_val(StackValue::Val(ty))
    }

    fn testop(&mut self, ty: ValType) -> Result<(), Error> {
        self.pop_expect(ty)?;
        self.push_val(StackValue::Val(ValType::I32))
    }

    fn relop(&mut self, ty: ValType) -> Result<(), Error> {
        self.pop_expect(ty)?;
        self.pop_expect(ty)?;
        self.push_val(StackValue::Val(ValType::I32))
    }

    fn unop(&mut self, ty: ValType) -> Result<(), Error> {
        self.pop_expect(ty)?;
        self.push_val(StackValue::Val(ty))
    }

    fn binop(&mut self, ty: ValType) -> Result<(), Error> {
        self.pop_expect(ty)?;
        self.pop_expect(ty)?;
        self.push_val(StackValue::Val(ty))
    }

    fn cvtop(&mut self, from: ValType, to: ValType) -> Result<(), Error> {
        self.pop_expect(from)?;
        self.push_val(StackValue::Val(to))
    }

    fn step(&mut self, instr: &Instruction<A>) -> Result<(), Error> {
        use Opcode::*;
        use ValType::{F32, F64, I32, I64};

        match instr.opcode {
            Nop => {}
            Unreachable => self.set_unreachable(),

            Block | Loop | If => {
                if instr.opcode == If {
                    self.pop_expect(I32)?;
                }
                let types = self.frame_types_of(*operands!(instr, BlockType))?;
                let validator = self.validator;
                let frame_types = types;
                self.pop_vals(frame_params(validator, &frame_types))?;
                self.push_frame(instr.opcode, types)?;
            }
            Else => {
                let frame = self.pop_frame()?;
                if frame.opcode != If {
                    return Err(Error::new(ErrorKind::MisplacedElse, 0));
                }
                self.push_frame(Else, frame.types)?;
            }
            End => {
                let frame = self.pop_frame()?;
                if frame.opcode == If {
                    // An `if` with no `else` has an implicit empty else-arm,
                    // which is well-typed only if inputs equal outputs.
                    let validator = self.validator;
                    let frame_types = frame.types;
                    if frame_params(validator, &frame_types)
                        != frame_results(validator, &frame_types)
                    {
                        return Err(
                            Error::new(ErrorKind::TypeMismatch, 0).in_context("if without else")
                        );
                    }
                }
                let validator = self.validator;
                let frame_types = frame.types;
                self.push_vals(frame_results(validator, &frame_types))?;
            }
            Br => {
                let depth = **operands!(instr, Label);
                let frame = self.frame_at(depth)?;
                let frame_types = frame.types;
                let label = label_types(self.validator, frame.opcode, &frame_types);
                self.pop_vals(label)?;
                self.set_unreachable();
            }
            BrIf => {
                let depth = **operands!(instr, Label);
                self.pop_expect(I32)?;
                let frame = self.frame_at(depth)?;
                let frame_types = frame.types;
                let label = label_types(self.validator, frame.opcode, &frame_types);
                self.pop_vals(label)?;
                self.push_vals(label)?;
            }
            BrTable => {
                let targets = operands!(instr, BrTable);
                self.pop_expect(I32)?;
                let default = self.frame_at(*targets.default)?;
                let default_types = default.types;
                let default_label = label_types(self.validator, default.opcode, &default_types);
                for label in targets.labels.iter() {
                    let frame = self.frame_at(**label)?;
                    let frame_types = frame.types;
                    let target_label = label_types(self.validator, frame.opcode, &frame_types);
                    if target_label != default_label {
                        return Err(
                            Error::new(ErrorKind::TypeMismatch, 0).in_context("br_table labels")
                        );
                    }
                }
                self.pop_vals(default_label)?;
                self.set_unreachable();
            }
            Return => {
                // `return` is a branch to the function's outermost frame.
                let Some(entry) = self.frames.first().copied() else {
                    return Err(Error::new(ErrorKind::StackUnderflow, 0).in_context("return"));
                };
                let frame_types = entry.types;
                let results = frame_results(self.validator, &frame_types);
                self.pop_vals(results)?;
                self.set_unreachable();
            }
            Call => {
                let funcidx = **operands!(instr, Func);
                let Some(signature) = self.validator.function_signature(funcidx) else {
                    return Err(Error::new(ErrorKind::InvalidFunctionIndex(funcidx), 0));
                };
                self.pop_vals(signature.parameters.as_slice())?;
                self.push_vals(signature.results.as_slice())?;
            }
            CallIndirect => {
                let typeidx = **operands!(instr, CallIndirect);
                if self.validator.table_count() == 0 {
                    return Err(Error::new(ErrorKind::InvalidTableIndex(0), 0));
                }
                let Some(signature) = self.validator.function_type(typeidx) else {
                    return Err(Error::new(ErrorKind::InvalidTypeIndex(typeidx), 0));
                };
                self.pop_expect(I32)?;
                self.pop_vals(signature.parameters.as_slice())?;
                self.push_vals(signature.results.as_slice())?;
            }

            Drop => {
                self.pop_val()?;
            }
            Select => {
                self.pop_expect(I32)?;
                let first = self.pop_val()?;
                let second = self.pop_val()?;
                let unified = match (first, second) {
                    (StackValue::Unknown, other) | (other, StackValue::Unknown) => other,
                    (StackValue::Val(a), StackValue::Val(b)) if a == b => StackValue::Val(a),
                    _ => return Err(Error::new(ErrorKind::TypeMismatch, 0).in_context("select")),
                };
                self.push_val(unified)?;
            }

            LocalGet => {
                let index = **operands!(instr, Local);
                let ty = self.local_type(index)?;
                self.push_val(StackValue::Val(ty))?;
            }
            LocalSet => {
                let index = **operands!(instr, Local);
                let ty = self.local_type(index)?;
                self.pop_expect(ty)?;
            }
            LocalTee => {
                let index = **operands!(instr, Local);
                let ty = self.local_type(index)?;
                self.pop_expect(ty)?;
                self.push_val(StackValue::Val(ty))?;
            }
            GlobalGet => {
                let index = **operands!(instr, Global);
                let Some(global) = self.validator.global_type(index) else {
                    return Err(Error::new(ErrorKind::InvalidGlobalIndex(index), 0));
                };
                self.push_val(StackValue::Val(global.value))?;
            }
            GlobalSet => {
                let index = **operands!(instr, Global);
                let Some(global) = self.validator.global_type(index) else {
                    return Err(Error::new(ErrorKind::InvalidGlobalIndex(index), 0));
                };
                if global.mutability == crate::types::Mutability::Const {
                    return Err(Error::new(ErrorKind::MutableGlobalWrite(index), 0));
                }
                self.pop_expect(global.value)?;
            }

            I32Load | I32Load8S | I32Load8U | I32Load16S | I32Load16U => self.load(instr, I32)?,
            I64Load | I64Load8S | I64Load8U | I64Load16S | I64Load16U | I64Load32S
            | I64Load32U => self.load(instr, I64)?,
            F32Load => self.load(instr, F32)?,
            F64Load => self.load(instr, F64)?,
            I32Store | I32Store8 | I32Store16 => self.store(instr, I32)?,
            I64Store | I64Store8 | I64Store16 | I64Store32 => self.store(instr, I64)?,
            F32Store => self.store(instr, F32)?,
            F64Store => self.store(instr, F64)?,
            MemorySize => {
                self.require_memory()?;
                self.push_val(StackValue::Val(I32))?;
            }
            MemoryGrow => {
                self.require_memory()?;
                self.pop_expect(I32)?;
                self.push_val(StackValue::Val(I32))?;
            }

            I32Const => self.constop(I32)?,
            I64Const => self.constop(I64)?,
            F32Const => self.constop(F32)?,
            F64Const => self.constop(F64)?,

            I32Eqz => self.testop(I32)?,
            I64Eqz => self.testop(I64)?,

            I32Eq | I32Ne | I32LtS | I32LtU | I32GtS | I32GtU | I32LeS | I32LeU | I32GeS
            | I32GeU => self.relop(I32)?,
            I64Eq | I64Ne | I64LtS | I64LtU | I64GtS | I64GtU | I64LeS | I64LeU | I64GeS
            | I64GeU => self.relop(I64)?,
            F32Eq | F32Ne | F32Lt | F32Gt | F32Le | F32Ge => self.relop(F32)?,
            F64Eq | F64Ne | F64Lt | F64Gt | F64Le | F64Ge => self.relop(F64)?,

            I32Clz | I32Ctz | I32Popcnt => self.unop(I32)?,
            I64Clz | I64Ctz | I64Popcnt => self.unop(I64)?,
            F32Abs | F32Neg | F32Ceil | F32Floor | F32Trunc | F32Nearest | F32Sqrt => {
                self.unop(F32)?;
            }
            F64Abs | F64Neg | F64Ceil | F64Floor | F64Trunc | F64Nearest | F64Sqrt => {
                self.unop(F64)?;
            }

            I32Add | I32Sub | I32Mul | I32DivS | I32DivU | I32RemS | I32RemU | I32And | I32Or
            | I32Xor | I32Shl | I32ShrS | I32ShrU | I32Rotl | I32Rotr => self.binop(I32)?,
            I64Add | I64Sub | I64Mul | I64DivS | I64DivU | I64RemS | I64RemU | I64And | I64Or
            | I64Xor | I64Shl | I64ShrS | I64ShrU | I64Rotl | I64Rotr => self.binop(I64)?,
            F32Add | F32Sub | F32Mul | F32Div | F32Min | F32Max | F32Copysign => {
                self.binop(F32)?;
            }
            F64Add | F64Sub | F64Mul | F64Div | F64Min | F64Max | F64Copysign => {
                self.binop(F64)?;
            }

            I32WrapI64 => self.cvtop(I64, I32)?,
            I32TruncF32S | I32TruncF32U => self.cvtop(F32, I32)?,
            I32TruncF64S | I32TruncF64U => self.cvtop(F64, I32)?,
            I64ExtendI32S | I64ExtendI32U => self.cvtop(I32, I64)?,
            I64TruncF32S | I64TruncF32U => self.cvtop(F32, I64)?,
            I64TruncF64S | I64TruncF64U => self.cvtop(F64, I64)?,
            F32ConvertI32S | F32ConvertI32U => self.cvtop(I32, F32)?,
            F32ConvertI64S | F32ConvertI64U => self.cvtop(I64, F32)?,
            F32DemoteF64 => self.cvtop(F64, F32)?,
            F64ConvertI32S | F64ConvertI32U => self.cvtop(I32, F64)?,
            F64ConvertI64S | F64ConvertI64U => self.cvtop(I64, F64)?,
            F64PromoteF32 => self.cvtop(F32, F64)?,
            I32ReinterpretF32 => self.cvtop(F32, I32)?,
            I64ReinterpretF64 => self.cvtop(F64, I64)?,
            F32ReinterpretI32 => self.cvtop(I32, F32)?,
            F64ReinterpretI64 => self.cvtop(I64, F64)?,

            SatPrefix => match operands!(instr, Sat) {
                SatOpcode::I32TruncSatF32S | SatOpcode::I32TruncSatF32U => self.cvtop(F32, I32)?,
                SatOpcode::I32TruncSatF64S | SatOpcode::I32TruncSatF64U => self.cvtop(F64, I32)?,
                SatOpcode::I64TruncSatF32S | SatOpcode::I64TruncSatF32U => self.cvtop(F32, I64)?,
                SatOpcode::I64TruncSatF64S | SatOpcode::I64TruncSatF64U => self.cvtop(F64, I64)?,
            },
        }
        Ok(())
    }
}

/// Validates one function body against its declared signature.
pub(super) fn validate_body<A: Allocator>(
    validator: &Validator<'_, A>,
    func_index: u32,
    typeidx: TypeIdx,
    function: &Function<A>,
    warnings: &mut Vec<Warning, A>,
    alloc: A,
) -> Result<(), Error> {
    let config = validator.config();
    let Some(signature) = validator.function_type(*typeidx) else {
        return Err(Error::new(ErrorKind::InvalidTypeIndex(*typeidx), 0));
    };

    let local_count = function.local_count();
    if local_count > u64::from(config.max_locals_per_function) {
        return Err(Error::new(
            ErrorKind::ResourceLimit("max_locals_per_function"),
            0,
        ));
    }

    // Parameters occupy the low local indices; declared locals follow,
    // zero-initialised (their default value doesn't matter for typing).
    let mut locals = Vec::new_in(alloc.clone());
    locals.try_reserve_exact(signature.parameters.len() + local_count as usize)?;
    locals.extend_from_slice(signature.parameters.as_slice());
    for run in function.locals.iter() {
        for _ in 0..run.count {
            locals.push(run.ty);
        }
    }

    let mut frames = Vec::new_in(alloc.clone());
    frames.try_reserve_exact(8)?;
    frames.push(Frame {
        opcode: Opcode::Block,
        types: FrameTypes::Indexed(typeidx),
        height: 0,
        unreachable: false,
        warned: false,
    });

    let mut body = BodyValidator {
        validator,
        locals,
        values: Vec::new_in(alloc),
        frames,
        warnings,
        until_deadline_poll: config.deadline_poll_interval.max(1),
    };

    for instr in function.body.iter() {
        body.instruction_deadline()?;

        if body.frames.is_empty() {
            // The outermost `end` was already consumed; nothing may follow.
            return Err(Error::new(ErrorKind::TypeMismatch, instr.offset)
                .in_context("code after function end"));
        }

        if config.collect_warnings
            && let Some(frame) = body.frames.last_mut()
            && frame.unreachable
            && !frame.warned
            && !matches!(instr.opcode, Opcode::End | Opcode::Else)
        {
            frame.warned = true;
            body.warnings.try_reserve_exact(1)?;
            body.warnings.push(Warning {
                kind: WarningKind::UnreachableCode,
                func: func_index,
                offset: instr.offset,
            });
        }

        body.step(instr).map_err(|err| err.at(instr.offset))?;
    }

    if !body.frames.is_empty() {
        // The body ran out of instructions with open frames: no final `end`.
        return Err(Error::new(ErrorKind::UnexpectedEnd, 0).in_context("unterminated body"));
    }
    Ok(())
}

/// Validates a constant expression: `*.const` or `global.get` of an imported
/// immutable global, terminated by `end`, producing exactly `expected`.
pub(super) fn validate_constant_expression<A: Allocator>(
    validator: &Validator<'_, A>,
    expr: &Expression<A>,
    expected: ValType,
) -> Result<(), Error> {
    // Constant instructions only push, so tracking the depth and the last
    // pushed type suffices: the expression is valid iff exactly one value of
    // the expected type is on the stack at `end`.
    let mut depth = 0usize;
    let mut pushed = None;

    for instr in expr.iter() {
        let ty = match instr.opcode {
            Opcode::I32Const => ValType::I32,
            Opcode::I64Const => ValType::I64,
            Opcode::F32Const => ValType::F32,
            Opcode::F64Const => ValType::F64,
            Opcode::GlobalGet => {
                let index = **operands!(instr, Global);
                if validator.global_type(index).is_none() {
                    return Err(Error::new(ErrorKind::InvalidGlobalIndex(index), instr.offset));
                }
                let Some(ty) = validator.imported_immutable_global(index) else {
                    return Err(Error::new(
                        ErrorKind::ConstantExpressionViolation,
                        instr.offset,
                    ));
                };
                ty
            }
            Opcode::End => {
                if depth == 1 && pushed == Some(expected) {
                    return Ok(());
                }
                return Err(Error::new(ErrorKind::TypeMismatch, instr.offset)
                    .in_context("constant expression"));
            }
            _ => {
                return Err(Error::new(
                    ErrorKind::ConstantExpressionViolation,
                    instr.offset,
                ));
            }
        };
        depth += 1;
        pushed = Some(ty);
    }

    // No terminating `end`.
    Err(Error::new(ErrorKind::UnexpectedEnd, 0).in_context("constant expression"))
}
