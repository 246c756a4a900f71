// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Expression encoding.
//!
//! Instructions are emitted in their original order with immediates encoded
//! per the opcode's operand shape; stripped reserved zero bytes are
//! reinstated. An instruction whose stored operands don't match its opcode's
//! shape fails with `EncoderInvariantViolated`.

use crate::Allocator;
use crate::error::{Error, ErrorKind};
use crate::types::{BlockType, Expression, OperandShape, Operands, operand_shape};

use super::Writer;

fn shape_mismatch() -> Error {
    Error::new(ErrorKind::EncoderInvariantViolated("operand shape"), 0)
}

pub(super) fn encode_expression<A: Allocator, B: Allocator>(
    writer: &mut Writer<B>,
    expr: &Expression<A>,
) -> Result<(), Error> {
    for instr in expr.iter() {
        writer.byte(instr.opcode as u8)?;
        match (operand_shape(instr.opcode), &instr.operands) {
            (OperandShape::None, Operands::None) => {}
            (OperandShape::BlockType, Operands::BlockType(block_type)) => match block_type {
                BlockType::Empty => writer.byte(0x40)?,
                BlockType::Result(ty) => writer.byte(*ty as u8)?,
                BlockType::TypeIndex(typeidx) => writer.var_s33(i64::from(**typeidx))?,
            },
            (OperandShape::Label, Operands::Label(label)) => writer.var_u32(**label)?,
            (OperandShape::BrTable, Operands::BrTable(targets)) => {
                let count = u32::try_from(targets.labels.len()).map_err(|_| {
                    Error::new(ErrorKind::EncoderInvariantViolated("count overflow"), 0)
                })?;
                writer.var_u32(count)?;
                for label in targets.labels.iter() {
                    writer.var_u32(**label)?;
                }
                writer.var_u32(*targets.default)?;
            }
            (OperandShape::Func, Operands::Func(funcidx)) => writer.var_u32(**funcidx)?,
            (OperandShape::CallIndirect, Operands::CallIndirect(typeidx)) => {
                writer.var_u32(**typeidx)?;
                writer.byte(0x00)?;
            }
            (OperandShape::Local, Operands::Local(local)) => writer.var_u32(**local)?,
            (OperandShape::Global, Operands::Global(global)) => writer.var_u32(**global)?,
            (OperandShape::MemArg, Operands::MemArg(memarg)) => {
                writer.var_u32(memarg.align)?;
                writer.var_u32(memarg.offset)?;
            }
            (OperandShape::Reserved, Operands::None) => writer.byte(0x00)?,
            (OperandShape::I32, Operands::I32(value)) => writer.var_i32(*value)?,
            (OperandShape::I64, Operands::I64(value)) => writer.var_i64(*value)?,
            (OperandShape::F32, Operands::F32(value)) => writer.f32(*value)?,
            (OperandShape::F64, Operands::F64(value)) => writer.f64(*value)?,
            (OperandShape::Sat, Operands::Sat(sat)) => writer.var_u32(*sat as u32)?,
            _ => return Err(shape_mismatch()),
        }
    }
    Ok(())
}
