// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Expression decoding.
//!
//! An expression is decoded into the flat instruction sequence as written,
//! `else` and nested `end`s included, terminated by the `end` that closes
//! the outermost block. Each instruction records the absolute offset of its
//! opcode byte so later pipeline stages can attribute errors precisely.

use crate::Allocator;
use crate::core_compat::vec::Vec;
use crate::error::{Error, ErrorKind};
use crate::types::{
    BlockType, BrTableOperands, Expression, FuncIdx, GlobalIdx, Instruction, LabelIdx, LocalIdx,
    MemArg, Opcode, OperandShape, Operands, SatOpcode, TypeIdx, ValType, operand_shape,
};

use super::Decoder;

impl<A: Allocator> Decoder<'_, A> {
    fn read_block_type(&mut self) -> Result<BlockType, Error> {
        let offset = self.position();
        let value = self.read_var_s33()?;
        if value >= 0 {
            // Non-negative block types are type-section indices; the s33
            // range keeps them within u32.
            return Ok(BlockType::TypeIndex(TypeIdx::new(value as u32)));
        }
        // Negative values are single-byte tokens folded through the signed
        // encoding: token byte = value + 0x80.
        match u8::try_from(value + 0x80) {
            Ok(0x40) => Ok(BlockType::Empty),
            Ok(byte) => match ValType::try_from(byte) {
                Ok(valtype) => Ok(BlockType::Result(valtype)),
                Err(_) => {
                    Err(Error::new(ErrorKind::InvalidToken(byte), offset).in_context("blocktype"))
                }
            },
            Err(_) => Err(Error::new(ErrorKind::InvalidBlockType, offset).in_context("blocktype")),
        }
    }

    fn read_br_table(&mut self) -> Result<BrTableOperands<A>, Error> {
        Ok(BrTableOperands {
            labels: self.read_vec(|d| Ok(LabelIdx::new(d.read_var_u32()?)))?,
            default: LabelIdx::new(self.read_var_u32()?),
        })
    }

    fn read_sat_opcode(&mut self) -> Result<SatOpcode, Error> {
        let offset = self.position();
        let value = self.read_var_u32()?;
        SatOpcode::try_from(value)
            .map_err(|_| Error::new(ErrorKind::InvalidSatOpcode(value), offset))
    }
}

/// Decodes one expression, through its terminating `end`.
pub(crate) fn decode_expression<A: Allocator>(
    decoder: &mut Decoder<'_, A>,
) -> Result<Expression<A>, Error> {
    let mut instructions = Vec::new_in(decoder.alloc().clone());
    let mut depth: usize = 0;

    loop {
        decoder.instruction_deadline()?;

        let offset = decoder.position();
        let byte = decoder.read_byte()?;
        let opcode = Opcode::try_from(byte)
            .map_err(|_| Error::new(ErrorKind::InvalidOpcode(byte), offset))?;
        if opcode == Opcode::SatPrefix && !decoder.config().saturating_truncation {
            return Err(Error::new(ErrorKind::InvalidOpcode(byte), offset));
        }

        let operands = match operand_shape(opcode) {
            OperandShape::None => Operands::None,
            OperandShape::BlockType => Operands::BlockType(decoder.read_block_type()?),
            OperandShape::Label => Operands::Label(LabelIdx::new(decoder.read_var_u32()?)),
            OperandShape::BrTable => Operands::BrTable(decoder.read_br_table()?),
            OperandShape::Func => Operands::Func(FuncIdx::new(decoder.read_var_u32()?)),
            OperandShape::CallIndirect => {
                let ty = TypeIdx::new(decoder.read_var_u32()?);
                decoder.read_zero_byte()?;
                Operands::CallIndirect(ty)
            }
            OperandShape::Local => Operands::Local(LocalIdx::new(decoder.read_var_u32()?)),
            OperandShape::Global => Operands::Global(GlobalIdx::new(decoder.read_var_u32()?)),
            OperandShape::MemArg => Operands::MemArg(MemArg {
                align: decoder.read_var_u32()?,
                offset: decoder.read_var_u32()?,
            }),
            OperandShape::Reserved => {
                decoder.read_zero_byte()?;
                Operands::None
            }
            OperandShape::I32 => Operands::I32(decoder.read_var_i32()?),
            OperandShape::I64 => Operands::I64(decoder.read_var_i64()?),
            OperandShape::F32 => Operands::F32(decoder.read_f32()?),
            OperandShape::F64 => Operands::F64(decoder.read_f64()?),
            OperandShape::Sat => Operands::Sat(decoder.read_sat_opcode()?),
        };

        if instructions.len() == instructions.capacity() {
            instructions.try_reserve_exact(instructions.len().max(16))?;
        }
        instructions.push(Instruction {
            offset,
            opcode,
            operands,
        });

        match opcode {
            Opcode::Block | Opcode::Loop | Opcode::If => {
                depth += 1;
                if depth > decoder.config().max_label_stack {
                    return Err(Error::new(
                        ErrorKind::ResourceLimit("max_label_stack"),
                        offset,
                    ));
                }
            }
            Opcode::End => {
                if depth == 0 {
                    return Ok(Expression::new(instructions));
                }
                depth -= 1;
            }
            _ => {}
        }
    }
}
