//! Bytecode instruction decoder.
//!
//! Decodes the fixed-width `(opcode, argument)` unit stream into typed
//! instructions, folding any `EXTENDED_ARG` prefix units into the argument
//! of the instruction they precede.

use super::opcode::Opcode;

/// Error during bytecode decoding.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid opcode byte {byte:#x} at offset {offset}")]
    InvalidOpcode { byte: u8, offset: usize },
    #[error("unexpected end of bytecode at offset {0}")]
    UnexpectedEnd(usize),
    #[error("EXTENDED_ARG at offset {0} is not followed by another instruction")]
    DanglingExtendedArg(usize),
}

/// A decoded instruction with its `EXTENDED_ARG` prefixes folded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstr {
    /// Offset of the first unit in this instruction's group (i.e. of the
    /// first `EXTENDED_ARG`, if any precede it). Jump targets in the
    /// bytecode stream refer to offsets of this kind.
    pub offset: usize,
    pub opcode: Opcode,
    /// The fully-widened argument, after combining any `EXTENDED_ARG` prefixes.
    pub arg: u32,
    /// Total size in bytes of this instruction's group, including any
    /// `EXTENDED_ARG` prefix units.
    pub size: usize,
}

const UNIT_SIZE: usize = 2;

/// Decode every instruction in a function's bytecode, in stream order.
pub fn decode_function(code: &[u8]) -> Result<Vec<DecodedInstr>, DecodeError> {
    let mut instrs = Vec::new();
    let mut pos = 0;
    let mut ext_arg: u32 = 0;
    let mut group_start: Option<usize> = None;

    while pos < code.len() {
        if pos + UNIT_SIZE > code.len() {
            return Err(DecodeError::UnexpectedEnd(pos));
        }
        let unit_offset = pos;
        let byte = code[pos];
        let arg_byte = code[pos + 1];
        pos += UNIT_SIZE;

        let opcode = Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode {
            byte,
            offset: unit_offset,
        })?;

        let start = group_start.unwrap_or(unit_offset);

        if opcode == Opcode::ExtendedArg {
            ext_arg = (ext_arg << 8) | arg_byte as u32;
            group_start = Some(start);
            continue;
        }

        let arg = (ext_arg << 8) | arg_byte as u32;
        ext_arg = 0;
        group_start = None;

        instrs.push(DecodedInstr {
            offset: start,
            opcode,
            arg,
            size: pos - start,
        });
    }

    if group_start.is_some() {
        return Err(DecodeError::DanglingExtendedArg(pos));
    }

    Ok(instrs)
}

/// Convenience accessor used throughout the interpreter and code generator:
/// find the decoded instruction whose group starts at `offset`, if any.
pub fn instr_at(instrs: &[DecodedInstr], offset: usize) -> Option<&DecodedInstr> {
    instrs.iter().find(|i| i.offset == offset)
}
