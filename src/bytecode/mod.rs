//! The bytecode view: opcode set, `Code` object, and decoder.

pub mod code;
pub mod decoder;
pub mod opcode;

pub use code::{Code, CodeFlags, Constant};
pub use decoder::{decode_function, instr_at, DecodeError, DecodedInstr};
pub use opcode::Opcode;
