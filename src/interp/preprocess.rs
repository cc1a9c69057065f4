//! Preprocessing pass.
//!
//! One linear scan over the decoded instruction stream before the
//! fixpoint runs: reject unsupported constructs, map each `POP_BLOCK` /
//! `POP_EXCEPT` back to the instruction that opened that block, and
//! record sequence-buffer size hints for opcodes that may need a spilled
//! buffer.

use rustc_hash::FxHashMap;

use crate::bytecode::{Code, DecodedInstr, Opcode};

use super::UnsupportedReason;

pub struct PreprocessResult {
    pub unsupported: Option<UnsupportedReason>,
    /// `POP_BLOCK`/`POP_EXCEPT` offset -> the `SETUP_FINALLY` offset that
    /// opened the block being closed.
    pub pop_opens: FxHashMap<usize, usize>,
    /// Opcode offset -> element/sequence-buffer size hint, for
    /// `UNPACK_SEQUENCE`, `UNPACK_EX`, `BUILD_STRING`.
    pub seq_hints: FxHashMap<usize, usize>,
}

const FORBIDDEN_GLOBALS: [&str; 4] = ["vars", "dir", "locals", "eval"];

pub fn run(code: &Code, instrs: &[DecodedInstr]) -> PreprocessResult {
    if code.is_coroutine() || code.is_generator() {
        return PreprocessResult {
            unsupported: Some(UnsupportedReason::CoroutineOrGenerator),
            pop_opens: FxHashMap::default(),
            seq_hints: FxHashMap::default(),
        };
    }

    let mut pop_opens = FxHashMap::default();
    let mut seq_hints = FxHashMap::default();
    let mut block_stack: Vec<usize> = Vec::new();

    for instr in instrs {
        match instr.opcode {
            Opcode::YieldValue | Opcode::YieldFrom => {
                return PreprocessResult {
                    unsupported: Some(UnsupportedReason::YieldFamily),
                    pop_opens,
                    seq_hints,
                };
            }
            Opcode::SetupWith | Opcode::SetupAsyncWith | Opcode::BeforeAsyncWith
            | Opcode::GetAwaitable | Opcode::GetAiter | Opcode::GetAnext => {
                return PreprocessResult {
                    unsupported: Some(UnsupportedReason::WithStatement),
                    pop_opens,
                    seq_hints,
                };
            }
            Opcode::LoadGlobal => {
                if let Some(name) = code.names.get(instr.arg as usize) {
                    if FORBIDDEN_GLOBALS.contains(&name.as_str()) {
                        return PreprocessResult {
                            unsupported: Some(UnsupportedReason::FrameIntrospectionGlobal),
                            pop_opens,
                            seq_hints,
                        };
                    }
                }
            }
            Opcode::SetupFinally => {
                block_stack.push(instr.offset);
            }
            Opcode::PopBlock | Opcode::PopExcept => {
                if let Some(open) = block_stack.pop() {
                    pop_opens.insert(instr.offset, open);
                }
            }
            Opcode::UnpackSequence | Opcode::UnpackEx | Opcode::BuildString => {
                seq_hints.insert(instr.offset, instr.arg as usize);
            }
            _ => {}
        }
    }

    PreprocessResult { unsupported: None, pop_opens, seq_hints }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{decode_function, CodeFlags};

    fn code_with(bytes: Vec<u8>) -> Code {
        Code::new("f", bytes, 0)
    }

    #[test]
    fn generator_flag_is_rejected_before_scanning() {
        let mut code = code_with(vec![Opcode::ReturnValue as u8, 0]);
        code.flags |= CodeFlags::GENERATOR;
        let instrs = decode_function(&code.code).unwrap();
        let result = run(&code, &instrs);
        assert_eq!(result.unsupported, Some(UnsupportedReason::CoroutineOrGenerator));
    }

    #[test]
    fn yield_is_rejected() {
        let code = code_with(vec![Opcode::YieldValue as u8, 0, Opcode::ReturnValue as u8, 0]);
        let instrs = decode_function(&code.code).unwrap();
        let result = run(&code, &instrs);
        assert_eq!(result.unsupported, Some(UnsupportedReason::YieldFamily));
    }

    #[test]
    fn setup_with_is_rejected() {
        let code = code_with(vec![Opcode::SetupWith as u8, 4, Opcode::ReturnValue as u8, 0]);
        let instrs = decode_function(&code.code).unwrap();
        let result = run(&code, &instrs);
        assert_eq!(result.unsupported, Some(UnsupportedReason::WithStatement));
    }

    #[test]
    fn forbidden_global_name_is_rejected() {
        let mut code = code_with(vec![Opcode::LoadGlobal as u8, 0, Opcode::ReturnValue as u8, 0]);
        code.names.push("eval".to_string());
        let instrs = decode_function(&code.code).unwrap();
        let result = run(&code, &instrs);
        assert_eq!(result.unsupported, Some(UnsupportedReason::FrameIntrospectionGlobal));
    }

    #[test]
    fn ordinary_global_is_accepted() {
        let mut code = code_with(vec![Opcode::LoadGlobal as u8, 0, Opcode::ReturnValue as u8, 0]);
        code.names.push("len".to_string());
        let instrs = decode_function(&code.code).unwrap();
        let result = run(&code, &instrs);
        assert!(result.unsupported.is_none());
    }

    #[test]
    fn pop_block_maps_back_to_setup_finally() {
        let code = code_with(vec![
            Opcode::SetupFinally as u8, 4,
            Opcode::PopBlock as u8, 0,
            Opcode::ReturnValue as u8, 0,
        ]);
        let instrs = decode_function(&code.code).unwrap();
        let result = run(&code, &instrs);
        assert_eq!(result.pop_opens.get(&2), Some(&0));
    }

    #[test]
    fn unpack_sequence_records_count_hint() {
        let code = code_with(vec![Opcode::UnpackSequence as u8, 3, Opcode::ReturnValue as u8, 0]);
        let instrs = decode_function(&code.code).unwrap();
        let result = run(&code, &instrs);
        assert_eq!(result.seq_hints.get(&0), Some(&3));
    }
}
