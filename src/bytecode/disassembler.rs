//! Bytecode disassembler for debugging.

use std::fmt::Write;

use crate::bytecode::chunk::Chunk;
use crate::bytecode::instruction::OpCode;
use crate::bytecode::module::Module;

/// Disassemble a whole module into human-readable output.
pub fn disassemble_module(module: &Module) -> String {
    let mut output = String::new();

    for (id, function) in module.functions.iter().enumerate() {
        writeln!(&mut output, "== fn #{} ==", id).unwrap();
        disassemble_chunk(function, &mut output);
        writeln!(&mut output).unwrap();
    }

    writeln!(&mut output, "== main ==").unwrap();
    disassemble_chunk(&module.main, &mut output);

    output
}

/// Disassemble a chunk into human-readable output.
pub fn disassemble_chunk(chunk: &Chunk, output: &mut String) {
    let mut offset = 0;

    while offset < chunk.code.len() {
        offset = disassemble_instruction(chunk, offset, output);
    }
}

/// Disassemble a single instruction, returning the next offset.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize, output: &mut String) -> usize {
    write!(output, "{:04} ", offset).unwrap();

    let byte = chunk.code[offset];
    let opcode = match OpCode::from_u8(byte) {
        Some(op) => op,
        None => {
            writeln!(output, "Unknown opcode {:#04X}", byte).unwrap();
            return offset + 1;
        }
    };

    if opcode.operand_size() == 0 {
        writeln!(output, "{}", opcode.name()).unwrap();
        return offset + 1;
    }

    if offset + 5 > chunk.code.len() {
        writeln!(output, "{} <truncated>", opcode.name()).unwrap();
        return chunk.code.len();
    }

    let operand = chunk.read_u32(offset + 1);
    match opcode {
        OpCode::Const | OpCode::Load | OpCode::Store => {
            write!(output, "{:<8} {}", opcode.name(), operand).unwrap();
            match chunk.constants.get(operand as usize) {
                Some(value) => writeln!(output, " ; {}", value).unwrap(),
                None => writeln!(output, " ; <out of bounds>").unwrap(),
            }
        }
        OpCode::Jmp | OpCode::JmpF => {
            writeln!(output, "{:<8} -> {:04}", opcode.name(), operand).unwrap();
        }
        _ => {
            writeln!(output, "{:<8} {}", opcode.name(), operand).unwrap();
        }
    }

    offset + 5
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::chunk::Value;

    #[test]
    fn test_disassemble_chunk() {
        let mut chunk = Chunk::new();
        let idx = chunk.add_constant(Value::Number(42.0));
        chunk.write_op(OpCode::Const);
        chunk.write_u32(idx);
        chunk.write_op(OpCode::Ret);

        let mut output = String::new();
        disassemble_chunk(&chunk, &mut output);

        assert!(output.contains("CONST"));
        assert!(output.contains("42"));
        assert!(output.contains("RET"));
    }

    #[test]
    fn test_disassemble_jump_target() {
        let mut chunk = Chunk::new();
        let operand_at = chunk.emit_jump(OpCode::JmpF);
        chunk.write_op(OpCode::Pop);
        chunk.patch_jump(operand_at);

        let mut output = String::new();
        disassemble_chunk(&chunk, &mut output);
        assert!(output.contains("JMPF"));
        assert!(output.contains("-> 0006"));
    }

    #[test]
    fn test_unknown_opcode_rendered() {
        let chunk = Chunk {
            code: vec![0xEE],
            constants: Vec::new(),
        };
        let mut output = String::new();
        disassemble_chunk(&chunk, &mut output);
        assert!(output.contains("Unknown opcode"));
    }
}
