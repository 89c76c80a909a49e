//! Bytecode subsystem for Kyra.
//!
//! # Architecture
//!
//! - `instruction`: opcode definitions for the bytecode instruction set
//! - `chunk`: compiled chunks (code + constant pool) and runtime values
//! - `compiler`: transforms the AST into a module
//! - `module`: binary encoding and decoding of modules (the KBC format)
//! - `vm`: stack-based virtual machine and call-frame management
//! - `disassembler`: debug output for bytecode inspection

pub mod chunk;
pub mod compiler;
pub mod disassembler;
pub mod instruction;
pub mod module;
pub mod vm;

pub use chunk::{Chunk, Value};
pub use compiler::Compiler;
pub use disassembler::disassemble_module;
pub use instruction::OpCode;
pub use module::{decode, encode, Module};
pub use vm::Vm;
