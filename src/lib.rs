//! Kyra: a small indentation-based language with a bytecode toolchain.
//!
//! The pipeline lowers source text to a compact binary module format
//! ("KBC") and executes it on a stack-based virtual machine:
//!
//! ```text
//! source -> Scanner -> Parser -> Compiler -> encode -> [.kbc bytes]
//! [.kbc bytes] -> decode -> Vm -> result value
//! ```

pub mod archive;
pub mod ast;
pub mod bytecode;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod span;

use error::KyraError;

/// Parse source code into an AST without compiling.
pub fn parse(source: &str) -> Result<ast::Program, KyraError> {
    let tokens = lexer::Scanner::new(source).scan_tokens()?;
    let program = parser::Parser::new(tokens).parse()?;
    Ok(program)
}

/// Compile source code to an in-memory module.
pub fn compile(source: &str) -> Result<bytecode::Module, KyraError> {
    let program = parse(source)?;
    let module = bytecode::Compiler::new().compile(&program)?;
    Ok(module)
}

/// Compile source code to KBC module bytes.
pub fn compile_to_bytes(source: &str) -> Result<Vec<u8>, KyraError> {
    let module = compile(source)?;
    Ok(bytecode::encode(&module))
}

/// Load KBC bytes and run the module to completion. Returns the value of
/// a top-level `return`, if any.
pub fn run_bytes(bytes: &[u8]) -> Result<Option<bytecode::Value>, KyraError> {
    let module = bytecode::decode(bytes)?;
    run_module(module)
}

/// Run an in-memory module to completion. Each run needs a fresh VM.
pub fn run_module(module: bytecode::Module) -> Result<Option<bytecode::Value>, KyraError> {
    let result = bytecode::Vm::new(module).run()?;
    Ok(result)
}

/// Compile and run source code in one step.
pub fn run(source: &str) -> Result<Option<bytecode::Value>, KyraError> {
    run_module(compile(source)?)
}

/// Disassemble a compiled module to a string.
pub fn disassemble(module: &bytecode::Module) -> String {
    bytecode::disassemble_module(module)
}
