//! Bytecode compiler: transforms the AST into a module.
//!
//! Emission is single-pass per chunk with backpatched forward jumps:
//! a conditional or unconditional jump over not-yet-emitted code writes a
//! 4-byte zero placeholder and overwrites it once the target offset is
//! known.

use std::collections::HashMap;

use crate::ast::{BinaryOp, Expr, ExprKind, FunctionDecl, Program, Stmt, StmtKind, UnaryOp};
use crate::bytecode::chunk::{Chunk, Value};
use crate::bytecode::instruction::OpCode;
use crate::bytecode::module::Module;
use crate::error::CompileError;

/// Result type for compilation.
pub type CompileResult<T> = Result<T, CompileError>;

/// The bytecode compiler.
pub struct Compiler {
    /// Builder for the chunk currently being emitted into.
    current: ChunkBuilder,
    /// Compiled function table, indexed by numeric function identifier.
    functions: Vec<Chunk>,
    /// Function name -> table index.
    function_ids: HashMap<String, u32>,
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            current: ChunkBuilder::new(),
            functions: Vec::new(),
            function_ids: HashMap::new(),
        }
    }

    /// Compile a program into a module.
    pub fn compile(mut self, program: &Program) -> CompileResult<Module> {
        // Register top-level functions first so calls may precede the
        // definition in source order.
        for stmt in &program.statements {
            if let StmtKind::FuncDef(decl) = &stmt.kind {
                self.register_function(decl)?;
            }
        }

        for stmt in &program.statements {
            self.compile_statement(stmt)?;
        }

        Ok(Module {
            functions: self.functions,
            main: self.current.finish(),
        })
    }

    fn register_function(&mut self, decl: &FunctionDecl) -> CompileResult<u32> {
        if self.function_ids.contains_key(&decl.name) {
            return Err(CompileError::DuplicateFunction(decl.name.clone(), decl.span));
        }
        let id = self.functions.len() as u32;
        self.functions.push(Chunk::new());
        self.function_ids.insert(decl.name.clone(), id);
        Ok(id)
    }

    // ===== Statements =====

    fn compile_statement(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match &stmt.kind {
            StmtKind::Expression(expr) => {
                self.compile_expression(expr)?;
                self.current.emit_op(OpCode::Pop);
            }

            StmtKind::Let { name, initializer } => {
                self.compile_expression(initializer)?;
                let slot = self.current.slot(name);
                self.current.emit_with(OpCode::Store, slot);
            }

            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.compile_expression(condition)?;
                let skip_then = self.current.chunk.emit_jump(OpCode::JmpF);

                for stmt in then_branch {
                    self.compile_statement(stmt)?;
                }

                if let Some(else_branch) = else_branch {
                    let skip_else = self.current.chunk.emit_jump(OpCode::Jmp);
                    self.current.chunk.patch_jump(skip_then);
                    for stmt in else_branch {
                        self.compile_statement(stmt)?;
                    }
                    self.current.chunk.patch_jump(skip_else);
                } else {
                    self.current.chunk.patch_jump(skip_then);
                }
            }

            StmtKind::While { condition, body } => {
                let loop_start = self.current.chunk.current_offset();
                self.compile_expression(condition)?;
                let exit = self.current.chunk.emit_jump(OpCode::JmpF);

                for stmt in body {
                    self.compile_statement(stmt)?;
                }

                self.current.chunk.emit_jump_to(OpCode::Jmp, loop_start);
                self.current.chunk.patch_jump(exit);
            }

            StmtKind::ForCounted { name, limit, body } => {
                // The limit is evaluated once, into its own slot.
                self.compile_expression(limit)?;
                let limit_slot = self.current.chunk.add_constant(Value::Number(0.0));
                self.current.emit_with(OpCode::Store, limit_slot);

                // Induction variable counts from zero.
                let zero = self.current.literal(Value::Number(0.0));
                self.current.emit_with(OpCode::Const, zero);
                let induction_slot = self.current.slot(name);
                self.current.emit_with(OpCode::Store, induction_slot);

                // Guard: leave the loop once the induction value reaches
                // the limit.
                let loop_start = self.current.chunk.current_offset();
                self.current.emit_with(OpCode::Load, induction_slot);
                self.current.emit_with(OpCode::Load, limit_slot);
                self.current.emit_op(OpCode::Lt);
                let exit = self.current.chunk.emit_jump(OpCode::JmpF);

                for stmt in body {
                    self.compile_statement(stmt)?;
                }

                // Increment and loop back to the guard.
                self.current.emit_with(OpCode::Load, induction_slot);
                let one = self.current.literal(Value::Number(1.0));
                self.current.emit_with(OpCode::Const, one);
                self.current.emit_op(OpCode::Add);
                self.current.emit_with(OpCode::Store, induction_slot);
                self.current.chunk.emit_jump_to(OpCode::Jmp, loop_start);
                self.current.chunk.patch_jump(exit);
            }

            StmtKind::Return(value) => {
                match value {
                    Some(expr) => self.compile_expression(expr)?,
                    None => {
                        let zero = self.current.literal(Value::Number(0.0));
                        self.current.emit_with(OpCode::Const, zero);
                    }
                }
                self.current.emit_op(OpCode::Ret);
            }

            StmtKind::Exit => {
                self.current.emit_op(OpCode::Halt);
            }

            StmtKind::Pass => {}

            StmtKind::FuncDef(decl) => {
                self.compile_function_decl(decl)?;
            }
        }

        Ok(())
    }

    /// Compile a function body into its own chunk and place it in the
    /// function table. The defining statement emits nothing into the
    /// enclosing chunk.
    fn compile_function_decl(&mut self, decl: &FunctionDecl) -> CompileResult<()> {
        let id = match self.function_ids.get(&decl.name) {
            Some(&id) => id,
            // Nested definitions are registered on first encounter.
            None => self.register_function(decl)?,
        };

        let parent = std::mem::replace(&mut self.current, ChunkBuilder::new());

        // Parameter slots in declaration order.
        for param in &decl.params {
            self.current.slot(param);
        }
        // Prologue: bind arguments from the operand stack into their
        // slots. The last argument is on top, so stores run in reverse.
        for param in decl.params.iter().rev() {
            let slot = self.current.slot(param);
            self.current.emit_with(OpCode::Store, slot);
        }

        for stmt in &decl.body {
            self.compile_statement(stmt)?;
        }

        // Implicit return for bodies that fall off the end.
        let zero = self.current.literal(Value::Number(0.0));
        self.current.emit_with(OpCode::Const, zero);
        self.current.emit_op(OpCode::Ret);

        let chunk = std::mem::replace(&mut self.current, parent).finish();
        self.functions[id as usize] = chunk;

        Ok(())
    }

    // ===== Expressions =====

    fn compile_expression(&mut self, expr: &Expr) -> CompileResult<()> {
        match &expr.kind {
            ExprKind::NumberLiteral(n) => {
                let idx = self.current.literal(Value::Number(*n));
                self.current.emit_with(OpCode::Const, idx);
            }

            ExprKind::StringLiteral(s) => {
                let idx = self.current.literal(Value::Text(s.clone()));
                self.current.emit_with(OpCode::Const, idx);
            }

            ExprKind::BoolLiteral(b) => {
                let idx = self
                    .current
                    .literal(Value::Number(if *b { 1.0 } else { 0.0 }));
                self.current.emit_with(OpCode::Const, idx);
            }

            ExprKind::Ident(name) => {
                let slot = self.current.slot(name);
                self.current.emit_with(OpCode::Load, slot);
            }

            ExprKind::Assign { name, value } => {
                self.compile_expression(value)?;
                let slot = self.current.slot(name);
                self.current.emit_with(OpCode::Store, slot);
                // An assignment yields its value.
                self.current.emit_with(OpCode::Load, slot);
            }

            ExprKind::Unary { op, operand } => {
                self.compile_expression(operand)?;
                match op {
                    // Negation lowers to a multiply by -1.
                    UnaryOp::Neg => {
                        let idx = self.current.literal(Value::Number(-1.0));
                        self.current.emit_with(OpCode::Const, idx);
                        self.current.emit_op(OpCode::Mul);
                    }
                    UnaryOp::Not => self.current.emit_op(OpCode::Not),
                }
            }

            ExprKind::Binary { left, op, right } => {
                self.compile_expression(left)?;
                self.compile_expression(right)?;
                self.current.emit_op(binary_opcode(*op));
            }

            ExprKind::Call { callee, args } => {
                let name = match &callee.kind {
                    ExprKind::Ident(name) => name.clone(),
                    _ => {
                        return Err(CompileError::NotCallable(
                            format!("{:?}", callee.kind),
                            callee.span,
                        ));
                    }
                };
                let id = *self
                    .function_ids
                    .get(&name)
                    .ok_or_else(|| CompileError::UndefinedFunction(name.clone(), callee.span))?;

                for arg in args {
                    self.compile_expression(arg)?;
                }
                // The callee identifier rides on top of the arguments;
                // the instruction immediate carries only the count.
                let id_const = self.current.literal(Value::Number(id as f64));
                self.current.emit_with(OpCode::Const, id_const);
                self.current.emit_with(OpCode::Call, args.len() as u32);
            }

            ExprKind::Member { .. } => {
                return Err(CompileError::MemberNotSupported(expr.span));
            }

            ExprKind::Grouping(inner) => {
                self.compile_expression(inner)?;
            }
        }

        Ok(())
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

fn binary_opcode(op: BinaryOp) -> OpCode {
    match op {
        BinaryOp::Add => OpCode::Add,
        BinaryOp::Sub => OpCode::Sub,
        BinaryOp::Mul => OpCode::Mul,
        BinaryOp::Div => OpCode::Div,
        BinaryOp::Mod => OpCode::Mod,
        BinaryOp::Eq => OpCode::Eq,
        BinaryOp::Neq => OpCode::Neq,
        BinaryOp::Lt => OpCode::Lt,
        BinaryOp::Gt => OpCode::Gt,
        BinaryOp::Le => OpCode::Le,
        BinaryOp::Ge => OpCode::Ge,
        BinaryOp::And => OpCode::And,
        BinaryOp::Or => OpCode::Or,
    }
}

/// Emission state for one chunk: the chunk itself plus the name-to-slot
/// and literal-reuse tables.
///
/// Named slots always get a fresh pool entry; they are mutable at runtime
/// and must never alias a literal. Literals are reused by value.
struct ChunkBuilder {
    chunk: Chunk,
    slots: HashMap<String, u32>,
    literals: HashMap<LiteralKey, u32>,
}

/// Hashable identity of a literal constant, for pool reuse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LiteralKey {
    Number(u64),
    Text(String),
    Int(i32),
}

impl LiteralKey {
    fn of(value: &Value) -> Self {
        match value {
            Value::Number(n) => LiteralKey::Number(n.to_bits()),
            Value::Text(s) => LiteralKey::Text(s.clone()),
            Value::Int(n) => LiteralKey::Int(*n),
        }
    }
}

impl ChunkBuilder {
    fn new() -> Self {
        Self {
            chunk: Chunk::new(),
            slots: HashMap::new(),
            literals: HashMap::new(),
        }
    }

    fn emit_op(&mut self, op: OpCode) {
        self.chunk.write_op(op);
    }

    fn emit_with(&mut self, op: OpCode, operand: u32) {
        self.chunk.write_op(op);
        self.chunk.write_u32(operand);
    }

    /// Pool index for a named binding, inserting a fresh entry if absent.
    fn slot(&mut self, name: &str) -> u32 {
        if let Some(&idx) = self.slots.get(name) {
            return idx;
        }
        let idx = self.chunk.add_constant(Value::Number(0.0));
        self.slots.insert(name.to_string(), idx);
        idx
    }

    /// Pool index for a literal constant, reusing an existing entry for
    /// the same value.
    fn literal(&mut self, value: Value) -> u32 {
        let key = LiteralKey::of(&value);
        if let Some(&idx) = self.literals.get(&key) {
            return idx;
        }
        let idx = self.chunk.add_constant(value);
        self.literals.insert(key, idx);
        idx
    }

    fn finish(self) -> Chunk {
        self.chunk
    }
}
