//! Stack-based virtual machine for executing compiled modules.
//!
//! One `run` drives a single operand stack and call stack to completion
//! or to a fatal error; there is no recovery past a detected violation.
//! Calls share the operand stack across activations: a frame records the
//! logical stack base instead of copying arguments.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bytecode::chunk::Value;
use crate::bytecode::instruction::OpCode;
use crate::bytecode::module::Module;
use crate::error::RuntimeError;

/// Result type for VM operations.
pub type VmResult<T> = Result<T, RuntimeError>;

/// Code and constants of one linked chunk. Constants are shared across
/// activations of the same function; stores are visible to later calls.
type LinkedChunk = (Rc<Vec<u8>>, Rc<RefCell<Vec<Value>>>);

/// A suspended caller context, restored on return.
#[derive(Debug)]
struct Frame {
    /// Caller's next instruction offset.
    return_ip: usize,
    /// Where the callee's slice of the shared stack begins (first
    /// argument). The stack is truncated back to this on return.
    stack_base: usize,
    /// Caller's code.
    code: Rc<Vec<u8>>,
    /// Caller's constant pool.
    constants: Rc<RefCell<Vec<Value>>>,
}

/// The virtual machine. Lives for exactly one `run`.
pub struct Vm {
    module: Module,
    /// Lazily linked function table entries, by numeric identifier.
    linked: Vec<Option<LinkedChunk>>,

    code: Rc<Vec<u8>>,
    constants: Rc<RefCell<Vec<Value>>>,
    ip: usize,
    stack: Vec<Value>,
    frames: Vec<Frame>,
}

impl Vm {
    /// Create a VM ready to run a decoded module's main chunk.
    pub fn new(module: Module) -> Self {
        let code = Rc::new(module.main.code.clone());
        let constants = Rc::new(RefCell::new(module.main.constants.clone()));
        let linked = vec![None; module.functions.len()];
        Self {
            module,
            linked,
            code,
            constants,
            ip: 0,
            stack: Vec::with_capacity(256),
            frames: Vec::new(),
        }
    }

    /// Execute until a halt, a top-level return, the end of the main
    /// chunk, or a fatal error. A top-level return yields the program's
    /// result value.
    pub fn run(&mut self) -> VmResult<Option<Value>> {
        while self.ip < self.code.len() {
            let byte = self.code[self.ip];
            let op = OpCode::from_u8(byte).ok_or(RuntimeError::UnknownOpcode(byte))?;
            self.ip += 1;

            match op {
                OpCode::Const => {
                    let idx = self.read_u32()? as usize;
                    let value = self.constant(idx)?;
                    self.stack.push(value);
                }

                OpCode::Add => self.binary_number(|a, b| a + b)?,
                OpCode::Sub => self.binary_number(|a, b| a - b)?,
                OpCode::Mul => self.binary_number(|a, b| a * b)?,
                // Division by zero follows floating-point semantics.
                OpCode::Div => self.binary_number(|a, b| a / b)?,
                OpCode::Mod => self.binary_number(|a, b| a % b)?,

                OpCode::Eq => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(bool_value(a == b));
                }
                OpCode::Neq => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(bool_value(a != b));
                }

                OpCode::Lt => self.binary_compare(|a, b| a < b)?,
                OpCode::Gt => self.binary_compare(|a, b| a > b)?,
                OpCode::Le => self.binary_compare(|a, b| a <= b)?,
                OpCode::Ge => self.binary_compare(|a, b| a >= b)?,

                OpCode::And => self.binary_compare(|a, b| a != 0.0 && b != 0.0)?,
                OpCode::Or => self.binary_compare(|a, b| a != 0.0 || b != 0.0)?,
                OpCode::Not => {
                    let a = self.pop_number()?;
                    self.stack.push(bool_value(a == 0.0));
                }

                OpCode::Load => {
                    let idx = self.read_u32()? as usize;
                    let value = self.constant(idx)?;
                    self.stack.push(value);
                }
                OpCode::Store => {
                    let idx = self.read_u32()? as usize;
                    let value = self.pop()?;
                    let mut constants = self.constants.borrow_mut();
                    let slot = constants
                        .get_mut(idx)
                        .ok_or(RuntimeError::ConstantOutOfBounds(idx))?;
                    *slot = value;
                }

                OpCode::Call => {
                    let arg_count = self.read_u32()? as usize;
                    let id = self.pop_number()? as i64;
                    self.call_function(id, arg_count)?;
                }
                OpCode::Ret => {
                    let value = self.pop()?;
                    match self.frames.pop() {
                        Some(frame) => {
                            self.stack.truncate(frame.stack_base);
                            self.code = frame.code;
                            self.constants = frame.constants;
                            self.ip = frame.return_ip;
                            self.stack.push(value);
                        }
                        // A return with no active frames finishes the
                        // run with a result value.
                        None => return Ok(Some(value)),
                    }
                }

                OpCode::Jmp => {
                    let target = self.read_u32()?;
                    self.ip = target as usize;
                }
                OpCode::JmpF => {
                    let target = self.read_u32()?;
                    let condition = self.pop_number()?;
                    if condition == 0.0 {
                        self.ip = target as usize;
                    }
                }

                OpCode::Pop => {
                    self.pop()?;
                }
                OpCode::Halt => return Ok(None),
            }
        }

        Ok(None)
    }

    /// Current call depth (number of suspended frames).
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    // ===== Calls =====

    /// Suspend the caller and activate the callee. The arguments already
    /// sit contiguously on the shared stack; only the logical base moves.
    fn call_function(&mut self, id: i64, arg_count: usize) -> VmResult<()> {
        let (code, constants) = self.resolve_function(id)?;

        let stack_base = self
            .stack
            .len()
            .checked_sub(arg_count)
            .ok_or(RuntimeError::StackUnderflow)?;

        self.frames.push(Frame {
            return_ip: self.ip,
            stack_base,
            code: std::mem::replace(&mut self.code, code),
            constants: std::mem::replace(&mut self.constants, constants),
        });
        self.ip = 0;

        Ok(())
    }

    /// Resolve a numeric identifier to a function's code and constants,
    /// linking the module entry on first use.
    fn resolve_function(&mut self, id: i64) -> VmResult<LinkedChunk> {
        if id < 0 || id as usize >= self.module.functions.len() {
            return Err(RuntimeError::UnknownFunction(id));
        }
        let idx = id as usize;

        let chunk = &self.module.functions[idx];
        let entry = self.linked[idx].get_or_insert_with(|| {
            (
                Rc::new(chunk.code.clone()),
                Rc::new(RefCell::new(chunk.constants.clone())),
            )
        });

        Ok((Rc::clone(&entry.0), Rc::clone(&entry.1)))
    }

    // ===== Stack and operand helpers =====

    fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow)
    }

    fn pop_number(&mut self) -> VmResult<f64> {
        match self.pop()? {
            Value::Number(n) => Ok(n),
            other => Err(RuntimeError::type_mismatch("Number", other.kind_name())),
        }
    }

    fn binary_number(&mut self, apply: fn(f64, f64) -> f64) -> VmResult<()> {
        let b = self.pop_number()?;
        let a = self.pop_number()?;
        self.stack.push(Value::Number(apply(a, b)));
        Ok(())
    }

    fn binary_compare(&mut self, apply: fn(f64, f64) -> bool) -> VmResult<()> {
        let b = self.pop_number()?;
        let a = self.pop_number()?;
        self.stack.push(bool_value(apply(a, b)));
        Ok(())
    }

    fn constant(&self, idx: usize) -> VmResult<Value> {
        self.constants
            .borrow()
            .get(idx)
            .cloned()
            .ok_or(RuntimeError::ConstantOutOfBounds(idx))
    }

    fn read_u32(&mut self) -> VmResult<u32> {
        let end = self.ip + 4;
        let bytes = self
            .code
            .get(self.ip..end)
            .ok_or(RuntimeError::TruncatedInstruction)?;
        let value = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        self.ip = end;
        Ok(value)
    }
}

/// Comparisons produce a Number representing boolean true/false.
fn bool_value(b: bool) -> Value {
    Value::Number(if b { 1.0 } else { 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::chunk::Chunk;
    use crate::bytecode::compiler::Compiler;
    use crate::lexer::Scanner;
    use crate::parser::Parser;
    use pretty_assertions::assert_eq;

    fn run(source: &str) -> VmResult<Option<Value>> {
        let tokens = Scanner::new(source).scan_tokens().unwrap();
        let program = Parser::new(tokens).parse().unwrap();
        let module = Compiler::new().compile(&program).unwrap();
        Vm::new(module).run()
    }

    fn run_main(main: Chunk) -> VmResult<Option<Value>> {
        let module = Module {
            functions: Vec::new(),
            main,
        };
        Vm::new(module).run()
    }

    fn eval(expr: &str) -> Value {
        run(&format!("return {}", expr)).unwrap().unwrap()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("3 + 4"), Value::Number(7.0));
        assert_eq!(eval("10 - 4"), Value::Number(6.0));
        assert_eq!(eval("6 * 7"), Value::Number(42.0));
        assert_eq!(eval("7 % 3"), Value::Number(1.0));
        assert_eq!(eval("9 / 2"), Value::Number(4.5));
    }

    #[test]
    fn test_division_by_zero_is_infinity() {
        assert_eq!(eval("1 / 0"), Value::Number(f64::INFINITY));
        assert_eq!(eval("-1 / 0"), Value::Number(f64::NEG_INFINITY));
    }

    #[test]
    fn test_comparisons_produce_numbers() {
        assert_eq!(eval("1 < 2"), Value::Number(1.0));
        assert_eq!(eval("2 < 1"), Value::Number(0.0));
        assert_eq!(eval("2 <= 2"), Value::Number(1.0));
        assert_eq!(eval("3 > 2"), Value::Number(1.0));
        assert_eq!(eval("2 >= 3"), Value::Number(0.0));
    }

    #[test]
    fn test_equality_across_kinds() {
        assert_eq!(eval("\"a\" == \"a\""), Value::Number(1.0));
        assert_eq!(eval("\"a\" == \"b\""), Value::Number(0.0));
        // Cross-kind equality is false, never a type error.
        assert_eq!(eval("\"a\" == 1"), Value::Number(0.0));
        assert_eq!(eval("\"a\" != 1"), Value::Number(1.0));
    }

    #[test]
    fn test_logic() {
        assert_eq!(eval("1 && 2"), Value::Number(1.0));
        assert_eq!(eval("1 && 0"), Value::Number(0.0));
        assert_eq!(eval("0 || 3"), Value::Number(1.0));
        assert_eq!(eval("0 || 0"), Value::Number(0.0));
        assert_eq!(eval("!0"), Value::Number(1.0));
        assert_eq!(eval("!5"), Value::Number(0.0));
    }

    #[test]
    fn test_unary_negation() {
        assert_eq!(eval("-5"), Value::Number(-5.0));
        assert_eq!(eval("-(2 + 3)"), Value::Number(-5.0));
    }

    #[test]
    fn test_variables() {
        assert_eq!(
            run("let x = 40\nlet y = 2\nreturn x + y").unwrap(),
            Some(Value::Number(42.0))
        );
    }

    #[test]
    fn test_assignment_yields_value() {
        assert_eq!(run("let x = 1\nreturn x = 9").unwrap(), Some(Value::Number(9.0)));
    }

    #[test]
    fn test_if_true_executes_then() {
        let source = "let r = 0\nif 1 < 2:\n  r = 10\nelse:\n  r = 20\nreturn r";
        assert_eq!(run(source).unwrap(), Some(Value::Number(10.0)));
    }

    #[test]
    fn test_if_false_executes_else() {
        let source = "let r = 0\nif 2 < 1:\n  r = 10\nelse:\n  r = 20\nreturn r";
        assert_eq!(run(source).unwrap(), Some(Value::Number(20.0)));
    }

    #[test]
    fn test_if_without_else_skips_body() {
        let source = "let r = 5\nif 0:\n  r = 99\nreturn r";
        assert_eq!(run(source).unwrap(), Some(Value::Number(5.0)));
    }

    #[test]
    fn test_while_loop() {
        let source = "let n = 0\nwhile n < 5:\n  n = n + 1\nreturn n";
        assert_eq!(run(source).unwrap(), Some(Value::Number(5.0)));
    }

    #[test]
    fn test_for_counted_runs_body_exactly_limit_times() {
        let source = "let sum = 0\nfor i 3:\n  sum = sum + i\nreturn sum";
        // Induction values 0, 1, 2.
        assert_eq!(run(source).unwrap(), Some(Value::Number(3.0)));
    }

    #[test]
    fn test_for_counted_zero_limit_skips_body() {
        let source = "let hits = 0\nfor i 0:\n  hits = hits + 1\nreturn hits";
        assert_eq!(run(source).unwrap(), Some(Value::Number(0.0)));
    }

    #[test]
    fn test_for_counted_expression_limit() {
        let source = "let hits = 0\nfor i 2 + 1:\n  hits = hits + 1\nreturn hits";
        assert_eq!(run(source).unwrap(), Some(Value::Number(3.0)));
    }

    #[test]
    fn test_function_call_and_return() {
        let source = "def add(a, b):\n  return a + b\nreturn add(30, 12)";
        assert_eq!(run(source).unwrap(), Some(Value::Number(42.0)));
    }

    #[test]
    fn test_nested_calls() {
        let source = "\
def double(x):
  return x * 2
def quad(x):
  return double(double(x))
return quad(3)";
        assert_eq!(run(source).unwrap(), Some(Value::Number(12.0)));
    }

    #[test]
    fn test_function_without_return_yields_zero() {
        let source = "def noop():\n  pass\nreturn noop()";
        assert_eq!(run(source).unwrap(), Some(Value::Number(0.0)));
    }

    #[test]
    fn test_call_restores_caller_state() {
        // The caller's locals and continuation survive the call.
        let source = "\
def bump(x):
  return x + 1
let a = 10
let b = bump(a)
return a + b";
        assert_eq!(run(source).unwrap(), Some(Value::Number(21.0)));
    }

    #[test]
    fn test_call_return_stack_depth_symmetry() {
        let tokens = Scanner::new("def f(a, b, c):\n  return c\nlet r = f(1, 2, 3)\nreturn r")
            .scan_tokens()
            .unwrap();
        let program = Parser::new(tokens).parse().unwrap();
        let module = Compiler::new().compile(&program).unwrap();
        let mut vm = Vm::new(module);
        let result = vm.run().unwrap();
        assert_eq!(result, Some(Value::Number(3.0)));
        // All frames consumed, operand stack fully unwound by the
        // top-level return.
        assert_eq!(vm.depth(), 0);
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn test_exit_yields_no_value() {
        assert_eq!(run("let x = 1\nexit\nreturn x").unwrap(), None);
    }

    #[test]
    fn test_exit_discards_pending_frames() {
        let source = "def f():\n  exit\n  return 1\nreturn f()";
        assert_eq!(run(source).unwrap(), None);
    }

    #[test]
    fn test_main_without_return_yields_no_value() {
        assert_eq!(run("let x = 1").unwrap(), None);
    }

    #[test]
    fn test_string_values() {
        assert_eq!(eval("\"hello\""), Value::Text("hello".to_string()));
    }

    #[test]
    fn test_type_error_on_arithmetic_with_text() {
        let err = run("return \"a\" + 1").unwrap_err();
        assert!(matches!(err, RuntimeError::TypeMismatch { .. }));
    }

    #[test]
    fn test_type_error_on_relational_with_text() {
        let err = run("return \"a\" < \"b\"").unwrap_err();
        assert!(matches!(err, RuntimeError::TypeMismatch { .. }));
    }

    #[test]
    fn test_stack_underflow_is_fatal() {
        let mut main = Chunk::new();
        main.write_op(OpCode::Pop);
        assert_eq!(run_main(main), Err(RuntimeError::StackUnderflow));
    }

    #[test]
    fn test_unknown_opcode_is_fatal() {
        let main = Chunk {
            code: vec![0xEE],
            constants: Vec::new(),
        };
        assert_eq!(run_main(main), Err(RuntimeError::UnknownOpcode(0xEE)));
    }

    #[test]
    fn test_unknown_function_is_fatal() {
        let mut main = Chunk::new();
        let id = main.add_constant(Value::Number(9.0));
        main.write_op(OpCode::Const);
        main.write_u32(id);
        main.write_op(OpCode::Call);
        main.write_u32(0);
        assert_eq!(run_main(main), Err(RuntimeError::UnknownFunction(9)));
    }

    #[test]
    fn test_constant_index_out_of_bounds_is_fatal() {
        let mut main = Chunk::new();
        main.write_op(OpCode::Const);
        main.write_u32(3);
        assert_eq!(run_main(main), Err(RuntimeError::ConstantOutOfBounds(3)));
    }

    #[test]
    fn test_truncated_immediate_is_fatal() {
        let main = Chunk {
            code: vec![OpCode::Jmp as u8, 0x01],
            constants: Vec::new(),
        };
        assert_eq!(run_main(main), Err(RuntimeError::TruncatedInstruction));
    }

    #[test]
    fn test_callee_identifier_popped_from_stack_top() {
        // Pinned call convention: the engine takes the function
        // identifier from the top of the stack, not from the immediate.
        let mut function = Chunk::new();
        let zero = function.add_constant(Value::Number(123.0));
        function.write_op(OpCode::Const);
        function.write_u32(zero);
        function.write_op(OpCode::Ret);

        let mut main = Chunk::new();
        let id = main.add_constant(Value::Number(0.0));
        main.write_op(OpCode::Const);
        main.write_u32(id);
        main.write_op(OpCode::Call);
        main.write_u32(0);
        main.write_op(OpCode::Ret);

        let module = Module {
            functions: vec![function],
            main,
        };
        assert_eq!(Vm::new(module).run().unwrap(), Some(Value::Number(123.0)));
    }

    #[test]
    fn test_store_is_visible_across_calls() {
        // Function constants are linked once and shared between
        // activations; a store in one call is seen by the next.
        let source = "\
def counter():
  value = value + 1
  return value
counter()
return counter()";
        assert_eq!(run(source).unwrap(), Some(Value::Number(2.0)));
    }

    #[test]
    fn test_jump_past_end_terminates_run() {
        let mut main = Chunk::new();
        main.write_op(OpCode::Jmp);
        main.write_u32(100);
        assert_eq!(run_main(main).unwrap(), None);
    }
}
