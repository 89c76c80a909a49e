//! Error types for all toolchain phases.

use crate::span::Span;
use thiserror::Error;

/// Lexer errors.
#[derive(Debug, Error)]
pub enum LexerError {
    #[error("Unexpected character '{0}' at {1}")]
    UnexpectedChar(char, Span),

    #[error("Unterminated string at {0}")]
    UnterminatedString(Span),

    #[error("Invalid number '{0}' at {1}")]
    InvalidNumber(String, Span),
}

impl LexerError {
    pub fn span(&self) -> Span {
        match self {
            Self::UnexpectedChar(_, span) => *span,
            Self::UnterminatedString(span) => *span,
            Self::InvalidNumber(_, span) => *span,
        }
    }
}

/// Parser errors.
#[derive(Debug, Error)]
pub enum ParserError {
    #[error("Unexpected token '{found}', expected {expected} at {span}")]
    UnexpectedToken {
        expected: String,
        found: String,
        span: Span,
    },

    #[error("Unexpected end of file at {0}")]
    UnexpectedEof(Span),

    #[error("Invalid assignment target at {0}")]
    InvalidAssignmentTarget(Span),

    #[error("{message} at {span}")]
    General { message: String, span: Span },
}

impl ParserError {
    pub fn unexpected_token(
        expected: impl Into<String>,
        found: impl Into<String>,
        span: Span,
    ) -> Self {
        Self::UnexpectedToken {
            expected: expected.into(),
            found: found.into(),
            span,
        }
    }

    pub fn invalid_assignment_target(span: Span) -> Self {
        Self::InvalidAssignmentTarget(span)
    }

    pub fn general(message: impl Into<String>, span: Span) -> Self {
        Self::General {
            message: message.into(),
            span,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::UnexpectedToken { span, .. } => *span,
            Self::UnexpectedEof(span) => *span,
            Self::InvalidAssignmentTarget(span) => *span,
            Self::General { span, .. } => *span,
        }
    }
}

impl From<LexerError> for ParserError {
    fn from(err: LexerError) -> Self {
        Self::General {
            message: err.to_string(),
            span: err.span(),
        }
    }
}

/// Bytecode emission errors. These indicate a malformed or unsupported AST
/// shape; with a correct front end most are internal invariant violations.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Member access is not supported at {0}")]
    MemberNotSupported(Span),

    #[error("Cannot call '{0}': not a function name at {1}")]
    NotCallable(String, Span),

    #[error("Undefined function '{0}' at {1}")]
    UndefinedFunction(String, Span),

    #[error("Function '{0}' is defined more than once at {1}")]
    DuplicateFunction(String, Span),

    #[error("{message} at {span}")]
    General { message: String, span: Span },
}

impl CompileError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self::General {
            message: message.into(),
            span,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::MemberNotSupported(span) => *span,
            Self::NotCallable(_, span) => *span,
            Self::UndefinedFunction(_, span) => *span,
            Self::DuplicateFunction(_, span) => *span,
            Self::General { span, .. } => *span,
        }
    }
}

/// Malformed binary module errors, raised while decoding KBC bytes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("Invalid module header: bad magic")]
    BadMagic,

    #[error("Unsupported module version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown constant kind tag: {0}")]
    UnknownConstantKind(u8),

    #[error("Truncated module: unexpected end of data while reading {0}")]
    Truncated(&'static str),

    #[error("Invalid UTF-8 in string constant")]
    InvalidUtf8,
}

/// Runtime errors. All are fatal: the run that detects one aborts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Type error: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Stack underflow")]
    StackUnderflow,

    #[error("Unknown function: {0}")]
    UnknownFunction(i64),

    #[error("Unknown opcode: {0:#04X}")]
    UnknownOpcode(u8),

    #[error("Constant index out of bounds: {0}")]
    ConstantOutOfBounds(usize),

    #[error("Truncated instruction stream")]
    TruncatedInstruction,
}

impl RuntimeError {
    pub fn type_mismatch(expected: &'static str, found: &'static str) -> Self {
        Self::TypeMismatch { expected, found }
    }
}

/// A unified error type for all phases.
#[derive(Debug, Error)]
pub enum KyraError {
    #[error("Lexer error: {0}")]
    Lexer(#[from] LexerError),

    #[error("Parser error: {0}")]
    Parser(#[from] ParserError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
