//! Binary module encoding and decoding (the "KBC" format, version 2).
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! magic:    3 bytes, ASCII "KBC"
//! version:  1 byte, must equal 2
//! fn_count: u32
//!   for each function: const_count:u32, constants, code_len:u32, code
//!     constant: kind(1 byte) + payload
//!       kind 1 (string):  len:u32, len bytes UTF-8
//!       kind 2 (float64): 8 bytes IEEE-754
//!       kind 3 (int32):   4 bytes
//! main chunk: same encoding as a function entry
//! ```
//!
//! `decode` is the exact inverse of `encode`: a single linear scan with
//! every length field bounds-checked.

use crate::bytecode::chunk::{Chunk, Value};
use crate::error::FormatError;

/// Module file magic.
pub const MAGIC: &[u8; 3] = b"KBC";
/// Supported format version.
pub const VERSION: u8 = 2;

const KIND_STRING: u8 = 1;
const KIND_FLOAT: u8 = 2;
const KIND_INT: u8 = 3;

/// A complete compiled program: an ordered function table plus one main
/// chunk. Never mutated after encoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    /// Function table; numeric call identifiers index into this.
    pub functions: Vec<Chunk>,
    /// The program entry chunk.
    pub main: Chunk,
}

/// Serialize a module into KBC bytes.
pub fn encode(module: &Module) -> Vec<u8> {
    let mut out = Vec::new();

    out.extend_from_slice(MAGIC);
    out.push(VERSION);

    out.extend_from_slice(&(module.functions.len() as u32).to_le_bytes());
    for function in &module.functions {
        encode_chunk(function, &mut out);
    }
    encode_chunk(&module.main, &mut out);

    out
}

fn encode_chunk(chunk: &Chunk, out: &mut Vec<u8>) {
    out.extend_from_slice(&(chunk.constants.len() as u32).to_le_bytes());
    for constant in &chunk.constants {
        match constant {
            Value::Text(s) => {
                out.push(KIND_STRING);
                out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Value::Number(n) => {
                out.push(KIND_FLOAT);
                out.extend_from_slice(&n.to_le_bytes());
            }
            Value::Int(n) => {
                out.push(KIND_INT);
                out.extend_from_slice(&n.to_le_bytes());
            }
        }
    }

    out.extend_from_slice(&(chunk.code.len() as u32).to_le_bytes());
    out.extend_from_slice(&chunk.code);
}

/// Parse KBC bytes back into a module.
pub fn decode(bytes: &[u8]) -> Result<Module, FormatError> {
    let mut reader = Reader::new(bytes);

    let magic = reader.read_slice(3, "magic")?;
    if magic != MAGIC {
        return Err(FormatError::BadMagic);
    }
    let version = reader.read_u8("version")?;
    if version != VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }

    let fn_count = reader.read_u32("function count")?;
    let mut functions = Vec::with_capacity(fn_count as usize);
    for _ in 0..fn_count {
        functions.push(decode_chunk(&mut reader)?);
    }

    let main = decode_chunk(&mut reader)?;

    Ok(Module { functions, main })
}

fn decode_chunk(reader: &mut Reader<'_>) -> Result<Chunk, FormatError> {
    let const_count = reader.read_u32("constant count")?;
    let mut constants = Vec::with_capacity(const_count as usize);
    for _ in 0..const_count {
        let kind = reader.read_u8("constant kind")?;
        let value = match kind {
            KIND_STRING => {
                let len = reader.read_u32("string length")?;
                let data = reader.read_slice(len as usize, "string constant")?;
                let text = std::str::from_utf8(data).map_err(|_| FormatError::InvalidUtf8)?;
                Value::Text(text.to_string())
            }
            KIND_FLOAT => {
                let data = reader.read_slice(8, "float constant")?;
                let mut bits = [0u8; 8];
                bits.copy_from_slice(data);
                Value::Number(f64::from_le_bytes(bits))
            }
            KIND_INT => {
                let data = reader.read_slice(4, "int constant")?;
                let mut bits = [0u8; 4];
                bits.copy_from_slice(data);
                Value::Int(i32::from_le_bytes(bits))
            }
            other => return Err(FormatError::UnknownConstantKind(other)),
        };
        constants.push(value);
    }

    let code_len = reader.read_u32("code length")?;
    let code = reader.read_slice(code_len as usize, "code")?.to_vec();

    Ok(Chunk { code, constants })
}

/// Bounds-checked linear reader over the module bytes.
struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn read_u8(&mut self, what: &'static str) -> Result<u8, FormatError> {
        let byte = *self
            .bytes
            .get(self.offset)
            .ok_or(FormatError::Truncated(what))?;
        self.offset += 1;
        Ok(byte)
    }

    fn read_u32(&mut self, what: &'static str) -> Result<u32, FormatError> {
        let data = self.read_slice(4, what)?;
        Ok(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
    }

    fn read_slice(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], FormatError> {
        let end = self
            .offset
            .checked_add(len)
            .ok_or(FormatError::Truncated(what))?;
        let slice = self
            .bytes
            .get(self.offset..end)
            .ok_or(FormatError::Truncated(what))?;
        self.offset = end;
        Ok(slice)
    }
}
