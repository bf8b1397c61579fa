//! MTBC - portable stack bytecode
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic "MTBC" | version u16
//! const_count u32 | const*        const    = kind u8, payload
//! func_count u16  | function*     function = name str, n_params u16,
//!                                            n_locals u16, code_len u32, code
//! entry u16
//! input_count u16 | input*        input    = name str, kind u8
//!
//! str = len u32, utf-8 bytes
//! ```
//!
//! Jump operands are absolute byte offsets into the function's code. In
//! memory ([`Instr`]) they are instruction indices; encoding and decoding
//! translate between the two.

pub mod lower;

pub use lower::BytecodeBackend;

use metast_error::RuntimeError;
use metast_ir::{BinaryOp, CompareOp, Shape, Type, Value};
use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::io::{self, Read, Write};

pub const MAGIC: [u8; 4] = *b"MTBC";
pub const VERSION: u16 = 1;

/// Runtime kind of a scalar value; tags constants, casts and inputs
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Unit = 0,
    Bool = 1,
    I32 = 2,
    I64 = 3,
    F64 = 4,
    Str = 5,
}

impl ValueKind {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ValueKind::Unit),
            1 => Some(ValueKind::Bool),
            2 => Some(ValueKind::I32),
            3 => Some(ValueKind::I64),
            4 => Some(ValueKind::F64),
            5 => Some(ValueKind::Str),
            _ => None,
        }
    }

    /// Kind of a scalar type, named types by their shape
    pub fn of_type(ty: &Type) -> Option<Self> {
        match ty.resolved().shape() {
            Shape::Unit => Some(ValueKind::Unit),
            Shape::Bool => Some(ValueKind::Bool),
            Shape::I32 => Some(ValueKind::I32),
            Shape::I64 => Some(ValueKind::I64),
            Shape::F64 => Some(ValueKind::F64),
            Shape::Str => Some(ValueKind::Str),
            _ => None,
        }
    }

    pub fn of_value(v: &Value) -> Self {
        match v {
            Value::Unit => ValueKind::Unit,
            Value::Bool(_) => ValueKind::Bool,
            Value::I32(_) => ValueKind::I32,
            Value::I64(_) => ValueKind::I64,
            Value::F64(_) => ValueKind::F64,
            Value::Str(_) => ValueKind::Str,
        }
    }

    pub fn to_type(self) -> Type {
        match self {
            ValueKind::Unit => Type::unit(),
            ValueKind::Bool => Type::bool(),
            ValueKind::I32 => Type::i32(),
            ValueKind::I64 => Type::i64(),
            ValueKind::F64 => Type::f64(),
            ValueKind::Str => Type::str(),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_type())
    }
}

mod opcode {
    pub const CONST: u8 = 0x01;
    pub const LOAD: u8 = 0x02;
    pub const STORE: u8 = 0x03;
    pub const POP: u8 = 0x04;
    pub const DUP: u8 = 0x05;
    pub const PUSH_UNIT: u8 = 0x06;
    pub const NEG: u8 = 0x10;
    pub const NOT: u8 = 0x11;
    pub const BINARY: u8 = 0x12;
    pub const COMPARE: u8 = 0x13;
    pub const CAST: u8 = 0x14;
    pub const JUMP: u8 = 0x20;
    pub const JUMP_IF_FALSE: u8 = 0x21;
    pub const JUMP_IF_TRUE: u8 = 0x22;
    pub const CALL: u8 = 0x30;
    pub const RET: u8 = 0x31;
}

/// Stack machine instruction
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instr {
    /// Push constant pool entry
    Const(u32),
    /// Push local slot
    Load(u16),
    /// Pop into local slot
    Store(u16),
    Pop,
    Dup,
    PushUnit,
    Neg,
    Not,
    Binary(BinaryOp),
    Compare(CompareOp),
    Cast(ValueKind),
    /// Unconditional jump to an instruction index
    Jump(u32),
    /// Pop a bool, jump when false
    JumpIfFalse(u32),
    /// Pop a bool, jump when true
    JumpIfTrue(u32),
    /// Call function by index; arguments are on the stack, last on top
    Call(u16),
    Ret,
}

impl Instr {
    /// Encoded size in bytes
    pub fn size(&self) -> u32 {
        match self {
            Instr::Const(_) | Instr::Jump(_) | Instr::JumpIfFalse(_) | Instr::JumpIfTrue(_) => 5,
            Instr::Load(_) | Instr::Store(_) | Instr::Call(_) => 3,
            Instr::Binary(_) | Instr::Compare(_) | Instr::Cast(_) => 2,
            Instr::Pop | Instr::Dup | Instr::PushUnit | Instr::Neg | Instr::Not | Instr::Ret => 1,
        }
    }

    pub fn jump_target(&self) -> Option<u32> {
        match self {
            Instr::Jump(t) | Instr::JumpIfFalse(t) | Instr::JumpIfTrue(t) => Some(*t),
            _ => None,
        }
    }

    fn with_target(self, target: u32) -> Self {
        match self {
            Instr::Jump(_) => Instr::Jump(target),
            Instr::JumpIfFalse(_) => Instr::JumpIfFalse(target),
            Instr::JumpIfTrue(_) => Instr::JumpIfTrue(target),
            other => other,
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Const(i) => write!(f, "const #{}", i),
            Instr::Load(s) => write!(f, "load ${}", s),
            Instr::Store(s) => write!(f, "store ${}", s),
            Instr::Pop => write!(f, "pop"),
            Instr::Dup => write!(f, "dup"),
            Instr::PushUnit => write!(f, "unit"),
            Instr::Neg => write!(f, "neg"),
            Instr::Not => write!(f, "not"),
            Instr::Binary(op) => write!(f, "{}", op),
            Instr::Compare(op) => write!(f, "{}", op),
            Instr::Cast(kind) => write!(f, "cast {}", kind),
            Instr::Jump(t) => write!(f, "jump @{}", t),
            Instr::JumpIfFalse(t) => write!(f, "jump_if_false @{}", t),
            Instr::JumpIfTrue(t) => write!(f, "jump_if_true @{}", t),
            Instr::Call(i) => write!(f, "call {}", i),
            Instr::Ret => write!(f, "ret"),
        }
    }
}

/// A compiled function
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    /// Parameters occupy the first `n_params` local slots
    pub n_params: u16,
    pub n_locals: u16,
    pub code: Vec<Instr>,
}

/// A bytecode module
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub consts: Vec<Value>,
    pub functions: Vec<Function>,
    /// Index of the function run by the loader
    pub entry: u16,
    /// Entry parameters, in slot order
    pub inputs: Vec<(String, ValueKind)>,
}

fn wr_u8<W: Write>(w: &mut W, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

fn wr_u16le<W: Write>(w: &mut W, v: u16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn wr_u32le<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn wr_str<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    wr_u32le(w, s.len() as u32)?;
    w.write_all(s.as_bytes())
}

fn rd_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}

fn rd_u16le<R: Read>(r: &mut R) -> io::Result<u16> {
    let mut b = [0u8; 2];
    r.read_exact(&mut b)?;
    Ok(u16::from_le_bytes(b))
}

fn rd_u32le<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn rd_u64le<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

/// Reads `len` bytes without trusting `len` for the allocation
fn rd_bytes<R: Read>(r: &mut R, len: u32) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    r.by_ref().take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len as usize {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated section"));
    }
    Ok(buf)
}

fn rd_str<R: Read>(r: &mut R) -> io::Result<String> {
    let len = rd_u32le(r)?;
    String::from_utf8(rd_bytes(r, len)?)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "string is not utf-8"))
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn write_value<W: Write>(w: &mut W, v: &Value) -> io::Result<()> {
    wr_u8(w, ValueKind::of_value(v) as u8)?;
    match v {
        Value::Unit => Ok(()),
        Value::Bool(b) => wr_u8(w, *b as u8),
        Value::I32(n) => w.write_all(&n.to_le_bytes()),
        Value::I64(n) => w.write_all(&n.to_le_bytes()),
        Value::F64(x) => w.write_all(&x.to_bits().to_le_bytes()),
        Value::Str(s) => wr_str(w, s),
    }
}

fn read_value<R: Read>(r: &mut R) -> io::Result<Value> {
    let kind = ValueKind::from_u8(rd_u8(r)?).ok_or_else(|| invalid("unknown constant kind"))?;
    let value = match kind {
        ValueKind::Unit => Value::Unit,
        ValueKind::Bool => match rd_u8(r)? {
            0 => Value::Bool(false),
            1 => Value::Bool(true),
            _ => return Err(invalid("bool constant out of range")),
        },
        ValueKind::I32 => Value::I32(rd_u32le(r)? as i32),
        ValueKind::I64 => Value::I64(rd_u64le(r)? as i64),
        ValueKind::F64 => Value::F64(f64::from_bits(rd_u64le(r)?)),
        ValueKind::Str => Value::Str(rd_str(r)?),
    };
    Ok(value)
}

fn binary_index(op: BinaryOp) -> u8 {
    BinaryOp::ALL.iter().position(|o| *o == op).unwrap_or(0) as u8
}

fn compare_index(op: CompareOp) -> u8 {
    CompareOp::ALL.iter().position(|o| *o == op).unwrap_or(0) as u8
}

fn encode_code(code: &[Instr]) -> io::Result<Vec<u8>> {
    let mut offsets = Vec::with_capacity(code.len() + 1);
    let mut at = 0u32;
    for instr in code {
        offsets.push(at);
        at += instr.size();
    }
    offsets.push(at);
    let offset_of = |index: u32| {
        offsets
            .get(index as usize)
            .copied()
            .ok_or_else(|| invalid(format!("jump to instruction {} out of range", index)))
    };

    let mut out = Vec::with_capacity(at as usize);
    for instr in code {
        match *instr {
            Instr::Const(i) => {
                wr_u8(&mut out, opcode::CONST)?;
                wr_u32le(&mut out, i)?;
            }
            Instr::Load(s) => {
                wr_u8(&mut out, opcode::LOAD)?;
                wr_u16le(&mut out, s)?;
            }
            Instr::Store(s) => {
                wr_u8(&mut out, opcode::STORE)?;
                wr_u16le(&mut out, s)?;
            }
            Instr::Pop => wr_u8(&mut out, opcode::POP)?,
            Instr::Dup => wr_u8(&mut out, opcode::DUP)?,
            Instr::PushUnit => wr_u8(&mut out, opcode::PUSH_UNIT)?,
            Instr::Neg => wr_u8(&mut out, opcode::NEG)?,
            Instr::Not => wr_u8(&mut out, opcode::NOT)?,
            Instr::Binary(op) => {
                wr_u8(&mut out, opcode::BINARY)?;
                wr_u8(&mut out, binary_index(op))?;
            }
            Instr::Compare(op) => {
                wr_u8(&mut out, opcode::COMPARE)?;
                wr_u8(&mut out, compare_index(op))?;
            }
            Instr::Cast(kind) => {
                wr_u8(&mut out, opcode::CAST)?;
                wr_u8(&mut out, kind as u8)?;
            }
            Instr::Jump(t) => {
                wr_u8(&mut out, opcode::JUMP)?;
                wr_u32le(&mut out, offset_of(t)?)?;
            }
            Instr::JumpIfFalse(t) => {
                wr_u8(&mut out, opcode::JUMP_IF_FALSE)?;
                wr_u32le(&mut out, offset_of(t)?)?;
            }
            Instr::JumpIfTrue(t) => {
                wr_u8(&mut out, opcode::JUMP_IF_TRUE)?;
                wr_u32le(&mut out, offset_of(t)?)?;
            }
            Instr::Call(i) => {
                wr_u8(&mut out, opcode::CALL)?;
                wr_u16le(&mut out, i)?;
            }
            Instr::Ret => wr_u8(&mut out, opcode::RET)?,
        }
    }
    Ok(out)
}

fn decode_code(bytes: &[u8]) -> io::Result<Vec<Instr>> {
    let mut r = bytes;
    let mut code = Vec::new();
    let mut index_of: HashMap<u32, u32> = HashMap::new();
    while !r.is_empty() {
        let offset = (bytes.len() - r.len()) as u32;
        index_of.insert(offset, code.len() as u32);
        let instr = match rd_u8(&mut r)? {
            opcode::CONST => Instr::Const(rd_u32le(&mut r)?),
            opcode::LOAD => Instr::Load(rd_u16le(&mut r)?),
            opcode::STORE => Instr::Store(rd_u16le(&mut r)?),
            opcode::POP => Instr::Pop,
            opcode::DUP => Instr::Dup,
            opcode::PUSH_UNIT => Instr::PushUnit,
            opcode::NEG => Instr::Neg,
            opcode::NOT => Instr::Not,
            opcode::BINARY => {
                let i = rd_u8(&mut r)? as usize;
                Instr::Binary(*BinaryOp::ALL.get(i).ok_or_else(|| invalid("unknown binary operator"))?)
            }
            opcode::COMPARE => {
                let i = rd_u8(&mut r)? as usize;
                Instr::Compare(*CompareOp::ALL.get(i).ok_or_else(|| invalid("unknown comparison"))?)
            }
            opcode::CAST => {
                let kind = ValueKind::from_u8(rd_u8(&mut r)?).ok_or_else(|| invalid("unknown cast kind"))?;
                Instr::Cast(kind)
            }
            opcode::JUMP => Instr::Jump(rd_u32le(&mut r)?),
            opcode::JUMP_IF_FALSE => Instr::JumpIfFalse(rd_u32le(&mut r)?),
            opcode::JUMP_IF_TRUE => Instr::JumpIfTrue(rd_u32le(&mut r)?),
            opcode::CALL => Instr::Call(rd_u16le(&mut r)?),
            opcode::RET => Instr::Ret,
            other => return Err(invalid(format!("unknown opcode 0x{:02x}", other))),
        };
        code.push(instr);
    }
    // Byte offsets back to instruction indices
    code.into_iter()
        .map(|instr| match instr.jump_target() {
            Some(offset) => index_of
                .get(&offset)
                .map(|index| instr.with_target(*index))
                .ok_or_else(|| invalid(format!("jump into the middle of an instruction at byte {}", offset))),
            None => Ok(instr),
        })
        .collect()
}

impl Module {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        // header
        w.write_all(&MAGIC)?;
        wr_u16le(w, VERSION)?;

        // constant pool
        wr_u32le(w, self.consts.len() as u32)?;
        for value in &self.consts {
            write_value(w, value)?;
        }

        // functions
        wr_u16le(w, self.functions.len() as u16)?;
        for f in &self.functions {
            wr_str(w, &f.name)?;
            wr_u16le(w, f.n_params)?;
            wr_u16le(w, f.n_locals)?;
            let code = encode_code(&f.code)?;
            wr_u32le(w, code.len() as u32)?;
            w.write_all(&code)?;
        }

        // trailer
        wr_u16le(w, self.entry)?;
        wr_u16le(w, self.inputs.len() as u16)?;
        for (name, kind) in &self.inputs {
            wr_str(w, name)?;
            wr_u8(w, *kind as u8)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Module> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(invalid("bad magic"));
        }
        let version = rd_u16le(r)?;
        if version != VERSION {
            return Err(invalid(format!("unsupported version {}", version)));
        }

        let nconsts = rd_u32le(r)?;
        let mut consts = Vec::new();
        for _ in 0..nconsts {
            consts.push(read_value(r)?);
        }

        let nfuncs = rd_u16le(r)?;
        let mut functions = Vec::new();
        for _ in 0..nfuncs {
            let name = rd_str(r)?;
            let n_params = rd_u16le(r)?;
            let n_locals = rd_u16le(r)?;
            let code_len = rd_u32le(r)?;
            let code = decode_code(&rd_bytes(r, code_len)?)?;
            functions.push(Function { name, n_params, n_locals, code });
        }

        let entry = rd_u16le(r)?;
        let ninputs = rd_u16le(r)?;
        let mut inputs = Vec::new();
        for _ in 0..ninputs {
            let name = rd_str(r)?;
            let kind = ValueKind::from_u8(rd_u8(r)?).ok_or_else(|| invalid("unknown input kind"))?;
            inputs.push((name, kind));
        }

        Ok(Module { consts, functions, entry, inputs })
    }

    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }

    /// Parses and validates an untrusted module
    pub fn decode(bytes: &[u8]) -> Result<Module, RuntimeError> {
        let mut r = bytes;
        let module = Module::read_from(&mut r).map_err(|e| RuntimeError::Malformed(e.to_string()))?;
        if !r.is_empty() {
            return Err(RuntimeError::Malformed(format!("{} trailing bytes", r.len())));
        }
        module.validate()?;
        Ok(module)
    }

    /// Static checks that let the VM index without bounds failures
    pub fn validate(&self) -> Result<(), RuntimeError> {
        let malformed = |msg: String| Err(RuntimeError::Malformed(msg));
        let Some(entry) = self.functions.get(self.entry as usize) else {
            return malformed(format!("entry function {} does not exist", self.entry));
        };
        if entry.n_params as usize != self.inputs.len() {
            return malformed(format!(
                "entry takes {} parameters but the module declares {} inputs",
                entry.n_params,
                self.inputs.len()
            ));
        }
        for f in &self.functions {
            if f.n_params > f.n_locals {
                return malformed(format!("`{}` has more parameters than locals", f.name));
            }
            if f.code.last() != Some(&Instr::Ret) {
                return malformed(format!("`{}` does not end with ret", f.name));
            }
            for instr in &f.code {
                let ok = match *instr {
                    Instr::Const(i) => (i as usize) < self.consts.len(),
                    Instr::Load(s) | Instr::Store(s) => s < f.n_locals,
                    Instr::Call(i) => (i as usize) < self.functions.len(),
                    Instr::Jump(t) | Instr::JumpIfFalse(t) | Instr::JumpIfTrue(t) => (t as usize) < f.code.len(),
                    _ => true,
                };
                if !ok {
                    return malformed(format!("`{}`: operand of `{}` out of range", f.name, instr));
                }
            }
        }
        Ok(())
    }

    /// Human-readable listing
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "; MTBC v{}", VERSION);
        for (i, value) in self.consts.iter().enumerate() {
            let _ = writeln!(out, "const #{} = {}", i, value);
        }
        for (i, f) in self.functions.iter().enumerate() {
            let marker = if i == self.entry as usize { " (entry)" } else { "" };
            let _ = writeln!(out, "fn {} {}{} params={} locals={}", i, f.name, marker, f.n_params, f.n_locals);
            for (pc, instr) in f.code.iter().enumerate() {
                let _ = writeln!(out, "  {:4}  {}", pc, instr);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Module {
        Module {
            consts: vec![Value::I64(1), Value::str("hé"), Value::F64(-0.5), Value::Bool(true)],
            functions: vec![Function {
                name: "__entry".to_string(),
                n_params: 1,
                n_locals: 2,
                code: vec![
                    Instr::Load(0),
                    Instr::Const(3),
                    Instr::JumpIfFalse(5),
                    Instr::Const(0),
                    Instr::Binary(BinaryOp::Add),
                    Instr::Ret,
                ],
            }],
            entry: 0,
            inputs: vec![("x".to_string(), ValueKind::I64)],
        }
    }

    #[test]
    fn test_header() {
        let bytes = sample().encode().unwrap();
        assert_eq!(&bytes[..4], b"MTBC");
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), VERSION);
    }

    #[test]
    fn test_decode_restores_module() {
        let module = sample();
        let decoded = Module::decode(&module.encode().unwrap()).unwrap();
        assert_eq!(decoded, module);
    }

    #[test]
    fn test_jumps_are_byte_offsets() {
        let code = encode_code(&sample().functions[0].code).unwrap();
        // load(3) + const(5) = 8: the jump operand follows its opcode byte
        let operand = u32::from_le_bytes([code[9], code[10], code[11], code[12]]);
        // target is instruction 5: 3 + 5 + 5 + 5 + 2 = 20
        assert_eq!(operand, 20);
    }

    #[test]
    fn test_rejects_bad_magic_and_trailing_bytes() {
        let mut bytes = sample().encode().unwrap();
        bytes.push(0);
        assert!(matches!(Module::decode(&bytes), Err(RuntimeError::Malformed(_))));
        bytes.pop();
        bytes[0] = b'X';
        assert!(matches!(Module::decode(&bytes), Err(RuntimeError::Malformed(_))));
    }

    #[test]
    fn test_rejects_truncation() {
        let bytes = sample().encode().unwrap();
        for len in [0, 3, 6, 10, bytes.len() - 1] {
            assert!(Module::decode(&bytes[..len]).is_err(), "length {}", len);
        }
    }

    #[test]
    fn test_validate_operands() {
        let mut module = sample();
        module.functions[0].code[1] = Instr::Const(99);
        assert!(module.validate().is_err());

        let mut module = sample();
        module.functions[0].code[0] = Instr::Load(7);
        assert!(module.validate().is_err());

        let mut module = sample();
        module.functions[0].code.pop();
        module.functions[0].code[2] = Instr::JumpIfFalse(3);
        assert!(module.validate().is_err());
    }

    #[test]
    fn test_jump_into_instruction_rejected() {
        // jump to byte 1, inside the 5-byte jump itself
        let code = [opcode::JUMP, 1, 0, 0, 0, opcode::RET];
        assert!(decode_code(&code).is_err());
    }

    #[test]
    fn test_disassemble() {
        let listing = sample().disassemble();
        assert!(listing.contains("fn 0 __entry (entry) params=1 locals=2"));
        assert!(listing.contains("jump_if_false @5"));
        assert!(listing.contains("add"));
    }
}
