//! Compiled programs and the buffer they are assembled in

use std::fmt;

use crate::{
    classify::ClassKind,
    opcodes::{self, Op, SET_SIZE, UNBOUNDED},
    syntax::Flags,
};

/// An immutable compiled regex program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    code: Vec<u8>,
    groups: usize,
    flags: Flags,
}

impl Program {
    pub(crate) fn new(code: Vec<u8>, groups: usize, flags: Flags) -> Self {
        Self {
            code,
            groups,
            flags,
        }
    }

    /// A program that matches nothing.
    ///
    /// Engines whose pattern failed to compile run this instead.
    pub fn never() -> Self {
        Self {
            code: vec![Op::Fail.to_byte(), Op::Succeed.to_byte()],
            groups: 0,
            flags: Flags::empty(),
        }
    }

    /// The raw bytecode
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Number of capture groups, not counting the whole match
    pub fn group_count(&self) -> usize {
        self.groups
    }

    /// Flags the program was compiled with
    pub fn flags(&self) -> Flags {
        self.flags
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::never()
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = &self.code;
        let mut pc = 0;
        while pc < code.len() {
            let Some(op) = Op::from_byte(code[pc]) else {
                writeln!(f, "{pc:04}  ?? {:#04x}", code[pc])?;
                pc += 1;
                continue;
            };
            write!(f, "{pc:04}  {op:?}")?;
            let operands = if op.has_target() {
                op.operand_count() - 1
            } else {
                op.operand_count()
            };
            match op {
                Op::Char | Op::CharNoCase => {
                    let byte = opcodes::operand(code, pc, 0) as u8;
                    write!(f, " {}", byte.escape_ascii())?;
                }
                Op::Str | Op::StrNoCase => {
                    let start = pc + op.fixed_size();
                    let len = opcodes::operand(code, pc, 0) as u16 as usize;
                    write!(f, " \"{}\"", code[start..start + len].escape_ascii())?;
                }
                Op::Set => {
                    let bitmap = &code[pc + 1..pc + 1 + SET_SIZE];
                    write!(f, " [")?;
                    for byte in (0..=u8::MAX).filter(|&b| opcodes::set_contains(bitmap, b)) {
                        write!(f, "{}", byte.escape_ascii())?;
                    }
                    write!(f, "]")?;
                }
                Op::Class | Op::NotClass => {
                    let kind = ClassKind::from_byte(opcodes::operand(code, pc, 0) as u8);
                    write!(f, " {kind:?}")?;
                }
                Op::Repeat | Op::RepeatLazy | Op::RepeatPossessive => {
                    let min = opcodes::operand(code, pc, 0);
                    match opcodes::operand(code, pc, 1) {
                        UNBOUNDED => write!(f, " {{{min},}}")?,
                        max => write!(f, " {{{min},{max}}}")?,
                    }
                }
                _ => {
                    for i in 0..operands {
                        write!(f, " {}", opcodes::operand(code, pc, i))?;
                    }
                }
            }
            if op.has_target() {
                write!(f, " -> {:04}", opcodes::jump_target(code, pc, op))?;
            }
            writeln!(f)?;
            pc += opcodes::instruction_len(code, pc);
        }
        Ok(())
    }
}

/// Growable output buffer for the compiler.
///
/// A measuring buffer only tracks the length it would have; the first
/// compiler pass runs against one to size the real buffer for the second.
#[derive(Debug)]
pub(crate) struct CodeBuf {
    bytes: Option<Vec<u8>>,
    len: usize,
}

impl CodeBuf {
    pub fn measuring() -> Self {
        Self {
            bytes: None,
            len: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Some(Vec::with_capacity(capacity)),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn extend(&mut self, data: &[u8]) {
        if let Some(bytes) = &mut self.bytes {
            bytes.extend_from_slice(data);
        }
        self.len += data.len();
    }

    /// Insert `data` at `at`, shifting everything after it
    pub fn insert(&mut self, at: usize, data: &[u8]) {
        debug_assert!(at <= self.len);
        if let Some(bytes) = &mut self.bytes {
            bytes.splice(at..at, data.iter().copied());
        }
        self.len += data.len();
    }

    /// Overwrite the operand stored at `at`
    pub fn patch(&mut self, at: usize, value: i16) {
        if let Some(bytes) = &mut self.bytes {
            bytes[at..at + 2].copy_from_slice(&value.to_le_bytes());
        }
    }

    pub fn push_op(&mut self, op: Op, operands: &[i16]) {
        self.extend(&encode(op, operands));
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes.unwrap_or_default()
    }
}

/// Encode one instruction with numeric operands
pub(crate) fn encode(op: Op, operands: &[i16]) -> Vec<u8> {
    debug_assert_eq!(operands.len(), op.operand_count());
    let mut out = Vec::with_capacity(op.fixed_size());
    out.push(op.to_byte());
    for value in operands {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_program_ends_in_succeed() {
        let program = Program::never();
        assert_eq!(program.code().last(), Some(&Op::Succeed.to_byte()));
        assert_eq!(program.group_count(), 0);
    }

    #[test]
    fn measuring_buffer_tracks_length_only() {
        let mut buf = CodeBuf::measuring();
        buf.push_op(Op::Char, &[b'a' as i16]);
        buf.insert(0, &encode(Op::Branch, &[3]));
        buf.patch(1, 7);
        assert_eq!(buf.len(), 6);
        assert!(buf.into_bytes().is_empty());
    }

    #[test]
    fn insert_shifts_existing_code() {
        let mut buf = CodeBuf::with_capacity(8);
        buf.push_op(Op::Char, &[b'a' as i16]);
        buf.insert(0, &encode(Op::Branch, &[3]));
        buf.patch(1, 4);
        assert_eq!(
            buf.into_bytes(),
            vec![Op::Branch.to_byte(), 4, 0, Op::Char.to_byte(), b'a', 0]
        );
    }

    #[test]
    fn disassembly_lists_targets() {
        let code = vec![
            Op::Branch.to_byte(),
            3,
            0,
            Op::Char.to_byte(),
            b'a',
            0,
            Op::Succeed.to_byte(),
        ];
        let listing = Program::new(code, 0, Flags::default()).to_string();
        assert_eq!(listing, "0000  Branch -> 0006\n0003  Char a\n0006  Succeed\n");
    }
}
