//! Bytecode instruction set for the compiled regex virtual machine
//!
//! Every instruction is one opcode byte followed by its operands. Numeric
//! operands are 2-byte little-endian signed integers. `Set` carries a 32-byte
//! bitmap instead, and `Str`/`StrNoCase` carry a length operand followed by
//! that many literal bytes.
//!
//! Jump offsets are relative to the end of the instruction that holds them and
//! are always its last operand, so code can be inserted in front of a finished
//! fragment without touching the offsets inside it.

/// Size of a numeric operand
pub const OPERAND_SIZE: usize = 2;
/// Size of a `Set` bitmap, one bit per byte value
pub const SET_SIZE: usize = 32;
/// Operand value standing for an unbounded repeat maximum
pub const UNBOUNDED: i16 = -1;

/// Compiled regex opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    /// End of the program: the attempt matched
    Succeed = 0,
    /// End of a lookaround or atomic sub-program
    SubEnd = 1,
    /// Never matches
    Fail = 2,
    /// Exact byte (operand: byte)
    Char = 3,
    /// Byte compared without ASCII case (operand: lowercase byte)
    CharNoCase = 4,
    /// Byte string (operand: length, then the bytes)
    Str = 5,
    /// Byte string compared without ASCII case
    StrNoCase = 6,
    /// Any byte
    Any = 7,
    /// Any byte except newline
    AnyNoNewline = 8,
    /// Byte in a 256-bit set (32 bytes follow)
    Set = 9,
    /// Byte in a predefined class (operand: class id)
    Class = 10,
    /// Byte not in a predefined class (operand: class id)
    NotClass = 11,
    /// Beginning of line
    LineBegin = 12,
    /// End of line
    LineEnd = 13,
    /// Beginning of subject
    TextBegin = 14,
    /// End of subject
    TextEnd = 15,
    /// Word boundary
    WordBoundary = 16,
    /// Not a word boundary
    NotWordBoundary = 17,
    /// Beginning of word
    WordBegin = 18,
    /// End of word
    WordEnd = 19,
    /// Start capture group (operand: group)
    Open = 20,
    /// End capture group (operand: group)
    Close = 21,
    /// Match the text of a group (operand: group)
    BackRef = 22,
    /// Match the text of a group without ASCII case
    BackRefNoCase = 23,
    /// Unconditional jump (operand: offset)
    Jump = 24,
    /// Try the following code, then the target (operand: offset)
    Branch = 25,
    /// Try the target, then the following code (operand: offset)
    BranchRev = 26,
    /// Greedy repeat of the next single-byte instruction (operands: min, max)
    Repeat = 27,
    /// Lazy repeat of the next single-byte instruction (operands: min, max)
    RepeatLazy = 28,
    /// Possessive repeat of the next single-byte instruction (operands: min, max)
    RepeatPossessive = 29,
    /// Positive lookahead (operand: offset past the sub-program)
    LookAhead = 30,
    /// Negative lookahead (operand: offset past the sub-program)
    NegLookAhead = 31,
    /// Positive lookbehind (operands: width, offset past the sub-program)
    LookBehind = 32,
    /// Negative lookbehind (operands: width, offset past the sub-program)
    NegLookBehind = 33,
    /// Atomic group (operand: offset past the sub-program)
    Atomic = 34,
    /// Zero a counter register (operand: counter)
    CounterReset = 35,
    /// Count an iteration and remember where it started (operand: counter)
    CounterInc = 36,
    /// Jump if count < bound (operands: counter, bound, offset)
    JumpLess = 37,
    /// Jump if count >= bound (operands: counter, bound, offset)
    JumpAtLeast = 38,
    /// Jump if the current iteration consumed nothing (operands: counter, offset)
    JumpStuck = 39,
}

impl Op {
    /// Convert byte to opcode
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Op::Succeed),
            1 => Some(Op::SubEnd),
            2 => Some(Op::Fail),
            3 => Some(Op::Char),
            4 => Some(Op::CharNoCase),
            5 => Some(Op::Str),
            6 => Some(Op::StrNoCase),
            7 => Some(Op::Any),
            8 => Some(Op::AnyNoNewline),
            9 => Some(Op::Set),
            10 => Some(Op::Class),
            11 => Some(Op::NotClass),
            12 => Some(Op::LineBegin),
            13 => Some(Op::LineEnd),
            14 => Some(Op::TextBegin),
            15 => Some(Op::TextEnd),
            16 => Some(Op::WordBoundary),
            17 => Some(Op::NotWordBoundary),
            18 => Some(Op::WordBegin),
            19 => Some(Op::WordEnd),
            20 => Some(Op::Open),
            21 => Some(Op::Close),
            22 => Some(Op::BackRef),
            23 => Some(Op::BackRefNoCase),
            24 => Some(Op::Jump),
            25 => Some(Op::Branch),
            26 => Some(Op::BranchRev),
            27 => Some(Op::Repeat),
            28 => Some(Op::RepeatLazy),
            29 => Some(Op::RepeatPossessive),
            30 => Some(Op::LookAhead),
            31 => Some(Op::NegLookAhead),
            32 => Some(Op::LookBehind),
            33 => Some(Op::NegLookBehind),
            34 => Some(Op::Atomic),
            35 => Some(Op::CounterReset),
            36 => Some(Op::CounterInc),
            37 => Some(Op::JumpLess),
            38 => Some(Op::JumpAtLeast),
            39 => Some(Op::JumpStuck),
            _ => None,
        }
    }

    /// Convert opcode to byte
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Number of 2-byte operands following the opcode
    pub fn operand_count(self) -> usize {
        match self {
            Op::Succeed
            | Op::SubEnd
            | Op::Fail
            | Op::Any
            | Op::AnyNoNewline
            | Op::Set
            | Op::LineBegin
            | Op::LineEnd
            | Op::TextBegin
            | Op::TextEnd
            | Op::WordBoundary
            | Op::NotWordBoundary
            | Op::WordBegin
            | Op::WordEnd => 0,

            Op::Char
            | Op::CharNoCase
            | Op::Str
            | Op::StrNoCase
            | Op::Class
            | Op::NotClass
            | Op::Open
            | Op::Close
            | Op::BackRef
            | Op::BackRefNoCase
            | Op::Jump
            | Op::Branch
            | Op::BranchRev
            | Op::LookAhead
            | Op::NegLookAhead
            | Op::Atomic
            | Op::CounterReset
            | Op::CounterInc => 1,

            Op::Repeat
            | Op::RepeatLazy
            | Op::RepeatPossessive
            | Op::LookBehind
            | Op::NegLookBehind
            | Op::JumpStuck => 2,

            Op::JumpLess | Op::JumpAtLeast => 3,
        }
    }

    /// Whether the last operand is a relative jump offset
    pub fn has_target(self) -> bool {
        matches!(
            self,
            Op::Jump
                | Op::Branch
                | Op::BranchRev
                | Op::LookAhead
                | Op::NegLookAhead
                | Op::LookBehind
                | Op::NegLookBehind
                | Op::Atomic
                | Op::JumpLess
                | Op::JumpAtLeast
                | Op::JumpStuck
        )
    }

    /// Whether this instruction matches exactly one byte and can be the
    /// operand of a `Repeat`
    pub fn is_single(self) -> bool {
        matches!(
            self,
            Op::Char
                | Op::CharNoCase
                | Op::Any
                | Op::AnyNoNewline
                | Op::Set
                | Op::Class
                | Op::NotClass
        )
    }

    /// Size of an instruction without a variable-length payload
    pub fn fixed_size(self) -> usize {
        let payload = if self == Op::Set { SET_SIZE } else { 0 };
        1 + self.operand_count() * OPERAND_SIZE + payload
    }
}

/// Read a 2-byte operand
pub fn read_operand(code: &[u8], at: usize) -> i16 {
    i16::from_le_bytes([code[at], code[at + 1]])
}

/// Read operand `index` of the instruction at `pc`
pub fn operand(code: &[u8], pc: usize, index: usize) -> i16 {
    read_operand(code, pc + 1 + index * OPERAND_SIZE)
}

/// Total size of the instruction at `pc`, payload included
pub fn instruction_len(code: &[u8], pc: usize) -> usize {
    match Op::from_byte(code[pc]) {
        Some(op @ (Op::Str | Op::StrNoCase)) => {
            op.fixed_size() + operand(code, pc, 0) as u16 as usize
        }
        Some(op) => op.fixed_size(),
        None => 1,
    }
}

/// Absolute target of the jump instruction at `pc`
pub fn jump_target(code: &[u8], pc: usize, op: Op) -> usize {
    let end = pc + op.fixed_size();
    let offset = operand(code, pc, op.operand_count() - 1);
    (end as isize + offset as isize) as usize
}

/// Test whether `byte` is in a set bitmap
pub fn set_contains(bitmap: &[u8], byte: u8) -> bool {
    bitmap[(byte >> 3) as usize] & (1 << (byte & 7)) != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_bytes_round_trip() {
        for byte in 0..=u8::MAX {
            if let Some(op) = Op::from_byte(byte) {
                assert_eq!(op.to_byte(), byte);
            }
        }
        assert_eq!(Op::from_byte(40), None);
    }

    #[test]
    fn sizes() {
        assert_eq!(Op::Succeed.fixed_size(), 1);
        assert_eq!(Op::Char.fixed_size(), 3);
        assert_eq!(Op::Set.fixed_size(), 33);
        assert_eq!(Op::Repeat.fixed_size(), 5);
        assert_eq!(Op::JumpLess.fixed_size(), 7);
        let code = [Op::Str.to_byte(), 3, 0, b'a', b'b', b'c', Op::Succeed.to_byte()];
        assert_eq!(instruction_len(&code, 0), 6);
        assert_eq!(instruction_len(&code, 6), 1);
    }

    #[test]
    fn backward_target() {
        // Jump -3 from the end of a 3-byte jump lands on itself
        let code = [Op::Jump.to_byte(), 0xfd, 0xff];
        assert_eq!(jump_target(&code, 0, Op::Jump), 0);
    }

    #[test]
    fn bitmap_lookup() {
        let mut bitmap = [0u8; SET_SIZE];
        bitmap[(b'a' >> 3) as usize] |= 1 << (b'a' & 7);
        assert!(set_contains(&bitmap, b'a'));
        assert!(!set_contains(&bitmap, b'b'));
    }
}
