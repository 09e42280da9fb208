//! Regex pattern compiler
//!
//! A recursive-descent parser over
//!
//! ```text
//! expression = branch ('|' branch)*
//! branch     = piece*
//! piece      = atom quantifier?
//! ```
//!
//! that emits bytecode while it parses. Compilation runs twice: the first pass
//! writes into a measuring buffer to learn the program size, the second emits
//! into a buffer of exactly that size.

use crate::{
    classify::ClassKind,
    error::{RegexError, Result},
    opcodes::{Op, SET_SIZE, UNBOUNDED},
    program::{encode, CodeBuf, Program},
    syntax::Flags,
    MAX_LOOPS, MAX_SLOTS,
};

/// Largest bound accepted in a counted repeat
const MAX_REPEAT: usize = i16::MAX as usize;
/// Longest literal held by a single `Str` instruction
const MAX_LITERAL: usize = i16::MAX as usize;
/// Deepest group nesting the parser accepts
const MAX_NESTING: usize = 256;

/// Number of bytes an expression can match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Width {
    min: usize,
    /// `None` when unbounded
    max: Option<usize>,
}

impl Width {
    const ZERO: Width = Width::exact(0);
    const UNKNOWN: Width = Width { min: 0, max: None };

    const fn exact(n: usize) -> Self {
        Width { min: n, max: Some(n) }
    }

    /// Width of `self` followed by `next`
    fn then(self, next: Width) -> Width {
        Width {
            min: self.min.saturating_add(next.min),
            max: match (self.max, next.max) {
                (Some(a), Some(b)) => a.checked_add(b),
                _ => None,
            },
        }
    }

    /// Width of `self` or `other`
    fn or(self, other: Width) -> Width {
        Width {
            min: self.min.min(other.min),
            max: match (self.max, other.max) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            },
        }
    }

    fn repeat(self, min: usize, max: Option<usize>) -> Width {
        Width {
            min: self.min.saturating_mul(min),
            max: match (self.max, max) {
                (Some(0), _) => Some(0),
                (Some(a), Some(b)) => a.checked_mul(b),
                _ => None,
            },
        }
    }

    fn fixed(self) -> Option<usize> {
        self.max.filter(|&max| max == self.min)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AtomKind {
    /// One instruction matching exactly one byte
    Single,
    /// Groups and back-references
    Complex,
    /// Zero-width assertions, which cannot be repeated
    Assertion,
}

#[derive(Debug, Clone, Copy)]
struct Atom {
    kind: AtomKind,
    width: Width,
}

impl Atom {
    fn single() -> Self {
        Atom {
            kind: AtomKind::Single,
            width: Width::exact(1),
        }
    }

    fn complex(width: Width) -> Self {
        Atom {
            kind: AtomKind::Complex,
            width,
        }
    }

    fn assertion() -> Self {
        Atom {
            kind: AtomKind::Assertion,
            width: Width::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Greed {
    Greedy,
    Lazy,
    Possessive,
}

#[derive(Debug, Clone, Copy)]
struct Quantifier {
    min: usize,
    max: Option<usize>,
    greed: Greed,
}

/// Jump destinations inside a wrapped fragment
#[derive(Debug, Clone, Copy)]
enum Label {
    /// The `LoopHead` marker, or the start of the fragment without one
    Loop,
    /// Just past the fragment
    Exit,
}

/// One element of the code laid around an already emitted body
#[derive(Debug, Clone, Copy)]
enum Step {
    /// Instruction with its leading operands; the label fills the last one
    Insn(Op, [i16; 2], Option<Label>),
    LoopHead,
    Body,
}

fn insn(op: Op, operands: [i16; 2]) -> Step {
    Step::Insn(op, operands, None)
}

fn jump(op: Op, operands: [i16; 2], label: Label) -> Step {
    Step::Insn(op, operands, Some(label))
}

enum SetItem {
    Byte(u8),
    Class(ClassKind, bool),
}

/// Compiler state for one pass over a pattern
struct Compiler<'p> {
    pattern: &'p [u8],
    pos: usize,
    code: CodeBuf,
    /// Flags in effect at the current position
    flags: Flags,
    /// Capture groups opened so far
    groups: usize,
    closed: [bool; MAX_SLOTS],
    /// Counter registers allocated so far
    loops: usize,
    /// Groups currently open around the parse position
    depth: usize,
}

impl<'p> Compiler<'p> {
    fn new(pattern: &'p [u8], flags: Flags, code: CodeBuf) -> Self {
        Compiler {
            pattern,
            pos: 0,
            code,
            flags,
            groups: 0,
            closed: [false; MAX_SLOTS],
            loops: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.pattern.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.pattern.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Compile the whole pattern, returning the code and the group count
    fn run(mut self) -> Result<(CodeBuf, usize)> {
        if self.flags.verbatim() {
            let pattern = self.pattern;
            self.emit_literal(pattern);
            self.pos = pattern.len();
        } else {
            self.parse_expression()?;
            if self.pos < self.pattern.len() {
                // Only a stray ')' ends the top-level expression early
                return Err(RegexError::UnmatchedParen);
            }
        }
        self.code.push_op(Op::Succeed, &[]);
        Ok((self.code, self.groups))
    }

    fn parse_expression(&mut self) -> Result<Width> {
        let mut branch_start = self.code.len();
        let (mut width, pieces) = self.parse_branch()?;
        if self.peek() != Some(b'|') {
            return Ok(width);
        }
        if pieces == 0 {
            return Err(RegexError::MissingOperand);
        }

        // The branch instruction goes in front of code that is already
        // emitted; offsets inside that code are relative and stay valid.
        let jump_size = Op::Jump.fixed_size();
        let mut jumps = Vec::new();
        while self.eat(b'|') {
            let branch_len = self.code.len() - branch_start;
            let offset = to_offset((branch_len + jump_size) as isize)?;
            self.code
                .insert(branch_start, &encode(Op::Branch, &[offset]));
            jumps.push(self.code.len());
            self.code.push_op(Op::Jump, &[0]);

            branch_start = self.code.len();
            let (next, pieces) = self.parse_branch()?;
            if pieces == 0 {
                return Err(RegexError::MissingOperand);
            }
            width = width.or(next);
        }

        let end = self.code.len();
        for at in jumps {
            let offset = to_offset((end - (at + jump_size)) as isize)?;
            self.code.patch(at + 1, offset);
        }
        Ok(width)
    }

    /// Parse pieces up to `|`, `)` or the end, returning their width and count
    fn parse_branch(&mut self) -> Result<(Width, usize)> {
        let mut width = Width::ZERO;
        let mut pieces = 0;
        while let Some(byte) = self.peek() {
            if byte == b'|' || byte == b')' {
                break;
            }
            width = width.then(self.parse_piece()?);
            pieces += 1;
        }
        Ok((width, pieces))
    }

    fn parse_piece(&mut self) -> Result<Width> {
        let start = self.code.len();
        let atom = self.parse_atom()?;
        let Some(quantifier) = self.parse_quantifier()? else {
            return Ok(atom.width);
        };
        if is_quantifier_start(self.peek()) {
            return Err(RegexError::MissingOperand);
        }

        match atom.kind {
            AtomKind::Assertion => return Err(RegexError::MissingOperand),
            AtomKind::Single => self.quantify_single(start, quantifier),
            AtomKind::Complex => self.quantify_complex(start, atom.width, quantifier)?,
        }
        Ok(atom.width.repeat(quantifier.min, quantifier.max))
    }

    fn parse_quantifier(&mut self) -> Result<Option<Quantifier>> {
        let (min, max) = match self.peek() {
            Some(b'*') => (0, None),
            Some(b'+') => (1, None),
            Some(b'?') => (0, Some(1)),
            Some(b'{') => {
                self.pos += 1;
                let (min, max) = self.parse_braces()?;
                self.pos -= 1;
                (min, max)
            }
            _ => return Ok(None),
        };
        self.pos += 1;

        let greed = if self.eat(b'?') {
            Greed::Lazy
        } else if self.eat(b'+') {
            Greed::Possessive
        } else {
            Greed::Greedy
        };
        Ok(Some(Quantifier { min, max, greed }))
    }

    /// Parse `n}`, `n,}`, `n,m}` or `,m}`; leaves `pos` just past the `}`
    fn parse_braces(&mut self) -> Result<(usize, Option<usize>)> {
        let rest = &self.pattern[self.pos..];
        let close = rest
            .iter()
            .position(|&b| b == b'}')
            .ok_or(RegexError::UnmatchedBrace)?;
        let body = &rest[..close];
        self.pos += close + 1;

        let (min, max) = match body.iter().position(|&b| b == b',') {
            None => {
                let n = parse_bound(body)?;
                (n, Some(n))
            }
            Some(comma) => {
                let (low, high) = (&body[..comma], &body[comma + 1..]);
                if low.is_empty() && high.is_empty() {
                    return Err(RegexError::BadRepeatRange);
                }
                let min = if low.is_empty() { 0 } else { parse_bound(low)? };
                let max = if high.is_empty() {
                    None
                } else {
                    Some(parse_bound(high)?)
                };
                (min, max)
            }
        };
        if let Some(max) = max {
            if max == 0 || max < min {
                return Err(RegexError::BadRepeatRange);
            }
        }
        Ok((min, max))
    }

    /// Prefix a single-byte instruction with a repeat
    fn quantify_single(&mut self, start: usize, q: Quantifier) {
        if q.min == 1 && q.max == Some(1) {
            return;
        }
        let op = match q.greed {
            Greed::Greedy => Op::Repeat,
            Greed::Lazy => Op::RepeatLazy,
            Greed::Possessive => Op::RepeatPossessive,
        };
        let max = q.max.map_or(UNBOUNDED, |max| max as i16);
        self.code.insert(start, &encode(op, &[q.min as i16, max]));
    }

    /// Build a loop around the code emitted since `start`
    fn quantify_complex(&mut self, start: usize, width: Width, q: Quantifier) -> Result<()> {
        if q.min == 1 && q.max == Some(1) {
            return Ok(());
        }
        // `enter` decides whether to run the body, `again` whether to loop
        // back to it. Greedy tries the body first, lazy the exit.
        let (enter, again) = if q.greed == Greed::Lazy {
            (Op::BranchRev, Op::Branch)
        } else {
            (Op::Branch, Op::BranchRev)
        };
        let nullable = width.min == 0;

        let steps: Vec<Step> = match (q.min, q.max) {
            (0, Some(1)) => vec![jump(enter, [0, 0], Label::Exit), Step::Body],
            (0, None) if nullable => {
                let c = self.next_counter()?;
                vec![
                    jump(enter, [0, 0], Label::Exit),
                    insn(Op::CounterInc, [c, 0]),
                    Step::Body,
                    jump(Op::JumpStuck, [c, 0], Label::Exit),
                    jump(Op::Jump, [0, 0], Label::Loop),
                ]
            }
            (0, None) => vec![
                jump(enter, [0, 0], Label::Exit),
                Step::Body,
                jump(Op::Jump, [0, 0], Label::Loop),
            ],
            (1, None) if nullable => {
                let c = self.next_counter()?;
                vec![
                    insn(Op::CounterInc, [c, 0]),
                    Step::Body,
                    jump(Op::JumpStuck, [c, 0], Label::Exit),
                    jump(again, [0, 0], Label::Loop),
                ]
            }
            (1, None) => vec![Step::Body, jump(again, [0, 0], Label::Loop)],
            (0, Some(max)) => {
                let c = self.next_counter()?;
                vec![
                    insn(Op::CounterReset, [c, 0]),
                    Step::LoopHead,
                    jump(enter, [0, 0], Label::Exit),
                    insn(Op::CounterInc, [c, 0]),
                    Step::Body,
                    jump(Op::JumpLess, [c, max as i16], Label::Loop),
                ]
            }
            (min, Some(max)) if min == max => {
                let c = self.next_counter()?;
                vec![
                    insn(Op::CounterReset, [c, 0]),
                    Step::LoopHead,
                    insn(Op::CounterInc, [c, 0]),
                    Step::Body,
                    jump(Op::JumpLess, [c, min as i16], Label::Loop),
                ]
            }
            (min, None) => {
                let c = self.next_counter()?;
                let mut steps = vec![
                    insn(Op::CounterReset, [c, 0]),
                    Step::LoopHead,
                    insn(Op::CounterInc, [c, 0]),
                    Step::Body,
                    jump(Op::JumpLess, [c, min as i16], Label::Loop),
                ];
                if nullable {
                    steps.push(jump(Op::JumpStuck, [c, 0], Label::Exit));
                }
                steps.push(jump(again, [0, 0], Label::Loop));
                steps
            }
            (min, Some(max)) => {
                let c = self.next_counter()?;
                vec![
                    insn(Op::CounterReset, [c, 0]),
                    Step::LoopHead,
                    insn(Op::CounterInc, [c, 0]),
                    Step::Body,
                    jump(Op::JumpLess, [c, min as i16], Label::Loop),
                    jump(Op::JumpAtLeast, [c, max as i16], Label::Exit),
                    jump(again, [0, 0], Label::Loop),
                ]
            }
        };
        self.wrap(start, &steps)?;

        if q.greed == Greed::Possessive {
            self.wrap(
                start,
                &[
                    jump(Op::Atomic, [0, 0], Label::Exit),
                    Step::Body,
                    insn(Op::SubEnd, [0, 0]),
                ],
            )?;
        }
        Ok(())
    }

    fn next_counter(&mut self) -> Result<i16> {
        if self.loops >= MAX_LOOPS {
            return Err(RegexError::TooComplex);
        }
        self.loops += 1;
        Ok((self.loops - 1) as i16)
    }

    /// Lay `steps` around the code emitted since `start`, which stands for
    /// `Step::Body`. Instructions before the body are inserted in front of
    /// it, the others appended.
    fn wrap(&mut self, start: usize, steps: &[Step]) -> Result<()> {
        let body = self.code.len() - start;

        let mut addrs = Vec::with_capacity(steps.len());
        let mut pos = start;
        let mut head = start;
        for step in steps {
            addrs.push(pos);
            match step {
                Step::Insn(op, ..) => pos += op.fixed_size(),
                Step::LoopHead => head = pos,
                Step::Body => pos += body,
            }
        }
        let exit = pos;

        let mut prefix = Vec::new();
        let mut suffix = Vec::new();
        let mut after_body = false;
        for (step, &addr) in steps.iter().zip(&addrs) {
            let Step::Insn(op, args, label) = *step else {
                after_body |= matches!(step, Step::Body);
                continue;
            };
            let fixed = op.operand_count() - usize::from(label.is_some());
            let mut operands = args[..fixed].to_vec();
            if let Some(label) = label {
                let target = match label {
                    Label::Loop => head,
                    Label::Exit => exit,
                };
                let from = addr + op.fixed_size();
                operands.push(to_offset(target as isize - from as isize)?);
            }
            let bytes = encode(op, &operands);
            if after_body {
                suffix.extend(bytes);
            } else {
                prefix.extend(bytes);
            }
        }

        self.code.insert(start, &prefix);
        self.code.extend(&suffix);
        Ok(())
    }

    fn parse_atom(&mut self) -> Result<Atom> {
        let Some(byte) = self.peek() else {
            return Err(RegexError::MissingOperand);
        };
        match byte {
            b'(' => {
                self.pos += 1;
                self.parse_group()
            }
            b'[' => {
                self.pos += 1;
                self.parse_set()?;
                Ok(Atom::single())
            }
            b'.' => {
                self.pos += 1;
                let op = if self.flags.newline_sensitive() {
                    Op::AnyNoNewline
                } else {
                    Op::Any
                };
                self.code.push_op(op, &[]);
                Ok(Atom::single())
            }
            b'^' => {
                self.pos += 1;
                let op = if self.flags.newline_sensitive() {
                    Op::LineBegin
                } else {
                    Op::TextBegin
                };
                self.code.push_op(op, &[]);
                Ok(Atom::assertion())
            }
            b'$' => {
                self.pos += 1;
                let op = if self.flags.newline_sensitive() {
                    Op::LineEnd
                } else {
                    Op::TextEnd
                };
                self.code.push_op(op, &[]);
                Ok(Atom::assertion())
            }
            b'*' | b'+' | b'?' | b'{' => Err(RegexError::MissingOperand),
            b']' => Err(RegexError::UnmatchedBracket),
            b'}' => Err(RegexError::IllegalToken),
            b'\\' => self.parse_escape(),
            _ => self.parse_literal_run(),
        }
    }

    /// Escapes that stand for classes, assertions or back-references
    fn parse_escape(&mut self) -> Result<Atom> {
        let Some(letter) = self.peek_at(1) else {
            return Err(RegexError::IllegalToken);
        };

        if let Some(kind) = ClassKind::from_escape(letter.to_ascii_lowercase()) {
            self.pos += 2;
            let op = if letter.is_ascii_uppercase() {
                Op::NotClass
            } else {
                Op::Class
            };
            self.code.push_op(op, &[kind as i16]);
            return Ok(Atom::single());
        }

        let assertion = match letter {
            b'b' => Some(Op::WordBoundary),
            b'B' => Some(Op::NotWordBoundary),
            b'<' => Some(Op::WordBegin),
            b'>' => Some(Op::WordEnd),
            b'A' => Some(Op::TextBegin),
            b'Z' => Some(Op::TextEnd),
            _ => None,
        };
        if let Some(op) = assertion {
            self.pos += 2;
            self.code.push_op(op, &[]);
            return Ok(Atom::assertion());
        }

        if let b'1'..=b'9' = letter {
            self.pos += 2;
            let group = (letter - b'0') as usize;
            if !self.flags.capturing() || group > self.groups || !self.closed[group] {
                return Err(RegexError::BadBackReference);
            }
            let op = if self.flags.case_insensitive() {
                Op::BackRefNoCase
            } else {
                Op::BackRef
            };
            self.code.push_op(op, &[group as i16]);
            return Ok(Atom::complex(Width::UNKNOWN));
        }

        self.parse_literal_run()
    }

    /// Batch consecutive literal bytes into one instruction. A quantifier
    /// applies only to the byte in front of it, so that byte is split off.
    fn parse_literal_run(&mut self) -> Result<Atom> {
        let mut run = Vec::new();
        loop {
            let before = self.pos;
            let Some(byte) = self.literal_byte()? else {
                break;
            };
            if is_quantifier_start(self.peek()) {
                if run.is_empty() {
                    run.push(byte);
                } else {
                    self.pos = before;
                }
                break;
            }
            run.push(byte);
        }

        self.emit_literal(&run);
        if run.len() == 1 {
            Ok(Atom::single())
        } else {
            Ok(Atom::complex(Width::exact(run.len())))
        }
    }

    /// Consume one literal byte, plain or escaped
    fn literal_byte(&mut self) -> Result<Option<u8>> {
        match self.peek() {
            None => Ok(None),
            Some(b'\\') => {
                let Some(letter) = self.peek_at(1) else {
                    return Err(RegexError::IllegalToken);
                };
                if is_special_escape(letter) {
                    return Ok(None);
                }
                self.pos += 2;
                self.char_escape(letter, false).map(Some)
            }
            Some(byte) if is_meta(byte) => Ok(None),
            Some(byte) => {
                self.pos += 1;
                Ok(Some(byte))
            }
        }
    }

    /// Decode the escape `\letter`; `pos` is already past `letter`
    fn char_escape(&mut self, letter: u8, in_set: bool) -> Result<u8> {
        let byte = match letter {
            b'n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'f' => 0x0c,
            b'v' => 0x0b,
            b'e' => 0x1b,
            b'a' => 0x07,
            b'b' if in_set => 0x08,
            b'0' => self.octal_escape()?,
            b'x' => self.hex_escape()?,
            b'c' => match self.bump() {
                Some(ch) if ch.is_ascii_alphabetic() => ch & 0x1f,
                _ => return Err(RegexError::IllegalToken),
            },
            other if other.is_ascii_alphanumeric() => return Err(RegexError::IllegalToken),
            other => other,
        };
        Ok(byte)
    }

    /// Up to three octal digits after `\0`
    fn octal_escape(&mut self) -> Result<u8> {
        let mut value: u32 = 0;
        for _ in 0..3 {
            match self.peek() {
                Some(digit @ b'0'..=b'7') => {
                    value = value * 8 + u32::from(digit - b'0');
                    self.pos += 1;
                }
                _ => break,
            }
        }
        u8::try_from(value).map_err(|_| RegexError::IllegalToken)
    }

    /// Exactly two hex digits after `\x`
    fn hex_escape(&mut self) -> Result<u8> {
        let high = self.bump().and_then(hex_value);
        let low = self.bump().and_then(hex_value);
        match (high, low) {
            (Some(high), Some(low)) => Ok(high * 16 + low),
            _ => Err(RegexError::IllegalToken),
        }
    }

    fn emit_literal(&mut self, bytes: &[u8]) {
        let caseless = self.flags.case_insensitive();
        for chunk in bytes.chunks(MAX_LITERAL) {
            if let [byte] = chunk {
                self.emit_char(*byte);
                continue;
            }
            if caseless {
                self.code.push_op(Op::StrNoCase, &[chunk.len() as i16]);
                self.code.extend(&chunk.to_ascii_lowercase());
            } else {
                self.code.push_op(Op::Str, &[chunk.len() as i16]);
                self.code.extend(chunk);
            }
        }
    }

    fn emit_char(&mut self, byte: u8) {
        if self.flags.case_insensitive() && byte.is_ascii_alphabetic() {
            let lower = byte.to_ascii_lowercase();
            self.code.push_op(Op::CharNoCase, &[lower as i16]);
        } else {
            self.code.push_op(Op::Char, &[byte as i16]);
        }
    }

    /// Parse a group; `pos` is just past the `(`
    fn parse_group(&mut self) -> Result<Atom> {
        if self.depth >= MAX_NESTING {
            return Err(RegexError::TooComplex);
        }
        self.depth += 1;
        let atom = self.parse_group_body();
        self.depth -= 1;
        atom
    }

    fn parse_group_body(&mut self) -> Result<Atom> {
        let start = self.code.len();
        let outer_flags = self.flags;

        let atom = if self.eat(b'?') {
            match self.bump() {
                Some(b':') => Atom::complex(self.parse_expression()?),
                Some(b'>') => {
                    let width = self.parse_expression()?;
                    self.wrap(
                        start,
                        &[
                            jump(Op::Atomic, [0, 0], Label::Exit),
                            Step::Body,
                            insn(Op::SubEnd, [0, 0]),
                        ],
                    )?;
                    Atom::complex(width)
                }
                Some(b'=') => self.parse_lookaround(start, Op::LookAhead)?,
                Some(b'!') => self.parse_lookaround(start, Op::NegLookAhead)?,
                Some(b'<') => match self.bump() {
                    Some(b'=') => self.parse_lookaround(start, Op::LookBehind)?,
                    Some(b'!') => self.parse_lookaround(start, Op::NegLookBehind)?,
                    _ => return Err(RegexError::IllegalToken),
                },
                Some(_) => {
                    self.pos -= 1;
                    self.parse_inline_flags()?;
                    Atom::complex(self.parse_expression()?)
                }
                None => return Err(RegexError::UnmatchedParen),
            }
        } else if self.flags.capturing() {
            if self.groups + 1 >= MAX_SLOTS {
                return Err(RegexError::TooComplex);
            }
            self.groups += 1;
            let group = self.groups;
            self.code.push_op(Op::Open, &[group as i16]);
            let width = self.parse_expression()?;
            self.code.push_op(Op::Close, &[group as i16]);
            self.closed[group] = true;
            Atom::complex(width)
        } else {
            Atom::complex(self.parse_expression()?)
        };

        if !self.eat(b')') {
            return Err(RegexError::UnmatchedParen);
        }
        self.flags = outer_flags;
        Ok(atom)
    }

    fn parse_lookaround(&mut self, start: usize, op: Op) -> Result<Atom> {
        let width = self.parse_expression()?;
        let lead = match op {
            Op::LookBehind | Op::NegLookBehind => {
                let fixed = width.fixed().ok_or(RegexError::VariableLookbehind)?;
                let fixed = i16::try_from(fixed).map_err(|_| RegexError::TooComplex)?;
                jump(op, [fixed, 0], Label::Exit)
            }
            _ => jump(op, [0, 0], Label::Exit),
        };
        self.wrap(start, &[lead, Step::Body, insn(Op::SubEnd, [0, 0])])?;
        Ok(Atom::assertion())
    }

    /// Parse `-`? followed by `i`/`n` letters and an optional `:`.
    ///
    /// The toggle covers the rest of the enclosing group only; `parse_group`
    /// restores the outer flags at its `)`. A bare `(?i)` is therefore an
    /// empty group and changes nothing after it.
    fn parse_inline_flags(&mut self) -> Result<()> {
        let negate = self.eat(b'-');
        let mut toggled = Flags::empty();
        while let Some(flag) = self.peek().and_then(Flags::from_inline) {
            toggled |= flag;
            self.pos += 1;
        }
        if toggled.is_empty() {
            return Err(RegexError::IllegalToken);
        }
        self.flags.set(toggled, !negate);
        self.eat(b':');
        Ok(())
    }

    /// Parse a bracketed set into a bitmap; `pos` is just past the `[`
    fn parse_set(&mut self) -> Result<()> {
        let mut bitmap = [0u8; SET_SIZE];
        let negate = matches!(self.peek(), Some(b'^' | b'!'));
        if negate {
            self.pos += 1;
        }

        let mut first = true;
        loop {
            let Some(byte) = self.bump() else {
                return Err(RegexError::UnmatchedBracket);
            };
            if byte == b']' && !first {
                break;
            }
            first = false;

            let low = match byte {
                b'\\' => match self.set_escape()? {
                    SetItem::Byte(b) => b,
                    SetItem::Class(kind, negated) => {
                        for b in 0..=u8::MAX {
                            if kind.contains_byte(b) != negated {
                                self.add_to_set(&mut bitmap, b);
                            }
                        }
                        continue;
                    }
                },
                b => b,
            };

            let is_range = self.peek() == Some(b'-')
                && self.peek_at(1).is_some_and(|next| next != b']');
            if !is_range {
                self.add_to_set(&mut bitmap, low);
                continue;
            }
            self.pos += 1;
            let high = match self.bump() {
                Some(b'\\') => match self.set_escape()? {
                    SetItem::Byte(b) => b,
                    SetItem::Class(..) => return Err(RegexError::IllegalToken),
                },
                Some(b) => b,
                None => return Err(RegexError::UnmatchedBracket),
            };
            if high < low {
                return Err(RegexError::IllegalToken);
            }
            for b in low..=high {
                self.add_to_set(&mut bitmap, b);
            }
        }

        if negate {
            for bits in bitmap.iter_mut() {
                *bits = !*bits;
            }
            if self.flags.newline_sensitive() {
                bitmap[(b'\n' >> 3) as usize] &= !(1 << (b'\n' & 7));
            }
        }

        self.code.push_op(Op::Set, &[]);
        self.code.extend(&bitmap);
        Ok(())
    }

    /// Escape inside a set; `pos` is just past the backslash
    fn set_escape(&mut self) -> Result<SetItem> {
        let Some(letter) = self.bump() else {
            return Err(RegexError::UnmatchedBracket);
        };
        if let Some(kind) = ClassKind::from_escape(letter.to_ascii_lowercase()) {
            return Ok(SetItem::Class(kind, letter.is_ascii_uppercase()));
        }
        self.char_escape(letter, true).map(SetItem::Byte)
    }

    fn add_to_set(&self, bitmap: &mut [u8; SET_SIZE], byte: u8) {
        let mut add = |b: u8| bitmap[(b >> 3) as usize] |= 1 << (b & 7);
        add(byte);
        if self.flags.case_insensitive() && byte.is_ascii_alphabetic() {
            add(byte.to_ascii_lowercase());
            add(byte.to_ascii_uppercase());
        }
    }
}

fn is_meta(byte: u8) -> bool {
    matches!(
        byte,
        b'^' | b'$' | b'.' | b'|' | b'?' | b'*' | b'+' | b'(' | b')' | b'[' | b']' | b'{' | b'}'
    )
}

fn is_quantifier_start(byte: Option<u8>) -> bool {
    matches!(byte, Some(b'*' | b'+' | b'?' | b'{'))
}

/// Escapes handled by `parse_escape` rather than as literal bytes
fn is_special_escape(letter: u8) -> bool {
    ClassKind::from_escape(letter.to_ascii_lowercase()).is_some()
        || matches!(letter, b'b' | b'B' | b'<' | b'>' | b'A' | b'Z' | b'1'..=b'9')
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

fn parse_bound(digits: &[u8]) -> Result<usize> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(RegexError::BadRepeatRange);
    }
    let mut value: usize = 0;
    for &digit in digits {
        value = value * 10 + usize::from(digit - b'0');
        if value > MAX_REPEAT {
            return Err(RegexError::BadRepeatRange);
        }
    }
    Ok(value)
}

fn to_offset(delta: isize) -> Result<i16> {
    i16::try_from(delta).map_err(|_| RegexError::TooComplex)
}

/// Compile a pattern into a program
pub fn compile(pattern: &[u8], flags: Flags) -> Result<Program> {
    if pattern.is_empty() {
        return Err(RegexError::EmptyPattern);
    }

    let (sizing, _) = Compiler::new(pattern, flags, CodeBuf::measuring()).run()?;
    let measured = sizing.len();

    let (code, groups) = Compiler::new(pattern, flags, CodeBuf::with_capacity(measured)).run()?;
    debug_assert_eq!(code.len(), measured);
    Ok(Program::new(code.into_bytes(), groups, flags))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(pattern: &str) -> String {
        compile(pattern.as_bytes(), Flags::default())
            .unwrap()
            .to_string()
    }

    fn error(pattern: &str) -> RegexError {
        compile(pattern.as_bytes(), Flags::default()).unwrap_err()
    }

    #[test]
    fn literal_run_is_one_instruction() {
        assert_eq!(listing("abc"), "0000  Str \"abc\"\n0006  Succeed\n");
        assert_eq!(listing("a"), "0000  Char a\n0003  Succeed\n");
    }

    #[test]
    fn quantifier_splits_last_byte() {
        assert_eq!(
            listing("abc*"),
            "0000  Str \"ab\"\n0005  Repeat {0,}\n0010  Char c\n0013  Succeed\n"
        );
    }

    #[test]
    fn single_branch_has_no_branch_instruction() {
        assert!(!listing("(ab)").contains("Branch"));
    }

    #[test]
    fn alternation_inserts_branch_and_jump() {
        assert_eq!(
            listing("a|b|c"),
            "0000  Branch -> 0009\n\
             0003  Char a\n\
             0006  Jump -> 0021\n\
             0009  Branch -> 0018\n\
             0012  Char b\n\
             0015  Jump -> 0021\n\
             0018  Char c\n\
             0021  Succeed\n"
        );
    }

    #[test]
    fn star_over_group() {
        assert_eq!(
            listing("(?:ab)*"),
            "0000  Branch -> 0011\n\
             0003  Str \"ab\"\n\
             0008  Jump -> 0000\n\
             0011  Succeed\n"
        );
    }

    #[test]
    fn counted_group_uses_counter() {
        let text = listing("(?:ab){2,3}");
        assert!(text.contains("CounterReset 0"));
        assert!(text.contains("CounterInc 0"));
        assert!(text.contains("JumpLess 0 2"));
        assert!(text.contains("JumpAtLeast 0 3"));
        assert!(text.contains("BranchRev"));
    }

    #[test]
    fn possessive_group_is_atomic() {
        let text = listing("(?:ab)*+");
        assert!(text.starts_with("0000  Atomic"));
        assert!(text.contains("SubEnd"));
    }

    #[test]
    fn nullable_loop_gets_progress_guard() {
        assert!(listing("(a*)*").contains("JumpStuck"));
        assert!(!listing("(a)*").contains("JumpStuck"));
    }

    #[test]
    fn caseless_literals() {
        let program = compile(b"Ab1", Flags::CASELESS).unwrap();
        assert_eq!(program.to_string(), "0000  StrNoCase \"ab1\"\n0006  Succeed\n");
        let program = compile(b"1", Flags::CASELESS).unwrap();
        assert_eq!(program.to_string(), "0000  Char 1\n0003  Succeed\n");
    }

    #[test]
    fn verbatim_ignores_meta() {
        let program = compile(b"a.*(", Flags::VERBATIM).unwrap();
        assert_eq!(program.to_string(), "0000  Str \"a.*(\"\n0007  Succeed\n");
    }

    #[test]
    fn escapes() {
        assert_eq!(listing(r"\x41"), "0000  Char A\n0003  Succeed\n");
        assert_eq!(listing(r"\0101"), "0000  Char A\n0003  Succeed\n");
        assert_eq!(listing(r"\cA"), "0000  Char \\x01\n0003  Succeed\n");
        assert_eq!(listing(r"\."), "0000  Char .\n0003  Succeed\n");
        assert_eq!(error(r"\q"), RegexError::IllegalToken);
        assert_eq!(error(r"\xZZ"), RegexError::IllegalToken);
        assert_eq!(error("ab\\"), RegexError::IllegalToken);
    }

    #[test]
    fn group_count() {
        let program = compile(b"(a)(b(c))", Flags::default()).unwrap();
        assert_eq!(program.group_count(), 3);
        let program = compile(b"(a)(b(c))", Flags::empty()).unwrap();
        assert_eq!(program.group_count(), 0);
    }

    #[test]
    fn structural_errors() {
        assert_eq!(compile(b"", Flags::default()).unwrap_err(), RegexError::EmptyPattern);
        assert_eq!(error("(ab"), RegexError::UnmatchedParen);
        assert_eq!(error("ab)"), RegexError::UnmatchedParen);
        assert_eq!(error("[ab"), RegexError::UnmatchedBracket);
        assert_eq!(error("ab]"), RegexError::UnmatchedBracket);
        assert_eq!(error("a{2"), RegexError::UnmatchedBrace);
        assert_eq!(error("*a"), RegexError::MissingOperand);
        assert_eq!(error("a**"), RegexError::MissingOperand);
        assert_eq!(error("|a"), RegexError::MissingOperand);
        assert_eq!(error("a|"), RegexError::MissingOperand);
        assert_eq!(error("^*"), RegexError::MissingOperand);
        assert_eq!(error("a{3,2}"), RegexError::BadRepeatRange);
        assert_eq!(error("a{0}"), RegexError::BadRepeatRange);
        assert_eq!(error("a{x}"), RegexError::BadRepeatRange);
        assert_eq!(error("a{99999}"), RegexError::BadRepeatRange);
        assert_eq!(error("[z-a]"), RegexError::IllegalToken);
        assert_eq!(error("(?x)"), RegexError::IllegalToken);
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let open = "(?:".repeat(100_000);
        assert_eq!(error(&open), RegexError::TooComplex);
        let lookahead = "(?=".repeat(100_000);
        assert_eq!(error(&lookahead), RegexError::TooComplex);

        let nested = format!("{}a{}", "(?:".repeat(200), ")".repeat(200));
        assert!(compile(nested.as_bytes(), Flags::default()).is_ok());
        let too_deep = format!("{}a{}", "(?:".repeat(300), ")".repeat(300));
        assert_eq!(error(&too_deep), RegexError::TooComplex);
    }

    #[test]
    fn too_many_groups() {
        assert!(compile(b"(a)(b)(c)(d)(e)(f)(g)(h)(i)", Flags::default()).is_ok());
        assert_eq!(error("(a)(b)(c)(d)(e)(f)(g)(h)(i)(j)"), RegexError::TooComplex);
    }

    #[test]
    fn too_many_counted_loops() {
        let nine = "(?:a){2}".repeat(9);
        assert!(compile(nine.as_bytes(), Flags::default()).is_ok());
        let ten = "(?:a){2}".repeat(10);
        assert_eq!(error(&ten), RegexError::TooComplex);
    }

    #[test]
    fn back_references() {
        assert!(compile(br"(a)\1", Flags::default()).is_ok());
        assert_eq!(error(r"\1(a)"), RegexError::BadBackReference);
        assert_eq!(error(r"(a\1)"), RegexError::BadBackReference);
        assert_eq!(error(r"(a)\2"), RegexError::BadBackReference);
        assert_eq!(
            compile(br"(a)\1", Flags::empty()).unwrap_err(),
            RegexError::BadBackReference
        );
    }

    #[test]
    fn lookbehind_width() {
        assert!(compile(b"(?<=ab|cd)x", Flags::default()).is_ok());
        assert!(compile(b"(?<!a[bc]{2})x", Flags::default()).is_ok());
        assert_eq!(error("(?<=a|bc)x"), RegexError::VariableLookbehind);
        assert_eq!(error("(?<=a*)x"), RegexError::VariableLookbehind);
        assert_eq!(error(r"(a)(?<=\1)"), RegexError::VariableLookbehind);
    }

    #[test]
    fn widths() {
        let w = Width::exact(2).then(Width::exact(3));
        assert_eq!(w, Width::exact(5));
        assert_eq!(Width::exact(1).or(Width::exact(4)), Width { min: 1, max: Some(4) });
        assert_eq!(Width::exact(2).repeat(1, None).max, None);
        assert_eq!(Width::ZERO.repeat(0, None), Width::ZERO);
        assert_eq!(Width::exact(3).fixed(), Some(3));
    }
}
