//! Recursive backtracking virtual machine
//!
//! `run` walks the program from a given instruction and position. Straight
//! line code is executed in a loop; every choice point (branches, repeats,
//! lookaround, atomic groups) calls back into `run` for the first
//! alternative and only falls through to the next one when that call fails.
//! Registers are pushed onto a heap trail before each such call and popped
//! back on failure, so a failed alternative never leaks captures or counter
//! values and a recursion level only costs the `run` and `fork` frames.

use crate::{
    classify::{self, ClassKind},
    opcodes::{self, Op, SET_SIZE, UNBOUNDED},
    program::Program,
    Captures, Direction, ExecLimits, MAX_DEPTH, MAX_LOOPS, MAX_SLOTS,
};

#[derive(Debug, Clone, Copy, Default)]
struct Counter {
    count: usize,
    /// Position where the latest iteration started
    mark: usize,
}

/// Mutable state of one match attempt
#[derive(Debug, Clone, Copy)]
struct Registers {
    /// Start of each group that is currently open
    open: [usize; MAX_SLOTS],
    /// Groups closed so far in this attempt; back-references read these
    slots: [Option<(usize, usize)>; MAX_SLOTS],
    counters: [Counter; MAX_LOOPS],
}

impl Default for Registers {
    fn default() -> Self {
        Self {
            open: [0; MAX_SLOTS],
            slots: [None; MAX_SLOTS],
            counters: [Counter::default(); MAX_LOOPS],
        }
    }
}

/// What a repeat instruction leaves for the dispatch loop
enum Flow {
    Done(bool),
    Continue(usize, usize),
}

/// Execution state for searching one subject
struct Matcher<'a> {
    code: &'a [u8],
    subject: &'a [u8],
    groups: usize,
    not_empty: bool,
    limits: ExecLimits,
    /// Start of the current attempt
    start: usize,
    /// Position reached by the last `Succeed` or `SubEnd`
    end: usize,
    regs: Registers,
    /// Saved registers, one entry per pending choice point
    trail: Vec<Registers>,
    depth: usize,
    steps: usize,
    /// Set once a limit is hit; every later instruction fails and the search
    /// reports no match
    halted: bool,
}

impl<'a> Matcher<'a> {
    fn new(program: &'a Program, subject: &'a [u8], limits: ExecLimits) -> Self {
        Self {
            code: program.code(),
            subject,
            groups: program.group_count(),
            not_empty: program.flags().not_empty(),
            limits: ExecLimits {
                max_depth: limits.max_depth.min(MAX_DEPTH),
                ..limits
            },
            start: 0,
            end: 0,
            regs: Registers::default(),
            trail: Vec::new(),
            depth: 0,
            steps: 0,
            halted: false,
        }
    }

    /// Try to match at exactly `start`
    fn attempt(&mut self, start: usize) -> bool {
        self.start = start;
        self.regs = Registers::default();
        self.trail.clear();
        self.depth = 0;
        self.run(0, start)
    }

    fn captures(&self) -> Captures {
        let mut slots = [None; MAX_SLOTS];
        slots[0] = Some((self.start, self.end));
        slots[1..=self.groups].copy_from_slice(&self.regs.slots[1..=self.groups]);
        Captures::from_slots(slots)
    }

    fn tick(&mut self) -> bool {
        self.steps += 1;
        if let Some(max_steps) = self.limits.max_steps {
            if self.steps > max_steps {
                self.halted = true;
            }
        }
        !self.halted
    }

    fn save(&mut self) {
        self.trail.push(self.regs);
    }

    fn restore(&mut self) {
        if let Some(saved) = self.trail.pop() {
            self.regs = saved;
        }
    }

    fn discard(&mut self) {
        self.trail.pop();
    }

    /// Recursive call guarded by the depth ceiling
    fn descend(&mut self, pc: usize, at: usize) -> bool {
        if self.halted {
            return false;
        }
        if self.depth >= self.limits.max_depth {
            self.halted = true;
            return false;
        }
        self.depth += 1;
        let matched = self.run(pc, at);
        self.depth -= 1;
        matched
    }

    /// Try an alternative, undoing its register writes if it fails
    fn fork(&mut self, pc: usize, at: usize) -> bool {
        self.save();
        if self.descend(pc, at) {
            self.discard();
            return true;
        }
        self.restore();
        false
    }

    fn operand(&self, pc: usize, index: usize) -> i16 {
        opcodes::operand(self.code, pc, index)
    }

    fn target(&self, pc: usize, op: Op) -> usize {
        opcodes::jump_target(self.code, pc, op)
    }

    fn run(&mut self, mut pc: usize, mut at: usize) -> bool {
        loop {
            if !self.tick() {
                return false;
            }
            let Some(op) = Op::from_byte(self.code[pc]) else {
                return false;
            };
            let next = pc + opcodes::instruction_len(self.code, pc);

            match op {
                Op::Succeed => {
                    if self.not_empty && at == self.start {
                        return false;
                    }
                    self.end = at;
                    return true;
                }

                Op::SubEnd => {
                    self.end = at;
                    return true;
                }

                Op::Fail => return false,

                Op::Jump => {
                    pc = self.target(pc, op);
                    continue;
                }

                Op::Branch => {
                    if self.fork(next, at) {
                        return true;
                    }
                    pc = self.target(pc, op);
                    continue;
                }

                Op::BranchRev => {
                    let alternative = self.target(pc, op);
                    if self.fork(alternative, at) {
                        return true;
                    }
                }

                Op::Repeat | Op::RepeatLazy | Op::RepeatPossessive => {
                    match self.repeat(op, pc, at) {
                        Flow::Done(matched) => return matched,
                        Flow::Continue(resume, resume_at) => {
                            pc = resume;
                            at = resume_at;
                            continue;
                        }
                    }
                }

                Op::LookAhead | Op::NegLookAhead | Op::LookBehind | Op::NegLookBehind => {
                    if !self.lookaround(op, pc, next, at) {
                        return false;
                    }
                    pc = self.target(pc, op);
                    continue;
                }

                Op::Atomic => {
                    let Some(end) = self.atomic(next, at) else {
                        return false;
                    };
                    at = end;
                    pc = self.target(pc, op);
                    continue;
                }

                Op::CounterReset
                | Op::CounterInc
                | Op::JumpLess
                | Op::JumpAtLeast
                | Op::JumpStuck => {
                    if self.counter(op, pc, at) {
                        pc = self.target(pc, op);
                        continue;
                    }
                }

                _ => match self.step(op, pc, next, at) {
                    Some(advanced) => at = advanced,
                    None => return false,
                },
            }

            pc = next;
        }
    }

    /// Execute an instruction that never branches: consumers, assertions and
    /// group marks. Returns the new position, or `None` on mismatch.
    fn step(&mut self, op: Op, pc: usize, next: usize, at: usize) -> Option<usize> {
        let subject = self.subject;
        match op {
            Op::Char
            | Op::CharNoCase
            | Op::Any
            | Op::AnyNoNewline
            | Op::Set
            | Op::Class
            | Op::NotClass => self.single(pc, at).then_some(at + 1),

            Op::Str | Op::StrNoCase => {
                let literal = &self.code[pc + op.fixed_size()..next];
                self.compare(literal, at, op == Op::StrNoCase)
            }

            Op::BackRef | Op::BackRefNoCase => {
                let (start, end) = self.regs.slots[self.operand(pc, 0) as usize]?;
                self.compare(&subject[start..end], at, op == Op::BackRefNoCase)
            }

            Op::Open => {
                self.regs.open[self.operand(pc, 0) as usize] = at;
                Some(at)
            }

            Op::Close => {
                let group = self.operand(pc, 0) as usize;
                self.regs.slots[group] = Some((self.regs.open[group], at));
                Some(at)
            }

            _ => self.assert_at(op, at).then_some(at),
        }
    }

    /// Match `expected` at `at`, returning the position after it
    fn compare(&self, expected: &[u8], at: usize, caseless: bool) -> Option<usize> {
        let text = self.subject.get(at..at + expected.len())?;
        let equal = if caseless {
            text.eq_ignore_ascii_case(expected)
        } else {
            text == expected
        };
        equal.then_some(at + expected.len())
    }

    /// Zero-width tests on the position alone
    fn assert_at(&self, op: Op, at: usize) -> bool {
        let subject = self.subject;
        match op {
            Op::LineBegin => at == 0 || subject[at - 1] == b'\n',
            Op::LineEnd => at == subject.len() || subject[at] == b'\n',
            Op::TextBegin => at == 0,
            Op::TextEnd => at == subject.len(),
            Op::WordBoundary => self.word_before(at) != self.word_after(at),
            Op::NotWordBoundary => self.word_before(at) == self.word_after(at),
            Op::WordBegin => !self.word_before(at) && self.word_after(at),
            Op::WordEnd => self.word_before(at) && !self.word_after(at),
            _ => false,
        }
    }

    /// Counter instructions; true when the instruction's jump is taken
    fn counter(&mut self, op: Op, pc: usize, at: usize) -> bool {
        let counter = &mut self.regs.counters[opcodes::operand(self.code, pc, 0) as usize];
        match op {
            Op::CounterReset => {
                *counter = Counter { count: 0, mark: at };
                false
            }
            Op::CounterInc => {
                counter.count += 1;
                counter.mark = at;
                false
            }
            Op::JumpLess => counter.count < opcodes::operand(self.code, pc, 1) as usize,
            Op::JumpAtLeast => counter.count >= opcodes::operand(self.code, pc, 1) as usize,
            Op::JumpStuck => counter.mark == at,
            _ => false,
        }
    }

    /// Match the single-byte instruction at `pc` against the byte at `at`
    fn single(&self, pc: usize, at: usize) -> bool {
        let Some(&byte) = self.subject.get(at) else {
            return false;
        };
        let code = self.code;
        match Op::from_byte(code[pc]) {
            Some(Op::Char) => byte == self.operand(pc, 0) as u8,
            Some(Op::CharNoCase) => byte.to_ascii_lowercase() == self.operand(pc, 0) as u8,
            Some(Op::Any) => true,
            Some(Op::AnyNoNewline) => byte != b'\n',
            Some(Op::Set) => opcodes::set_contains(&code[pc + 1..pc + 1 + SET_SIZE], byte),
            Some(Op::Class) => self
                .class(pc)
                .is_some_and(|kind| kind.matches_at(self.subject, at)),
            Some(Op::NotClass) => self
                .class(pc)
                .is_some_and(|kind| !kind.matches_at(self.subject, at)),
            _ => false,
        }
    }

    fn class(&self, pc: usize) -> Option<ClassKind> {
        ClassKind::from_byte(self.operand(pc, 0) as u8)
    }

    /// Repeat the single-byte instruction that follows the one at `pc`
    fn repeat(&mut self, op: Op, pc: usize, at: usize) -> Flow {
        let min = self.operand(pc, 0) as usize;
        let max = self.operand(pc, 1);
        let atom = pc + op.fixed_size();
        debug_assert!(Op::from_byte(self.code[atom]).is_some_and(Op::is_single));
        let after = atom + opcodes::instruction_len(self.code, atom);

        let room = self.subject.len() - at;
        let limit = if max == UNBOUNDED {
            room
        } else {
            (max as usize).min(room)
        };
        if min > limit {
            return Flow::Done(false);
        }

        if op == Op::RepeatLazy {
            let mut count = 0;
            while count < min {
                if !self.single(atom, at + count) {
                    return Flow::Done(false);
                }
                count += 1;
            }
            loop {
                if self.fork(after, at + count) {
                    return Flow::Done(true);
                }
                if self.halted || count >= limit || !self.single(atom, at + count) {
                    return Flow::Done(false);
                }
                count += 1;
            }
        }

        let mut count = 0;
        while count < limit && self.single(atom, at + count) {
            count += 1;
        }
        if count < min {
            return Flow::Done(false);
        }
        if op == Op::Repeat {
            // Give back one byte at a time; the shortest try continues inline
            while count > min {
                if self.fork(after, at + count) {
                    return Flow::Done(true);
                }
                if self.halted {
                    return Flow::Done(false);
                }
                count -= 1;
            }
        }
        Flow::Continue(after, at + count)
    }

    /// Run a lookaround sub-program; true when the assertion holds
    fn lookaround(&mut self, op: Op, pc: usize, body: usize, at: usize) -> bool {
        self.save();
        let hit = match op {
            Op::LookAhead | Op::NegLookAhead => self.descend(body, at),
            _ => {
                let width = self.operand(pc, 0) as usize;
                at.checked_sub(width)
                    .is_some_and(|from| self.descend(body, from) && self.end == at)
            }
        };
        let positive = matches!(op, Op::LookAhead | Op::LookBehind);
        if positive && hit {
            self.discard();
            return true;
        }
        // Negative assertions and failed lookarounds leave no captures behind
        self.restore();
        !positive && !hit && !self.halted
    }

    /// Run an atomic sub-program once, returning where it ended
    fn atomic(&mut self, body: usize, at: usize) -> Option<usize> {
        self.save();
        if self.descend(body, at) {
            self.discard();
            return Some(self.end);
        }
        self.restore();
        None
    }

    fn word_before(&self, at: usize) -> bool {
        at > 0 && classify::is_word_at(self.subject, at - 1)
    }

    fn word_after(&self, at: usize) -> bool {
        classify::is_word_at(self.subject, at)
    }
}

/// Candidate start positions in scan order
fn starts(from: usize, to: usize, direction: Direction) -> impl Iterator<Item = usize> {
    (from..=to).map(move |i| match direction {
        Direction::Forward => i,
        Direction::Backward => from + to - i,
    })
}

/// Search `subject` for the first start in `from..=to` where the program
/// matches. Starts are scanned upwards or downwards depending on
/// `direction`; the match itself always runs forwards.
///
/// Hitting the depth ceiling or the step budget ends the whole search with no
/// match, so a result is always the first match in scan order.
pub fn search(
    program: &Program,
    subject: &[u8],
    from: usize,
    to: usize,
    direction: Direction,
    limits: ExecLimits,
) -> Option<Captures> {
    let to = to.min(subject.len());
    if from > to {
        return None;
    }

    let mut matcher = Matcher::new(program, subject, limits);
    for start in starts(from, to, direction) {
        if matcher.attempt(start) {
            return Some(matcher.captures());
        }
        if matcher.halted {
            break;
        }
    }
    None
}
