//! Bytecode regex engine with a recursive backtracking matcher
//!
//! Patterns are compiled into a compact byte program (see [`opcodes`]) and run
//! by a backtracking virtual machine over byte subjects. The dialect covers
//! alternation, greedy, lazy and possessive quantifiers, capture groups with
//! back-references, lookahead and fixed-width lookbehind, atomic groups,
//! anchors and word assertions.
//!
//! Subjects are bytes. Word assertions and `\w` look at the UTF-8 sequence
//! around a byte so non-ASCII letters count as word characters.

pub mod classify;
pub mod compiler;
pub mod error;
pub mod matcher;
pub mod opcodes;
pub mod program;
pub mod syntax;

pub use error::{RegexError, Result};
pub use program::Program;
pub use syntax::Flags;

/// Capture slots per match: the whole match plus nine groups
pub const MAX_SLOTS: usize = 10;
/// Counter registers available to counted and empty-guarded loops
pub const MAX_LOOPS: usize = 9;
/// Default ceiling on nested backtracking calls
pub const DEFAULT_MAX_DEPTH: usize = 2000;
/// Hard ceiling on nested backtracking calls; larger `max_depth` values are
/// clamped to it so the matcher stays within an ordinary thread stack
pub const MAX_DEPTH: usize = 2500;

/// A compiled regular expression
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Regex {
    program: Program,
}

/// Match result with capture group positions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Captures {
    slots: [Option<(usize, usize)>; MAX_SLOTS],
}

/// Order in which candidate start positions are tried
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    /// Lowest start first
    #[default]
    Forward,
    /// Highest start first
    Backward,
}

/// Configuration for regex execution limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecLimits {
    /// Maximum nesting of backtracking calls, at most [`MAX_DEPTH`]. Going
    /// deeper ends the search with no match.
    pub max_depth: usize,
    /// Maximum number of instructions executed by one search
    pub max_steps: Option<usize>,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_steps: None,
        }
    }
}

impl Regex {
    /// Compile a regex pattern with default flags
    pub fn new(pattern: &str) -> Result<Self> {
        Self::with_flags(pattern, Flags::default())
    }

    /// Compile a regex pattern with specific flags
    pub fn with_flags(pattern: &str, flags: Flags) -> Result<Self> {
        Self::from_bytes(pattern.as_bytes(), flags)
    }

    /// Compile a pattern given as raw bytes
    pub fn from_bytes(pattern: &[u8], flags: Flags) -> Result<Self> {
        let program = compiler::compile(pattern, flags)?;
        Ok(Self { program })
    }

    /// Replace the program with one compiled from `pattern`.
    ///
    /// On error the regex is left holding a program that matches nothing,
    /// never the previous one.
    pub fn recompile(&mut self, pattern: &[u8], flags: Flags) -> Result<()> {
        match compiler::compile(pattern, flags) {
            Ok(program) => {
                self.program = program;
                Ok(())
            }
            Err(err) => {
                self.program = Program::never();
                Err(err)
            }
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Number of capture groups, not counting the whole match
    pub fn group_count(&self) -> usize {
        self.program.group_count()
    }

    /// Test if the pattern matches anywhere in the subject
    pub fn is_match(&self, subject: impl AsRef<[u8]>) -> bool {
        self.is_match_with_limits(subject, ExecLimits::default())
    }

    /// Test if the pattern matches with execution limits
    pub fn is_match_with_limits(&self, subject: impl AsRef<[u8]>, limits: ExecLimits) -> bool {
        self.captures_with_limits(subject, limits).is_some()
    }

    /// Find the first match in the subject
    pub fn find(&self, subject: impl AsRef<[u8]>) -> Option<(usize, usize)> {
        self.find_with_limits(subject, ExecLimits::default())
    }

    /// Find the first match with execution limits
    pub fn find_with_limits(
        &self,
        subject: impl AsRef<[u8]>,
        limits: ExecLimits,
    ) -> Option<(usize, usize)> {
        self.captures_with_limits(subject, limits)
            .and_then(|caps| caps.get(0))
    }

    /// Get all capture groups from the first match
    pub fn captures(&self, subject: impl AsRef<[u8]>) -> Option<Captures> {
        self.captures_with_limits(subject, ExecLimits::default())
    }

    /// Get captures with execution limits
    pub fn captures_with_limits(
        &self,
        subject: impl AsRef<[u8]>,
        limits: ExecLimits,
    ) -> Option<Captures> {
        let subject = subject.as_ref();
        self.find_in_with_limits(subject, 0, subject.len(), Direction::Forward, limits)
    }

    /// Search for a match starting anywhere in `from..=to`.
    ///
    /// `to` is clamped to the subject length. The match may run past `to`, and
    /// anchors and lookbehind see the whole subject.
    pub fn find_in(
        &self,
        subject: impl AsRef<[u8]>,
        from: usize,
        to: usize,
        direction: Direction,
    ) -> Option<Captures> {
        self.find_in_with_limits(subject, from, to, direction, ExecLimits::default())
    }

    pub fn find_in_with_limits(
        &self,
        subject: impl AsRef<[u8]>,
        from: usize,
        to: usize,
        direction: Direction,
        limits: ExecLimits,
    ) -> Option<Captures> {
        matcher::search(&self.program, subject.as_ref(), from, to, direction, limits)
    }

    /// Like [`Regex::find_in`], writing into `caps` only when a match is found
    pub fn captures_into(
        &self,
        subject: impl AsRef<[u8]>,
        from: usize,
        to: usize,
        direction: Direction,
        caps: &mut Captures,
    ) -> bool {
        match self.find_in(subject, from, to, direction) {
            Some(found) => {
                *caps = found;
                true
            }
            None => false,
        }
    }
}

impl std::str::FromStr for Regex {
    type Err = RegexError;

    fn from_str(pattern: &str) -> Result<Self> {
        Self::new(pattern)
    }
}

impl Captures {
    pub(crate) fn from_slots(slots: [Option<(usize, usize)>; MAX_SLOTS]) -> Self {
        Self { slots }
    }

    /// Get the bounds of a capture group
    pub fn get(&self, index: usize) -> Option<(usize, usize)> {
        self.slots.get(index).copied().flatten()
    }

    /// Number of slots up to and including the last one that is set
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |last| last + 1)
    }

    /// Check if no match is recorded
    pub fn is_empty(&self) -> bool {
        self.slots[0].is_none()
    }

    /// The text of a group within the subject it was matched against
    pub fn slice<'s>(&self, index: usize, subject: &'s [u8]) -> Option<&'s [u8]> {
        let (start, end) = self.get(index)?;
        subject.get(start..end)
    }

    /// Iterate over all slots, unset ones included
    pub fn iter(&self) -> impl Iterator<Item = Option<(usize, usize)>> + '_ {
        self.slots.iter().copied()
    }
}
