//! Regex mode flags

use bitflags::bitflags;

bitflags! {
    /// Flags that control how a pattern is compiled.
    ///
    /// They only change which instructions the compiler picks; the bytecode
    /// format is the same for every combination.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Flags: u32 {
        /// Letters match regardless of ASCII case
        const CASELESS = 1;
        /// `^`/`$` match at line boundaries, `.` and negated sets skip `\n`
        const NEWLINE = 2;
        /// Plain parentheses create capture groups
        const CAPTURE = 4;
        /// The whole pattern is a literal, no meta-characters
        const VERBATIM = 8;
        /// A match must consume at least one byte
        const NOT_EMPTY = 16;
    }
}

impl Default for Flags {
    fn default() -> Self {
        Flags::CAPTURE
    }
}

impl Flags {
    /// Map an inline modifier letter to its flag
    pub fn from_inline(letter: u8) -> Option<Self> {
        match letter {
            b'i' => Some(Self::CASELESS),
            b'n' => Some(Self::NEWLINE),
            _ => None,
        }
    }

    /// Check if case insensitive matching is enabled
    pub fn case_insensitive(self) -> bool {
        self.contains(Self::CASELESS)
    }

    /// Check if newlines are treated as line separators
    pub fn newline_sensitive(self) -> bool {
        self.contains(Self::NEWLINE)
    }

    /// Check if plain groups capture
    pub fn capturing(self) -> bool {
        self.contains(Self::CAPTURE)
    }

    /// Check if the pattern is taken literally
    pub fn verbatim(self) -> bool {
        self.contains(Self::VERBATIM)
    }

    /// Check if empty matches are rejected
    pub fn not_empty(self) -> bool {
        self.contains(Self::NOT_EMPTY)
    }
}
