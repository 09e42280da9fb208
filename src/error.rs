//! Error types for the regex compiler

/// Result type for regex operations
pub type Result<T> = std::result::Result<T, RegexError>;

/// Errors that can occur while compiling a pattern.
///
/// Matching never fails with an error; it only reports whether the subject
/// matched. The `Display` text of each variant is its fixed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegexError {
    /// Pattern is empty
    #[error("Empty regular expression")]
    EmptyPattern,
    /// A `(` without `)` or the other way round
    #[error("Unmatched parenthesis")]
    UnmatchedParen,
    /// A `[` without `]`, or a stray `]`
    #[error("Unmatched bracket")]
    UnmatchedBracket,
    /// A `{` without `}`
    #[error("Unmatched brace")]
    UnmatchedBrace,
    /// Quantifier or alternation with nothing in front of it
    #[error("Nothing to repeat or alternate")]
    MissingOperand,
    /// Unknown escape or malformed token
    #[error("Illegal token")]
    IllegalToken,
    /// Counted repeat with max < min, max = 0, or a bound over the ceiling
    #[error("Bad repeat range")]
    BadRepeatRange,
    /// Too many capture groups or counted loops, or the program is too large
    #[error("Regular expression too complex")]
    TooComplex,
    /// Back-reference to a group that is not defined or not yet closed
    #[error("Bad back-reference")]
    BadBackReference,
    /// Lookbehind over an expression without a fixed width
    #[error("Lookbehind requires a fixed-width expression")]
    VariableLookbehind,
}

impl RegexError {
    /// The fixed message for this error
    pub fn message(self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_distinct() {
        let all = [
            RegexError::EmptyPattern,
            RegexError::UnmatchedParen,
            RegexError::UnmatchedBracket,
            RegexError::UnmatchedBrace,
            RegexError::MissingOperand,
            RegexError::IllegalToken,
            RegexError::BadRepeatRange,
            RegexError::TooComplex,
            RegexError::BadBackReference,
            RegexError::VariableLookbehind,
        ];
        let mut messages: Vec<String> = all.iter().map(|e| e.to_string()).collect();
        messages.sort();
        messages.dedup();
        assert_eq!(messages.len(), all.len());

        assert_eq!(RegexError::TooComplex.message(), "Regular expression too complex");
        for err in all {
            assert_eq!(err.to_string(), err.message());
        }
    }
}
