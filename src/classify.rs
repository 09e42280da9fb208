//! Character classification used by class escapes and word assertions
//!
//! Byte predicates are ASCII-only. Word detection also looks at non-ASCII
//! input by decoding the UTF-8 sequence a byte belongs to and asking for its
//! general category.

/// Coarse Unicode general category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Letter,
    Number,
    Punctuation,
    Separator,
    Control,
    Symbol,
}

/// Predefined classes reachable from `\d`, `\s`, `\w`, `\h`, `\l`, `\p`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClassKind {
    Digit = 0,
    Space = 1,
    Word = 2,
    Hex = 3,
    Letter = 4,
    Punct = 5,
}

impl ClassKind {
    /// Map an escape letter (lowercase form) to its class
    pub fn from_escape(letter: u8) -> Option<Self> {
        match letter {
            b'd' => Some(ClassKind::Digit),
            b's' => Some(ClassKind::Space),
            b'w' => Some(ClassKind::Word),
            b'h' => Some(ClassKind::Hex),
            b'l' => Some(ClassKind::Letter),
            b'p' => Some(ClassKind::Punct),
            _ => None,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ClassKind::Digit),
            1 => Some(ClassKind::Space),
            2 => Some(ClassKind::Word),
            3 => Some(ClassKind::Hex),
            4 => Some(ClassKind::Letter),
            5 => Some(ClassKind::Punct),
            _ => None,
        }
    }

    /// Test a single byte, without context.
    ///
    /// Non-ASCII bytes only belong to `Word`; inside a set there is no way to
    /// look at the surrounding sequence, so every byte of a multi-byte
    /// character counts.
    pub fn contains_byte(self, byte: u8) -> bool {
        match self {
            ClassKind::Digit => is_digit(byte),
            ClassKind::Space => is_space(byte),
            ClassKind::Word => is_word(byte) || !byte.is_ascii(),
            ClassKind::Hex => is_hex(byte),
            ClassKind::Letter => is_letter(byte),
            ClassKind::Punct => is_punct(byte),
        }
    }

    /// Test the byte at `pos` of `subject`
    pub fn matches_at(self, subject: &[u8], pos: usize) -> bool {
        match self {
            ClassKind::Word => is_word_at(subject, pos),
            _ => subject.get(pos).is_some_and(|&b| self.contains_byte(b)),
        }
    }
}

pub fn is_digit(byte: u8) -> bool {
    byte.is_ascii_digit()
}

pub fn is_space(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

pub fn is_hex(byte: u8) -> bool {
    byte.is_ascii_hexdigit()
}

pub fn is_letter(byte: u8) -> bool {
    byte.is_ascii_alphabetic()
}

pub fn is_punct(byte: u8) -> bool {
    byte.is_ascii_punctuation()
}

/// ASCII identifier byte
pub fn is_word(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

/// Classify a code point
pub fn category(ch: char) -> Category {
    if ch.is_alphabetic() {
        Category::Letter
    } else if ch.is_numeric() {
        Category::Number
    } else if ch.is_control() {
        Category::Control
    } else if ch.is_whitespace() {
        Category::Separator
    } else if ch.is_ascii_punctuation() || is_general_punctuation(ch) {
        Category::Punctuation
    } else {
        Category::Symbol
    }
}

fn is_general_punctuation(ch: char) -> bool {
    matches!(ch as u32, 0x2010..=0x2027 | 0x2030..=0x205e | 0x3001..=0x3003 | 0x00a1 | 0x00bf)
}

/// Check whether a code point may appear in an identifier
pub fn is_identifier(ch: char) -> bool {
    ch == '_' || matches!(category(ch), Category::Letter | Category::Number)
}

/// Check whether the byte at `pos` is part of a word character.
///
/// ASCII bytes are classified directly. A non-ASCII byte is classified by the
/// code point of the UTF-8 sequence it belongs to; malformed sequences are
/// never word characters.
pub fn is_word_at(subject: &[u8], pos: usize) -> bool {
    let Some(&byte) = subject.get(pos) else {
        return false;
    };
    if byte.is_ascii() {
        return is_word(byte);
    }
    decode_around(subject, pos).is_some_and(is_identifier)
}

/// Decode the code point whose UTF-8 encoding covers `pos`
fn decode_around(subject: &[u8], pos: usize) -> Option<char> {
    let mut lead = pos;
    while lead > 0 && pos - lead < 3 && is_continuation(subject[lead]) {
        lead -= 1;
    }
    let width = utf8_width(subject[lead])?;
    let end = lead + width;
    if end <= pos || end > subject.len() {
        return None;
    }
    std::str::from_utf8(&subject[lead..end]).ok()?.chars().next()
}

fn is_continuation(byte: u8) -> bool {
    byte & 0xc0 == 0x80
}

fn utf8_width(lead: u8) -> Option<usize> {
    match lead {
        0x00..=0x7f => Some(1),
        0xc2..=0xdf => Some(2),
        0xe0..=0xef => Some(3),
        0xf0..=0xf4 => Some(4),
        _ => None,
    }
}
