use thiserror::Error;

/// Failure to match an instruction word against the decode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// No pattern in the table matches the word.
    InvalidEncoding(u32),
}

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidEncoding(word) => write!(f, "invalid instruction encoding {word:#010x}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Malformed pattern text. Patterns are static data, so these only surface while a table is
/// being built.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern `{0}` does not describe exactly 32 bits")]
    Width(String),
    #[error("unrecognized pattern token `{0}`")]
    BadToken(String),
    #[error("field `{0}` declared twice")]
    DuplicateField(&'static str),
    #[error("no field named `{0}` in pattern")]
    UnknownField(String),
}
