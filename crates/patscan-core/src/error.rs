use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Pattern is empty")]
    EmptyPattern,

    #[error("Pattern has no content besides an unbounded gap")]
    NoContent,

    #[error("Unrecognized token at index {index}: {value:#06x}")]
    InvalidToken { index: usize, value: u16 },

    #[error("Mask is shorter than pattern: {mask} < {pattern}")]
    MaskTooShort { mask: usize, pattern: usize },

    #[error("Pattern may contain at most one unbounded gap (second at token {0})")]
    MultipleVariableGaps(usize),

    #[error("Invalid pattern syntax '{item}': {message}")]
    InvalidSyntax { item: String, message: String },

    #[error("Invalid address meaning: {0}")]
    InvalidAddressMeaning(String),

    #[error("Signature '{name}': {source}")]
    Signature {
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Failed to read memory at address {address:#x}: {message}")]
    MemoryReadFailed { address: u64, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }

    /// Check if this error was raised while compiling a pattern description
    pub fn is_pattern_error(&self) -> bool {
        matches!(
            self,
            Error::EmptyPattern
                | Error::NoContent
                | Error::InvalidToken { .. }
                | Error::MaskTooShort { .. }
                | Error::MultipleVariableGaps(_)
                | Error::InvalidSyntax { .. }
        ) || matches!(self, Error::Signature { source, .. } if source.is_pattern_error())
    }
}
