use thiserror::Error;

/// Classifies a failure the way the toolchain reports it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum ErrorKind {
    /// Declarations don't line up: unknown section, undeclared line, duplicate opcode.
    #[error("{0}")]
    Configuration(String),
    /// Malformed text: opcode patterns, literals, section headers.
    #[error("{0}")]
    Syntax(String),
    /// Well-formed but meaningless: unknown mnemonic, missing operands.
    #[error("{0}")]
    Semantic(String),
}

impl ErrorKind {
    pub(crate) fn category(&self) -> &'static str {
        match self {
            ErrorKind::Configuration(_) => "configuration",
            ErrorKind::Syntax(_) => "syntax",
            ErrorKind::Semantic(_) => "semantic",
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum ParseError {
    #[error("Error on line {line_number}: {kind}")]
    AtLine { line_number: usize, kind: ErrorKind },
    #[error("Error: {0}")]
    Global(ErrorKind),
}

impl ParseError {
    pub(crate) fn new(line_number: usize, kind: ErrorKind) -> Self {
        ParseError::AtLine { line_number, kind }
    }

    pub(crate) fn kind(&self) -> &ErrorKind {
        match self {
            ParseError::AtLine { kind, .. } | ParseError::Global(kind) => kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum BitfieldError {
    #[error("Undefined line '{0}'")]
    UndefinedLine(String),
    #[error("Line '{0}' declared more than once")]
    DuplicateLine(String),
    #[error("Word has {0} lines, at most 64 are supported")]
    TooWide(usize),
}

impl From<BitfieldError> for ErrorKind {
    fn from(err: BitfieldError) -> Self {
        ErrorKind::Configuration(err.to_string())
    }
}
