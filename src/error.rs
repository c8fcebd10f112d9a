use std::fmt::Display;

use strum_macros::{Display as StrumDisplay, EnumString};

/// Position of a syntax error in the analysed text (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePosition {
    pub line: u64,
    pub column: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub label: String,
    pub message: String,
    pub position: Option<SourcePosition>,
}

impl Display for SyntaxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.position {
            Some(pos) => write!(
                f,
                "Syntax error in `{}` at line {}, column {}: {}",
                self.label, pos.line, pos.column, self.message
            ),
            None => write!(f, "Syntax error in `{}`: {}", self.label, self.message),
        }
    }
}

/// Every way binding, extraction or recording can fail.
///
/// The set is closed: callers (e.g. a transport layer) map [`ErrorKind`]s to their own codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Syntax(SyntaxError),
    TableNotFound(String),
    ColumnNotFound(String),
    Semantic(String),
    CatalogUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString)]
pub enum ErrorKind {
    SyntaxError,
    TableNotFound,
    ColumnNotFound,
    SemanticError,
    CatalogUnavailable,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Syntax(_) => ErrorKind::SyntaxError,
            Error::TableNotFound(_) => ErrorKind::TableNotFound,
            Error::ColumnNotFound(_) => ErrorKind::ColumnNotFound,
            Error::Semantic(_) => ErrorKind::SemanticError,
            Error::CatalogUnavailable(_) => ErrorKind::CatalogUnavailable,
        }
    }

    pub(crate) fn semantic(msg: impl Into<String>) -> Self {
        Error::Semantic(msg.into())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Syntax(err) => write!(f, "{}", err),
            Error::TableNotFound(name) => write!(f, "Table `{}` not found in catalog.", name),
            Error::ColumnNotFound(name) => write!(f, "Column `{}` not found in catalog.", name),
            Error::Semantic(msg) => write!(f, "{}", msg),
            Error::CatalogUnavailable(msg) => write!(f, "Catalog unavailable: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<SyntaxError> for Error {
    fn from(err: SyntaxError) -> Self {
        Error::Syntax(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_error_kind_names() {
        let err = Error::ColumnNotFound("orders.idd".to_owned());
        assert_eq!(err.kind(), ErrorKind::ColumnNotFound);
        assert_eq!(err.kind().to_string(), "ColumnNotFound");
        assert_eq!(
            ErrorKind::from_str("SemanticError").unwrap(),
            ErrorKind::SemanticError
        );
    }

    #[test]
    fn test_syntax_error_display() {
        let err: Error = SyntaxError {
            label: "etl".to_owned(),
            message: "Expected: an expression, found: EOF".to_owned(),
            position: Some(SourcePosition { line: 1, column: 8 }),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Syntax error in `etl` at line 1, column 8: Expected: an expression, found: EOF"
        );
    }
}
