//! Thin adapter over the external SQL parser.

use sqlparser::{ast::Statement, parser::Parser, parser::ParserError};

use crate::{
    config::SqlDialect,
    error::{Result, SourcePosition, SyntaxError},
};

const POSITION_MARKER: &str = " at Line: ";

/// Parses `sql` into syntax trees, one per statement.
///
/// `label` names the query in errors and logs (e.g. the job name).
pub fn parse(sql: &str, label: &str, dialect: SqlDialect) -> Result<Vec<Statement>> {
    log::debug!(
        "Parsing `{}`: {}",
        label,
        &sql[..sql.char_indices().nth(50).map_or(sql.len(), |(idx, _)| idx)]
    );
    let statements = Parser::parse_sql(dialect.dialect().as_ref(), sql)
        .map_err(|err| syntax_error(label, &err))?;
    if statements.is_empty() {
        return Err(SyntaxError {
            label: label.to_owned(),
            message: "No statement found.".to_owned(),
            position: None,
        }
        .into());
    }
    log::debug!("Parsed {} statements from `{}`.", statements.len(), label);
    Ok(statements)
}

fn syntax_error(label: &str, err: &ParserError) -> SyntaxError {
    let message = match err {
        ParserError::TokenizerError(msg) | ParserError::ParserError(msg) => msg.clone(),
        other => other.to_string(),
    };
    let (message, position) = split_position(&message);
    SyntaxError {
        label: label.to_owned(),
        message,
        position,
    }
}

/// Splits `"... at Line: 1, Column: 8"` into the message and its position.
fn split_position(message: &str) -> (String, Option<SourcePosition>) {
    let Some(marker_idx) = message.rfind(POSITION_MARKER) else {
        return (message.to_owned(), None);
    };
    let mut parts = message[marker_idx + POSITION_MARKER.len()..].split(", Column: ");
    let line = parts.next().and_then(|line| line.trim().parse::<u64>().ok());
    let column = parts.next().and_then(|col| col.trim().parse::<u64>().ok());
    match (line, column) {
        (Some(line), Some(column)) => (
            message[..marker_idx].to_owned(),
            Some(SourcePosition { line, column }),
        ),
        _ => (message.to_owned(), None),
    }
}
