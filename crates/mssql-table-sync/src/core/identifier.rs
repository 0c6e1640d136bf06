//! Identifier validation and quoting for dynamically built T-SQL.
//!
//! Identifiers (schema, table and column names) cannot be bound as query
//! parameters, so every statement this crate builds splices them in as text.
//! Two rules keep that safe:
//!
//! 1. Names are validated (non-empty, no null bytes, at most 128 characters)
//!    and quoted with brackets, doubling any closing bracket.
//! 2. Column names are only quoted through [`quote_known`], which additionally
//!    requires the name to be present in an allow-list taken from catalog
//!    introspection. A column the catalog did not report never reaches SQL.
//!
//! Data values never go through this module; they are bound as parameters.

use crate::error::{Result, SyncError};

/// Maximum identifier length for SQL Server (`sysname`).
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes and
/// identifiers longer than 128 characters, plus statement separators and
/// comment markers that have no business in a table name from configuration.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SyncError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(SyncError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(SyncError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} characters (got {}): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.chars().count(),
            name
        )));
    }

    if name.contains(';') || name.contains("--") || name.contains("/*") {
        return Err(SyncError::Config(format!(
            "SECURITY: Identifier contains statement or comment markers: {:?}",
            name
        )));
    }

    Ok(())
}

/// Quote a SQL Server identifier using brackets.
///
/// Escapes closing brackets by doubling them and wraps in brackets.
/// Validates the identifier before quoting.
///
/// ```ignore
/// assert_eq!(quote_mssql("users")?, "[users]");
/// assert_eq!(quote_mssql("table]name")?, "[table]]name]");
/// ```
pub fn quote_mssql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("[{}]", name.replace(']', "]]")))
}

/// Qualify a SQL Server table name with schema.
///
/// Returns `[schema].[table]` with proper quoting.
pub fn qualify_mssql(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_mssql(schema)?, quote_mssql(table)?))
}

/// Quote a column name only if the catalog reported it.
///
/// `known` is the list of column names returned by introspection. The
/// comparison is case-insensitive, matching SQL Server's default collation,
/// and the catalog's spelling is the one quoted.
pub fn quote_known<'a, I>(name: &str, known: I) -> Result<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let canonical = known
        .into_iter()
        .find(|k| k.eq_ignore_ascii_case(name))
        .ok_or_else(|| {
            SyncError::Config(format!(
                "SECURITY: Column {:?} is not part of the introspected table",
                name
            ))
        })?;
    quote_mssql(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_normal() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("saArtPrecio").is_ok());
        assert!(validate_identifier("co_alma_calculado").is_ok());
        assert!(validate_identifier("Order Details").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_empty() {
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_validate_identifier_rejects_null_byte() {
        let result = validate_identifier("users\0; DROP TABLE x");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("null byte"));
    }

    #[test]
    fn test_validate_identifier_rejects_too_long() {
        let long = "a".repeat(129);
        assert!(validate_identifier(&long).is_err());
    }

    #[test]
    fn test_validate_identifier_accepts_max_length() {
        let max = "a".repeat(128);
        assert!(validate_identifier(&max).is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_statement_markers() {
        assert!(validate_identifier("Orders; DROP TABLE x").is_err());
        assert!(validate_identifier("Orders--").is_err());
        assert!(validate_identifier("Orders/*x*/").is_err());
    }

    #[test]
    fn test_quote_mssql_normal() {
        assert_eq!(quote_mssql("users").unwrap(), "[users]");
    }

    #[test]
    fn test_quote_mssql_escapes_bracket() {
        assert_eq!(quote_mssql("table]name").unwrap(), "[table]]name]");
    }

    #[test]
    fn test_quote_mssql_sql_injection_safely_quoted() {
        let quoted = quote_mssql("x] DROP TABLE users [").unwrap();
        assert_eq!(quoted, "[x]] DROP TABLE users []");
    }

    #[test]
    fn test_qualify_mssql() {
        assert_eq!(qualify_mssql("dbo", "Orders").unwrap(), "[dbo].[Orders]");
    }

    #[test]
    fn test_qualify_rejects_invalid_schema() {
        assert!(qualify_mssql("", "Orders").is_err());
    }

    #[test]
    fn test_quote_known_uses_catalog_spelling() {
        let known = ["Id", "Total", "Note"];
        assert_eq!(quote_known("id", known).unwrap(), "[Id]");
        assert_eq!(quote_known("NOTE", known).unwrap(), "[Note]");
    }

    #[test]
    fn test_quote_known_rejects_unknown_column() {
        let known = ["Id", "Total"];
        assert!(quote_known("Id] FROM x; --", known).is_err());
        assert!(quote_known("missing", known).is_err());
    }
}
