//! Identifier quoting and validation
//!
//! Table, alias and column names reach SQL text directly, so every name the
//! mapper did not read from the schema goes through here first.

use std::sync::LazyLock;

use regex::Regex;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"));

/// Double-quote a single name, doubling embedded quotes
///
/// ```
/// use activerow::sql::quote_identifier;
///
/// assert_eq!(quote_identifier("book_tag"), "\"book_tag\"");
/// ```
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a possibly qualified column reference (`alias.column`)
///
/// A `*` column is left bare so `alias.*` stays a wildcard.
pub fn quote_qualified(reference: &str) -> String {
    let parts: Vec<String> = reference
        .split('.')
        .map(|part| match part {
            "*" => part.to_string(),
            _ => quote_identifier(part),
        })
        .collect();
    parts.join(".")
}

/// Check that a table, alias or column name is a plain identifier
///
/// Plain means an ASCII letter or underscore, followed by letters, digits
/// or underscores.
///
/// ```
/// use activerow::sql::validate_identifier;
///
/// assert!(validate_identifier("book_tag").is_ok());
/// assert!(validate_identifier("book tag").is_err());
/// ```
pub fn validate_identifier(name: &str) -> Result<(), String> {
    match name {
        "" => Err("Identifier must not be empty".to_string()),
        _ if IDENTIFIER.is_match(name) => Ok(()),
        _ => Err(format!(
            "'{}' is not a plain identifier (letters, digits and underscores, not starting with a digit)",
            name
        )),
    }
}
