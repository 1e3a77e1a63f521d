//! Guards for spreadsheet ids, tab names, A1 ranges and row payloads.

use serde_json::Value;
use thiserror::Error;

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Google Sheets caps tab titles at 100 characters.
pub const MAX_SHEET_TITLE_LEN: usize = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("parameter '{parameter}' cannot be empty or whitespace-only")]
    EmptyString { parameter: String },

    #[error("invalid spreadsheet ID '{id}': {reason}")]
    InvalidSpreadsheetId { id: String, reason: String },

    #[error("invalid sheet title '{title}': {reason}")]
    InvalidSheetTitle { title: String, reason: String },

    #[error("invalid range '{range}': {reason}")]
    InvalidRange { range: String, reason: String },

    #[error("parameter '{parameter}' must contain at least one row")]
    EmptyRows { parameter: String },
}

impl ValidationError {
    /// Name of the offending parameter, for error context.
    pub fn parameter(&self) -> &str {
        match self {
            ValidationError::EmptyString { parameter } | ValidationError::EmptyRows { parameter } => {
                parameter
            }
            ValidationError::InvalidSpreadsheetId { .. } => "spreadsheet_id",
            ValidationError::InvalidSheetTitle { .. } => "title",
            ValidationError::InvalidRange { .. } => "range",
        }
    }
}

/// Validates that a string parameter is not empty or whitespace-only
///
/// ```
/// use google_sheets_mcp::validation::validate_non_empty_string;
///
/// assert!(validate_non_empty_string("sheet", "Sheet1").is_ok());
/// assert!(validate_non_empty_string("sheet", "   ").is_err());
/// ```
pub fn validate_non_empty_string<'a>(
    parameter_name: &str,
    value: &'a str,
) -> ValidationResult<&'a str> {
    if value.trim().is_empty() {
        Err(ValidationError::EmptyString {
            parameter: parameter_name.to_string(),
        })
    } else {
        Ok(value)
    }
}

/// Spreadsheet ids are Drive file ids: letters, digits, `-` and `_`.
pub fn validate_spreadsheet_id(id: &str) -> ValidationResult<&str> {
    validate_non_empty_string("spreadsheet_id", id)?;
    if let Some(bad) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(ValidationError::InvalidSpreadsheetId {
            id: id.to_string(),
            reason: format!("unexpected character '{bad}'"),
        });
    }
    Ok(id)
}

pub fn validate_sheet_title(title: &str) -> ValidationResult<&str> {
    if title.trim().is_empty() {
        return Err(ValidationError::InvalidSheetTitle {
            title: title.to_string(),
            reason: "title cannot be empty or whitespace-only".to_string(),
        });
    }
    let len = title.chars().count();
    if len > MAX_SHEET_TITLE_LEN {
        return Err(ValidationError::InvalidSheetTitle {
            title: title.to_string(),
            reason: format!("title exceeds {MAX_SHEET_TITLE_LEN} characters (got {len})"),
        });
    }
    Ok(title)
}

/// The cell part of an A1 reference; the tab name is passed separately.
pub fn validate_range(range: &str) -> ValidationResult<&str> {
    if range.trim().is_empty() {
        return Err(ValidationError::InvalidRange {
            range: range.to_string(),
            reason: "range cannot be empty".to_string(),
        });
    }
    if range.contains('!') {
        return Err(ValidationError::InvalidRange {
            range: range.to_string(),
            reason: "range must not include a sheet prefix; pass the sheet separately"
                .to_string(),
        });
    }
    Ok(range)
}

pub fn validate_rows<'a>(
    parameter_name: &str,
    rows: &'a [Vec<Value>],
) -> ValidationResult<&'a [Vec<Value>]> {
    if rows.is_empty() {
        Err(ValidationError::EmptyRows {
            parameter: parameter_name.to_string(),
        })
    } else {
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_non_empty_string() {
        assert!(validate_non_empty_string("test", "hello").is_ok());
        assert!(validate_non_empty_string("test", "").is_err());
        assert!(validate_non_empty_string("test", "\t\n").is_err());
    }

    #[test]
    fn test_validate_spreadsheet_id() {
        assert!(validate_spreadsheet_id("1BxiMVs0XRA5nFMdKvBdBZjgmUUqptlbs74OgvE2upms").is_ok());
        assert!(validate_spreadsheet_id("abc_DEF-123").is_ok());
        assert_eq!(
            validate_spreadsheet_id(" ").unwrap_err(),
            ValidationError::EmptyString {
                parameter: "spreadsheet_id".into()
            }
        );
        assert!(validate_spreadsheet_id("abc/def").is_err());
        assert!(validate_spreadsheet_id("abc def").is_err());
    }

    #[test]
    fn test_validate_sheet_title() {
        assert!(validate_sheet_title("Q3 Forecast").is_ok());
        assert!(validate_sheet_title("").is_err());
        assert!(validate_sheet_title(&"x".repeat(MAX_SHEET_TITLE_LEN)).is_ok());
        assert!(validate_sheet_title(&"x".repeat(MAX_SHEET_TITLE_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range("A1:C10").is_ok());
        assert!(validate_range("B:B").is_ok());
        assert!(validate_range("").is_err());
        assert!(validate_range("Sheet1!A1").is_err());
    }

    #[test]
    fn test_validate_rows() {
        let rows = vec![vec![json!("a"), json!(1)]];
        assert!(validate_rows("data", &rows).is_ok());
        assert_eq!(validate_rows("data", &[]).unwrap_err().parameter(), "data");
    }
}
