//! Input validation for tool parameters.
//!
//! Every check here runs before a remote call is issued, so a rejected
//! request never reaches the Google APIs.

pub mod input_guards;

pub use input_guards::{
    MAX_SHEET_TITLE_LEN, ValidationError, ValidationResult, validate_non_empty_string,
    validate_range, validate_rows, validate_sheet_title, validate_spreadsheet_id,
};
