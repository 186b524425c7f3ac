//! Pre-commit shape check for `code` values
//!
//! A window is only converted when every non-NULL value in it is either the
//! empty object `{}` or a JSON string. Anything else stops the job before
//! the window is written.

use crate::window::BatchWindow;

use super::store::RawCodeRow;

/// Accepted shapes of a raw `code` value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeShape {
    Null,
    EmptyObject,
    QuotedString,
}

/// First row in a window whose value has an unexpected shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidRow {
    pub id: i64,
    pub value: String,
}

/// Classify one raw value, `None` when the shape is not accepted.
pub fn code_shape(raw: Option<&str>) -> Option<CodeShape> {
    let Some(raw) = raw else {
        return Some(CodeShape::Null);
    };

    if raw == "{}" {
        return Some(CodeShape::EmptyObject);
    }

    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return Some(CodeShape::QuotedString);
    }

    None
}

/// Check every row of `window`. Returns the number of rows holding a value
/// that will be converted.
pub fn validate_window(window: BatchWindow, rows: &[RawCodeRow]) -> Result<u64, InvalidRow> {
    let mut convertible = 0;

    for row in rows.iter().filter(|row| window.contains(row.id)) {
        match code_shape(row.code.as_deref()) {
            Some(CodeShape::QuotedString) => convertible += 1,
            Some(CodeShape::Null | CodeShape::EmptyObject) => {},
            None => {
                return Err(InvalidRow {
                    id: row.id,
                    value: preview(row.code.as_deref().unwrap_or_default()),
                })
            },
        }
    }

    Ok(convertible)
}

fn preview(raw: &str) -> String {
    const MAX_CHARS: usize = 80;
    if raw.chars().count() <= MAX_CHARS {
        raw.to_string()
    } else {
        let head: String = raw.chars().take(MAX_CHARS).collect();
        format!("{}...", head)
    }
}
