use crate::envelope::{ErrorKind, ValidationVerdict};
use crate::workbook::Workbook;
use serde_json::json;

/// Columns that must be present in the header row (case-insensitive,
/// whitespace-trimmed, order-independent) and must each contain at least
/// one data value
pub const REQUIRED_COLUMNS: [&str; 8] = [
    "participant",
    "card index",
    "card label",
    "category label",
    "complete",
    "start time (utc)",
    "finish time (utc)",
    "sorted position",
];

/// Columns that must be present but are allowed to be entirely empty
///
/// Real session exports routinely leave these blank, so requiring data in
/// them would reject otherwise usable files.
pub const EMPTINESS_EXEMPT_COLUMNS: [&str; 3] = ["login", "entry", "comment"];

fn normalize(header: &str) -> String {
    header.trim().to_lowercase()
}

/// Verify that a workbook has the required columns and that each required
/// column holds at least one value
///
/// The check runs against the first worksheet only. Missing columns are
/// reported before emptiness is considered: a file cannot fail both ways at
/// once, and emptiness of a column that may not exist is meaningless.
/// Duplicate header names are tolerated; the first occurrence wins. Extra,
/// unrecognized columns are ignored.
///
/// # Arguments
/// * `workbook` - The parsed workbook to inspect
///
/// # Returns
/// * `ValidationVerdict` - Pass, or a failure classified as
///   `SchemaColumnsMissing` / `SchemaColumnsEmpty` / `FileUnparseable`
pub fn verify_columns(workbook: &Workbook) -> ValidationVerdict {
    let sheet = match workbook.first_sheet() {
        Some(sheet) => sheet,
        None => {
            return ValidationVerdict::fail(
                ErrorKind::FileUnparseable,
                "The workbook contains no worksheets.",
            );
        }
    };

    // Map each normalized header to its column position; first occurrence
    // wins on duplicates.
    let mut header_index: Vec<(String, usize)> = Vec::new();
    for (idx, raw) in sheet.header_row().iter().enumerate() {
        let name = normalize(raw);
        if name.is_empty() {
            continue;
        }
        if !header_index.iter().any(|(existing, _)| existing == &name) {
            header_index.push((name, idx));
        }
    }

    let find = |name: &str| -> Option<usize> {
        header_index
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, idx)| *idx)
    };

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .chain(EMPTINESS_EXEMPT_COLUMNS.iter())
        .filter(|col| find(col).is_none())
        .copied()
        .collect();

    if !missing.is_empty() {
        return ValidationVerdict::fail_with_details(
            ErrorKind::SchemaColumnsMissing,
            format!("Missing required columns: {}.", missing.join(", ")),
            json!({ "missingColumns": missing }),
        );
    }

    // All names exist; now scan the data rows of each non-exempt column.
    let empty: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .filter(|col| match find(col) {
            Some(idx) => !sheet.column_has_value(idx),
            None => false,
        })
        .copied()
        .collect();

    if !empty.is_empty() {
        return ValidationVerdict::fail_with_details(
            ErrorKind::SchemaColumnsEmpty,
            format!("Columns without any data: {}.", empty.join(", ")),
            json!({ "emptyColumns": empty }),
        );
    }

    ValidationVerdict::pass()
}
