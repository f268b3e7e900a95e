use crate::envelope::{ErrorKind, ValidationVerdict};
use crate::workbook::{UploadedArtifact, Workbook};

/// Excel functions that can execute commands, exfiltrate data, or pull
/// remote content. Matching is case-insensitive against the full formula
/// text (with its leading `=` restored).
pub const DANGEROUS_FORMULA_PATTERNS: [&str; 16] = [
    "=CMD(",
    "=EXEC(",
    "=SHELL(",
    "=HYPERLINK(",
    "=DDE(",
    "=DDEAUTO(",
    "=CALL(",
    "IMPORTXML",
    "WEBSERVICE",
    "=SYSTEM(",
    "=RUN(",
    "=OSC(",
    "=REGISTER(",
    "VBA.",
    "CALL(",
    "=XLM.",
];

/// Ceiling on worksheet count; more than this is a sign of a crafted file
pub const MAX_SHEETS: usize = 100;

/// Ceiling on cumulative populated cells across all sheets (DoS guard)
pub const MAX_TOTAL_CELLS: usize = 1_000_000;

/// File formats the byte-signature check accepts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SniffedFormat {
    /// ZIP container (`PK\x03\x04`) — the modern xlsx package
    XlsxContainer,
    /// OLE2 compound document — the legacy xls container
    LegacyXlsContainer,
}

/// Determine the actual file format from its magic bytes, independent of
/// filename extension or declared MIME type
///
/// # Arguments
/// * `bytes` - The raw upload
///
/// # Returns
/// * `Option<SniffedFormat>` - The detected container, or `None` when the
///   signature matches neither accepted format
pub fn sniff_format(bytes: &[u8]) -> Option<SniffedFormat> {
    const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
    const OLE2_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

    if bytes.starts_with(&ZIP_MAGIC) {
        Some(SniffedFormat::XlsxContainer)
    } else if bytes.starts_with(&OLE2_MAGIC) {
        Some(SniffedFormat::LegacyXlsContainer)
    } else {
        None
    }
}

/// Verify that the byte stream is genuinely a spreadsheet container
///
/// Fails closed: an undeterminable signature is treated the same as a
/// mismatched one. There is no size-based leniency here; skipping
/// validation exists only as the explicit test-mode configuration flag.
pub fn verify_file_type(artifact: &UploadedArtifact) -> ValidationVerdict {
    match sniff_format(artifact.bytes()) {
        Some(_) => ValidationVerdict::pass(),
        None => ValidationVerdict::fail(
            ErrorKind::FileInsecure,
            "The file's actual content does not match an accepted spreadsheet format.",
        ),
    }
}

/// Scan every stored formula against the dangerous-function deny-list
///
/// The parser strips the leading `=` from formula text, so it is restored
/// before matching; patterns like `VBA.` and `IMPORTXML` match anywhere in
/// the formula, not just at the start. The first match aborts the scan.
pub fn scan_formulas(workbook: &Workbook) -> ValidationVerdict {
    for sheet in workbook.sheets() {
        for formula in sheet.formulas() {
            let normalized = format!("={}", formula.trim_start_matches('=')).to_uppercase();
            for pattern in DANGEROUS_FORMULA_PATTERNS {
                if normalized.contains(pattern) {
                    return ValidationVerdict::fail(
                        ErrorKind::FileInsecure,
                        format!("Potentially malicious formula detected: {pattern}"),
                    );
                }
            }
        }
    }
    ValidationVerdict::pass()
}

/// Reject workbooks sized to exhaust server resources
///
/// Independent of the byte-size cap enforced at the request boundary: a
/// small compressed file can still inflate into an enormous cell count.
pub fn check_resource_limits(workbook: &Workbook) -> ValidationVerdict {
    if workbook.sheet_count() > MAX_SHEETS {
        return ValidationVerdict::fail(
            ErrorKind::FileInsecure,
            format!(
                "The file contains a suspiciously high number of sheets ({} > {MAX_SHEETS}).",
                workbook.sheet_count()
            ),
        );
    }

    let cells = workbook.total_populated_cells();
    if cells > MAX_TOTAL_CELLS {
        return ValidationVerdict::fail(
            ErrorKind::FileInsecure,
            format!("The file contains too many cells ({cells} > {MAX_TOTAL_CELLS})."),
        );
    }

    ValidationVerdict::pass()
}

/// Run the in-process security checks over an already-parsed workbook,
/// cheapest first
pub fn check_workbook(workbook: &Workbook) -> ValidationVerdict {
    let verdict = scan_formulas(workbook);
    if !verdict.ok {
        return verdict;
    }
    check_resource_limits(workbook)
}
