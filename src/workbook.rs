use calamine::{Data, Range, Reader, Xlsx};
use std::io::Cursor;

/// The uploaded byte buffer plus its declared metadata, prior to any trust
/// decision
///
/// Created once per request and owned by the validation pipeline; backend
/// adapters only ever receive a read-only reference.
#[derive(Clone, Debug)]
pub struct UploadedArtifact {
    bytes: Vec<u8>,
    filename: String,
    content_type: String,
}

/// MIME type declared by browsers for `.xlsx` uploads
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

impl UploadedArtifact {
    pub fn new(
        bytes: Vec<u8>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        UploadedArtifact {
            bytes,
            filename: filename.into(),
            content_type: content_type.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Whether the declared metadata claims an accepted spreadsheet format
    ///
    /// This is the cheap, pre-parse check on what the client *says* the file
    /// is; the security validator later verifies what the bytes actually are.
    pub fn declares_spreadsheet(&self) -> bool {
        self.filename.to_lowercase().ends_with(".xlsx") || self.content_type == XLSX_MIME
    }
}

/// One worksheet: its cell values and its formulas, read eagerly
#[derive(Clone, Debug)]
pub struct Sheet {
    pub(crate) name: String,
    pub(crate) cells: Range<Data>,
    pub(crate) formulas: Vec<String>,
}

impl Sheet {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Header row as it appears in the sheet (first row, untrimmed)
    pub fn header_row(&self) -> Vec<String> {
        match self.cells.rows().next() {
            Some(row) => row.iter().map(|c| c.to_string()).collect(),
            None => Vec::new(),
        }
    }

    /// Number of rows in the used area, including the header row
    pub fn row_count(&self) -> usize {
        self.cells.height()
    }

    /// Whether the given column (0-based, relative to the used area) holds
    /// at least one non-empty cell below the header row
    pub fn column_has_value(&self, col: usize) -> bool {
        self.cells
            .rows()
            .skip(1)
            .any(|row| row.get(col).map_or(false, |c| !cell_is_empty(c)))
    }

    /// Count of populated (non-empty) cells in this sheet
    pub fn populated_cells(&self) -> usize {
        self.cells.used_cells().count()
    }

    /// Every formula stored in this sheet, without the leading `=`
    pub fn formulas(&self) -> &[String] {
        &self.formulas
    }
}

fn cell_is_empty(cell: &Data) -> bool {
    match cell {
        Data::Empty => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// A parsed workbook: every sheet's values and formulas
///
/// This is the one place the crate touches the cell-level parsing library;
/// validators consume this capability and never deal with the container
/// format themselves.
#[derive(Clone, Debug)]
pub struct Workbook {
    pub(crate) sheets: Vec<Sheet>,
}

impl Workbook {
    /// Parse an xlsx byte buffer into sheets
    ///
    /// # Arguments
    /// * `bytes` - Raw xlsx container bytes
    ///
    /// # Returns
    /// * `Result<Workbook, String>` - The parsed workbook, or the parser's
    ///   error message when the buffer is not a readable workbook
    pub fn parse(bytes: &[u8]) -> Result<Workbook, String> {
        let cursor = Cursor::new(bytes.to_vec());
        let mut reader: Xlsx<_> = Xlsx::new(cursor).map_err(|e| e.to_string())?;

        let names = reader.sheet_names().to_owned();
        let mut sheets = Vec::with_capacity(names.len());

        for name in names {
            let cells = reader.worksheet_range(&name).map_err(|e| e.to_string())?;
            // Formula text is stored separately from computed values
            let formulas = reader
                .worksheet_formula(&name)
                .map_err(|e| e.to_string())?
                .used_cells()
                .filter(|(_, _, f)| !f.is_empty())
                .map(|(_, _, f)| f.clone())
                .collect();

            sheets.push(Sheet {
                name,
                cells,
                formulas,
            });
        }

        Ok(Workbook { sheets })
    }

    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    /// The first worksheet, which carries the data to analyze
    pub fn first_sheet(&self) -> Option<&Sheet> {
        self.sheets.first()
    }

    /// Cumulative populated-cell count across all sheets
    pub fn total_populated_cells(&self) -> usize {
        self.sheets.iter().map(|s| s.populated_cells()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::{Workbook as XlsxWriter, Worksheet};

    fn fixture_with_formula() -> Vec<u8> {
        let mut workbook = XlsxWriter::new();
        let mut worksheet = Worksheet::new();
        worksheet.write_string(0, 0, "id").unwrap();
        worksheet.write_string(0, 1, "label").unwrap();
        worksheet.write_number(1, 0, 1.0).unwrap();
        worksheet.write_formula(1, 1, "=SUM(1,2)").unwrap();
        workbook.push_worksheet(worksheet);
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn parses_headers_and_counts() {
        let bytes = fixture_with_formula();
        let wb = Workbook::parse(&bytes).unwrap();
        assert_eq!(wb.sheet_count(), 1);

        let sheet = wb.first_sheet().unwrap();
        assert_eq!(sheet.header_row(), vec!["id", "label"]);
        assert_eq!(sheet.row_count(), 2);
        assert!(sheet.column_has_value(0));
    }

    #[test]
    fn exposes_stored_formulas() {
        let bytes = fixture_with_formula();
        let wb = Workbook::parse(&bytes).unwrap();
        let formulas = wb.first_sheet().unwrap().formulas();
        assert_eq!(formulas.len(), 1);
        assert!(formulas[0].contains("SUM"));
    }

    #[test]
    fn garbage_bytes_fail_to_parse() {
        assert!(Workbook::parse(b"definitely not a workbook").is_err());
    }

    #[test]
    fn declared_type_check_covers_name_and_mime() {
        let by_name = UploadedArtifact::new(vec![], "DATA.XLSX", "application/octet-stream");
        assert!(by_name.declares_spreadsheet());

        let by_mime = UploadedArtifact::new(vec![], "upload.bin", XLSX_MIME);
        assert!(by_mime.declares_spreadsheet());

        let neither = UploadedArtifact::new(vec![], "notes.txt", "text/plain");
        assert!(!neither.declares_spreadsheet());
    }
}
