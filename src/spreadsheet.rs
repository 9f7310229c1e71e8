// Spreadsheet collaborator - Excel workbooks and CSV, in and out
//
// Import accepts several header spellings per column and reads the first
// sheet of a workbook; export always writes the same three columns as the
// import template. The file extension picks the format.

use crate::error::{StoreError, StoreResult};
use crate::import::ImportRow;
use crate::roster::ExportRow;
use calamine::{open_workbook_auto, open_workbook_auto_from_rs, Data, Range, Reader};
use chrono::NaiveDate;
use rust_xlsxwriter::{Format, Workbook};
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;
use tracing::debug;

/// Header spellings mapped to the student name
pub const NAME_HEADERS: &[&str] = &["姓名", "学生姓名", "name", "Name"];

/// Header spellings mapped to the coin count
pub const COINS_HEADERS: &[&str] = &["星币", "星币数量", "coins", "Coins"];

/// Header spellings mapped to the class name
pub const CLASS_HEADERS: &[&str] = &["班级", "班级名称", "class", "Class", "className"];

/// Export and template column headers
pub const EXPORT_HEADERS: [&str; 3] = ["姓名", "班级", "星币数量"];

/// Column widths (characters) for exported workbooks
const COLUMN_WIDTHS: [f64; 3] = [15.0, 20.0, 12.0];

/// Sheet name of the import template workbook
const TEMPLATE_SHEET: &str = "学生导入模板";

/// Sample rows written into the import template
const TEMPLATE_ROWS: &[(&str, &str, i64)] = &[
    ("张三", "三年级A班", 10),
    ("李四", "三年级A班", 8),
    ("王五", "三年级B班", 12),
    ("赵六", "四年级A班", 15),
];

/// File name of the downloadable template
pub const TEMPLATE_FILE_NAME: &str = "星币管理系统_学生导入模板.xlsx";

// ============================================================================
// FORMAT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    /// `.xlsx`, `.xlsm`, `.xls` and `.ods` (written as `.xlsx`)
    Workbook,
    Csv,
}

impl SheetFormat {
    pub fn from_path(path: &Path) -> StoreResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "xlsx" | "xlsm" | "xls" | "ods" => Ok(SheetFormat::Workbook),
            "csv" => Ok(SheetFormat::Csv),
            _ => Err(StoreError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

// ============================================================================
// IMPORT
// ============================================================================

/// Column positions for one logical field, in alias priority order
fn alias_columns(headers: &[String], aliases: &[&str]) -> Vec<usize> {
    aliases
        .iter()
        .filter_map(|alias| {
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}').trim() == *alias)
        })
        .collect()
}

/// First non-empty cell among `columns`
fn first_cell<S: AsRef<str>>(record: &[S], columns: &[usize]) -> Option<String> {
    columns
        .iter()
        .filter_map(|&i| record.get(i))
        .map(|cell| cell.as_ref().trim())
        .find(|cell| !cell.is_empty())
        .map(str::to_string)
}

/// Maps header-resolved columns onto [`ImportRow`]s
struct RowMapper {
    name: Vec<usize>,
    coins: Vec<usize>,
    class: Vec<usize>,
}

impl RowMapper {
    fn new(headers: &[String]) -> Self {
        RowMapper {
            name: alias_columns(headers, NAME_HEADERS),
            coins: alias_columns(headers, COINS_HEADERS),
            class: alias_columns(headers, CLASS_HEADERS),
        }
    }

    fn row<S: AsRef<str>>(&self, record: &[S]) -> ImportRow {
        ImportRow {
            name: first_cell(record, &self.name),
            coins: first_cell(record, &self.coins),
            class_name: first_cell(record, &self.class),
        }
    }
}

/// Parse import rows from CSV data with a header line
pub fn read_rows<R: Read>(reader: R) -> StoreResult<Vec<ImportRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    let mapper = RowMapper::new(&headers);

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let cells: Vec<&str> = record.iter().collect();
        rows.push(mapper.row(&cells));
    }

    debug!(rows = rows.len(), "csv rows read");
    Ok(rows)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

/// Rows of the first sheet; the first row is the header
fn rows_from_range(range: &Range<Data>) -> Vec<ImportRow> {
    let mut cells = range.rows();
    let Some(header) = cells.next() else {
        return Vec::new();
    };
    let headers: Vec<String> = header.iter().map(cell_text).collect();
    let mapper = RowMapper::new(&headers);

    let rows: Vec<ImportRow> = cells
        .map(|record| {
            let record: Vec<String> = record.iter().map(cell_text).collect();
            mapper.row(&record)
        })
        .filter(|row| *row != ImportRow::default())
        .collect();

    debug!(rows = rows.len(), "workbook rows read");
    rows
}

/// Parse import rows from the first sheet of an in-memory workbook
pub fn read_workbook<RS>(reader: RS) -> StoreResult<Vec<ImportRow>>
where
    RS: Read + Seek + Clone,
{
    let mut workbook = open_workbook_auto_from_rs(reader)?;
    match workbook.worksheet_range_at(0) {
        Some(range) => Ok(rows_from_range(&range?)),
        None => Ok(Vec::new()),
    }
}

/// Parse import rows from a workbook or CSV file, by extension
pub fn load_rows(path: &Path) -> StoreResult<Vec<ImportRow>> {
    match SheetFormat::from_path(path)? {
        SheetFormat::Csv => read_rows(File::open(path)?),
        SheetFormat::Workbook => {
            let mut workbook = open_workbook_auto(path)?;
            match workbook.worksheet_range_at(0) {
                Some(range) => Ok(rows_from_range(&range?)),
                None => Ok(Vec::new()),
            }
        }
    }
}

// ============================================================================
// EXPORT
// ============================================================================

/// Write export rows with the `姓名,班级,星币数量` header. Returns the row count.
pub fn write_rows<W, I>(writer: W, rows: I) -> StoreResult<usize>
where
    W: Write,
    I: IntoIterator<Item = ExportRow>,
{
    let mut wtr = csv::Writer::from_writer(writer);
    let mut count = 0;
    for row in rows {
        wtr.serialize(&row)?;
        count += 1;
    }
    if count == 0 {
        wtr.write_record(EXPORT_HEADERS)?;
    }
    wtr.flush()?;
    Ok(count)
}

/// Excel limits sheet names to 31 chars without `[]:*?/\`
fn sheet_name(label: &str) -> String {
    let name: String = label
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
        .take(31)
        .collect();
    let name = name.trim_matches('\'').trim().to_string();
    if name.is_empty() {
        "Sheet1".to_string()
    } else {
        name
    }
}

/// Write export rows as a one-sheet `.xlsx` workbook. Returns the row count.
pub fn write_workbook<W, I>(mut writer: W, sheet: &str, rows: I) -> StoreResult<usize>
where
    W: Write,
    I: IntoIterator<Item = ExportRow>,
{
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet_name(sheet))?;

    let bold = Format::new().set_bold();
    for (col, (header, width)) in EXPORT_HEADERS.iter().zip(COLUMN_WIDTHS).enumerate() {
        let col = col as u16;
        worksheet.write_string_with_format(0, col, *header, &bold)?;
        worksheet.set_column_width(col, width)?;
    }

    let mut count = 0;
    for (i, row) in rows.into_iter().enumerate() {
        let line = i as u32 + 1;
        worksheet.write_string(line, 0, row.name)?;
        worksheet.write_string(line, 1, row.class_name)?;
        worksheet.write_number(line, 2, row.coins as f64)?;
        count += 1;
    }

    writer.write_all(&workbook.save_to_buffer()?)?;
    Ok(count)
}

/// Write export rows to `path`, as a workbook or CSV by extension
pub fn save_rows<I>(path: &Path, sheet: &str, rows: I) -> StoreResult<usize>
where
    I: IntoIterator<Item = ExportRow>,
{
    let format = SheetFormat::from_path(path)?;
    let file = File::create(path)?;
    match format {
        SheetFormat::Workbook => write_workbook(file, sheet, rows),
        SheetFormat::Csv => write_rows(file, rows),
    }
}

fn template_rows() -> impl Iterator<Item = ExportRow> {
    TEMPLATE_ROWS.iter().map(|(name, class_name, coins)| ExportRow {
        name: name.to_string(),
        class_name: class_name.to_string(),
        coins: *coins,
    })
}

/// Write the import template (header plus sample rows) as CSV
pub fn write_template<W: Write>(writer: W) -> StoreResult<()> {
    write_rows(writer, template_rows())?;
    Ok(())
}

/// Write the import template to `path`, as a workbook or CSV by extension
pub fn save_template(path: &Path) -> StoreResult<()> {
    save_rows(path, TEMPLATE_SHEET, template_rows())?;
    Ok(())
}

/// `<label>_学生星币数据_<date>.xlsx`
pub fn export_file_name(selection_label: &str, date: NaiveDate) -> String {
    format!("{}_学生星币数据_{}.xlsx", selection_label, date.format("%Y-%m-%d"))
}
