//! Regenerates the shared-strings table and first worksheet of an existing
//! XLSX workbook from a CSV file.
//!
//! Every other archive entry (styles, themes, document properties) is copied
//! as raw compressed bytes, so it comes out byte-identical. The workbook is
//! replaced through a temporary archive and a backup that is only removed
//! once the swap succeeded.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracegate_core::{read_csv_rows, GateError};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const SPREADSHEET_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
pub const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";
pub const DEFAULT_SHEET_PART: &str = "xl/worksheets/sheet1.xml";
const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";

/// Spreadsheet column letters for a 1-based index (`1 -> A`, `27 -> AA`).
///
/// # Errors
/// Returns [`GateError::Configuration`] for index 0.
pub fn column_letter(index: usize) -> Result<String, GateError> {
    if index == 0 {
        return Err(GateError::Configuration(
            "column index must be >= 1".to_string(),
        ));
    }
    let mut remaining = index;
    let mut letters = Vec::new();
    while remaining > 0 {
        let rem = (remaining - 1) % 26;
        remaining = (remaining - 1) / 26;
        letters.push(char::from(b'A' + rem as u8));
    }
    Ok(letters.into_iter().rev().collect())
}

/// Inverse of [`column_letter`]; reads the leading letters of a cell reference.
#[must_use]
pub fn column_index(reference: &str) -> Option<usize> {
    let mut index = 0usize;
    let mut seen = false;
    for ch in reference.chars().take_while(char::is_ascii_alphabetic) {
        let digit = usize::from(ch.to_ascii_uppercase() as u8 - b'A') + 1;
        index = index.checked_mul(26)?.checked_add(digit)?;
        seen = true;
    }
    seen.then_some(index)
}

fn xml_error(err: impl std::fmt::Display) -> GateError {
    GateError::Structural(format!("spreadsheet XML error: {err}"))
}

fn zip_error(path: &Path, err: impl std::fmt::Display) -> GateError {
    GateError::Structural(format!("spreadsheet archive {}: {err}", path.display()))
}

fn io_error(action: &str, path: &Path, err: impl std::fmt::Display) -> GateError {
    GateError::Structural(format!("failed to {action} {}: {err}", path.display()))
}

/// The two regenerated workbook parts.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SheetParts {
    pub shared_strings: Vec<u8>,
    pub worksheet: Vec<u8>,
    /// Non-empty cells written.
    pub cell_count: usize,
    pub unique_count: usize,
}

#[derive(Debug, Default)]
struct SharedStrings {
    strings: Vec<String>,
    index: HashMap<String, usize>,
    occurrences: usize,
}

impl SharedStrings {
    fn intern(&mut self, text: &str) -> usize {
        self.occurrences += 1;
        if let Some(existing) = self.index.get(text) {
            return *existing;
        }
        let idx = self.strings.len();
        self.strings.push(text.to_string());
        self.index.insert(text.to_string(), idx);
        idx
    }
}

fn needs_preserve(text: &str) -> bool {
    text.starts_with(' ') || text.ends_with(' ') || text.contains('\n')
}

fn xml_writer() -> Result<Writer<Vec<u8>>, GateError> {
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
        .map_err(xml_error)?;
    Ok(writer)
}

/// Builds the worksheet and shared-strings XML for `rows`.
///
/// Empty cells are omitted; rows are kept even when all of their cells are empty.
///
/// # Errors
/// Returns [`GateError::Structural`] if the XML cannot be written.
pub fn build_sheet_parts(rows: &[Vec<String>]) -> Result<SheetParts, GateError> {
    let mut shared = SharedStrings::default();
    let mut sheet = xml_writer()?;

    let mut root = BytesStart::new("worksheet");
    root.push_attribute(("xmlns", SPREADSHEET_NS));
    sheet.write_event(Event::Start(root)).map_err(xml_error)?;

    let width = rows.iter().map(Vec::len).max().unwrap_or_default();
    let dimension = if width == 0 {
        "A1".to_string()
    } else {
        format!("A1:{}{}", column_letter(width)?, rows.len())
    };
    let mut dimension_el = BytesStart::new("dimension");
    dimension_el.push_attribute(("ref", dimension.as_str()));
    sheet.write_event(Event::Empty(dimension_el)).map_err(xml_error)?;

    sheet
        .write_event(Event::Start(BytesStart::new("sheetData")))
        .map_err(xml_error)?;
    for (row_idx, row) in rows.iter().enumerate() {
        let row_number = (row_idx + 1).to_string();
        let mut row_el = BytesStart::new("row");
        row_el.push_attribute(("r", row_number.as_str()));
        if row.iter().all(String::is_empty) {
            sheet.write_event(Event::Empty(row_el)).map_err(xml_error)?;
            continue;
        }
        sheet.write_event(Event::Start(row_el)).map_err(xml_error)?;

        for (col_idx, value) in row.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            let reference = format!("{}{row_number}", column_letter(col_idx + 1)?);
            let mut cell = BytesStart::new("c");
            cell.push_attribute(("r", reference.as_str()));
            cell.push_attribute(("t", "s"));
            sheet.write_event(Event::Start(cell)).map_err(xml_error)?;
            sheet
                .write_event(Event::Start(BytesStart::new("v")))
                .map_err(xml_error)?;
            let string_idx = shared.intern(value).to_string();
            sheet
                .write_event(Event::Text(BytesText::new(&string_idx)))
                .map_err(xml_error)?;
            sheet
                .write_event(Event::End(BytesEnd::new("v")))
                .map_err(xml_error)?;
            sheet
                .write_event(Event::End(BytesEnd::new("c")))
                .map_err(xml_error)?;
        }
        sheet
            .write_event(Event::End(BytesEnd::new("row")))
            .map_err(xml_error)?;
    }
    sheet
        .write_event(Event::End(BytesEnd::new("sheetData")))
        .map_err(xml_error)?;
    sheet
        .write_event(Event::End(BytesEnd::new("worksheet")))
        .map_err(xml_error)?;

    let mut sst = xml_writer()?;
    let count = shared.occurrences.to_string();
    let unique = shared.strings.len().to_string();
    let mut sst_root = BytesStart::new("sst");
    sst_root.push_attribute(("xmlns", SPREADSHEET_NS));
    sst_root.push_attribute(("count", count.as_str()));
    sst_root.push_attribute(("uniqueCount", unique.as_str()));
    sst.write_event(Event::Start(sst_root)).map_err(xml_error)?;
    for text in &shared.strings {
        sst.write_event(Event::Start(BytesStart::new("si")))
            .map_err(xml_error)?;
        let mut t = BytesStart::new("t");
        if needs_preserve(text) {
            t.push_attribute(("xml:space", "preserve"));
        }
        sst.write_event(Event::Start(t)).map_err(xml_error)?;
        sst.write_event(Event::Text(BytesText::new(text)))
            .map_err(xml_error)?;
        sst.write_event(Event::End(BytesEnd::new("t")))
            .map_err(xml_error)?;
        sst.write_event(Event::End(BytesEnd::new("si")))
            .map_err(xml_error)?;
    }
    sst.write_event(Event::End(BytesEnd::new("sst")))
        .map_err(xml_error)?;

    Ok(SheetParts {
        shared_strings: sst.into_inner(),
        worksheet: sheet.into_inner(),
        cell_count: shared.occurrences,
        unique_count: shared.strings.len(),
    })
}

fn read_part<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Option<String> {
    let mut entry = archive.by_name(name).ok()?;
    let mut text = String::new();
    entry.read_to_string(&mut text).ok()?;
    Some(text)
}

fn attribute(element: &BytesStart<'_>, local_name: &[u8]) -> Result<Option<String>, GateError> {
    for attr in element.attributes() {
        let attr = attr.map_err(xml_error)?;
        if attr.key.local_name().as_ref() == local_name {
            return Ok(Some(attr.unescape_value().map_err(xml_error)?.into_owned()));
        }
    }
    Ok(None)
}

/// Relationship id of the first `<sheet>` in `xl/workbook.xml`.
fn first_sheet_relationship(workbook: &str) -> Result<Option<String>, GateError> {
    let mut reader = Reader::from_str(workbook);
    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(element) | Event::Empty(element)
                if element.local_name().as_ref() == b"sheet" =>
            {
                return attribute(&element, b"id");
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

fn relationship_target(rels: &str, id: &str) -> Result<Option<String>, GateError> {
    let mut reader = Reader::from_str(rels);
    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(element) | Event::Empty(element)
                if element.local_name().as_ref() == b"Relationship" =>
            {
                if attribute(&element, b"Id")?.as_deref() == Some(id) {
                    return attribute(&element, b"Target");
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{target}"),
    }
}

fn first_sheet_target<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<Option<String>, GateError> {
    let Some(workbook) = read_part(archive, WORKBOOK_PART) else {
        return Ok(None);
    };
    let Some(rel_id) = first_sheet_relationship(&workbook)? else {
        return Ok(None);
    };
    let Some(rels) = read_part(archive, WORKBOOK_RELS_PART) else {
        return Ok(None);
    };
    Ok(relationship_target(&rels, &rel_id)?.map(|target| resolve_target(&target)))
}

/// Archive path of the workbook's first worksheet, falling back to
/// `xl/worksheets/sheet1.xml` when the workbook or its relationships do not say.
pub fn locate_first_sheet<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>) -> String {
    match first_sheet_target(archive) {
        Ok(Some(part)) => part,
        Ok(None) => DEFAULT_SHEET_PART.to_string(),
        Err(err) => {
            tracing::warn!(error = %err, "could not resolve first worksheet; using default part");
            DEFAULT_SHEET_PART.to_string()
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SyncSummary {
    pub rows: usize,
    pub columns: usize,
    pub unique_strings: usize,
    pub sheet_part: String,
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn write_regenerated(
    xlsx: &Path,
    tmp: &Path,
    parts: &SheetParts,
) -> Result<String, GateError> {
    let source = File::open(xlsx).map_err(|err| io_error("open", xlsx, err))?;
    let mut archive = ZipArchive::new(source).map_err(|err| zip_error(xlsx, err))?;
    let sheet_part = locate_first_sheet(&mut archive);

    for required in [SHARED_STRINGS_PART, sheet_part.as_str()] {
        if !archive.file_names().any(|name| name == required) {
            return Err(GateError::Structural(format!(
                "{} has no {required} part",
                xlsx.display()
            )));
        }
    }

    let target = File::create(tmp).map_err(|err| io_error("create", tmp, err))?;
    let mut writer = ZipWriter::new(target);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for idx in 0..archive.len() {
        let entry = archive
            .by_index_raw(idx)
            .map_err(|err| zip_error(xlsx, err))?;
        let name = entry.name().to_string();
        let replacement = if name == SHARED_STRINGS_PART {
            Some(&parts.shared_strings)
        } else if name == sheet_part {
            Some(&parts.worksheet)
        } else {
            None
        };

        match replacement {
            Some(bytes) => {
                drop(entry);
                writer
                    .start_file(name.as_str(), options)
                    .map_err(|err| zip_error(tmp, err))?;
                writer
                    .write_all(bytes)
                    .map_err(|err| io_error("write", tmp, err))?;
                tracing::debug!(part = %name, bytes = bytes.len(), "replaced workbook part");
            }
            None => writer
                .raw_copy_file(entry)
                .map_err(|err| zip_error(tmp, err))?,
        }
    }
    writer.finish().map_err(|err| zip_error(tmp, err))?;
    Ok(sheet_part)
}

/// Swaps `tmp` into `xlsx`, keeping `backup` until the swap has succeeded.
fn swap_into_place(xlsx: &Path, tmp: &Path, backup: &Path) -> Result<(), GateError> {
    fs::rename(xlsx, backup).map_err(|err| io_error("back up", xlsx, err))?;
    if let Err(err) = fs::rename(tmp, xlsx) {
        if let Err(restore) = fs::rename(backup, xlsx) {
            tracing::error!(backup = %backup.display(), error = %restore, "failed to restore workbook backup");
        }
        return Err(io_error("replace", xlsx, err));
    }
    if let Err(err) = fs::remove_file(backup) {
        tracing::warn!(backup = %backup.display(), error = %err, "could not remove workbook backup");
    }
    Ok(())
}

/// Rewrites the workbook at `xlsx` from the rows of `csv`.
///
/// # Errors
/// Returns [`GateError::Structural`] when the CSV is empty or unreadable, the
/// workbook is not a valid archive or lacks a target part, or the swap fails.
/// The original workbook is left in place on every error.
pub fn sync_csv_to_xlsx(csv: &Path, xlsx: &Path) -> Result<SyncSummary, GateError> {
    let rows = read_csv_rows(csv)?;
    if rows.is_empty() {
        return Err(GateError::Structural("CSV is empty; aborting.".to_string()));
    }
    tracegate_core::ensure_file(xlsx, "workbook")?;

    let parts = build_sheet_parts(&rows)?;
    let tmp = sibling_path(xlsx, ".tmp");
    let backup = sibling_path(xlsx, ".bak");

    let sheet_part = match write_regenerated(xlsx, &tmp, &parts) {
        Ok(sheet_part) => sheet_part,
        Err(err) => {
            if tmp.exists() {
                if let Err(cleanup) = fs::remove_file(&tmp) {
                    tracing::warn!(tmp = %tmp.display(), error = %cleanup, "could not remove temporary workbook");
                }
            }
            return Err(err);
        }
    };
    swap_into_place(xlsx, &tmp, &backup)?;

    let summary = SyncSummary {
        rows: rows.len(),
        columns: rows.iter().map(Vec::len).max().unwrap_or_default(),
        unique_strings: parts.unique_count,
        sheet_part,
    };
    tracing::info!(
        xlsx = %xlsx.display(),
        rows = summary.rows,
        unique_strings = summary.unique_strings,
        "regenerated workbook"
    );
    Ok(summary)
}

fn parse_shared_strings(xml: &str) -> Result<Vec<String>, GateError> {
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(element) => match element.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Event::Empty(element) if element.local_name().as_ref() == b"si" => {
                strings.push(String::new());
            }
            Event::End(element) => match element.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_text = false,
                _ => {}
            },
            Event::Text(text) if in_text => {
                if let Some(buffer) = current.as_mut() {
                    buffer.push_str(&text.unescape().map_err(xml_error)?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(strings)
}

fn parse_dimension(reference: &str) -> (usize, usize) {
    let last = reference.rsplit(':').next().unwrap_or(reference);
    let columns = column_index(last).unwrap_or_default();
    let rows = last
        .trim_start_matches(|ch: char| ch.is_ascii_alphabetic())
        .parse()
        .unwrap_or_default();
    if reference.contains(':') {
        (columns, rows)
    } else {
        (0, 0)
    }
}

#[derive(Debug, Default)]
struct CellCursor {
    column: usize,
    shared: bool,
}

fn parse_worksheet(xml: &str, strings: &[String]) -> Result<Vec<Vec<String>>, GateError> {
    let mut reader = Reader::from_str(xml);
    let mut grid: Vec<Vec<String>> = Vec::new();
    let (mut width, mut height) = (0usize, 0usize);
    let mut row = 0usize;
    let mut cell: Option<CellCursor> = None;
    let mut in_value = false;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(element) | Event::Empty(element) => match element.local_name().as_ref()
            {
                b"dimension" => {
                    if let Some(reference) = attribute(&element, b"ref")? {
                        (width, height) = parse_dimension(&reference);
                    }
                }
                b"row" => {
                    row = attribute(&element, b"r")?
                        .and_then(|value| value.parse().ok())
                        .unwrap_or(row + 1);
                }
                b"c" => {
                    let column = attribute(&element, b"r")?
                        .as_deref()
                        .and_then(column_index)
                        .unwrap_or_default();
                    let shared = attribute(&element, b"t")?.as_deref() == Some("s");
                    cell = Some(CellCursor { column, shared });
                }
                b"v" => in_value = true,
                _ => {}
            },
            Event::End(element) => match element.local_name().as_ref() {
                b"v" => in_value = false,
                b"c" => cell = None,
                _ => {}
            },
            Event::Text(text) if in_value => {
                let Some(cursor) = cell.as_ref() else {
                    continue;
                };
                if row == 0 || cursor.column == 0 {
                    continue;
                }
                let raw = text.unescape().map_err(xml_error)?;
                let value = if cursor.shared {
                    let idx: usize = raw.trim().parse().map_err(|_| {
                        GateError::Structural(format!("invalid shared string index {raw}"))
                    })?;
                    strings.get(idx).cloned().ok_or_else(|| {
                        GateError::Structural(format!("shared string index {idx} out of range"))
                    })?
                } else {
                    raw.into_owned()
                };
                if grid.len() < row {
                    grid.resize(row, Vec::new());
                }
                let cells = &mut grid[row - 1];
                if cells.len() < cursor.column {
                    cells.resize(cursor.column, String::new());
                }
                cells[cursor.column - 1] = value;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let height = height.max(grid.len()).max(row);
    grid.resize(height, Vec::new());
    let width = grid.iter().map(Vec::len).max().unwrap_or_default().max(width);
    for cells in &mut grid {
        cells.resize(width, String::new());
    }
    Ok(grid)
}

/// Reads the first worksheet back into rows, resolving shared strings and
/// padding every row to the sheet dimension.
///
/// # Errors
/// Returns [`GateError::Structural`] when the archive or its XML is invalid.
pub fn read_sheet_rows(xlsx: &Path) -> Result<Vec<Vec<String>>, GateError> {
    let file = File::open(xlsx).map_err(|err| io_error("open", xlsx, err))?;
    let mut archive = ZipArchive::new(file).map_err(|err| zip_error(xlsx, err))?;
    let sheet_part = locate_first_sheet(&mut archive);

    let strings = match read_part(&mut archive, SHARED_STRINGS_PART) {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };
    let sheet = read_part(&mut archive, &sheet_part).ok_or_else(|| {
        GateError::Structural(format!("{} has no {sheet_part} part", xlsx.display()))
    })?;
    parse_worksheet(&sheet, &strings)
}
