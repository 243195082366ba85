use crate::model::{SheetSnapshot, WorkbookSnapshot};
use crate::styles::cell_style_from_style;
use crate::utils::{cell_address, column_index_to_letters};
use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use umya_spreadsheet::{Worksheet, reader, writer};

/// Rows captured into the in-memory grid per sheet. Reads beyond this go
/// through sheet-data pagination against the same capped grid.
const MAX_CAPTURED_ROWS: u32 = 100;

/// Excel sheet limits, 0-based exclusive bounds for edit targets.
pub const MAX_SHEET_ROWS: u32 = 1_048_576;
pub const MAX_SHEET_COLUMNS: u32 = 16_384;

/// Reject edit targets outside the Excel grid before any mutation.
pub fn check_cell_bounds(row: u32, col: u32) -> Result<()> {
    if row >= MAX_SHEET_ROWS || col >= MAX_SHEET_COLUMNS {
        return Err(anyhow!(
            "cell ({}, {}) is outside the sheet limits",
            row,
            col
        ));
    }
    Ok(())
}

/// Open a workbook and capture its structural snapshot: per-sheet grids,
/// formulas, non-default formatting, sizing and merged ranges.
pub fn build_snapshot(path: &Path) -> Result<WorkbookSnapshot> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("unable to read metadata for {:?}", path))?;
    let book = reader::xlsx::read(path)
        .with_context(|| format!("failed to parse workbook {:?}", path))?;

    let has_vba = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("xlsm"))
        .unwrap_or(false);

    let mut sheets = Vec::new();
    for sheet in book.get_sheet_collection() {
        sheets.push(snapshot_sheet(sheet));
    }

    Ok(WorkbookSnapshot {
        total_sheets: sheets.len(),
        sheets,
        has_vba,
        file_size: metadata.len(),
        captured_at: Utc::now(),
    })
}

fn snapshot_sheet(sheet: &Worksheet) -> SheetSnapshot {
    let max_row = sheet.get_highest_row();
    let max_column = sheet.get_highest_column();
    let captured_rows = max_row.min(MAX_CAPTURED_ROWS);

    // First pass: rectangular grid of display values, row 1 doubling as headers.
    let mut data = Vec::with_capacity(captured_rows as usize);
    for row in 1..=captured_rows {
        let mut cells = Vec::with_capacity(max_column as usize);
        for col in 1..=max_column {
            let value = sheet
                .get_cell((col, row))
                .map(|cell| cell.get_value().to_string())
                .unwrap_or_default();
            cells.push(value);
        }
        data.push(cells);
    }
    let headers = data.first().cloned().unwrap_or_default();

    // Second pass: formulas and non-default formatting wherever present. A
    // cell whose style cannot be decoded is skipped, never fatal.
    let mut formulas = BTreeMap::new();
    let mut formatting = BTreeMap::new();
    for cell in sheet.get_cell_collection() {
        let coordinate = cell.get_coordinate();
        let row = *coordinate.get_row_num();
        let col = *coordinate.get_col_num();
        if row > captured_rows {
            continue;
        }
        let address = cell_address(row - 1, col - 1);

        if cell.is_formula() {
            let formula = cell.get_formula();
            formulas.insert(address.clone(), format!("={}", formula.trim_start_matches('=')));
        }

        if let Some(style) = cell_style_from_style(cell.get_style()) {
            formatting.insert(address, style);
        }
    }

    let mut column_widths = BTreeMap::new();
    for column in sheet.get_column_dimensions() {
        let width = *column.get_width();
        if width > 0.0 {
            column_widths.insert(column_index_to_letters(*column.get_col_num() - 1), width);
        }
    }

    let mut row_heights = BTreeMap::new();
    for row in sheet.get_row_dimensions() {
        let height = *row.get_height();
        if height > 0.0 {
            row_heights.insert(*row.get_row_num(), height);
        }
    }

    let merged_ranges = sheet
        .get_merge_cells()
        .iter()
        .map(|range| range.get_range())
        .collect();

    SheetSnapshot {
        name: sheet.get_name().to_string(),
        max_row,
        max_column,
        has_data: max_row > 1 || max_column > 1,
        headers,
        data,
        formulas,
        formatting,
        column_widths,
        row_heights,
        merged_ranges,
    }
}

/// Write one cell into the on-disk workbook, inferring formula / integer /
/// float / text typing from the value. The file is saved before returning so
/// callers only touch the in-memory snapshot on success.
pub fn write_cell_to_file(
    path: &Path,
    sheet_name: &str,
    row: u32,
    col: u32,
    value: &str,
) -> Result<()> {
    check_cell_bounds(row, col)?;
    let mut book = reader::xlsx::read(path)
        .with_context(|| format!("failed to open workbook {:?}", path))?;
    let sheet = book
        .get_sheet_by_name_mut(sheet_name)
        .ok_or_else(|| anyhow!("sheet '{}' not found", sheet_name))?;

    // umya is 1-based.
    let cell = sheet.get_cell_mut((col + 1, row + 1));
    if let Some(formula) = value.strip_prefix('=') {
        cell.set_formula(formula.to_string());
        cell.get_cell_value_mut()
            .set_formula_result_default(String::new());
    } else {
        cell.get_cell_value_mut().remove_formula();
        if !value.contains('.')
            && let Ok(integer) = value.trim().parse::<i64>()
        {
            cell.set_value_number(integer as f64);
        } else if value.contains('.')
            && let Ok(float) = value.trim().parse::<f64>()
        {
            cell.set_value_number(float);
        } else {
            cell.set_value(value.to_string());
        }
    }

    writer::xlsx::write(&book, path)
        .with_context(|| format!("failed to save workbook {:?}", path))?;
    Ok(())
}

/// Mirror a successful file write into the snapshot: grow the grid if the
/// address is out of extents, register or clear the formula map entry.
pub fn apply_edit_to_snapshot(
    snapshot: &mut WorkbookSnapshot,
    sheet_name: &str,
    row: u32,
    col: u32,
    value: &str,
) -> Result<()> {
    let sheet = snapshot
        .sheet_mut(sheet_name)
        .ok_or_else(|| anyhow!("sheet '{}' not found", sheet_name))?;

    sheet.set_grid_value(row, col, value);

    let address = cell_address(row, col);
    if value.starts_with('=') {
        sheet.formulas.insert(address, value.to_string());
    } else {
        sheet.formulas.remove(&address);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use umya_spreadsheet::new_file;

    fn sample_book(dir: &Path) -> std::path::PathBuf {
        let mut book = new_file();
        let sheet = book.get_sheet_mut(&0).unwrap();
        sheet.get_cell_mut("A1").set_value("Nom");
        sheet.get_cell_mut("B1").set_value("Montant");
        sheet.get_cell_mut("A2").set_value("Alice");
        sheet.get_cell_mut("B2").set_value_number(120.0);
        sheet.get_cell_mut("B3").set_formula("SUM(B2:B2)");
        let path = dir.join("sample.xlsx");
        writer::xlsx::write(&book, &path).unwrap();
        path
    }

    #[test]
    fn snapshot_captures_grid_and_formulas() {
        let dir = tempdir().unwrap();
        let path = sample_book(dir.path());

        let snapshot = build_snapshot(&path).unwrap();
        assert_eq!(snapshot.total_sheets, 1);
        let sheet = &snapshot.sheets[0];
        assert!(sheet.has_data);
        assert_eq!(sheet.headers[0], "Nom");
        assert_eq!(sheet.data[1][0], "Alice");
        assert!(sheet.formulas.contains_key("B3"));
        assert!(sheet.formulas["B3"].starts_with('='));
    }

    #[test]
    fn write_integer_then_reopen_shows_value() {
        let dir = tempdir().unwrap();
        let path = sample_book(dir.path());

        write_cell_to_file(&path, "Sheet1", 2, 1, "42").unwrap();

        let book = reader::xlsx::read(&path).unwrap();
        let sheet = book.get_sheet_by_name("Sheet1").unwrap();
        let cell = sheet.get_cell("B3").unwrap();
        assert!(!cell.is_formula());
        assert_eq!(cell.get_value(), "42");
    }

    #[test]
    fn write_past_the_sheet_limits_fails_without_touching_the_file() {
        let dir = tempdir().unwrap();
        let path = sample_book(dir.path());
        let before = fs::read(&path).unwrap();

        assert!(write_cell_to_file(&path, "Sheet1", u32::MAX, 0, "42").is_err());
        assert!(write_cell_to_file(&path, "Sheet1", 0, MAX_SHEET_COLUMNS, "42").is_err());
        assert!(check_cell_bounds(MAX_SHEET_ROWS - 1, MAX_SHEET_COLUMNS - 1).is_ok());

        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn write_formula_registers_in_file() {
        let dir = tempdir().unwrap();
        let path = sample_book(dir.path());

        write_cell_to_file(&path, "Sheet1", 0, 2, "=A1+A2").unwrap();

        let book = reader::xlsx::read(&path).unwrap();
        let sheet = book.get_sheet_by_name("Sheet1").unwrap();
        let cell = sheet.get_cell("C1").unwrap();
        assert!(cell.is_formula());
    }

    #[test]
    fn write_to_unknown_sheet_fails_and_leaves_file_alone() {
        let dir = tempdir().unwrap();
        let path = sample_book(dir.path());
        let before = fs::read(&path).unwrap();

        let err = write_cell_to_file(&path, "NoSuchSheet", 0, 0, "1").unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn snapshot_edit_grows_grid_and_clears_stale_formula() {
        let dir = tempdir().unwrap();
        let path = sample_book(dir.path());
        let mut snapshot = build_snapshot(&path).unwrap();

        // B3 held a formula; writing a literal must clear the map entry.
        apply_edit_to_snapshot(&mut snapshot, "Sheet1", 2, 1, "42").unwrap();
        let sheet = snapshot.sheet("Sheet1").unwrap();
        assert_eq!(sheet.data[2][1], "42");
        assert!(!sheet.formulas.contains_key("B3"));

        // Out-of-extent target grows the grid with empty padding.
        apply_edit_to_snapshot(&mut snapshot, "Sheet1", 9, 5, "=B2*2").unwrap();
        let sheet = snapshot.sheet("Sheet1").unwrap();
        assert_eq!(sheet.data[9][5], "=B2*2");
        assert_eq!(sheet.data[9][0], "");
        assert_eq!(sheet.formulas["F10"], "=B2*2");
    }

    #[test]
    fn snapshot_edit_unknown_sheet_is_explicit_failure() {
        let dir = tempdir().unwrap();
        let path = sample_book(dir.path());
        let mut snapshot = build_snapshot(&path).unwrap();
        let before = snapshot.sheets[0].data.clone();

        assert!(apply_edit_to_snapshot(&mut snapshot, "Feuil9", 0, 0, "x").is_err());
        assert_eq!(snapshot.sheets[0].data, before);
    }
}
