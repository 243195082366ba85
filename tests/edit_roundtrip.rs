use spreadsheet_agent::model::WorkbookSnapshot;
use spreadsheet_agent::workbook::{apply_edit_to_snapshot, build_snapshot, write_cell_to_file};
use std::path::Path;
use tempfile::tempdir;

fn write_fixture(path: &Path) {
    let mut workbook = umya_spreadsheet::new_file();
    let sheet = workbook
        .get_sheet_by_name_mut("Sheet1")
        .expect("default sheet exists");
    sheet.get_cell_mut("A1").set_value("Montant");
    sheet.get_cell_mut("A2").set_value_number(100.0);
    sheet.get_cell_mut("B3").set_formula("SUM(A2:A2)");
    umya_spreadsheet::writer::xlsx::write(&workbook, path).expect("write workbook");
}

fn edit(path: &Path, snapshot: &mut WorkbookSnapshot, row: u32, col: u32, value: &str) {
    write_cell_to_file(path, "Sheet1", row, col, value).expect("file edit");
    apply_edit_to_snapshot(snapshot, "Sheet1", row, col, value).expect("snapshot edit");
}

#[test]
fn literal_edit_lands_in_grid_and_file_and_clears_formula() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("book.xlsx");
    write_fixture(&path);
    let mut snapshot = build_snapshot(&path).expect("snapshot");

    edit(&path, &mut snapshot, 2, 1, "42");

    let sheet = snapshot.sheet("Sheet1").expect("sheet");
    assert_eq!(sheet.data[2][1], "42");
    assert!(!sheet.formulas.contains_key("B3"));

    let workbook = umya_spreadsheet::reader::xlsx::read(&path).expect("reopen");
    let cell = workbook
        .get_sheet_by_name("Sheet1")
        .expect("sheet")
        .get_cell("B3")
        .expect("cell");
    assert!(!cell.is_formula());
    assert_eq!(cell.get_value(), "42");
}

#[test]
fn formula_edit_registers_in_both_views() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("book.xlsx");
    write_fixture(&path);
    let mut snapshot = build_snapshot(&path).expect("snapshot");

    edit(&path, &mut snapshot, 3, 0, "=A2*2");

    assert_eq!(
        snapshot.sheet("Sheet1").expect("sheet").formulas["A4"],
        "=A2*2"
    );
    let workbook = umya_spreadsheet::reader::xlsx::read(&path).expect("reopen");
    assert!(
        workbook
            .get_sheet_by_name("Sheet1")
            .expect("sheet")
            .get_cell("A4")
            .expect("cell")
            .is_formula()
    );
}

#[test]
fn export_bytes_reflect_the_latest_edit() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("book.xlsx");
    write_fixture(&path);
    let mut snapshot = build_snapshot(&path).expect("snapshot");

    edit(&path, &mut snapshot, 0, 2, "Export");

    // Export streams the on-disk file verbatim; reopening those bytes must
    // show the edit.
    let exported = std::fs::read(&path).expect("export bytes");
    let copy = tmp.path().join("exported.xlsx");
    std::fs::write(&copy, exported).expect("rewrite export");

    let workbook = umya_spreadsheet::reader::xlsx::read(&copy).expect("reopen export");
    let value = workbook
        .get_sheet_by_name("Sheet1")
        .expect("sheet")
        .get_cell("C1")
        .expect("cell")
        .get_value()
        .to_string();
    assert_eq!(value, "Export");
}

#[test]
fn rebuilding_the_snapshot_picks_up_on_disk_state() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("book.xlsx");
    write_fixture(&path);

    write_cell_to_file(&path, "Sheet1", 4, 0, "hors snapshot").expect("file edit");

    // The refresh path rebuilds from disk, the way recalculation does.
    let refreshed = build_snapshot(&path).expect("refreshed snapshot");
    assert_eq!(refreshed.sheet("Sheet1").expect("sheet").data[4][0], "hors snapshot");
}
