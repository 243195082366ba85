use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Structural copy of a workbook, independent of the on-disk file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkbookSnapshot {
    pub sheets: Vec<SheetSnapshot>,
    pub total_sheets: usize,
    pub has_vba: bool,
    pub file_size: u64,
    pub captured_at: DateTime<Utc>,
}

impl WorkbookSnapshot {
    pub fn sheet(&self, name: &str) -> Option<&SheetSnapshot> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn sheet_mut(&mut self, name: &str) -> Option<&mut SheetSnapshot> {
        self.sheets.iter_mut().find(|s| s.name == name)
    }

    pub fn first_sheet_name(&self) -> Option<&str> {
        self.sheets.first().map(|s| s.name.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetSnapshot {
    pub name: String,
    pub max_row: u32,
    pub max_column: u32,
    pub has_data: bool,
    pub headers: Vec<String>,
    /// Stringified display values, empty string for blank cells.
    pub data: Vec<Vec<String>>,
    /// Cell address -> formula text (with leading '=').
    pub formulas: BTreeMap<String, String>,
    /// Cell address -> non-default formatting.
    pub formatting: BTreeMap<String, CellStyle>,
    /// Column letters -> width in character units.
    pub column_widths: BTreeMap<String, f64>,
    /// 1-based row number -> height in points.
    pub row_heights: BTreeMap<u32, f64>,
    /// A1-style merged range descriptors ("A1:B2").
    pub merged_ranges: Vec<String>,
}

impl SheetSnapshot {
    /// Write a value into the grid, growing it with empty cells as needed.
    pub fn set_grid_value(&mut self, row: u32, col: u32, value: &str) {
        let row = row as usize;
        let col = col as usize;
        if self.data.len() <= row {
            self.data.resize_with(row + 1, Vec::new);
        }
        // Pad every row to the widest extent so the grid stays rectangular.
        let width = self
            .data
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
            .max(col + 1);
        for r in self.data.iter_mut() {
            if r.len() < width {
                r.resize(width, String::new());
            }
        }
        self.data[row][col] = value.to_string();
        self.max_row = self.max_row.max(row as u32 + 1);
        self.max_column = self.max_column.max(col as u32 + 1);
        self.has_data = true;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font: Option<FontStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill: Option<FillStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alignment: Option<AlignmentStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub borders: Option<BordersStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_format: Option<String>,
}

impl CellStyle {
    pub fn is_default(&self) -> bool {
        self.font.is_none()
            && self.fill.is_none()
            && self.alignment.is_none()
            && self.borders.is_none()
            && self.number_format.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FontStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FillStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreground_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlignmentStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horizontal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrap_text: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BordersStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bottom: Option<String>,
}

/// One user/assistant exchange, append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub user: String,
    pub assistant: String,
    pub timestamp: DateTime<Utc>,
}

// ---- request/response payloads ----

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub session_id: SessionId,
    pub message: String,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CellUpdateRequest {
    pub session_id: SessionId,
    pub sheet_name: String,
    /// 0-based row index.
    pub row: u32,
    /// 0-based column index.
    pub col: u32,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportRequest {
    pub session_id: SessionId,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub session_id: SessionId,
    pub filename: String,
    pub structure: WorkbookSnapshot,
    pub vba_modules: Vec<String>,
    pub vba_sources: BTreeMap<String, String>,
    pub initial_analysis: String,
}

#[derive(Debug, Serialize)]
pub struct CellUpdateResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SheetDataQuery {
    #[serde(default)]
    pub start_row: Option<u32>,
    #[serde(default)]
    pub end_row: Option<u32>,
    #[serde(default)]
    pub start_col: Option<u32>,
    #[serde(default)]
    pub end_col: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct SheetDataResponse {
    pub sheet_name: String,
    pub start_row: u32,
    pub end_row: u32,
    pub start_col: u32,
    pub end_col: u32,
    pub total_rows: u32,
    pub total_cols: u32,
    pub data: Vec<Vec<String>>,
    pub formulas: BTreeMap<String, String>,
    pub formatting: BTreeMap<String, CellStyle>,
    pub column_widths: BTreeMap<String, f64>,
    pub row_heights: BTreeMap<u32, f64>,
    pub merged_ranges: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RecalculateResponse {
    pub status: String,
    pub sheets_refreshed: usize,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: SessionId,
    pub filename: String,
    pub structure: WorkbookSnapshot,
    pub vba_modules: Vec<String>,
    pub chat_history: Vec<ChatTurn>,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub active_sessions: usize,
    pub session_timeout_secs: u64,
    pub model: String,
    pub max_upload_bytes: u64,
    pub allowed_extensions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet_with_grid(rows: Vec<Vec<&str>>) -> SheetSnapshot {
        let data: Vec<Vec<String>> = rows
            .into_iter()
            .map(|r| r.into_iter().map(String::from).collect())
            .collect();
        SheetSnapshot {
            name: "Ventes".to_string(),
            max_row: data.len() as u32,
            max_column: data.first().map_or(0, Vec::len) as u32,
            has_data: !data.is_empty(),
            headers: Vec::new(),
            data,
            formulas: BTreeMap::new(),
            formatting: BTreeMap::new(),
            column_widths: BTreeMap::new(),
            row_heights: BTreeMap::new(),
            merged_ranges: Vec::new(),
        }
    }

    #[test]
    fn grid_stays_rectangular_when_a_new_row_is_narrower() {
        let mut sheet = sheet_with_grid(vec![
            vec!["Produit", "Qté", "Prix"],
            vec!["Stylo", "4", "1.20"],
        ]);

        sheet.set_grid_value(5, 0, "x");

        let width = sheet.data[0].len();
        assert_eq!(width, 3);
        for (i, row) in sheet.data.iter().enumerate() {
            assert_eq!(row.len(), width, "row {i} has a different width");
        }
        assert_eq!(sheet.data[5][0], "x");
        assert_eq!(sheet.max_row, 6);
        assert_eq!(sheet.max_column, 3);
    }

    #[test]
    fn grid_widens_every_row_for_a_far_column() {
        let mut sheet = sheet_with_grid(vec![vec!["a"], vec!["b"]]);

        sheet.set_grid_value(0, 4, "e");

        for row in &sheet.data {
            assert_eq!(row.len(), 5);
        }
        assert_eq!(sheet.data[0][4], "e");
        assert_eq!(sheet.max_column, 5);
    }
}
