use crate::model::{SheetSnapshot, WorkbookSnapshot};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Hard bound on the context string handed to the model.
const MAX_CONTEXT_CHARS: usize = 6000;

const PREVIEW_ROWS: usize = 3;
const PREVIEW_COLUMNS: usize = 8;
const PREVIEW_MODULES: usize = 3;
const PREVIEW_MODULE_LINES: usize = 5;

/// Keyword families for the per-sheet content-type guess, checked in order.
/// Uploads are mostly French business files so both languages are covered.
const FINANCIAL_TERMS: &[&str] = &[
    "montant", "prix", "total", "facture", "budget", "coût", "cout", "tva", "solde", "amount",
    "price", "invoice",
];
const CUSTOMER_TERMS: &[&str] = &[
    "client", "nom", "prénom", "prenom", "email", "téléphone", "telephone", "contact", "adresse",
    "customer",
];
const SCHEDULING_TERMS: &[&str] = &[
    "date", "heure", "planning", "semaine", "jour", "horaire", "échéance", "echeance", "schedule",
];
const INVENTORY_TERMS: &[&str] = &[
    "stock", "quantité", "quantite", "produit", "référence", "reference", "inventaire", "sku",
    "entrepôt", "entrepot",
];

/// Heuristic content-type tag for one sheet. Headers and the first data rows
/// are scanned against each keyword family; the first family with a hit wins,
/// anything else is "mixed".
pub fn classify_sheet(sheet: &SheetSnapshot) -> &'static str {
    let mut haystack = sheet.headers.join(" ").to_lowercase();
    for row in sheet.data.iter().skip(1).take(PREVIEW_ROWS) {
        haystack.push(' ');
        haystack.push_str(&row.join(" ").to_lowercase());
    }

    let families: [(&'static str, &[&str]); 4] = [
        ("financial", FINANCIAL_TERMS),
        ("customer", CUSTOMER_TERMS),
        ("scheduling", SCHEDULING_TERMS),
        ("inventory", INVENTORY_TERMS),
    ];
    for (tag, terms) in families {
        if terms.iter().any(|term| haystack.contains(term)) {
            return tag;
        }
    }
    "mixed"
}

/// Non-empty-cell fill ratio over the captured grid, in [0, 1].
pub fn fill_ratio(sheet: &SheetSnapshot) -> f64 {
    let total: usize = sheet.data.iter().map(|row| row.len()).sum();
    if total == 0 {
        return 0.0;
    }
    let filled = sheet
        .data
        .iter()
        .flatten()
        .filter(|value| !value.is_empty())
        .count();
    filled as f64 / total as f64
}

/// Render the compact workbook description that primes the model: sheet
/// summaries, a preview of the first sheet, and truncated macro previews.
/// This string is the model's only window into the spreadsheet, so every
/// section is bounded and the whole thing is hard-truncated at the end.
pub fn build_workbook_context(
    filename: &str,
    snapshot: &WorkbookSnapshot,
    vba_modules: &BTreeMap<String, String>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Fichier Excel \"{}\" : {} feuille(s), VBA : {}.",
        filename,
        snapshot.total_sheets,
        if snapshot.has_vba { "oui" } else { "non" }
    );

    for sheet in &snapshot.sheets {
        let _ = writeln!(
            out,
            "- Feuille \"{}\" ({}) : {} lignes x {} colonnes, {} formule(s), {:.0}% remplie.",
            sheet.name,
            classify_sheet(sheet),
            sheet.max_row,
            sheet.max_column,
            sheet.formulas.len(),
            fill_ratio(sheet) * 100.0
        );
    }

    if let Some(first) = snapshot.sheets.first()
        && first.has_data
    {
        let _ = writeln!(out, "\nAperçu de \"{}\" :", first.name);
        for row in first.data.iter().take(PREVIEW_ROWS) {
            let cells: Vec<&str> = row
                .iter()
                .take(PREVIEW_COLUMNS)
                .map(String::as_str)
                .collect();
            let _ = writeln!(out, "  {}", cells.join(" | "));
        }
    }

    if !vba_modules.is_empty() {
        let _ = writeln!(out, "\nModules VBA :");
        for (index, (name, source)) in vba_modules.iter().enumerate() {
            if index < PREVIEW_MODULES {
                let _ = writeln!(out, "  {} :", name);
                for line in non_comment_lines(source).take(PREVIEW_MODULE_LINES) {
                    let _ = writeln!(out, "    {}", line);
                }
            } else {
                let _ = writeln!(out, "  {} (non détaillé)", name);
            }
        }
    }

    truncate_to_chars(out, MAX_CONTEXT_CHARS)
}

fn non_comment_lines(source: &str) -> impl Iterator<Item = &str> {
    source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('\''))
}

fn truncate_to_chars(mut text: String, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text;
    }
    let cut = text
        .char_indices()
        .nth(limit)
        .map(|(index, _)| index)
        .unwrap_or(text.len());
    text.truncate(cut);
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sheet(headers: &[&str], rows: &[&[&str]]) -> SheetSnapshot {
        let mut data = vec![headers.iter().map(|s| s.to_string()).collect::<Vec<_>>()];
        for row in rows {
            data.push(row.iter().map(|s| s.to_string()).collect());
        }
        SheetSnapshot {
            name: "Feuil1".to_string(),
            max_row: data.len() as u32,
            max_column: headers.len() as u32,
            has_data: true,
            headers: headers.iter().map(|s| s.to_string()).collect(),
            data,
            formulas: BTreeMap::new(),
            formatting: BTreeMap::new(),
            column_widths: BTreeMap::new(),
            row_heights: BTreeMap::new(),
            merged_ranges: Vec::new(),
        }
    }

    fn snapshot(sheets: Vec<SheetSnapshot>) -> WorkbookSnapshot {
        WorkbookSnapshot {
            total_sheets: sheets.len(),
            sheets,
            has_vba: false,
            file_size: 1024,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn financial_wins_over_later_families() {
        let s = sheet(&["Client", "Montant", "Date"], &[&["Alice", "120", "2024-01-01"]]);
        assert_eq!(classify_sheet(&s), "financial");
    }

    #[test]
    fn customer_headers_without_money_tag_customer() {
        let s = sheet(&["Nom", "Email"], &[&["Alice", "a@b.fr"]]);
        assert_eq!(classify_sheet(&s), "customer");
    }

    #[test]
    fn unrecognized_headers_fall_back_to_mixed() {
        let s = sheet(&["Alpha", "Beta"], &[&["x", "y"]]);
        assert_eq!(classify_sheet(&s), "mixed");
    }

    #[test]
    fn fill_ratio_counts_empty_cells() {
        let s = sheet(&["A", "B"], &[&["x", ""]]);
        assert!((fill_ratio(&s) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn context_is_bounded_and_mentions_every_sheet() {
        let wide: Vec<String> = (0..40).map(|i| format!("Colonne{i}")).collect();
        let wide_refs: Vec<&str> = wide.iter().map(String::as_str).collect();
        let big_row: Vec<String> = (0..40).map(|i| format!("valeur-{i}-{}", "x".repeat(50))).collect();
        let big_refs: Vec<&str> = big_row.iter().map(String::as_str).collect();
        let rows: Vec<&[&str]> = (0..20).map(|_| big_refs.as_slice()).collect();
        let snap = snapshot(vec![sheet(&wide_refs, &rows)]);

        let context = build_workbook_context("gros.xlsx", &snap, &BTreeMap::new());
        assert!(context.chars().count() <= MAX_CONTEXT_CHARS);
        assert!(context.contains("Feuil1"));
    }

    #[test]
    fn macro_preview_drops_comments_and_caps_modules() {
        let mut modules = BTreeMap::new();
        modules.insert(
            "Module1".to_string(),
            "' entête\nSub Go()\nMsgBox \"ok\"\nEnd Sub".to_string(),
        );
        for i in 2..=5 {
            modules.insert(format!("Module{i}"), "Sub X()\nEnd Sub".to_string());
        }
        let snap = snapshot(vec![sheet(&["A"], &[&["1"]])]);

        let context = build_workbook_context("macros.xlsm", &snap, &modules);
        assert!(!context.contains("entête"));
        assert!(context.contains("Sub Go()"));
        assert!(context.contains("Module5 (non détaillé)"));
    }
}
