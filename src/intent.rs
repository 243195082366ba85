use crate::utils::parse_cell_reference;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

/// French verbs (with common inflections) that signal a cell-edit request.
const MODIFICATION_KEYWORDS: &[&str] = &[
    "écris",
    "ecris",
    "écrire",
    "ecrire",
    "met",
    "mets",
    "mettre",
    "change",
    "changer",
    "modifie",
    "modifier",
    "insère",
    "insere",
    "insérer",
    "inserer",
    "ajoute",
    "ajouter",
    "remplace",
    "remplacer",
    "saisis",
    "saisir",
    "entre",
    "entrer",
    "place",
    "placer",
    "définis",
    "défini",
    "définir",
    "definir",
];

static CELL_REFERENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z]+\d+\b").unwrap());

static ACTION_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\{[^{}]*"action"[^{}]*\}"#).unwrap());

/// A structured edit decoded from a model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellUpdateAction {
    pub cell: String,
    pub row: u32,
    pub col: u32,
    pub value: String,
    pub sheet: Option<String>,
    /// Confirmation text the model wants shown to the user.
    pub message: Option<String>,
}

/// An edit request needs both an imperative keyword and an explicit A1-style
/// address. Keywords match case-insensitively; addresses must stay uppercase
/// so prose like "le total" never trips the gate.
pub fn is_modification_request(message: &str) -> bool {
    let lowered = message.to_lowercase();
    let has_keyword = MODIFICATION_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword));
    has_keyword && CELL_REFERENCE.is_match(message)
}

#[derive(Deserialize)]
struct RawAction {
    action: String,
    cell: Option<String>,
    value: Option<Value>,
    sheet: Option<String>,
    message: Option<String>,
}

/// Scan a model reply for a flat `{"action": ...}` object and decode it into
/// an update when well-formed. Anything else (missing fields, unknown action,
/// invalid address, nested braces) yields None and the reply is treated as
/// plain prose.
pub fn extract_update_action(reply: &str) -> Option<CellUpdateAction> {
    let candidate = ACTION_OBJECT.find(reply)?;
    let raw: RawAction = serde_json::from_str(candidate.as_str()).ok()?;
    if raw.action != "update_cell" {
        return None;
    }

    let cell = raw.cell?.trim().to_uppercase();
    let (row, col) = parse_cell_reference(&cell).ok()?;
    let value = match raw.value? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };

    Some(CellUpdateAction {
        cell,
        row,
        col,
        value,
        sheet: raw.sheet.filter(|name| !name.trim().is_empty()),
        message: raw.message.filter(|text| !text.trim().is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_and_address_together_trip_the_gate() {
        assert!(is_modification_request("Écris 42 dans la cellule B3"));
        assert!(is_modification_request("mets 100 en A1 s'il te plaît"));
    }

    #[test]
    fn bare_verb_stems_trip_the_gate() {
        assert!(is_modification_request("met 18 dans B2"));
        assert!(is_modification_request("défini A1 à 5"));
    }

    #[test]
    fn keyword_without_address_is_a_question() {
        assert!(!is_modification_request("modifie la présentation du tableau"));
    }

    #[test]
    fn address_without_keyword_is_a_question() {
        assert!(!is_modification_request("que contient la cellule B3 ?"));
    }

    #[test]
    fn lowercase_addresses_do_not_count() {
        assert!(!is_modification_request("écris quelque chose en b3"));
    }

    #[test]
    fn decodes_action_embedded_in_prose() {
        let reply = r#"D'accord. {"action": "update_cell", "cell": "B3", "value": 42} Voilà."#;
        let action = extract_update_action(reply).unwrap();
        assert_eq!(action.cell, "B3");
        assert_eq!(action.row, 2);
        assert_eq!(action.col, 1);
        assert_eq!(action.value, "42");
        assert_eq!(action.sheet, None);
    }

    #[test]
    fn string_values_and_sheet_names_survive() {
        let reply = r#"{"action": "update_cell", "cell": "a2", "value": "Total", "sheet": "Feuil2"}"#;
        let action = extract_update_action(reply).unwrap();
        assert_eq!(action.cell, "A2");
        assert_eq!(action.value, "Total");
        assert_eq!(action.sheet.as_deref(), Some("Feuil2"));
    }

    #[test]
    fn unknown_action_is_ignored() {
        let reply = r#"{"action": "delete_row", "cell": "B3", "value": 1}"#;
        assert!(extract_update_action(reply).is_none());
    }

    #[test]
    fn invalid_address_is_ignored() {
        let reply = r#"{"action": "update_cell", "cell": "42", "value": 1}"#;
        assert!(extract_update_action(reply).is_none());
    }

    #[test]
    fn plain_prose_yields_nothing() {
        assert!(extract_update_action("La somme des montants est 120.").is_none());
    }
}
